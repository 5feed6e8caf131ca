use crate::{
    db::{bounded, DbPool},
    entities::appointment::{self, AppointmentStatus},
    errors::ServiceError,
};
use chrono::{Duration, NaiveDate, NaiveDateTime};
use dashmap::DashMap;
use sea_orm::{ColumnTrait, Condition, ConnectionTrait, DbErr, EntityTrait, QueryFilter, QueryOrder};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard, OwnedRwLockReadGuard, OwnedRwLockWriteGuard, RwLock};
use tracing::{debug, instrument};

/// Longest bookable appointment; bounds the look-behind window when loading bookings.
pub const MAX_APPOINTMENT_MINUTES: i32 = 480;
pub const DEFAULT_APPOINTMENT_MINUTES: i32 = 30;

/// Half-open interval `[start, end)`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Slot {
    pub start: NaiveDateTime,
    pub end: NaiveDateTime,
}

impl Slot {
    pub fn new(start: NaiveDateTime, duration_minutes: i32) -> Self {
        Self {
            start,
            end: start + Duration::minutes(i64::from(duration_minutes)),
        }
    }

    /// Back-to-back slots (one ends exactly when the other starts) do not overlap.
    pub fn overlaps(&self, other: &Slot) -> bool {
        self.start < other.end && other.start < self.end
    }
}

/// An existing appointment as seen by the conflict check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Booking {
    pub appointment_id: i32,
    pub staff_id: Option<i32>,
    pub status: AppointmentStatus,
    pub slot: Slot,
}

impl From<&appointment::Model> for Booking {
    fn from(model: &appointment::Model) -> Self {
        Self {
            appointment_id: model.id,
            staff_id: model.staff_id,
            status: model.status,
            slot: Slot::new(model.appointment_date, model.duration_minutes),
        }
    }
}

impl Booking {
    /// Whether this booking prevents `candidate` from being booked for `staff_id`.
    pub fn blocks(&self, candidate: &Slot, staff_id: Option<i32>) -> bool {
        self.status.blocks_schedule()
            && self.slot.overlaps(candidate)
            && shares_schedule(self.staff_id, staff_id)
    }
}

/// Same staff member, or either side unassigned.
fn shares_schedule(existing: Option<i32>, candidate: Option<i32>) -> bool {
    match (existing, candidate) {
        (Some(a), Some(b)) => a == b,
        _ => true,
    }
}

/// Pure conflict decision over a snapshot of bookings.
pub fn is_free(
    bookings: &[Booking],
    candidate: &Slot,
    staff_id: Option<i32>,
    exclude: Option<i32>,
) -> bool {
    !bookings
        .iter()
        .filter(|b| Some(b.appointment_id) != exclude)
        .any(|b| b.blocks(candidate, staff_id))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessHours {
    pub open_hour: u32,
    pub close_hour: u32,
}

impl Default for BusinessHours {
    fn default() -> Self {
        Self {
            open_hour: 9,
            close_hour: 17,
        }
    }
}

impl BusinessHours {
    pub fn new(open_hour: u32, close_hour: u32) -> Result<Self, ServiceError> {
        if open_hour >= close_hour || close_hour > 24 {
            return Err(ServiceError::ValidationError(format!(
                "business hours {}..{} are not a valid opening window",
                open_hour, close_hour
            )));
        }
        Ok(Self {
            open_hour,
            close_hour,
        })
    }

    pub fn opens_at(&self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(chrono::NaiveTime::MIN) + Duration::hours(i64::from(self.open_hour))
    }

    pub fn closes_at(&self, date: NaiveDate) -> NaiveDateTime {
        date.and_time(chrono::NaiveTime::MIN) + Duration::hours(i64::from(self.close_hour))
    }
}

/// Free slots for one day, computed from a snapshot of that day's bookings.
///
/// `iter()` restarts from the opening hour every time it is called. The snapshot
/// is never refreshed; load a new one to observe later bookings.
#[derive(Debug, Clone)]
pub struct AvailableSlots {
    date: NaiveDate,
    staff_id: Option<i32>,
    hours: BusinessHours,
    step: Duration,
    bookings: Vec<Booking>,
}

impl AvailableSlots {
    pub fn new(
        date: NaiveDate,
        staff_id: Option<i32>,
        hours: BusinessHours,
        step_minutes: u32,
        bookings: Vec<Booking>,
    ) -> Result<Self, ServiceError> {
        if step_minutes == 0 {
            return Err(ServiceError::ValidationError(
                "slot step must be at least one minute".to_string(),
            ));
        }
        Ok(Self {
            date,
            staff_id,
            hours,
            step: Duration::minutes(i64::from(step_minutes)),
            bookings,
        })
    }

    pub fn date(&self) -> NaiveDate {
        self.date
    }

    pub fn staff_id(&self) -> Option<i32> {
        self.staff_id
    }

    /// Step-aligned start times whose whole step fits inside business hours
    /// and collides with no blocking booking.
    pub fn iter(&self) -> impl Iterator<Item = NaiveDateTime> + '_ {
        let step = self.step;
        let close = self.hours.closes_at(self.date);
        std::iter::successors(Some(self.hours.opens_at(self.date)), move |t| Some(*t + step))
            .take_while(move |t| *t + step <= close)
            .filter(move |t| {
                is_free(
                    &self.bookings,
                    &Slot {
                        start: *t,
                        end: *t + step,
                    },
                    self.staff_id,
                    None,
                )
            })
    }

    pub fn to_vec(&self) -> Vec<NaiveDateTime> {
        self.iter().collect()
    }

    pub fn is_empty(&self) -> bool {
        self.iter().next().is_none()
    }
}

impl<'a> IntoIterator for &'a AvailableSlots {
    type Item = NaiveDateTime;
    type IntoIter = Box<dyn Iterator<Item = NaiveDateTime> + 'a>;

    fn into_iter(self) -> Self::IntoIter {
        Box::new(self.iter())
    }
}

/// Loads blocking bookings that may overlap `[from, to)` on the schedule of `staff_id`.
///
/// For an assigned staff member that is their own bookings plus every unassigned
/// one; for the unassigned pool it is every booking.
pub async fn load_bookings<C>(
    conn: &C,
    from: NaiveDateTime,
    to: NaiveDateTime,
    staff_id: Option<i32>,
) -> Result<Vec<Booking>, DbErr>
where
    C: ConnectionTrait,
{
    let mut query = appointment::Entity::find()
        .filter(appointment::Column::Status.is_in(AppointmentStatus::BLOCKING))
        .filter(
            appointment::Column::AppointmentDate
                .gt(from - Duration::minutes(i64::from(MAX_APPOINTMENT_MINUTES))),
        )
        .filter(appointment::Column::AppointmentDate.lt(to));

    if let Some(staff_id) = staff_id {
        query = query.filter(
            Condition::any()
                .add(appointment::Column::StaffId.eq(staff_id))
                .add(appointment::Column::StaffId.is_null()),
        );
    }

    let rows = query
        .order_by_asc(appointment::Column::AppointmentDate)
        .all(conn)
        .await?;

    Ok(rows.iter().map(Booking::from).collect())
}

/// Availability check that runs on any connection, including an open transaction.
pub async fn slot_is_free<C>(
    conn: &C,
    candidate: &Slot,
    staff_id: Option<i32>,
    exclude: Option<i32>,
) -> Result<bool, DbErr>
where
    C: ConnectionTrait,
{
    let bookings = load_bookings(conn, candidate.start, candidate.end, staff_id).await?;
    Ok(is_free(&bookings, candidate, staff_id, exclude))
}

/// Read-only availability queries over the appointment table.
#[derive(Clone)]
pub struct AvailabilityEngine {
    db_pool: Arc<DbPool>,
    hours: BusinessHours,
    step_minutes: u32,
    timeout: std::time::Duration,
}

impl AvailabilityEngine {
    pub fn new(
        db_pool: Arc<DbPool>,
        hours: BusinessHours,
        step_minutes: u32,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            db_pool,
            hours,
            step_minutes,
            timeout,
        }
    }

    /// True when no Pending/Approved booking collides with the candidate slot.
    #[instrument(skip(self))]
    pub async fn check_availability(
        &self,
        start: NaiveDateTime,
        staff_id: Option<i32>,
        duration_minutes: i32,
    ) -> Result<bool, ServiceError> {
        self.check_availability_excluding(start, staff_id, duration_minutes, None)
            .await
    }

    /// Like `check_availability`, ignoring the appointment being moved.
    #[instrument(skip(self))]
    pub async fn check_availability_excluding(
        &self,
        start: NaiveDateTime,
        staff_id: Option<i32>,
        duration_minutes: i32,
        exclude: Option<i32>,
    ) -> Result<bool, ServiceError> {
        validate_duration(duration_minutes)?;
        let candidate = Slot::new(start, duration_minutes);
        let db = &*self.db_pool;

        let free = bounded(self.timeout, "availability.check", async {
            Ok::<_, ServiceError>(slot_is_free(db, &candidate, staff_id, exclude).await?)
        })
        .await?;

        debug!(free, "Availability checked");
        Ok(free)
    }

    /// Free slots for `date` using the configured business hours and step.
    pub async fn list_available_slots(
        &self,
        date: NaiveDate,
        staff_id: Option<i32>,
    ) -> Result<AvailableSlots, ServiceError> {
        self.list_available_slots_with(date, staff_id, self.hours, self.step_minutes)
            .await
    }

    #[instrument(skip(self))]
    pub async fn list_available_slots_with(
        &self,
        date: NaiveDate,
        staff_id: Option<i32>,
        hours: BusinessHours,
        step_minutes: u32,
    ) -> Result<AvailableSlots, ServiceError> {
        let hours = BusinessHours::new(hours.open_hour, hours.close_hour)?;
        let db = &*self.db_pool;

        let bookings = bounded(self.timeout, "availability.list_slots", async {
            Ok::<_, ServiceError>(
                load_bookings(db, hours.opens_at(date), hours.closes_at(date), staff_id).await?,
            )
        })
        .await?;

        AvailableSlots::new(date, staff_id, hours, step_minutes, bookings)
    }
}

pub(crate) fn validate_duration(duration_minutes: i32) -> Result<(), ServiceError> {
    if !(1..=MAX_APPOINTMENT_MINUTES).contains(&duration_minutes) {
        return Err(ServiceError::ValidationError(format!(
            "duration must be between 1 and {} minutes, got {}",
            MAX_APPOINTMENT_MINUTES, duration_minutes
        )));
    }
    Ok(())
}

/// Serializes check-then-write sequences on the schedule.
///
/// Assigned bookings share the pool lock and hold one mutex per staff member,
/// so different staff proceed in parallel. Unassigned bookings collide with
/// everyone and take the pool lock exclusively.
#[derive(Clone, Default)]
pub struct ScheduleLocks {
    pool: Arc<RwLock<()>>,
    staff: Arc<DashMap<i32, Arc<Mutex<()>>>>,
}

/// Held for the whole check-then-write sequence; releases on drop.
#[must_use]
pub enum ScheduleGuard {
    Staff {
        _pool: OwnedRwLockReadGuard<()>,
        _staff: Vec<OwnedMutexGuard<()>>,
    },
    Pool(OwnedRwLockWriteGuard<()>),
}

impl ScheduleLocks {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn acquire(&self, staff_id: Option<i32>) -> ScheduleGuard {
        self.acquire_all(&[staff_id]).await
    }

    /// Locks several schedules at once. Staff mutexes are taken in ascending id
    /// order so two callers locking overlapping sets cannot deadlock.
    pub async fn acquire_all(&self, staff_ids: &[Option<i32>]) -> ScheduleGuard {
        if staff_ids.iter().any(Option::is_none) {
            return ScheduleGuard::Pool(self.pool.clone().write_owned().await);
        }

        let mut ids: Vec<i32> = staff_ids.iter().flatten().copied().collect();
        ids.sort_unstable();
        ids.dedup();

        let pool = self.pool.clone().read_owned().await;
        let mut guards = Vec::with_capacity(ids.len());
        for id in ids {
            let mutex = self.staff.entry(id).or_default().clone();
            guards.push(mutex.lock_owned().await);
        }

        ScheduleGuard::Staff {
            _pool: pool,
            _staff: guards,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    fn at(hour: u32, minute: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 6, 1)
            .unwrap()
            .and_hms_opt(hour, minute, 0)
            .unwrap()
    }

    fn booking(id: i32, staff_id: Option<i32>, start: NaiveDateTime, minutes: i32) -> Booking {
        Booking {
            appointment_id: id,
            staff_id,
            status: AppointmentStatus::Pending,
            slot: Slot::new(start, minutes),
        }
    }

    #[rstest]
    #[case(at(10, 0), 30, at(10, 15), 30, true)]
    #[case(at(10, 0), 30, at(10, 30), 30, false)]
    #[case(at(10, 30), 30, at(10, 0), 30, false)]
    #[case(at(10, 0), 120, at(10, 30), 15, true)]
    #[case(at(10, 0), 1, at(10, 0), 1, true)]
    fn overlap_is_half_open(
        #[case] a_start: NaiveDateTime,
        #[case] a_minutes: i32,
        #[case] b_start: NaiveDateTime,
        #[case] b_minutes: i32,
        #[case] expected: bool,
    ) {
        let a = Slot::new(a_start, a_minutes);
        let b = Slot::new(b_start, b_minutes);
        assert_eq!(a.overlaps(&b), expected);
        assert_eq!(b.overlaps(&a), expected);
    }

    #[rstest]
    #[case(Some(7), Some(7), false)]
    #[case(Some(7), Some(8), true)]
    #[case(None, Some(8), false)]
    #[case(Some(7), None, false)]
    #[case(None, None, false)]
    fn staff_rule(#[case] existing: Option<i32>, #[case] candidate: Option<i32>, #[case] free: bool) {
        let bookings = [booking(1, existing, at(10, 0), 30)];
        assert_eq!(
            is_free(&bookings, &Slot::new(at(10, 15), 30), candidate, None),
            free
        );
    }

    #[test]
    fn finished_and_cancelled_bookings_never_block() {
        for status in [AppointmentStatus::Completed, AppointmentStatus::Cancelled] {
            let mut b = booking(1, Some(7), at(10, 0), 30);
            b.status = status;
            assert!(is_free(&[b], &Slot::new(at(10, 0), 30), Some(7), None));
        }
    }

    #[test]
    fn excluded_booking_is_ignored() {
        let bookings = [booking(4, Some(7), at(10, 0), 30)];
        let candidate = Slot::new(at(10, 15), 30);
        assert!(!is_free(&bookings, &candidate, Some(7), None));
        assert!(is_free(&bookings, &candidate, Some(7), Some(4)));
    }

    #[test]
    fn slots_skip_booked_times_and_restart() {
        let date = at(0, 0).date();
        let slots = AvailableSlots::new(
            date,
            Some(7),
            BusinessHours::default(),
            30,
            vec![
                booking(1, Some(7), at(10, 0), 45),
                booking(2, Some(8), at(12, 0), 30),
            ],
        )
        .unwrap();

        let first: Vec<_> = slots.iter().collect();
        assert_eq!(first.len(), 16 - 2);
        assert_eq!(first[0], at(9, 0));
        assert_eq!(*first.last().unwrap(), at(16, 30));
        assert!(!first.contains(&at(10, 0)));
        assert!(!first.contains(&at(10, 30)));
        assert!(first.contains(&at(11, 0)));
        assert!(first.contains(&at(12, 0)));

        assert_eq!(slots.to_vec(), first);
    }

    #[test]
    fn unassigned_pool_sees_every_booking() {
        let slots = AvailableSlots::new(
            at(0, 0).date(),
            None,
            BusinessHours::new(9, 11).unwrap(),
            60,
            vec![booking(1, Some(3), at(9, 0), 30)],
        )
        .unwrap();
        assert_eq!(slots.to_vec(), vec![at(10, 0)]);
    }

    #[test]
    fn slot_must_fit_before_closing() {
        let slots = AvailableSlots::new(
            at(0, 0).date(),
            Some(1),
            BusinessHours::new(9, 10).unwrap(),
            45,
            Vec::new(),
        )
        .unwrap();
        assert_eq!(slots.to_vec(), vec![at(9, 0)]);
    }

    #[test]
    fn invalid_inputs_are_rejected() {
        assert!(BusinessHours::new(17, 9).is_err());
        assert!(BusinessHours::new(9, 25).is_err());
        assert!(BusinessHours::new(0, 24).is_ok());
        assert!(AvailableSlots::new(at(0, 0).date(), None, BusinessHours::default(), 0, vec![]).is_err());
        assert!(validate_duration(0).is_err());
        assert!(validate_duration(MAX_APPOINTMENT_MINUTES + 1).is_err());
        assert!(validate_duration(DEFAULT_APPOINTMENT_MINUTES).is_ok());
    }

    #[tokio::test]
    async fn staff_locks_are_independent() {
        let locks = ScheduleLocks::new();
        let _seven = locks.acquire(Some(7)).await;
        // A different staff member is not blocked
        let eight = tokio::time::timeout(std::time::Duration::from_millis(50), locks.acquire(Some(8))).await;
        assert!(eight.is_ok());
        // The same staff member and the unassigned pool are
        let again = tokio::time::timeout(std::time::Duration::from_millis(50), locks.acquire(Some(7))).await;
        assert!(again.is_err());
        let pool = tokio::time::timeout(std::time::Duration::from_millis(50), locks.acquire(None)).await;
        assert!(pool.is_err());
    }
}
