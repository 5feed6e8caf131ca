use crate::{
    db::{bounded, DbPool},
    entities::{
        appointment::{self, AppointmentStatus, ServiceType},
        user::UserRole,
    },
    errors::ServiceError,
    events::{publish, Event, EventSender},
    services::availability::{
        slot_is_free, validate_duration, ScheduleGuard, ScheduleLocks, Slot,
        DEFAULT_APPOINTMENT_MINUTES,
    },
};
use chrono::{Duration, Local, NaiveDate, NaiveDateTime, Utc};
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::str::FromStr;
use std::sync::Arc;
use tracing::{info, instrument, warn};
use validator::Validate;

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewAppointment {
    pub customer_id: i32,
    pub staff_id: Option<i32>,
    pub service_type: ServiceType,
    pub start: NaiveDateTime,
    #[validate(range(min = 1, max = 480))]
    pub duration_minutes: i32,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

impl NewAppointment {
    pub fn new(
        customer_id: i32,
        staff_id: Option<i32>,
        service_type: ServiceType,
        start: NaiveDateTime,
    ) -> Self {
        Self {
            customer_id,
            staff_id,
            service_type,
            start,
            duration_minutes: DEFAULT_APPOINTMENT_MINUTES,
            notes: None,
        }
    }

    pub fn with_duration(mut self, minutes: i32) -> Self {
        self.duration_minutes = minutes;
        self
    }

    pub fn with_notes(mut self, notes: impl Into<String>) -> Self {
        self.notes = Some(notes.into());
        self
    }
}

/// Matches a menu label such as "Vet Check-up" against the offered services.
pub fn service_from_menu(label: &str) -> Result<ServiceType, ServiceError> {
    ServiceType::from_str(label.trim())
        .map_err(|_| ServiceError::ValidationError(format!("unknown service '{}'", label)))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AppointmentStats {
    pub total: u64,
    pub by_status: BTreeMap<AppointmentStatus, u64>,
    pub by_service: BTreeMap<ServiceType, u64>,
}

impl AppointmentStats {
    fn from_rows(rows: impl IntoIterator<Item = (AppointmentStatus, ServiceType)>) -> Self {
        rows.into_iter()
            .fold(Self::default(), |mut stats, (status, service)| {
                stats.total += 1;
                *stats.by_status.entry(status).or_default() += 1;
                *stats.by_service.entry(service).or_default() += 1;
                stats
            })
    }
}

/// Books, moves and closes appointments.
///
/// Every write that can add a booking to a schedule runs its availability
/// check and its write in one transaction while holding the schedule lock
/// for every staff member it touches.
#[derive(Clone)]
pub struct AppointmentService {
    db_pool: Arc<DbPool>,
    locks: ScheduleLocks,
    event_sender: Option<Arc<EventSender>>,
    timeout: std::time::Duration,
}

impl AppointmentService {
    pub fn new(
        db_pool: Arc<DbPool>,
        locks: ScheduleLocks,
        event_sender: Option<Arc<EventSender>>,
        timeout: std::time::Duration,
    ) -> Self {
        Self {
            db_pool,
            locks,
            event_sender,
            timeout,
        }
    }

    /// Books a new Pending appointment.
    #[instrument(skip(self, request), fields(customer_id = request.customer_id, staff_id = ?request.staff_id, start = %request.start))]
    pub async fn create(&self, request: NewAppointment) -> Result<appointment::Model, ServiceError> {
        request.validate()?;
        let candidate = Slot::new(request.start, request.duration_minutes);
        let db = &*self.db_pool;

        let model = bounded(self.timeout, "appointments.create", async {
            let _guard = self.locks.acquire(request.staff_id).await;
            let txn = db.begin().await?;

            if !slot_is_free(&txn, &candidate, request.staff_id, None).await? {
                return Err(ServiceError::SlotUnavailable {
                    start: request.start,
                    staff_id: request.staff_id,
                });
            }

            let model = appointment::ActiveModel {
                customer_id: Set(request.customer_id),
                staff_id: Set(request.staff_id),
                service_type: Set(request.service_type),
                appointment_date: Set(request.start),
                duration_minutes: Set(request.duration_minutes),
                notes: Set(request.notes.clone()),
                status: Set(AppointmentStatus::Pending),
                ..Default::default()
            }
            .insert(&txn)
            .await?;

            txn.commit().await?;
            Ok::<_, ServiceError>(model)
        })
        .await?;

        info!(appointment_id = model.id, "Appointment booked");
        publish(
            &self.event_sender,
            vec![Event::AppointmentBooked {
                appointment_id: model.id,
                customer_id: model.customer_id,
                staff_id: model.staff_id,
                start: model.appointment_date,
            }],
        );

        Ok(model)
    }

    /// Moves a non-terminal appointment to `new_start`, optionally to another staff member.
    #[instrument(skip(self))]
    pub async fn reschedule(
        &self,
        appointment_id: i32,
        new_start: NaiveDateTime,
        staff_id: Option<i32>,
    ) -> Result<appointment::Model, ServiceError> {
        let model = bounded(self.timeout, "appointments.reschedule", async {
            let (_guard, current) = self.lock_existing(appointment_id, staff_id).await?;
            let target_staff = staff_id.or(current.staff_id);
            self.move_locked(current, new_start, target_staff).await
        })
        .await?;

        info!(appointment_id, start = %model.appointment_date, "Appointment rescheduled");
        publish(
            &self.event_sender,
            vec![Event::AppointmentRescheduled {
                appointment_id,
                staff_id: model.staff_id,
                start: model.appointment_date,
            }],
        );

        Ok(model)
    }

    /// Hands an appointment to a staff member, keeping its time.
    ///
    /// The new staff member's schedule is checked the same way a fresh booking is.
    #[instrument(skip(self))]
    pub async fn assign_staff(
        &self,
        appointment_id: i32,
        staff_id: i32,
    ) -> Result<appointment::Model, ServiceError> {
        let model = bounded(self.timeout, "appointments.assign_staff", async {
            let (_guard, current) = self.lock_existing(appointment_id, Some(staff_id)).await?;
            let start = current.appointment_date;
            self.move_locked(current, start, Some(staff_id)).await
        })
        .await?;

        info!(appointment_id, staff_id, "Staff assigned to appointment");
        publish(
            &self.event_sender,
            vec![Event::AppointmentStaffAssigned {
                appointment_id,
                staff_id,
            }],
        );

        Ok(model)
    }

    /// Applies one state-machine step.
    #[instrument(skip(self))]
    pub async fn update_status(
        &self,
        appointment_id: i32,
        new_status: AppointmentStatus,
    ) -> Result<appointment::Model, ServiceError> {
        self.transition(appointment_id, new_status, None).await
    }

    /// Cancels on behalf of `actor`. Customers may only withdraw a Pending request.
    #[instrument(skip(self))]
    pub async fn cancel(
        &self,
        appointment_id: i32,
        actor: UserRole,
    ) -> Result<appointment::Model, ServiceError> {
        self.transition(appointment_id, AppointmentStatus::Cancelled, Some(actor))
            .await
    }

    async fn transition(
        &self,
        appointment_id: i32,
        new_status: AppointmentStatus,
        actor: Option<UserRole>,
    ) -> Result<appointment::Model, ServiceError> {
        let db = &*self.db_pool;

        let (old_status, model) = bounded(self.timeout, "appointments.update_status", async {
            let txn = db.begin().await?;
            let current = find_appointment(&txn, appointment_id).await?;
            let old_status = current.status;

            if actor == Some(UserRole::Customer) && old_status != AppointmentStatus::Pending {
                return Err(ServiceError::Forbidden(format!(
                    "customers can only cancel pending appointments, this one is {}",
                    old_status
                )));
            }
            if !old_status.can_transition_to(new_status) {
                return Err(ServiceError::invalid_transition(
                    "appointment",
                    old_status,
                    new_status,
                ));
            }

            // A concurrent transition changes the status and leaves nothing to match.
            let claimed = appointment::Entity::update_many()
                .col_expr(appointment::Column::Status, Expr::value(new_status))
                .col_expr(appointment::Column::UpdatedAt, Expr::value(Some(Utc::now())))
                .filter(appointment::Column::Id.eq(appointment_id))
                .filter(appointment::Column::Status.eq(old_status))
                .exec(&txn)
                .await?;
            if claimed.rows_affected == 0 {
                return Err(ServiceError::invalid_transition(
                    "appointment",
                    old_status,
                    new_status,
                ));
            }
            let model = find_appointment(&txn, appointment_id).await?;

            txn.commit().await?;
            Ok::<_, ServiceError>((old_status, model))
        })
        .await?;

        info!(appointment_id, %old_status, %new_status, "Appointment status changed");
        publish(
            &self.event_sender,
            vec![Event::AppointmentStatusChanged {
                appointment_id,
                old_status,
                new_status,
            }],
        );

        Ok(model)
    }

    /// Locks both the appointment's current schedule and the target one.
    ///
    /// The current staff member is read before locking, so the read is repeated
    /// under the lock and the whole step retried if it moved in between.
    async fn lock_existing(
        &self,
        appointment_id: i32,
        target_staff: Option<i32>,
    ) -> Result<(ScheduleGuard, appointment::Model), ServiceError> {
        let db = &*self.db_pool;
        loop {
            let seen = find_appointment(db, appointment_id).await?;
            let guard = self
                .locks
                .acquire_all(&[seen.staff_id, target_staff.or(seen.staff_id)])
                .await;
            let current = find_appointment(db, appointment_id).await?;
            if current.staff_id == seen.staff_id {
                return Ok((guard, current));
            }
            warn!(appointment_id, "Appointment changed staff while locking, retrying");
        }
    }

    /// Re-validates and writes a new time and staff member. Caller holds the locks.
    async fn move_locked(
        &self,
        current: appointment::Model,
        new_start: NaiveDateTime,
        staff_id: Option<i32>,
    ) -> Result<appointment::Model, ServiceError> {
        if current.status.is_terminal() {
            return Err(ServiceError::invalid_transition(
                "appointment",
                current.status,
                "Rescheduled",
            ));
        }
        validate_duration(current.duration_minutes)?;

        let db = &*self.db_pool;
        let txn = db.begin().await?;

        let candidate = Slot::new(new_start, current.duration_minutes);
        if !slot_is_free(&txn, &candidate, staff_id, Some(current.id)).await? {
            return Err(ServiceError::SlotUnavailable {
                start: new_start,
                staff_id,
            });
        }

        let moved = appointment::Entity::update_many()
            .col_expr(appointment::Column::AppointmentDate, Expr::value(new_start))
            .col_expr(appointment::Column::StaffId, Expr::value(staff_id))
            .col_expr(appointment::Column::UpdatedAt, Expr::value(Some(Utc::now())))
            .filter(appointment::Column::Id.eq(current.id))
            .filter(appointment::Column::Status.eq(current.status))
            .exec(&txn)
            .await?;
        if moved.rows_affected == 0 {
            return Err(ServiceError::invalid_transition(
                "appointment",
                current.status,
                "Rescheduled",
            ));
        }
        let model = find_appointment(&txn, current.id).await?;

        txn.commit().await?;
        Ok(model)
    }

    pub async fn get(&self, appointment_id: i32) -> Result<appointment::Model, ServiceError> {
        let db = &*self.db_pool;
        bounded(
            self.timeout,
            "appointments.get",
            find_appointment(db, appointment_id),
        )
        .await
    }

    /// A customer's history, most recent first.
    pub async fn for_customer(&self, customer_id: i32) -> Result<Vec<appointment::Model>, ServiceError> {
        let db = &*self.db_pool;
        bounded(self.timeout, "appointments.for_customer", async {
            let rows = appointment::Entity::find()
                .filter(appointment::Column::CustomerId.eq(customer_id))
                .order_by_desc(appointment::Column::AppointmentDate)
                .all(db)
                .await?;
            Ok::<_, ServiceError>(rows)
        })
        .await
    }

    pub async fn for_staff(&self, staff_id: i32) -> Result<Vec<appointment::Model>, ServiceError> {
        let db = &*self.db_pool;
        bounded(self.timeout, "appointments.for_staff", async {
            let rows = appointment::Entity::find()
                .filter(appointment::Column::StaffId.eq(staff_id))
                .order_by_asc(appointment::Column::AppointmentDate)
                .all(db)
                .await?;
            Ok::<_, ServiceError>(rows)
        })
        .await
    }

    /// Appointments starting in `[from, to)`, earliest first.
    pub async fn in_range(
        &self,
        from: NaiveDateTime,
        to: NaiveDateTime,
    ) -> Result<Vec<appointment::Model>, ServiceError> {
        let db = &*self.db_pool;
        bounded(self.timeout, "appointments.in_range", async {
            let rows = appointment::Entity::find()
                .filter(appointment::Column::AppointmentDate.gte(from))
                .filter(appointment::Column::AppointmentDate.lt(to))
                .order_by_asc(appointment::Column::AppointmentDate)
                .all(db)
                .await?;
            Ok::<_, ServiceError>(rows)
        })
        .await
    }

    pub async fn on_date(&self, date: NaiveDate) -> Result<Vec<appointment::Model>, ServiceError> {
        let (from, to) = day_bounds(date, 1);
        self.in_range(from, to).await
    }

    pub async fn todays(&self) -> Result<Vec<appointment::Model>, ServiceError> {
        self.on_date(Local::now().date_naive()).await
    }

    /// Pending and Approved appointments in the `days` days starting at `from`.
    pub async fn upcoming(
        &self,
        from: NaiveDate,
        days: u32,
    ) -> Result<Vec<appointment::Model>, ServiceError> {
        let (start, end) = day_bounds(from, days);
        let db = &*self.db_pool;
        bounded(self.timeout, "appointments.upcoming", async {
            let rows = appointment::Entity::find()
                .filter(appointment::Column::AppointmentDate.gte(start))
                .filter(appointment::Column::AppointmentDate.lt(end))
                .filter(appointment::Column::Status.is_in(AppointmentStatus::BLOCKING))
                .order_by_asc(appointment::Column::AppointmentDate)
                .all(db)
                .await?;
            Ok::<_, ServiceError>(rows)
        })
        .await
    }

    /// Counts by status and by service type.
    pub async fn stats(&self) -> Result<AppointmentStats, ServiceError> {
        let db = &*self.db_pool;
        bounded(self.timeout, "appointments.stats", async {
            let rows: Vec<(AppointmentStatus, ServiceType)> = appointment::Entity::find()
                .select_only()
                .column(appointment::Column::Status)
                .column(appointment::Column::ServiceType)
                .into_tuple()
                .all(db)
                .await?;
            Ok::<_, ServiceError>(AppointmentStats::from_rows(rows))
        })
        .await
    }
}

async fn find_appointment<C>(conn: &C, appointment_id: i32) -> Result<appointment::Model, ServiceError>
where
    C: ConnectionTrait,
{
    appointment::Entity::find_by_id(appointment_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("appointment {}", appointment_id)))
}

fn day_bounds(date: NaiveDate, days: u32) -> (NaiveDateTime, NaiveDateTime) {
    let start = date.and_time(chrono::NaiveTime::MIN);
    (start, start + Duration::days(i64::from(days)))
}
