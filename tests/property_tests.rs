//! Property-based tests for scheduling and stock invariants.
//!
//! The pure checks run many cases; the database-backed ones drive a fresh
//! in-memory store per case and keep the case count low.

mod common;

use chrono::{Duration, NaiveDate, NaiveDateTime};
use common::TestApp;
use petshop_core::{
    entities::{AppointmentStatus, ServiceType, UserRole},
    services::{
        appointments::NewAppointment,
        availability::{is_free, AvailableSlots, Booking, BusinessHours, Slot},
        orders::{LineItem, NewOrder, OrderTotals},
    },
    ServiceError,
};
use proptest::prelude::*;
use rust_decimal::Decimal;
use rust_decimal_macros::dec;

fn day() -> NaiveDate {
    NaiveDate::from_ymd_opt(2024, 6, 1).unwrap()
}

fn minute_of_day(minute: i64) -> NaiveDateTime {
    day().and_hms_opt(0, 0, 0).unwrap() + Duration::minutes(minute)
}

fn status_strategy() -> impl Strategy<Value = AppointmentStatus> {
    prop_oneof![
        Just(AppointmentStatus::Pending),
        Just(AppointmentStatus::Approved),
        Just(AppointmentStatus::Completed),
        Just(AppointmentStatus::Cancelled),
    ]
}

fn booking_strategy() -> impl Strategy<Value = Booking> {
    (
        1i32..1000,
        proptest::option::of(1i32..4),
        status_strategy(),
        0i64..1380,
        1i32..240,
    )
        .prop_map(|(id, staff_id, status, start, duration)| Booking {
            appointment_id: id,
            staff_id,
            status,
            slot: Slot::new(minute_of_day(start), duration),
        })
}

fn runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_multi_thread()
        .worker_threads(2)
        .enable_all()
        .build()
        .unwrap()
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(500))]

    #[test]
    fn overlap_is_symmetric(a in 0i64..1400, da in 1i32..480, b in 0i64..1400, db in 1i32..480) {
        let left = Slot::new(minute_of_day(a), da);
        let right = Slot::new(minute_of_day(b), db);
        prop_assert_eq!(left.overlaps(&right), right.overlaps(&left));
    }

    #[test]
    fn back_to_back_slots_never_overlap(start in 0i64..1000, first in 1i32..240, second in 1i32..240) {
        let earlier = Slot::new(minute_of_day(start), first);
        let later = Slot::new(earlier.end, second);
        prop_assert!(!earlier.overlaps(&later));
    }

    #[test]
    fn only_pending_and_approved_bookings_block(
        bookings in proptest::collection::vec(booking_strategy(), 0..12),
        start in 0i64..1380,
        staff_id in proptest::option::of(1i32..4),
    ) {
        let candidate = Slot::new(minute_of_day(start), 30);
        let blocking: Vec<Booking> = bookings
            .iter()
            .copied()
            .filter(|b| AppointmentStatus::BLOCKING.contains(&b.status))
            .collect();
        prop_assert_eq!(
            is_free(&bookings, &candidate, staff_id, None),
            is_free(&blocking, &candidate, staff_id, None)
        );
    }

    #[test]
    fn listed_slots_are_free_and_inside_business_hours(
        bookings in proptest::collection::vec(booking_strategy(), 0..12),
        staff_id in proptest::option::of(1i32..4),
        step in prop_oneof![Just(15u32), Just(30u32), Just(45u32), Just(60u32)],
    ) {
        let hours = BusinessHours::default();
        let slots = AvailableSlots::new(day(), staff_id, hours, step, bookings.clone()).unwrap();
        for start in &slots {
            let slot = Slot::new(start, step as i32);
            prop_assert!(start >= hours.opens_at(day()));
            prop_assert!(slot.end <= hours.closes_at(day()));
            prop_assert!(is_free(&bookings, &slot, staff_id, None));
        }
        prop_assert_eq!(slots.to_vec(), slots.iter().collect::<Vec<_>>());
    }

    #[test]
    fn order_total_is_subtotal_plus_tax(
        lines in proptest::collection::vec((1i32..20, 0i64..100_000), 1..6),
        rate in 0u32..30,
    ) {
        let items: Vec<LineItem> = lines
            .iter()
            .enumerate()
            .map(|(i, (qty, cents))| LineItem::product(i as i32 + 1, *qty, Decimal::new(*cents, 2)))
            .collect();
        let totals = OrderTotals::compute(&items, Decimal::new(i64::from(rate), 2));
        prop_assert_eq!(totals.subtotal + totals.tax, totals.total);
        prop_assert!(totals.total >= totals.subtotal);
        prop_assert!(totals.total.scale() <= 2);
    }
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(12))]

    #[test]
    fn no_staff_member_is_ever_double_booked(
        requests in proptest::collection::vec(
            (proptest::option::of(1i32..3), 0i64..16, prop_oneof![Just(30i32), Just(45), Just(60), Just(90)]),
            1..15,
        )
    ) {
        let rt = runtime();
        let booked = rt.block_on(async {
            let app = TestApp::new().await;
            for (staff_id, half_hours, duration) in &requests {
                let start = minute_of_day(9 * 60 + half_hours * 30);
                let request = NewAppointment::new(1, *staff_id, ServiceType::Grooming, start)
                    .with_duration(*duration);
                match app.services.appointments.create(request).await {
                    Ok(_) | Err(ServiceError::SlotUnavailable { .. }) => {}
                    Err(other) => panic!("unexpected error: {other}"),
                }
            }
            app.services
                .appointments
                .on_date(day())
                .await
                .unwrap()
                .iter()
                .map(Booking::from)
                .collect::<Vec<_>>()
        });

        for (i, a) in booked.iter().enumerate() {
            for b in &booked[i + 1..] {
                prop_assert!(
                    !b.blocks(&a.slot, a.staff_id),
                    "appointments {} and {} collide",
                    a.appointment_id,
                    b.appointment_id
                );
            }
        }
    }

    #[test]
    fn stock_never_goes_negative(
        initial in 0i32..10,
        steps in proptest::collection::vec((1i32..5, any::<bool>()), 1..12),
    ) {
        let rt = runtime();
        let (final_stock, outstanding) = rt.block_on(async {
            let app = TestApp::new().await;
            let customer = app.seed_user("Prop Tester", UserRole::Customer).await;
            let food = app.seed_product("Dog Food", dec!(12.50), initial).await;
            let mut open_orders: Vec<(i32, i32)> = Vec::new();

            for (quantity, delete_one) in &steps {
                if *delete_one {
                    if let Some((order_id, _)) = open_orders.pop() {
                        app.services.orders.delete_order(order_id).await.unwrap();
                    }
                    continue;
                }
                let request = NewOrder::new(
                    customer,
                    vec![LineItem::product(food.id, *quantity, dec!(12.50))],
                    "cash",
                );
                match app.services.orders.create_order(request).await {
                    Ok(order_id) => open_orders.push((order_id, *quantity)),
                    Err(ServiceError::InsufficientStock(_)) => {}
                    Err(other) => panic!("unexpected error: {other}"),
                }
                assert!(app.stock_of(food.id).await >= 0);
            }

            let outstanding: i32 = open_orders.iter().map(|(_, q)| q).sum();
            (app.stock_of(food.id).await, outstanding)
        });

        prop_assert!(final_stock >= 0);
        prop_assert_eq!(final_stock + outstanding, initial);
    }
}
