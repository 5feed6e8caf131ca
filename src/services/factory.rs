use std::sync::Arc;
use std::time::Duration;

use crate::{
    config::AppConfig,
    db::DbPool,
    errors::ServiceError,
    events::EventSender,
    services::{
        adoptions::AdoptionService,
        appointments::AppointmentService,
        availability::{AvailabilityEngine, BusinessHours, ScheduleLocks},
        cart::CartService,
        inventory::InventoryLedger,
        orders::OrderService,
    },
};
use rust_decimal::Decimal;

/// Factory for creating service instances with shared dependencies
pub struct ServiceFactory {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    locks: ScheduleLocks,
    hours: BusinessHours,
    slot_step_minutes: u32,
    tax_rate: Decimal,
    max_cart_quantity: i32,
    timeout: Duration,
}

impl ServiceFactory {
    /// Creates a new service factory from validated configuration
    pub fn new(
        db_pool: Arc<DbPool>,
        config: &AppConfig,
        event_sender: Option<EventSender>,
    ) -> Result<Self, ServiceError> {
        config.validate_all()?;
        let (open, close) = config.business_hours();

        Ok(Self {
            db_pool,
            event_sender: event_sender.map(Arc::new),
            locks: ScheduleLocks::new(),
            hours: BusinessHours::new(open, close)?,
            slot_step_minutes: config.slot_step_minutes,
            tax_rate: config.tax_rate_decimal(),
            max_cart_quantity: config.max_cart_quantity,
            timeout: config.operation_timeout(),
        })
    }

    pub fn availability_engine(&self) -> AvailabilityEngine {
        AvailabilityEngine::new(
            self.db_pool.clone(),
            self.hours,
            self.slot_step_minutes,
            self.timeout,
        )
    }

    /// Appointment services built by one factory share a single set of schedule locks
    pub fn appointment_service(&self) -> AppointmentService {
        AppointmentService::new(
            self.db_pool.clone(),
            self.locks.clone(),
            self.event_sender.clone(),
            self.timeout,
        )
    }

    pub fn order_service(&self) -> OrderService {
        OrderService::new(
            self.db_pool.clone(),
            self.event_sender.clone(),
            self.tax_rate,
            self.timeout,
        )
    }

    pub fn cart_service(&self) -> CartService {
        CartService::new(
            self.db_pool.clone(),
            self.event_sender.clone(),
            self.max_cart_quantity,
            self.timeout,
        )
    }

    pub fn inventory_ledger(&self) -> InventoryLedger {
        InventoryLedger::new(self.db_pool.clone(), self.event_sender.clone(), self.timeout)
    }

    pub fn adoption_service(&self) -> AdoptionService {
        AdoptionService::new(self.db_pool.clone(), self.event_sender.clone(), self.timeout)
    }

    /// Gets a reference to the database pool
    pub fn db_pool(&self) -> &Arc<DbPool> {
        &self.db_pool
    }
}

/// Service container holding all service instances
#[derive(Clone)]
pub struct ServiceContainer {
    pub availability: Arc<AvailabilityEngine>,
    pub appointments: Arc<AppointmentService>,
    pub orders: Arc<OrderService>,
    pub cart: Arc<CartService>,
    pub inventory: Arc<InventoryLedger>,
    pub adoptions: Arc<AdoptionService>,
}

impl ServiceContainer {
    /// Creates a new service container with all services initialized
    pub fn new(factory: &ServiceFactory) -> Self {
        Self {
            availability: Arc::new(factory.availability_engine()),
            appointments: Arc::new(factory.appointment_service()),
            orders: Arc::new(factory.order_service()),
            cart: Arc::new(factory.cart_service()),
            inventory: Arc::new(factory.inventory_ledger()),
            adoptions: Arc::new(factory.adoption_service()),
        }
    }
}
