#![allow(dead_code)]

use std::sync::Arc;

use chrono::{NaiveDate, NaiveDateTime, Utc};
use petshop_core::{
    config::AppConfig,
    db::{self, DbPool},
    entities::{
        pet,
        product,
        user::{self, UserRole},
    },
    events::{self, Event, EventSender},
    services::{inventory::NewPet, ServiceContainer, ServiceFactory},
};
use rust_decimal::Decimal;
use sea_orm::{ActiveModelTrait, Set};
use tokio::sync::mpsc;

/// Helper harness backed by a fresh in-memory SQLite database.
pub struct TestApp {
    pub db: Arc<DbPool>,
    pub config: AppConfig,
    pub services: ServiceContainer,
    _event_task: Option<tokio::task::JoinHandle<()>>,
}

impl TestApp {
    pub async fn new() -> Self {
        Self::with_config(|_| {}).await
    }

    /// Builds the app after letting the test adjust the configuration.
    pub async fn with_config(adjust: impl FnOnce(&mut AppConfig)) -> Self {
        let (mut app, event_rx) = Self::build(adjust).await;
        app._event_task = Some(tokio::spawn(events::process_events(event_rx)));
        app
    }

    /// Builds the app and hands the event receiver to the test undrained.
    pub async fn with_event_receiver(
        adjust: impl FnOnce(&mut AppConfig),
    ) -> (Self, mpsc::Receiver<Event>) {
        Self::build(adjust).await
    }

    async fn build(adjust: impl FnOnce(&mut AppConfig)) -> (Self, mpsc::Receiver<Event>) {
        let mut cfg = AppConfig::new("sqlite::memory:".to_string(), "test".to_string());
        // A single connection keeps every query on the same in-memory database
        cfg.auto_migrate = true;
        cfg.db_max_connections = 1;
        cfg.db_min_connections = 1;
        cfg.db_acquire_timeout_secs = 30;
        adjust(&mut cfg);

        let pool = db::establish_connection_from_app_config(&cfg)
            .await
            .expect("failed to create test database");
        let db = Arc::new(pool);

        let (event_sender, event_rx) = EventSender::channel(cfg.event_channel_capacity);
        let factory =
            ServiceFactory::new(db.clone(), &cfg, Some(event_sender)).expect("valid test config");
        let services = ServiceContainer::new(&factory);

        let app = Self {
            db,
            config: cfg,
            services,
            _event_task: None,
        };
        (app, event_rx)
    }

    pub async fn seed_user(&self, full_name: &str, role: UserRole) -> i32 {
        let email = format!(
            "{}@petshop.test",
            full_name.to_lowercase().replace(' ', ".")
        );
        user::ActiveModel {
            full_name: Set(full_name.to_string()),
            email: Set(email),
            role: Set(role),
            created_at: Set(Utc::now()),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .expect("seed user")
        .id
    }

    pub async fn seed_product(&self, name: &str, price: Decimal, quantity: i32) -> product::Model {
        product::ActiveModel {
            name: Set(name.to_string()),
            category: Set("Food".to_string()),
            price: Set(price),
            quantity: Set(quantity),
            reorder_level: Set(2),
            description: Set(None),
            image_path: Set(None),
            ..Default::default()
        }
        .insert(&*self.db)
        .await
        .expect("seed product")
    }

    pub async fn seed_pet(&self, name: &str, price: Decimal) -> pet::Model {
        self.services
            .inventory
            .admit_pet(NewPet {
                name: name.to_string(),
                species: "Dog".to_string(),
                breed: Some("Beagle".to_string()),
                age_months: Some(8),
                gender: Some("Male".to_string()),
                price,
                health_status: Some("Healthy".to_string()),
                vaccination_status: Some("Up to date".to_string()),
                description: None,
                image_path: None,
            })
            .await
            .expect("seed pet")
    }

    pub async fn stock_of(&self, product_id: i32) -> i32 {
        self.services
            .inventory
            .get_product(product_id)
            .await
            .expect("product exists")
            .quantity
    }

    pub async fn pet_status(&self, pet_id: i32) -> pet::PetStatus {
        self.services
            .inventory
            .get_pet(pet_id)
            .await
            .expect("pet exists")
            .status
    }
}

pub fn at(year: i32, month: u32, day: u32, hour: u32, minute: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(year, month, day)
        .and_then(|d| d.and_hms_opt(hour, minute, 0))
        .expect("valid timestamp")
}
