use crate::entities::{AppointmentStatus, OrderStatus, PetStatus, RequestStatus};
use crate::errors::ServiceError;
use async_trait::async_trait;
use chrono::NaiveDateTime;
use metrics::counter;
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::mpsc::{self, error::TrySendError};
use tracing::{error, info, warn};

/// Domain events published after a write has committed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Event {
    // Appointment events
    AppointmentBooked {
        appointment_id: i32,
        customer_id: i32,
        staff_id: Option<i32>,
        start: NaiveDateTime,
    },
    AppointmentRescheduled {
        appointment_id: i32,
        staff_id: Option<i32>,
        start: NaiveDateTime,
    },
    AppointmentStaffAssigned {
        appointment_id: i32,
        staff_id: i32,
    },
    AppointmentStatusChanged {
        appointment_id: i32,
        old_status: AppointmentStatus,
        new_status: AppointmentStatus,
    },

    // Order events
    OrderCreated {
        order_id: i32,
        customer_id: i32,
        total_amount: Decimal,
    },
    OrderStatusChanged {
        order_id: i32,
        old_status: OrderStatus,
        new_status: OrderStatus,
    },
    OrderDeleted(i32),
    CartCleared {
        customer_id: i32,
        removed: u64,
    },

    // Inventory events
    StockAdjusted {
        product_id: i32,
        old_quantity: i32,
        new_quantity: i32,
    },
    LowStock {
        product_id: i32,
        quantity: i32,
        reorder_level: i32,
    },
    PetStatusChanged {
        pet_id: i32,
        old_status: PetStatus,
        new_status: PetStatus,
    },
    PetAdmitted(i32),

    // Adoption and surrender events
    AdoptionRequested {
        request_id: i32,
        pet_id: i32,
    },
    AdoptionReviewed {
        request_id: i32,
        status: RequestStatus,
    },
    SurrenderRequested(i32),
    SurrenderReviewed {
        request_id: i32,
        status: RequestStatus,
    },
}

#[derive(Debug, Clone)]
pub struct EventSender {
    sender: mpsc::Sender<Event>,
}

impl EventSender {
    /// Creates a new EventSender
    pub fn new(sender: mpsc::Sender<Event>) -> Self {
        Self { sender }
    }

    /// Creates a bounded channel and returns the sender half wrapped for services.
    pub fn channel(capacity: usize) -> (Self, mpsc::Receiver<Event>) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (Self::new(tx), rx)
    }

    /// Sends an event asynchronously
    pub async fn send(&self, event: Event) -> Result<(), ServiceError> {
        self.sender
            .send(event)
            .await
            .map_err(|e| ServiceError::EventError(format!("Failed to send event: {}", e)))
    }

    /// Enqueues an event without waiting for room in the channel.
    pub fn try_send(&self, event: Event) -> Result<(), ServiceError> {
        self.sender.try_send(event).map_err(|e| match e {
            TrySendError::Full(_) => ServiceError::EventError("event channel is full".to_string()),
            TrySendError::Closed(_) => {
                ServiceError::EventError("event channel is closed".to_string())
            }
        })
    }

    /// Enqueues an event, logging and dropping it when the channel is full or closed.
    ///
    /// Events go out after the database write committed; a stalled consumer
    /// must neither fail nor hold up the operation that produced them.
    pub fn send_or_log(&self, event: Event) {
        if let Err(e) = self.try_send(event) {
            counter!("petshop.events.dropped", 1);
            warn!(error = %e, "Dropping domain event");
        }
    }
}

/// Publishes a batch of events through an optional sender. Never blocks.
pub(crate) fn publish(sender: &Option<Arc<EventSender>>, events: Vec<Event>) {
    if let Some(sender) = sender {
        for event in events {
            sender.send_or_log(event);
        }
    }
}

#[async_trait]
pub trait EventHandler: Send + Sync {
    async fn handle_event(&self, event: &Event) -> Result<(), ServiceError>;
}

/// Consumes events until every sender is dropped, logging each one.
pub async fn process_events(rx: mpsc::Receiver<Event>) {
    process_events_with_handlers(rx, Vec::new()).await
}

pub async fn process_events_with_handlers(
    mut rx: mpsc::Receiver<Event>,
    handlers: Vec<Arc<dyn EventHandler>>,
) {
    info!("Starting event processing loop");

    while let Some(event) = rx.recv().await {
        match &event {
            Event::LowStock {
                product_id,
                quantity,
                reorder_level,
            } => warn!(product_id, quantity, reorder_level, "Product at or below reorder level"),
            other => info!(event = ?other, "Received event"),
        }

        for handler in &handlers {
            if let Err(e) = handler.handle_event(&event).await {
                error!(error = %e, event = ?event, "Event handler failed");
            }
        }
    }

    info!("Event processing loop finished");
}
