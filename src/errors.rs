use chrono::NaiveDateTime;
use sea_orm::error::DbErr;

/// Errors surfaced by every scheduling, checkout and ledger operation.
///
/// Callers distinguish "no data" (an `Ok` with an empty collection) from a
/// failed query (`Err`), and nothing in this crate retries on their behalf.
#[derive(Debug, thiserror::Error)]
pub enum ServiceError {
    #[error("Database error: {0}")]
    DatabaseError(DbErr),

    #[error("Database unavailable: {0}")]
    DatabaseUnavailable(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Validation error: {0}")]
    ValidationError(String),

    #[error("Slot unavailable: {start} is already booked{}", staff_suffix(.staff_id))]
    SlotUnavailable {
        start: NaiveDateTime,
        staff_id: Option<i32>,
    },

    #[error("Invalid transition: {entity} cannot move from '{from}' to '{to}'")]
    InvalidTransition {
        entity: &'static str,
        from: String,
        to: String,
    },

    #[error("Insufficient stock: {0}")]
    InsufficientStock(String),

    #[error("Item unavailable: {0}")]
    ItemUnavailable(String),

    #[error("Order creation failed: {0}")]
    OrderCreationFailed(String),

    #[error("Order deletion failed: {0}")]
    OrderDeletionFailed(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Event error: {0}")]
    EventError(String),

    #[error("Internal error: {0}")]
    InternalError(String),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

fn staff_suffix(staff_id: &Option<i32>) -> String {
    match staff_id {
        Some(id) => format!(" for staff {}", id),
        None => " in the unassigned pool".to_string(),
    }
}

impl From<DbErr> for ServiceError {
    fn from(err: DbErr) -> Self {
        match err {
            DbErr::ConnectionAcquire(e) => ServiceError::DatabaseUnavailable(e.to_string()),
            DbErr::Conn(e) => ServiceError::DatabaseUnavailable(e.to_string()),
            other => ServiceError::DatabaseError(other),
        }
    }
}

impl From<validator::ValidationErrors> for ServiceError {
    fn from(err: validator::ValidationErrors) -> Self {
        ServiceError::ValidationError(err.to_string())
    }
}

impl ServiceError {
    /// Normalizes any sea-orm error, routing connection failures to `DatabaseUnavailable`.
    pub fn db_error(error: DbErr) -> Self {
        error.into()
    }

    pub fn invalid_transition(
        entity: &'static str,
        from: impl ToString,
        to: impl ToString,
    ) -> Self {
        ServiceError::InvalidTransition {
            entity,
            from: from.to_string(),
            to: to.to_string(),
        }
    }

    /// True for failures the caller can fix by changing its input
    /// (another slot, fewer units, a different pet).
    pub fn is_recoverable(&self) -> bool {
        matches!(
            self,
            Self::SlotUnavailable { .. }
                | Self::InsufficientStock(_)
                | Self::ItemUnavailable(_)
                | Self::ValidationError(_)
                | Self::InvalidTransition { .. }
        )
    }

    /// Message suitable for showing to an end user.
    /// Internal errors return generic messages to avoid leaking implementation details.
    pub fn user_message(&self) -> String {
        match self {
            Self::DatabaseError(_) => "Database error".to_string(),
            Self::DatabaseUnavailable(_) => {
                "The database is unavailable, please try again later".to_string()
            }
            Self::EventError(_) | Self::InternalError(_) | Self::Other(_) => {
                "Internal error".to_string()
            }
            _ => self.to_string(),
        }
    }
}

pub type AppError = ServiceError;
