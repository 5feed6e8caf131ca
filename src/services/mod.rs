// Scheduling
pub mod appointments;
pub mod availability;

// Checkout and stock
pub mod cart;
pub mod inventory;
pub mod orders;

// Pet intake and adoption
pub mod adoptions;

// Service factory for dependency injection
pub mod factory;

use crate::entities::user;
use crate::errors::ServiceError;
use sea_orm::{ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter};
use std::collections::HashMap;

pub use factory::{ServiceContainer, ServiceFactory};

/// Full names for a batch of user ids; unknown ids are simply absent.
pub(crate) async fn display_names<C, I>(conn: &C, ids: I) -> Result<HashMap<i32, String>, ServiceError>
where
    C: ConnectionTrait,
    I: IntoIterator<Item = Option<i32>>,
{
    let mut ids: Vec<i32> = ids.into_iter().flatten().collect();
    ids.sort_unstable();
    ids.dedup();
    if ids.is_empty() {
        return Ok(HashMap::new());
    }

    let users = user::Entity::find()
        .filter(user::Column::Id.is_in(ids))
        .all(conn)
        .await?;
    Ok(users.into_iter().map(|u| (u.id, u.full_name)).collect())
}
