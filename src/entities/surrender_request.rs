use chrono::{DateTime, Utc};
use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

pub use super::adoption_request::RequestStatus;

/// A customer handing a pet over to the shop
#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "surrender_requests")]
pub struct Model {
    #[sea_orm(primary_key)]
    pub id: i32,
    pub customer_id: i32,
    pub pet_name: String,
    pub species: String,
    pub breed: Option<String>,
    pub age_months: Option<i32>,
    pub gender: Option<String>,
    pub reason: Option<String>,
    pub status: RequestStatus,
    /// Pet admitted into inventory once approved
    pub pet_id: Option<i32>,
    pub reviewed_by: Option<i32>,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
