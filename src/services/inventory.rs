use crate::{
    db::{bounded, DbPool},
    entities::{
        pet::{self, PetStatus},
        product::{self, StockStatus},
    },
    errors::ServiceError,
    events::{publish, Event, EventSender},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, QuerySelect, Set,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, instrument, warn};
use validator::Validate;

/// A sellable thing: exactly one of a product or a pet.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ItemRef {
    Product(i32),
    Pet(i32),
}

impl ItemRef {
    /// Rebuilds the reference from a row's `(product_id, pet_id)` pair.
    pub fn from_columns(product_id: Option<i32>, pet_id: Option<i32>) -> Option<Self> {
        match (product_id, pet_id) {
            (Some(id), None) => Some(ItemRef::Product(id)),
            (None, Some(id)) => Some(ItemRef::Pet(id)),
            _ => None,
        }
    }

    pub fn columns(self) -> (Option<i32>, Option<i32>) {
        match self {
            ItemRef::Product(id) => (Some(id), None),
            ItemRef::Pet(id) => (None, Some(id)),
        }
    }
}

/// Result of one stock mutation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockChange {
    pub product_id: i32,
    pub old_quantity: i32,
    pub new_quantity: i32,
    pub reorder_level: i32,
}

impl StockChange {
    pub fn is_low(&self) -> bool {
        self.new_quantity <= self.reorder_level
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PetChange {
    pub pet_id: i32,
    pub old_status: PetStatus,
    pub new_status: PetStatus,
}

/// Every ledger mutation made inside one transaction, published after commit.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct LedgerEffects {
    pub stock: Vec<StockChange>,
    pub pets: Vec<PetChange>,
}

impl LedgerEffects {
    pub fn into_events(self) -> Vec<Event> {
        let mut events = Vec::with_capacity(self.stock.len() + self.pets.len());
        for change in self.stock {
            events.push(Event::StockAdjusted {
                product_id: change.product_id,
                old_quantity: change.old_quantity,
                new_quantity: change.new_quantity,
            });
            if change.is_low() && change.new_quantity < change.old_quantity {
                warn!(
                    product_id = change.product_id,
                    quantity = change.new_quantity,
                    "Stock at or below reorder level"
                );
                events.push(Event::LowStock {
                    product_id: change.product_id,
                    quantity: change.new_quantity,
                    reorder_level: change.reorder_level,
                });
            }
        }
        for change in self.pets {
            events.push(Event::PetStatusChanged {
                pet_id: change.pet_id,
                old_status: change.old_status,
                new_status: change.new_status,
            });
        }
        events
    }
}

/// Adds `delta` units to a product's stock.
///
/// The decrement is a single conditional update, so stock can never go
/// negative even when two callers race for the last units.
pub async fn adjust_stock<C>(
    conn: &C,
    product_id: i32,
    delta: i32,
) -> Result<StockChange, ServiceError>
where
    C: ConnectionTrait,
{
    let product = find_product(conn, product_id).await?;
    if delta == 0 {
        return Ok(StockChange {
            product_id,
            old_quantity: product.quantity,
            new_quantity: product.quantity,
            reorder_level: product.reorder_level,
        });
    }

    let mut update = product::Entity::update_many()
        .col_expr(
            product::Column::Quantity,
            Expr::col(product::Column::Quantity).add(delta),
        )
        .col_expr(product::Column::UpdatedAt, Expr::value(Some(Utc::now())))
        .filter(product::Column::Id.eq(product_id));
    if delta < 0 {
        update = update.filter(product::Column::Quantity.gte(-delta));
    }

    let result = update.exec(conn).await?;
    if result.rows_affected == 0 {
        return Err(ServiceError::InsufficientStock(format!(
            "{} has {} in stock, {} requested",
            product.name, product.quantity, -delta
        )));
    }

    let updated = find_product(conn, product_id).await?;
    Ok(StockChange {
        product_id,
        old_quantity: updated.quantity - delta,
        new_quantity: updated.quantity,
        reorder_level: updated.reorder_level,
    })
}

/// Unconditionally sets a pet's status and returns the previous one.
pub async fn set_pet_status<C>(
    conn: &C,
    pet_id: i32,
    status: PetStatus,
) -> Result<PetChange, ServiceError>
where
    C: ConnectionTrait,
{
    let pet = find_pet(conn, pet_id).await?;
    let old_status = pet.status;

    let mut active: pet::ActiveModel = pet.into();
    active.status = Set(status);
    active.updated_at = Set(Some(Utc::now()));
    active.update(conn).await?;

    Ok(PetChange {
        pet_id,
        old_status,
        new_status: status,
    })
}

/// Moves a pet to `status` only if it is currently in one of `from`.
///
/// Fails with `ItemUnavailable` otherwise, which is how a pet is kept out of
/// two sales or an adoption and a sale at once.
pub async fn transition_pet<C>(
    conn: &C,
    pet_id: i32,
    from: &[PetStatus],
    status: PetStatus,
) -> Result<PetChange, ServiceError>
where
    C: ConnectionTrait,
{
    let pet = find_pet(conn, pet_id).await?;

    let result = pet::Entity::update_many()
        .col_expr(pet::Column::Status, Expr::value(status))
        .col_expr(pet::Column::UpdatedAt, Expr::value(Some(Utc::now())))
        .filter(pet::Column::Id.eq(pet_id))
        .filter(pet::Column::Status.is_in(from.iter().copied()))
        .exec(conn)
        .await?;

    if result.rows_affected == 0 {
        return Err(ServiceError::ItemUnavailable(format!(
            "{} is {}",
            pet.name, pet.status
        )));
    }

    Ok(PetChange {
        pet_id,
        old_status: pet.status,
        new_status: status,
    })
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewPet {
    #[validate(length(min = 1, max = 100))]
    pub name: String,
    #[validate(length(min = 1, max = 50))]
    pub species: String,
    pub breed: Option<String>,
    #[validate(range(min = 0, max = 600))]
    pub age_months: Option<i32>,
    pub gender: Option<String>,
    pub price: Decimal,
    pub health_status: Option<String>,
    pub vaccination_status: Option<String>,
    #[validate(length(max = 2000))]
    pub description: Option<String>,
    pub image_path: Option<String>,
}

/// The only insert path for pets; new pets start Available.
pub async fn admit_pet<C>(conn: &C, new_pet: NewPet) -> Result<pet::Model, ServiceError>
where
    C: ConnectionTrait,
{
    new_pet.validate()?;
    if new_pet.price.is_sign_negative() {
        return Err(ServiceError::ValidationError(
            "pet price cannot be negative".to_string(),
        ));
    }

    let model = pet::ActiveModel {
        name: Set(new_pet.name),
        species: Set(new_pet.species),
        breed: Set(new_pet.breed),
        age_months: Set(new_pet.age_months),
        gender: Set(new_pet.gender),
        price: Set(new_pet.price),
        status: Set(PetStatus::Available),
        health_status: Set(new_pet.health_status),
        vaccination_status: Set(new_pet.vaccination_status),
        description: Set(new_pet.description),
        image_path: Set(new_pet.image_path),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    Ok(model)
}

pub(crate) async fn find_product<C>(conn: &C, product_id: i32) -> Result<product::Model, ServiceError>
where
    C: ConnectionTrait,
{
    product::Entity::find_by_id(product_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("product {}", product_id)))
}

pub(crate) async fn find_pet<C>(conn: &C, pet_id: i32) -> Result<pet::Model, ServiceError>
where
    C: ConnectionTrait,
{
    pet::Entity::find_by_id(pet_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("pet {}", pet_id)))
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockSummary {
    pub products: u64,
    pub units: i64,
    pub in_stock: u64,
    pub low_stock: u64,
    pub out_of_stock: u64,
    pub pets_by_status: BTreeMap<PetStatus, u64>,
}

/// Stock queries and manual adjustments for back-office screens.
#[derive(Clone)]
pub struct InventoryLedger {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    timeout: Duration,
}

impl InventoryLedger {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
        timeout: Duration,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            timeout,
        }
    }

    pub async fn get_product(&self, product_id: i32) -> Result<product::Model, ServiceError> {
        let db = &*self.db_pool;
        bounded(self.timeout, "inventory.get_product", find_product(db, product_id)).await
    }

    pub async fn get_pet(&self, pet_id: i32) -> Result<pet::Model, ServiceError> {
        let db = &*self.db_pool;
        bounded(self.timeout, "inventory.get_pet", find_pet(db, pet_id)).await
    }

    /// Receives `quantity` units into stock.
    #[instrument(skip(self))]
    pub async fn restock(&self, product_id: i32, quantity: i32) -> Result<StockChange, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "restock quantity must be positive, got {}",
                quantity
            )));
        }

        let db = &*self.db_pool;
        let change = bounded(
            self.timeout,
            "inventory.restock",
            adjust_stock(db, product_id, quantity),
        )
        .await?;

        info!(
            product_id,
            old_quantity = change.old_quantity,
            new_quantity = change.new_quantity,
            "Product restocked"
        );
        publish(
            &self.event_sender,
            LedgerEffects {
                stock: vec![change],
                pets: Vec::new(),
            }
            .into_events(),
        );

        Ok(change)
    }

    /// Admits a pet directly, e.g. a new litter or a transfer from a breeder.
    #[instrument(skip(self, new_pet), fields(name = %new_pet.name))]
    pub async fn admit_pet(&self, new_pet: NewPet) -> Result<pet::Model, ServiceError> {
        let db = &*self.db_pool;
        let pet = bounded(self.timeout, "inventory.admit_pet", admit_pet(db, new_pet)).await?;

        info!(pet_id = pet.id, "Pet admitted");
        publish(&self.event_sender, vec![Event::PetAdmitted(pet.id)]);
        Ok(pet)
    }

    /// Products at or below their reorder level, emptiest first.
    pub async fn low_stock_products(&self) -> Result<Vec<product::Model>, ServiceError> {
        let db = &*self.db_pool;
        bounded(self.timeout, "inventory.low_stock", async {
            let rows = product::Entity::find()
                .filter(Expr::col(product::Column::Quantity).lte(Expr::col(product::Column::ReorderLevel)))
                .order_by_asc(product::Column::Quantity)
                .order_by_asc(product::Column::Name)
                .all(db)
                .await?;
            Ok::<_, ServiceError>(rows)
        })
        .await
    }

    pub async fn available_pets(&self) -> Result<Vec<pet::Model>, ServiceError> {
        let db = &*self.db_pool;
        bounded(self.timeout, "inventory.available_pets", async {
            let rows = pet::Entity::find()
                .filter(pet::Column::Status.eq(PetStatus::Available))
                .order_by_asc(pet::Column::Name)
                .all(db)
                .await?;
            Ok::<_, ServiceError>(rows)
        })
        .await
    }

    pub async fn stock_summary(&self) -> Result<StockSummary, ServiceError> {
        let db = &*self.db_pool;
        bounded(self.timeout, "inventory.summary", async {
            let products = product::Entity::find().all(db).await?;
            let pet_statuses: Vec<PetStatus> = pet::Entity::find()
                .select_only()
                .column(pet::Column::Status)
                .into_tuple()
                .all(db)
                .await?;

            let mut summary = StockSummary::default();
            for product in &products {
                summary.products += 1;
                summary.units += i64::from(product.quantity);
                match product.stock_status() {
                    StockStatus::InStock => summary.in_stock += 1,
                    StockStatus::LowStock => summary.low_stock += 1,
                    StockStatus::OutOfStock => summary.out_of_stock += 1,
                }
            }
            for status in pet_statuses {
                *summary.pets_by_status.entry(status).or_default() += 1;
            }
            Ok::<_, ServiceError>(summary)
        })
        .await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn item_ref_round_trips_through_columns() {
        assert_eq!(ItemRef::Product(3).columns(), (Some(3), None));
        assert_eq!(ItemRef::Pet(4).columns(), (None, Some(4)));
        assert_eq!(ItemRef::from_columns(Some(3), None), Some(ItemRef::Product(3)));
        assert_eq!(ItemRef::from_columns(None, Some(4)), Some(ItemRef::Pet(4)));
        assert_eq!(ItemRef::from_columns(Some(3), Some(4)), None);
        assert_eq!(ItemRef::from_columns(None, None), None);
    }

    #[test]
    fn low_stock_event_only_on_the_way_down() {
        let sold = LedgerEffects {
            stock: vec![StockChange {
                product_id: 1,
                old_quantity: 6,
                new_quantity: 4,
                reorder_level: 5,
            }],
            pets: Vec::new(),
        };
        let events = sold.into_events();
        assert_eq!(events.len(), 2);
        assert!(matches!(events[1], Event::LowStock { quantity: 4, .. }));

        let restocked = LedgerEffects {
            stock: vec![StockChange {
                product_id: 1,
                old_quantity: 1,
                new_quantity: 3,
                reorder_level: 5,
            }],
            pets: Vec::new(),
        };
        assert_eq!(restocked.into_events().len(), 1);
    }
}
