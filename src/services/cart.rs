use crate::{
    db::{bounded, DbPool},
    entities::{cart_item, pet, product},
    errors::ServiceError,
    events::{publish, Event, EventSender},
    services::inventory::{find_pet, find_product, ItemRef},
};
use chrono::Utc;
use rust_decimal::Decimal;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DbErr, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder, Set, SqlErr, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info, instrument, warn};

/// One priced cart row.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CartLine {
    pub entry_id: i32,
    pub item: ItemRef,
    pub name: String,
    pub unit_price: Decimal,
    pub quantity: i32,
    /// False once the product ran out or the pet left the Available state
    pub available: bool,
}

impl CartLine {
    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct CartView {
    pub customer_id: i32,
    pub lines: Vec<CartLine>,
}

impl CartView {
    pub fn subtotal(&self) -> Decimal {
        self.lines.iter().map(CartLine::line_total).sum()
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }
}

/// Prices a customer's cart against current product and pet rows.
pub(crate) async fn load_cart<C>(conn: &C, customer_id: i32) -> Result<Vec<CartLine>, ServiceError>
where
    C: ConnectionTrait,
{
    let entries = cart_item::Entity::find()
        .filter(cart_item::Column::CustomerId.eq(customer_id))
        .order_by_asc(cart_item::Column::AddedAt)
        .order_by_asc(cart_item::Column::Id)
        .all(conn)
        .await?;

    let product_ids: Vec<i32> = entries.iter().filter_map(|e| e.product_id).collect();
    let pet_ids: Vec<i32> = entries.iter().filter_map(|e| e.pet_id).collect();

    let products: HashMap<i32, product::Model> = if product_ids.is_empty() {
        HashMap::new()
    } else {
        product::Entity::find()
            .filter(product::Column::Id.is_in(product_ids))
            .all(conn)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect()
    };
    let pets: HashMap<i32, pet::Model> = if pet_ids.is_empty() {
        HashMap::new()
    } else {
        pet::Entity::find()
            .filter(pet::Column::Id.is_in(pet_ids))
            .all(conn)
            .await?
            .into_iter()
            .map(|p| (p.id, p))
            .collect()
    };

    let mut lines = Vec::with_capacity(entries.len());
    for entry in entries {
        let line = match ItemRef::from_columns(entry.product_id, entry.pet_id) {
            Some(ItemRef::Product(id)) => products.get(&id).map(|p| CartLine {
                entry_id: entry.id,
                item: ItemRef::Product(id),
                name: p.name.clone(),
                unit_price: p.price,
                quantity: entry.quantity,
                available: p.quantity >= entry.quantity,
            }),
            Some(ItemRef::Pet(id)) => pets.get(&id).map(|p| CartLine {
                entry_id: entry.id,
                item: ItemRef::Pet(id),
                name: p.name.clone(),
                unit_price: p.price,
                quantity: 1,
                available: p.status.is_available(),
            }),
            None => None,
        };

        match line {
            Some(line) => lines.push(line),
            None => warn!(entry_id = entry.id, "Skipping cart entry with no matching item"),
        }
    }

    Ok(lines)
}

pub(crate) async fn clear_cart_rows<C>(conn: &C, customer_id: i32) -> Result<u64, ServiceError>
where
    C: ConnectionTrait,
{
    let result = cart_item::Entity::delete_many()
        .filter(cart_item::Column::CustomerId.eq(customer_id))
        .exec(conn)
        .await?;
    Ok(result.rows_affected)
}

/// Customer carts. Rows are plain upserts; stock is only claimed at checkout.
#[derive(Clone)]
pub struct CartService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    max_quantity: i32,
    timeout: Duration,
}

impl CartService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
        max_quantity: i32,
        timeout: Duration,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            max_quantity: max_quantity.max(1),
            timeout,
        }
    }

    fn clamp(&self, requested: i32, stock: i32) -> i32 {
        requested.min(stock).min(self.max_quantity)
    }

    /// Adds an item. Returns `false` when the pet is already in this cart.
    #[instrument(skip(self))]
    pub async fn add_to_cart(
        &self,
        customer_id: i32,
        item: ItemRef,
        quantity: i32,
    ) -> Result<bool, ServiceError> {
        if quantity <= 0 {
            return Err(ServiceError::ValidationError(format!(
                "quantity must be positive, got {}",
                quantity
            )));
        }

        let db = &*self.db_pool;
        let added = bounded(self.timeout, "cart.add", async {
            let txn = db.begin().await?;
            let added = match item {
                ItemRef::Pet(pet_id) => {
                    let pet = find_pet(&txn, pet_id).await?;
                    if !pet.status.is_available() {
                        return Err(ServiceError::ItemUnavailable(format!(
                            "{} is {}",
                            pet.name, pet.status
                        )));
                    }

                    let existing = cart_item::Entity::find()
                        .filter(cart_item::Column::CustomerId.eq(customer_id))
                        .filter(cart_item::Column::PetId.eq(pet_id))
                        .one(&txn)
                        .await?;
                    if existing.is_some() {
                        false
                    } else {
                        match insert_entry(&txn, customer_id, item, 1).await {
                            Ok(_) => true,
                            // A concurrent add of the same pet got there first
                            Err(ServiceError::DatabaseError(err)) if is_unique_violation(&err) => {
                                return Ok(false);
                            }
                            Err(e) => return Err(e),
                        }
                    }
                }
                ItemRef::Product(product_id) => {
                    let product = find_product(&txn, product_id).await?;
                    if product.quantity <= 0 {
                        return Err(ServiceError::InsufficientStock(format!(
                            "{} is out of stock",
                            product.name
                        )));
                    }

                    let existing = cart_item::Entity::find()
                        .filter(cart_item::Column::CustomerId.eq(customer_id))
                        .filter(cart_item::Column::ProductId.eq(product_id))
                        .one(&txn)
                        .await?;
                    match existing {
                        Some(entry) => {
                            let quantity =
                                self.clamp(entry.quantity.saturating_add(quantity), product.quantity);
                            let mut active: cart_item::ActiveModel = entry.into();
                            active.quantity = Set(quantity);
                            active.update(&txn).await?;
                        }
                        None => {
                            insert_entry(&txn, customer_id, item, self.clamp(quantity, product.quantity))
                                .await?;
                        }
                    }
                    true
                }
            };
            txn.commit().await?;
            Ok::<_, ServiceError>(added)
        })
        .await?;

        if added {
            debug!(customer_id, ?item, "Item added to cart");
        } else {
            debug!(customer_id, ?item, "Pet already in cart");
        }
        Ok(added)
    }

    /// Sets an entry's quantity; zero or less removes it. Returns the updated
    /// row, or `None` when it was removed.
    #[instrument(skip(self))]
    pub async fn update_quantity(
        &self,
        entry_id: i32,
        quantity: i32,
    ) -> Result<Option<cart_item::Model>, ServiceError> {
        if quantity <= 0 {
            self.remove(entry_id).await?;
            return Ok(None);
        }

        let db = &*self.db_pool;
        bounded(self.timeout, "cart.update_quantity", async {
            let txn = db.begin().await?;
            let entry = cart_item::Entity::find_by_id(entry_id)
                .one(&txn)
                .await?
                .ok_or_else(|| ServiceError::NotFound(format!("cart entry {}", entry_id)))?;

            let quantity = match ItemRef::from_columns(entry.product_id, entry.pet_id) {
                Some(ItemRef::Product(product_id)) => {
                    let product = find_product(&txn, product_id).await?;
                    if product.quantity <= 0 {
                        return Err(ServiceError::InsufficientStock(format!(
                            "{} is out of stock",
                            product.name
                        )));
                    }
                    self.clamp(quantity, product.quantity)
                }
                Some(ItemRef::Pet(_)) => 1,
                None => {
                    return Err(ServiceError::InternalError(format!(
                        "cart entry {} references no item",
                        entry_id
                    )))
                }
            };

            let mut active: cart_item::ActiveModel = entry.into();
            active.quantity = Set(quantity);
            let updated = active.update(&txn).await?;
            txn.commit().await?;
            Ok::<_, ServiceError>(Some(updated))
        })
        .await
    }

    /// Deletes one entry; `false` if it was already gone.
    #[instrument(skip(self))]
    pub async fn remove(&self, entry_id: i32) -> Result<bool, ServiceError> {
        let db = &*self.db_pool;
        bounded(self.timeout, "cart.remove", async {
            let entry = cart_item::Entity::find_by_id(entry_id).one(db).await?;
            let removed = match entry {
                Some(entry) => entry.delete(db).await?.rows_affected > 0,
                None => false,
            };
            Ok::<_, ServiceError>(removed)
        })
        .await
    }

    /// Empties a customer's cart and returns the number of rows removed.
    #[instrument(skip(self))]
    pub async fn clear_cart(&self, customer_id: i32) -> Result<u64, ServiceError> {
        let db = &*self.db_pool;
        let removed = bounded(self.timeout, "cart.clear", clear_cart_rows(db, customer_id)).await?;

        info!(customer_id, removed, "Cart cleared");
        publish(
            &self.event_sender,
            vec![Event::CartCleared {
                customer_id,
                removed,
            }],
        );
        Ok(removed)
    }

    pub async fn get_cart(&self, customer_id: i32) -> Result<CartView, ServiceError> {
        let db = &*self.db_pool;
        let lines = bounded(self.timeout, "cart.get", load_cart(db, customer_id)).await?;
        Ok(CartView { customer_id, lines })
    }
}

fn is_unique_violation(err: &DbErr) -> bool {
    matches!(err.sql_err(), Some(SqlErr::UniqueConstraintViolation(_)))
}

async fn insert_entry<C>(
    conn: &C,
    customer_id: i32,
    item: ItemRef,
    quantity: i32,
) -> Result<cart_item::Model, ServiceError>
where
    C: ConnectionTrait,
{
    let (product_id, pet_id) = item.columns();
    let model = cart_item::ActiveModel {
        customer_id: Set(customer_id),
        product_id: Set(product_id),
        pet_id: Set(pet_id),
        quantity: Set(quantity),
        added_at: Set(Utc::now()),
        ..Default::default()
    }
    .insert(conn)
    .await?;
    Ok(model)
}
