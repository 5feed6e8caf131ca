use crate::{
    db::{bounded, DbPool},
    entities::{
        order::{self, OrderStatus, PaymentStatus},
        order_item,
        pet::{self, PetStatus},
        product,
    },
    errors::ServiceError,
    events::{publish, Event, EventSender},
    services::{
        cart::{clear_cart_rows, load_cart},
        display_names,
        inventory::{adjust_stock, set_pet_status, transition_pet, ItemRef, LedgerEffects},
    },
};
use chrono::Utc;
use metrics::counter;
use rust_decimal::Decimal;
use sea_orm::{
    sea_query::Expr, ActiveModelTrait, ColumnTrait, ConnectionTrait, EntityTrait, QueryFilter,
    QueryOrder, Set, TransactionTrait,
};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tracing::{error, info, instrument};
use validator::Validate;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LineItem {
    pub item: ItemRef,
    pub quantity: i32,
    pub unit_price: Decimal,
}

impl LineItem {
    pub fn product(product_id: i32, quantity: i32, unit_price: Decimal) -> Self {
        Self {
            item: ItemRef::Product(product_id),
            quantity,
            unit_price,
        }
    }

    pub fn pet(pet_id: i32, unit_price: Decimal) -> Self {
        Self {
            item: ItemRef::Pet(pet_id),
            quantity: 1,
            unit_price,
        }
    }

    pub fn line_total(&self) -> Decimal {
        self.unit_price * Decimal::from(self.quantity)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
pub struct NewOrder {
    pub customer_id: i32,
    /// Handling staff member or cashier; `None` for online orders
    pub staff_id: Option<i32>,
    #[validate(length(min = 1, message = "an order needs at least one item"))]
    pub items: Vec<LineItem>,
    /// Pre-computed total from the caller; computed with the configured tax rate when absent
    pub total_amount: Option<Decimal>,
    #[validate(length(min = 1, max = 50))]
    pub payment_method: String,
    #[validate(length(max = 1000))]
    pub notes: Option<String>,
}

impl NewOrder {
    pub fn new(customer_id: i32, items: Vec<LineItem>, payment_method: impl Into<String>) -> Self {
        Self {
            customer_id,
            staff_id: None,
            items,
            total_amount: None,
            payment_method: payment_method.into(),
            notes: None,
        }
    }

    fn check(&self) -> Result<(), ServiceError> {
        self.validate()?;
        for line in &self.items {
            if line.quantity <= 0 {
                return Err(ServiceError::ValidationError(format!(
                    "{:?} has non-positive quantity {}",
                    line.item, line.quantity
                )));
            }
            if line.unit_price.is_sign_negative() {
                return Err(ServiceError::ValidationError(format!(
                    "{:?} has a negative unit price",
                    line.item
                )));
            }
            if matches!(line.item, ItemRef::Pet(_)) && line.quantity != 1 {
                return Err(ServiceError::ValidationError(format!(
                    "{:?} can only be sold once",
                    line.item
                )));
            }
        }
        if let Some(total) = self.total_amount {
            if total.is_sign_negative() {
                return Err(ServiceError::ValidationError(
                    "order total cannot be negative".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// Subtotal, tax and total for a set of lines, rounded to cents.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderTotals {
    pub subtotal: Decimal,
    pub tax: Decimal,
    pub total: Decimal,
}

impl OrderTotals {
    pub fn compute(lines: &[LineItem], tax_rate: Decimal) -> Self {
        let subtotal: Decimal = lines.iter().map(LineItem::line_total).sum();
        let total = (subtotal * (Decimal::ONE + tax_rate)).round_dp(2);
        let subtotal = subtotal.round_dp(2);
        Self {
            subtotal,
            tax: total - subtotal,
            total,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderFilter {
    pub status: Option<OrderStatus>,
    pub customer_id: Option<i32>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderSummary {
    pub order: order::Model,
    pub customer_name: Option<String>,
    pub staff_name: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderLine {
    pub item_id: i32,
    pub item: Option<ItemRef>,
    pub name: Option<String>,
    pub quantity: i32,
    pub unit_price: Decimal,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OrderDetails {
    pub order: order::Model,
    pub customer_name: Option<String>,
    pub staff_name: Option<String>,
    pub lines: Vec<OrderLine>,
}

/// Places, advances and removes orders.
///
/// Creation and deletion run in one transaction together with their ledger
/// effects; nothing is published until that transaction has committed.
#[derive(Clone)]
pub struct OrderService {
    db_pool: Arc<DbPool>,
    event_sender: Option<Arc<EventSender>>,
    tax_rate: Decimal,
    timeout: Duration,
}

impl OrderService {
    pub fn new(
        db_pool: Arc<DbPool>,
        event_sender: Option<Arc<EventSender>>,
        tax_rate: Decimal,
        timeout: Duration,
    ) -> Self {
        Self {
            db_pool,
            event_sender,
            tax_rate,
            timeout,
        }
    }

    pub fn tax_rate(&self) -> Decimal {
        self.tax_rate
    }

    /// Creates a Pending order and claims its stock and pets.
    #[instrument(skip(self, request), fields(customer_id = request.customer_id, items = request.items.len()))]
    pub async fn create_order(&self, request: NewOrder) -> Result<i32, ServiceError> {
        self.create_with_status(request, OrderStatus::Pending, PaymentStatus::Pending, "orders.create")
            .await
    }

    /// Point-of-sale sale: paid at the counter and closed immediately.
    #[instrument(skip(self, request), fields(customer_id = request.customer_id, items = request.items.len()))]
    pub async fn create_pos_order(&self, request: NewOrder) -> Result<i32, ServiceError> {
        if request.staff_id.is_none() {
            return Err(ServiceError::ValidationError(
                "a point-of-sale order needs the cashier's staff id".to_string(),
            ));
        }
        self.create_with_status(request, OrderStatus::Completed, PaymentStatus::Paid, "orders.create_pos")
            .await
    }

    async fn create_with_status(
        &self,
        request: NewOrder,
        status: OrderStatus,
        payment_status: PaymentStatus,
        operation: &'static str,
    ) -> Result<i32, ServiceError> {
        request.check()?;
        let total = request
            .total_amount
            .unwrap_or_else(|| OrderTotals::compute(&request.items, self.tax_rate).total);
        let db = &*self.db_pool;

        let (order, effects) = bounded(self.timeout, operation, async {
            let txn = db.begin().await?;
            let placed = place_order(&txn, &request, total, status, payment_status).await?;
            txn.commit().await?;
            Ok::<_, ServiceError>(placed)
        })
        .await
        .map_err(creation_failed)?;

        self.order_placed(&order, effects).await;
        Ok(order.id)
    }

    /// Turns the customer's cart into a Pending order priced at current prices,
    /// then empties the cart, all in one transaction.
    #[instrument(skip(self, notes))]
    pub async fn checkout(
        &self,
        customer_id: i32,
        payment_method: &str,
        notes: Option<String>,
    ) -> Result<i32, ServiceError> {
        let db = &*self.db_pool;
        let tax_rate = self.tax_rate;

        let (order, effects, cleared) = bounded(self.timeout, "orders.checkout", async {
            let txn = db.begin().await?;
            let lines = load_cart(&txn, customer_id).await?;
            if lines.is_empty() {
                return Err(ServiceError::ValidationError("cart is empty".to_string()));
            }

            let items: Vec<LineItem> = lines
                .iter()
                .map(|line| LineItem {
                    item: line.item,
                    quantity: line.quantity,
                    unit_price: line.unit_price,
                })
                .collect();
            let request = NewOrder {
                customer_id,
                staff_id: None,
                total_amount: None,
                payment_method: payment_method.to_string(),
                notes,
                items,
            };
            request.check()?;

            let total = OrderTotals::compute(&request.items, tax_rate).total;
            let (order, effects) = place_order(
                &txn,
                &request,
                total,
                OrderStatus::Pending,
                PaymentStatus::Pending,
            )
            .await?;
            let cleared = clear_cart_rows(&txn, customer_id).await?;

            txn.commit().await?;
            Ok::<_, ServiceError>((order, effects, cleared))
        })
        .await
        .map_err(creation_failed)?;

        self.order_placed(&order, effects).await;
        publish(
            &self.event_sender,
            vec![Event::CartCleared {
                customer_id,
                removed: cleared,
            }],
        );
        Ok(order.id)
    }

    async fn order_placed(&self, order: &order::Model, effects: LedgerEffects) {
        counter!("petshop.orders.created", 1, "status" => order.status.to_string());
        info!(
            order_id = order.id,
            total = %order.total_amount,
            status = %order.status,
            "Order created"
        );

        let mut events = vec![Event::OrderCreated {
            order_id: order.id,
            customer_id: order.customer_id,
            total_amount: order.total_amount,
        }];
        events.extend(effects.into_events());
        publish(&self.event_sender, events);
    }

    /// Deletes an order and its items, putting stock and pets back first.
    ///
    /// A Cancelled order already returned its inventory and is only removed.
    #[instrument(skip(self))]
    pub async fn delete_order(&self, order_id: i32) -> Result<(), ServiceError> {
        let db = &*self.db_pool;

        let effects = bounded(self.timeout, "orders.delete", async {
            let txn = db.begin().await?;
            let order = find_order(&txn, order_id).await?;
            let effects = remove_order(&txn, &order)
                .await
                .map_err(|e| deletion_failed(order_id, e))?;
            txn.commit().await.map_err(|e| deletion_failed(order_id, e.into()))?;
            Ok::<_, ServiceError>(effects)
        })
        .await?;

        counter!("petshop.orders.deleted", 1);
        info!(order_id, "Order deleted");
        let mut events = vec![Event::OrderDeleted(order_id)];
        events.extend(effects.into_events());
        publish(&self.event_sender, events);
        Ok(())
    }

    /// Applies one state-machine step. Cancelling returns the order's stock and
    /// pets and refunds a paid order.
    #[instrument(skip(self))]
    pub async fn update_order_status(
        &self,
        order_id: i32,
        new_status: OrderStatus,
        staff_id: Option<i32>,
    ) -> Result<order::Model, ServiceError> {
        let db = &*self.db_pool;

        let (old_status, model, effects) = bounded(self.timeout, "orders.update_status", async {
            let txn = db.begin().await?;
            let current = find_order(&txn, order_id).await?;
            let old_status = current.status;

            if !old_status.can_transition_to(new_status) {
                return Err(ServiceError::invalid_transition("order", old_status, new_status));
            }

            let refund = new_status == OrderStatus::Cancelled
                && current.payment_status == PaymentStatus::Paid;
            let mut claim = order::Entity::update_many()
                .col_expr(order::Column::Status, Expr::value(new_status))
                .col_expr(order::Column::UpdatedAt, Expr::value(Some(Utc::now())));
            if let Some(staff_id) = staff_id {
                claim = claim.col_expr(order::Column::StaffId, Expr::value(Some(staff_id)));
            }
            if refund {
                claim = claim.col_expr(
                    order::Column::PaymentStatus,
                    Expr::value(PaymentStatus::Refunded),
                );
            }
            // Only the writer that still sees old_status gets to reverse inventory.
            let claimed = claim
                .filter(order::Column::Id.eq(order_id))
                .filter(order::Column::Status.eq(old_status))
                .exec(&txn)
                .await?;
            if claimed.rows_affected == 0 {
                return Err(ServiceError::invalid_transition("order", old_status, new_status));
            }

            let effects = if new_status == OrderStatus::Cancelled {
                let items = order_items(&txn, order_id).await?;
                reverse_inventory(&txn, &items).await?
            } else {
                LedgerEffects::default()
            };
            let model = find_order(&txn, order_id).await?;

            txn.commit().await?;
            Ok::<_, ServiceError>((old_status, model, effects))
        })
        .await?;

        info!(order_id, %old_status, %new_status, "Order status changed");
        let mut events = vec![Event::OrderStatusChanged {
            order_id,
            old_status,
            new_status,
        }];
        events.extend(effects.into_events());
        publish(&self.event_sender, events);

        Ok(model)
    }

    /// One order with its lines and display names.
    pub async fn get_order(&self, order_id: i32) -> Result<OrderDetails, ServiceError> {
        let db = &*self.db_pool;
        bounded(self.timeout, "orders.get", async {
            let order = find_order(db, order_id).await?;
            let items = order_items(db, order_id).await?;
            let names = display_names(db, [Some(order.customer_id), order.staff_id]).await?;
            let lines = describe_items(db, items).await?;

            Ok::<_, ServiceError>(OrderDetails {
                customer_name: names.get(&order.customer_id).cloned(),
                staff_name: order.staff_id.and_then(|id| names.get(&id).cloned()),
                order,
                lines,
            })
        })
        .await
    }

    pub async fn orders_for_customer(&self, customer_id: i32) -> Result<Vec<order::Model>, ServiceError> {
        let db = &*self.db_pool;
        bounded(self.timeout, "orders.for_customer", async {
            let rows = order::Entity::find()
                .filter(order::Column::CustomerId.eq(customer_id))
                .order_by_desc(order::Column::OrderDate)
                .order_by_desc(order::Column::Id)
                .all(db)
                .await?;
            Ok::<_, ServiceError>(rows)
        })
        .await
    }

    /// Orders matching `filter`, newest first, with customer and staff names.
    pub async fn list_orders(&self, filter: OrderFilter) -> Result<Vec<OrderSummary>, ServiceError> {
        let db = &*self.db_pool;
        bounded(self.timeout, "orders.list", async {
            let mut query = order::Entity::find();
            if let Some(status) = filter.status {
                query = query.filter(order::Column::Status.eq(status));
            }
            if let Some(customer_id) = filter.customer_id {
                query = query.filter(order::Column::CustomerId.eq(customer_id));
            }
            let orders = query
                .order_by_desc(order::Column::OrderDate)
                .order_by_desc(order::Column::Id)
                .all(db)
                .await?;

            let ids = orders
                .iter()
                .flat_map(|o| [Some(o.customer_id), o.staff_id]);
            let names = display_names(db, ids).await?;

            let summaries = orders
                .into_iter()
                .map(|order| OrderSummary {
                    customer_name: names.get(&order.customer_id).cloned(),
                    staff_name: order.staff_id.and_then(|id| names.get(&id).cloned()),
                    order,
                })
                .collect();
            Ok::<_, ServiceError>(summaries)
        })
        .await
    }
}

/// Inserts the order and its items and claims inventory for each line.
async fn place_order<C>(
    conn: &C,
    request: &NewOrder,
    total: Decimal,
    status: OrderStatus,
    payment_status: PaymentStatus,
) -> Result<(order::Model, LedgerEffects), ServiceError>
where
    C: ConnectionTrait,
{
    let now = Utc::now();
    let order = order::ActiveModel {
        customer_id: Set(request.customer_id),
        staff_id: Set(request.staff_id),
        total_amount: Set(total.round_dp(2)),
        status: Set(status),
        payment_method: Set(request.payment_method.clone()),
        payment_status: Set(payment_status),
        notes: Set(request.notes.clone()),
        order_date: Set(now),
        updated_at: Set(Some(now)),
        ..Default::default()
    }
    .insert(conn)
    .await?;

    let mut effects = LedgerEffects::default();
    for line in &request.items {
        let (product_id, pet_id) = line.item.columns();
        order_item::ActiveModel {
            order_id: Set(order.id),
            product_id: Set(product_id),
            pet_id: Set(pet_id),
            quantity: Set(line.quantity),
            unit_price: Set(line.unit_price),
            ..Default::default()
        }
        .insert(conn)
        .await?;

        match line.item {
            ItemRef::Product(product_id) => {
                effects
                    .stock
                    .push(adjust_stock(conn, product_id, -line.quantity).await?);
            }
            ItemRef::Pet(pet_id) => {
                effects.pets.push(
                    transition_pet(conn, pet_id, &[PetStatus::Available], PetStatus::Sold).await?,
                );
            }
        }
    }

    Ok((order, effects))
}

/// Returns every line's stock and puts every pet back on sale.
async fn reverse_inventory<C>(
    conn: &C,
    items: &[order_item::Model],
) -> Result<LedgerEffects, ServiceError>
where
    C: ConnectionTrait,
{
    let mut effects = LedgerEffects::default();
    for item in items {
        match ItemRef::from_columns(item.product_id, item.pet_id) {
            Some(ItemRef::Product(product_id)) => {
                effects
                    .stock
                    .push(adjust_stock(conn, product_id, item.quantity).await?);
            }
            Some(ItemRef::Pet(pet_id)) => {
                effects
                    .pets
                    .push(set_pet_status(conn, pet_id, PetStatus::Available).await?);
            }
            None => {
                return Err(ServiceError::InternalError(format!(
                    "order item {} references no item",
                    item.id
                )))
            }
        }
    }
    Ok(effects)
}

/// Claims and removes an order row, then returns its stock and pets.
///
/// The claim matches the status that was read, so a concurrent cancel or
/// delete makes this one fail instead of reversing inventory twice.
async fn remove_order<C>(conn: &C, order: &order::Model) -> Result<LedgerEffects, ServiceError>
where
    C: ConnectionTrait,
{
    let items = order_items(conn, order.id).await?;

    let claimed = order::Entity::delete_many()
        .filter(order::Column::Id.eq(order.id))
        .filter(order::Column::Status.eq(order.status))
        .exec(conn)
        .await?;
    if claimed.rows_affected == 0 {
        return Err(ServiceError::OrderDeletionFailed(format!(
            "order {} changed while it was being deleted",
            order.id
        )));
    }

    let effects = if order.status == OrderStatus::Cancelled {
        LedgerEffects::default()
    } else {
        reverse_inventory(conn, &items).await?
    };

    order_item::Entity::delete_many()
        .filter(order_item::Column::OrderId.eq(order.id))
        .exec(conn)
        .await?;

    Ok(effects)
}

async fn find_order<C>(conn: &C, order_id: i32) -> Result<order::Model, ServiceError>
where
    C: ConnectionTrait,
{
    order::Entity::find_by_id(order_id)
        .one(conn)
        .await?
        .ok_or_else(|| ServiceError::NotFound(format!("order {}", order_id)))
}

async fn order_items<C>(conn: &C, order_id: i32) -> Result<Vec<order_item::Model>, ServiceError>
where
    C: ConnectionTrait,
{
    Ok(order_item::Entity::find()
        .filter(order_item::Column::OrderId.eq(order_id))
        .order_by_asc(order_item::Column::Id)
        .all(conn)
        .await?)
}

async fn describe_items<C>(
    conn: &C,
    items: Vec<order_item::Model>,
) -> Result<Vec<OrderLine>, ServiceError>
where
    C: ConnectionTrait,
{
    let product_ids: Vec<i32> = items.iter().filter_map(|i| i.product_id).collect();
    let pet_ids: Vec<i32> = items.iter().filter_map(|i| i.pet_id).collect();

    let product_names: HashMap<i32, String> = product::Entity::find()
        .filter(product::Column::Id.is_in(product_ids))
        .all(conn)
        .await?
        .into_iter()
        .map(|p| (p.id, p.name))
        .collect();
    let pet_names: HashMap<i32, String> = pet::Entity::find()
        .filter(pet::Column::Id.is_in(pet_ids))
        .all(conn)
        .await?
        .into_iter()
        .map(|p| (p.id, p.name))
        .collect();

    Ok(items
        .into_iter()
        .map(|item| {
            let item_ref = ItemRef::from_columns(item.product_id, item.pet_id);
            let name = match item_ref {
                Some(ItemRef::Product(id)) => product_names.get(&id).cloned(),
                Some(ItemRef::Pet(id)) => pet_names.get(&id).cloned(),
                None => None,
            };
            OrderLine {
                item_id: item.id,
                item: item_ref,
                name,
                quantity: item.quantity,
                unit_price: item.unit_price,
            }
        })
        .collect())
}

/// Database failures during creation surface as `OrderCreationFailed`;
/// domain rejections keep their own variant.
/// Anything that goes wrong once the order was found fails the deletion as a
/// whole. Timeouts and pool exhaustion keep their own variant.
fn deletion_failed(order_id: i32, err: ServiceError) -> ServiceError {
    match err {
        err @ (ServiceError::DatabaseUnavailable(_) | ServiceError::OrderDeletionFailed(_)) => err,
        other => {
            error!(order_id, error = %other, "Order deletion rolled back");
            ServiceError::OrderDeletionFailed(other.to_string())
        }
    }
}

fn creation_failed(err: ServiceError) -> ServiceError {
    match err {
        ServiceError::DatabaseError(err) => {
            error!(error = %err, "Order creation rolled back");
            ServiceError::OrderCreationFailed(err.to_string())
        }
        other => other,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use assert_matches::assert_matches;
    use rust_decimal_macros::dec;
    use sea_orm::DbErr;

    #[test]
    fn totals_include_tax_and_round_to_cents() {
        let totals = OrderTotals::compute(&[LineItem::product(1, 3, dec!(12.50))], dec!(0.12));
        assert_eq!(totals.subtotal, dec!(37.50));
        assert_eq!(totals.tax, dec!(4.50));
        assert_eq!(totals.total, dec!(42.00));

        let odd = OrderTotals::compute(
            &[LineItem::product(1, 1, dec!(9.99)), LineItem::pet(2, dec!(0.01))],
            dec!(0.12),
        );
        assert_eq!(odd.total, dec!(11.20));
        assert_eq!(odd.subtotal + odd.tax, odd.total);
    }

    #[test]
    fn empty_and_malformed_orders_are_rejected() {
        assert_matches!(
            NewOrder::new(1, vec![], "cash").check(),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            NewOrder::new(1, vec![LineItem::product(1, 0, dec!(1))], "cash").check(),
            Err(ServiceError::ValidationError(_))
        );
        let mut two_rexes = LineItem::pet(1, dec!(300));
        two_rexes.quantity = 2;
        assert_matches!(
            NewOrder::new(1, vec![two_rexes], "cash").check(),
            Err(ServiceError::ValidationError(_))
        );
        assert_matches!(
            NewOrder::new(1, vec![LineItem::product(1, 1, dec!(1))], "").check(),
            Err(ServiceError::ValidationError(_))
        );
        assert!(NewOrder::new(1, vec![LineItem::product(1, 1, dec!(1))], "card")
            .check()
            .is_ok());
    }

    #[test]
    fn database_failures_become_creation_failures() {
        assert_matches!(
            creation_failed(ServiceError::DatabaseError(DbErr::Custom("disk full".into()))),
            ServiceError::OrderCreationFailed(_)
        );
        assert_matches!(
            creation_failed(ServiceError::InsufficientStock("Dog Food".into())),
            ServiceError::InsufficientStock(_)
        );
    }

    #[test]
    fn anything_after_lookup_fails_the_deletion() {
        assert_matches!(
            deletion_failed(7, ServiceError::NotFound("product 3".into())),
            ServiceError::OrderDeletionFailed(msg) if msg.contains("product 3")
        );
        assert_matches!(
            deletion_failed(7, ServiceError::DatabaseError(DbErr::Custom("disk full".into()))),
            ServiceError::OrderDeletionFailed(_)
        );
        assert_matches!(
            deletion_failed(7, ServiceError::DatabaseUnavailable("timed out".into())),
            ServiceError::DatabaseUnavailable(_)
        );
    }
}
