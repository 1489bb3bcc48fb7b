//! Production order lifecycle

use super::{require_officer, Ledger};
use crate::audit::AuditEvent;
use crate::error::{LedgerError, LedgerResult};
use crate::store::Table;
use chrono::Utc;
use logi_types::{ActionKind, Caller, Order, OrderId, OrderStatus, Priority};
use tracing::{info, instrument};

impl Ledger {
    /// Place a new order and return its id.
    ///
    /// The id counter and the order table are one document, so allocating
    /// an id and storing the order is a single write.
    #[instrument(skip(self, caller), fields(user = %caller.user))]
    pub async fn create_order(
        &self,
        caller: &Caller,
        item: &str,
        quantity: i64,
        priority: Priority,
        location: &str,
    ) -> LedgerResult<OrderId> {
        let item = item.trim();
        if item.is_empty() {
            return Err(LedgerError::InvalidRange(
                "item must not be empty".to_string(),
            ));
        }
        let quantity = u32::try_from(quantity)
            .ok()
            .filter(|q| *q > 0)
            .ok_or_else(|| {
                LedgerError::InvalidRange(format!("quantity must be > 0, got {}", quantity))
            })?;

        let mut state = self.state.lock().await;
        let mut orders = state.orders.clone();
        let id = orders.next_id;
        let order = Order::new(
            id,
            item,
            quantity,
            priority,
            caller.user.clone(),
            location.trim(),
            Utc::now(),
        );
        orders.orders.insert(id, order);
        orders.next_id = id.next();
        self.persist(Table::Orders, &orders).await?;
        state.orders = orders;
        drop(state);

        info!(order_id = %id, item = %item, quantity, %priority, "Order created");
        self.record(vec![AuditEvent::new(
            caller.user.clone(),
            ActionKind::OrderCreated,
            id.to_string(),
        )
        .with_detail(format!("{} x{} ({})", item, quantity, priority))])
        .await;
        Ok(id)
    }

    /// Claim an order. An order already claimed by someone else can only
    /// be taken over by an officer.
    #[instrument(skip(self, caller), fields(user = %caller.user))]
    pub async fn claim_order(&self, caller: &Caller, id: OrderId) -> LedgerResult<Order> {
        let mut state = self.state.lock().await;
        let mut orders = state.orders.clone();
        let order = orders
            .orders
            .get_mut(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("order #{}", id)))?;

        if order.status.is_terminal() {
            return Err(LedgerError::OrderClosed(id.to_string()));
        }
        if let Some(holder) = &order.claimed_by {
            if !caller.is_elevated() {
                return Err(LedgerError::Unauthorized(format!(
                    "order #{} is already claimed by {}",
                    id, holder
                )));
            }
        }

        let previous = order.claimed_by.replace(caller.user.clone());
        order.transition(OrderStatus::Claimed, Utc::now());
        let claimed = order.clone();

        self.persist(Table::Orders, &orders).await?;
        state.orders = orders;
        drop(state);

        info!(order_id = %id, overridden = previous.is_some(), "Order claimed");
        let mut event = AuditEvent::new(caller.user.clone(), ActionKind::OrderClaimed, id.to_string());
        if let Some(previous) = previous {
            event = event.with_detail(format!("taken over from {}", previous));
        }
        self.record(vec![event]).await;
        Ok(claimed)
    }

    /// Move an order to any of the enumerated states.
    ///
    /// Jumps are allowed; only strings outside the six states and changes
    /// to an already completed order are rejected.
    #[instrument(skip(self, caller), fields(user = %caller.user))]
    pub async fn set_order_status(
        &self,
        caller: &Caller,
        id: OrderId,
        status: &str,
    ) -> LedgerResult<Order> {
        let status: OrderStatus = status
            .parse()
            .map_err(|_| LedgerError::InvalidStatus(status.to_string()))?;

        let mut state = self.state.lock().await;
        let mut orders = state.orders.clone();
        let order = orders
            .orders
            .get_mut(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("order #{}", id)))?;

        if order.status.is_terminal() {
            return Err(LedgerError::OrderClosed(id.to_string()));
        }
        let from = order.status;
        order.transition(status, Utc::now());
        let updated = order.clone();

        self.persist(Table::Orders, &orders).await?;
        state.orders = orders;
        drop(state);

        info!(order_id = %id, %from, to = %status, "Order status changed");
        self.record(vec![AuditEvent::new(
            caller.user.clone(),
            ActionKind::OrderStatusChanged,
            id.to_string(),
        )
        .with_detail(status.to_string())])
        .await;
        Ok(updated)
    }

    /// Remove an order permanently. Its id is never handed out again.
    #[instrument(skip(self, caller), fields(user = %caller.user))]
    pub async fn delete_order(&self, caller: &Caller, id: OrderId) -> LedgerResult<Order> {
        require_officer(caller, "deleting an order")?;

        let mut state = self.state.lock().await;
        let mut orders = state.orders.clone();
        let removed = orders
            .orders
            .remove(&id)
            .ok_or_else(|| LedgerError::NotFound(format!("order #{}", id)))?;
        self.persist(Table::Orders, &orders).await?;
        state.orders = orders;
        drop(state);

        info!(order_id = %id, "Order deleted");
        self.record(vec![AuditEvent::new(
            caller.user.clone(),
            ActionKind::OrderDeleted,
            id.to_string(),
        )])
        .await;
        Ok(removed)
    }

    /// Orders by ascending id, optionally only those in `status`
    pub async fn list_orders(&self, status: Option<OrderStatus>) -> Vec<Order> {
        self.state
            .lock()
            .await
            .orders
            .orders
            .values()
            .filter(|order| status.map_or(true, |s| order.status == s))
            .cloned()
            .collect()
    }

    pub async fn get_order(&self, id: OrderId) -> LedgerResult<Order> {
        self.state
            .lock()
            .await
            .orders
            .orders
            .get(&id)
            .cloned()
            .ok_or_else(|| LedgerError::NotFound(format!("order #{}", id)))
    }
}
