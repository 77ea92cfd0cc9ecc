use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use orderflow_core::{CustomerId, OrderId, ProductId};
use orderflow_orders::{Order, OrderItem, OrderStatus};

// -------------------------
// Request DTOs
// -------------------------

#[derive(Debug, Deserialize)]
pub struct CreateOrderItemRequest {
    pub product_id: u64,
    pub quantity: u32,
}

#[derive(Debug, Deserialize)]
pub struct CreateOrderRequest {
    pub customer_id: u64,
    pub items: Vec<CreateOrderItemRequest>,
}

impl CreateOrderRequest {
    pub fn order_items(&self) -> Vec<OrderItem> {
        self.items
            .iter()
            .map(|i| OrderItem {
                product_id: ProductId::new(i.product_id),
                quantity: i.quantity,
            })
            .collect()
    }
}

// -------------------------
// Response DTOs
// -------------------------

#[derive(Debug, Serialize)]
pub struct OrderLineResponse {
    pub product_id: ProductId,
    pub quantity: u32,
}

#[derive(Debug, Serialize)]
pub struct OrderResponse {
    pub id: OrderId,
    pub customer_id: CustomerId,
    pub products: BTreeSet<ProductId>,
    pub items: Vec<OrderLineResponse>,
    pub status: OrderStatus,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl From<&Order> for OrderResponse {
    fn from(order: &Order) -> Self {
        Self {
            id: order.id_typed(),
            customer_id: order.customer_id(),
            products: order.products(),
            items: order
                .lines()
                .iter()
                .map(|l| OrderLineResponse {
                    product_id: l.product_id,
                    quantity: l.quantity,
                })
                .collect(),
            status: order.status(),
            created_at: order.created_at(),
            updated_at: order.updated_at(),
        }
    }
}
