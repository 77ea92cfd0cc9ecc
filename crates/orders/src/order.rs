use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeSet;

use orderflow_core::{AggregateRoot, CustomerId, DomainError, DomainResult, OrderId, ProductId};

/// Order status lifecycle.
///
/// Transitions are monotonic along [`OrderStatus::transition_to`]'s table. No state past
/// `AwaitingPayment` exists yet; payment and shipment are owned by other systems.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Initial state, set when the order is inserted.
    Created,
    /// Set by the order status consumer once the order event is processed.
    AwaitingPayment,
}

/// Outcome of asking the state machine for a transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusChange {
    Applied { from: OrderStatus, to: OrderStatus },
    /// Target already reached (or passed); nothing to write.
    Unchanged,
}

impl OrderStatus {
    /// Every forward edge the lifecycle allows.
    const TRANSITIONS: &'static [(OrderStatus, OrderStatus)] =
        &[(OrderStatus::Created, OrderStatus::AwaitingPayment)];

    pub const fn as_str(self) -> &'static str {
        match self {
            OrderStatus::Created => "CREATED",
            OrderStatus::AwaitingPayment => "AWAITING_PAYMENT",
        }
    }

    /// Position along the lifecycle; later states have a higher rank.
    pub const fn rank(self) -> u8 {
        match self {
            OrderStatus::Created => 0,
            OrderStatus::AwaitingPayment => 1,
        }
    }

    /// Decide the transition from `self` to `target`.
    ///
    /// Re-applying a reached state, or asking for a state the order has already moved
    /// past, is `Unchanged`: duplicates never revert an order. A forward move that is not
    /// in the table is an invariant violation.
    pub fn transition_to(self, target: OrderStatus) -> DomainResult<StatusChange> {
        if target.rank() <= self.rank() {
            return Ok(StatusChange::Unchanged);
        }

        if Self::TRANSITIONS.contains(&(self, target)) {
            Ok(StatusChange::Applied {
                from: self,
                to: target,
            })
        } else {
            Err(DomainError::invariant(format!(
                "illegal order status transition {} -> {}",
                self.as_str(),
                target.as_str()
            )))
        }
    }
}

impl core::fmt::Display for OrderStatus {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.as_str())
    }
}

impl core::str::FromStr for OrderStatus {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "CREATED" => Ok(OrderStatus::Created),
            "AWAITING_PAYMENT" => Ok(OrderStatus::AwaitingPayment),
            other => Err(DomainError::validation(format!("unknown order status '{other}'"))),
        }
    }
}

/// Order line: product and requested quantity.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderLine {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// Requested line as received from the caller, before validation.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderItem {
    pub product_id: ProductId,
    pub quantity: u32,
}

/// A validated order that has not been assigned an id yet.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewOrder {
    customer_id: CustomerId,
    lines: Vec<OrderLine>,
    created_at: DateTime<Utc>,
}

impl NewOrder {
    /// Validate requested items into order lines.
    ///
    /// - at least one item, every quantity positive
    /// - repeated products collapse into one line (quantities summed, first position kept)
    pub fn build(
        customer_id: CustomerId,
        items: &[OrderItem],
        created_at: DateTime<Utc>,
    ) -> DomainResult<Self> {
        if items.is_empty() {
            return Err(DomainError::validation("order must contain at least one item"));
        }

        let mut lines: Vec<OrderLine> = Vec::with_capacity(items.len());
        for item in items {
            if item.quantity == 0 {
                return Err(DomainError::validation(format!(
                    "quantity for product {} must be positive",
                    item.product_id
                )));
            }

            match lines.iter_mut().find(|l| l.product_id == item.product_id) {
                Some(line) => {
                    line.quantity = line.quantity.checked_add(item.quantity).ok_or_else(|| {
                        DomainError::validation(format!(
                            "quantity for product {} overflows",
                            item.product_id
                        ))
                    })?;
                }
                None => lines.push(OrderLine {
                    product_id: item.product_id,
                    quantity: item.quantity,
                }),
            }
        }

        Ok(Self {
            customer_id,
            lines,
            created_at,
        })
    }

    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    /// Materialize the stored order once the store has picked an id.
    pub fn into_order(self, id: OrderId) -> Order {
        Order {
            id,
            customer_id: self.customer_id,
            lines: self.lines,
            status: OrderStatus::Created,
            created_at: self.created_at,
            updated_at: self.created_at,
            version: 1,
        }
    }
}

/// Aggregate root: Order.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Order {
    id: OrderId,
    customer_id: CustomerId,
    lines: Vec<OrderLine>,
    status: OrderStatus,
    created_at: DateTime<Utc>,
    updated_at: DateTime<Utc>,
    version: u64,
}

impl Order {
    pub fn id_typed(&self) -> OrderId {
        self.id
    }

    pub fn customer_id(&self) -> CustomerId {
        self.customer_id
    }

    pub fn lines(&self) -> &[OrderLine] {
        &self.lines
    }

    /// Set of referenced products (what the `orders` topic carries).
    pub fn products(&self) -> BTreeSet<ProductId> {
        self.lines.iter().map(|l| l.product_id).collect()
    }

    pub fn status(&self) -> OrderStatus {
        self.status
    }

    pub fn created_at(&self) -> DateTime<Utc> {
        self.created_at
    }

    pub fn updated_at(&self) -> DateTime<Utc> {
        self.updated_at
    }

    /// Move the order towards `target`, refreshing `updated_at` when it actually changes.
    pub fn advance(&mut self, target: OrderStatus, now: DateTime<Utc>) -> DomainResult<StatusChange> {
        let change = self.status.transition_to(target)?;
        if let StatusChange::Applied { to, .. } = change {
            self.status = to;
            self.updated_at = now;
        }
        Ok(change)
    }

    /// Store-side revision bump after a successful write.
    pub fn with_version(mut self, version: u64) -> Self {
        self.version = version;
        self
    }
}

impl AggregateRoot for Order {
    type Id = OrderId;

    fn id(&self) -> &Self::Id {
        &self.id
    }

    fn version(&self) -> u64 {
        self.version
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn item(product: u64, quantity: u32) -> OrderItem {
        OrderItem {
            product_id: ProductId::new(product),
            quantity,
        }
    }

    fn new_order(items: &[OrderItem]) -> DomainResult<NewOrder> {
        NewOrder::build(CustomerId::new(7), items, Utc::now())
    }

    #[test]
    fn new_order_starts_created_with_version_one() {
        let order = new_order(&[item(1, 2)]).unwrap().into_order(OrderId::new(10));

        assert_eq!(order.status(), OrderStatus::Created);
        assert_eq!(order.version(), 1);
        assert_eq!(*order.id(), OrderId::new(10));
        assert_eq!(order.created_at(), order.updated_at());
        assert_eq!(order.products(), BTreeSet::from([ProductId::new(1)]));
    }

    #[test]
    fn rejects_empty_items() {
        let err = new_order(&[]).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn rejects_zero_quantity() {
        let err = new_order(&[item(1, 1), item(2, 0)]).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn repeated_products_are_merged_in_first_position() {
        let order = new_order(&[item(3, 1), item(1, 2), item(3, 4)]).unwrap();
        assert_eq!(
            order.lines(),
            &[
                OrderLine { product_id: ProductId::new(3), quantity: 5 },
                OrderLine { product_id: ProductId::new(1), quantity: 2 },
            ]
        );
    }

    #[test]
    fn quantity_overflow_is_a_validation_error() {
        let err = new_order(&[item(1, u32::MAX), item(1, 1)]).unwrap_err();
        assert!(matches!(err, DomainError::Validation(_)));
    }

    #[test]
    fn created_advances_to_awaiting_payment() {
        let mut order = new_order(&[item(1, 1)]).unwrap().into_order(OrderId::new(1));
        let later = order.created_at() + chrono::Duration::seconds(5);

        let change = order.advance(OrderStatus::AwaitingPayment, later).unwrap();

        assert_eq!(
            change,
            StatusChange::Applied {
                from: OrderStatus::Created,
                to: OrderStatus::AwaitingPayment
            }
        );
        assert_eq!(order.status(), OrderStatus::AwaitingPayment);
        assert_eq!(order.updated_at(), later);
    }

    #[test]
    fn reapplying_awaiting_payment_is_a_no_op() {
        let mut order = new_order(&[item(1, 1)]).unwrap().into_order(OrderId::new(1));
        order.advance(OrderStatus::AwaitingPayment, Utc::now()).unwrap();
        let stamped = order.updated_at();

        let change = order
            .advance(OrderStatus::AwaitingPayment, stamped + chrono::Duration::seconds(1))
            .unwrap();

        assert_eq!(change, StatusChange::Unchanged);
        assert_eq!(order.updated_at(), stamped);
    }

    #[test]
    fn never_reverts_to_created() {
        let mut order = new_order(&[item(1, 1)]).unwrap().into_order(OrderId::new(1));
        order.advance(OrderStatus::AwaitingPayment, Utc::now()).unwrap();

        assert_eq!(order.advance(OrderStatus::Created, Utc::now()).unwrap(), StatusChange::Unchanged);
        assert_eq!(order.status(), OrderStatus::AwaitingPayment);
    }

    #[test]
    fn status_uses_screaming_snake_case_on_the_wire() {
        let json = serde_json::to_string(&OrderStatus::AwaitingPayment).unwrap();
        assert_eq!(json, "\"AWAITING_PAYMENT\"");
        assert!(serde_json::from_str::<OrderStatus>("\"EM_PROCESSAMENTO\"").is_err());
        assert_eq!("CREATED".parse::<OrderStatus>().unwrap(), OrderStatus::Created);
    }

    fn any_status() -> impl Strategy<Value = OrderStatus> {
        prop_oneof![Just(OrderStatus::Created), Just(OrderStatus::AwaitingPayment)]
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 64,
            .. ProptestConfig::default()
        })]

        #[test]
        fn status_rank_never_decreases(targets in proptest::collection::vec(any_status(), 0..16)) {
            let mut order = new_order(&[item(1, 1)]).unwrap().into_order(OrderId::new(1));
            let mut last_rank = order.status().rank();

            for target in targets {
                let _ = order.advance(target, Utc::now());
                prop_assert!(order.status().rank() >= last_rank);
                last_rank = order.status().rank();
            }
        }

        #[test]
        fn merging_preserves_total_quantity(
            raw in proptest::collection::vec((1u64..6, 1u32..1_000), 1..24)
        ) {
            let items: Vec<OrderItem> = raw.iter().map(|(p, q)| item(*p, *q)).collect();
            let order = new_order(&items).unwrap();

            let requested: u64 = raw.iter().map(|(_, q)| u64::from(*q)).sum();
            let merged: u64 = order.lines().iter().map(|l| u64::from(l.quantity)).sum();
            prop_assert_eq!(requested, merged);

            let distinct: BTreeSet<u64> = raw.iter().map(|(p, _)| *p).collect();
            prop_assert_eq!(order.lines().len(), distinct.len());
        }
    }
}
