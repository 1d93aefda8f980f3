//! E-commerce order processing as a saga.
//!
//! Four steps, each committing independently against the replicated store:
//!
//! 1. reserve inventory (`inventory:<product>`), undone by releasing the reservation
//! 2. create the order (`orders:<order>`), undone by cancelling it
//! 3. capture the payment (`payments:<order>`), undone by refunding it
//! 4. debit the user (`users:<user>`), undone by crediting the amount back
//!
//! Insufficient stock or balance surfaces as a store `Conflict`. Every step
//! declares an idempotency key, so timed-out writes are retried and an
//! interrupted saga can resume forward after a restart.

mod data;
mod steps;

use sagalab_core::Timestamp;
use sagalab_saga::{SagaBuilder, SagaDefinition};
use serde_json::json;

pub use data::{
    InventoryDocument, OrderDocument, OrderRequest, OrderSagaData, OrderStatus, PaymentDocument,
    PaymentStatus, UserDocument,
};
pub use steps::{
    CREATE_ORDER, CreateOrderStep, PROCESS_PAYMENT, ProcessPaymentStep, RESERVE_INVENTORY,
    ReserveInventoryStep, UPDATE_USER_BALANCE, UpdateUserBalanceStep,
};

use crate::context::StepContext;
use crate::error::OperationError;
use crate::providers::InMemoryReplicaSet;

/// Definition id the order saga is registered under.
pub const ORDER_SAGA_ID: &str = "order-processing";

#[must_use]
pub fn order_processing_saga() -> SagaDefinition<StepContext, OperationError> {
    SagaBuilder::new(ORDER_SAGA_ID)
        .first_step(ReserveInventoryStep)
        .then(CreateOrderStep)
        .then(ProcessPaymentStep)
        .then(UpdateUserBalanceStep)
        .build()
}

#[must_use]
pub fn inventory_key(product_id: &str) -> String {
    format!("inventory:{product_id}")
}

#[must_use]
pub fn order_key(order_id: &str) -> String {
    format!("orders:{order_id}")
}

#[must_use]
pub fn payment_key(order_id: &str) -> String {
    format!("payments:{order_id}")
}

#[must_use]
pub fn user_key(user_id: &str) -> String {
    format!("users:{user_id}")
}

/// Put `stock` units of a product on every running member, none reserved.
pub fn seed_inventory(store: &InMemoryReplicaSet, product_id: &str, stock: u64) -> Timestamp {
    store.seed(
        &inventory_key(product_id),
        json!({ "stock": stock, "reserved": 0 }),
    )
}

/// Put a user with `balance_cents` on every running member.
pub fn seed_user(store: &InMemoryReplicaSet, user_id: &str, balance_cents: u64) -> Timestamp {
    store.seed(&user_key(user_id), json!({ "balance_cents": balance_cents }))
}
