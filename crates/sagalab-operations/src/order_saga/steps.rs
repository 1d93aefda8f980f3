use sagalab_core::{ReadConcern, ReadResult, StoreError, Timestamp, WriteAck};
use sagalab_saga::{SagaStep, StepInvocation};
use serde::Serialize;
use serde::de::DeserializeOwned;
use serde_json::Value;
use tracing::debug;

use super::data::{
    InventoryDocument, OrderDocument, OrderSagaData, OrderStatus, PaymentDocument, PaymentStatus,
    UserDocument,
};
use super::{inventory_key, order_key, payment_key, user_key};
use crate::Result;
use crate::context::StepContext;
use crate::error::OperationError;

pub const RESERVE_INVENTORY: &str = "reserve_inventory";
pub const CREATE_ORDER: &str = "create_order";
pub const PROCESS_PAYMENT: &str = "process_payment";
pub const UPDATE_USER_BALANCE: &str = "update_user_balance";

fn conflict(key: &str, reason: impl Into<String>) -> OperationError {
    OperationError::Store(StoreError::Conflict {
        key: key.to_string(),
        reason: reason.into(),
    })
}

/// Linearizable read of a document and its version.
fn load<T: DeserializeOwned>(ctx: &StepContext, key: &str) -> Result<Option<(T, Timestamp)>> {
    match ctx.read_with(key, ReadConcern::Linearizable)? {
        ReadResult::Found { value, timestamp } => {
            let document = serde_json::from_value(value).map_err(|source| {
                OperationError::MalformedDocument {
                    key: key.to_string(),
                    source,
                }
            })?;
            Ok(Some((document, timestamp)))
        }
        ReadResult::NotFound => Ok(None),
    }
}

fn require<T: DeserializeOwned>(ctx: &StepContext, key: &str) -> Result<(T, Timestamp)> {
    load(ctx, key)?.ok_or_else(|| conflict(key, "no such record"))
}

fn store<T: Serialize>(
    ctx: &StepContext,
    invocation: &StepInvocation,
    key: &str,
    document: &T,
    expected: Timestamp,
) -> Result<WriteAck> {
    let payload =
        serde_json::to_value(document).map_err(|source| OperationError::MalformedDocument {
            key: key.to_string(),
            source,
        })?;
    ctx.write(invocation, key, payload, Some(expected))
}

/// Moves `quantity` units from stock to reserved.
pub struct ReserveInventoryStep;

impl SagaStep for ReserveInventoryStep {
    type Context = StepContext;
    type Error = OperationError;

    fn name(&self) -> &str {
        RESERVE_INVENTORY
    }

    fn idempotency_key(&self) -> Option<&str> {
        Some(RESERVE_INVENTORY)
    }

    fn execute(
        &self,
        ctx: &StepContext,
        invocation: &StepInvocation,
        input: Value,
    ) -> Result<Value> {
        let mut data = OrderSagaData::decode(self.name(), input)?;
        let quantity = data.request.quantity;
        let key = inventory_key(&data.request.product_id);

        let (inventory, version) = require::<InventoryDocument>(ctx, &key)?;
        if inventory.stock < quantity {
            return Err(conflict(
                &key,
                format!(
                    "insufficient stock: {} available, {quantity} requested",
                    inventory.stock
                ),
            ));
        }

        let Some(total_reserved) = inventory.reserved.checked_add(quantity) else {
            return Err(conflict(&key, "reserved quantity would overflow"));
        };
        let reserved = InventoryDocument {
            stock: inventory.stock - quantity,
            reserved: total_reserved,
        };
        store(ctx, invocation, &key, &reserved, version)?;
        debug!(key = %key, quantity, stock = reserved.stock, "reserved inventory");

        data.reserved_quantity = Some(quantity);
        data.encode(self.name())
    }

    fn compensate(
        &self,
        ctx: &StepContext,
        invocation: &StepInvocation,
        _input: Value,
        forward_result: Value,
    ) -> Result<()> {
        let data = OrderSagaData::decode(self.name(), forward_result)?;
        let quantity = data.reserved_quantity.unwrap_or(data.request.quantity);
        let key = inventory_key(&data.request.product_id);

        let Some((inventory, version)) = load::<InventoryDocument>(ctx, &key)? else {
            return Ok(());
        };
        let Some(stock) = inventory.stock.checked_add(quantity) else {
            return Err(conflict(&key, "released stock would overflow"));
        };
        let released = InventoryDocument {
            stock,
            reserved: inventory.reserved.saturating_sub(quantity),
        };
        store(ctx, invocation, &key, &released, version)?;
        debug!(key = %key, quantity, "released reservation");
        Ok(())
    }

    fn compensation_description(&self) -> String {
        "release reserved stock back to inventory".to_string()
    }
}

/// Inserts the order record with status `pending`.
pub struct CreateOrderStep;

impl SagaStep for CreateOrderStep {
    type Context = StepContext;
    type Error = OperationError;

    fn name(&self) -> &str {
        CREATE_ORDER
    }

    fn idempotency_key(&self) -> Option<&str> {
        Some(CREATE_ORDER)
    }

    fn execute(
        &self,
        ctx: &StepContext,
        invocation: &StepInvocation,
        input: Value,
    ) -> Result<Value> {
        let mut data = OrderSagaData::decode(self.name(), input)?;
        let key = order_key(&data.request.order_id);
        let order = OrderDocument {
            order_id: data.request.order_id.clone(),
            user_id: data.request.user_id.clone(),
            product_id: data.request.product_id.clone(),
            quantity: data.request.quantity,
            amount_cents: data.request.amount_cents,
            status: OrderStatus::Pending,
        };

        store(ctx, invocation, &key, &order, Timestamp::ZERO)?;
        debug!(key = %key, "created order");

        data.order_status = Some(OrderStatus::Pending);
        data.encode(self.name())
    }

    fn compensate(
        &self,
        ctx: &StepContext,
        invocation: &StepInvocation,
        input: Value,
        _forward_result: Value,
    ) -> Result<()> {
        let data = OrderSagaData::decode(self.name(), input)?;
        let key = order_key(&data.request.order_id);

        let Some((mut order, version)) = load::<OrderDocument>(ctx, &key)? else {
            return Ok(());
        };
        if order.status == OrderStatus::Cancelled {
            return Ok(());
        }
        order.status = OrderStatus::Cancelled;
        store(ctx, invocation, &key, &order, version)?;
        debug!(key = %key, "cancelled order");
        Ok(())
    }

    fn compensation_description(&self) -> String {
        "mark the order as cancelled".to_string()
    }
}

/// Captures the payment after checking the user can afford it.
pub struct ProcessPaymentStep;

impl SagaStep for ProcessPaymentStep {
    type Context = StepContext;
    type Error = OperationError;

    fn name(&self) -> &str {
        PROCESS_PAYMENT
    }

    fn idempotency_key(&self) -> Option<&str> {
        Some(PROCESS_PAYMENT)
    }

    fn execute(
        &self,
        ctx: &StepContext,
        invocation: &StepInvocation,
        input: Value,
    ) -> Result<Value> {
        let mut data = OrderSagaData::decode(self.name(), input)?;
        let amount = data.request.amount_cents;
        let account = user_key(&data.request.user_id);

        let (user, _) = require::<UserDocument>(ctx, &account)?;
        if user.balance_cents < amount {
            return Err(conflict(
                &account,
                format!(
                    "insufficient balance: {} cents available, {amount} required",
                    user.balance_cents
                ),
            ));
        }

        let key = payment_key(&data.request.order_id);
        let payment = PaymentDocument {
            order_id: data.request.order_id.clone(),
            user_id: data.request.user_id.clone(),
            amount_cents: amount,
            status: PaymentStatus::Captured,
        };
        store(ctx, invocation, &key, &payment, Timestamp::ZERO)?;
        debug!(key = %key, amount_cents = amount, "captured payment");

        data.payment_status = Some(PaymentStatus::Captured);
        data.encode(self.name())
    }

    fn compensate(
        &self,
        ctx: &StepContext,
        invocation: &StepInvocation,
        input: Value,
        _forward_result: Value,
    ) -> Result<()> {
        let data = OrderSagaData::decode(self.name(), input)?;
        let key = payment_key(&data.request.order_id);

        let Some((mut payment, version)) = load::<PaymentDocument>(ctx, &key)? else {
            return Ok(());
        };
        if payment.status == PaymentStatus::Refunded {
            return Ok(());
        }
        payment.status = PaymentStatus::Refunded;
        store(ctx, invocation, &key, &payment, version)?;
        debug!(key = %key, "refunded payment");
        Ok(())
    }

    fn compensation_description(&self) -> String {
        "refund the captured payment".to_string()
    }
}

/// Debits the order amount from the user's balance.
pub struct UpdateUserBalanceStep;

impl SagaStep for UpdateUserBalanceStep {
    type Context = StepContext;
    type Error = OperationError;

    fn name(&self) -> &str {
        UPDATE_USER_BALANCE
    }

    fn idempotency_key(&self) -> Option<&str> {
        Some(UPDATE_USER_BALANCE)
    }

    fn execute(
        &self,
        ctx: &StepContext,
        invocation: &StepInvocation,
        input: Value,
    ) -> Result<Value> {
        let mut data = OrderSagaData::decode(self.name(), input)?;
        let amount = data.request.amount_cents;
        let key = user_key(&data.request.user_id);

        let (user, version) = require::<UserDocument>(ctx, &key)?;
        let Some(balance_cents) = user.balance_cents.checked_sub(amount) else {
            return Err(conflict(
                &key,
                format!(
                    "insufficient balance: {} cents available, {amount} required",
                    user.balance_cents
                ),
            ));
        };

        store(ctx, invocation, &key, &UserDocument { balance_cents }, version)?;
        debug!(key = %key, balance_cents, "debited user balance");

        data.remaining_balance_cents = Some(balance_cents);
        data.encode(self.name())
    }

    fn compensate(
        &self,
        ctx: &StepContext,
        invocation: &StepInvocation,
        input: Value,
        _forward_result: Value,
    ) -> Result<()> {
        let data = OrderSagaData::decode(self.name(), input)?;
        let key = user_key(&data.request.user_id);

        let (user, version) = require::<UserDocument>(ctx, &key)?;
        let Some(balance_cents) = user.balance_cents.checked_add(data.request.amount_cents) else {
            return Err(conflict(&key, "restored balance would overflow"));
        };
        let restored = UserDocument { balance_cents };
        store(ctx, invocation, &key, &restored, version)?;
        debug!(key = %key, balance_cents = restored.balance_cents, "reverted user balance");
        Ok(())
    }

    fn compensation_description(&self) -> String {
        "credit the order amount back to the user".to_string()
    }
}
