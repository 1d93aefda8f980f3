use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::Result;
use crate::error::OperationError;

/// One purchase: `quantity` units of a product, paid for from the user's balance.
///
/// Money is kept in integer cents.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderRequest {
    pub order_id: String,
    pub user_id: String,
    pub product_id: String,
    pub quantity: u64,
    pub amount_cents: u64,
}

impl OrderRequest {
    #[must_use]
    pub fn new(
        order_id: impl Into<String>,
        user_id: impl Into<String>,
        product_id: impl Into<String>,
        quantity: u64,
        amount_cents: u64,
    ) -> Self {
        Self {
            order_id: order_id.into(),
            user_id: user_id.into(),
            product_id: product_id.into(),
            quantity,
            amount_cents,
        }
    }

    /// Initial saga payload.
    ///
    /// # Errors
    ///
    /// Returns an error if the request cannot be serialized.
    pub fn to_payload(&self) -> Result<Value> {
        serde_json::to_value(self).map_err(|source| OperationError::InvalidPayload {
            step: "order_request".to_string(),
            source,
        })
    }
}

/// Payload handed from step to step: the request plus what each step did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSagaData {
    #[serde(flatten)]
    pub request: OrderRequest,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub reserved_quantity: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order_status: Option<OrderStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payment_status: Option<PaymentStatus>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remaining_balance_cents: Option<u64>,
}

impl OrderSagaData {
    pub(crate) fn decode(step: &str, payload: Value) -> Result<Self> {
        serde_json::from_value(payload).map_err(|source| OperationError::InvalidPayload {
            step: step.to_string(),
            source,
        })
    }

    pub(crate) fn encode(&self, step: &str) -> Result<Value> {
        serde_json::to_value(self).map_err(|source| OperationError::InvalidPayload {
            step: step.to_string(),
            source,
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum OrderStatus {
    Pending,
    Cancelled,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PaymentStatus {
    Captured,
    Refunded,
}

/// Stored under `inventory:<product>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryDocument {
    pub stock: u64,
    pub reserved: u64,
}

/// Stored under `orders:<order>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderDocument {
    pub order_id: String,
    pub user_id: String,
    pub product_id: String,
    pub quantity: u64,
    pub amount_cents: u64,
    pub status: OrderStatus,
}

/// Stored under `payments:<order>`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PaymentDocument {
    pub order_id: String,
    pub user_id: String,
    pub amount_cents: u64,
    pub status: PaymentStatus,
}

/// Stored under `users:<user>`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct UserDocument {
    pub balance_cents: u64,
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;

    #[test]
    fn request_payload_decodes_as_fresh_saga_data() {
        let request = OrderRequest::new("ORD1", "USER456", "mango", 1, 9999);

        let data = OrderSagaData::decode(
            "reserve_inventory",
            request.to_payload().expect("request serializes"),
        )
        .expect("payload decodes");

        assert_eq!(data.request, request);
        assert!(data.reserved_quantity.is_none());
        assert!(data.order_status.is_none());
    }

    #[test]
    fn step_progress_is_flattened_next_to_the_request() {
        let data = OrderSagaData {
            request: OrderRequest::new("ORD1", "USER456", "mango", 2, 500),
            reserved_quantity: Some(2),
            order_status: Some(OrderStatus::Pending),
            payment_status: None,
            remaining_balance_cents: None,
        };

        let value = data.encode("create_order").expect("data encodes");

        assert_eq!(
            value,
            json!({
                "order_id": "ORD1",
                "user_id": "USER456",
                "product_id": "mango",
                "quantity": 2,
                "amount_cents": 500,
                "reserved_quantity": 2,
                "order_status": "pending",
            })
        );
    }

    #[test]
    fn malformed_payload_names_the_step() {
        let err = OrderSagaData::decode("create_order", json!({"order_id": 7}))
            .expect_err("should reject malformed payload");

        assert!(matches!(
            err,
            OperationError::InvalidPayload { ref step, .. } if step == "create_order"
        ));
    }
}
