use rust_decimal::Decimal;
use thiserror::Error;

use tallyerp_core::{ProductId, WarehouseId};

/// Stock business-rule failures.
///
/// None of these are transient: resubmitting the same request yields the same
/// error until the inputs or the stock position change.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum InventoryError {
    #[error(
        "insufficient stock for product {product} in warehouse {warehouse}: requested {requested}, available {available}"
    )]
    InsufficientStock {
        product: ProductId,
        warehouse: WarehouseId,
        requested: Decimal,
        available: Decimal,
    },

    #[error("unknown warehouse {0}")]
    UnknownWarehouse(WarehouseId),

    #[error("validation failed: {0}")]
    Validation(String),
}

impl InventoryError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}
