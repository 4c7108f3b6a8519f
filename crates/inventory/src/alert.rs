//! Minimum-stock rules and low-stock alerts.

use std::collections::HashMap;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tallyerp_core::{ProductId, WarehouseId};

use crate::balance::StockBalance;

/// Minimum quantity that should be on hand.
///
/// Without a warehouse the rule applies to the product's total across all
/// warehouses.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MinStockRule {
    pub product_id: ProductId,
    pub warehouse_id: Option<WarehouseId>,
    pub min_quantity: Decimal,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LowStockAlert {
    pub product_id: ProductId,
    pub warehouse_id: Option<WarehouseId>,
    pub quantity: Decimal,
    pub min_quantity: Decimal,
}

impl LowStockAlert {
    pub fn shortfall(&self) -> Decimal {
        self.min_quantity - self.quantity
    }
}

/// Rules whose quantity on hand is strictly below the minimum, in rule order.
pub fn evaluate_low_stock(rules: &[MinStockRule], balances: &[StockBalance]) -> Vec<LowStockAlert> {
    let mut per_key: HashMap<(ProductId, WarehouseId), Decimal> = HashMap::new();
    let mut per_product: HashMap<ProductId, Decimal> = HashMap::new();
    for b in balances {
        per_key.insert((b.key.product_id, b.key.warehouse_id), b.quantity);
        *per_product.entry(b.key.product_id).or_insert(Decimal::ZERO) += b.quantity;
    }

    rules
        .iter()
        .filter_map(|rule| {
            let quantity = match rule.warehouse_id {
                Some(w) => per_key.get(&(rule.product_id, w)).copied(),
                None => per_product.get(&rule.product_id).copied(),
            }
            .unwrap_or(Decimal::ZERO);

            (quantity < rule.min_quantity).then(|| LowStockAlert {
                product_id: rule.product_id,
                warehouse_id: rule.warehouse_id,
                quantity,
                min_quantity: rule.min_quantity,
            })
        })
        .collect()
}
