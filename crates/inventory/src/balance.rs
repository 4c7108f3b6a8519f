use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tallyerp_core::{ProductId, WarehouseId};

/// Unique key of a balance row.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct StockKey {
    pub product_id: ProductId,
    pub warehouse_id: WarehouseId,
}

impl StockKey {
    pub fn new(product_id: ProductId, warehouse_id: WarehouseId) -> Self {
        Self {
            product_id,
            warehouse_id,
        }
    }
}

impl core::fmt::Display for StockKey {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        write!(f, "{}@{}", self.product_id, self.warehouse_id)
    }
}

/// Current on-hand quantity of a product at a warehouse.
///
/// This is cached state derived from the movement log. Rows are created on the
/// first increase and never deleted; `quantity` is never negative.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StockBalance {
    pub key: StockKey,
    pub quantity: Decimal,
    pub updated_at: DateTime<Utc>,
    /// Optimistic-concurrency counter; 1 after the first write.
    pub version: u64,
}

/// Balance rows read inside one unit of work, keyed by [`StockKey`].
///
/// A key that was read but has no row is simply absent.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct StockSnapshot {
    rows: BTreeMap<StockKey, StockBalance>,
}

impl StockSnapshot {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, balance: StockBalance) {
        self.rows.insert(balance.key, balance);
    }

    pub fn get(&self, key: &StockKey) -> Option<&StockBalance> {
        self.rows.get(key)
    }

    /// Quantity on hand (zero when no row exists).
    pub fn quantity(&self, key: &StockKey) -> Decimal {
        self.rows.get(key).map(|b| b.quantity).unwrap_or(Decimal::ZERO)
    }

    pub fn version(&self, key: &StockKey) -> Option<u64> {
        self.rows.get(key).map(|b| b.version)
    }
}

impl FromIterator<StockBalance> for StockSnapshot {
    fn from_iter<T: IntoIterator<Item = StockBalance>>(iter: T) -> Self {
        let mut snapshot = StockSnapshot::new();
        for balance in iter {
            snapshot.insert(balance);
        }
        snapshot
    }
}
