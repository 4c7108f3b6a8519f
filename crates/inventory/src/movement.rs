use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tallyerp_core::{MovementId, ProductId, WarehouseId};

/// Kind of a recorded inventory movement.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum MovementKind {
    Receive,
    Issue,
    Transfer,
}

impl MovementKind {
    pub fn as_str(self) -> &'static str {
        match self {
            MovementKind::Receive => "receive",
            MovementKind::Issue => "issue",
            MovementKind::Transfer => "transfer",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "receive" => Some(MovementKind::Receive),
            "issue" => Some(MovementKind::Issue),
            "transfer" => Some(MovementKind::Transfer),
            _ => None,
        }
    }
}

/// One product line of a movement.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementLine {
    pub product_id: ProductId,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
}

impl MovementLine {
    pub fn new(product_id: ProductId, quantity: Decimal, unit_cost: Decimal) -> Self {
        Self {
            product_id,
            quantity,
            unit_cost,
        }
    }
}

/// Append-only audit record of a stock mutation (immutable once recorded).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryMovement {
    pub id: MovementId,
    pub kind: MovementKind,
    pub occurred_at: DateTime<Utc>,
    pub reference: String,
    pub warehouse_from: Option<WarehouseId>,
    pub warehouse_to: Option<WarehouseId>,
    pub lines: Vec<MovementLine>,
}

/// A single product's view of a movement (history reports).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MovementEntry {
    pub movement_id: MovementId,
    pub occurred_at: DateTime<Utc>,
    pub kind: MovementKind,
    pub product_id: ProductId,
    pub quantity: Decimal,
    pub unit_cost: Decimal,
    pub reference: String,
    pub warehouse_from: Option<WarehouseId>,
    pub warehouse_to: Option<WarehouseId>,
}

impl InventoryMovement {
    /// Entries for `product` (one per matching line).
    pub fn entries_for(&self, product: ProductId) -> impl Iterator<Item = MovementEntry> + '_ {
        self.lines
            .iter()
            .filter(move |l| l.product_id == product)
            .map(|l| MovementEntry {
                movement_id: self.id,
                occurred_at: self.occurred_at,
                kind: self.kind,
                product_id: l.product_id,
                quantity: l.quantity,
                unit_cost: l.unit_cost,
                reference: self.reference.clone(),
                warehouse_from: self.warehouse_from,
                warehouse_to: self.warehouse_to,
            })
    }

    /// History of `product` across `movements` since `since`, newest first.
    pub fn history<'a>(
        movements: impl IntoIterator<Item = &'a InventoryMovement>,
        product: ProductId,
        since: DateTime<Utc>,
    ) -> Vec<MovementEntry> {
        let mut entries: Vec<MovementEntry> = movements
            .into_iter()
            .filter(|m| m.occurred_at >= since)
            .flat_map(|m| m.entries_for(product))
            .collect();
        entries.sort_by(|a, b| {
            b.occurred_at
                .cmp(&a.occurred_at)
                .then_with(|| b.movement_id.cmp(&a.movement_id))
        });
        entries
    }
}
