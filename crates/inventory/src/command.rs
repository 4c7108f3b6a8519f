use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tallyerp_core::{
    ExpectedVersion, LEDGER_SCALE, MovementId, ProductId, WarehouseId, fits_ledger_scale,
};

use crate::balance::{StockBalance, StockKey, StockSnapshot};
use crate::error::InventoryError;
use crate::movement::{InventoryMovement, MovementKind, MovementLine};

/// Command: ReceiveStock (goods in).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReceiveStock {
    pub to: WarehouseId,
    pub lines: Vec<MovementLine>,
    pub reference: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: IssueStock (goods out).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IssueStock {
    pub from: WarehouseId,
    pub lines: Vec<MovementLine>,
    pub reference: String,
    pub occurred_at: DateTime<Utc>,
}

/// Command: TransferStock (issue from one warehouse, receive into another).
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferStock {
    pub from: WarehouseId,
    pub to: WarehouseId,
    pub lines: Vec<MovementLine>,
    pub reference: String,
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StockCommand {
    Receive(ReceiveStock),
    Issue(IssueStock),
    Transfer(TransferStock),
}

/// One balance row to write, guarded by the version it was read at.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BalanceWrite {
    pub balance: StockBalance,
    pub expected: ExpectedVersion,
}

/// Outcome of planning a command: everything the store must persist atomically.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StockPlan {
    pub movement: InventoryMovement,
    pub writes: Vec<BalanceWrite>,
}

impl StockCommand {
    pub fn kind(&self) -> MovementKind {
        match self {
            StockCommand::Receive(_) => MovementKind::Receive,
            StockCommand::Issue(_) => MovementKind::Issue,
            StockCommand::Transfer(_) => MovementKind::Transfer,
        }
    }

    pub fn lines(&self) -> &[MovementLine] {
        match self {
            StockCommand::Receive(c) => &c.lines,
            StockCommand::Issue(c) => &c.lines,
            StockCommand::Transfer(c) => &c.lines,
        }
    }

    pub fn reference(&self) -> &str {
        match self {
            StockCommand::Receive(c) => &c.reference,
            StockCommand::Issue(c) => &c.reference,
            StockCommand::Transfer(c) => &c.reference,
        }
    }

    pub fn occurred_at(&self) -> DateTime<Utc> {
        match self {
            StockCommand::Receive(c) => c.occurred_at,
            StockCommand::Issue(c) => c.occurred_at,
            StockCommand::Transfer(c) => c.occurred_at,
        }
    }

    /// Warehouse stock leaves from, if any.
    pub fn source(&self) -> Option<WarehouseId> {
        match self {
            StockCommand::Receive(_) => None,
            StockCommand::Issue(c) => Some(c.from),
            StockCommand::Transfer(c) => Some(c.from),
        }
    }

    /// Warehouse stock arrives at, if any.
    pub fn destination(&self) -> Option<WarehouseId> {
        match self {
            StockCommand::Receive(c) => Some(c.to),
            StockCommand::Issue(_) => None,
            StockCommand::Transfer(c) => Some(c.to),
        }
    }

    pub fn warehouses(&self) -> Vec<WarehouseId> {
        self.source().into_iter().chain(self.destination()).collect()
    }

    /// Balance rows this command reads and writes, sorted and deduplicated.
    pub fn touched_keys(&self) -> Vec<StockKey> {
        let mut keys: Vec<StockKey> = self
            .warehouses()
            .into_iter()
            .flat_map(|w| self.lines().iter().map(move |l| StockKey::new(l.product_id, w)))
            .collect();
        keys.sort();
        keys.dedup();
        keys
    }

    pub fn validate(&self) -> Result<(), InventoryError> {
        if self.lines().is_empty() {
            return Err(InventoryError::validation("movement must have lines"));
        }

        for line in self.lines() {
            if line.quantity <= Decimal::ZERO {
                return Err(InventoryError::validation(format!(
                    "quantity for product {} must be positive",
                    line.product_id
                )));
            }
            if line.unit_cost < Decimal::ZERO {
                return Err(InventoryError::validation(format!(
                    "unit cost for product {} cannot be negative",
                    line.product_id
                )));
            }
            if !fits_ledger_scale(line.quantity) || !fits_ledger_scale(line.unit_cost) {
                return Err(InventoryError::validation(format!(
                    "quantity and unit cost for product {} allow at most {LEDGER_SCALE} decimal places",
                    line.product_id
                )));
            }
        }

        if let StockCommand::Transfer(c) = self {
            if c.from == c.to {
                return Err(InventoryError::validation(
                    "transfer source and destination must differ",
                ));
            }
        }

        Ok(())
    }

    /// Decide the movement and balance writes for this command.
    ///
    /// Pure: `snapshot` must hold every row in [`Self::touched_keys`] that
    /// exists. Lines for the same product are summed before the availability
    /// check, so an issue either fits entirely or fails without any write.
    pub fn plan(
        &self,
        movement_id: MovementId,
        snapshot: &StockSnapshot,
    ) -> Result<StockPlan, InventoryError> {
        self.validate()?;

        let mut deltas: BTreeMap<StockKey, Decimal> = BTreeMap::new();

        if let Some(from) = self.source() {
            let requested = requested_per_product(self.lines())?;

            // Report the first offending line in request order.
            for line in self.lines() {
                let key = StockKey::new(line.product_id, from);
                let wanted = requested[&line.product_id];
                let available = snapshot.quantity(&key);
                if available < wanted {
                    return Err(InventoryError::InsufficientStock {
                        product: line.product_id,
                        warehouse: from,
                        requested: wanted,
                        available,
                    });
                }
            }

            for (product, quantity) in requested {
                add_delta(&mut deltas, StockKey::new(product, from), -quantity)?;
            }
        }

        if let Some(to) = self.destination() {
            for line in self.lines() {
                add_delta(&mut deltas, StockKey::new(line.product_id, to), line.quantity)?;
            }
        }

        let occurred_at = self.occurred_at();
        let mut writes = Vec::with_capacity(deltas.len());
        for (key, delta) in deltas {
            let current = snapshot.get(&key);
            let on_hand = current.map(|b| b.quantity).unwrap_or(Decimal::ZERO);
            let quantity = on_hand
                .checked_add(delta)
                .ok_or_else(|| InventoryError::validation(format!("quantity overflow for {key}")))?;

            if quantity < Decimal::ZERO {
                return Err(InventoryError::InsufficientStock {
                    product: key.product_id,
                    warehouse: key.warehouse_id,
                    requested: -delta,
                    available: on_hand,
                });
            }

            let version = current.map(|b| b.version);
            writes.push(BalanceWrite {
                balance: StockBalance {
                    key,
                    quantity,
                    updated_at: occurred_at,
                    version: version.unwrap_or(0) + 1,
                },
                expected: ExpectedVersion::from_current(version),
            });
        }

        Ok(StockPlan {
            movement: InventoryMovement {
                id: movement_id,
                kind: self.kind(),
                occurred_at,
                reference: self.reference().to_string(),
                warehouse_from: self.source(),
                warehouse_to: self.destination(),
                lines: self.lines().to_vec(),
            },
            writes,
        })
    }
}

fn requested_per_product(
    lines: &[MovementLine],
) -> Result<BTreeMap<ProductId, Decimal>, InventoryError> {
    let mut requested: BTreeMap<ProductId, Decimal> = BTreeMap::new();
    for line in lines {
        let total = requested.entry(line.product_id).or_insert(Decimal::ZERO);
        *total = total.checked_add(line.quantity).ok_or_else(|| {
            InventoryError::validation(format!("quantity overflow for product {}", line.product_id))
        })?;
    }
    Ok(requested)
}

fn add_delta(
    deltas: &mut BTreeMap<StockKey, Decimal>,
    key: StockKey,
    delta: Decimal,
) -> Result<(), InventoryError> {
    let entry = deltas.entry(key).or_insert(Decimal::ZERO);
    *entry = entry
        .checked_add(delta)
        .ok_or_else(|| InventoryError::validation(format!("quantity overflow for {key}")))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;
    use rust_decimal_macros::dec;

    fn test_time() -> DateTime<Utc> {
        Utc::now()
    }

    fn balance(product: ProductId, warehouse: WarehouseId, quantity: Decimal) -> StockBalance {
        StockBalance {
            key: StockKey::new(product, warehouse),
            quantity,
            updated_at: test_time(),
            version: 3,
        }
    }

    fn line(product: ProductId, quantity: Decimal) -> MovementLine {
        MovementLine::new(product, quantity, dec!(2.50))
    }

    fn issue(from: WarehouseId, lines: Vec<MovementLine>) -> StockCommand {
        StockCommand::Issue(IssueStock {
            from,
            lines,
            reference: "SO-1".to_string(),
            occurred_at: test_time(),
        })
    }

    fn receive(to: WarehouseId, lines: Vec<MovementLine>) -> StockCommand {
        StockCommand::Receive(ReceiveStock {
            to,
            lines,
            reference: "GR-1".to_string(),
            occurred_at: test_time(),
        })
    }

    #[test]
    fn receive_creates_missing_row_expecting_absence() {
        let product = ProductId::new();
        let warehouse = WarehouseId::new();
        let plan = receive(warehouse, vec![line(product, dec!(4))])
            .plan(MovementId::new(), &StockSnapshot::new())
            .unwrap();

        assert_eq!(plan.writes.len(), 1);
        let write = &plan.writes[0];
        assert_eq!(write.expected, ExpectedVersion(0));
        assert_eq!(write.balance.quantity, dec!(4));
        assert_eq!(write.balance.version, 1);
        assert_eq!(plan.movement.kind, MovementKind::Receive);
        assert_eq!(plan.movement.warehouse_to, Some(warehouse));
    }

    #[test]
    fn issue_beyond_balance_reports_requested_and_available() {
        let product = ProductId::new();
        let warehouse = WarehouseId::new();
        let snapshot: StockSnapshot = [balance(product, warehouse, dec!(5))].into_iter().collect();

        let err = issue(warehouse, vec![line(product, dec!(7))])
            .plan(MovementId::new(), &snapshot)
            .unwrap_err();

        assert_eq!(
            err,
            InventoryError::InsufficientStock {
                product,
                warehouse,
                requested: dec!(7),
                available: dec!(5),
            }
        );
    }

    #[test]
    fn repeated_product_lines_are_checked_together() {
        let product = ProductId::new();
        let warehouse = WarehouseId::new();
        let snapshot: StockSnapshot = [balance(product, warehouse, dec!(5))].into_iter().collect();

        let err = issue(warehouse, vec![line(product, dec!(3)), line(product, dec!(3))])
            .plan(MovementId::new(), &snapshot)
            .unwrap_err();

        match err {
            InventoryError::InsufficientStock { requested, available, .. } => {
                assert_eq!(requested, dec!(6));
                assert_eq!(available, dec!(5));
            }
            other => panic!("unexpected error: {other:?}"),
        }
    }

    #[test]
    fn issue_from_missing_row_is_insufficient() {
        let product = ProductId::new();
        let warehouse = WarehouseId::new();
        let err = issue(warehouse, vec![line(product, dec!(1))])
            .plan(MovementId::new(), &StockSnapshot::new())
            .unwrap_err();
        assert!(matches!(err, InventoryError::InsufficientStock { available, .. } if available == Decimal::ZERO));
    }

    #[test]
    fn transfer_fails_as_a_whole_when_any_line_is_short() {
        let a = ProductId::new();
        let b = ProductId::new();
        let from = WarehouseId::new();
        let to = WarehouseId::new();
        let snapshot: StockSnapshot = [balance(a, from, dec!(10)), balance(b, from, dec!(1))]
            .into_iter()
            .collect();

        let cmd = StockCommand::Transfer(TransferStock {
            from,
            to,
            lines: vec![line(a, dec!(4)), line(b, dec!(2))],
            reference: "TR-1".to_string(),
            occurred_at: test_time(),
        });

        let err = cmd.plan(MovementId::new(), &snapshot).unwrap_err();
        assert!(matches!(err, InventoryError::InsufficientStock { product, .. } if product == b));
    }

    #[test]
    fn transfer_moves_quantity_between_warehouses() {
        let product = ProductId::new();
        let from = WarehouseId::new();
        let to = WarehouseId::new();
        let snapshot: StockSnapshot = [balance(product, from, dec!(10))].into_iter().collect();

        let cmd = StockCommand::Transfer(TransferStock {
            from,
            to,
            lines: vec![line(product, dec!(4))],
            reference: "TR-2".to_string(),
            occurred_at: test_time(),
        });
        let plan = cmd.plan(MovementId::new(), &snapshot).unwrap();

        let source = plan.writes.iter().find(|w| w.balance.key.warehouse_id == from).unwrap();
        let dest = plan.writes.iter().find(|w| w.balance.key.warehouse_id == to).unwrap();
        assert_eq!(source.balance.quantity, dec!(6));
        assert_eq!(source.expected, ExpectedVersion(3));
        assert_eq!(source.balance.version, 4);
        assert_eq!(dest.balance.quantity, dec!(4));
        assert_eq!(dest.expected, ExpectedVersion(0));
    }

    #[test]
    fn transfer_to_same_warehouse_is_rejected() {
        let warehouse = WarehouseId::new();
        let cmd = StockCommand::Transfer(TransferStock {
            from: warehouse,
            to: warehouse,
            lines: vec![line(ProductId::new(), dec!(1))],
            reference: String::new(),
            occurred_at: test_time(),
        });
        assert!(matches!(cmd.validate(), Err(InventoryError::Validation(_))));
    }

    #[test]
    fn non_positive_quantities_and_empty_lines_are_rejected() {
        let warehouse = WarehouseId::new();
        assert!(receive(warehouse, vec![]).validate().is_err());
        assert!(receive(warehouse, vec![line(ProductId::new(), dec!(0))]).validate().is_err());
        assert!(receive(warehouse, vec![line(ProductId::new(), dec!(-1))]).validate().is_err());

        let negative_cost = MovementLine::new(ProductId::new(), dec!(1), dec!(-0.01));
        assert!(receive(warehouse, vec![negative_cost]).validate().is_err());
    }

    #[test]
    fn values_finer_than_the_ledger_scale_are_rejected() {
        let warehouse = WarehouseId::new();
        let tiny = line(ProductId::new(), dec!(0.000000001));
        assert!(matches!(
            receive(warehouse, vec![tiny]).validate(),
            Err(InventoryError::Validation(_))
        ));

        let fine_cost = MovementLine::new(ProductId::new(), dec!(1), dec!(0.123456789));
        assert!(receive(warehouse, vec![fine_cost]).validate().is_err());

        let smallest = line(ProductId::new(), dec!(0.00000001));
        assert!(receive(warehouse, vec![smallest]).validate().is_ok());
    }

    #[test]
    fn touched_keys_are_sorted_and_unique() {
        let product = ProductId::new();
        let from = WarehouseId::new();
        let to = WarehouseId::new();
        let cmd = StockCommand::Transfer(TransferStock {
            from,
            to,
            lines: vec![line(product, dec!(1)), line(product, dec!(2))],
            reference: String::new(),
            occurred_at: test_time(),
        });
        let keys = cmd.touched_keys();
        assert_eq!(keys.len(), 2);
        assert!(keys.windows(2).all(|w| w[0] < w[1]));
    }

    proptest! {
        #![proptest_config(ProptestConfig {
            cases: 256,
            ..ProptestConfig::default()
        })]

        /// Property: receiving `qty` raises the balance by exactly `qty`.
        #[test]
        fn receive_increases_balance_by_quantity(
            start in 0i64..1_000_000i64,
            qty in 1i64..1_000_000i64,
        ) {
            let product = ProductId::new();
            let warehouse = WarehouseId::new();
            let snapshot: StockSnapshot =
                [balance(product, warehouse, Decimal::from(start))].into_iter().collect();

            let plan = receive(warehouse, vec![line(product, Decimal::from(qty))])
                .plan(MovementId::new(), &snapshot)
                .unwrap();

            prop_assert_eq!(plan.writes.len(), 1);
            prop_assert_eq!(plan.writes[0].balance.quantity, Decimal::from(start + qty));
        }

        /// Property: an issue either lowers the balance by `qty` or fails and writes nothing.
        #[test]
        fn issue_never_drives_balance_negative(
            start in 0i64..1_000i64,
            qty in 1i64..2_000i64,
        ) {
            let product = ProductId::new();
            let warehouse = WarehouseId::new();
            let snapshot: StockSnapshot =
                [balance(product, warehouse, Decimal::from(start))].into_iter().collect();

            let result = issue(warehouse, vec![line(product, Decimal::from(qty))])
                .plan(MovementId::new(), &snapshot);

            if qty <= start {
                let plan = result.unwrap();
                prop_assert_eq!(plan.writes[0].balance.quantity, Decimal::from(start - qty));
            } else {
                let is_insufficient = matches!(result, Err(InventoryError::InsufficientStock { .. }));
                prop_assert!(is_insufficient);
            }
        }
    }
}
