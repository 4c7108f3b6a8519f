//! Business modules: the originating subsystem of a ledger event.
//!
//! Module keys arrive as strings at the boundary (`"POSSale"`,
//! `"Purchasing.PR"`, ...) and are parsed into [`BusinessModule`] immediately;
//! nothing inside the core dispatches on raw strings.

use core::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::DomainError;

/// Closed set of business modules known to the ledger core.
#[derive(Debug, Copy, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum BusinessModule {
    /// Point-of-sale checkout.
    PosSale,
    /// Point-of-sale customer return.
    PosReturn,
    /// Sales invoice issued to a customer.
    Invoice,
    /// Purchase request awaiting sign-off.
    PurchaseRequest,
    /// Purchase order placed with a supplier.
    PurchaseOrder,
    /// Goods received against a purchase order.
    PurchaseGoodsReceipt,
    /// Stock moved between warehouses.
    InventoryTransfer,
    /// Manual stock adjustment (count corrections, write-offs).
    InventoryAdjustment,
}

impl BusinessModule {
    pub const ALL: [BusinessModule; 8] = [
        BusinessModule::PosSale,
        BusinessModule::PosReturn,
        BusinessModule::Invoice,
        BusinessModule::PurchaseRequest,
        BusinessModule::PurchaseOrder,
        BusinessModule::PurchaseGoodsReceipt,
        BusinessModule::InventoryTransfer,
        BusinessModule::InventoryAdjustment,
    ];

    /// Stable external key (as stored in flow/template configuration).
    pub fn key(self) -> &'static str {
        match self {
            BusinessModule::PosSale => "POSSale",
            BusinessModule::PosReturn => "POSReturn",
            BusinessModule::Invoice => "Invoice",
            BusinessModule::PurchaseRequest => "Purchasing.PR",
            BusinessModule::PurchaseOrder => "Purchasing.PO",
            BusinessModule::PurchaseGoodsReceipt => "PurchaseGR",
            BusinessModule::InventoryTransfer => "Inventory.Transfer",
            BusinessModule::InventoryAdjustment => "Inventory.Adjustment",
        }
    }
}

impl core::fmt::Display for BusinessModule {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        f.write_str(self.key())
    }
}

impl FromStr for BusinessModule {
    type Err = DomainError;

    /// Keys are matched case-insensitively after trimming.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let wanted = s.trim();
        BusinessModule::ALL
            .into_iter()
            .find(|m| m.key().eq_ignore_ascii_case(wanted))
            .ok_or_else(|| DomainError::UnknownModule(s.to_string()))
    }
}

impl TryFrom<String> for BusinessModule {
    type Error = DomainError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<BusinessModule> for String {
    fn from(value: BusinessModule) -> Self {
        value.key().to_string()
    }
}
