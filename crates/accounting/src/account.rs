use serde::{Deserialize, Serialize};

use tallyerp_core::{AccountId, DomainError};

/// High-level account kind (determines normal balance side).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AccountKind {
    Asset,
    Liability,
    Equity,
    Revenue,
    Expense,
}

impl AccountKind {
    pub fn as_str(self) -> &'static str {
        match self {
            AccountKind::Asset => "asset",
            AccountKind::Liability => "liability",
            AccountKind::Equity => "equity",
            AccountKind::Revenue => "revenue",
            AccountKind::Expense => "expense",
        }
    }

    /// Debit-normal accounts grow on the debit side.
    pub fn is_debit_normal(self) -> bool {
        matches!(self, AccountKind::Asset | AccountKind::Expense)
    }
}

impl core::str::FromStr for AccountKind {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "asset" => Ok(AccountKind::Asset),
            "liability" => Ok(AccountKind::Liability),
            "equity" => Ok(AccountKind::Equity),
            "revenue" => Ok(AccountKind::Revenue),
            "expense" => Ok(AccountKind::Expense),
            other => Err(DomainError::validation(format!("unknown account kind '{other}'"))),
        }
    }
}

/// Chart-of-accounts entry. `code` is unique across the chart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct GlAccount {
    pub id: AccountId,
    pub code: String, // e.g. "1000"
    pub name: String, // e.g. "Cash"
    pub kind: AccountKind,
}
