use rust_decimal::Decimal;
use thiserror::Error;

use tallyerp_core::{BusinessModule, TransactionId};

use crate::formula::FormulaError;

/// Posting failures. Nothing is persisted when any of these is returned.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum PostingError {
    #[error("no GL template for module {module}{}", named(.name))]
    TemplateNotFound {
        module: BusinessModule,
        name: Option<String>,
    },

    #[error("GL account not found: {0}")]
    AccountNotFound(String),

    #[error("failed to evaluate formula '{formula}' for account {account_code}: {source}")]
    FormulaEvaluation {
        account_code: String,
        formula: String,
        #[source]
        source: FormulaError,
    },

    #[error("unbalanced journal: debit={total_debit} credit={total_credit}")]
    UnbalancedEntry {
        total_debit: Decimal,
        total_credit: Decimal,
    },

    #[error("journal entry has no non-zero lines")]
    EmptyEntry,

    #[error("GL transaction not found: {0}")]
    TransactionNotFound(TransactionId),

    #[error("validation failed: {0}")]
    Validation(String),
}

impl PostingError {
    pub fn validation(msg: impl Into<String>) -> Self {
        Self::Validation(msg.into())
    }
}

fn named(name: &Option<String>) -> String {
    name.as_deref()
        .map(|n| format!(" named '{n}'"))
        .unwrap_or_default()
}
