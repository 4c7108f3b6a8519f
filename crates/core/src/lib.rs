//! `tallyerp-core`: shared building blocks for the ledger core.
//!
//! This crate contains **pure domain** primitives (no infrastructure concerns).

pub mod amount;
pub mod error;
pub mod id;
pub mod module;
pub mod version;

pub use amount::{LEDGER_SCALE, fits_ledger_scale, to_ledger_scale};
pub use error::{DomainError, DomainResult};
pub use id::{
    AccountId, DecisionId, FlowId, MovementId, ProductId, ReferenceId, RoleId, StepId, TemplateId,
    TransactionId, UserId, WarehouseId,
};
pub use module::BusinessModule;
pub use version::ExpectedVersion;
