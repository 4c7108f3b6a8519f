use rust_decimal::Decimal;
use thiserror::Error;

use tallyerp_core::{BusinessModule, UserId};

/// Approval business-rule failures (never retryable).
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ApprovalError {
    #[error("no active approval flow for module {module}")]
    FlowNotFound { module: BusinessModule },

    #[error("approval flow for module {module} has no step covering amount {amount}")]
    NoMatchingStep { module: BusinessModule, amount: Decimal },

    #[error("user {user} may not approve {module} step {step_number} (requires role {role})")]
    PermissionDenied {
        user: UserId,
        module: BusinessModule,
        step_number: u32,
        role: String,
    },

    #[error("approval required for {module} step {step_number} but no approver was supplied")]
    ApproverRequired {
        module: BusinessModule,
        step_number: u32,
    },

    #[error("validation failed: {0}")]
    Validation(String),
}
