use core::str::FromStr;

use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tallyerp_core::{BusinessModule, DomainError, FlowId};

use crate::flow::{ApprovalFlow, ApprovalStep, select_active_flow};

/// What an amount needs before the event may proceed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ApprovalRequirement {
    /// No active flow governs the module.
    NotRequired,
    /// Sign-off by the step's role is required.
    Required { flow_id: FlowId, step: ApprovalStep },
    /// A flow exists but none of its brackets covers the amount.
    Unmatched { flow_id: FlowId },
}

impl ApprovalRequirement {
    pub fn step(&self) -> Option<&ApprovalStep> {
        match self {
            ApprovalRequirement::Required { step, .. } => Some(step),
            _ => None,
        }
    }
}

/// Evaluate the requirement for `(module, amount)` against the configured flows.
pub fn evaluate<'a>(
    flows: impl IntoIterator<Item = &'a ApprovalFlow>,
    module: BusinessModule,
    amount: Decimal,
) -> ApprovalRequirement {
    let Some(flow) = select_active_flow(flows, module) else {
        return ApprovalRequirement::NotRequired;
    };

    match flow.required_step(amount) {
        Some(step) => ApprovalRequirement::Required {
            flow_id: flow.id,
            step: step.clone(),
        },
        None => ApprovalRequirement::Unmatched { flow_id: flow.id },
    }
}

/// How an amount outside every configured bracket is treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnmatchedAmountPolicy {
    /// Treat as a configuration error and refuse the event.
    #[default]
    Reject,
    /// Let the event through without sign-off.
    AutoApprove,
}

impl FromStr for UnmatchedAmountPolicy {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "reject" => Ok(UnmatchedAmountPolicy::Reject),
            "auto_approve" | "auto-approve" => Ok(UnmatchedAmountPolicy::AutoApprove),
            other => Err(DomainError::validation(format!(
                "unmatched approval policy must be 'reject' or 'auto_approve', got '{other}'"
            ))),
        }
    }
}
