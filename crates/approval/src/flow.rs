use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tallyerp_auth::RoleRef;
use tallyerp_core::{BusinessModule, FlowId, StepId};

/// One role-gated amount bracket of a flow.
///
/// The bracket is half-open: `min_amount <= amount < max_amount`, and a
/// missing `max_amount` means no upper limit.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalStep {
    pub id: StepId,
    pub step_number: u32,
    pub role: RoleRef,
    pub min_amount: Decimal,
    pub max_amount: Option<Decimal>,
}

impl ApprovalStep {
    pub fn contains(&self, amount: Decimal) -> bool {
        amount >= self.min_amount && self.max_amount.is_none_or(|max| amount < max)
    }
}

/// Approval configuration for one business module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalFlow {
    pub id: FlowId,
    pub name: String,
    pub module: BusinessModule,
    pub is_active: bool,
    pub steps: Vec<ApprovalStep>,
}

impl ApprovalFlow {
    /// Lowest-numbered step whose bracket contains `amount`.
    ///
    /// Ties on `step_number` fall back to the step id, so the result depends
    /// only on the configuration, never on storage order.
    pub fn required_step(&self, amount: Decimal) -> Option<&ApprovalStep> {
        self.steps
            .iter()
            .filter(|s| s.contains(amount))
            .min_by_key(|s| (s.step_number, s.id))
    }
}

/// The active flow governing `module`.
///
/// Several active flows for one module are a configuration issue (reported by
/// validation); the one with the lowest name, then lowest id, is used.
pub fn select_active_flow<'a>(
    flows: impl IntoIterator<Item = &'a ApprovalFlow>,
    module: BusinessModule,
) -> Option<&'a ApprovalFlow> {
    flows
        .into_iter()
        .filter(|f| f.is_active && f.module == module)
        .min_by(|a, b| a.name.cmp(&b.name).then_with(|| a.id.cmp(&b.id)))
}
