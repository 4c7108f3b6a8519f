use core::str::FromStr;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};

use tallyerp_core::{
    BusinessModule, DecisionId, DomainError, FlowId, LEDGER_SCALE, ReferenceId, StepId, UserId,
    fits_ledger_scale,
};

use crate::error::ApprovalError;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Decision {
    Approved,
    Rejected,
}

impl Decision {
    pub fn as_str(self) -> &'static str {
        match self {
            Decision::Approved => "approved",
            Decision::Rejected => "rejected",
        }
    }
}

impl FromStr for Decision {
    type Err = DomainError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "approved" => Ok(Decision::Approved),
            "rejected" => Ok(Decision::Rejected),
            other => Err(DomainError::validation(format!(
                "decision must be 'approved' or 'rejected', got '{other}'"
            ))),
        }
    }
}

/// Command: RecordDecision.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RecordDecision {
    pub flow_id: FlowId,
    pub reference_id: ReferenceId,
    pub module: BusinessModule,
    pub step_id: Option<StepId>,
    pub approver_id: UserId,
    pub decision: Decision,
    pub comment: Option<String>,
    pub amount: Decimal,
    pub occurred_at: DateTime<Utc>,
}

/// Append-only history row for a sign-off.
///
/// Recording a decision never changes the referenced business entity; moving
/// it to approved/rejected is the caller's job.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApprovalDecision {
    pub id: DecisionId,
    pub flow_id: FlowId,
    pub reference_id: ReferenceId,
    pub module: BusinessModule,
    pub step_id: Option<StepId>,
    pub approver_id: UserId,
    pub decision: Decision,
    pub comment: Option<String>,
    pub amount: Decimal,
    pub recorded_at: DateTime<Utc>,
}

impl RecordDecision {
    pub fn into_record(self, id: DecisionId) -> Result<ApprovalDecision, ApprovalError> {
        if self.amount < Decimal::ZERO {
            return Err(ApprovalError::Validation("amount cannot be negative".to_string()));
        }
        if !fits_ledger_scale(self.amount) {
            return Err(ApprovalError::Validation(format!(
                "amount allows at most {LEDGER_SCALE} decimal places"
            )));
        }

        let comment = self
            .comment
            .map(|c| c.trim().to_string())
            .filter(|c| !c.is_empty());

        Ok(ApprovalDecision {
            id,
            flow_id: self.flow_id,
            reference_id: self.reference_id,
            module: self.module,
            step_id: self.step_id,
            approver_id: self.approver_id,
            decision: self.decision,
            comment,
            amount: self.amount,
            recorded_at: self.occurred_at,
        })
    }
}
