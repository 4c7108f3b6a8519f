//! Approval engine: routes `(module, amount)` to a step and keeps the
//! decision history.
//!
//! Flows and role membership are read-only configuration. Decisions are
//! appended and never change the business entity they refer to.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use tallyerp_approval::{
    ApprovalDecision, ApprovalError, ApprovalRequirement, ApprovalStep, Decision, FlowIssue,
    RecordDecision, select_active_flow, validate_flows,
};
use tallyerp_auth::RoleDirectory;
use tallyerp_core::{BusinessModule, DecisionId, ReferenceId, StepId, UserId};

use crate::error::LedgerResult;
use crate::reference::FlowRepository;
use crate::store::{LedgerStore, UnitOfWork};

/// A decision submitted by an approver; flow and step are resolved by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SubmitDecision {
    pub reference_id: ReferenceId,
    pub module: BusinessModule,
    #[serde(default)]
    pub step_id: Option<StepId>,
    pub approver_id: UserId,
    pub decision: Decision,
    #[serde(default)]
    pub comment: Option<String>,
    pub amount: Decimal,
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
}

pub struct ApprovalEngine<S> {
    store: Arc<S>,
    flows: Arc<dyn FlowRepository>,
    roles: Arc<dyn RoleDirectory>,
}

impl<S> Clone for ApprovalEngine<S> {
    fn clone(&self) -> Self {
        Self {
            store: Arc::clone(&self.store),
            flows: Arc::clone(&self.flows),
            roles: Arc::clone(&self.roles),
        }
    }
}

impl<S: LedgerStore> ApprovalEngine<S> {
    pub fn new(store: Arc<S>, flows: Arc<dyn FlowRepository>, roles: Arc<dyn RoleDirectory>) -> Self {
        Self { store, flows, roles }
    }

    /// The step that must sign off `amount`, if any flow and bracket match.
    pub fn required_step(
        &self,
        module: BusinessModule,
        amount: Decimal,
    ) -> LedgerResult<Option<ApprovalStep>> {
        Ok(self.evaluate(module, amount)?.step().cloned())
    }

    pub fn evaluate(
        &self,
        module: BusinessModule,
        amount: Decimal,
    ) -> LedgerResult<ApprovalRequirement> {
        let flows = self.flows.flows_for(module)?;
        let requirement = tallyerp_approval::evaluate(&flows, module, amount);
        tracing::debug!(%module, %amount, ?requirement, "approval evaluated");
        Ok(requirement)
    }

    /// Whether `user` holds the role of the step covering `amount`.
    ///
    /// Asking when no step applies is an error, not `false`.
    pub fn can_approve(
        &self,
        user: UserId,
        module: BusinessModule,
        amount: Decimal,
    ) -> LedgerResult<bool> {
        let step = match self.evaluate(module, amount)? {
            ApprovalRequirement::Required { step, .. } => step,
            ApprovalRequirement::NotRequired => {
                return Err(ApprovalError::FlowNotFound { module }.into());
            }
            ApprovalRequirement::Unmatched { .. } => {
                return Err(ApprovalError::NoMatchingStep { module, amount }.into());
            }
        };
        Ok(self.roles.holds(user, &step.role)?)
    }

    /// Fail with `PermissionDenied` unless `user` holds `step`'s role.
    pub fn authorize(
        &self,
        user: UserId,
        module: BusinessModule,
        step: &ApprovalStep,
    ) -> LedgerResult<()> {
        if self.roles.holds(user, &step.role)? {
            return Ok(());
        }

        tracing::warn!(%user, %module, step_number = step.step_number, role = %step.role, "approval denied");
        Err(ApprovalError::PermissionDenied {
            user,
            module,
            step_number: step.step_number,
            role: step.role.to_string(),
        }
        .into())
    }

    /// Append a decision in a unit of work of its own.
    pub fn record_decision(&self, cmd: RecordDecision) -> LedgerResult<DecisionId> {
        let mut tx = self.store.begin()?;
        let decision = self.record_decision_in(&mut tx, cmd)?;
        tx.commit()?;

        tracing::info!(
            decision_id = %decision.id,
            reference_id = %decision.reference_id,
            module = %decision.module,
            decision = decision.decision.as_str(),
            "approval decision recorded"
        );
        Ok(decision.id)
    }

    #[instrument(skip(self, tx, cmd), fields(module = %cmd.module, reference_id = %cmd.reference_id), err)]
    pub fn record_decision_in<U: UnitOfWork>(
        &self,
        tx: &mut U,
        cmd: RecordDecision,
    ) -> LedgerResult<ApprovalDecision> {
        let decision = cmd.into_record(DecisionId::new())?;
        tx.append_decision(&decision)?;
        Ok(decision)
    }

    /// Resolve the flow and the step covering `amount`, check the approver's
    /// role, then record.
    ///
    /// A caller-supplied `step_id` must name that same step; the decision is
    /// always recorded against the step whose role was checked.
    pub fn submit_decision(&self, cmd: SubmitDecision) -> LedgerResult<DecisionId> {
        let flows = self.flows.flows_for(cmd.module)?;
        let Some(flow) = select_active_flow(&flows, cmd.module) else {
            return Err(ApprovalError::FlowNotFound { module: cmd.module }.into());
        };
        let Some(step) = flow.required_step(cmd.amount) else {
            return Err(ApprovalError::NoMatchingStep {
                module: cmd.module,
                amount: cmd.amount,
            }
            .into());
        };

        if let Some(requested) = cmd.step_id {
            if requested != step.id {
                tracing::warn!(
                    module = %cmd.module,
                    amount = %cmd.amount,
                    %requested,
                    required = %step.id,
                    "decision submitted for the wrong step"
                );
                return Err(ApprovalError::Validation(format!(
                    "step {requested} does not cover amount {}; step {} (#{}) does",
                    cmd.amount, step.id, step.step_number
                ))
                .into());
            }
        }

        self.authorize(cmd.approver_id, cmd.module, step)?;

        self.record_decision(RecordDecision {
            flow_id: flow.id,
            reference_id: cmd.reference_id,
            module: cmd.module,
            step_id: Some(step.id),
            approver_id: cmd.approver_id,
            decision: cmd.decision,
            comment: cmd.comment,
            amount: cmd.amount,
            occurred_at: cmd.occurred_at,
        })
    }

    /// Decisions for one business entity, in recording order.
    pub fn history(&self, reference: ReferenceId) -> LedgerResult<Vec<ApprovalDecision>> {
        Ok(self.store.decisions(reference)?)
    }

    pub fn validate_flows(&self) -> LedgerResult<Vec<FlowIssue>> {
        let flows = self.flows.all_flows()?;
        Ok(validate_flows(&flows))
    }
}
