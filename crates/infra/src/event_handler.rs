//! Business event handling: approval gate, stock effect and journal posting
//! applied as one unit of work.
//!
//! ```text
//! BusinessEvent
//!   ↓
//! 1. Evaluate approval (AwaitingApproval / PermissionDenied stop here)
//!   ↓
//! 2. Begin unit of work
//!   ↓
//! 3. Record the Approved decision, if a step applied
//!   ↓
//! 4. Apply the stock effect
//!   ↓
//! 5. Post the journal
//!   ↓
//! 6. Commit (any earlier failure drops the unit of work)
//! ```

use std::sync::Arc;

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use tracing::instrument;

use tallyerp_accounting::{PostJournal, Variables};
use tallyerp_approval::{
    ApprovalError, ApprovalRequirement, ApprovalStep, Decision, RecordDecision,
    UnmatchedAmountPolicy,
};
use tallyerp_core::{BusinessModule, DecisionId, MovementId, ReferenceId, UserId};
use tallyerp_inventory::StockCommand;

use crate::approval_engine::ApprovalEngine;
use crate::config::LedgerConfig;
use crate::error::LedgerResult;
use crate::posting_engine::{LedgerPostingEngine, PostedTransaction};
use crate::reference::ReferenceCatalog;
use crate::stock_ledger::StockLedger;
use crate::store::{LedgerStore, UnitOfWork};

/// Journal part of a business event.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PostingRequest {
    pub variables: Variables,
    #[serde(default)]
    pub template_name: Option<String>,
    #[serde(default)]
    pub description: Option<String>,
}

/// Something that happened in a business module and must be reflected in the ledgers.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BusinessEvent {
    pub module: BusinessModule,
    pub reference_id: ReferenceId,
    /// Amount the approval flow is evaluated against.
    pub amount: Decimal,
    #[serde(default)]
    pub approver: Option<UserId>,
    #[serde(default)]
    pub comment: Option<String>,
    #[serde(default)]
    pub stock: Option<StockCommand>,
    #[serde(default)]
    pub posting: Option<PostingRequest>,
    #[serde(default = "Utc::now")]
    pub occurred_at: DateTime<Utc>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum EventOutcome {
    Completed {
        decision: Option<DecisionId>,
        movement: Option<MovementId>,
        transaction: Option<PostedTransaction>,
    },
    /// Sign-off is needed and no approver was supplied; nothing was written.
    AwaitingApproval { step: ApprovalStep },
}

pub struct BusinessEventHandler<S> {
    store: Arc<S>,
    stock: StockLedger<S>,
    approvals: ApprovalEngine<S>,
    posting: LedgerPostingEngine<S>,
    unmatched: UnmatchedAmountPolicy,
}

impl<S: LedgerStore> BusinessEventHandler<S> {
    pub fn new(
        store: Arc<S>,
        stock: StockLedger<S>,
        approvals: ApprovalEngine<S>,
        posting: LedgerPostingEngine<S>,
        unmatched: UnmatchedAmountPolicy,
    ) -> Self {
        Self {
            store,
            stock,
            approvals,
            posting,
            unmatched,
        }
    }

    /// Wire all three engines to one store and one reference catalog.
    pub fn from_catalog(store: Arc<S>, catalog: Arc<ReferenceCatalog>, config: &LedgerConfig) -> Self {
        Self::new(
            Arc::clone(&store),
            StockLedger::new(Arc::clone(&store), catalog.clone()),
            ApprovalEngine::new(Arc::clone(&store), catalog.clone(), catalog.clone()),
            LedgerPostingEngine::new(
                Arc::clone(&store),
                catalog.clone(),
                catalog,
                config.gl_number_prefix.clone(),
            ),
            config.unmatched_approval,
        )
    }

    pub fn stock(&self) -> &StockLedger<S> {
        &self.stock
    }

    pub fn approvals(&self) -> &ApprovalEngine<S> {
        &self.approvals
    }

    pub fn posting(&self) -> &LedgerPostingEngine<S> {
        &self.posting
    }

    #[instrument(skip(self, event), fields(module = %event.module, reference_id = %event.reference_id), err)]
    pub fn handle(&self, event: BusinessEvent) -> LedgerResult<EventOutcome> {
        if event.amount < Decimal::ZERO {
            return Err(ApprovalError::Validation("event amount cannot be negative".to_string()).into());
        }

        let approval = match self.approvals.evaluate(event.module, event.amount)? {
            ApprovalRequirement::NotRequired => None,
            ApprovalRequirement::Unmatched { .. } => match self.unmatched {
                UnmatchedAmountPolicy::AutoApprove => {
                    tracing::debug!(amount = %event.amount, "no bracket covers amount; auto-approving");
                    None
                }
                UnmatchedAmountPolicy::Reject => {
                    tracing::warn!(amount = %event.amount, "no bracket covers amount");
                    return Err(ApprovalError::NoMatchingStep {
                        module: event.module,
                        amount: event.amount,
                    }
                    .into());
                }
            },
            ApprovalRequirement::Required { flow_id, step } => {
                let Some(approver) = event.approver else {
                    tracing::info!(step_number = step.step_number, role = %step.role, "event awaiting approval");
                    return Ok(EventOutcome::AwaitingApproval { step });
                };
                self.approvals.authorize(approver, event.module, &step)?;
                Some(RecordDecision {
                    flow_id,
                    reference_id: event.reference_id,
                    module: event.module,
                    step_id: Some(step.id),
                    approver_id: approver,
                    decision: Decision::Approved,
                    comment: event.comment.clone(),
                    amount: event.amount,
                    occurred_at: event.occurred_at,
                })
            }
        };

        let mut tx = self.store.begin()?;

        let decision = match approval {
            Some(cmd) => Some(self.approvals.record_decision_in(&mut tx, cmd)?.id),
            None => None,
        };

        let movement = match &event.stock {
            Some(cmd) => Some(self.stock.execute_in(&mut tx, cmd)?),
            None => None,
        };

        let transaction = match event.posting {
            Some(posting) => Some(self.posting.post_in(
                &mut tx,
                PostJournal {
                    module: event.module,
                    reference_id: Some(event.reference_id),
                    variables: posting.variables,
                    template_name: posting.template_name,
                    description: posting.description,
                },
            )?),
            None => None,
        };

        tx.commit()?;

        tracing::info!(
            decision = decision.is_some(),
            movement = ?movement,
            number = transaction.as_ref().map(|t| t.number.as_str()),
            "business event committed"
        );
        Ok(EventOutcome::Completed {
            decision,
            movement,
            transaction,
        })
    }
}
