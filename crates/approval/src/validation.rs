//! Configuration validation for approval flows.
//!
//! Evaluation tolerates imperfect configuration (overlaps resolve to the
//! lowest step number; uncovered amounts are `Unmatched`). These checks
//! surface such problems up front instead.

use std::collections::{BTreeMap, HashSet};

use rust_decimal::Decimal;
use serde::Serialize;

use tallyerp_core::{BusinessModule, FlowId};

use crate::flow::{ApprovalFlow, ApprovalStep};

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "issue", rename_all = "snake_case")]
pub enum FlowIssue {
    NoSteps {
        flow_id: FlowId,
    },
    DuplicateStepNumber {
        flow_id: FlowId,
        step_number: u32,
    },
    InvertedBracket {
        flow_id: FlowId,
        step_number: u32,
    },
    MissingRole {
        flow_id: FlowId,
        step_number: u32,
    },
    Overlap {
        flow_id: FlowId,
        first: u32,
        second: u32,
    },
    Gap {
        flow_id: FlowId,
        from: Decimal,
        to: Decimal,
    },
    NotFromZero {
        flow_id: FlowId,
        starts_at: Decimal,
    },
    BoundedTop {
        flow_id: FlowId,
        ends_at: Decimal,
    },
    MultipleActiveFlows {
        module: BusinessModule,
        flows: Vec<FlowId>,
    },
}

impl core::fmt::Display for FlowIssue {
    fn fmt(&self, f: &mut core::fmt::Formatter<'_>) -> core::fmt::Result {
        match self {
            FlowIssue::NoSteps { flow_id } => write!(f, "flow {flow_id} has no steps"),
            FlowIssue::DuplicateStepNumber { flow_id, step_number } => {
                write!(f, "flow {flow_id} repeats step number {step_number}")
            }
            FlowIssue::InvertedBracket { flow_id, step_number } => {
                write!(f, "flow {flow_id} step {step_number} has max_amount <= min_amount")
            }
            FlowIssue::MissingRole { flow_id, step_number } => {
                write!(f, "flow {flow_id} step {step_number} names no role")
            }
            FlowIssue::Overlap { flow_id, first, second } => {
                write!(f, "flow {flow_id} steps {first} and {second} overlap")
            }
            FlowIssue::Gap { flow_id, from, to } => {
                write!(f, "flow {flow_id} leaves amounts in [{from}, {to}) without a step")
            }
            FlowIssue::NotFromZero { flow_id, starts_at } => {
                write!(f, "flow {flow_id} starts at {starts_at}; smaller amounts match no step")
            }
            FlowIssue::BoundedTop { flow_id, ends_at } => {
                write!(f, "flow {flow_id} ends at {ends_at}; larger amounts match no step")
            }
            FlowIssue::MultipleActiveFlows { module, flows } => {
                write!(f, "module {module} has {} active flows", flows.len())
            }
        }
    }
}

/// Check every flow and the active-flow uniqueness per module.
pub fn validate_flows(flows: &[ApprovalFlow]) -> Vec<FlowIssue> {
    let mut issues: Vec<FlowIssue> = flows.iter().flat_map(validate_flow).collect();

    let mut active: BTreeMap<BusinessModule, Vec<FlowId>> = BTreeMap::new();
    for flow in flows.iter().filter(|f| f.is_active) {
        active.entry(flow.module).or_default().push(flow.id);
    }
    for (module, mut ids) in active {
        if ids.len() > 1 {
            ids.sort();
            issues.push(FlowIssue::MultipleActiveFlows { module, flows: ids });
        }
    }

    issues
}

fn validate_flow(flow: &ApprovalFlow) -> Vec<FlowIssue> {
    let flow_id = flow.id;
    let mut issues = Vec::new();

    if flow.steps.is_empty() {
        issues.push(FlowIssue::NoSteps { flow_id });
        return issues;
    }

    let mut seen = HashSet::new();
    for step in &flow.steps {
        if !seen.insert(step.step_number) {
            issues.push(FlowIssue::DuplicateStepNumber {
                flow_id,
                step_number: step.step_number,
            });
        }
        if step.role.is_unset() {
            issues.push(FlowIssue::MissingRole {
                flow_id,
                step_number: step.step_number,
            });
        }
    }

    let mut brackets: Vec<&ApprovalStep> = Vec::new();
    for step in &flow.steps {
        if step.max_amount.is_some_and(|max| max <= step.min_amount) {
            issues.push(FlowIssue::InvertedBracket {
                flow_id,
                step_number: step.step_number,
            });
        } else {
            brackets.push(step);
        }
    }
    brackets.sort_by(|a, b| {
        a.min_amount
            .cmp(&b.min_amount)
            .then_with(|| a.step_number.cmp(&b.step_number))
    });

    let Some(first) = brackets.first() else {
        return issues;
    };
    if first.min_amount > Decimal::ZERO {
        issues.push(FlowIssue::NotFromZero {
            flow_id,
            starts_at: first.min_amount,
        });
    }

    // Sweep in ascending order, tracking how far coverage reaches so far.
    let mut reach: Option<Decimal> = first.max_amount;
    let mut reach_step = first.step_number;
    for next in brackets.iter().skip(1) {
        match reach {
            None => issues.push(FlowIssue::Overlap {
                flow_id,
                first: reach_step,
                second: next.step_number,
            }),
            Some(end) if end > next.min_amount => issues.push(FlowIssue::Overlap {
                flow_id,
                first: reach_step,
                second: next.step_number,
            }),
            Some(end) if end < next.min_amount => issues.push(FlowIssue::Gap {
                flow_id,
                from: end,
                to: next.min_amount,
            }),
            Some(_) => {}
        }

        let extends = match (reach, next.max_amount) {
            (None, _) => false,
            (Some(_), None) => true,
            (Some(end), Some(max)) => max > end,
        };
        if extends {
            reach = next.max_amount;
            reach_step = next.step_number;
        }
    }

    if let Some(end) = reach {
        issues.push(FlowIssue::BoundedTop { flow_id, ends_at: end });
    }

    issues
}
