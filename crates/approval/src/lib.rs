//! Approval routing: amount brackets gated by roles.
//!
//! Pure domain logic only. Flows are configuration (read-only at evaluation
//! time); decisions are append-only history and never change the business
//! entity they refer to.

pub mod decision;
pub mod error;
pub mod flow;
pub mod requirement;
pub mod validation;

pub use decision::{ApprovalDecision, Decision, RecordDecision};
pub use error::ApprovalError;
pub use flow::{ApprovalFlow, ApprovalStep, select_active_flow};
pub use requirement::{ApprovalRequirement, UnmatchedAmountPolicy, evaluate};
pub use validation::{FlowIssue, validate_flows};
