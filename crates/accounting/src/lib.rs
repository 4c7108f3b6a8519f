//! Accounting module: GL accounts, posting templates and double-entry journals.
//!
//! Pure domain logic only: no IO, no persistence concerns. A [`GlTemplate`]
//! plus event [`Variables`] drafts a [`JournalDraft`]; the draft is checked
//! for balance before anything may persist it as a [`GlTransaction`].

pub mod account;
pub mod error;
pub mod formula;
pub mod journal;
pub mod template;

pub use account::{AccountKind, GlAccount};
pub use error::PostingError;
pub use formula::{Expr, Formula, FormulaError, Variables};
pub use journal::{
    GlTransaction, JournalDraft, JournalLine, PostJournal, draft_entry, transaction_number,
};
pub use template::{GlTemplate, TemplateIssue, TemplateLine, select_template, validate_templates};
