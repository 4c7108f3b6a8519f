//! Infrastructure layer: persistence, reference data, config, and the
//! engines that apply business events to the ledgers.
//!
//! The domain crates decide; this crate reads the state they decide on and
//! writes their decisions through a [`store::UnitOfWork`].

pub mod approval_engine;
pub mod config;
pub mod error;
pub mod event_handler;
pub mod posting_engine;
pub mod reference;
pub mod stock_ledger;
pub mod store;

mod integration_tests;

pub use approval_engine::{ApprovalEngine, SubmitDecision};
pub use config::LedgerConfig;
pub use error::{LedgerError, LedgerResult};
pub use event_handler::{BusinessEvent, BusinessEventHandler, EventOutcome, PostingRequest};
pub use posting_engine::{LedgerPostingEngine, PostedTransaction};
pub use reference::{
    AccountRepository, FlowRepository, ReferenceCatalog, TemplateRepository, WarehouseDirectory,
};
pub use stock_ledger::StockLedger;
pub use store::{InMemoryLedgerStore, LedgerStore, PostgresLedgerStore, StoreError, UnitOfWork};
