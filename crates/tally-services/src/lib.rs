//! Business logic for the Tally accounting system
//!
//! This crate contains the batch engines and the ledger service that
//! orchestrate accounting operations on top of the repository traits.
//!
//! # Architecture
//!
//! Services are designed to be composable and testable:
//! - Each service owns its repositories behind `Arc`
//! - All operations are instrumented with tracing
//! - Long-running batch passes take a `CancellationToken` and stop cleanly
//!   between units of work
//!
//! # Services
//!
//! - `ChargingEngine` - Prices recorded usage in one atomic batch pass
//! - `InvoicingEngine` - Generates per-account balance sheets for a billing
//!   period, chained to a predecessor invoice
//! - `LedgerService` - Creation interface: projects, accounts, membership,
//!   service access, and usage recording

pub mod charging;
pub mod invoicing;
pub mod ledger;

pub use charging::ChargingEngine;
pub use invoicing::{fold_transactions, InvoicingEngine, SheetFold};
pub use ledger::LedgerService;

/// Business logic constants
pub mod constants {
    /// Upper bound on predecessor-chain walks; guards against corrupt chains
    pub const MAX_CHAIN_LENGTH: usize = 100;
}
