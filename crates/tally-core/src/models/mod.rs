//! Domain models for Tally
//!
//! This module contains all the core domain models used throughout the
//! accounting system.

pub mod account;
pub mod invoice;
pub mod job;
pub mod project;
pub mod service;
pub mod storage;
pub mod transaction;
pub mod user;

pub use account::{Account, NewAccount};
pub use invoice::{BalanceSheet, Invoice, InvoiceWithSheets, NewBalanceSheet, SheetContents, UsageTotals};
pub use job::{Job, NewJob};
pub use project::{MembershipEvent, MembershipEventType, NewProject, Project};
pub use service::{NewService, NewSystem, Service, System};
pub use storage::{DirType, NewStorageCommitment, StorageCommitment};
pub use transaction::{NewTransaction, Transaction, TransactionDetail, TxType};
pub use user::{NewUser, User};

/// Extract the trailing integer suffix of a name
///
/// Returns 0 when the name has no trailing digits, matching the index
/// allocator's treatment of non-numeric suffixes.
pub fn trailing_index(name: &str) -> i64 {
    let digits: Vec<char> = name
        .chars()
        .rev()
        .take_while(|c| c.is_ascii_digit())
        .collect();
    let digits: String = digits.into_iter().rev().collect();
    digits.parse().unwrap_or(0)
}
