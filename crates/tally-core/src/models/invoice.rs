//! Invoice and balance sheet models
//!
//! An invoice snapshots one project's billing period. It carries one balance
//! sheet per account that was active at generation time, and can be chained
//! to a predecessor invoice whose per-account balances carry forward.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Invoice entity
///
/// Covers the billing period `[start_time, end_time]` for one project.
/// Predecessor chains form an ordered, most-recent-first list; cycle
/// detection is a caller responsibility.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Invoice {
    /// Unique identifier
    pub id: i64,

    /// Creation timestamp
    pub created: DateTime<Utc>,

    /// Start of the billing period
    pub start_time: DateTime<Utc>,

    /// End of the billing period
    pub end_time: DateTime<Utc>,

    /// Invoiced project
    pub project_id: i64,

    /// Optional predecessor invoice whose balances carry forward
    pub predecessor_id: Option<i64>,
}

/// Per-user, per-service usage and charge totals within one balance sheet
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UsageTotals {
    pub usage: Decimal,
    pub charged: Decimal,
}

/// Nested aggregate `contents[user][service] = {usage, charged}`
///
/// Only DEBIT and CREDIT transactions contribute entries; audit and
/// access-change sentinels never touch the contents.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct SheetContents(pub BTreeMap<String, BTreeMap<String, UsageTotals>>);

impl SheetContents {
    pub fn new() -> Self {
        Self::default()
    }

    /// Accumulate a signed `(used, charged)` contribution
    pub fn record(&mut self, user: &str, service: &str, used: Decimal, charged: Decimal) {
        let totals = self
            .0
            .entry(user.to_string())
            .or_default()
            .entry(service.to_string())
            .or_default();
        totals.usage += used;
        totals.charged += charged;
    }

    /// Look up the totals for a `(user, service)` pair
    pub fn get(&self, user: &str, service: &str) -> Option<&UsageTotals> {
        self.0.get(user).and_then(|services| services.get(service))
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }
}

/// One account's aggregated result within one invoice
///
/// `balance` equals the predecessor sheet's balance (0 without one) plus the
/// signed sum of `amt_charged` over the sheet's transaction set. The
/// transaction set records every in-window transaction, including voided
/// ones and zero-contribution types, for audit completeness.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BalanceSheet {
    pub id: i64,
    pub invoice_id: i64,
    pub account_id: i64,
    pub balance: Decimal,
    pub contents: SheetContents,

    /// Ids of the transactions folded into this sheet
    pub transaction_ids: Vec<i64>,
}

/// Parameters for persisting a balance sheet
#[derive(Debug, Clone)]
pub struct NewBalanceSheet {
    pub invoice_id: i64,
    pub account_id: i64,
    pub balance: Decimal,
    pub contents: SheetContents,
    pub transaction_ids: Vec<i64>,
}

/// An invoice together with its generated balance sheets
#[derive(Debug, Clone)]
pub struct InvoiceWithSheets {
    pub invoice: Invoice,
    pub sheets: Vec<BalanceSheet>,
}
