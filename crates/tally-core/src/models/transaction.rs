//! Transaction model
//!
//! A transaction is an immutable record of consumption of a service's
//! resources by a user, attributed to a single account for charging. Usage
//! (`amt_used`) and charging (`amt_charged`) are kept separate to allow
//! discretionary billing and selective discounts. Besides CREDIT and DEBIT,
//! AUDIT transactions monitor a resource without being charged, and GRANT /
//! REVOKE transactions are zero-usage sentinels marking when an account
//! gained or lost access to a service.
//!
//! After creation only `amt_charged` (written by the charging engine) and
//! `active` (soft-void) are ever mutated.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// Transaction type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum TxType {
    /// Usage monitoring only, never contributes to balances
    Audit,
    /// Reduces an account's balance owed
    Credit,
    /// Increases an account's balance owed
    #[default]
    Debit,
    /// Sentinel: account gained access to a service
    Grant,
    /// Sentinel: account lost access to a service
    Revoke,
}

impl fmt::Display for TxType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TxType::Audit => write!(f, "AUDIT"),
            TxType::Credit => write!(f, "CREDIT"),
            TxType::Debit => write!(f, "DEBIT"),
            TxType::Grant => write!(f, "GRANT"),
            TxType::Revoke => write!(f, "REVOKE"),
        }
    }
}

impl TxType {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "AUDIT" => Some(TxType::Audit),
            "CREDIT" => Some(TxType::Credit),
            "DEBIT" => Some(TxType::Debit),
            "GRANT" => Some(TxType::Grant),
            "REVOKE" => Some(TxType::Revoke),
            _ => None,
        }
    }

    /// Whether this type is an access-change sentinel
    pub fn is_sentinel(&self) -> bool {
        matches!(self, TxType::Grant | TxType::Revoke)
    }

    /// Signed `(used, charged)` contribution for invoicing aggregation
    ///
    /// DEBIT counts positive, CREDIT negative; AUDIT and the sentinels
    /// contribute nothing to usage or balance totals.
    pub fn signed_amounts(&self, amt_used: Decimal, amt_charged: Decimal) -> (Decimal, Decimal) {
        match self {
            TxType::Debit => (amt_used, amt_charged),
            TxType::Credit => (-amt_used, -amt_charged),
            TxType::Audit | TxType::Grant | TxType::Revoke => (Decimal::ZERO, Decimal::ZERO),
        }
    }
}

/// Transaction entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Transaction {
    /// Unique identifier
    pub id: i64,

    /// Creation timestamp
    pub created: DateTime<Utc>,

    /// Soft-void flag
    pub active: bool,

    /// Consumed service
    pub service_id: i64,

    /// Account billed
    pub account_id: i64,

    /// User who generated the usage
    pub creator_id: i64,

    /// Amount of the service's units consumed
    pub amt_used: Decimal,

    /// Monetary charge, written by the charging engine (default 0)
    pub amt_charged: Decimal,

    /// Transaction type
    pub tx_type: TxType,
}

impl Transaction {
    /// Whether the charging engine has written a non-zero charge
    ///
    /// A transaction legitimately charged exactly zero (a free service) is
    /// indistinguishable from an uncharged one and will be recomputed by any
    /// charging rerun; this is accepted behavior.
    pub fn is_charged(&self) -> bool {
        !self.amt_charged.is_zero()
    }
}

/// Transaction joined with the names needed for invoicing aggregation
#[derive(Debug, Clone)]
pub struct TransactionDetail {
    pub transaction: Transaction,
    pub creator_name: String,
    pub service_name: String,
}

/// Parameters for creating a transaction
#[derive(Debug, Clone)]
pub struct NewTransaction {
    pub service_id: i64,
    pub account_id: i64,
    pub creator_id: i64,
    pub amt_used: Decimal,
    pub amt_charged: Decimal,
    pub tx_type: TxType,
    pub active: bool,
}

impl NewTransaction {
    /// A zero-usage access-change sentinel
    pub fn sentinel(service_id: i64, account_id: i64, creator_id: i64, tx_type: TxType) -> Self {
        Self {
            service_id,
            account_id,
            creator_id,
            amt_used: Decimal::ZERO,
            amt_charged: Decimal::ZERO,
            tx_type,
            active: true,
        }
    }
}
