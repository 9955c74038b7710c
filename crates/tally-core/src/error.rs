//! Unified error handling for Tally
//!
//! This module provides a comprehensive error type covering the failure
//! scenarios of the ledger store, the charging engine, and the invoicing
//! engine. Validation errors are always raised before any store mutation;
//! conflict errors guarantee that no partial write happened and may be
//! retried by the caller.

use rust_decimal::Decimal;
use thiserror::Error;

/// Main application error type
///
/// All errors in the application should be converted to this type.
#[derive(Error, Debug)]
pub enum AppError {
    // ==================== Store Errors ====================
    #[error("Store error: {0}")]
    Store(String),

    #[error("Store pool error: {0}")]
    Pool(String),

    #[error("Migration error: {0}")]
    Migration(String),

    // ==================== Validation Errors ====================
    #[error("Invalid window: start {start} is after end {end}")]
    InvalidWindow { start: String, end: String },

    #[error("Conflicting filter: {0}")]
    ConflictingFilter(String),

    #[error("Invalid discount {0}: must be within the range [0.0, 1.0)")]
    InvalidDiscount(Decimal),

    #[error("Must provide exactly one of account or project")]
    MissingTarget,

    #[error("Validation error: {0}")]
    Validation(String),

    // ==================== Not-Found Errors ====================
    #[error("User not found: {0}")]
    UserNotFound(String),

    #[error("Project not found: {0}")]
    ProjectNotFound(String),

    #[error("Account not found: {0}")]
    AccountNotFound(String),

    #[error("Service not found: {0}")]
    ServiceNotFound(String),

    #[error("Invoice not found: {0}")]
    InvoiceNotFound(String),

    #[error("Not found: {0}")]
    NotFound(String),

    // ==================== Conflict Errors ====================
    #[error("Conflict: {0}")]
    Conflict(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Duplicate job id: {0}")]
    DuplicateJobId(String),

    #[error("Index allocation for prefix '{prefix}' still contended after {attempts} attempts")]
    IndexContention { prefix: String, attempts: u32 },

    #[error("Invoice {invoice_id} does not belong to project {project}")]
    PredecessorMismatch { invoice_id: i64, project: String },

    // ==================== Internal Errors ====================
    #[error("Operation cancelled")]
    Cancelled,

    #[error("Internal error: {0}")]
    Internal(String),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl AppError {
    /// Returns the error code for logs and CLI output
    pub fn error_code(&self) -> &'static str {
        match self {
            AppError::Store(_) => "store_error",
            AppError::Pool(_) => "pool_error",
            AppError::Migration(_) => "migration_error",
            AppError::InvalidWindow { .. } => "invalid_window",
            AppError::ConflictingFilter(_) => "conflicting_filter",
            AppError::InvalidDiscount(_) => "invalid_discount",
            AppError::MissingTarget => "missing_target",
            AppError::Validation(_) => "validation_error",
            AppError::UserNotFound(_) => "user_not_found",
            AppError::ProjectNotFound(_) => "project_not_found",
            AppError::AccountNotFound(_) => "account_not_found",
            AppError::ServiceNotFound(_) => "service_not_found",
            AppError::InvoiceNotFound(_) => "invoice_not_found",
            AppError::NotFound(_) => "not_found",
            AppError::Conflict(_) => "conflict",
            AppError::AlreadyExists(_) => "already_exists",
            AppError::DuplicateJobId(_) => "duplicate_job_id",
            AppError::IndexContention { .. } => "index_contention",
            AppError::PredecessorMismatch { .. } => "predecessor_mismatch",
            AppError::Cancelled => "cancelled",
            AppError::Internal(_) => "internal_error",
            AppError::Config(_) => "config_error",
            AppError::Serialization(_) => "serialization_error",
        }
    }

    /// Whether the caller may retry the failed operation with backoff
    ///
    /// Conflict-class errors guarantee that no partial or double write
    /// occurred, so the batch operation is safe to re-run. Validation and
    /// not-found errors will fail the same way again.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            AppError::Conflict(_)
                | AppError::AlreadyExists(_)
                | AppError::DuplicateJobId(_)
                | AppError::IndexContention { .. }
        )
    }

    /// Whether this is a validation-class error detected before any mutation
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            AppError::InvalidWindow { .. }
                | AppError::ConflictingFilter(_)
                | AppError::InvalidDiscount(_)
                | AppError::MissingTarget
                | AppError::Validation(_)
        )
    }
}

// ==================== From implementations ====================

impl From<serde_json::Error> for AppError {
    fn from(err: serde_json::Error) -> Self {
        AppError::Serialization(err.to_string())
    }
}

impl From<std::io::Error> for AppError {
    fn from(err: std::io::Error) -> Self {
        AppError::Internal(err.to_string())
    }
}

impl From<config::ConfigError> for AppError {
    fn from(err: config::ConfigError) -> Self {
        AppError::Config(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rust_decimal_macros::dec;

    #[test]
    fn test_error_codes() {
        assert_eq!(
            AppError::InvalidDiscount(dec!(1.5)).error_code(),
            "invalid_discount"
        );
        assert_eq!(AppError::MissingTarget.error_code(), "missing_target");
        assert_eq!(
            AppError::DuplicateJobId("123".to_string()).error_code(),
            "duplicate_job_id"
        );
    }

    #[test]
    fn test_retryable_classification() {
        assert!(AppError::IndexContention {
            prefix: "proj-".to_string(),
            attempts: 5
        }
        .is_retryable());
        assert!(AppError::Conflict("duplicate invoice".to_string()).is_retryable());
        assert!(!AppError::MissingTarget.is_retryable());
        assert!(!AppError::Store("down".to_string()).is_retryable());
    }

    #[test]
    fn test_validation_classification() {
        assert!(AppError::InvalidDiscount(dec!(-0.1)).is_validation());
        assert!(AppError::ConflictingFilter("systems and services".to_string()).is_validation());
        assert!(!AppError::Conflict("x".to_string()).is_validation());
    }
}
