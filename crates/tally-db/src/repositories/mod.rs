//! Repository implementations
//!
//! This module contains concrete implementations of all repository traits
//! defined in tally-core, using sqlx for PostgreSQL access. Queries are
//! runtime queries (not compile-time macros) to avoid requiring a database
//! connection at build time.

pub mod account_repo;
pub mod invoice_repo;
pub mod job_repo;
pub mod project_repo;
pub mod service_repo;
pub mod storage_repo;
pub mod transaction_repo;
pub mod user_repo;

pub use account_repo::PgAccountRepository;
pub use invoice_repo::PgInvoiceRepository;
pub use job_repo::PgJobRepository;
pub use project_repo::PgProjectRepository;
pub use service_repo::PgServiceRepository;
pub use storage_repo::PgStorageRepository;
pub use transaction_repo::PgTransactionRepository;
pub use user_repo::PgUserRepository;

use tally_core::selection::MatchScheme;

/// SQL predicate matching `column` against a bound `text[]` of names under
/// the given scheme
///
/// The name list is always carried in a bind parameter; only the trusted
/// column expression and placeholder are interpolated.
pub(crate) fn name_match_clause(column: &str, placeholder: &str, scheme: MatchScheme) -> String {
    match scheme {
        MatchScheme::Exact => format!("{} = ANY({})", column, placeholder),
        MatchScheme::StartsWith => format!(
            "EXISTS (SELECT 1 FROM unnest({}::text[]) AS pat WHERE {} ILIKE pat || '%')",
            placeholder, column
        ),
        MatchScheme::Contains => format!(
            "EXISTS (SELECT 1 FROM unnest({}::text[]) AS pat WHERE {} ILIKE '%' || pat || '%')",
            placeholder, column
        ),
    }
}

/// Escape `%`, `_`, and `\` so a bound value only matches itself under
/// LIKE/ILIKE
pub(crate) fn escape_like(value: &str) -> String {
    value
        .replace('\\', "\\\\")
        .replace('%', "\\%")
        .replace('_', "\\_")
}
