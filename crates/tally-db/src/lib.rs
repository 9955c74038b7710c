//! Tally Ledger Store
//!
//! This crate provides PostgreSQL access and repository implementations for
//! the Tally accounting system. It includes:
//!
//! - Connection pool management with sqlx
//! - Repository implementations for all ledger entities
//! - The set-oriented batch update behind the charging engine
//! - The unique constraints backing the index allocator and the
//!   duplicate-invoice guard

pub mod pool;
pub mod repositories;

pub use pool::{create_pool, run_migrations};
pub use repositories::*;

// Re-export commonly used types
pub use sqlx::PgPool;
pub use tally_core::{AppError, AppResult};
