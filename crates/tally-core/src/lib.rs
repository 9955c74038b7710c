//! Tally Core Library
//!
//! This crate provides the foundational types, traits, and error handling
//! for the Tally accounting system. It includes:
//!
//! - Domain models (Project, Account, Service, Transaction, Invoice, etc.)
//! - Selection types for the batch charging and invoicing passes
//! - Common traits for the ledger store repositories
//! - Unified error handling
//! - Application configuration

pub mod config;
pub mod error;
pub mod models;
pub mod selection;
pub mod traits;

pub use config::AppConfig;
pub use error::AppError;

/// Result type alias using AppError
pub type AppResult<T> = Result<T, AppError>;
