//! System and service models
//!
//! A system is the root entity under which services are grouped: a whole
//! cluster, a partition, a storage system, or a more abstract concept like a
//! funding award. A service is any consumable resource provided by a system,
//! with its own units and charge rate.

use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use serde::{Deserialize, Serialize};
use std::fmt;

/// System entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct System {
    /// Unique identifier
    pub id: i64,

    /// Creation timestamp
    pub created: DateTime<Utc>,

    /// Unique system name
    pub name: String,

    /// Soft-delete flag
    pub active: bool,

    /// Free-form description
    pub description: String,
}

impl fmt::Display for System {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Service entity
///
/// Anything from core hours on a cluster partition or allocated storage
/// space to hours of billed support.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Service {
    /// Unique identifier
    pub id: i64,

    /// Creation timestamp
    pub created: DateTime<Utc>,

    /// Service name
    pub name: String,

    /// Unit label for `amt_used` (e.g. "core-hours", "TB-months")
    pub units: String,

    /// Soft-delete flag
    pub active: bool,

    /// Owning system
    pub system_id: i64,

    /// Currency per unit of usage
    pub charge_rate: Decimal,

    /// Free-form description
    pub description: String,
}

impl Service {
    /// Charge for a given usage amount at this service's rate
    pub fn charge_for(&self, amt_used: Decimal, multiplier: Decimal) -> Decimal {
        amt_used * self.charge_rate * multiplier
    }
}

impl fmt::Display for Service {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Parameters for creating a system
#[derive(Debug, Clone)]
pub struct NewSystem {
    pub name: String,
    pub description: String,
}

/// Parameters for creating a service
#[derive(Debug, Clone)]
pub struct NewService {
    pub name: String,
    pub units: String,
    pub system_id: i64,
    pub charge_rate: Decimal,
    pub description: String,
}
