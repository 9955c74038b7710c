//! Account model
//!
//! Accounts link a project to the services it may consume. Transactions are
//! billed to one of a project's accounts, allowing multiple concurrent
//! billing streams to be distinguished. An optional expiry timestamp can be
//! set for accounting purposes.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::trailing_index;

/// Account entity
///
/// Account names are unique within their project; auto-named accounts get a
/// `{project}-{index}` name from the index allocator.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Account {
    /// Unique identifier
    pub id: i64,

    /// Creation timestamp
    pub created: DateTime<Utc>,

    /// Name, unique within the owning project
    pub name: String,

    /// Soft-delete flag
    pub active: bool,

    /// Optional expiry timestamp
    pub expires: Option<DateTime<Utc>>,

    /// Owning project
    pub project_id: i64,
}

impl Account {
    /// Numeric suffix of the account name, 0 if absent
    pub fn index_value(&self) -> i64 {
        trailing_index(&self.name)
    }

    /// Whether the account has expired relative to `now`
    pub fn is_expired(&self, now: DateTime<Utc>) -> bool {
        self.expires.map(|e| e <= now).unwrap_or(false)
    }
}

impl fmt::Display for Account {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.name)
    }
}

/// Parameters for creating an account
#[derive(Debug, Clone)]
pub struct NewAccount {
    pub name: String,
    pub project_id: i64,
    pub expires: Option<DateTime<Utc>>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn account(name: &str, expires: Option<DateTime<Utc>>) -> Account {
        Account {
            id: 1,
            created: Utc::now(),
            name: name.to_string(),
            active: true,
            expires,
            project_id: 1,
        }
    }

    #[test]
    fn test_index_value() {
        assert_eq!(account("test-1", None).index_value(), 1);
        assert_eq!(account("test-25", None).index_value(), 25);
        assert_eq!(account("test", None).index_value(), 0);
    }

    #[test]
    fn test_is_expired() {
        let now = Utc::now();
        assert!(!account("a", None).is_expired(now));
        assert!(!account("a", Some(now + Duration::days(1))).is_expired(now));
        assert!(account("a", Some(now - Duration::days(1))).is_expired(now));
    }
}
