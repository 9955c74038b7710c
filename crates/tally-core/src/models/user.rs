//! User model
//!
//! A user account. Is a member of zero or more projects and can have a
//! default project selected for attribution when recording usage.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// User entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct User {
    /// Unique identifier
    pub id: i64,

    /// Creation timestamp
    pub created: DateTime<Utc>,

    /// Unique login name
    pub name: String,

    /// Human-readable full name
    pub realname: String,

    /// Soft-delete flag
    pub active: bool,

    /// Optional default project for job submission
    pub default_project_id: Option<i64>,
}

impl User {
    /// Check whether the user is active
    #[inline]
    pub fn is_active(&self) -> bool {
        self.active
    }
}

/// Parameters for creating a user
#[derive(Debug, Clone, Default)]
pub struct NewUser {
    pub name: String,
    pub realname: String,
    pub default_project_id: Option<i64>,
}
