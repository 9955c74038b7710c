//! Project and membership-event models
//!
//! The project is the root entity for ownership and membership. The pi
//! (principal investigator) owns the project; managers may also edit it.
//! Every change to a project's membership or ownership is recorded as an
//! explicit `MembershipEvent`, written by the same operation that performs
//! the change.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

use super::trailing_index;

/// Membership event type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum MembershipEventType {
    /// Project created or ownership transferred
    NewPi,
    /// Manager added
    AddManager,
    /// Manager removed
    RemoveManager,
    /// Member added
    AddMember,
    /// Member removed
    RemoveMember,
}

impl fmt::Display for MembershipEventType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            MembershipEventType::NewPi => write!(f, "NEWPI"),
            MembershipEventType::AddManager => write!(f, "ADDMGR"),
            MembershipEventType::RemoveManager => write!(f, "REMOVEMGR"),
            MembershipEventType::AddMember => write!(f, "ADDMEM"),
            MembershipEventType::RemoveMember => write!(f, "REMOVEMEM"),
        }
    }
}

impl MembershipEventType {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "NEWPI" => Some(MembershipEventType::NewPi),
            "ADDMGR" => Some(MembershipEventType::AddManager),
            "REMOVEMGR" => Some(MembershipEventType::RemoveManager),
            "ADDMEM" => Some(MembershipEventType::AddMember),
            "REMOVEMEM" => Some(MembershipEventType::RemoveMember),
            _ => None,
        }
    }
}

/// Project entity
///
/// Never hard-deleted, only deactivated.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Project {
    /// Unique identifier
    pub id: i64,

    /// Creation timestamp
    pub created: DateTime<Utc>,

    /// Unique project name
    pub name: String,

    /// Optional LDAP group for file access purposes
    pub ldap_group: String,

    /// Soft-delete flag
    pub active: bool,

    /// Optional parent project
    pub parent_id: Option<i64>,

    /// Owning user (principal investigator)
    pub pi_id: i64,

    /// Free-form description
    pub description: String,
}

impl Project {
    /// Numeric suffix of the project name, 0 if absent
    pub fn index_value(&self) -> i64 {
        trailing_index(&self.name)
    }
}

impl fmt::Display for Project {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.name, self.description)
    }
}

/// Parameters for creating a project
#[derive(Debug, Clone)]
pub struct NewProject {
    pub name: String,
    pub pi_id: i64,
    pub description: String,
    pub ldap_group: String,
    pub parent_id: Option<i64>,
}

impl NewProject {
    pub fn new(name: impl Into<String>, pi_id: i64) -> Self {
        Self {
            name: name.into(),
            pi_id,
            description: String::new(),
            ldap_group: String::new(),
            parent_id: None,
        }
    }
}

/// Record of a change to a project's membership or ownership
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MembershipEvent {
    pub id: i64,
    pub created: DateTime<Utc>,
    pub user_id: i64,
    pub project_id: i64,
    pub event_type: MembershipEventType,
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[test]
    fn test_event_type_round_trip() {
        for etype in [
            MembershipEventType::NewPi,
            MembershipEventType::AddManager,
            MembershipEventType::RemoveManager,
            MembershipEventType::AddMember,
            MembershipEventType::RemoveMember,
        ] {
            assert_eq!(
                MembershipEventType::from_str(&etype.to_string()),
                Some(etype)
            );
        }
        assert_eq!(MembershipEventType::from_str("OTHER"), None);
    }

    #[test]
    fn test_index_value() {
        let project = Project {
            id: 1,
            created: Utc::now(),
            name: "alloc-12".to_string(),
            ldap_group: String::new(),
            active: true,
            parent_id: None,
            pi_id: 1,
            description: String::new(),
        };
        assert_eq!(project.index_value(), 12);
    }
}
