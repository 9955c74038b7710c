//! Storage commitment model
//!
//! Storage commitments carry extended information about the allocation of
//! storage resources. Transactions can be attached to a commitment to track
//! and bill for storage usage over time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Directory type of a storage commitment
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DirType {
    Home,
    #[default]
    Project,
    Scratch,
    Temp,
}

impl fmt::Display for DirType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DirType::Home => write!(f, "HOME"),
            DirType::Project => write!(f, "PROJECT"),
            DirType::Scratch => write!(f, "SCRATCH"),
            DirType::Temp => write!(f, "TEMP"),
        }
    }
}

impl DirType {
    /// Parse from string (case-insensitive)
    pub fn from_str(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "HOME" => Some(DirType::Home),
            "PROJECT" => Some(DirType::Project),
            "SCRATCH" => Some(DirType::Scratch),
            "TEMP" => Some(DirType::Temp),
            _ => None,
        }
    }
}

/// Storage commitment entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageCommitment {
    pub id: i64,
    pub created: DateTime<Utc>,
    pub dir_type: DirType,
    pub project_id: i64,
    pub filesystem: String,
    pub path: String,

    /// Committed size in bytes
    pub commitment: i64,
    pub allocated: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub reclaimed: Option<DateTime<Utc>>,
    pub uid: i32,
    pub gid: i32,
    pub pid: i32,
    pub permissions: String,
    pub is_purged: bool,
}

impl fmt::Display for StorageCommitment {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.filesystem, self.path)
    }
}

/// Parameters for recording a storage commitment
#[derive(Debug, Clone)]
pub struct NewStorageCommitment {
    pub dir_type: DirType,
    pub project_id: i64,
    pub filesystem: String,
    pub path: String,
    pub commitment: i64,
    pub allocated: Option<DateTime<Utc>>,
    pub end_date: Option<DateTime<Utc>>,
    pub uid: i32,
    pub gid: i32,
    pub pid: i32,
    pub permissions: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_dir_type_round_trip() {
        for t in [DirType::Home, DirType::Project, DirType::Scratch, DirType::Temp] {
            assert_eq!(DirType::from_str(&t.to_string()), Some(t));
        }
        assert_eq!(DirType::from_str("ARCHIVE"), None);
    }
}
