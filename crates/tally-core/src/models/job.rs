//! Job model
//!
//! Jobs encapsulate the metadata batch schedulers report about their
//! workloads. Beyond the metadata, a job can be linked to transactions
//! capturing the resources it consumed. Wallclock fields are durations in
//! seconds; most other fields carry the scheduler's raw strings, leaving
//! translation to the site-wide accounting to ingestion layers.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;

/// Job entity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Job {
    pub id: i64,
    pub created: DateTime<Utc>,
    pub queued: DateTime<Utc>,
    pub started: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,

    /// Scheduler-assigned id, unique across the ledger
    pub jobid: String,
    pub name: String,
    pub cluster: String,
    pub submitter: String,
    pub submit_host: String,
    pub host_list: String,
    pub account: String,
    pub partition: String,
    pub qos: String,
    pub job_script: String,
    pub tres_requested: String,
    pub tres_allocated: String,

    /// Requested wallclock in seconds
    pub wall_requested: i64,

    /// Actual wallclock in seconds, if known
    pub wall_duration: Option<i64>,
}

impl fmt::Display for Job {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} - {}", self.jobid, self.name)
    }
}

/// Parameters for recording a job
#[derive(Debug, Clone)]
pub struct NewJob {
    pub jobid: String,
    pub queued: DateTime<Utc>,
    pub wall_requested: i64,
    pub name: String,
    pub cluster: String,
    pub submitter: String,
    pub submit_host: String,
    pub host_list: String,
    pub account: String,
    pub partition: String,
    pub qos: String,
    pub job_script: String,
    pub tres_requested: String,
    pub tres_allocated: String,
    pub started: Option<DateTime<Utc>>,
    pub completed: Option<DateTime<Utc>>,
    pub wall_duration: Option<i64>,
}

impl NewJob {
    /// A job with only the required scheduler fields set
    pub fn new(jobid: impl Into<String>, queued: DateTime<Utc>, wall_requested: i64) -> Self {
        Self {
            jobid: jobid.into(),
            queued,
            wall_requested,
            name: String::new(),
            cluster: String::new(),
            submitter: String::new(),
            submit_host: String::new(),
            host_list: String::new(),
            account: String::new(),
            partition: String::new(),
            qos: String::new(),
            job_script: String::new(),
            tres_requested: String::new(),
            tres_allocated: String::new(),
            started: None,
            completed: None,
            wall_duration: None,
        }
    }
}
