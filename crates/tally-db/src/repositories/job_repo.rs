//! Job repository implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tally_core::{
    models::{Job, NewJob},
    traits::JobRepository,
    AppError, AppResult,
};
use tracing::{debug, error, instrument};

const JOB_COLUMNS: &str = "id, created, queued, started, completed, jobid, name, cluster, \
     submitter, submit_host, host_list, account, partition, qos, job_script, \
     tres_requested, tres_allocated, wall_requested, wall_duration";

/// PostgreSQL implementation of JobRepository
pub struct PgJobRepository {
    pool: PgPool,
}

impl PgJobRepository {
    /// Create a new job repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl JobRepository for PgJobRepository {
    #[instrument(skip(self))]
    async fn find_by_jobid(&self, jobid: &str) -> AppResult<Option<Job>> {
        debug!("Finding job by jobid: {}", jobid);

        let result = sqlx::query_as::<sqlx::Postgres, JobRow>(&format!(
            "SELECT {} FROM jobs WHERE jobid = $1",
            JOB_COLUMNS
        ))
        .bind(jobid)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error finding job {}: {}", jobid, e);
            AppError::Store(format!("Failed to find job: {}", e))
        })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self, job))]
    async fn create(&self, job: &NewJob) -> AppResult<Job> {
        debug!("Recording job: {}", job.jobid);

        let row = sqlx::query_as::<sqlx::Postgres, JobRow>(&format!(
            r#"
            INSERT INTO jobs (
                queued, started, completed, jobid, name, cluster,
                submitter, submit_host, host_list, account, partition, qos,
                job_script, tres_requested, tres_allocated,
                wall_requested, wall_duration
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11, $12, $13, $14, $15, $16, $17)
            RETURNING {}
            "#,
            JOB_COLUMNS
        ))
        .bind(job.queued)
        .bind(job.started)
        .bind(job.completed)
        .bind(&job.jobid)
        .bind(&job.name)
        .bind(&job.cluster)
        .bind(&job.submitter)
        .bind(&job.submit_host)
        .bind(&job.host_list)
        .bind(&job.account)
        .bind(&job.partition)
        .bind(&job.qos)
        .bind(&job.job_script)
        .bind(&job.tres_requested)
        .bind(&job.tres_allocated)
        .bind(job.wall_requested)
        .bind(job.wall_duration)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error recording job: {}", e);
            if e.to_string().contains("unique constraint") {
                AppError::DuplicateJobId(job.jobid.clone())
            } else {
                AppError::Store(format!("Failed to record job: {}", e))
            }
        })?;

        Ok(row.into())
    }

    #[instrument(skip(self, tx_ids))]
    async fn attach_transactions(&self, job_id: i64, tx_ids: &[i64]) -> AppResult<()> {
        debug!("Attaching {} transactions to job {}", tx_ids.len(), job_id);

        sqlx::query(
            r#"
            INSERT INTO job_transactions (job_id, transaction_id)
            SELECT $1, unnest($2::BIGINT[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(job_id)
        .bind(tx_ids)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error attaching transactions to job: {}", e);
            AppError::Store(format!("Failed to attach transactions: {}", e))
        })?;

        Ok(())
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct JobRow {
    id: i64,
    created: DateTime<Utc>,
    queued: DateTime<Utc>,
    started: Option<DateTime<Utc>>,
    completed: Option<DateTime<Utc>>,
    jobid: String,
    name: String,
    cluster: String,
    submitter: String,
    submit_host: String,
    host_list: String,
    account: String,
    partition: String,
    qos: String,
    job_script: String,
    tres_requested: String,
    tres_allocated: String,
    wall_requested: i64,
    wall_duration: Option<i64>,
}

impl From<JobRow> for Job {
    fn from(row: JobRow) -> Self {
        Self {
            id: row.id,
            created: row.created,
            queued: row.queued,
            started: row.started,
            completed: row.completed,
            jobid: row.jobid,
            name: row.name,
            cluster: row.cluster,
            submitter: row.submitter,
            submit_host: row.submit_host,
            host_list: row.host_list,
            account: row.account,
            partition: row.partition,
            qos: row.qos,
            job_script: row.job_script,
            tres_requested: row.tres_requested,
            tres_allocated: row.tres_allocated,
            wall_requested: row.wall_requested,
            wall_duration: row.wall_duration,
        }
    }
}
