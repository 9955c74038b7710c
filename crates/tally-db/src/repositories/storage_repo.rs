//! Storage commitment repository implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tally_core::{
    models::{DirType, NewStorageCommitment, StorageCommitment},
    traits::StorageRepository,
    AppError, AppResult,
};
use tracing::{debug, error, instrument};

const COMMITMENT_COLUMNS: &str = "id, created, dir_type, project_id, filesystem, path, \
     commitment, allocated, end_date, reclaimed, uid, gid, pid, permissions, is_purged";

/// PostgreSQL implementation of StorageRepository
pub struct PgStorageRepository {
    pool: PgPool,
}

impl PgStorageRepository {
    /// Create a new storage repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StorageRepository for PgStorageRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: i64) -> AppResult<Option<StorageCommitment>> {
        debug!("Finding storage commitment by id: {}", id);

        let result = sqlx::query_as::<sqlx::Postgres, CommitmentRow>(&format!(
            "SELECT {} FROM storage_commitments WHERE id = $1",
            COMMITMENT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error finding storage commitment {}: {}", id, e);
            AppError::Store(format!("Failed to find storage commitment: {}", e))
        })?;

        result.map(TryInto::try_into).transpose()
    }

    #[instrument(skip(self, commitment))]
    async fn create(&self, commitment: &NewStorageCommitment) -> AppResult<StorageCommitment> {
        debug!(
            "Recording storage commitment {}:{} for project {}",
            commitment.filesystem, commitment.path, commitment.project_id
        );

        let row = sqlx::query_as::<sqlx::Postgres, CommitmentRow>(&format!(
            r#"
            INSERT INTO storage_commitments (
                dir_type, project_id, filesystem, path, commitment,
                allocated, end_date, uid, gid, pid, permissions
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10, $11)
            RETURNING {}
            "#,
            COMMITMENT_COLUMNS
        ))
        .bind(commitment.dir_type.to_string())
        .bind(commitment.project_id)
        .bind(&commitment.filesystem)
        .bind(&commitment.path)
        .bind(commitment.commitment)
        .bind(commitment.allocated)
        .bind(commitment.end_date)
        .bind(commitment.uid)
        .bind(commitment.gid)
        .bind(commitment.pid)
        .bind(&commitment.permissions)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error recording storage commitment: {}", e);
            AppError::Store(format!("Failed to record storage commitment: {}", e))
        })?;

        row.try_into()
    }

    #[instrument(skip(self, tx_ids))]
    async fn attach_transactions(&self, commitment_id: i64, tx_ids: &[i64]) -> AppResult<()> {
        debug!(
            "Attaching {} transactions to storage commitment {}",
            tx_ids.len(),
            commitment_id
        );

        sqlx::query(
            r#"
            INSERT INTO storage_transactions (commitment_id, transaction_id)
            SELECT $1, unnest($2::BIGINT[])
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(commitment_id)
        .bind(tx_ids)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error attaching transactions to commitment: {}", e);
            AppError::Store(format!("Failed to attach transactions: {}", e))
        })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn for_project(&self, project_id: i64) -> AppResult<Vec<StorageCommitment>> {
        debug!("Fetching storage commitments of project {}", project_id);

        let rows = sqlx::query_as::<sqlx::Postgres, CommitmentRow>(&format!(
            r#"
            SELECT {}
            FROM storage_commitments
            WHERE project_id = $1
            ORDER BY created
            "#,
            COMMITMENT_COLUMNS
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error fetching storage commitments: {}", e);
            AppError::Store(format!("Failed to fetch storage commitments: {}", e))
        })?;

        rows.into_iter().map(TryInto::try_into).collect()
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct CommitmentRow {
    id: i64,
    created: DateTime<Utc>,
    dir_type: String,
    project_id: i64,
    filesystem: String,
    path: String,
    commitment: i64,
    allocated: Option<DateTime<Utc>>,
    end_date: Option<DateTime<Utc>>,
    reclaimed: Option<DateTime<Utc>>,
    uid: i32,
    gid: i32,
    pid: i32,
    permissions: String,
    is_purged: bool,
}

impl TryFrom<CommitmentRow> for StorageCommitment {
    type Error = AppError;

    fn try_from(row: CommitmentRow) -> Result<Self, Self::Error> {
        let dir_type = DirType::from_str(&row.dir_type)
            .ok_or_else(|| AppError::Store(format!("Unknown directory type: {}", row.dir_type)))?;

        Ok(Self {
            id: row.id,
            created: row.created,
            dir_type,
            project_id: row.project_id,
            filesystem: row.filesystem,
            path: row.path,
            commitment: row.commitment,
            allocated: row.allocated,
            end_date: row.end_date,
            reclaimed: row.reclaimed,
            uid: row.uid,
            gid: row.gid,
            pid: row.pid,
            permissions: row.permissions,
            is_purged: row.is_purged,
        })
    }
}
