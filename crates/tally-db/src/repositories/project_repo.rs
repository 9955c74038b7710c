//! Project repository implementation
//!
//! Membership mutations run inside a database transaction so the membership
//! change and its audit event land together or not at all. An add that finds
//! the membership already present, or a remove that finds nothing to delete,
//! writes no event.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tally_core::{
    models::{MembershipEvent, MembershipEventType, NewProject, Project},
    traits::ProjectRepository,
    AppError, AppResult,
};
use tracing::{debug, error, instrument};

use super::escape_like;

const PROJECT_COLUMNS: &str =
    "id, created, name, ldap_group, active, parent_id, pi_id, description";

const EVENT_COLUMNS: &str = "id, created, user_id, project_id, event_type";

/// PostgreSQL implementation of ProjectRepository
pub struct PgProjectRepository {
    pool: PgPool,
}

impl PgProjectRepository {
    /// Create a new project repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Change membership in `table` and record `event_type` atomically
    async fn change_membership(
        &self,
        table: &str,
        add: bool,
        project_id: i64,
        user_id: i64,
        event_type: MembershipEventType,
    ) -> AppResult<()> {
        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Store error starting membership transaction: {}", e);
            AppError::Store(format!("Failed to begin transaction: {}", e))
        })?;

        let statement = if add {
            format!(
                "INSERT INTO {} (project_id, user_id) VALUES ($1, $2) ON CONFLICT DO NOTHING",
                table
            )
        } else {
            format!(
                "DELETE FROM {} WHERE project_id = $1 AND user_id = $2",
                table
            )
        };

        let result = sqlx::query(&statement)
            .bind(project_id)
            .bind(user_id)
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!("Store error changing membership: {}", e);
                AppError::Store(format!("Failed to change membership: {}", e))
            })?;

        // No change, no event
        if result.rows_affected() > 0 {
            sqlx::query(
                "INSERT INTO membership_events (user_id, project_id, event_type) VALUES ($1, $2, $3)",
            )
            .bind(user_id)
            .bind(project_id)
            .bind(event_type.to_string())
            .execute(&mut *tx)
            .await
            .map_err(|e| {
                error!("Store error recording membership event: {}", e);
                AppError::Store(format!("Failed to record membership event: {}", e))
            })?;
        }

        tx.commit().await.map_err(|e| {
            error!("Store error committing membership change: {}", e);
            AppError::Store(format!("Failed to commit membership change: {}", e))
        })?;

        Ok(())
    }
}

#[async_trait]
impl ProjectRepository for PgProjectRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: i64) -> AppResult<Option<Project>> {
        debug!("Finding project by id: {}", id);

        let result = sqlx::query_as::<sqlx::Postgres, ProjectRow>(&format!(
            "SELECT {} FROM projects WHERE id = $1",
            PROJECT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error finding project {}: {}", id, e);
            AppError::Store(format!("Failed to find project: {}", e))
        })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn find_by_name(&self, name: &str) -> AppResult<Option<Project>> {
        debug!("Finding project by name: {}", name);

        let result = sqlx::query_as::<sqlx::Postgres, ProjectRow>(&format!(
            "SELECT {} FROM projects WHERE name = $1",
            PROJECT_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error finding project {}: {}", name, e);
            AppError::Store(format!("Failed to find project: {}", e))
        })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self, project))]
    async fn create(&self, project: &NewProject) -> AppResult<Project> {
        debug!("Creating project: {}", project.name);

        let row = sqlx::query_as::<sqlx::Postgres, ProjectRow>(&format!(
            r#"
            INSERT INTO projects (name, ldap_group, parent_id, pi_id, description)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            PROJECT_COLUMNS
        ))
        .bind(&project.name)
        .bind(&project.ldap_group)
        .bind(project.parent_id)
        .bind(project.pi_id)
        .bind(&project.description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error creating project: {}", e);
            if e.to_string().contains("unique constraint") {
                AppError::AlreadyExists(format!("Project {} already exists", project.name))
            } else {
                AppError::Store(format!("Failed to create project: {}", e))
            }
        })?;

        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn next_index(&self, prefix: &str) -> AppResult<i64> {
        debug!("Computing next project index for prefix: {}", prefix);

        let result: (i64,) = sqlx::query_as(
            r#"
            SELECT 1 + COALESCE(MAX(COALESCE(substring(name FROM '[0-9]+$')::BIGINT, 0)), 0)
            FROM projects
            WHERE name ILIKE '%' || $1 || '%'
            "#,
        )
        .bind(escape_like(prefix))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error computing project index: {}", e);
            AppError::Store(format!("Failed to compute next index: {}", e))
        })?;

        Ok(result.0)
    }

    #[instrument(skip(self))]
    async fn deactivate(&self, id: i64) -> AppResult<bool> {
        debug!("Deactivating project: {}", id);

        let result = sqlx::query("UPDATE projects SET active = FALSE WHERE id = $1 AND active")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Store error deactivating project {}: {}", id, e);
                AppError::Store(format!("Failed to deactivate project: {}", e))
            })?;

        Ok(result.rows_affected() > 0)
    }

    #[instrument(skip(self))]
    async fn add_member(&self, project_id: i64, user_id: i64) -> AppResult<()> {
        debug!("Adding member {} to project {}", user_id, project_id);
        self.change_membership(
            "project_members",
            true,
            project_id,
            user_id,
            MembershipEventType::AddMember,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn remove_member(&self, project_id: i64, user_id: i64) -> AppResult<()> {
        debug!("Removing member {} from project {}", user_id, project_id);
        self.change_membership(
            "project_members",
            false,
            project_id,
            user_id,
            MembershipEventType::RemoveMember,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn add_manager(&self, project_id: i64, user_id: i64) -> AppResult<()> {
        debug!("Adding manager {} to project {}", user_id, project_id);
        self.change_membership(
            "project_managers",
            true,
            project_id,
            user_id,
            MembershipEventType::AddManager,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn remove_manager(&self, project_id: i64, user_id: i64) -> AppResult<()> {
        debug!("Removing manager {} from project {}", user_id, project_id);
        self.change_membership(
            "project_managers",
            false,
            project_id,
            user_id,
            MembershipEventType::RemoveManager,
        )
        .await
    }

    #[instrument(skip(self))]
    async fn is_manager(&self, project_id: i64, user_id: i64) -> AppResult<bool> {
        let result: (bool,) = sqlx::query_as(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM project_managers
                WHERE project_id = $1 AND user_id = $2
            )
            "#,
        )
        .bind(project_id)
        .bind(user_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error checking manager status: {}", e);
            AppError::Store(format!("Failed to check manager status: {}", e))
        })?;

        Ok(result.0)
    }

    #[instrument(skip(self))]
    async fn record_event(
        &self,
        project_id: i64,
        user_id: i64,
        event_type: MembershipEventType,
    ) -> AppResult<MembershipEvent> {
        debug!(
            "Recording {} event for user {} on project {}",
            event_type, user_id, project_id
        );

        let row = sqlx::query_as::<sqlx::Postgres, EventRow>(&format!(
            r#"
            INSERT INTO membership_events (user_id, project_id, event_type)
            VALUES ($1, $2, $3)
            RETURNING {}
            "#,
            EVENT_COLUMNS
        ))
        .bind(user_id)
        .bind(project_id)
        .bind(event_type.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error recording membership event: {}", e);
            AppError::Store(format!("Failed to record membership event: {}", e))
        })?;

        row.try_into()
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct ProjectRow {
    id: i64,
    created: DateTime<Utc>,
    name: String,
    ldap_group: String,
    active: bool,
    parent_id: Option<i64>,
    pi_id: i64,
    description: String,
}

impl From<ProjectRow> for Project {
    fn from(row: ProjectRow) -> Self {
        Self {
            id: row.id,
            created: row.created,
            name: row.name,
            ldap_group: row.ldap_group,
            active: row.active,
            parent_id: row.parent_id,
            pi_id: row.pi_id,
            description: row.description,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct EventRow {
    id: i64,
    created: DateTime<Utc>,
    user_id: i64,
    project_id: i64,
    event_type: String,
}

impl TryFrom<EventRow> for MembershipEvent {
    type Error = AppError;

    // A stored event type outside the known set is corruption, not a default
    fn try_from(row: EventRow) -> Result<Self, Self::Error> {
        let event_type = MembershipEventType::from_str(&row.event_type).ok_or_else(|| {
            AppError::Store(format!("Unknown membership event type: {}", row.event_type))
        })?;

        Ok(Self {
            id: row.id,
            created: row.created,
            user_id: row.user_id,
            project_id: row.project_id,
            event_type,
        })
    }
}
