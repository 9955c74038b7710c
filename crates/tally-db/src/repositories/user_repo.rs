//! User repository implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tally_core::{
    models::{NewUser, User},
    traits::UserRepository,
    AppError, AppResult,
};
use tracing::{debug, error, instrument};

const USER_COLUMNS: &str = "id, created, name, realname, active, default_project_id";

/// PostgreSQL implementation of UserRepository
pub struct PgUserRepository {
    pool: PgPool,
}

impl PgUserRepository {
    /// Create a new user repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl UserRepository for PgUserRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: i64) -> AppResult<Option<User>> {
        debug!("Finding user by id: {}", id);

        let result = sqlx::query_as::<sqlx::Postgres, UserRow>(&format!(
            "SELECT {} FROM users WHERE id = $1",
            USER_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error finding user {}: {}", id, e);
            AppError::Store(format!("Failed to find user: {}", e))
        })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn find_by_name(&self, name: &str) -> AppResult<Option<User>> {
        debug!("Finding user by name: {}", name);

        let result = sqlx::query_as::<sqlx::Postgres, UserRow>(&format!(
            "SELECT {} FROM users WHERE name = $1",
            USER_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error finding user {}: {}", name, e);
            AppError::Store(format!("Failed to find user: {}", e))
        })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self, user))]
    async fn create(&self, user: &NewUser) -> AppResult<User> {
        debug!("Creating user: {}", user.name);

        let row = sqlx::query_as::<sqlx::Postgres, UserRow>(&format!(
            r#"
            INSERT INTO users (name, realname, default_project_id)
            VALUES ($1, $2, $3)
            RETURNING {}
            "#,
            USER_COLUMNS
        ))
        .bind(&user.name)
        .bind(&user.realname)
        .bind(user.default_project_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error creating user: {}", e);
            if e.to_string().contains("unique constraint") {
                AppError::AlreadyExists(format!("User {} already exists", user.name))
            } else {
                AppError::Store(format!("Failed to create user: {}", e))
            }
        })?;

        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn deactivate(&self, id: i64) -> AppResult<bool> {
        debug!("Deactivating user: {}", id);

        let result = sqlx::query("UPDATE users SET active = FALSE WHERE id = $1 AND active")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Store error deactivating user {}: {}", id, e);
                AppError::Store(format!("Failed to deactivate user: {}", e))
            })?;

        Ok(result.rows_affected() > 0)
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct UserRow {
    id: i64,
    created: DateTime<Utc>,
    name: String,
    realname: String,
    active: bool,
    default_project_id: Option<i64>,
}

impl From<UserRow> for User {
    fn from(row: UserRow) -> Self {
        Self {
            id: row.id,
            created: row.created,
            name: row.name,
            realname: row.realname,
            active: row.active,
            default_project_id: row.default_project_id,
        }
    }
}
