//! Account repository implementation
//!
//! The `UNIQUE (project_id, name)` constraint on accounts turns a lost
//! index-allocation race into an `AlreadyExists` error here; the
//! provisioning service retries with a fresh index.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use sqlx::PgPool;
use tally_core::{
    models::{Account, NewAccount},
    selection::{AccountFilter, MatchScheme},
    traits::AccountRepository,
    AppError, AppResult,
};
use tracing::{debug, error, instrument};

use super::{escape_like, name_match_clause};

const ACCOUNT_COLUMNS: &str = "id, created, name, active, expires, project_id";

/// PostgreSQL implementation of AccountRepository
pub struct PgAccountRepository {
    pool: PgPool,
}

impl PgAccountRepository {
    /// Create a new account repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl AccountRepository for PgAccountRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: i64) -> AppResult<Option<Account>> {
        debug!("Finding account by id: {}", id);

        let result = sqlx::query_as::<sqlx::Postgres, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE id = $1",
            ACCOUNT_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error finding account {}: {}", id, e);
            AppError::Store(format!("Failed to find account: {}", e))
        })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn find_by_name(&self, project_id: i64, name: &str) -> AppResult<Option<Account>> {
        debug!("Finding account {} in project {}", name, project_id);

        let result = sqlx::query_as::<sqlx::Postgres, AccountRow>(&format!(
            "SELECT {} FROM accounts WHERE project_id = $1 AND name = $2",
            ACCOUNT_COLUMNS
        ))
        .bind(project_id)
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error finding account {}: {}", name, e);
            AppError::Store(format!("Failed to find account: {}", e))
        })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self, account))]
    async fn create(&self, account: &NewAccount) -> AppResult<Account> {
        debug!(
            "Creating account {} for project {}",
            account.name, account.project_id
        );

        let row = sqlx::query_as::<sqlx::Postgres, AccountRow>(&format!(
            r#"
            INSERT INTO accounts (name, project_id, expires)
            VALUES ($1, $2, $3)
            RETURNING {}
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(&account.name)
        .bind(account.project_id)
        .bind(account.expires)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error creating account: {}", e);
            if e.to_string().contains("unique constraint") {
                AppError::AlreadyExists(format!("Account {} already exists", account.name))
            } else {
                AppError::Store(format!("Failed to create account: {}", e))
            }
        })?;

        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn next_index(&self, prefix: &str) -> AppResult<i64> {
        debug!("Computing next account index for prefix: {}", prefix);

        let result: (i64,) = sqlx::query_as(
            r#"
            SELECT 1 + COALESCE(MAX(COALESCE(substring(name FROM '[0-9]+$')::BIGINT, 0)), 0)
            FROM accounts
            WHERE name ILIKE '%' || $1 || '%'
            "#,
        )
        .bind(escape_like(prefix))
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error computing account index: {}", e);
            AppError::Store(format!("Failed to compute next index: {}", e))
        })?;

        Ok(result.0)
    }

    #[instrument(skip(self))]
    async fn active_for_project(&self, project_id: i64) -> AppResult<Vec<Account>> {
        debug!("Finding active accounts of project {}", project_id);

        let rows = sqlx::query_as::<sqlx::Postgres, AccountRow>(&format!(
            r#"
            SELECT {}
            FROM accounts
            WHERE project_id = $1 AND active
            ORDER BY created
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(project_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error fetching project accounts: {}", e);
            AppError::Store(format!("Failed to fetch accounts: {}", e))
        })?;

        Ok(rows.into_iter().map(Into::into).collect())
    }

    #[instrument(skip(self))]
    async fn latest_active_for_project(&self, project_id: i64) -> AppResult<Option<Account>> {
        debug!("Finding latest active account of project {}", project_id);

        let result = sqlx::query_as::<sqlx::Postgres, AccountRow>(&format!(
            r#"
            SELECT {}
            FROM accounts
            WHERE project_id = $1 AND active
            ORDER BY created DESC
            LIMIT 1
            "#,
            ACCOUNT_COLUMNS
        ))
        .bind(project_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error fetching latest account: {}", e);
            AppError::Store(format!("Failed to fetch latest account: {}", e))
        })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn ids_for_filter(
        &self,
        filter: &AccountFilter,
        scheme: MatchScheme,
    ) -> AppResult<Option<Vec<i64>>> {
        let (query, names) = match filter {
            AccountFilter::Any => return Ok(None),
            AccountFilter::Accounts(names) => (
                format!(
                    "SELECT id FROM accounts WHERE active AND {}",
                    name_match_clause("name", "$1", scheme)
                ),
                names,
            ),
            AccountFilter::Projects(names) => (
                format!(
                    r#"
                    SELECT a.id
                    FROM accounts a
                    JOIN projects p ON p.id = a.project_id
                    WHERE a.active AND {}
                    "#,
                    name_match_clause("p.name", "$1", scheme)
                ),
                names,
            ),
        };

        debug!("Resolving account filter ({} names, {})", names.len(), scheme);

        let rows: Vec<(i64,)> = sqlx::query_as(&query)
            .bind(names)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Store error resolving account filter: {}", e);
                AppError::Store(format!("Failed to resolve account filter: {}", e))
            })?;

        Ok(Some(rows.into_iter().map(|r| r.0).collect()))
    }

    #[instrument(skip(self))]
    async fn grant_service(&self, account_id: i64, service_id: i64) -> AppResult<()> {
        debug!("Granting service {} to account {}", service_id, account_id);

        sqlx::query(
            r#"
            INSERT INTO account_services (account_id, service_id)
            VALUES ($1, $2)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(account_id)
        .bind(service_id)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error granting service: {}", e);
            AppError::Store(format!("Failed to grant service: {}", e))
        })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn revoke_service(&self, account_id: i64, service_id: i64) -> AppResult<()> {
        debug!(
            "Revoking service {} from account {}",
            service_id, account_id
        );

        sqlx::query("DELETE FROM account_services WHERE account_id = $1 AND service_id = $2")
            .bind(account_id)
            .bind(service_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Store error revoking service: {}", e);
                AppError::Store(format!("Failed to revoke service: {}", e))
            })?;

        Ok(())
    }

    #[instrument(skip(self))]
    async fn deactivate(&self, id: i64) -> AppResult<bool> {
        debug!("Deactivating account: {}", id);

        let result = sqlx::query("UPDATE accounts SET active = FALSE WHERE id = $1 AND active")
            .bind(id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Store error deactivating account {}: {}", id, e);
                AppError::Store(format!("Failed to deactivate account: {}", e))
            })?;

        Ok(result.rows_affected() > 0)
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct AccountRow {
    id: i64,
    created: DateTime<Utc>,
    name: String,
    active: bool,
    expires: Option<DateTime<Utc>>,
    project_id: i64,
}

impl From<AccountRow> for Account {
    fn from(row: AccountRow) -> Self {
        Self {
            id: row.id,
            created: row.created,
            name: row.name,
            active: row.active,
            expires: row.expires,
            project_id: row.project_id,
        }
    }
}
