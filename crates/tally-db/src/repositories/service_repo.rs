//! System and service repository implementation

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tally_core::{
    models::{NewService, NewSystem, Service, System},
    selection::{MatchScheme, ServiceFilter},
    traits::ServiceRepository,
    AppError, AppResult,
};
use tracing::{debug, error, instrument};

use super::name_match_clause;

const SERVICE_COLUMNS: &str =
    "id, created, name, units, active, system_id, charge_rate, description";

const SYSTEM_COLUMNS: &str = "id, created, name, active, description";

/// PostgreSQL implementation of ServiceRepository
pub struct PgServiceRepository {
    pool: PgPool,
}

impl PgServiceRepository {
    /// Create a new service repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl ServiceRepository for PgServiceRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: i64) -> AppResult<Option<Service>> {
        debug!("Finding service by id: {}", id);

        let result = sqlx::query_as::<sqlx::Postgres, ServiceRow>(&format!(
            "SELECT {} FROM services WHERE id = $1",
            SERVICE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error finding service {}: {}", id, e);
            AppError::Store(format!("Failed to find service: {}", e))
        })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn find_by_name(&self, name: &str) -> AppResult<Option<Service>> {
        debug!("Finding service by name: {}", name);

        // Service names are not unique; take the oldest match
        let result = sqlx::query_as::<sqlx::Postgres, ServiceRow>(&format!(
            "SELECT {} FROM services WHERE name = $1 ORDER BY id LIMIT 1",
            SERVICE_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error finding service {}: {}", name, e);
            AppError::Store(format!("Failed to find service: {}", e))
        })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self))]
    async fn find_system_by_name(&self, name: &str) -> AppResult<Option<System>> {
        debug!("Finding system by name: {}", name);

        let result = sqlx::query_as::<sqlx::Postgres, SystemRow>(&format!(
            "SELECT {} FROM systems WHERE name = $1",
            SYSTEM_COLUMNS
        ))
        .bind(name)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error finding system {}: {}", name, e);
            AppError::Store(format!("Failed to find system: {}", e))
        })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self, system))]
    async fn create_system(&self, system: &NewSystem) -> AppResult<System> {
        debug!("Creating system: {}", system.name);

        let row = sqlx::query_as::<sqlx::Postgres, SystemRow>(&format!(
            r#"
            INSERT INTO systems (name, description)
            VALUES ($1, $2)
            RETURNING {}
            "#,
            SYSTEM_COLUMNS
        ))
        .bind(&system.name)
        .bind(&system.description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error creating system: {}", e);
            if e.to_string().contains("unique constraint") {
                AppError::AlreadyExists(format!("System {} already exists", system.name))
            } else {
                AppError::Store(format!("Failed to create system: {}", e))
            }
        })?;

        Ok(row.into())
    }

    #[instrument(skip(self, service))]
    async fn create(&self, service: &NewService) -> AppResult<Service> {
        debug!("Creating service: {}", service.name);

        let row = sqlx::query_as::<sqlx::Postgres, ServiceRow>(&format!(
            r#"
            INSERT INTO services (name, units, system_id, charge_rate, description)
            VALUES ($1, $2, $3, $4, $5)
            RETURNING {}
            "#,
            SERVICE_COLUMNS
        ))
        .bind(&service.name)
        .bind(&service.units)
        .bind(service.system_id)
        .bind(service.charge_rate)
        .bind(&service.description)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error creating service: {}", e);
            AppError::Store(format!("Failed to create service: {}", e))
        })?;

        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn ids_for_filter(
        &self,
        filter: &ServiceFilter,
        scheme: MatchScheme,
    ) -> AppResult<Option<Vec<i64>>> {
        let (query, names) = match filter {
            ServiceFilter::Any => return Ok(None),
            ServiceFilter::Services(names) => (
                format!(
                    "SELECT id FROM services WHERE active AND {}",
                    name_match_clause("name", "$1", scheme)
                ),
                names,
            ),
            ServiceFilter::Systems(names) => (
                format!(
                    r#"
                    SELECT s.id
                    FROM services s
                    JOIN systems sys ON sys.id = s.system_id
                    WHERE s.active AND {}
                    "#,
                    name_match_clause("sys.name", "$1", scheme)
                ),
                names,
            ),
        };

        debug!("Resolving service filter ({} names, {})", names.len(), scheme);

        let rows: Vec<(i64,)> = sqlx::query_as(&query)
            .bind(names)
            .fetch_all(&self.pool)
            .await
            .map_err(|e| {
                error!("Store error resolving service filter: {}", e);
                AppError::Store(format!("Failed to resolve service filter: {}", e))
            })?;

        Ok(Some(rows.into_iter().map(|r| r.0).collect()))
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct ServiceRow {
    id: i64,
    created: DateTime<Utc>,
    name: String,
    units: String,
    active: bool,
    system_id: i64,
    charge_rate: Decimal,
    description: String,
}

impl From<ServiceRow> for Service {
    fn from(row: ServiceRow) -> Self {
        Self {
            id: row.id,
            created: row.created,
            name: row.name,
            units: row.units,
            active: row.active,
            system_id: row.system_id,
            charge_rate: row.charge_rate,
            description: row.description,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SystemRow {
    id: i64,
    created: DateTime<Utc>,
    name: String,
    active: bool,
    description: String,
}

impl From<SystemRow> for System {
    fn from(row: SystemRow) -> Self {
        Self {
            id: row.id,
            created: row.created,
            name: row.name,
            active: row.active,
            description: row.description,
        }
    }
}
