//! Invoice and balance sheet repository implementation
//!
//! The `UNIQUE (project_id, start_time, end_time)` constraint on invoices
//! maps a concurrent generation attempt for the same period to a retryable
//! `Conflict` error. Balance sheets carry their aggregate as JSONB plus a
//! join table of the transactions folded in.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tally_core::{
    models::{BalanceSheet, Invoice, NewBalanceSheet, SheetContents},
    selection::TimeWindow,
    traits::InvoiceRepository,
    AppError, AppResult,
};
use tracing::{debug, error, instrument, warn};

const INVOICE_COLUMNS: &str = "id, created, start_time, end_time, project_id, predecessor_id";

const SHEET_QUERY: &str = r#"
    SELECT
        bs.id, bs.invoice_id, bs.account_id, bs.balance, bs.contents,
        COALESCE(
            array_agg(st.transaction_id ORDER BY st.transaction_id)
                FILTER (WHERE st.transaction_id IS NOT NULL),
            '{}'
        ) AS transaction_ids
    FROM balance_sheets bs
    LEFT JOIN sheet_transactions st ON st.sheet_id = bs.id
"#;

/// PostgreSQL implementation of InvoiceRepository
pub struct PgInvoiceRepository {
    pool: PgPool,
}

impl PgInvoiceRepository {
    /// Create a new invoice repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl InvoiceRepository for PgInvoiceRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: i64) -> AppResult<Option<Invoice>> {
        debug!("Finding invoice by id: {}", id);

        let result = sqlx::query_as::<sqlx::Postgres, InvoiceRow>(&format!(
            "SELECT {} FROM invoices WHERE id = $1",
            INVOICE_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error finding invoice {}: {}", id, e);
            AppError::Store(format!("Failed to find invoice: {}", e))
        })?;

        Ok(result.map(Into::into))
    }

    #[instrument(skip(self, window))]
    async fn create(
        &self,
        project_id: i64,
        window: &TimeWindow,
        predecessor_id: Option<i64>,
    ) -> AppResult<Invoice> {
        debug!("Creating invoice for project {} over {}", project_id, window);

        let row = sqlx::query_as::<sqlx::Postgres, InvoiceRow>(&format!(
            r#"
            INSERT INTO invoices (start_time, end_time, project_id, predecessor_id)
            VALUES ($1, $2, $3, $4)
            RETURNING {}
            "#,
            INVOICE_COLUMNS
        ))
        .bind(window.start())
        .bind(window.end())
        .bind(project_id)
        .bind(predecessor_id)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            if e.to_string().contains("unique constraint") {
                warn!(
                    "Invoice for project {} over {} already exists",
                    project_id, window
                );
                AppError::Conflict(format!(
                    "Invoice for project {} over {} already exists",
                    project_id, window
                ))
            } else {
                error!("Store error creating invoice: {}", e);
                AppError::Store(format!("Failed to create invoice: {}", e))
            }
        })?;

        Ok(row.into())
    }

    #[instrument(skip(self))]
    async fn sheet_for_account(
        &self,
        invoice_id: i64,
        account_id: i64,
    ) -> AppResult<Option<BalanceSheet>> {
        debug!(
            "Finding sheet of invoice {} for account {}",
            invoice_id, account_id
        );

        let result = sqlx::query_as::<sqlx::Postgres, SheetRow>(&format!(
            "{} WHERE bs.invoice_id = $1 AND bs.account_id = $2 GROUP BY bs.id",
            SHEET_QUERY
        ))
        .bind(invoice_id)
        .bind(account_id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error finding balance sheet: {}", e);
            AppError::Store(format!("Failed to find balance sheet: {}", e))
        })?;

        result.map(BalanceSheet::try_from).transpose()
    }

    #[instrument(skip(self, sheet))]
    async fn create_sheet(&self, sheet: &NewBalanceSheet) -> AppResult<BalanceSheet> {
        debug!(
            "Persisting balance sheet for account {} on invoice {}",
            sheet.account_id, sheet.invoice_id
        );

        let contents = serde_json::to_value(&sheet.contents)
            .map_err(|e| AppError::Serialization(format!("Failed to encode contents: {}", e)))?;

        let mut tx = self.pool.begin().await.map_err(|e| {
            error!("Store error starting sheet transaction: {}", e);
            AppError::Store(format!("Failed to begin transaction: {}", e))
        })?;

        let row: (i64,) = sqlx::query_as(
            r#"
            INSERT INTO balance_sheets (invoice_id, account_id, balance, contents)
            VALUES ($1, $2, $3, $4)
            RETURNING id
            "#,
        )
        .bind(sheet.invoice_id)
        .bind(sheet.account_id)
        .bind(sheet.balance)
        .bind(&contents)
        .fetch_one(&mut *tx)
        .await
        .map_err(|e| {
            error!("Store error persisting balance sheet: {}", e);
            if e.to_string().contains("unique constraint") {
                AppError::AlreadyExists(format!(
                    "Invoice {} already has a sheet for account {}",
                    sheet.invoice_id, sheet.account_id
                ))
            } else {
                AppError::Store(format!("Failed to persist balance sheet: {}", e))
            }
        })?;

        sqlx::query(
            r#"
            INSERT INTO sheet_transactions (sheet_id, transaction_id)
            SELECT $1, unnest($2::BIGINT[])
            "#,
        )
        .bind(row.0)
        .bind(&sheet.transaction_ids)
        .execute(&mut *tx)
        .await
        .map_err(|e| {
            error!("Store error linking sheet transactions: {}", e);
            AppError::Store(format!("Failed to link sheet transactions: {}", e))
        })?;

        tx.commit().await.map_err(|e| {
            error!("Store error committing balance sheet: {}", e);
            AppError::Store(format!("Failed to commit balance sheet: {}", e))
        })?;

        let mut ids = sheet.transaction_ids.clone();
        ids.sort_unstable();

        Ok(BalanceSheet {
            id: row.0,
            invoice_id: sheet.invoice_id,
            account_id: sheet.account_id,
            balance: sheet.balance,
            contents: sheet.contents.clone(),
            transaction_ids: ids,
        })
    }

    #[instrument(skip(self))]
    async fn sheets_for_invoice(&self, invoice_id: i64) -> AppResult<Vec<BalanceSheet>> {
        debug!("Fetching sheets of invoice {}", invoice_id);

        let rows = sqlx::query_as::<sqlx::Postgres, SheetRow>(&format!(
            "{} WHERE bs.invoice_id = $1 GROUP BY bs.id ORDER BY bs.account_id",
            SHEET_QUERY
        ))
        .bind(invoice_id)
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error fetching balance sheets: {}", e);
            AppError::Store(format!("Failed to fetch balance sheets: {}", e))
        })?;

        rows.into_iter().map(BalanceSheet::try_from).collect()
    }

    #[instrument(skip(self))]
    async fn chain(&self, invoice_id: i64, limit: usize) -> AppResult<Vec<Invoice>> {
        debug!("Walking invoice chain from {}", invoice_id);

        let mut chain = Vec::new();
        let mut next = Some(invoice_id);

        while let Some(id) = next {
            if chain.len() >= limit {
                break;
            }
            let invoice = self
                .find_by_id(id)
                .await?
                .ok_or_else(|| AppError::InvoiceNotFound(id.to_string()))?;
            next = invoice.predecessor_id;
            chain.push(invoice);
        }

        Ok(chain)
    }

    #[instrument(skip(self))]
    async fn delete(&self, invoice_id: i64) -> AppResult<bool> {
        debug!("Deleting invoice: {}", invoice_id);

        let result = sqlx::query("DELETE FROM invoices WHERE id = $1")
            .bind(invoice_id)
            .execute(&self.pool)
            .await
            .map_err(|e| {
                error!("Store error deleting invoice {}: {}", invoice_id, e);
                AppError::Store(format!("Failed to delete invoice: {}", e))
            })?;

        Ok(result.rows_affected() > 0)
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct InvoiceRow {
    id: i64,
    created: DateTime<Utc>,
    start_time: DateTime<Utc>,
    end_time: DateTime<Utc>,
    project_id: i64,
    predecessor_id: Option<i64>,
}

impl From<InvoiceRow> for Invoice {
    fn from(row: InvoiceRow) -> Self {
        Self {
            id: row.id,
            created: row.created,
            start_time: row.start_time,
            end_time: row.end_time,
            project_id: row.project_id,
            predecessor_id: row.predecessor_id,
        }
    }
}

#[derive(Debug, sqlx::FromRow)]
struct SheetRow {
    id: i64,
    invoice_id: i64,
    account_id: i64,
    balance: Decimal,
    contents: serde_json::Value,
    transaction_ids: Vec<i64>,
}

impl TryFrom<SheetRow> for BalanceSheet {
    type Error = AppError;

    fn try_from(row: SheetRow) -> Result<Self, Self::Error> {
        let contents: SheetContents = serde_json::from_value(row.contents)
            .map_err(|e| AppError::Serialization(format!("Failed to decode contents: {}", e)))?;

        Ok(Self {
            id: row.id,
            invoice_id: row.invoice_id,
            account_id: row.account_id,
            balance: row.balance,
            contents,
            transaction_ids: row.transaction_ids,
        })
    }
}
