//! Transaction repository implementation
//!
//! Holds the set-oriented UPDATE behind the charging engine. The whole
//! charging pass is a single statement, so concurrent passes over
//! overlapping selections serialize per row and each row is written from a
//! consistent read of its service's charge rate.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rust_decimal::Decimal;
use sqlx::PgPool;
use tally_core::{
    models::{NewTransaction, Transaction, TransactionDetail, TxType},
    selection::TimeWindow,
    traits::TransactionRepository,
    AppError, AppResult,
};
use tracing::{debug, error, instrument};

const TX_COLUMNS: &str =
    "id, created, active, service_id, account_id, creator_id, amt_used, amt_charged, tx_type";

/// PostgreSQL implementation of TransactionRepository
pub struct PgTransactionRepository {
    pool: PgPool,
}

impl PgTransactionRepository {
    /// Create a new transaction repository
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TransactionRepository for PgTransactionRepository {
    #[instrument(skip(self))]
    async fn find_by_id(&self, id: i64) -> AppResult<Option<Transaction>> {
        debug!("Finding transaction by id: {}", id);

        let result = sqlx::query_as::<sqlx::Postgres, TransactionRow>(&format!(
            "SELECT {} FROM transactions WHERE id = $1",
            TX_COLUMNS
        ))
        .bind(id)
        .fetch_optional(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error finding transaction {}: {}", id, e);
            AppError::Store(format!("Failed to find transaction: {}", e))
        })?;

        result.map(TryInto::try_into).transpose()
    }

    #[instrument(skip(self, tx))]
    async fn create(&self, tx: &NewTransaction) -> AppResult<Transaction> {
        debug!(
            "Creating {} transaction for account {}",
            tx.tx_type, tx.account_id
        );

        let row = sqlx::query_as::<sqlx::Postgres, TransactionRow>(&format!(
            r#"
            INSERT INTO transactions (
                active, service_id, account_id, creator_id,
                amt_used, amt_charged, tx_type
            )
            VALUES ($1, $2, $3, $4, $5, $6, $7)
            RETURNING {}
            "#,
            TX_COLUMNS
        ))
        .bind(tx.active)
        .bind(tx.service_id)
        .bind(tx.account_id)
        .bind(tx.creator_id)
        .bind(tx.amt_used)
        .bind(tx.amt_charged)
        .bind(tx.tx_type.to_string())
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error creating transaction: {}", e);
            AppError::Store(format!("Failed to create transaction: {}", e))
        })?;

        row.try_into()
    }

    #[instrument(skip(self, window))]
    async fn count_chargeable(
        &self,
        window: &TimeWindow,
        service_ids: Option<&[i64]>,
        account_ids: Option<&[i64]>,
        force_recalculate: bool,
    ) -> AppResult<i64> {
        debug!("Counting chargeable transactions in {}", window);

        let result: (i64,) = sqlx::query_as(
            r#"
            SELECT COUNT(*)
            FROM transactions t
            WHERE t.active
              AND t.created >= $1
              AND t.created <= $2
              AND ($3::BIGINT[] IS NULL OR t.service_id = ANY($3))
              AND ($4::BIGINT[] IS NULL OR t.account_id = ANY($4))
              AND ($5::BOOLEAN OR t.amt_charged = 0)
            "#,
        )
        .bind(window.start())
        .bind(window.end())
        .bind(service_ids.map(|ids| ids.to_vec()))
        .bind(account_ids.map(|ids| ids.to_vec()))
        .bind(force_recalculate)
        .fetch_one(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error counting chargeable transactions: {}", e);
            AppError::Store(format!("Failed to count transactions: {}", e))
        })?;

        Ok(result.0)
    }

    #[instrument(skip(self, window))]
    async fn apply_charges(
        &self,
        window: &TimeWindow,
        service_ids: Option<&[i64]>,
        account_ids: Option<&[i64]>,
        force_recalculate: bool,
        multiplier: Decimal,
    ) -> AppResult<u64> {
        debug!(
            "Applying charges in {} with multiplier {}",
            window, multiplier
        );

        let result = sqlx::query(
            r#"
            UPDATE transactions t
            SET amt_charged = t.amt_used * s.charge_rate * $3
            FROM services s
            WHERE s.id = t.service_id
              AND t.active
              AND t.created >= $1
              AND t.created <= $2
              AND ($4::BIGINT[] IS NULL OR t.service_id = ANY($4))
              AND ($5::BIGINT[] IS NULL OR t.account_id = ANY($5))
              AND ($6::BOOLEAN OR t.amt_charged = 0)
            "#,
        )
        .bind(window.start())
        .bind(window.end())
        .bind(multiplier)
        .bind(service_ids.map(|ids| ids.to_vec()))
        .bind(account_ids.map(|ids| ids.to_vec()))
        .bind(force_recalculate)
        .execute(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error applying charges: {}", e);
            AppError::Store(format!("Failed to apply charges: {}", e))
        })?;

        Ok(result.rows_affected())
    }

    #[instrument(skip(self, window))]
    async fn for_invoicing(
        &self,
        account_id: i64,
        window: &TimeWindow,
    ) -> AppResult<Vec<TransactionDetail>> {
        debug!(
            "Fetching transactions of account {} in {}",
            account_id, window
        );

        // Voided rows are included: invoicing sees the full history
        let rows = sqlx::query_as::<sqlx::Postgres, TransactionDetailRow>(
            r#"
            SELECT
                t.id, t.created, t.active, t.service_id, t.account_id,
                t.creator_id, t.amt_used, t.amt_charged, t.tx_type,
                u.name AS creator_name,
                s.name AS service_name
            FROM transactions t
            JOIN users u ON u.id = t.creator_id
            JOIN services s ON s.id = t.service_id
            WHERE t.account_id = $1
              AND t.created >= $2
              AND t.created <= $3
            ORDER BY t.created, t.id
            "#,
        )
        .bind(account_id)
        .bind(window.start())
        .bind(window.end())
        .fetch_all(&self.pool)
        .await
        .map_err(|e| {
            error!("Store error fetching invoicing transactions: {}", e);
            AppError::Store(format!("Failed to fetch transactions: {}", e))
        })?;

        rows.into_iter().map(TryInto::try_into).collect()
    }

    #[instrument(skip(self))]
    async fn void(&self, id: i64) -> AppResult<bool> {
        debug!("Voiding transaction: {}", id);

        let result =
            sqlx::query("UPDATE transactions SET active = FALSE WHERE id = $1 AND active")
                .bind(id)
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    error!("Store error voiding transaction {}: {}", id, e);
                    AppError::Store(format!("Failed to void transaction: {}", e))
                })?;

        Ok(result.rows_affected() > 0)
    }
}

/// Helper struct for mapping database rows
#[derive(Debug, sqlx::FromRow)]
struct TransactionRow {
    id: i64,
    created: DateTime<Utc>,
    active: bool,
    service_id: i64,
    account_id: i64,
    creator_id: i64,
    amt_used: Decimal,
    amt_charged: Decimal,
    tx_type: String,
}

impl TryFrom<TransactionRow> for Transaction {
    type Error = AppError;

    // An unrecognized stored type must not be read back as a DEBIT
    fn try_from(row: TransactionRow) -> Result<Self, Self::Error> {
        let tx_type = TxType::from_str(&row.tx_type)
            .ok_or_else(|| AppError::Store(format!("Unknown transaction type: {}", row.tx_type)))?;

        Ok(Self {
            id: row.id,
            created: row.created,
            active: row.active,
            service_id: row.service_id,
            account_id: row.account_id,
            creator_id: row.creator_id,
            amt_used: row.amt_used,
            amt_charged: row.amt_charged,
            tx_type,
        })
    }
}

#[derive(Debug, sqlx::FromRow)]
struct TransactionDetailRow {
    id: i64,
    created: DateTime<Utc>,
    active: bool,
    service_id: i64,
    account_id: i64,
    creator_id: i64,
    amt_used: Decimal,
    amt_charged: Decimal,
    tx_type: String,
    creator_name: String,
    service_name: String,
}

impl TryFrom<TransactionDetailRow> for TransactionDetail {
    type Error = AppError;

    fn try_from(row: TransactionDetailRow) -> Result<Self, Self::Error> {
        let tx_type = TxType::from_str(&row.tx_type)
            .ok_or_else(|| AppError::Store(format!("Unknown transaction type: {}", row.tx_type)))?;

        Ok(Self {
            transaction: Transaction {
                id: row.id,
                created: row.created,
                active: row.active,
                service_id: row.service_id,
                account_id: row.account_id,
                creator_id: row.creator_id,
                amt_used: row.amt_used,
                amt_charged: row.amt_charged,
                tx_type,
            },
            creator_name: row.creator_name,
            service_name: row.service_name,
        })
    }
}
