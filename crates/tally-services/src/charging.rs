//! Charging engine
//!
//! Prices recorded usage in one pass: resolves the service and account
//! filters to id sets, then hands the whole selection to the store as a
//! single set-oriented update. Validation happens before any store access,
//! so a failed pass never leaves a partial write behind.

use std::sync::Arc;

use tally_core::{
    selection::ChargeParameters,
    traits::{AccountRepository, ServiceRepository, TransactionRepository},
    AppError, AppResult,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument};

/// Resolved filter id sets; `None` means no narrowing
struct ResolvedFilters {
    service_ids: Option<Vec<i64>>,
    account_ids: Option<Vec<i64>>,
}

impl ResolvedFilters {
    /// A filter that named things but matched nothing selects nothing
    fn is_empty_selection(&self) -> bool {
        self.service_ids.as_ref().is_some_and(|ids| ids.is_empty())
            || self.account_ids.as_ref().is_some_and(|ids| ids.is_empty())
    }
}

/// Batch charging engine
pub struct ChargingEngine<S, A, T>
where
    S: ServiceRepository,
    A: AccountRepository,
    T: TransactionRepository,
{
    services: Arc<S>,
    accounts: Arc<A>,
    transactions: Arc<T>,
}

impl<S, A, T> ChargingEngine<S, A, T>
where
    S: ServiceRepository,
    A: AccountRepository,
    T: TransactionRepository,
{
    /// Create a new charging engine
    pub fn new(services: Arc<S>, accounts: Arc<A>, transactions: Arc<T>) -> Self {
        Self {
            services,
            accounts,
            transactions,
        }
    }

    async fn resolve(&self, params: &ChargeParameters) -> AppResult<ResolvedFilters> {
        let service_ids = self
            .services
            .ids_for_filter(&params.services, params.scheme)
            .await?;
        let account_ids = self
            .accounts
            .ids_for_filter(&params.accounts, params.scheme)
            .await?;

        Ok(ResolvedFilters {
            service_ids,
            account_ids,
        })
    }

    /// Count the transactions a pass with these parameters would touch
    #[instrument(skip(self, params))]
    pub async fn preview(&self, params: &ChargeParameters) -> AppResult<i64> {
        params.validate()?;

        let filters = self.resolve(params).await?;
        if filters.is_empty_selection() {
            debug!("Charging filters matched nothing");
            return Ok(0);
        }

        self.transactions
            .count_chargeable(
                &params.window,
                filters.service_ids.as_deref(),
                filters.account_ids.as_deref(),
                params.force_recalculate,
            )
            .await
    }

    /// Run one charging pass and return the number of transactions charged
    ///
    /// The update itself is a single atomic statement; the token is only
    /// consulted before it starts, since there is no meaningful intermediate
    /// state to stop at.
    #[instrument(skip(self, params, cancel))]
    pub async fn run(
        &self,
        params: &ChargeParameters,
        cancel: &CancellationToken,
    ) -> AppResult<u64> {
        params.validate()?;

        info!(
            "Charging pass over {} (force={}, discount={})",
            params.window, params.force_recalculate, params.discount
        );

        let filters = self.resolve(params).await?;
        if filters.is_empty_selection() {
            debug!("Charging filters matched nothing");
            return Ok(0);
        }

        if cancel.is_cancelled() {
            return Err(AppError::Cancelled);
        }

        let updated = self
            .transactions
            .apply_charges(
                &params.window,
                filters.service_ids.as_deref(),
                filters.account_ids.as_deref(),
                params.force_recalculate,
                params.multiplier(),
            )
            .await?;

        info!("Charged {} transactions", updated);

        Ok(updated)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{Duration, Utc};
    use rust_decimal::Decimal;
    use rust_decimal_macros::dec;
    use std::sync::Mutex;
    use tally_core::models::{
        NewService, NewSystem, NewTransaction, Service, System, Transaction, TransactionDetail,
    };
    use tally_core::selection::{AccountFilter, MatchScheme, ServiceFilter, TimeWindow};

    struct MockServiceRepo {
        ids: Option<Vec<i64>>,
    }

    #[async_trait]
    impl ServiceRepository for MockServiceRepo {
        async fn find_by_id(&self, _id: i64) -> AppResult<Option<Service>> {
            unimplemented!()
        }
        async fn find_by_name(&self, _name: &str) -> AppResult<Option<Service>> {
            unimplemented!()
        }
        async fn find_system_by_name(&self, _name: &str) -> AppResult<Option<System>> {
            unimplemented!()
        }
        async fn create_system(&self, _system: &NewSystem) -> AppResult<System> {
            unimplemented!()
        }
        async fn create(&self, _service: &NewService) -> AppResult<Service> {
            unimplemented!()
        }
        async fn ids_for_filter(
            &self,
            filter: &ServiceFilter,
            _scheme: MatchScheme,
        ) -> AppResult<Option<Vec<i64>>> {
            if filter.is_any() {
                Ok(None)
            } else {
                Ok(self.ids.clone())
            }
        }
    }

    struct MockAccountRepo;

    #[async_trait]
    impl AccountRepository for MockAccountRepo {
        async fn find_by_id(&self, _id: i64) -> AppResult<Option<tally_core::models::Account>> {
            unimplemented!()
        }
        async fn find_by_name(
            &self,
            _project_id: i64,
            _name: &str,
        ) -> AppResult<Option<tally_core::models::Account>> {
            unimplemented!()
        }
        async fn create(
            &self,
            _account: &tally_core::models::NewAccount,
        ) -> AppResult<tally_core::models::Account> {
            unimplemented!()
        }
        async fn next_index(&self, _prefix: &str) -> AppResult<i64> {
            unimplemented!()
        }
        async fn active_for_project(
            &self,
            _project_id: i64,
        ) -> AppResult<Vec<tally_core::models::Account>> {
            unimplemented!()
        }
        async fn latest_active_for_project(
            &self,
            _project_id: i64,
        ) -> AppResult<Option<tally_core::models::Account>> {
            unimplemented!()
        }
        async fn ids_for_filter(
            &self,
            _filter: &AccountFilter,
            _scheme: MatchScheme,
        ) -> AppResult<Option<Vec<i64>>> {
            Ok(None)
        }
        async fn grant_service(&self, _account_id: i64, _service_id: i64) -> AppResult<()> {
            unimplemented!()
        }
        async fn revoke_service(&self, _account_id: i64, _service_id: i64) -> AppResult<()> {
            unimplemented!()
        }
        async fn deactivate(&self, _id: i64) -> AppResult<bool> {
            unimplemented!()
        }
    }

    #[derive(Default)]
    struct MockTransactionRepo {
        applied: Mutex<Vec<(bool, Decimal)>>,
    }

    #[async_trait]
    impl TransactionRepository for MockTransactionRepo {
        async fn find_by_id(&self, _id: i64) -> AppResult<Option<Transaction>> {
            unimplemented!()
        }
        async fn create(&self, _tx: &NewTransaction) -> AppResult<Transaction> {
            unimplemented!()
        }
        async fn count_chargeable(
            &self,
            _window: &TimeWindow,
            _service_ids: Option<&[i64]>,
            _account_ids: Option<&[i64]>,
            _force_recalculate: bool,
        ) -> AppResult<i64> {
            Ok(42)
        }
        async fn apply_charges(
            &self,
            _window: &TimeWindow,
            _service_ids: Option<&[i64]>,
            _account_ids: Option<&[i64]>,
            force_recalculate: bool,
            multiplier: Decimal,
        ) -> AppResult<u64> {
            self.applied
                .lock()
                .unwrap()
                .push((force_recalculate, multiplier));
            Ok(7)
        }
        async fn for_invoicing(
            &self,
            _account_id: i64,
            _window: &TimeWindow,
        ) -> AppResult<Vec<TransactionDetail>> {
            unimplemented!()
        }
        async fn void(&self, _id: i64) -> AppResult<bool> {
            unimplemented!()
        }
    }

    fn engine(
        service_ids: Option<Vec<i64>>,
    ) -> (
        ChargingEngine<MockServiceRepo, MockAccountRepo, MockTransactionRepo>,
        Arc<MockTransactionRepo>,
    ) {
        let transactions = Arc::new(MockTransactionRepo::default());
        let engine = ChargingEngine::new(
            Arc::new(MockServiceRepo { ids: service_ids }),
            Arc::new(MockAccountRepo),
            Arc::clone(&transactions),
        );
        (engine, transactions)
    }

    fn params() -> ChargeParameters {
        let start = Utc::now();
        let window = TimeWindow::new(start, start + Duration::days(30)).unwrap();
        ChargeParameters::for_window(window)
    }

    #[tokio::test]
    async fn test_run_passes_discount_multiplier() {
        let (engine, transactions) = engine(None);
        let mut p = params();
        p.discount = dec!(0.25);

        let updated = engine.run(&p, &CancellationToken::new()).await.unwrap();
        assert_eq!(updated, 7);

        let applied = transactions.applied.lock().unwrap();
        assert_eq!(applied.as_slice(), &[(false, dec!(0.75))]);
    }

    #[tokio::test]
    async fn test_invalid_discount_rejected_before_store_access() {
        let (engine, transactions) = engine(None);
        let mut p = params();
        p.discount = dec!(1.0);

        let result = engine.run(&p, &CancellationToken::new()).await;
        assert!(matches!(result, Err(AppError::InvalidDiscount(_))));
        assert!(transactions.applied.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_empty_filter_selection_charges_nothing() {
        let (engine, transactions) = engine(Some(vec![]));
        let mut p = params();
        p.services = ServiceFilter::Services(vec!["nosuch".to_string()]);

        let updated = engine.run(&p, &CancellationToken::new()).await.unwrap();
        assert_eq!(updated, 0);
        assert!(transactions.applied.lock().unwrap().is_empty());

        assert_eq!(engine.preview(&p).await.unwrap(), 0);
    }

    #[tokio::test]
    async fn test_cancelled_before_update() {
        let (engine, transactions) = engine(None);
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = engine.run(&params(), &cancel).await;
        assert!(matches!(result, Err(AppError::Cancelled)));
        assert!(transactions.applied.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_preview_counts() {
        let (engine, _) = engine(None);
        assert_eq!(engine.preview(&params()).await.unwrap(), 42);
    }
}
