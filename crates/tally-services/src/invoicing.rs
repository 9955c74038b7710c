//! Invoicing engine
//!
//! Generates an invoice for one project and billing period: one balance
//! sheet per active account, each folding the account's full in-window
//! transaction history (voided rows included) on top of the balance carried
//! forward from the predecessor invoice.
//!
//! The invoice row is created first, so a concurrent generation attempt for
//! the same period fails fast on the duplicate-invoice constraint.
//! Cancellation is honored between accounts; sheets already persisted remain
//! valid, and a rerun conflicts on the duplicate invoice.

use std::sync::Arc;

use rust_decimal::Decimal;
use tally_core::{
    models::{InvoiceWithSheets, NewBalanceSheet, SheetContents, TransactionDetail, TxType},
    selection::TimeWindow,
    traits::{AccountRepository, InvoiceRepository, ProjectRepository, TransactionRepository},
    AppError, AppResult,
};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::constants::MAX_CHAIN_LENGTH;

/// Result of folding one account's transactions
#[derive(Debug, Clone)]
pub struct SheetFold {
    pub balance: Decimal,
    pub contents: SheetContents,
    pub transaction_ids: Vec<i64>,
}

/// Fold a transaction history into sheet contents and a closing balance
///
/// DEBIT contributes `(+used, +charged)`, CREDIT `(-used, -charged)`; AUDIT
/// and the GRANT/REVOKE sentinels contribute nothing to the contents or the
/// balance but are still recorded in the transaction set.
pub fn fold_transactions(details: &[TransactionDetail], opening_balance: Decimal) -> SheetFold {
    let mut balance = opening_balance;
    let mut contents = SheetContents::new();
    let mut transaction_ids = Vec::with_capacity(details.len());

    for detail in details {
        let tx = &detail.transaction;
        transaction_ids.push(tx.id);

        // AUDIT and the sentinels are recorded but contribute nothing
        if !matches!(tx.tx_type, TxType::Debit | TxType::Credit) {
            continue;
        }

        let (used, charged) = tx.tx_type.signed_amounts(tx.amt_used, tx.amt_charged);
        contents.record(&detail.creator_name, &detail.service_name, used, charged);
        balance += charged;
    }

    SheetFold {
        balance,
        contents,
        transaction_ids,
    }
}

/// Batch invoicing engine
pub struct InvoicingEngine<P, A, T, I>
where
    P: ProjectRepository,
    A: AccountRepository,
    T: TransactionRepository,
    I: InvoiceRepository,
{
    projects: Arc<P>,
    accounts: Arc<A>,
    transactions: Arc<T>,
    invoices: Arc<I>,
}

impl<P, A, T, I> InvoicingEngine<P, A, T, I>
where
    P: ProjectRepository,
    A: AccountRepository,
    T: TransactionRepository,
    I: InvoiceRepository,
{
    /// Create a new invoicing engine
    pub fn new(projects: Arc<P>, accounts: Arc<A>, transactions: Arc<T>, invoices: Arc<I>) -> Self {
        Self {
            projects,
            accounts,
            transactions,
            invoices,
        }
    }

    /// Generate the invoice for one project over one billing period
    #[instrument(skip(self, window, cancel))]
    pub async fn generate(
        &self,
        project_id: i64,
        window: &TimeWindow,
        predecessor_id: Option<i64>,
        cancel: &CancellationToken,
    ) -> AppResult<InvoiceWithSheets> {
        let project = self
            .projects
            .find_by_id(project_id)
            .await?
            .ok_or_else(|| AppError::ProjectNotFound(project_id.to_string()))?;

        if let Some(pred_id) = predecessor_id {
            let predecessor = self
                .invoices
                .find_by_id(pred_id)
                .await?
                .ok_or_else(|| AppError::InvoiceNotFound(pred_id.to_string()))?;
            if predecessor.project_id != project.id {
                return Err(AppError::PredecessorMismatch {
                    invoice_id: pred_id,
                    project: project.name.clone(),
                });
            }
        }

        info!("Generating invoice for project {} over {}", project.name, window);

        // Created first: a concurrent run for the same period conflicts here
        let invoice = self
            .invoices
            .create(project_id, window, predecessor_id)
            .await?;

        let accounts = self.accounts.active_for_project(project_id).await?;
        debug!("Folding {} active accounts", accounts.len());

        let mut sheets = Vec::with_capacity(accounts.len());
        for account in &accounts {
            if cancel.is_cancelled() {
                warn!(
                    "Invoice {} cancelled after {} of {} sheets",
                    invoice.id,
                    sheets.len(),
                    accounts.len()
                );
                return Err(AppError::Cancelled);
            }

            let opening_balance = match predecessor_id {
                Some(pred_id) => self
                    .invoices
                    .sheet_for_account(pred_id, account.id)
                    .await?
                    .map(|sheet| sheet.balance)
                    .unwrap_or(Decimal::ZERO),
                None => Decimal::ZERO,
            };

            let details = self.transactions.for_invoicing(account.id, window).await?;
            let fold = fold_transactions(&details, opening_balance);

            debug!(
                "Account {}: {} transactions, balance {}",
                account.name,
                fold.transaction_ids.len(),
                fold.balance
            );

            let sheet = self
                .invoices
                .create_sheet(&NewBalanceSheet {
                    invoice_id: invoice.id,
                    account_id: account.id,
                    balance: fold.balance,
                    contents: fold.contents,
                    transaction_ids: fold.transaction_ids,
                })
                .await?;
            sheets.push(sheet);
        }

        info!(
            "Generated invoice {} with {} balance sheets",
            invoice.id,
            sheets.len()
        );

        Ok(InvoiceWithSheets { invoice, sheets })
    }

    /// Walk an invoice's predecessor chain, most recent first
    #[instrument(skip(self))]
    pub async fn chain(&self, invoice_id: i64) -> AppResult<Vec<tally_core::models::Invoice>> {
        self.invoices.chain(invoice_id, MAX_CHAIN_LENGTH).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use async_trait::async_trait;
    use chrono::{DateTime, Duration, Utc};
    use rust_decimal_macros::dec;
    use std::sync::Mutex;
    use tally_core::models::{
        Account, BalanceSheet, Invoice, MembershipEvent, MembershipEventType, NewAccount,
        NewProject, NewTransaction, Project, Transaction, TxType,
    };
    use tally_core::selection::{AccountFilter, MatchScheme};

    fn detail(id: i64, tx_type: TxType, used: Decimal, charged: Decimal) -> TransactionDetail {
        TransactionDetail {
            transaction: Transaction {
                id,
                created: Utc::now(),
                active: true,
                service_id: 1,
                account_id: 1,
                creator_id: 1,
                amt_used: used,
                amt_charged: charged,
                tx_type,
            },
            creator_name: "alice".to_string(),
            service_name: "cpu".to_string(),
        }
    }

    #[test]
    fn test_fold_carries_forward_with_no_transactions() {
        let fold = fold_transactions(&[], dec!(100.0));
        assert_eq!(fold.balance, dec!(100.0));
        assert!(fold.contents.is_empty());
        assert!(fold.transaction_ids.is_empty());

        let fold = fold_transactions(&[], Decimal::ZERO);
        assert_eq!(fold.balance, Decimal::ZERO);
    }

    #[test]
    fn test_fold_debit_and_credit() {
        let details = vec![
            detail(1, TxType::Debit, dec!(10), dec!(5.0)),
            detail(2, TxType::Credit, dec!(4), dec!(2.0)),
        ];

        let fold = fold_transactions(&details, Decimal::ZERO);
        assert_eq!(fold.balance, dec!(3.0));
        assert_eq!(fold.transaction_ids, vec![1, 2]);

        let totals = fold.contents.get("alice", "cpu").unwrap();
        assert_eq!(totals.usage, dec!(6));
        assert_eq!(totals.charged, dec!(3.0));
    }

    #[test]
    fn test_fold_excludes_zero_contribution_types_from_contents() {
        let details = vec![
            detail(1, TxType::Audit, dec!(50), dec!(0)),
            detail(2, TxType::Grant, dec!(0), dec!(0)),
            detail(3, TxType::Revoke, dec!(0), dec!(0)),
            detail(4, TxType::Debit, dec!(2), dec!(1.0)),
        ];

        let fold = fold_transactions(&details, dec!(10.0));
        assert_eq!(fold.balance, dec!(11.0));
        // All four ids are recorded, only the DEBIT touched the contents
        assert_eq!(fold.transaction_ids, vec![1, 2, 3, 4]);
        let totals = fold.contents.get("alice", "cpu").unwrap();
        assert_eq!(totals.usage, dec!(2));
        assert_eq!(totals.charged, dec!(1.0));
    }

    #[test]
    fn test_fold_includes_voided_rows() {
        let mut voided = detail(1, TxType::Debit, dec!(10), dec!(5.0));
        voided.transaction.active = false;

        let fold = fold_transactions(&[voided], Decimal::ZERO);
        assert_eq!(fold.balance, dec!(5.0));
        assert_eq!(fold.transaction_ids, vec![1]);
    }

    // ==================== Mock repositories ====================

    struct MockProjectRepo {
        project: Project,
    }

    #[async_trait]
    impl ProjectRepository for MockProjectRepo {
        async fn find_by_id(&self, id: i64) -> AppResult<Option<Project>> {
            Ok((id == self.project.id).then(|| self.project.clone()))
        }
        async fn find_by_name(&self, _name: &str) -> AppResult<Option<Project>> {
            unimplemented!()
        }
        async fn create(&self, _project: &NewProject) -> AppResult<Project> {
            unimplemented!()
        }
        async fn next_index(&self, _prefix: &str) -> AppResult<i64> {
            unimplemented!()
        }
        async fn deactivate(&self, _id: i64) -> AppResult<bool> {
            unimplemented!()
        }
        async fn add_member(&self, _project_id: i64, _user_id: i64) -> AppResult<()> {
            unimplemented!()
        }
        async fn remove_member(&self, _project_id: i64, _user_id: i64) -> AppResult<()> {
            unimplemented!()
        }
        async fn add_manager(&self, _project_id: i64, _user_id: i64) -> AppResult<()> {
            unimplemented!()
        }
        async fn remove_manager(&self, _project_id: i64, _user_id: i64) -> AppResult<()> {
            unimplemented!()
        }
        async fn is_manager(&self, _project_id: i64, _user_id: i64) -> AppResult<bool> {
            unimplemented!()
        }
        async fn record_event(
            &self,
            _project_id: i64,
            _user_id: i64,
            _event_type: MembershipEventType,
        ) -> AppResult<MembershipEvent> {
            unimplemented!()
        }
    }

    struct MockAccountRepo {
        accounts: Vec<Account>,
    }

    #[async_trait]
    impl AccountRepository for MockAccountRepo {
        async fn find_by_id(&self, _id: i64) -> AppResult<Option<Account>> {
            unimplemented!()
        }
        async fn find_by_name(&self, _project_id: i64, _name: &str) -> AppResult<Option<Account>> {
            unimplemented!()
        }
        async fn create(&self, _account: &NewAccount) -> AppResult<Account> {
            unimplemented!()
        }
        async fn next_index(&self, _prefix: &str) -> AppResult<i64> {
            unimplemented!()
        }
        async fn active_for_project(&self, _project_id: i64) -> AppResult<Vec<Account>> {
            Ok(self.accounts.clone())
        }
        async fn latest_active_for_project(&self, _project_id: i64) -> AppResult<Option<Account>> {
            unimplemented!()
        }
        async fn ids_for_filter(
            &self,
            _filter: &AccountFilter,
            _scheme: MatchScheme,
        ) -> AppResult<Option<Vec<i64>>> {
            unimplemented!()
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

    struct MockTransactionRepo {
        details: Vec<TransactionDetail>,
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
            unimplemented!()
        }
        async fn apply_charges(
            &self,
            _window: &TimeWindow,
            _service_ids: Option<&[i64]>,
            _account_ids: Option<&[i64]>,
            _force_recalculate: bool,
            _multiplier: Decimal,
        ) -> AppResult<u64> {
            unimplemented!()
        }
        async fn for_invoicing(
            &self,
            account_id: i64,
            _window: &TimeWindow,
        ) -> AppResult<Vec<TransactionDetail>> {
            Ok(self
                .details
                .iter()
                .filter(|d| d.transaction.account_id == account_id)
                .cloned()
                .collect())
        }
        async fn void(&self, _id: i64) -> AppResult<bool> {
            unimplemented!()
        }
    }

    #[derive(Default)]
    struct MockInvoiceRepo {
        predecessor: Option<Invoice>,
        predecessor_sheets: Vec<BalanceSheet>,
        created_sheets: Mutex<Vec<NewBalanceSheet>>,
    }

    #[async_trait]
    impl InvoiceRepository for MockInvoiceRepo {
        async fn find_by_id(&self, id: i64) -> AppResult<Option<Invoice>> {
            Ok(self.predecessor.clone().filter(|p| p.id == id))
        }
        async fn create(
            &self,
            project_id: i64,
            window: &TimeWindow,
            predecessor_id: Option<i64>,
        ) -> AppResult<Invoice> {
            Ok(Invoice {
                id: 99,
                created: Utc::now(),
                start_time: window.start(),
                end_time: window.end(),
                project_id,
                predecessor_id,
            })
        }
        async fn sheet_for_account(
            &self,
            invoice_id: i64,
            account_id: i64,
        ) -> AppResult<Option<BalanceSheet>> {
            Ok(self
                .predecessor_sheets
                .iter()
                .find(|s| s.invoice_id == invoice_id && s.account_id == account_id)
                .cloned())
        }
        async fn create_sheet(&self, sheet: &NewBalanceSheet) -> AppResult<BalanceSheet> {
            let mut created = self.created_sheets.lock().unwrap();
            created.push(sheet.clone());
            Ok(BalanceSheet {
                id: created.len() as i64,
                invoice_id: sheet.invoice_id,
                account_id: sheet.account_id,
                balance: sheet.balance,
                contents: sheet.contents.clone(),
                transaction_ids: sheet.transaction_ids.clone(),
            })
        }
        async fn sheets_for_invoice(&self, _invoice_id: i64) -> AppResult<Vec<BalanceSheet>> {
            unimplemented!()
        }
        async fn chain(&self, _invoice_id: i64, _limit: usize) -> AppResult<Vec<Invoice>> {
            unimplemented!()
        }
        async fn delete(&self, _invoice_id: i64) -> AppResult<bool> {
            unimplemented!()
        }
    }

    fn project() -> Project {
        Project {
            id: 1,
            created: Utc::now(),
            name: "proj".to_string(),
            ldap_group: String::new(),
            active: true,
            parent_id: None,
            pi_id: 1,
            description: String::new(),
        }
    }

    fn account(id: i64) -> Account {
        Account {
            id,
            created: Utc::now(),
            name: format!("proj-{}", id),
            active: true,
            expires: None,
            project_id: 1,
        }
    }

    fn window() -> TimeWindow {
        let start = Utc::now() - Duration::days(30);
        TimeWindow::new(start, start + Duration::days(30)).unwrap()
    }

    fn engine(
        accounts: Vec<Account>,
        details: Vec<TransactionDetail>,
        invoices: MockInvoiceRepo,
    ) -> (
        InvoicingEngine<MockProjectRepo, MockAccountRepo, MockTransactionRepo, MockInvoiceRepo>,
        Arc<MockInvoiceRepo>,
    ) {
        let invoices = Arc::new(invoices);
        let engine = InvoicingEngine::new(
            Arc::new(MockProjectRepo { project: project() }),
            Arc::new(MockAccountRepo { accounts }),
            Arc::new(MockTransactionRepo { details }),
            Arc::clone(&invoices),
        );
        (engine, invoices)
    }

    fn predecessor(id: i64, project_id: i64, sheet_balance: Decimal) -> MockInvoiceRepo {
        let created: DateTime<Utc> = Utc::now() - Duration::days(60);
        MockInvoiceRepo {
            predecessor: Some(Invoice {
                id,
                created,
                start_time: created,
                end_time: created + Duration::days(30),
                project_id,
                predecessor_id: None,
            }),
            predecessor_sheets: vec![BalanceSheet {
                id: 1,
                invoice_id: id,
                account_id: 1,
                balance: sheet_balance,
                contents: SheetContents::new(),
                transaction_ids: vec![],
            }],
            created_sheets: Mutex::new(vec![]),
        }
    }

    #[tokio::test]
    async fn test_generate_zero_active_accounts() {
        let (engine, _) = engine(vec![], vec![], MockInvoiceRepo::default());
        let result = engine
            .generate(1, &window(), None, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result.invoice.project_id, 1);
        assert!(result.sheets.is_empty());
    }

    #[tokio::test]
    async fn test_generate_carries_predecessor_balance() {
        let mut voided = detail(3, TxType::Debit, dec!(1), dec!(0.5));
        voided.transaction.active = false;

        let (engine, _) = engine(
            vec![account(1)],
            vec![
                detail(1, TxType::Debit, dec!(10), dec!(5.0)),
                detail(2, TxType::Credit, dec!(4), dec!(2.0)),
                voided,
            ],
            predecessor(7, 1, dec!(100.0)),
        );

        let result = engine
            .generate(1, &window(), Some(7), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(result.sheets.len(), 1);
        let sheet = &result.sheets[0];
        // 100 carried forward + 5 - 2 + 0.5 from the voided debit
        assert_eq!(sheet.balance, dec!(103.5));
        assert_eq!(sheet.transaction_ids, vec![1, 2, 3]);
    }

    #[tokio::test]
    async fn test_generate_rejects_foreign_predecessor() {
        let (engine, invoices) = engine(vec![account(1)], vec![], predecessor(7, 2, dec!(0)));

        let result = engine
            .generate(1, &window(), Some(7), &CancellationToken::new())
            .await;
        assert!(matches!(
            result,
            Err(AppError::PredecessorMismatch { invoice_id: 7, .. })
        ));
        assert!(invoices.created_sheets.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_generate_unknown_project() {
        let (engine, _) = engine(vec![], vec![], MockInvoiceRepo::default());
        let result = engine
            .generate(55, &window(), None, &CancellationToken::new())
            .await;
        assert!(matches!(result, Err(AppError::ProjectNotFound(_))));
    }

    #[tokio::test]
    async fn test_generate_cancelled_before_first_account() {
        let (engine, invoices) = engine(
            vec![account(1), account(2)],
            vec![],
            MockInvoiceRepo::default(),
        );
        let cancel = CancellationToken::new();
        cancel.cancel();

        let result = engine.generate(1, &window(), None, &cancel).await;
        assert!(matches!(result, Err(AppError::Cancelled)));
        assert!(invoices.created_sheets.lock().unwrap().is_empty());
    }
}
