//! Common traits for the ledger store repositories
//!
//! Defines the abstractions the engines and ledger services are written
//! against. All mutation of the ledger goes through these traits; entities
//! are only ever deactivated, never physically deleted.

use async_trait::async_trait;
use rust_decimal::Decimal;

use crate::error::AppError;
use crate::models::{
    Account, BalanceSheet, Invoice, Job, MembershipEvent, MembershipEventType, NewAccount,
    NewBalanceSheet, NewJob, NewProject, NewService, NewStorageCommitment, NewSystem,
    NewTransaction, NewUser, Project, Service, StorageCommitment, System, Transaction,
    TransactionDetail, User,
};
use crate::selection::{AccountFilter, MatchScheme, ServiceFilter, TimeWindow};

/// User repository trait
#[async_trait]
pub trait UserRepository: Send + Sync {
    /// Find user by id
    async fn find_by_id(&self, id: i64) -> Result<Option<User>, AppError>;

    /// Find user by unique name
    async fn find_by_name(&self, name: &str) -> Result<Option<User>, AppError>;

    /// Create a new user
    async fn create(&self, user: &NewUser) -> Result<User, AppError>;

    /// Deactivate a user; returns whether a row changed
    async fn deactivate(&self, id: i64) -> Result<bool, AppError>;
}

/// Project repository trait
///
/// Membership mutations write their audit event atomically with the
/// membership change itself; there is no hidden observer.
#[async_trait]
pub trait ProjectRepository: Send + Sync {
    /// Find project by id
    async fn find_by_id(&self, id: i64) -> Result<Option<Project>, AppError>;

    /// Find project by unique name
    async fn find_by_name(&self, name: &str) -> Result<Option<Project>, AppError>;

    /// Create a new project
    async fn create(&self, project: &NewProject) -> Result<Project, AppError>;

    /// Next unused integer suffix among project names containing `prefix`
    async fn next_index(&self, prefix: &str) -> Result<i64, AppError>;

    /// Deactivate a project; returns whether a row changed
    async fn deactivate(&self, id: i64) -> Result<bool, AppError>;

    /// Add a member and record the ADDMEM event in the same operation
    async fn add_member(&self, project_id: i64, user_id: i64) -> Result<(), AppError>;

    /// Remove a member and record the REMOVEMEM event in the same operation
    async fn remove_member(&self, project_id: i64, user_id: i64) -> Result<(), AppError>;

    /// Add a manager and record the ADDMGR event in the same operation
    async fn add_manager(&self, project_id: i64, user_id: i64) -> Result<(), AppError>;

    /// Remove a manager and record the REMOVEMGR event in the same operation
    async fn remove_manager(&self, project_id: i64, user_id: i64) -> Result<(), AppError>;

    /// Whether the user is a manager of the project
    async fn is_manager(&self, project_id: i64, user_id: i64) -> Result<bool, AppError>;

    /// Record a membership event on its own (e.g. NEWPI at creation)
    async fn record_event(
        &self,
        project_id: i64,
        user_id: i64,
        event_type: MembershipEventType,
    ) -> Result<MembershipEvent, AppError>;
}

/// Account repository trait
#[async_trait]
pub trait AccountRepository: Send + Sync {
    /// Find account by id
    async fn find_by_id(&self, id: i64) -> Result<Option<Account>, AppError>;

    /// Find account by name within a project
    async fn find_by_name(&self, project_id: i64, name: &str)
        -> Result<Option<Account>, AppError>;

    /// Create a new account
    ///
    /// A name collision within the project surfaces as `AlreadyExists`; the
    /// index allocator relies on this to detect lost races.
    async fn create(&self, account: &NewAccount) -> Result<Account, AppError>;

    /// Next unused integer suffix among account names containing `prefix`
    async fn next_index(&self, prefix: &str) -> Result<i64, AppError>;

    /// All active accounts of a project
    async fn active_for_project(&self, project_id: i64) -> Result<Vec<Account>, AppError>;

    /// Most recently created active account of a project
    async fn latest_active_for_project(&self, project_id: i64)
        -> Result<Option<Account>, AppError>;

    /// Resolve an account filter to a set of active account ids
    ///
    /// `None` means "any account" (no narrowing).
    async fn ids_for_filter(
        &self,
        filter: &AccountFilter,
        scheme: MatchScheme,
    ) -> Result<Option<Vec<i64>>, AppError>;

    /// Grant a service to an account
    async fn grant_service(&self, account_id: i64, service_id: i64) -> Result<(), AppError>;

    /// Revoke a service from an account
    async fn revoke_service(&self, account_id: i64, service_id: i64) -> Result<(), AppError>;

    /// Deactivate an account; returns whether a row changed
    async fn deactivate(&self, id: i64) -> Result<bool, AppError>;
}

/// System/service repository trait
#[async_trait]
pub trait ServiceRepository: Send + Sync {
    /// Find service by id
    async fn find_by_id(&self, id: i64) -> Result<Option<Service>, AppError>;

    /// Find service by name
    async fn find_by_name(&self, name: &str) -> Result<Option<Service>, AppError>;

    /// Find system by unique name
    async fn find_system_by_name(&self, name: &str) -> Result<Option<System>, AppError>;

    /// Create a new system
    async fn create_system(&self, system: &NewSystem) -> Result<System, AppError>;

    /// Create a new service
    async fn create(&self, service: &NewService) -> Result<Service, AppError>;

    /// Resolve a service filter to a set of active service ids
    ///
    /// `None` means "any service" (no narrowing).
    async fn ids_for_filter(
        &self,
        filter: &ServiceFilter,
        scheme: MatchScheme,
    ) -> Result<Option<Vec<i64>>, AppError>;
}

/// Transaction repository trait
#[async_trait]
pub trait TransactionRepository: Send + Sync {
    /// Find transaction by id
    async fn find_by_id(&self, id: i64) -> Result<Option<Transaction>, AppError>;

    /// Create a new transaction
    async fn create(&self, tx: &NewTransaction) -> Result<Transaction, AppError>;

    /// Count the transactions a charging pass with these inputs would touch
    async fn count_chargeable(
        &self,
        window: &TimeWindow,
        service_ids: Option<&[i64]>,
        account_ids: Option<&[i64]>,
        force_recalculate: bool,
    ) -> Result<i64, AppError>;

    /// Apply the charge calculation as one atomic set-oriented update
    ///
    /// Selects active transactions created within `window`, optionally
    /// narrowed to the given service/account id sets, and — unless
    /// `force_recalculate` — to rows with `amt_charged = 0`. Writes
    /// `amt_charged = amt_used * charge_rate * multiplier` and returns the
    /// number of rows updated. No other column is touched.
    async fn apply_charges(
        &self,
        window: &TimeWindow,
        service_ids: Option<&[i64]>,
        account_ids: Option<&[i64]>,
        force_recalculate: bool,
        multiplier: Decimal,
    ) -> Result<u64, AppError>;

    /// All transactions of an account within the window, for invoicing
    ///
    /// Deliberately includes voided (`active = false`) rows: invoicing sees
    /// the full history, unlike the charging selection.
    async fn for_invoicing(
        &self,
        account_id: i64,
        window: &TimeWindow,
    ) -> Result<Vec<TransactionDetail>, AppError>;

    /// Soft-void a transaction; returns whether a row changed
    async fn void(&self, id: i64) -> Result<bool, AppError>;
}

/// Job repository trait
#[async_trait]
pub trait JobRepository: Send + Sync {
    /// Find job by scheduler id
    async fn find_by_jobid(&self, jobid: &str) -> Result<Option<Job>, AppError>;

    /// Record a new job; a jobid collision surfaces as `DuplicateJobId`
    async fn create(&self, job: &NewJob) -> Result<Job, AppError>;

    /// Link transactions documenting the job's resource consumption
    async fn attach_transactions(&self, job_id: i64, tx_ids: &[i64]) -> Result<(), AppError>;
}

/// Storage commitment repository trait
#[async_trait]
pub trait StorageRepository: Send + Sync {
    /// Find commitment by id
    async fn find_by_id(&self, id: i64) -> Result<Option<StorageCommitment>, AppError>;

    /// Record a new storage commitment
    async fn create(&self, commitment: &NewStorageCommitment)
        -> Result<StorageCommitment, AppError>;

    /// Link transactions documenting the commitment's usage
    async fn attach_transactions(
        &self,
        commitment_id: i64,
        tx_ids: &[i64],
    ) -> Result<(), AppError>;

    /// All commitments of a project
    async fn for_project(&self, project_id: i64) -> Result<Vec<StorageCommitment>, AppError>;
}

/// Invoice repository trait
#[async_trait]
pub trait InvoiceRepository: Send + Sync {
    /// Find invoice by id
    async fn find_by_id(&self, id: i64) -> Result<Option<Invoice>, AppError>;

    /// Create the invoice row for a project and billing period
    ///
    /// A second invoice for the same `(project, window)` surfaces as a
    /// retryable `Conflict`; this is the guard against concurrent invoice
    /// generation for the same period.
    async fn create(
        &self,
        project_id: i64,
        window: &TimeWindow,
        predecessor_id: Option<i64>,
    ) -> Result<Invoice, AppError>;

    /// The sheet a given invoice holds for a given account, if any
    async fn sheet_for_account(
        &self,
        invoice_id: i64,
        account_id: i64,
    ) -> Result<Option<BalanceSheet>, AppError>;

    /// Persist one balance sheet with its transaction set
    async fn create_sheet(&self, sheet: &NewBalanceSheet) -> Result<BalanceSheet, AppError>;

    /// All sheets of an invoice
    async fn sheets_for_invoice(&self, invoice_id: i64) -> Result<Vec<BalanceSheet>, AppError>;

    /// Walk the predecessor chain, most recent first, up to `limit` entries
    ///
    /// Cycle detection is the caller's responsibility; the bound keeps a
    /// corrupt chain from walking forever.
    async fn chain(&self, invoice_id: i64, limit: usize) -> Result<Vec<Invoice>, AppError>;

    /// Delete an invoice and its sheets (cleanup after a cancelled run)
    async fn delete(&self, invoice_id: i64) -> Result<bool, AppError>;
}
