//! Ledger service
//!
//! The creation interface of the accounting system: projects, accounts,
//! membership, service access, and usage recording. Name resolution happens
//! at the caller's boundary; everything here works on ids and typed
//! [`Target`] values.

use std::sync::Arc;

use chrono::{Duration, Utc};
use tally_core::{
    config::LedgerConfig,
    models::{
        Account, Job, MembershipEventType, NewAccount, NewJob, NewProject,
        NewStorageCommitment, NewTransaction, NewUser, Project, StorageCommitment, Transaction,
        TxType, User,
    },
    selection::Target,
    traits::{
        AccountRepository, JobRepository, ProjectRepository, ServiceRepository,
        StorageRepository, TransactionRepository, UserRepository,
    },
    AppError, AppResult,
};
use tracing::{debug, info, instrument, warn};

/// Ledger creation and recording service
pub struct LedgerService<U, P, A, S, T, J, St>
where
    U: UserRepository,
    P: ProjectRepository,
    A: AccountRepository,
    S: ServiceRepository,
    T: TransactionRepository,
    J: JobRepository,
    St: StorageRepository,
{
    users: Arc<U>,
    projects: Arc<P>,
    accounts: Arc<A>,
    services: Arc<S>,
    transactions: Arc<T>,
    jobs: Arc<J>,
    storage: Arc<St>,
    config: LedgerConfig,
}

impl<U, P, A, S, T, J, St> LedgerService<U, P, A, S, T, J, St>
where
    U: UserRepository,
    P: ProjectRepository,
    A: AccountRepository,
    S: ServiceRepository,
    T: TransactionRepository,
    J: JobRepository,
    St: StorageRepository,
{
    /// Create a new ledger service
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        users: Arc<U>,
        projects: Arc<P>,
        accounts: Arc<A>,
        services: Arc<S>,
        transactions: Arc<T>,
        jobs: Arc<J>,
        storage: Arc<St>,
        config: LedgerConfig,
    ) -> Self {
        Self {
            users,
            projects,
            accounts,
            services,
            transactions,
            jobs,
            storage,
            config,
        }
    }

    /// Create a new user
    #[instrument(skip(self, user))]
    pub async fn create_user(&self, user: &NewUser) -> AppResult<User> {
        self.users.create(user).await
    }

    /// Create a project, record the NEWPI event, and enroll the pi as the
    /// first member
    ///
    /// With `with_default_account` an account is created as well, named
    /// `account_name` or auto-named by the allocator, expiring after
    /// `account_duration`.
    #[instrument(skip(self, project, account_name, account_duration))]
    pub async fn create_project(
        &self,
        project: &NewProject,
        with_default_account: bool,
        account_name: Option<String>,
        account_duration: Option<Duration>,
    ) -> AppResult<Project> {
        let created = self.projects.create(project).await?;
        info!("Created project {} ({})", created.name, created.id);

        self.projects
            .record_event(created.id, created.pi_id, MembershipEventType::NewPi)
            .await?;
        self.projects.add_member(created.id, created.pi_id).await?;

        if with_default_account {
            self.create_account(created.id, account_name, account_duration)
                .await?;
        }

        Ok(created)
    }

    /// Create an account, auto-naming it `{project}-{index}` when no name is
    /// given
    ///
    /// Auto-naming recomputes the index and retries on a name collision, up
    /// to the configured attempt bound; exhausting it surfaces
    /// `IndexContention`. Accounts expire after `duration` (default from
    /// configuration).
    #[instrument(skip(self, duration))]
    pub async fn create_account(
        &self,
        project_id: i64,
        name: Option<String>,
        duration: Option<Duration>,
    ) -> AppResult<Account> {
        let project = self
            .projects
            .find_by_id(project_id)
            .await?
            .ok_or_else(|| AppError::ProjectNotFound(project_id.to_string()))?;

        let duration =
            duration.unwrap_or_else(|| Duration::days(self.config.default_account_duration_days));
        let expires = Some(Utc::now() + duration);

        if let Some(name) = name {
            return self
                .accounts
                .create(&NewAccount {
                    name,
                    project_id,
                    expires,
                })
                .await;
        }

        let attempts = self.config.index_allocation_attempts;
        for attempt in 1..=attempts {
            let index = self.accounts.next_index(&project.name).await?;
            let candidate = format!("{}-{}", project.name, index);

            match self
                .accounts
                .create(&NewAccount {
                    name: candidate.clone(),
                    project_id,
                    expires,
                })
                .await
            {
                Ok(account) => {
                    debug!("Allocated account {} on attempt {}", account.name, attempt);
                    return Ok(account);
                }
                Err(AppError::AlreadyExists(_)) => {
                    // Lost the race to another allocator; recompute and retry
                    warn!(
                        "Account name {} taken, retrying ({}/{})",
                        candidate, attempt, attempts
                    );
                }
                Err(e) => return Err(e),
            }
        }

        Err(AppError::IndexContention {
            prefix: project.name,
            attempts,
        })
    }

    /// Add a user to a project's members
    #[instrument(skip(self))]
    pub async fn add_user_to_project(&self, project_id: i64, user_id: i64) -> AppResult<()> {
        self.projects.add_member(project_id, user_id).await
    }

    /// Remove a user from a project's members
    #[instrument(skip(self))]
    pub async fn remove_user_from_project(&self, project_id: i64, user_id: i64) -> AppResult<()> {
        self.projects.remove_member(project_id, user_id).await
    }

    /// Add a manager to a project
    #[instrument(skip(self))]
    pub async fn add_manager(&self, project_id: i64, user_id: i64) -> AppResult<()> {
        self.projects.add_manager(project_id, user_id).await
    }

    /// Remove a manager from a project
    #[instrument(skip(self))]
    pub async fn remove_manager(&self, project_id: i64, user_id: i64) -> AppResult<()> {
        self.projects.remove_manager(project_id, user_id).await
    }

    /// Whether the user may edit the project (pi or manager)
    #[instrument(skip(self))]
    pub async fn can_edit(&self, project_id: i64, user_id: i64) -> AppResult<bool> {
        let project = self
            .projects
            .find_by_id(project_id)
            .await?
            .ok_or_else(|| AppError::ProjectNotFound(project_id.to_string()))?;

        if project.pi_id == user_id {
            return Ok(true);
        }
        self.projects.is_manager(project_id, user_id).await
    }

    /// The accounts an access change fans out over
    async fn accounts_for_target(&self, target: Target) -> AppResult<Vec<Account>> {
        match target {
            Target::Account(id) => {
                let account = self
                    .accounts
                    .find_by_id(id)
                    .await?
                    .ok_or_else(|| AppError::AccountNotFound(id.to_string()))?;
                Ok(vec![account])
            }
            Target::Project(id) => {
                // Existence check first: a project with no active accounts is
                // a valid (empty) fan-out, an unknown project is an error
                self.projects
                    .find_by_id(id)
                    .await?
                    .ok_or_else(|| AppError::ProjectNotFound(id.to_string()))?;
                self.accounts.active_for_project(id).await
            }
        }
    }

    async fn change_service_access(
        &self,
        service_id: i64,
        target: Target,
        tx_type: TxType,
    ) -> AppResult<Vec<Transaction>> {
        let service = self
            .services
            .find_by_id(service_id)
            .await?
            .ok_or_else(|| AppError::ServiceNotFound(service_id.to_string()))?;

        let accounts = self.accounts_for_target(target).await?;
        let mut sentinels = Vec::with_capacity(accounts.len());

        for account in &accounts {
            let project = self
                .projects
                .find_by_id(account.project_id)
                .await?
                .ok_or_else(|| AppError::ProjectNotFound(account.project_id.to_string()))?;

            match tx_type {
                TxType::Grant => {
                    self.accounts.grant_service(account.id, service.id).await?;
                }
                TxType::Revoke => {
                    self.accounts.revoke_service(account.id, service.id).await?;
                }
                _ => {
                    return Err(AppError::Internal(format!(
                        "{} is not an access-change type",
                        tx_type
                    )))
                }
            }

            let sentinel = self
                .transactions
                .create(&NewTransaction::sentinel(
                    service.id,
                    account.id,
                    project.pi_id,
                    tx_type,
                ))
                .await?;
            debug!(
                "Recorded {} sentinel {} for account {}",
                tx_type, sentinel.id, account.name
            );
            sentinels.push(sentinel);
        }

        info!(
            "{} service {} across {} accounts",
            tx_type,
            service.name,
            sentinels.len()
        );

        Ok(sentinels)
    }

    /// Grant a service to the target, emitting one GRANT sentinel per
    /// touched account (a project target fans out over its active accounts)
    #[instrument(skip(self))]
    pub async fn grant_service_access(
        &self,
        service_id: i64,
        target: Target,
    ) -> AppResult<Vec<Transaction>> {
        self.change_service_access(service_id, target, TxType::Grant)
            .await
    }

    /// Revoke a service from the target, emitting one REVOKE sentinel per
    /// touched account
    #[instrument(skip(self))]
    pub async fn revoke_service_access(
        &self,
        service_id: i64,
        target: Target,
    ) -> AppResult<Vec<Transaction>> {
        self.change_service_access(service_id, target, TxType::Revoke)
            .await
    }

    /// Record a usage transaction against the target
    ///
    /// A project target resolves to its most recently created active
    /// account; a project without one is an error.
    #[instrument(skip(self, tx))]
    pub async fn record_transaction(
        &self,
        target: Target,
        mut tx: NewTransaction,
    ) -> AppResult<Transaction> {
        let account = match target {
            Target::Account(id) => self
                .accounts
                .find_by_id(id)
                .await?
                .ok_or_else(|| AppError::AccountNotFound(id.to_string()))?,
            Target::Project(id) => self
                .accounts
                .latest_active_for_project(id)
                .await?
                .ok_or_else(|| {
                    AppError::NotFound(format!("project {} has no active account", id))
                })?,
        };

        tx.account_id = account.id;
        self.transactions.create(&tx).await
    }

    /// Record a job and attach the transactions documenting its consumption
    #[instrument(skip(self, job, tx_ids))]
    pub async fn record_job(&self, job: &NewJob, tx_ids: &[i64]) -> AppResult<Job> {
        let created = self.jobs.create(job).await?;
        if !tx_ids.is_empty() {
            self.jobs.attach_transactions(created.id, tx_ids).await?;
        }
        Ok(created)
    }

    /// Record a storage commitment and attach its usage transactions
    #[instrument(skip(self, commitment, tx_ids))]
    pub async fn record_storage_commitment(
        &self,
        commitment: &NewStorageCommitment,
        tx_ids: &[i64],
    ) -> AppResult<StorageCommitment> {
        let created = self.storage.create(commitment).await?;
        if !tx_ids.is_empty() {
            self.storage.attach_transactions(created.id, tx_ids).await?;
        }
        Ok(created)
    }
}
