//! Ledger store integration tests
//!
//! These exercise the repositories against a real PostgreSQL instance and
//! are ignored by default. Run with:
//!
//! ```sh
//! DATABASE_URL=postgresql://localhost/tally_test cargo test -p tally-db -- --ignored
//! ```

use chrono::{Duration, Utc};
use rust_decimal_macros::dec;
use tally_core::config::DatabaseConfig;
use tally_core::models::{
    NewAccount, NewJob, NewProject, NewService, NewStorageCommitment, NewSystem, NewTransaction,
    NewUser, TxType,
};
use tally_core::selection::{AccountFilter, MatchScheme, ServiceFilter, TimeWindow};
use tally_core::traits::{
    AccountRepository, InvoiceRepository, JobRepository, ProjectRepository, ServiceRepository,
    StorageRepository, TransactionRepository, UserRepository,
};
use tally_core::AppError;
use tally_db::{
    create_pool, run_migrations, PgAccountRepository, PgInvoiceRepository, PgJobRepository,
    PgProjectRepository, PgServiceRepository, PgStorageRepository, PgTransactionRepository,
    PgUserRepository, PgPool,
};

async fn test_pool() -> PgPool {
    let config = DatabaseConfig {
        url: std::env::var("DATABASE_URL")
            .unwrap_or_else(|_| "postgresql://localhost/tally_test".to_string()),
        max_connections: 5,
        min_connections: 1,
        acquire_timeout_secs: 5,
        idle_timeout_secs: 60,
    };
    let pool = create_pool(&config).await.unwrap();
    run_migrations(&pool).await.unwrap();
    pool
}

/// Unique suffix so reruns against the same database do not collide
fn tag() -> String {
    format!("{}", Utc::now().timestamp_micros())
}

#[tokio::test]
#[ignore] // Requires database
async fn test_ledger_round_trip() {
    let pool = test_pool().await;
    let tag = tag();

    let users = PgUserRepository::new(pool.clone());
    let projects = PgProjectRepository::new(pool.clone());
    let accounts = PgAccountRepository::new(pool.clone());
    let services = PgServiceRepository::new(pool.clone());
    let transactions = PgTransactionRepository::new(pool.clone());

    let pi = users
        .create(&NewUser {
            name: format!("pi-{}", tag),
            realname: "Principal Investigator".to_string(),
            default_project_id: None,
        })
        .await
        .unwrap();
    assert!(users.find_by_id(pi.id).await.unwrap().is_some());

    // Duplicate user name rejected
    let dup = users
        .create(&NewUser {
            name: format!("pi-{}", tag),
            realname: String::new(),
            default_project_id: None,
        })
        .await;
    assert!(matches!(dup, Err(AppError::AlreadyExists(_))));

    let project = projects
        .create(&NewProject::new(format!("proj-{}", tag), pi.id))
        .await
        .unwrap();

    let account = accounts
        .create(&NewAccount {
            name: format!("{}-1", project.name),
            project_id: project.id,
            expires: Some(Utc::now() + Duration::days(365)),
        })
        .await
        .unwrap();

    // Name collision within the project maps to AlreadyExists
    let collision = accounts
        .create(&NewAccount {
            name: account.name.clone(),
            project_id: project.id,
            expires: None,
        })
        .await;
    assert!(matches!(collision, Err(AppError::AlreadyExists(_))));

    // The allocator sees the taken suffix
    let next = accounts.next_index(&project.name).await.unwrap();
    assert_eq!(next, 2);

    let system = services
        .create_system(&NewSystem {
            name: format!("cluster-{}", tag),
            description: String::new(),
        })
        .await
        .unwrap();
    let service = services
        .create(&NewService {
            name: format!("cpu-{}", tag),
            units: "core-hours".to_string(),
            system_id: system.id,
            charge_rate: dec!(0.5),
            description: String::new(),
        })
        .await
        .unwrap();

    let resolved = services
        .ids_for_filter(
            &ServiceFilter::Systems(vec![system.name.clone()]),
            MatchScheme::Exact,
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resolved, vec![service.id]);

    let resolved = accounts
        .ids_for_filter(
            &AccountFilter::Projects(vec![project.name.clone()]),
            MatchScheme::Exact,
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(resolved, vec![account.id]);

    let tx = transactions
        .create(&NewTransaction {
            service_id: service.id,
            account_id: account.id,
            creator_id: pi.id,
            amt_used: dec!(10),
            amt_charged: dec!(0),
            tx_type: TxType::Debit,
            active: true,
        })
        .await
        .unwrap();

    let window = TimeWindow::new(Utc::now() - Duration::hours(1), Utc::now()).unwrap();
    let account_ids = [account.id];

    let count = transactions
        .count_chargeable(&window, None, Some(&account_ids), false)
        .await
        .unwrap();
    assert_eq!(count, 1);

    // 10 used * 0.5 rate * 0.8 multiplier
    let updated = transactions
        .apply_charges(&window, None, Some(&account_ids), false, dec!(0.8))
        .await
        .unwrap();
    assert_eq!(updated, 1);

    let charged = transactions.find_by_id(tx.id).await.unwrap().unwrap();
    assert_eq!(charged.amt_charged, dec!(4.0));

    // Idempotent: the charged row is no longer selected without force
    let updated = transactions
        .apply_charges(&window, None, Some(&account_ids), false, dec!(1.0))
        .await
        .unwrap();
    assert_eq!(updated, 0);

    let details = transactions
        .for_invoicing(account.id, &window)
        .await
        .unwrap();
    assert_eq!(details.len(), 1);
    assert_eq!(details[0].creator_name, pi.name);
    assert_eq!(details[0].service_name, service.name);

    // Voided rows stay visible to invoicing
    assert!(transactions.void(tx.id).await.unwrap());
    let details = transactions
        .for_invoicing(account.id, &window)
        .await
        .unwrap();
    assert_eq!(details.len(), 1);
    assert!(!details[0].transaction.active);

    // Non-contiguous suffixes: the next index is 1 + max, not first-free,
    // and unrelated names do not contribute
    for suffix in [2, 10] {
        accounts
            .create(&NewAccount {
                name: format!("{}-{}", project.name, suffix),
                project_id: project.id,
                expires: None,
            })
            .await
            .unwrap();
    }
    accounts
        .create(&NewAccount {
            name: format!("other-{}", tag),
            project_id: project.id,
            expires: None,
        })
        .await
        .unwrap();
    let next = accounts.next_index(&project.name).await.unwrap();
    assert_eq!(next, 11);

    // LIKE wildcards in the prefix match literally, not as patterns
    let wildcarded = accounts
        .next_index(&project.name.replace('o', "_"))
        .await
        .unwrap();
    assert_eq!(wildcarded, 1);
}

#[tokio::test]
#[ignore] // Requires database
async fn test_job_and_storage_round_trip() {
    let pool = test_pool().await;
    let tag = tag();

    let users = PgUserRepository::new(pool.clone());
    let projects = PgProjectRepository::new(pool.clone());
    let jobs = PgJobRepository::new(pool.clone());
    let storage = PgStorageRepository::new(pool.clone());

    let pi = users
        .create(&NewUser {
            name: format!("pi-{}", tag),
            realname: String::new(),
            default_project_id: None,
        })
        .await
        .unwrap();
    let project = projects
        .create(&NewProject::new(format!("proj-{}", tag), pi.id))
        .await
        .unwrap();

    let job = jobs
        .create(&NewJob::new(format!("job-{}", tag), Utc::now(), 3600))
        .await
        .unwrap();
    assert!(jobs.find_by_jobid(&job.jobid).await.unwrap().is_some());

    let dup = jobs
        .create(&NewJob::new(job.jobid.clone(), Utc::now(), 60))
        .await;
    assert!(matches!(dup, Err(AppError::DuplicateJobId(_))));

    let commitment = storage
        .create(&NewStorageCommitment {
            dir_type: Default::default(),
            project_id: project.id,
            filesystem: "lustre".to_string(),
            path: format!("/projects/{}", project.name),
            commitment: 1 << 40,
            allocated: Some(Utc::now()),
            end_date: None,
            uid: 1000,
            gid: 1000,
            pid: 1000,
            permissions: "2770".to_string(),
        })
        .await
        .unwrap();

    let listed = storage.for_project(project.id).await.unwrap();
    assert_eq!(listed.len(), 1);
    assert_eq!(listed[0].id, commitment.id);
}

#[tokio::test]
#[ignore] // Requires database
async fn test_invoice_conflict_and_sheets() {
    let pool = test_pool().await;
    let tag = tag();

    let users = PgUserRepository::new(pool.clone());
    let projects = PgProjectRepository::new(pool.clone());
    let accounts = PgAccountRepository::new(pool.clone());
    let invoices = PgInvoiceRepository::new(pool.clone());

    let pi = users
        .create(&NewUser {
            name: format!("pi-{}", tag),
            realname: String::new(),
            default_project_id: None,
        })
        .await
        .unwrap();
    let project = projects
        .create(&NewProject::new(format!("proj-{}", tag), pi.id))
        .await
        .unwrap();
    let account = accounts
        .create(&NewAccount {
            name: format!("{}-1", project.name),
            project_id: project.id,
            expires: None,
        })
        .await
        .unwrap();

    let window = TimeWindow::new(Utc::now() - Duration::days(30), Utc::now()).unwrap();
    let invoice = invoices.create(project.id, &window, None).await.unwrap();

    // Same project and period conflicts
    let dup = invoices.create(project.id, &window, None).await;
    assert!(matches!(dup, Err(AppError::Conflict(_))));

    let mut contents = tally_core::models::SheetContents::new();
    contents.record(&pi.name, "cpu", dec!(10), dec!(4.0));

    let sheet = invoices
        .create_sheet(&tally_core::models::NewBalanceSheet {
            invoice_id: invoice.id,
            account_id: account.id,
            balance: dec!(4.0),
            contents: contents.clone(),
            transaction_ids: vec![],
        })
        .await
        .unwrap();

    let fetched = invoices
        .sheet_for_account(invoice.id, account.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(fetched.id, sheet.id);
    assert_eq!(fetched.balance, dec!(4.0));
    assert_eq!(fetched.contents, contents);

    // Chained successor and the walk back
    let next_window =
        TimeWindow::new(Utc::now() + Duration::days(1), Utc::now() + Duration::days(31)).unwrap();
    let successor = invoices
        .create(project.id, &next_window, Some(invoice.id))
        .await
        .unwrap();

    let chain = invoices.chain(successor.id, 10).await.unwrap();
    assert_eq!(
        chain.iter().map(|i| i.id).collect::<Vec<_>>(),
        vec![successor.id, invoice.id]
    );

    assert!(invoices.delete(successor.id).await.unwrap());
    assert!(!invoices.delete(successor.id).await.unwrap());
}
