//! PostgreSQL ledger tests.
//!
//! These tests require a running PostgreSQL instance.
//! Run with: `cargo test -p mpipe-ledger -- --ignored`

use mpipe_ledger::{LedgerConfig, LedgerError, PgStatusLedger, StatusLedger};
use mpipe_models::ProcessStatus;

async fn ledger() -> PgStatusLedger {
    dotenvy::dotenv().ok();
    let config = LedgerConfig::from_env().expect("DATABASE_URL must be set");
    let ledger = PgStatusLedger::connect(&config).await.expect("connect");
    ledger.migrate().await.expect("migrate");
    ledger
}

fn unique(name: &str) -> String {
    format!(
        "{}-{}.mp4",
        name,
        std::time::SystemTime::now()
            .duration_since(std::time::UNIX_EPOCH)
            .unwrap()
            .as_nanos()
    )
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_transitions_and_success_guard() {
    let ledger = ledger().await;
    let filename = unique("transitions");
    ledger.register(&filename).await.unwrap();

    assert_eq!(ledger.status(&filename).await.unwrap(), Some(ProcessStatus::InQueue));
    ledger.update_status(&filename, ProcessStatus::Processing).await.unwrap();
    ledger.update_status(&filename, ProcessStatus::Success).await.unwrap();
    assert!(ledger.is_already_processed(&filename).await.unwrap());

    let err = ledger
        .update_status(&filename, ProcessStatus::Fail)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::AlreadySucceeded { .. }));

    ledger.update_status(&filename, ProcessStatus::Success).await.unwrap();
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_missing_row_is_not_found() {
    let ledger = ledger().await;
    let err = ledger
        .update_status(&unique("missing"), ProcessStatus::Processing)
        .await
        .unwrap_err();
    assert!(matches!(err, LedgerError::NotFound(_)));
}

#[tokio::test]
#[ignore = "requires PostgreSQL"]
async fn test_concurrent_updates_never_leave_success() {
    let ledger = ledger().await;
    let filename = unique("race");
    ledger.register(&filename).await.unwrap();
    ledger.update_status(&filename, ProcessStatus::Processing).await.unwrap();

    let mut handles = Vec::new();
    for i in 0..10 {
        let ledger = ledger.clone();
        let filename = filename.clone();
        let status = if i % 2 == 0 {
            ProcessStatus::Success
        } else {
            ProcessStatus::Fail
        };
        handles.push(tokio::spawn(async move {
            ledger.update_status(&filename, status).await
        }));
    }
    for handle in handles {
        let _ = handle.await.unwrap();
    }

    // Whatever order they landed in, a FAIL cannot undo a SUCCESS.
    assert_eq!(
        ledger.status(&filename).await.unwrap(),
        Some(ProcessStatus::Success)
    );
}
