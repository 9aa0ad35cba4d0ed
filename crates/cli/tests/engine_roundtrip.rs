use expense_cli::{output, parse};
use expense_core::clock::Clock;
use expense_core::config::AppConfig;
use expense_core::ledger::{NewReceipt, NewTransaction};
use expense_core::router::CategorizationOutcome;
use expense_core::usage::Tier;
use expense_core::Engine;
use storage::models::ProposalStatus;
use tempfile::tempdir;

fn config_for(dir: &std::path::Path) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.database.path = dir.join("expense.db").to_string_lossy().into_owned();
    cfg.jobs.batch_pause_ms = 0;
    cfg
}

#[tokio::test]
async fn file_backed_engine_keeps_what_it_learned() {
    let temp = tempdir().unwrap();
    let cfg = config_for(temp.path());

    let engine = Engine::open(cfg.clone()).await.unwrap();
    let now = engine.clock.now();
    let txn = engine
        .ledger
        .add_transaction(
            "alice",
            NewTransaction {
                posted_on: parse::date("06/10/2025").unwrap(),
                amount: parse::amount("$5.75").unwrap(),
                description: "STARBUCKS STORE 123".into(),
            },
            now,
        )
        .await
        .unwrap();
    engine
        .ledger
        .add_receipt(
            "alice",
            NewReceipt {
                vendor: "Starbucks".into(),
                receipt_date: parse::date("2025-06-10").unwrap(),
                amount: 5.75,
                currency: "USD".into(),
                vendor_confidence: 1.0,
                date_confidence: 1.0,
                amount_confidence: 1.0,
            },
            now,
        )
        .await
        .unwrap();

    let summary = engine.matcher.auto_match("alice", None).await.unwrap();
    assert_eq!(summary.confirmed, 1);
    assert!(output::auto_match(&summary).contains("1 confirmed"));

    // Default providers: hashing embedder, no inference.
    let first = engine
        .router
        .categorize("alice", "STARBUCKS STORE 123", false)
        .await
        .unwrap();
    assert!(matches!(first, CategorizationOutcome::NoSuggestion { .. }));
    engine
        .router
        .confirm_categorization("alice", "STARBUCKS STORE 123", "6300", "MEALS")
        .await
        .unwrap();
    let stored = engine
        .ledger
        .set_categorization("alice", txn.id, "6300", "MEALS")
        .await
        .unwrap();
    assert_eq!(stored.gl_code.as_deref(), Some("6300"));
    engine.pool.close().await;

    let reopened = Engine::open(cfg).await.unwrap();
    match reopened
        .router
        .categorize("alice", "STARBUCKS STORE 123", false)
        .await
        .unwrap()
    {
        CategorizationOutcome::Suggested(c) => {
            assert_eq!(c.tier, Tier::Cache);
            assert_eq!(c.gl_code, "6300");
        }
        other => panic!("expected a cache hit after reopening, got {other:?}"),
    }
    let confirmed = reopened
        .matcher
        .list_proposals("alice", Some(parse::status("confirmed").unwrap()))
        .await
        .unwrap();
    assert_eq!(confirmed.len(), 1);
    assert_eq!(confirmed[0].status, ProposalStatus::Confirmed);
    assert!(reopened
        .matcher
        .list_proposals("bob", None)
        .await
        .unwrap()
        .is_empty());
}

#[tokio::test]
async fn maintenance_runs_report_through_the_engine() {
    let temp = tempdir().unwrap();
    let engine = Engine::open(config_for(temp.path())).await.unwrap();
    let cancel = tokio_util::sync::CancellationToken::new();

    let decay = engine.jobs.run_decay(None, &cancel).await;
    assert!(!decay.failed());
    assert!(output::job(&decay).starts_with("vendor_alias_decay: completed"));

    let cleanup = engine.jobs.run_cleanup(Some("alice"), &cancel).await;
    assert!(!cleanup.failed());
    assert_eq!(cleanup.affected, 0);
}

#[tokio::test]
async fn unknown_vector_provider_is_rejected_at_open() {
    let temp = tempdir().unwrap();
    let mut cfg = config_for(temp.path());
    cfg.vectors.provider = "faiss".into();
    assert!(Engine::open(cfg).await.is_err());
}
