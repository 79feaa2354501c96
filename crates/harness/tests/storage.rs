use std::sync::Arc;

use scriptdesk_core::{KeyNamespace, Project};
use scriptdesk_engine::init_tracing;
use scriptdesk_harness::{FlakyBackend, TestWorkspace};
use scriptdesk_storage::{
    DataGateway, KeyValueStore, KvLimits, MigrationManager, SqliteStore, StorageBackend, Tier,
    WriteOutcome,
};

type TestResult = Result<(), Box<dyn std::error::Error>>;

// ============================================================================
// Tier transparency
// ============================================================================

#[tokio::test]
async fn load_returns_what_save_stored_on_every_tier() -> TestResult {
    let structured = TestWorkspace::new()?;
    let key_value = TestWorkspace::key_value_only()?;
    let directory = TestWorkspace::new()?;

    let gw = directory.gateway()?;
    gw.choose_directory().await?.ok_or("no directory chosen")?;

    for (gateway, tier) in [
        (structured.gateway()?, Tier::Structured),
        (key_value.gateway()?, Tier::KeyValue),
        (gw, Tier::Directory),
    ] {
        for (key, value) in [("scriptdesk_project_A", "{\"x\":1}"), ("scriptdesk_lastProject", "A")] {
            assert_eq!(gateway.save(key, value).await, WriteOutcome::Stored(tier));
            assert_eq!(gateway.load(key).await.as_deref(), Some(value));
        }
        assert_eq!(
            gateway.list_keys().await,
            vec!["scriptdesk_lastProject", "scriptdesk_project_A"]
        );
    }
    Ok(())
}

#[tokio::test]
async fn structured_outage_falls_back_and_recovers_reads() -> TestResult {
    init_tracing("scriptdesk_storage=debug");
    let sql = Arc::new(FlakyBackend::new(Arc::new(SqliteStore::in_memory())));
    let kv = Arc::new(KeyValueStore::in_memory(KvLimits::default()));
    let gw = DataGateway::new(KeyNamespace::new("app"), sql.clone(), kv.clone());

    sql.set_failing(true);
    assert_eq!(gw.save("k", "v").await, WriteOutcome::Stored(Tier::KeyValue));
    assert_eq!(gw.load("k").await.as_deref(), Some("v"));

    sql.set_failing(false);
    assert_eq!(gw.load("k").await.as_deref(), Some("v"));
    Ok(())
}

// ============================================================================
// Migration
// ============================================================================

#[tokio::test]
async fn migration_twice_matches_migration_once() -> TestResult {
    let kv = Arc::new(KeyValueStore::in_memory(KvLimits::default()));
    for i in 0..10 {
        kv.save(&format!("app_project_{i}"), &format!("value {i}")).await?;
    }
    let once = Arc::new(SqliteStore::in_memory());
    let twice = Arc::new(SqliteStore::in_memory());

    MigrationManager::new(kv.clone(), once.clone(), "app_migration_complete")
        .migrate()
        .await;
    let manager = MigrationManager::new(kv.clone(), twice.clone(), "app_migration_complete");
    manager.migrate().await;
    manager.migrate().await;

    let keys = once.list_keys().await?;
    assert_eq!(keys, twice.list_keys().await?);
    for key in keys.iter().filter(|k| !k.ends_with("_migration_complete")) {
        assert_eq!(once.load(key).await?, twice.load(key).await?);
    }
    Ok(())
}

#[tokio::test]
async fn legacy_key_value_data_is_migrated_on_first_read() -> TestResult {
    let ws = TestWorkspace::new()?;
    {
        let kv = ws.key_value()?;
        let legacy = Project::synthesize("Legacy", "Legacy");
        kv.save("scriptdesk_project_Legacy", &legacy.to_json()?).await?;
        kv.save("scriptdesk_lastProject", "Legacy").await?;
    }

    let store = ws.open_store().await?;
    assert_eq!(store.project().id, "Legacy");

    let structured = ws.structured();
    assert!(structured.load("scriptdesk_project_Legacy").await?.is_some());
    let manager = MigrationManager::new(
        Arc::new(ws.key_value()?),
        Arc::new(structured),
        "scriptdesk_migration_complete",
    );
    assert!(manager.is_completed().await);
    Ok(())
}

#[tokio::test]
async fn recorded_migration_does_not_replay_stale_fallback_copies() -> TestResult {
    let ws = TestWorkspace::new()?;
    {
        let kv = ws.key_value()?;
        let legacy = Project::synthesize("Legacy", "Legacy");
        kv.save("scriptdesk_project_Legacy", &legacy.to_json()?).await?;
        kv.save("scriptdesk_lastProject", "Legacy").await?;
    }
    {
        let mut store = ws.open_store().await?;
        store.add_block()?;
        store.flush().await?;
    }
    {
        // fallback copies left behind by a later structured outage
        let kv = ws.key_value()?;
        let other = Project::synthesize("Other", "Other");
        kv.save("scriptdesk_project_Other", &other.to_json()?).await?;
    }

    assert_eq!(ws.gateway()?.ensure_migrated().await.migrated_count, 0);

    let mut store = ws.open_store().await?;
    assert_eq!(store.project().scenes[0].scripts[0].blocks.len(), 1);
    store.switch_project("Other").await?;
    assert_eq!(store.project().id, "Other");

    let raw = ws
        .structured()
        .load("scriptdesk_project_Legacy")
        .await?
        .ok_or("structured record missing")?;
    assert_eq!(Project::from_json(&raw)?.scenes[0].scripts[0].blocks.len(), 1);
    Ok(())
}

// ============================================================================
// Quota
// ============================================================================

#[tokio::test]
async fn oversized_redo_write_is_swallowed_then_small_write_lands() -> TestResult {
    let ws = TestWorkspace::key_value_only()?.with_limits(KvLimits {
        max_value_bytes: 1024,
        quota_bytes: 4096,
    });
    let gw = ws.gateway()?;
    let key = "scriptdesk_project_P_redo";

    let outcome = gw.save(key, &"x".repeat(2048)).await;
    assert_eq!(outcome, WriteOutcome::Dropped);
    assert_eq!(gw.load(key).await, None);

    assert!(gw.save(key, "[]").await.is_stored());
    assert_eq!(gw.load(key).await.as_deref(), Some("[]"));
    Ok(())
}

#[tokio::test]
async fn full_key_value_tier_sheds_history_for_project_data() -> TestResult {
    let ws = TestWorkspace::key_value_only()?.with_limits(KvLimits {
        max_value_bytes: 1024,
        quota_bytes: 2048,
    });
    let gw = ws.gateway()?;
    gw.save("scriptdesk_project_P_undo", &"u".repeat(1000)).await;
    gw.save("scriptdesk_project_P_redo", &"r".repeat(900)).await;

    let outcome = gw.save("scriptdesk_project_P", &"p".repeat(500)).await;
    assert_eq!(outcome, WriteOutcome::Stored(Tier::KeyValue));
    assert_eq!(gw.list_keys().await, vec!["scriptdesk_project_P"]);
    Ok(())
}

// ============================================================================
// External directory
// ============================================================================

#[tokio::test]
async fn directory_choice_survives_restart() -> TestResult {
    let ws = TestWorkspace::new()?;
    {
        let mut store = ws.open_store().await?;
        store.gateway().choose_directory().await?;
        store.create_project("Shared").await?;
        store.flush().await?;
    }

    let file = ws.suggested_directory().join("scriptdesk_project_Shared.json");
    assert!(file.exists());

    let store = ws.open_store().await?;
    assert_eq!(store.gateway().directory(), Some(ws.suggested_directory()));
    assert_eq!(store.project().id, "Shared");
    Ok(())
}

#[tokio::test]
async fn user_directory_operations_surface_errors() -> TestResult {
    let ws = TestWorkspace::new()?;
    let gw = ws.gateway()?;
    assert!(gw.save_to_directory("k", "v").await.is_err());

    gw.set_directory(&ws.path().join("picked")).await?;
    gw.save_to_directory("k", "v").await?;

    let export = ws.path().join("exports").join("script.txt");
    gw.export_file(&export, "A: hello").await?;
    assert_eq!(std::fs::read_to_string(export)?, "A: hello");

    gw.clear_directory().await?;
    assert_eq!(gw.directory(), None);
    assert_eq!(gw.load("k").await, None);
    Ok(())
}
