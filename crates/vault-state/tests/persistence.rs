//! End-to-end tests across the state store, storage engine, and migrations.

use std::sync::{Arc, Once};

use serde_json::{json, Value};
use tempfile::tempdir;

use vault_migration::MigrationEngine;
use vault_state::{
    LoadOptions, LoadOutcome, SaveOptions, StateConfig, StateStore, Update, UpdateOptions,
};
use vault_storage::{FileBackend, MemoryBackend, StorageConfig, StorageEngine};

static INIT: Once = Once::new();

fn init_tracing() {
    INIT.call_once(|| {
        let _ = tracing_subscriber::fmt()
            .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
            .with_test_writer()
            .try_init();
    });
}

fn template() -> Value {
    json!({
        "player": {"jade": 100, "realm": "foundation"},
        "settings": {"sound": true}
    })
}

fn file_engine(root: &std::path::Path, version: &str) -> StorageEngine {
    StorageEngine::new(
        Arc::new(FileBackend::new(root)),
        StorageConfig {
            version: version.to_string(),
            ..StorageConfig::default()
        },
    )
}

#[tokio::test]
async fn test_save_then_load_in_fresh_store() {
    init_tracing();
    let dir = tempdir().unwrap();

    let mut store = StateStore::new(template(), StateConfig::default());
    store.attach_storage(file_engine(dir.path(), "1.0.0"));
    store.set("player.jade", json!(777), UpdateOptions::default()).unwrap();
    store.save(SaveOptions::default()).await.unwrap();

    let mut restored = StateStore::new(template(), StateConfig::default());
    restored.attach_storage(file_engine(dir.path(), "1.0.0"));
    let outcome = restored.load(LoadOptions::default()).await.unwrap();

    match outcome {
        LoadOutcome::Adopted {
            version,
            migrated,
            recovered,
            ..
        } => {
            assert_eq!(version, "1.0.0");
            assert!(!migrated);
            assert!(!recovered);
        }
        LoadOutcome::Empty => panic!("expected a record"),
    }
    assert_eq!(restored.get("player.jade").unwrap(), Some(json!(777)));
}

#[tokio::test]
async fn test_old_record_is_migrated_on_load() {
    init_tracing();
    let dir = tempdir().unwrap();

    // A 1.0.0 build writes a record without the notifications setting.
    let mut old_store = StateStore::new(template(), StateConfig::default());
    old_store.attach_storage(file_engine(dir.path(), "1.0.0"));
    old_store.set("player.jade", json!(42), UpdateOptions::default()).unwrap();
    old_store.save(SaveOptions::default()).await.unwrap();

    // A 1.0.1 build loads it through a registered migration.
    let mut migrations = MigrationEngine::new();
    migrations
        .register(
            "1.0.0",
            "1.0.1",
            Arc::new(|mut data: Value| {
                data["settings"]["notifications"] = json!(true);
                Ok(data)
            }),
            None,
        )
        .unwrap();

    let mut new_store = StateStore::new(template(), StateConfig::default());
    new_store.attach_storage(file_engine(dir.path(), "1.0.1"));
    new_store.attach_migrations(migrations);

    let outcome = new_store.load(LoadOptions::default()).await.unwrap();
    match outcome {
        LoadOutcome::Adopted { migrated, version, .. } => {
            assert!(migrated);
            assert_eq!(version, "1.0.1");
        }
        LoadOutcome::Empty => panic!("expected a record"),
    }
    assert_eq!(new_store.get("player.jade").unwrap(), Some(json!(42)));
    assert_eq!(
        new_store.get("settings.notifications").unwrap(),
        Some(json!(true))
    );
    // The migrated tree is unsaved until the next save.
    assert!(new_store.is_dirty());

    new_store.save(SaveOptions::default()).await.unwrap();
    assert!(!new_store.is_dirty());
}

#[tokio::test]
async fn test_chunked_state_survives_roundtrip() {
    init_tracing();
    let dir = tempdir().unwrap();

    let engine = StorageEngine::new(
        Arc::new(FileBackend::new(dir.path())),
        StorageConfig {
            chunk_threshold: 200,
            ..StorageConfig::default()
        },
    );

    let mut store = StateStore::new(template(), StateConfig::default());
    store.attach_storage(engine);
    store
        .update(
            Update::Merge(json!({"chronicle": "the sect elder spoke at length ".repeat(100)})),
            UpdateOptions::default(),
        )
        .unwrap();
    store.save(SaveOptions::default()).await.unwrap();

    let mut restored = StateStore::new(template(), StateConfig::default());
    restored.attach_storage(StorageEngine::new(
        Arc::new(FileBackend::new(dir.path())),
        StorageConfig {
            chunk_threshold: 200,
            ..StorageConfig::default()
        },
    ));
    restored.load(LoadOptions::default()).await.unwrap();

    assert_eq!(restored.state(), store.state());
}

#[tokio::test]
async fn test_corrupted_record_recovers_from_backup_on_load() {
    init_tracing();
    let dir = tempdir().unwrap();

    let mut store = StateStore::new(template(), StateConfig::default());
    store.attach_storage(file_engine(dir.path(), "1.0.0"));

    store.set("player.jade", json!(500), UpdateOptions::default()).unwrap();
    store.save(SaveOptions::default()).await.unwrap();
    // Second save backs up the first record.
    store.set("player.jade", json!(777), UpdateOptions::default()).unwrap();
    store.save(SaveOptions::default()).await.unwrap();

    // Corrupt the primary record on disk without fixing its checksum.
    let record_path = dir.path().join("main.sav");
    let raw = std::fs::read_to_string(&record_path).unwrap();
    std::fs::write(&record_path, raw.replace("777", "666")).unwrap();

    let mut restored = StateStore::new(template(), StateConfig::default());
    restored.attach_storage(file_engine(dir.path(), "1.0.0"));
    let outcome = restored.load(LoadOptions::default()).await.unwrap();

    match outcome {
        LoadOutcome::Adopted { recovered, .. } => assert!(recovered),
        LoadOutcome::Empty => panic!("expected recovery from backup"),
    }
    // The corrupt value is never adopted; the backup's value is.
    assert_eq!(restored.get("player.jade").unwrap(), Some(json!(500)));
}

#[tokio::test]
async fn test_export_import_between_stores() {
    init_tracing();

    let mut source = StateStore::new(template(), StateConfig::default());
    source.attach_storage(StorageEngine::new(
        Arc::new(MemoryBackend::new()),
        StorageConfig::default(),
    ));
    source.set("player.jade", json!(12), UpdateOptions::default()).unwrap();
    source.save(SaveOptions::default()).await.unwrap();

    let document = source.export_slot(None).await.unwrap();

    let mut target = StateStore::new(template(), StateConfig::default());
    target.attach_storage(StorageEngine::new(
        Arc::new(MemoryBackend::new()),
        StorageConfig::default(),
    ));
    let outcome = target.import_slot(&document, None).await.unwrap();

    assert!(matches!(outcome, LoadOutcome::Adopted { .. }));
    assert_eq!(target.get("player.jade").unwrap(), Some(json!(12)));
}

#[tokio::test]
async fn test_failed_migration_keeps_default_state() {
    init_tracing();
    let dir = tempdir().unwrap();

    let mut old_store = StateStore::new(template(), StateConfig::default());
    old_store.attach_storage(file_engine(dir.path(), "1.0.0"));
    old_store.set("player.jade", json!(5), UpdateOptions::default()).unwrap();
    old_store.save(SaveOptions::default()).await.unwrap();

    let mut migrations = MigrationEngine::new();
    migrations
        .register(
            "1.0.0",
            "1.0.1",
            Arc::new(|_| Err("schema change went wrong".to_string())),
            None,
        )
        .unwrap();

    let mut new_store = StateStore::new(template(), StateConfig::default());
    new_store.attach_storage(file_engine(dir.path(), "1.0.1"));
    new_store.attach_migrations(migrations);

    let result = new_store.load(LoadOptions::default()).await;
    assert!(result.is_err());
    // The in-memory state is untouched by the failed load.
    assert_eq!(new_store.state(), template());
}

#[tokio::test]
async fn test_load_without_migrations_rejects_version_mismatch() {
    init_tracing();
    let dir = tempdir().unwrap();

    let mut old_store = StateStore::new(template(), StateConfig::default());
    old_store.attach_storage(file_engine(dir.path(), "1.0.0"));
    old_store.set("player.jade", json!(5), UpdateOptions::default()).unwrap();
    old_store.save(SaveOptions::default()).await.unwrap();

    let mut new_store = StateStore::new(template(), StateConfig::default());
    new_store.attach_storage(file_engine(dir.path(), "2.0.0"));

    let result = new_store
        .load(LoadOptions {
            migrate: false,
            ..LoadOptions::default()
        })
        .await;
    assert!(result.is_err());
    assert_eq!(new_store.state(), template());
}
