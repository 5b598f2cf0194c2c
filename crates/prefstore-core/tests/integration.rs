//! Integration tests: file-backed stores end to end.
//!
//! These tests exercise open -> operate -> close -> reopen against real
//! snapshot files, including failure injection and concurrent access.

use std::collections::HashMap as StdHashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::thread;

use tempfile::TempDir;

use prefstore_core::format::{decode_snapshot, encode_snapshot};
use prefstore_core::{Config, KeyValueStore, MemoryMedium, Namespaces, Request, Response, StoreError};

// ---------------------------------------------------------------------------
// Helpers
// ---------------------------------------------------------------------------

fn store_path(dir: &TempDir) -> PathBuf {
    dir.path().join("prefs").join("app.prefs")
}

fn test_store() -> (KeyValueStore, PathBuf, TempDir) {
    let dir = TempDir::new().unwrap();
    let path = store_path(&dir);
    let store = KeyValueStore::open(&path, Config::default()).unwrap();
    (store, path, dir)
}

fn on_disk(path: &Path) -> StdHashMap<String, String> {
    let bytes = fs::read(path).unwrap();
    decode_snapshot(&bytes).unwrap().into_iter().collect()
}

// ---------------------------------------------------------------------------
// Durability
// ---------------------------------------------------------------------------

#[test]
fn test_roundtrip_across_reopen() {
    let dir = TempDir::new().unwrap();
    let path = store_path(&dir);

    let expected: StdHashMap<String, String> = (0..250)
        .map(|i| (format!("key-{:03}", i), format!("value-{}", i * 7)))
        .chain(std::iter::once(("blank".to_string(), String::new())))
        .collect();

    {
        let store = KeyValueStore::open(&path, Config::default()).unwrap();
        let pairs: Vec<(String, String)> = expected.clone().into_iter().collect();
        store.multi_set(&pairs).unwrap();
        store.close().unwrap();
    }

    let store = KeyValueStore::open(&path, Config::default()).unwrap();
    let keys = store.get_all_keys().unwrap();
    assert_eq!(keys.len(), expected.len());

    let rows = store.multi_get(&keys).unwrap();
    let reloaded: StdHashMap<String, String> = rows
        .into_iter()
        .map(|(k, v)| (k, v.expect("every listed key has a value")))
        .collect();
    assert_eq!(reloaded, expected);
}

#[test]
fn test_every_successful_write_is_on_disk() {
    let (store, path, _dir) = test_store();

    store.set_item("a", "1").unwrap();
    assert_eq!(on_disk(&path).get("a").map(String::as_str), Some("1"));

    store.multi_set(&[("b", "2"), ("c", "3")]).unwrap();
    assert_eq!(on_disk(&path).len(), 3);

    store.remove_item("a").unwrap();
    assert!(!on_disk(&path).contains_key("a"));

    store.clear().unwrap();
    assert!(on_disk(&path).is_empty());
}

#[test]
fn test_non_durable_mode_still_persists() {
    let dir = TempDir::new().unwrap();
    let path = store_path(&dir);
    {
        let store = KeyValueStore::open(&path, Config::embedded()).unwrap();
        store.set_item("fast", "lane").unwrap();
    }
    let store = KeyValueStore::open(&path, Config::embedded()).unwrap();
    assert_eq!(store.get_item("fast").unwrap().as_deref(), Some("lane"));
}

#[test]
fn test_interrupted_commit_leaves_previous_snapshot() {
    let dir = TempDir::new().unwrap();
    let path = store_path(&dir);
    {
        let store = KeyValueStore::open(&path, Config::default()).unwrap();
        store.set_item("stable", "yes").unwrap();
    }

    // Simulate a crash after the temp write but before the rename
    let mut tmp = path.clone().into_os_string();
    tmp.push(".tmp");
    fs::write(&tmp, b"PREF partially written garbage").unwrap();

    let store = KeyValueStore::open(&path, Config::default()).unwrap();
    assert_eq!(store.get_item("stable").unwrap().as_deref(), Some("yes"));
    assert!(!Path::new(&tmp).exists());
}

// ---------------------------------------------------------------------------
// Failure handling
// ---------------------------------------------------------------------------

#[test]
fn test_corrupt_snapshot_is_reported() {
    let dir = TempDir::new().unwrap();
    let path = store_path(&dir);
    fs::create_dir_all(path.parent().unwrap()).unwrap();
    fs::write(&path, b"this is not a snapshot, it is a text file").unwrap();

    let store = KeyValueStore::open(&path, Config::default()).unwrap();
    match store.get_item("anything") {
        Err(StoreError::StorageCorrupt { path: Some(p), .. }) => assert_eq!(p, path),
        other => panic!("Expected StorageCorrupt, got {:?}", other),
    }
    // Writes must not overwrite data that could not be read
    assert!(matches!(store.set_item("k", "v"), Err(StoreError::StorageCorrupt { .. })));
    assert_eq!(fs::read(&path).unwrap(), b"this is not a snapshot, it is a text file");
}

#[test]
fn test_bit_flip_is_reported() {
    let (store, path, _dir) = test_store();
    store.multi_set(&[("a", "alpha"), ("b", "beta")]).unwrap();
    drop(store);

    let mut bytes = fs::read(&path).unwrap();
    let last = bytes.len() - 1;
    bytes[last] ^= 0x01;
    fs::write(&path, bytes).unwrap();

    let store = KeyValueStore::open(&path, Config::default()).unwrap();
    let err = store.load().unwrap_err();
    assert_eq!(err.code(), "STORAGE_CORRUPT");
}

#[test]
fn test_vanished_directory_rolls_back() {
    let (store, path, _dir) = test_store();
    store.multi_set(&[("a", "1"), ("b", "2")]).unwrap();

    fs::remove_dir_all(path.parent().unwrap()).unwrap();

    let err = store.multi_set(&[("a", "changed"), ("c", "3")]).unwrap_err();
    assert!(matches!(err, StoreError::StorageUnavailable { .. }));

    // In-memory state is the pre-call state
    assert_eq!(store.get_item("a").unwrap().as_deref(), Some("1"));
    assert_eq!(store.get_item("c").unwrap(), None);
    assert_eq!(store.len().unwrap(), 2);
}

#[test]
fn test_read_only_medium_mid_session() {
    let medium = MemoryMedium::new();
    let store = KeyValueStore::with_medium(medium.clone(), Config::default()).unwrap();
    store.multi_set(&[("k1", "v1"), ("k2", "v2")]).unwrap();
    let persisted = medium.contents();

    medium.set_read_only(true);
    for request in [
        Request::SetItem { key: Some("k1".into()), value: Some("x".into()) },
        Request::RemoveItem { key: Some("k2".into()) },
        Request::Clear,
    ] {
        let err = store.execute(request).unwrap_err();
        assert_eq!(err.code(), "STORAGE_UNAVAILABLE");
    }

    assert_eq!(medium.contents(), persisted);
    assert_eq!(
        store.execute(Request::MultiGet { keys: Some(vec![Some("k1".into()), Some("k2".into())]) }).unwrap(),
        Response::Items(vec![
            ("k1".to_string(), Some("v1".to_string())),
            ("k2".to_string(), Some("v2".to_string())),
        ])
    );

    medium.set_read_only(false);
    store.set_item("k1", "x").unwrap();
    assert_eq!(store.get_item("k1").unwrap().as_deref(), Some("x"));
}

#[test]
fn test_preexisting_snapshot_is_loaded() {
    let mut seed = hashbrown::HashMap::new();
    seed.insert("seeded".to_string(), "value".to_string());
    let medium = MemoryMedium::with_contents(encode_snapshot(&seed).unwrap());

    let store = KeyValueStore::with_medium(medium, Config::default()).unwrap();
    assert_eq!(store.get_all_keys().unwrap(), vec!["seeded".to_string()]);
}

// ---------------------------------------------------------------------------
// Concurrency
// ---------------------------------------------------------------------------

#[test]
fn test_readers_never_see_partial_batches() {
    let (store, _path, _dir) = test_store();
    let store = Arc::new(store);

    // Every batch rewrites all keys to the same generation number
    let keys: Vec<String> = (0..20).map(|i| format!("k{}", i)).collect();
    let initial: Vec<(String, String)> = keys.iter().map(|k| (k.clone(), "0".to_string())).collect();
    store.multi_set(&initial).unwrap();

    let writer = {
        let store = Arc::clone(&store);
        let keys = keys.clone();
        thread::spawn(move || {
            for generation in 1..=30 {
                let pairs: Vec<(String, String)> = keys.iter().map(|k| (k.clone(), generation.to_string())).collect();
                store.multi_set(&pairs).unwrap();
            }
        })
    };

    let mut readers = vec![];
    for _ in 0..4 {
        let store = Arc::clone(&store);
        let keys = keys.clone();
        readers.push(thread::spawn(move || {
            for _ in 0..200 {
                let rows = store.multi_get(&keys).unwrap();
                let first = rows[0].1.clone();
                assert!(rows.iter().all(|(_, v)| *v == first), "observed a partially applied batch");
            }
        }));
    }

    writer.join().unwrap();
    for r in readers { r.join().unwrap(); }

    assert_eq!(store.get_item("k0").unwrap().as_deref(), Some("30"));
}

#[test]
fn test_concurrent_writers_all_land() {
    let (store, path, _dir) = test_store();
    let store = Arc::new(store);

    let mut handles = vec![];
    for t in 0..6 {
        let store = Arc::clone(&store);
        handles.push(thread::spawn(move || {
            for i in 0..25 {
                store.set_item(&format!("t{}-{}", t, i), &i.to_string()).unwrap();
            }
        }));
    }
    for h in handles { h.join().unwrap(); }

    assert_eq!(store.len().unwrap(), 150);
    assert_eq!(on_disk(&path).len(), 150);
}

// ---------------------------------------------------------------------------
// Namespaces
// ---------------------------------------------------------------------------

#[test]
fn test_namespaces_share_config_and_root() {
    let dir = TempDir::new().unwrap();
    let spaces = Namespaces::open(dir.path(), Config::mobile()).unwrap();

    let settings = spaces.store("settings").unwrap();
    settings.set_item("locale", "en-GB").unwrap();
    assert_eq!(settings.config(), &Config::mobile());
    assert_eq!(settings.location(), Some(dir.path().join("settings.prefs")));
    assert_eq!(spaces.root(), dir.path());

    spaces.flush_all().unwrap();
    spaces.close().unwrap();

    // Handles outlive the registry
    assert_eq!(settings.get_item("locale").unwrap().as_deref(), Some("en-GB"));
}
