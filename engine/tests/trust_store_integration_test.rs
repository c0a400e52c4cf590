//! Integration tests for the trust store
//!
//! These exercise the durability contract (in-memory set ≡ allowlist file
//! after every mutation) and the hash verification cache semantics.

use std::collections::HashSet;
use std::path::Path;

use depot_engine::paths::DataPaths;
use depot_engine::trust::TrustStore;

fn file_lines(path: &Path) -> HashSet<String> {
    match std::fs::read_to_string(path) {
        Ok(contents) => contents
            .lines()
            .map(str::trim)
            .filter(|line| !line.is_empty())
            .map(str::to_string)
            .collect(),
        Err(_) => HashSet::new(),
    }
}

fn write_hash_file(paths: &DataPaths, uuid: &str, hash: &str) {
    let bundle = paths.published_plugin_dir(uuid);
    std::fs::create_dir_all(&bundle).unwrap();
    std::fs::write(bundle.join("hash.txt"), format!("{hash}\n")).unwrap();
}

#[tokio::test]
async fn test_uuid_set_matches_file_after_every_mutation() {
    let dir = tempfile::tempdir().unwrap();
    let paths = DataPaths::new(dir.path().join("data")).unwrap();
    let store = TrustStore::load(&paths).await;

    let script: &[(&str, &str)] = &[
        ("add", "p1"),
        ("add", "p2"),
        ("add", "p1"), // duplicate, no-op
        ("remove", "p1"),
        ("add", "p3"),
        ("remove", "missing"), // absent, no-op
        ("remove", "p2"),
    ];

    for (op, uuid) in script {
        match *op {
            "add" => {
                store.add_trusted_plugin(uuid, None).await.unwrap();
            }
            "remove" => {
                store.remove_trusted_plugin(uuid).await.unwrap();
            }
            _ => unreachable!(),
        }
        let in_memory: HashSet<String> = store.trusted_plugins().await.into_iter().collect();
        let on_disk = file_lines(&paths.trusted_plugins_file());
        assert_eq!(
            in_memory, on_disk,
            "after {op} {uuid}: memory and file diverged"
        );
    }

    let final_set: HashSet<String> = store.trusted_plugins().await.into_iter().collect();
    assert_eq!(final_set, HashSet::from(["p3".to_string()]));
}

#[tokio::test]
async fn test_developer_set_matches_file_after_every_mutation() {
    let dir = tempfile::tempdir().unwrap();
    let paths = DataPaths::new(dir.path().join("data")).unwrap();
    let store = TrustStore::load(&paths).await;

    store.add_trusted_developer("dev1").await.unwrap();
    store.add_trusted_developer("dev2").await.unwrap();
    assert_eq!(
        file_lines(&paths.trusted_developers_file()),
        HashSet::from(["dev1".to_string(), "dev2".to_string()])
    );

    store.remove_trusted_developer("dev1").await.unwrap();
    assert_eq!(
        file_lines(&paths.trusted_developers_file()),
        HashSet::from(["dev2".to_string()])
    );
}

#[tokio::test]
async fn test_verify_by_hash_truth_table() {
    let dir = tempfile::tempdir().unwrap();
    let paths = DataPaths::new(dir.path().join("data")).unwrap();
    let store = TrustStore::load(&paths).await;

    let hash = TrustStore::compute_hash(b"assembly bytes");
    write_hash_file(&paths, "listed", &hash);
    write_hash_file(&paths, "unlisted", &hash);

    store.add_trusted_plugin("listed", None).await.unwrap();
    store.add_trusted_plugin("bare", None).await.unwrap();

    // Unlisted uuid fails fast even though the hash would match.
    assert!(!store.verify_by_hash(&hash, "unlisted").await);
    // Listed uuid with a matching hash.txt verifies.
    assert!(store.verify_by_hash(&hash, "listed").await);
    // Listed uuid with the wrong hash is rejected.
    assert!(!store.verify_by_hash("deadbeef", "listed").await);
    // Listed uuid without any hash.txt is rejected.
    assert!(!store.verify_by_hash(&hash, "bare").await);
}

#[tokio::test]
async fn test_cached_answers_survive_out_of_band_edits() {
    let dir = tempfile::tempdir().unwrap();
    let paths = DataPaths::new(dir.path().join("data")).unwrap();
    let store = TrustStore::load(&paths).await;

    let old_hash = TrustStore::compute_hash(b"v1");
    let new_hash = TrustStore::compute_hash(b"v2");
    write_hash_file(&paths, "p1", &old_hash);
    store.add_trusted_plugin("p1", None).await.unwrap();

    // First queries populate the caches.
    assert!(store.verify_by_hash(&old_hash, "p1").await);
    assert!(!store.verify_by_hash(&new_hash, "p1").await);

    // An out-of-band edit must not change the already-cached answers.
    write_hash_file(&paths, "p1", &new_hash);
    assert!(store.verify_by_hash(&old_hash, "p1").await);
    assert!(!store.verify_by_hash(&new_hash, "p1").await);

    // An explicit reset goes back to disk.
    store.reset_cache().await;
    assert!(!store.verify_by_hash(&old_hash, "p1").await);
    assert!(store.verify_by_hash(&new_hash, "p1").await);
}

#[tokio::test]
async fn test_publisher_style_seed_skips_disk_read() {
    let dir = tempfile::tempdir().unwrap();
    let paths = DataPaths::new(dir.path().join("data")).unwrap();
    let store = TrustStore::load(&paths).await;

    store.add_trusted_plugin("p1", None).await.unwrap();
    let hash = TrustStore::compute_hash(b"fresh build");
    // No hash.txt on disk at all: only the seeded cache can answer.
    store.cache_verified_hash(&hash).await;
    assert!(store.verify_by_hash(&hash, "p1").await);
}
