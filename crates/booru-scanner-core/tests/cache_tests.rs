mod common;

use std::fs;

use booru_scanner_core::consensus::ConsensusRules;
use booru_scanner_core::provider::LookupResult;
use booru_scanner_core::records::{ContentRecords, RecordDraft};
use booru_scanner_core::storage::models::CacheEntry;
use booru_scanner_core::storage::now_unix;
use booru_scanner_core::{AppConfig, Error};
use common::*;
use tempfile::tempdir;

const DAY: i64 = 24 * 60 * 60;

fn aged_entry(provider_id: i64, hash: &str, age_secs: i64) -> CacheEntry {
    CacheEntry {
        id: 0,
        provider_id,
        content_hash: hash.to_string(),
        found: true,
        tags: "old".to_string(),
        rating: "safe".to_string(),
        source: None,
        created_at: now_unix() - age_secs,
    }
}

#[test]
fn test_put_then_fresh() {
    let h = Harness::new();
    let p = h.add_provider("danbooru", "https://danbooru.test");
    let cache = h.pipeline.cache(&h.db);

    assert!(!cache.is_fresh("abc", p).unwrap());
    let entry = cache.put("abc", p, &found("cat", "safe", None)).unwrap();
    assert!(entry.id > 0);
    assert!(cache.is_fresh("abc", p).unwrap());
    assert_eq!(cache.get("abc", p).unwrap().unwrap().tags, "cat");
}

#[test]
fn test_not_found_is_cached_as_an_answer() {
    let h = Harness::new();
    let p = h.add_provider("danbooru", "https://danbooru.test");
    let cache = h.pipeline.cache(&h.db);

    cache.put("abc", p, &LookupResult::not_found()).unwrap();
    let entry = cache.get("abc", p).unwrap().unwrap();
    assert!(!entry.found);
    assert!(cache.is_fresh("abc", p).unwrap());
}

#[test]
fn test_stale_entry_is_overwritten_in_place() {
    let h = Harness::new();
    let p = h.add_provider("danbooru", "https://danbooru.test");
    let old_id = h.db.upsert_cache_entry(&aged_entry(p, "abc", 45 * DAY)).unwrap();
    let cache = h.pipeline.cache(&h.db);

    assert!(!cache.is_fresh("abc", p).unwrap());

    let refreshed = cache.put("abc", p, &found("new", "explicit", None)).unwrap();
    assert_eq!(refreshed.id, old_id);
    assert_eq!(h.db.count_cache_entries().unwrap(), 1);
    assert!(cache.is_fresh("abc", p).unwrap());
    assert_eq!(cache.get("abc", p).unwrap().unwrap().tags, "new");
}

#[test]
fn test_threshold_comes_from_config() {
    let h = Harness::with_config(AppConfig {
        staleness_threshold_secs: 60,
        ..test_config()
    });
    let p = h.add_provider("danbooru", "https://danbooru.test");
    h.db.upsert_cache_entry(&aged_entry(p, "abc", 120)).unwrap();
    h.db.upsert_cache_entry(&aged_entry(p, "def", 10)).unwrap();

    let cache = h.pipeline.cache(&h.db);
    assert!(!cache.is_fresh("abc", p).unwrap());
    assert!(cache.is_fresh("def", p).unwrap());
}

#[test]
fn test_put_refused_once_record_exists() {
    let h = Harness::new();
    let p = h.add_provider("danbooru", "https://danbooru.test");
    let tmp = tempdir().unwrap();
    let (path, hash) = write_png(tmp.path(), "cat.png", "cat");

    let cache = h.pipeline.cache(&h.db);
    cache.put(&hash, p, &found("cat", "safe", None)).unwrap();

    let draft = RecordDraft {
        content_hash: hash.clone(),
        rating: "safe".to_string(),
        source: None,
        tags: vec!["cat".to_string()],
    };
    h.records.create_from_file(&path, None, &draft).unwrap();

    let err = cache.put(&hash, p, &found("dog", "explicit", None)).unwrap_err();
    assert!(matches!(err, Error::CacheConflict(_)));
    assert_eq!(cache.get(&hash, p).unwrap().unwrap().tags, "cat");
}

#[test]
fn test_prune_removes_only_stale_entries() {
    let h = Harness::new();
    let p = h.add_provider("danbooru", "https://danbooru.test");
    h.db.upsert_cache_entry(&aged_entry(p, "old", 45 * DAY)).unwrap();
    h.db.upsert_cache_entry(&aged_entry(p, "new", DAY)).unwrap();

    let cache = h.pipeline.cache(&h.db);
    assert_eq!(cache.prune_stale().unwrap(), 1);
    assert!(cache.get("old", p).unwrap().is_none());
    assert!(cache.get("new", p).unwrap().is_some());
}

#[test]
fn test_consensus_reads_every_provider_in_first_seen_order() {
    let h = Harness::new();
    let a = h.add_provider("a", "https://a.test");
    let b = h.add_provider("b", "https://b.test");
    let c = h.add_provider("c", "https://c.test");
    let cache = h.pipeline.cache(&h.db);

    cache.put("abc", b, &found("cat", "explicit", Some("https://b.test/1"))).unwrap();
    cache.put("abc", a, &found("cat ears", "safe", Some("https://a.test/1"))).unwrap();
    cache.put("abc", c, &LookupResult::not_found()).unwrap();

    let ratings = vec!["safe".to_string(), "questionable".to_string(), "explicit".to_string()];
    let rules = ConsensusRules {
        always_tags: &[],
        failure_tags: &["tagme".to_string()],
        ratings: &ratings,
        default_rating: "safe",
    };
    let consensus = cache.consensus("abc", &rules).unwrap();
    assert_eq!(consensus.found_count, 2);
    assert_eq!(consensus.rating, "explicit");
    assert_eq!(consensus.source.as_deref(), Some("https://b.test/1"));
    assert_eq!(consensus.tags, vec!["cat", "ears"]);
}

#[test]
fn test_records_persist_in_file_database() {
    let tmp = tempdir().unwrap();
    let db_path = tmp.path().join("records.db");
    let (path, hash) = write_png(tmp.path(), "cat.png", "cat");
    let draft = RecordDraft {
        content_hash: hash.clone(),
        rating: "safe".to_string(),
        source: None,
        tags: vec!["cat".to_string()],
    };

    {
        let store = booru_scanner_core::records::LocalRecordStore::open(db_path.to_str().unwrap()).unwrap();
        store.create_from_file(&path, None, &draft).unwrap();
    }
    assert!(fs::metadata(&db_path).is_ok());

    let reopened = booru_scanner_core::records::LocalRecordStore::open(db_path.to_str().unwrap()).unwrap();
    assert!(reopened.exists_for_hash(&hash).unwrap());
}
