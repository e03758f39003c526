//! Cache store behavior on a real cache directory: entry selection,
//! corruption tolerance, identifier escaping and clearing.

mod common;

use chrono::Utc;
use common::{iv, weekdays};
use pricecache_core::classify::MatchResult;
use pricecache_core::domain::{CacheKey, Interval, PriceSeries};
use pricecache_core::store::{
    CacheStore, EntryId, EntryRecord, EntrySummary, MemoryBackend, StorageBackend, StoreError,
};
use std::fs;
use std::path::Path;

fn key(symbol: &str) -> CacheKey {
    CacheKey::new(symbol, "Close").unwrap()
}

fn put(store: &CacheStore, symbol: &str, interval: Interval) -> EntryId {
    let series = PriceSeries::new(symbol, "Close", weekdays(&interval, 0.0));
    store.persist(&key(symbol), interval, &series, Utc::now()).unwrap()
}

fn file_name(id: &EntryId) -> String {
    id.encode()
}

fn corrupt_count(store: &CacheStore) -> usize {
    store
        .entries()
        .unwrap()
        .iter()
        .filter(|e| matches!(e, EntrySummary::Corrupt { .. }))
        .count()
}

fn rewrite_record(dir: &Path, id: &EntryId, edit: impl FnOnce(&mut EntryRecord)) {
    let path = dir.join(file_name(id));
    let mut record: EntryRecord = serde_json::from_slice(&fs::read(&path).unwrap()).unwrap();
    edit(&mut record);
    fs::write(&path, serde_json::to_vec(&record).unwrap()).unwrap();
}

#[test]
fn persisted_entry_reloads_exactly() {
    let dir = tempfile::tempdir().unwrap();
    let interval = iv((2024, 1, 1), (2024, 3, 1));
    {
        let store = CacheStore::open(dir.path()).unwrap();
        put(&store, "AAPL", interval);
    }

    let store = CacheStore::open(dir.path()).unwrap();
    let found = store.lookup(&key("AAPL"), &interval);
    assert_eq!(found.matched, MatchResult::Exact);
    let entry = found.entry.unwrap();
    assert_eq!(entry.points(), weekdays(&interval, 0.0).as_slice());
    assert!(dir.path().join("AAPL_Close_2024-01-01_2024-03-01.json").is_file());
}

#[test]
fn exact_beats_contains() {
    let store = CacheStore::in_memory();
    put(&store, "AAPL", iv((2024, 1, 1), (2024, 6, 1)));
    put(&store, "AAPL", iv((2024, 2, 1), (2024, 3, 1)));

    let found = store.lookup(&key("AAPL"), &iv((2024, 2, 1), (2024, 3, 1)));
    assert_eq!(found.matched, MatchResult::Exact);
}

#[test]
fn contains_beats_overlap() {
    let store = CacheStore::in_memory();
    put(&store, "AAPL", iv((2024, 1, 1), (2024, 2, 15)));
    put(&store, "AAPL", iv((2024, 1, 15), (2024, 3, 31)));

    let found = store.lookup(&key("AAPL"), &iv((2024, 2, 1), (2024, 3, 1)));
    assert_eq!(found.matched, MatchResult::Contains);
    assert_eq!(found.entry.unwrap().interval(), iv((2024, 1, 15), (2024, 3, 31)));
}

#[test]
fn smaller_gap_wins_among_overlaps() {
    let store = CacheStore::in_memory();
    put(&store, "AAPL", iv((2024, 1, 1), (2024, 1, 31)));
    put(&store, "AAPL", iv((2024, 1, 1), (2024, 5, 31)));

    let found = store.lookup(&key("AAPL"), &iv((2024, 1, 1), (2024, 6, 30)));
    assert_eq!(
        found.matched,
        MatchResult::OverlapAfter {
            gap: iv((2024, 6, 1), (2024, 6, 30))
        }
    );
}

#[test]
fn ties_go_to_first_identifier() {
    let store = CacheStore::in_memory();
    // both contain the request; the earlier end date sorts first
    put(&store, "AAPL", iv((2024, 1, 1), (2024, 6, 1)));
    put(&store, "AAPL", iv((2024, 1, 1), (2024, 3, 1)));

    for _ in 0..3 {
        let found = store.lookup(&key("AAPL"), &iv((2024, 2, 1), (2024, 2, 15)));
        assert_eq!(found.entry.unwrap().interval(), iv((2024, 1, 1), (2024, 3, 1)));
    }
}

#[test]
fn malformed_files_are_skipped() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path()).unwrap();
    let interval = iv((2024, 1, 1), (2024, 3, 1));
    put(&store, "AAPL", interval);

    fs::write(dir.path().join("AAPL_Close_2024-01-01.json"), b"{}").unwrap();
    fs::write(dir.path().join("AAPL_Close_2023-01-01_2024-06-01.json"), b"not json").unwrap();
    fs::write(dir.path().join("AAPL_Close_2024-13-01_2024-06-01.json"), b"{}").unwrap();

    let found = store.lookup(&key("AAPL"), &interval);
    assert_eq!(found.matched, MatchResult::Exact);
    assert_eq!(corrupt_count(&store), 3);
}

#[test]
fn corrupt_winner_falls_back_to_next_candidate() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path()).unwrap();
    let requested = iv((2024, 2, 1), (2024, 2, 15));
    let broken = put(&store, "AAPL", requested);
    put(&store, "AAPL", iv((2024, 1, 1), (2024, 6, 1)));

    rewrite_record(dir.path(), &broken, |r| r.point_count += 1);

    let found = store.lookup(&key("AAPL"), &requested);
    assert_eq!(found.matched, MatchResult::Contains);
    assert_eq!(found.entry.unwrap().interval(), iv((2024, 1, 1), (2024, 6, 1)));
}

#[test]
fn checksum_mismatch_is_a_miss() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path()).unwrap();
    let interval = iv((2024, 1, 1), (2024, 3, 1));
    let id = put(&store, "AAPL", interval);

    rewrite_record(dir.path(), &id, |r| r.values[0] += 1.0);

    let found = store.lookup(&key("AAPL"), &interval);
    assert!(found.matched.is_miss());
    assert!(found.entry.is_none());
    assert_eq!(corrupt_count(&store), 1);
}

#[test]
fn payload_under_wrong_identifier_is_corrupt() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path()).unwrap();
    let id = put(&store, "MSFT", iv((2024, 1, 1), (2024, 3, 1)));
    fs::rename(
        dir.path().join(file_name(&id)),
        dir.path().join("AAPL_Close_2024-01-01_2024-03-01.json"),
    )
    .unwrap();

    assert!(store.lookup(&key("AAPL"), &iv((2024, 1, 1), (2024, 3, 1))).matched.is_miss());
}

#[test]
fn delimiter_characters_survive_the_filesystem() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path()).unwrap();
    let interval = iv((2024, 1, 1), (2024, 1, 31));

    for symbol in ["BRK_B", "A/B", "50%OFF", "^GSPC", ".INX"] {
        put(&store, symbol, interval);
    }
    for symbol in ["BRK_B", "A/B", "50%OFF", "^GSPC", ".INX"] {
        let found = store.lookup(&key(symbol), &interval);
        assert_eq!(found.matched, MatchResult::Exact, "{symbol}");
        assert_eq!(found.entry.unwrap().key().symbol(), symbol);
    }
    // BRK_B must not be mistaken for BRK
    assert!(store.lookup(&key("BRK"), &interval).matched.is_miss());
    assert_eq!(corrupt_count(&store), 0);
    assert_eq!(store.entries().unwrap().len(), 5);
}

#[test]
fn field_is_part_of_the_key() {
    let store = CacheStore::in_memory();
    let interval = iv((2024, 1, 1), (2024, 1, 31));
    put(&store, "AAPL", interval);
    let open = CacheKey::new("AAPL", "Open").unwrap();
    assert!(store.lookup(&open, &interval).matched.is_miss());
}

#[test]
fn clear_removes_valid_and_corrupt_entries() {
    let dir = tempfile::tempdir().unwrap();
    let store = CacheStore::open(dir.path()).unwrap();
    put(&store, "AAPL", iv((2024, 1, 1), (2024, 3, 1)));
    put(&store, "MSFT", iv((2024, 1, 1), (2024, 3, 1)));
    fs::write(dir.path().join("garbage.json"), b"x").unwrap();
    fs::write(dir.path().join("README.txt"), b"kept").unwrap();

    let report = store.clear().unwrap();

    assert_eq!(report.removed, 3);
    assert!(report.is_complete());
    assert!(store.entries().unwrap().is_empty());
    assert!(dir.path().join("README.txt").exists());
}

/// Memory backend whose deletes fail for one identifier.
struct Sticky {
    inner: MemoryBackend,
    stuck: String,
}

impl StorageBackend for Sticky {
    fn enumerate(&self) -> Result<Vec<String>, StoreError> {
        self.inner.enumerate()
    }

    fn read(&self, id: &str) -> Result<Vec<u8>, StoreError> {
        self.inner.read(id)
    }

    fn write(&self, id: &str, bytes: &[u8]) -> Result<(), StoreError> {
        self.inner.write(id, bytes)
    }

    fn delete(&self, id: &str) -> Result<(), StoreError> {
        if id == self.stuck {
            return Err(StoreError::Io {
                id: id.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "locked"),
            });
        }
        self.inner.delete(id)
    }

    fn describe(&self) -> String {
        "sticky".to_string()
    }
}

#[test]
fn clear_reports_each_failure() {
    let stuck = EntryId::new(key("MSFT"), iv((2024, 1, 1), (2024, 3, 1)));
    let store = CacheStore::new(Sticky {
        inner: MemoryBackend::new(),
        stuck: stuck.encode(),
    });
    put(&store, "AAPL", iv((2024, 1, 1), (2024, 3, 1)));
    put(&store, "MSFT", iv((2024, 1, 1), (2024, 3, 1)));
    put(&store, "SPY", iv((2024, 1, 1), (2024, 3, 1)));

    let report = store.clear().unwrap();

    assert_eq!(report.removed, 2);
    assert_eq!(report.failures.len(), 1);
    assert_eq!(report.failures[0].0, stuck.encode());
    assert_eq!(store.entries().unwrap().len(), 1);
}
