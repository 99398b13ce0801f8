use super::*;
use crate::code::ValidationPolicy;

const VALID_A: &str = "0123456784";
const VALID_B: &str = "4012345676";
const EAN: &str = "4006381333931";

fn session() -> SessionId {
    SessionId::from_raw("20240309_BA117")
}

/// Memory store whose writes fail while `failing` is set
#[derive(Default)]
struct FlakyKvStore {
    inner: MemoryKvStore,
    failing: std::sync::atomic::AtomicBool,
}

impl FlakyKvStore {
    fn fail_writes(&self, failing: bool) {
        self.failing
            .store(failing, std::sync::atomic::Ordering::SeqCst);
    }
}

impl KeyValueStore for FlakyKvStore {
    fn get(&self, key: &str) -> Result<Option<String>, StoreError> {
        self.inner.get(key)
    }

    fn set(&self, key: &str, value: &str) -> Result<(), StoreError> {
        if self.failing.load(std::sync::atomic::Ordering::SeqCst) {
            return Err(StoreError::Io {
                key: key.to_string(),
                source: std::io::Error::new(std::io::ErrorKind::Other, "disk full"),
            });
        }
        self.inner.set(key, value)
    }

    fn remove(&self, key: &str) -> Result<(), StoreError> {
        self.inner.remove(key)
    }
}

fn create_store(kv: Arc<dyn KeyValueStore>) -> TagStore {
    TagStore::open(
        kv,
        session(),
        CodeNormalizer::new(ValidationPolicy::Strict),
        DEFAULT_MAX_RECORDS,
    )
    .unwrap()
}

#[test]
fn test_record_then_exists() {
    let mut store = create_store(Arc::new(MemoryKvStore::new()));

    assert!(store.record(VALID_A).unwrap().is_saved());
    assert!(store.exists(VALID_A));
    assert!(store.exists("0123-456-784"));
    assert!(!store.exists(VALID_B));
}

#[test]
fn test_duplicate_record_is_rejected() {
    let mut store = create_store(Arc::new(MemoryKvStore::new()));

    assert!(store.record(VALID_A).unwrap().is_saved());
    assert_eq!(
        store.record(VALID_A).unwrap(),
        RecordOutcome::Rejected(Rejection::Duplicate)
    );
    assert_eq!(store.counts().total, 1);
}

#[test]
fn test_invalid_record_is_rejected() {
    let mut store = create_store(Arc::new(MemoryKvStore::new()));

    assert_eq!(
        store.record("4012345678").unwrap(),
        RecordOutcome::Rejected(Rejection::InvalidCode)
    );
    assert_eq!(
        store.record("12345").unwrap(),
        RecordOutcome::Rejected(Rejection::InvalidCode)
    );
    assert_eq!(store.counts(), TagCounts::default());
}

#[test]
fn test_lenient_record_carries_note() {
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
    let mut store = TagStore::open(
        kv.clone(),
        session(),
        CodeNormalizer::new(ValidationPolicy::Lenient),
        DEFAULT_MAX_RECORDS,
    )
    .unwrap();

    match store.record("4012345678").unwrap() {
        RecordOutcome::Saved(record) => assert_eq!(record.note, Some(RecordNote::Lenient)),
        other => panic!("expected saved record, got {:?}", other),
    }

    let raw = kv.get(&tags_key(&session())).unwrap().unwrap();
    assert!(raw.contains("\"note\":\"lenient\""));
}

#[test]
fn test_mark_matched_counts() {
    let mut store = create_store(Arc::new(MemoryKvStore::new()));
    store.record(VALID_A).unwrap();
    store.record(EAN).unwrap();

    assert!(!store.mark_matched(VALID_B).unwrap());
    assert_eq!(store.counts(), TagCounts { total: 2, matched: 0 });

    assert!(store.mark_matched(VALID_A).unwrap());
    assert_eq!(store.counts(), TagCounts { total: 2, matched: 1 });

    // Second call is a no-op
    assert!(store.mark_matched(VALID_A).unwrap());
    assert_eq!(store.counts(), TagCounts { total: 2, matched: 1 });
}

#[test]
fn test_records_persist_across_reopen() {
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
    {
        let mut store = create_store(kv.clone());
        store.record(VALID_A).unwrap();
        store.record(EAN).unwrap();
        store.mark_matched(EAN).unwrap();
    }

    let store = create_store(kv.clone());
    assert_eq!(store.counts(), TagCounts { total: 2, matched: 1 });
    // Newest first
    assert_eq!(store.records()[0].code, EAN);
    assert!(store.records()[0].matched_at.is_some());

    let raw = kv.get(&tags_key(&session())).unwrap().unwrap();
    assert!(raw.contains("\"matchedTs\""));
    assert!(raw.contains("\"ts\""));
}

#[test]
fn test_sessions_do_not_leak() {
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
    let mut first = create_store(kv.clone());
    first.record(VALID_A).unwrap();

    let other = TagStore::open(
        kv,
        SessionId::from_raw("20240309_LH400"),
        CodeNormalizer::default(),
        DEFAULT_MAX_RECORDS,
    )
    .unwrap();
    assert!(!other.exists(VALID_A));
}

#[test]
fn test_cap_evicts_oldest() {
    let mut store = TagStore::open(
        Arc::new(MemoryKvStore::new()),
        session(),
        CodeNormalizer::default(),
        2,
    )
    .unwrap();

    store.record(VALID_A).unwrap();
    store.record(VALID_B).unwrap();
    store.record(EAN).unwrap();

    assert_eq!(store.counts().total, 2);
    assert!(!store.exists(VALID_A));
    assert!(store.exists(VALID_B));
    assert!(store.exists(EAN));
}

#[test]
fn test_unmatch_only_reverses_latest() {
    let mut store = create_store(Arc::new(MemoryKvStore::new()));
    store.record(VALID_A).unwrap();
    store.record(VALID_B).unwrap();
    store.mark_matched(VALID_A).unwrap();
    store.mark_matched(VALID_B).unwrap();

    // VALID_A is not the most recent match
    assert!(!store.unmatch(VALID_A).unwrap());
    assert_eq!(store.counts().matched, 2);

    assert!(store.unmatch(VALID_B).unwrap());
    assert_eq!(store.counts().matched, 1);

    // Now VALID_A is on top of the history
    assert!(store.unmatch(VALID_A).unwrap());
    assert_eq!(store.counts().matched, 0);
    assert!(!store.unmatch(VALID_A).unwrap());
}

#[test]
fn test_undo_last_match() {
    let mut store = create_store(Arc::new(MemoryKvStore::new()));
    store.record(EAN).unwrap();
    assert_eq!(store.undo_last_match().unwrap(), None);

    store.mark_matched(EAN).unwrap();
    assert_eq!(store.undo_last_match().unwrap(), Some(EAN.to_string()));
    assert_eq!(store.counts().matched, 0);
    assert!(store.records()[0].matched_at.is_none());

    // Can be matched again after the undo
    assert!(store.mark_matched(EAN).unwrap());
    assert_eq!(store.counts().matched, 1);
}

#[test]
fn test_undo_order_survives_reopen() {
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
    let stored = format!(
        r#"[{{"code":"{}","ts":1000,"matched":true,"matchedTs":5000}},
            {{"code":"{}","ts":900,"matched":true,"matchedTs":7000}},
            {{"code":"{}","ts":800,"matched":false}}]"#,
        VALID_A, VALID_B, EAN
    );
    kv.set(&tags_key(&session()), &stored).unwrap();

    let mut store = create_store(kv);
    assert_eq!(store.undo_last_match().unwrap(), Some(VALID_B.to_string()));
    assert_eq!(store.undo_last_match().unwrap(), Some(VALID_A.to_string()));
    assert_eq!(store.undo_last_match().unwrap(), None);
    assert_eq!(store.counts().matched, 0);
}

#[test]
fn test_corrupt_records_surface_error() {
    let kv: Arc<dyn KeyValueStore> = Arc::new(MemoryKvStore::new());
    kv.set(&tags_key(&session()), "{broken").unwrap();

    let result = TagStore::open(kv, session(), CodeNormalizer::default(), 10);
    assert!(matches!(result, Err(StoreError::Corrupt { .. })));
}

#[test]
fn test_file_backed_store() {
    let dir = tempfile::tempdir().unwrap();
    let kv: Arc<dyn KeyValueStore> = Arc::new(FileKvStore::open(dir.path()).unwrap());

    let mut store = create_store(kv.clone());
    store.record(VALID_A).unwrap();

    let reopened = create_store(kv);
    assert!(reopened.exists(VALID_A));
    assert!(dir.path().join("bagtag_tags_20240309_BA117.json").exists());
}

#[test]
fn test_export_csv_from_store() {
    let mut store = create_store(Arc::new(MemoryKvStore::new()));
    store.record(VALID_A).unwrap();
    store.mark_matched(VALID_A).unwrap();

    let csv = store.export_csv();
    let mut lines = csv.lines();
    assert_eq!(lines.next(), Some("code,matched,ts"));
    assert!(lines.next().unwrap().starts_with("0123456784,true,"));
}

#[test]
fn test_failed_write_leaves_records_unchanged() {
    let kv = Arc::new(FlakyKvStore::default());
    let mut store = create_store(kv.clone());
    assert!(store.record(VALID_A).unwrap().is_saved());

    kv.fail_writes(true);
    assert!(store.record(VALID_B).is_err());
    assert!(!store.contains(VALID_B));
    assert!(store.mark_matched(VALID_A).is_err());
    assert_eq!(store.counts(), TagCounts { total: 1, matched: 0 });

    // The next successful write must not carry the failed changes
    kv.fail_writes(false);
    assert!(store.record(EAN).unwrap().is_saved());
    assert_eq!(store.undo_last_match().unwrap(), None);

    let reopened = create_store(kv.clone());
    assert!(!reopened.contains(VALID_B));
    assert_eq!(reopened.counts(), TagCounts { total: 2, matched: 0 });
}

#[test]
fn test_failed_undo_keeps_history() {
    let kv = Arc::new(FlakyKvStore::default());
    let mut store = create_store(kv.clone());
    store.record(VALID_A).unwrap();
    assert!(store.mark_matched(VALID_A).unwrap());

    kv.fail_writes(true);
    assert!(store.undo_last_match().is_err());
    assert_eq!(store.counts().matched, 1);

    kv.fail_writes(false);
    assert_eq!(store.undo_last_match().unwrap(), Some(VALID_A.to_string()));
    assert_eq!(store.counts().matched, 0);
}
