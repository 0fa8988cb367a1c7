// 🔄 Reconciliation Driver
//
// Walks the extracted batch strictly in input order. Per record:
//   Fetch → Classify → Apply → Tally
// A bad record is recorded and skipped; a store failure aborts the run and
// hands back everything tallied so far.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use crate::classifier::{classify_detailed, ChangeKind};
use crate::config::ScdConfig;
use crate::error::{AbortedRun, Result, ScdError};
use crate::observability::run_span;
use crate::store::DimensionStore;
use crate::temporal::{normalize_timestamp, run_timestamp_now, SourceRecord};
use crate::writer::{ApplyOutcome, VersionWriter};

/// A stale row gets one re-fetch and re-classify before the record fails.
const MAX_ATTEMPTS: usize = 2;

// ============================================================================
// RUN SUMMARY
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RecordError {
    pub natural_key: Option<String>,
    pub row: Option<usize>,
    pub reason: String,
}

/// The only artifact a run exposes to its caller.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RunSummary {
    pub run_id: String,
    pub run_timestamp: DateTime<Utc>,
    pub processed: usize,
    pub inserted: usize,
    pub type1_updated: usize,
    pub type2_versioned: usize,
    pub unchanged: usize,
    pub failed: usize,
    pub duration_ms: u64,
    pub cancelled: bool,
    pub errors: Vec<RecordError>,
}

impl RunSummary {
    fn new(run_id: String, run_timestamp: DateTime<Utc>) -> Self {
        RunSummary {
            run_id,
            run_timestamp,
            processed: 0,
            inserted: 0,
            type1_updated: 0,
            type2_versioned: 0,
            unchanged: 0,
            failed: 0,
            duration_ms: 0,
            cancelled: false,
            errors: Vec::new(),
        }
    }

    /// Records that changed the dimension
    pub fn writes(&self) -> usize {
        self.inserted + self.type1_updated + self.type2_versioned
    }

    pub fn is_clean(&self) -> bool {
        self.failed == 0 && !self.cancelled
    }

    pub fn summary(&self) -> String {
        format!(
            "processed {}: {} inserted, {} type-1 updated, {} type-2 versioned, {} unchanged, {} failed in {} ms",
            self.processed,
            self.inserted,
            self.type1_updated,
            self.type2_versioned,
            self.unchanged,
            self.failed,
            self.duration_ms
        )
    }

    fn tally(&mut self, kind: ChangeKind) {
        match kind {
            ChangeKind::NewEntity => self.inserted += 1,
            ChangeKind::Type1Change => self.type1_updated += 1,
            ChangeKind::Type2Change => self.type2_versioned += 1,
            ChangeKind::Unchanged => self.unchanged += 1,
        }
    }

    fn record_failure(&mut self, natural_key: Option<String>, row: Option<usize>, reason: String) {
        self.failed += 1;
        self.errors.push(RecordError {
            natural_key,
            row,
            reason,
        });
    }
}

// ============================================================================
// DRIVER
// ============================================================================

/// Per-record terminal state
#[derive(Debug, Clone, PartialEq)]
pub enum RecordOutcome {
    Applied(ChangeKind),
    Failed(String),
}

pub struct ReconciliationDriver<'a, S: DimensionStore + ?Sized> {
    store: &'a mut S,
    config: &'a ScdConfig,
    run_id: String,
    run_timestamp: DateTime<Utc>,
    cancel: Option<Arc<AtomicBool>>,
}

impl<'a, S: DimensionStore + ?Sized> ReconciliationDriver<'a, S> {
    pub fn new(store: &'a mut S, config: &'a ScdConfig) -> Self {
        ReconciliationDriver {
            store,
            config,
            run_id: uuid::Uuid::new_v4().to_string(),
            run_timestamp: run_timestamp_now(),
            cancel: None,
        }
    }

    /// Builder: explicit load date instead of now
    pub fn with_run_timestamp(mut self, run_timestamp: DateTime<Utc>) -> Self {
        self.run_timestamp = normalize_timestamp(run_timestamp);
        self
    }

    /// Builder: flag checked between records; set it to stop the run early
    pub fn with_cancel_flag(mut self, cancel: Arc<AtomicBool>) -> Self {
        self.cancel = Some(cancel);
        self
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Abort before any record was read, e.g. on a bad header. The summary
    /// carries this run's id and timestamp with nothing processed.
    pub fn abort(&self, error: ScdError) -> AbortedRun {
        tracing::error!(run_id = %self.run_id, error = %error, "run aborted before the first record");
        AbortedRun {
            summary: RunSummary::new(self.run_id.clone(), self.run_timestamp),
            error,
        }
    }

    /// Reconcile a batch. Record errors are tallied; batch-fatal errors abort.
    pub fn run<I>(&mut self, records: I) -> std::result::Result<RunSummary, AbortedRun>
    where
        I: IntoIterator<Item = Result<SourceRecord>>,
    {
        let started = Instant::now();
        let mut summary = RunSummary::new(self.run_id.clone(), self.run_timestamp);

        let span = run_span(&self.run_id, &self.config.table, &self.run_timestamp.to_rfc3339());
        let _guard = span.enter();

        if let Err(error) = self.config.validate() {
            return Err(AbortedRun { summary, error });
        }

        tracing::info!("reconciliation started");

        for item in records {
            if self.is_cancelled() {
                tracing::warn!(processed = summary.processed, "run cancelled between records");
                summary.cancelled = true;
                break;
            }

            summary.processed += 1;

            let outcome = match item {
                Ok(record) => match self.reconcile_record(&record) {
                    Ok(outcome) => (Some(record.natural_key), Some(record.row), Ok(outcome)),
                    Err(err) => (Some(record.natural_key), Some(record.row), Err(err)),
                },
                Err(err) => {
                    let key = err.natural_key().map(str::to_string);
                    let row = match &err {
                        ScdError::MalformedInput { row, .. } => Some(*row),
                        _ => None,
                    };
                    (key, row, Err(err))
                }
            };

            match outcome {
                (_, _, Ok(RecordOutcome::Applied(kind))) => summary.tally(kind),
                (key, row, Ok(RecordOutcome::Failed(reason))) => {
                    tracing::warn!(natural_key = ?key, %reason, "record failed");
                    summary.record_failure(key, row, reason);
                }
                (key, row, Err(err)) if err.is_batch_fatal() => {
                    tracing::error!(natural_key = ?key, error = %err, "aborting run");
                    summary.record_failure(key, row, err.to_string());
                    summary.duration_ms = elapsed_ms(started);
                    return Err(AbortedRun { summary, error: err });
                }
                (key, row, Err(err)) => {
                    tracing::warn!(natural_key = ?key, error = %err, "record failed");
                    summary.record_failure(key, row, err.to_string());
                }
            }
        }

        summary.duration_ms = elapsed_ms(started);
        tracing::info!(
            processed = summary.processed,
            inserted = summary.inserted,
            type1_updated = summary.type1_updated,
            type2_versioned = summary.type2_versioned,
            unchanged = summary.unchanged,
            failed = summary.failed,
            duration_ms = summary.duration_ms,
            "reconciliation finished"
        );

        Ok(summary)
    }

    /// Fetch → Classify → Apply for one record, with one retry on a stale row.
    pub fn reconcile_record(&mut self, record: &SourceRecord) -> Result<RecordOutcome> {
        let writer = VersionWriter::new(self.run_id.clone(), self.run_timestamp, &self.config.fields);
        let mut last_reason = String::new();

        for attempt in 1..=MAX_ATTEMPTS {
            let current = self.store.get_current(&record.natural_key)?;
            let classification = classify_detailed(current.as_ref(), record, &self.config.fields);

            match writer.apply(&mut *self.store, classification.kind, current.as_ref(), record)? {
                ApplyOutcome::Applied { kind, surrogate_key, .. } => {
                    match kind {
                        ChangeKind::NewEntity => tracing::info!(
                            natural_key = %record.natural_key,
                            surrogate_key = ?surrogate_key,
                            "INSERT: new entity"
                        ),
                        ChangeKind::Type2Change => tracing::info!(
                            natural_key = %record.natural_key,
                            surrogate_key = ?surrogate_key,
                            fields = ?classification.type2_changed,
                            "SCD2: new version"
                        ),
                        ChangeKind::Type1Change => tracing::info!(
                            natural_key = %record.natural_key,
                            fields = ?classification.type1_changed,
                            "SCD1: updated in place"
                        ),
                        ChangeKind::Unchanged => {
                            tracing::debug!(natural_key = %record.natural_key, "unchanged")
                        }
                    }
                    return Ok(RecordOutcome::Applied(kind));
                }
                ApplyOutcome::Failed { reason } => {
                    tracing::warn!(natural_key = %record.natural_key, attempt, %reason, "stale row");
                    last_reason = reason;
                }
            }
        }

        Ok(RecordOutcome::Failed(format!(
            "gave up after {} attempts: {}",
            MAX_ATTEMPTS, last_reason
        )))
    }

    fn is_cancelled(&self) -> bool {
        self.cancel
            .as_ref()
            .map_or(false, |flag| flag.load(Ordering::SeqCst))
    }
}

fn elapsed_ms(started: Instant) -> u64 {
    u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX)
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::TrackedFields;
    use crate::extractor::RecordExtractor;
    use crate::store::{MemoryStore, SqliteStore};
    use crate::temporal::{ChangeEvent, DimensionRow, NewDimensionRow};
    use chrono::{Duration, TimeZone};
    use std::cell::{Cell, RefCell};
    use std::io::Cursor;
    use std::path::Path;

    const HEADER: &str = "customer_id,first_name,last_name,email,company_name,phone\n";

    fn t(day: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, day, 0, 0, 0).unwrap()
    }

    fn batch(body: &str) -> Vec<Result<SourceRecord>> {
        let csv = format!("{}{}", HEADER, body);
        RecordExtractor::from_csv_reader(Cursor::new(csv.into_bytes()), b',', &ScdConfig::default())
            .unwrap()
            .collect()
    }

    fn run_at<S: DimensionStore>(store: &mut S, day: u32, body: &str) -> RunSummary {
        let config = ScdConfig::default();
        ReconciliationDriver::new(store, &config)
            .with_run_timestamp(t(day))
            .run(batch(body))
            .unwrap()
    }

    const INITIAL: &str = "C001,Ann,Lee,ann@example.com,Acme,555-0001\n\
                           C002,Bob,Ray,bob@example.com,Initech,555-0001\n";

    #[test]
    fn test_first_load_inserts_everything() {
        let mut store = MemoryStore::new();
        let summary = run_at(&mut store, 1, INITIAL);

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.inserted, 2);
        assert_eq!(summary.failed, 0);
        assert!(summary.is_clean());

        let row = store.get_current("C001").unwrap().unwrap();
        assert_eq!(row.effective_start, t(1));
    }

    #[test]
    fn test_second_identical_run_is_idempotent() {
        let mut store = MemoryStore::new();
        run_at(&mut store, 1, INITIAL);
        let events_before = store.events().len();

        let summary = run_at(&mut store, 2, INITIAL);
        assert_eq!(summary.unchanged, 2);
        assert_eq!(summary.writes(), 0);
        assert_eq!(store.events().len(), events_before);
        assert_eq!(store.row_count(), 2);
    }

    #[test]
    fn test_mixed_changes_are_tallied() {
        let mut store = MemoryStore::new();
        run_at(&mut store, 1, INITIAL);

        let summary = run_at(
            &mut store,
            2,
            "C001,Ann,Lee,ann@example.com,Globex,555-0001\n\
             C002,Bob,Ray,bob@example.com,Initech,555-9999\n\
             C010,Cy,Fox,cy@example.com,Hooli,555-0100\n",
        );

        assert_eq!(summary.type2_versioned, 1);
        assert_eq!(summary.type1_updated, 1);
        assert_eq!(summary.inserted, 1);
        assert_eq!(store.history("C001").unwrap().len(), 2);
        assert_eq!(store.history("C002").unwrap().len(), 1);
    }

    #[test]
    fn test_malformed_row_is_recorded_and_batch_continues() {
        let mut store = MemoryStore::new();
        let summary = run_at(
            &mut store,
            1,
            ",Ann,Lee,ann@example.com,Acme,555\n\
             C002,Bob,Ray,bob@example.com,Initech,555-0001\n",
        );

        assert_eq!(summary.processed, 2);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.errors[0].row, Some(1));
        assert!(summary.errors[0].reason.contains("natural key"));
    }

    #[test]
    fn test_repeated_key_observes_earlier_write() {
        let mut store = MemoryStore::new();
        let summary = run_at(
            &mut store,
            1,
            "C001,Ann,Lee,ann@example.com,Acme,555-0001\n\
             C001,Ann,Lee,ann@example.com,Acme,555-0002\n",
        );

        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.type1_updated, 1);
        assert_eq!(store.row_count(), 1);
    }

    #[test]
    fn test_second_type2_in_same_run_fails_record() {
        let mut store = MemoryStore::new();
        let summary = run_at(
            &mut store,
            1,
            "C001,Ann,Lee,ann@example.com,Acme,555-0001\n\
             C001,Ann,Lee,ann@example.com,Globex,555-0001\n",
        );

        assert_eq!(summary.inserted, 1);
        assert_eq!(summary.failed, 1);
        assert_eq!(summary.errors[0].natural_key.as_deref(), Some("C001"));
        assert_eq!(store.row_count(), 1);
    }

    /// Hands out an outdated copy of the current row a fixed number of times.
    struct StaleReads {
        inner: MemoryStore,
        stale_reads_left: Cell<usize>,
    }

    impl DimensionStore for StaleReads {
        fn get_current(&self, k: &str) -> Result<Option<DimensionRow>> {
            let row = self.inner.get_current(k)?;
            // Only reads outside a transaction are the driver's fetch
            if self.stale_reads_left.get() > 0 && !self.inner.in_transaction() {
                self.stale_reads_left.set(self.stale_reads_left.get() - 1);
                return Ok(row.map(|mut r| {
                    r.updated_at = r.updated_at - Duration::seconds(1);
                    r
                }));
            }
            Ok(row)
        }
        fn insert(&mut self, row: NewDimensionRow) -> Result<i64> {
            self.inner.insert(row)
        }
        fn update(&mut self, row: &DimensionRow) -> Result<()> {
            self.inner.update(row)
        }
        fn history(&self, k: &str) -> Result<Vec<DimensionRow>> {
            self.inner.history(k)
        }
        fn all_rows(&self) -> Result<Vec<DimensionRow>> {
            self.inner.all_rows()
        }
        fn record_event(&mut self, e: &ChangeEvent) -> Result<()> {
            self.inner.record_event(e)
        }
        fn begin(&mut self) -> Result<()> {
            self.inner.begin()
        }
        fn commit(&mut self) -> Result<()> {
            self.inner.commit()
        }
        fn rollback(&mut self) -> Result<()> {
            self.inner.rollback()
        }
    }

    fn stale_store(stale_reads: usize) -> StaleReads {
        let mut inner = MemoryStore::new();
        run_at(&mut inner, 1, INITIAL);
        StaleReads {
            inner,
            stale_reads_left: Cell::new(stale_reads),
        }
    }

    #[test]
    fn test_stale_row_is_retried_once() {
        let mut store = stale_store(1);
        let summary = run_at(&mut store, 2, "C001,Ann,Lee,ann@example.com,Acme,555-4444\n");

        assert_eq!(summary.type1_updated, 1);
        assert_eq!(summary.failed, 0);
        assert_eq!(store.inner.get_current("C001").unwrap().unwrap().get("phone"), Some("555-4444"));
    }

    #[test]
    fn test_stale_row_twice_fails_record() {
        let mut store = stale_store(2);
        let summary = run_at(&mut store, 2, "C001,Ann,Lee,ann@example.com,Acme,555-4444\n");

        assert_eq!(summary.failed, 1);
        assert!(summary.errors[0].reason.contains("stale"));
        assert_eq!(store.inner.get_current("C001").unwrap().unwrap().get("phone"), Some("555-0001"));
    }

    /// Store that goes away after a number of successful fetches.
    struct Unreachable {
        inner: MemoryStore,
        fetches_left: Cell<usize>,
    }

    impl DimensionStore for Unreachable {
        fn get_current(&self, k: &str) -> Result<Option<DimensionRow>> {
            if self.fetches_left.get() == 0 {
                return Err(ScdError::StoreUnavailable("connection reset".to_string()));
            }
            self.fetches_left.set(self.fetches_left.get() - 1);
            self.inner.get_current(k)
        }
        fn insert(&mut self, row: NewDimensionRow) -> Result<i64> {
            self.inner.insert(row)
        }
        fn update(&mut self, row: &DimensionRow) -> Result<()> {
            self.inner.update(row)
        }
        fn history(&self, k: &str) -> Result<Vec<DimensionRow>> {
            self.inner.history(k)
        }
        fn all_rows(&self) -> Result<Vec<DimensionRow>> {
            self.inner.all_rows()
        }
        fn record_event(&mut self, e: &ChangeEvent) -> Result<()> {
            self.inner.record_event(e)
        }
        fn begin(&mut self) -> Result<()> {
            self.inner.begin()
        }
        fn commit(&mut self) -> Result<()> {
            self.inner.commit()
        }
        fn rollback(&mut self) -> Result<()> {
            self.inner.rollback()
        }
    }

    #[test]
    fn test_store_failure_aborts_with_partial_summary() {
        // Driver fetch + writer re-check per new record
        let mut store = Unreachable {
            inner: MemoryStore::new(),
            fetches_left: Cell::new(2),
        };
        let config = ScdConfig::default();
        let aborted = ReconciliationDriver::new(&mut store, &config)
            .with_run_timestamp(t(1))
            .run(batch(
                "C001,Ann,Lee,ann@example.com,Acme,555-0001\n\
                 C002,Bob,Ray,bob@example.com,Initech,555-0001\n\
                 C003,Cy,Fox,cy@example.com,Hooli,555-0001\n",
            ))
            .unwrap_err();

        assert!(matches!(aborted.error, ScdError::StoreUnavailable(_)));
        assert_eq!(aborted.summary.inserted, 1);
        assert_eq!(aborted.summary.processed, 2);
        assert_eq!(store.inner.row_count(), 1);
    }

    #[test]
    fn test_cancel_between_records() {
        let mut store = MemoryStore::new();
        let config = ScdConfig::default();
        let cancel = Arc::new(AtomicBool::new(true));

        let summary = ReconciliationDriver::new(&mut store, &config)
            .with_cancel_flag(cancel)
            .run(batch(INITIAL))
            .unwrap();

        assert!(summary.cancelled);
        assert_eq!(summary.processed, 0);
        assert_eq!(store.row_count(), 0);
    }

    #[test]
    fn test_invalid_config_aborts_before_any_record() {
        let mut store = MemoryStore::new();
        let mut config = ScdConfig::default();
        config.fields.type1.insert("company_name".to_string());

        let aborted = ReconciliationDriver::new(&mut store, &config)
            .run(Vec::<Result<SourceRecord>>::new())
            .unwrap_err();
        assert!(matches!(aborted.error, ScdError::InvalidConfig(_)));
    }

    #[test]
    fn test_sqlite_backend_end_to_end() {
        let mut store = SqliteStore::open_in_memory("dim_customer").unwrap();
        store.setup().unwrap();

        run_at(&mut store, 1, INITIAL);
        let summary = run_at(&mut store, 2, "C001,Ann,Lee,ann@example.com,Globex,555-0001\n");
        assert_eq!(summary.type2_versioned, 1);

        let history = store.history("C001").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].effective_end, Some(t(2)));
        assert!(history[1].is_current);

        let events = store.events_for("C001").unwrap();
        assert_eq!(events.len(), 3);

        let idle = run_at(&mut store, 3, "C002,Bob,Ray,bob@example.com,Initech,555-0001\n");
        assert_eq!(idle.unchanged, 1);
    }

    /// Two connections on one database file. Every fetch made outside a
    /// transaction lets the other connection commit a phone change first.
    struct ConcurrentWriter {
        inner: SqliteStore,
        other: RefCell<SqliteStore>,
        writes_left: Cell<usize>,
        phone: Cell<u32>,
    }

    impl ConcurrentWriter {
        fn open(path: &Path, writes: usize) -> Self {
            let inner = SqliteStore::open(path, "dim_customer").unwrap();
            inner.setup().unwrap();
            ConcurrentWriter {
                inner,
                other: RefCell::new(SqliteStore::open(path, "dim_customer").unwrap()),
                writes_left: Cell::new(writes),
                phone: Cell::new(0),
            }
        }
    }

    impl DimensionStore for ConcurrentWriter {
        fn get_current(&self, k: &str) -> Result<Option<DimensionRow>> {
            let row = self.inner.get_current(k)?;
            if self.writes_left.get() > 0 && self.inner.connection().is_autocommit() {
                self.writes_left.set(self.writes_left.get() - 1);
                self.phone.set(self.phone.get() + 1);

                let mut other = self.other.borrow_mut();
                let current = other.get_current(k)?.unwrap();
                let mut attributes = current.attributes.clone();
                attributes.insert("phone".to_string(), Some(format!("555-9{:03}", self.phone.get())));

                let fields = TrackedFields::default();
                VersionWriter::new("other-run", t(2), &fields).apply_type1(
                    &mut *other,
                    &current,
                    &SourceRecord::new(k, attributes, 1),
                )?;
            }
            Ok(row)
        }
        fn insert(&mut self, row: NewDimensionRow) -> Result<i64> {
            self.inner.insert(row)
        }
        fn update(&mut self, row: &DimensionRow) -> Result<()> {
            self.inner.update(row)
        }
        fn history(&self, k: &str) -> Result<Vec<DimensionRow>> {
            self.inner.history(k)
        }
        fn all_rows(&self) -> Result<Vec<DimensionRow>> {
            self.inner.all_rows()
        }
        fn record_event(&mut self, e: &ChangeEvent) -> Result<()> {
            self.inner.record_event(e)
        }
        fn begin(&mut self) -> Result<()> {
            self.inner.begin()
        }
        fn commit(&mut self) -> Result<()> {
            self.inner.commit()
        }
        fn rollback(&mut self) -> Result<()> {
            self.inner.rollback()
        }
    }

    fn seeded_database(dir: &tempfile::TempDir) -> (std::path::PathBuf, SqliteStore) {
        let path = dir.path().join("dimension.db");
        let mut seed = SqliteStore::open(&path, "dim_customer").unwrap();
        seed.setup().unwrap();
        run_at(&mut seed, 1, INITIAL);
        (path, seed)
    }

    #[test]
    fn test_sqlite_concurrent_write_is_refetched_and_applied() {
        let dir = tempfile::tempdir().unwrap();
        let (path, seed) = seeded_database(&dir);

        let mut store = ConcurrentWriter::open(&path, 1);
        let summary = run_at(&mut store, 3, "C001,Ann,Lee,ann@example.com,Globex,555-0001\n");

        assert_eq!(summary.failed, 0, "{:?}", summary.errors);
        assert_eq!(summary.type2_versioned, 1);

        let history = seed.history("C001").unwrap();
        assert_eq!(history.len(), 2);
        assert_eq!(history[0].get("phone"), Some("555-9001"));
        assert_eq!(history[0].effective_end, Some(t(3)));
        assert_eq!(history[1].get("company_name"), Some("Globex"));
        assert_eq!(history[1].get("phone"), Some("555-0001"));
        assert!(history[1].is_current);
    }

    #[test]
    fn test_sqlite_repeated_concurrent_writes_fail_record() {
        let dir = tempfile::tempdir().unwrap();
        let (path, seed) = seeded_database(&dir);

        let mut store = ConcurrentWriter::open(&path, 10);
        let summary = run_at(&mut store, 3, "C001,Ann,Lee,ann@example.com,Globex,555-0001\n");

        assert_eq!(summary.failed, 1);
        assert_eq!(summary.type2_versioned, 0);
        assert_eq!(summary.errors[0].natural_key.as_deref(), Some("C001"));
        assert_eq!(store.writes_left.get(), 8, "one fetch per attempt");

        let history = seed.history("C001").unwrap();
        assert_eq!(history.len(), 1);
        assert_eq!(history[0].get("company_name"), Some("Acme"));
        assert_eq!(history[0].get("phone"), Some("555-9002"));
    }

    #[test]
    fn test_bad_header_aborts_with_empty_summary() {
        let mut store = MemoryStore::new();
        let config = ScdConfig::default();
        let driver = ReconciliationDriver::new(&mut store, &config).with_run_timestamp(t(4));

        let header_error = RecordExtractor::from_csv_reader(
            Cursor::new(b"customer_id,first_name\nC001,Ann\n".to_vec()),
            b',',
            &config,
        )
        .err()
        .unwrap();
        let aborted = driver.abort(header_error);

        assert!(matches!(aborted.error, ScdError::MalformedInput { row: 0, .. }));
        assert!(aborted.error.is_batch_fatal());
        assert_eq!(aborted.summary.run_id, driver.run_id());
        assert_eq!(aborted.summary.run_timestamp, t(4));
        assert_eq!(aborted.summary.processed, 0);
        assert!(aborted.summary.errors.is_empty());
        assert_eq!(store.row_count(), 0);
    }

    #[test]
    fn test_summary_serializes_camel_case() {
        let summary = RunSummary::new("run-1".to_string(), t(1));
        let json = serde_json::to_value(&summary).unwrap();

        assert!(json.get("type1Updated").is_some());
        assert!(json.get("type2Versioned").is_some());
        assert!(json.get("durationMs").is_some());
    }
}
