// 🗄️ Dimension Store Interface
//
// The persistence boundary consumed by the writer and driver. Backends must
// give read-after-write consistency within a run and assign strictly
// increasing, never reused surrogate keys.

pub mod memory;
pub mod sqlite;

pub use memory::MemoryStore;
pub use sqlite::SqliteStore;

use crate::error::Result;
use crate::temporal::{ChangeEvent, DimensionRow, NewDimensionRow};

pub trait DimensionStore {
    /// The row with `is_current = true` for this natural key, if any.
    fn get_current(&self, natural_key: &str) -> Result<Option<DimensionRow>>;

    /// Persist a new row and return its surrogate key.
    fn insert(&mut self, row: NewDimensionRow) -> Result<i64>;

    /// Overwrite the mutable columns of an existing row, matched by surrogate key.
    /// Fails with `StaleRow` when the row does not exist.
    fn update(&mut self, row: &DimensionRow) -> Result<()>;

    /// All versions of one natural key ordered by effective start.
    fn history(&self, natural_key: &str) -> Result<Vec<DimensionRow>>;

    /// Every row, ordered by natural key then effective start.
    fn all_rows(&self) -> Result<Vec<DimensionRow>>;

    /// Append to the audit trail.
    fn record_event(&mut self, event: &ChangeEvent) -> Result<()>;

    fn begin(&mut self) -> Result<()>;
    fn commit(&mut self) -> Result<()>;
    fn rollback(&mut self) -> Result<()>;
}

/// Run `op` inside a store transaction; roll back on any error, including a
/// failed commit.
pub fn in_transaction<S, T, F>(store: &mut S, op: F) -> Result<T>
where
    S: DimensionStore + ?Sized,
    F: FnOnce(&mut S) -> Result<T>,
{
    store.begin()?;
    let result = op(&mut *store).and_then(|value| store.commit().map(|_| value));

    if let Err(err) = &result {
        if let Err(rollback_err) = store.rollback() {
            tracing::error!(error = %rollback_err, "rollback failed after: {}", err);
        }
    }
    result
}
