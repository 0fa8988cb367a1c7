// 🧠 In-memory dimension store
//
// Append-only version list with keyed indexes. A transaction keeps an undo
// journal: the length of the row and event lists at begin, plus the prior
// image of every row updated since.

use std::collections::{HashMap, HashSet};

use crate::error::{Result, ScdError};
use crate::store::DimensionStore;
use crate::temporal::{ChangeEvent, DimensionRow, NewDimensionRow};

#[derive(Debug, Default)]
struct Journal {
    rows_len: usize,
    events_len: usize,
    /// Row index and its image before the first update in this transaction
    before: Vec<(usize, DimensionRow)>,
    touched: HashSet<usize>,
}

#[derive(Debug, Default)]
pub struct MemoryStore {
    /// ALL versions of all entities, in insertion order
    rows: Vec<DimensionRow>,
    events: Vec<ChangeEvent>,
    /// natural key -> index of its current row
    current: HashMap<String, usize>,
    /// natural key -> indexes of every version, in insertion order
    versions: HashMap<String, Vec<usize>>,
    by_surrogate: HashMap<i64, usize>,
    /// Last surrogate key handed out; never rolls back
    last_key: i64,
    journal: Option<Journal>,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> &[ChangeEvent] {
        &self.events
    }

    pub fn row_count(&self) -> usize {
        self.rows.len()
    }

    pub fn in_transaction(&self) -> bool {
        self.journal.is_some()
    }

    fn refresh_current(&mut self, natural_key: &str) {
        let current = self
            .versions
            .get(natural_key)
            .and_then(|idxs| idxs.iter().copied().find(|&i| self.rows[i].is_current));
        match current {
            Some(idx) => {
                self.current.insert(natural_key.to_string(), idx);
            }
            None => {
                self.current.remove(natural_key);
            }
        }
    }
}

impl DimensionStore for MemoryStore {
    fn get_current(&self, natural_key: &str) -> Result<Option<DimensionRow>> {
        Ok(self.current.get(natural_key).map(|&idx| self.rows[idx].clone()))
    }

    fn insert(&mut self, row: NewDimensionRow) -> Result<i64> {
        if self.current.contains_key(&row.natural_key) {
            return Err(ScdError::StaleRow {
                natural_key: row.natural_key,
                surrogate_key: 0,
            });
        }

        self.last_key += 1;
        let key = self.last_key;
        let idx = self.rows.len();
        let natural_key = row.natural_key.clone();

        self.rows.push(row.into_row(key));
        self.by_surrogate.insert(key, idx);
        self.versions.entry(natural_key.clone()).or_default().push(idx);
        self.current.insert(natural_key, idx);
        Ok(key)
    }

    fn update(&mut self, row: &DimensionRow) -> Result<()> {
        let idx = match self.by_surrogate.get(&row.surrogate_key) {
            Some(&idx) if self.rows[idx].natural_key == row.natural_key => idx,
            _ => {
                return Err(ScdError::StaleRow {
                    natural_key: row.natural_key.clone(),
                    surrogate_key: row.surrogate_key,
                })
            }
        };

        if let Some(journal) = self.journal.as_mut() {
            if idx < journal.rows_len && journal.touched.insert(idx) {
                journal.before.push((idx, self.rows[idx].clone()));
            }
        }

        let stored = &mut self.rows[idx];
        stored.attributes = row.attributes.clone();
        stored.row_hash = row.row_hash.clone();
        stored.effective_end = row.effective_end;
        stored.is_current = row.is_current;
        stored.updated_at = row.updated_at;

        self.refresh_current(&row.natural_key);
        Ok(())
    }

    fn history(&self, natural_key: &str) -> Result<Vec<DimensionRow>> {
        let rows = self
            .versions
            .get(natural_key)
            .map(|idxs| idxs.iter().map(|&i| self.rows[i].clone()).collect())
            .unwrap_or_default();
        Ok(sorted(rows))
    }

    fn all_rows(&self) -> Result<Vec<DimensionRow>> {
        Ok(sorted(self.rows.clone()))
    }

    fn record_event(&mut self, event: &ChangeEvent) -> Result<()> {
        self.events.push(event.clone());
        Ok(())
    }

    fn begin(&mut self) -> Result<()> {
        if self.journal.is_some() {
            return Err(ScdError::StoreUnavailable("transaction already open".to_string()));
        }
        self.journal = Some(Journal {
            rows_len: self.rows.len(),
            events_len: self.events.len(),
            ..Journal::default()
        });
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.journal
            .take()
            .map(|_| ())
            .ok_or_else(|| ScdError::StoreUnavailable("commit without transaction".to_string()))
    }

    fn rollback(&mut self) -> Result<()> {
        let journal = self
            .journal
            .take()
            .ok_or_else(|| ScdError::StoreUnavailable("rollback without transaction".to_string()))?;

        let mut affected = HashSet::new();

        for row in self.rows.drain(journal.rows_len..) {
            self.by_surrogate.remove(&row.surrogate_key);
            if let Some(idxs) = self.versions.get_mut(&row.natural_key) {
                idxs.retain(|&i| i < journal.rows_len);
                if idxs.is_empty() {
                    self.versions.remove(&row.natural_key);
                }
            }
            affected.insert(row.natural_key);
        }
        self.events.truncate(journal.events_len);

        for (idx, image) in journal.before.into_iter().rev() {
            affected.insert(image.natural_key.clone());
            self.rows[idx] = image;
        }

        for natural_key in affected {
            self.refresh_current(&natural_key);
        }
        Ok(())
    }
}

fn sorted(mut rows: Vec<DimensionRow>) -> Vec<DimensionRow> {
    rows.sort_by(|a, b| {
        a.natural_key
            .cmp(&b.natural_key)
            .then(a.effective_start.cmp(&b.effective_start))
            .then(a.surrogate_key.cmp(&b.surrogate_key))
    });
    rows
}
