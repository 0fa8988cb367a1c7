// ✍️ Version Writer
//
// Applies a classified change to the store. Every operation runs in its own
// store transaction and re-reads the current row before writing, so a row
// modified since it was fetched is reported as stale instead of overwritten.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::json;

use crate::classifier::ChangeKind;
use crate::config::TrackedFields;
use crate::error::{Result, ScdError};
use crate::store::{in_transaction, DimensionStore};
use crate::temporal::{fingerprint, ChangeEvent, ChangeEventType, DimensionRow, NewDimensionRow, SourceRecord};

/// Result of applying one classified change.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum ApplyOutcome {
    Applied {
        kind: ChangeKind,
        /// Rows inserted or updated
        affected_rows: usize,
        /// Surrogate key of the row that is current afterwards
        surrogate_key: Option<i64>,
    },
    /// Expected failure (stale row); the caller may re-fetch and retry
    Failed { reason: String },
}

impl ApplyOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, ApplyOutcome::Applied { .. })
    }
}

pub struct VersionWriter<'a> {
    run_id: String,
    run_timestamp: DateTime<Utc>,
    fields: &'a TrackedFields,
}

impl<'a> VersionWriter<'a> {
    pub fn new(run_id: impl Into<String>, run_timestamp: DateTime<Utc>, fields: &'a TrackedFields) -> Self {
        VersionWriter {
            run_id: run_id.into(),
            run_timestamp,
            fields,
        }
    }

    pub fn run_timestamp(&self) -> DateTime<Utc> {
        self.run_timestamp
    }

    /// Dispatch on the change kind. Stale rows come back as `Failed`;
    /// everything else that goes wrong is an `Err`.
    pub fn apply<S: DimensionStore + ?Sized>(
        &self,
        store: &mut S,
        kind: ChangeKind,
        current: Option<&DimensionRow>,
        incoming: &SourceRecord,
    ) -> Result<ApplyOutcome> {
        let result = match (kind, current) {
            (ChangeKind::Unchanged, _) => {
                return Ok(ApplyOutcome::Applied {
                    kind,
                    affected_rows: 0,
                    surrogate_key: current.map(|r| r.surrogate_key),
                })
            }
            (ChangeKind::NewEntity, _) => self
                .insert_new(store, incoming)
                .map(|key| (1, key)),
            (ChangeKind::Type1Change, Some(current)) => self
                .apply_type1(store, current, incoming)
                .map(|row| (1, row.surrogate_key)),
            (ChangeKind::Type2Change, Some(current)) => self
                .apply_type2(store, current, incoming)
                .map(|key| (2, key)),
            (ChangeKind::Type1Change, None) | (ChangeKind::Type2Change, None) => {
                Err(ScdError::StaleRow {
                    natural_key: incoming.natural_key.clone(),
                    surrogate_key: 0,
                })
            }
        };

        match result {
            Ok((affected_rows, key)) => Ok(ApplyOutcome::Applied {
                kind,
                affected_rows,
                surrogate_key: Some(key),
            }),
            Err(err @ ScdError::StaleRow { .. }) => Ok(ApplyOutcome::Failed { reason: err.to_string() }),
            Err(err) => Err(err),
        }
    }

    /// Insert the first version of an entity (or the next one, inside `apply_type2`).
    pub fn insert_new<S: DimensionStore + ?Sized>(&self, store: &mut S, incoming: &SourceRecord) -> Result<i64> {
        in_transaction(store, |store| {
            if store.get_current(&incoming.natural_key)?.is_some() {
                return Err(ScdError::StaleRow {
                    natural_key: incoming.natural_key.clone(),
                    surrogate_key: 0,
                });
            }
            self.insert_row(store, incoming)
        })
    }

    /// Overwrite Type-1 fields of the current row in place.
    pub fn apply_type1<S: DimensionStore + ?Sized>(
        &self,
        store: &mut S,
        current: &DimensionRow,
        incoming: &SourceRecord,
    ) -> Result<DimensionRow> {
        in_transaction(store, |store| {
            verify_current(store, current)?;

            let mut updated = current.clone();
            let mut changes = serde_json::Map::new();
            for field in &self.fields.type1 {
                let new_value = incoming.attributes.get(field).cloned().flatten();
                let old_value = updated.attributes.insert(field.clone(), new_value.clone()).flatten();
                if old_value != new_value {
                    changes.insert(field.clone(), json!({ "from": old_value, "to": new_value }));
                }
            }
            updated.row_hash = fingerprint(&updated.attributes, self.fields);
            updated.updated_at = self.run_timestamp;

            store.update(&updated)?;
            store.record_event(&ChangeEvent::new(
                &self.run_id,
                self.run_timestamp,
                ChangeEventType::Type1Updated,
                &updated.natural_key,
                updated.surrogate_key,
                json!({ "changes": changes }),
            ))?;

            tracing::debug!(
                natural_key = %updated.natural_key,
                surrogate_key = updated.surrogate_key,
                "type-1 attributes updated in place"
            );
            Ok(updated)
        })
    }

    /// Close the current version at the run timestamp.
    pub fn expire<S: DimensionStore + ?Sized>(&self, store: &mut S, current: &DimensionRow) -> Result<DimensionRow> {
        in_transaction(store, |store| {
            verify_current(store, current)?;
            self.expire_row(store, current, None)
        })
    }

    /// Expire the current version and insert the new one, atomically.
    pub fn apply_type2<S: DimensionStore + ?Sized>(
        &self,
        store: &mut S,
        current: &DimensionRow,
        incoming: &SourceRecord,
    ) -> Result<i64> {
        in_transaction(store, |store| {
            verify_current(store, current)?;
            let expired = self.expire_row(store, current, Some(incoming))?;
            let key = self.insert_row(store, incoming)?;

            tracing::debug!(
                natural_key = %incoming.natural_key,
                expired_key = expired.surrogate_key,
                new_key = key,
                "new version inserted"
            );
            Ok(key)
        })
    }

    fn insert_row<S: DimensionStore + ?Sized>(&self, store: &mut S, incoming: &SourceRecord) -> Result<i64> {
        let row = NewDimensionRow::current_from(incoming, self.fields, self.run_timestamp);
        let attributes = serde_json::to_value(&row.attributes)?;
        let key = store.insert(row)?;

        store.record_event(&ChangeEvent::new(
            &self.run_id,
            self.run_timestamp,
            ChangeEventType::Inserted,
            &incoming.natural_key,
            key,
            json!({ "attributes": attributes, "effective_start": self.run_timestamp }),
        ))?;
        Ok(key)
    }

    fn expire_row<S: DimensionStore + ?Sized>(
        &self,
        store: &mut S,
        current: &DimensionRow,
        superseded_by: Option<&SourceRecord>,
    ) -> Result<DimensionRow> {
        if current.effective_start >= self.run_timestamp {
            return Err(ScdError::NonMonotonicTimestamp {
                natural_key: current.natural_key.clone(),
                effective_start: current.effective_start,
                run_timestamp: self.run_timestamp,
            });
        }

        let mut expired = current.clone();
        expired.effective_end = Some(self.run_timestamp);
        expired.is_current = false;
        expired.updated_at = self.run_timestamp;
        store.update(&expired)?;

        let changed: Vec<&String> = match superseded_by {
            Some(incoming) => {
                let comparator = self.fields.comparator();
                self.fields
                    .type2
                    .iter()
                    .filter(|f| !comparator.equal(f, current.get(f), incoming.get(f)))
                    .collect()
            }
            None => Vec::new(),
        };

        store.record_event(&ChangeEvent::new(
            &self.run_id,
            self.run_timestamp,
            ChangeEventType::Expired,
            &expired.natural_key,
            expired.surrogate_key,
            json!({ "effective_end": self.run_timestamp, "type2_changed": changed }),
        ))?;
        Ok(expired)
    }
}

/// The row we were handed must still be the stored current row.
fn verify_current<S: DimensionStore + ?Sized>(store: &S, expected: &DimensionRow) -> Result<()> {
    match store.get_current(&expected.natural_key)? {
        Some(stored) if stored.same_version(expected) => Ok(()),
        _ => Err(ScdError::StaleRow {
            natural_key: expected.natural_key.clone(),
            surrogate_key: expected.surrogate_key,
        }),
    }
}
