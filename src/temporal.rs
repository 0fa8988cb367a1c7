// ⏰ Temporal model for the dimension
//
// One natural key (identity) has many row versions (values) over time.
// Each version is valid over [effective_start, effective_end); the open
// interval belongs to the current version.

use chrono::{DateTime, SubsecRound, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;

use crate::config::TrackedFields;

/// Tracked attribute values keyed by field name; `None` is null.
pub type Attributes = BTreeMap<String, Option<String>>;

/// Run timestamps are kept at microsecond precision so they survive storage
/// round trips unchanged.
pub fn run_timestamp_now() -> DateTime<Utc> {
    normalize_timestamp(Utc::now())
}

pub fn normalize_timestamp(ts: DateTime<Utc>) -> DateTime<Utc> {
    ts.trunc_subsecs(6)
}

// ============================================================================
// SOURCE RECORD
// ============================================================================

/// One incoming entity observation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SourceRecord {
    pub natural_key: String,
    pub attributes: Attributes,
    /// 1-based data row in the source
    pub row: usize,
}

impl SourceRecord {
    pub fn new(natural_key: impl Into<String>, attributes: Attributes, row: usize) -> Self {
        SourceRecord {
            natural_key: natural_key.into(),
            attributes,
            row,
        }
    }

    pub fn get(&self, field: &str) -> Option<&str> {
        self.attributes.get(field).and_then(|v| v.as_deref())
    }
}

// ============================================================================
// EFFECTIVE INTERVAL
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct EffectiveInterval {
    pub start: DateTime<Utc>,
    /// None while the version is current
    pub end: Option<DateTime<Utc>>,
}

impl EffectiveInterval {
    pub fn is_open(&self) -> bool {
        self.end.is_none()
    }

    pub fn contains(&self, time: DateTime<Utc>) -> bool {
        self.start <= time && self.end.map_or(true, |end| end > time)
    }

    /// Half-open overlap test
    pub fn overlaps(&self, other: &EffectiveInterval) -> bool {
        let self_before_other = self.end.map_or(false, |end| end <= other.start);
        let other_before_self = other.end.map_or(false, |end| end <= self.start);
        !self_before_other && !other_before_self
    }
}

// ============================================================================
// DIMENSION ROW
// ============================================================================

/// One persisted version of an entity
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DimensionRow {
    /// System-generated, never reused, never updated
    pub surrogate_key: i64,
    pub natural_key: String,
    pub attributes: Attributes,
    pub effective_start: DateTime<Utc>,
    pub effective_end: Option<DateTime<Utc>>,
    pub is_current: bool,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    /// SHA-256 over the canonical tracked attributes
    pub row_hash: String,
}

impl DimensionRow {
    pub fn get(&self, field: &str) -> Option<&str> {
        self.attributes.get(field).and_then(|v| v.as_deref())
    }

    pub fn interval(&self) -> EffectiveInterval {
        EffectiveInterval {
            start: self.effective_start,
            end: self.effective_end,
        }
    }

    /// Check if this version was the truth at a specific time
    pub fn was_valid_at(&self, time: DateTime<Utc>) -> bool {
        self.interval().contains(time)
    }

    /// Same stored version, unchanged since it was read.
    pub fn same_version(&self, other: &DimensionRow) -> bool {
        self.surrogate_key == other.surrogate_key
            && self.is_current == other.is_current
            && self.updated_at == other.updated_at
            && self.row_hash == other.row_hash
    }
}

/// A row version before the store has assigned its surrogate key
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewDimensionRow {
    pub natural_key: String,
    pub attributes: Attributes,
    pub effective_start: DateTime<Utc>,
    pub created_at: DateTime<Utc>,
    pub row_hash: String,
}

impl NewDimensionRow {
    /// Current version starting at `run_timestamp`
    pub fn current_from(record: &SourceRecord, fields: &TrackedFields, run_timestamp: DateTime<Utc>) -> Self {
        let attributes: Attributes = fields
            .all()
            .map(|f| (f.clone(), record.attributes.get(f).cloned().flatten()))
            .collect();
        let row_hash = fingerprint(&attributes, fields);

        NewDimensionRow {
            natural_key: record.natural_key.clone(),
            attributes,
            effective_start: run_timestamp,
            created_at: run_timestamp,
            row_hash,
        }
    }

    pub fn into_row(self, surrogate_key: i64) -> DimensionRow {
        DimensionRow {
            surrogate_key,
            natural_key: self.natural_key,
            attributes: self.attributes,
            effective_start: self.effective_start,
            effective_end: None,
            is_current: true,
            created_at: self.created_at,
            updated_at: self.created_at,
            row_hash: self.row_hash,
        }
    }
}

/// Fingerprint of the canonical tracked attributes.
pub fn fingerprint(attributes: &Attributes, fields: &TrackedFields) -> String {
    let comparator = fields.comparator();
    let mut hasher = Sha256::new();
    for field in fields.all() {
        let value = attributes.get(field).and_then(|v| v.as_deref());
        hasher.update(field.as_bytes());
        hasher.update([0x1f]);
        hasher.update(comparator.canonical(field, value).encode().as_bytes());
        hasher.update([0x1e]);
    }
    format!("{:x}", hasher.finalize())
}

/// Version valid at `time` among the history of one natural key.
pub fn as_of(history: &[DimensionRow], time: DateTime<Utc>) -> Option<&DimensionRow> {
    history.iter().find(|row| row.was_valid_at(time))
}

// ============================================================================
// CHANGE EVENT (audit trail)
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChangeEventType {
    Inserted,
    Type1Updated,
    Expired,
}

impl ChangeEventType {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeEventType::Inserted => "inserted",
            ChangeEventType::Type1Updated => "type1_updated",
            ChangeEventType::Expired => "expired",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "inserted" => Some(ChangeEventType::Inserted),
            "type1_updated" => Some(ChangeEventType::Type1Updated),
            "expired" => Some(ChangeEventType::Expired),
            _ => None,
        }
    }
}

/// Every write to the dimension is also an event
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ChangeEvent {
    pub event_id: String,
    pub run_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: ChangeEventType,
    pub natural_key: String,
    pub surrogate_key: i64,
    pub data: serde_json::Value,
}

impl ChangeEvent {
    pub fn new(
        run_id: &str,
        timestamp: DateTime<Utc>,
        event_type: ChangeEventType,
        natural_key: &str,
        surrogate_key: i64,
        data: serde_json::Value,
    ) -> Self {
        ChangeEvent {
            event_id: uuid::Uuid::new_v4().to_string(),
            run_id: run_id.to_string(),
            timestamp,
            event_type,
            natural_key: natural_key.to_string(),
            surrogate_key,
            data,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::{Duration, TimeZone};

    fn ts(hour: u32) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2025, 1, 1, hour, 0, 0).unwrap()
    }

    fn record(company: &str, phone: &str) -> SourceRecord {
        let mut attributes = Attributes::new();
        attributes.insert("company_name".to_string(), Some(company.to_string()));
        attributes.insert("phone".to_string(), Some(phone.to_string()));
        attributes.insert("ignored".to_string(), Some("x".to_string()));
        SourceRecord::new("C001", attributes, 1)
    }

    #[test]
    fn test_interval_contains_is_half_open() {
        let closed = EffectiveInterval { start: ts(1), end: Some(ts(2)) };
        assert!(closed.contains(ts(1)));
        assert!(!closed.contains(ts(2)));

        let open = EffectiveInterval { start: ts(2), end: None };
        assert!(open.contains(ts(2) + Duration::days(365)));
        assert!(!closed.overlaps(&open));
        assert!(open.overlaps(&EffectiveInterval { start: ts(3), end: Some(ts(4)) }));
    }

    #[test]
    fn test_new_row_keeps_only_tracked_fields() {
        let fields = TrackedFields::new(["phone"], ["company_name"]);
        let row = NewDimensionRow::current_from(&record("Acme", "555"), &fields, ts(1)).into_row(9);

        assert_eq!(row.surrogate_key, 9);
        assert!(row.is_current);
        assert!(row.effective_end.is_none());
        assert_eq!(row.created_at, row.updated_at);
        assert_eq!(row.attributes.len(), 2);
        assert_eq!(row.get("company_name"), Some("Acme"));
    }

    #[test]
    fn test_fingerprint_uses_canonical_values() {
        let fields = TrackedFields::new(["phone"], ["company_name"]);
        let a = NewDimensionRow::current_from(&record("Acme", "555"), &fields, ts(1));
        let b = NewDimensionRow::current_from(&record(" Acme ", "555 "), &fields, ts(1));
        let c = NewDimensionRow::current_from(&record("Globex", "555"), &fields, ts(1));

        assert_eq!(a.row_hash, b.row_hash);
        assert_ne!(a.row_hash, c.row_hash);
        assert_eq!(a.row_hash.len(), 64);
    }

    #[test]
    fn test_as_of_finds_version() {
        let fields = TrackedFields::new(["phone"], ["company_name"]);
        let mut v1 = NewDimensionRow::current_from(&record("Acme", "555"), &fields, ts(1)).into_row(1);
        v1.effective_end = Some(ts(5));
        v1.is_current = false;
        let v2 = NewDimensionRow::current_from(&record("Globex", "555"), &fields, ts(5)).into_row(2);
        let history = vec![v1, v2];

        assert_eq!(as_of(&history, ts(3)).map(|r| r.surrogate_key), Some(1));
        assert_eq!(as_of(&history, ts(5)).map(|r| r.surrogate_key), Some(2));
        assert!(as_of(&history, ts(0)).is_none());
    }

    #[test]
    fn test_run_timestamp_has_microsecond_precision() {
        let now = run_timestamp_now();
        assert_eq!(now.timestamp_subsec_nanos() % 1_000, 0);
    }
}
