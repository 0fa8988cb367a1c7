// 🔍 Change Classifier
//
// Pure comparison of the incoming record against the current row.
// Type-2 changes take precedence: the new version carries the latest Type-1
// values, so no separate in-place update is needed.

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::config::TrackedFields;
use crate::normalize::FieldComparator;
use crate::temporal::{DimensionRow, SourceRecord};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ChangeKind {
    /// No current row for the natural key
    NewEntity,
    /// Every tracked field equal after normalization
    Unchanged,
    /// Only Type-1 fields differ; overwrite in place
    Type1Change,
    /// At least one Type-2 field differs; expire and insert
    Type2Change,
}

impl ChangeKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ChangeKind::NewEntity => "new_entity",
            ChangeKind::Unchanged => "unchanged",
            ChangeKind::Type1Change => "type1_change",
            ChangeKind::Type2Change => "type2_change",
        }
    }

    pub fn writes(&self) -> bool {
        !matches!(self, ChangeKind::Unchanged)
    }
}

impl fmt::Display for ChangeKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Classification plus the fields that drove it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Classification {
    pub kind: ChangeKind,
    pub type2_changed: Vec<String>,
    pub type1_changed: Vec<String>,
}

pub fn classify(current: Option<&DimensionRow>, incoming: &SourceRecord, fields: &TrackedFields) -> ChangeKind {
    classify_detailed(current, incoming, fields).kind
}

pub fn classify_detailed(
    current: Option<&DimensionRow>,
    incoming: &SourceRecord,
    fields: &TrackedFields,
) -> Classification {
    let current = match current {
        Some(row) => row,
        None => {
            return Classification {
                kind: ChangeKind::NewEntity,
                type2_changed: Vec::new(),
                type1_changed: Vec::new(),
            }
        }
    };

    let comparator = fields.comparator();
    let type2_changed = changed_fields(&comparator, fields.type2.iter(), current, incoming);
    let type1_changed = changed_fields(&comparator, fields.type1.iter(), current, incoming);

    let kind = if !type2_changed.is_empty() {
        ChangeKind::Type2Change
    } else if !type1_changed.is_empty() {
        ChangeKind::Type1Change
    } else {
        ChangeKind::Unchanged
    };

    Classification {
        kind,
        type2_changed,
        type1_changed,
    }
}

fn changed_fields<'a>(
    comparator: &FieldComparator,
    fields: impl Iterator<Item = &'a String>,
    current: &DimensionRow,
    incoming: &SourceRecord,
) -> Vec<String> {
    fields
        .filter(|f| !comparator.equal(f, current.get(f), incoming.get(f)))
        .cloned()
        .collect()
}
