// 🔧 Engine configuration
//
// The tracked field sets are an explicit value handed to the classifier and
// driver. Nothing here is global, so several dimension pipelines can run in
// one process without sharing state.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};

use crate::error::{Result, ScdError};
use crate::normalize::{FieldComparator, FieldKind};

pub const DEFAULT_NATURAL_KEY: &str = "customer_id";
pub const DEFAULT_TABLE: &str = "dim_customer";
pub const DEFAULT_TYPE1_FIELDS: &[&str] = &["first_name", "last_name", "email", "phone"];
pub const DEFAULT_TYPE2_FIELDS: &[&str] = &["company_name"];

// ============================================================================
// TRACKED FIELDS
// ============================================================================

/// The only tunable parameters of the classifier.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TrackedFields {
    /// Overwritten in place on change (no history)
    pub type1: BTreeSet<String>,

    /// Trigger a new version on change (full history)
    pub type2: BTreeSet<String>,

    /// Per-field comparison kind; fields not listed compare as text
    #[serde(default)]
    pub kinds: BTreeMap<String, FieldKind>,
}

impl TrackedFields {
    pub fn new<I, J, S, T>(type1: I, type2: J) -> Self
    where
        I: IntoIterator<Item = S>,
        J: IntoIterator<Item = T>,
        S: Into<String>,
        T: Into<String>,
    {
        TrackedFields {
            type1: type1.into_iter().map(Into::into).collect(),
            type2: type2.into_iter().map(Into::into).collect(),
            kinds: BTreeMap::new(),
        }
    }

    /// Builder: set the comparison kind of one field
    pub fn with_kind(mut self, field: impl Into<String>, kind: FieldKind) -> Self {
        self.kinds.insert(field.into(), kind);
        self
    }

    /// Every tracked field, Type-2 first, each in sorted order.
    pub fn all(&self) -> impl Iterator<Item = &String> {
        self.type2.iter().chain(self.type1.iter())
    }

    pub fn is_tracked(&self, field: &str) -> bool {
        self.type1.contains(field) || self.type2.contains(field)
    }

    pub fn comparator(&self) -> FieldComparator {
        FieldComparator::new(self.kinds.clone())
    }
}

impl Default for TrackedFields {
    fn default() -> Self {
        TrackedFields::new(
            DEFAULT_TYPE1_FIELDS.iter().copied(),
            DEFAULT_TYPE2_FIELDS.iter().copied(),
        )
    }
}

// ============================================================================
// SCD CONFIG
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScdConfig {
    /// Column holding the business identifier
    pub natural_key: String,

    /// Dimension table name (SQLite backend)
    pub table: String,

    pub fields: TrackedFields,
}

impl ScdConfig {
    pub fn new(natural_key: impl Into<String>, table: impl Into<String>, fields: TrackedFields) -> Self {
        ScdConfig {
            natural_key: natural_key.into(),
            table: table.into(),
            fields,
        }
    }

    /// Check the field sets are usable before any record is touched.
    pub fn validate(&self) -> Result<()> {
        if self.natural_key.trim().is_empty() {
            return Err(ScdError::InvalidConfig("natural key column is empty".to_string()));
        }

        if self.fields.type2.is_empty() {
            return Err(ScdError::InvalidConfig(
                "at least one Type-2 field is required".to_string(),
            ));
        }

        let overlap: Vec<&String> = self.fields.type1.intersection(&self.fields.type2).collect();
        if !overlap.is_empty() {
            return Err(ScdError::InvalidConfig(format!(
                "fields cannot be both Type-1 and Type-2: {:?}",
                overlap
            )));
        }

        if self.fields.is_tracked(&self.natural_key) {
            return Err(ScdError::InvalidConfig(format!(
                "natural key '{}' cannot also be a tracked field",
                self.natural_key
            )));
        }

        if let Some(field) = self.fields.all().find(|f| f.trim().is_empty()) {
            return Err(ScdError::InvalidConfig(format!("blank field name {:?}", field)));
        }

        if let Some(field) = self.fields.kinds.keys().find(|f| !self.fields.is_tracked(f)) {
            return Err(ScdError::InvalidConfig(format!(
                "field kind given for untracked field '{}'",
                field
            )));
        }

        if !is_sql_identifier(&self.table) {
            return Err(ScdError::InvalidConfig(format!(
                "table name '{}' must match [A-Za-z_][A-Za-z0-9_]*",
                self.table
            )));
        }

        Ok(())
    }
}

impl Default for ScdConfig {
    fn default() -> Self {
        ScdConfig::new(DEFAULT_NATURAL_KEY, DEFAULT_TABLE, TrackedFields::default())
    }
}

/// Split a comma-separated field list, dropping blanks.
pub fn parse_field_list(raw: &str) -> Vec<String> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
        .collect()
}

/// Parse `field:kind` pairs such as `phone:text,age:number`.
pub fn parse_field_kinds(raw: &str) -> Result<BTreeMap<String, FieldKind>> {
    let mut kinds = BTreeMap::new();
    for pair in parse_field_list(raw) {
        let (field, kind) = pair.split_once(':').ok_or_else(|| {
            ScdError::InvalidConfig(format!("expected field:kind, got '{}'", pair))
        })?;
        kinds.insert(field.trim().to_string(), kind.parse()?);
    }
    Ok(kinds)
}

fn is_sql_identifier(name: &str) -> bool {
    let mut chars = name.chars();
    match chars.next() {
        Some(c) if c.is_ascii_alphabetic() || c == '_' => {}
        _ => return false,
    }
    chars.all(|c| c.is_ascii_alphanumeric() || c == '_')
}
