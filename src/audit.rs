// ✅ Dimension integrity audit
//
// Checks a dimension at rest against the SCD-2 invariants:
// one current row per natural key, closed intervals that neither overlap
// nor leave gaps, start before end, surrogate keys unique.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashSet};

use crate::config::ScdConfig;
use crate::temporal::DimensionRow;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Severity {
    Critical, // An invariant is broken
    Warning,  // Legal but suspicious
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct QualityIssue {
    pub severity: Severity,
    pub check: String,
    pub natural_key: Option<String>,
    pub surrogate_key: Option<i64>,
    pub issue: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct AuditReport {
    pub rows_checked: usize,
    pub natural_keys: usize,
    pub current_rows: usize,
    pub issues: Vec<QualityIssue>,
}

impl AuditReport {
    pub fn is_healthy(&self) -> bool {
        !self.has_critical_issues()
    }

    pub fn has_critical_issues(&self) -> bool {
        self.issues.iter().any(|i| i.severity == Severity::Critical)
    }

    pub fn summary(&self) -> String {
        format!(
            "Audit: {} rows, {} entities, {} current, {} issues ({} critical)",
            self.rows_checked,
            self.natural_keys,
            self.current_rows,
            self.issues.len(),
            self.issues
                .iter()
                .filter(|i| i.severity == Severity::Critical)
                .count()
        )
    }

    fn push(&mut self, severity: Severity, check: &str, row: Option<&DimensionRow>, issue: String) {
        self.issues.push(QualityIssue {
            severity,
            check: check.to_string(),
            natural_key: row.map(|r| r.natural_key.clone()),
            surrogate_key: row.map(|r| r.surrogate_key),
            issue,
        });
    }
}

pub fn audit_dimension(rows: &[DimensionRow], config: &ScdConfig) -> AuditReport {
    let mut report = AuditReport {
        rows_checked: rows.len(),
        ..AuditReport::default()
    };

    let mut seen_keys = HashSet::new();
    let mut by_entity: BTreeMap<&str, Vec<&DimensionRow>> = BTreeMap::new();

    for row in rows {
        if !seen_keys.insert(row.surrogate_key) {
            report.push(
                Severity::Critical,
                "unique_surrogate_key",
                Some(row),
                format!("surrogate key {} appears more than once", row.surrogate_key),
            );
        }

        if row.natural_key.trim().is_empty() {
            report.push(Severity::Critical, "natural_key_present", Some(row), "natural key is empty".to_string());
        }

        if let Some(end) = row.effective_end {
            if row.effective_start >= end {
                report.push(
                    Severity::Critical,
                    "start_before_end",
                    Some(row),
                    format!("effective_start {} is not before effective_end {}", row.effective_start, end),
                );
            }
        }

        match (row.is_current, row.effective_end) {
            (true, Some(end)) => report.push(
                Severity::Critical,
                "current_is_open",
                Some(row),
                format!("current row has effective_end {}", end),
            ),
            (false, None) => report.push(
                Severity::Critical,
                "closed_has_end",
                Some(row),
                "non-current row has no effective_end".to_string(),
            ),
            _ => {}
        }

        for field in &config.fields.type2 {
            if row.get(field).is_none() {
                report.push(
                    Severity::Warning,
                    "type2_not_null",
                    Some(row),
                    format!("Type-2 field '{}' is null", field),
                );
            }
        }

        by_entity.entry(row.natural_key.as_str()).or_default().push(row);
    }

    report.natural_keys = by_entity.len();

    for (natural_key, mut versions) in by_entity {
        versions.sort_by(|a, b| a.effective_start.cmp(&b.effective_start).then(a.surrogate_key.cmp(&b.surrogate_key)));

        let current: Vec<&&DimensionRow> = versions.iter().filter(|r| r.is_current).collect();
        report.current_rows += current.len();
        match current.len() {
            1 => {}
            0 => report.push(
                Severity::Critical,
                "one_current_row",
                versions.last().copied(),
                format!("'{}' has no current row", natural_key),
            ),
            n => report.push(
                Severity::Critical,
                "one_current_row",
                current.last().map(|r| **r),
                format!("'{}' has {} current rows", natural_key, n),
            ),
        }

        for pair in versions.windows(2) {
            let (earlier, later) = (pair[0], pair[1]);
            match earlier.effective_end {
                Some(end) if end > later.effective_start => report.push(
                    Severity::Critical,
                    "no_overlap",
                    Some(later),
                    format!(
                        "interval starting {} overlaps version {} ending {}",
                        later.effective_start, earlier.surrogate_key, end
                    ),
                ),
                Some(end) if end < later.effective_start => report.push(
                    Severity::Critical,
                    "no_gap",
                    Some(later),
                    format!("gap between {} and {}", end, later.effective_start),
                ),
                None => report.push(
                    Severity::Critical,
                    "no_overlap",
                    Some(later),
                    format!("version {} is open-ended but not the latest", earlier.surrogate_key),
                ),
                _ => {}
            }
        }
    }

    report
}
