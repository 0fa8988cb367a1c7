// ⚖️ Field comparator
//
// Values arrive as text from CSV and as text from storage. Both sides are
// reduced to a canonical form per field kind before they are compared, so
// " 42.0" and "42" are the same number and " Acme " is the same company.

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::str::FromStr;

use crate::error::ScdError;

// ============================================================================
// FIELD KIND
// ============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FieldKind {
    /// Trimmed text, case-sensitive
    #[default]
    Text,
    /// Trimmed text compared case-insensitively (emails, codes)
    CiText,
    /// Decimal number; falls back to text when the value does not parse
    Number,
    /// true/false, yes/no, 1/0, y/n
    Boolean,
}

impl FieldKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            FieldKind::Text => "text",
            FieldKind::CiText => "ci_text",
            FieldKind::Number => "number",
            FieldKind::Boolean => "boolean",
        }
    }
}

impl fmt::Display for FieldKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for FieldKind {
    type Err = ScdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "text" | "string" => Ok(FieldKind::Text),
            "ci_text" | "citext" => Ok(FieldKind::CiText),
            "number" | "numeric" | "decimal" => Ok(FieldKind::Number),
            "boolean" | "bool" => Ok(FieldKind::Boolean),
            other => Err(ScdError::InvalidConfig(format!("unknown field kind '{}'", other))),
        }
    }
}

// ============================================================================
// CANONICAL VALUE
// ============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub enum CanonicalValue {
    Null,
    Text(String),
    Number(String),
    Boolean(bool),
}

impl CanonicalValue {
    /// Stable textual encoding used for row fingerprints.
    pub fn encode(&self) -> String {
        match self {
            CanonicalValue::Null => "\u{0}null".to_string(),
            CanonicalValue::Text(s) => format!("t:{}", s),
            CanonicalValue::Number(n) => format!("n:{}", n),
            CanonicalValue::Boolean(b) => format!("b:{}", b),
        }
    }
}

/// Canonicalize one raw value. Null and whitespace-only values are `Null`.
pub fn canonicalize(kind: FieldKind, raw: Option<&str>) -> CanonicalValue {
    let trimmed = match raw.map(str::trim) {
        None | Some("") => return CanonicalValue::Null,
        Some(s) => s,
    };

    match kind {
        FieldKind::Text => CanonicalValue::Text(trimmed.to_string()),
        FieldKind::CiText => CanonicalValue::Text(trimmed.to_lowercase()),
        FieldKind::Number => match canonical_decimal(trimmed) {
            Some(n) => CanonicalValue::Number(n),
            None => CanonicalValue::Text(trimmed.to_string()),
        },
        FieldKind::Boolean => match trimmed.to_ascii_lowercase().as_str() {
            "true" | "t" | "yes" | "y" | "1" => CanonicalValue::Boolean(true),
            "false" | "f" | "no" | "n" | "0" => CanonicalValue::Boolean(false),
            _ => CanonicalValue::Text(trimmed.to_string()),
        },
    }
}

/// Canonical decimal text: no sign on zero, no leading zeros, no trailing
/// fractional zeros. Returns `None` for anything that is not a plain decimal.
fn canonical_decimal(s: &str) -> Option<String> {
    let (negative, unsigned) = match s.as_bytes().first() {
        Some(b'-') => (true, &s[1..]),
        Some(b'+') => (false, &s[1..]),
        _ => (false, s),
    };

    let (int_part, frac_part) = match unsigned.split_once('.') {
        Some((i, f)) => (i, f),
        None => (unsigned, ""),
    };
    let int_part = ungroup_thousands(int_part)?;
    let int_part = int_part.as_str();

    if int_part.is_empty() && frac_part.is_empty() {
        return None;
    }
    if !int_part.bytes().all(|b| b.is_ascii_digit()) || !frac_part.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }

    let int_part = int_part.trim_start_matches('0');
    let frac_part = frac_part.trim_end_matches('0');
    let int_part = if int_part.is_empty() { "0" } else { int_part };

    let mut out = String::new();
    if negative && !(int_part == "0" && frac_part.is_empty()) {
        out.push('-');
    }
    out.push_str(int_part);
    if !frac_part.is_empty() {
        out.push('.');
        out.push_str(frac_part);
    }
    Some(out)
}

/// "1,234,567" becomes "1234567". Any other comma placement ("1,5", "12,34")
/// is not a number.
fn ungroup_thousands(int_part: &str) -> Option<String> {
    if !int_part.contains(',') {
        return Some(int_part.to_string());
    }

    let mut groups = int_part.split(',');
    let first = groups.next()?;
    if first.is_empty() || first.len() > 3 {
        return None;
    }

    let mut out = first.to_string();
    for group in groups {
        if group.len() != 3 {
            return None;
        }
        out.push_str(group);
    }
    Some(out)
}

// ============================================================================
// FIELD COMPARATOR
// ============================================================================

/// Compares tracked attributes field by field using each field's kind.
#[derive(Debug, Clone, Default)]
pub struct FieldComparator {
    kinds: BTreeMap<String, FieldKind>,
}

impl FieldComparator {
    pub fn new(kinds: BTreeMap<String, FieldKind>) -> Self {
        FieldComparator { kinds }
    }

    pub fn kind_of(&self, field: &str) -> FieldKind {
        self.kinds.get(field).copied().unwrap_or_default()
    }

    pub fn canonical(&self, field: &str, raw: Option<&str>) -> CanonicalValue {
        canonicalize(self.kind_of(field), raw)
    }

    /// True when both sides canonicalize to the same value.
    /// A field absent on one side and present on the other is a difference.
    pub fn equal(&self, field: &str, left: Option<&str>, right: Option<&str>) -> bool {
        self.canonical(field, left) == self.canonical(field, right)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_text_is_trimmed_and_case_sensitive() {
        assert_eq!(
            canonicalize(FieldKind::Text, Some("  Acme ")),
            CanonicalValue::Text("Acme".to_string())
        );
        assert_ne!(
            canonicalize(FieldKind::Text, Some("acme")),
            canonicalize(FieldKind::Text, Some("Acme"))
        );
    }

    #[test]
    fn test_blank_is_null() {
        assert_eq!(canonicalize(FieldKind::Text, Some("   ")), CanonicalValue::Null);
        assert_eq!(canonicalize(FieldKind::Number, None), CanonicalValue::Null);
    }

    #[test]
    fn test_numbers_compare_by_value() {
        let n = |s| canonicalize(FieldKind::Number, Some(s));
        assert_eq!(n("42"), n(" 42.0 "));
        assert_eq!(n("007.50"), n("7.5"));
        assert_eq!(n("-0.00"), n("0"));
        assert_eq!(n("1,000"), n("1000"));
        assert_eq!(n("-12,345.50"), n("-12345.5"));
        assert_ne!(n("42"), n("42.01"));
        assert_eq!(n("n/a"), CanonicalValue::Text("n/a".to_string()));
    }

    #[test]
    fn test_misplaced_commas_are_not_thousands_separators() {
        let n = |s| canonicalize(FieldKind::Number, Some(s));
        assert_ne!(n("1,5"), n("15"));
        assert_ne!(n("12,34"), n("1234"));
        assert_ne!(n("1,0000"), n("10000"));
        assert_eq!(n("1,5"), CanonicalValue::Text("1,5".to_string()));

        let comparator = FieldComparator::new([("credit_limit".to_string(), FieldKind::Number)].into_iter().collect());
        assert!(!comparator.equal("credit_limit", Some("1,5"), Some("15")));
        assert!(comparator.equal("credit_limit", Some("1,500"), Some("1500.00")));
    }

    #[test]
    fn test_ci_text_and_boolean() {
        assert_eq!(
            canonicalize(FieldKind::CiText, Some("Ann@Example.COM")),
            canonicalize(FieldKind::CiText, Some("ann@example.com"))
        );
        assert_eq!(
            canonicalize(FieldKind::Boolean, Some("Yes")),
            canonicalize(FieldKind::Boolean, Some("1"))
        );
    }

    #[test]
    fn test_comparator_null_vs_present_differs() {
        let comparator = FieldComparator::default();
        assert!(!comparator.equal("phone", None, Some("555-0001")));
        assert!(comparator.equal("phone", None, Some("")));
        assert!(comparator.equal("phone", Some("555-0001 "), Some("555-0001")));
    }

    #[test]
    fn test_field_kind_parsing() {
        assert_eq!("ci_text".parse::<FieldKind>().unwrap(), FieldKind::CiText);
        assert_eq!("NUMBER".parse::<FieldKind>().unwrap(), FieldKind::Number);
        assert!("money".parse::<FieldKind>().is_err());
    }
}
