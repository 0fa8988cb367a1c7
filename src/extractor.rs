// 📂 Record Extractor
//
// Turns a tabular source (CSV or row mappings with a declared header) into a
// lazy stream of SourceRecord, preserving input order. Header problems fail
// the constructor; row problems are yielded as per-row errors.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fs::File;
use std::io::Read;
use std::path::Path;

use crate::config::ScdConfig;
use crate::error::{Result, ScdError};
use crate::temporal::{Attributes, SourceRecord};

/// One raw row: either ordered cells (CSV) or a column → value mapping.
#[derive(Debug, Clone)]
pub enum RawRow {
    Cells(Vec<String>),
    Mapping(HashMap<String, String>),
}

/// Source of raw rows. `None` ends the stream.
type RowSource = Box<dyn Iterator<Item = Result<RawRow>>>;

pub struct RecordExtractor {
    header: Vec<String>,
    header_set: BTreeSet<String>,
    key_index: usize,
    tracked: Vec<(String, usize)>,
    natural_key: String,
    rows: RowSource,
    row_number: usize,
}

impl RecordExtractor {
    /// Open a CSV file with a header line.
    pub fn from_path(path: &Path, config: &ScdConfig) -> Result<Self> {
        let file = File::open(path)?;
        Self::from_csv_reader(file, b',', config)
    }

    /// Read CSV from any reader; the header is read eagerly.
    pub fn from_csv_reader<R: Read + 'static>(reader: R, delimiter: u8, config: &ScdConfig) -> Result<Self> {
        let mut rdr = csv::ReaderBuilder::new()
            .delimiter(delimiter)
            .flexible(true)
            .trim(csv::Trim::Headers)
            .from_reader(reader);

        let header: Vec<String> = rdr
            .headers()
            .map_err(|e| ScdError::malformed(0, None, format!("unreadable header: {}", e)))?
            .iter()
            .map(str::to_string)
            .collect();

        let rows = rdr.into_records().map(|result| {
            result
                .map(|record| RawRow::Cells(record.iter().map(str::to_string).collect()))
                .map_err(ScdError::from)
        });

        Self::build(header, Box::new(rows), config)
    }

    /// Ordered row mappings with a declared header.
    pub fn from_rows<I>(header: Vec<String>, rows: I, config: &ScdConfig) -> Result<Self>
    where
        I: IntoIterator<Item = HashMap<String, String>>,
        I::IntoIter: 'static,
    {
        let rows = rows.into_iter().map(|m| Ok(RawRow::Mapping(m)));
        Self::build(header, Box::new(rows), config)
    }

    fn build(header: Vec<String>, rows: RowSource, config: &ScdConfig) -> Result<Self> {
        let mut header_set = BTreeSet::new();
        for column in &header {
            if !header_set.insert(column.clone()) {
                return Err(ScdError::malformed(0, None, format!("duplicate header column '{}'", column)));
            }
        }

        let position = |name: &str| header.iter().position(|c| c == name);

        let key_index = position(&config.natural_key).ok_or_else(|| {
            ScdError::malformed(0, None, format!("header is missing natural key column '{}'", config.natural_key))
        })?;

        let mut tracked = Vec::new();
        let mut missing = Vec::new();
        for field in config.fields.all() {
            match position(field) {
                Some(idx) => tracked.push((field.clone(), idx)),
                None => missing.push(field.as_str()),
            }
        }
        if !missing.is_empty() {
            return Err(ScdError::malformed(
                0,
                None,
                format!("header is missing tracked columns: {}", missing.join(", ")),
            ));
        }

        Ok(RecordExtractor {
            header,
            header_set,
            key_index,
            tracked,
            natural_key: config.natural_key.clone(),
            rows,
            row_number: 0,
        })
    }

    pub fn header(&self) -> &[String] {
        &self.header
    }

    fn to_record(&self, raw: RawRow, row: usize) -> Result<SourceRecord> {
        let cells: Vec<String> = match raw {
            RawRow::Cells(cells) => {
                if cells.len() != self.header.len() {
                    let key = cells.get(self.key_index).map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
                    return Err(ScdError::malformed(
                        row,
                        key,
                        format!("expected {} columns, found {}", self.header.len(), cells.len()),
                    ));
                }
                cells
            }
            RawRow::Mapping(mut map) => {
                let keys: BTreeSet<String> = map.keys().cloned().collect();
                if keys != self.header_set {
                    let key = map.get(&self.natural_key).map(|s| s.trim().to_string()).filter(|s| !s.is_empty());
                    return Err(ScdError::malformed(row, key, column_set_difference(&self.header_set, &keys)));
                }
                self.header.iter().map(|c| map.remove(c).unwrap_or_default()).collect()
            }
        };

        let natural_key = cells[self.key_index].trim();
        if natural_key.is_empty() {
            return Err(ScdError::malformed(
                row,
                None,
                format!("natural key column '{}' is empty", self.natural_key),
            ));
        }

        let attributes: Attributes = self
            .tracked
            .iter()
            .map(|(field, idx)| {
                let value = cells[*idx].trim();
                let value = if value.is_empty() { None } else { Some(value.to_string()) };
                (field.clone(), value)
            })
            .collect();

        Ok(SourceRecord::new(natural_key, attributes, row))
    }
}

impl Iterator for RecordExtractor {
    type Item = Result<SourceRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        let raw = self.rows.next()?;
        self.row_number += 1;
        let row = self.row_number;

        Some(match raw {
            Ok(raw) => self.to_record(raw, row),
            // A CSV error on one line (bad quoting, invalid UTF-8) fails that row only
            Err(ScdError::Csv(e)) if !e.is_io_error() => Err(ScdError::malformed(row, None, e.to_string())),
            Err(e) => Err(e),
        })
    }
}

fn column_set_difference(expected: &BTreeSet<String>, found: &BTreeSet<String>) -> String {
    let missing: Vec<&str> = expected.difference(found).map(String::as_str).collect();
    let extra: Vec<&str> = found.difference(expected).map(String::as_str).collect();
    let mut parts = BTreeMap::new();
    if !missing.is_empty() {
        parts.insert("missing", missing.join(", "));
    }
    if !extra.is_empty() {
        parts.insert("unexpected", extra.join(", "));
    }
    let detail: Vec<String> = parts.into_iter().map(|(k, v)| format!("{} columns: {}", k, v)).collect();
    format!("row columns do not match header ({})", detail.join("; "))
}
