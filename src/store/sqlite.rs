// 💾 SQLite dimension store
//
// One table per dimension plus an audit table of change events. WAL mode for
// crash recovery; a partial unique index keeps at most one current row per
// natural key even if two runs race.

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;

use crate::error::{Result, ScdError};
use crate::store::DimensionStore;
use crate::temporal::{Attributes, ChangeEvent, ChangeEventType, DimensionRow, NewDimensionRow};

const ROW_COLUMNS: &str = "surrogate_key, natural_key, attributes, row_hash,
    effective_start, effective_end, is_current, created_at, updated_at";

pub struct SqliteStore {
    conn: Connection,
    table: String,
    events_table: String,
}

impl SqliteStore {
    /// Open (or create) a database file. The table name must already be
    /// validated as a plain identifier (see `ScdConfig::validate`).
    pub fn open(path: &Path, table: &str) -> Result<Self> {
        let conn = Connection::open(path)?;
        Ok(Self::with_connection(conn, table))
    }

    pub fn open_in_memory(table: &str) -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Ok(Self::with_connection(conn, table))
    }

    pub fn with_connection(conn: Connection, table: &str) -> Self {
        SqliteStore {
            conn,
            table: table.to_string(),
            events_table: format!("{}_events", table),
        }
    }

    pub fn connection(&self) -> &Connection {
        &self.conn
    }

    /// Create the dimension and audit tables if they do not exist.
    pub fn setup(&self) -> Result<()> {
        // Enable WAL mode for crash recovery
        self.conn.pragma_update(None, "journal_mode", "WAL")?;

        self.conn.execute_batch(&format!(
            "CREATE TABLE IF NOT EXISTS {t} (
                surrogate_key INTEGER PRIMARY KEY AUTOINCREMENT,
                natural_key TEXT NOT NULL,
                attributes TEXT NOT NULL,
                row_hash TEXT NOT NULL,
                effective_start TEXT NOT NULL,
                effective_end TEXT NULL,
                is_current INTEGER NOT NULL DEFAULT 1,
                created_at TEXT NOT NULL,
                updated_at TEXT NOT NULL,
                CHECK (effective_end IS NULL OR effective_start < effective_end),
                CHECK (is_current = 0 OR effective_end IS NULL)
            );

            CREATE INDEX IF NOT EXISTS idx_{t}_natural_key ON {t}(natural_key);
            CREATE INDEX IF NOT EXISTS idx_{t}_is_current ON {t}(is_current);
            CREATE UNIQUE INDEX IF NOT EXISTS uq_{t}_current ON {t}(natural_key) WHERE is_current = 1;

            CREATE TABLE IF NOT EXISTS {e} (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                event_id TEXT UNIQUE NOT NULL,
                run_id TEXT NOT NULL,
                timestamp TEXT NOT NULL,
                event_type TEXT NOT NULL,
                natural_key TEXT NOT NULL,
                surrogate_key INTEGER NOT NULL,
                data TEXT NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_{e}_natural_key ON {e}(natural_key);",
            t = self.table,
            e = self.events_table,
        ))?;

        Ok(())
    }

    /// Drop and recreate both tables (demo reset).
    pub fn reset(&self) -> Result<()> {
        self.conn.execute_batch(&format!(
            "DROP TABLE IF EXISTS {t}; DROP TABLE IF EXISTS {e};",
            t = self.table,
            e = self.events_table,
        ))?;
        self.setup()
    }

    pub fn count(&self) -> Result<i64> {
        let count: i64 = self
            .conn
            .query_row(&format!("SELECT COUNT(*) FROM {}", self.table), [], |row| row.get(0))?;
        Ok(count)
    }

    /// Audit events for one natural key, oldest first.
    pub fn events_for(&self, natural_key: &str) -> Result<Vec<ChangeEvent>> {
        let mut stmt = self.conn.prepare(&format!(
            "SELECT event_id, run_id, timestamp, event_type, natural_key, surrogate_key, data
             FROM {} WHERE natural_key = ?1 ORDER BY id",
            self.events_table
        ))?;

        let events = stmt
            .query_map([natural_key], |row| {
                let event_type: String = row.get(3)?;
                let data: String = row.get(6)?;
                Ok(ChangeEvent {
                    event_id: row.get(0)?,
                    run_id: row.get(1)?,
                    timestamp: parse_timestamp(2, &row.get::<_, String>(2)?)?,
                    event_type: ChangeEventType::parse(&event_type).ok_or_else(|| {
                        rusqlite::Error::FromSqlConversionFailure(
                            3,
                            Type::Text,
                            format!("unknown event type '{}'", event_type).into(),
                        )
                    })?,
                    natural_key: row.get(4)?,
                    surrogate_key: row.get(5)?,
                    data: serde_json::from_str(&data)
                        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(6, Type::Text, Box::new(e)))?,
                })
            })?
            .collect::<std::result::Result<Vec<_>, _>>()?;

        Ok(events)
    }

    fn query_rows(&self, where_clause: &str, order: &str, key: Option<&str>) -> Result<Vec<DimensionRow>> {
        let sql = format!("SELECT {} FROM {} {} ORDER BY {}", ROW_COLUMNS, self.table, where_clause, order);
        let mut stmt = self.conn.prepare(&sql)?;
        let rows = match key {
            Some(key) => stmt.query_map([key], map_row)?.collect::<std::result::Result<Vec<_>, _>>()?,
            None => stmt.query_map([], map_row)?.collect::<std::result::Result<Vec<_>, _>>()?,
        };
        Ok(rows)
    }
}

impl DimensionStore for SqliteStore {
    fn get_current(&self, natural_key: &str) -> Result<Option<DimensionRow>> {
        let row = self
            .conn
            .query_row(
                &format!(
                    "SELECT {} FROM {} WHERE natural_key = ?1 AND is_current = 1",
                    ROW_COLUMNS, self.table
                ),
                [natural_key],
                map_row,
            )
            .optional()?;
        Ok(row)
    }

    fn insert(&mut self, row: NewDimensionRow) -> Result<i64> {
        let attributes = serde_json::to_string(&row.attributes)?;
        let start = format_timestamp(row.effective_start);
        let created = format_timestamp(row.created_at);

        let result = self.conn.execute(
            &format!(
                "INSERT INTO {} (
                    natural_key, attributes, row_hash, effective_start, effective_end,
                    is_current, created_at, updated_at
                ) VALUES (?1, ?2, ?3, ?4, NULL, 1, ?5, ?5)",
                self.table
            ),
            params![row.natural_key, attributes, row.row_hash, start, created],
        );

        match result {
            Ok(_) => Ok(self.conn.last_insert_rowid()),
            // Another writer already holds the current row for this key
            Err(rusqlite::Error::SqliteFailure(err, _)) if err.code == rusqlite::ErrorCode::ConstraintViolation => {
                Err(ScdError::StaleRow {
                    natural_key: row.natural_key,
                    surrogate_key: 0,
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    fn update(&mut self, row: &DimensionRow) -> Result<()> {
        let attributes = serde_json::to_string(&row.attributes)?;
        let changed = self.conn.execute(
            &format!(
                "UPDATE {}
                 SET attributes = ?1,
                     row_hash = ?2,
                     effective_end = ?3,
                     is_current = ?4,
                     updated_at = ?5
                 WHERE surrogate_key = ?6 AND natural_key = ?7",
                self.table
            ),
            params![
                attributes,
                row.row_hash,
                row.effective_end.map(format_timestamp),
                row.is_current,
                format_timestamp(row.updated_at),
                row.surrogate_key,
                row.natural_key,
            ],
        )?;

        if changed == 0 {
            return Err(ScdError::StaleRow {
                natural_key: row.natural_key.clone(),
                surrogate_key: row.surrogate_key,
            });
        }
        Ok(())
    }

    fn history(&self, natural_key: &str) -> Result<Vec<DimensionRow>> {
        self.query_rows("WHERE natural_key = ?1", "effective_start, surrogate_key", Some(natural_key))
    }

    fn all_rows(&self) -> Result<Vec<DimensionRow>> {
        self.query_rows("", "natural_key, effective_start, surrogate_key", None)
    }

    fn record_event(&mut self, event: &ChangeEvent) -> Result<()> {
        let data = serde_json::to_string(&event.data)?;
        self.conn.execute(
            &format!(
                "INSERT INTO {} (
                    event_id, run_id, timestamp, event_type, natural_key, surrogate_key, data
                ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
                self.events_table
            ),
            params![
                event.event_id,
                event.run_id,
                format_timestamp(event.timestamp),
                event.event_type.as_str(),
                event.natural_key,
                event.surrogate_key,
                data,
            ],
        )?;
        Ok(())
    }

    fn begin(&mut self) -> Result<()> {
        self.conn.execute_batch("BEGIN IMMEDIATE")?;
        Ok(())
    }

    fn commit(&mut self) -> Result<()> {
        self.conn.execute_batch("COMMIT")?;
        Ok(())
    }

    fn rollback(&mut self) -> Result<()> {
        self.conn.execute_batch("ROLLBACK")?;
        Ok(())
    }
}

/// Fixed-width UTC timestamps sort lexicographically in time order.
fn format_timestamp(ts: DateTime<Utc>) -> String {
    ts.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(idx: usize, s: &str) -> rusqlite::Result<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn map_row(row: &Row<'_>) -> rusqlite::Result<DimensionRow> {
    let attributes_json: String = row.get(2)?;
    let attributes: Attributes = serde_json::from_str(&attributes_json)
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(2, Type::Text, Box::new(e)))?;
    let effective_end: Option<String> = row.get(5)?;

    Ok(DimensionRow {
        surrogate_key: row.get(0)?,
        natural_key: row.get(1)?,
        attributes,
        row_hash: row.get(3)?,
        effective_start: parse_timestamp(4, &row.get::<_, String>(4)?)?,
        effective_end: effective_end.map(|s| parse_timestamp(5, &s)).transpose()?,
        is_current: row.get(6)?,
        created_at: parse_timestamp(7, &row.get::<_, String>(7)?)?,
        updated_at: parse_timestamp(8, &row.get::<_, String>(8)?)?,
    })
}
