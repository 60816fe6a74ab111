use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, SecondsFormat, Utc};
use rusqlite::types::Value;
use rusqlite::{params, params_from_iter, Connection, Row};

use super::{AuditError, AuditQuery, AuditRecord, AuditStore, Page};

const SCHEMA: &str = r#"
CREATE TABLE IF NOT EXISTS audit_events (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    recorded_at TEXT NOT NULL,
    event_type TEXT NOT NULL,
    request_id TEXT,
    season INTEGER,
    outcome TEXT,
    data TEXT NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_audit_events_unit ON audit_events(request_id, season);
CREATE INDEX IF NOT EXISTS idx_audit_events_recorded_at ON audit_events(recorded_at);
CREATE INDEX IF NOT EXISTS idx_audit_events_outcome ON audit_events(outcome)
    WHERE outcome IS NOT NULL;
"#;

const INSERT: &str = "INSERT INTO audit_events \
    (recorded_at, event_type, request_id, season, outcome, data) \
    VALUES (?1, ?2, ?3, ?4, ?5, ?6)";

/// Fixed-width timestamps so text comparison orders chronologically.
fn encode_time(at: &DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

/// SQL conditions built from an [`AuditQuery`].
struct Conditions {
    clauses: Vec<&'static str>,
    values: Vec<Value>,
}

impl Conditions {
    fn from_query(query: &AuditQuery) -> Self {
        let mut conditions = Self {
            clauses: Vec::new(),
            values: Vec::new(),
        };

        if let Some(ref request_id) = query.request_id {
            conditions.push("request_id = ?", request_id.clone());
            if let Some(season) = query.season {
                conditions.push("season = ?", i64::from(season));
            }
        }
        if let Some(ref outcome) = query.outcome {
            conditions.push("outcome = ?", outcome.clone());
        }
        if let Some(ref event_type) = query.event_type {
            conditions.push("event_type = ?", event_type.clone());
        }
        if let Some(ref since) = query.since {
            conditions.push("recorded_at >= ?", encode_time(since));
        }
        if let Some(ref until) = query.until {
            conditions.push("recorded_at <= ?", encode_time(until));
        }
        conditions
    }

    fn push(&mut self, clause: &'static str, value: impl Into<Value>) {
        self.clauses.push(clause);
        self.values.push(value.into());
    }

    fn where_sql(&self) -> String {
        if self.clauses.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", self.clauses.join(" AND "))
        }
    }
}

/// One row as stored, before decoding.
struct StoredRow {
    id: i64,
    recorded_at: String,
    event_type: String,
    request_id: Option<String>,
    season: Option<u32>,
    outcome: Option<String>,
    data: String,
}

impl StoredRow {
    fn read(row: &Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            recorded_at: row.get(1)?,
            event_type: row.get(2)?,
            request_id: row.get(3)?,
            season: row.get(4)?,
            outcome: row.get(5)?,
            data: row.get(6)?,
        })
    }
}

impl TryFrom<StoredRow> for AuditRecord {
    type Error = AuditError;

    fn try_from(row: StoredRow) -> Result<Self, Self::Error> {
        let timestamp = DateTime::parse_from_rfc3339(&row.recorded_at)
            .map_err(|e| AuditError::Database(format!("bad timestamp in row {}: {}", row.id, e)))?
            .with_timezone(&Utc);
        let data = serde_json::from_str(&row.data)
            .map_err(|e| AuditError::Encoding(format!("row {}: {}", row.id, e)))?;

        Ok(AuditRecord {
            id: row.id,
            timestamp,
            event_type: row.event_type,
            request_id: row.request_id,
            season: row.season,
            outcome: row.outcome,
            data,
        })
    }
}

/// SQLite-backed audit store, sharing the database file with the request store.
pub struct SqliteAuditStore {
    conn: Mutex<Connection>,
}

impl SqliteAuditStore {
    pub fn new(path: &Path) -> Result<Self, AuditError> {
        Self::init(Connection::open(path)?)
    }

    pub fn in_memory() -> Result<Self, AuditError> {
        Self::init(Connection::open_in_memory()?)
    }

    fn init(conn: Connection) -> Result<Self, AuditError> {
        conn.execute_batch(SCHEMA)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }
}

impl AuditStore for SqliteAuditStore {
    fn append(&self, records: &[AuditRecord]) -> Result<(), AuditError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        {
            let mut insert = tx.prepare(INSERT)?;
            for record in records {
                let data = serde_json::to_string(&record.data)
                    .map_err(|e| AuditError::Encoding(e.to_string()))?;
                insert.execute(params![
                    encode_time(&record.timestamp),
                    record.event_type,
                    record.request_id,
                    record.season,
                    record.outcome,
                    data,
                ])?;
            }
        }
        tx.commit()?;
        Ok(())
    }

    fn history(&self, query: &AuditQuery, page: Page) -> Result<Vec<AuditRecord>, AuditError> {
        let conn = self.conn.lock().unwrap();
        let mut conditions = Conditions::from_query(query);
        let sql = format!(
            "SELECT id, recorded_at, event_type, request_id, season, outcome, data \
             FROM audit_events {} ORDER BY recorded_at DESC, id DESC LIMIT ? OFFSET ?",
            conditions.where_sql()
        );
        conditions.values.push(Value::Integer(page.limit));
        conditions.values.push(Value::Integer(page.offset));

        let mut stmt = conn.prepare(&sql)?;
        let rows = stmt
            .query_map(params_from_iter(conditions.values.iter()), StoredRow::read)?
            .collect::<Result<Vec<_>, _>>()?;

        rows.into_iter().map(AuditRecord::try_from).collect()
    }

    fn count(&self, query: &AuditQuery) -> Result<i64, AuditError> {
        let conn = self.conn.lock().unwrap();
        let conditions = Conditions::from_query(query);
        let sql = format!("SELECT COUNT(*) FROM audit_events {}", conditions.where_sql());
        let count = conn.query_row(&sql, params_from_iter(conditions.values.iter()), |row| {
            row.get(0)
        })?;
        Ok(count)
    }
}
