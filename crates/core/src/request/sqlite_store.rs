//! SQLite-backed request store implementation.

use std::path::Path;
use std::sync::Mutex;

use chrono::{DateTime, Utc};
use rusqlite::{params, Connection, OptionalExtension};

use super::{
    EligibleCursor, EligibleUnit, MediaIds, MediaKind, MediaRequest, ObservedRequest,
    RequestFilter, RequestStore, RequestStoreError, RequestUnit, Transition, UnitOutcome,
    UnitState, UpsertOutcome, WorkUnit,
};
use crate::recovery::RetryPolicy;

/// Season ordinal used for the single unit of a movie.
const MOVIE_ORD: i64 = -1;

/// SQLite-backed request store.
pub struct SqliteRequestStore {
    conn: Mutex<Connection>,
}

impl SqliteRequestStore {
    /// Open (or create) the store at the given database path.
    pub fn new(path: &Path) -> Result<Self, RequestStoreError> {
        let conn = Connection::open(path)?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// Create an in-memory store (useful for testing).
    pub fn in_memory() -> Result<Self, RequestStoreError> {
        let conn = Connection::open_in_memory()?;
        Self::initialize_schema(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    fn initialize_schema(conn: &Connection) -> Result<(), RequestStoreError> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS media_requests (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                id TEXT NOT NULL UNIQUE,
                kind TEXT NOT NULL,
                title TEXT NOT NULL,
                year INTEGER,
                ids TEXT NOT NULL,
                first_seen TEXT NOT NULL,
                first_seen_ms INTEGER NOT NULL,
                updated_at TEXT NOT NULL
            );

            CREATE TABLE IF NOT EXISTS request_units (
                request_id TEXT NOT NULL REFERENCES media_requests(id),
                season_ord INTEGER NOT NULL,
                state TEXT NOT NULL,
                attempts INTEGER NOT NULL DEFAULT 0,
                last_failure TEXT,
                last_attempted_at TEXT,
                next_attempt_ms INTEGER,
                updated_at TEXT NOT NULL,
                PRIMARY KEY (request_id, season_ord)
            );

            CREATE INDEX IF NOT EXISTS idx_media_requests_first_seen
                ON media_requests(first_seen_ms, seq);
            CREATE INDEX IF NOT EXISTS idx_request_units_next_attempt
                ON request_units(next_attempt_ms);
            "#,
        )?;
        Ok(())
    }

    fn build_where_clause(filter: &RequestFilter) -> (String, Vec<Box<dyn rusqlite::ToSql>>) {
        let mut conditions = Vec::new();
        let mut params: Vec<Box<dyn rusqlite::ToSql>> = Vec::new();

        if let Some(ref state) = filter.state {
            conditions.push(
                "EXISTS (SELECT 1 FROM request_units u WHERE u.request_id = r.id AND json_extract(u.state, '$.type') = ?)",
            );
            params.push(Box::new(state.clone()));
        }

        if let Some(kind) = filter.kind {
            conditions.push("r.kind = ?");
            params.push(Box::new(kind.as_str().to_string()));
        }

        let where_clause = if conditions.is_empty() {
            String::new()
        } else {
            format!("WHERE {}", conditions.join(" AND "))
        };

        (where_clause, params)
    }

    fn row_to_request(row: &rusqlite::Row) -> rusqlite::Result<MediaRequest> {
        let id: String = row.get(0)?;
        let kind: String = row.get(1)?;
        let title: String = row.get(2)?;
        let year: Option<i32> = row.get(3)?;
        let ids_json: String = row.get(4)?;
        let first_seen: String = row.get(5)?;
        let updated_at: String = row.get(6)?;

        Ok(MediaRequest {
            id,
            kind: MediaKind::parse(&kind).unwrap_or(MediaKind::Movie),
            title,
            year,
            ids: serde_json::from_str(&ids_json).unwrap_or_default(),
            first_seen: parse_ts(&first_seen),
            updated_at: parse_ts(&updated_at),
            units: Vec::new(),
        })
    }

    fn row_to_unit(row: &rusqlite::Row) -> rusqlite::Result<RequestUnit> {
        let season_ord: i64 = row.get(0)?;
        let state_json: String = row.get(1)?;
        let attempts: u32 = row.get(2)?;
        let last_failure: Option<String> = row.get(3)?;
        let last_attempted_at: Option<String> = row.get(4)?;
        let updated_at: String = row.get(5)?;

        Ok(RequestUnit {
            season: ord_to_season(season_ord),
            state: serde_json::from_str(&state_json).unwrap_or(UnitState::Pending),
            attempts,
            last_failure,
            last_attempted_at: last_attempted_at.as_deref().map(parse_ts),
            updated_at: parse_ts(&updated_at),
        })
    }

    fn load_units(conn: &Connection, request_id: &str) -> rusqlite::Result<Vec<RequestUnit>> {
        let mut stmt = conn.prepare(
            "SELECT season_ord, state, attempts, last_failure, last_attempted_at, updated_at FROM request_units WHERE request_id = ? ORDER BY season_ord",
        )?;
        let units = stmt
            .query_map(params![request_id], Self::row_to_unit)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(units)
    }

    fn load_unit(
        conn: &Connection,
        request_id: &str,
        season: Option<u32>,
    ) -> Result<RequestUnit, RequestStoreError> {
        conn.query_row(
            "SELECT season_ord, state, attempts, last_failure, last_attempted_at, updated_at FROM request_units WHERE request_id = ? AND season_ord = ?",
            params![request_id, season_to_ord(season)],
            Self::row_to_unit,
        )
        .optional()?
        .ok_or_else(|| RequestStoreError::NotFound(unit_key(request_id, season)))
    }

    #[allow(clippy::too_many_arguments)]
    fn write_unit(
        conn: &Connection,
        request_id: &str,
        season: Option<u32>,
        state: &UnitState,
        attempts: u32,
        last_failure: Option<&str>,
        last_attempted_at: Option<DateTime<Utc>>,
        now: DateTime<Utc>,
    ) -> Result<(), RequestStoreError> {
        let state_json =
            serde_json::to_string(state).map_err(|e| RequestStoreError::Database(e.to_string()))?;
        let next_attempt_ms = match state {
            UnitState::RetryPending { retry_after, .. } => Some(retry_after.timestamp_millis()),
            _ => None,
        };

        let updated = conn.execute(
            "UPDATE request_units SET state = ?, attempts = ?, last_failure = ?, last_attempted_at = ?, next_attempt_ms = ?, updated_at = ? WHERE request_id = ? AND season_ord = ?",
            params![
                state_json,
                attempts,
                last_failure,
                last_attempted_at.map(|t| t.to_rfc3339()),
                next_attempt_ms,
                now.to_rfc3339(),
                request_id,
                season_to_ord(season),
            ],
        )?;

        if updated == 0 {
            return Err(RequestStoreError::NotFound(unit_key(request_id, season)));
        }

        conn.execute(
            "UPDATE media_requests SET updated_at = ? WHERE id = ?",
            params![now.to_rfc3339(), request_id],
        )?;

        Ok(())
    }

    fn insert_unit(
        conn: &Connection,
        request_id: &str,
        season: Option<u32>,
        now: DateTime<Utc>,
    ) -> Result<bool, RequestStoreError> {
        let state_json = serde_json::to_string(&UnitState::Pending)
            .map_err(|e| RequestStoreError::Database(e.to_string()))?;
        let inserted = conn.execute(
            "INSERT OR IGNORE INTO request_units (request_id, season_ord, state, attempts, updated_at) VALUES (?, ?, ?, 0, ?)",
            params![request_id, season_to_ord(season), state_json, now.to_rfc3339()],
        )?;
        Ok(inserted > 0)
    }

    fn eligible_sql(extra: &str) -> String {
        format!(
            "SELECT r.id, r.kind, r.title, r.year, r.ids, u.season_ord, u.attempts, r.first_seen_ms, r.seq \
             FROM request_units u JOIN media_requests r ON r.id = u.request_id \
             WHERE (json_extract(u.state, '$.type') = 'pending' \
                OR (json_extract(u.state, '$.type') = 'retry_pending' AND u.next_attempt_ms <= ?1)) \
             {} \
             ORDER BY r.first_seen_ms, r.seq, u.season_ord",
            extra
        )
    }

    fn row_to_eligible(row: &rusqlite::Row) -> rusqlite::Result<EligibleUnit> {
        let kind: String = row.get(1)?;
        let ids_json: String = row.get(4)?;
        let season_ord: i64 = row.get(5)?;
        Ok(EligibleUnit {
            unit: WorkUnit {
                request_id: row.get(0)?,
                kind: MediaKind::parse(&kind).unwrap_or(MediaKind::Movie),
                title: row.get(2)?,
                year: row.get(3)?,
                ids: serde_json::from_str::<MediaIds>(&ids_json).unwrap_or_default(),
                season: ord_to_season(season_ord),
                attempts: row.get(6)?,
            },
            cursor: EligibleCursor {
                first_seen_ms: row.get(7)?,
                seq: row.get(8)?,
                season_ord,
            },
        })
    }
}

impl RequestStore for SqliteRequestStore {
    fn upsert_observed(
        &self,
        request: &ObservedRequest,
    ) -> Result<UpsertOutcome, RequestStoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now();

        let exists: bool = tx
            .query_row(
                "SELECT 1 FROM media_requests WHERE id = ?",
                params![request.id],
                |_| Ok(true),
            )
            .optional()?
            .unwrap_or(false);

        let outcome = if !exists {
            let ids_json = serde_json::to_string(&request.ids)
                .map_err(|e| RequestStoreError::Database(e.to_string()))?;
            tx.execute(
                "INSERT INTO media_requests (id, kind, title, year, ids, first_seen, first_seen_ms, updated_at) VALUES (?, ?, ?, ?, ?, ?, ?, ?)",
                params![
                    request.id,
                    request.kind.as_str(),
                    request.title,
                    request.year,
                    ids_json,
                    request.observed_at.to_rfc3339(),
                    request.observed_at.timestamp_millis(),
                    now.to_rfc3339(),
                ],
            )?;
            for season in request.unit_seasons() {
                Self::insert_unit(&tx, &request.id, season, now)?;
            }
            UpsertOutcome::Created
        } else {
            let mut added = Vec::new();
            if request.kind == MediaKind::Show {
                for season in request.unit_seasons().into_iter().flatten() {
                    if Self::insert_unit(&tx, &request.id, Some(season), now)? {
                        added.push(season);
                    }
                }
            }
            if added.is_empty() {
                UpsertOutcome::Unchanged
            } else {
                tx.execute(
                    "UPDATE media_requests SET updated_at = ? WHERE id = ?",
                    params![now.to_rfc3339(), request.id],
                )?;
                UpsertOutcome::SeasonsAdded(added)
            }
        };

        tx.commit()?;
        Ok(outcome)
    }

    fn get(&self, id: &str) -> Result<Option<MediaRequest>, RequestStoreError> {
        let conn = self.conn.lock().unwrap();

        let request = conn
            .query_row(
                "SELECT id, kind, title, year, ids, first_seen, updated_at FROM media_requests WHERE id = ?",
                params![id],
                Self::row_to_request,
            )
            .optional()?;

        match request {
            Some(mut request) => {
                request.units = Self::load_units(&conn, &request.id)?;
                Ok(Some(request))
            }
            None => Ok(None),
        }
    }

    fn list(&self, filter: &RequestFilter) -> Result<Vec<MediaRequest>, RequestStoreError> {
        let conn = self.conn.lock().unwrap();
        let (where_clause, mut params) = Self::build_where_clause(filter);

        let sql = format!(
            "SELECT r.id, r.kind, r.title, r.year, r.ids, r.first_seen, r.updated_at FROM media_requests r {} ORDER BY r.first_seen_ms, r.seq LIMIT ? OFFSET ?",
            where_clause
        );
        params.push(Box::new(filter.limit));
        params.push(Box::new(filter.offset));

        let mut stmt = conn.prepare(&sql)?;
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let mut requests = stmt
            .query_map(param_refs.as_slice(), Self::row_to_request)?
            .collect::<Result<Vec<_>, _>>()?;

        for request in &mut requests {
            request.units = Self::load_units(&conn, &request.id)?;
        }

        Ok(requests)
    }

    fn count(&self, filter: &RequestFilter) -> Result<i64, RequestStoreError> {
        let conn = self.conn.lock().unwrap();
        let (where_clause, params) = Self::build_where_clause(filter);

        let sql = format!("SELECT COUNT(*) FROM media_requests r {}", where_clause);
        let param_refs: Vec<&dyn rusqlite::ToSql> = params.iter().map(|p| p.as_ref()).collect();
        let count = conn.query_row(&sql, param_refs.as_slice(), |row| row.get(0))?;
        Ok(count)
    }

    fn count_units_by_state(&self) -> Result<Vec<(String, i64)>, RequestStoreError> {
        let conn = self.conn.lock().unwrap();
        let mut stmt = conn.prepare(
            "SELECT json_extract(state, '$.type') AS t, COUNT(*) FROM request_units GROUP BY t ORDER BY t",
        )?;
        let counts = stmt
            .query_map([], |row| Ok((row.get(0)?, row.get(1)?)))?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(counts)
    }

    fn next_eligible(
        &self,
        now: DateTime<Utc>,
        after: Option<&EligibleCursor>,
    ) -> Result<Option<EligibleUnit>, RequestStoreError> {
        let conn = self.conn.lock().unwrap();
        let cursor = after.copied().unwrap_or(EligibleCursor {
            first_seen_ms: i64::MIN,
            seq: i64::MIN,
            season_ord: i64::MIN,
        });

        let sql = format!(
            "{} LIMIT 1",
            Self::eligible_sql("AND (r.first_seen_ms, r.seq, u.season_ord) > (?2, ?3, ?4)")
        );
        let eligible = conn
            .query_row(
                &sql,
                params![
                    now.timestamp_millis(),
                    cursor.first_seen_ms,
                    cursor.seq,
                    cursor.season_ord
                ],
                Self::row_to_eligible,
            )
            .optional()?;
        Ok(eligible)
    }

    fn eligible_units_for(
        &self,
        request_id: &str,
        now: DateTime<Utc>,
    ) -> Result<Vec<WorkUnit>, RequestStoreError> {
        let conn = self.conn.lock().unwrap();
        let sql = Self::eligible_sql("AND r.id = ?2");
        let mut stmt = conn.prepare(&sql)?;
        let units = stmt
            .query_map(params![now.timestamp_millis(), request_id], |row| {
                Self::row_to_eligible(row).map(|e| e.unit)
            })?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(units)
    }

    fn begin_attempt(
        &self,
        request_id: &str,
        season: Option<u32>,
    ) -> Result<Transition, RequestStoreError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let unit = Self::load_unit(&conn, request_id, season)?;

        if !unit.state.is_eligible(now) {
            return Err(RequestStoreError::InvalidState {
                unit: unit_key(request_id, season),
                current_state: unit.state.state_type().to_string(),
                operation: "begin attempt on".to_string(),
            });
        }

        let to = UnitState::InProgress { started_at: now };
        Self::write_unit(
            &conn,
            request_id,
            season,
            &to,
            unit.attempts,
            unit.last_failure.as_deref(),
            Some(now),
            now,
        )?;

        Ok(Transition {
            from: unit.state,
            to,
            attempts: unit.attempts,
        })
    }

    fn record_outcome(
        &self,
        request_id: &str,
        season: Option<u32>,
        outcome: &UnitOutcome,
        policy: &RetryPolicy,
    ) -> Result<Transition, RequestStoreError> {
        let conn = self.conn.lock().unwrap();
        let now = Utc::now();
        let unit = Self::load_unit(&conn, request_id, season)?;

        if !matches!(unit.state, UnitState::InProgress { .. }) {
            return Err(RequestStoreError::InvalidState {
                unit: unit_key(request_id, season),
                current_state: unit.state.state_type().to_string(),
                operation: "record outcome for".to_string(),
            });
        }

        let (to, attempts, last_failure) = match outcome {
            UnitOutcome::Completed { candidate } => (
                UnitState::Completed {
                    completed_at: now,
                    candidate: candidate.clone(),
                },
                unit.attempts + 1,
                unit.last_failure.clone(),
            ),
            UnitOutcome::Retryable { reason } => {
                let attempts = unit.attempts + 1;
                let state = if policy.should_retry(attempts) {
                    UnitState::RetryPending {
                        retry_after: policy.retry_at(attempts, now),
                        reason: reason.clone(),
                    }
                } else {
                    UnitState::Failed {
                        failed_at: now,
                        reason: format!("{} (after {} attempts)", reason, attempts),
                    }
                };
                (state, attempts, Some(reason.clone()))
            }
            UnitOutcome::Permanent { reason } => (
                UnitState::Failed {
                    failed_at: now,
                    reason: reason.clone(),
                },
                unit.attempts + 1,
                Some(reason.clone()),
            ),
            UnitOutcome::AuthPaused => (
                UnitState::Pending,
                unit.attempts,
                unit.last_failure.clone(),
            ),
        };

        Self::write_unit(
            &conn,
            request_id,
            season,
            &to,
            attempts,
            last_failure.as_deref(),
            unit.last_attempted_at,
            now,
        )?;

        Ok(Transition {
            from: unit.state,
            to,
            attempts,
        })
    }

    fn promote_due_retries(&self, now: DateTime<Utc>) -> Result<usize, RequestStoreError> {
        let conn = self.conn.lock().unwrap();
        let pending = serde_json::to_string(&UnitState::Pending)
            .map_err(|e| RequestStoreError::Database(e.to_string()))?;
        let promoted = conn.execute(
            "UPDATE request_units SET state = ?1, next_attempt_ms = NULL, updated_at = ?2 WHERE json_extract(state, '$.type') = 'retry_pending' AND next_attempt_ms <= ?3",
            params![pending, now.to_rfc3339(), now.timestamp_millis()],
        )?;
        Ok(promoted)
    }

    fn resubmit(
        &self,
        request_id: &str,
        season: Option<u32>,
    ) -> Result<Vec<Transition>, RequestStoreError> {
        let mut conn = self.conn.lock().unwrap();
        let tx = conn.transaction()?;
        let now = Utc::now();

        let units = Self::load_units(&tx, request_id)?;
        if units.is_empty() {
            return Err(RequestStoreError::NotFound(request_id.to_string()));
        }

        let targets: Vec<RequestUnit> = match season {
            Some(s) => {
                let unit = units
                    .into_iter()
                    .find(|u| u.season == Some(s))
                    .ok_or_else(|| RequestStoreError::NotFound(unit_key(request_id, Some(s))))?;
                vec![unit]
            }
            None => units,
        };

        if let Some(busy) = targets
            .iter()
            .find(|u| matches!(u.state, UnitState::InProgress { .. }))
        {
            return Err(RequestStoreError::InvalidState {
                unit: unit_key(request_id, busy.season),
                current_state: busy.state.state_type().to_string(),
                operation: "resubmit".to_string(),
            });
        }

        let mut transitions = Vec::new();
        for unit in targets {
            if unit.state == UnitState::Pending && unit.attempts == 0 {
                continue;
            }
            Self::write_unit(
                &tx,
                request_id,
                unit.season,
                &UnitState::Pending,
                0,
                unit.last_failure.as_deref(),
                unit.last_attempted_at,
                now,
            )?;
            transitions.push(Transition {
                from: unit.state,
                to: UnitState::Pending,
                attempts: 0,
            });
        }

        tx.commit()?;
        Ok(transitions)
    }

    fn reset_in_progress(&self) -> Result<usize, RequestStoreError> {
        let conn = self.conn.lock().unwrap();
        let pending = serde_json::to_string(&UnitState::Pending)
            .map_err(|e| RequestStoreError::Database(e.to_string()))?;
        let reset = conn.execute(
            "UPDATE request_units SET state = ?1, updated_at = ?2 WHERE json_extract(state, '$.type') = 'in_progress'",
            params![pending, Utc::now().to_rfc3339()],
        )?;
        Ok(reset)
    }
}

fn season_to_ord(season: Option<u32>) -> i64 {
    season.map(i64::from).unwrap_or(MOVIE_ORD)
}

fn ord_to_season(ord: i64) -> Option<u32> {
    u32::try_from(ord).ok()
}

fn unit_key(request_id: &str, season: Option<u32>) -> String {
    match season {
        Some(s) => format!("{}/S{:02}", request_id, s),
        None => request_id.to_string(),
    }
}

fn parse_ts(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}
