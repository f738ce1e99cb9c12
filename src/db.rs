// 🗄️ Persistence - SQLite (WAL) storage for everything that outlives a run
//
// - usage_counters: per-day, per-source dispatch counts
// - source_exclusions: sources that errored, out for the rest of that day
// - snapshots:      append-only registry profiles, versioned per entity
// - assessments:    archived FundingAssessments keyed by entity + day
// - change_log:     append-only registry changes keyed by day + entity
// - events:         audit trail
//
// Every failure here is a Persistence error and reaches the caller.

use chrono::{DateTime, NaiveDate, Utc};
use rusqlite::types::Type;
use rusqlite::{params, Connection, OptionalExtension, Row};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::Path;

use crate::error::MonitorResult;
use crate::registry::RegistryProfile;
use crate::scoring::FundingAssessment;
use crate::snapshot::{Change, Snapshot, SnapshotHistory};

// ============================================================================
// SETUP
// ============================================================================

/// Open (creating if needed) the database file and its schema
pub fn open_database(path: &Path) -> MonitorResult<Connection> {
    if let Some(parent) = path.parent() {
        if !parent.as_os_str().is_empty() {
            fs::create_dir_all(parent)?;
        }
    }
    let conn = Connection::open(path)?;
    setup_database(&conn)?;
    Ok(conn)
}

pub fn setup_database(conn: &Connection) -> MonitorResult<()> {
    // Enable WAL mode for crash recovery
    conn.pragma_update(None, "journal_mode", "WAL")?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS usage_counters (
            day TEXT NOT NULL,
            source_id TEXT NOT NULL,
            count INTEGER NOT NULL DEFAULT 0,
            updated_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (day, source_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS source_exclusions (
            day TEXT NOT NULL,
            source_id TEXT NOT NULL,
            reason TEXT NOT NULL,
            excluded_at DATETIME DEFAULT CURRENT_TIMESTAMP,
            PRIMARY KEY (day, source_id)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS snapshots (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            snapshot_id TEXT UNIQUE NOT NULL,
            entity TEXT NOT NULL,
            version INTEGER NOT NULL,
            source_id TEXT NOT NULL,
            profile TEXT NOT NULL,
            valid_from TEXT NOT NULL,
            UNIQUE (entity, version)
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS assessments (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            assessment_id TEXT UNIQUE NOT NULL,
            entity TEXT NOT NULL,
            check_day TEXT NOT NULL,
            has_signal INTEGER NOT NULL,
            confidence INTEGER NOT NULL,
            payload TEXT NOT NULL,
            checked_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS change_log (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            day TEXT NOT NULL,
            entity TEXT NOT NULL,
            kind TEXT NOT NULL,
            payload TEXT NOT NULL,
            recorded_at TEXT NOT NULL
        )",
        [],
    )?;

    conn.execute(
        "CREATE TABLE IF NOT EXISTS events (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            event_id TEXT UNIQUE NOT NULL,
            timestamp TEXT NOT NULL,
            event_type TEXT NOT NULL,
            entity_type TEXT NOT NULL,
            entity_id TEXT NOT NULL,
            data TEXT NOT NULL,
            actor TEXT NOT NULL,
            created_at DATETIME DEFAULT CURRENT_TIMESTAMP
        )",
        [],
    )?;

    conn.execute("CREATE INDEX IF NOT EXISTS idx_snapshots_entity ON snapshots(entity, version)", [])?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_assessments_entity ON assessments(entity, check_day)", [])?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_assessments_day ON assessments(check_day)", [])?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_change_log_day ON change_log(day, entity)", [])?;
    conn.execute("CREATE INDEX IF NOT EXISTS idx_events_entity ON events(entity_type, entity_id)", [])?;

    Ok(())
}

// ============================================================================
// ROW HELPERS
// ============================================================================

fn json_column<T: DeserializeOwned>(row: &Row, idx: usize) -> rusqlite::Result<T> {
    let text: String = row.get(idx)?;
    serde_json::from_str(&text).map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

fn time_column(row: &Row, idx: usize) -> rusqlite::Result<DateTime<Utc>> {
    let text: String = row.get(idx)?;
    DateTime::parse_from_rfc3339(&text)
        .map(|t| t.with_timezone(&Utc))
        .map_err(|e| rusqlite::Error::FromSqlConversionFailure(idx, Type::Text, Box::new(e)))
}

// ============================================================================
// USAGE COUNTERS
// ============================================================================

/// source_id → count for one day (empty on a fresh day)
pub fn get_usage(conn: &Connection, day: NaiveDate) -> MonitorResult<HashMap<String, u32>> {
    let mut stmt = conn.prepare("SELECT source_id, count FROM usage_counters WHERE day = ?1")?;
    let rows = stmt
        .query_map(params![day.to_string()], |row| Ok((row.get::<_, String>(0)?, row.get::<_, u32>(1)?)))?
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(rows)
}

/// Unconditional increment; returns the new count
pub fn increment_usage(conn: &Connection, day: NaiveDate, source_id: &str) -> MonitorResult<u32> {
    conn.execute(
        "INSERT INTO usage_counters (day, source_id, count) VALUES (?1, ?2, 1)
         ON CONFLICT(day, source_id) DO UPDATE SET count = count + 1, updated_at = CURRENT_TIMESTAMP",
        params![day.to_string(), source_id],
    )?;
    let count = conn.query_row(
        "SELECT count FROM usage_counters WHERE day = ?1 AND source_id = ?2",
        params![day.to_string(), source_id],
        |row| row.get(0),
    )?;
    Ok(count)
}

/// Check-and-increment in one statement. False when the quota is spent.
pub fn claim_usage(conn: &Connection, day: NaiveDate, source_id: &str, quota: Option<u32>) -> MonitorResult<bool> {
    let Some(quota) = quota else {
        increment_usage(conn, day, source_id)?;
        return Ok(true);
    };
    if quota == 0 {
        return Ok(false);
    }

    let changed = conn.execute(
        "INSERT INTO usage_counters (day, source_id, count) VALUES (?1, ?2, 1)
         ON CONFLICT(day, source_id) DO UPDATE SET count = count + 1, updated_at = CURRENT_TIMESTAMP
         WHERE count < ?3",
        params![day.to_string(), source_id, quota],
    )?;
    Ok(changed > 0)
}

/// Exclude a source for one day. The first recorded reason is kept.
pub fn exclude_source(conn: &Connection, day: NaiveDate, source_id: &str, reason: &str) -> MonitorResult<()> {
    conn.execute(
        "INSERT OR IGNORE INTO source_exclusions (day, source_id, reason) VALUES (?1, ?2, ?3)",
        params![day.to_string(), source_id, reason],
    )?;
    Ok(())
}

/// source_id → reason for one day
pub fn get_exclusions(conn: &Connection, day: NaiveDate) -> MonitorResult<HashMap<String, String>> {
    let mut stmt = conn.prepare("SELECT source_id, reason FROM source_exclusions WHERE day = ?1")?;
    let rows = stmt
        .query_map(params![day.to_string()], |row| Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?)))?
        .collect::<Result<HashMap<_, _>, _>>()?;
    Ok(rows)
}

// ============================================================================
// SNAPSHOTS (append-only)
// ============================================================================

/// Append a new current snapshot; the version is assigned in the same statement
pub fn append_snapshot(conn: &Connection, entity: &str, profile: &RegistryProfile) -> MonitorResult<Snapshot> {
    let mut snapshot = Snapshot::new(entity, 0, profile.clone());
    let profile_json = serde_json::to_string(profile)?;

    conn.execute(
        "INSERT INTO snapshots (snapshot_id, entity, version, source_id, profile, valid_from)
         SELECT ?1, ?2, COALESCE(MAX(version), 0) + 1, ?3, ?4, ?5
         FROM snapshots WHERE entity = ?2",
        params![
            snapshot.id,
            entity,
            profile.source_id,
            profile_json,
            snapshot.valid_from.to_rfc3339(),
        ],
    )?;

    snapshot.version = conn.query_row(
        "SELECT version FROM snapshots WHERE id = ?1",
        params![conn.last_insert_rowid()],
        |row| row.get(0),
    )?;
    Ok(snapshot)
}

fn snapshot_from_row(row: &Row) -> rusqlite::Result<Snapshot> {
    Ok(Snapshot {
        id: row.get(0)?,
        entity: row.get(1)?,
        version: row.get(2)?,
        profile: json_column(row, 3)?,
        valid_from: time_column(row, 4)?,
        valid_until: None,
    })
}

pub fn latest_snapshot(conn: &Connection, entity: &str) -> MonitorResult<Option<Snapshot>> {
    let snapshot = conn
        .query_row(
            "SELECT snapshot_id, entity, version, profile, valid_from
             FROM snapshots WHERE entity = ?1
             ORDER BY version DESC LIMIT 1",
            params![entity],
            snapshot_from_row,
        )
        .optional()?;
    Ok(snapshot)
}

/// All versions of an entity, validity ranges derived
pub fn snapshot_history(conn: &Connection, entity: &str) -> MonitorResult<SnapshotHistory> {
    let mut stmt = conn.prepare(
        "SELECT snapshot_id, entity, version, profile, valid_from
         FROM snapshots WHERE entity = ?1
         ORDER BY version ASC",
    )?;
    let versions = stmt
        .query_map(params![entity], snapshot_from_row)?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(SnapshotHistory::from_versions(versions))
}

pub fn count_snapshots(conn: &Connection, entity: &str) -> MonitorResult<i64> {
    let count = conn.query_row(
        "SELECT COUNT(*) FROM snapshots WHERE entity = ?1",
        params![entity],
        |row| row.get(0),
    )?;
    Ok(count)
}

// ============================================================================
// ASSESSMENT ARCHIVE
// ============================================================================

pub fn insert_assessment(conn: &Connection, day: NaiveDate, assessment: &FundingAssessment) -> MonitorResult<()> {
    let payload = serde_json::to_string(assessment)?;
    conn.execute(
        "INSERT INTO assessments (assessment_id, entity, check_day, has_signal, confidence, payload, checked_at)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            assessment.id,
            assessment.entity,
            day.to_string(),
            assessment.has_signal,
            assessment.confidence,
            payload,
            assessment.checked_at.to_rfc3339(),
        ],
    )?;
    Ok(())
}

/// Archived assessments for an entity, newest first
pub fn get_assessments(conn: &Connection, entity: &str, limit: usize) -> MonitorResult<Vec<FundingAssessment>> {
    let mut stmt = conn.prepare(
        "SELECT payload FROM assessments WHERE entity = ?1
         ORDER BY checked_at DESC, id DESC LIMIT ?2",
    )?;
    let rows = stmt
        .query_map(params![entity, limit as i64], |row| json_column(row, 0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

pub fn get_assessments_for_day(conn: &Connection, day: NaiveDate) -> MonitorResult<Vec<FundingAssessment>> {
    let mut stmt = conn.prepare(
        "SELECT payload FROM assessments WHERE check_day = ?1
         ORDER BY confidence DESC, entity ASC",
    )?;
    let rows = stmt
        .query_map(params![day.to_string()], |row| json_column(row, 0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============================================================================
// CHANGE LOG (append-only)
// ============================================================================

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChangeRecord {
    pub day: String,
    pub entity: String,
    pub change: Change,
    pub recorded_at: DateTime<Utc>,
}

pub fn append_changes(conn: &Connection, day: NaiveDate, entity: &str, changes: &[Change]) -> MonitorResult<usize> {
    let now = Utc::now().to_rfc3339();
    let mut stmt = conn.prepare(
        "INSERT INTO change_log (day, entity, kind, payload, recorded_at) VALUES (?1, ?2, ?3, ?4, ?5)",
    )?;
    for change in changes {
        let payload = serde_json::to_string(change)?;
        stmt.execute(params![day.to_string(), entity, change.kind.as_str(), payload, now])?;
    }
    Ok(changes.len())
}

pub fn get_changes_for_day(conn: &Connection, day: NaiveDate) -> MonitorResult<Vec<ChangeRecord>> {
    let mut stmt = conn.prepare(
        "SELECT day, entity, payload, recorded_at FROM change_log
         WHERE day = ?1 ORDER BY entity ASC, id ASC",
    )?;
    let rows = stmt
        .query_map(params![day.to_string()], |row| {
            Ok(ChangeRecord {
                day: row.get(0)?,
                entity: row.get(1)?,
                change: json_column(row, 2)?,
                recorded_at: time_column(row, 3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

// ============================================================================
// AUDIT TRAIL
// ============================================================================

/// Event for audit trail
#[derive(Debug, Serialize, Deserialize, Clone)]
pub struct Event {
    pub event_id: String,
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub entity_type: String,
    pub entity_id: String,
    pub data: serde_json::Value,
    pub actor: String,
}

impl Event {
    pub fn new(event_type: &str, entity_type: &str, entity_id: &str, data: serde_json::Value, actor: &str) -> Self {
        Self {
            event_id: uuid::Uuid::new_v4().to_string(),
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            entity_type: entity_type.to_string(),
            entity_id: entity_id.to_string(),
            data,
            actor: actor.to_string(),
        }
    }
}

pub fn insert_event(conn: &Connection, event: &Event) -> MonitorResult<()> {
    let data_json = serde_json::to_string(&event.data)?;
    conn.execute(
        "INSERT INTO events (event_id, timestamp, event_type, entity_type, entity_id, data, actor)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)",
        params![
            event.event_id,
            event.timestamp.to_rfc3339(),
            event.event_type,
            event.entity_type,
            event.entity_id,
            data_json,
            event.actor,
        ],
    )?;
    Ok(())
}

pub fn get_events_for_entity(conn: &Connection, entity_type: &str, entity_id: &str) -> MonitorResult<Vec<Event>> {
    let mut stmt = conn.prepare(
        "SELECT event_id, timestamp, event_type, entity_type, entity_id, data, actor
         FROM events
         WHERE entity_type = ?1 AND entity_id = ?2
         ORDER BY timestamp DESC, id DESC",
    )?;
    let events = stmt
        .query_map(params![entity_type, entity_id], |row| {
            Ok(Event {
                event_id: row.get(0)?,
                timestamp: time_column(row, 1)?,
                event_type: row.get(2)?,
                entity_type: row.get(3)?,
                entity_id: row.get(4)?,
                data: json_column(row, 5)?,
                actor: row.get(6)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(events)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::snapshot::SnapshotDiffer;

    fn create_test_db() -> Connection {
        let conn = Connection::open_in_memory().unwrap();
        setup_database(&conn).unwrap();
        conn
    }

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 3, d).unwrap()
    }

    #[test]
    fn test_claim_respects_quota() {
        let conn = create_test_db();

        assert!(claim_usage(&conn, day(1), "qichacha", Some(2)).unwrap());
        assert!(claim_usage(&conn, day(1), "qichacha", Some(2)).unwrap());
        assert!(!claim_usage(&conn, day(1), "qichacha", Some(2)).unwrap());
        assert_eq!(get_usage(&conn, day(1)).unwrap()["qichacha"], 2);

        // A new day starts from zero
        assert!(get_usage(&conn, day(2)).unwrap().is_empty());
        assert!(claim_usage(&conn, day(2), "qichacha", Some(2)).unwrap());
    }

    #[test]
    fn test_claim_zero_and_unbounded() {
        let conn = create_test_db();
        assert!(!claim_usage(&conn, day(1), "x", Some(0)).unwrap());
        for _ in 0..5 {
            assert!(claim_usage(&conn, day(1), "gsxt", None).unwrap());
        }
        assert_eq!(get_usage(&conn, day(1)).unwrap()["gsxt"], 5);
    }

    #[test]
    fn test_exclusions_are_per_day_and_keep_first_reason() {
        let conn = create_test_db();

        exclude_source(&conn, day(1), "pedaily", "Rate limited by source").unwrap();
        exclude_source(&conn, day(1), "pedaily", "Unexpected HTTP status 500").unwrap();

        let excluded = get_exclusions(&conn, day(1)).unwrap();
        assert_eq!(excluded.len(), 1);
        assert_eq!(excluded["pedaily"], "Rate limited by source");
        assert!(get_exclusions(&conn, day(2)).unwrap().is_empty());
    }

    #[test]
    fn test_increment_usage() {
        let conn = create_test_db();
        assert_eq!(increment_usage(&conn, day(1), "kr36").unwrap(), 1);
        assert_eq!(increment_usage(&conn, day(1), "kr36").unwrap(), 2);
    }

    #[test]
    fn test_snapshots_are_append_only() {
        let conn = create_test_db();
        let v1 = RegistryProfile::new("Acme", "tianyancha").with_capital("100万");
        let v2 = RegistryProfile::new("Acme", "tianyancha").with_capital("135万");

        assert!(latest_snapshot(&conn, "Acme").unwrap().is_none());
        let first = append_snapshot(&conn, "Acme", &v1).unwrap();
        let second = append_snapshot(&conn, "Acme", &v2).unwrap();
        append_snapshot(&conn, "Other", &v1).unwrap();

        assert_eq!(first.version, 1);
        assert_eq!(second.version, 2);
        assert_eq!(count_snapshots(&conn, "Acme").unwrap(), 2);

        let latest = latest_snapshot(&conn, "Acme").unwrap().unwrap();
        assert_eq!(latest.id, second.id);

        let history = snapshot_history(&conn, "Acme").unwrap();
        assert_eq!(history.len(), 2);
        assert!(!history.versions()[0].is_current());
        assert_eq!(history.versions()[0].profile.capital_amount, Some(1_000_000.0));

        let changes = SnapshotDiffer::default().diff_latest(&history);
        assert_eq!(changes.len(), 1);
    }

    #[test]
    fn test_assessment_archive() {
        let conn = create_test_db();
        let mut a = FundingAssessment::empty("Acme", 30);
        a.confidence = 72;
        a.has_signal = true;
        insert_assessment(&conn, day(1), &a).unwrap();
        insert_assessment(&conn, day(1), &FundingAssessment::empty("Beta", 30)).unwrap();

        let stored = get_assessments(&conn, "Acme", 10).unwrap();
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].confidence, 72);
        assert!(stored[0].has_signal);

        let by_day = get_assessments_for_day(&conn, day(1)).unwrap();
        assert_eq!(by_day.len(), 2);
        assert_eq!(by_day[0].entity, "Acme");
        assert!(get_assessments_for_day(&conn, day(2)).unwrap().is_empty());
    }

    #[test]
    fn test_change_log() {
        let conn = create_test_db();
        let old = RegistryProfile::new("Acme", "gsxt").with_capital("100万");
        let new = RegistryProfile::new("Acme", "gsxt").with_capital("135万");
        let changes = SnapshotDiffer::default().diff(Some(&old), &new);

        assert_eq!(append_changes(&conn, day(1), "Acme", &changes).unwrap(), 1);
        let records = get_changes_for_day(&conn, day(1)).unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].entity, "Acme");
        assert_eq!(records[0].change.kind, crate::snapshot::ChangeKind::CapitalChange);
    }

    #[test]
    fn test_event_log() {
        let conn = create_test_db();
        let event = Event::new(
            "alias_added",
            "entity",
            "Acme",
            serde_json::json!({"alias": "Acme Health"}),
            "cli",
        );
        insert_event(&conn, &event).unwrap();

        let events = get_events_for_entity(&conn, "entity", "Acme").unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].event_type, "alias_added");
        assert_eq!(events[0].data["alias"], "Acme Health");

        println!("✅ Event log test PASSED");
    }
}
