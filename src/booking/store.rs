//! Booking log — SQLite-backed record of every booking the assistant
//! has made, keyed by a generated booking id (used in confirmation
//! links) and queryable by identity key (attendee email + start time).
//!
//! The calendar remains the system of record for the event itself; this
//! log carries the confirmation state machine and the audit trail.

use std::path::Path;
use std::sync::Mutex;

use chrono_tz::Tz;
use rusqlite::{params, Connection, OptionalExtension};

use super::{BookingRecord, BookingStatus, IdentityKey};
use crate::schedule::parse_instant;

/// SQLite-backed booking log.
pub struct BookingStore {
    conn: Mutex<Connection>,
    tz: Tz,
}

impl BookingStore {
    /// Open (or create) the booking database at `dir/bookings.db`.
    pub fn open(dir: &Path, tz: Tz) -> anyhow::Result<Self> {
        Self::open_path(&dir.join("bookings.db"), tz)
    }

    /// Open a database at an explicit path (useful for tests).
    pub fn open_path(db_path: &Path, tz: Tz) -> anyhow::Result<Self> {
        if let Some(parent) = db_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let conn = Connection::open(db_path)?;
        conn.execute_batch("PRAGMA journal_mode=WAL; PRAGMA synchronous=NORMAL;")?;
        conn.execute_batch(
            "CREATE TABLE IF NOT EXISTS bookings (
                id          TEXT PRIMARY KEY,
                email       TEXT NOT NULL,
                start_time  TEXT NOT NULL,
                event_id    TEXT,
                summary     TEXT NOT NULL DEFAULT '',
                description TEXT NOT NULL DEFAULT '',
                status      TEXT NOT NULL,
                updated_at  TEXT NOT NULL
            );
            CREATE INDEX IF NOT EXISTS bookings_identity
                ON bookings (email, start_time);",
        )?;
        Ok(Self {
            conn: Mutex::new(conn),
            tz,
        })
    }

    /// Insert or replace a booking row.
    pub fn upsert(&self, record: &BookingRecord) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("booking store poisoned");
        conn.execute(
            "INSERT INTO bookings (id, email, start_time, event_id, summary, description, status, updated_at)
             VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8)
             ON CONFLICT(id) DO UPDATE SET
                email = excluded.email,
                start_time = excluded.start_time,
                event_id = excluded.event_id,
                summary = excluded.summary,
                description = excluded.description,
                status = excluded.status,
                updated_at = excluded.updated_at",
            params![
                record.id,
                record.identity.email(),
                record.identity.start_canonical(),
                record.event_id,
                record.summary,
                record.description,
                record.status.as_str(),
                chrono::Utc::now().to_rfc3339(),
            ],
        )?;
        Ok(())
    }

    /// Fetch a booking by its generated id.
    pub fn get(&self, id: &str) -> anyhow::Result<Option<BookingRecord>> {
        let conn = self.conn.lock().expect("booking store poisoned");
        let row = conn
            .query_row(
                "SELECT id, email, start_time, event_id, summary, description, status
                 FROM bookings WHERE id = ?1",
                params![id],
                |row| RawRow::from_row(row),
            )
            .optional()?;
        row.map(|r| r.into_record(self.tz)).transpose()
    }

    /// Fetch the most recent booking matching an identity key.
    pub fn find_by_identity(&self, key: &IdentityKey) -> anyhow::Result<Option<BookingRecord>> {
        let conn = self.conn.lock().expect("booking store poisoned");
        let row = conn
            .query_row(
                "SELECT id, email, start_time, event_id, summary, description, status
                 FROM bookings WHERE email = ?1 AND start_time = ?2
                 ORDER BY updated_at DESC LIMIT 1",
                params![key.email(), key.start_canonical()],
                |row| RawRow::from_row(row),
            )
            .optional()?;
        row.map(|r| r.into_record(self.tz)).transpose()
    }

    /// Update the status of a booking row.
    pub fn set_status(&self, id: &str, status: BookingStatus) -> anyhow::Result<()> {
        let conn = self.conn.lock().expect("booking store poisoned");
        conn.execute(
            "UPDATE bookings SET status = ?2, updated_at = ?3 WHERE id = ?1",
            params![id, status.as_str(), chrono::Utc::now().to_rfc3339()],
        )?;
        Ok(())
    }
}

/// Intermediate row shape — all TEXT, converted after the connection
/// lock is released.
struct RawRow {
    id: String,
    email: String,
    start_time: String,
    event_id: Option<String>,
    summary: String,
    description: String,
    status: String,
}

impl RawRow {
    fn from_row(row: &rusqlite::Row<'_>) -> rusqlite::Result<Self> {
        Ok(Self {
            id: row.get(0)?,
            email: row.get(1)?,
            start_time: row.get(2)?,
            event_id: row.get(3)?,
            summary: row.get(4)?,
            description: row.get(5)?,
            status: row.get(6)?,
        })
    }

    fn into_record(self, tz: Tz) -> anyhow::Result<BookingRecord> {
        let start = parse_instant(&self.start_time, tz)
            .map_err(|e| anyhow::anyhow!("corrupt start_time in booking row: {e}"))?;
        let status = BookingStatus::parse(&self.status)
            .ok_or_else(|| anyhow::anyhow!("corrupt status in booking row: {}", self.status))?;
        Ok(BookingRecord {
            id: self.id,
            identity: IdentityKey::new(&self.email, start),
            event_id: self.event_id,
            summary: self.summary,
            description: self.description,
            status,
        })
    }
}
