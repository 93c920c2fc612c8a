//! Event/Alert/Log store.
//!
//! Backed by `rusqlite` in WAL mode: one writer connection guarded by a
//! `Mutex` so batches serialize internally, and short-lived independent
//! reader connections for windowed queries, which WAL lets proceed without
//! blocking on the writer ("readers and writers may proceed in
//! parallel").

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use rusqlite::{params, Connection};

use crate::error::{Error, ErrorKind, Result};
use crate::model::{Alert, Band, Event, EventType, Log};

const SCHEMA: &str = "
CREATE TABLE IF NOT EXISTS event (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ts INTEGER NOT NULL,
    type TEXT NOT NULL,
    band TEXT NOT NULL,
    chan INTEGER NOT NULL,
    src TEXT,
    dst TEXT,
    bssid TEXT,
    ssid TEXT,
    rssi INTEGER
);
CREATE TABLE IF NOT EXISTS alert (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ts INTEGER NOT NULL,
    severity TEXT NOT NULL,
    kind TEXT NOT NULL,
    summary TEXT NOT NULL,
    acknowledged INTEGER NOT NULL DEFAULT 0
);
CREATE TABLE IF NOT EXISTS log (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    ts INTEGER NOT NULL,
    source TEXT NOT NULL,
    level TEXT NOT NULL,
    message TEXT NOT NULL
);
";

/// Durable event/alert/log store.
pub struct Store {
    path: PathBuf,
    writer: Mutex<Connection>,
}

impl Store {
    /// Opens (creating if absent) the store at `path`: ensures the parent
    /// directory exists and is writable, creates the schema, applies
    /// pending additive migrations, and ensures both query indices.
    ///
    /// Failure at any of these steps is fatal and names `path`.
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::with_message(ErrorKind::StoreOpen(path.display().to_string()), e.to_string()))?;
            }
        }

        let conn = Connection::open(&path)
            .map_err(|e| Error::with_message(ErrorKind::StoreOpen(path.display().to_string()), e.to_string()))?;

        conn.pragma_update(None, "journal_mode", "WAL")
            .map_err(|e| Error::with_message(ErrorKind::StoreOpen(path.display().to_string()), e.to_string()))?;

        conn.execute_batch(SCHEMA)
            .map_err(|e| Error::with_message(ErrorKind::Migration, e.to_string()))?;

        migrate_rsn_columns(&conn)?;
        ensure_indices(&conn)?;

        Ok(Self { path, writer: Mutex::new(conn) })
    }

    /// Bulk-inserts `batch`, all-or-nothing, returning the assigned ids in
    /// the same order as `batch`. Ids are strictly increasing in insertion
    /// order.
    pub fn append_events(&self, batch: &[Event]) -> Result<Vec<i64>> {
        if batch.is_empty() {
            return Ok(Vec::new());
        }
        let mut conn = self.writer.lock().expect("store writer mutex poisoned");
        let tx = conn.transaction()?;
        let mut ids = Vec::with_capacity(batch.len());
        {
            let mut stmt = tx.prepare(
                "INSERT INTO event (ts, type, band, chan, src, dst, bssid, ssid, rssi, rsn_akms, rsn_ciphers)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, ?11)",
            )?;
            for event in batch {
                stmt.execute(params![
                    event.ts,
                    event.r#type.as_str(),
                    event.band.as_str(),
                    event.chan,
                    event.src,
                    event.dst,
                    event.bssid,
                    event.ssid,
                    event.rssi,
                    event.rsn_akms,
                    event.rsn_ciphers,
                ])?;
                ids.push(tx.last_insert_rowid());
            }
        }
        tx.commit()?;
        Ok(ids)
    }

    /// Appends one alert and returns its assigned id.
    pub fn append_alert(&self, alert: &Alert) -> Result<i64> {
        let conn = self.writer.lock().expect("store writer mutex poisoned");
        conn.execute(
            "INSERT INTO alert (ts, severity, kind, summary, acknowledged) VALUES (?1, ?2, ?3, ?4, ?5)",
            params![alert.ts, alert.severity.to_string(), alert.kind.to_string(), alert.summary, alert.acknowledged],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Appends one operational log line and returns its assigned id.
    pub fn append_log(&self, log: &Log) -> Result<i64> {
        let conn = self.writer.lock().expect("store writer mutex poisoned");
        conn.execute(
            "INSERT INTO log (ts, source, level, message) VALUES (?1, ?2, ?3, ?4)",
            params![log.ts, log.source, log.level, log.message],
        )?;
        Ok(conn.last_insert_rowid())
    }

    /// Returns events with `ts >= since_ts`, optionally filtered by type and
    /// exact SSID match, newest first, capped at `limit`.
    pub fn query_events(
        &self,
        since_ts: i64,
        type_filter: Option<EventType>,
        ssid_filter: Option<&str>,
        limit: usize,
    ) -> Result<Vec<Event>> {
        let conn = self.open_reader()?;
        let mut sql = String::from(
            "SELECT id, ts, type, band, chan, src, dst, bssid, ssid, rssi, rsn_akms, rsn_ciphers
             FROM event WHERE ts >= ?1",
        );
        if type_filter.is_some() {
            sql.push_str(" AND type = ?2");
        }
        if ssid_filter.is_some() {
            sql.push_str(if type_filter.is_some() { " AND ssid = ?3" } else { " AND ssid = ?2" });
        }
        let limit = limit.min(i64::MAX as usize);
        sql.push_str(" ORDER BY ts DESC, id DESC LIMIT ");
        sql.push_str(&limit.to_string());

        let mut stmt = conn.prepare(&sql)?;
        let type_str = type_filter.map(|t| t.as_str().to_string());
        let rows = match (&type_str, ssid_filter) {
            (Some(t), Some(s)) => stmt.query_map(params![since_ts, t, s], row_to_event)?,
            (Some(t), None) => stmt.query_map(params![since_ts, t], row_to_event)?,
            (None, Some(s)) => stmt.query_map(params![since_ts, s], row_to_event)?,
            (None, None) => stmt.query_map(params![since_ts], row_to_event)?,
        };

        let mut out = Vec::new();
        for row in rows {
            out.push(row?);
        }
        Ok(out)
    }

    /// Counts `mgmt.deauth` events with `ts >= since_ts`, grouped by `src`,
    /// via the `(type, ts)` index, returning per-source counts and the
    /// total. Used by the deauth detector's windowed tick.
    pub fn count_deauths_by_src(&self, since_ts: i64) -> Result<(BTreeMap<String, i64>, i64)> {
        let conn = self.open_reader()?;
        let mut stmt = conn.prepare(
            "SELECT src, COUNT(*) FROM event
             WHERE type = ?1 AND ts >= ?2 AND src IS NOT NULL
             GROUP BY src",
        )?;
        let mut counts = BTreeMap::new();
        let mut total = 0i64;
        let rows = stmt.query_map(params![EventType::Deauth.as_str(), since_ts], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, i64>(1)?))
        })?;
        for row in rows {
            let (src, count) = row?;
            total += count;
            counts.insert(src, count);
        }
        Ok((counts, total))
    }

    fn open_reader(&self) -> Result<Connection> {
        Connection::open(&self.path)
            .map_err(|e| Error::with_message(ErrorKind::StoreOpen(self.path.display().to_string()), e.to_string()))
    }
}

fn existing_columns(conn: &Connection, table: &str) -> Vec<String> {
    let mut stmt = match conn.prepare(&format!("PRAGMA table_info({table})")) {
        Ok(stmt) => stmt,
        Err(e) => {
            log::warn!("store: failed to introspect {table} table columns: {e}");
            return Vec::new();
        }
    };
    let rows = match stmt.query_map([], |row| row.get::<_, String>(1)) {
        Ok(rows) => rows,
        Err(e) => {
            log::warn!("store: failed to introspect {table} table columns: {e}");
            return Vec::new();
        }
    };
    rows.filter_map(|r| r.ok()).collect()
}

fn migrate_rsn_columns(conn: &Connection) -> Result<()> {
    // Introspection failure is tolerated: the columns are treated as absent
    // and the `ALTER TABLE` below is the only step that can fail fatally.
    let columns = existing_columns(conn, "event");

    if !columns.iter().any(|c| c == "rsn_akms") {
        conn.execute("ALTER TABLE event ADD COLUMN rsn_akms TEXT", [])
            .map_err(|e| Error::with_message(ErrorKind::Migration, e.to_string()))?;
    }
    if !columns.iter().any(|c| c == "rsn_ciphers") {
        conn.execute("ALTER TABLE event ADD COLUMN rsn_ciphers TEXT", [])
            .map_err(|e| Error::with_message(ErrorKind::Migration, e.to_string()))?;
    }
    Ok(())
}

fn ensure_indices(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        "CREATE INDEX IF NOT EXISTS idx_event_ts ON event(ts);
         CREATE INDEX IF NOT EXISTS idx_event_type_ts ON event(type, ts);",
    )
    .map_err(|e| Error::with_message(ErrorKind::Migration, e.to_string()))?;
    Ok(())
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    let type_str: String = row.get(2)?;
    let band_str: String = row.get(3)?;
    Ok(Event {
        id: row.get(0)?,
        ts: row.get(1)?,
        r#type: type_str.parse().unwrap_or(EventType::Beacon),
        band: band_str.parse().unwrap_or(Band::Unknown),
        chan: row.get(4)?,
        src: row.get(5)?,
        dst: row.get(6)?,
        bssid: row.get(7)?,
        ssid: row.get(8)?,
        rssi: row.get(9)?,
        rsn_akms: row.get(10)?,
        rsn_ciphers: row.get(11)?,
    })
}
