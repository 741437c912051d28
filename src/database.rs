use anyhow::{Context, Result};
use chrono::{DateTime, Utc};
use rusqlite::{params, Connection};
use std::net::IpAddr;
use std::path::Path;
use std::sync::{Arc, Mutex};

use crate::models::{Event, EventFilter};

/// Schema version written to PRAGMA user_version
const SCHEMA_VERSION: i32 = 1;

/// Thread-safe event store wrapper
#[derive(Clone)]
pub struct Database {
    conn: Arc<Mutex<Connection>>,
}

impl Database {
    /// Open or create the store at the given path
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        // Ensure parent directory exists
        if let Some(parent) = path.as_ref().parent() {
            if !parent.as_os_str().is_empty() {
                std::fs::create_dir_all(parent)?;
            }
        }

        let conn = Connection::open(&path)
            .with_context(|| format!("Failed to open database: {}", path.as_ref().display()))?;

        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };

        db.init_schema()?;
        Ok(db)
    }

    /// Open an in-memory store (for testing)
    pub fn open_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        let db = Self {
            conn: Arc::new(Mutex::new(conn)),
        };
        db.init_schema()?;
        Ok(db)
    }

    /// Versioned schema initialization: creates the schema on a fresh
    /// database, no-ops when current, refuses a newer version.
    fn init_schema(&self) -> Result<()> {
        let conn = self.conn.lock().unwrap();

        let version: i32 = conn.query_row("PRAGMA user_version", [], |row| row.get(0))?;

        if version == SCHEMA_VERSION {
            return Ok(());
        }
        if version > SCHEMA_VERSION {
            anyhow::bail!(
                "Database schema version {} is newer than supported version {}",
                version,
                SCHEMA_VERSION
            );
        }

        conn.execute_batch(
            r#"
            -- Connection events table
            CREATE TABLE IF NOT EXISTS events (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                timestamp TEXT NOT NULL,
                source_address TEXT NOT NULL,
                source_port INTEGER NOT NULL,
                destination_port INTEGER NOT NULL,
                banner TEXT NOT NULL,
                payload TEXT NOT NULL,
                byte_count INTEGER NOT NULL,
                duration REAL NOT NULL,
                location TEXT
            );
            CREATE INDEX IF NOT EXISTS idx_events_timestamp ON events(timestamp);
            CREATE INDEX IF NOT EXISTS idx_events_source ON events(source_address);
            "#,
        )?;

        conn.pragma_update(None, "user_version", SCHEMA_VERSION)?;

        Ok(())
    }

    // ==================== Event Operations ====================

    /// Insert one event, returning its generated id
    pub fn insert_event(&self, event: &Event) -> rusqlite::Result<i64> {
        let conn = self.conn.lock().unwrap();

        conn.execute(
            "INSERT INTO events (timestamp, source_address, source_port, destination_port,
                                 banner, payload, byte_count, duration, location)
             VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?)",
            params![
                event.timestamp.to_rfc3339(),
                event.source_address.to_string(),
                event.source_port,
                event.destination_port,
                event.banner,
                event.payload,
                event.byte_count as i64,
                event.duration_secs,
                event.location,
            ],
        )?;

        Ok(conn.last_insert_rowid())
    }

    /// All events matching the filter, oldest first
    pub fn events(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        let conn = self.conn.lock().unwrap();

        let mut sql = String::from(
            "SELECT id, timestamp, source_address, source_port, destination_port,
                    banner, payload, byte_count, duration, location
             FROM events",
        );

        let mut clauses: Vec<&str> = Vec::new();
        let mut args: Vec<String> = Vec::new();

        if let Some(source) = filter.source {
            clauses.push("source_address = ?");
            args.push(source.to_string());
        }
        if let Some(since) = filter.since {
            clauses.push("timestamp >= ?");
            args.push(since.to_rfc3339());
        }
        if !clauses.is_empty() {
            sql.push_str(" WHERE ");
            sql.push_str(&clauses.join(" AND "));
        }
        sql.push_str(" ORDER BY timestamp ASC, id ASC");

        let mut stmt = conn.prepare(&sql)?;
        let events = stmt
            .query_map(rusqlite::params_from_iter(&args), row_to_event)?
            .collect::<Result<Vec<_>, _>>()?;

        Ok(events)
    }

    /// Total number of stored events
    pub fn count_events(&self) -> Result<u64> {
        let conn = self.conn.lock().unwrap();
        let count: u64 = conn.query_row("SELECT COUNT(*) FROM events", [], |row| row.get(0))?;
        Ok(count)
    }

    // ==================== Location Backfill ====================

    /// Distinct source addresses among events without a usable location
    pub fn addresses_lacking_location(&self) -> Result<Vec<IpAddr>> {
        let conn = self.conn.lock().unwrap();

        let mut stmt = conn.prepare(
            "SELECT DISTINCT source_address FROM events
             WHERE location IS NULL OR location = '' OR location = 'Unknown'
             ORDER BY source_address",
        )?;

        let addrs = stmt
            .query_map([], |row| row.get::<_, String>(0))?
            .filter_map(|r| r.ok())
            .filter_map(|s| s.parse().ok())
            .collect();

        Ok(addrs)
    }

    /// Fill in the location for all of an address's events lacking one
    pub fn update_location(&self, addr: &IpAddr, location: &str) -> Result<usize> {
        let conn = self.conn.lock().unwrap();

        let rows = conn.execute(
            "UPDATE events SET location = ?
             WHERE source_address = ?
               AND (location IS NULL OR location = '' OR location = 'Unknown')",
            params![location, addr.to_string()],
        )?;

        Ok(rows)
    }
}

fn row_to_event(row: &rusqlite::Row<'_>) -> rusqlite::Result<Event> {
    Ok(Event {
        id: Some(row.get(0)?),
        timestamp: DateTime::parse_from_rfc3339(&row.get::<_, String>(1)?)
            .unwrap()
            .with_timezone(&Utc),
        source_address: row.get::<_, String>(2)?.parse().unwrap(),
        source_port: row.get(3)?,
        destination_port: row.get(4)?,
        banner: row.get(5)?,
        payload: row.get(6)?,
        byte_count: row.get::<_, i64>(7)? as u64,
        duration_secs: row.get(8)?,
        location: row.get(9)?,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    fn event_at(ip: &str, port: u16, secs: i64, location: Option<&str>) -> Event {
        Event {
            id: None,
            timestamp: Utc.timestamp_opt(1_700_000_000 + secs, 0).unwrap(),
            source_address: ip.parse().unwrap(),
            source_port: 40000,
            destination_port: port,
            banner: "220 FTP Server Ready".to_string(),
            payload: String::new(),
            byte_count: 0,
            duration_secs: 0.5,
            location: location.map(|s| s.to_string()),
        }
    }

    #[test]
    fn test_insert_and_ordered_query() {
        let db = Database::open_memory().unwrap();

        // Inserted out of chronological order
        let id1 = db.insert_event(&event_at("1.1.1.1", 2222, 30, None)).unwrap();
        let id2 = db.insert_event(&event_at("1.1.1.1", 2121, 10, None)).unwrap();
        assert!(id2 > id1);

        let events = db.events(&EventFilter::default()).unwrap();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].destination_port, 2121);
        assert_eq!(events[1].destination_port, 2222);
        assert!(events[0].id.is_some());
    }

    #[test]
    fn test_query_filters() {
        let db = Database::open_memory().unwrap();
        db.insert_event(&event_at("1.1.1.1", 2222, 0, None)).unwrap();
        db.insert_event(&event_at("2.2.2.2", 2121, 20, None)).unwrap();
        db.insert_event(&event_at("2.2.2.2", 2323, 40, None)).unwrap();

        let filter = EventFilter {
            source: Some("2.2.2.2".parse().unwrap()),
            since: None,
        };
        assert_eq!(db.events(&filter).unwrap().len(), 2);

        let filter = EventFilter {
            source: Some("2.2.2.2".parse().unwrap()),
            since: Some(Utc.timestamp_opt(1_700_000_000 + 30, 0).unwrap()),
        };
        let events = db.events(&filter).unwrap();
        assert_eq!(events.len(), 1);
        assert_eq!(events[0].destination_port, 2323);
    }

    #[test]
    fn test_location_backfill() {
        let db = Database::open_memory().unwrap();
        db.insert_event(&event_at("9.9.9.9", 2222, 0, None)).unwrap();
        db.insert_event(&event_at("9.9.9.9", 2121, 5, Some("Unknown"))).unwrap();
        db.insert_event(&event_at("8.8.8.8", 2222, 10, Some("Mountain View, California, United States")))
            .unwrap();

        let lacking = db.addresses_lacking_location().unwrap();
        assert_eq!(lacking, vec!["9.9.9.9".parse::<IpAddr>().unwrap()]);

        let updated = db
            .update_location(&"9.9.9.9".parse().unwrap(), "Berlin, Berlin, Germany")
            .unwrap();
        assert_eq!(updated, 2);

        assert!(db.addresses_lacking_location().unwrap().is_empty());
        let events = db.events(&EventFilter::default()).unwrap();
        assert!(events
            .iter()
            .filter(|e| e.source_address.to_string() == "9.9.9.9")
            .all(|e| e.location.as_deref() == Some("Berlin, Berlin, Germany")));
    }

    #[test]
    fn test_reopen_is_idempotent() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");

        {
            let db = Database::open(&path).unwrap();
            db.insert_event(&event_at("1.1.1.1", 2222, 0, None)).unwrap();
        }

        let db = Database::open(&path).unwrap();
        assert_eq!(db.count_events().unwrap(), 1);
    }

    #[test]
    fn test_newer_schema_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("events.db");

        {
            let conn = Connection::open(&path).unwrap();
            conn.pragma_update(None, "user_version", 99).unwrap();
        }

        assert!(Database::open(&path).is_err());
    }
}
