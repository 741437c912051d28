use anyhow::Result;
use thiserror::Error;

use crate::config::Config;
use crate::database::Database;
use crate::journal::Journal;
use crate::models::{Event, EventFilter};

/// Failure of one sink target
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("journal append failed: {0}")]
    Journal(#[from] std::io::Error),

    #[error("store insert failed: {0}")]
    Store(#[from] rusqlite::Error),
}

/// Per-target result of one append
#[derive(Debug)]
pub struct AppendOutcome {
    pub journal: Result<(), SinkError>,
    pub store: Result<(), SinkError>,
}

impl AppendOutcome {
    pub fn is_complete(&self) -> bool {
        self.journal.is_ok() && self.store.is_ok()
    }
}

/// Durable event sink: append-only journal plus queryable store.
///
/// Opening either target is fatal; per-record failures afterwards are
/// reported through [`AppendOutcome`] and never raised.
pub struct EventSink {
    journal: Journal,
    db: Database,
}

impl EventSink {
    /// Open both sink targets
    pub fn open(config: &Config) -> Result<Self> {
        let journal = Journal::open(config.journal_path())?;
        let db = Database::open(config.db_path())?;
        Ok(Self { journal, db })
    }

    /// Record one event in both targets.
    ///
    /// The targets are independent: a failure in one never stops the
    /// other from being attempted.
    pub fn append(&self, event: &Event) -> AppendOutcome {
        let journal = self.journal.append(event).map_err(SinkError::from);
        let store = self
            .db
            .insert_event(event)
            .map(|_| ())
            .map_err(SinkError::from);

        AppendOutcome { journal, store }
    }

    /// Events from the structured store, oldest first
    pub fn query(&self, filter: &EventFilter) -> Result<Vec<Event>> {
        self.db.events(filter)
    }

    pub fn journal(&self) -> &Journal {
        &self.journal
    }

    pub fn database(&self) -> &Database {
        &self.db
    }
}
