//! Sled-backed persistence for team counters and the take ledger.
//!
//! Storage layout:
//!   Tree: "teams"
//!     Key: team id, value: serde_json `Team`
//!   Tree: "takes"
//!     Key: "row:{team}:{seq:020}", value: serde_json `TakeRecord`
//!     Key: "latest:{team}:{member}", value: u64 be (seq)
//!     Key: "seq:{team}", value: u64 be (last allocated seq)
//!   Tree: "events"
//!     Key: "{ts_ns:020}-{counter:06}", value: bincode `AuditEvent`
//!
//! Row keys zero-pad the sequence so lexicographic order is recency order;
//! the latest index points each (team, member) pair at its authoritative row.

use std::collections::HashMap;
use std::path::Path;
use std::sync::Arc;

use parking_lot::Mutex;
use sled::{Db, Tree};
use tracing::info;

use crate::error::TakesError;
use crate::team::Team;

const TEAMS_TREE: &str = "teams";
const TAKES_TREE: &str = "takes";
const EVENTS_TREE: &str = "events";

pub struct TakesStore {
    db: Db,
    teams: Tree,
    takes: Tree,
    events: Tree,
    // One lock per team; a mutating operation holds it for its whole duration
    // so concurrent calls on the same team serialize.
    team_locks: Mutex<HashMap<String, Arc<Mutex<()>>>>,
}

impl TakesStore {
    /// Open (or create) a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, TakesError> {
        let db = sled::open(path)?;
        Self::from_db(db)
    }

    /// Wrap an already-open sled database.
    pub fn from_db(db: Db) -> Result<Self, TakesError> {
        let teams = db.open_tree(TEAMS_TREE)?;
        let takes = db.open_tree(TAKES_TREE)?;
        let events = db.open_tree(EVENTS_TREE)?;
        Ok(Self {
            db,
            teams,
            takes,
            events,
            team_locks: Mutex::new(HashMap::new()),
        })
    }

    /// In-memory store for tests.
    pub fn temporary() -> Result<Self, TakesError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    /// Create the team's counter record if it does not exist yet. Returns
    /// the stored record either way.
    pub fn create_team(&self, id: &str) -> Result<Team, TakesError> {
        if let Some(existing) = self.load_team(id)? {
            return Ok(existing);
        }
        let team = Team::new(id);
        self.teams
            .insert(id.as_bytes(), serde_json::to_vec(&team)?)?;
        self.teams.flush()?;
        info!(team = %id, "created take pool");
        Ok(team)
    }

    pub fn load_team(&self, id: &str) -> Result<Option<Team>, TakesError> {
        match self.teams.get(id.as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    pub fn flush(&self) -> Result<(), TakesError> {
        self.db.flush()?;
        Ok(())
    }

    pub(crate) fn teams(&self) -> &Tree {
        &self.teams
    }

    pub(crate) fn takes(&self) -> &Tree {
        &self.takes
    }

    pub(crate) fn events(&self) -> &Tree {
        &self.events
    }

    pub(crate) fn team_lock(&self, team_id: &str) -> Arc<Mutex<()>> {
        let mut locks = self.team_locks.lock();
        locks
            .entry(team_id.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .clone()
    }

    pub(crate) fn row_key(team_id: &str, seq: u64) -> String {
        format!("row:{}:{:020}", team_id, seq)
    }

    pub(crate) fn row_prefix(team_id: &str) -> String {
        format!("row:{}:", team_id)
    }

    pub(crate) fn latest_key(team_id: &str, member_id: &str) -> String {
        format!("latest:{}:{}", team_id, member_id)
    }

    pub(crate) fn seq_key(team_id: &str) -> String {
        format!("seq:{}", team_id)
    }
}

pub(crate) fn decode_u64(bytes: &[u8]) -> u64 {
    let mut buf = [0u8; 8];
    let take = bytes.len().min(8);
    buf[..take].copy_from_slice(&bytes[..take]);
    u64::from_be_bytes(buf)
}
