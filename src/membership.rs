//! Membership convenience layer.
//!
//! Adding a member claims a single take; removing claims zero. Everything
//! here is expressed in terms of the assignment ledger, so the pool
//! counters stay consistent without any bookkeeping of its own.

use std::collections::HashSet;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::TakesError;
use crate::ledger::{TakeAssignmentLedger, TakeRecord};
use crate::participant::MemberProfile;
use crate::store::TakesStore;
use crate::team::Team;

/// One entry of `list_members`: a member's current holding.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberTake {
    pub member_id: String,
    pub amount: u64,
    pub mtime: DateTime<Utc>,
}

pub struct TeamMembership {
    store: Arc<TakesStore>,
    ledger: Arc<TakeAssignmentLedger>,
}

impl TeamMembership {
    pub fn new(store: Arc<TakesStore>, ledger: Arc<TakeAssignmentLedger>) -> Self {
        Self { store, ledger }
    }

    /// Add the member with a single take. Fails with a no-room error when
    /// the pool has no unclaimed capacity left.
    pub fn add(&self, team: &mut Team, member: &MemberProfile) -> Result<(), TakesError> {
        let assigned = self.ledger.assign(team, member, 1, None)?;
        if assigned == 0 {
            return Err(TakesError::NoRoom {
                team: team.id.clone(),
            });
        }
        Ok(())
    }

    /// Remove the member entirely, releasing their takes back to the pool.
    pub fn remove(&self, team: &mut Team, member: &MemberProfile) -> Result<(), TakesError> {
        self.ledger.assign(team, member, 0, None)?;
        Ok(())
    }

    /// Current members and their holdings, most recently changed first.
    /// Only the latest row per member counts, and only positive amounts.
    pub fn list_members(&self, team: &Team) -> Result<Vec<MemberTake>, TakesError> {
        let mut seen: HashSet<String> = HashSet::new();
        let mut out = Vec::new();

        for item in self
            .store
            .takes()
            .scan_prefix(TakesStore::row_prefix(&team.id).as_bytes())
            .rev()
        {
            let (_, value) = item?;
            let row: TakeRecord = serde_json::from_slice(&value)?;
            if !seen.insert(row.member_id.clone()) {
                continue; // older row for a member we already have
            }
            if row.amount > 0 {
                out.push(MemberTake {
                    member_id: row.member_id,
                    amount: row.amount,
                    mtime: row.mtime,
                });
            }
        }

        Ok(out)
    }

    pub fn member_count(&self, team: &Team) -> Result<usize, TakesError> {
        Ok(self.list_members(team)?.len())
    }
}
