//! Team take pool counters.
//!
//! A team issues a fixed pool of takes. Takes determine how distributed
//! funds are split between members; they confer no legal ownership. The
//! three counters always satisfy `total = claimed + unclaimed`.

use serde::{Deserialize, Serialize};

/// Team-level take pool state. The persisted record in the `teams` tree is
/// authoritative; managers refresh the caller's copy after each mutation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Team {
    /// Team identity
    pub id: String,

    /// Total number of takes issued for this team
    pub total_takes: u64,

    /// Takes currently claimed by members
    pub claimed_takes: u64,

    /// Takes still available for claiming
    pub unclaimed_takes: u64,

    /// Distinct members holding a nonzero take
    pub members_count: u64,
}

impl Team {
    /// Fresh team with an empty pool.
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            total_takes: 0,
            claimed_takes: 0,
            unclaimed_takes: 0,
            members_count: 0,
        }
    }

    /// `total = claimed + unclaimed` must hold in every observed state.
    pub fn counters_consistent(&self) -> bool {
        self.total_takes == self.claimed_takes + self.unclaimed_takes
    }
}

/// Pool counter snapshot carried by audit events.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PoolSnapshot {
    pub total_takes: u64,
    pub unclaimed_takes: u64,
}

impl From<&Team> for PoolSnapshot {
    fn from(team: &Team) -> Self {
        Self {
            total_takes: team.total_takes,
            unclaimed_takes: team.unclaimed_takes,
        }
    }
}
