//! Member eligibility snapshots and the taking-recompute collaborator.
//!
//! The participant registry lives outside this crate. Callers pass a
//! read-only snapshot of the member's standing with each operation; the
//! snapshot is never persisted here.

use serde::{Deserialize, Serialize};

/// Eligibility snapshot for one member, as reported by the participant
/// registry at the moment of the call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemberProfile {
    /// Member identity
    pub id: String,

    /// Member has completed signup
    pub is_claimed: bool,

    /// Member is flagged suspicious
    pub is_suspicious: bool,

    /// Verified email address, if any
    pub email_address: Option<String>,

    /// Member has a verified identity
    pub has_verified_identity: bool,

    /// Member has a registered payout route
    pub has_payout_route: bool,
}

impl MemberProfile {
    /// Snapshot for a member in good standing. Tests and hosts adjust the
    /// flags from here.
    pub fn in_good_standing(id: impl Into<String>, email: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            is_claimed: true,
            is_suspicious: false,
            email_address: Some(email.into()),
            has_verified_identity: true,
            has_payout_route: true,
        }
    }
}

/// Notified once per successful assignment so the registry can recompute
/// the member's taking aggregates from the updated ledger.
pub trait TakingObserver: Send + Sync {
    fn takes_changed(&self, team_id: &str, member_id: &str);
}

/// Observer that does nothing. Hosts that do not track taking aggregates
/// can leave the ledger unconfigured.
#[derive(Debug, Default)]
pub struct NullTakingObserver;

impl TakingObserver for NullTakingObserver {
    fn takes_changed(&self, _team_id: &str, _member_id: &str) {}
}
