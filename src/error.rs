//! Error taxonomy for take pool accounting.
//!
//! Eligibility and no-room failures are expected, caller-surfaced outcomes.
//! Storage and codec failures abort the enclosing transaction.

use thiserror::Error;

/// Why a member may not hold a nonzero take.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EligibilityReason {
    /// Member has not completed signup.
    Unclaimed,
    /// Member is flagged suspicious.
    Suspicious,
    /// Member has no verified email address.
    MissingEmail,
    /// Member has no verified identity.
    MissingIdentity,
    /// Member has no registered payout route.
    MissingPayoutRoute,
}

impl EligibilityReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            EligibilityReason::Unclaimed => "unclaimed",
            EligibilityReason::Suspicious => "suspicious",
            EligibilityReason::MissingEmail => "missing an email",
            EligibilityReason::MissingIdentity => "missing an identity",
            EligibilityReason::MissingPayoutRoute => "missing a payout route",
        }
    }
}

impl std::fmt::Display for EligibilityReason {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Error)]
pub enum TakesError {
    #[error("member {member} is not eligible: {reason}")]
    IneligibleMember {
        member: String,
        reason: EligibilityReason,
    },

    #[error("team {team} has no unclaimed takes")]
    NoRoom { team: String },

    #[error("unknown team {0}")]
    UnknownTeam(String),

    #[error("storage error: {0}")]
    Storage(#[from] sled::Error),

    #[error("record codec error: {0}")]
    Codec(#[from] serde_json::Error),

    #[error("event codec error: {0}")]
    Encoding(#[from] bincode::Error),
}

impl TakesError {
    pub(crate) fn ineligible(member: &str, reason: EligibilityReason) -> Self {
        TakesError::IneligibleMember {
            member: member.to_string(),
            reason,
        }
    }
}

/// Abort the enclosing sled transaction with a domain error.
pub(crate) fn abort(
    err: TakesError,
) -> sled::transaction::ConflictableTransactionError<TakesError> {
    sled::transaction::ConflictableTransactionError::Abort(err)
}

/// Abort the enclosing sled transaction on a record codec failure.
pub(crate) fn abort_codec(
    err: serde_json::Error,
) -> sled::transaction::ConflictableTransactionError<TakesError> {
    abort(TakesError::Codec(err))
}

/// Collapse a sled transaction result into a `TakesError`.
pub(crate) fn unwrap_txn<T>(
    result: Result<T, sled::transaction::TransactionError<TakesError>>,
) -> Result<T, TakesError> {
    result.map_err(|e| match e {
        sled::transaction::TransactionError::Abort(inner) => inner,
        sled::transaction::TransactionError::Storage(inner) => TakesError::Storage(inner),
    })
}
