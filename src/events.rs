//! Audit event sink.
//!
//! Pool-changing operations append an event describing what changed and who
//! recorded it. Events ride inside the caller's transaction so an aborted
//! operation leaves no audit trace.

use std::time::{SystemTime, UNIX_EPOCH};

use serde::{Deserialize, Serialize};
use sled::transaction::{ConflictableTransactionError, TransactionalTree};
use tracing::warn;

use crate::error::TakesError;
use crate::store::TakesStore;
use crate::team::PoolSnapshot;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AuditEvent {
    pub id: String, // monotonically-ordered key (ts_ns-counter)
    pub ts_ms: u64,
    pub entity_kind: String, // "team"
    pub entity_id: String,
    pub action: String, // "outstanding takes changed"
    pub recorder_id: String,
    pub old: PoolSnapshot,
    pub new: PoolSnapshot,
}

impl AuditEvent {
    pub fn pool_resized(
        team_id: &str,
        recorder_id: &str,
        old: PoolSnapshot,
        new: PoolSnapshot,
    ) -> Self {
        Self {
            id: String::new(),
            ts_ms: 0,
            entity_kind: "team".to_string(),
            entity_id: team_id.to_string(),
            action: "outstanding takes changed".to_string(),
            recorder_id: recorder_id.to_string(),
            old,
            new,
        }
    }
}

/// Append an event within an open transaction. The key is assigned here;
/// ts_ms is stamped if the caller left it zero.
pub(crate) fn append_tx(
    tree: &TransactionalTree,
    mut event: AuditEvent,
) -> Result<String, ConflictableTransactionError<TakesError>> {
    // Monotonic-ish key: ts_ns + small counter component
    static COUNTER: std::sync::atomic::AtomicU64 = std::sync::atomic::AtomicU64::new(0);
    let c = COUNTER.fetch_add(1, std::sync::atomic::Ordering::Relaxed);
    let key = format!("{:020}-{:06}", now_ns(), c % 1_000_000);

    event.id = key.clone();
    if event.ts_ms == 0 {
        event.ts_ms = now_ms();
    }

    let bytes = bincode::serialize(&event)
        .map_err(|e| ConflictableTransactionError::Abort(TakesError::Encoding(e)))?;
    tree.insert(key.as_bytes(), bytes)?;
    Ok(key)
}

/// Newest events first, up to `limit`. Undecodable values are skipped with
/// a warning rather than failing the whole read.
pub fn recent(store: &TakesStore, limit: usize) -> Result<Vec<AuditEvent>, TakesError> {
    let mut out = Vec::with_capacity(limit.min(64));
    for item in store.events().iter().rev() {
        if out.len() >= limit {
            break;
        }
        let (key, value) = item?;
        match bincode::deserialize::<AuditEvent>(&value) {
            Ok(event) => out.push(event),
            Err(e) => {
                warn!(key = %String::from_utf8_lossy(&key), "skipping undecodable audit event: {e}");
            }
        }
    }
    Ok(out)
}

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_millis() as u64
}

fn now_ns() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default()
        .as_nanos() as u64
}
