//! Take Pool Manager.
//!
//! Owns the team-level counters and the operation that resizes the total
//! pool. Resizing never touches claimed takes: growing the pool dilutes
//! existing members, shrinking it withdraws unclaimed capacity only.

use std::sync::Arc;

use sled::Transactional;
use tracing::info;

use crate::error::{abort, abort_codec, unwrap_txn, TakesError};
use crate::events::{self, AuditEvent};
use crate::metrics::Metrics;
use crate::store::TakesStore;
use crate::team::{PoolSnapshot, Team};

pub struct TakePoolManager {
    store: Arc<TakesStore>,
    metrics: Option<Arc<Metrics>>,
}

impl TakePoolManager {
    pub fn new(store: Arc<TakesStore>) -> Self {
        Self {
            store,
            metrics: None,
        }
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Set the total number of takes for the team.
    ///
    /// The pool is floored at the claimed amount: shrinking below it
    /// withdraws every unclaimed take but leaves claimed takes alone, and a
    /// negative request floors at zero. Returns the total actually set and
    /// refreshes the caller's counters to the persisted values.
    pub fn resize(
        &self,
        team: &mut Team,
        requested_total: i64,
        recorder: &str,
    ) -> Result<u64, TakesError> {
        let lock = self.store.team_lock(&team.id);
        let _guard = lock.lock();

        let team_id = team.id.clone();
        let result = (self.store.teams(), self.store.events()).transaction(
            |(tx_teams, tx_events)| {
                let bytes = tx_teams
                    .get(team_id.as_bytes())?
                    .ok_or_else(|| abort(TakesError::UnknownTeam(team_id.clone())))?;
                let mut rec: Team = serde_json::from_slice(&bytes).map_err(abort_codec)?;

                let old = PoolSnapshot::from(&rec);

                // actual = max(0, claimed, requested)
                let requested = requested_total.max(0) as u64;
                let actual_total = requested.max(rec.claimed_takes);
                rec.total_takes = actual_total;
                rec.unclaimed_takes = actual_total - rec.claimed_takes;

                tx_teams.insert(
                    team_id.as_bytes(),
                    serde_json::to_vec(&rec).map_err(abort_codec)?,
                )?;

                events::append_tx(
                    tx_events,
                    AuditEvent::pool_resized(&team_id, recorder, old, PoolSnapshot::from(&rec)),
                )?;

                Ok(rec)
            },
        );
        let rec = unwrap_txn(result)?;
        self.store.flush()?;

        info!(
            team = %rec.id,
            requested = requested_total,
            total = rec.total_takes,
            unclaimed = rec.unclaimed_takes,
            recorder = %recorder,
            "pool resized"
        );
        if let Some(m) = &self.metrics {
            m.pool_resizes_total.inc();
        }

        *team = rec;
        Ok(team.total_takes)
    }
}
