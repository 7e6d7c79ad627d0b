//! Take Assignment Ledger.
//!
//! Per-member take records are append-only: every change writes a new row
//! and the latest row per (team, member) pair is authoritative. The assign
//! operation keeps the team's three counters consistent with the rows,
//! gated by the member's eligibility snapshot.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sled::Transactional;
use tracing::debug;

use crate::error::{abort, abort_codec, unwrap_txn, EligibilityReason, TakesError};
use crate::metrics::Metrics;
use crate::participant::{MemberProfile, TakingObserver};
use crate::store::{decode_u64, TakesStore};
use crate::team::Team;

/// One ledger row. Immutable once written; `ctime` is carried forward from
/// the member's first row, only `mtime` advances.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TakeRecord {
    /// Per-team monotonic sequence number
    pub seq: u64,
    pub team_id: String,
    pub member_id: String,
    /// Takes held after this change
    pub amount: u64,
    /// Identity credited with the change
    pub recorder_id: String,
    pub ctime: DateTime<Utc>,
    pub mtime: DateTime<Utc>,
}

pub struct TakeAssignmentLedger {
    store: Arc<TakesStore>,
    observer: Option<Arc<dyn TakingObserver>>,
    metrics: Option<Arc<Metrics>>,
}

impl TakeAssignmentLedger {
    pub fn new(store: Arc<TakesStore>) -> Self {
        Self {
            store,
            observer: None,
            metrics: None,
        }
    }

    /// Collaborator to notify after each assignment so the member's taking
    /// aggregates get recomputed from the updated ledger.
    pub fn with_observer(mut self, observer: Arc<dyn TakingObserver>) -> Self {
        self.observer = Some(observer);
        self
    }

    pub fn with_metrics(mut self, metrics: Arc<Metrics>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Set the member's claimed takes to `requested`, or as many as the
    /// pool's unclaimed capacity allows.
    ///
    /// The member's prior holding is released back to the pool before the
    /// clamp, so reclaiming the same or a smaller amount always succeeds in
    /// full. A zero request removes the member entirely and bypasses every
    /// eligibility check except claimed status. `recorder` defaults to the
    /// member. Returns the amount actually assigned.
    pub fn assign(
        &self,
        team: &mut Team,
        member: &MemberProfile,
        requested: u64,
        recorder: Option<&str>,
    ) -> Result<u64, TakesError> {
        if let Err(e) = check_eligibility(member, requested) {
            if let Some(m) = &self.metrics {
                m.eligibility_rejections_total.inc();
            }
            return Err(e);
        }
        let recorder_id = recorder.unwrap_or(&member.id).to_string();

        let lock = self.store.team_lock(&team.id);
        let _guard = lock.lock();

        let now = Utc::now();
        let team_id = team.id.clone();
        let member_id = member.id.clone();

        let result = (self.store.teams(), self.store.takes()).transaction(
            |(tx_teams, tx_takes)| {
                let bytes = tx_teams
                    .get(team_id.as_bytes())?
                    .ok_or_else(|| abort(TakesError::UnknownTeam(team_id.clone())))?;
                let mut rec: Team = serde_json::from_slice(&bytes).map_err(abort_codec)?;

                let latest_key = TakesStore::latest_key(&team_id, &member_id);
                let prior: Option<TakeRecord> = match tx_takes.get(latest_key.as_bytes())? {
                    Some(seq_bytes) => {
                        let row_key = TakesStore::row_key(&team_id, decode_u64(&seq_bytes));
                        match tx_takes.get(row_key.as_bytes())? {
                            Some(row) => Some(serde_json::from_slice(&row).map_err(abort_codec)?),
                            None => None,
                        }
                    }
                    None => None,
                };
                let previous_amount = prior.as_ref().map(|r| r.amount).unwrap_or(0);

                // Release the prior holding before clamping; a member whose
                // current take is zero counts as newly distributed-to here
                // and the zero branch below nets that back out.
                let mut claimed = rec.claimed_takes;
                let mut unclaimed = rec.unclaimed_takes;
                let mut members = rec.members_count;
                if previous_amount > 0 {
                    claimed = claimed.saturating_sub(previous_amount);
                    unclaimed = unclaimed.saturating_add(previous_amount);
                } else {
                    members += 1;
                }

                let actual = requested.min(unclaimed);
                if actual > 0 {
                    unclaimed -= actual;
                    claimed += actual;
                } else {
                    members = members.saturating_sub(1);
                }

                rec.claimed_takes = claimed;
                rec.unclaimed_takes = unclaimed;
                rec.members_count = members;
                tx_teams.insert(
                    team_id.as_bytes(),
                    serde_json::to_vec(&rec).map_err(abort_codec)?,
                )?;

                let seq_key = TakesStore::seq_key(&team_id);
                let seq = tx_takes
                    .get(seq_key.as_bytes())?
                    .map(|b| decode_u64(&b))
                    .unwrap_or(0)
                    + 1;
                tx_takes.insert(seq_key.as_bytes(), &seq.to_be_bytes()[..])?;

                let row = TakeRecord {
                    seq,
                    team_id: team_id.clone(),
                    member_id: member_id.clone(),
                    amount: actual,
                    recorder_id: recorder_id.clone(),
                    ctime: prior.as_ref().map(|r| r.ctime).unwrap_or(now),
                    mtime: now,
                };
                tx_takes.insert(
                    TakesStore::row_key(&team_id, seq).as_bytes(),
                    serde_json::to_vec(&row).map_err(abort_codec)?,
                )?;
                tx_takes.insert(latest_key.as_bytes(), &seq.to_be_bytes()[..])?;

                Ok((rec, actual))
            },
        );
        let (rec, actual) = unwrap_txn(result)?;
        self.store.flush()?;

        debug!(
            team = %rec.id,
            member = %member.id,
            requested,
            actual,
            recorder = %recorder_id,
            "take assigned"
        );
        if let Some(m) = &self.metrics {
            m.takes_assigned_total.inc();
        }
        if let Some(obs) = &self.observer {
            obs.takes_changed(&rec.id, &member.id);
        }

        *team = rec;
        Ok(actual)
    }

    /// The authoritative row for a member, if one exists.
    pub fn latest(&self, team_id: &str, member_id: &str) -> Result<Option<TakeRecord>, TakesError> {
        let takes = self.store.takes();
        let seq_bytes = match takes.get(TakesStore::latest_key(team_id, member_id).as_bytes())? {
            Some(b) => b,
            None => return Ok(None),
        };
        match takes.get(TakesStore::row_key(team_id, decode_u64(&seq_bytes)).as_bytes())? {
            Some(bytes) => Ok(Some(serde_json::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Every row ever written for a member in this team, newest first.
    pub fn history(&self, team_id: &str, member_id: &str) -> Result<Vec<TakeRecord>, TakesError> {
        let mut out = Vec::new();
        for item in self
            .store
            .takes()
            .scan_prefix(TakesStore::row_prefix(team_id).as_bytes())
            .rev()
        {
            let (_, value) = item?;
            let row: TakeRecord = serde_json::from_slice(&value)?;
            if row.member_id == member_id {
                out.push(row);
            }
        }
        Ok(out)
    }
}

fn check_eligibility(member: &MemberProfile, requested: u64) -> Result<(), TakesError> {
    if !member.is_claimed {
        return Err(TakesError::ineligible(
            &member.id,
            EligibilityReason::Unclaimed,
        ));
    }
    if requested == 0 {
        // Removal works regardless of standing.
        return Ok(());
    }
    if member.is_suspicious {
        return Err(TakesError::ineligible(
            &member.id,
            EligibilityReason::Suspicious,
        ));
    }
    if member.email_address.is_none() {
        return Err(TakesError::ineligible(
            &member.id,
            EligibilityReason::MissingEmail,
        ));
    }
    if !member.has_verified_identity {
        return Err(TakesError::ineligible(
            &member.id,
            EligibilityReason::MissingIdentity,
        ));
    }
    if !member.has_payout_route {
        return Err(TakesError::ineligible(
            &member.id,
            EligibilityReason::MissingPayoutRoute,
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pool::TakePoolManager;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct Harness {
        store: Arc<TakesStore>,
        ledger: TakeAssignmentLedger,
        team: Team,
        crusher: MemberProfile,
        bruiser: MemberProfile,
    }

    fn harness() -> Harness {
        harness_with_pool(1000)
    }

    fn harness_with_pool(total: i64) -> Harness {
        let store = Arc::new(TakesStore::temporary().unwrap());
        let mut team = store.create_team("enterprise").unwrap();
        TakePoolManager::new(store.clone())
            .resize(&mut team, total, "picard")
            .unwrap();
        Harness {
            ledger: TakeAssignmentLedger::new(store.clone()),
            store,
            team,
            crusher: MemberProfile::in_good_standing("crusher", "crusher@example.com"),
            bruiser: MemberProfile::in_good_standing("bruiser", "bruiser@example.com"),
        }
    }

    #[test]
    fn test_assign_sets_takes() {
        let mut h = harness();
        assert_eq!(
            h.ledger.assign(&mut h.team, &h.crusher, 537, None).unwrap(),
            537
        );
    }

    #[test]
    fn test_assign_actually_writes_the_row() {
        let mut h = harness();
        h.ledger.assign(&mut h.team, &h.crusher, 537, None).unwrap();

        let row = h.ledger.latest("enterprise", "crusher").unwrap().unwrap();
        assert_eq!(row.amount, 537);
        assert_eq!(row.team_id, "enterprise");
        assert_eq!(row.member_id, "crusher");
    }

    #[test]
    fn test_assign_takes_as_much_as_is_available() {
        let mut h = harness();
        assert_eq!(
            h.ledger
                .assign(&mut h.team, &h.crusher, 1000, None)
                .unwrap(),
            1000
        );
    }

    #[test]
    fn test_assign_caps_to_the_number_available() {
        let mut h = harness();
        assert_eq!(
            h.ledger
                .assign(&mut h.team, &h.crusher, 1024, None)
                .unwrap(),
            1000
        );
        assert_eq!(h.team.claimed_takes, 1000);
        assert_eq!(h.team.unclaimed_takes, 0);
        assert!(h.team.counters_consistent());
    }

    #[test]
    fn test_assign_with_another_member_present() {
        let mut h = harness();
        assert_eq!(
            h.ledger.assign(&mut h.team, &h.bruiser, 537, None).unwrap(),
            537
        );
        assert_eq!(
            h.ledger.assign(&mut h.team, &h.crusher, 537, None).unwrap(),
            463
        );
        assert_eq!(h.team.total_takes, 1000);
        assert_eq!(h.team.claimed_takes, 1000);
        assert_eq!(h.team.unclaimed_takes, 0);
    }

    #[test]
    fn test_assign_updates_counters_as_expected() {
        let mut h = harness();
        h.ledger.assign(&mut h.team, &h.bruiser, 537, None).unwrap();
        h.ledger.assign(&mut h.team, &h.crusher, 128, None).unwrap();
        assert_eq!(h.team.members_count, 2);
        assert_eq!(h.team.claimed_takes, 665);
        assert_eq!(h.team.unclaimed_takes, 335);
    }

    #[test]
    fn test_assign_readjusts_an_existing_member() {
        let mut h = harness();
        assert_eq!(
            h.ledger.assign(&mut h.team, &h.crusher, 537, None).unwrap(),
            537
        );
        assert_eq!(
            h.ledger.assign(&mut h.team, &h.bruiser, 537, None).unwrap(),
            463
        );
        assert_eq!(
            h.ledger.assign(&mut h.team, &h.crusher, 128, None).unwrap(),
            128
        );
        assert_eq!(h.team.members_count, 2);
        assert_eq!(h.team.claimed_takes, 463 + 128);
        assert_eq!(h.team.unclaimed_takes, 1000 - 591);
    }

    #[test]
    fn test_assign_same_amount_twice_is_a_pool_noop() {
        let mut h = harness();
        h.ledger.assign(&mut h.team, &h.crusher, 300, None).unwrap();
        let before = h.team.clone();

        assert_eq!(
            h.ledger.assign(&mut h.team, &h.crusher, 300, None).unwrap(),
            300
        );
        assert_eq!(h.team.claimed_takes, before.claimed_takes);
        assert_eq!(h.team.unclaimed_takes, before.unclaimed_takes);
        assert_eq!(h.team.members_count, before.members_count);
    }

    #[test]
    fn test_assign_records_the_member_as_recorder() {
        let mut h = harness();
        h.ledger.assign(&mut h.team, &h.crusher, 537, None).unwrap();
        let row = h.ledger.latest("enterprise", "crusher").unwrap().unwrap();
        assert_eq!(row.recorder_id, "crusher");
    }

    #[test]
    fn test_assign_lets_someone_else_be_the_recorder() {
        let mut h = harness();
        h.ledger
            .assign(&mut h.team, &h.crusher, 537, Some("picard"))
            .unwrap();
        let row = h.ledger.latest("enterprise", "crusher").unwrap().unwrap();
        assert_eq!(row.recorder_id, "picard");
    }

    #[test]
    fn test_assign_preserves_ctime_across_changes() {
        let mut h = harness();
        h.ledger.assign(&mut h.team, &h.crusher, 537, None).unwrap();
        let first = h.ledger.latest("enterprise", "crusher").unwrap().unwrap();

        h.ledger.assign(&mut h.team, &h.crusher, 128, None).unwrap();
        let second = h.ledger.latest("enterprise", "crusher").unwrap().unwrap();

        assert_eq!(second.amount, 128);
        assert_eq!(second.ctime, first.ctime);
        assert!(second.mtime >= first.mtime);
        assert!(second.seq > first.seq);
    }

    #[test]
    fn test_assign_keeps_full_history() {
        let mut h = harness();
        h.ledger.assign(&mut h.team, &h.crusher, 537, None).unwrap();
        h.ledger.assign(&mut h.team, &h.crusher, 128, None).unwrap();
        h.ledger.assign(&mut h.team, &h.crusher, 0, None).unwrap();

        let history = h.ledger.history("enterprise", "crusher").unwrap();
        let amounts: Vec<u64> = history.iter().map(|r| r.amount).collect();
        assert_eq!(amounts, vec![0, 128, 537]);
    }

    #[test]
    fn test_assign_requires_claimed_even_for_zero() {
        let mut h = harness();
        let alice = MemberProfile {
            id: "alice".to_string(),
            is_claimed: false,
            is_suspicious: false,
            email_address: None,
            has_verified_identity: false,
            has_payout_route: false,
        };

        for requested in [867, 0] {
            let err = h
                .ledger
                .assign(&mut h.team, &alice, requested, None)
                .unwrap_err();
            match err {
                TakesError::IneligibleMember { member, reason } => {
                    assert_eq!(member, "alice");
                    assert_eq!(reason, EligibilityReason::Unclaimed);
                }
                other => panic!("unexpected error: {other}"),
            }
        }
    }

    // Nonzero requests fail with the specific reason; zero still succeeds.
    fn assert_bad_member(h: &mut Harness, member: &MemberProfile, reason: EligibilityReason) {
        let err = h
            .ledger
            .assign(&mut h.team, member, 867, None)
            .unwrap_err();
        match err {
            TakesError::IneligibleMember { member: id, reason: r } => {
                assert_eq!(id, member.id);
                assert_eq!(r, reason);
            }
            other => panic!("unexpected error: {other}"),
        }
        assert_eq!(h.ledger.assign(&mut h.team, member, 0, None).unwrap(), 0);
    }

    #[test]
    fn test_assign_requires_not_suspicious_except_for_zero() {
        let mut h = harness();
        let mut alice = MemberProfile::in_good_standing("alice", "alice@example.com");
        alice.is_suspicious = true;
        assert_bad_member(&mut h, &alice, EligibilityReason::Suspicious);
    }

    #[test]
    fn test_assign_requires_an_email_except_for_zero() {
        let mut h = harness();
        let mut alice = MemberProfile::in_good_standing("alice", "alice@example.com");
        alice.email_address = None;
        assert_bad_member(&mut h, &alice, EligibilityReason::MissingEmail);
    }

    #[test]
    fn test_assign_requires_an_identity_except_for_zero() {
        let mut h = harness();
        let mut alice = MemberProfile::in_good_standing("alice", "alice@example.com");
        alice.has_verified_identity = false;
        assert_bad_member(&mut h, &alice, EligibilityReason::MissingIdentity);
    }

    #[test]
    fn test_assign_requires_a_payout_route_except_for_zero() {
        let mut h = harness();
        let mut alice = MemberProfile::in_good_standing("alice", "alice@example.com");
        alice.has_payout_route = false;
        assert_bad_member(&mut h, &alice, EligibilityReason::MissingPayoutRoute);
    }

    #[test]
    fn test_rejected_assign_mutates_nothing() {
        let mut h = harness();
        let mut alice = MemberProfile::in_good_standing("alice", "alice@example.com");
        alice.is_suspicious = true;

        let before = h.store.load_team("enterprise").unwrap().unwrap();
        let _ = h.ledger.assign(&mut h.team, &alice, 867, None).unwrap_err();

        assert_eq!(h.store.load_team("enterprise").unwrap().unwrap(), before);
        assert!(h.ledger.history("enterprise", "alice").unwrap().is_empty());
    }

    #[test]
    fn test_removal_and_re_removal_keep_members_count_sane() {
        let mut h = harness();
        h.ledger.assign(&mut h.team, &h.crusher, 537, None).unwrap();
        assert_eq!(h.team.members_count, 1);

        h.ledger.assign(&mut h.team, &h.crusher, 0, None).unwrap();
        assert_eq!(h.team.members_count, 0);
        assert_eq!(h.team.claimed_takes, 0);
        assert_eq!(h.team.unclaimed_takes, 1000);

        // Removing an already-removed member changes nothing.
        h.ledger.assign(&mut h.team, &h.crusher, 0, None).unwrap();
        assert_eq!(h.team.members_count, 0);
        assert!(h.team.counters_consistent());
    }

    #[test]
    fn test_assign_against_an_empty_pool_returns_zero() {
        let mut h = harness_with_pool(0);
        assert_eq!(
            h.ledger.assign(&mut h.team, &h.crusher, 5, None).unwrap(),
            0
        );
        assert_eq!(h.team.members_count, 0);
        assert!(h.team.counters_consistent());
    }

    #[test]
    fn test_claimed_never_exceeds_total() {
        let mut h = harness();
        h.ledger.assign(&mut h.team, &h.crusher, 900, None).unwrap();
        h.ledger.assign(&mut h.team, &h.bruiser, 900, None).unwrap();
        h.ledger.assign(&mut h.team, &h.crusher, 50, None).unwrap();

        assert!(h.team.claimed_takes <= h.team.total_takes);
        assert!(h.team.counters_consistent());
    }

    #[test]
    fn test_assign_unknown_team_is_typed_error() {
        let store = Arc::new(TakesStore::temporary().unwrap());
        let ledger = TakeAssignmentLedger::new(store);
        let mut ghost = Team::new("ghost");
        let crusher = MemberProfile::in_good_standing("crusher", "crusher@example.com");

        let err = ledger.assign(&mut ghost, &crusher, 1, None).unwrap_err();
        assert!(matches!(err, TakesError::UnknownTeam(id) if id == "ghost"));
    }

    struct CountingObserver {
        calls: AtomicUsize,
    }

    impl TakingObserver for CountingObserver {
        fn takes_changed(&self, team_id: &str, member_id: &str) {
            assert_eq!(team_id, "enterprise");
            assert_eq!(member_id, "crusher");
            self.calls.fetch_add(1, Ordering::SeqCst);
        }
    }

    #[test]
    fn test_observer_notified_once_per_assign() {
        let h = harness();
        let observer = Arc::new(CountingObserver {
            calls: AtomicUsize::new(0),
        });
        let ledger =
            TakeAssignmentLedger::new(h.store.clone()).with_observer(observer.clone());

        let mut team = h.team.clone();
        ledger.assign(&mut team, &h.crusher, 537, None).unwrap();
        assert_eq!(observer.calls.load(Ordering::SeqCst), 1);

        ledger.assign(&mut team, &h.crusher, 0, None).unwrap();
        assert_eq!(observer.calls.load(Ordering::SeqCst), 2);
    }

    #[test]
    fn test_rejections_count_in_metrics() {
        let h = harness();
        let metrics = Arc::new(Metrics::new());
        let ledger = TakeAssignmentLedger::new(h.store.clone()).with_metrics(metrics.clone());

        let mut team = h.team.clone();
        let mut alice = MemberProfile::in_good_standing("alice", "alice@example.com");
        alice.is_suspicious = true;

        let _ = ledger.assign(&mut team, &alice, 10, None).unwrap_err();
        ledger.assign(&mut team, &h.crusher, 10, None).unwrap();

        assert_eq!(metrics.eligibility_rejections_total.get(), 1);
        assert_eq!(metrics.takes_assigned_total.get(), 1);
    }
}
