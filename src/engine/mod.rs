//! The engine facade: the narrow boundary the surrounding application
//! talks to. A write request flows access check -> lifecycle gate ->
//! ledger insert; a successful insert triggers the background recompute
//! worker, whose snapshots fan out through the publisher. Reads recompute
//! on demand and never touch the write path.

use crate::db::Database;
use crate::error::{CoreError, CoreResult};
use crate::ledger::ContributionLedger;
use crate::lifecycle;
use crate::live::{RankingObserver, RankingPublisher, SubscriptionHandle};
use crate::models::{
    round2, Aggregate, Candidate, Poll, PollState, PollSummary, Role, Snapshot, SubmitOutcome,
};
use crate::scoring::{self, Weights};
use crate::tasks::recompute::{self, RecomputeRequest};
use chrono::{DateTime, Utc};
use log::warn;
use std::sync::Arc;
use tokio::sync::mpsc;

pub struct TallyCore {
    db: Arc<Database>,
    ledger: ContributionLedger,
    publisher: Arc<RankingPublisher>,
    recompute_tx: mpsc::UnboundedSender<RecomputeRequest>,
    weights: Weights,
}

impl TallyCore {
    /// Build the engine and start its recompute worker. Must be called
    /// from within a tokio runtime.
    pub fn new(db: Arc<Database>) -> Self {
        Self::with_weights(db, Weights::default())
    }

    pub fn with_weights(db: Arc<Database>, weights: Weights) -> Self {
        let publisher = Arc::new(RankingPublisher::new());
        let recompute_tx =
            recompute::spawn_recompute_worker(Arc::clone(&db), Arc::clone(&publisher), weights);
        Self {
            ledger: ContributionLedger::new(Arc::clone(&db)),
            db,
            publisher,
            recompute_tx,
            weights,
        }
    }

    /// Authoring boundary: polls are created by an external flow and are
    /// read-only for everything else in this crate.
    pub async fn register_poll(&self, poll: &Poll) -> CoreResult<()> {
        lifecycle::check_window(poll.start_at, poll.end_at)?;
        if poll.admin_id == poll.judge_a
            || poll.admin_id == poll.judge_b
            || poll.judge_a == poll.judge_b
        {
            return Err(CoreError::Validation(
                "a poll needs three distinct judge identities".to_string(),
            ));
        }
        self.db.create_poll(poll).await?;
        Ok(())
    }

    pub async fn register_candidate(&self, candidate: &Candidate) -> CoreResult<()> {
        self.require_poll(&candidate.poll_id).await?;
        self.db.create_candidate(candidate).await?;
        Ok(())
    }

    pub async fn submit_judge_score(
        &self,
        poll_id: &str,
        candidate_id: &str,
        judge_id: &str,
        value: f64,
    ) -> CoreResult<SubmitOutcome> {
        self.submit(poll_id, candidate_id, judge_id, Role::Judge, value)
            .await
    }

    pub async fn submit_public_vote(
        &self,
        poll_id: &str,
        candidate_id: &str,
        contributor_id: &str,
        value: f64,
    ) -> CoreResult<SubmitOutcome> {
        self.submit(poll_id, candidate_id, contributor_id, Role::Public, value)
            .await
    }

    async fn submit(
        &self,
        poll_id: &str,
        candidate_id: &str,
        contributor_id: &str,
        role: Role,
        value: f64,
    ) -> CoreResult<SubmitOutcome> {
        let poll = self.require_poll(poll_id).await?;
        let outcome = self
            .ledger
            .submit(&poll, candidate_id, contributor_id, role, value, Utc::now())
            .await?;
        if outcome == SubmitOutcome::Inserted {
            self.trigger_recompute(poll_id);
        }
        Ok(outcome)
    }

    /// Submit a whole ballot, one value per candidate, reporting each
    /// candidate's outcome individually. One rejected candidate never
    /// invalidates rows accepted for the others.
    pub async fn submit_ballot(
        &self,
        poll_id: &str,
        contributor_id: &str,
        role: Role,
        entries: &[(String, f64)],
    ) -> CoreResult<Vec<(String, CoreResult<SubmitOutcome>)>> {
        let poll = self.require_poll(poll_id).await?;
        let outcomes = self
            .ledger
            .submit_ballot(&poll, contributor_id, role, entries, Utc::now())
            .await;
        if outcomes
            .iter()
            .any(|(_, o)| matches!(o, Ok(SubmitOutcome::Inserted)))
        {
            self.trigger_recompute(poll_id);
        }
        Ok(outcomes)
    }

    /// Current ordered aggregates, rounded for presentation. Always
    /// recomputed on demand from the full contribution set, so an accepted
    /// write is visible to the very next read regardless of how far the
    /// push pipeline has caught up.
    pub async fn get_aggregates(&self, poll_id: &str) -> CoreResult<Vec<Aggregate>> {
        let snapshot = self.current_snapshot(poll_id).await?;
        Ok(snapshot.aggregates.iter().map(Aggregate::rounded).collect())
    }

    /// Poll-wide result header, rounded for presentation.
    pub async fn get_summary(&self, poll_id: &str) -> CoreResult<PollSummary> {
        let snapshot = self.current_snapshot(poll_id).await?;
        let summary = scoring::compute_summary(&snapshot.aggregates);
        Ok(PollSummary {
            judge_avg: summary.judge_avg.map(round2),
            public_avg: summary.public_avg.map(round2),
            total_avg: summary.total_avg.map(round2),
            ..summary
        })
    }

    pub async fn get_poll_state(&self, poll_id: &str, now: DateTime<Utc>) -> CoreResult<PollState> {
        let poll = self.require_poll(poll_id).await?;
        Ok(lifecycle::current_state(&poll, now))
    }

    pub async fn subscribe<O: RankingObserver>(
        &self,
        poll_id: &str,
        observer: O,
    ) -> CoreResult<SubscriptionHandle> {
        self.require_poll(poll_id).await?;
        Ok(self.publisher.subscribe(poll_id, observer))
    }

    pub fn unsubscribe(&self, handle: &SubscriptionHandle) {
        self.publisher.unsubscribe(handle);
    }

    /// Latest published snapshot, if any write has been processed yet.
    pub fn latest_snapshot(&self, poll_id: &str) -> Option<Snapshot> {
        self.publisher.latest(poll_id)
    }

    /// Retire a closed poll's live-update bookkeeping: its watch channel
    /// (ending any remaining delivery tasks) and the worker's version
    /// counter. Rows stay in storage, so reads keep working; only the
    /// push pipeline is torn down. Rejected while the poll can still
    /// receive writes.
    pub async fn release_poll(&self, poll_id: &str, now: DateTime<Utc>) -> CoreResult<()> {
        let poll = self.require_poll(poll_id).await?;
        let state = lifecycle::current_state(&poll, now);
        if state != PollState::Closed {
            return Err(CoreError::PollState {
                poll_id: poll_id.to_string(),
                state,
            });
        }
        self.publisher.drop_poll(poll_id);
        if self
            .recompute_tx
            .send(RecomputeRequest::Release(poll_id.to_string()))
            .is_err()
        {
            warn!("recompute worker unavailable; poll {} not released", poll_id);
        }
        Ok(())
    }

    /// Fresh recompute for the read path. Published snapshots serve the
    /// push pipeline only; they trail a write by one worker pass.
    async fn current_snapshot(&self, poll_id: &str) -> CoreResult<Snapshot> {
        match recompute::recompute_poll(&self.db, poll_id, self.weights).await? {
            Some(snapshot) => Ok(snapshot),
            None => Err(CoreError::Validation(format!("unknown poll: {}", poll_id))),
        }
    }

    async fn require_poll(&self, poll_id: &str) -> CoreResult<Poll> {
        self.db
            .get_poll(poll_id)
            .await?
            .ok_or_else(|| CoreError::Validation(format!("unknown poll: {}", poll_id)))
    }

    fn trigger_recompute(&self, poll_id: &str) {
        if self
            .recompute_tx
            .send(RecomputeRequest::Refresh(poll_id.to_string()))
            .is_err()
        {
            warn!("recompute worker unavailable; poll {} not refreshed", poll_id);
        }
    }
}
