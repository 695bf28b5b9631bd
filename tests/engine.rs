//! End-to-end tests of the engine boundary: submissions flow through
//! access, lifecycle and ledger, recomputation runs in the background and
//! observers see versioned, ordered snapshots.

use async_trait::async_trait;
use chrono::{Duration, Utc};
use livetally::{
    Candidate, CoreError, CoreResult, Poll, PollState, RankingObserver, Role, Snapshot,
    SubmitOutcome, TallyCore,
};
use livetally::db::Database;
use std::sync::{Arc, Mutex};
use std::time::Duration as StdDuration;

fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

async fn setup() -> (TallyCore, Poll, Candidate, Candidate) {
    init_logging();
    let db = Arc::new(Database::in_memory().await.unwrap());
    let core = TallyCore::new(Arc::clone(&db));

    let now = Utc::now();
    let poll = Poll::new(
        "talent night".to_string(),
        "admin".to_string(),
        "judge-2".to_string(),
        "judge-3".to_string(),
        now - Duration::hours(1),
        now + Duration::hours(1),
    );
    core.register_poll(&poll).await.unwrap();

    let a = Candidate::new(poll.id.clone(), "A".to_string(), 0);
    let b = Candidate::new(poll.id.clone(), "B".to_string(), 1);
    core.register_candidate(&a).await.unwrap();
    core.register_candidate(&b).await.unwrap();

    (core, poll, a, b)
}

/// Wait until the latest published snapshot satisfies a predicate.
async fn wait_for_snapshot<F>(core: &TallyCore, poll_id: &str, predicate: F) -> Snapshot
where
    F: Fn(&Snapshot) -> bool,
{
    for _ in 0..200 {
        if let Some(snapshot) = core.latest_snapshot(poll_id) {
            if predicate(&snapshot) {
                return snapshot;
            }
        }
        tokio::time::sleep(StdDuration::from_millis(10)).await;
    }
    panic!("snapshot for poll {} never reached the expected state", poll_id);
}

#[tokio::test]
async fn full_scenario_matches_expected_totals() {
    let (core, poll, a, b) = setup().await;

    for (judge, score_a, score_b) in [("admin", 8.0, 5.0), ("judge-2", 9.0, 6.0), ("judge-3", 7.0, 5.0)] {
        core.submit_judge_score(&poll.id, &a.id, judge, score_a).await.unwrap();
        core.submit_judge_score(&poll.id, &b.id, judge, score_b).await.unwrap();
    }
    core.submit_public_vote(&poll.id, &a.id, "v1", 10.0).await.unwrap();
    core.submit_public_vote(&poll.id, &a.id, "v2", 10.0).await.unwrap();
    core.submit_public_vote(&poll.id, &b.id, "v1", 0.0).await.unwrap();

    wait_for_snapshot(&core, &poll.id, |s| {
        s.aggregates.iter().map(|agg| agg.public_count).sum::<u32>() == 3
            && s.aggregates.iter().all(|agg| agg.judge_avg.is_some())
    })
    .await;

    let aggregates = core.get_aggregates(&poll.id).await.unwrap();
    assert_eq!(aggregates.len(), 2);

    let first = &aggregates[0];
    assert_eq!(first.name, "A");
    assert_eq!(first.rank, 1);
    assert_eq!(first.judge_avg, Some(8.0));
    assert_eq!(first.judge_scores, [Some(8.0), Some(9.0), Some(7.0)]);
    assert_eq!(first.public_avg, Some(10.0));
    assert_eq!(first.public_count, 2);
    assert_eq!(first.total_score, Some(9.0));

    let second = &aggregates[1];
    assert_eq!(second.name, "B");
    assert_eq!(second.rank, 2);
    assert_eq!(second.judge_avg, Some(5.33));
    assert_eq!(second.public_avg, Some(0.0));
    assert_eq!(second.public_count, 1);
    assert_eq!(second.total_score, Some(2.67));
}

#[tokio::test]
async fn judge_only_candidate_keeps_judge_average() {
    let (core, poll, c, _) = setup().await;

    for judge in ["admin", "judge-2", "judge-3"] {
        core.submit_judge_score(&poll.id, &c.id, judge, 6.0).await.unwrap();
    }

    let aggregates = core.get_aggregates(&poll.id).await.unwrap();
    let scored = aggregates.iter().find(|agg| agg.candidate_id == c.id).unwrap();
    assert_eq!(scored.total_score, Some(6.0));
    assert_eq!(scored.public_avg, None);
    assert_eq!(scored.public_count, 0);
}

#[tokio::test]
async fn resubmissions_are_idempotent_then_conflict() {
    let (core, poll, a, _) = setup().await;

    let first = core.submit_public_vote(&poll.id, &a.id, "voter", 7.0).await.unwrap();
    assert_eq!(first, SubmitOutcome::Inserted);

    let second = core.submit_public_vote(&poll.id, &a.id, "voter", 7.0).await.unwrap();
    assert_eq!(second, SubmitOutcome::AlreadyExists);

    let err = core.submit_public_vote(&poll.id, &a.id, "voter", 2.0).await.unwrap_err();
    assert!(matches!(err, CoreError::DuplicateContribution { existing, .. } if existing == 7.0));

    // The original value is what the aggregate reflects.
    let aggregates = core.get_aggregates(&poll.id).await.unwrap();
    let scored = aggregates.iter().find(|agg| agg.candidate_id == a.id).unwrap();
    assert_eq!(scored.public_avg, Some(7.0));
    assert_eq!(scored.public_count, 1);
}

#[tokio::test]
async fn reads_reflect_the_latest_accepted_write() {
    let (core, poll, a, _) = setup().await;

    core.submit_public_vote(&poll.id, &a.id, "v1", 4.0).await.unwrap();
    wait_for_snapshot(&core, &poll.id, |s| {
        s.aggregates.iter().any(|agg| agg.public_count == 1)
    })
    .await;

    // A read right after an accepted write must include it, even before
    // the background worker has published the next snapshot.
    core.submit_public_vote(&poll.id, &a.id, "v2", 8.0).await.unwrap();
    let aggregates = core.get_aggregates(&poll.id).await.unwrap();
    let scored = aggregates.iter().find(|agg| agg.candidate_id == a.id).unwrap();
    assert_eq!(scored.public_count, 2);
    assert_eq!(scored.public_avg, Some(6.0));
}

#[tokio::test]
async fn invalid_value_is_rejected_and_state_unchanged() {
    let (core, poll, a, _) = setup().await;

    let err = core.submit_public_vote(&poll.id, &a.id, "voter", 11.0).await.unwrap_err();
    assert!(matches!(err, CoreError::Validation(_)));

    let aggregates = core.get_aggregates(&poll.id).await.unwrap();
    for agg in &aggregates {
        assert_eq!(agg.public_count, 0);
        assert_eq!(agg.total_score, None);
    }
}

#[tokio::test]
async fn poll_state_follows_the_clock_and_gates_writes() {
    init_logging();
    let db = Arc::new(Database::in_memory().await.unwrap());
    let core = TallyCore::new(Arc::clone(&db));
    let now = Utc::now();

    let upcoming = Poll::new(
        "later".to_string(),
        "admin".to_string(),
        "judge-2".to_string(),
        "judge-3".to_string(),
        now + Duration::hours(1),
        now + Duration::hours(2),
    );
    core.register_poll(&upcoming).await.unwrap();
    let candidate = Candidate::new(upcoming.id.clone(), "A".to_string(), 0);
    core.register_candidate(&candidate).await.unwrap();

    assert_eq!(
        core.get_poll_state(&upcoming.id, now).await.unwrap(),
        PollState::Scheduled
    );
    assert_eq!(
        core.get_poll_state(&upcoming.id, now + Duration::minutes(90)).await.unwrap(),
        PollState::Active
    );
    assert_eq!(
        core.get_poll_state(&upcoming.id, now + Duration::hours(2)).await.unwrap(),
        PollState::Closed
    );

    let err = core
        .submit_public_vote(&upcoming.id, &candidate.id, "voter", 5.0)
        .await
        .unwrap_err();
    assert!(matches!(err, CoreError::PollState { state: PollState::Scheduled, .. }));
}

#[tokio::test]
async fn ballot_reports_per_candidate_outcomes() {
    let (core, poll, a, b) = setup().await;

    core.submit_public_vote(&poll.id, &a.id, "voter", 9.0).await.unwrap();

    let entries = vec![(a.id.clone(), 2.0), (b.id.clone(), 6.0)];
    let outcomes = core
        .submit_ballot(&poll.id, "voter", Role::Public, &entries)
        .await
        .unwrap();

    assert!(matches!(outcomes[0].1, Err(CoreError::DuplicateContribution { .. })));
    assert!(matches!(outcomes[1].1, Ok(SubmitOutcome::Inserted)));

    wait_for_snapshot(&core, &poll.id, |s| {
        s.aggregates.iter().map(|agg| agg.public_count).sum::<u32>() == 2
    })
    .await;

    let aggregates = core.get_aggregates(&poll.id).await.unwrap();
    let for_a = aggregates.iter().find(|agg| agg.candidate_id == a.id).unwrap();
    let for_b = aggregates.iter().find(|agg| agg.candidate_id == b.id).unwrap();
    assert_eq!(for_a.public_avg, Some(9.0));
    assert_eq!(for_b.public_avg, Some(6.0));
}

struct Recorder {
    snapshots: Arc<Mutex<Vec<Snapshot>>>,
}

#[async_trait]
impl RankingObserver for Recorder {
    async fn notify(&self, snapshot: &Snapshot) -> CoreResult<()> {
        self.snapshots.lock().unwrap().push(snapshot.clone());
        Ok(())
    }
}

#[tokio::test]
async fn observers_see_ordered_versions_and_final_state() {
    let (core, poll, a, _) = setup().await;

    let snapshots = Arc::new(Mutex::new(Vec::new()));
    let handle = core
        .subscribe(&poll.id, Recorder { snapshots: Arc::clone(&snapshots) })
        .await
        .unwrap();

    for (i, value) in [3.0, 5.0, 7.0, 9.0].iter().enumerate() {
        core.submit_public_vote(&poll.id, &a.id, &format!("voter-{}", i), *value)
            .await
            .unwrap();
    }

    wait_for_snapshot(&core, &poll.id, |s| {
        s.aggregates.iter().map(|agg| agg.public_count).sum::<u32>() == 4
    })
    .await;
    // Let the delivery task catch up with the final snapshot.
    tokio::time::sleep(StdDuration::from_millis(100)).await;

    let seen = snapshots.lock().unwrap().clone();
    assert!(!seen.is_empty());
    let versions: Vec<u64> = seen.iter().map(|s| s.version).collect();
    assert!(
        versions.windows(2).all(|w| w[0] < w[1]),
        "versions must be strictly increasing, got {:?}",
        versions
    );

    // Bursts may coalesce intermediates, but the final state arrives.
    let last = seen.last().unwrap();
    let scored = last.aggregates.iter().find(|agg| agg.candidate_id == a.id).unwrap();
    assert_eq!(scored.public_count, 4);
    assert_eq!(scored.public_avg, Some(6.0));

    core.unsubscribe(&handle);
}

#[tokio::test]
async fn summary_reflects_all_sources() {
    let (core, poll, a, b) = setup().await;

    core.submit_judge_score(&poll.id, &a.id, "admin", 8.0).await.unwrap();
    core.submit_judge_score(&poll.id, &b.id, "judge-2", 4.0).await.unwrap();
    core.submit_public_vote(&poll.id, &a.id, "v1", 10.0).await.unwrap();
    core.submit_public_vote(&poll.id, &a.id, "v2", 10.0).await.unwrap();
    core.submit_public_vote(&poll.id, &b.id, "v3", 1.0).await.unwrap();

    wait_for_snapshot(&core, &poll.id, |s| {
        s.aggregates.iter().map(|agg| agg.public_count).sum::<u32>() == 3
            && s.aggregates.iter().any(|agg| agg.judge_avg == Some(4.0))
    })
    .await;

    let summary = core.get_summary(&poll.id).await.unwrap();
    assert_eq!(summary.judge_avg, Some(6.0));
    assert_eq!(summary.public_avg, Some(7.0));
    assert_eq!(summary.public_votes, 3);
}

#[tokio::test]
async fn registration_validates_window_and_judges() {
    init_logging();
    let db = Arc::new(Database::in_memory().await.unwrap());
    let core = TallyCore::new(db);
    let now = Utc::now();

    let backwards = Poll::new(
        "backwards".to_string(),
        "admin".to_string(),
        "judge-2".to_string(),
        "judge-3".to_string(),
        now,
        now - Duration::hours(1),
    );
    assert!(matches!(
        core.register_poll(&backwards).await,
        Err(CoreError::Validation(_))
    ));

    let duplicated = Poll::new(
        "dup judges".to_string(),
        "admin".to_string(),
        "judge-2".to_string(),
        "judge-2".to_string(),
        now,
        now + Duration::hours(1),
    );
    assert!(matches!(
        core.register_poll(&duplicated).await,
        Err(CoreError::Validation(_))
    ));
}

#[tokio::test]
async fn unknown_poll_is_a_validation_error() {
    init_logging();
    let db = Arc::new(Database::in_memory().await.unwrap());
    let core = TallyCore::new(db);

    assert!(matches!(
        core.get_aggregates("missing").await,
        Err(CoreError::Validation(_))
    ));
    assert!(matches!(
        core.submit_public_vote("missing", "c", "voter", 5.0).await,
        Err(CoreError::Validation(_))
    ));
}

#[tokio::test]
async fn release_is_closed_polls_only_and_reads_survive_it() {
    let (core, poll, a, _) = setup().await;

    core.submit_public_vote(&poll.id, &a.id, "voter", 8.0).await.unwrap();
    wait_for_snapshot(&core, &poll.id, |s| {
        s.aggregates.iter().any(|agg| agg.public_count == 1)
    })
    .await;

    // Still active: live bookkeeping stays in place.
    let err = core.release_poll(&poll.id, Utc::now()).await.unwrap_err();
    assert!(matches!(err, CoreError::PollState { state: PollState::Active, .. }));
    assert!(core.latest_snapshot(&poll.id).is_some());

    core.release_poll(&poll.id, poll.end_at + Duration::minutes(1))
        .await
        .unwrap();
    assert!(core.latest_snapshot(&poll.id).is_none());

    // Rows stay in storage; on-demand reads are unaffected.
    let aggregates = core.get_aggregates(&poll.id).await.unwrap();
    let scored = aggregates.iter().find(|agg| agg.candidate_id == a.id).unwrap();
    assert_eq!(scored.public_count, 1);
    assert_eq!(scored.public_avg, Some(8.0));
}

#[tokio::test]
async fn snapshots_serialize_for_transport() {
    let (core, poll, a, _) = setup().await;
    core.submit_public_vote(&poll.id, &a.id, "voter", 8.0).await.unwrap();

    let snapshot = wait_for_snapshot(&core, &poll.id, |s| {
        s.aggregates.iter().any(|agg| agg.public_count == 1)
    })
    .await;

    let json = snapshot.to_json().unwrap();
    let parsed: Snapshot = serde_json::from_str(&json).unwrap();
    assert_eq!(parsed, snapshot);
}
