//! Background recompute worker. Successful ledger writes push their poll id
//! into an unbounded channel; a single consumer drains it, deduplicates a
//! burst into one pass per poll, recomputes from the full contribution set
//! and publishes the stamped snapshot. One consumer means recomputation is
//! serialized per poll without any extra locking.

use crate::db::Database;
use crate::error::CoreResult;
use crate::live::RankingPublisher;
use crate::models::Snapshot;
use crate::scoring::{self, Weights};
use log::{error, info, warn};
use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::mpsc;

const RETRY_ATTEMPTS: u32 = 3;
const RETRY_DELAY_MS: u64 = 250;

/// Work items for the recompute worker.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum RecomputeRequest {
    /// Recompute and publish the poll's snapshot.
    Refresh(String),
    /// Drop the poll's version counter; sent once a poll is closed and
    /// its live-update bookkeeping is retired.
    Release(String),
}

/// Recompute a poll's snapshot from storage. Pure with respect to the
/// contribution set; the caller stamps the version. Returns `None` for an
/// unknown poll.
pub async fn recompute_poll(
    db: &Database,
    poll_id: &str,
    weights: Weights,
) -> CoreResult<Option<Snapshot>> {
    let Some(poll) = db.get_poll(poll_id).await? else {
        return Ok(None);
    };
    let candidates = db.get_candidates(poll_id).await?;
    let contributions = db.get_contributions(poll_id).await?;
    Ok(Some(scoring::compute_snapshot(
        &poll,
        &candidates,
        &contributions,
        weights,
    )))
}

/// Start the worker and hand back the trigger channel. The worker runs
/// until every sender is dropped.
pub fn spawn_recompute_worker(
    db: Arc<Database>,
    publisher: Arc<RankingPublisher>,
    weights: Weights,
) -> mpsc::UnboundedSender<RecomputeRequest> {
    let (tx, mut rx) = mpsc::unbounded_channel::<RecomputeRequest>();

    tokio::spawn(async move {
        info!("Starting recompute worker...");
        let mut versions: HashMap<String, u64> = HashMap::new();

        while let Some(first) = rx.recv().await {
            // Drain whatever a write burst queued up; one pass per poll.
            let mut requests = vec![first];
            while let Ok(more) = rx.try_recv() {
                if !requests.contains(&more) {
                    requests.push(more);
                }
            }

            for request in requests {
                match request {
                    RecomputeRequest::Refresh(poll_id) => {
                        refresh_poll(&db, &publisher, &mut versions, &poll_id, weights).await;
                    }
                    RecomputeRequest::Release(poll_id) => {
                        versions.remove(&poll_id);
                        info!("released version counter for poll {}", poll_id);
                    }
                }
            }
        }
        info!("Recompute worker stopped.");
    });

    tx
}

/// Recompute and publish one poll, retrying transient storage faults.
/// Recompute is idempotent, so a retry can never double-count; if all
/// attempts fail the next successful write triggers it again.
async fn refresh_poll(
    db: &Database,
    publisher: &RankingPublisher,
    versions: &mut HashMap<String, u64>,
    poll_id: &str,
    weights: Weights,
) {
    for attempt in 1..=RETRY_ATTEMPTS {
        match recompute_poll(db, poll_id, weights).await {
            Ok(Some(mut snapshot)) => {
                let version = versions.entry(poll_id.to_string()).or_insert(0);
                *version += 1;
                snapshot.version = *version;
                publisher.publish(snapshot);
                return;
            }
            Ok(None) => {
                warn!("recompute requested for unknown poll {}", poll_id);
                return;
            }
            Err(e) => {
                error!(
                    "recompute attempt {}/{} failed for poll {}: {}",
                    attempt, RETRY_ATTEMPTS, poll_id, e
                );
                if attempt < RETRY_ATTEMPTS {
                    tokio::time::sleep(Duration::from_millis(RETRY_DELAY_MS)).await;
                }
            }
        }
    }
}
