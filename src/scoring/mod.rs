//! Pure aggregate computation. Recomputing from the same contribution set
//! always yields the same ordered result, so concurrent or repeated
//! triggers are safe to coalesce.

use crate::models::{Aggregate, Candidate, Contribution, Poll, PollSummary, Role, Snapshot};
use chrono::Utc;
use std::cmp::Ordering;

/// Relative weight of judge versus public input in the total score. When
/// only one source is present, that source's mean is used alone.
#[derive(Debug, Clone, Copy)]
pub struct Weights {
    pub judge: f64,
    pub public: f64,
}

impl Default for Weights {
    fn default() -> Self {
        Self { judge: 0.5, public: 0.5 }
    }
}

/// Compute the ordered aggregate list for a poll from the full current
/// contribution set. Candidates must be given in display order.
pub fn compute_aggregates(
    poll: &Poll,
    candidates: &[Candidate],
    contributions: &[Contribution],
    weights: Weights,
) -> Vec<Aggregate> {
    let mut aggregates: Vec<Aggregate> = candidates
        .iter()
        .map(|candidate| aggregate_candidate(poll, candidate, contributions, weights))
        .collect();

    // Stable sort on a list already in display order: ties and undefined
    // totals keep their original candidate order, never arbitrary
    // iteration order. Undefined totals sort last.
    aggregates.sort_by(|a, b| match (a.total_score, b.total_score) {
        (Some(x), Some(y)) => y.partial_cmp(&x).unwrap_or(Ordering::Equal),
        (Some(_), None) => Ordering::Less,
        (None, Some(_)) => Ordering::Greater,
        (None, None) => Ordering::Equal,
    });

    for (i, aggregate) in aggregates.iter_mut().enumerate() {
        aggregate.rank = i + 1;
    }
    aggregates
}

fn aggregate_candidate(
    poll: &Poll,
    candidate: &Candidate,
    contributions: &[Contribution],
    weights: Weights,
) -> Aggregate {
    let mut judge_scores: [Option<f64>; 3] = [None; 3];
    let mut public_sum = 0.0;
    let mut public_count = 0u32;

    for c in contributions.iter().filter(|c| c.candidate_id == candidate.id) {
        match c.role {
            Role::Judge => {
                if let Some(slot) = poll.judge_slot(&c.contributor_id) {
                    judge_scores[slot] = Some(c.value);
                }
            }
            Role::Public => {
                public_sum += c.value;
                public_count += 1;
            }
        }
    }

    // Missing judges are excluded from the mean, never treated as zero.
    let present: Vec<f64> = judge_scores.iter().flatten().copied().collect();
    let judge_avg = if present.is_empty() {
        None
    } else {
        Some(present.iter().sum::<f64>() / present.len() as f64)
    };
    let public_avg = if public_count == 0 {
        None
    } else {
        Some(public_sum / public_count as f64)
    };

    let total_score = match (judge_avg, public_avg) {
        (Some(j), Some(p)) => Some(weights.judge * j + weights.public * p),
        (Some(j), None) => Some(j),
        (None, Some(p)) => Some(p),
        (None, None) => None,
    };

    Aggregate {
        candidate_id: candidate.id.clone(),
        name: candidate.name.clone(),
        position: candidate.position,
        judge_scores,
        judge_avg,
        public_avg,
        public_count,
        total_score,
        rank: 0,
    }
}

pub fn compute_snapshot(
    poll: &Poll,
    candidates: &[Candidate],
    contributions: &[Contribution],
    weights: Weights,
) -> Snapshot {
    Snapshot {
        poll_id: poll.id.clone(),
        version: 0,
        computed_at: Utc::now(),
        aggregates: compute_aggregates(poll, candidates, contributions, weights),
    }
}

/// Poll-wide result header. Judge average is the plain mean over every
/// individual judge score; public average is weighted by vote count; total
/// average is the mean of the defined total scores.
pub fn compute_summary(aggregates: &[Aggregate]) -> PollSummary {
    let judge_scores: Vec<f64> = aggregates
        .iter()
        .flat_map(|a| a.judge_scores.iter().flatten().copied())
        .collect();
    let judge_avg = if judge_scores.is_empty() {
        None
    } else {
        Some(judge_scores.iter().sum::<f64>() / judge_scores.len() as f64)
    };

    let public_votes: u32 = aggregates.iter().map(|a| a.public_count).sum();
    let public_avg = if public_votes == 0 {
        None
    } else {
        let weighted: f64 = aggregates
            .iter()
            .filter_map(|a| a.public_avg.map(|p| p * a.public_count as f64))
            .sum();
        Some(weighted / public_votes as f64)
    };

    let totals: Vec<f64> = aggregates.iter().filter_map(|a| a.total_score).collect();
    let total_avg = if totals.is_empty() {
        None
    } else {
        Some(totals.iter().sum::<f64>() / totals.len() as f64)
    };

    PollSummary {
        judge_avg,
        public_avg,
        total_avg,
        public_votes,
    }
}
