//! Idempotent, duplicate-proof store of individual contributions. The
//! keyed insert in the storage layer is the only coordination primitive;
//! everything before it is a bounded validate step.

use crate::access::AccessController;
use crate::db::Database;
use crate::error::{CoreError, CoreResult};
use crate::lifecycle;
use crate::models::{Contribution, Poll, Role, SubmitOutcome};
use chrono::{DateTime, Utc};
use log::{info, warn};
use std::sync::Arc;

pub struct ContributionLedger {
    db: Arc<Database>,
    access: AccessController,
}

impl ContributionLedger {
    pub fn new(db: Arc<Database>) -> Self {
        let access = AccessController::new(Arc::clone(&db));
        Self { db, access }
    }

    /// Record one contribution. Returns `Inserted` for a new row,
    /// `AlreadyExists` when the identical contribution is already on
    /// record, and `DuplicateContribution` when a different value was
    /// submitted for an existing key (the original is retained).
    pub async fn submit(
        &self,
        poll: &Poll,
        candidate_id: &str,
        contributor_id: &str,
        role: Role,
        value: f64,
        now: DateTime<Utc>,
    ) -> CoreResult<SubmitOutcome> {
        if !value.is_finite() || !(0.0..=10.0).contains(&value) {
            return Err(CoreError::Validation(format!(
                "value {} is outside the 0-10 range",
                value
            )));
        }

        let capabilities = self.access.resolve(contributor_id, poll).await?;
        if !capabilities.allows(role) {
            return Err(CoreError::Authorization(format!(
                "{} may not submit a {} contribution for poll {}",
                contributor_id, role, poll.id
            )));
        }

        lifecycle::gate_write(poll, now)?;

        if self.db.get_candidate(&poll.id, candidate_id).await?.is_none() {
            return Err(CoreError::Validation(format!(
                "candidate {} does not belong to poll {}",
                candidate_id, poll.id
            )));
        }

        let contribution = Contribution {
            poll_id: poll.id.clone(),
            candidate_id: candidate_id.to_string(),
            contributor_id: contributor_id.to_string(),
            role,
            value,
            created_at: now,
        };

        match self.db.try_insert_contribution(&contribution).await? {
            None => {
                info!(
                    "recorded {} contribution by {} for candidate {} in poll {}",
                    role, contributor_id, candidate_id, poll.id
                );
                Ok(SubmitOutcome::Inserted)
            }
            Some(existing) if existing == value => Ok(SubmitOutcome::AlreadyExists),
            Some(existing) => {
                warn!(
                    "conflicting resubmission by {} for candidate {} in poll {}: kept {}, rejected {}",
                    contributor_id, candidate_id, poll.id, existing, value
                );
                Err(CoreError::DuplicateContribution {
                    existing,
                    submitted: value,
                })
            }
        }
    }

    /// Record a whole ballot, one value per candidate. Each candidate is an
    /// independent atomic unit: a rejection for one never invalidates rows
    /// already accepted for others.
    pub async fn submit_ballot(
        &self,
        poll: &Poll,
        contributor_id: &str,
        role: Role,
        entries: &[(String, f64)],
        now: DateTime<Utc>,
    ) -> Vec<(String, CoreResult<SubmitOutcome>)> {
        let mut outcomes = Vec::with_capacity(entries.len());
        for (candidate_id, value) in entries {
            let outcome = self
                .submit(poll, candidate_id, contributor_id, role, *value, now)
                .await;
            outcomes.push((candidate_id.clone(), outcome));
        }
        outcomes
    }
}
