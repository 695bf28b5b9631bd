//! Single place where a contributor's capabilities for a poll are decided.
//! Callers query once per request instead of re-deriving role checks.

use crate::db::Database;
use crate::error::{CoreError, CoreResult};
use crate::models::{Capabilities, Poll};
use log::debug;
use std::sync::Arc;

pub struct AccessController {
    db: Arc<Database>,
}

impl AccessController {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Resolve a contributor's capabilities for a poll. The poll's admin and
    /// its two assigned judges get the judge capability; every other
    /// authenticated identity is public. First contact provisions a
    /// contributor record, which is safe to repeat.
    pub async fn resolve(&self, contributor_id: &str, poll: &Poll) -> CoreResult<Capabilities> {
        if contributor_id.trim().is_empty() {
            return Err(CoreError::Authorization(
                "missing contributor identity".to_string(),
            ));
        }

        self.db.ensure_contributor(contributor_id).await?;

        let capabilities = if poll.is_judge(contributor_id) {
            Capabilities::judge()
        } else {
            Capabilities::public()
        };
        debug!(
            "resolved {} for poll {}: judge={}",
            contributor_id, poll.id, capabilities.is_judge
        );
        Ok(capabilities)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Role;
    use chrono::{Duration, Utc};

    fn sample_poll() -> Poll {
        let now = Utc::now();
        Poll::new(
            "p".to_string(),
            "admin".to_string(),
            "j2".to_string(),
            "j3".to_string(),
            now,
            now + Duration::hours(1),
        )
    }

    #[tokio::test]
    async fn judges_and_admin_resolve_to_judge() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let access = AccessController::new(db);
        let poll = sample_poll();

        for id in ["admin", "j2", "j3"] {
            let caps = access.resolve(id, &poll).await.unwrap();
            assert!(caps.is_judge);
            assert!(!caps.is_public);
            assert!(caps.allows(Role::Judge));
            assert!(!caps.allows(Role::Public));
        }
    }

    #[tokio::test]
    async fn everyone_else_resolves_to_public() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let access = AccessController::new(db);
        let poll = sample_poll();

        let caps = access.resolve("random-user", &poll).await.unwrap();
        assert!(caps.is_public);
        assert!(!caps.is_judge);
    }

    #[tokio::test]
    async fn blank_identity_is_rejected() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let access = AccessController::new(db);
        let poll = sample_poll();

        assert!(matches!(
            access.resolve("", &poll).await,
            Err(CoreError::Authorization(_))
        ));
        assert!(matches!(
            access.resolve("   ", &poll).await,
            Err(CoreError::Authorization(_))
        ));
    }

    #[tokio::test]
    async fn repeated_resolution_provisions_once() {
        let db = Arc::new(Database::in_memory().await.unwrap());
        let access = AccessController::new(Arc::clone(&db));
        let poll = sample_poll();

        access.resolve("visitor", &poll).await.unwrap();
        access.resolve("visitor", &poll).await.unwrap();
    }
}
