use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// A time-boxed competition among candidates. The poll's state is never
/// stored; it is derived from `start_at`/`end_at` at each decision point.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Poll {
    pub id: String,
    pub title: String,
    /// The poll administrator, acting as the implicit first judge slot.
    pub admin_id: String,
    /// The two explicitly assigned judges.
    pub judge_a: String,
    pub judge_b: String,
    pub start_at: DateTime<Utc>,
    pub end_at: DateTime<Utc>,
}

impl Poll {
    pub fn new(
        title: String,
        admin_id: String,
        judge_a: String,
        judge_b: String,
        start_at: DateTime<Utc>,
        end_at: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            title,
            admin_id,
            judge_a,
            judge_b,
            start_at,
            end_at,
        }
    }

    /// Judge slot (0 = admin, 1 and 2 = assigned judges) for a contributor,
    /// or None if the contributor is not one of this poll's judges.
    pub fn judge_slot(&self, contributor_id: &str) -> Option<usize> {
        if contributor_id == self.admin_id {
            Some(0)
        } else if contributor_id == self.judge_a {
            Some(1)
        } else if contributor_id == self.judge_b {
            Some(2)
        } else {
            None
        }
    }

    pub fn is_judge(&self, contributor_id: &str) -> bool {
        self.judge_slot(contributor_id).is_some()
    }
}

/// A rated participant. Created once at poll authoring time and immutable
/// during voting; `position` is the display order used to break ties.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Candidate {
    pub id: String,
    pub poll_id: String,
    pub name: String,
    pub position: i64,
}

impl Candidate {
    pub fn new(poll_id: String, name: String, position: i64) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            poll_id,
            name,
            position,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Role {
    Judge,
    Public,
}

impl Role {
    pub fn as_str(&self) -> &'static str {
        match self {
            Role::Judge => "judge",
            Role::Public => "public",
        }
    }

    pub fn parse(s: &str) -> Option<Role> {
        match s {
            "judge" => Some(Role::Judge),
            "public" => Some(Role::Public),
            _ => None,
        }
    }
}

impl fmt::Display for Role {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What a resolved contributor is allowed to submit. A contributor is
/// never both judge and public.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Capabilities {
    pub is_judge: bool,
    pub is_public: bool,
}

impl Capabilities {
    pub fn judge() -> Self {
        Self { is_judge: true, is_public: false }
    }

    pub fn public() -> Self {
        Self { is_judge: false, is_public: true }
    }

    pub fn allows(&self, role: Role) -> bool {
        match role {
            Role::Judge => self.is_judge,
            Role::Public => self.is_public,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PollState {
    Scheduled,
    Active,
    Closed,
}

impl fmt::Display for PollState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            PollState::Scheduled => f.write_str("scheduled"),
            PollState::Active => f.write_str("active"),
            PollState::Closed => f.write_str("closed"),
        }
    }
}

/// A single immutable rating. At most one row ever exists per
/// (poll_id, candidate_id, contributor_id).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Contribution {
    pub poll_id: String,
    pub candidate_id: String,
    pub contributor_id: String,
    pub role: Role,
    pub value: f64,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubmitOutcome {
    /// A new contribution row was written.
    Inserted,
    /// The identical contribution was already on record; no-op.
    AlreadyExists,
}

/// Derived per-candidate summary. Values are carried at full precision;
/// use `rounded()` for external presentation.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Aggregate {
    pub candidate_id: String,
    pub name: String,
    pub position: i64,
    /// Individual judge scores by slot (0 = admin, 1-2 = assigned judges).
    pub judge_scores: [Option<f64>; 3],
    pub judge_avg: Option<f64>,
    pub public_avg: Option<f64>,
    pub public_count: u32,
    pub total_score: Option<f64>,
    pub rank: usize,
}

impl Aggregate {
    pub fn rounded(&self) -> Aggregate {
        Aggregate {
            judge_scores: self.judge_scores.map(|s| s.map(round2)),
            judge_avg: self.judge_avg.map(round2),
            public_avg: self.public_avg.map(round2),
            total_score: self.total_score.map(round2),
            ..self.clone()
        }
    }
}

/// A versioned, fully-ordered view of all candidates' aggregates at one
/// point in time. Versions are strictly increasing per poll.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Snapshot {
    pub poll_id: String,
    pub version: u64,
    pub computed_at: DateTime<Utc>,
    pub aggregates: Vec<Aggregate>,
}

impl Snapshot {
    /// Wire form handed to whatever transport delivers notifications.
    pub fn to_json(&self) -> serde_json::Result<String> {
        serde_json::to_string(self)
    }
}

/// Poll-wide result header: overall judge mean across all individual judge
/// scores, public mean weighted by vote count, mean of defined totals.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PollSummary {
    pub judge_avg: Option<f64>,
    pub public_avg: Option<f64>,
    pub total_avg: Option<f64>,
    pub public_votes: u32,
}

/// Round to 2 decimals for external presentation.
pub fn round2(x: f64) -> f64 {
    (x * 100.0).round() / 100.0
}
