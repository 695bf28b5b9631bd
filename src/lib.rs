//! livetally: the vote aggregation and live-ranking engine behind a timed
//! poll. Each candidate is rated by exactly three judges (the poll admin
//! plus two assigned judges, 0-10) and by an open public channel (0-10,
//! one vote per contributor per candidate). Contributions are immutable
//! and duplicate-proof; aggregates and rankings are recomputed from the
//! contribution set and pushed to subscribed observers while the poll is
//! active, then freeze once it closes.
//!
//! Identity, poll authoring forms, exports and page layout are external
//! collaborators; this crate only consumes an authenticated contributor id
//! and exposes the boundary operations on [`TallyCore`].

pub mod access;
pub mod db;
pub mod engine;
pub mod error;
pub mod ledger;
pub mod lifecycle;
pub mod live;
pub mod models;
pub mod scoring;
pub mod tasks;

pub use engine::TallyCore;
pub use error::{CoreError, CoreResult};
pub use live::{RankingObserver, RankingPublisher, SubscriptionHandle};
pub use models::{
    Aggregate, Candidate, Capabilities, Contribution, Poll, PollState, PollSummary, Role,
    Snapshot, SubmitOutcome,
};
pub use scoring::Weights;
