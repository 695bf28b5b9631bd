//! Poll state is a pure function of wall-clock time, never stored. Every
//! caller re-derives it at decision time, so a cached status can never lag
//! behind the clock.

use crate::error::{CoreError, CoreResult};
use crate::models::{Poll, PollState};
use chrono::{DateTime, Utc};

pub fn current_state(poll: &Poll, now: DateTime<Utc>) -> PollState {
    if now < poll.start_at {
        PollState::Scheduled
    } else if now < poll.end_at {
        PollState::Active
    } else {
        PollState::Closed
    }
}

/// Writes are permitted only while the poll is active.
pub fn gate_write(poll: &Poll, now: DateTime<Utc>) -> CoreResult<()> {
    match current_state(poll, now) {
        PollState::Active => Ok(()),
        state => Err(CoreError::PollState {
            poll_id: poll.id.clone(),
            state,
        }),
    }
}

/// Authoring-time sanity check on the voting window.
pub fn check_window(start_at: DateTime<Utc>, end_at: DateTime<Utc>) -> CoreResult<()> {
    if end_at <= start_at {
        return Err(CoreError::Validation(
            "end_at must be after start_at".to_string(),
        ));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;

    fn poll_with_window(start: DateTime<Utc>, end: DateTime<Utc>) -> Poll {
        Poll::new(
            "p".to_string(),
            "admin".to_string(),
            "j2".to_string(),
            "j3".to_string(),
            start,
            end,
        )
    }

    #[test]
    fn state_follows_the_clock() {
        let start = Utc::now();
        let end = start + Duration::hours(2);
        let poll = poll_with_window(start, end);

        assert_eq!(current_state(&poll, start - Duration::seconds(1)), PollState::Scheduled);
        assert_eq!(current_state(&poll, start), PollState::Active);
        assert_eq!(current_state(&poll, end - Duration::seconds(1)), PollState::Active);
        // end_at itself is already closed
        assert_eq!(current_state(&poll, end), PollState::Closed);
        assert_eq!(current_state(&poll, end + Duration::hours(1)), PollState::Closed);
    }

    #[test]
    fn writes_gated_outside_active_window() {
        let start = Utc::now();
        let end = start + Duration::hours(1);
        let poll = poll_with_window(start, end);

        assert!(gate_write(&poll, start + Duration::minutes(30)).is_ok());

        match gate_write(&poll, start - Duration::minutes(1)) {
            Err(CoreError::PollState { state, .. }) => assert_eq!(state, PollState::Scheduled),
            other => panic!("expected PollState error, got {:?}", other.map(|_| ())),
        }
        match gate_write(&poll, end) {
            Err(CoreError::PollState { state, .. }) => assert_eq!(state, PollState::Closed),
            other => panic!("expected PollState error, got {:?}", other.map(|_| ())),
        }
    }

    #[test]
    fn window_must_be_forward() {
        let now = Utc::now();
        assert!(check_window(now, now + Duration::minutes(1)).is_ok());
        assert!(check_window(now, now).is_err());
        assert!(check_window(now, now - Duration::minutes(1)).is_err());
    }
}
