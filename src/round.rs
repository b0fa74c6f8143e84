//! Round bookkeeping: current state, listen set and the per-round deadline.

use std::time::{Duration, Instant};

/// Sentinel state before the logic opens the first round.
pub(crate) const PRE_GAME: i32 = -1;

const DEFAULT_ROUND_TIME_LIMIT: Duration = Duration::from_secs(3);
const DEFAULT_OUTPUT_LIMIT: usize = 2048;

/// An actual state transition; the caller must arm a fresh deadline.
#[derive(Debug, PartialEq, Eq)]
pub(crate) struct StateChange {
    /// The new round state.
    pub round: i32,
    /// How long the previous round lasted (zero when leaving pre-game).
    pub elapsed: Duration,
}

/// State stamped by the logic's round messages, owned by the coordinator.
pub(crate) struct RoundState {
    pub state: i32,
    pub round_time_limit: Duration,
    pub output_limit: usize,
    pub listen_target: Vec<u32>,
    round_begin: Instant,
    /// Bumped on every transition; a pending deadline whose epoch no longer
    /// matches is stale. Bumping is the cancel.
    pub timer_epoch: u64,
}

impl RoundState {
    pub fn new() -> RoundState {
        RoundState {
            state: PRE_GAME,
            round_time_limit: DEFAULT_ROUND_TIME_LIMIT,
            output_limit: DEFAULT_OUTPUT_LIMIT,
            listen_target: vec![],
            round_begin: Instant::now(),
            timer_epoch: 0,
        }
    }

    /// Apply a state stamp from the logic. `None` means the round did not
    /// change (the caller may still refresh the listen set).
    pub fn enter_state(&mut self, new_state: i32, now: Instant) -> Option<StateChange> {
        if new_state == self.state {
            return None;
        }
        let elapsed = if self.state == PRE_GAME {
            Duration::ZERO
        } else {
            now.saturating_duration_since(self.round_begin)
        };
        self.state = new_state;
        self.round_begin = now;
        self.timer_epoch += 1;
        Some(StateChange {
            round: new_state,
            elapsed,
        })
    }

    /// Milliseconds since the current round began.
    pub fn elapsed_ms(&self, now: Instant) -> u64 {
        now.saturating_duration_since(self.round_begin).as_millis() as u64
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn leaving_pre_game_reports_zero_elapsed() {
        let mut round = RoundState::new();
        let change = round.enter_state(1, Instant::now()).unwrap();
        assert_eq!(change, StateChange { round: 1, elapsed: Duration::ZERO });
        assert_eq!(round.state, 1);
    }

    #[test]
    fn same_state_is_not_a_transition() {
        let mut round = RoundState::new();
        round.enter_state(1, Instant::now());
        let epoch = round.timer_epoch;
        assert!(round.enter_state(1, Instant::now()).is_none());
        assert_eq!(round.timer_epoch, epoch);
    }

    #[test]
    fn transition_measures_the_previous_round() {
        let mut round = RoundState::new();
        let begin = Instant::now();
        round.enter_state(1, begin);
        let change = round
            .enter_state(2, begin + Duration::from_millis(120))
            .unwrap();
        assert_eq!(change.round, 2);
        assert_eq!(change.elapsed, Duration::from_millis(120));
    }

    #[test]
    fn each_transition_invalidates_the_previous_deadline() {
        let mut round = RoundState::new();
        round.enter_state(1, Instant::now());
        let armed = round.timer_epoch;
        round.enter_state(2, Instant::now());
        assert_ne!(round.timer_epoch, armed);
    }

    #[test]
    fn elapsed_ms_counts_from_round_begin() {
        let mut round = RoundState::new();
        let begin = Instant::now();
        round.enter_state(1, begin);
        assert_eq!(round.elapsed_ms(begin + Duration::from_millis(1500)), 1500);
    }

    #[test]
    fn defaults_match_the_protocol() {
        let round = RoundState::new();
        assert_eq!(round.state, PRE_GAME);
        assert_eq!(round.round_time_limit, Duration::from_secs(3));
        assert_eq!(round.output_limit, 2048);
        assert!(round.listen_target.is_empty());
    }
}
