//! Append-only journal of match events and the final report.
//!
//! Every entry is stamped on the coordinator thread, so the journal order is
//! the order in which the coordinator observed things. The first terminal
//! entry (game over, logic crash, internal error) freezes the report; later
//! terminal appends are logged and dropped.

use std::time::{Duration, Instant, SystemTime};

use tracing::warn;

/// What happened, as recorded in the journal.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgeEventType {
    /// The judger was created.
    JudgeStart,
    /// The TCP listener is up; the address is in the comment.
    TcpServerStarted,
    /// One more AI attached.
    AiConnected,
    /// The logic process was spawned.
    LogicBooted,
    /// The logic moved the match to a new round state.
    NewRound,
    /// A player disconnected or its stream broke.
    AiRe,
    /// A player missed the round deadline.
    AiTle,
    /// A player announced a frame longer than the output limit.
    AiOle,
    /// The logic exited non-zero mid-match.
    LogicCrashed,
    /// The logic reported the final scores.
    GameOver,
    /// The judger itself failed or was asked to stop.
    InternalError,
}

impl JudgeEventType {
    /// Events surfaced to the external handler; the rest stay journal-only.
    pub fn is_public(self) -> bool {
        matches!(
            self,
            JudgeEventType::TcpServerStarted
                | JudgeEventType::AiConnected
                | JudgeEventType::NewRound
                | JudgeEventType::GameOver
        )
    }
}

/// One journal entry. Fields that do not apply hold `-1`, zero or "".
#[derive(Debug, Clone)]
pub struct JudgeEvent {
    /// What happened.
    pub event: JudgeEventType,
    /// Wall-clock stamp.
    pub time: SystemTime,
    /// Round state the entry belongs to, `-1` when none.
    pub round: i32,
    /// Player the entry concerns, `-1` when none.
    pub ai_id: i32,
    /// Duration of the previous round, only meaningful on [`JudgeEventType::NewRound`].
    pub elapsed: Duration,
    /// Free-form detail (listen address, signal name, …).
    pub comment: String,
}

impl JudgeEvent {
    fn new(event: JudgeEventType) -> JudgeEvent {
        JudgeEvent {
            event,
            time: SystemTime::now(),
            round: -1,
            ai_id: -1,
            elapsed: Duration::ZERO,
            comment: String::new(),
        }
    }
}

/// How the match ended.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JudgeState {
    /// The logic delivered final scores; they can be trusted.
    GameOver,
    /// The logic died mid-match; there are no scores.
    LogicCrashed,
    /// The judger failed, was signalled, or was shut down early.
    InternalError,
}

/// The journal plus the terminal classification of one match.
#[derive(Debug)]
pub struct JudgeSummary {
    started: Instant,
    /// When the judger was created.
    pub start_time: SystemTime,
    /// Total match duration, set at the terminal transition.
    pub total_time: Duration,
    /// Terminal classification.
    pub final_state: JudgeState,
    /// Ordered scores; empty unless `final_state` is [`JudgeState::GameOver`].
    pub final_score: Vec<i64>,
    /// Last round state seen in the journal, `-1` if no round ever started.
    pub total_round: i32,
    /// Every recorded event, in coordinator order.
    pub events: Vec<JudgeEvent>,
    finished: bool,
}

impl JudgeSummary {
    pub(crate) fn new() -> JudgeSummary {
        JudgeSummary {
            started: Instant::now(),
            start_time: SystemTime::now(),
            total_time: Duration::ZERO,
            final_state: JudgeState::InternalError,
            final_score: vec![],
            total_round: -1,
            events: vec![JudgeEvent::new(JudgeEventType::JudgeStart)],
            finished: false,
        }
    }

    /// True once a terminal entry froze the report.
    pub fn is_finished(&self) -> bool {
        self.finished
    }

    fn push(&mut self, event: JudgeEvent) -> Option<&JudgeEvent> {
        self.events.push(event);
        self.events.last()
    }

    pub(crate) fn append_tcp_server_started(&mut self, addr: &str) -> Option<&JudgeEvent> {
        let mut event = JudgeEvent::new(JudgeEventType::TcpServerStarted);
        event.comment = addr.to_owned();
        self.push(event)
    }

    pub(crate) fn append_ai_connected(&mut self, ai_id: u32) -> Option<&JudgeEvent> {
        let mut event = JudgeEvent::new(JudgeEventType::AiConnected);
        event.ai_id = ai_id as i32;
        self.push(event)
    }

    pub(crate) fn append_logic_booted(&mut self) -> Option<&JudgeEvent> {
        self.push(JudgeEvent::new(JudgeEventType::LogicBooted))
    }

    pub(crate) fn append_new_round(&mut self, round: i32, elapsed: Duration) -> Option<&JudgeEvent> {
        let mut event = JudgeEvent::new(JudgeEventType::NewRound);
        event.round = round;
        event.elapsed = elapsed;
        self.push(event)
    }

    pub(crate) fn append_ai_error(
        &mut self,
        event_type: JudgeEventType,
        round: i32,
        ai_id: u32,
    ) -> Option<&JudgeEvent> {
        debug_assert!(matches!(
            event_type,
            JudgeEventType::AiRe | JudgeEventType::AiTle | JudgeEventType::AiOle
        ));
        let mut event = JudgeEvent::new(event_type);
        event.round = round;
        event.ai_id = ai_id as i32;
        self.push(event)
    }

    pub(crate) fn append_logic_crashed(&mut self, comment: &str) -> Option<&JudgeEvent> {
        if self.finished {
            warn!("ignoring logic crash after the report was frozen");
            return None;
        }
        let mut event = JudgeEvent::new(JudgeEventType::LogicCrashed);
        event.comment = comment.to_owned();
        self.push(event);
        self.finish(JudgeState::LogicCrashed);
        self.events.last()
    }

    pub(crate) fn append_game_over(&mut self, scores: &[i64]) -> Option<&JudgeEvent> {
        if self.finished {
            // the logic-exit watcher must not record a second game over
            warn!("ignoring duplicate game over");
            return None;
        }
        self.push(JudgeEvent::new(JudgeEventType::GameOver));
        self.final_score = scores.to_vec();
        self.finish(JudgeState::GameOver);
        self.events.last()
    }

    pub(crate) fn append_internal_error(&mut self, comment: &str) -> Option<&JudgeEvent> {
        if self.finished {
            warn!("ignoring internal error after the report was frozen: {comment}");
            return None;
        }
        let mut event = JudgeEvent::new(JudgeEventType::InternalError);
        event.comment = comment.to_owned();
        self.push(event);
        self.finish(JudgeState::InternalError);
        self.events.last()
    }

    fn finish(&mut self, state: JudgeState) {
        self.total_time = self.started.elapsed();
        if let Some(entry) = self.events.iter().rev().find(|entry| entry.round != -1) {
            self.total_round = entry.round;
        }
        self.final_state = state;
        self.finished = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn starts_with_a_judge_start_entry() {
        let summary = JudgeSummary::new();
        assert_eq!(summary.events.len(), 1);
        assert_eq!(summary.events[0].event, JudgeEventType::JudgeStart);
        assert!(!summary.is_finished());
    }

    #[test]
    fn game_over_freezes_scores_and_round() {
        let mut summary = JudgeSummary::new();
        summary.append_ai_connected(0);
        summary.append_logic_booted();
        summary.append_new_round(1, Duration::ZERO);
        summary.append_new_round(2, Duration::from_millis(40));
        summary.append_game_over(&[1, 0]);

        assert!(summary.is_finished());
        assert_eq!(summary.final_state, JudgeState::GameOver);
        assert_eq!(summary.final_score, vec![1, 0]);
        assert_eq!(summary.total_round, 2);
    }

    #[test]
    fn second_terminal_entry_is_dropped() {
        let mut summary = JudgeSummary::new();
        summary.append_game_over(&[3]);
        let before = summary.events.len();

        assert!(summary.append_game_over(&[9]).is_none());
        assert!(summary.append_logic_crashed("late").is_none());
        assert!(summary.append_internal_error("late").is_none());
        assert_eq!(summary.events.len(), before);
        assert_eq!(summary.final_score, vec![3]);
        assert_eq!(summary.final_state, JudgeState::GameOver);
    }

    #[test]
    fn crash_leaves_no_scores() {
        let mut summary = JudgeSummary::new();
        summary.append_new_round(5, Duration::ZERO);
        summary.append_logic_crashed("exit status: 139");
        assert_eq!(summary.final_state, JudgeState::LogicCrashed);
        assert!(summary.final_score.is_empty());
        assert_eq!(summary.total_round, 5);
    }

    #[test]
    fn ai_error_entries_carry_round_and_player() {
        let mut summary = JudgeSummary::new();
        summary.append_ai_error(JudgeEventType::AiTle, 3, 1);
        let entry = summary.events.last().unwrap();
        assert_eq!(entry.event, JudgeEventType::AiTle);
        assert_eq!(entry.round, 3);
        assert_eq!(entry.ai_id, 1);
    }

    #[test]
    fn only_the_documented_events_are_public() {
        use JudgeEventType::*;
        for event in [TcpServerStarted, AiConnected, NewRound, GameOver] {
            assert!(event.is_public());
        }
        for event in [JudgeStart, LogicBooted, AiRe, AiTle, AiOle, LogicCrashed, InternalError] {
            assert!(!event.is_public());
        }
    }
}
