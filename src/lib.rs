//! # Local Judger
//!
//! A local match judger for turn-based multi-agent programming contests.
//!
//! The judger accepts a fixed number of AI player processes over TCP,
//! launches a separately supplied "game logic" subprocess, and mediates a
//! framed message protocol between them: the logic drives rounds by
//! broadcasting per-player prompts and naming which players must reply; the
//! judger forwards each listened reply back to the logic, enforces the
//! per-round deadline and the per-message size limit, records a structured
//! event journal and ends the match with a final score or a classified
//! failure.
//!
//! It provides:
//! - The coordination engine itself ([`Judger`](judger::Judger))
//! - A validated configuration record ([`JudgerConfig`](config::JudgerConfig))
//! - The event journal and final report ([`JudgeSummary`](summary::JudgeSummary))
//! - A `judger` binary wrapping the engine behind a CLI, and an `adapter`
//!   binary that bridges a plain-stdio AI program to a judger TCP connection
//!
//! # Protocol sketch
//!
//! Player sockets carry frames of `[4-byte signed big-endian length][payload]`
//! in both directions. The logic's stdout carries
//! `[length][4-byte signed target][payload]`, where target `-1` addresses
//! the judger itself and `0..player_count` asks for a verbatim forward to
//! that player. The logic's stdin receives length-prefixed JSON records.
//! Player ids are assigned in connection-accept order.
//!
//! # Usage Example
//!
//! ```no_run
//! use local_judger::prelude::*;
//!
//! fn main() -> anyhow::Result<()> {
//!     let config = JudgerConfigBuilder::new(2, "./game_logic", "./match-output")
//!         .with_game_config(serde_json::json!({"map": "small"}))
//!         .build()?;
//!
//!     let mut judger = Judger::new(config)?;
//!     println!("waiting for players on {}", judger.local_addr());
//!
//!     // Optional: observe the public events as the match progresses.
//!     judger.set_event_handler(|event| println!("{event:?}"));
//!
//!     let summary = judger.run();
//!     println!(
//!         "match ended as {:?} with scores {:?} after {} rounds",
//!         summary.final_state, summary.final_score, summary.total_round
//!     );
//!     Ok(())
//! }
//! ```
//!
//! The match can be stopped from another thread through
//! [`JudgerHandle::shutdown`](judger::JudgerHandle::shutdown), obtained from
//! [`Judger::handle`](judger::Judger::handle) before calling `run`.
//!
//! # Error policy
//!
//! Player failures are classified as runtime errors (disconnect or broken
//! stream), time-limit errors (round deadline missed) and output-limit
//! errors (frame longer than allowed). Only the first failure of a match is
//! reported to the logic and journaled; later ones are merely logged. Final
//! scores are only trustworthy when the match ends in
//! [`JudgeState::GameOver`](summary::JudgeState::GameOver).
#![warn(missing_docs)]

pub use anyhow;

mod ai_channel;
pub mod config;
mod framing;
pub mod judger;
pub mod logger;
mod logic_channel;
mod protocol;
mod round;
pub mod summary;

/// Commonly used types for quick access.
///
/// ```rust
/// use local_judger::prelude::*;
/// ```
pub mod prelude {
    pub use crate::config::{JudgerConfig, JudgerConfigBuilder};
    pub use crate::judger::{Judger, JudgerHandle};
    pub use crate::summary::{JudgeEvent, JudgeEventType, JudgeState, JudgeSummary};
}
