//! Wire records exchanged with the logic process.
//!
//! Encoders (`*_frame`) return complete length-prefixed frames, ready to be
//! written to the logic's stdin verbatim. [`LogicMessage::decode`] accepts a
//! control payload without its header and classifies it: `state == -1` marks
//! the end of the game, presence of `time` marks a round configuration,
//! anything else is round information. A missing required field fails the
//! whole decode; the caller drops the frame.

use anyhow::Context;
use serde::Serialize;
use serde_json::Value;

use crate::framing;

/// Scores are keyed by decimal player indices in `end_info`; lookup stops at
/// the first missing index.
const MAX_SCORED_PLAYERS: usize = 10;

/// Classification of a player failure reported to the logic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AiErrorKind {
    /// The AI disconnected or its stream broke.
    Run,
    /// The AI did not answer within the round time limit.
    Timeout,
    /// The AI announced a frame longer than the output limit.
    OutputLimit,
}

impl AiErrorKind {
    pub(crate) fn code(self) -> i32 {
        match self {
            AiErrorKind::Run => 0,
            AiErrorKind::Timeout => 1,
            AiErrorKind::OutputLimit => 2,
        }
    }

    pub(crate) fn label(self) -> &'static str {
        match self {
            AiErrorKind::Run => "runError",
            AiErrorKind::Timeout => "timeOutError",
            AiErrorKind::OutputLimit => "outputLimitError",
        }
    }
}

fn json_frame<T: Serialize>(record: &T) -> Vec<u8> {
    let payload = serde_json::to_vec(record).expect("wire record is always representable as JSON");
    framing::frame(&payload)
}

#[derive(Serialize)]
struct InitInfo<'a> {
    player_list: Vec<u8>,
    player_num: usize,
    config: &'a Value,
    replay: &'a str,
}

/// First frame sent to a freshly spawned logic.
pub(crate) fn init_frame(player_count: usize, config: &Value, replay_path: &str) -> Vec<u8> {
    json_frame(&InitInfo {
        player_list: vec![1; player_count],
        player_num: player_count,
        config,
        replay: replay_path,
    })
}

#[derive(Serialize)]
struct AiMessage<'a> {
    player: u32,
    content: &'a str,
    time: u64,
}

/// A listened AI's reply, forwarded with the elapsed round time in ms.
pub(crate) fn ai_message_frame(ai_id: u32, content: &str, time_ms: u64) -> Vec<u8> {
    json_frame(&AiMessage {
        player: ai_id,
        content,
        time: time_ms,
    })
}

#[derive(Serialize)]
struct AiErrorInner<'a> {
    player: u32,
    state: i32,
    error: i32,
    error_log: &'a str,
}

#[derive(Serialize)]
struct AiErrorOuter<'a> {
    player: i32,
    content: &'a str,
}

/// A classified player failure. The inner record is itself JSON-encoded into
/// the `content` string; the logic expects the double encoding.
pub(crate) fn ai_error_frame(ai_id: u32, state: i32, kind: AiErrorKind) -> Vec<u8> {
    let inner = serde_json::to_string(&AiErrorInner {
        player: ai_id,
        state,
        error: kind.code(),
        error_log: kind.label(),
    })
    .expect("wire record is always representable as JSON");
    json_frame(&AiErrorOuter {
        player: -1,
        content: &inner,
    })
}

/// Control message from the logic, already classified.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum LogicMessage {
    /// Updates the round time limit. `length` is carried by the protocol but
    /// currently ignored.
    RoundConfig {
        state: i32,
        time_limit_secs: f64,
        length: i64,
    },
    /// Starts or refreshes a round: who to listen to and what to tell whom.
    RoundInfo {
        state: i32,
        listen: Vec<u32>,
        player: Vec<u32>,
        content: Vec<String>,
    },
    /// Terminal message carrying the ordered scores.
    GameOver { scores: Vec<i64> },
}

impl LogicMessage {
    pub(crate) fn decode(payload: &[u8]) -> anyhow::Result<LogicMessage> {
        let value: Value = serde_json::from_slice(payload).context("logic data is not valid JSON")?;
        let object = value.as_object().context("logic data is not a JSON object")?;

        let state = require(object, "state")?
            .as_i64()
            .context("[state] is not an integer")? as i32;

        if state == -1 {
            let end_info = require(object, "end_info")?
                .as_str()
                .context("[end_info] is not a string")?;
            return Ok(LogicMessage::GameOver {
                scores: decode_end_info(end_info)?,
            });
        }

        if let Some(time) = object.get("time") {
            let time_limit_secs = time.as_f64().context("[time] is not a number")?;
            let length = require(object, "length")?
                .as_i64()
                .context("[length] is not an integer")?;
            return Ok(LogicMessage::RoundConfig {
                state,
                time_limit_secs,
                length,
            });
        }

        Ok(LogicMessage::RoundInfo {
            state,
            listen: id_list(object, "listen")?,
            player: id_list(object, "player")?,
            content: string_list(object, "content")?,
        })
    }
}

fn require<'a>(
    object: &'a serde_json::Map<String, Value>,
    key: &str,
) -> anyhow::Result<&'a Value> {
    object
        .get(key)
        .with_context(|| format!("missing [{key}] in logic data"))
}

fn id_list(object: &serde_json::Map<String, Value>, key: &str) -> anyhow::Result<Vec<u32>> {
    require(object, key)?
        .as_array()
        .with_context(|| format!("[{key}] is not an array"))?
        .iter()
        .map(|item| {
            item.as_u64()
                .and_then(|id| u32::try_from(id).ok())
                .with_context(|| format!("[{key}] contains an invalid player id: {item}"))
        })
        .collect()
}

fn string_list(object: &serde_json::Map<String, Value>, key: &str) -> anyhow::Result<Vec<String>> {
    require(object, key)?
        .as_array()
        .with_context(|| format!("[{key}] is not an array"))?
        .iter()
        .map(|item| {
            item.as_str()
                .map(str::to_owned)
                .with_context(|| format!("[{key}] contains a non-string entry: {item}"))
        })
        .collect()
}

/// `end_info` is a JSON-encoded string whose keys are decimal indices
/// "0", "1", …; collection stops at the first missing index.
fn decode_end_info(raw: &str) -> anyhow::Result<Vec<i64>> {
    let object: Value = serde_json::from_str(raw).context("[end_info] is not valid JSON")?;
    let mut scores = Vec::new();
    for index in 0..MAX_SCORED_PLAYERS {
        match object.get(index.to_string()) {
            Some(score) => scores.push(
                score
                    .as_i64()
                    .with_context(|| format!("score [{index}] is not an integer"))?,
            ),
            None => break,
        }
    }
    Ok(scores)
}
