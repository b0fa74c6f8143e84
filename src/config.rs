//! Match configuration for the judger.
//!
//! A [`JudgerConfig`] is built once, validated, and handed to
//! [`Judger::new`](crate::judger::Judger::new). The required parameters are
//! the number of players and the path to the logic executable; everything
//! else has a default.
//!
//! # Example
//!
//! ```no_run
//! use local_judger::config::JudgerConfigBuilder;
//!
//! let config = JudgerConfigBuilder::new(2, "./logic", "./match-output")
//!     .with_port(9999)
//!     .with_game_config(serde_json::json!({"map": "small"}))
//!     .build()
//!     .unwrap();
//! assert!(config.replay_path().ends_with("replay.json"));
//! ```

use std::path::{Path, PathBuf};

use anyhow::{bail, Context};
use serde_json::Value;

/// A builder for [`JudgerConfig`].
#[derive(Debug)]
pub struct JudgerConfigBuilder {
    port: u16,
    player_count: usize,
    logic_path: PathBuf,
    output_dir: PathBuf,
    game_config: Value,
    protocol_version: Option<u32>,
}

impl JudgerConfigBuilder {
    /// Start a configuration for a `player_count`-player match judged by the
    /// executable at `logic_path`, writing artifacts under `output_dir`.
    pub fn new(
        player_count: usize,
        logic_path: impl Into<PathBuf>,
        output_dir: impl Into<PathBuf>,
    ) -> JudgerConfigBuilder {
        JudgerConfigBuilder {
            port: 0,
            player_count,
            logic_path: logic_path.into(),
            output_dir: output_dir.into(),
            game_config: Value::Object(Default::default()),
            protocol_version: None,
        }
    }

    /// Set the TCP listening port. Zero (the default) picks an ephemeral
    /// port; read it back with [`Judger::local_addr`](crate::judger::Judger::local_addr).
    #[must_use]
    pub fn with_port(mut self, port: u16) -> Self {
        self.port = port;
        self
    }

    /// Set the opaque game configuration forwarded verbatim to the logic.
    /// Defaults to an empty object.
    #[must_use]
    pub fn with_game_config(mut self, config: Value) -> Self {
        self.game_config = config;
        self
    }

    /// Declare the communication protocol version. Advisory: the current
    /// protocol ignores it.
    #[must_use]
    pub fn with_protocol_version(mut self, version: u32) -> Self {
        self.protocol_version = Some(version);
        self
    }

    /// Validate the parameters and create the output directory if needed.
    ///
    /// # Errors
    ///
    /// Returns an error when `player_count` is zero or the output directory
    /// cannot be created.
    pub fn build(self) -> anyhow::Result<JudgerConfig> {
        if self.player_count == 0 {
            bail!("a match needs at least one player");
        }
        std::fs::create_dir_all(&self.output_dir).with_context(|| {
            format!("creating output directory {}", self.output_dir.display())
        })?;
        Ok(JudgerConfig {
            port: self.port,
            player_count: self.player_count,
            logic_path: self.logic_path,
            output_dir: self.output_dir,
            game_config: self.game_config,
            protocol_version: self.protocol_version,
        })
    }
}

/// Obtained from [`JudgerConfigBuilder`]. Immutable for the whole match.
#[derive(Debug, Clone)]
pub struct JudgerConfig {
    pub(crate) port: u16,
    pub(crate) player_count: usize,
    pub(crate) logic_path: PathBuf,
    pub(crate) output_dir: PathBuf,
    pub(crate) game_config: Value,
    #[allow(dead_code)] // advisory; the current protocol ignores it
    pub(crate) protocol_version: Option<u32>,
}

impl JudgerConfig {
    /// Where the logic is told to write its replay.
    pub fn replay_path(&self) -> PathBuf {
        self.output_dir.join("replay.json")
    }

    /// The directory holding the replay, the logic's stderr and the log.
    pub fn output_dir(&self) -> &Path {
        &self.output_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("judger-config-{}-{name}", std::process::id()))
    }

    #[test]
    fn zero_players_is_rejected() {
        let dir = scratch_dir("zero");
        assert!(JudgerConfigBuilder::new(0, "./logic", &dir).build().is_err());
    }

    #[test]
    fn build_creates_the_output_directory() {
        let dir = scratch_dir("create");
        let _ = std::fs::remove_dir_all(&dir);
        let config = JudgerConfigBuilder::new(2, "./logic", &dir).build().unwrap();
        assert!(dir.is_dir());
        assert_eq!(config.replay_path(), dir.join("replay.json"));
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn defaults_are_ephemeral_port_and_empty_config() {
        let dir = scratch_dir("defaults");
        let config = JudgerConfigBuilder::new(2, "./logic", &dir).build().unwrap();
        assert_eq!(config.port, 0);
        assert_eq!(config.game_config, serde_json::json!({}));
        assert!(config.protocol_version.is_none());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
