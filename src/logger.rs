//! File logger writing `judger.log` under the match output directory.

use std::fs::File;
use std::path::Path;

use anyhow::Context;
use time::format_description;
use tracing::{subscriber::set_global_default, Level};
use tracing_subscriber::{fmt::writer::BoxMakeWriter, FmtSubscriber};

/// Route all tracing records of the process to `<output_dir>/judger.log`.
///
/// # Errors
///
/// Fails when the log file cannot be created or a global subscriber is
/// already installed.
pub fn init_logger(output_dir: &Path) -> anyhow::Result<()> {
    let path = output_dir.join("judger.log");
    let file = File::create(&path).with_context(|| format!("creating {}", path.display()))?;
    let writer = BoxMakeWriter::new(file);
    let local_offset = time::UtcOffset::current_local_offset().unwrap_or(time::UtcOffset::UTC);
    let timer = tracing_subscriber::fmt::time::OffsetTime::new(
        local_offset,
        format_description::parse("[year]-[month]-[day] [hour]:[minute]:[second]").unwrap(),
    );

    let subscriber = FmtSubscriber::builder()
        .with_max_level(Level::DEBUG)
        .with_ansi(false)
        .with_timer(timer)
        .with_writer(writer)
        .finish();

    set_global_default(subscriber)
        .context("setting the global tracing subscriber (is another one installed?)")?;
    tracing::debug!("logging to {} is enabled", path.display());
    Ok(())
}
