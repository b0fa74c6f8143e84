//! Thin CLI wrapper around the judger core.

use std::path::PathBuf;
use std::process::exit;

use clap::{CommandFactory, Parser};
use rand::Rng;
use tracing::{error, info};

use local_judger::config::JudgerConfigBuilder;
use local_judger::judger::Judger;
use local_judger::logger::init_logger;
use local_judger::summary::JudgeState;

const VERSION: &str = env!("CARGO_PKG_VERSION");

#[derive(Parser, Debug)]
#[command(
    name = "judger",
    version,
    about = "Local judger for turn-based multi-agent programming contests",
    long_about = "Accepts AI players over TCP, launches the game logic, and \
                  mediates the match until a final score or a classified failure."
)]
struct Args {
    /// TCP server listening port. Default port is random.
    #[arg(long, default_value_t = 0)]
    port: u16,

    /// Required. Count of players to start a game.
    #[arg(long = "playerCount")]
    player_count: Option<usize>,

    /// Game config file (JSON), forwarded verbatim to the logic.
    #[arg(long = "configFile")]
    config_file: Option<PathBuf>,

    /// Output directory.
    #[arg(long)]
    output: Option<PathBuf>,

    /// Required. Path to logic executable.
    #[arg(long = "logicPath")]
    logic_path: Option<PathBuf>,

    /// Communication protocol version.
    #[arg(long = "protocolVersion", default_value_t = 1)]
    protocol_version: u32,
}

fn require<T>(value: Option<T>) -> T {
    match value {
        Some(value) => value,
        None => {
            let _ = Args::command().print_help();
            exit(1);
        }
    }
}

fn main() {
    let args = Args::parse();

    let player_count = require(args.player_count);
    let logic_path = require(args.logic_path);

    let game_config = match &args.config_file {
        None => serde_json::json!({}),
        Some(path) => {
            let raw = match std::fs::read_to_string(path) {
                Ok(raw) => raw,
                Err(e) => {
                    eprintln!("Failed to access config file {}: {e}", path.display());
                    exit(1);
                }
            };
            match serde_json::from_str(&raw) {
                Ok(config) => config,
                Err(e) => {
                    eprintln!("Failed to parse json in config file [{}]: {e}", path.display());
                    exit(1);
                }
            }
        }
    };

    let output = args.output.unwrap_or_else(|| {
        let suffix: u64 = rand::thread_rng().gen_range(0..10_000_000_000);
        PathBuf::from(format!("res-{suffix:010}"))
    });
    if let Err(e) = std::fs::create_dir_all(&output) {
        eprintln!("Cannot access output directory {}: {e}", output.display());
        exit(1);
    }

    if let Err(e) = init_logger(&output) {
        eprintln!("Failed to set up logging: {e:#}");
        exit(1);
    }

    info!("LocalJudger v{VERSION}");

    let config = JudgerConfigBuilder::new(player_count, logic_path, &output)
        .with_port(args.port)
        .with_game_config(game_config)
        .with_protocol_version(args.protocol_version)
        .build();
    let config = match config {
        Ok(config) => config,
        Err(e) => {
            error!("invalid judger configuration: {e:#}");
            eprintln!("Invalid judger configuration: {e:#}");
            exit(1);
        }
    };

    let judger = match Judger::new(config) {
        Ok(judger) => judger,
        Err(e) => {
            error!("could not start the judger: {e:#}");
            eprintln!("Could not start the judger: {e:#}");
            exit(1);
        }
    };

    #[cfg(unix)]
    if let Err(e) = judger.trap_signals() {
        error!("could not install signal handlers: {e:#}");
    }

    println!("Judger server is running at {}", judger.local_addr());
    let summary = judger.run();

    info!(
        "judger exited: {:?}, scores {:?}, {} round(s), {:.3}s",
        summary.final_state,
        summary.final_score,
        summary.total_round,
        summary.total_time.as_secs_f64()
    );
    match summary.final_state {
        JudgeState::GameOver => println!("Game over. Result: {:?}", summary.final_score),
        state => println!(
            "Match did not finish cleanly ({state:?}). See {} for details.",
            output.join("judger.log").display()
        ),
    }
}
