//! Core coordination logic for judging one match.
//!
//! This module defines the [`Judger`] type, which mediates between the
//! connected AI players and the logic subprocess. Its responsibilities:
//!
//! - Accepting exactly `player_count` TCP connections and assigning stable
//!   player ids in accept order
//! - Spawning the logic once the last player attaches and feeding it the
//!   init message
//! - Routing round broadcasts, direct forwards and listened replies
//! - Enforcing the game policy: output-limit, runtime and time-limit errors,
//!   at most one of which is ever reported to the logic per match
//! - Recording the event journal and producing the final [`JudgeSummary`]
//!
//! # Concurrency
//!
//! All match state is owned by the thread inside [`Judger::run`], which
//! drains one queue of typed [`CoordMessage`]s. Everything else (the accept
//! loop, per-AI readers and writers, the logic pipes, deadline timers, the
//! signal forwarder) is a producer thread holding a clone of the sender, so
//! no state is ever touched concurrently and the journal order is exactly
//! the order in which the coordinator observed events.

use std::net::{SocketAddr, TcpListener, TcpStream};
use std::process::ExitStatus;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use anyhow::Context;
use tracing::{debug, error, info, warn};

use crate::ai_channel::AiChannel;
use crate::config::JudgerConfig;
use crate::framing;
use crate::logic_channel::LogicChannel;
use crate::protocol::{self, AiErrorKind, LogicMessage};
use crate::round::RoundState;
use crate::summary::{JudgeEvent, JudgeEventType, JudgeSummary};

/// How often the accept loop checks its stop flag.
const ACCEPT_POLL: Duration = Duration::from_millis(50);

/// Typed messages serializing every coordinator state change.
#[derive(Debug)]
pub(crate) enum CoordMessage {
    /// The accept loop handed over a new player connection.
    AiAccepted(TcpStream),
    /// A listened-or-not reply arrived from a player.
    AiData { ai_id: u32, payload: Vec<u8> },
    /// A player announced a frame longer than the output limit.
    AiOversize { ai_id: u32 },
    /// A player's stream ended or broke, on either direction.
    AiClosed { ai_id: u32 },
    /// One `(target, payload)` frame from the logic's stdout.
    LogicData { target: i32, payload: Vec<u8> },
    /// The logic process is gone.
    LogicExited { status: ExitStatus },
    /// A round deadline fired; stale epochs are ignored.
    DeadlineExpired { epoch: u64 },
    /// A worker hit a fault the match cannot recover from.
    InternalFault { what: String },
    /// A terminate-class signal reached the process.
    Signal(i32),
    /// Orderly stop requested from outside.
    Shutdown,
}

/// Cloneable handle for stopping a running [`Judger`] from another thread.
#[derive(Clone)]
pub struct JudgerHandle {
    coord: Sender<CoordMessage>,
}

impl JudgerHandle {
    /// Request an orderly shutdown. Idempotent and safe at any match stage.
    pub fn shutdown(&self) {
        let _ = self.coord.send(CoordMessage::Shutdown);
    }
}

/// Judges one match: accepts the players, runs the logic, reports a
/// [`JudgeSummary`]. See the crate documentation for a usage example.
pub struct Judger {
    config: JudgerConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    coord_tx: Sender<CoordMessage>,
    coord_rx: Receiver<CoordMessage>,
    event_tx: Option<Sender<JudgeEvent>>,
    summary: JudgeSummary,
}

impl Judger {
    /// Bind the TCP listener and prepare the match described by `config`.
    ///
    /// # Errors
    ///
    /// Returns an error when the listener cannot be bound.
    pub fn new(config: JudgerConfig) -> anyhow::Result<Judger> {
        let listener = TcpListener::bind(("127.0.0.1", config.port))
            .with_context(|| format!("binding the judger listener on port {}", config.port))?;
        let local_addr = listener.local_addr().context("reading the listener address")?;
        let (coord_tx, coord_rx) = mpsc::channel();
        Ok(Judger {
            config,
            listener,
            local_addr,
            coord_tx,
            coord_rx,
            event_tx: None,
            summary: JudgeSummary::new(),
        })
    }

    /// The address players must connect to. Useful with an ephemeral port.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// A handle that can stop this judger from another thread.
    pub fn handle(&self) -> JudgerHandle {
        JudgerHandle {
            coord: self.coord_tx.clone(),
        }
    }

    /// Install `handler` as the single external event callback. It runs on
    /// its own thread, off the coordinator's critical path, and receives the
    /// public events in journal order.
    pub fn set_event_handler<F>(&mut self, handler: F)
    where
        F: Fn(&JudgeEvent) + Send + 'static,
    {
        let (event_tx, events) = mpsc::channel::<JudgeEvent>();
        thread::Builder::new()
            .name("event-handler".to_owned())
            .spawn(move || {
                while let Ok(event) = events.recv() {
                    handler(&event);
                }
            })
            .expect("could not spawn the event handler thread");
        self.event_tx = Some(event_tx);
    }

    /// Forward terminate-class signals (HUP, INT, TERM) into the match as an
    /// internal error followed by an orderly shutdown. Meant for binaries
    /// where the judger owns the process.
    #[cfg(unix)]
    pub fn trap_signals(&self) -> anyhow::Result<()> {
        use signal_hook::consts::{SIGHUP, SIGINT, SIGTERM};
        use signal_hook::iterator::Signals;

        let mut signals =
            Signals::new([SIGHUP, SIGINT, SIGTERM]).context("installing signal handlers")?;
        let coord = self.coord_tx.clone();
        thread::Builder::new()
            .name("signals".to_owned())
            .spawn(move || {
                for signal in signals.forever() {
                    if coord.send(CoordMessage::Signal(signal)).is_err() {
                        return;
                    }
                }
            })
            .context("spawning the signal forwarding thread")?;
        Ok(())
    }

    /// Run the match to completion. Blocks until a terminal event (game
    /// over, logic crash, internal error, signal or external shutdown) and
    /// returns the frozen report.
    pub fn run(self) -> JudgeSummary {
        let Judger {
            config,
            listener,
            local_addr,
            coord_tx,
            coord_rx,
            event_tx,
            summary,
        } = self;

        let mut coordinator = Coordinator {
            config,
            coord_tx,
            event_tx,
            summary,
            players: vec![],
            logic: None,
            round: RoundState::new(),
            game_running: false,
            stop: false,
        };

        info!("judger server is running at {local_addr}");
        publish(
            &coordinator.event_tx,
            coordinator
                .summary
                .append_tcp_server_started(&local_addr.to_string()),
        );

        let stop_accept = Arc::new(AtomicBool::new(false));
        match listener.try_clone() {
            Ok(listener) => {
                let coord = coordinator.coord_tx.clone();
                let stop = Arc::clone(&stop_accept);
                let player_count = coordinator.config.player_count;
                if let Err(e) = thread::Builder::new()
                    .name("accept".to_owned())
                    .spawn(move || accept_loop(listener, player_count, coord, stop))
                {
                    coordinator.fail(&format!("spawning the accept thread: {e}"));
                }
            }
            Err(e) => coordinator.fail(&format!("cloning the listener: {e}")),
        }

        while !coordinator.stop {
            match coord_rx.recv() {
                Ok(message) => coordinator.handle(message),
                Err(_) => break,
            }
        }

        // teardown: stop accepting, cancel the deadline, stop the logic,
        // close every endpoint, then freeze the report
        info!("judger server is shutting down");
        stop_accept.store(true, Ordering::SeqCst);
        coordinator.round.timer_epoch += 1;
        if let Some(logic) = &coordinator.logic {
            logic.close();
        }
        for player in &coordinator.players {
            player.close();
        }
        drop(listener);
        if !coordinator.summary.is_finished() {
            coordinator
                .summary
                .append_internal_error("match ended without a game over");
        }
        info!(
            "judger exited with final state {:?}",
            coordinator.summary.final_state
        );
        coordinator.summary
    }
}

/// Accepts up to `player_count` connections, then exits. Polls so an
/// external shutdown can stop it even while nobody connects.
fn accept_loop(
    listener: TcpListener,
    player_count: usize,
    coord: Sender<CoordMessage>,
    stop: Arc<AtomicBool>,
) {
    if let Err(e) = listener.set_nonblocking(true) {
        let _ = coord.send(CoordMessage::InternalFault {
            what: format!("configuring the listener: {e}"),
        });
        return;
    }
    let mut accepted = 0;
    while accepted < player_count && !stop.load(Ordering::SeqCst) {
        match listener.accept() {
            Ok((stream, addr)) => {
                info!("handling AI connection from {addr}");
                if let Err(e) = stream.set_nonblocking(false) {
                    let _ = coord.send(CoordMessage::InternalFault {
                        what: format!("configuring an accepted stream: {e}"),
                    });
                    return;
                }
                accepted += 1;
                if coord.send(CoordMessage::AiAccepted(stream)).is_err() {
                    return;
                }
            }
            Err(e) if e.kind() == std::io::ErrorKind::WouldBlock => thread::sleep(ACCEPT_POLL),
            Err(e) if e.kind() == std::io::ErrorKind::Interrupted => continue,
            Err(e) => {
                error!("listener accept failed: {e}");
                let _ = coord.send(CoordMessage::InternalFault {
                    what: format!("listener accept failed: {e}"),
                });
                return;
            }
        }
    }
}

/// All match state, owned by the [`Judger::run`] thread.
struct Coordinator {
    config: JudgerConfig,
    coord_tx: Sender<CoordMessage>,
    event_tx: Option<Sender<JudgeEvent>>,
    summary: JudgeSummary,
    players: Vec<AiChannel>,
    logic: Option<LogicChannel>,
    round: RoundState,
    /// True from logic boot until the first terminal condition or player
    /// error; gates every classified error report.
    game_running: bool,
    stop: bool,
}

fn publish(event_tx: &Option<Sender<JudgeEvent>>, event: Option<&JudgeEvent>) {
    if let (Some(event_tx), Some(event)) = (event_tx, event) {
        if event.event.is_public() {
            let _ = event_tx.send(event.clone());
        }
    }
}

impl Coordinator {
    fn handle(&mut self, message: CoordMessage) {
        match message {
            CoordMessage::AiAccepted(stream) => self.on_ai_accepted(stream),
            CoordMessage::AiData { ai_id, payload } => self.on_ai_data(ai_id, payload),
            CoordMessage::AiOversize { ai_id } => {
                self.report_ai_error(ai_id, AiErrorKind::OutputLimit)
            }
            CoordMessage::AiClosed { ai_id } => self.report_ai_error(ai_id, AiErrorKind::Run),
            CoordMessage::LogicData { target, payload } => self.on_logic_data(target, payload),
            CoordMessage::LogicExited { status } => self.on_logic_exited(status),
            CoordMessage::DeadlineExpired { epoch } => self.on_deadline_expired(epoch),
            CoordMessage::InternalFault { what } => self.fail(&what),
            CoordMessage::Signal(signal) => self.fail(&format!("received signal {signal}")),
            CoordMessage::Shutdown => {
                if !self.summary.is_finished() {
                    publish(
                        &self.event_tx,
                        self.summary
                            .append_internal_error("shutdown requested before game over"),
                    );
                }
                self.game_running = false;
                self.stop = true;
            }
        }
    }

    fn on_ai_accepted(&mut self, stream: TcpStream) {
        if self.players.len() >= self.config.player_count {
            warn!("dropping an AI connection beyond the player count");
            return;
        }
        let ai_id = self.players.len() as u32;
        match AiChannel::spawn(ai_id, stream, self.round.output_limit, self.coord_tx.clone()) {
            Ok(channel) => {
                info!("AI {ai_id} attached");
                self.players.push(channel);
                publish(&self.event_tx, self.summary.append_ai_connected(ai_id));
            }
            Err(e) => {
                error!("could not start endpoint for AI {ai_id}: {e:#}");
                self.fail(&format!("starting endpoint for AI {ai_id}"));
                return;
            }
        }
        if self.players.len() == self.config.player_count {
            self.boot_logic();
        }
    }

    fn boot_logic(&mut self) {
        info!("all {} players connected", self.config.player_count);
        match LogicChannel::spawn(
            &self.config.logic_path,
            &self.config.output_dir,
            self.coord_tx.clone(),
        ) {
            Ok(logic) => {
                // the init message must be the first thing on the queue
                logic.send(protocol::init_frame(
                    self.config.player_count,
                    &self.config.game_config,
                    &self.config.replay_path().to_string_lossy(),
                ));
                self.logic = Some(logic);
                self.game_running = true;
                publish(&self.event_tx, self.summary.append_logic_booted());
            }
            Err(e) => {
                error!("could not launch the logic: {e:#}");
                self.fail("launching the logic process");
            }
        }
    }

    fn on_ai_data(&mut self, ai_id: u32, payload: Vec<u8>) {
        if !self.round.listen_target.contains(&ai_id) {
            warn!("received data from AI {ai_id} which is not listened");
            return;
        }
        let Some(logic) = &self.logic else {
            warn!("received data from AI {ai_id} before the logic booted");
            return;
        };
        let time_ms = self.round.elapsed_ms(Instant::now());
        info!("received data from listened AI {ai_id}, forwarding to logic");
        let content = String::from_utf8_lossy(&payload);
        logic.send(protocol::ai_message_frame(ai_id, &content, time_ms));
    }

    /// Report a classified player failure to the logic and the journal. Only
    /// the first failure of a match is reported; the rest are logged.
    fn report_ai_error(&mut self, ai_id: u32, kind: AiErrorKind) {
        if !self.game_running {
            info!(
                "game is not running, ignoring {} for AI {ai_id}",
                kind.label()
            );
            return;
        }
        self.game_running = false;
        warn!("AI {ai_id} failed with {}", kind.label());
        if let Some(logic) = &self.logic {
            logic.send(protocol::ai_error_frame(ai_id, self.round.state, kind));
        }
        let event_type = match kind {
            AiErrorKind::Run => JudgeEventType::AiRe,
            AiErrorKind::Timeout => JudgeEventType::AiTle,
            AiErrorKind::OutputLimit => JudgeEventType::AiOle,
        };
        publish(
            &self.event_tx,
            self.summary
                .append_ai_error(event_type, self.round.state, ai_id),
        );
    }

    fn on_logic_data(&mut self, target: i32, payload: Vec<u8>) {
        if target == -1 {
            self.on_logic_control(&payload);
        } else if (0..self.players.len() as i32).contains(&target) {
            info!("directly forwarding data to AI {target}");
            self.players[target as usize].send(payload);
        } else {
            error!("invalid target id {target}");
        }
    }

    fn on_logic_control(&mut self, payload: &[u8]) {
        let message = match LogicMessage::decode(payload) {
            Ok(message) => message,
            Err(e) => {
                error!("dropping undecodable logic data: {e:#}");
                return;
            }
        };
        match message {
            LogicMessage::RoundConfig {
                state,
                time_limit_secs,
                length: _, // the length limit is currently ignored
            } => {
                info!("round config received");
                match Duration::try_from_secs_f64(time_limit_secs) {
                    Ok(new_limit) if new_limit != self.round.round_time_limit => {
                        info!("resetting round time limit to {time_limit_secs}s");
                        self.round.round_time_limit = new_limit;
                    }
                    Ok(_) => {}
                    Err(_) => warn!("ignoring invalid round time limit {time_limit_secs}"),
                }
                self.apply_state_change(state);
            }
            LogicMessage::RoundInfo {
                state,
                listen,
                player,
                content,
            } => {
                info!("normal round information received");
                self.apply_state_change(state);
                info!("now listening on players {listen:?}");
                self.round.listen_target = listen;
                if player.len() != content.len() {
                    error!(
                        "player count {} is not equal to content count {}",
                        player.len(),
                        content.len()
                    );
                    return;
                }
                for (ai_id, text) in player.iter().zip(&content) {
                    match self.players.get(*ai_id as usize) {
                        Some(channel) => channel.send(framing::frame(text.as_bytes())),
                        None => error!("round info names unknown player {ai_id}"),
                    }
                }
            }
            LogicMessage::GameOver { scores } => {
                info!("game over. result: {scores:?}");
                self.game_running = false;
                publish(&self.event_tx, self.summary.append_game_over(&scores));
                self.stop = true;
            }
        }
    }

    fn apply_state_change(&mut self, new_state: i32) {
        if let Some(change) = self.round.enter_state(new_state, Instant::now()) {
            info!("enter next round {}", change.round);
            publish(
                &self.event_tx,
                self.summary.append_new_round(change.round, change.elapsed),
            );
            self.arm_deadline();
        }
    }

    /// Start the deadline for the freshly entered round. The previous timer
    /// was cancelled by the epoch bump inside the state transition.
    fn arm_deadline(&self) {
        let epoch = self.round.timer_epoch;
        let limit = self.round.round_time_limit;
        let coord = self.coord_tx.clone();
        thread::spawn(move || {
            thread::sleep(limit);
            let _ = coord.send(CoordMessage::DeadlineExpired { epoch });
        });
    }

    fn on_deadline_expired(&mut self, epoch: u64) {
        if epoch != self.round.timer_epoch {
            debug!("ignoring a stale round deadline");
            return;
        }
        match self.round.listen_target.first().copied() {
            Some(timeout_ai) => {
                warn!("AI {timeout_ai} listen timeout");
                self.report_ai_error(timeout_ai, AiErrorKind::Timeout);
            }
            None => warn!("timeout but no listen target set. This may be an internal bug."),
        }
    }

    fn on_logic_exited(&mut self, status: ExitStatus) {
        if self.game_running {
            if status.success() {
                warn!("logic exited cleanly before reporting game over");
            } else {
                error!("logic crashed: {status}");
                publish(
                    &self.event_tx,
                    self.summary.append_logic_crashed(&status.to_string()),
                );
            }
        }
        self.game_running = false;
        self.stop = true;
    }

    fn fail(&mut self, what: &str) {
        error!("internal error: {what}");
        self.game_running = false;
        publish(&self.event_tx, self.summary.append_internal_error(what));
        self.stop = true;
    }
}
