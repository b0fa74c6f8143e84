//! The logic subprocess: piped stdio, framed stdout, stderr tee, exit watch.

use std::fs::File;
use std::io::{BufRead, BufReader, Write};
use std::path::Path;
use std::process::{ChildStderr, ChildStdin, ChildStdout, Command, Stdio};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use anyhow::Context;
use tracing::{debug, error, info, warn};

use crate::framing;
use crate::judger::CoordMessage;

/// How long a terminated logic gets to exit before the whole process group
/// is killed.
const TERM_GRACE: Duration = Duration::from_millis(500);

/// Coordinator-side handle over the logic process. Created once, when the
/// last AI connects.
pub(crate) struct LogicChannel {
    outbound: Sender<Vec<u8>>,
    pid: u32,
    exited: Arc<AtomicBool>,
}

impl LogicChannel {
    /// Spawn the logic executable and the four threads serving its pipes.
    ///
    /// The child gets its own process group so terminal signals aimed at the
    /// judger do not cascade into it.
    pub fn spawn(
        logic_path: &Path,
        output_dir: &Path,
        coord: Sender<CoordMessage>,
    ) -> anyhow::Result<LogicChannel> {
        info!("try to open logic with {}", logic_path.display());
        let mut command = Command::new(logic_path);
        command
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());
        #[cfg(unix)]
        {
            use std::os::unix::process::CommandExt;
            command.process_group(0);
        }
        let mut child = command
            .spawn()
            .with_context(|| format!("launching logic {}", logic_path.display()))?;
        let pid = child.id();

        let stdin = child.stdin.take().context("logic stdin pipe missing")?;
        let stdout = child.stdout.take().context("logic stdout pipe missing")?;
        let stderr = child.stderr.take().context("logic stderr pipe missing")?;

        let (outbound, queue) = mpsc::channel::<Vec<u8>>();
        let exited = Arc::new(AtomicBool::new(false));

        let stdout_coord = coord.clone();
        let stdout_thread = thread::Builder::new()
            .name("logic-stdout".to_owned())
            .spawn(move || stdout_loop(stdout, stdout_coord))
            .context("spawning logic stdout thread")?;

        let stderr_path = output_dir.join("logic_stderr.txt");
        let stderr_coord = coord.clone();
        thread::Builder::new()
            .name("logic-stderr".to_owned())
            .spawn(move || stderr_loop(stderr, &stderr_path, stderr_coord))
            .context("spawning logic stderr thread")?;

        thread::Builder::new()
            .name("logic-stdin".to_owned())
            .spawn(move || stdin_loop(stdin, queue))
            .context("spawning logic stdin thread")?;

        let watcher_exited = Arc::clone(&exited);
        thread::Builder::new()
            .name("logic-wait".to_owned())
            .spawn(move || {
                let status = child.wait();
                watcher_exited.store(true, Ordering::SeqCst);
                // drain stdout first so a final game-over frame is always
                // queued ahead of the exit notification
                let _ = stdout_thread.join();
                match status {
                    Ok(status) => {
                        info!("logic process exited: {status}");
                        let _ = coord.send(CoordMessage::LogicExited { status });
                    }
                    Err(e) => {
                        let _ = coord.send(CoordMessage::InternalFault {
                            what: format!("waiting for the logic process: {e}"),
                        });
                    }
                }
            })
            .context("spawning logic exit watcher thread")?;

        Ok(LogicChannel {
            outbound,
            pid,
            exited,
        })
    }

    /// Queue one already-framed message for the logic's stdin.
    pub fn send(&self, frame: Vec<u8>) {
        if self.outbound.send(frame).is_err() {
            error!("logic channel is already closed");
        }
    }

    /// Ask the logic to exit, escalating to SIGKILL on the whole process
    /// group after a grace period. Idempotent.
    pub fn close(&self) {
        if self.exited.load(Ordering::SeqCst) {
            return;
        }
        info!("closing logic channel");
        #[cfg(unix)]
        {
            let group = -(self.pid as i32);
            unsafe {
                libc::kill(group, libc::SIGTERM);
            }
            let exited = Arc::clone(&self.exited);
            thread::spawn(move || {
                thread::sleep(TERM_GRACE);
                if !exited.load(Ordering::SeqCst) {
                    warn!("logic ignored SIGTERM, killing its process group");
                    unsafe {
                        libc::kill(group, libc::SIGKILL);
                    }
                }
            });
        }
        #[cfg(not(unix))]
        warn!("logic termination is only implemented on unix (pid {})", self.pid);
    }
}

fn stdout_loop(stdout: ChildStdout, coord: Sender<CoordMessage>) {
    let mut reader = BufReader::new(stdout);
    loop {
        match framing::read_logic_frame(&mut reader) {
            Ok(Some((target, payload))) => {
                debug!("received {} bytes from logic for target {target}", payload.len());
                if coord
                    .send(CoordMessage::LogicData { target, payload })
                    .is_err()
                {
                    return;
                }
            }
            Ok(None) => {
                info!("logic stdout reached end of stream");
                return;
            }
            Err(e) => {
                warn!("logic stdout disconnected: {e:#}");
                return;
            }
        }
    }
}

fn stderr_loop(stderr: ChildStderr, path: &Path, coord: Sender<CoordMessage>) {
    debug!("start capturing logic stderr");
    let mut file = match File::create(path) {
        Ok(file) => file,
        Err(e) => {
            let _ = coord.send(CoordMessage::InternalFault {
                what: format!("creating {}: {e}", path.display()),
            });
            return;
        }
    };
    for line in BufReader::new(stderr).lines() {
        let line = match line {
            Ok(line) => line,
            Err(e) => {
                warn!("logic stderr disconnected: {e}");
                return;
            }
        };
        warn!("logic STDERR: {line}");
        if let Err(e) = writeln!(file, "{line}") {
            // keep draining so the logic never blocks on a full pipe
            warn!("could not append to {}: {e}", path.display());
        }
    }
}

fn stdin_loop(mut stdin: ChildStdin, queue: Receiver<Vec<u8>>) {
    while let Ok(frame) = queue.recv() {
        debug!("sending {} bytes to logic stdin", frame.len());
        if let Err(e) = stdin.write_all(&frame).and_then(|()| stdin.flush()) {
            warn!("logic stdin write failed: {e}");
            return;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scratch_dir(name: &str) -> std::path::PathBuf {
        let dir = std::env::temp_dir().join(format!("judger-logic-{}-{name}", std::process::id()));
        std::fs::create_dir_all(&dir).unwrap();
        dir
    }

    #[test]
    #[cfg(unix)]
    fn exit_watcher_reports_the_status() {
        let dir = scratch_dir("exit");
        let (coord, messages) = mpsc::channel();
        let _logic = LogicChannel::spawn(Path::new("/bin/true"), &dir, coord).unwrap();
        loop {
            match messages.recv().unwrap() {
                CoordMessage::LogicExited { status } => {
                    assert!(status.success());
                    break;
                }
                _ => continue,
            }
        }
        let _ = std::fs::remove_dir_all(&dir);
    }

    #[test]
    fn missing_executable_is_an_error() {
        let dir = scratch_dir("missing");
        let (coord, _messages) = mpsc::channel();
        let result = LogicChannel::spawn(Path::new("/nonexistent/logic"), &dir, coord);
        assert!(result.is_err());
        let _ = std::fs::remove_dir_all(&dir);
    }
}
