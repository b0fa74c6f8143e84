//! Adapter wrapping a plain-stdio AI program as a judger TCP client.
//!
//! The wrapped AI is expected to speak the judger's framed protocol on its
//! stdin/stdout; the adapter only moves bytes, it never interprets frames.

use std::io;
use std::net::TcpStream;
use std::path::PathBuf;
use std::process::{Command, Stdio};
use std::thread;

use anyhow::Context;
use clap::Parser;

#[derive(Parser, Debug)]
#[command(
    name = "adapter",
    version,
    about = "Bridge a stdio AI program to a local judger TCP connection"
)]
struct Args {
    /// IP address of local judger server.
    judger_ip: String,

    /// Port of local judger server.
    judger_port: u16,

    /// Path of to-be-adapted AI program.
    ai_path: PathBuf,
}

fn main() -> anyhow::Result<()> {
    let args = Args::parse();

    let mut ai = Command::new(&args.ai_path)
        .stdin(Stdio::piped())
        .stdout(Stdio::piped())
        .stderr(Stdio::inherit())
        .spawn()
        .with_context(|| format!("launching AI program {}", args.ai_path.display()))?;
    println!("Launched AI process");

    let socket = TcpStream::connect((args.judger_ip.as_str(), args.judger_port))
        .with_context(|| format!("connecting to judger at {}:{}", args.judger_ip, args.judger_port))?;
    println!("Connected to local judger");

    let mut ai_stdin = ai.stdin.take().context("AI stdin pipe missing")?;
    let mut ai_stdout = ai.stdout.take().context("AI stdout pipe missing")?;
    let mut socket_reader = socket.try_clone().context("cloning the judger socket")?;
    let mut socket_writer = socket;

    // two byte bridges; when either side closes, the dropped pipe ends make
    // the AI observe EOF and exit
    thread::spawn(move || {
        let _ = io::copy(&mut socket_reader, &mut ai_stdin);
        println!("Judger connection is broken");
    });
    thread::spawn(move || {
        let _ = io::copy(&mut ai_stdout, &mut socket_writer);
        println!("AI stdout is broken");
    });

    let status = ai.wait().context("waiting for the AI process")?;
    println!("AI process exited: {status}");
    Ok(())
}
