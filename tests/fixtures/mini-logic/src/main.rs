//! Scripted game logic used by the judger integration tests.
//!
//! Speaks the logic side of the judger protocol on stdio: reads
//! length-prefixed JSON frames from stdin, writes `[length][target]` frames
//! to stdout. Every received payload is appended as one line to the replay
//! file announced in the init message, so the tests can assert exactly what
//! the logic saw. The first argument selects the scenario.

use std::fs::File;
use std::io::{Read, Write};
use std::process::exit;

fn read_frame() -> Option<Vec<u8>> {
    let mut stdin = std::io::stdin().lock();
    let mut header = [0u8; 4];
    stdin.read_exact(&mut header).ok()?;
    let len = i32::from_be_bytes(header);
    assert!(len >= 0, "negative frame length {len}");
    let mut payload = vec![0u8; len as usize];
    stdin.read_exact(&mut payload).ok()?;
    Some(payload)
}

fn send(target: i32, payload: &[u8]) {
    let mut stdout = std::io::stdout().lock();
    stdout
        .write_all(&(payload.len() as i32).to_be_bytes())
        .unwrap();
    stdout.write_all(&target.to_be_bytes()).unwrap();
    stdout.write_all(payload).unwrap();
    stdout.flush().unwrap();
}

fn send_control(json: &str) {
    send(-1, json.as_bytes());
}

/// Crude but sufficient: the init payload is compact JSON and the replay
/// path contains no escapes in these tests.
fn replay_path(init: &[u8]) -> String {
    let text = String::from_utf8(init.to_vec()).unwrap();
    let start = text.find("\"replay\":\"").expect("init carries no replay path") + 10;
    let end = text[start..].find('"').unwrap() + start;
    text[start..end].to_owned()
}

fn main() {
    let scenario = std::env::args().nth(1).expect("missing scenario argument");

    let init = read_frame().expect("no init message");
    let mut replay = File::create(replay_path(&init)).expect("cannot create replay file");
    let mut log = |payload: &[u8]| {
        writeln!(replay, "{}", String::from_utf8_lossy(payload)).unwrap();
    };
    log(&init);

    match scenario.as_str() {
        // one round, one prompt, one reply, scores 1-0
        "happy" => {
            send_control(r#"{"state":1,"listen":[0],"player":[0],"content":["go"]}"#);
            let reply = read_frame().expect("no player reply");
            log(&reply);
            send_control(r#"{"state":-1,"end_info":"{\"0\":1,\"1\":0}"}"#);
        }
        // listen on player 0 and wait for whatever error the judger reports
        "listen0" => {
            send_control(r#"{"state":1,"listen":[0],"player":[],"content":[]}"#);
            let error = read_frame().expect("no judger error");
            log(&error);
            send_control(r#"{"state":-1,"end_info":"{\"0\":0}"}"#);
        }
        // shrink the round time limit to 1s before listening
        "tle" => {
            send_control(r#"{"state":1,"time":1,"length":0}"#);
            send_control(r#"{"state":1,"listen":[0],"player":[],"content":[]}"#);
            let error = read_frame().expect("no timeout error");
            log(&error);
            send_control(r#"{"state":-1,"end_info":"{\"0\":0}"}"#);
        }
        // listen on player 1; hold the game open after the first error so a
        // second player failure would still have time to be (wrongly) reported
        "re" => {
            send_control(r#"{"state":2,"listen":[1],"player":[],"content":[]}"#);
            let error = read_frame().expect("no judger error");
            log(&error);
            std::thread::sleep(std::time::Duration::from_millis(600));
            send_control(r#"{"state":-1,"end_info":"{\"0\":0,\"1\":0}"}"#);
        }
        // raw direct forward to player 0, then finish
        "direct" => {
            send(0, &[1, 2, 3]);
            std::thread::sleep(std::time::Duration::from_millis(300));
            send_control(r#"{"state":-1,"end_info":"{\"0\":0}"}"#);
        }
        // die the way a segfaulting logic would
        "crash" => {
            exit(139);
        }
        other => panic!("unknown scenario {other}"),
    }
}
