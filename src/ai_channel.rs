//! One connected AI: framed reader, queued writer, disconnect detection.

use std::io::{BufReader, Write};
use std::net::{Shutdown, TcpStream};
use std::sync::mpsc::{self, Receiver, Sender};
use std::thread;

use anyhow::Context;
use tracing::{debug, error, info, warn};

use crate::framing::{self, FrameRead};
use crate::judger::CoordMessage;

/// Coordinator-side handle over one AI connection. The reader and writer
/// threads report everything they observe back through the coordinator
/// queue; the handle only enqueues outbound chunks and can force the socket
/// closed.
pub(crate) struct AiChannel {
    ai_id: u32,
    outbound: Sender<Vec<u8>>,
    stream: TcpStream,
}

impl AiChannel {
    /// Start the reader and writer threads for an accepted connection.
    pub fn spawn(
        ai_id: u32,
        stream: TcpStream,
        output_limit: usize,
        coord: Sender<CoordMessage>,
    ) -> anyhow::Result<AiChannel> {
        let (outbound, queue) = mpsc::channel::<Vec<u8>>();
        let reader_stream = stream.try_clone().context("cloning AI stream for the reader")?;
        let writer_stream = stream.try_clone().context("cloning AI stream for the writer")?;

        let reader_coord = coord.clone();
        thread::Builder::new()
            .name(format!("ai-{ai_id}-reader"))
            .spawn(move || read_loop(ai_id, reader_stream, output_limit, reader_coord))
            .context("spawning AI reader thread")?;
        thread::Builder::new()
            .name(format!("ai-{ai_id}-writer"))
            .spawn(move || write_loop(ai_id, writer_stream, queue, coord))
            .context("spawning AI writer thread")?;

        Ok(AiChannel {
            ai_id,
            outbound,
            stream,
        })
    }

    /// Queue one chunk for delivery, exactly as given. Round fan-out chunks
    /// are framed by the caller; direct forwards stay raw.
    pub fn send(&self, chunk: Vec<u8>) {
        if self.outbound.send(chunk).is_err() {
            warn!("AI {} outbound queue is gone, dropping message", self.ai_id);
        }
    }

    /// Shut the socket down both ways so the reader thread unblocks.
    pub fn close(&self) {
        let _ = self.stream.shutdown(Shutdown::Both);
    }
}

fn read_loop(ai_id: u32, stream: TcpStream, output_limit: usize, coord: Sender<CoordMessage>) {
    let mut reader = BufReader::new(stream);
    loop {
        match framing::read_frame(&mut reader, output_limit) {
            Ok(FrameRead::Frame(payload)) => {
                debug!("received {} bytes from AI {ai_id}", payload.len());
                if coord.send(CoordMessage::AiData { ai_id, payload }).is_err() {
                    return;
                }
            }
            Ok(FrameRead::Oversize(frame_len)) => {
                error!("AI {ai_id} exceeded output limit: {frame_len} > {output_limit}");
                let _ = coord.send(CoordMessage::AiOversize { ai_id });
                return;
            }
            Ok(FrameRead::Eof) => {
                info!("AI {ai_id} closed its connection");
                let _ = coord.send(CoordMessage::AiClosed { ai_id });
                return;
            }
            Err(e) => {
                warn!("AI {ai_id} channel is closed: {e:#}");
                let _ = coord.send(CoordMessage::AiClosed { ai_id });
                return;
            }
        }
    }
}

fn write_loop(
    ai_id: u32,
    mut stream: TcpStream,
    queue: Receiver<Vec<u8>>,
    coord: Sender<CoordMessage>,
) {
    while let Ok(chunk) = queue.recv() {
        debug!("sending {} bytes to AI {ai_id}", chunk.len());
        if let Err(e) = stream.write_all(&chunk).and_then(|()| stream.flush()) {
            warn!("AI {ai_id} write failed: {e}");
            let _ = coord.send(CoordMessage::AiClosed { ai_id });
            return;
        }
    }
    // queue closed: the coordinator dropped this endpoint at shutdown
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Read;
    use std::net::TcpListener;

    fn pair() -> (TcpStream, TcpStream) {
        let listener = TcpListener::bind("127.0.0.1:0").unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).unwrap();
        let (server, _) = listener.accept().unwrap();
        (client, server)
    }

    #[test]
    fn frames_are_forwarded_in_order() {
        let (mut client, server) = pair();
        let (coord, messages) = mpsc::channel();
        let _channel = AiChannel::spawn(0, server, 2048, coord).unwrap();

        client.write_all(&framing::frame(b"first")).unwrap();
        client.write_all(&framing::frame(b"second")).unwrap();

        for expected in [&b"first"[..], b"second"] {
            match messages.recv().unwrap() {
                CoordMessage::AiData { ai_id, payload } => {
                    assert_eq!(ai_id, 0);
                    assert_eq!(payload, expected);
                }
                other => panic!("unexpected message: {other:?}"),
            }
        }
    }

    #[test]
    fn oversize_header_stops_the_reader() {
        let (mut client, server) = pair();
        let (coord, messages) = mpsc::channel();
        let _channel = AiChannel::spawn(1, server, 2048, coord).unwrap();

        client.write_all(&4096i32.to_be_bytes()).unwrap();
        assert!(matches!(
            messages.recv().unwrap(),
            CoordMessage::AiOversize { ai_id: 1 }
        ));
    }

    #[test]
    fn peer_close_reports_disconnect() {
        let (client, server) = pair();
        let (coord, messages) = mpsc::channel();
        let _channel = AiChannel::spawn(2, server, 2048, coord).unwrap();

        drop(client);
        assert!(matches!(
            messages.recv().unwrap(),
            CoordMessage::AiClosed { ai_id: 2 }
        ));
    }

    #[test]
    fn queued_chunks_reach_the_socket_in_order() {
        let (mut client, server) = pair();
        let (coord, _messages) = mpsc::channel();
        let channel = AiChannel::spawn(3, server, 2048, coord).unwrap();

        channel.send(framing::frame(b"go"));
        channel.send(vec![1, 2, 3]); // a raw direct forward, no added framing

        let mut received = [0u8; 9];
        client.read_exact(&mut received).unwrap();
        assert_eq!(&received, b"\x00\x00\x00\x02go\x01\x02\x03");
    }
}
