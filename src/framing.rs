//! Length-prefixed framing shared by the AI sockets and the logic pipes.
//!
//! Every frame starts with a signed big-endian 32-bit payload length. Frames
//! read from the logic's stdout carry an extra signed 32-bit target id
//! between the length and the payload. A stream that ends exactly on a frame
//! boundary is a clean close; a stream that ends mid-frame is a disconnect.

use std::io::{ErrorKind, Read};

use anyhow::{bail, Context};

/// Outcome of reading one frame from an AI socket.
#[derive(Debug, PartialEq, Eq)]
pub(crate) enum FrameRead {
    /// A complete payload.
    Frame(Vec<u8>),
    /// The advertised length exceeds the given limit. No payload byte has
    /// been consumed.
    Oversize(i32),
    /// The stream ended cleanly at a frame boundary.
    Eof,
}

/// Prefix `payload` with its length.
pub(crate) fn frame(payload: &[u8]) -> Vec<u8> {
    let mut buf = Vec::with_capacity(4 + payload.len());
    buf.extend_from_slice(&(payload.len() as i32).to_be_bytes());
    buf.extend_from_slice(payload);
    buf
}

/// Read one signed big-endian 32-bit integer. `None` means the stream ended
/// before the first byte; ending between bytes is an error.
fn read_i32<R: Read>(reader: &mut R) -> anyhow::Result<Option<i32>> {
    let mut raw = [0u8; 4];
    let mut filled = 0;
    while filled < raw.len() {
        match reader.read(&mut raw[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => bail!("stream closed after {filled} of 4 header bytes"),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => continue,
            Err(e) => return Err(e).context("reading frame header"),
        }
    }
    Ok(Some(i32::from_be_bytes(raw)))
}

/// Read one framed payload, refusing to consume payloads longer than
/// `limit`. Negative lengths are rejected before any allocation.
pub(crate) fn read_frame<R: Read>(reader: &mut R, limit: usize) -> anyhow::Result<FrameRead> {
    let Some(len) = read_i32(reader)? else {
        return Ok(FrameRead::Eof);
    };
    if len < 0 {
        bail!("negative frame length {len}");
    }
    if len as usize > limit {
        return Ok(FrameRead::Oversize(len));
    }
    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .context("reading frame payload")?;
    Ok(FrameRead::Frame(payload))
}

/// Read one `(target, payload)` frame from the logic's stdout. `None` on a
/// clean end of stream.
pub(crate) fn read_logic_frame<R: Read>(reader: &mut R) -> anyhow::Result<Option<(i32, Vec<u8>)>> {
    let Some(len) = read_i32(reader)? else {
        return Ok(None);
    };
    if len < 0 {
        bail!("negative frame length {len}");
    }
    let target = read_i32(reader)?.context("stream closed before frame target")?;
    let mut payload = vec![0u8; len as usize];
    reader
        .read_exact(&mut payload)
        .context("reading frame payload")?;
    Ok(Some((target, payload)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Cursor;

    #[test]
    fn frame_then_read_round_trips() {
        for payload in [&b""[..], &b"go"[..], &b"\x00\x01\xff"[..], &[0xaa; 2048][..]] {
            let mut cursor = Cursor::new(frame(payload));
            assert_eq!(
                read_frame(&mut cursor, 2048).unwrap(),
                FrameRead::Frame(payload.to_vec())
            );
            assert_eq!(read_frame(&mut cursor, 2048).unwrap(), FrameRead::Eof);
        }
    }

    #[test]
    fn header_encodes_signed_big_endian() {
        assert_eq!(&frame(b"go")[..4], &[0, 0, 0, 2]);
        for value in [0i32, 1, 2048, 4096, i32::MAX, -1, i32::MIN] {
            let mut cursor = Cursor::new(value.to_be_bytes());
            assert_eq!(read_i32(&mut cursor).unwrap(), Some(value));
        }
    }

    #[test]
    fn empty_stream_is_clean_eof() {
        let mut cursor = Cursor::new(vec![]);
        assert_eq!(read_frame(&mut cursor, 2048).unwrap(), FrameRead::Eof);
        let mut cursor = Cursor::new(vec![]);
        assert!(read_logic_frame(&mut cursor).unwrap().is_none());
    }

    #[test]
    fn partial_header_is_a_disconnect() {
        let mut cursor = Cursor::new(vec![0, 0]);
        assert!(read_frame(&mut cursor, 2048).is_err());
    }

    #[test]
    fn partial_payload_is_a_disconnect() {
        let mut bytes = frame(b"full payload");
        bytes.truncate(bytes.len() - 3);
        let mut cursor = Cursor::new(bytes);
        assert!(read_frame(&mut cursor, 2048).is_err());
    }

    #[test]
    fn oversize_length_leaves_payload_unconsumed() {
        // 0x1000 = 4096 > 2048; the first payload byte must still be there
        let mut bytes = vec![0x00, 0x00, 0x10, 0x00];
        bytes.push(0x42);
        let mut cursor = Cursor::new(bytes);
        assert_eq!(read_frame(&mut cursor, 2048).unwrap(), FrameRead::Oversize(4096));
        assert_eq!(cursor.position(), 4);
    }

    #[test]
    fn negative_length_is_rejected() {
        let mut cursor = Cursor::new((-5i32).to_be_bytes());
        assert!(read_frame(&mut cursor, 2048).is_err());
        let mut cursor = Cursor::new((-5i32).to_be_bytes());
        assert!(read_logic_frame(&mut cursor).is_err());
    }

    #[test]
    fn logic_frame_carries_target() {
        let mut bytes = Vec::new();
        bytes.extend_from_slice(&3i32.to_be_bytes());
        bytes.extend_from_slice(&(-1i32).to_be_bytes());
        bytes.extend_from_slice(b"abc");
        let mut cursor = Cursor::new(bytes);
        let (target, payload) = read_logic_frame(&mut cursor).unwrap().unwrap();
        assert_eq!(target, -1);
        assert_eq!(payload, b"abc");
    }

    #[test]
    fn logic_frame_truncated_before_target_is_an_error() {
        let mut cursor = Cursor::new(3i32.to_be_bytes());
        assert!(read_logic_frame(&mut cursor).is_err());
    }
}
