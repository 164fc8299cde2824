// Length-delimited JSON framing over TCP.
//
// Wire format: a 4-byte big-endian length prefix followed by a JSON payload.
// `write_frame` / `read_frame` work on raw bytes; `send` / `recv` add the
// serde_json step so callers on both sides deal in typed messages.
//
// `MAX_FRAME_SIZE` (1 MiB) bounds allocation from a corrupt or hostile length
// prefix. The largest legitimate frames are lobby lists and race results,
// which stay well under a few kilobytes even with every lobby full.

use std::io::{self, Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;
use thiserror::Error;

/// Maximum allowed frame payload (1 MiB).
pub const MAX_FRAME_SIZE: u32 = 1024 * 1024;

#[derive(Debug, Error)]
pub enum FrameError {
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),

    #[error("frame too large: {0} bytes")]
    TooLarge(usize),

    #[error("malformed message: {0}")]
    Json(#[from] serde_json::Error),
}

impl FrameError {
    /// True when the peer closed the stream (cleanly or mid-frame).
    pub fn is_eof(&self) -> bool {
        matches!(self, FrameError::Io(e) if e.kind() == io::ErrorKind::UnexpectedEof)
    }
}

/// Write one frame: 4-byte big-endian length, then payload. Flushes.
pub fn write_frame<W: Write>(writer: &mut W, payload: &[u8]) -> Result<(), FrameError> {
    let len = u32::try_from(payload.len())
        .ok()
        .filter(|len| *len <= MAX_FRAME_SIZE)
        .ok_or(FrameError::TooLarge(payload.len()))?;
    writer.write_all(&len.to_be_bytes())?;
    writer.write_all(payload)?;
    writer.flush()?;
    Ok(())
}

/// Read one frame. Fails with `TooLarge` before allocating if the prefix
/// exceeds `MAX_FRAME_SIZE`.
pub fn read_frame<R: Read>(reader: &mut R) -> Result<Vec<u8>, FrameError> {
    let mut len_buf = [0u8; 4];
    reader.read_exact(&mut len_buf)?;
    let len = u32::from_be_bytes(len_buf);
    if len > MAX_FRAME_SIZE {
        return Err(FrameError::TooLarge(len as usize));
    }
    let mut buf = vec![0u8; len as usize];
    reader.read_exact(&mut buf)?;
    Ok(buf)
}

/// Serialize `msg` to JSON and write it as one frame.
pub fn send<W: Write, T: Serialize>(writer: &mut W, msg: &T) -> Result<(), FrameError> {
    let json = serde_json::to_vec(msg)?;
    write_frame(writer, &json)
}

/// Read one frame and deserialize it.
pub fn recv<R: Read, T: DeserializeOwned>(reader: &mut R) -> Result<T, FrameError> {
    let bytes = read_frame(reader)?;
    Ok(serde_json::from_slice(&bytes)?)
}
