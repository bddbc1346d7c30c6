//! Length-prefixed JSON framing.
//!
//! Every message is a 4-byte **little-endian** `u32` length prefix followed
//! by that many bytes of UTF-8 JSON.
//!
//! ```text
//! +----------------+------------------+
//! | Length (4B LE) | JSON Payload     |
//! +----------------+------------------+
//! ```

use std::io::{ErrorKind, Read, Write};

use serde::Serialize;
use serde::de::DeserializeOwned;

use crate::protocol::{MAX_MESSAGE_SIZE, ProtocolError};

/// Read one message.
///
/// Returns `Ok(None)` when the peer closes the stream before the first
/// byte of a length prefix (clean disconnect). A stream that ends inside a
/// prefix or payload is an IO error.
pub fn read_message<T: DeserializeOwned>(
    reader: &mut impl Read,
) -> Result<Option<T>, ProtocolError> {
    let mut len_buf = [0u8; 4];
    let mut filled = 0;
    while filled < len_buf.len() {
        match reader.read(&mut len_buf[filled..]) {
            Ok(0) if filled == 0 => return Ok(None),
            Ok(0) => return Err(ProtocolError::Io(ErrorKind::UnexpectedEof.into())),
            Ok(n) => filled += n,
            Err(e) if e.kind() == ErrorKind::Interrupted => {}
            Err(e) if e.kind() == ErrorKind::ConnectionReset && filled == 0 => return Ok(None),
            Err(e) => return Err(ProtocolError::Io(e)),
        }
    }

    let len = u32::from_le_bytes(len_buf) as usize;
    if len > MAX_MESSAGE_SIZE {
        return Err(ProtocolError::PayloadTooLarge {
            size: len,
            max: MAX_MESSAGE_SIZE,
        });
    }

    let mut payload = vec![0u8; len];
    reader.read_exact(&mut payload)?;
    Ok(Some(serde_json::from_slice(&payload)?))
}

/// Write one message and flush.
pub fn write_message<T: Serialize>(writer: &mut impl Write, msg: &T) -> Result<(), ProtocolError> {
    let payload = serde_json::to_vec(msg)?;
    let too_large = || ProtocolError::PayloadTooLarge {
        size: payload.len(),
        max: MAX_MESSAGE_SIZE,
    };
    if payload.len() > MAX_MESSAGE_SIZE {
        return Err(too_large());
    }
    let len = u32::try_from(payload.len()).map_err(|_| too_large())?;

    writer.write_all(&len.to_le_bytes())?;
    writer.write_all(&payload)?;
    writer.flush()?;
    Ok(())
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
