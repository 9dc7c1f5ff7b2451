//! Length-prefixed tile framing.
//!
//! A framed tile is `[u32 big-endian payload length][payload]`, which lets consumers
//! split tiles apart when they share a channel with other messages.

/// Size of the length prefix in bytes.
pub const FRAME_HEADER_LEN: usize = 4;

/// Errors produced while framing or unframing tiles.
#[non_exhaustive]
#[derive(thiserror::Error, Debug, Clone, PartialEq, Eq)]
pub enum FrameError {
    /// The payload length does not fit into the 32-bit prefix.
    #[error("Tile payload of {0} bytes does not fit a 32-bit length prefix")]
    PayloadTooLarge(usize),

    /// The buffer is shorter than its header claims.
    #[error("Framed tile is truncated: {declared} bytes declared, {available} available")]
    Truncated {
        /// Bytes required by the header (or the header itself)
        declared: usize,
        /// Bytes actually present
        available: usize,
    },
}

/// Prefixes `payload` with its length as an unsigned big-endian 32-bit integer.
///
/// ```
/// # use martin_render_utils::frame_tile;
/// assert_eq!(frame_tile(b"png").unwrap(), b"\0\0\0\x03png");
/// ```
pub fn frame_tile(payload: &[u8]) -> Result<Vec<u8>, FrameError> {
    let len = u32::try_from(payload.len()).map_err(|_| FrameError::PayloadTooLarge(payload.len()))?;
    let mut framed = Vec::with_capacity(FRAME_HEADER_LEN + payload.len());
    framed.extend_from_slice(&len.to_be_bytes());
    framed.extend_from_slice(payload);
    Ok(framed)
}

/// Splits one framed tile off the front of `buffer`, returning `(payload, rest)`.
pub fn split_frame(buffer: &[u8]) -> Result<(&[u8], &[u8]), FrameError> {
    let Some((header, body)) = buffer.split_first_chunk::<FRAME_HEADER_LEN>() else {
        return Err(FrameError::Truncated {
            declared: FRAME_HEADER_LEN,
            available: buffer.len(),
        });
    };
    let declared = usize::try_from(u32::from_be_bytes(*header)).unwrap_or(usize::MAX);
    if body.len() < declared {
        return Err(FrameError::Truncated {
            declared,
            available: body.len(),
        });
    }
    Ok(body.split_at(declared))
}

/// Strips the length prefix of a single framed tile.
pub fn unframe_tile(framed: &[u8]) -> Result<&[u8], FrameError> {
    split_frame(framed).map(|(payload, _)| payload)
}
