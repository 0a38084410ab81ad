//! Datagram format for audio frames over UDP
//!
//! Every datagram carries exactly one encoded frame:
//!
//! ```text
//! +----------------+----------------+----------------+----------------+
//! |                  Sequence Number (4 bytes, BE)                    |
//! +----------------+----------------+----------------+----------------+
//! |              Encoded Payload (fixed size, codec-defined)          |
//! +----------------+----------------+----------------+----------------+
//! ```
//!
//! The payload size is fixed by the codec configuration, which both ends
//! must agree on. Any datagram of a different total length is malformed.
//! There is no version field and no checksum beyond UDP's own.

use crate::error::ProtocolError;

/// Size of the sequence number header in bytes
pub const SEQUENCE_BYTES: usize = 4;

/// Total datagram length for a given payload size
pub const fn datagram_len(payload_len: usize) -> usize {
    SEQUENCE_BYTES + payload_len
}

/// Write a datagram for `seq` and `payload` into `out`
///
/// `out` is cleared first so a single buffer can be reused every cycle.
pub fn encode_datagram(seq: u32, payload: &[u8], out: &mut Vec<u8>) {
    out.clear();
    out.reserve(datagram_len(payload.len()));
    out.extend_from_slice(&seq.to_be_bytes());
    out.extend_from_slice(payload);
}

/// Split a received datagram into sequence number and payload
///
/// # Returns
/// * `Ok((seq, payload))` - Datagram has exactly the expected length
/// * `Err(ProtocolError)` - Any other length
pub fn parse_datagram(bytes: &[u8], payload_len: usize) -> Result<(u32, &[u8]), ProtocolError> {
    let expected = datagram_len(payload_len);
    if bytes.len() != expected {
        return Err(ProtocolError::WrongLength {
            expected,
            actual: bytes.len(),
        });
    }

    let (header, payload) = bytes.split_at(SEQUENCE_BYTES);
    let seq = u32::from_be_bytes([header[0], header[1], header[2], header[3]]);

    Ok((seq, payload))
}
