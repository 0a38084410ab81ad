//! Network ingest: datagrams in, sequenced frames into the jitter buffer
//!
//! Every per-packet failure (malformed length, late, early, duplicate) is
//! absorbed here. The playout loop only ever sees the result as "no frame
//! this cycle".

use std::io;
use std::ops::AddAssign;

use tracing::{debug, info};

use crate::error::{ProtocolError, SequencingError};
use crate::jitter::{JitterBuffer, Pushed};
use crate::net::Transport;
use crate::wire::{datagram_len, parse_datagram};

// =============================================================================
// Frame
// =============================================================================

/// An owned encoded payload tagged with its sequence number
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Frame {
    seq: u32,
    payload: Box<[u8]>,
}

impl Frame {
    /// Create a frame from a received payload
    pub fn new(seq: u32, payload: impl Into<Box<[u8]>>) -> Self {
        Self {
            seq,
            payload: payload.into(),
        }
    }

    /// Sequence number the frame was sent with
    pub fn seq(&self) -> u32 {
        self.seq
    }

    /// Encoded audio
    pub fn payload(&self) -> &[u8] {
        &self.payload
    }
}

// =============================================================================
// Statistics
// =============================================================================

/// Datagram counters for one drain (or a running total)
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct IngestStats {
    /// Datagrams read from the transport
    pub received: u64,
    /// Frames now owned by the jitter buffer
    pub accepted: u64,
    /// Accepted frames that re-anchored an empty buffer
    pub restarts: u64,
    /// Datagrams of the wrong length
    pub malformed: u64,
    /// Frames older than the window
    pub late: u64,
    /// Frames beyond the window
    pub early: u64,
    /// Frames already held
    pub duplicate: u64,
}

impl IngestStats {
    /// Frames dropped by the jitter buffer
    pub fn rejected(&self) -> u64 {
        self.late + self.early + self.duplicate
    }
}

impl AddAssign for IngestStats {
    fn add_assign(&mut self, other: Self) {
        self.received += other.received;
        self.accepted += other.accepted;
        self.restarts += other.restarts;
        self.malformed += other.malformed;
        self.late += other.late;
        self.early += other.early;
        self.duplicate += other.duplicate;
    }
}

// =============================================================================
// Ingest
// =============================================================================

/// Moves datagrams from a transport into a jitter buffer
pub struct Ingest {
    /// Fixed codec payload length every datagram must carry
    payload_len: usize,
    /// Receive buffer, one byte longer than a valid datagram so that
    /// oversized datagrams show up as the wrong length
    buf: Vec<u8>,
    /// Counters since creation
    totals: IngestStats,
}

impl Ingest {
    /// Create an ingest for datagrams carrying `payload_len` encoded bytes
    pub fn new(payload_len: usize) -> Self {
        Self {
            payload_len,
            buf: vec![0u8; datagram_len(payload_len) + 1],
            totals: IngestStats::default(),
        }
    }

    /// Read every datagram currently waiting and push it into `jitter`
    ///
    /// Returns the counters for this drain. Only a transport error other
    /// than would-block is returned as an error.
    pub fn drain<T>(
        &mut self,
        transport: &mut T,
        jitter: &mut JitterBuffer<Frame>,
    ) -> io::Result<IngestStats>
    where
        T: Transport + ?Sized,
    {
        let mut stats = IngestStats::default();

        while let Some(len) = transport.recv(&mut self.buf)? {
            stats.received += 1;
            ingest_datagram(&self.buf[..len], self.payload_len, jitter, &mut stats);
        }

        self.totals += stats;
        Ok(stats)
    }

    /// Counters since creation
    pub fn totals(&self) -> IngestStats {
        self.totals
    }

    /// Payload length this ingest accepts
    pub fn payload_len(&self) -> usize {
        self.payload_len
    }
}

/// Parse one datagram and hand its frame to the jitter buffer
fn ingest_datagram(
    datagram: &[u8],
    payload_len: usize,
    jitter: &mut JitterBuffer<Frame>,
    stats: &mut IngestStats,
) {
    let (seq, payload) = match parse_datagram(datagram, payload_len) {
        Ok(parsed) => parsed,
        Err(ProtocolError::WrongLength { expected, actual }) => {
            debug!(expected, actual, "discarding malformed datagram");
            stats.malformed += 1;
            return;
        }
    };

    match jitter.push(seq, Frame::new(seq, payload)) {
        Ok(Pushed::Stored) => stats.accepted += 1,
        Ok(Pushed::Restarted) => {
            info!(seq, "restarting");
            stats.accepted += 1;
            stats.restarts += 1;
        }
        Err(rejected) => {
            debug!("{}", rejected.error);
            match rejected.error {
                SequencingError::Late(_) => stats.late += 1,
                SequencingError::Early(_) => stats.early += 1,
                SequencingError::Duplicate(_) => stats.duplicate += 1,
            }
            // The rejected frame is still ours; release it
            drop(rejected.into_frame());
        }
    }
}
