//! Send-side real-time loop
//!
//! Paced by the audio source: each cycle reads one block (blocking until
//! the device has produced it), applies the PTT gate, encodes, and sends
//! one sequenced datagram. Nothing is retransmitted.

use std::sync::atomic::{AtomicBool, Ordering};

use clap::ValueEnum;
use tracing::{debug, info, trace, warn};
use trx_common::audio::AudioSource;
use trx_common::codec::FrameEncoder;
use trx_common::net::Transport;
use trx_common::sequencer::Sequencer;
use trx_common::wire::encode_datagram;
use trx_common::{DeviceError, TrxError};

use crate::ptt::PttHandle;

// =============================================================================
// Policy
// =============================================================================

/// What the transmitter does with audio while PTT is released
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, ValueEnum)]
pub enum MutePolicy {
    /// Zero the block and send it; the receiver hears silence
    #[default]
    Silence,
    /// Send nothing; the receiver conceals the gap as loss
    Skip,
}

// =============================================================================
// Edge Detection
// =============================================================================

/// Transition between two successive PTT samples
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Edge {
    /// Released (or never sampled) to pressed
    Pressed,
    /// Pressed to released
    Released,
}

/// Turns a sampled pressed/released level into edges
#[derive(Debug, Default)]
pub struct EdgeDetector {
    was_pressed: bool,
}

impl EdgeDetector {
    /// Start as released, so an initial press is reported as an edge
    pub fn new() -> Self {
        Self::default()
    }

    /// Feed one sample, returning the edge it completes, if any
    pub fn update(&mut self, pressed: bool) -> Option<Edge> {
        let edge = match (self.was_pressed, pressed) {
            (false, true) => Some(Edge::Pressed),
            (true, false) => Some(Edge::Released),
            _ => None,
        };
        self.was_pressed = pressed;
        edge
    }
}

// =============================================================================
// Config & Stats
// =============================================================================

/// Parameters the transmit path is built with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TransmitConfig {
    /// Encoded bytes per datagram
    pub payload_len: usize,
    /// Samples per channel in one frame
    pub frame: usize,
    /// Interleaved channel count
    pub channels: usize,
    /// Behavior while PTT is released
    pub mute_policy: MutePolicy,
}

/// Counters since the path was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct TransmitStats {
    /// Blocks read from the source (including short ones)
    pub cycles: u64,
    /// Datagrams handed to the transport
    pub sent: u64,
    /// Of those, blocks zeroed because PTT was released
    pub muted: u64,
    /// Cycles dropped under the skip policy
    pub skipped: u64,
    /// Short reads discarded
    pub short_reads: u64,
    /// Recoverable source errors recovered from
    pub recovered: u64,
    /// Datagrams the transport failed to send
    pub send_errors: u64,
}

// =============================================================================
// Transmit Path
// =============================================================================

/// Source, encoder and transport driven from one thread
pub struct TransmitPath<T, E, S> {
    transport: T,
    encoder: E,
    source: S,
    /// `None` when PTT gating is off
    ptt: Option<PttHandle>,
    policy: MutePolicy,
    sequencer: Sequencer,
    edges: EdgeDetector,
    frame: usize,
    pcm: Vec<f32>,
    payload: Vec<u8>,
    datagram: Vec<u8>,
    stats: TransmitStats,
}

impl<T, E, S> TransmitPath<T, E, S>
where
    T: Transport,
    E: FrameEncoder,
    S: AudioSource,
{
    /// Create a path; `ptt` gates transmission when present
    pub fn new(
        config: TransmitConfig,
        transport: T,
        encoder: E,
        source: S,
        ptt: Option<PttHandle>,
    ) -> Self {
        Self {
            transport,
            encoder,
            source,
            ptt,
            policy: config.mute_policy,
            sequencer: Sequencer::new(),
            edges: EdgeDetector::new(),
            frame: config.frame,
            pcm: vec![0.0; config.frame * config.channels],
            payload: vec![0u8; config.payload_len],
            datagram: Vec::with_capacity(config.payload_len + 4),
            stats: TransmitStats::default(),
        }
    }

    /// Run cycles until `shutdown` is set or a fatal error occurs
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<TransmitStats, TrxError> {
        info!(
            gated = self.ptt.is_some(),
            policy = ?self.policy,
            "transmit started"
        );

        while !shutdown.load(Ordering::Relaxed) {
            self.cycle()?;
        }

        Ok(self.stats)
    }

    /// Read, gate, encode and send one block
    pub fn cycle(&mut self) -> Result<(), TrxError> {
        let frames = self.read_block()?;
        self.stats.cycles += 1;

        // Never encode a partial block; the next read resynchronizes
        if frames < self.frame {
            debug!(frames, expected = self.frame, "short read");
            self.stats.short_reads += 1;
            return Ok(());
        }

        if !self.gate_open() {
            match self.policy {
                MutePolicy::Silence => {
                    self.pcm.fill(0.0);
                    self.stats.muted += 1;
                }
                MutePolicy::Skip => {
                    // The counter still advances so the gap reads as loss
                    self.sequencer.skip();
                    self.stats.skipped += 1;
                    trace!("skip");
                    return Ok(());
                }
            }
        }

        self.encoder.encode(&self.pcm, &mut self.payload)?;

        let seq = self.sequencer.next_seq();
        encode_datagram(seq, &self.payload, &mut self.datagram);

        match self.transport.send(&self.datagram) {
            Ok(()) => {
                trace!(seq, "sent");
                self.stats.sent += 1;
            }
            Err(e) => {
                warn!(seq, "send failed: {}", e);
                self.stats.send_errors += 1;
            }
        }

        Ok(())
    }

    /// Sample PTT and log talk spurt boundaries
    fn gate_open(&mut self) -> bool {
        let Some(ptt) = &self.ptt else {
            return true;
        };

        let pressed = ptt.is_pressed();
        match self.edges.update(pressed) {
            Some(Edge::Pressed) => info!(seq = self.sequencer.peek(), "transmitting"),
            Some(Edge::Released) => info!(seq = self.sequencer.peek(), "muted"),
            None => {}
        }
        pressed
    }

    /// Read one block, recovering the source once if it allows
    fn read_block(&mut self) -> Result<usize, DeviceError> {
        match self.source.read(&mut self.pcm) {
            Ok(frames) => Ok(frames),
            Err(e) if e.recoverable() => {
                warn!("{}, recovering", e);
                self.source.recover()?;
                self.stats.recovered += 1;
                self.source.read(&mut self.pcm)
            }
            Err(e) => Err(e),
        }
    }

    /// Counters since creation
    pub fn stats(&self) -> TransmitStats {
        self.stats
    }

    /// Sequence number the next datagram will carry
    pub fn next_seq(&self) -> u32 {
        self.sequencer.peek()
    }

    /// The transport
    pub fn transport(&self) -> &T {
        &self.transport
    }

    /// The source, for scripting or inspecting it
    pub fn source_mut(&mut self) -> &mut S {
        &mut self.source
    }
}
