//! Receive-side real-time loop
//!
//! The audio sink is the only clock. Each cycle drains whatever datagrams
//! have arrived into the jitter buffer, decodes the frame due now (or
//! conceals its absence), and writes one block to the sink, which blocks
//! until the device has room.

use std::sync::atomic::{AtomicBool, Ordering};

use tracing::{debug, info, trace, warn};
use trx_common::audio::AudioSink;
use trx_common::codec::FrameDecoder;
use trx_common::ingest::{Frame, Ingest, IngestStats};
use trx_common::jitter::JitterBuffer;
use trx_common::net::Transport;
use trx_common::{DeviceError, TrxError};

// =============================================================================
// Config & Stats
// =============================================================================

/// Parameters the playout driver is built with
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PlayoutConfig {
    /// Encoded bytes per datagram
    pub payload_len: usize,
    /// Samples per channel in one frame
    pub frame: usize,
    /// Interleaved channel count
    pub channels: usize,
    /// Jitter buffer capacity in frames
    pub window: usize,
    /// Consecutive frames required before playout starts
    pub prebuffer: usize,
}

/// Whether the driver is waiting for the buffer to fill
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayoutState {
    /// Holding off until `prebuffer` frames are in hand
    Buffering,
    /// Consuming one frame per cycle
    Playing,
}

/// Counters since the driver was created
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PlayoutStats {
    /// Blocks written to the sink
    pub cycles: u64,
    /// Blocks decoded from a received frame
    pub played: u64,
    /// Blocks synthesized by concealment
    pub concealed: u64,
    /// Writes the sink did not fully accept
    pub short_writes: u64,
    /// Recoverable sink errors recovered from
    pub recovered: u64,
}

// =============================================================================
// Playout Driver
// =============================================================================

/// Jitter buffer, decoder and sink driven from one thread
pub struct PlayoutDriver<T, D, S> {
    transport: T,
    decoder: D,
    sink: S,
    ingest: Ingest,
    jitter: JitterBuffer<Frame>,
    prebuffer: usize,
    frame: usize,
    state: PlayoutState,
    /// Cycles spent buffering while frames were held, capped by `prebuffer`
    waiting: usize,
    /// Decoded block, reused every cycle
    pcm: Vec<f32>,
    stats: PlayoutStats,
}

impl<T, D, S> PlayoutDriver<T, D, S>
where
    T: Transport,
    D: FrameDecoder,
    S: AudioSink,
{
    /// Create a driver in the buffering state
    ///
    /// # Panics
    /// If `config.window` is zero.
    pub fn new(config: PlayoutConfig, transport: T, decoder: D, sink: S) -> Self {
        Self {
            transport,
            decoder,
            sink,
            ingest: Ingest::new(config.payload_len),
            jitter: JitterBuffer::new(config.window),
            prebuffer: config.prebuffer.clamp(1, config.window),
            frame: config.frame,
            state: PlayoutState::Buffering,
            waiting: 0,
            pcm: vec![0.0; config.frame * config.channels],
            stats: PlayoutStats::default(),
        }
    }

    /// Run cycles until `shutdown` is set or a fatal error occurs
    pub fn run(&mut self, shutdown: &AtomicBool) -> Result<PlayoutStats, TrxError> {
        info!(prebuffer = self.prebuffer, window = self.jitter.capacity(), "playout started");

        while !shutdown.load(Ordering::Relaxed) {
            self.cycle()?;
        }

        Ok(self.stats)
    }

    /// Drain the network, then decode and write exactly one block
    pub fn cycle(&mut self) -> Result<(), TrxError> {
        let arrived = self.ingest.drain(&mut self.transport, &mut self.jitter)?;
        self.update_state(&arrived);

        if tracing::enabled!(tracing::Level::TRACE) {
            trace!(base = self.jitter.base(), "{}", self.jitter.occupancy());
        }

        let playing = self.state == PlayoutState::Playing;
        let frame = if playing { self.jitter.front() } else { None };

        match frame {
            Some(frame) => {
                trace!(seq = frame.seq(), "play");
                self.stats.played += 1;
            }
            None => self.stats.concealed += 1,
        }

        self.decoder.decode(frame.map(Frame::payload), &mut self.pcm)?;

        let written = self.write_block()?;
        if written < self.frame {
            debug!(written, expected = self.frame, "short write");
            self.stats.short_writes += 1;
        }

        if playing {
            self.jitter.pop();
        }

        self.stats.cycles += 1;
        Ok(())
    }

    fn update_state(&mut self, arrived: &IngestStats) {
        // A new stream gets its own prebuffer
        if arrived.restarts > 0 && self.state == PlayoutState::Playing {
            debug!(base = self.jitter.base(), "stream restarted, buffering");
            self.state = PlayoutState::Buffering;
            self.waiting = 0;
        }

        match self.state {
            PlayoutState::Buffering => {
                if self.jitter.ready(self.prebuffer) {
                    info!(base = self.jitter.base(), "playing");
                    self.state = PlayoutState::Playing;
                    self.waiting = 0;
                } else if self.jitter.is_empty() {
                    self.waiting = 0;
                } else {
                    self.waiting += 1;
                    // A missing frame holds playout no longer than a full
                    // prebuffer would have taken to arrive
                    if self.waiting >= self.prebuffer {
                        info!(
                            base = self.jitter.base(),
                            held = self.jitter.len(),
                            "playing without full prebuffer"
                        );
                        self.state = PlayoutState::Playing;
                        self.waiting = 0;
                    }
                }
            }
            PlayoutState::Playing => {
                if self.jitter.is_empty() {
                    info!(base = self.jitter.base(), "buffer empty, buffering");
                    self.state = PlayoutState::Buffering;
                }
            }
        }
    }

    /// Write the decoded block, recovering the sink once if it allows
    fn write_block(&mut self) -> Result<usize, DeviceError> {
        match self.sink.write(&self.pcm) {
            Ok(written) => Ok(written),
            Err(e) if e.recoverable() => {
                warn!("{}, recovering", e);
                self.sink.recover()?;
                self.stats.recovered += 1;
                self.sink.write(&self.pcm)
            }
            Err(e) => Err(e),
        }
    }

    /// Current state
    pub fn state(&self) -> PlayoutState {
        self.state
    }

    /// Counters since creation
    pub fn stats(&self) -> PlayoutStats {
        self.stats
    }

    /// Datagram counters since creation
    pub fn ingest_stats(&self) -> IngestStats {
        self.ingest.totals()
    }

    /// The jitter buffer
    pub fn jitter(&self) -> &JitterBuffer<Frame> {
        &self.jitter
    }

    /// The transport, for feeding or inspecting it
    pub fn transport_mut(&mut self) -> &mut T {
        &mut self.transport
    }

    /// The sink
    pub fn sink(&self) -> &S {
        &self.sink
    }
}
