//! Outbound sequence numbering

/// Monotonic, wrapping sequence counter for outgoing frames
#[derive(Debug, Clone, Default)]
pub struct Sequencer {
    next: u32,
}

impl Sequencer {
    /// Start counting from zero
    pub fn new() -> Self {
        Self::default()
    }

    /// Start counting from an arbitrary value
    pub fn starting_at(next: u32) -> Self {
        Self { next }
    }

    /// Take the next sequence number for a frame about to be sent
    pub fn next_seq(&mut self) -> u32 {
        let seq = self.next;
        self.next = self.next.wrapping_add(1);
        seq
    }

    /// Consume a sequence number for a frame that will not be sent
    ///
    /// The receiver sees the gap as loss and conceals it.
    pub fn skip(&mut self) {
        self.next = self.next.wrapping_add(1);
    }

    /// Sequence number the next frame will carry
    pub fn peek(&self) -> u32 {
        self.next
    }
}
