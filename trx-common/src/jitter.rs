//! Jitter buffer for sequence-numbered audio frames
//!
//! A fixed-size ring keyed by sequence number. Frames inside the window
//! `[base, base + capacity)` are held and played out strictly in sequence
//! order, absorbing reordering and loss inside the window. Anything older
//! than `base` or further ahead than the window is rejected: late audio has
//! no value to a real-time listener.
//!
//! The buffer is owned and mutated by exactly one loop (the playout driver,
//! which both ingests and drains it). There is no internal locking.

use std::fmt::Write as _;

use crate::error::SequencingError;

// =============================================================================
// Constants
// =============================================================================

/// Default window size in frames
pub const JITTER_WINDOW: usize = 64;

// =============================================================================
// Push Results
// =============================================================================

/// Successful outcome of [`JitterBuffer::push`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pushed {
    /// Frame stored inside the current window
    Stored,
    /// Buffer was empty and the window was re-anchored at this frame
    Restarted,
}

/// A frame the buffer refused, handed back to the caller
///
/// Ownership never transfers on rejection: whoever pushed the frame gets it
/// back here and decides when to release it.
#[derive(Debug)]
pub struct Rejected<T> {
    /// Why the frame was refused
    pub error: SequencingError,
    /// The frame itself
    pub frame: T,
}

impl<T> Rejected<T> {
    /// Take the frame back, discarding the reason
    pub fn into_frame(self) -> T {
        self.frame
    }
}

// =============================================================================
// Jitter Buffer
// =============================================================================

/// Bounded circular reordering window
///
/// Invariants:
/// - every held sequence number `s` satisfies `base <= s < base + capacity`
///   (in wrapping sequence arithmetic)
/// - the slot for `s` is `(s - base + out) % capacity`
/// - `count` equals the number of occupied slots
#[derive(Debug)]
pub struct JitterBuffer<T> {
    /// Ring of optionally occupied slots
    slots: Box<[Option<T>]>,
    /// Oldest unresolved sequence number
    base: u32,
    /// Ring index of the next frame to emit
    out: usize,
    /// Number of occupied slots
    count: usize,
}

impl<T> JitterBuffer<T> {
    /// Create an empty buffer holding up to `capacity` frames
    ///
    /// # Panics
    /// If `capacity` is zero or does not fit the signed sequence window.
    pub fn new(capacity: usize) -> Self {
        assert!(
            capacity > 0 && capacity <= i32::MAX as usize,
            "jitter window must be between 1 and i32::MAX frames"
        );

        let slots = (0..capacity).map(|_| None).collect();

        Self {
            slots,
            base: 0,
            out: 0,
            count: 0,
        }
    }

    /// Push a frame with the given sequence number
    ///
    /// The first push into an empty buffer always succeeds: if its sequence
    /// number differs from `base` the window is re-anchored there (a sender
    /// restart, or resumption after a gap).
    ///
    /// # Returns
    /// * `Ok(Pushed)` - The buffer now owns the frame
    /// * `Err(Rejected)` - Late, early or duplicate; the frame is returned
    pub fn push(&mut self, seq: u32, frame: T) -> Result<Pushed, Rejected<T>> {
        let mut outcome = Pushed::Stored;

        if self.count == 0 && seq != self.base {
            self.base = seq;
            outcome = Pushed::Restarted;
        } else {
            // Distance from base, read as signed so older frames go negative
            let offset = seq.wrapping_sub(self.base) as i32;
            if offset < 0 {
                return Err(Rejected {
                    error: SequencingError::Late(seq),
                    frame,
                });
            }
            if offset as usize >= self.capacity() {
                return Err(Rejected {
                    error: SequencingError::Early(seq),
                    frame,
                });
            }
        }

        let index = self.slot_index(seq);
        let slot = &mut self.slots[index];

        if slot.is_some() {
            return Err(Rejected {
                error: SequencingError::Duplicate(seq),
                frame,
            });
        }

        *slot = Some(frame);
        self.count += 1;

        Ok(outcome)
    }

    /// Frame at the read cursor, if it has arrived
    ///
    /// `None` means "no data this cycle", not an error.
    pub fn front(&self) -> Option<&T> {
        self.slots[self.out].as_ref()
    }

    /// Release the slot at the read cursor and advance the window by one
    ///
    /// Returns the released frame, if the slot was occupied.
    pub fn pop(&mut self) -> Option<T> {
        let frame = self.slots[self.out].take();
        if frame.is_some() {
            self.count -= 1;
        }

        self.base = self.base.wrapping_add(1);
        self.out = (self.out + 1) % self.capacity();

        frame
    }

    /// Whether the next `count` slots from the read cursor are all occupied
    ///
    /// Used to hold back playout after a restart until enough contiguous
    /// data has arrived.
    pub fn ready(&self, count: usize) -> bool {
        if count > self.capacity() {
            return false;
        }

        (0..count).all(|n| self.slots[(self.out + n) % self.capacity()].is_some())
    }

    /// Whether no frames are held
    pub fn is_empty(&self) -> bool {
        self.count == 0
    }

    /// Number of frames held
    pub fn len(&self) -> usize {
        self.count
    }

    /// Window size in frames
    pub fn capacity(&self) -> usize {
        self.slots.len()
    }

    /// Oldest unresolved sequence number
    pub fn base(&self) -> u32 {
        self.base
    }

    /// Release every held frame and return to the initial state
    pub fn clear(&mut self) {
        self.slots.iter_mut().for_each(|slot| *slot = None);
        self.base = 0;
        self.out = 0;
        self.count = 0;
    }

    /// Occupancy map in playout order: count, then `#` per held frame
    pub fn occupancy(&self) -> String {
        let mut map = String::with_capacity(self.capacity() + 5);
        let _ = write!(map, "{:3} ", self.count);

        for n in 0..self.capacity() {
            let occupied = self.slots[(self.out + n) % self.capacity()].is_some();
            map.push(if occupied { '#' } else { ' ' });
        }

        map
    }

    fn slot_index(&self, seq: u32) -> usize {
        (seq.wrapping_sub(self.base) as usize + self.out) % self.capacity()
    }
}

impl<T> Default for JitterBuffer<T> {
    fn default() -> Self {
        Self::new(JITTER_WINDOW)
    }
}

// =============================================================================
// Tests
// =============================================================================

#[cfg(test)]
mod tests {
    use super::*;

    /// Small deterministic generator so shuffles are reproducible
    struct XorShift(u32);

    impl XorShift {
        fn next(&mut self) -> u32 {
            self.0 ^= self.0 << 13;
            self.0 ^= self.0 >> 17;
            self.0 ^= self.0 << 5;
            self.0
        }
    }

    #[test]
    fn test_new_is_empty() {
        let buffer: JitterBuffer<u32> = JitterBuffer::new(16);
        assert!(buffer.is_empty());
        assert_eq!(buffer.len(), 0);
        assert_eq!(buffer.capacity(), 16);
        assert_eq!(buffer.base(), 0);
        assert!(buffer.front().is_none());
    }

    #[test]
    fn test_first_push_sets_base() {
        let mut buffer = JitterBuffer::new(8);
        assert_eq!(buffer.push(1000, "a").unwrap(), Pushed::Restarted);
        assert_eq!(buffer.base(), 1000);
        assert_eq!(buffer.front(), Some(&"a"));
    }

    #[test]
    fn test_first_push_at_base_is_stored() {
        let mut buffer = JitterBuffer::new(8);
        assert_eq!(buffer.push(0, "a").unwrap(), Pushed::Stored);
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_scenario_late_then_fill() {
        let mut buffer = JitterBuffer::new(64);

        assert_eq!(buffer.push(5, 5).unwrap(), Pushed::Restarted);
        assert_eq!(buffer.base(), 5);

        let rejected = buffer.push(3, 3).unwrap_err();
        assert_eq!(rejected.error, SequencingError::Late(3));
        assert_eq!(rejected.into_frame(), 3);

        assert_eq!(buffer.push(6, 6).unwrap(), Pushed::Stored);
        assert_eq!(buffer.front(), Some(&5));
        assert_eq!(buffer.pop(), Some(5));
        assert_eq!(buffer.pop(), Some(6));
    }

    #[test]
    fn test_late_below_base_after_restart() {
        let mut buffer = JitterBuffer::new(64);
        buffer.push(5, 5).unwrap();

        // 4 is one below base: the window never reaches backwards
        let rejected = buffer.push(4, 4).unwrap_err();
        assert_eq!(rejected.error, SequencingError::Late(4));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_early_at_window_end() {
        let mut buffer = JitterBuffer::new(8);

        buffer.push(0, 0).unwrap();
        assert_eq!(buffer.pop(), Some(0));
        assert_eq!(buffer.base(), 1);

        // Window is now [1, 9)
        for seq in 1..=8 {
            assert_eq!(buffer.push(seq, seq).unwrap(), Pushed::Stored);
        }
        let rejected = buffer.push(9, 9).unwrap_err();
        assert_eq!(rejected.error, SequencingError::Early(9));
        assert_eq!(buffer.len(), 8);
    }

    #[test]
    fn test_duplicate_keeps_first() {
        let mut buffer = JitterBuffer::new(8);

        buffer.push(10, "first").unwrap();
        let rejected = buffer.push(10, "second").unwrap_err();

        assert_eq!(rejected.error, SequencingError::Duplicate(10));
        assert_eq!(rejected.frame, "second");
        assert_eq!(buffer.front(), Some(&"first"));
        assert_eq!(buffer.len(), 1);
    }

    #[test]
    fn test_front_on_hole_is_none() {
        let mut buffer = JitterBuffer::new(8);

        buffer.push(0, 0).unwrap();
        buffer.push(2, 2).unwrap();
        buffer.pop();

        assert!(buffer.front().is_none());
        assert_eq!(buffer.pop(), None);
        assert_eq!(buffer.front(), Some(&2));
    }

    #[test]
    fn test_pop_on_empty_advances_base() {
        let mut buffer: JitterBuffer<u32> = JitterBuffer::new(4);

        assert_eq!(buffer.pop(), None);
        assert_eq!(buffer.base(), 1);
        assert!(buffer.is_empty());
    }

    #[test]
    fn test_ready() {
        let mut buffer = JitterBuffer::new(8);

        assert!(buffer.ready(0));
        buffer.push(0, 0).unwrap();
        buffer.push(1, 1).unwrap();
        buffer.push(3, 3).unwrap();

        assert!(buffer.ready(1));
        assert!(buffer.ready(2));
        assert!(!buffer.ready(3));

        buffer.push(2, 2).unwrap();
        assert!(buffer.ready(4));
        assert!(!buffer.ready(5));
        assert!(!buffer.ready(9));
    }

    #[test]
    fn test_ready_wraps_around_ring() {
        let mut buffer = JitterBuffer::new(4);

        for seq in 0..3 {
            buffer.push(seq, seq).unwrap();
            buffer.pop();
        }

        // Read cursor is at ring index 3, so the window wraps
        for seq in 3..7 {
            buffer.push(seq, seq).unwrap();
        }
        assert!(buffer.ready(4));
    }

    #[test]
    fn test_restart_after_drain() {
        let mut buffer = JitterBuffer::new(8);

        buffer.push(0, 0).unwrap();
        buffer.pop();
        assert!(buffer.is_empty());

        // Sender restarted far away; an empty buffer follows it
        assert_eq!(buffer.push(500, 500).unwrap(), Pushed::Restarted);
        assert_eq!(buffer.base(), 500);
        assert_eq!(buffer.pop(), Some(500));
    }

    #[test]
    fn test_sequence_wraparound() {
        let mut buffer = JitterBuffer::new(8);

        buffer.push(u32::MAX - 1, 1).unwrap();
        buffer.push(u32::MAX, 2).unwrap();
        buffer.push(0, 3).unwrap();
        buffer.push(1, 4).unwrap();

        assert_eq!(buffer.pop(), Some(1));
        assert_eq!(buffer.pop(), Some(2));
        assert_eq!(buffer.pop(), Some(3));
        assert_eq!(buffer.base(), 1);

        let rejected = buffer.push(u32::MAX, 9).unwrap_err();
        assert_eq!(rejected.error, SequencingError::Late(u32::MAX));
        assert_eq!(buffer.pop(), Some(4));
    }

    #[test]
    fn test_reorder_within_window_plays_in_order() {
        let mut rng = XorShift(0x2545_f491);

        for _ in 0..50 {
            let mut buffer = JitterBuffer::new(32);
            let mut order: Vec<u32> = (100..132).collect();
            // Keep 100 first so the restart anchors the window at the lowest frame
            for i in (2..order.len()).rev() {
                let j = 1 + (rng.next() as usize % i);
                order.swap(i, j);
            }

            for &seq in &order {
                buffer.push(seq, seq).unwrap();
            }

            let played: Vec<u32> = (0..32).filter_map(|_| buffer.pop()).collect();
            let expected: Vec<u32> = (100..132).collect();
            assert_eq!(played, expected);
        }
    }

    #[test]
    fn test_random_arrivals_pop_at_base() {
        let mut rng = XorShift(7);
        let mut buffer = JitterBuffer::new(JITTER_WINDOW);
        let mut played = 0;
        let total = 400u32;

        for n in 0..total {
            let base = buffer.base();
            if let Some(seq) = buffer.pop() {
                assert_eq!(seq, base);
                played += 1;
            }

            // Scatter a handful of arrivals ahead of the playout point
            for _ in 0..8 {
                let seq = n + rng.next() % (total - n);
                let _ = buffer.push(seq, seq);
            }
            assert!(buffer.len() <= buffer.capacity());
        }

        assert!(played > 0);
    }

    #[test]
    fn test_clear() {
        let mut buffer = JitterBuffer::new(8);

        buffer.push(40, 40).unwrap();
        buffer.push(41, 41).unwrap();
        buffer.clear();

        assert!(buffer.is_empty());
        assert_eq!(buffer.base(), 0);
        assert!(buffer.front().is_none());

        assert_eq!(buffer.push(7, 7).unwrap(), Pushed::Restarted);
        assert_eq!(buffer.base(), 7);
    }

    #[test]
    fn test_occupancy_map() {
        let mut buffer = JitterBuffer::new(6);

        buffer.push(10, ()).unwrap();
        buffer.push(12, ()).unwrap();
        buffer.push(13, ()).unwrap();

        assert_eq!(buffer.occupancy(), "  3 # ##  ");
    }

    #[test]
    #[should_panic]
    fn test_zero_capacity_panics() {
        let _buffer: JitterBuffer<()> = JitterBuffer::new(0);
    }
}
