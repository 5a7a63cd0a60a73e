//! Page replacement policies for the buffer pool.
//!
//! The replacer tracks which frames are evictable (resident but unpinned)
//! and selects victims when the pool needs a frame. The policy is an open
//! set chosen at pool construction; this crate ships the clock policy.

use super::frame::FrameId;

/// Capability trait for page replacement policies.
///
/// The buffer pool keeps the replacer inside its state mutex and notifies
/// it of pin transitions:
///
/// ```text
/// // pin_count rose from 0
/// replacer.pin(frame_id);
///
/// // pin_count dropped to 0
/// replacer.unpin(frame_id);
///
/// // a fetch miss needs a frame
/// if let Some(victim) = replacer.victim() {
///     // evict the victim frame
/// }
/// ```
///
/// Free (invalid) frames are handed out from the pool's free list and
/// never reach the replacer.
pub trait Replacer: Send {
    /// Selects a victim frame for eviction.
    ///
    /// Returns `None` if every frame is pinned. The returned frame is
    /// removed from the evictable set.
    fn victim(&mut self) -> Option<FrameId>;

    /// Marks a frame as non-evictable. Called when its pin count rises
    /// from 0, and when the frame is invalidated (page freed).
    fn pin(&mut self, frame_id: FrameId);

    /// Marks a frame as evictable. Called when its pin count drops to 0.
    fn unpin(&mut self, frame_id: FrameId);

    /// Returns the number of evictable frames.
    fn size(&self) -> usize;
}

/// Clock (second chance) replacement policy.
///
/// A single hand rotates over the frame table. Each evictable frame
/// carries a reference bit, set when the frame's pin count drops to zero.
/// The hand clears a set reference bit and moves on; a frame whose bit is
/// already clear is chosen. Scanning is bounded to two sweeps so that a
/// fully pinned pool fails instead of spinning: two sweeps guarantee every
/// frame with a set reference bit got its one chance to be cleared before
/// being considered again.
pub struct ClockReplacer {
    slots: Vec<ClockSlot>,
    hand: usize,
}

#[derive(Clone, Copy)]
struct ClockSlot {
    evictable: bool,
    ref_bit: bool,
}

impl ClockReplacer {
    /// Creates a clock replacer covering `num_frames` frames.
    pub fn new(num_frames: usize) -> Self {
        Self {
            slots: vec![
                ClockSlot {
                    evictable: false,
                    ref_bit: false,
                };
                num_frames
            ],
            hand: 0,
        }
    }
}

impl Replacer for ClockReplacer {
    fn victim(&mut self) -> Option<FrameId> {
        let n = self.slots.len();
        if n == 0 {
            return None;
        }

        for _ in 0..2 * n {
            let index = self.hand;
            self.hand = (self.hand + 1) % n;

            let slot = &mut self.slots[index];
            if !slot.evictable {
                continue;
            }
            if slot.ref_bit {
                slot.ref_bit = false;
            } else {
                slot.evictable = false;
                return Some(FrameId::new(index));
            }
        }

        None
    }

    fn pin(&mut self, frame_id: FrameId) {
        self.slots[frame_id.as_usize()].evictable = false;
    }

    fn unpin(&mut self, frame_id: FrameId) {
        let slot = &mut self.slots[frame_id.as_usize()];
        slot.evictable = true;
        // Recently used: give the frame one pass of grace
        slot.ref_bit = true;
    }

    fn size(&self) -> usize {
        self.slots.iter().filter(|s| s.evictable).count()
    }
}
