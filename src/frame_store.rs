// Owns per-time-step `FrameInfo` records in time order, plus the schedule
// that decides when ForwardPass hands a completed range off to the
// Backward worker (SPEC_FULL.md §4.6).
use crate::types::FrameInfo;

pub struct FrameStore {
    frames: Vec<FrameInfo>,
}

impl FrameStore {
    pub fn with_capacity(cap: usize) -> Self {
        FrameStore { frames: Vec::with_capacity(cap) }
    }

    /// Callers that share a `FrameStore` across the Forward/Backward
    /// worker threads (see `engine`) must pre-size it with
    /// `with_capacity(total_frames)` and never exceed that count: a
    /// `Vec` reallocation here, racing against Backward's concurrent
    /// in-place rewrites of earlier frames, would be unsound.
    pub fn push(&mut self, frame: FrameInfo) {
        debug_assert!(
            self.frames.len() < self.frames.capacity(),
            "FrameStore push would reallocate; caller under-reserved capacity"
        );
        self.frames.push(frame);
    }

    /// Grows capacity ahead of a batch of pushes. Only safe to call when
    /// this `FrameStore` is not concurrently shared with a Backward
    /// worker thread (see `push`'s safety note) -- `online` uses this
    /// since chunked decoding never spawns a second thread.
    pub fn reserve(&mut self, additional: usize) {
        self.frames.reserve(additional);
    }

    pub fn len(&self) -> usize {
        self.frames.len()
    }

    pub fn is_empty(&self) -> bool {
        self.frames.is_empty()
    }

    pub fn frame(&self, t: usize) -> &FrameInfo {
        &self.frames[t]
    }

    pub fn frame_mut(&mut self, t: usize) -> &mut FrameInfo {
        &mut self.frames[t]
    }

    pub fn frames(&self) -> &[FrameInfo] {
        &self.frames
    }

    pub fn into_frames(self) -> Vec<FrameInfo> {
        self.frames
    }
}

/// Precomputed signal points for handing frame ranges off to the Backward
/// worker: overlapping windows of `window` frames, `shift` frames apart.
/// The first window is allowed to start before frame 0 (clamped), so the
/// very first handoff still fires once enough frames exist rather than
/// waiting for a full window's worth of memory to accumulate unpruned.
pub struct PruneSchedule {
    window: usize,
    shift: usize,
}

impl PruneSchedule {
    pub fn new(window: usize, shift: usize) -> Self {
        debug_assert!(window > 0 && shift > 0);
        PruneSchedule {
            window,
            // A shift larger than the window would let frames accumulate
            // between handoffs with nothing ever pruning them.
            shift: shift.min(window),
        }
    }

    /// True iff frame `t` is a signal point: ForwardPass should hand off
    /// the range `range_for_signal(t)` to the Backward worker right after
    /// producing frame `t`.
    pub fn should_signal(&self, t: usize) -> bool {
        if t + 1 < self.shift {
            false
        } else {
            (t + 1 - self.shift) % self.shift == 0
        }
    }

    /// The `[begin_t, end_t)` range to prune for a signal at frame `t`.
    pub fn range_for_signal(&self, t: usize) -> (usize, usize) {
        let end_t = t + 1;
        let begin_t = end_t.saturating_sub(self.window);
        (begin_t, end_t)
    }

    /// The final handoff after the forward loop finishes at `total_frames`,
    /// covering whatever tail hasn't yet been pruned by a prior signal.
    pub fn final_range(&self, total_frames: usize, last_signaled_end: usize) -> Option<(usize, usize)> {
        if total_frames > last_signaled_end {
            Some((last_signaled_end, total_frames))
        } else {
            None
        }
    }
}
