//! Percent milestones for an indexing run.
//!
//! Sampling occupies 0-80% in proportion to the absolute frame index,
//! clustering starts at 80, persistence at 90 and completion is 100.

pub const OPENING: u8 = 0;
pub const SAMPLING_END: u8 = 80;
pub const CLUSTERING: u8 = 80;
pub const PERSISTING: u8 = 90;
pub const COMPLETE: u8 = 100;

/// Sampling progress for a frame, scaled into `0..=SAMPLING_END`.
pub fn sampling_percent(frame_index: usize, total_frames: usize) -> u8 {
    if total_frames == 0 {
        return OPENING;
    }
    let scaled = frame_index as u128 * SAMPLING_END as u128 / total_frames as u128;
    scaled.min(SAMPLING_END as u128) as u8
}

/// Clamps a stream of percentages so it never decreases and never exceeds
/// 100.
#[derive(Debug, Default)]
pub struct MonotonicProgress {
    last: Option<u8>,
}

impl MonotonicProgress {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn advance(&mut self, percent: u8) -> u8 {
        let p = percent.min(COMPLETE).max(self.last.unwrap_or(0));
        self.last = Some(p);
        p
    }

    pub fn last(&self) -> Option<u8> {
        self.last
    }
}
