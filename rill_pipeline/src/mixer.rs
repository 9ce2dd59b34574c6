//! Sums per-session frames into the output frame.

use rill_proto::{SILENCE, Sample};

/// Accumulates session outputs into one buffer and clamps the sum to the
/// representable sample range.
pub(crate) struct Mixer {
    /// Per-session scratch the sessions render into.
    scratch: Vec<Sample>,
}

impl Mixer {
    pub fn new() -> Self {
        Self {
            scratch: Vec::new(),
        }
    }

    /// Hands out a zeroed scratch buffer of `len` samples.
    pub fn scratch(&mut self, len: usize) -> &mut [Sample] {
        self.scratch.clear();
        self.scratch.resize(len, SILENCE);
        &mut self.scratch
    }

    /// Adds the scratch buffer into `out`.
    pub fn accumulate(&mut self, out: &mut [Sample]) {
        debug_assert_eq!(out.len(), self.scratch.len());
        for (o, s) in out.iter_mut().zip(&self.scratch) {
            *o += s;
        }
    }

    /// Clamps the accumulated sum. Output sample `i` is the clamped sum of
    /// the per-session samples at `i`.
    pub fn finish(&self, out: &mut [Sample]) {
        for o in out {
            *o = o.clamp(-1., 1.);
        }
    }
}
