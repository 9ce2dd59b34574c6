//! Owned audio frames as delivered to sound-output collaborators.

use super::{NtpTimestamp, SILENCE, Sample, SampleSpec, StreamPosition};
use alloc::{vec, vec::Vec};

/// Quality flags attached to a produced frame.
///
/// Both flags describe degradation that occurred while the frame was being
/// produced; a clean frame carries neither.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameFlags {
    /// Part of the frame is filler not attributable to a detected gap:
    /// the pre-stream region before a session's first packet, or buffer
    /// starvation.
    pub incomplete: bool,
    /// Silence was inserted for a detected gap in the stream, or a packet
    /// had to be dropped while producing the frame.
    pub drops: bool,
}

impl FrameFlags {
    #[inline(always)]
    pub const fn merge(&mut self, other: Self) {
        self.incomplete |= other.incomplete;
        self.drops |= other.drops;
    }

    #[inline(always)]
    pub const fn is_clean(&self) -> bool {
        !self.incomplete && !self.drops
    }
}

/// An owned buffer of interleaved samples plus the metadata describing it.
///
/// The buffer length is fixed at construction and is always a whole number of
/// frames. Consumers allocate the frame at the size they want served and pass
/// it to the pipeline's `read`, which fills the buffer in place and updates
/// the metadata.
#[derive(Debug, Clone)]
pub struct Frame {
    samples: Vec<Sample>,
    spec: SampleSpec,
    position: StreamPosition,
    capture: Option<NtpTimestamp>,
    flags: FrameFlags,
}

impl Frame {
    /// Allocates a silent frame of `n_frames` frames.
    pub fn silent(spec: SampleSpec, n_frames: usize) -> Self {
        Self {
            samples: vec![SILENCE; spec.n_samples(n_frames)],
            spec,
            position: 0,
            capture: None,
            flags: FrameFlags::default(),
        }
    }

    #[inline(always)]
    pub const fn spec(&self) -> SampleSpec {
        self.spec
    }

    #[inline(always)]
    pub fn n_frames(&self) -> usize {
        self.spec.n_frames(self.samples.len())
    }

    #[inline(always)]
    pub fn samples(&self) -> &[Sample] {
        &self.samples
    }

    #[inline(always)]
    pub fn samples_mut(&mut self) -> &mut [Sample] {
        &mut self.samples
    }

    /// Stream position of the first frame in the buffer, in frames since the
    /// output stream started.
    #[inline(always)]
    pub const fn position(&self) -> StreamPosition {
        self.position
    }

    #[inline(always)]
    pub const fn set_position(&mut self, position: StreamPosition) {
        self.position = position;
    }

    /// Capture time of the frame's tail in the network clock domain, if the
    /// producer knows it.
    #[inline(always)]
    pub const fn capture(&self) -> Option<NtpTimestamp> {
        self.capture
    }

    #[inline(always)]
    pub const fn set_capture(&mut self, capture: Option<NtpTimestamp>) {
        self.capture = capture;
    }

    #[inline(always)]
    pub const fn flags(&self) -> FrameFlags {
        self.flags
    }

    #[inline(always)]
    pub const fn set_flags(&mut self, flags: FrameFlags) {
        self.flags = flags;
    }
}
