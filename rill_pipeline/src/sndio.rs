//! The frame-reader contract exposed to sound-output collaborators.

use rill_proto::{Frame, NtpTimestamp, SampleSpec};

/// Coarse activity state of a frame source.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SourceState {
    /// The source is running and producing some sound.
    Playing,
    /// The source is running but every session is silent or gone. It is
    /// producing silence and may be safely paused.
    Idle,
    /// The source is paused and not advancing.
    Paused,
}

/// Anything a sound output can pull frames from.
///
/// The receiver pipeline implements this; file writers, device sinks and
/// test harnesses consume it.
pub trait FrameSource {
    /// Sample spec of produced frames. Constant after construction.
    fn sample_spec(&self) -> SampleSpec;

    /// Whether the source paces itself. When `false`, the consumer is
    /// expected to call [`read`](Self::read) at its own rate.
    fn has_clock(&self) -> bool;

    fn state(&self) -> SourceState;

    /// Pause reading. While paused, `read` produces silence and sessions do
    /// not advance.
    fn pause(&mut self);

    /// Resume paused reading. Returns `false` if an error occurred.
    fn resume(&mut self) -> bool;

    /// Restart reading from the beginning: clears all sessions and resets
    /// the stream clock. Resumes automatically if paused. Returns `false`
    /// if an error occurred.
    fn restart(&mut self) -> bool;

    /// Adjust the source clock to match the consumer clock. `timestamp` is
    /// the NTP-domain time when the tail of the last frame read will
    /// actually be played.
    fn reclock(&mut self, timestamp: NtpTimestamp);

    /// Produces the next frame into `frame`. Returns `false` only on fatal
    /// pipeline invalidation.
    fn read(&mut self, frame: &mut Frame) -> bool;
}
