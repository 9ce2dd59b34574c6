//! Receiver and session configuration.

use crate::Error;
use core::{num, time::Duration};
use rill_proto::SampleSpec;

#[inline(always)]
const fn nz_usize(x: usize) -> num::NonZeroUsize {
    num::NonZeroUsize::new(x).unwrap()
}

#[inline(always)]
const fn nz_u16(x: u16) -> num::NonZeroU16 {
    num::NonZeroU16::new(x).unwrap()
}

/// FEC block geometry a session expects from its sender.
///
/// A block is `n_source` consecutive source packets protected by `n_repair`
/// parity packets; parity packet `i` covers the source positions congruent
/// to `i` modulo `n_repair`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct FecConfig {
    pub n_source: num::NonZeroU16,
    pub n_repair: num::NonZeroU16,
}

impl Default for FecConfig {
    fn default() -> Self {
        Self {
            n_source: nz_u16(20),
            n_repair: nz_u16(1),
        }
    }
}

/// Per-session tuning, applied to every session a receiver creates.
#[derive(Debug, Clone, Copy)]
pub struct SessionConfig {
    /// Nominal input rate of remote streams, in frames per second. Sessions
    /// always carry the receiver's channel count.
    pub in_rate: num::NonZeroU32,

    /// Amount of audio the session tries to keep buffered between the
    /// network boundary and the resampler output.
    pub target_latency: Duration,
    /// Half-width of the latency safety band around the target. Leaving the
    /// band and staying outside marks the session broken.
    pub latency_tolerance: Duration,
    /// How long the latency may stay outside the band before the session is
    /// marked broken.
    pub band_timeout: Duration,

    /// Terminate the session when no packet audio was produced for this
    /// long (stream time).
    pub no_playback_timeout: Duration,
    /// Terminate the session when every frame was degraded (drops or
    /// filler) for this long (stream time).
    pub broken_playback_timeout: Duration,

    /// Run the variable-rate resampler. When disabled the session is a
    /// bit-exact passthrough and the scaling factor is pinned to 1.
    pub enable_resampling: bool,
    /// Bounds for the resampler scaling factor.
    pub min_scaling: f64,
    pub max_scaling: f64,
    /// Proportional and integral gains of the latency controller.
    pub scaling_gain_p: f64,
    pub scaling_gain_i: f64,

    pub fec: FecConfig,
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            in_rate: num::NonZeroU32::new(48_000).unwrap(),
            target_latency: Duration::from_millis(100),
            latency_tolerance: Duration::from_millis(100),
            band_timeout: Duration::from_secs(2),
            no_playback_timeout: Duration::from_secs(2),
            broken_playback_timeout: Duration::from_secs(2),
            enable_resampling: true,
            min_scaling: 0.95,
            max_scaling: 1.05,
            scaling_gain_p: 0.02,
            scaling_gain_i: 0.001,
            fec: FecConfig::default(),
        }
    }
}

/// Top-level receiver configuration.
#[derive(Debug, Clone)]
pub struct ReceiverConfig {
    /// Sample spec of the mixed output.
    pub output: SampleSpec,

    /// Sub-frame unit, in frames: the loop checks the task queue after
    /// producing each quantum.
    pub quantum_frames: num::NonZeroUsize,

    /// Pace `read` at the nominal output rate. Enable when the consumer has
    /// no hardware clock (e.g. writes to a file).
    pub enable_timing: bool,

    /// At most this many tasks are drained at one quantum boundary.
    pub max_tasks_per_quantum: num::NonZeroUsize,
    /// At most this much wall time is spent on tasks at one boundary.
    pub task_time_budget: Duration,

    /// Capacity of each endpoint's packet queue.
    pub endpoint_queue_len: num::NonZeroUsize,

    pub session: SessionConfig,
}

impl Default for ReceiverConfig {
    fn default() -> Self {
        Self {
            output: SampleSpec::new(
                num::NonZeroU32::new(48_000).unwrap(),
                num::NonZeroU16::new(2).unwrap(),
            ),
            quantum_frames: nz_usize(480),
            enable_timing: false,
            max_tasks_per_quantum: nz_usize(16),
            task_time_budget: Duration::from_millis(1),
            endpoint_queue_len: nz_usize(256),
            session: SessionConfig::default(),
        }
    }
}

impl ReceiverConfig {
    /// Rejects configurations the pipeline cannot run with.
    pub fn validate(&self) -> Result<(), Error> {
        let s = &self.session;

        if !(s.min_scaling > 0. && s.min_scaling <= 1. && s.max_scaling >= 1.) {
            return Err(Error::InvalidArgument(
                "scaling bounds must straddle 1.0 and stay positive",
            ));
        }
        if !(s.scaling_gain_p.is_finite() && s.scaling_gain_i.is_finite()) {
            return Err(Error::InvalidArgument("controller gains must be finite"));
        }
        if s.target_latency.is_zero() {
            return Err(Error::InvalidArgument("target latency must be non-zero"));
        }

        Ok(())
    }
}
