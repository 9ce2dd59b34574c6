//! Latency measurement and the frequency controller driving the resampler.

/// Proportional-integral controller producing a bounded scaling factor from
/// a normalized latency error.
pub(crate) struct FreqController {
    gain_p: f64,
    gain_i: f64,
    accum: f64,
    min: f64,
    max: f64,
}

impl FreqController {
    pub fn new(gain_p: f64, gain_i: f64, min: f64, max: f64) -> Self {
        Self {
            gain_p,
            gain_i,
            accum: 0.,
            min,
            max,
        }
    }

    /// Feeds one normalized error sample (`(actual - target) / target`) and
    /// returns the clamped scaling factor.
    pub fn update(&mut self, err: f64) -> f64 {
        self.accum += err;

        // keep the integral term inside the range it can ever act on
        let accum_limit = (self.max - self.min) / self.gain_i.abs().max(f64::MIN_POSITIVE);
        self.accum = self.accum.clamp(-accum_limit, accum_limit);

        (1. + self.gain_p * err + self.gain_i * self.accum).clamp(self.min, self.max)
    }
}

/// Watches a session's buffered latency, drives the resampler scaling, and
/// declares the session broken when the latency leaves the safety band for
/// too long.
pub(crate) struct LatencyMonitor {
    /// All in frames of stream time.
    target: u64,
    band_min: u64,
    band_max: u64,
    band_timeout: u64,

    out_of_band_run: u64,
    /// Band enforcement starts only once the latency first reached the
    /// target; a freshly created session is legitimately under-buffered.
    reached_target: bool,

    controller: FreqController,
    last_latency: u64,
    last_scaling: f64,
}

impl LatencyMonitor {
    pub fn new(target: u64, tolerance: u64, band_timeout: u64, controller: FreqController) -> Self {
        Self {
            target,
            band_min: target.saturating_sub(tolerance),
            band_max: target + tolerance,
            band_timeout,
            out_of_band_run: 0,
            reached_target: false,
            controller,
            last_latency: 0,
            last_scaling: 1.,
        }
    }

    /// Accounts the current buffered latency after producing `n_frames`
    /// frames. Returns the scaling factor to apply, or `None` when the
    /// latency stayed outside the band past the timeout.
    pub fn update(&mut self, latency: u64, n_frames: u64) -> Option<f64> {
        self.last_latency = latency;

        if latency >= self.target {
            self.reached_target = true;
        }

        if self.reached_target && !(self.band_min..=self.band_max).contains(&latency) {
            self.out_of_band_run += n_frames;
            if self.out_of_band_run > self.band_timeout {
                log::debug!(
                    "latency monitor: {latency} frames outside [{}, {}] for {} frames",
                    self.band_min,
                    self.band_max,
                    self.out_of_band_run,
                );
                return None;
            }
        } else {
            self.out_of_band_run = 0;
        }

        let err = (latency as f64 - self.target as f64) / self.target as f64;
        self.last_scaling = self.controller.update(err);
        Some(self.last_scaling)
    }

    #[inline(always)]
    pub fn last_latency(&self) -> u64 {
        self.last_latency
    }

    #[inline(always)]
    pub fn last_scaling(&self) -> f64 {
        self.last_scaling
    }
}
