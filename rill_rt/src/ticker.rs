//! Monotonic pacing for consumers without a hardware clock.

use core::num;
use std::time::{Duration, Instant};

/// A tick count since the ticker started.
pub type Ticks = u64;

/// Paces a thread at a fixed tick frequency over a monotonic clock.
///
/// The ticker is immune to wall-clock jumps. It starts lazily on the first
/// call to [`elapsed`](Self::elapsed) or [`wait`](Self::wait); starting it
/// twice explicitly is a programming error.
#[derive(Debug)]
pub struct Ticker {
    /// Ticks per nanosecond.
    ratio: f64,
    start: Option<Instant>,
}

impl Ticker {
    /// Creates a stopped ticker running at `freq` ticks per second.
    #[inline(always)]
    pub fn new(freq: num::NonZeroU32) -> Self {
        Self {
            ratio: freq.get() as f64 / 1e9,
            start: None,
        }
    }

    /// Starts the ticker.
    ///
    /// # Panics
    ///
    /// Panics if the ticker was already started.
    pub fn start(&mut self) {
        if self.start.is_some() {
            panic!("ticker: can't start ticker twice");
        }
        self.start = Some(Instant::now());
    }

    /// Returns the number of ticks elapsed since start, starting the ticker
    /// if it is not started yet.
    pub fn elapsed(&mut self) -> Ticks {
        match self.start {
            None => {
                self.start = Some(Instant::now());
                0
            }
            Some(start) => (start.elapsed().as_nanos() as f64 * self.ratio) as Ticks,
        }
    }

    /// Suspends the calling thread until `ticks` have elapsed since start,
    /// starting the ticker if it is not started yet.
    pub fn wait(&mut self, ticks: Ticks) {
        let start = *self.start.get_or_insert_with(Instant::now);

        let deadline = start + Duration::from_nanos((ticks as f64 / self.ratio) as u64);
        let now = Instant::now();

        if deadline > now {
            std::thread::sleep(deadline - now);
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const FREQ: num::NonZeroU32 = num::NonZeroU32::new(1000).unwrap();

    #[test]
    fn auto_starts_at_zero() {
        let mut ticker = Ticker::new(FREQ);
        assert_eq!(ticker.elapsed(), 0);
    }

    #[test]
    fn elapsed_is_monotonic() {
        let mut ticker = Ticker::new(FREQ);
        let a = ticker.elapsed();
        let b = ticker.elapsed();
        assert!(b >= a);
    }

    #[test]
    fn wait_reaches_the_deadline() {
        let mut ticker = Ticker::new(FREQ);
        ticker.wait(20); // 20 ms at 1 kHz
        assert!(ticker.elapsed() >= 20);
    }

    #[test]
    #[should_panic(expected = "can't start ticker twice")]
    fn double_start_panics() {
        let mut ticker = Ticker::new(FREQ);
        ticker.start();
        ticker.start();
    }
}
