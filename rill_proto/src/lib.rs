#![no_std]
//! Data model for a low-latency audio streaming receiver.
//!
//! This crate defines the passive types exchanged between a receiver pipeline
//! and its collaborators: network transports on one side, sound outputs on the
//! other.
//!
//! ## Roles
//!
//! - **Transports** parse datagrams into [`packet::Packet`] values and hand
//!   them to the pipeline through its writer handles.
//! - **Sound outputs** pull [`Frame`]s from the pipeline on their own clock.
//!
//! ## Model
//!
//! The types fall into three broad categories:
//!
//! - **Stream description** — [`SampleSpec`] and the `Sample` type govern how
//!   a frame's buffer is interpreted.
//! - **Packets** — tagged carriers of compressed or raw audio
//!   ([`packet::Body::Source`]) and of forward-error-correction parity
//!   ([`packet::Body::Repair`]), keyed by a [`packet::SenderId`].
//! - **Wire headers** — a compact [`postcard`]-based representation of the
//!   built-in protocol, in the [`wire`] module. The pipeline itself is
//!   format-agnostic; transports are free to bypass [`wire`] entirely and
//!   build packets from any representation they can parse.
//!
//! All timestamps that describe stream positions are expressed in **frames**
//! (per-channel sample ticks) at the stream's rate. Receive timestamps are
//! nanoseconds in the receiver's monotonic clock domain.
//!
//! The types in this crate already implement `serde`'s `Serialize` and
//! `Deserialize` traits where they appear on the wire, for the user to
//! conveniently plug into other `serde` backends.

extern crate alloc;

pub mod packet;
pub mod wire;

mod frame;
pub use frame::*;

use core::num;

/// The in-memory sample type. Interleaved, one `Sample` per channel per frame.
pub type Sample = f32;

/// The value of a silent sample.
pub const SILENCE: Sample = 0.;

/// A timestamp in the NTP domain, handed back by the consumer through
/// `reclock` to describe when delivered audio is actually played.
pub type NtpTimestamp = u64;

/// A stream position, in frames since the start of the stream.
pub type StreamPosition = u64;

/// Describes the interpretation of a frame buffer. May have more fields in
/// the future.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SampleSpec {
    rate: num::NonZeroU32,
    n_channels: num::NonZeroU16,
}

impl SampleSpec {
    pub const fn new(rate: num::NonZeroU32, n_channels: num::NonZeroU16) -> Self {
        Self { rate, n_channels }
    }

    /// Sample rate, in frames per second.
    #[inline(always)]
    pub const fn rate(&self) -> num::NonZeroU32 {
        self.rate
    }

    #[inline(always)]
    pub const fn n_channels(&self) -> num::NonZeroU16 {
        self.n_channels
    }

    /// Number of interleaved samples making up `n_frames` frames.
    #[inline(always)]
    pub const fn n_samples(&self, n_frames: usize) -> usize {
        n_frames * self.n_channels.get() as usize
    }

    /// Number of whole frames contained in a buffer of `n_samples` samples.
    #[inline(always)]
    pub const fn n_frames(&self, n_samples: usize) -> usize {
        n_samples / self.n_channels.get() as usize
    }

    /// Converts a duration in nanoseconds to a frame count, rounding down.
    #[inline(always)]
    pub const fn ns_to_frames(&self, ns: u64) -> u64 {
        (ns as u128 * self.rate.get() as u128 / 1_000_000_000) as u64
    }

    /// Converts a frame count to a duration in nanoseconds, rounding down.
    #[inline(always)]
    pub const fn frames_to_ns(&self, frames: u64) -> u64 {
        (frames as u128 * 1_000_000_000 / self.rate.get() as u128) as u64
    }
}
