//! Real-time plumbing shared by the receiver pipeline and its transports.
//!
//! This crate provides the pieces that sit on thread boundaries: bounded
//! lock-free packet queues for the network-to-pipeline hop, and a
//! monotonic-clock ticker for pacing consumers that have no hardware clock.
//!
//! Re-exports [`rtrb`] for convenience.

pub mod queue;

mod ticker;
pub use ticker::*;

pub use rtrb;
