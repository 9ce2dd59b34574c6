//! Error taxonomy of the receiver pipeline.
//!
//! Transient data-plane trouble (overflow, malformed packets, unrecoverable
//! blocks) is absorbed where it happens: logged, counted, and turned into
//! silence or dropped packets. Only control-plane operations and
//! construction surface errors to the caller.

use thiserror::Error;

/// Errors surfaced by construction and by control-plane tasks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum Error {
    /// A task or constructor was handed parameters it cannot act on.
    /// Completes the task unsuccessfully with no side effect.
    #[error("invalid argument: {0}")]
    InvalidArgument(&'static str),

    /// The slot handle does not name a live slot (it was deleted, or never
    /// existed).
    #[error("unknown slot")]
    UnknownSlot,

    /// The slot already has an endpoint on that interface.
    #[error("interface already bound on this slot")]
    EndpointExists,

    /// The protocol cannot be spoken on the requested interface.
    #[error("protocol not valid for this interface")]
    UnsupportedProtocol,

    /// The loop was torn down (or the task went stale) before the task ran.
    #[error("task cancelled")]
    Cancelled,
}

/// Result of writing a packet through an [`EndpointWriter`].
///
/// [`EndpointWriter`]: crate::EndpointWriter
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum WriteError {
    /// The endpoint queue is full; the packet was dropped and counted.
    #[error("endpoint queue full")]
    QueueFull,

    /// The endpoint was deleted; the packet was discarded without effect.
    #[error("endpoint deleted")]
    EndpointGone,
}
