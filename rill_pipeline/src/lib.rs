//! A task-scheduled, dual-clock audio receiver pipeline.
//!
//! This crate implements the receive side of a low-latency audio streaming
//! system: network threads push parsed packets through per-endpoint writer
//! handles, and a sound-output thread pulls mixed frames through the
//! [`FrameSource`] contract, each on its own clock.
//!
//! ## Scope
//!
//! - Packet routing from endpoints into per-sender sessions
//! - Loss repair (XOR-parity FEC), reordering, and deduplication
//! - Timestamp-aligned depacketizing with silence insertion
//! - Latency-driven variable-rate resampling to absorb clock drift
//! - Per-session supervision (starvation and broken-playback watchdogs)
//! - Mixing of concurrent sessions into one output stream
//! - A cooperative task loop so any thread can mutate the control plane
//!   (slots, endpoints) without ever blocking the audio path
//!
//! This crate is intentionally transport- and backend-agnostic: it does not
//! open sockets or talk to sound hardware. Transports feed it through
//! [`EndpointWriter`]; outputs drain it through [`FrameSource`].
//!
//! ## Entry point
//!
//! Construct a [`ReceiverLoop`], hand clones of its [`PipelineHandle`] to
//! the control plane, and drive `read` from the output thread:
//!
//! - [`PipelineHandle::schedule`] / [`PipelineHandle::schedule_and_wait`]
//!   create and delete slots and endpoints from any thread.
//! - [`FrameSource::read`] produces one frame, draining pending tasks at
//!   sub-frame boundaries.

mod config;
pub use config::*;

mod error;
pub use error::*;

mod sndio;
pub use sndio::*;

mod rloop;
pub use rloop::*;

mod endpoint;
pub use endpoint::{EndpointStats, EndpointWriter};

pub mod codec;
pub mod fec;

mod depacketizer;
mod latency;
mod mixer;
mod resampler;
mod session;
mod slot;
mod sorted_queue;
mod source;
mod watchdog;

pub use source::{ReceiverSource, SlotHandle};
