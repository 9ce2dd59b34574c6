//! One remote sender's full decode chain and lifecycle.
//!
//! A session is born `Waiting` when the first packet from a new sender
//! identity shows up, promotes to `Running` once source packets flow, and
//! ends up `Broken` when a supervisor condemns it. `Broken` is terminal:
//! the chain is dropped on the spot, reads produce silence, and the source
//! reaps the carcass at the end of the same read. A sender that comes back
//! later simply gets a fresh session.

use crate::{
    Error, SessionConfig,
    codec::CodecMap,
    depacketizer::{ChunkFlags, Depacketizer},
    fec::FecReader,
    latency::{FreqController, LatencyMonitor},
    resampler::ResamplerReader,
    watchdog::Watchdog,
};
use core::num;
use replace_with::replace_with_or_abort;
use rill_proto::{SILENCE, Sample, SampleSpec, packet::{Body, PacketPtr, SenderId}};
use std::sync::Arc;

struct Chain {
    fec: FecReader,
    depacketizer: Depacketizer,
    resampler: ResamplerReader,
    watchdog: Watchdog,
    monitor: LatencyMonitor,
    /// Newest source timestamp routed into the chain.
    latest_ts: u64,
}

impl Chain {
    fn read(&mut self, out: &mut [Sample]) -> ChunkFlags {
        let Self {
            fec,
            depacketizer,
            resampler,
            ..
        } = self;

        resampler.read(|buf| depacketizer.read(&mut *fec, buf), out)
    }
}

enum State {
    /// No source packet yet; reads produce silence, supervisors are off.
    Waiting(Box<Chain>),
    Running(Box<Chain>),
    /// Terminal. The chain is gone.
    Broken,
}

pub(crate) struct ReceiverSession {
    sender: SenderId,
    state: State,
    n_routed: u64,
}

impl ReceiverSession {
    pub fn new(
        sender: SenderId,
        config: &SessionConfig,
        out_spec: SampleSpec,
        codecs: Arc<CodecMap>,
        chunk_frames: num::NonZeroUsize,
    ) -> Result<Self, Error> {
        let n_channels = out_spec.n_channels().get() as usize;
        let in_spec = SampleSpec::new(config.in_rate, out_spec.n_channels());

        // latency is measured in input-domain frames, supervision in
        // output-domain frames
        let target = in_spec.ns_to_frames(config.target_latency.as_nanos() as u64);
        let tolerance = in_spec.ns_to_frames(config.latency_tolerance.as_nanos() as u64);
        let band_timeout = in_spec.ns_to_frames(config.band_timeout.as_nanos() as u64);
        let max_blank = out_spec.ns_to_frames(config.no_playback_timeout.as_nanos() as u64);
        let max_degraded = out_spec.ns_to_frames(config.broken_playback_timeout.as_nanos() as u64);

        let chain = Chain {
            fec: FecReader::new(config.fec, sender),
            depacketizer: Depacketizer::new(codecs, n_channels),
            resampler: ResamplerReader::new(
                config.enable_resampling,
                config.in_rate,
                out_spec.rate(),
                n_channels,
                chunk_frames.get(),
                config.max_scaling.max(1. / config.min_scaling),
            )?,
            watchdog: Watchdog::new(max_blank, max_degraded),
            monitor: LatencyMonitor::new(
                target,
                tolerance,
                band_timeout,
                FreqController::new(
                    config.scaling_gain_p,
                    config.scaling_gain_i,
                    config.min_scaling,
                    config.max_scaling,
                ),
            ),
            latest_ts: 0,
        };

        log::debug!("session {sender}: created");

        Ok(Self {
            sender,
            state: State::Waiting(Box::new(chain)),
            n_routed: 0,
        })
    }

    #[inline(always)]
    pub fn sender(&self) -> SenderId {
        self.sender
    }

    #[inline(always)]
    pub fn is_broken(&self) -> bool {
        matches!(self.state, State::Broken)
    }

    /// Feeds one packet from this sender into the chain.
    pub fn route_packet(&mut self, packet: PacketPtr) {
        let chain = match &mut self.state {
            State::Waiting(c) | State::Running(c) => c,
            // terminal sessions eat packets silently until reaped
            State::Broken => return,
        };

        self.n_routed += 1;

        let is_source = match &packet.body {
            Body::Source(src) => {
                chain.latest_ts = chain.latest_ts.max(src.timestamp);
                chain.fec.push_source(packet);
                true
            }
            Body::Repair(_) => {
                chain.fec.push_repair(packet);
                false
            }
        };

        if is_source {
            let sender = self.sender;
            replace_with_or_abort(&mut self.state, |state| match state {
                State::Waiting(chain) => {
                    log::debug!("session {sender}: running");
                    State::Running(chain)
                }
                state => state,
            });
        }
    }

    /// Produces the session's next chunk into `out` and runs supervision.
    pub fn read(&mut self, out: &mut [Sample], n_channels: usize) -> ChunkFlags {
        let chain = match &mut self.state {
            State::Running(c) => c,
            State::Waiting(_) | State::Broken => {
                out.fill(SILENCE);
                return ChunkFlags::default();
            }
        };

        let flags = chain.read(out);
        let n_frames = (out.len() / n_channels) as u64;

        let mut alive = chain.watchdog.update(n_frames, flags);

        if alive {
            let latency = chain.latest_ts.saturating_sub(chain.depacketizer.position());
            match chain.monitor.update(latency, n_frames) {
                Some(scaling) => chain.resampler.set_scaling(scaling),
                None => alive = false,
            }
        }

        if !alive {
            let fec = chain.fec.stats();
            let depack = chain.depacketizer.stats();
            log::info!(
                "session {}: terminal (routed {}, repaired {}, unrecovered {}, \
                 dropped {}, latency {} frames, scaling {:.4})",
                self.sender,
                self.n_routed,
                fec.n_repaired,
                fec.n_unrecovered,
                depack.n_dropped_packets,
                chain.monitor.last_latency(),
                chain.monitor.last_scaling(),
            );
            self.state = State::Broken;
        }

        flags
    }
}
