//! The top-level aggregate: slots, mixer, and the frame-reader surface.

use crate::{
    Error, FrameSource, ReceiverConfig, SourceState,
    codec::CodecMap,
    depacketizer::ChunkFlags,
    endpoint::EndpointWriter,
    mixer::Mixer,
    slot::ReceiverSlot,
};
use rill_proto::{
    Frame, FrameFlags, NtpTimestamp, SILENCE, Sample, SampleSpec,
    packet::{Interface, Protocol},
};
use rustc_hash::FxHashMap;
use std::time::Instant;

/// Opaque name of one slot. Stays unique for the life of the source; a
/// handle whose slot was deleted simply stops resolving.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SlotHandle(u64);

/// The receiver pipeline behind the task loop: owns the slots, routes and
/// mixes, and implements the frame-reader contract.
///
/// The source is clockless ([`has_clock`] is `false`) and does not process
/// tasks; [`crate::ReceiverLoop`] wraps it with pacing and the task
/// scheduler. It can also be driven directly in tests and single-threaded
/// tools.
///
/// [`has_clock`]: FrameSource::has_clock
pub struct ReceiverSource {
    config: ReceiverConfig,
    codecs: std::sync::Arc<CodecMap>,

    slots: FxHashMap<u64, ReceiverSlot>,
    next_slot: u64,

    mixer: Mixer,
    /// Frames produced since start (or the last restart).
    position: u64,
    paused: bool,
    last_reclock: Option<NtpTimestamp>,
    /// Epoch for packet receive stamps.
    epoch: Instant,
}

impl ReceiverSource {
    pub fn new(config: ReceiverConfig, codecs: CodecMap) -> Result<Self, Error> {
        config.validate()?;

        Ok(Self {
            config,
            codecs: std::sync::Arc::new(codecs),
            slots: FxHashMap::default(),
            next_slot: 0,
            mixer: Mixer::new(),
            position: 0,
            paused: false,
            last_reclock: None,
            epoch: Instant::now(),
        })
    }

    #[inline(always)]
    pub fn config(&self) -> &ReceiverConfig {
        &self.config
    }

    /// Frames produced since start.
    #[inline(always)]
    pub fn position(&self) -> u64 {
        self.position
    }

    // --- control plane, called by the task loop under the pipeline lock ---

    pub fn create_slot(&mut self) -> SlotHandle {
        let id = self.next_slot;
        self.next_slot += 1;
        self.slots.insert(id, ReceiverSlot::new());

        log::debug!("source: created slot {id}");
        SlotHandle(id)
    }

    /// Destroys the slot with every endpoint and session in it.
    pub fn delete_slot(&mut self, handle: SlotHandle) -> Result<(), Error> {
        match self.slots.remove(&handle.0) {
            Some(_) => {
                log::debug!("source: deleted slot {}", handle.0);
                Ok(())
            }
            None => Err(Error::UnknownSlot),
        }
    }

    pub fn create_endpoint(
        &mut self,
        handle: SlotHandle,
        iface: Interface,
        proto: Protocol,
    ) -> Result<EndpointWriter, Error> {
        let slot = self.slots.get_mut(&handle.0).ok_or(Error::UnknownSlot)?;
        slot.create_endpoint(iface, proto, self.config.endpoint_queue_len, self.epoch)
    }

    /// Removes the endpoint on `iface` of the slot, if it exists. Deleting
    /// an endpoint twice is a no-op.
    pub fn delete_endpoint(&mut self, handle: SlotHandle, iface: Interface) -> Result<(), Error> {
        let slot = self.slots.get_mut(&handle.0).ok_or(Error::UnknownSlot)?;
        slot.delete_endpoint(iface);
        Ok(())
    }

    // --- data plane ---

    /// Produces one sub-frame chunk: routes pending packets, advances every
    /// session, mixes, reaps.
    pub(crate) fn read_chunk(&mut self, out: &mut [Sample]) -> FrameFlags {
        out.fill(SILENCE);

        if self.paused {
            return FrameFlags::default();
        }

        let n_channels = self.config.output.n_channels().get() as usize;
        let mut flags = ChunkFlags::default();

        for slot in self.slots.values_mut() {
            slot.route_packets(
                &self.config.session,
                self.config.output,
                &self.codecs,
                self.config.quantum_frames,
            );
            flags.merge(slot.advance(&mut self.mixer, out, n_channels));
        }

        self.mixer.finish(out);

        for slot in self.slots.values_mut() {
            slot.reap_sessions();
        }

        self.position += (out.len() / n_channels) as u64;

        FrameFlags {
            incomplete: flags.incomplete,
            drops: flags.drops,
        }
    }
}

impl FrameSource for ReceiverSource {
    fn sample_spec(&self) -> SampleSpec {
        self.config.output
    }

    fn has_clock(&self) -> bool {
        false
    }

    fn state(&self) -> SourceState {
        if self.paused {
            SourceState::Paused
        } else if self.slots.values().any(|s| s.n_sessions() > 0) {
            SourceState::Playing
        } else {
            SourceState::Idle
        }
    }

    fn pause(&mut self) {
        self.paused = true;
    }

    fn resume(&mut self) -> bool {
        self.paused = false;
        true
    }

    fn restart(&mut self) -> bool {
        for slot in self.slots.values_mut() {
            slot.clear_sessions();
        }
        self.position = 0;
        self.paused = false;
        true
    }

    fn reclock(&mut self, timestamp: NtpTimestamp) {
        log::trace!("source: reclock to {timestamp}");
        self.last_reclock = Some(timestamp);
    }

    fn read(&mut self, frame: &mut Frame) -> bool {
        frame.set_position(self.position);

        let flags = self.read_chunk(frame.samples_mut());
        frame.set_flags(flags);
        frame.set_capture(self.last_reclock);

        true
    }
}
