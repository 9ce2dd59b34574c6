//! Administrative grouping of endpoints and the sessions reachable through
//! them.

use crate::{
    Error, SessionConfig,
    codec::CodecMap,
    depacketizer::ChunkFlags,
    endpoint::{EndpointWriter, ReceiverEndpoint},
    mixer::Mixer,
    session::ReceiverSession,
};
use core::num;
use rill_proto::{Sample, SampleSpec, packet::{Body, Interface, Protocol}};
use rustc_hash::FxHashMap;
use std::{sync::Arc, time::Instant};

/// One logical receive connection: up to one endpoint per interface kind,
/// and the per-sender sessions fed through them. Slots share nothing.
pub(crate) struct ReceiverSlot {
    endpoints: FxHashMap<Interface, ReceiverEndpoint>,
    sessions: FxHashMap<rill_proto::packet::SenderId, ReceiverSession>,
    n_control: u64,
    n_misrouted: u64,
}

impl ReceiverSlot {
    pub fn new() -> Self {
        Self {
            endpoints: FxHashMap::default(),
            sessions: FxHashMap::default(),
            n_control: 0,
            n_misrouted: 0,
        }
    }

    /// Binds a new endpoint. At most one endpoint per interface kind; the
    /// protocol must be valid on the interface.
    pub fn create_endpoint(
        &mut self,
        iface: Interface,
        proto: Protocol,
        queue_len: num::NonZeroUsize,
        epoch: Instant,
    ) -> Result<EndpointWriter, Error> {
        if proto.interface() != iface {
            return Err(Error::UnsupportedProtocol);
        }
        if self.endpoints.contains_key(&iface) {
            return Err(Error::EndpointExists);
        }

        let (endpoint, writer) = ReceiverEndpoint::new(iface, proto, queue_len, epoch);
        self.endpoints.insert(iface, endpoint);

        log::debug!("slot: bound {iface:?}/{proto:?}");
        Ok(writer)
    }

    /// Unbinds the endpoint on `iface`, if any. Idempotent.
    pub fn delete_endpoint(&mut self, iface: Interface) -> bool {
        let existed = self.endpoints.remove(&iface).is_some();
        if existed {
            log::debug!("slot: unbound {iface:?}");
        }
        existed
    }

    /// Drains every endpoint queue into the session map, creating sessions
    /// for new sender identities on the way.
    pub fn route_packets(
        &mut self,
        config: &SessionConfig,
        out_spec: SampleSpec,
        codecs: &Arc<CodecMap>,
        chunk_frames: num::NonZeroUsize,
    ) {
        let Self {
            endpoints,
            sessions,
            n_control,
            n_misrouted,
        } = self;

        for endpoint in endpoints.values_mut() {
            let iface = endpoint.interface();

            endpoint.pull_packets(|packet| {
                let routable = match (iface, &packet.body) {
                    (Interface::AudioSource, Body::Source(_)) => true,
                    (Interface::AudioRepair, Body::Repair(_)) => true,
                    (Interface::AudioControl, _) => {
                        // no control protocol in the core: count and discard
                        *n_control += 1;
                        false
                    }
                    _ => {
                        *n_misrouted += 1;
                        false
                    }
                };
                if !routable {
                    return;
                }

                let session = match sessions.entry(packet.sender) {
                    std::collections::hash_map::Entry::Occupied(e) => e.into_mut(),
                    std::collections::hash_map::Entry::Vacant(e) => {
                        match ReceiverSession::new(
                            packet.sender,
                            config,
                            out_spec,
                            codecs.clone(),
                            chunk_frames,
                        ) {
                            Ok(session) => e.insert(session),
                            Err(err) => {
                                log::error!("slot: can't create session: {err}");
                                return;
                            }
                        }
                    }
                };

                session.route_packet(packet);
            });
        }
    }

    /// Advances every session by one chunk and accumulates their output.
    pub fn advance(&mut self, mixer: &mut Mixer, out: &mut [Sample], n_channels: usize) -> ChunkFlags {
        let mut flags = ChunkFlags::default();

        for session in self.sessions.values_mut() {
            let scratch = mixer.scratch(out.len());
            flags.merge(session.read(scratch, n_channels));
            mixer.accumulate(out);
        }

        flags
    }

    /// Removes terminal sessions. Runs after mixing, so a session's last
    /// frame is always delivered before it disappears.
    pub fn reap_sessions(&mut self) {
        self.sessions.retain(|sender, session| {
            if session.is_broken() {
                log::info!("slot: reaping session {sender}");
                false
            } else {
                true
            }
        });
    }

    #[inline(always)]
    pub fn n_sessions(&self) -> usize {
        self.sessions.len()
    }

    pub fn clear_sessions(&mut self) {
        self.sessions.clear();
    }
}
