//! One protocol-bound ingress point within a slot, and the writer handle
//! published to network threads.

use crate::WriteError;
use core::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use rill_proto::packet::{Interface, Packet, PacketPtr, Protocol};
use rill_rt::queue::{PacketReceiver, PacketSender, packet_queue};
use std::{
    num,
    sync::Arc,
    time::Instant,
};

/// Counters a transport can read off its writer.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct EndpointStats {
    /// Packets accepted into the queue.
    pub n_written: u64,
    /// Packets dropped because the queue was full.
    pub n_overflowed: u64,
    /// Packets discarded because the endpoint was deleted.
    pub n_discarded: u64,
}

/// The write side of an endpoint, handed to exactly one network thread.
///
/// Writing never blocks and never touches the pipeline lock. The handle
/// stays valid after the endpoint is deleted; writes are then discarded
/// with [`WriteError::EndpointGone`] and no other effect.
pub struct EndpointWriter {
    tx: PacketSender,
    gone: Arc<AtomicBool>,
    n_written: u64,
    n_discarded: Arc<AtomicU64>,
    /// Receive times are stamped relative to the pipeline epoch.
    epoch: Instant,
}

impl EndpointWriter {
    /// Stamps and enqueues one packet.
    pub fn write(&mut self, mut packet: Packet) -> Result<(), WriteError> {
        if self.gone.load(Ordering::Acquire) {
            self.n_discarded.fetch_add(1, Ordering::Relaxed);
            return Err(WriteError::EndpointGone);
        }

        packet.rx_nanos = self.epoch.elapsed().as_nanos() as u64;

        match self.tx.push(Arc::new(packet)) {
            Ok(()) => {
                self.n_written += 1;
                Ok(())
            }
            Err(_) => Err(WriteError::QueueFull),
        }
    }

    pub fn stats(&self) -> EndpointStats {
        EndpointStats {
            n_written: self.n_written,
            n_overflowed: self.tx.n_dropped(),
            n_discarded: self.n_discarded.load(Ordering::Relaxed),
        }
    }
}

/// The pipeline side of an endpoint. Owned by its slot.
pub(crate) struct ReceiverEndpoint {
    iface: Interface,
    proto: Protocol,
    rx: PacketReceiver,
    gone: Arc<AtomicBool>,
    n_discarded: Arc<AtomicU64>,
}

impl ReceiverEndpoint {
    pub fn new(
        iface: Interface,
        proto: Protocol,
        queue_len: num::NonZeroUsize,
        epoch: Instant,
    ) -> (Self, EndpointWriter) {
        let (tx, rx) = packet_queue(queue_len);
        let gone = Arc::new(AtomicBool::new(false));
        let n_discarded = Arc::new(AtomicU64::new(0));

        let writer = EndpointWriter {
            tx,
            gone: gone.clone(),
            n_written: 0,
            n_discarded: n_discarded.clone(),
            epoch,
        };

        (
            Self {
                iface,
                proto,
                rx,
                gone,
                n_discarded,
            },
            writer,
        )
    }

    #[inline(always)]
    pub fn interface(&self) -> Interface {
        self.iface
    }

    #[inline(always)]
    pub fn protocol(&self) -> Protocol {
        self.proto
    }

    /// Drains every packet currently queued into `sink`.
    pub fn pull_packets(&mut self, mut sink: impl FnMut(PacketPtr)) {
        let dropped_before = self.rx.n_dropped();

        while let Some(packet) = self.rx.pop() {
            sink(packet);
        }

        let dropped = self.rx.n_dropped() - dropped_before;
        if dropped > 0 {
            log::warn!("endpoint {:?}: queue overflowed, {dropped} packets lost", self.iface);
        }
    }
}

impl Drop for ReceiverEndpoint {
    fn drop(&mut self) {
        // flips the writer into discard mode
        self.gone.store(true, Ordering::Release);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_proto::packet::{Body, PayloadId, SenderId, SourcePacket};

    fn packet(seq: u64) -> Packet {
        Packet {
            sender: SenderId {
                addr: "172.16.0.5:8000".parse().unwrap(),
                ssrc: 11,
            },
            rx_nanos: 0,
            body: Body::Source(SourcePacket {
                seq,
                timestamp: seq * 480,
                payload_id: PayloadId::PCM_F32,
                payload: Vec::new(),
            }),
        }
    }

    fn endpoint(queue_len: usize) -> (ReceiverEndpoint, EndpointWriter) {
        ReceiverEndpoint::new(
            Interface::AudioSource,
            Protocol::Pcm,
            num::NonZeroUsize::new(queue_len).unwrap(),
            Instant::now(),
        )
    }

    #[test]
    fn writes_are_stamped_and_delivered_in_order() {
        let (mut ep, mut writer) = endpoint(8);

        for seq in 0..4 {
            writer.write(packet(seq)).unwrap();
        }

        let mut seqs = Vec::new();
        ep.pull_packets(|p| seqs.push(p.source().unwrap().seq));
        assert_eq!(seqs, [0, 1, 2, 3]);
        assert_eq!(writer.stats().n_written, 4);
    }

    #[test]
    fn overflow_is_reported_and_counted() {
        let (_ep, mut writer) = endpoint(2);

        writer.write(packet(0)).unwrap();
        writer.write(packet(1)).unwrap();
        assert_eq!(writer.write(packet(2)), Err(WriteError::QueueFull));
        assert_eq!(writer.stats().n_overflowed, 1);
    }

    #[test]
    fn deleted_endpoint_discards_without_side_effects() {
        let (ep, mut writer) = endpoint(8);
        drop(ep);

        assert_eq!(writer.write(packet(0)), Err(WriteError::EndpointGone));
        assert_eq!(writer.write(packet(1)), Err(WriteError::EndpointGone));

        let stats = writer.stats();
        assert_eq!(stats.n_written, 0);
        assert_eq!(stats.n_discarded, 2);
    }
}
