//! Bounded packet queues for crossing the network-to-pipeline boundary.
//!
//! One queue per endpoint: the network thread pushes, the pipeline pops.
//! Pushing never blocks; when the ring is full the packet is dropped and
//! counted, and it is the producer's business to report that.

use core::{
    num,
    sync::atomic::{AtomicU64, Ordering},
};
use rill_proto::packet::PacketPtr;
use std::sync::Arc;

/// Creates a bounded SPSC packet queue with `capacity` slots.
pub fn packet_queue(capacity: num::NonZeroUsize) -> (PacketSender, PacketReceiver) {
    let (tx, rx) = rtrb::RingBuffer::new(capacity.get());
    let dropped = Arc::new(AtomicU64::new(0));

    (
        PacketSender {
            tx,
            dropped: dropped.clone(),
        },
        PacketReceiver { rx, dropped },
    )
}

/// The producing half of a packet queue. Owned by one network thread.
pub struct PacketSender {
    tx: rtrb::Producer<PacketPtr>,
    dropped: Arc<AtomicU64>,
}

impl PacketSender {
    /// Enqueues a packet. On overflow the packet is returned to the caller
    /// and the drop counter is incremented.
    #[inline]
    pub fn push(&mut self, packet: PacketPtr) -> Result<(), PacketPtr> {
        match self.tx.push(packet) {
            Ok(()) => Ok(()),
            Err(rtrb::PushError::Full(packet)) => {
                self.dropped.fetch_add(1, Ordering::Relaxed);
                Err(packet)
            }
        }
    }

    /// Whether the consuming half has been dropped.
    #[inline(always)]
    pub fn is_abandoned(&self) -> bool {
        self.tx.is_abandoned()
    }

    /// Total packets dropped on overflow so far.
    #[inline(always)]
    pub fn n_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }

    #[inline(always)]
    pub fn n_free_slots(&self) -> usize {
        self.tx.slots()
    }
}

/// The consuming half of a packet queue. Owned by the pipeline.
pub struct PacketReceiver {
    rx: rtrb::Consumer<PacketPtr>,
    dropped: Arc<AtomicU64>,
}

impl PacketReceiver {
    #[inline]
    pub fn pop(&mut self) -> Option<PacketPtr> {
        self.rx.pop().ok()
    }

    #[inline(always)]
    pub fn is_abandoned(&self) -> bool {
        self.rx.is_abandoned()
    }

    /// Total packets the producer dropped on overflow so far.
    #[inline(always)]
    pub fn n_dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}
