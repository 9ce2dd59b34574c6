//! A sequence-ordered, deduplicating packet queue.

use rill_proto::packet::{PacketPtr, Seq};
use std::collections::BTreeMap;

/// Stores source packets keyed by sequence number and yields them in strict
/// ascending order, each number at most once.
///
/// A low-water mark tracks the last sequence handed out; packets at or
/// below it are rejected as late arrivals.
#[derive(Default)]
pub struct SortedQueue {
    packets: BTreeMap<Seq, PacketPtr>,
    /// Next sequence number this queue may still yield.
    floor: Seq,
    n_late: u64,
    n_duplicate: u64,
}

impl SortedQueue {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inserts a source packet. Late and duplicate packets are rejected and
    /// counted; returns whether the packet was stored.
    pub fn push(&mut self, packet: PacketPtr) -> bool {
        let seq = match packet.source() {
            Some(s) => s.seq,
            None => return false,
        };

        if seq < self.floor {
            self.n_late += 1;
            return false;
        }

        if self.packets.contains_key(&seq) {
            self.n_duplicate += 1;
            return false;
        }

        self.packets.insert(seq, packet);
        true
    }

    /// Sequence number of the oldest stored packet.
    #[inline(always)]
    pub fn head_seq(&self) -> Option<Seq> {
        self.packets.keys().next().copied()
    }

    /// Removes and returns the oldest stored packet, advancing the
    /// low-water mark past it.
    pub fn pop(&mut self) -> Option<PacketPtr> {
        let (seq, packet) = self.packets.pop_first()?;
        self.floor = seq + 1;
        Some(packet)
    }

    /// Raises the low-water mark to `floor`, discarding any stored packets
    /// below it.
    pub fn advance_to(&mut self, floor: Seq) {
        if floor <= self.floor {
            return;
        }
        self.floor = floor;
        while self
            .packets
            .first_key_value()
            .is_some_and(|(&seq, _)| seq < floor)
        {
            self.packets.pop_first();
            self.n_late += 1;
        }
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.packets.is_empty()
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.packets.len()
    }

    #[inline(always)]
    pub fn n_late(&self) -> u64 {
        self.n_late
    }

    #[inline(always)]
    pub fn n_duplicate(&self) -> u64 {
        self.n_duplicate
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_proto::packet::{Body, Packet, PayloadId, SenderId, SourcePacket};
    use std::sync::Arc;

    fn pkt(seq: Seq) -> PacketPtr {
        Arc::new(Packet {
            sender: SenderId {
                addr: "10.0.0.1:5000".parse().unwrap(),
                ssrc: 9,
            },
            rx_nanos: 0,
            body: Body::Source(SourcePacket {
                seq,
                timestamp: seq * 480,
                payload_id: PayloadId::PCM_F32,
                payload: Vec::new(),
            }),
        })
    }

    #[test]
    fn yields_in_order_despite_reordered_input() {
        let mut q = SortedQueue::new();
        for seq in [3, 0, 2, 1] {
            assert!(q.push(pkt(seq)));
        }

        let order: Vec<Seq> = std::iter::from_fn(|| q.pop())
            .map(|p| p.source().unwrap().seq)
            .collect();
        assert_eq!(order, [0, 1, 2, 3]);
    }

    #[test]
    fn duplicates_are_rejected() {
        let mut q = SortedQueue::new();
        assert!(q.push(pkt(5)));
        assert!(!q.push(pkt(5)));
        assert_eq!(q.n_duplicate(), 1);
        assert_eq!(q.len(), 1);
    }

    #[test]
    fn late_arrivals_are_rejected() {
        let mut q = SortedQueue::new();
        q.push(pkt(0));
        q.push(pkt(1));
        q.pop();
        q.pop();

        assert!(!q.push(pkt(0)));
        assert!(!q.push(pkt(1)));
        assert_eq!(q.n_late(), 2);
    }

    #[test]
    fn advance_discards_below_floor() {
        let mut q = SortedQueue::new();
        for seq in 0..6 {
            q.push(pkt(seq));
        }
        q.advance_to(4);

        assert_eq!(q.head_seq(), Some(4));
        assert!(!q.push(pkt(3)));
    }
}
