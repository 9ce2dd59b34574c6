//! Forward error correction: XOR stripe parity over blocks of source
//! packets.
//!
//! A block is `n_source` consecutive source packets starting at
//! `block_id * n_source`. It is protected by `n_repair` parity units; unit
//! `r` covers the source positions congruent to `r` modulo `n_repair`. Each
//! parity unit is the XOR of `[payload_len: u32-LE][timestamp: u64-LE]
//! [payload, zero-padded]` over the covered positions, so one missing
//! position per stripe is fully reconstructible, timestamp and length
//! included.
//!
//! [`FecReader`] consumes the source and repair streams of one session and
//! emits source packets in strict sequence order, each sequence at most
//! once. Duplicates and late arrivals are dropped. A position is given up
//! (skipped) only once later data proves the stream has moved past it;
//! blocks age out as the reader advances.

use crate::{FecConfig, sorted_queue::SortedQueue};
use core::cmp;
use rill_proto::packet::{Body, Packet, PacketPtr, PayloadId, SenderId, SourcePacket};
use priority_queue::PriorityQueue;
use rustc_hash::{FxBuildHasher, FxHashMap};
use std::sync::Arc;

/// Bytes of the `[len][timestamp]` prefix each parity unit protects.
const PARITY_HEADER_LEN: usize = 12;

/// Counters exposed for session-teardown logging.
#[derive(Debug, Clone, Copy, Default)]
pub struct FecStats {
    /// Source packets reconstructed from parity.
    pub n_repaired: u64,
    /// Source positions given up as lost.
    pub n_unrecovered: u64,
    /// Repair packets rejected (geometry mismatch, bad index, corrupt
    /// parity unit).
    pub n_bad_repair: u64,
}

/// One block currently being emitted.
struct Block {
    id: u64,
    /// Source packets by position. Emitted entries stay resident so stripe
    /// reconstruction can XOR over them.
    slots: Vec<Option<PacketPtr>>,
    /// Next position to emit.
    next: u16,
}

impl Block {
    #[inline(always)]
    fn start_seq(&self, n_source: u16) -> u64 {
        self.id * n_source as u64
    }
}

/// Reassembles one session's source stream from its source and repair
/// packet feeds.
pub struct FecReader {
    geometry: FecConfig,
    sender: SenderId,

    /// Source packets not yet moved into the current block.
    staged: SortedQueue,
    /// Repair units by block, each slot one stripe.
    repairs: FxHashMap<u64, Vec<Option<PacketPtr>>>,
    /// Blocks with buffered repair units, oldest first, for aging out
    /// blocks the reader has advanced past.
    repair_ages: PriorityQueue<u64, cmp::Reverse<u64>, FxBuildHasher>,

    cur: Option<Block>,
    /// Lowest block id that may still become current.
    block_floor: u64,
    started: bool,

    /// Payload type observed on the source stream, used for reconstructed
    /// packets.
    payload_id: Option<PayloadId>,

    stats: FecStats,
}

impl FecReader {
    pub fn new(geometry: FecConfig, sender: SenderId) -> Self {
        Self {
            geometry,
            sender,
            staged: SortedQueue::new(),
            repairs: FxHashMap::default(),
            repair_ages: PriorityQueue::with_hasher(FxBuildHasher),
            cur: None,
            block_floor: 0,
            started: false,
            payload_id: None,
            stats: FecStats::default(),
        }
    }

    #[inline(always)]
    pub fn stats(&self) -> FecStats {
        self.stats
    }

    /// Feeds one source packet.
    pub fn push_source(&mut self, packet: PacketPtr) {
        if let Some(src) = packet.source() {
            self.payload_id.get_or_insert(src.payload_id);
            self.staged.push(packet);
        }
    }

    /// Feeds one repair packet. Units with a geometry other than the
    /// session's, an out-of-range index, or a block the reader already
    /// passed are rejected.
    pub fn push_repair(&mut self, packet: PacketPtr) {
        let Some(rep) = packet.repair() else { return };

        if rep.n_source != self.geometry.n_source || rep.n_repair != self.geometry.n_repair {
            log::debug!(
                "fec: {}: repair block {} advertises {}/{} geometry, session uses {}/{}",
                self.sender,
                rep.block_id,
                rep.n_source,
                rep.n_repair,
                self.geometry.n_source,
                self.geometry.n_repair,
            );
            self.stats.n_bad_repair += 1;
            return;
        }

        if rep.index >= self.geometry.n_repair.get() || rep.parity.len() < PARITY_HEADER_LEN {
            self.stats.n_bad_repair += 1;
            return;
        }

        if rep.block_id < self.block_floor {
            // the reader has moved past this block
            return;
        }

        let slots = self
            .repairs
            .entry(rep.block_id)
            .or_insert_with(|| vec![None; self.geometry.n_repair.get() as usize]);

        let block_id = rep.block_id;
        let slot = &mut slots[rep.index as usize];
        if slot.is_none() {
            *slot = Some(packet);
            self.repair_ages.push(block_id, cmp::Reverse(block_id));
        }
    }

    /// Returns the next source packet in sequence order, reconstructing it
    /// from parity when possible, or `None` when nothing can be emitted
    /// yet.
    pub fn read(&mut self) -> Option<PacketPtr> {
        let n_source = self.geometry.n_source.get();

        loop {
            if self.cur.is_none() {
                let head = self.staged.head_seq()?;
                let id = head / n_source as u64;

                // A joined-in-progress stream starts mid-block; everything
                // before the first packet was never ours to wait for.
                let next = if self.started {
                    0
                } else {
                    (head % n_source as u64) as u16
                };
                self.started = true;

                self.block_floor = id;
                self.staged.advance_to(id * n_source as u64);
                self.expire_repairs();

                self.cur = Some(Block {
                    id,
                    slots: vec![None; n_source as usize],
                    next,
                });
            }

            let block = self.cur.as_mut().unwrap();
            let start = block.start_seq(n_source);
            let end = start + n_source as u64;

            // move staged packets belonging to this block into its slots
            while self.staged.head_seq().is_some_and(|seq| seq < end) {
                let packet = self.staged.pop().unwrap();
                let idx = (packet.source().unwrap().seq - start) as usize;

                if idx >= block.next as usize && block.slots[idx].is_none() {
                    block.slots[idx] = Some(packet);
                }
            }

            while (block.next as usize) < n_source as usize {
                let idx = block.next as usize;

                if block.slots[idx].is_some() {
                    block.next += 1;
                    return block.slots[idx].clone();
                }

                if let Some(packet) = try_repair(
                    &self.geometry,
                    self.sender,
                    self.payload_id,
                    self.repairs.get(&block.id),
                    block,
                    idx,
                    &mut self.stats,
                ) {
                    block.slots[idx] = Some(packet.clone());
                    block.next += 1;
                    self.stats.n_repaired += 1;
                    return Some(packet);
                }

                // Skip the position only once later data proves the stream
                // has moved past it; otherwise keep waiting.
                let later_in_block = block.slots[idx + 1..].iter().any(Option::is_some);
                if later_in_block || !self.staged.is_empty() {
                    log::trace!(
                        "fec: {}: giving up on seq {}",
                        self.sender,
                        start + idx as u64
                    );
                    self.stats.n_unrecovered += 1;
                    block.next += 1;
                    continue;
                }

                return None;
            }

            // block exhausted
            let id = block.id;
            self.cur = None;
            self.block_floor = id + 1;
            self.repairs.remove(&id);
            self.repair_ages.remove(&id);
            self.staged.advance_to((id + 1) * n_source as u64);
        }
    }

    /// Drops buffered repair units for blocks below the floor.
    fn expire_repairs(&mut self) {
        while let Some((id, _)) = self
            .repair_ages
            .pop_if(|_, cmp::Reverse(id)| *id < self.block_floor)
        {
            self.repairs.remove(&id);
        }
    }
}

/// Attempts to reconstruct the source packet at `idx` of `block` from its
/// stripe's parity unit. Requires every other covered position present.
fn try_repair(
    geometry: &FecConfig,
    sender: SenderId,
    payload_id: Option<PayloadId>,
    repairs: Option<&Vec<Option<PacketPtr>>>,
    block: &Block,
    idx: usize,
    stats: &mut FecStats,
) -> Option<PacketPtr> {
    let n_repair = geometry.n_repair.get() as usize;
    let stripe = idx % n_repair;

    let parity = repairs?[stripe].as_ref()?;
    let rep = parity.repair().unwrap();

    let mut unit = rep.parity.clone();

    for j in (stripe..geometry.n_source.get() as usize).step_by(n_repair) {
        if j == idx {
            continue;
        }
        let member = block.slots[j].as_ref()?;
        if !xor_unit(&mut unit, member.source().unwrap()) {
            // payload longer than the parity unit: sender lied about the
            // geometry somewhere
            stats.n_bad_repair += 1;
            return None;
        }
    }

    let len = u32::from_le_bytes(unit[..4].try_into().unwrap()) as usize;
    if PARITY_HEADER_LEN + len > unit.len() {
        stats.n_bad_repair += 1;
        return None;
    }
    let timestamp = u64::from_le_bytes(unit[4..PARITY_HEADER_LEN].try_into().unwrap());

    Some(Arc::new(Packet {
        sender,
        rx_nanos: 0,
        body: Body::Source(SourcePacket {
            seq: block.start_seq(geometry.n_source.get()) + idx as u64,
            timestamp,
            payload_id: payload_id?,
            payload: unit[PARITY_HEADER_LEN..PARITY_HEADER_LEN + len].to_vec(),
        }),
    }))
}

/// XORs one source packet's protected unit into `unit`. Returns `false` if
/// the payload does not fit.
fn xor_unit(unit: &mut [u8], src: &SourcePacket) -> bool {
    if PARITY_HEADER_LEN + src.payload.len() > unit.len() {
        return false;
    }

    for (u, b) in unit.iter_mut().zip((src.payload.len() as u32).to_le_bytes()) {
        *u ^= b;
    }
    for (u, b) in unit[4..].iter_mut().zip(src.timestamp.to_le_bytes()) {
        *u ^= b;
    }
    for (u, &b) in unit[PARITY_HEADER_LEN..].iter_mut().zip(&src.payload) {
        *u ^= b;
    }

    true
}

/// Encodes the parity units protecting one complete block of source
/// packets. `sources` must hold the block's packets in position order.
///
/// The inverse of the reconstruction performed by [`FecReader`]; senders
/// and tests use it to produce repair payloads.
pub fn encode_parity(sources: &[SourcePacket], geometry: FecConfig) -> Vec<Vec<u8>> {
    assert_eq!(sources.len(), geometry.n_source.get() as usize);

    let n_repair = geometry.n_repair.get() as usize;

    (0..n_repair)
        .map(|stripe| {
            let unit_len = sources[stripe..]
                .iter()
                .step_by(n_repair)
                .map(|s| PARITY_HEADER_LEN + s.payload.len())
                .max()
                .unwrap();

            let mut unit = vec![0u8; unit_len];
            for src in sources[stripe..].iter().step_by(n_repair) {
                assert!(xor_unit(&mut unit, src));
            }
            unit
        })
        .collect()
}
