//! Turns an ordered source-packet stream into a continuous sample stream.
//!
//! The depacketizer owns the session's playout clock: its position advances
//! by exactly the number of frames produced, packets or not. Gaps between a
//! packet's timestamp and the position are filled with silence; timestamp
//! regressions are resolved by trimming the packet's leading frames, or
//! dropping it outright when the whole packet lands in the past.

use crate::codec::CodecMap;
use rill_proto::{SILENCE, Sample, packet::{PacketPtr, PayloadId}};
use std::sync::Arc;

/// Where the next stage pulls its packets from.
///
/// The decode chain is a composition of stages; this is the packet-flavored
/// capability between them.
pub(crate) trait PacketReader {
    fn read_packet(&mut self) -> Option<PacketPtr>;
}

impl PacketReader for crate::fec::FecReader {
    #[inline(always)]
    fn read_packet(&mut self) -> Option<PacketPtr> {
        self.read()
    }
}

/// Quality of one produced chunk of samples.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub(crate) struct ChunkFlags {
    /// Some samples came from packets (as opposed to filler).
    pub nonblank: bool,
    /// Silence was inserted for a detected gap, or a packet was dropped.
    pub drops: bool,
    /// Filler not attributable to a detected gap: pre-stream region or
    /// starvation.
    pub incomplete: bool,
}

impl ChunkFlags {
    #[inline(always)]
    pub fn merge(&mut self, other: Self) {
        self.nonblank |= other.nonblank;
        self.drops |= other.drops;
        self.incomplete |= other.incomplete;
    }
}

#[derive(Debug, Clone, Copy, Default)]
pub(crate) struct DepacketizerStats {
    /// Packets discarded: stale, malformed, or payload-type mismatch.
    pub n_dropped_packets: u64,
    /// Frames of silence inserted for detected gaps.
    pub n_gap_frames: u64,
}

pub(crate) struct Depacketizer {
    codecs: Arc<CodecMap>,
    n_channels: usize,

    /// Playout position: stream timestamp of the next frame to produce.
    position: u64,
    /// Set once the first packet arrived; `position` is meaningless before.
    started: bool,
    /// Payload type pinned by the first packet. Senders must not switch.
    pinned: Option<PayloadId>,

    /// Decoded samples of the packet currently being consumed.
    cache: Vec<Sample>,
    cache_pos: usize,
    /// Stream timestamp of `cache[cache_pos]`.
    cache_ts: u64,

    stats: DepacketizerStats,
}

impl Depacketizer {
    pub fn new(codecs: Arc<CodecMap>, n_channels: usize) -> Self {
        Self {
            codecs,
            n_channels,
            position: 0,
            started: false,
            pinned: None,
            cache: Vec::new(),
            cache_pos: 0,
            cache_ts: 0,
            stats: DepacketizerStats::default(),
        }
    }

    /// Playout position in frames. Only meaningful once [`started`].
    ///
    /// [`started`]: Self::started
    #[inline(always)]
    pub fn position(&self) -> u64 {
        self.position
    }

    #[inline(always)]
    pub fn started(&self) -> bool {
        self.started
    }

    #[inline(always)]
    pub fn stats(&self) -> DepacketizerStats {
        self.stats
    }

    /// Fills `out` (a whole number of frames) with the next span of the
    /// stream, pulling packets from `upstream` as needed.
    pub fn read(&mut self, upstream: &mut impl PacketReader, out: &mut [Sample]) -> ChunkFlags {
        debug_assert!(out.len().is_multiple_of(self.n_channels));

        let mut flags = ChunkFlags::default();
        let mut filled = 0;

        while filled < out.len() {
            if self.cache_pos == self.cache.len() && !self.next_packet(&mut *upstream, &mut flags) {
                // starvation (or pre-stream): the rest of the chunk is filler
                out[filled..].fill(SILENCE);
                if self.started {
                    self.position += ((out.len() - filled) / self.n_channels) as u64;
                }
                flags.incomplete = true;
                return flags;
            }

            if self.cache_ts > self.position {
                // detected gap: insert silence up to the packet
                let gap = self.cache_ts - self.position;
                let n_frames = gap.min(((out.len() - filled) / self.n_channels) as u64) as usize;
                let n_samples = n_frames * self.n_channels;

                out[filled..filled + n_samples].fill(SILENCE);
                filled += n_samples;
                self.position += n_frames as u64;
                self.stats.n_gap_frames += n_frames as u64;
                flags.drops = true;
                continue;
            }

            let n_samples = (self.cache.len() - self.cache_pos).min(out.len() - filled);
            out[filled..filled + n_samples]
                .copy_from_slice(&self.cache[self.cache_pos..self.cache_pos + n_samples]);

            filled += n_samples;
            self.cache_pos += n_samples;
            let n_frames = (n_samples / self.n_channels) as u64;
            self.position += n_frames;
            self.cache_ts += n_frames;
            flags.nonblank = true;
        }

        flags
    }

    /// Pulls and decodes the next usable packet into the cache. Returns
    /// `false` when the upstream has nothing to give.
    fn next_packet(&mut self, upstream: &mut impl PacketReader, flags: &mut ChunkFlags) -> bool {
        loop {
            let Some(packet) = upstream.read_packet() else {
                return false;
            };
            let src = packet.source().expect("upstream must emit source packets");

            let pinned = *self.pinned.get_or_insert(src.payload_id);
            if src.payload_id != pinned {
                log::debug!(
                    "depacketizer: {}: payload type {:?} conflicts with pinned {:?}",
                    packet.sender,
                    src.payload_id,
                    pinned,
                );
                self.stats.n_dropped_packets += 1;
                flags.drops = true;
                continue;
            }

            self.cache.clear();
            self.cache_pos = 0;

            let decoded = self
                .codecs
                .get(src.payload_id)
                .and_then(|codec| codec.decode(&src.payload, &mut self.cache));

            let n_samples = match decoded {
                Some(n) if n.is_multiple_of(self.n_channels) => n,
                _ => {
                    log::debug!("depacketizer: {}: bad payload, dropping", packet.sender);
                    self.cache.clear();
                    self.stats.n_dropped_packets += 1;
                    flags.drops = true;
                    continue;
                }
            };
            let n_frames = (n_samples / self.n_channels) as u64;

            if !self.started {
                self.started = true;
                self.position = src.timestamp;
            }
            self.cache_ts = src.timestamp;

            if self.cache_ts < self.position {
                // regression: trim the part that already played out
                let trim = self.position - self.cache_ts;
                if trim >= n_frames {
                    self.cache.clear();
                    self.stats.n_dropped_packets += 1;
                    flags.drops = true;
                    continue;
                }
                self.cache_pos = trim as usize * self.n_channels;
                self.cache_ts = self.position;
            }

            return true;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rill_proto::packet::{Body, Packet, SenderId, SourcePacket};
    use std::collections::VecDeque;

    struct StubReader(VecDeque<PacketPtr>);

    impl PacketReader for StubReader {
        fn read_packet(&mut self) -> Option<PacketPtr> {
            self.0.pop_front()
        }
    }

    fn pkt(seq: u64, timestamp: u64, samples: &[f32]) -> PacketPtr {
        Arc::new(Packet {
            sender: SenderId {
                addr: "10.1.1.1:7000".parse().unwrap(),
                ssrc: 3,
            },
            rx_nanos: 0,
            body: Body::Source(SourcePacket {
                seq,
                timestamp,
                payload_id: PayloadId::PCM_F32,
                payload: samples.iter().flat_map(|s| s.to_le_bytes()).collect(),
            }),
        })
    }

    fn depacketizer() -> Depacketizer {
        Depacketizer::new(Arc::new(CodecMap::builtin()), 1)
    }

    #[test]
    fn contiguous_stream_is_reproduced() {
        let mut upstream = StubReader(
            [
                pkt(0, 0, &[1., 2., 3., 4.]),
                pkt(1, 4, &[5., 6., 7., 8.]),
            ]
            .into(),
        );
        let mut d = depacketizer();

        let mut out = [0.; 8];
        let flags = d.read(&mut upstream, &mut out);

        assert_eq!(out, [1., 2., 3., 4., 5., 6., 7., 8.]);
        assert!(flags.nonblank && !flags.drops && !flags.incomplete);
        assert_eq!(d.position(), 8);
    }

    #[test]
    fn gap_is_filled_with_silence_and_flagged() {
        let mut upstream = StubReader(
            [pkt(0, 0, &[1., 1.]), pkt(2, 4, &[2., 2.])].into(),
        );
        let mut d = depacketizer();

        let mut out = [9.; 6];
        let flags = d.read(&mut upstream, &mut out);

        assert_eq!(out, [1., 1., 0., 0., 2., 2.]);
        assert!(flags.drops);
        assert!(!flags.incomplete);
        assert_eq!(d.stats().n_gap_frames, 2);
    }

    #[test]
    fn regression_is_trimmed() {
        // second packet re-sends the last two frames of the first
        let mut upstream = StubReader(
            [
                pkt(0, 0, &[1., 2., 3., 4.]),
                pkt(1, 2, &[3., 4., 5., 6.]),
            ]
            .into(),
        );
        let mut d = depacketizer();

        let mut out = [0.; 6];
        let flags = d.read(&mut upstream, &mut out);

        assert_eq!(out, [1., 2., 3., 4., 5., 6.]);
        assert!(!flags.drops);
    }

    #[test]
    fn fully_stale_packet_is_dropped() {
        let mut upstream = StubReader(
            [
                pkt(0, 0, &[1., 2., 3., 4.]),
                pkt(1, 0, &[8., 8.]),
                pkt(2, 4, &[5., 6.]),
            ]
            .into(),
        );
        let mut d = depacketizer();

        let mut out = [0.; 6];
        let flags = d.read(&mut upstream, &mut out);

        assert_eq!(out, [1., 2., 3., 4., 5., 6.]);
        assert!(flags.drops);
        assert_eq!(d.stats().n_dropped_packets, 1);
    }

    #[test]
    fn starvation_fills_incomplete_silence() {
        let mut upstream = StubReader([pkt(0, 0, &[1., 2.])].into());
        let mut d = depacketizer();

        let mut out = [9.; 4];
        let flags = d.read(&mut upstream, &mut out);

        assert_eq!(out, [1., 2., 0., 0.]);
        assert!(flags.incomplete && flags.nonblank);
        // the playout clock keeps running through starvation
        assert_eq!(d.position(), 4);
    }

    #[test]
    fn pre_stream_read_is_incomplete_silence() {
        let mut upstream = StubReader(VecDeque::new());
        let mut d = depacketizer();

        let mut out = [9.; 4];
        let flags = d.read(&mut upstream, &mut out);

        assert_eq!(out, [0.; 4]);
        assert!(flags.incomplete && !flags.nonblank);
        assert!(!d.started());
    }

    #[test]
    fn payload_type_switch_is_refused() {
        let mut bad = pkt(1, 2, &[7., 7.]);
        {
            let packet = Arc::get_mut(&mut bad).unwrap();
            let Body::Source(src) = &mut packet.body else {
                unreachable!()
            };
            src.payload_id = PayloadId::PCM_S16;
        }

        let mut upstream = StubReader([pkt(0, 0, &[1., 2.]), bad, pkt(2, 4, &[3., 3.])].into());
        let mut d = depacketizer();

        let mut out = [0.; 6];
        let flags = d.read(&mut upstream, &mut out);

        // the conflicting packet is refused; its span plays as a gap
        assert_eq!(out, [1., 2., 0., 0., 3., 3.]);
        assert!(flags.drops);
        assert_eq!(d.stats().n_dropped_packets, 1);
    }
}
