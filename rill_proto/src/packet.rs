//! The packet model: tagged carriers of audio payload and repair parity.
//!
//! Packets are parsed by a transport, stamped with a receive time when they
//! enter the pipeline, and reference-counted from then on. Once inside a
//! queue a packet is never mutated.

use alloc::{sync::Arc, vec::Vec};
use core::{fmt, num};

/// A sequence number, already extended to 64 bits.
///
/// Transports whose wire counters are narrower (e.g. 16-bit) are expected to
/// unwrap them before constructing packets; the pipeline compares sequence
/// numbers as plain integers.
pub type Seq = u64;

/// Identity of one logical sender within one slot.
///
/// Two endpoints in the same slot referring to the same identity address the
/// same session.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SenderId {
    /// Remote network address the packet arrived from.
    pub addr: core::net::SocketAddr,
    /// Stream identifier carried on the wire, disambiguating multiple
    /// streams from one address.
    pub ssrc: u32,
}

impl fmt::Display for SenderId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}#{:08x}", self.addr, self.ssrc)
    }
}

/// Identifies the codec of a source packet's payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
pub struct PayloadId(pub u8);

impl PayloadId {
    /// Raw 32-bit IEEE float samples, little-endian, interleaved.
    pub const PCM_F32: Self = Self(0x10);
    /// Raw signed 16-bit samples, little-endian, interleaved.
    pub const PCM_S16: Self = Self(0x11);
}

/// One endpoint role within a slot.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Interface {
    /// Carries source packets (audio payload).
    AudioSource,
    /// Carries repair packets (FEC parity).
    AudioRepair,
    /// Reserved for control traffic; the pipeline accepts and discards it.
    AudioControl,
}

/// The protocol spoken on one endpoint.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Protocol {
    /// The built-in source-packet protocol (see [`crate::wire`]).
    Pcm,
    /// The built-in XOR-parity repair protocol (see [`crate::wire`]).
    Parity,
    /// Placeholder control protocol.
    Control,
}

impl Protocol {
    /// The interface kind this protocol is valid on.
    #[inline(always)]
    pub const fn interface(self) -> Interface {
        match self {
            Self::Pcm => Interface::AudioSource,
            Self::Parity => Interface::AudioRepair,
            Self::Control => Interface::AudioControl,
        }
    }
}

/// A source packet: one span of encoded audio belonging to a stream.
#[derive(Debug, Clone)]
pub struct SourcePacket {
    pub seq: Seq,
    /// Stream timestamp of the first frame in the payload, in frames.
    pub timestamp: u64,
    pub payload_id: PayloadId,
    pub payload: Vec<u8>,
}

impl SourcePacket {
    /// The FEC block this packet belongs to under the given block length.
    #[inline(always)]
    pub const fn block_id(&self, n_source: num::NonZeroU16) -> u64 {
        self.seq / n_source.get() as u64
    }

    /// Position of this packet inside its FEC block.
    #[inline(always)]
    pub const fn block_index(&self, n_source: num::NonZeroU16) -> u16 {
        (self.seq % n_source.get() as u64) as u16
    }
}

/// A repair packet: one parity unit protecting a block of source packets.
///
/// Parity packet `index` covers the source positions congruent to `index`
/// modulo `n_repair`; the parity unit itself is described in the pipeline's
/// FEC module.
#[derive(Debug, Clone)]
pub struct RepairPacket {
    pub block_id: u64,
    /// Position of this parity unit within the block's repair group.
    pub index: u16,
    /// Number of source packets per block the sender used.
    pub n_source: num::NonZeroU16,
    /// Number of parity units per block the sender used.
    pub n_repair: num::NonZeroU16,
    pub parity: Vec<u8>,
}

/// What a packet carries.
#[derive(Debug, Clone)]
pub enum Body {
    Source(SourcePacket),
    Repair(RepairPacket),
}

/// An immutable, parsed packet.
#[derive(Debug, Clone)]
pub struct Packet {
    pub sender: SenderId,
    /// Monotonic receive time in nanoseconds, stamped when the packet enters
    /// the pipeline. Zero until then.
    pub rx_nanos: u64,
    pub body: Body,
}

impl Packet {
    #[inline(always)]
    pub const fn source(&self) -> Option<&SourcePacket> {
        match &self.body {
            Body::Source(s) => Some(s),
            Body::Repair(_) => None,
        }
    }

    #[inline(always)]
    pub const fn repair(&self) -> Option<&RepairPacket> {
        match &self.body {
            Body::Repair(r) => Some(r),
            Body::Source(_) => None,
        }
    }
}

/// Packets are shared immutable within the pipeline.
pub type PacketPtr = Arc<Packet>;
