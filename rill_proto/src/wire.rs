//! Wire representation of the built-in protocol: all packet parsing is done
//! here.
//!
//! Every datagram of the built-in protocol starts with a 4-byte type id,
//! followed by a [`postcard`]-encoded header, followed by the raw payload
//! (audio bytes for source packets, the parity unit for repair packets).
//! Inspecting the first 4 bytes is enough to eliminate foreign traffic.
//!
//! Transports with their own formats can skip this module entirely and build
//! [`packet::Packet`] values directly.

use super::packet;
use core::num;
use serde::{Deserialize, Serialize};

// All packets not starting with either of these are not valid as per our
// protocol.
const PACKET_TYPE_ID_SOURCE: [u8; 4] = *b"RilS";
const PACKET_TYPE_ID_REPAIR: [u8; 4] = *b"RilR";

/// Header of a source packet as encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct SourceHeader {
    pub ssrc: u32,
    pub seq: u64,
    pub timestamp: u64,
    pub payload_id: packet::PayloadId,
}

/// Header of a repair packet as encoded on the wire.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepairHeader {
    pub ssrc: u32,
    pub block_id: u64,
    pub index: u16,
    pub n_source: u16,
    pub n_repair: u16,
}

impl RepairHeader {
    /// Validates the advertised block geometry.
    #[inline(always)]
    pub const fn geometry(&self) -> Option<(num::NonZeroU16, num::NonZeroU16)> {
        match (
            num::NonZeroU16::new(self.n_source),
            num::NonZeroU16::new(self.n_repair),
        ) {
            (Some(s), Some(r)) => Some((s, r)),
            _ => None,
        }
    }
}

/// A parsed datagram, borrowing its payload from the receive buffer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Message<'a> {
    Source(SourceHeader, &'a [u8]),
    Repair(RepairHeader, &'a [u8]),
}

impl<'a> Message<'a> {
    /// Parses one datagram. Returns `None` for foreign or malformed traffic.
    #[inline]
    pub fn parse(datagram: &'a [u8]) -> Option<Self> {
        let (&id, rem) = datagram.split_first_chunk()?;

        if id == PACKET_TYPE_ID_SOURCE {
            let (header, payload) = postcard::take_from_bytes::<SourceHeader>(rem).ok()?;
            Some(Self::Source(header, payload))
        } else if id == PACKET_TYPE_ID_REPAIR {
            let (header, parity) = postcard::take_from_bytes::<RepairHeader>(rem).ok()?;
            header.geometry()?;
            Some(Self::Repair(header, parity))
        } else {
            None
        }
    }

    /// Builds a pipeline packet from the parsed datagram and the address it
    /// arrived from. The receive time is stamped later, at the endpoint.
    pub fn into_packet(self, addr: core::net::SocketAddr) -> packet::Packet {
        let (ssrc, body) = match self {
            Self::Source(h, payload) => (
                h.ssrc,
                packet::Body::Source(packet::SourcePacket {
                    seq: h.seq,
                    timestamp: h.timestamp,
                    payload_id: h.payload_id,
                    payload: payload.into(),
                }),
            ),
            Self::Repair(h, parity) => {
                // checked in parse
                let (n_source, n_repair) = h.geometry().unwrap();

                (
                    h.ssrc,
                    packet::Body::Repair(packet::RepairPacket {
                        block_id: h.block_id,
                        index: h.index,
                        n_source,
                        n_repair,
                        parity: parity.into(),
                    }),
                )
            }
        };

        packet::Packet {
            sender: packet::SenderId { addr, ssrc },
            rx_nanos: 0,
            body,
        }
    }
}

/// Encodes a source packet into `buf`. Returns the number of bytes written.
#[inline]
pub fn encode_source(
    header: &SourceHeader,
    payload: &[u8],
    buf: &mut [u8],
) -> Result<usize, postcard::Error> {
    encode(&PACKET_TYPE_ID_SOURCE, header, payload, buf)
}

/// Encodes a repair packet into `buf`. Returns the number of bytes written.
#[inline]
pub fn encode_repair(
    header: &RepairHeader,
    parity: &[u8],
    buf: &mut [u8],
) -> Result<usize, postcard::Error> {
    encode(&PACKET_TYPE_ID_REPAIR, header, parity, buf)
}

fn encode<T: Serialize>(
    id: &[u8; 4],
    header: &T,
    tail: &[u8],
    buf: &mut [u8],
) -> Result<usize, postcard::Error> {
    let (id_buf, rem) = buf
        .split_first_chunk_mut()
        .ok_or(postcard::Error::SerializeBufferFull)?;
    *id_buf = *id;

    let used = postcard::to_slice(header, &mut rem[..])?.len();

    let tail_dst = &mut rem[used..];
    if tail_dst.len() < tail.len() {
        return Err(postcard::Error::SerializeBufferFull);
    }
    tail_dst[..tail.len()].copy_from_slice(tail);

    Ok(4 + used + tail.len())
}
