//! Payload codecs, keyed by payload type.
//!
//! The depacketizer looks payload types up here to turn payload bytes into
//! samples. The two raw PCM codecs below ship built in; applications can
//! register their own before handing the map to the receiver.
//!
//! All built-in formats are packed, little-endian, interleaved.

use rill_proto::{Sample, packet::PayloadId};
use rustc_hash::FxHashMap;

/// Decodes one payload format into interleaved [`Sample`]s.
pub trait PayloadCodec: Send + Sync {
    /// Number of samples a payload would decode to, or `None` if it is
    /// malformed for this codec.
    fn n_samples(&self, payload: &[u8]) -> Option<usize>;

    /// Appends the decoded samples to `out`. Returns the number of samples
    /// appended, or `None` if the payload is malformed.
    fn decode(&self, payload: &[u8], out: &mut Vec<Sample>) -> Option<usize>;
}

/// Raw 32-bit IEEE float samples.
pub struct PcmF32Le;

impl PayloadCodec for PcmF32Le {
    #[inline(always)]
    fn n_samples(&self, payload: &[u8]) -> Option<usize> {
        payload.len().is_multiple_of(4).then(|| payload.len() / 4)
    }

    #[inline]
    fn decode(&self, payload: &[u8], out: &mut Vec<Sample>) -> Option<usize> {
        let n = self.n_samples(payload)?;
        out.reserve(n);
        for bytes in payload.chunks_exact(4) {
            out.push(Sample::from_le_bytes(bytes.try_into().unwrap()));
        }
        Some(n)
    }
}

/// Raw signed 16-bit samples, scaled to [-1, 1].
pub struct PcmS16Le;

impl PayloadCodec for PcmS16Le {
    #[inline(always)]
    fn n_samples(&self, payload: &[u8]) -> Option<usize> {
        payload.len().is_multiple_of(2).then(|| payload.len() / 2)
    }

    #[inline]
    fn decode(&self, payload: &[u8], out: &mut Vec<Sample>) -> Option<usize> {
        let n = self.n_samples(payload)?;
        out.reserve(n);
        for bytes in payload.chunks_exact(2) {
            let v = i16::from_le_bytes(bytes.try_into().unwrap());
            out.push(v as Sample / -(i16::MIN as Sample));
        }
        Some(n)
    }
}

/// Registry of payload codecs, keyed by payload type.
pub struct CodecMap {
    map: FxHashMap<PayloadId, Box<dyn PayloadCodec>>,
}

impl CodecMap {
    /// An empty registry.
    pub fn empty() -> Self {
        Self {
            map: FxHashMap::default(),
        }
    }

    /// A registry holding the built-in PCM codecs.
    pub fn builtin() -> Self {
        let mut map = Self::empty();
        map.register(PayloadId::PCM_F32, Box::new(PcmF32Le));
        map.register(PayloadId::PCM_S16, Box::new(PcmS16Le));
        map
    }

    /// Registers `codec` under `id`, replacing any previous registration.
    pub fn register(&mut self, id: PayloadId, codec: Box<dyn PayloadCodec>) {
        self.map.insert(id, codec);
    }

    #[inline(always)]
    pub fn get(&self, id: PayloadId) -> Option<&dyn PayloadCodec> {
        self.map.get(&id).map(Box::as_ref)
    }
}

impl Default for CodecMap {
    fn default() -> Self {
        Self::builtin()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn f32_round_trip() {
        let samples = [0.0f32, 0.25, -0.5, 1.0];
        let payload: Vec<u8> = samples.iter().flat_map(|s| s.to_le_bytes()).collect();

        let mut out = Vec::new();
        assert_eq!(PcmF32Le.decode(&payload, &mut out), Some(4));
        assert_eq!(out, samples);
    }

    #[test]
    fn s16_scales_to_unit_range() {
        let payload: Vec<u8> = [i16::MIN, 0, i16::MAX]
            .iter()
            .flat_map(|s| s.to_le_bytes())
            .collect();

        let mut out = Vec::new();
        PcmS16Le.decode(&payload, &mut out).unwrap();

        assert_eq!(out[0], -1.0);
        assert_eq!(out[1], 0.0);
        assert!(out[2] < 1.0 && out[2] > 0.999);
    }

    #[test]
    fn truncated_payload_is_malformed() {
        let mut out = Vec::new();
        assert_eq!(PcmF32Le.decode(&[0, 1, 2], &mut out), None);
        assert_eq!(PcmS16Le.decode(&[0], &mut out), None);
        assert!(out.is_empty());
    }

    #[test]
    fn unknown_id_is_absent() {
        let map = CodecMap::builtin();
        assert!(map.get(PayloadId(0x7f)).is_none());
        assert!(map.get(PayloadId::PCM_F32).is_some());
    }
}
