//! Variable-rate resampling between the session's nominal rate and the
//! output rate.
//!
//! The stage pulls interleaved chunks from the upstream decode chain,
//! deinterleaves them for [`rubato`], and hands out fixed-size output
//! chunks. The scaling factor nudges the effective input rate to absorb
//! clock drift; updates ramp inside rubato so the output stays continuous.

use crate::{Error, depacketizer::ChunkFlags};
use core::num;
use rill_proto::{SILENCE, Sample};
use rubato::{FastFixedOut, PolynomialDegree, Resampler};

pub(crate) enum ResamplerReader {
    /// Bit-exact passthrough; the scaling factor is pinned to 1.
    Bypass,
    Active(Box<Active>),
}

pub(crate) struct Active {
    rs: FastFixedOut<Sample>,
    scaling: f64,
    n_channels: usize,

    /// Interleaved pull buffer for the upstream stage.
    in_scratch: Vec<Sample>,
    /// Planar views rubato works on.
    in_planar: Vec<Vec<Sample>>,
    out_planar: Vec<Vec<Sample>>,
    /// Frames of `out_planar` already handed out / valid.
    out_pos: usize,
    out_len: usize,
}

impl ResamplerReader {
    /// Builds the stage. `chunk_frames` is the fixed output granularity;
    /// `max_scaling_dev` the largest relative rate deviation the stage must
    /// accommodate.
    pub fn new(
        enable: bool,
        in_rate: num::NonZeroU32,
        out_rate: num::NonZeroU32,
        n_channels: usize,
        chunk_frames: usize,
        max_scaling_dev: f64,
    ) -> Result<Self, Error> {
        if !enable {
            return Ok(Self::Bypass);
        }

        let ratio = out_rate.get() as f64 / in_rate.get() as f64;
        let rs = FastFixedOut::new(
            ratio,
            max_scaling_dev.max(1.1),
            PolynomialDegree::Cubic,
            chunk_frames,
            n_channels,
        )
        .map_err(|_| Error::InvalidArgument("resampler construction failed"))?;

        let out_max = rs.output_frames_max();

        Ok(Self::Active(Box::new(Active {
            rs,
            scaling: 1.,
            n_channels,
            in_scratch: Vec::new(),
            in_planar: vec![Vec::new(); n_channels],
            out_planar: vec![vec![SILENCE; out_max]; n_channels],
            out_pos: 0,
            out_len: 0,
        })))
    }

    /// Updates the scaling factor (the input-rate multiplier: above 1
    /// consumes input faster). Applied between frames, never mid-sample.
    pub fn set_scaling(&mut self, scaling: f64) {
        let Self::Active(a) = self else { return };

        if a.scaling != scaling {
            // rubato's relative ratio is output/input, hence the inverse
            if let Err(e) = a.rs.set_resample_ratio_relative(1. / scaling, true) {
                log::warn!("resampler: scaling {scaling} rejected: {e}");
                return;
            }
            a.scaling = scaling;
        }
    }

    #[inline(always)]
    pub fn scaling(&self) -> f64 {
        match self {
            Self::Bypass => 1.,
            Self::Active(a) => a.scaling,
        }
    }

    /// Fills `out` (a whole number of frames), pulling from `upstream` as
    /// needed.
    pub fn read(
        &mut self,
        mut upstream: impl FnMut(&mut [Sample]) -> ChunkFlags,
        out: &mut [Sample],
    ) -> ChunkFlags {
        let Active {
            rs,
            n_channels,
            in_scratch,
            in_planar,
            out_planar,
            out_pos,
            out_len,
            scaling: _,
        } = match self {
            Self::Bypass => return upstream(out),
            Self::Active(a) => &mut **a,
        };

        let ch = *n_channels;
        let want = out.len() / ch;
        let mut flags = ChunkFlags::default();
        let mut filled = 0;

        while filled < want {
            if out_pos == out_len {
                let need = rs.input_frames_next();

                in_scratch.clear();
                in_scratch.resize(need * ch, SILENCE);
                flags.merge(upstream(in_scratch));

                for (c, plane) in in_planar.iter_mut().enumerate() {
                    plane.clear();
                    plane.extend(in_scratch.iter().skip(c).step_by(ch));
                }

                match rs.process_into_buffer(in_planar, out_planar, None) {
                    Ok((_, written)) => {
                        *out_pos = 0;
                        *out_len = written;
                    }
                    Err(e) => {
                        // can't happen with the buffer sizes above; absorb
                        // rather than poison the audio thread
                        log::error!("resampler: {e}");
                        out[filled * ch..].fill(SILENCE);
                        flags.incomplete = true;
                        return flags;
                    }
                }
            }

            let n = (*out_len - *out_pos).min(want - filled);
            for (c, plane) in out_planar.iter().enumerate() {
                for i in 0..n {
                    out[(filled + i) * ch + c] = plane[*out_pos + i];
                }
            }
            *out_pos += n;
            filled += n;
        }

        flags
    }
}
