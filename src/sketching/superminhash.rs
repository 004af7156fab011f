//! b-bit SuperMinHash. Accumulation is delegated to the SuperMinHash
//! implementation of the probminhash crate (see
//! [probminhash](https://crates.io/crates/probminhash)), fed through a
//! passthrough hasher as our kmers are already hashed. Finalization
//! quantizes the fractional part of every slot to b bits ; jaccard is the
//! collision corrected matching fraction as for the plain b-bit minhash.
//! The quantized form can neither be merged nor express containment.

use std::hash::BuildHasherDefault;
use std::io::{Read, Write};

use probminhash::superminhasher::SuperMinHash;

use crate::error::SketchError;
use crate::nohasher::NoHashHasher;
use crate::params::{SketchFamily, SketchParams};
use crate::sketching::{
    read_f64, read_u32, read_u64, union_from_jaccard, write_f64, write_u32, write_u64,
    FinalSketch, KmerSketcher,
};

pub struct SuperMinHashSketch {
    b: u32,
    nb_added: u64,
    sketcher: SuperMinHash<f64, u64, NoHashHasher>,
}

impl KmerSketcher for SuperMinHashSketch {
    type Final = FinalSuperMinHash;

    fn new(params: &SketchParams) -> Self {
        let bh = BuildHasherDefault::<NoHashHasher>::default();
        SuperMinHashSketch {
            b: params.get_b_bits(),
            nb_added: 0,
            sketcher: SuperMinHash::new(params.superminhash_size(), bh),
        }
    }

    fn add_hash(&mut self, hash: u64) {
        if self.sketcher.sketch(&hash).is_err() {
            log::error!("superminhash could not sketch hash {}", hash);
            std::panic!("superminhash could not sketch hash {}", hash);
        }
        self.nb_added += 1;
    }

    fn finalize(self) -> FinalSuperMinHash {
        let raw = self.sketcher.get_hsketch();
        let m = raw.len();
        let mask = if self.b == 64 {
            u64::MAX
        } else {
            (1u64 << self.b) - 1
        };
        let mut filled = 0u64;
        let mut sum = 0f64;
        let mut sigs = Vec::<u64>::with_capacity(m);
        for &v in raw.iter() {
            if self.nb_added == 0 || !v.is_finite() {
                sigs.push(0);
                continue;
            }
            if v < 1. {
                filled += 1;
            }
            sum += v;
            sigs.push(((v.fract() * (mask as f64 + 1.)) as u64).min(mask));
        }
        FinalSuperMinHash {
            b: self.b,
            nb_added: self.nb_added,
            filled,
            mean_sig: if self.nb_added == 0 { 0. } else { sum / m as f64 },
            sigs,
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FinalSuperMinHash {
    b: u32,
    nb_added: u64,
    /// slots whose value dropped below 1, a proxy for direct occupancy
    filled: u64,
    mean_sig: f64,
    sigs: Vec<u64>,
}

impl FinalSketch for FinalSuperMinHash {
    fn family() -> SketchFamily {
        SketchFamily::SuperMinHash
    }

    /// rough cardinality : occupancy while slots above 1 remain, slot mean
    /// after. The families with a real estimator should be preferred when
    /// sizes are the point of the run.
    fn cardinality(&self) -> f64 {
        let m = self.sigs.len() as f64;
        if self.nb_added == 0 {
            return 0.;
        }
        if (self.filled as f64) < m {
            let hit = self.filled.max(1) as f64;
            return m * (m / (m - hit).max(1e-9)).ln();
        }
        if self.mean_sig <= 0. {
            return f64::INFINITY;
        }
        (m * (1. / self.mean_sig - 1.)).max(self.nb_added.min(1) as f64)
    }

    fn jaccard(&self, other: &FinalSuperMinHash) -> f64 {
        if self.nb_added == 0 && other.nb_added == 0 {
            return 1.;
        }
        let m = self.sigs.len();
        let matches = self
            .sigs
            .iter()
            .zip(other.sigs.iter())
            .filter(|(a, b)| a == b)
            .count();
        let c = 0.5f64.powi(self.b as i32);
        ((matches as f64 / m as f64 - c) / (1. - c)).clamp(0., 1.)
    }

    fn union_size(&self, other: &FinalSuperMinHash) -> f64 {
        union_from_jaccard(self.cardinality(), other.cardinality(), self.jaccard(other))
    }

    fn containment(&self, _other: &FinalSuperMinHash) -> Result<f64, SketchError> {
        Err(SketchError::Unsupported(
            "containment is not defined on b-bit superminhash signatures".to_string(),
        ))
    }

    fn merge(&mut self, _other: &FinalSuperMinHash) -> Result<(), SketchError> {
        Err(SketchError::Unsupported(
            "superminhash signatures cannot be merged once quantized".to_string(),
        ))
    }

    fn write_to(&self, out: &mut dyn Write) -> Result<(), SketchError> {
        write_u32(out, self.b)?;
        write_u64(out, self.sigs.len() as u64)?;
        write_u64(out, self.nb_added)?;
        write_u64(out, self.filled)?;
        write_f64(out, self.mean_sig)?;
        for &s in self.sigs.iter() {
            write_u64(out, s)?;
        }
        Ok(())
    }

    fn read_from(
        input: &mut dyn Read,
        params: &SketchParams,
    ) -> Result<FinalSuperMinHash, SketchError> {
        let b = read_u32(input)?;
        let m = read_u64(input)? as usize;
        if b != params.get_b_bits() || m != params.superminhash_size() {
            return Err(SketchError::cache(
                "",
                format!("superminhash geometry mismatch, file has b={} m={}", b, m),
            ));
        }
        let nb_added = read_u64(input)?;
        let filled = read_u64(input)?;
        let mean_sig = read_f64(input)?;
        let mut sigs = Vec::with_capacity(m);
        for _ in 0..m {
            sigs.push(read_u64(input)?);
        }
        Ok(FinalSuperMinHash {
            b,
            nb_added,
            filled,
            mean_sig,
            sigs,
        })
    }
}

//===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sketching::countmin::splitmix64;

    fn params(p: u32) -> SketchParams {
        SketchParams::new(21, p, SketchFamily::SuperMinHash).with_b_bits(16)
    }

    fn filled(range: std::ops::Range<u64>, p: u32) -> FinalSuperMinHash {
        let mut mh = SuperMinHashSketch::new(&params(p));
        for i in range {
            mh.add_hash(splitmix64(i));
        }
        mh.finalize()
    }

    #[test]
    fn test_self_jaccard() {
        let s = filled(0..3_000, 10);
        assert!((s.jaccard(&s) - 1.).abs() < 1e-12);
        assert_eq!(filled(0..0, 10).jaccard(&filled(0..0, 10)), 1.);
    }

    #[test]
    fn test_jaccard_overlap() {
        // 2^10 byte budget : 128 slots ; true ji = 1/3
        let a = filled(0..20_000, 13);
        let b = filled(10_000..30_000, 13);
        let ji = a.jaccard(&b);
        assert!((ji - 1. / 3.).abs() < 0.08, "ji = {}", ji);
    }

    #[test]
    fn test_disjoint() {
        let a = filled(0..5_000, 12);
        let b = filled(100_000..105_000, 12);
        assert!(a.jaccard(&b) < 0.03);
    }

    #[test]
    fn test_cardinality_monotonic() {
        let small = filled(0..200, 10).cardinality();
        let large = filled(0..20_000, 10).cardinality();
        assert!(small > 0.);
        assert!(large > small);
        assert!(large.is_finite());
    }

    #[test]
    fn test_roundtrip() {
        let pr = params(10);
        let s = filled(0..1_000, 10);
        let mut buf = Vec::<u8>::new();
        s.write_to(&mut buf).unwrap();
        let back = FinalSuperMinHash::read_from(&mut buf.as_slice(), &pr).unwrap();
        assert_eq!(s, back);
    }
}
