//! Bloom filter sketch : 2^(p+3) bits, a handful of double-hashing probes.
//! Cardinalities come from the fill ratio, unions are bitwise or, jaccard
//! goes through inclusion/exclusion on the fill estimates. The filter
//! cannot express containment, asking for it is an Unsupported error.

use std::io::{Read, Write};

use crate::error::SketchError;
use crate::params::{SketchFamily, SketchParams};
use crate::sketching::countmin::splitmix64;
use crate::sketching::{read_u32, read_u64, write_u32, write_u64, FinalSketch, KmerSketcher};

const NB_PROBES: u32 = 4;

#[derive(Clone, Debug, PartialEq)]
pub struct BloomSketch {
    lg_bits: u32,
    words: Vec<u64>,
}

impl BloomSketch {
    fn nb_bits(&self) -> u64 {
        1u64 << self.lg_bits
    }

    fn set_bits(&self) -> u64 {
        self.words.iter().map(|w| w.count_ones() as u64).sum()
    }

    /// fill ratio estimator on an arbitrary popcount
    fn estimate_from_popcount(&self, x: u64) -> f64 {
        let m = self.nb_bits() as f64;
        if x as f64 >= m {
            return f64::INFINITY;
        }
        -(m / NB_PROBES as f64) * (1. - x as f64 / m).ln()
    }

    fn or_popcount(&self, other: &BloomSketch) -> u64 {
        self.words
            .iter()
            .zip(other.words.iter())
            .map(|(&a, &b)| (a | b).count_ones() as u64)
            .sum()
    }
}

impl KmerSketcher for BloomSketch {
    type Final = BloomSketch;

    fn new(params: &SketchParams) -> Self {
        let lg_bits = params.get_log2_sketch_size() + 3;
        BloomSketch {
            lg_bits,
            words: vec![0u64; 1usize << lg_bits.saturating_sub(6)],
        }
    }

    fn add_hash(&mut self, hash: u64) {
        let h2 = splitmix64(hash) | 1;
        for i in 0..NB_PROBES as u64 {
            let idx = hash.wrapping_add(i.wrapping_mul(h2)) >> (64 - self.lg_bits);
            self.words[(idx >> 6) as usize] |= 1u64 << (idx & 63);
        }
    }

    fn finalize(self) -> BloomSketch {
        self
    }
}

impl FinalSketch for BloomSketch {
    fn family() -> SketchFamily {
        SketchFamily::Bloom
    }

    fn cardinality(&self) -> f64 {
        self.estimate_from_popcount(self.set_bits())
    }

    fn jaccard(&self, other: &BloomSketch) -> f64 {
        let na = self.cardinality();
        let nb = other.cardinality();
        let nu = self.estimate_from_popcount(self.or_popcount(other));
        if nu <= 0. {
            return 1.;
        }
        let inter = (na + nb - nu).max(0.);
        (inter / nu).clamp(0., 1.)
    }

    fn union_size(&self, other: &BloomSketch) -> f64 {
        self.estimate_from_popcount(self.or_popcount(other))
    }

    fn containment(&self, _other: &BloomSketch) -> Result<f64, SketchError> {
        Err(SketchError::Unsupported(
            "containment is not defined on a Bloom filter sketch".to_string(),
        ))
    }

    fn merge(&mut self, other: &BloomSketch) -> Result<(), SketchError> {
        if self.words.len() != other.words.len() {
            return Err(SketchError::Unsupported(
                "cannot merge Bloom sketches of different sizes".to_string(),
            ));
        }
        for (w, &o) in self.words.iter_mut().zip(other.words.iter()) {
            *w |= o;
        }
        Ok(())
    }

    fn write_to(&self, out: &mut dyn Write) -> Result<(), SketchError> {
        write_u32(out, self.lg_bits)?;
        for &w in self.words.iter() {
            write_u64(out, w)?;
        }
        Ok(())
    }

    fn read_from(input: &mut dyn Read, params: &SketchParams) -> Result<BloomSketch, SketchError> {
        let lg_bits = read_u32(input)?;
        if lg_bits != params.get_log2_sketch_size() + 3 {
            return Err(SketchError::cache(
                "",
                format!("Bloom filter size mismatch, file has 2^{} bits", lg_bits),
            ));
        }
        let mut words = vec![0u64; 1usize << lg_bits.saturating_sub(6)];
        for w in words.iter_mut() {
            *w = read_u64(input)?;
        }
        Ok(BloomSketch { lg_bits, words })
    }
}

//===========================================================================
