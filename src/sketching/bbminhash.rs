//! One permutation b-bit minhash.
//!
//! The hash space is cut into 2^p*8/b buckets (the high bits of a hash pick
//! the bucket, the rest competes for the minimum). Finalization densifies
//! empty buckets by borrowing the next non empty one cyclically, then packs
//! the lowest b bits of every bucket minimum. Jaccard is the matching
//! fraction of packed signatures corrected for the 2^-b collision rate.
//! Truncation loses the information a union would need, so merge is
//! Unsupported on the finalized form.

use std::io::{Read, Write};

use crate::error::SketchError;
use crate::params::{SketchFamily, SketchParams};
use crate::sketching::{
    read_f64, read_u32, read_u64, union_from_jaccard, write_f64, write_u32, write_u64,
    FinalSketch, KmerSketcher,
};

//========================== building phase =================================

pub struct BBitMinHash {
    b: u32,
    lg_buckets: u32,
    mins: Vec<u64>,
}

#[inline(always)]
fn bucket_of(hash: u64, lg_buckets: u32) -> (usize, u64) {
    if lg_buckets == 0 {
        return (0, hash);
    }
    ((hash >> (64 - lg_buckets)) as usize, hash << lg_buckets)
}

impl KmerSketcher for BBitMinHash {
    type Final = FinalBBitMinHash;

    fn new(params: &SketchParams) -> Self {
        let nb = params.nb_bbit_signatures();
        assert!(nb.is_power_of_two());
        BBitMinHash {
            b: params.get_b_bits(),
            lg_buckets: nb.trailing_zeros(),
            mins: vec![u64::MAX; nb],
        }
    }

    fn add_hash(&mut self, hash: u64) {
        let (idx, val) = bucket_of(hash, self.lg_buckets);
        if val < self.mins[idx] {
            self.mins[idx] = val;
        }
    }

    fn finalize(self) -> FinalBBitMinHash {
        FinalBBitMinHash::from_minima(self.b, self.lg_buckets, &self.mins, None)
    }
}

//========================== terminal form ==================================

#[derive(Clone, Debug, PartialEq)]
pub struct FinalBBitMinHash {
    b: u32,
    lg_buckets: u32,
    /// buckets that really saw a hash, before densification
    nonempty: u64,
    /// sum of the normalized bucket minima of the non empty buckets
    sum_minima: f64,
    /// packed b bit signatures, b divides 64 so lanes never straddle words
    words: Vec<u64>,
    /// multiplicities of the bucket minima, counting variant only
    counts: Option<Vec<u32>>,
}

impl FinalBBitMinHash {
    fn from_minima(b: u32, lg_buckets: u32, mins: &[u64], counts: Option<Vec<u32>>) -> Self {
        let nb = mins.len();
        let mut nonempty = 0u64;
        let mut sum_minima = 0f64;
        for &m in mins.iter() {
            if m != u64::MAX {
                nonempty += 1;
                sum_minima += m as f64 / u64::MAX as f64;
            }
        }
        // cyclic densification : an empty bucket borrows the next filled one
        let mut densified: Vec<u64> = Vec::with_capacity(nb);
        for i in 0..nb {
            if mins[i] != u64::MAX {
                densified.push(mins[i]);
            } else if nonempty > 0 {
                let mut j = (i + 1) % nb;
                while mins[j] == u64::MAX {
                    j = (j + 1) % nb;
                }
                densified.push(mins[j]);
            } else {
                densified.push(0);
            }
        }
        let mask = if b == 64 { u64::MAX } else { (1u64 << b) - 1 };
        let lanes_per_word = (64 / b) as usize;
        let mut words = vec![0u64; nb.div_ceil(lanes_per_word)];
        for (i, &m) in densified.iter().enumerate() {
            let shift = (i % lanes_per_word) as u32 * b;
            words[i / lanes_per_word] |= (m & mask) << shift;
        }
        FinalBBitMinHash {
            b,
            lg_buckets,
            nonempty,
            sum_minima,
            words,
            counts,
        }
    }

    pub fn nb_buckets(&self) -> usize {
        1usize << self.lg_buckets
    }

    #[inline(always)]
    fn signature(&self, i: usize) -> u64 {
        let lanes_per_word = (64 / self.b) as usize;
        let mask = if self.b == 64 {
            u64::MAX
        } else {
            (1u64 << self.b) - 1
        };
        let shift = (i % lanes_per_word) as u32 * self.b;
        (self.words[i / lanes_per_word] >> shift) & mask
    }

    fn matching_fraction(&self, other: &FinalBBitMinHash) -> f64 {
        let nb = self.nb_buckets();
        let mut matches = 0usize;
        for i in 0..nb {
            if self.signature(i) == other.signature(i) {
                matches += 1;
            }
        }
        matches as f64 / nb as f64
    }

    /// collision corrected jaccard from the matching fraction
    fn corrected_jaccard(&self, other: &FinalBBitMinHash) -> f64 {
        if self.nonempty == 0 && other.nonempty == 0 {
            return 1.;
        }
        let c = 0.5f64.powi(self.b as i32);
        ((self.matching_fraction(other) - c) / (1. - c)).clamp(0., 1.)
    }

    fn write_common(&self, out: &mut dyn Write) -> Result<(), SketchError> {
        write_u32(out, self.b)?;
        write_u32(out, self.lg_buckets)?;
        write_u64(out, self.nonempty)?;
        write_f64(out, self.sum_minima)?;
        for &w in self.words.iter() {
            write_u64(out, w)?;
        }
        Ok(())
    }

    fn read_common(
        input: &mut dyn Read,
        params: &SketchParams,
    ) -> Result<FinalBBitMinHash, SketchError> {
        let b = read_u32(input)?;
        let lg_buckets = read_u32(input)?;
        if b != params.get_b_bits()
            || (1usize << lg_buckets) != params.nb_bbit_signatures()
        {
            return Err(SketchError::cache(
                "",
                format!("b-bit sketch geometry mismatch, file has b={} buckets=2^{}", b, lg_buckets),
            ));
        }
        let nonempty = read_u64(input)?;
        let sum_minima = read_f64(input)?;
        let lanes_per_word = (64 / b) as usize;
        let nb_words = (1usize << lg_buckets).div_ceil(lanes_per_word);
        let mut words = vec![0u64; nb_words];
        for w in words.iter_mut() {
            *w = read_u64(input)?;
        }
        Ok(FinalBBitMinHash {
            b,
            lg_buckets,
            nonempty,
            sum_minima,
            words,
            counts: None,
        })
    }

    fn estimate(&self) -> f64 {
        let m = self.nb_buckets() as f64;
        if self.nonempty == 0 {
            return 0.;
        }
        if (self.nonempty as f64) < m {
            // occupancy estimator while empty buckets remain
            return m * (m / (m - self.nonempty as f64)).ln();
        }
        // bucket minima estimator : each minimum is the min of about n/m
        // normalized uniforms
        let mean = self.sum_minima / self.nonempty as f64;
        if mean <= 0. {
            return f64::INFINITY;
        }
        (m * (1. / mean - 1.)).max(0.)
    }
}

impl FinalSketch for FinalBBitMinHash {
    fn family() -> SketchFamily {
        SketchFamily::BBitMinHash
    }

    fn cardinality(&self) -> f64 {
        self.estimate()
    }

    fn jaccard(&self, other: &FinalBBitMinHash) -> f64 {
        self.corrected_jaccard(other)
    }

    fn union_size(&self, other: &FinalBBitMinHash) -> f64 {
        union_from_jaccard(self.cardinality(), other.cardinality(), self.jaccard(other))
    }

    fn containment(&self, other: &FinalBBitMinHash) -> Result<f64, SketchError> {
        let card_a = self.cardinality();
        if card_a == 0. {
            return Ok(0.);
        }
        let ji = self.jaccard(other);
        let inter = ji * self.union_size(other);
        Ok((inter / card_a).clamp(0., 1.))
    }

    fn merge(&mut self, _other: &FinalBBitMinHash) -> Result<(), SketchError> {
        Err(SketchError::Unsupported(
            "b-bit signatures cannot be merged once truncated".to_string(),
        ))
    }

    fn write_to(&self, out: &mut dyn Write) -> Result<(), SketchError> {
        self.write_common(out)
    }

    fn read_from(
        input: &mut dyn Read,
        params: &SketchParams,
    ) -> Result<FinalBBitMinHash, SketchError> {
        Self::read_common(input, params)
    }
}

//====================== counting variant ===================================

pub struct CountingBBitMinHash {
    inner: BBitMinHash,
    counts: Vec<u32>,
}

impl KmerSketcher for CountingBBitMinHash {
    type Final = FinalCountingBBitMinHash;

    fn new(params: &SketchParams) -> Self {
        let inner = BBitMinHash::new(params);
        let nb = inner.mins.len();
        CountingBBitMinHash {
            inner,
            counts: vec![0u32; nb],
        }
    }

    fn add_hash(&mut self, hash: u64) {
        let (idx, val) = bucket_of(hash, self.inner.lg_buckets);
        if val < self.inner.mins[idx] {
            self.inner.mins[idx] = val;
            self.counts[idx] = 1;
        } else if val == self.inner.mins[idx] {
            self.counts[idx] = self.counts[idx].saturating_add(1);
        }
    }

    fn finalize(self) -> FinalCountingBBitMinHash {
        FinalCountingBBitMinHash {
            base: FinalBBitMinHash::from_minima(
                self.inner.b,
                self.inner.lg_buckets,
                &self.inner.mins,
                Some(self.counts),
            ),
        }
    }
}

#[derive(Clone, Debug, PartialEq)]
pub struct FinalCountingBBitMinHash {
    base: FinalBBitMinHash,
}

impl FinalSketch for FinalCountingBBitMinHash {
    fn family() -> SketchFamily {
        SketchFamily::CountingBBitMinHash
    }

    fn cardinality(&self) -> f64 {
        self.base.estimate()
    }

    /// weighted jaccard over matching bucket minima : multiplicities of the
    /// minima stand in for the weight histogram
    fn jaccard(&self, other: &FinalCountingBBitMinHash) -> f64 {
        if self.base.nonempty == 0 && other.base.nonempty == 0 {
            return 1.;
        }
        let ca = self.base.counts.as_ref().expect("counting sketch");
        let cb = other.base.counts.as_ref().expect("counting sketch");
        let mut num = 0f64;
        let mut den = 0f64;
        for i in 0..self.base.nb_buckets() {
            let (wa, wb) = (ca[i] as f64, cb[i] as f64);
            if self.base.signature(i) == other.base.signature(i) {
                num += wa.min(wb);
                den += wa.max(wb);
            } else {
                den += wa.max(wb);
            }
        }
        if den == 0. {
            return 1.;
        }
        num / den
    }

    fn union_size(&self, other: &FinalCountingBBitMinHash) -> f64 {
        self.base.union_size(&other.base)
    }

    fn containment(&self, other: &FinalCountingBBitMinHash) -> Result<f64, SketchError> {
        let ca = self.base.counts.as_ref().expect("counting sketch");
        let cb = other.base.counts.as_ref().expect("counting sketch");
        let own: f64 = ca.iter().map(|&c| c as f64).sum();
        if own == 0. {
            return Ok(0.);
        }
        let mut num = 0f64;
        for i in 0..self.base.nb_buckets() {
            if self.base.signature(i) == other.base.signature(i) {
                num += (ca[i] as f64).min(cb[i] as f64);
            }
        }
        Ok((num / own).clamp(0., 1.))
    }

    fn merge(&mut self, _other: &FinalCountingBBitMinHash) -> Result<(), SketchError> {
        Err(SketchError::Unsupported(
            "b-bit signatures cannot be merged once truncated".to_string(),
        ))
    }

    fn write_to(&self, out: &mut dyn Write) -> Result<(), SketchError> {
        self.base.write_common(out)?;
        let counts = self.base.counts.as_ref().expect("counting sketch");
        for &c in counts.iter() {
            write_u32(out, c)?;
        }
        Ok(())
    }

    fn read_from(
        input: &mut dyn Read,
        params: &SketchParams,
    ) -> Result<FinalCountingBBitMinHash, SketchError> {
        let mut base = FinalBBitMinHash::read_common(input, params)?;
        let nb = base.nb_buckets();
        let mut counts = vec![0u32; nb];
        for c in counts.iter_mut() {
            *c = read_u32(input)?;
        }
        base.counts = Some(counts);
        Ok(FinalCountingBBitMinHash { base })
    }
}

//===========================================================================
