//! This module implements the bottom-k minhash algorithm and is highly
//! inspired by the finch module.
//! The sketch keeps the 2^(p-3) smallest distinct kmer hashes in a max
//! heap during construction ; finalization moves them to a sorted vector
//! on which jaccard is a sorted merge. The counting variant keeps the
//! multiplicity of each retained hash and estimates a weighted jaccard.

#[allow(unused_imports)]
use log::{debug, trace};

use std::collections::BinaryHeap;
use std::io::{Read, Write};

use fnv::{FnvHashMap, FnvHashSet};

use crate::error::SketchError;
use crate::params::{SketchFamily, SketchParams};
use crate::sketching::{read_u32, read_u64, write_u32, write_u64, FinalSketch, KmerSketcher};

//========================== RangeMinHash ===================================

/// bottom-k sketch under construction
pub struct RangeMinHash {
    size: usize,
    hashes: BinaryHeap<u64>,
    members: FnvHashSet<u64>,
}

impl KmerSketcher for RangeMinHash {
    type Final = FinalRangeMinHash;

    fn new(params: &SketchParams) -> Self {
        let size = params.nb_minima();
        RangeMinHash {
            size,
            hashes: BinaryHeap::with_capacity(size + 1),
            members: FnvHashSet::with_capacity_and_hasher(size, Default::default()),
        }
    }

    fn add_hash(&mut self, hash: u64) {
        // do we insert
        let add_hash = match self.hashes.peek() {
            None => true,
            Some(&old_max) => hash <= old_max || self.hashes.len() < self.size,
        };
        if add_hash && self.members.insert(hash) {
            self.hashes.push(hash);
            if self.hashes.len() > self.size {
                let evicted = self.hashes.pop().unwrap();
                self.members.remove(&evicted);
            }
        }
    }

    fn finalize(self) -> FinalRangeMinHash {
        let mut minima = self.hashes.into_sorted_vec();
        minima.dedup();
        FinalRangeMinHash {
            size: self.size,
            minima,
        }
    }
}

/// terminal form : the minima sorted ascending
#[derive(Clone, Debug, PartialEq)]
pub struct FinalRangeMinHash {
    size: usize,
    minima: Vec<u64>,
}

impl FinalRangeMinHash {
    pub fn nb_minima(&self) -> usize {
        self.minima.len()
    }

    /// cardinality estimate from a sorted bottom list : exact while the
    /// sketch is not full, (k-1)/r_k after
    fn estimate_sorted(minima: &[u64], size: usize) -> f64 {
        if minima.len() < size {
            return minima.len() as f64;
        }
        let r_k = *minima.last().unwrap();
        if r_k == 0 {
            return minima.len() as f64;
        }
        (size as f64 - 1.) * (u64::MAX as f64) / r_k as f64
    }

    /// bottom-k of the union of two sorted lists
    fn merge_bottom(a: &[u64], b: &[u64], k: usize) -> Vec<u64> {
        let mut merged = Vec::with_capacity(k);
        let (mut i, mut j) = (0usize, 0usize);
        while merged.len() < k && (i < a.len() || j < b.len()) {
            if j >= b.len() || (i < a.len() && a[i] < b[j]) {
                merged.push(a[i]);
                i += 1;
            } else if i >= a.len() || b[j] < a[i] {
                merged.push(b[j]);
                j += 1;
            } else {
                merged.push(a[i]);
                i += 1;
                j += 1;
            }
        }
        merged
    }
}

impl FinalSketch for FinalRangeMinHash {
    fn family() -> SketchFamily {
        SketchFamily::RangeMinHash
    }

    fn cardinality(&self) -> f64 {
        Self::estimate_sorted(&self.minima, self.size)
    }

    fn jaccard(&self, other: &FinalRangeMinHash) -> f64 {
        let k = self.size;
        let (mut i, mut j) = (0usize, 0usize);
        let mut total = 0usize;
        let mut shared = 0usize;
        while total < k && i < self.minima.len() && j < other.minima.len() {
            if self.minima[i] < other.minima[j] {
                i += 1;
            } else if other.minima[j] < self.minima[i] {
                j += 1;
            } else {
                shared += 1;
                i += 1;
                j += 1;
            }
            total += 1;
        }
        // under-filled sketches : extend the union support with the leftovers
        if total < k {
            let rest = (self.minima.len() - i) + (other.minima.len() - j);
            total += rest.min(k - total);
        }
        if total == 0 {
            return 1.;
        }
        shared as f64 / total as f64
    }

    fn union_size(&self, other: &FinalRangeMinHash) -> f64 {
        let merged = Self::merge_bottom(&self.minima, &other.minima, self.size);
        Self::estimate_sorted(&merged, self.size)
    }

    fn containment(&self, other: &FinalRangeMinHash) -> Result<f64, SketchError> {
        let card_a = self.cardinality();
        if card_a == 0. {
            return Ok(0.);
        }
        let inter = self.jaccard(other) * self.union_size(other);
        Ok((inter / card_a).clamp(0., 1.))
    }

    fn merge(&mut self, other: &FinalRangeMinHash) -> Result<(), SketchError> {
        self.minima = Self::merge_bottom(&self.minima, &other.minima, self.size);
        Ok(())
    }

    fn write_to(&self, out: &mut dyn Write) -> Result<(), SketchError> {
        write_u32(out, self.size as u32)?;
        write_u64(out, self.minima.len() as u64)?;
        for &m in self.minima.iter() {
            write_u64(out, m)?;
        }
        Ok(())
    }

    fn read_from(
        input: &mut dyn Read,
        params: &SketchParams,
    ) -> Result<FinalRangeMinHash, SketchError> {
        let size = read_u32(input)? as usize;
        if size != params.nb_minima() {
            return Err(SketchError::cache(
                "",
                format!("minhash sketch size mismatch, file has {}", size),
            ));
        }
        let nb = read_u64(input)? as usize;
        if nb > size {
            return Err(SketchError::cache("", "more minima than sketch size"));
        }
        let mut minima = Vec::with_capacity(nb);
        for _ in 0..nb {
            minima.push(read_u64(input)?);
        }
        Ok(FinalRangeMinHash { size, minima })
    }
}

//====================== CountingRangeMinHash ===============================

/// bottom-k sketch tracking multiplicities of the retained hashes
pub struct CountingRangeMinHash {
    size: usize,
    hashes: BinaryHeap<u64>,
    counts: FnvHashMap<u64, u32>,
}

impl KmerSketcher for CountingRangeMinHash {
    type Final = FinalCountingRangeMinHash;

    fn new(params: &SketchParams) -> Self {
        let size = params.nb_minima();
        CountingRangeMinHash {
            size,
            hashes: BinaryHeap::with_capacity(size + 1),
            counts: FnvHashMap::with_capacity_and_hasher(size, Default::default()),
        }
    }

    fn add_hash(&mut self, hash: u64) {
        if let Some(count) = self.counts.get_mut(&hash) {
            // the hash was already seen and is still tracked
            *count = count.saturating_add(1);
            return;
        }
        let add_hash = match self.hashes.peek() {
            None => true,
            Some(&old_max) => hash <= old_max || self.hashes.len() < self.size,
        };
        if add_hash {
            self.hashes.push(hash);
            self.counts.insert(hash, 1);
            if self.hashes.len() > self.size {
                let evicted = self.hashes.pop().unwrap();
                self.counts.remove(&evicted);
            }
        }
    }

    fn finalize(self) -> FinalCountingRangeMinHash {
        let mut items: Vec<(u64, u32)> = self.counts.into_iter().collect();
        items.sort_unstable_by_key(|&(h, _)| h);
        FinalCountingRangeMinHash {
            size: self.size,
            items,
        }
    }
}

/// terminal form : (hash, multiplicity) sorted by hash
#[derive(Clone, Debug, PartialEq)]
pub struct FinalCountingRangeMinHash {
    size: usize,
    items: Vec<(u64, u32)>,
}

impl FinalCountingRangeMinHash {
    fn hashes(&self) -> Vec<u64> {
        self.items.iter().map(|&(h, _)| h).collect()
    }

    /// weighted numerator and denominator over the bottom-k union support
    fn weighted_overlap(&self, other: &FinalCountingRangeMinHash) -> (f64, f64) {
        let k = self.size;
        let (mut i, mut j) = (0usize, 0usize);
        let mut seen = 0usize;
        let (mut num, mut den) = (0f64, 0f64);
        while seen < k && (i < self.items.len() || j < other.items.len()) {
            if j >= other.items.len()
                || (i < self.items.len() && self.items[i].0 < other.items[j].0)
            {
                den += self.items[i].1 as f64;
                i += 1;
            } else if i >= self.items.len()
                || (j < other.items.len() && other.items[j].0 < self.items[i].0)
            {
                den += other.items[j].1 as f64;
                j += 1;
            } else {
                let (ca, cb) = (self.items[i].1 as f64, other.items[j].1 as f64);
                num += ca.min(cb);
                den += ca.max(cb);
                i += 1;
                j += 1;
            }
            seen += 1;
        }
        (num, den)
    }
}

impl FinalSketch for FinalCountingRangeMinHash {
    fn family() -> SketchFamily {
        SketchFamily::CountingRangeMinHash
    }

    fn cardinality(&self) -> f64 {
        FinalRangeMinHash::estimate_sorted(&self.hashes(), self.size)
    }

    /// weighted jaccard : sum of min multiplicities over sum of max over
    /// the union support
    fn jaccard(&self, other: &FinalCountingRangeMinHash) -> f64 {
        let (num, den) = self.weighted_overlap(other);
        if den == 0. {
            return 1.;
        }
        num / den
    }

    fn union_size(&self, other: &FinalCountingRangeMinHash) -> f64 {
        let merged =
            FinalRangeMinHash::merge_bottom(&self.hashes(), &other.hashes(), self.size);
        FinalRangeMinHash::estimate_sorted(&merged, self.size)
    }

    fn containment(&self, other: &FinalCountingRangeMinHash) -> Result<f64, SketchError> {
        let own: f64 = self.items.iter().map(|&(_, c)| c as f64).sum();
        if own == 0. {
            return Ok(0.);
        }
        let (num, _) = self.weighted_overlap(other);
        Ok((num / own).clamp(0., 1.))
    }

    fn merge(&mut self, other: &FinalCountingRangeMinHash) -> Result<(), SketchError> {
        // union of weighted sets : max multiplicity on the shared support
        let mut merged = FnvHashMap::<u64, u32>::default();
        for &(h, c) in self.items.iter().chain(other.items.iter()) {
            let e = merged.entry(h).or_insert(0);
            *e = (*e).max(c);
        }
        let mut items: Vec<(u64, u32)> = merged.into_iter().collect();
        items.sort_unstable_by_key(|&(h, _)| h);
        items.truncate(self.size);
        self.items = items;
        Ok(())
    }

    fn write_to(&self, out: &mut dyn Write) -> Result<(), SketchError> {
        write_u32(out, self.size as u32)?;
        write_u64(out, self.items.len() as u64)?;
        for &(h, c) in self.items.iter() {
            write_u64(out, h)?;
            write_u32(out, c)?;
        }
        Ok(())
    }

    fn read_from(
        input: &mut dyn Read,
        params: &SketchParams,
    ) -> Result<FinalCountingRangeMinHash, SketchError> {
        let size = read_u32(input)? as usize;
        if size != params.nb_minima() {
            return Err(SketchError::cache(
                "",
                format!("counting minhash sketch size mismatch, file has {}", size),
            ));
        }
        let nb = read_u64(input)? as usize;
        if nb > size {
            return Err(SketchError::cache("", "more minima than sketch size"));
        }
        let mut items = Vec::with_capacity(nb);
        for _ in 0..nb {
            let h = read_u64(input)?;
            let c = read_u32(input)?;
            items.push((h, c));
        }
        Ok(FinalCountingRangeMinHash { size, items })
    }
}

//===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sketching::countmin::splitmix64;

    #[allow(dead_code)]
    fn log_init_test() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn params(p: u32) -> SketchParams {
        SketchParams::new(21, p, SketchFamily::RangeMinHash)
    }

    fn filled(range: std::ops::Range<u64>, p: u32) -> FinalRangeMinHash {
        let mut mh = RangeMinHash::new(&params(p));
        for i in range {
            mh.add_hash(splitmix64(i));
        }
        mh.finalize()
    }

    #[test]
    fn test_bottom_k_keeps_smallest() {
        let pr = params(4); // 2 minima
        let mut mh = RangeMinHash::new(&pr);
        for h in [50u64, 10, 30, 10, 20] {
            mh.add_hash(h);
        }
        let fin = mh.finalize();
        assert_eq!(fin.minima, vec![10, 20]);
    }

    #[test]
    fn test_cardinality() {
        log_init_test();
        // under-filled : exact
        let fin = filled(0..50, 10);
        assert_eq!(fin.cardinality(), 50.);
        // full : estimator within 20 percent at k = 128
        let fin = filled(0..10_000, 10);
        let est = fin.cardinality();
        debug!("bottom-k estimate {}", est);
        assert!(est > 8_000. && est < 12_000., "estimated {}", est);
    }

    #[test]
    fn test_jaccard_overlap() {
        // half overlap, true ji = 1/3
        let a = filled(0..20_000, 13);
        let b = filled(10_000..30_000, 13);
        let ji = a.jaccard(&b);
        assert!((ji - 1. / 3.).abs() < 0.05, "ji = {}", ji);
        assert!((a.jaccard(&a) - 1.).abs() < 1e-12);
        let u = a.union_size(&b);
        assert!((u - 30_000.).abs() < 4_000., "union = {}", u);
    }

    #[test]
    fn test_merge_union() {
        let a = filled(0..1000, 10);
        let b = filled(500..1500, 10);
        let mut ab = a.clone();
        ab.merge(&b).unwrap();
        let mut ba = b.clone();
        ba.merge(&a).unwrap();
        assert_eq!(ab, ba);
        assert_eq!(ab, filled(0..1500, 10));
        // identity
        let empty = filled(0..0, 10);
        let mut e = empty.clone();
        e.merge(&a).unwrap();
        assert_eq!(e, a);
    }

    #[test]
    fn test_roundtrip() {
        let pr = params(10);
        let fin = filled(0..500, 10);
        let mut buf = Vec::<u8>::new();
        fin.write_to(&mut buf).unwrap();
        let back = FinalRangeMinHash::read_from(&mut buf.as_slice(), &pr).unwrap();
        assert_eq!(fin, back);
    }

    #[test]
    fn test_counting_weights() {
        let pr = SketchParams::new(21, 10, SketchFamily::CountingRangeMinHash);
        let mut a = CountingRangeMinHash::new(&pr);
        let mut b = CountingRangeMinHash::new(&pr);
        for i in 0..100u64 {
            let h = splitmix64(i);
            a.add_hash(h);
            a.add_hash(h); // every kmer twice in a
            b.add_hash(h);
        }
        let fa = a.finalize();
        let fb = b.finalize();
        // weighted ji = sum min / sum max = 100 / 200
        assert!((fa.jaccard(&fb) - 0.5).abs() < 1e-12);
        assert!((fa.jaccard(&fa) - 1.).abs() < 1e-12);
        // b is fully contained in a weight wise
        assert!((fb.containment(&fa).unwrap() - 1.).abs() < 1e-12);
    }

    #[test]
    fn test_counting_roundtrip() {
        let pr = SketchParams::new(21, 10, SketchFamily::CountingRangeMinHash);
        let mut a = CountingRangeMinHash::new(&pr);
        for i in 0..300u64 {
            a.add_hash(splitmix64(i % 100));
        }
        let fin = a.finalize();
        let mut buf = Vec::<u8>::new();
        fin.write_to(&mut buf).unwrap();
        let back = FinalCountingRangeMinHash::read_from(&mut buf.as_slice(), &pr).unwrap();
        assert_eq!(fin, back);
    }
}
