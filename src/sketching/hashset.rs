//! The exact family : a plain hash set of every distinct kmer hash.
//! Expensive in memory but every operation is exact, which makes it the
//! reference the probabilistic families are checked against in tests.
//! Serialization sorts the hashes so the on-disk form is byte stable.

use std::io::{Read, Write};

use fnv::FnvHashSet;

use crate::error::SketchError;
use crate::params::{SketchFamily, SketchParams};
use crate::sketching::{read_u64, write_u64, FinalSketch, KmerSketcher};

#[derive(Clone, Debug, PartialEq)]
pub struct FullHashSet {
    hashes: FnvHashSet<u64>,
}

impl FullHashSet {
    fn intersection_size(&self, other: &FullHashSet) -> usize {
        let (small, large) = if self.hashes.len() <= other.hashes.len() {
            (&self.hashes, &other.hashes)
        } else {
            (&other.hashes, &self.hashes)
        };
        small.iter().filter(|h| large.contains(h)).count()
    }
}

impl KmerSketcher for FullHashSet {
    type Final = FullHashSet;

    fn new(_params: &SketchParams) -> Self {
        FullHashSet {
            hashes: FnvHashSet::default(),
        }
    }

    fn add_hash(&mut self, hash: u64) {
        self.hashes.insert(hash);
    }

    fn finalize(self) -> FullHashSet {
        self
    }
}

impl FinalSketch for FullHashSet {
    fn family() -> SketchFamily {
        SketchFamily::FullHashSet
    }

    fn cardinality(&self) -> f64 {
        self.hashes.len() as f64
    }

    fn jaccard(&self, other: &FullHashSet) -> f64 {
        let inter = self.intersection_size(other);
        let union = self.hashes.len() + other.hashes.len() - inter;
        if union == 0 {
            return 1.;
        }
        inter as f64 / union as f64
    }

    fn union_size(&self, other: &FullHashSet) -> f64 {
        (self.hashes.len() + other.hashes.len() - self.intersection_size(other)) as f64
    }

    fn containment(&self, other: &FullHashSet) -> Result<f64, SketchError> {
        if self.hashes.is_empty() {
            return Ok(0.);
        }
        Ok(self.intersection_size(other) as f64 / self.hashes.len() as f64)
    }

    fn merge(&mut self, other: &FullHashSet) -> Result<(), SketchError> {
        self.hashes.extend(other.hashes.iter().copied());
        Ok(())
    }

    fn write_to(&self, out: &mut dyn Write) -> Result<(), SketchError> {
        let mut sorted: Vec<u64> = self.hashes.iter().copied().collect();
        sorted.sort_unstable();
        write_u64(out, sorted.len() as u64)?;
        for h in sorted {
            write_u64(out, h)?;
        }
        Ok(())
    }

    fn read_from(input: &mut dyn Read, _params: &SketchParams) -> Result<FullHashSet, SketchError> {
        let nb = read_u64(input)? as usize;
        let mut hashes = FnvHashSet::with_capacity_and_hasher(nb, Default::default());
        for _ in 0..nb {
            hashes.insert(read_u64(input)?);
        }
        if hashes.len() != nb {
            return Err(SketchError::cache("", "duplicate hashes in set dump"));
        }
        Ok(FullHashSet { hashes })
    }
}

//===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sketching::countmin::splitmix64;

    fn filled(range: std::ops::Range<u64>) -> FullHashSet {
        let params = SketchParams::new(21, 10, SketchFamily::FullHashSet);
        let mut s = FullHashSet::new(&params);
        for i in range {
            s.add_hash(splitmix64(i));
        }
        s
    }

    #[test]
    fn test_exact_ops() {
        let a = filled(0..200);
        let b = filled(100..300);
        assert_eq!(a.cardinality(), 200.);
        assert_eq!(a.union_size(&b), 300.);
        assert!((a.jaccard(&b) - 100. / 300.).abs() < 1e-12);
        assert_eq!(a.containment(&b).unwrap(), 0.5);
        assert_eq!(filled(0..0).jaccard(&filled(0..0)), 1.);
    }

    #[test]
    fn test_containment_asymmetry() {
        let small = filled(0..100);
        let big = filled(0..10_000);
        assert_eq!(small.containment(&big).unwrap(), 1.0);
        assert!((big.containment(&small).unwrap() - 0.01).abs() < 1e-12);
    }

    #[test]
    fn test_merge() {
        let a = filled(0..100);
        let b = filled(50..150);
        let mut u = a.clone();
        u.merge(&b).unwrap();
        assert_eq!(u, filled(0..150));
    }

    #[test]
    fn test_roundtrip_is_byte_stable() {
        let params = SketchParams::new(21, 10, SketchFamily::FullHashSet);
        let s = filled(0..500);
        let mut buf = Vec::<u8>::new();
        s.write_to(&mut buf).unwrap();
        let back = FullHashSet::read_from(&mut buf.as_slice(), &params).unwrap();
        assert_eq!(s, back);
        let mut buf2 = Vec::<u8>::new();
        back.write_to(&mut buf2).unwrap();
        assert_eq!(buf, buf2);
    }
}
