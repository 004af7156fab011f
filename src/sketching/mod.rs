//! The sketch families behind one uniform capability.
//!
//! A [KmerSketcher] is the mutable, build phase object a pipeline worker
//! feeds pre-hashed kmers into. Finalization is a one shot move to the
//! [FinalSketch] terminal form on which all comparisons, the union
//! operation and (de)serialization are defined. For several families
//! finalization is the identity, for the minhash ones it sorts or
//! truncates.
//!
//! Serialized sketches are little endian and self describing : a magic,
//! the family tag and the relevant parameters are echoed in a header and
//! verified on reload. A mismatch is reported as cache corruption, never
//! silently recomputed.

pub mod bbminhash;
pub mod bloom;
pub mod countmin;
pub mod hashset;
pub mod hll;
pub mod minhash;
pub mod superminhash;
pub mod weighted;

pub use bbminhash::{BBitMinHash, CountingBBitMinHash};
pub use bloom::BloomSketch;
pub use countmin::CountMin;
pub use hashset::FullHashSet;
pub use hll::Hll;
pub use minhash::{CountingRangeMinHash, FinalCountingRangeMinHash, FinalRangeMinHash, RangeMinHash};
pub use superminhash::SuperMinHashSketch;
pub use weighted::WeightedSketcher;

use std::io::{Read, Write};

use crate::error::SketchError;
use crate::params::{SketchFamily, SketchParams};

/// build phase of a sketch : owned by exactly one worker at a time
pub trait KmerSketcher: Send {
    type Final: FinalSketch;

    fn new(params: &SketchParams) -> Self;

    /// fold one pre-hashed kmer into the sketch
    fn add_hash(&mut self, hash: u64);

    /// one shot move to the terminal form ; callers must not retain the
    /// pre-final value
    fn finalize(self) -> Self::Final;
}

/// terminal form of a sketch : comparisons, union, serialization
pub trait FinalSketch: Sized + Send + Sync {
    fn family() -> SketchFamily;

    /// best available estimate of the number of distinct kmers
    fn cardinality(&self) -> f64;

    fn jaccard(&self, other: &Self) -> f64;

    fn union_size(&self, other: &Self) -> f64;

    /// |A inter B| / |A| where the family can express it
    fn containment(&self, other: &Self) -> Result<f64, SketchError>;

    /// monoidal union where the family supports it
    fn merge(&mut self, other: &Self) -> Result<(), SketchError>;

    fn write_to(&self, out: &mut dyn Write) -> Result<(), SketchError>;

    fn read_from(input: &mut dyn Read, params: &SketchParams) -> Result<Self, SketchError>;
}

//====================== dump format helpers ================================

const MAGIC_SKETCH_DUMP: u32 = 0x5db8cea3;

pub(crate) fn write_u32(out: &mut dyn Write, v: u32) -> std::io::Result<()> {
    out.write_all(&v.to_le_bytes())
}

pub(crate) fn write_u64(out: &mut dyn Write, v: u64) -> std::io::Result<()> {
    out.write_all(&v.to_le_bytes())
}

pub(crate) fn write_f64(out: &mut dyn Write, v: f64) -> std::io::Result<()> {
    out.write_all(&v.to_le_bytes())
}

pub(crate) fn read_u32(input: &mut dyn Read) -> std::io::Result<u32> {
    let mut buf = [0u8; 4];
    input.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}

pub(crate) fn read_u64(input: &mut dyn Read) -> std::io::Result<u64> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

pub(crate) fn read_f64(input: &mut dyn Read) -> std::io::Result<f64> {
    let mut buf = [0u8; 8];
    input.read_exact(&mut buf)?;
    Ok(f64::from_le_bytes(buf))
}

/// common sketch file header : magic, family tag and the parameters the
/// sketch contents depend upon
pub(crate) fn write_header(
    out: &mut dyn Write,
    family: SketchFamily,
    params: &SketchParams,
) -> std::io::Result<()> {
    write_u32(out, MAGIC_SKETCH_DUMP)?;
    out.write_all(&[family.tag()])?;
    write_u32(out, params.get_kmer_size() as u32)?;
    write_u32(out, params.get_window_size() as u32)?;
    write_u32(out, params.get_log2_sketch_size())?;
    write_u32(out, params.get_b_bits())?;
    out.write_all(&[params.get_canonical() as u8])?;
    Ok(())
}

/// verify the header against the run parameters. The path context is
/// attached by the caller.
pub(crate) fn check_header(
    input: &mut dyn Read,
    family: SketchFamily,
    params: &SketchParams,
) -> Result<(), SketchError> {
    let magic = read_u32(input)?;
    if magic != MAGIC_SKETCH_DUMP {
        return Err(SketchError::cache("", "bad magic, not a sketch dump"));
    }
    let mut tag = [0u8; 1];
    input.read_exact(&mut tag)?;
    if tag[0] != family.tag() {
        return Err(SketchError::cache(
            "",
            format!("family tag {} does not match requested family", tag[0]),
        ));
    }
    let k = read_u32(input)?;
    let w = read_u32(input)?;
    let p = read_u32(input)?;
    let b = read_u32(input)?;
    let mut canon = [0u8; 1];
    input.read_exact(&mut canon)?;
    if k != params.get_kmer_size() as u32
        || w != params.get_window_size() as u32
        || p != params.get_log2_sketch_size()
        || b != params.get_b_bits()
        || canon[0] != params.get_canonical() as u8
    {
        return Err(SketchError::cache(
            "",
            format!(
                "sketch was built with k={} w={} p={} b={} canonical={}, run asks k={} w={} p={} b={} canonical={}",
                k,
                w,
                p,
                b,
                canon[0] != 0,
                params.get_kmer_size(),
                params.get_window_size(),
                params.get_log2_sketch_size(),
                params.get_b_bits(),
                params.get_canonical()
            ),
        ));
    }
    Ok(())
}

/// generic union size when intersection derives from jaccard :
/// U = (|A| + |B|) / (1 + J)
pub(crate) fn union_from_jaccard(card_a: f64, card_b: f64, ji: f64) -> f64 {
    if card_a + card_b == 0. {
        return 0.;
    }
    (card_a + card_b) / (1. + ji)
}
