//! Contains basic tools to encode DNA bases, hash kmers and stream
//! 64 bit kmer hashes out of sequence records.

pub mod nthash;

pub use kmer::*;
pub use encoder::*;

pub mod kmer;
pub mod encoder;
