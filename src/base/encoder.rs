//! The encoder capability : consume the bytes of a sequence record and
//! stream one 64 bit hash per accepted kmer position.
//!
//! Three variants are provided :
//! - [ExactEncoder] packs kmers on 2 bits (k <= 32), optionally through a
//!   spaced seed mask and a minimizer window, and hashes the (canonical)
//!   packed value with the invertible hash of probminhash.
//! - the ntHash rolling encoder (k <= 64). Ambiguous bases are *not*
//!   filtered by this variant, they are hashed as if they were 'A'. This
//!   matches the recursive hashing scheme which has no notion of a hole.
//! - the cyclic rolling encoder (k <= 64), same recurrence with its own
//!   seed table ; ambiguous bases reset the window so no kmer overlapping
//!   them is emitted.

use std::collections::VecDeque;

use probminhash::invhash::int64_hash;

use crate::base::kmer::*;
use crate::base::nthash;
use crate::error::SketchError;
use crate::params::{parse_spacing, Encoding, SketchParams, WindowScore};

/// An encoder streams the hashes of the accepted kmer positions of one
/// record. Every record (and every sub path of a logical input) starts a
/// fresh window, which makes encoders trivially restartable.
pub trait KmerEncoder: Send {
    fn for_each_hash(&mut self, seq: &[u8], f: &mut dyn FnMut(u64));
}

/// encoder factory keyed by the run parameters
pub fn build_encoder(params: &SketchParams) -> Result<Box<dyn KmerEncoder>, SketchError> {
    params.validate()?;
    match params.get_encoding() {
        Encoding::Bonsai => Ok(Box::new(ExactEncoder::new(params)?)),
        Encoding::NtHash => Ok(Box::new(RollingEncoder::new_nthash(params))),
        Encoding::Cyclic => Ok(Box::new(RollingEncoder::new_cyclic(params))),
    }
}

//========================== exact encoder ==================================

/// Exact 2 bit encoder. The emitted value is the invertible hash of the
/// packed (canonical, possibly spaced) kmer, optionally filtered down to
/// one minimizer per window of `w` bases.
pub struct ExactEncoder {
    k: usize,
    /// number of bases covered by the kmer once spacing is applied
    span: usize,
    /// effective window, >= span ; minimizers are active when strictly greater
    w: usize,
    canonical: bool,
    score: WindowScore,
    /// offsets of the sampled positions inside the span, empty when unspaced
    sampled: Vec<usize>,
    /// ring buffer of the last span base codes, used by the spaced path
    ring: Vec<u8>,
}

impl ExactEncoder {
    pub fn new(params: &SketchParams) -> Result<Self, SketchError> {
        let k = params.get_kmer_size();
        let skips = parse_spacing(params.get_spacing(), k)?;
        let spaced = skips.iter().any(|&s| s > 0);
        let mut sampled = Vec::new();
        if spaced {
            let mut pos = 0usize;
            sampled.push(0);
            for &s in skips.iter() {
                pos += 1 + s as usize;
                sampled.push(pos);
            }
        }
        let span = params.kmer_span();
        Ok(ExactEncoder {
            k,
            span,
            w: params.get_window_size(),
            canonical: params.get_canonical(),
            score: params.get_window_score(),
            sampled,
            ring: vec![0u8; span],
        })
    }

    /// pack the kmer ending at absolute position `end` from the ring buffer
    fn pack_spaced(&self, end: usize) -> u64 {
        let start = end + 1 - self.span;
        let mut v = 0u64;
        for &off in self.sampled.iter() {
            v = (v << 2) | self.ring[(start + off) % self.span] as u64;
        }
        v
    }

    /// minimizer ordering key, smaller wins
    fn score_key(&self, val: u64) -> u64 {
        match self.score {
            WindowScore::Lex => val,
            // entropy selection keeps the most complex kmer of the window
            WindowScore::Entropy => u64::MAX - kmer_entropy(val, self.k).to_bits(),
        }
    }
}

impl KmerEncoder for ExactEncoder {
    fn for_each_hash(&mut self, seq: &[u8], f: &mut dyn FnMut(u64)) {
        let k = self.k;
        let span = self.span;
        let spaced = !self.sampled.is_empty();
        let mask = u64::MAX >> (64 - 2 * k);
        let rev_shift = 2 * (k - 1);
        // number of kmer starts inside the minimizer window
        let nb_wkmers = self.w - span + 1;
        //
        let mut fwd = 0u64;
        let mut rev = 0u64;
        let mut valid = 0usize;
        let mut window = VecDeque::<(usize, u64, u64)>::new();
        let mut last_min_pos = usize::MAX;
        //
        for (i, &b) in seq.iter().enumerate() {
            let code = NT_TO_CODE[b as usize];
            if code == AMBIGUOUS {
                valid = 0;
                window.clear();
                last_min_pos = usize::MAX;
                continue;
            }
            if spaced {
                self.ring[i % span] = code;
            } else {
                fwd = ((fwd << 2) | code as u64) & mask;
                rev = (rev >> 2) | ((3 - code) as u64) << rev_shift;
            }
            valid += 1;
            if valid < span {
                continue;
            }
            let kval = if spaced { self.pack_spaced(i) } else { fwd };
            let rval = if spaced {
                reverse_complement(kval, k)
            } else {
                rev
            };
            let val = if self.canonical { kval.min(rval) } else { kval };
            let hash = int64_hash(val);
            if nb_wkmers == 1 {
                f(hash);
                continue;
            }
            // monotonic queue over the last nb_wkmers kmer positions
            let key = self.score_key(val);
            while let Some(&(_, back_key, _)) = window.back() {
                if back_key > key {
                    window.pop_back();
                } else {
                    break;
                }
            }
            window.push_back((i, key, hash));
            while window.front().map_or(false, |&(pos, _, _)| pos + nb_wkmers <= i) {
                window.pop_front();
            }
            if valid >= span + nb_wkmers - 1 {
                let &(pos, _, minhash) = window.front().unwrap();
                if pos != last_min_pos {
                    f(minhash);
                    last_min_pos = pos;
                }
            }
        }
    }
}

//========================== rolling encoders ===============================

// cyclic polynomial seed table, complements at offset 4 like the ntHash one
const CYCLIC_MAPPING_2B: [u64; 8] = [
    0x9ae16a3b2f90404f,
    0xc3a5c85c97cb3127,
    0xff51afd7ed558ccd,
    0xb492b66fbe98f273,
    /* complement base */
    0xb492b66fbe98f273,
    0xff51afd7ed558ccd,
    0xc3a5c85c97cb3127,
    0x9ae16a3b2f90404f,
];

/// Recursive rotate/xor encoder covering the ntHash and cyclic variants.
/// The two differ only by their seed table and by the treatment of
/// ambiguous bases.
pub struct RollingEncoder {
    k: usize,
    canonical: bool,
    table: &'static [u64; 8],
    /// cyclic variant resets on ambiguous bases, nthash hashes through them
    reset_on_ambiguous: bool,
    ring: Vec<u8>,
}

impl RollingEncoder {
    pub fn new_nthash(params: &SketchParams) -> Self {
        RollingEncoder {
            k: params.get_kmer_size(),
            canonical: params.get_canonical(),
            table: &nthash::BASE_MAPPING_2B,
            reset_on_ambiguous: false,
            ring: vec![0u8; params.get_kmer_size()],
        }
    }

    pub fn new_cyclic(params: &SketchParams) -> Self {
        RollingEncoder {
            k: params.get_kmer_size(),
            canonical: params.get_canonical(),
            table: &CYCLIC_MAPPING_2B,
            reset_on_ambiguous: true,
            ring: vec![0u8; params.get_kmer_size()],
        }
    }

    #[inline(always)]
    fn seed(&self, code: u8) -> u64 {
        self.table[code as usize]
    }

    #[inline(always)]
    fn seed_comp(&self, code: u8) -> u64 {
        self.table[code as usize + nthash::OFFSET_COMP_2B]
    }
}

impl KmerEncoder for RollingEncoder {
    fn for_each_hash(&mut self, seq: &[u8], f: &mut dyn FnMut(u64)) {
        let k = self.k;
        let ku32 = k as u32;
        let mut fwd = 0u64;
        let mut rev = 0u64;
        let mut filled = 0usize;
        for (i, &b) in seq.iter().enumerate() {
            let mut code = NT_TO_CODE[b as usize];
            if code == AMBIGUOUS {
                if self.reset_on_ambiguous {
                    filled = 0;
                    fwd = 0;
                    rev = 0;
                    continue;
                }
                // hashed as 'A', see module doc
                code = 0;
            }
            if filled < k {
                fwd = fwd.rotate_left(1) ^ self.seed(code);
                rev ^= self.seed_comp(code).rotate_left(filled as u32);
                self.ring[i % k] = code;
                filled += 1;
                if filled < k {
                    continue;
                }
            } else {
                let old = self.ring[i % k];
                fwd = fwd.rotate_left(1)
                    ^ self.seed(old).rotate_left(ku32)
                    ^ self.seed(code);
                rev = rev.rotate_right(1)
                    ^ self.seed_comp(old).rotate_right(1)
                    ^ self.seed_comp(code).rotate_left(ku32 - 1);
                self.ring[i % k] = code;
            }
            f(if self.canonical { fwd.min(rev) } else { fwd });
        }
    }
}

//===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::params::SketchFamily;

    #[allow(dead_code)]
    fn log_init_test() {
        let _ = env_logger::builder().is_test(true).try_init();
    }

    fn pack(seq: &str) -> u64 {
        let mut v = 0u64;
        for b in seq.bytes() {
            v = (v << 2) | NT_TO_CODE[b as usize] as u64;
        }
        v
    }

    fn collect_hashes(enc: &mut dyn KmerEncoder, seq: &[u8]) -> Vec<u64> {
        let mut out = Vec::new();
        enc.for_each_hash(seq, &mut |h| out.push(h));
        out
    }

    fn exact_params(k: usize) -> SketchParams {
        SketchParams::new(k, 10, SketchFamily::Hll)
    }

    #[test]
    fn test_exact_counts_and_values() {
        let mut enc = ExactEncoder::new(&exact_params(4).with_canonical(false)).unwrap();
        let hashes = collect_hashes(&mut enc, b"ACGTACGT");
        assert_eq!(hashes.len(), 5);
        assert_eq!(hashes[0], int64_hash(pack("ACGT")));
        assert_eq!(hashes[1], int64_hash(pack("CGTA")));
        // restartable : same encoder, fresh record
        let again = collect_hashes(&mut enc, b"ACGTACGT");
        assert_eq!(hashes, again);
    }

    #[test]
    fn test_exact_ambiguous_resets() {
        let mut enc = ExactEncoder::new(&exact_params(4)).unwrap();
        // windows overlapping the N are dropped
        let hashes = collect_hashes(&mut enc, b"ACGTNACGT");
        assert_eq!(hashes.len(), 2);
        assert_eq!(hashes[0], hashes[1]);
    }

    #[test]
    fn test_exact_canonical_strand_agnostic() {
        let mut enc = ExactEncoder::new(&exact_params(5)).unwrap();
        let seq = b"ACGGTTACCATGGA";
        let mut fwd = collect_hashes(&mut enc, seq);
        // reverse complement the sequence by hand
        let rc: Vec<u8> = seq
            .iter()
            .rev()
            .map(|&b| match b {
                b'A' => b'T',
                b'C' => b'G',
                b'G' => b'C',
                _ => b'A',
            })
            .collect();
        let mut bwd = collect_hashes(&mut enc, &rc);
        fwd.sort_unstable();
        bwd.sort_unstable();
        assert_eq!(fwd, bwd);
    }

    #[test]
    fn test_exact_spaced() {
        // k = 3, spacing 1x2 : sampled offsets 0, 2, 4 over a span of 5
        let params = exact_params(3).with_spacing("1x2").with_canonical(false);
        let mut enc = ExactEncoder::new(&params).unwrap();
        let hashes = collect_hashes(&mut enc, b"ACGTACG");
        assert_eq!(hashes.len(), 3);
        // first window ACGTA samples A G A
        assert_eq!(hashes[0], int64_hash(pack("AGA")));
        assert_eq!(hashes[1], int64_hash(pack("CTC")));
    }

    #[test]
    fn test_minimizer_thins_output() {
        let params = exact_params(4).with_window(8);
        let mut enc = ExactEncoder::new(&params).unwrap();
        let seq = b"ACGGTTACCATGGATTACAGATTACA";
        let hashes = collect_hashes(&mut enc, seq);
        let mut all = ExactEncoder::new(&exact_params(4)).unwrap();
        let dense = collect_hashes(&mut all, seq);
        assert!(!hashes.is_empty());
        assert!(hashes.len() < dense.len());
        // every minimizer is one of the dense hashes
        assert!(hashes.iter().all(|h| dense.contains(h)));
    }

    #[test]
    fn test_rolling_cycle_consistency() {
        // the rolled hash at a position equals the hash of a record
        // starting there
        let params = exact_params(5).with_canonical(false);
        let mut enc = RollingEncoder::new_nthash(&params);
        let hashes = collect_hashes(&mut enc, b"ACGGTTACCA");
        let mut enc2 = RollingEncoder::new_nthash(&params);
        let tail = collect_hashes(&mut enc2, b"CGGTTACCA");
        assert_eq!(hashes.len(), 6);
        assert_eq!(&hashes[1..], &tail[..]);
    }

    #[test]
    fn test_rolling_canonical_strand_agnostic() {
        let params = exact_params(6);
        let seq = b"ACGGTTACCATGGA";
        let rc: Vec<u8> = seq
            .iter()
            .rev()
            .map(|&b| match b {
                b'A' => b'T',
                b'C' => b'G',
                b'G' => b'C',
                _ => b'A',
            })
            .collect();
        let makers: [fn(&SketchParams) -> RollingEncoder; 2] =
            [RollingEncoder::new_nthash, RollingEncoder::new_cyclic];
        for mk in makers {
            let mut fwd = collect_hashes(&mut mk(&params), seq);
            let mut bwd = collect_hashes(&mut mk(&params), &rc);
            fwd.sort_unstable();
            bwd.sort_unstable();
            assert_eq!(fwd, bwd);
        }
    }

    #[test]
    fn test_nthash_cyclic_same_positions() {
        // on DNA without ambiguous bases both rolling encoders accept the
        // same kmer positions
        let params = exact_params(7);
        let seq = b"ACGGTTACCATGGATTACAGATTACA";
        let nt = collect_hashes(&mut RollingEncoder::new_nthash(&params), seq);
        let cy = collect_hashes(&mut RollingEncoder::new_cyclic(&params), seq);
        assert_eq!(nt.len(), cy.len());
        // but through different hash functions
        assert_ne!(nt, cy);
    }

    #[test]
    fn test_cyclic_skips_ambiguous() {
        let params = exact_params(4);
        let with_n = collect_hashes(&mut RollingEncoder::new_cyclic(&params), b"ACGTNACGT");
        assert_eq!(with_n.len(), 2);
        // nthash does not filter, every position once the window is full
        let nt = collect_hashes(&mut RollingEncoder::new_nthash(&params), b"ACGTNACGT");
        assert_eq!(nt.len(), 6);
    }
}
