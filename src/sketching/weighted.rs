//! Weighted jaccard through multiplicity bucketing.
//!
//! The wrapper owns a secondary count-min sketch ; every incoming hash is
//! counted there and the pair (hash, occurrence index) is folded into the
//! wrapped sketcher as a fresh element. Two inputs then share the element
//! (h, i) exactly when both contain kmer h at least i times, so the plain
//! jaccard of the wrapped sketches approximates the weighted jaccard of
//! the kmer multisets.

use crate::params::SketchParams;
use crate::sketching::countmin::{splitmix64, CountMin};
use crate::sketching::KmerSketcher;

/// occurrence counts saturate there, higher multiplicities collapse
pub const WEIGHT_CM_MAX_COUNT: u64 = 255;

pub struct WeightedSketcher<S: KmerSketcher> {
    base: S,
    occurrences: CountMin,
}

impl<S: KmerSketcher> KmerSketcher for WeightedSketcher<S> {
    type Final = S::Final;

    fn new(params: &SketchParams) -> Self {
        WeightedSketcher {
            base: S::new(params),
            occurrences: CountMin::new(
                params.get_weight_cm_log2(),
                params.get_weight_cm_nhashes(),
                WEIGHT_CM_MAX_COUNT,
                params.get_run_seed(),
            ),
        }
    }

    fn add_hash(&mut self, hash: u64) {
        let occurrence = self.occurrences.add(hash);
        self.base
            .add_hash(splitmix64(hash ^ occurrence.wrapping_mul(0x9e3779b97f4a7c15)));
    }

    fn finalize(self) -> S::Final {
        self.base.finalize()
    }
}

// the Final type is the wrapped family's one, so nothing else to implement ;
// a weighted sketch compares only against other weighted sketches, which the
// weighted marker in the cache naming guarantees.

//===========================================================================
