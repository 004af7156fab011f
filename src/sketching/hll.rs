//! HyperLogLog sketch over pre-hashed kmers.
//!
//! 2^p one byte registers, the high p bits of a hash select the register
//! and the rank of the first set bit of the remaining ones updates it.
//! Three cardinality estimators are available : the original harmonic
//! mean with small range correction, Ertl's improved raw estimator
//! (sigma/tau corrections) and Ertl's Poisson model maximum likelihood
//! solved by bisection. Joint quantities (union, intersection, jaccard)
//! go through the register-wise max union and inclusion/exclusion under
//! the joint estimator selector.

use std::io::{Read, Write};

use crate::error::SketchError;
use crate::params::{HllEstimator, SketchFamily, SketchParams};
use crate::sketching::{read_u32, write_u32, FinalSketch, KmerSketcher};

const ALPHA_INF: f64 = 0.721_347_520_444_481_7; // 1 / (2 ln 2)

#[derive(Clone, Debug, PartialEq)]
pub struct Hll {
    p: u32,
    registers: Vec<u8>,
    estim: HllEstimator,
    jestim: HllEstimator,
}

impl Hll {
    fn q(&self) -> u32 {
        64 - self.p
    }

    fn estimate_with(&self, estim: HllEstimator, registers: &[u8]) -> f64 {
        let m = registers.len() as f64;
        match estim {
            HllEstimator::Original => original_estimate(registers),
            HllEstimator::ErtlImproved => {
                let counts = histogram_of(registers, self.q());
                ertl_improved_estimate(&counts, m, self.q())
            }
            HllEstimator::ErtlMle | HllEstimator::ErtlJointMle => {
                let counts = histogram_of(registers, self.q());
                ertl_ml_estimate(&counts, m, self.q())
            }
        }
    }

    fn union_registers(&self, other: &Hll) -> Vec<u8> {
        self.registers
            .iter()
            .zip(other.registers.iter())
            .map(|(&a, &b)| a.max(b))
            .collect()
    }

    /// (|A|, |B|, |A u B|) under the joint estimator
    fn joint_cardinalities(&self, other: &Hll) -> (f64, f64, f64) {
        let ea = self.estimate_with(self.jestim, &self.registers);
        let eb = self.estimate_with(self.jestim, &other.registers);
        let eu = self.estimate_with(self.jestim, &self.union_registers(other));
        (ea, eb, eu)
    }
}

fn histogram_of(registers: &[u8], q: u32) -> Vec<u64> {
    let mut counts = vec![0u64; q as usize + 2];
    for &r in registers.iter() {
        counts[r as usize] += 1;
    }
    counts
}

/// the Flajolet harmonic mean estimator with small range correction
fn original_estimate(registers: &[u8]) -> f64 {
    let m = registers.len() as f64;
    let alpha = match registers.len() {
        16 => 0.673,
        32 => 0.697,
        64 => 0.709,
        _ => 0.7213 / (1. + 1.079 / m),
    };
    let mut sum = 0f64;
    let mut zeros = 0u64;
    for &r in registers.iter() {
        sum += 2f64.powi(-(r as i32));
        if r == 0 {
            zeros += 1;
        }
    }
    let raw = alpha * m * m / sum;
    if raw <= 2.5 * m && zeros > 0 {
        return m * (m / zeros as f64).ln();
    }
    raw
}

// sigma and tau corrections of Ertl's improved raw estimator

fn ertl_sigma(x: f64) -> f64 {
    if x == 1. {
        return f64::INFINITY;
    }
    let mut x = x;
    let mut y = 1f64;
    let mut z = x;
    loop {
        x = x * x;
        let z_prev = z;
        z += x * y;
        y += y;
        if z == z_prev {
            return z;
        }
    }
}

fn ertl_tau(x: f64) -> f64 {
    if x == 0. || x == 1. {
        return 0.;
    }
    let mut x = x;
    let mut y = 1f64;
    let mut z = 1. - x;
    loop {
        x = x.sqrt();
        let z_prev = z;
        y *= 0.5;
        z -= (1. - x).powi(2) * y;
        if z == z_prev {
            return z / 3.;
        }
    }
}

fn ertl_improved_estimate(counts: &[u64], m: f64, q: u32) -> f64 {
    let mut z = m * ertl_tau((m - counts[q as usize + 1] as f64) / m);
    for k in (1..=q as usize).rev() {
        z += counts[k] as f64;
        z *= 0.5;
    }
    z += m * ertl_sigma(counts[0] as f64 / m);
    if z == 0. {
        return f64::INFINITY;
    }
    ALPHA_INF * m * m / z
}

/// Ertl's Poisson model maximum likelihood estimate. The log likelihood is
/// concave in the per-register intensity so its derivative has a single
/// root, found by doubling then bisection. Numerically everything is
/// expressed through expm1 so deep registers do not underflow.
fn ertl_ml_estimate(counts: &[u64], m: f64, q: u32) -> f64 {
    if counts[0] as f64 == m {
        return 0.;
    }
    if counts[q as usize + 1] as f64 == m {
        return f64::INFINITY;
    }
    // derivative of the log likelihood at per-register intensity x
    let deriv = |x: f64| -> f64 {
        let mut d = -(counts[0] as f64);
        for k in 1..=q as usize {
            if counts[k] == 0 {
                continue;
            }
            let a = 2f64.powi(-(k as i32));
            // d/dx ln(e^{-ax} - e^{-2ax}) = a (2t - 1) / (1 - t), t = e^{-ax}
            let em1 = (-a * x).exp_m1(); // t - 1
            d += counts[k] as f64 * a * (1. + 2. * em1) / (-em1);
        }
        let csat = counts[q as usize + 1];
        if csat > 0 {
            let aq = 2f64.powi(-(q as i32));
            let em1 = (-aq * x).exp_m1();
            d += csat as f64 * aq * (1. + em1) / (-em1);
        }
        d
    };
    let mut lo = 1e-12f64;
    let mut hi = 1f64;
    while deriv(hi) > 0. {
        lo = hi;
        hi *= 2.;
        if hi > 1e19 {
            break;
        }
    }
    for _ in 0..100 {
        let mid = 0.5 * (lo + hi);
        if deriv(mid) > 0. {
            lo = mid;
        } else {
            hi = mid;
        }
    }
    m * 0.5 * (lo + hi)
}

impl KmerSketcher for Hll {
    type Final = Hll;

    fn new(params: &SketchParams) -> Self {
        let p = params.get_log2_sketch_size();
        Hll {
            p,
            registers: vec![0u8; 1usize << p],
            estim: params.get_hll_estim(),
            jestim: params.get_hll_jestim(),
        }
    }

    fn add_hash(&mut self, hash: u64) {
        let idx = (hash >> (64 - self.p)) as usize;
        let w = hash << self.p;
        let rho = if w == 0 {
            (self.q() + 1) as u8
        } else {
            (w.leading_zeros() + 1) as u8
        };
        if rho > self.registers[idx] {
            self.registers[idx] = rho;
        }
    }

    fn finalize(self) -> Hll {
        self
    }
}

impl FinalSketch for Hll {
    fn family() -> SketchFamily {
        SketchFamily::Hll
    }

    fn cardinality(&self) -> f64 {
        self.estimate_with(self.estim, &self.registers)
    }

    fn jaccard(&self, other: &Hll) -> f64 {
        let (ea, eb, eu) = self.joint_cardinalities(other);
        if eu <= 0. {
            // two empty sets are identical
            return 1.;
        }
        let inter = (ea + eb - eu).max(0.);
        (inter / eu).clamp(0., 1.)
    }

    fn union_size(&self, other: &Hll) -> f64 {
        let (_, _, eu) = self.joint_cardinalities(other);
        eu
    }

    fn containment(&self, other: &Hll) -> Result<f64, SketchError> {
        let (ea, eb, eu) = self.joint_cardinalities(other);
        if ea <= 0. {
            return Ok(0.);
        }
        let inter = (ea + eb - eu).max(0.);
        Ok((inter / ea).clamp(0., 1.))
    }

    fn merge(&mut self, other: &Hll) -> Result<(), SketchError> {
        if self.registers.len() != other.registers.len() {
            return Err(SketchError::Unsupported(
                "cannot merge HLL sketches of different sizes".to_string(),
            ));
        }
        for (r, &o) in self.registers.iter_mut().zip(other.registers.iter()) {
            *r = (*r).max(o);
        }
        Ok(())
    }

    fn write_to(&self, out: &mut dyn Write) -> Result<(), SketchError> {
        write_u32(out, self.p)?;
        out.write_all(&self.registers)?;
        Ok(())
    }

    fn read_from(input: &mut dyn Read, params: &SketchParams) -> Result<Hll, SketchError> {
        let p = read_u32(input)?;
        if p != params.get_log2_sketch_size() {
            return Err(SketchError::cache(
                "",
                format!("HLL register count mismatch, file has p = {}", p),
            ));
        }
        let mut registers = vec![0u8; 1usize << p];
        input.read_exact(&mut registers)?;
        Ok(Hll {
            p,
            registers,
            estim: params.get_hll_estim(),
            jestim: params.get_hll_jestim(),
        })
    }
}

//===========================================================================

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sketching::countmin::splitmix64;

    fn filled(n: u64, p: u32) -> Hll {
        let params = SketchParams::new(21, p, SketchFamily::Hll);
        let mut h = Hll::new(&params);
        for i in 0..n {
            h.add_hash(splitmix64(i));
        }
        h
    }

    #[test]
    fn test_estimate_small_range() {
        let h = filled(30, 10);
        for estim in [
            HllEstimator::Original,
            HllEstimator::ErtlImproved,
            HllEstimator::ErtlMle,
        ] {
            let est = h.estimate_with(estim, &h.registers);
            assert!(est > 25. && est < 35., "{:?} estimated {}", estim, est);
        }
    }

    #[test]
    fn test_estimate_mid_range() {
        let h = filled(100_000, 12);
        for estim in [HllEstimator::ErtlImproved, HllEstimator::ErtlMle] {
            let est = h.estimate_with(estim, &h.registers);
            assert!(
                (est - 100_000.).abs() < 10_000.,
                "{:?} estimated {}",
                estim,
                est
            );
        }
    }

    #[test]
    fn test_empty_is_zero() {
        let h = filled(0, 10);
        assert_eq!(h.cardinality(), 0.);
    }

    #[test]
    fn test_self_jaccard() {
        let h = filled(5_000, 12);
        assert!((h.jaccard(&h) - 1.0).abs() < 1e-12);
    }

    #[test]
    fn test_union_commutes() {
        let params = SketchParams::new(21, 10, SketchFamily::Hll);
        let a = filled(1000, 10);
        let b = filled(2000, 10);
        let mut ab = Hll::new(&params);
        ab.merge(&a).unwrap();
        ab.merge(&b).unwrap();
        let mut ba = Hll::new(&params);
        ba.merge(&b).unwrap();
        ba.merge(&a).unwrap();
        assert_eq!(ab, ba);
        // union identity
        let mut e = Hll::new(&params);
        e.merge(&a).unwrap();
        assert_eq!(e.registers, a.registers);
    }

    #[test]
    fn test_jaccard_overlap() {
        let params = SketchParams::new(21, 14, SketchFamily::Hll);
        // a = [0, 20000), b = [10000, 30000) : true jaccard 1/3
        let mut a = Hll::new(&params);
        let mut b = Hll::new(&params);
        for i in 0..20_000u64 {
            a.add_hash(splitmix64(i));
        }
        for i in 10_000..30_000u64 {
            b.add_hash(splitmix64(i));
        }
        let ji = a.jaccard(&b);
        assert!((ji - 1. / 3.).abs() < 0.05, "ji = {}", ji);
        let u = a.union_size(&b);
        assert!((u - 30_000.).abs() < 3_000., "union = {}", u);
    }

    #[test]
    fn test_roundtrip() {
        let params = SketchParams::new(21, 10, SketchFamily::Hll);
        let h = filled(1234, 10);
        let mut buf = Vec::<u8>::new();
        h.write_to(&mut buf).unwrap();
        let back = Hll::read_from(&mut buf.as_slice(), &params).unwrap();
        assert_eq!(h, back);
        let mut buf2 = Vec::<u8>::new();
        back.write_to(&mut buf2).unwrap();
        assert_eq!(buf, buf2);
    }
}
