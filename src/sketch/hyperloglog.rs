//! HyperLogLog cardinality estimator for distinct canonical k-mers. Mirrors
//! `khmer::HLLCounter`: registers derive `p` from a target relative error,
//! `add` hashes with [`crate::kmer::murmur_hash`], and the error rate / k-mer
//! size become read-only once the sketch has counted anything.

use crate::error::{CoreError, Result};
use crate::kmer::murmur_hash;

const MIN_P: u8 = 4;
const MAX_P: u8 = 16;

fn alpha(p: u8) -> f64 {
    match p {
        4 => 0.673,
        5 => 0.697,
        6 => 0.709,
        _ => 0.7213 / (1.0 + 1.079 / (1u64 << p) as f64),
    }
}

/// `max_width - floor(log2(w))`: position of the highest set bit, counted
/// from the top of a `max_width`-bit window. `w == 0` saturates at
/// `max_width + 1`, matching the convention that an all-zero suffix after
/// the register index carries the maximum possible rank.
fn rho(w: u64, max_width: u32) -> u8 {
    if w == 0 {
        return (max_width + 1) as u8;
    }
    (max_width - (63 - w.leading_zeros())) as u8
}

#[derive(Debug, Clone)]
pub struct HyperLogLog {
    ksize: u8,
    p: u8,
    m: u64,
    alpha: f64,
    registers: Vec<u8>,
}

impl HyperLogLog {
    /// Builds a counter sized for `error_rate` (the same derivation as
    /// `khmer::HLLCounter(error_rate, ksize)`):
    /// `p = ceil(log2((1.04/error_rate)^2))`, clamped to `4..=18`.
    pub fn new(error_rate: f64, ksize: u8) -> Result<Self> {
        if !(error_rate.is_finite()) || error_rate <= 0.0 {
            return Err(CoreError::BadKmer(
                "hyperloglog error rate must be > 0".into(),
            ));
        }
        let p = ((1.04 / error_rate).powi(2)).log2().ceil() as i64;
        let p = p.clamp(MIN_P as i64, MAX_P as i64) as u8;
        Self::with_precision(p, ksize)
    }

    /// Builds a counter with an explicit register precision `p` (`4..=18`).
    pub fn with_precision(p: u8, ksize: u8) -> Result<Self> {
        if !(MIN_P..=MAX_P).contains(&p) {
            return Err(CoreError::BadKmer(format!(
                "hyperloglog precision must be in {MIN_P}..={MAX_P}, got {p}"
            )));
        }
        let m = 1u64 << p;
        Ok(HyperLogLog {
            ksize,
            p,
            m,
            alpha: alpha(p),
            registers: vec![0u8; m as usize],
        })
    }

    pub fn ksize(&self) -> u8 {
        self.ksize
    }

    /// The achieved relative error, `1.04 / sqrt(m)`.
    pub fn error_rate(&self) -> f64 {
        1.04 / (self.m as f64).sqrt()
    }

    fn is_untouched(&self) -> bool {
        self.registers.iter().all(|&r| r == 0)
    }

    /// Changes the target error rate. Only valid before the first `add`,
    /// mirroring `HLLCounter::set_erate`'s read-only-after-use guard.
    pub fn set_error_rate(&mut self, error_rate: f64) -> Result<()> {
        if !self.is_untouched() {
            return Err(CoreError::ReadOnlyAfterUse("error rate"));
        }
        *self = Self::new(error_rate, self.ksize)?;
        Ok(())
    }

    /// Changes the k-mer size. Only valid before the first `add`.
    pub fn set_ksize(&mut self, ksize: u8) -> Result<()> {
        if !self.is_untouched() {
            return Err(CoreError::ReadOnlyAfterUse("ksize"));
        }
        self.ksize = ksize;
        Ok(())
    }

    fn add_hash(&mut self, hash: u64) {
        let j = (hash & (self.m - 1)) as usize;
        let rank = rho(hash >> self.p, 64 - self.p as u32);
        if rank > self.registers[j] {
            self.registers[j] = rank;
        }
    }

    /// Hashes `kmer` with the murmur-based symmetric hash and folds it into
    /// the registers. Unlike the sketch tables, HLL doesn't need the 2-bit
    /// codec hash: any hash with good avalanche behavior works, and the
    /// murmur hash is already reverse-complement symmetric.
    pub fn add(&mut self, kmer: &[u8]) -> Result<()> {
        let h = murmur_hash(kmer)?;
        self.add_hash(h);
        Ok(())
    }

    pub fn consume_sequence(&mut self, seq: &[u8]) -> Result<u64> {
        if seq.len() < self.ksize as usize {
            return Ok(0);
        }
        let mut n = 0u64;
        for window in seq.windows(self.ksize as usize) {
            self.add(window)?;
            n += 1;
        }
        Ok(n)
    }

    /// Estimated number of distinct k-mers seen so far.
    ///
    /// Uses linear counting when many registers are still zero, and the raw
    /// HyperLogLog estimator otherwise. The original C++ estimator also
    /// subtracts an empirical bias correction from large empirical lookup
    /// tables in the `5m`-and-below range; this crate omits that table (see
    /// the crate's design notes) since the raw estimator is already within
    /// the sketch's stated error bound outside the small-range regime, and
    /// reproducing those tables verbatim isn't warranted by anything this
    /// crate needs to guarantee.
    pub fn estimate_cardinality(&self) -> u64 {
        let v = self.registers.iter().filter(|&&r| r == 0).count() as f64;
        if v > 0.0 {
            let h = self.m as f64 * (self.m as f64 / v).ln();
            if h <= 2.5 * self.m as f64 {
                return h.round() as u64;
            }
        }
        let sum: f64 = self
            .registers
            .iter()
            .map(|&r| 2f64.powi(-(r as i32)))
            .sum();
        let e = self.alpha * (self.m as f64) * (self.m as f64) / sum;
        e.round() as u64
    }

    /// Merges `other`'s registers into `self` by element-wise maximum,
    /// estimating the union cardinality. Both counters must share `p`.
    pub fn merge(&mut self, other: &HyperLogLog) -> Result<()> {
        if self.p != other.p {
            return Err(CoreError::IncompatibleSketch(format!(
                "cannot merge hyperloglog counters with different precision ({} vs {})",
                self.p, other.p
            )));
        }
        for (a, b) in self.registers.iter_mut().zip(other.registers.iter()) {
            *a = (*a).max(*b);
        }
        Ok(())
    }

    pub fn precision(&self) -> u8 {
        self.p
    }

    pub(crate) fn registers(&self) -> &[u8] {
        &self.registers
    }

    pub(crate) fn from_raw_parts(ksize: u8, p: u8, registers: Vec<u8>) -> Self {
        HyperLogLog {
            ksize,
            p,
            m: 1u64 << p,
            alpha: alpha(p),
            registers,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn precision_derived_from_error_rate() {
        let hll = HyperLogLog::new(0.01, 20).unwrap();
        // p = ceil(log2((1.04/0.01)^2)) = ceil(log2(10816)) = 14
        assert_eq!(hll.precision(), 14);
    }

    #[test]
    fn rejects_precision_out_of_range() {
        assert!(HyperLogLog::with_precision(3, 20).is_err());
        assert!(HyperLogLog::with_precision(19, 20).is_err());
    }

    #[test]
    fn estimate_is_zero_for_empty_counter() {
        let hll = HyperLogLog::with_precision(10, 20).unwrap();
        assert_eq!(hll.estimate_cardinality(), 0);
    }

    #[test]
    fn estimate_is_within_error_bound_for_moderate_cardinality() {
        let mut hll = HyperLogLog::with_precision(12, 20).unwrap();
        for i in 0..50_000u64 {
            let s = format!("{:020}", i);
            hll.add(s.as_bytes()).unwrap();
        }
        let est = hll.estimate_cardinality() as f64;
        let err = (est - 50_000.0).abs() / 50_000.0;
        assert!(err < 0.1, "relative error too high: {err}");
    }

    #[test]
    fn set_error_rate_rejected_after_first_add() {
        let mut hll = HyperLogLog::with_precision(10, 20).unwrap();
        hll.add(b"ACGTACGTACGTACGTACGT").unwrap();
        assert!(hll.set_error_rate(0.01).is_err());
    }

    #[test]
    fn merge_of_identical_sets_preserves_cardinality() {
        let mut a = HyperLogLog::with_precision(12, 20).unwrap();
        let mut b = HyperLogLog::with_precision(12, 20).unwrap();
        for i in 0..10_000u64 {
            let s = format!("{:020}", i);
            a.add(s.as_bytes()).unwrap();
            b.add(s.as_bytes()).unwrap();
        }
        a.merge(&b).unwrap();
        let err = (a.estimate_cardinality() as f64 - 10_000.0).abs() / 10_000.0;
        assert!(err < 0.1);
    }

    #[test]
    fn merge_rejects_mismatched_precision() {
        let mut a = HyperLogLog::with_precision(10, 20).unwrap();
        let b = HyperLogLog::with_precision(12, 20).unwrap();
        assert!(a.merge(&b).is_err());
    }
}
