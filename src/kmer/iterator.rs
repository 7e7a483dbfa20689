//! Lazy, O(1)-amortized cursor over the canonical k-mers of a sequence.
//!
//! Mirrors `khmer::KmerIterator`: the first window is fully hashed, then
//! each subsequent window is derived from the previous one by shifting the
//! forward hash left and the reverse hash right, rather than re-encoding the
//! whole window.

use super::{bitmask, canonical, encode, twobit_comp, twobit_repr, KmerHash, MAX_KSIZE};
use crate::error::{CoreError, Result};

/// Yields `Result<KmerHash>` so a non-ACGT base mid-sequence surfaces as an
/// error at the position it occurs, rather than silently truncating the
/// sequence. Callers that want to skip invalid runs should pre-normalize.
pub struct KmerIterator<'a> {
    seq: &'a [u8],
    k: u8,
    bitmask: u64,
    nbits_sub1: u32,
    index: usize,
    length: usize,
    kmer_f: u64,
    kmer_r: u64,
    initialized: bool,
    finished: bool,
}

impl<'a> KmerIterator<'a> {
    pub fn new(seq: &'a [u8], k: u8) -> Result<Self> {
        if k == 0 || k > MAX_KSIZE {
            return Err(CoreError::BadKmer(format!(
                "k must be in 1..={MAX_KSIZE}, got {k}"
            )));
        }
        Ok(KmerIterator {
            seq,
            k,
            bitmask: bitmask(k),
            nbits_sub1: (k as u32) * 2 - 2,
            index: k as usize,
            length: seq.len(),
            kmer_f: 0,
            kmer_r: 0,
            initialized: false,
            finished: seq.len() < k as usize,
        })
    }

    fn first(&mut self) -> Result<KmerHash> {
        let (f, r) = encode(&self.seq[0..self.k as usize], self.k)?;
        self.kmer_f = f;
        self.kmer_r = r;
        self.initialized = true;
        Ok(canonical(f, r))
    }
}

impl<'a> Iterator for KmerIterator<'a> {
    type Item = Result<KmerHash>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }

        if !self.initialized {
            return Some(self.first());
        }

        if self.index >= self.length {
            self.finished = true;
            return None;
        }

        let ch = self.seq[self.index];
        self.index += 1;

        let f_bit = match twobit_repr(ch) {
            Ok(v) => v,
            Err(e) => {
                self.finished = true;
                return Some(Err(e));
            }
        };
        let r_bit = match twobit_comp(ch) {
            Ok(v) => v,
            Err(e) => {
                self.finished = true;
                return Some(Err(e));
            }
        };

        self.kmer_f = ((self.kmer_f << 2) | f_bit) & self.bitmask;
        self.kmer_r = (self.kmer_r >> 2) | (r_bit << self.nbits_sub1);

        Some(Ok(canonical(self.kmer_f, self.kmer_r)))
    }
}
