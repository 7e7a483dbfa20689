//! A counting sketch: `N` tables of saturating 8-bit counters, plus an exact
//! overflow map ("bigcount") for k-mers that saturate every table. Mirrors
//! `khmer::CountingHash`'s `_bigcount_spin_lock`-guarded `std::map` overflow.

use std::collections::HashMap;
use std::io::{Read, Write};
use std::path::Path;

use super::{check_kmer_length, Sketchable, TableSizes};
use crate::error::{CoreError, Result};
use crate::io::format::{self, FileKind};
use crate::kmer::{canonical_hash, KmerHash, KmerIterator};

pub const DEFAULT_N_TABLES: usize = 4;
const MAX_COUNT: u8 = u8::MAX;

#[derive(Debug, Clone)]
pub struct CountingSketch {
    ksize: u8,
    sizes: TableSizes,
    tables: Vec<Vec<u8>>,
    bigcounts: HashMap<KmerHash, u16>,
    n_unique: u64,
    use_bigcount: bool,
}

impl CountingSketch {
    pub fn new(ksize: u8, n_tables: usize, max_table_size: u64) -> Result<Self> {
        let sizes = TableSizes::new(n_tables, max_table_size)?;
        let tables = sizes.0.iter().map(|&sz| vec![0u8; sz as usize]).collect();
        Ok(CountingSketch {
            ksize,
            sizes,
            tables,
            bigcounts: HashMap::new(),
            n_unique: 0,
            use_bigcount: true,
        })
    }

    /// Disables the exact overflow map: counts saturate at `u8::MAX` instead
    /// of continuing to track an exact value past that point. Mirrors
    /// `khmer::CountingHash::set_use_bigcount(false)`.
    pub fn set_use_bigcount(&mut self, enabled: bool) {
        self.use_bigcount = enabled;
    }

    pub fn count(&mut self, kmer: &[u8]) -> Result<()> {
        check_kmer_length(kmer.len(), self.ksize)?;
        let hash = canonical_hash(kmer, self.ksize)?;
        self.increment(hash);
        Ok(())
    }

    pub(crate) fn increment(&mut self, hash: KmerHash) {
        let mut min_before = MAX_COUNT;
        let mut max_before = 0u8;
        let n = self.sizes.len();
        for t in 0..n {
            let bucket = self.sizes.bucket(t, hash);
            let cell = &mut self.tables[t][bucket];
            min_before = min_before.min(*cell);
            max_before = max_before.max(*cell);
            if *cell < MAX_COUNT {
                *cell += 1;
            }
        }
        if min_before == 0 {
            self.n_unique += 1;
        }
        if self.use_bigcount && max_before == MAX_COUNT {
            let entry = self.bigcounts.entry(hash).or_insert(MAX_COUNT as u16);
            *entry = entry.saturating_add(1);
        }
    }

    /// Returns the estimated count of `kmer`: the minimum across all tables,
    /// or the exact overflow count once the sketch has saturated on it.
    pub fn get_count(&self, kmer: &[u8]) -> Result<u64> {
        check_kmer_length(kmer.len(), self.ksize)?;
        let hash = canonical_hash(kmer, self.ksize)?;
        Ok(self.get_count_hash(hash))
    }

    pub(crate) fn get_count_hash(&self, hash: KmerHash) -> u64 {
        if let Some(&big) = self.bigcounts.get(&hash) {
            return big as u64;
        }
        (0..self.sizes.len())
            .map(|t| self.tables[t][self.sizes.bucket(t, hash)] as u64)
            .min()
            .unwrap_or(0)
    }

    /// The minimum count across a window; the spectral-error-position scan
    /// uses this to decide whether a base is part of an erroneous k-mer.
    pub fn get_min_count(&self, seq: &[u8]) -> Result<u64> {
        let mut min = u64::MAX;
        for hash in KmerIterator::new(seq, self.ksize)? {
            min = min.min(self.get_count_hash(hash?));
        }
        Ok(if min == u64::MAX { 0 } else { min })
    }

    /// Median of the sketch's per-window counts over `seq`, used by abundance
    /// normalization pipelines to decide whether to keep a read.
    pub fn get_median_count(&self, seq: &[u8]) -> Result<u64> {
        let mut counts: Vec<u64> = KmerIterator::new(seq, self.ksize)?
            .map(|r| r.map(|h| self.get_count_hash(h)))
            .collect::<Result<_>>()?;
        if counts.is_empty() {
            return Ok(0);
        }
        counts.sort_unstable();
        Ok(counts[counts.len() / 2])
    }

    /// Positions (0-based, into `seq`) whose overlapping k-mer windows all
    /// read abundance `<= cutoff`: candidate sequencing errors. Mirrors
    /// `khmer::CountingHash::find_spectral_error_positions`.
    pub fn find_spectral_error_positions(&self, seq: &[u8], cutoff: u64) -> Result<Vec<usize>> {
        let k = self.ksize as usize;
        if seq.len() < k {
            return Ok(Vec::new());
        }
        let counts: Vec<u64> = KmerIterator::new(seq, self.ksize)?
            .map(|r| r.map(|h| self.get_count_hash(h)))
            .collect::<Result<_>>()?;

        let mut low_windows = vec![false; counts.len()];
        for (i, &c) in counts.iter().enumerate() {
            low_windows[i] = c <= cutoff;
        }

        let mut positions = Vec::new();
        for pos in 0..seq.len() {
            let lo = pos.saturating_sub(k - 1);
            let hi = pos.min(counts.len() - 1);
            if (lo..=hi).any(|w| low_windows[w]) {
                positions.push(pos);
            }
        }
        Ok(positions)
    }

    /// Removes every k-mer in `seq` whose count is `< cutoff` from the
    /// tables, by zeroing the bucket that sits at the minimum for that
    /// k-mer. Mirrors `trim_below_abundance`.
    pub fn trim_below_abundance(&mut self, seq: &[u8], cutoff: u64) -> Result<()> {
        let hashes: Vec<KmerHash> = KmerIterator::new(seq, self.ksize)?.collect::<Result<_>>()?;
        for hash in hashes {
            if self.get_count_hash(hash) < cutoff {
                self.zero(hash);
            }
        }
        Ok(())
    }

    /// Removes every k-mer in `seq` whose count is `>= cutoff`. Mirrors
    /// `trim_on_abundance`, used to strip high-abundance repeats before
    /// partitioning.
    pub fn trim_on_abundance(&mut self, seq: &[u8], cutoff: u64) -> Result<()> {
        let hashes: Vec<KmerHash> = KmerIterator::new(seq, self.ksize)?.collect::<Result<_>>()?;
        for hash in hashes {
            if self.get_count_hash(hash) >= cutoff {
                self.zero(hash);
            }
        }
        Ok(())
    }

    fn zero(&mut self, hash: KmerHash) {
        self.bigcounts.remove(&hash);
        for t in 0..self.sizes.len() {
            let bucket = self.sizes.bucket(t, hash);
            self.tables[t][bucket] = 0;
        }
    }

    /// Histogram of abundance -> number of distinct k-mers seen across
    /// `sequences` at that abundance, capped at `max_abundance` (anything
    /// above folds into the last bin). Mirrors
    /// `CountingHash::abundance_distribution`, which walks a read parser
    /// rather than the raw tables, since a single bucket's byte can't be
    /// attributed back to one k-mer once other k-mers have hashed into it.
    pub fn abundance_distribution<'a, I>(&self, sequences: I, max_abundance: u64) -> Result<Vec<u64>>
    where
        I: IntoIterator<Item = &'a [u8]>,
    {
        let mut hist = vec![0u64; max_abundance as usize + 1];
        let mut seen = std::collections::HashSet::new();
        for seq in sequences {
            for hash in KmerIterator::new(seq, self.ksize)? {
                let hash = hash?;
                if seen.insert(hash) {
                    let idx = self.get_count_hash(hash).min(max_abundance) as usize;
                    hist[idx] += 1;
                }
            }
        }
        Ok(hist)
    }

    /// Folds `other`'s counts into `self` by table-wise saturating add,
    /// plus a union of the overflow maps. Used to fan-in per-worker
    /// sketches after parallel ingestion. Saturating add commutes and
    /// associates the same way the per-read increments it stands in for
    /// do, so the final table state does not depend on how ingestion was
    /// split across workers; the only place this merge is an approximation
    /// is the bigcount transition, since a k-mer that saturates in both
    /// `self` and `other` independently gets its overflow counted twice
    /// rather than once.
    pub fn merge(&mut self, other: &CountingSketch) -> Result<()> {
        if self.ksize != other.ksize || self.sizes.0 != other.sizes.0 {
            return Err(CoreError::IncompatibleSketch(
                "cannot merge counting sketches with different ksize or table layout".to_string(),
            ));
        }
        for t in 0..self.sizes.len() {
            for (a, &b) in self.tables[t].iter_mut().zip(other.tables[t].iter()) {
                *a = a.saturating_add(b);
            }
        }
        for (&hash, &count) in &other.bigcounts {
            let entry = self.bigcounts.entry(hash).or_insert(0);
            *entry = entry.saturating_add(count);
        }
        self.n_unique += other.n_unique;
        Ok(())
    }

    /// Writes this sketch in the shared binary format (§6.1, kind
    /// `CountingSketch`), including the overflow map.
    pub fn save<W: Write>(&self, w: &mut W) -> Result<()> {
        format::write_header(w, FileKind::CountingSketch)?;
        format::write_u32(w, self.ksize as u32)?;
        format::write_u8(w, self.use_bigcount as u8)?;
        format::write_u32(w, self.sizes.len() as u32)?;
        format::write_u64(w, self.n_unique)?;
        for t in 0..self.sizes.len() {
            format::write_u64(w, self.sizes.0[t])?;
            w.write_all(&self.tables[t])?;
        }
        format::write_u64(w, self.bigcounts.len() as u64)?;
        for (&kmer, &count) in &self.bigcounts {
            format::write_u64(w, kmer)?;
            format::write_u16(w, count)?;
        }
        Ok(())
    }

    pub fn save_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let staging = format::staging_path(path);
        let mut f = std::fs::File::create(&staging)?;
        self.save(&mut f)?;
        f.flush()?;
        drop(f);
        std::fs::rename(&staging, path)?;
        Ok(())
    }

    pub fn load<R: Read>(r: &mut R, path: &Path) -> Result<Self> {
        let kind = format::read_header(r, path)?;
        if kind != FileKind::CountingSketch {
            return Err(CoreError::BadFileFormat {
                path: path.to_path_buf(),
                reason: format!("expected a counting sketch, found kind {kind:?}"),
            });
        }
        let ksize = format::read_u32(r)? as u8;
        let use_bigcount = format::read_u8(r)? != 0;
        let n_tables = format::read_u32(r)? as usize;
        let n_unique = format::read_u64(r)?;

        let mut sizes = Vec::with_capacity(n_tables);
        let mut tables = Vec::with_capacity(n_tables);
        for _ in 0..n_tables {
            let size = format::read_u64(r)?;
            let mut bytes = vec![0u8; size as usize];
            r.read_exact(&mut bytes)?;
            sizes.push(size);
            tables.push(bytes);
        }

        let n_bigcount = format::read_u64(r)?;
        let mut bigcounts = HashMap::with_capacity(n_bigcount as usize);
        for _ in 0..n_bigcount {
            let kmer = format::read_u64(r)?;
            let count = format::read_u16(r)?;
            bigcounts.insert(kmer, count);
        }

        Ok(CountingSketch {
            ksize,
            sizes: TableSizes(sizes),
            tables,
            bigcounts,
            n_unique,
            use_bigcount,
        })
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut f = std::fs::File::open(path)?;
        Self::load(&mut f, path)
    }
}

impl Sketchable for CountingSketch {
    fn ksize(&self) -> u8 {
        self.ksize
    }

    fn n_unique_kmers(&self) -> u64 {
        self.n_unique
    }

    fn consume_sequence(&mut self, seq: &[u8]) -> Result<u64> {
        let mut n = 0u64;
        for hash in KmerIterator::new(seq, self.ksize)? {
            self.increment(hash?);
            n += 1;
        }
        Ok(n)
    }

    fn present(&self, hash: KmerHash) -> bool {
        self.get_count_hash(hash) > 0
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counts_exact_below_saturation() {
        let mut s = CountingSketch::new(4, 4, 10_000).unwrap();
        for _ in 0..5 {
            s.count(b"ACGT").unwrap();
        }
        assert_eq!(s.get_count(b"ACGT").unwrap(), 5);
    }

    #[test]
    fn overflows_into_bigcount_past_u8_max() {
        let mut s = CountingSketch::new(4, 2, 10_000).unwrap();
        for _ in 0..(u8::MAX as u32 + 20) {
            s.count(b"ACGT").unwrap();
        }
        assert_eq!(s.get_count(b"ACGT").unwrap(), u8::MAX as u64 + 20);
    }

    #[test]
    fn disabling_bigcount_saturates() {
        let mut s = CountingSketch::new(4, 2, 10_000).unwrap();
        s.set_use_bigcount(false);
        for _ in 0..(u8::MAX as u32 + 20) {
            s.count(b"ACGT").unwrap();
        }
        assert_eq!(s.get_count(b"ACGT").unwrap(), u8::MAX as u64);
    }

    #[test]
    fn trim_below_abundance_zeroes_rare_kmers() {
        let mut s = CountingSketch::new(4, 4, 10_000).unwrap();
        s.count(b"AAAA").unwrap();
        s.count(b"CCCC").unwrap();
        s.count(b"CCCC").unwrap();
        s.trim_below_abundance(b"AAAACCCC", 2).unwrap();
        assert_eq!(s.get_count(b"AAAA").unwrap(), 0);
        assert_eq!(s.get_count(b"CCCC").unwrap(), 2);
    }

    #[test]
    fn median_count_over_uniform_sequence() {
        let mut s = CountingSketch::new(4, 4, 10_000).unwrap();
        s.consume_sequence(b"AAAAAAAAA").unwrap();
        s.consume_sequence(b"AAAAAAAAA").unwrap();
        assert_eq!(s.get_median_count(b"AAAAAAAAA").unwrap(), 2);
    }

    #[test]
    fn spectral_error_positions_flag_low_coverage_window() {
        let mut s = CountingSketch::new(4, 4, 10_000).unwrap();
        for _ in 0..10 {
            s.count(b"AAAA").unwrap();
            s.count(b"AAAC").unwrap();
        }
        // never seen "ACGT" window within "AAAACGT" at position 4..8
        let positions = s.find_spectral_error_positions(b"AAAACGT", 1).unwrap();
        assert!(!positions.is_empty());
    }

    #[test]
    fn merge_adds_counts_seen_by_separate_workers() {
        let mut a = CountingSketch::new(4, 3, 10_000).unwrap();
        let mut b = CountingSketch::new(4, 3, 10_000).unwrap();
        a.count(b"AAAA").unwrap();
        a.count(b"AAAA").unwrap();
        b.count(b"AAAA").unwrap();

        a.merge(&b).unwrap();
        assert_eq!(a.get_count(b"AAAA").unwrap(), 3);
    }

    #[test]
    fn merge_rejects_mismatched_layout() {
        let mut a = CountingSketch::new(4, 3, 10_000).unwrap();
        let b = CountingSketch::new(4, 2, 10_000).unwrap();
        assert!(a.merge(&b).is_err());
    }

    #[test]
    fn save_then_load_preserves_counts_including_overflow() {
        let mut s = CountingSketch::new(4, 2, 10_000).unwrap();
        for _ in 0..300 {
            s.count(b"ACGT").unwrap();
        }
        s.count(b"TTTT").unwrap();

        let mut buf = Vec::new();
        s.save(&mut buf).unwrap();
        let loaded =
            CountingSketch::load(&mut std::io::Cursor::new(buf), std::path::Path::new("<mem>"))
                .unwrap();

        assert_eq!(loaded.get_count(b"ACGT").unwrap(), 300);
        assert_eq!(loaded.get_count(b"TTTT").unwrap(), 1);
    }
}
