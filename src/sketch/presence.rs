//! A presence sketch: `N` tables of packed bits, one bit per bucket. A k-mer
//! is considered present when every table it hashes into has its bit set.
//! Mirrors `khmer::Nodetable` / `Hashbits`.

use std::io::{Read, Write};
use std::path::Path;

use super::{check_kmer_length, Sketchable, TableSizes};
use crate::error::{CoreError, Result};
use crate::io::format::{self, FileKind};
use crate::kmer::{canonical_hash, KmerHash, KmerIterator};

/// Default number of tables, matching khmer's usual `N_HT=4`.
pub const DEFAULT_N_TABLES: usize = 4;

#[derive(Debug, Clone)]
pub struct PresenceSketch {
    ksize: u8,
    sizes: TableSizes,
    tables: Vec<Vec<u64>>,
    n_unique: u64,
}

impl PresenceSketch {
    pub fn new(ksize: u8, n_tables: usize, max_table_size: u64) -> Result<Self> {
        let sizes = TableSizes::new(n_tables, max_table_size)?;
        let tables = sizes
            .0
            .iter()
            .map(|&sz| vec![0u64; (sz as usize / 64) + 1])
            .collect();
        Ok(PresenceSketch {
            ksize,
            sizes,
            tables,
            n_unique: 0,
        })
    }

    #[inline]
    fn get(&self, table: usize, bit: usize) -> bool {
        (self.tables[table][bit / 64] >> (bit % 64)) & 1 == 1
    }

    #[inline]
    fn set(&mut self, table: usize, bit: usize) -> bool {
        let word = &mut self.tables[table][bit / 64];
        let mask = 1u64 << (bit % 64);
        let was_set = *word & mask != 0;
        *word |= mask;
        was_set
    }

    /// Inserts a single k-mer string (already validated against `ksize`).
    pub fn count(&mut self, kmer: &[u8]) -> Result<()> {
        check_kmer_length(kmer.len(), self.ksize)?;
        let hash = canonical_hash(kmer, self.ksize)?;
        self.insert_hash(hash);
        Ok(())
    }

    fn insert_hash(&mut self, hash: KmerHash) {
        let mut all_set = true;
        let n = self.sizes.len();
        for t in 0..n {
            let bit = self.sizes.bucket(t, hash);
            if !self.set(t, bit) {
                all_set = false;
            }
        }
        if !all_set {
            self.n_unique += 1;
        }
    }

    /// Number of bits set in the first table: a cheap load-factor proxy for
    /// callers that don't need the exact `n_unique_kmers` count.
    pub fn n_occupied(&self) -> u64 {
        self.tables[0].iter().map(|w| w.count_ones() as u64).sum()
    }

    pub fn table_sizes(&self) -> &[u64] {
        &self.sizes.0
    }

    /// Folds `other`'s bits into `self` by table-wise bitwise OR. Used to
    /// fan-in per-worker sketches after parallel ingestion; the result is
    /// independent of which worker set which bit first. `n_unique_kmers`
    /// after a merge is only an upper bound on the true distinct count,
    /// since a k-mer counted as "new" by two different workers collapses
    /// into one occupied bit here.
    pub fn merge(&mut self, other: &PresenceSketch) -> Result<()> {
        if self.ksize != other.ksize || self.sizes.0 != other.sizes.0 {
            return Err(CoreError::IncompatibleSketch(
                "cannot merge presence sketches with different ksize or table layout".to_string(),
            ));
        }
        for t in 0..self.sizes.len() {
            for (a, &b) in self.tables[t].iter_mut().zip(other.tables[t].iter()) {
                *a |= b;
            }
        }
        self.n_unique += other.n_unique;
        Ok(())
    }

    /// Writes this sketch in the shared binary format (§6.1, kind
    /// `PresenceSketch`).
    pub fn save<W: Write>(&self, w: &mut W) -> Result<()> {
        format::write_header(w, FileKind::PresenceSketch)?;
        format::write_u32(w, self.ksize as u32)?;
        format::write_u32(w, self.sizes.len() as u32)?;
        format::write_u64(w, self.n_unique)?;
        for t in 0..self.sizes.len() {
            let size = self.sizes.0[t];
            format::write_u64(w, size)?;
            let nbytes = (size as usize).div_ceil(8);
            let mut bytes = vec![0u8; nbytes];
            for bit in 0..size as usize {
                if self.get(t, bit) {
                    bytes[bit / 8] |= 1 << (bit % 8);
                }
            }
            w.write_all(&bytes)?;
        }
        Ok(())
    }

    /// Saves to `path` via a staging file, so a crash mid-write never
    /// leaves a truncated file at the destination.
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
        if kind != FileKind::PresenceSketch {
            return Err(CoreError::BadFileFormat {
                path: path.to_path_buf(),
                reason: format!("expected a presence sketch, found kind {kind:?}"),
            });
        }
        let ksize = format::read_u32(r)? as u8;
        let n_tables = format::read_u32(r)? as usize;
        let n_unique = format::read_u64(r)?;

        let mut sizes = Vec::with_capacity(n_tables);
        let mut tables = Vec::with_capacity(n_tables);
        for _ in 0..n_tables {
            let size = format::read_u64(r)?;
            let nbytes = (size as usize).div_ceil(8);
            let mut bytes = vec![0u8; nbytes];
            r.read_exact(&mut bytes)?;

            let mut words = vec![0u64; (size as usize / 64) + 1];
            for bit in 0..size as usize {
                if bytes[bit / 8] & (1 << (bit % 8)) != 0 {
                    words[bit / 64] |= 1u64 << (bit % 64);
                }
            }
            sizes.push(size);
            tables.push(words);
        }

        Ok(PresenceSketch {
            ksize,
            sizes: TableSizes(sizes),
            tables,
            n_unique,
        })
    }

    pub fn load_from_path(path: impl AsRef<Path>) -> Result<Self> {
        let path = path.as_ref();
        let mut f = std::fs::File::open(path)?;
        Self::load(&mut f, path)
    }
}

impl Sketchable for PresenceSketch {
    fn ksize(&self) -> u8 {
        self.ksize
    }

    fn n_unique_kmers(&self) -> u64 {
        self.n_unique
    }

    fn consume_sequence(&mut self, seq: &[u8]) -> Result<u64> {
        let mut n = 0u64;
        for hash in KmerIterator::new(seq, self.ksize)? {
            self.insert_hash(hash?);
            n += 1;
        }
        Ok(n)
    }

    fn present(&self, hash: KmerHash) -> bool {
        (0..self.sizes.len()).all(|t| self.get(t, self.sizes.bucket(t, hash)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn inserted_kmer_is_present() {
        let mut s = PresenceSketch::new(4, 4, 1_000).unwrap();
        s.count(b"ACGT").unwrap();
        let h = canonical_hash(b"ACGT", 4).unwrap();
        assert!(s.present(h));
    }

    #[test]
    fn absent_kmer_is_usually_absent() {
        let mut s = PresenceSketch::new(4, 4, 10_000).unwrap();
        s.count(b"ACGT").unwrap();
        let h = canonical_hash(b"TTTT", 4).unwrap();
        assert!(!s.present(h));
    }

    #[test]
    fn consume_sequence_counts_all_windows() {
        let mut s = PresenceSketch::new(4, 4, 10_000).unwrap();
        let n = s.consume_sequence(b"ACGTACGTAC").unwrap();
        assert_eq!(n, 7);
    }

    #[test]
    fn n_unique_tracks_distinct_kmers_only() {
        let mut s = PresenceSketch::new(4, 4, 10_000).unwrap();
        s.count(b"AAAA").unwrap();
        s.count(b"AAAA").unwrap();
        s.count(b"CCCC").unwrap();
        assert_eq!(s.n_unique_kmers(), 2);
    }

    #[test]
    fn rejects_wrong_length_kmer() {
        let mut s = PresenceSketch::new(4, 2, 1_000).unwrap();
        assert!(s.count(b"ACG").is_err());
    }

    #[test]
    fn save_then_load_preserves_query_answers() {
        let mut s = PresenceSketch::new(5, 3, 5_000).unwrap();
        s.consume_sequence(b"ACGTACGTACGTTTTT").unwrap();

        let mut buf = Vec::new();
        s.save(&mut buf).unwrap();

        let loaded =
            PresenceSketch::load(&mut std::io::Cursor::new(buf), Path::new("<mem>")).unwrap();

        assert_eq!(loaded.ksize(), s.ksize());
        assert_eq!(loaded.n_unique_kmers(), s.n_unique_kmers());
        for h in [
            canonical_hash(b"ACGTA", 5).unwrap(),
            canonical_hash(b"TTTTT", 5).unwrap(),
        ] {
            assert_eq!(loaded.present(h), s.present(h));
        }
    }

    #[test]
    fn merge_unions_presence_across_two_workers() {
        let mut a = PresenceSketch::new(4, 3, 10_000).unwrap();
        let mut b = PresenceSketch::new(4, 3, 10_000).unwrap();
        a.count(b"AAAA").unwrap();
        b.count(b"CCCC").unwrap();

        a.merge(&b).unwrap();
        assert!(a.present(canonical_hash(b"AAAA", 4).unwrap()));
        assert!(a.present(canonical_hash(b"CCCC", 4).unwrap()));
    }

    #[test]
    fn merge_rejects_mismatched_layout() {
        let mut a = PresenceSketch::new(4, 3, 10_000).unwrap();
        let b = PresenceSketch::new(5, 3, 10_000).unwrap();
        assert!(a.merge(&b).is_err());
    }

    #[test]
    fn load_rejects_bad_magic() {
        let bytes = b"NOPE\x04\x02".to_vec();
        let err = PresenceSketch::load(&mut std::io::Cursor::new(bytes), Path::new("x"));
        assert!(err.is_err());
    }
}
