//! Probabilistic k-mer containers: a presence sketch (one bit per bucket), a
//! saturating counting sketch with exact overflow, and a HyperLogLog
//! cardinality estimator. All three share the hashing and ingestion
//! interface defined by [`Sketchable`].

pub mod counting;
pub mod hyperloglog;
pub mod presence;
pub mod primes;

pub use counting::CountingSketch;
pub use hyperloglog::HyperLogLog;
pub use presence::PresenceSketch;

use crate::error::{CoreError, Result};
use crate::kmer::KmerHash;

/// Shared behavior across presence and counting sketches, so the graph and
/// tagging layers can be generic over "something that can tell me whether a
/// k-mer exists" without caring which concrete sketch backs it.
///
/// Replaces the inheritance hierarchy the C++ core uses (`Hashtable` base
/// class) with a trait object / generic bound, per the redesign notes.
pub trait Sketchable {
    /// The k-mer size this sketch was constructed with.
    fn ksize(&self) -> u8;

    /// Number of *distinct* k-mers this sketch has observed, as tracked by
    /// first-insertion bookkeeping (an approximation from below: sketch
    /// false positives can suppress the count).
    fn n_unique_kmers(&self) -> u64;

    /// Inserts every k-mer of `seq` and returns the number of k-mers
    /// consumed (`0` for a sequence shorter than `k`).
    fn consume_sequence(&mut self, seq: &[u8]) -> Result<u64>;

    /// The presence oracle the graph traversal layer queries: "does this
    /// canonical k-mer hash exist in the sketch?"
    fn present(&self, hash: KmerHash) -> bool;
}

/// An ordered set of table bucket-counts, shared by presence and counting
/// sketches. Table sizes are fixed at construction and never mutated.
#[derive(Debug, Clone)]
pub(crate) struct TableSizes(pub Vec<u64>);

impl TableSizes {
    pub fn new(n_tables: usize, max_table_size: u64) -> Result<Self> {
        if n_tables == 0 {
            return Err(CoreError::OutOfMemory(
                "a sketch needs at least one table".into(),
            ));
        }
        let sizes = primes::n_primes_near(n_tables, max_table_size);
        if sizes.len() != n_tables {
            return Err(CoreError::OutOfMemory(format!(
                "could not find {n_tables} distinct table sizes near {max_table_size}"
            )));
        }
        Ok(TableSizes(sizes))
    }

    #[inline]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    #[inline]
    pub fn bucket(&self, table: usize, hash: KmerHash) -> usize {
        (hash % self.0[table]) as usize
    }
}

pub(crate) fn check_kmer_length(seq_len: usize, k: u8) -> Result<()> {
    if seq_len != k as usize {
        return Err(CoreError::WrongKmerLength {
            expected: k,
            actual: seq_len,
        });
    }
    Ok(())
}
