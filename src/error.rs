//! Error taxonomy for the k-mer sketching and partitioning core.
//!
//! Every fallible operation in this crate returns `Result<T, CoreError>` (or
//! a type alias over it). Sketch mutators either succeed or leave the sketch
//! unchanged; there is no notion of a half-applied update.

use std::path::PathBuf;
use thiserror::Error;

/// The error type shared across the k-mer, sketch, graph, tagging and
/// partitioning subsystems.
#[derive(Error, Debug)]
pub enum CoreError {
    /// A k-mer string was malformed: wrong length, a non-ACGT base, or `k`
    /// outside `1..=32`.
    #[error("bad kmer: {0}")]
    BadKmer(String),

    /// A query or mutation was given a k-mer whose length doesn't match the
    /// table's configured `k`.
    #[error("wrong kmer length: expected {expected}, got {actual}")]
    WrongKmerLength { expected: u8, actual: usize },

    /// A persisted file's magic bytes, format version, or kind byte did not
    /// match what the loader expected.
    #[error("bad file format in {path}: {reason}")]
    BadFileFormat { path: PathBuf, reason: String },

    /// An I/O failure while reading or writing a persisted file.
    #[error("file error: {0}")]
    FileError(#[from] std::io::Error),

    /// Attempted to change `k` or the error rate of a `HyperLogLog` after it
    /// has already ingested at least one k-mer.
    #[error("{0} is read-only after the sketch has been used")]
    ReadOnlyAfterUse(&'static str),

    /// A read source ended in the middle of a record instead of at a record
    /// boundary.
    #[error("truncated input: {0}")]
    TruncatedInput(String),

    /// Table or overflow-map allocation failed.
    #[error("out of memory: {0}")]
    OutOfMemory(String),

    /// An unrecognized pair mode was requested of the paired-read reader.
    #[error("invalid pair mode: {0}")]
    InvalidPairMode(String),

    /// A bounded breadth-first traversal hit its node cap before exhausting
    /// the component. Not necessarily fatal: callers that only need a lower
    /// bound on component size can treat the partial result as valid.
    #[error("traversal aborted after visiting {visited} nodes (cap {cap})")]
    TraversalAborted { visited: usize, cap: usize },

    /// Two sketches (or a worker fan-in's partial results) can't be merged
    /// because their `k`, table layout, or precision differ.
    #[error("incompatible sketch layout: {0}")]
    IncompatibleSketch(String),
}

pub type Result<T> = std::result::Result<T, CoreError>;
