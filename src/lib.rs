//! Probabilistic k-mer sketches and de Bruijn graph partitioning in bounded
//! memory.
//!
//! This crate reimplements the core ideas in the khmer/oxli C++ library as
//! a library crate: canonical k-mer hashing, presence/counting Bloom-style
//! sketches and a HyperLogLog cardinality estimator, a de Bruijn graph
//! traversal layer over any of those sketches, tag-based partitioning into
//! connected subgraphs, and an arbitrary integer label overlay on top of
//! tagged k-mers. None of it parses sequence files itself; [`io::ReadSource`]
//! is the seam external callers plug a FASTA/FASTQ reader (or anything else)
//! into.
//!
//! Every persisted artifact (sketch, tag set, partition map, label set)
//! round-trips through the single binary framing in [`io::format`].

pub mod error;
pub mod graph;
pub mod io;
pub mod kmer;
pub mod label;
pub mod parallel;
pub mod partition;
pub mod sketch;
pub mod tagging;

pub use error::{CoreError, Result};
pub use kmer::KmerHash;
pub use label::{LabelId, LabelMap};
pub use partition::{PartitionId, PartitionMap, SubsetPartition};
pub use sketch::{CountingSketch, HyperLogLog, PresenceSketch, Sketchable};
pub use tagging::{PrePartitionInfo, TagEngine};
