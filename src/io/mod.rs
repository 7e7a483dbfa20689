//! Record sources and the shared binary persistence format.
//!
//! `format` is the common header/body framing every saved sketch, tag set,
//! partition map, and label set is built on. `records` defines the
//! `ReadSource` contract and paired-read handling; `needletail_source` is
//! the one concrete adapter this crate ships.

pub mod format;
pub mod needletail_source;
pub mod records;

pub use needletail_source::NeedletailSource;
pub use records::{PairMode, ReadSource, Record, RecordPair};
