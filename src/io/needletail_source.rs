//! A [`ReadSource`] backed by `needletail`, the one concrete adapter this
//! crate ships for turning FASTA/FASTQ files (gzip/bzip2/zstd-compressed or
//! not) into the opaque record stream the core consumes. Grounded on the
//! teacher's own needletail usage, trimmed to the pull-based, single-error
//! contract `ReadSource` expects instead of collecting everything up front.

use std::path::Path;

use needletail::{parse_fastx_file, parser::SequenceRecord};

use super::records::{ReadSource, Record};
use crate::error::{CoreError, Result};

pub struct NeedletailSource {
    reader: Box<dyn needletail::parser::FastxReader>,
}

impl NeedletailSource {
    pub fn open(path: impl AsRef<Path>) -> Result<Self> {
        let reader = parse_fastx_file(path.as_ref()).map_err(|e| CoreError::BadFileFormat {
            path: path.as_ref().to_path_buf(),
            reason: e.to_string(),
        })?;
        Ok(NeedletailSource { reader })
    }
}

fn to_record(seq_record: SequenceRecord) -> Record {
    Record {
        name: String::from_utf8_lossy(seq_record.id()).to_string(),
        sequence: seq_record.seq().to_vec(),
        quality: seq_record.qual().map(|q| q.to_vec()),
        annotations: String::new(),
    }
}

impl ReadSource for NeedletailSource {
    fn next_record(&mut self) -> Result<Option<Record>> {
        match self.reader.next() {
            None => Ok(None),
            Some(Ok(rec)) => Ok(Some(to_record(rec))),
            Some(Err(e)) => Err(CoreError::TruncatedInput(e.to_string())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;
    use tempfile::tempdir;

    #[test]
    fn reads_plain_fastq_records() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reads.fq");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, "@r1\nACGT\n+\n!!!!\n@r2\nTTTT\n+\n####\n").unwrap();
        drop(f);

        let mut source = NeedletailSource::open(&path).unwrap();
        let r1 = source.next_record().unwrap().unwrap();
        assert_eq!(r1.name, "r1");
        assert_eq!(r1.sequence, b"ACGT");
        assert!(r1.quality.is_some());

        let r2 = source.next_record().unwrap().unwrap();
        assert_eq!(r2.name, "r2");

        assert!(source.next_record().unwrap().is_none());
    }

    #[test]
    fn reads_fasta_without_quality() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("reads.fa");
        let mut f = std::fs::File::create(&path).unwrap();
        write!(f, ">s1\nACGTACGT\n").unwrap();
        drop(f);

        let mut source = NeedletailSource::open(&path).unwrap();
        let r1 = source.next_record().unwrap().unwrap();
        assert_eq!(r1.name, "s1");
        assert!(r1.quality.is_none());
    }

    #[test]
    fn rejects_nonexistent_file() {
        assert!(NeedletailSource::open("/no/such/file.fq").is_err());
    }
}
