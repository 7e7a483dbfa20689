//! The shared binary file header and per-kind body framing used to persist
//! sketches, tag sets, partition maps, and label sets. All multi-byte
//! integers are little-endian; there are no checksums, and a mismatched
//! magic or version is rejected outright rather than tolerated.

use std::io::{Read, Write};
use std::path::{Path, PathBuf};

use crate::error::{CoreError, Result};

pub const MAGIC: &[u8; 4] = b"OXLI";
pub const VERSION: u8 = 4;

#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FileKind {
    CountingSketch = 1,
    PresenceSketch = 2,
    TagSet = 3,
    StopTagSet = 4,
    SubsetPartition = 5,
    LabelSet = 6,
}

impl FileKind {
    fn from_byte(b: u8) -> Option<Self> {
        match b {
            1 => Some(FileKind::CountingSketch),
            2 => Some(FileKind::PresenceSketch),
            3 => Some(FileKind::TagSet),
            4 => Some(FileKind::StopTagSet),
            5 => Some(FileKind::SubsetPartition),
            6 => Some(FileKind::LabelSet),
            _ => None,
        }
    }
}

pub fn write_header<W: Write>(w: &mut W, kind: FileKind) -> Result<()> {
    w.write_all(MAGIC)?;
    w.write_all(&[VERSION, kind as u8])?;
    Ok(())
}

/// Reads and validates the header, returning the file kind found. `path` is
/// only used to build a descriptive error.
pub fn read_header<R: Read>(r: &mut R, path: &Path) -> Result<FileKind> {
    let mut magic = [0u8; 4];
    r.read_exact(&mut magic).map_err(|e| bad_format_or_io(path, e))?;
    if &magic != MAGIC {
        return Err(CoreError::BadFileFormat {
            path: path.to_path_buf(),
            reason: format!("bad magic bytes {magic:?}"),
        });
    }

    let mut rest = [0u8; 2];
    r.read_exact(&mut rest).map_err(|e| bad_format_or_io(path, e))?;
    if rest[0] != VERSION {
        return Err(CoreError::BadFileFormat {
            path: path.to_path_buf(),
            reason: format!("unsupported format version {}", rest[0]),
        });
    }
    FileKind::from_byte(rest[1]).ok_or_else(|| CoreError::BadFileFormat {
        path: path.to_path_buf(),
        reason: format!("unknown file kind code {}", rest[1]),
    })
}

fn bad_format_or_io(path: &Path, e: std::io::Error) -> CoreError {
    if e.kind() == std::io::ErrorKind::UnexpectedEof {
        CoreError::BadFileFormat {
            path: path.to_path_buf(),
            reason: "file is shorter than the common header".to_string(),
        }
    } else {
        CoreError::FileError(e)
    }
}

pub fn write_u8<W: Write>(w: &mut W, v: u8) -> Result<()> {
    Ok(w.write_all(&[v])?)
}
pub fn write_u16<W: Write>(w: &mut W, v: u16) -> Result<()> {
    Ok(w.write_all(&v.to_le_bytes())?)
}
pub fn write_u32<W: Write>(w: &mut W, v: u32) -> Result<()> {
    Ok(w.write_all(&v.to_le_bytes())?)
}
pub fn write_u64<W: Write>(w: &mut W, v: u64) -> Result<()> {
    Ok(w.write_all(&v.to_le_bytes())?)
}

pub fn read_u8<R: Read>(r: &mut R) -> Result<u8> {
    let mut buf = [0u8; 1];
    r.read_exact(&mut buf)?;
    Ok(buf[0])
}
pub fn read_u16<R: Read>(r: &mut R) -> Result<u16> {
    let mut buf = [0u8; 2];
    r.read_exact(&mut buf)?;
    Ok(u16::from_le_bytes(buf))
}
pub fn read_u32<R: Read>(r: &mut R) -> Result<u32> {
    let mut buf = [0u8; 4];
    r.read_exact(&mut buf)?;
    Ok(u32::from_le_bytes(buf))
}
pub fn read_u64<R: Read>(r: &mut R) -> Result<u64> {
    let mut buf = [0u8; 8];
    r.read_exact(&mut buf)?;
    Ok(u64::from_le_bytes(buf))
}

/// Returns a path a failed write's partial output can be truncated to
/// nothing at, per the "a failed save must leave no misleading partial
/// file" policy (§7). Callers write through a temp file and rename into
/// place so a crash mid-write never leaves a corrupt file at `path`.
pub fn staging_path(path: &Path) -> PathBuf {
    let mut staging = path.as_os_str().to_owned();
    staging.push(".tmp");
    PathBuf::from(staging)
}
