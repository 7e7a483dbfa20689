//! Tag placement and tag-reachability queries: the layer between raw graph
//! traversal and partition assignment. Mirrors the tag-related half of
//! `khmer::Hashtable` (`consume_and_tag`) and `SubsetPartition::find_all_tags`.

use std::collections::HashSet;
use std::io::{Read, Write};
use std::path::Path;

use indexmap::IndexSet;

use crate::error::{CoreError, Result};
use crate::graph::{self, Node};
use crate::io::format::{self, FileKind};
use crate::kmer::{encode, KmerHash, KmerIterator};
use crate::sketch::Sketchable;

/// Default tag spacing along a read, matching khmer's default `_tag_density`.
pub const DEFAULT_TAG_DENSITY: usize = 40;

/// The outcome of a bounded tag-reachability search: the starting k-mer and
/// every already-known tag found connected to it. Kept as a standalone
/// record (rather than assigning a partition id inline) so that the
/// traversal can be parallelized while partition-id assignment stays serial,
/// per the design notes.
#[derive(Debug, Clone)]
pub struct PrePartitionInfo {
    pub kmer: KmerHash,
    pub tagged_kmers: IndexSet<KmerHash>,
}

/// Owns the tag and stop-tag sets and drives tag placement during ingestion.
/// Generic over the sketch backing presence queries, so it works the same
/// over a presence sketch or a counting sketch.
pub struct TagEngine {
    ksize: u8,
    tag_density: usize,
    pub all_tags: IndexSet<KmerHash>,
    pub stop_tags: HashSet<KmerHash>,
}

impl TagEngine {
    pub fn new(ksize: u8, tag_density: usize) -> Self {
        TagEngine {
            ksize,
            tag_density,
            all_tags: IndexSet::new(),
            stop_tags: HashSet::new(),
        }
    }

    pub fn ksize(&self) -> u8 {
        self.ksize
    }

    pub fn tag_density(&self) -> usize {
        self.tag_density
    }

    /// Consumes every k-mer of `seq` into `sketch` and places tags along the
    /// way: a k-mer becomes a tag when it's been `tag_density` k-mers since
    /// the last tag, or it's already a known tag or stop-tag. Mirrors
    /// `Hashtable::consume_and_tag`.
    pub fn consume_and_tag<S: Sketchable>(&mut self, sketch: &mut S, seq: &[u8]) -> Result<u64> {
        let mut since_last_tag = 0usize;
        let mut n = 0u64;

        for hash in KmerIterator::new(seq, self.ksize)? {
            let hash = hash?;
            n += 1;

            let is_known = self.all_tags.contains(&hash) || self.stop_tags.contains(&hash);
            if since_last_tag >= self.tag_density || is_known {
                self.all_tags.insert(hash);
                since_last_tag = 0;
            } else {
                since_last_tag += 1;
            }
        }

        sketch.consume_sequence(seq)?;
        Ok(n)
    }

    /// Bounded BFS from `start_kmer` collecting every already-tagged k-mer
    /// reachable within `2 * tag_density + 1` neighbor-steps. Mirrors
    /// `SubsetPartition::find_all_tags`.
    pub fn find_all_tags<S: Sketchable>(
        &self,
        sketch: &S,
        start: &[u8],
        break_on_stop_tags: bool,
    ) -> Result<PrePartitionInfo> {
        let (f, r) = encode(start, self.ksize)?;
        let start_node = Node::new(f, r, self.ksize);
        let start_hash = start_node.canonical_hash();

        let max_breadth = 2 * self.tag_density + 1;
        let barrier = break_on_stop_tags.then_some(&self.stop_tags);

        let result = graph::bounded_bfs(sketch, start_node, usize::MAX, max_breadth, barrier, None);

        let mut tagged_kmers = IndexSet::new();
        for &h in &result.visited {
            if h != start_hash && self.all_tags.contains(&h) {
                tagged_kmers.insert(h);
            }
        }

        Ok(PrePartitionInfo {
            kmer: start_hash,
            tagged_kmers,
        })
    }

    /// Writes `all_tags` in the shared binary format (§6.1, kind `TagSet`).
    pub fn save_tags<W: Write>(&self, w: &mut W) -> Result<()> {
        save_kmer_set(w, FileKind::TagSet, self.ksize, self.all_tags.iter().copied())
    }

    pub fn save_tags_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        save_kmer_set_to_path(path, FileKind::TagSet, self.ksize, self.all_tags.iter().copied())
    }

    /// Merges the tags found in a tag-set file into `all_tags`.
    pub fn load_tags<R: Read>(&mut self, r: &mut R, path: &Path) -> Result<()> {
        for h in load_kmer_set(r, path, FileKind::TagSet)? {
            self.all_tags.insert(h);
        }
        Ok(())
    }

    pub fn load_tags_from_path(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut f = std::fs::File::open(path)?;
        self.load_tags(&mut f, path)
    }

    /// Writes `stop_tags` in the shared binary format (§6.1, kind `StopTagSet`).
    pub fn save_stop_tags<W: Write>(&self, w: &mut W) -> Result<()> {
        save_kmer_set(
            w,
            FileKind::StopTagSet,
            self.ksize,
            self.stop_tags.iter().copied(),
        )
    }

    pub fn save_stop_tags_to_path(&self, path: impl AsRef<Path>) -> Result<()> {
        save_kmer_set_to_path(
            path,
            FileKind::StopTagSet,
            self.ksize,
            self.stop_tags.iter().copied(),
        )
    }

    pub fn load_stop_tags<R: Read>(&mut self, r: &mut R, path: &Path) -> Result<()> {
        for h in load_kmer_set(r, path, FileKind::StopTagSet)? {
            self.stop_tags.insert(h);
        }
        Ok(())
    }

    pub fn load_stop_tags_from_path(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut f = std::fs::File::open(path)?;
        self.load_stop_tags(&mut f, path)
    }
}

fn save_kmer_set<W: Write>(
    w: &mut W,
    kind: FileKind,
    ksize: u8,
    hashes: impl Iterator<Item = KmerHash>,
) -> Result<()> {
    format::write_header(w, kind)?;
    format::write_u32(w, ksize as u32)?;
    let hashes: Vec<KmerHash> = hashes.collect();
    format::write_u32(w, hashes.len() as u32)?;
    for h in hashes {
        format::write_u64(w, h)?;
    }
    Ok(())
}

fn save_kmer_set_to_path(
    path: impl AsRef<Path>,
    kind: FileKind,
    ksize: u8,
    hashes: impl Iterator<Item = KmerHash>,
) -> Result<()> {
    let path = path.as_ref();
    let staging = format::staging_path(path);
    let mut f = std::fs::File::create(&staging)?;
    save_kmer_set(&mut f, kind, ksize, hashes)?;
    f.flush()?;
    drop(f);
    std::fs::rename(&staging, path)?;
    Ok(())
}

fn load_kmer_set<R: Read>(r: &mut R, path: &Path, expected: FileKind) -> Result<Vec<KmerHash>> {
    let kind = format::read_header(r, path)?;
    if kind != expected {
        return Err(CoreError::BadFileFormat {
            path: path.to_path_buf(),
            reason: format!("expected kind {expected:?}, found {kind:?}"),
        });
    }
    let _ksize = format::read_u32(r)?;
    let n = format::read_u32(r)?;
    let mut hashes = Vec::with_capacity(n as usize);
    for _ in 0..n {
        hashes.push(format::read_u64(r)?);
    }
    Ok(hashes)
}
