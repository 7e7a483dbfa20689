//! A thin overlay associating arbitrary integer labels with tagged k-mers,
//! sharing the partition map's pointer-indirection discipline so the same
//! "rewrite the smaller side" merge trick applies to label cells too.

use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::path::Path;

use crate::error::{CoreError, Result};
use crate::io::format::{self, FileKind};
use crate::kmer::KmerHash;

pub type LabelId = u64;

type CellId = usize;

/// `tag_kmer -> set<label_id>`, with an interning table so that looking a
/// label up by id is a cheap index instead of a hash lookup on every query.
#[derive(Debug, Default)]
pub struct LabelMap {
    arena: Vec<LabelId>,
    label_to_cell: HashMap<LabelId, CellId>,
    tag_labels: HashMap<KmerHash, HashSet<CellId>>,
}

impl LabelMap {
    pub fn new() -> Self {
        LabelMap {
            arena: Vec::new(),
            label_to_cell: HashMap::new(),
            tag_labels: HashMap::new(),
        }
    }

    fn cell_for(&mut self, label: LabelId) -> CellId {
        if let Some(&cell) = self.label_to_cell.get(&label) {
            return cell;
        }
        let cell = self.arena.len();
        self.arena.push(label);
        self.label_to_cell.insert(label, cell);
        cell
    }

    /// Associates `label` with `tag`. Idempotent.
    pub fn link(&mut self, tag: KmerHash, label: LabelId) {
        let cell = self.cell_for(label);
        self.tag_labels.entry(tag).or_default().insert(cell);
    }

    /// Every label currently linked to `tag`.
    pub fn labels_for(&self, tag: KmerHash) -> Vec<LabelId> {
        self.tag_labels
            .get(&tag)
            .map(|cells| cells.iter().map(|&c| self.arena[c]).collect())
            .unwrap_or_default()
    }

    /// Every tag linked to `label`.
    pub fn tags_for(&self, label: LabelId) -> Vec<KmerHash> {
        let Some(&cell) = self.label_to_cell.get(&label) else {
            return Vec::new();
        };
        self.tag_labels
            .iter()
            .filter(|(_, cells)| cells.contains(&cell))
            .map(|(&tag, _)| tag)
            .collect()
    }

    pub fn n_labels(&self) -> usize {
        self.label_to_cell.len()
    }

    pub fn entries(&self) -> impl Iterator<Item = (KmerHash, LabelId)> + '_ {
        self.tag_labels.iter().flat_map(move |(&tag, cells)| {
            cells.iter().map(move |&c| (tag, self.arena[c]))
        })
    }

    /// Writes every `(tag_kmer, label_id)` link in the shared binary format
    /// (§6.1, kind `LabelSet`). `ksize` is written right after the header,
    /// the same leading field every other saved kind carries (see
    /// `PartitionMap::save`, `TagEngine::save_tags`), so a caller walking an
    /// unknown file doesn't need to special-case label sets.
    pub fn save<W: Write>(&self, w: &mut W, ksize: u8) -> Result<()> {
        format::write_header(w, FileKind::LabelSet)?;
        format::write_u32(w, ksize as u32)?;
        let entries: Vec<_> = self.entries().collect();
        format::write_u64(w, entries.len() as u64)?;
        for (tag, label) in entries {
            format::write_u64(w, tag)?;
            format::write_u64(w, label)?;
        }
        Ok(())
    }

    pub fn save_to_path(&self, path: impl AsRef<Path>, ksize: u8) -> Result<()> {
        let path = path.as_ref();
        let staging = format::staging_path(path);
        let mut f = std::fs::File::create(&staging)?;
        self.save(&mut f, ksize)?;
        f.flush()?;
        drop(f);
        std::fs::rename(&staging, path)?;
        Ok(())
    }

    /// Loads a label-set file and merges its links into `self`.
    pub fn load<R: Read>(&mut self, r: &mut R, path: &Path) -> Result<()> {
        let kind = format::read_header(r, path)?;
        if kind != FileKind::LabelSet {
            return Err(CoreError::BadFileFormat {
                path: path.to_path_buf(),
                reason: format!("expected a label set, found kind {kind:?}"),
            });
        }
        let _ksize = format::read_u32(r)?;
        let n = format::read_u64(r)?;
        for _ in 0..n {
            let tag = format::read_u64(r)?;
            let label = format::read_u64(r)?;
            self.link(tag, label);
        }
        Ok(())
    }

    pub fn load_from_path(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut f = std::fs::File::open(path)?;
        self.load(&mut f, path)
    }
}
