//! Tag-equivalence partitioning: a union-find over tags, implemented as an
//! arena of partition-id cells plus index-based indirection rather than
//! shared pointers (`SubsetPartition` in the reference). Two tags are in the
//! same partition iff their cells currently hold the same id.
//!
//! The reverse map always rewrites the smaller of the two merging cell-sets,
//! so a sequence of joins costs `O(n log n)` amortized rather than `O(n^2)`.

use std::collections::{HashMap, HashSet};
use std::io::{Read, Write};
use std::path::Path;

use indexmap::IndexSet;

use crate::error::{CoreError, Result};
use crate::graph;
use crate::io::format::{self, FileKind};
use crate::io::records::ReadSource;
use crate::kmer::{self, KmerHash, KmerIterator};
use crate::sketch::{CountingSketch, Sketchable};
use crate::tagging::{PrePartitionInfo, TagEngine};

/// A partition id. `0` is reserved for "unassigned".
pub type PartitionId = u32;

type CellId = usize;

/// The union-find structure itself: an arena of current id values, a
/// `kmer -> cell` map (the pointer-sharing indirection), and a `value ->
/// cells holding that value` reverse index used to find the smaller side of
/// a merge.
#[derive(Debug, Default)]
pub struct PartitionMap {
    arena: Vec<PartitionId>,
    kmer_to_cell: HashMap<KmerHash, CellId>,
    cells_by_value: HashMap<PartitionId, HashSet<CellId>>,
    next_id: PartitionId,
}

impl PartitionMap {
    pub fn new() -> Self {
        PartitionMap {
            arena: Vec::new(),
            kmer_to_cell: HashMap::new(),
            cells_by_value: HashMap::new(),
            next_id: 2,
        }
    }

    fn alloc_cell(&mut self, value: PartitionId) -> CellId {
        let cell = self.arena.len();
        self.arena.push(value);
        self.cells_by_value.entry(value).or_default().insert(cell);
        cell
    }

    fn fresh_partition_cell(&mut self) -> CellId {
        let id = self.next_id;
        self.next_id += 1;
        self.alloc_cell(id)
    }

    /// Current partition id of `kmer`, or `0` if unassigned.
    pub fn get_partition_id(&self, kmer: KmerHash) -> PartitionId {
        self.kmer_to_cell
            .get(&kmer)
            .map(|&c| self.arena[c])
            .unwrap_or(0)
    }

    /// Rewrites every cell valued at `merge_value` to `target_value`,
    /// working over whichever of the two sets is smaller. Returns the
    /// surviving value.
    fn merge_by_value(&mut self, a: PartitionId, b: PartitionId) -> PartitionId {
        if a == b {
            return a;
        }
        let (small, large) = {
            let sa = self.cells_by_value.get(&a).map_or(0, |s| s.len());
            let sb = self.cells_by_value.get(&b).map_or(0, |s| s.len());
            if sa <= sb { (a, b) } else { (b, a) }
        };

        let moved = self.cells_by_value.remove(&small).unwrap_or_default();
        for &cell in &moved {
            self.arena[cell] = large;
        }
        self.cells_by_value
            .entry(large)
            .or_default()
            .extend(moved);

        large
    }

    /// Assigns a partition id to `info.kmer` based on the tags it's
    /// connected to. Mirrors `SubsetPartition::assign_partition_id`:
    ///
    /// - no tags found => unassign `info.kmer` and return `0`.
    /// - else adopt (or allocate) a representative cell, point every
    ///   untagged member at it, and merge any cell that already disagrees.
    pub fn assign_partition_id(&mut self, info: &PrePartitionInfo) -> PartitionId {
        if info.tagged_kmers.is_empty() {
            self.kmer_to_cell.remove(&info.kmer);
            return 0;
        }

        let existing_cell = info
            .tagged_kmers
            .iter()
            .find_map(|k| self.kmer_to_cell.get(k).copied());

        let target_cell = existing_cell.unwrap_or_else(|| self.fresh_partition_cell());
        let mut target_value = self.arena[target_cell];

        for &tag in &info.tagged_kmers {
            match self.kmer_to_cell.get(&tag) {
                None => {
                    self.kmer_to_cell.insert(tag, target_cell);
                }
                Some(&cell) => {
                    let existing_value = self.arena[cell];
                    if existing_value != target_value {
                        target_value = self.merge_by_value(target_value, existing_value);
                    }
                }
            }
        }

        self.kmer_to_cell.insert(info.kmer, target_cell);
        self.arena[target_cell] = target_value;
        target_value
    }

    /// Merges the partitions currently identified by `p1` and `p2`. Returns
    /// `0` if either id is unknown to this map, else the surviving id.
    /// Mirrors `SubsetPartition::join_partitions`.
    pub fn join_partitions(&mut self, p1: PartitionId, p2: PartitionId) -> PartitionId {
        if !self.cells_by_value.contains_key(&p1) || !self.cells_by_value.contains_key(&p2) {
            return 0;
        }
        self.merge_by_value(p1, p2)
    }

    /// Number of distinct non-zero partition ids currently in use.
    pub fn n_partitions(&self) -> usize {
        self.cells_by_value.keys().filter(|&&v| v != 0).count()
    }

    /// Every `(kmer, partition_id)` pair currently assigned.
    pub fn entries(&self) -> impl Iterator<Item = (KmerHash, PartitionId)> + '_ {
        self.kmer_to_cell
            .iter()
            .map(move |(&k, &cell)| (k, self.arena[cell]))
    }

    /// Merges another partition map's entries into `self`, translating the
    /// other map's partition ids into fresh ones on first sight so that
    /// colliding id spaces don't get silently conflated. Mirrors
    /// `merge_subset` / the merge-on-load behavior for subset partition
    /// files.
    pub fn merge_from(&mut self, other: &PartitionMap) {
        let mut translation: HashMap<PartitionId, PartitionId> = HashMap::new();

        for (kmer, other_pid) in other.entries() {
            if other_pid == 0 {
                continue;
            }
            let translated = *translation.entry(other_pid).or_insert_with(|| {
                self.next_id += 1;
                self.next_id - 1
            });

            match self.kmer_to_cell.get(&kmer).copied() {
                None => {
                    let cell = self.alloc_cell(translated);
                    self.kmer_to_cell.insert(kmer, cell);
                }
                Some(cell) => {
                    let self_value = self.arena[cell];
                    if self_value != translated {
                        let merged = self.merge_by_value(self_value, translated);
                        // keep the translation table pointed at whatever
                        // value this subset's id now resolves to, so later
                        // kmers sharing `other_pid` land in the same spot
                        translation.insert(other_pid, merged);
                    }
                }
            }
        }
    }

    /// Writes every `(kmer, partition_id)` entry in the shared binary
    /// format (§6.1, kind `SubsetPartition`).
    pub fn save<W: Write>(&self, w: &mut W, ksize: u8) -> Result<()> {
        format::write_header(w, FileKind::SubsetPartition)?;
        format::write_u32(w, ksize as u32)?;
        let entries: Vec<_> = self.entries().collect();
        format::write_u64(w, entries.len() as u64)?;
        for (kmer, pid) in entries {
            format::write_u64(w, kmer)?;
            format::write_u32(w, pid)?;
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

    /// Loads a subset-partition file and merges it into `self`, per the
    /// load-is-a-merge discipline in §4.7: colliding id spaces between the
    /// file and `self` never get silently conflated.
    pub fn load_merge<R: Read>(&mut self, r: &mut R, path: &Path) -> Result<()> {
        let kind = format::read_header(r, path)?;
        if kind != FileKind::SubsetPartition {
            return Err(CoreError::BadFileFormat {
                path: path.to_path_buf(),
                reason: format!("expected a subset partition map, found kind {kind:?}"),
            });
        }
        let _ksize = format::read_u32(r)?;
        let n = format::read_u64(r)?;

        let mut other = PartitionMap::new();
        for _ in 0..n {
            let kmer = format::read_u64(r)?;
            let pid = format::read_u32(r)?;
            if pid == 0 {
                continue;
            }
            let cell = other.alloc_cell(pid);
            other.kmer_to_cell.insert(kmer, cell);
        }

        self.merge_from(&other);
        Ok(())
    }

    pub fn load_merge_from_path(&mut self, path: impl AsRef<Path>) -> Result<()> {
        let path = path.as_ref();
        let mut f = std::fs::File::open(path)?;
        self.load_merge(&mut f, path)
    }
}

/// Drives partitioning over a parent tag set and sketch, writing into a
/// [`PartitionMap`]. A `SubsetPartition` over a restricted tag range shares
/// the same tag/stop-tag sets as its parent but owns a disjoint partition
/// map, so several can run in parallel and be merged back with
/// [`PartitionMap::merge_from`].
pub struct SubsetPartition {
    pub map: PartitionMap,
}

impl SubsetPartition {
    pub fn new() -> Self {
        SubsetPartition {
            map: PartitionMap::new(),
        }
    }

    /// Partitions every tag in `tags` that falls within `[first, last]`
    /// (an empty/default range means "all tags"), by finding connected tags
    /// and assigning/merging partition ids. Mirrors
    /// `SubsetPartition::do_partition` / `do_subset_partition`.
    pub fn do_partition<S: Sketchable>(
        &mut self,
        sketch: &S,
        engine: &TagEngine,
        tags: &IndexSet<KmerHash>,
        range: Option<(KmerHash, KmerHash)>,
        break_on_stop_tags: bool,
    ) -> Result<()> {
        for &tag in tags {
            if let Some((first, last)) = range {
                if !(first..=last).contains(&tag) {
                    continue;
                }
            }
            let kmer_str = crate::kmer::decode(tag, engine.ksize());
            let info = engine.find_all_tags(sketch, kmer_str.as_bytes(), break_on_stop_tags)?;
            self.map.assign_partition_id(&info);
        }
        Ok(())
    }

    /// Splits the single largest partition by introducing stop-tags across
    /// its high-coverage centre, then recomputes partition ids restricted to
    /// the former partition's own tags. Mirrors
    /// `SubsetPartition::repartition_largest_partition`.
    ///
    /// For every tag of the largest partition, a bounded BFS of radius
    /// `distance` (capped at `BFS_NODE_CAP` nodes) decides whether that
    /// tag's neighborhood is still "big" (`visited.len() >= threshold`): if
    /// so, any k-mer visited whose `counting_sketch` count exceeds
    /// `frequency` becomes a new stop-tag, and every other visited k-mer's
    /// count is incremented; otherwise the tag is cached as "small" and
    /// skipped on the rest of this call. Returns the id that was split, or
    /// `0` if the map has no partitions at all.
    pub fn repartition_largest_partition<S: Sketchable>(
        &mut self,
        sketch: &S,
        engine: &mut TagEngine,
        counting_sketch: &mut CountingSketch,
        distance: usize,
        threshold: usize,
        frequency: u64,
    ) -> Result<PartitionId> {
        const BFS_NODE_CAP: usize = 200;

        let mut sizes: HashMap<PartitionId, usize> = HashMap::new();
        for (_, pid) in self.map.entries() {
            if pid != 0 {
                *sizes.entry(pid).or_insert(0) += 1;
            }
        }
        let Some(&largest) = sizes
            .iter()
            .max_by_key(|&(_, &count)| count)
            .map(|(pid, _)| pid)
        else {
            return Ok(0);
        };

        let bigtags: HashSet<KmerHash> = self
            .map
            .entries()
            .filter(|&(_, pid)| pid == largest)
            .map(|(tag, _)| tag)
            .collect();
        for &tag in &bigtags {
            self.map.kmer_to_cell.remove(&tag);
        }

        let mut small_tags: HashSet<KmerHash> = HashSet::new();
        for &tag in &bigtags {
            if small_tags.contains(&tag) {
                continue;
            }
            let kmer_str = kmer::decode(tag, engine.ksize());
            let (f, r) = kmer::encode(kmer_str.as_bytes(), engine.ksize())?;
            let node = graph::Node::new(f, r, engine.ksize());
            let result = graph::bounded_bfs(sketch, node, BFS_NODE_CAP, distance, None, None);

            if result.visited.len() >= threshold {
                for &kmer in &result.visited {
                    if counting_sketch.get_count_hash(kmer) > frequency {
                        engine.stop_tags.insert(kmer);
                    } else {
                        counting_sketch.increment(kmer);
                    }
                }
            } else {
                small_tags.insert(tag);
            }
        }

        for &tag in &bigtags {
            let kmer_str = kmer::decode(tag, engine.ksize());
            let mut info = engine.find_all_tags(sketch, kmer_str.as_bytes(), false)?;
            info.tagged_kmers.retain(|t| bigtags.contains(t));
            self.map.assign_partition_id(&info);
        }

        Ok(largest)
    }

    /// Streams every record of `source` to `out` in its original FASTA/FASTQ
    /// shape, with the partition id found for the first k-mer of the record
    /// that appears in `self.map` appended to the name after a TAB.
    /// Un-tagged records are written with id `0` iff `emit_unassigned`.
    /// Mirrors `SubsetPartition::output_partitioned_file`.
    pub fn output_partitioned_file<R: ReadSource, W: Write>(
        &self,
        source: &mut R,
        out: &mut W,
        ksize: u8,
        emit_unassigned: bool,
    ) -> Result<()> {
        while let Some(record) = source.next_record()? {
            let pid = KmerIterator::new(&record.sequence, ksize)?
                .filter_map(|h| h.ok())
                .map(|h| self.map.get_partition_id(h))
                .find(|&pid| pid != 0)
                .unwrap_or(0);

            if pid == 0 && !emit_unassigned {
                continue;
            }

            let labeled_name = format!("{}\t{}", record.name, pid);
            match &record.quality {
                Some(quality) => {
                    writeln!(out, "@{labeled_name}")?;
                    out.write_all(&record.sequence)?;
                    writeln!(out)?;
                    writeln!(out, "+")?;
                    out.write_all(quality)?;
                    writeln!(out)?;
                }
                None => {
                    writeln!(out, ">{labeled_name}")?;
                    out.write_all(&record.sequence)?;
                    writeln!(out)?;
                }
            }
        }
        Ok(())
    }
}

impl Default for SubsetPartition {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::sketch::PresenceSketch;

    fn make_info(kmer: KmerHash, tags: &[KmerHash]) -> PrePartitionInfo {
        PrePartitionInfo {
            kmer,
            tagged_kmers: tags.iter().copied().collect(),
        }
    }

    #[test]
    fn unconnected_kmer_gets_unassigned() {
        let mut map = PartitionMap::new();
        let info = make_info(42, &[]);
        assert_eq!(map.assign_partition_id(&info), 0);
        assert_eq!(map.get_partition_id(42), 0);
    }

    #[test]
    fn fresh_group_gets_a_new_id() {
        let mut map = PartitionMap::new();
        let info = make_info(1, &[2, 3]);
        let pid = map.assign_partition_id(&info);
        assert_ne!(pid, 0);
        assert_eq!(map.get_partition_id(2), pid);
        assert_eq!(map.get_partition_id(3), pid);
        assert_eq!(map.get_partition_id(1), pid);
    }

    #[test]
    fn two_separately_assigned_groups_merge_on_overlap() {
        let mut map = PartitionMap::new();
        let p1 = map.assign_partition_id(&make_info(1, &[10, 11]));
        let p2 = map.assign_partition_id(&make_info(2, &[20, 21]));
        assert_ne!(p1, p2);

        // a third kmer connects tags from both groups
        let merged = map.assign_partition_id(&make_info(3, &[10, 20]));
        assert_eq!(map.get_partition_id(10), merged);
        assert_eq!(map.get_partition_id(20), merged);
        assert_eq!(map.get_partition_id(11), merged);
        assert_eq!(map.get_partition_id(21), merged);
    }

    #[test]
    fn join_partitions_unifies_two_known_ids() {
        let mut map = PartitionMap::new();
        let p1 = map.assign_partition_id(&make_info(1, &[10]));
        let p2 = map.assign_partition_id(&make_info(2, &[20]));
        let winner = map.join_partitions(p1, p2);
        assert_ne!(winner, 0);
        assert_eq!(map.get_partition_id(10), winner);
        assert_eq!(map.get_partition_id(20), winner);
    }

    #[test]
    fn join_partitions_unknown_id_returns_zero() {
        let mut map = PartitionMap::new();
        map.assign_partition_id(&make_info(1, &[10]));
        assert_eq!(map.join_partitions(999, 1000), 0);
    }

    #[test]
    fn merge_from_reconciles_disjoint_subset_maps() {
        let mut left = PartitionMap::new();
        left.assign_partition_id(&make_info(1, &[10, 11]));

        let mut right = PartitionMap::new();
        right.assign_partition_id(&make_info(2, &[20, 21]));
        right.assign_partition_id(&make_info(3, &[11, 20]));

        left.merge_from(&right);

        assert_eq!(left.get_partition_id(10), left.get_partition_id(20));
        assert_eq!(left.get_partition_id(11), left.get_partition_id(21));
    }

    #[test]
    fn do_partition_links_reads_sharing_overlap() {
        let k = 21u8;
        let mut sketch = PresenceSketch::new(k, 4, 1_000_000).unwrap();
        let mut engine = TagEngine::new(k, 5);

        let shared = "ACGTTGCATGCATGCATGACTAGCATGCATGACGTAGCTAGCATCG";
        let read_a = shared.as_bytes();
        let read_b = shared.as_bytes(); // overlapping by construction

        engine.consume_and_tag(&mut sketch, read_a).unwrap();
        engine.consume_and_tag(&mut sketch, read_b).unwrap();

        let mut subset = SubsetPartition::new();
        subset
            .do_partition(&sketch, &engine, &engine.all_tags, None, false)
            .unwrap();

        assert!(subset.map.n_partitions() >= 1);
    }

    #[test]
    fn save_then_load_merge_preserves_equivalence() {
        let mut map = PartitionMap::new();
        let pid = map.assign_partition_id(&make_info(1, &[10, 11]));
        map.assign_partition_id(&make_info(2, &[20, 21]));

        let mut buf = Vec::new();
        map.save(&mut buf, 21).unwrap();

        let mut into = PartitionMap::new();
        into.load_merge(&mut std::io::Cursor::new(buf), Path::new("<mem>"))
            .unwrap();

        assert_eq!(into.get_partition_id(10), into.get_partition_id(11));
        assert_ne!(into.get_partition_id(10), into.get_partition_id(20));
        assert_ne!(pid, 0);
    }

    #[test]
    fn load_merge_rejects_wrong_kind() {
        let mut buf = Vec::new();
        format::write_header(&mut buf, FileKind::TagSet).unwrap();
        let mut map = PartitionMap::new();
        assert!(map
            .load_merge(&mut std::io::Cursor::new(buf), Path::new("<mem>"))
            .is_err());
    }

    #[test]
    fn repartition_of_empty_map_is_a_no_op() {
        let sketch = PresenceSketch::new(4, 4, 10_000).unwrap();
        let mut engine = TagEngine::new(4, 1);
        let mut counting = CountingSketch::new(4, 4, 10_000).unwrap();
        let mut subset = SubsetPartition::new();
        let split = subset
            .repartition_largest_partition(&sketch, &mut engine, &mut counting, 5, 1, 0)
            .unwrap();
        assert_eq!(split, 0);
    }

    #[test]
    fn repartition_splits_and_marks_coverage() {
        let k = 4u8;
        let mut sketch = PresenceSketch::new(k, 4, 10_000).unwrap();
        let mut engine = TagEngine::new(k, 1);
        let mut counting = CountingSketch::new(k, 4, 10_000).unwrap();

        engine
            .consume_and_tag(&mut sketch, b"AAAACCCCGGGGTTTT")
            .unwrap();

        let mut subset = SubsetPartition::new();
        subset
            .do_partition(&sketch, &engine, &engine.all_tags, None, false)
            .unwrap();

        let mut sizes: HashMap<PartitionId, usize> = HashMap::new();
        for (_, pid) in subset.map.entries() {
            if pid != 0 {
                *sizes.entry(pid).or_insert(0) += 1;
            }
        }
        let largest_before = *sizes
            .iter()
            .max_by_key(|&(_, &count)| count)
            .map(|(pid, _)| pid)
            .expect("do_partition assigned at least one tag");
        let a_tag = subset
            .map
            .entries()
            .find(|&(_, pid)| pid == largest_before)
            .map(|(tag, _)| tag)
            .unwrap();

        // threshold=1 and frequency=0 force every visited k-mer on the
        // first pass into the "still big, not yet over frequency" branch,
        // so its count in `counting` goes from 0 to 1.
        let split = subset
            .repartition_largest_partition(&sketch, &mut engine, &mut counting, 5, 1, 0)
            .unwrap();
        assert_eq!(split, largest_before);

        let a_kmer = kmer::decode(a_tag, k);
        assert!(counting.get_count(a_kmer.as_bytes()).unwrap() >= 1);
    }

    #[test]
    fn output_partitioned_file_tags_matching_record() {
        let k = 4u8;
        let mut sketch = PresenceSketch::new(k, 4, 10_000).unwrap();
        let mut engine = TagEngine::new(k, 1);
        engine.consume_and_tag(&mut sketch, b"AAAACCCC").unwrap();

        let mut subset = SubsetPartition::new();
        subset
            .do_partition(&sketch, &engine, &engine.all_tags, None, false)
            .unwrap();

        let mut source = crate::io::records::VecSource::new(vec![crate::io::Record {
            name: "read1".to_string(),
            sequence: b"AAAACCCC".to_vec(),
            quality: None,
            annotations: String::new(),
        }]);

        let mut out = Vec::new();
        subset
            .output_partitioned_file(&mut source, &mut out, k, false)
            .unwrap();

        let text = String::from_utf8(out).unwrap();
        assert!(text.starts_with(">read1\t"));
        assert!(text.contains("AAAACCCC"));
    }

    #[test]
    fn output_partitioned_file_skips_unassigned_unless_requested() {
        let k = 4u8;
        let map = PartitionMap::new();
        let subset = SubsetPartition { map };

        let mut source = crate::io::records::VecSource::new(vec![crate::io::Record {
            name: "lonely".to_string(),
            sequence: b"GGGGTTTT".to_vec(),
            quality: None,
            annotations: String::new(),
        }]);
        let mut out = Vec::new();
        subset
            .output_partitioned_file(&mut source, &mut out, k, false)
            .unwrap();
        assert!(out.is_empty());

        let mut source = crate::io::records::VecSource::new(vec![crate::io::Record {
            name: "lonely".to_string(),
            sequence: b"GGGGTTTT".to_vec(),
            quality: None,
            annotations: String::new(),
        }]);
        let mut out = Vec::new();
        subset
            .output_partitioned_file(&mut source, &mut out, k, true)
            .unwrap();
        assert!(out.starts_with(b">lonely\t0"));
    }
}
