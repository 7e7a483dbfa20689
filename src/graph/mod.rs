//! The implicit de Bruijn graph induced by a sketch's "present" oracle:
//! node set = canonical k-mers the sketch reports present, edges = shared
//! (k-1)-mer overlap. Nothing here is materialized; every query walks the
//! 64-bit forward/reverse encodings directly, mirroring `khmer::Traverser`.

use std::collections::{HashSet, VecDeque};

use crate::error::Result;
use crate::kmer::{bitmask, canonical, KmerHash, KmerIterator};
use crate::sketch::Sketchable;

/// The four DNA bases, in the codec's `twobit_repr` order (A, T, C, G).
const BASES: [u64; 4] = [0, 1, 2, 3];

/// A canonical hash alone can't be extended left or right (canonicalization
/// throws away which orientation was "forward"), so neighbor enumeration
/// tracks a node's forward/reverse pair directly and shifts both, the way
/// the reference traverser does.
fn shift_right(kmer_f: u64, kmer_r: u64, k: u8, base: u64) -> (u64, u64) {
    let mask = bitmask(k);
    let nbits_sub1 = (k as u32) * 2 - 2;
    let new_f = ((kmer_f << 2) | base) & mask;
    // complement of `base` in the twobit_repr codec (A=0,T=1,C=2,G=3) is a
    // XOR-1 away: twobit_comp is A=1,T=0,C=3,G=2.
    let comp_base = base ^ 1;
    let new_r = (kmer_r >> 2) | (comp_base << nbits_sub1);
    (new_f, new_r)
}

fn shift_left(kmer_f: u64, kmer_r: u64, k: u8, base: u64) -> (u64, u64) {
    let mask = bitmask(k);
    let nbits_sub1 = (k as u32) * 2 - 2;
    let comp_base = base ^ 1;
    let new_f = (kmer_f >> 2) | (base << nbits_sub1);
    let new_r = ((kmer_r << 2) | comp_base) & mask;
    (new_f, new_r)
}

/// A node in the implicit graph, tracked by its forward/reverse-complement
/// 64-bit encodings (not just the canonical hash), since extending a k-mer
/// to the left or right requires knowing which orientation is "forward".
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Node {
    pub kmer_f: u64,
    pub kmer_r: u64,
    pub k: u8,
}

impl Node {
    pub fn new(kmer_f: u64, kmer_r: u64, k: u8) -> Self {
        Node { kmer_f, kmer_r, k }
    }

    pub fn canonical_hash(&self) -> KmerHash {
        canonical(self.kmer_f, self.kmer_r)
    }
}

/// Enumerates the up-to-4 present right neighbors of `node` under `sketch`.
pub fn right_neighbors<S: Sketchable>(sketch: &S, node: Node) -> Vec<Node> {
    BASES
        .iter()
        .filter_map(|&b| {
            let (f, r) = shift_right(node.kmer_f, node.kmer_r, node.k, b);
            let cand = Node::new(f, r, node.k);
            sketch.present(cand.canonical_hash()).then_some(cand)
        })
        .collect()
}

/// Enumerates the up-to-4 present left neighbors of `node` under `sketch`.
pub fn left_neighbors<S: Sketchable>(sketch: &S, node: Node) -> Vec<Node> {
    BASES
        .iter()
        .filter_map(|&b| {
            let (f, r) = shift_left(node.kmer_f, node.kmer_r, node.k, b);
            let cand = Node::new(f, r, node.k);
            sketch.present(cand.canonical_hash()).then_some(cand)
        })
        .collect()
}

/// `|left_neighbors| + |right_neighbors|`, `0..=8`.
pub fn degree<S: Sketchable>(sketch: &S, node: Node) -> usize {
    left_neighbors(sketch, node).len() + right_neighbors(sketch, node).len()
}

/// `degree` computed directly from a k-mer string, for callers that don't
/// already hold forward/reverse encodings.
pub fn kmer_degree<S: Sketchable>(sketch: &S, kmer: &[u8], k: u8) -> Result<usize> {
    let (f, r) = crate::kmer::encode(kmer, k)?;
    Ok(degree(sketch, Node::new(f, r, k)))
}

/// Result of a bounded breadth-first traversal.
pub struct BfsResult {
    pub visited: HashSet<KmerHash>,
    pub truncated: bool,
}

/// Bounded BFS from `start`, stopping at `max_nodes` visited or `max_radius`
/// depth (whichever comes first). `stop_tags`, when given, acts as a
/// traversal barrier: nodes in that set are recorded but not expanded.
/// `break_on_circum`, when given, is a degree threshold: a node whose
/// `degree` exceeds it is recorded but not expanded either, the same way a
/// highly-connected repeat region is treated as a barrier rather than
/// traversed through.
pub fn bounded_bfs<S: Sketchable>(
    sketch: &S,
    start: Node,
    max_nodes: usize,
    max_radius: usize,
    stop_tags: Option<&HashSet<KmerHash>>,
    break_on_circum: Option<usize>,
) -> BfsResult {
    let mut visited = HashSet::new();
    let mut queue: VecDeque<(Node, usize)> = VecDeque::new();
    queue.push_back((start, 0));

    let mut truncated = false;

    while let Some((node, depth)) = queue.pop_front() {
        let h = node.canonical_hash();
        if visited.contains(&h) {
            continue;
        }
        if visited.len() >= max_nodes {
            truncated = true;
            break;
        }
        visited.insert(h);

        let is_stop = stop_tags.is_some_and(|s| s.contains(&h));
        let is_circum = break_on_circum.is_some_and(|threshold| degree(sketch, node) > threshold);
        if is_stop || is_circum || depth >= max_radius {
            continue;
        }

        for n in right_neighbors(sketch, node)
            .into_iter()
            .chain(left_neighbors(sketch, node))
        {
            if !visited.contains(&n.canonical_hash()) {
                queue.push_back((n, depth + 1));
            }
        }
    }

    BfsResult { visited, truncated }
}

/// Connected-component size from `start`, unbounded in radius but capped at
/// `max_nodes`. Mirrors `Hashtable::calc_connected_graph_size`.
pub fn calc_connected_graph_size<S: Sketchable>(
    sketch: &S,
    start: Node,
    max_nodes: usize,
    break_on_circum: Option<usize>,
) -> BfsResult {
    bounded_bfs(sketch, start, max_nodes, usize::MAX, None, break_on_circum)
}

/// First position in `seq` whose k-mer is a member of `stop_tags`, or
/// `None` if the sequence never touches one. Used to find where a read
/// should be cut before it's allowed to cross a manually-placed barrier.
pub fn trim_on_stoptags(seq: &[u8], k: u8, stop_tags: &HashSet<KmerHash>) -> Result<Option<usize>> {
    for (i, hash) in KmerIterator::new(seq, k)?.enumerate() {
        if stop_tags.contains(&hash?) {
            return Ok(Some(i));
        }
    }
    Ok(None)
}

/// `true` iff any k-mer of `seq` is present in `sketch`. Used, e.g., over a
/// presence sketch of stop-tags to find reads that touch a stop-tag region.
pub fn filter_if_present<S: Sketchable>(sketch: &S, seq: &[u8], k: u8) -> Result<bool> {
    for hash in KmerIterator::new(seq, k)? {
        if sketch.present(hash?) {
            return Ok(true);
        }
    }
    Ok(false)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::kmer::encode;
    use crate::sketch::PresenceSketch;

    fn node_for(seq: &[u8], k: u8) -> Node {
        let (f, r) = encode(seq, k).unwrap();
        Node::new(f, r, k)
    }

    #[test]
    fn right_neighbor_of_linear_chain_is_found() {
        let mut s = PresenceSketch::new(4, 4, 10_000).unwrap();
        s.consume_sequence(b"ACGTACGT").unwrap();
        let node = node_for(b"ACGT", 4);
        let neighbors = right_neighbors(&s, node);
        assert!(!neighbors.is_empty());
    }

    #[test]
    fn degree_is_zero_for_isolated_kmer() {
        let s = PresenceSketch::new(4, 4, 10_000).unwrap();
        let node = node_for(b"ACGT", 4);
        assert_eq!(degree(&s, node), 0);
    }

    #[test]
    fn bfs_over_linear_chain_visits_every_kmer() {
        let mut s = PresenceSketch::new(4, 4, 10_000).unwrap();
        s.consume_sequence(b"ACGTACGTACGTACGT").unwrap();
        let node = node_for(b"ACGT", 4);
        let result = bounded_bfs(&s, node, 100, 100, None, None);
        assert!(!result.truncated);
        assert!(result.visited.len() >= 4);
    }

    #[test]
    fn bfs_truncates_at_node_cap() {
        let mut s = PresenceSketch::new(4, 4, 10_000).unwrap();
        s.consume_sequence(b"ACGTACGTACGTACGTACGTACGT").unwrap();
        let node = node_for(b"ACGT", 4);
        let result = bounded_bfs(&s, node, 2, 100, None, None);
        assert!(result.truncated);
        assert_eq!(result.visited.len(), 2);
    }

    #[test]
    fn bfs_stops_expanding_past_circum_threshold() {
        // a branch point where the start k-mer has 2 right-neighbors; with
        // break_on_circum(1) the start node is recorded but not expanded.
        let mut s = PresenceSketch::new(4, 4, 10_000).unwrap();
        s.consume_sequence(b"AAAACGTT").unwrap();
        s.consume_sequence(b"AAAATTTT").unwrap();
        let node = node_for(b"AAAA", 4);
        assert!(degree(&s, node) >= 2);

        let result = bounded_bfs(&s, node, 100, 100, None, Some(1));
        assert_eq!(result.visited.len(), 1);
    }

    #[test]
    fn trim_on_stoptags_finds_first_barrier() {
        let seq = b"ACGTACGTACGT";
        let hash = crate::kmer::canonical_hash(b"ACGT", 4).unwrap();
        let mut stops = HashSet::new();
        stops.insert(hash);
        let pos = trim_on_stoptags(seq, 4, &stops).unwrap();
        assert_eq!(pos, Some(0));
    }

    #[test]
    fn filter_if_present_detects_overlap() {
        let mut s = PresenceSketch::new(4, 4, 10_000).unwrap();
        s.consume_sequence(b"AAAACCCC").unwrap();
        assert!(filter_if_present(&s, b"AAAACCCC", 4).unwrap());
        assert!(!filter_if_present(&s, b"GGGGTTTT", 4).unwrap());
    }
}
