//! Deterministic HNSW graph over reduced-dimension vectors.
//!
//! A from-scratch hierarchical navigable small world graph tuned for the
//! engine's requirements: reproducible builds (node levels derive from a
//! hash of the record identifier, so inserting the same records in the
//! same order always yields the same graph), physical node removal that
//! re-links surviving neighbors, and a serde-serializable structure the
//! index manager frames with a checksum on disk.
//!
//! Vectors are unit-normalized by the quantization codec before insertion,
//! so cosine distance reduces to `1 - dot`.

use crate::vector::types::{RecordId, Slot};
use serde::{Deserialize, Serialize};
use std::cmp::{Ordering, Reverse};
use std::collections::{BinaryHeap, HashSet};

/// Hard cap on layer height; a geometric draw virtually never reaches it.
const MAX_LEVEL: usize = 16;

/// Graph construction and search parameters, persisted with the graph.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct HnswParams {
    /// Maximum neighbors per node on upper layers; layer 0 allows double.
    pub graph_degree: usize,
    /// Beam width while inserting.
    pub build_breadth: usize,
    /// Default beam width while searching.
    pub search_breadth: usize,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
struct Node {
    record_id: RecordId,
    vector: Vec<f32>,
    /// Adjacency per layer, index 0 = bottom. Length is the node's level + 1.
    neighbors: Vec<Vec<u32>>,
}

impl Node {
    fn level(&self) -> usize {
        self.neighbors.len() - 1
    }
}

/// One nearest-neighbor hit: distance, graph slot, stable record id.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Neighbor {
    pub distance: f32,
    pub slot: Slot,
    pub record_id: RecordId,
}

/// Search frontier entry with a total order: distance first, slot as the
/// deterministic tie-break.
#[derive(Debug, Clone, Copy, PartialEq)]
struct Candidate {
    dist: f32,
    slot: u32,
}

impl Eq for Candidate {}

impl Ord for Candidate {
    fn cmp(&self, other: &Self) -> Ordering {
        self.dist
            .partial_cmp(&other.dist)
            .unwrap_or(Ordering::Equal)
            .then(self.slot.cmp(&other.slot))
    }
}

impl PartialOrd for Candidate {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

/// The navigable small-world graph. Slots are assigned by the ID mapping
/// index; vacated slots stay `None` until the mapping reuses them.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HnswGraph {
    params: HnswParams,
    nodes: Vec<Option<Node>>,
    entry: Option<u32>,
    live_count: usize,
}

impl HnswGraph {
    /// Creates an empty graph with the given tuning parameters.
    #[must_use]
    pub fn new(params: HnswParams) -> Self {
        Self {
            params,
            nodes: Vec::new(),
            entry: None,
            live_count: 0,
        }
    }

    /// The parameters this graph was built with.
    #[must_use]
    pub fn params(&self) -> HnswParams {
        self.params
    }

    /// Number of live nodes.
    #[must_use]
    pub fn node_count(&self) -> usize {
        self.live_count
    }

    /// True if a live node occupies the slot.
    #[must_use]
    pub fn contains(&self, slot: Slot) -> bool {
        self.nodes
            .get(slot.index())
            .is_some_and(|n| n.is_some())
    }

    /// Record ids of all live nodes, in slot order.
    pub fn record_ids(&self) -> impl Iterator<Item = RecordId> + '_ {
        self.nodes
            .iter()
            .filter_map(|n| n.as_ref().map(|node| node.record_id))
    }

    /// Inserts a node at `slot`. Amortized cost touches only the beam
    /// around the insertion point, never unrelated nodes.
    ///
    /// The node's layer height is a geometric draw seeded by the record
    /// id, which makes full rebuilds reproduce the same graph when records
    /// are inserted in ascending id order.
    pub fn insert(&mut self, slot: Slot, record_id: RecordId, vector: Vec<f32>) {
        let level = level_for(record_id, self.params.graph_degree);

        if self.nodes.len() <= slot.index() {
            self.nodes.resize(slot.index() + 1, None);
        }
        debug_assert!(self.nodes[slot.index()].is_none(), "slot already occupied");
        self.nodes[slot.index()] = Some(Node {
            record_id,
            vector,
            neighbors: vec![Vec::new(); level + 1],
        });
        self.live_count += 1;

        let Some(entry) = self.entry else {
            self.entry = Some(slot.get());
            return;
        };

        let entry_level = self.level_of(entry);
        let query = self.vector_of(slot.get()).to_vec();

        // Greedy descent through layers above the new node's level.
        let mut cur = entry;
        let mut l = entry_level;
        while l > level {
            cur = self.greedy_closest(&query, cur, l);
            l -= 1;
        }

        // Beam search and bidirectional linking on shared layers.
        let top = level.min(entry_level);
        for layer in (0..=top).rev() {
            let found = self.search_layer(&query, cur, self.params.build_breadth, layer);
            let max_links = self.max_links(layer);
            let candidates: Vec<Candidate> = found
                .iter()
                .filter(|c| c.slot != slot.get())
                .copied()
                .collect();
            let chosen = self.select_diverse(candidates, max_links);

            for &other in &chosen {
                self.link(slot.get(), other, layer);
                self.link(other, slot.get(), layer);
            }
            if let Some(best) = found.first() {
                cur = best.slot;
            }
        }

        if level > entry_level {
            self.entry = Some(slot.get());
        }
    }

    /// Removes the node at `slot`, detaching it from every neighbor list
    /// and re-linking its former neighbors pairwise so surviving edges
    /// stay navigable.
    ///
    /// Returns the record id that occupied the slot, if any.
    pub fn remove(&mut self, slot: Slot) -> Option<RecordId> {
        let node = self.nodes.get_mut(slot.index())?.take()?;
        self.live_count -= 1;

        // Pruning keeps links asymmetric, so edges into the removed slot
        // can exist anywhere. Sweep every adjacency list.
        for survivor in self.nodes.iter_mut().flatten() {
            for list in &mut survivor.neighbors {
                list.retain(|&s| s != slot.get());
            }
        }

        for (layer, peers) in node.neighbors.iter().enumerate() {
            // Stitch former neighbors to each other so the layer does not
            // fragment around the hole.
            for (i, &a) in peers.iter().enumerate() {
                for &b in &peers[i + 1..] {
                    if self.is_live(a) && self.is_live(b) {
                        self.link(a, b, layer);
                        self.link(b, a, layer);
                    }
                }
            }
        }

        if self.entry == Some(slot.get()) {
            self.entry = self.pick_entry();
        }

        Some(node.record_id)
    }

    /// Approximate nearest-neighbor search.
    ///
    /// Returns up to `k` live neighbors ordered by ascending distance,
    /// equal distances ordered by ascending record id. Accuracy is tuned
    /// via `search_breadth`.
    #[must_use]
    pub fn search(&self, query: &[f32], k: usize, search_breadth: usize) -> Vec<Neighbor> {
        let Some(entry) = self.entry else {
            return Vec::new();
        };

        let mut cur = entry;
        for layer in (1..=self.level_of(entry)).rev() {
            cur = self.greedy_closest(query, cur, layer);
        }

        let ef = search_breadth.max(k);
        let mut hits: Vec<Neighbor> = self
            .search_layer(query, cur, ef, 0)
            .into_iter()
            .map(|c| Neighbor {
                distance: c.dist,
                slot: Slot::new(c.slot),
                record_id: self.record_id_of(c.slot),
            })
            .collect();

        hits.sort_by(|a, b| {
            a.distance
                .partial_cmp(&b.distance)
                .unwrap_or(Ordering::Equal)
                .then(a.record_id.cmp(&b.record_id))
        });
        hits.truncate(k);
        hits
    }

    // Layer search: beam of width `ef`, ascending-distance result order.
    fn search_layer(&self, query: &[f32], entry: u32, ef: usize, layer: usize) -> Vec<Candidate> {
        let ef = ef.max(1);
        let entry_dist = distance(query, self.vector_of(entry));

        let mut visited: HashSet<u32> = HashSet::new();
        visited.insert(entry);

        let mut frontier: BinaryHeap<Reverse<Candidate>> = BinaryHeap::new();
        frontier.push(Reverse(Candidate {
            dist: entry_dist,
            slot: entry,
        }));

        let mut best: BinaryHeap<Candidate> = BinaryHeap::new();
        best.push(Candidate {
            dist: entry_dist,
            slot: entry,
        });

        while let Some(Reverse(current)) = frontier.pop() {
            let worst = best.peek().map(|c| c.dist).unwrap_or(f32::INFINITY);
            if current.dist > worst && best.len() >= ef {
                break;
            }

            for &peer in self.neighbors_of(current.slot, layer) {
                if !visited.insert(peer) {
                    continue;
                }
                let d = distance(query, self.vector_of(peer));
                let worst = best.peek().map(|c| c.dist).unwrap_or(f32::INFINITY);
                if best.len() < ef || d < worst {
                    frontier.push(Reverse(Candidate { dist: d, slot: peer }));
                    best.push(Candidate { dist: d, slot: peer });
                    if best.len() > ef {
                        best.pop();
                    }
                }
            }
        }

        let mut out = best.into_vec();
        out.sort();
        out
    }

    // Greedy hill-climb toward the query on one layer.
    fn greedy_closest(&self, query: &[f32], start: u32, layer: usize) -> u32 {
        let mut cur = start;
        let mut cur_dist = distance(query, self.vector_of(cur));
        loop {
            let mut improved = false;
            for &peer in self.neighbors_of(cur, layer) {
                let d = distance(query, self.vector_of(peer));
                if d < cur_dist {
                    cur = peer;
                    cur_dist = d;
                    improved = true;
                }
            }
            if !improved {
                return cur;
            }
        }
    }

    // Add `to` to `from`'s adjacency on `layer`, pruning to the layer's
    // degree cap with the diversity heuristic when the list overflows.
    fn link(&mut self, from: u32, to: u32, layer: usize) {
        if from == to || !self.is_live(to) {
            return;
        }
        let max_links = self.max_links(layer);

        let overflow = {
            let Some(Some(node)) = self.nodes.get_mut(from as usize) else {
                return;
            };
            let Some(list) = node.neighbors.get_mut(layer) else {
                return;
            };
            if list.contains(&to) {
                return;
            }
            list.push(to);
            if list.len() > max_links {
                Some(list.clone())
            } else {
                None
            }
        };

        let Some(slots) = overflow else {
            return;
        };
        let from_vec = self.vector_of(from).to_vec();
        let candidates: Vec<Candidate> = slots
            .into_iter()
            .map(|s| Candidate {
                dist: distance(&from_vec, self.vector_of(s)),
                slot: s,
            })
            .collect();
        let pruned = self.select_diverse(candidates, max_links);

        if let Some(Some(node)) = self.nodes.get_mut(from as usize)
            && let Some(list) = node.neighbors.get_mut(layer)
        {
            *list = pruned;
        }
    }

    // Diversity-pruned neighbor selection. A candidate survives only when
    // it is closer to the base node than to every neighbor already kept,
    // so edges that bridge toward other regions are preserved instead of
    // piling every link inside one tight cluster. Rejected candidates
    // backfill leftover capacity nearest first, and the closest candidate
    // is always kept, so a prune never strands a node without links.
    fn select_diverse(&self, mut candidates: Vec<Candidate>, cap: usize) -> Vec<u32> {
        candidates.sort();
        if candidates.len() <= cap {
            return candidates.into_iter().map(|c| c.slot).collect();
        }

        let mut kept: Vec<Candidate> = Vec::with_capacity(cap);
        let mut rejected: Vec<Candidate> = Vec::new();
        for c in candidates {
            if kept.len() >= cap {
                break;
            }
            let diverse = kept.iter().all(|k| {
                distance(self.vector_of(c.slot), self.vector_of(k.slot)) >= c.dist
            });
            if diverse {
                kept.push(c);
            } else {
                rejected.push(c);
            }
        }
        for c in rejected {
            if kept.len() >= cap {
                break;
            }
            kept.push(c);
        }
        kept.sort();
        kept.into_iter().map(|c| c.slot).collect()
    }

    fn max_links(&self, layer: usize) -> usize {
        if layer == 0 {
            self.params.graph_degree * 2
        } else {
            self.params.graph_degree
        }
    }

    fn pick_entry(&self) -> Option<u32> {
        // Highest remaining layer wins; slot order breaks ties so the
        // choice is deterministic.
        self.nodes
            .iter()
            .enumerate()
            .filter_map(|(i, n)| n.as_ref().map(|node| (node.level(), i as u32)))
            .max_by(|a, b| a.0.cmp(&b.0).then(b.1.cmp(&a.1)))
            .map(|(_, slot)| slot)
    }

    fn is_live(&self, slot: u32) -> bool {
        self.nodes
            .get(slot as usize)
            .is_some_and(|n| n.is_some())
    }

    fn vector_of(&self, slot: u32) -> &[f32] {
        &self.nodes[slot as usize]
            .as_ref()
            .expect("slot refers to a live node")
            .vector
    }

    fn record_id_of(&self, slot: u32) -> RecordId {
        self.nodes[slot as usize]
            .as_ref()
            .expect("slot refers to a live node")
            .record_id
    }

    fn level_of(&self, slot: u32) -> usize {
        self.nodes[slot as usize]
            .as_ref()
            .expect("slot refers to a live node")
            .level()
    }

    fn neighbors_of(&self, slot: u32, layer: usize) -> &[u32] {
        self.nodes[slot as usize]
            .as_ref()
            .map(|n| n.neighbors.get(layer).map(Vec::as_slice).unwrap_or(&[]))
            .unwrap_or(&[])
    }
}

/// Cosine distance for unit vectors.
fn distance(a: &[f32], b: &[f32]) -> f32 {
    let dot: f32 = a.iter().zip(b).map(|(x, y)| x * y).sum();
    1.0 - dot
}

/// Geometric layer draw with success probability 1/degree, seeded by the
/// record id so rebuilds are reproducible.
fn level_for(record_id: RecordId, graph_degree: usize) -> usize {
    let m = graph_degree.max(2) as u64;
    let mut h = splitmix64(record_id.get());
    let mut level = 0;
    while h % m == 0 && level < MAX_LEVEL {
        level += 1;
        h = splitmix64(h.wrapping_add(level as u64));
    }
    level
}

fn splitmix64(mut x: u64) -> u64 {
    x = x.wrapping_add(0x9e37_79b9_7f4a_7c15);
    let mut z = x;
    z = (z ^ (z >> 30)).wrapping_mul(0xbf58_476d_1ce4_e5b9);
    z = (z ^ (z >> 27)).wrapping_mul(0x94d0_49bb_1331_11eb);
    z ^ (z >> 31)
}
