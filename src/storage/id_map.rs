//! Bidirectional mapping between stable record identifiers and the dense
//! integer slots the ANN graph addresses.
//!
//! The mapping is a bijection over live records. Slots vacated by deleted
//! records go onto a free list and are reused lowest-first, keeping slot
//! assignment deterministic and the graph's address space compact.

use crate::storage::framed::{self, FrameError};
use crate::vector::types::{RecordId, Slot};
use serde::{Deserialize, Serialize};
use std::cmp::Reverse;
use std::collections::{BinaryHeap, HashMap};
use std::io;
use std::path::Path;

/// Magic bytes identifying `id_mapping.bin`.
const MAGIC: &[u8; 4] = b"SVID";

/// Current mapping format version.
const FORMAT_VERSION: u32 = 1;

/// On-disk form: live pairs plus the slot-space size, sorted by record id
/// so the serialized bytes are stable for identical mappings.
#[derive(Serialize, Deserialize)]
struct PersistedMap {
    capacity: u32,
    entries: Vec<(u64, u32)>,
}

/// In-memory bijection with O(1) lookups in both directions.
#[derive(Debug, Default)]
pub struct IdMap {
    forward: HashMap<RecordId, Slot>,
    reverse: Vec<Option<RecordId>>,
    free: BinaryHeap<Reverse<u32>>,
}

impl IdMap {
    /// Creates an empty mapping.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Assigns a slot to a new record id, reusing the lowest free slot
    /// when one exists.
    ///
    /// Returns the existing slot unchanged if the id is already mapped,
    /// so repeated assignment is idempotent.
    pub fn assign(&mut self, id: RecordId) -> Slot {
        if let Some(&slot) = self.forward.get(&id) {
            return slot;
        }
        let slot = match self.free.pop() {
            Some(Reverse(n)) => Slot::new(n),
            None => {
                self.reverse.push(None);
                Slot::new((self.reverse.len() - 1) as u32)
            }
        };
        self.forward.insert(id, slot);
        self.reverse[slot.index()] = Some(id);
        slot
    }

    /// Removes a record's entry, returning the vacated slot.
    pub fn remove(&mut self, id: RecordId) -> Option<Slot> {
        let slot = self.forward.remove(&id)?;
        self.reverse[slot.index()] = None;
        self.free.push(Reverse(slot.get()));
        Some(slot)
    }

    /// Record id → graph slot, O(1).
    #[must_use]
    pub fn to_internal(&self, id: RecordId) -> Option<Slot> {
        self.forward.get(&id).copied()
    }

    /// Graph slot → record id, O(1).
    #[must_use]
    pub fn to_external(&self, slot: Slot) -> Option<RecordId> {
        self.reverse.get(slot.index()).copied().flatten()
    }

    /// True if the id is mapped.
    #[must_use]
    pub fn contains(&self, id: RecordId) -> bool {
        self.forward.contains_key(&id)
    }

    /// Number of live entries.
    #[must_use]
    pub fn len(&self) -> usize {
        self.forward.len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.forward.is_empty()
    }

    /// Live pairs in ascending record-id order.
    pub fn entries(&self) -> Vec<(RecordId, Slot)> {
        let mut pairs: Vec<(RecordId, Slot)> =
            self.forward.iter().map(|(&id, &slot)| (id, slot)).collect();
        pairs.sort_by_key(|(id, _)| *id);
        pairs
    }

    /// Persists the mapping atomically to `path`.
    pub fn save(&self, path: &Path) -> io::Result<()> {
        let persisted = PersistedMap {
            capacity: self.reverse.len() as u32,
            entries: self
                .entries()
                .into_iter()
                .map(|(id, slot)| (id.get(), slot.get()))
                .collect(),
        };
        let body = bincode::serialize(&persisted)
            .map_err(|e| io::Error::new(io::ErrorKind::InvalidData, e))?;
        framed::write_framed(path, MAGIC, FORMAT_VERSION, &body)
    }

    /// Loads a persisted mapping, verifying frame and bijectivity.
    pub fn load(path: &Path) -> Result<Self, FrameError> {
        let body = framed::read_framed(path, MAGIC, FORMAT_VERSION)?;
        let persisted: PersistedMap = bincode::deserialize(&body)
            .map_err(|e| FrameError::Corrupt(format!("undecodable mapping body: {e}")))?;

        let mut map = Self {
            forward: HashMap::with_capacity(persisted.entries.len()),
            reverse: vec![None; persisted.capacity as usize],
            free: BinaryHeap::new(),
        };

        for (raw_id, raw_slot) in persisted.entries {
            let id = RecordId::new(raw_id)
                .ok_or_else(|| FrameError::Corrupt("zero record id in mapping".to_string()))?;
            let slot = Slot::new(raw_slot);
            if slot.index() >= map.reverse.len() {
                return Err(FrameError::Corrupt(format!(
                    "slot {slot} exceeds mapping capacity {}",
                    map.reverse.len()
                )));
            }
            if map.reverse[slot.index()].is_some() || map.forward.contains_key(&id) {
                return Err(FrameError::Corrupt(format!(
                    "duplicate mapping entry for slot {slot}"
                )));
            }
            map.forward.insert(id, slot);
            map.reverse[slot.index()] = Some(id);
        }

        for (i, entry) in map.reverse.iter().enumerate() {
            if entry.is_none() {
                map.free.push(Reverse(i as u32));
            }
        }

        Ok(map)
    }
}
