use std::collections::hash_map::Entry;

use rustc_hash::FxHashMap;

/// One original-value-to-pseudonym association, keyed on the raw bytes of
/// the original identifier. Within a run the association is a function:
/// the same original bytes always come back as the same pseudonym.
pub struct PseudonymTable {
    entries: FxHashMap<Vec<u8>, Vec<u8>>,
}

impl PseudonymTable {
    pub fn new() -> Self {
        PseudonymTable {
            entries: FxHashMap::default(),
        }
    }

    /// Returns the pseudonym for `key`, calling `make` to allocate one on
    /// first sight. The flag is true when the entry was just allocated.
    pub fn lookup_or_insert(
        &mut self,
        key: &[u8],
        make: impl FnOnce() -> Vec<u8>,
    ) -> (&[u8], bool) {
        match self.entries.entry(key.to_vec()) {
            Entry::Occupied(slot) => (slot.into_mut().as_slice(), false),
            Entry::Vacant(slot) => (slot.insert(make()).as_slice(), true),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}

/// The per-kind tables for one run. They live as long as the run so the
/// same identifier maps to the same pseudonym across all input trails.
pub struct MappingStore {
    pub uids: PseudonymTable,
    pub gids: PseudonymTable,
    pub pids: PseudonymTable,
    pub paths: PseudonymTable,
    pub addrs: PseudonymTable,
}

impl MappingStore {
    pub fn new() -> Self {
        MappingStore {
            uids: PseudonymTable::new(),
            gids: PseudonymTable::new(),
            pids: PseudonymTable::new(),
            paths: PseudonymTable::new(),
            addrs: PseudonymTable::new(),
        }
    }
}
