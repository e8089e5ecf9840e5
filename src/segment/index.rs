//! Pluggable per-segment index: key -> `(offset, size)`.

use fnv::FnvHashMap;

/// Where a record's encoded blob lives within its segment file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Location {
    pub offset: u64,
    pub size: u64,
}

/// Capability set every index implementation provides.
pub(crate) trait Index: std::fmt::Debug + Send {
    /// Binds `key` to `location`. Last write for a given key within this
    /// segment wins.
    fn store(&mut self, key: Vec<u8>, location: Location);

    fn query(&self, key: &[u8]) -> Option<Location>;

    /// All `(key, location)` pairs this segment holds. Hash indexes yield
    /// them ordered by file offset (insertion order proxy); sorted indexes
    /// yield them ascending by key.
    fn iter_in_file_order(&self) -> Vec<(Vec<u8>, Location)>;

    fn len(&self) -> usize;
}

/// Expected O(1) store/query; iteration order is by file offset.
#[derive(Debug, Default)]
pub(crate) struct HashIndex {
    map: FnvHashMap<Vec<u8>, Location>,
}

impl Index for HashIndex {
    fn store(&mut self, key: Vec<u8>, location: Location) {
        self.map.insert(key, location);
    }

    fn query(&self, key: &[u8]) -> Option<Location> {
        self.map.get(key).copied()
    }

    fn iter_in_file_order(&self) -> Vec<(Vec<u8>, Location)> {
        let mut entries: Vec<_> = self
            .map
            .iter()
            .map(|(k, loc)| (k.clone(), *loc))
            .collect();
        entries.sort_unstable_by_key(|(_, loc)| loc.offset);
        entries
    }

    fn len(&self) -> usize {
        self.map.len()
    }
}

/// Key-sorted index: `store` keeps the backing `Vec` sorted by key,
/// `query` binary-searches, iteration is ascending by key. This is the
/// index the compactor builds for its output segment, giving it
/// sorted-string-table semantics.
#[derive(Debug, Default)]
pub(crate) struct SortedIndex {
    entries: Vec<(Vec<u8>, Location)>,
}

impl SortedIndex {
    fn search(&self, key: &[u8]) -> std::result::Result<usize, usize> {
        self.entries.binary_search_by(|(k, _)| k.as_slice().cmp(key))
    }
}

impl Index for SortedIndex {
    fn store(&mut self, key: Vec<u8>, location: Location) {
        match self.search(&key) {
            Ok(pos) => self.entries[pos].1 = location,
            Err(pos) => self.entries.insert(pos, (key, location)),
        }
    }

    fn query(&self, key: &[u8]) -> Option<Location> {
        self.search(key).ok().map(|pos| self.entries[pos].1)
    }

    fn iter_in_file_order(&self) -> Vec<(Vec<u8>, Location)> {
        self.entries.clone()
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}
