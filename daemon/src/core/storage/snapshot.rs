// Transactional overlay for the storage backend.
//
// A commit point buffers every write as a per-column batch of changes; reads
// consult the overlay before the disk trees. Applying flushes each column as
// one batch, discarding simply drops the overlay.

use std::collections::{
    btree_map::{Entry, IntoIter},
    BTreeMap, HashMap,
};

use bytes::Bytes;

use super::Column;

// State of an entry in the overlay
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EntryState<T> {
    // The entry has been added/modified in our snapshot
    Stored(T),
    // The entry has been deleted in our snapshot
    Deleted,
    // The entry is not present in our snapshot, must fallback on disk
    Absent,
}

impl<T> EntryState<T> {
    pub fn is_absent(&self) -> bool {
        matches!(self, EntryState::Absent)
    }
}

// Pending writes for a single column
#[derive(Clone, Debug, Default)]
pub struct Changes {
    writes: BTreeMap<Bytes, Option<Bytes>>,
}

impl Changes {
    // Set a key to a new value, returns the previous overlay state
    pub fn insert<K, V>(&mut self, key: K, value: V) -> EntryState<Bytes>
    where
        K: Into<Bytes>,
        V: Into<Bytes>,
    {
        match self.writes.insert(key.into(), Some(value.into())) {
            Some(Some(prev)) => EntryState::Stored(prev),
            Some(None) => EntryState::Deleted,
            None => EntryState::Absent,
        }
    }

    // Remove a key, returns the previous overlay state
    pub fn remove<K>(&mut self, key: K) -> EntryState<Bytes>
    where
        K: Into<Bytes>,
    {
        match self.writes.entry(key.into()) {
            Entry::Occupied(mut entry) => match entry.get_mut().take() {
                Some(v) => EntryState::Stored(v),
                None => EntryState::Deleted,
            },
            Entry::Vacant(v) => {
                v.insert(None);
                EntryState::Absent
            }
        }
    }

    pub fn get<K: AsRef<[u8]>>(&self, key: K) -> EntryState<&Bytes> {
        match self.writes.get(key.as_ref()) {
            Some(Some(value)) => EntryState::Stored(value),
            Some(None) => EntryState::Deleted,
            None => EntryState::Absent,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&Bytes, Option<&Bytes>)> {
        self.writes.iter().map(|(k, v)| (k, v.as_ref()))
    }
}

impl IntoIterator for Changes {
    type Item = (Bytes, Option<Bytes>);
    type IntoIter = IntoIter<Bytes, Option<Bytes>>;

    fn into_iter(self) -> Self::IntoIter {
        self.writes.into_iter()
    }
}

#[derive(Debug, Default)]
pub struct Snapshot {
    trees: HashMap<Column, Changes>,
}

impl Snapshot {
    pub fn changes_mut(&mut self, column: Column) -> &mut Changes {
        self.trees.entry(column).or_default()
    }

    pub fn changes(&self, column: Column) -> Option<&Changes> {
        self.trees.get(&column)
    }

    pub fn into_trees(self) -> HashMap<Column, Changes> {
        self.trees
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_overlay_read_after_write() {
        let mut snapshot = Snapshot::default();
        let changes = snapshot.changes_mut(Column::Messages);
        assert!(changes.get(b"k1".as_slice()).is_absent());

        changes.insert(b"k1".to_vec(), b"v1".to_vec());
        assert_eq!(
            changes.get(b"k1".as_slice()),
            EntryState::Stored(&Bytes::from(b"v1".to_vec()))
        );

        changes.remove(b"k1".to_vec());
        assert_eq!(changes.get(b"k1".as_slice()), EntryState::Deleted);
    }
}
