use std::collections::{HashMap, HashSet};

use crate::error::TrieError;

#[derive(Debug, Clone, PartialEq, Eq)]
struct FlatEntry {
    segment: String,
    parent_id: Option<i64>,
}

/// Names stored as `(id, segment, parent_id)` rows, each name being the
/// concatenation of the segments from the root down to its id.
#[derive(Debug, Clone, Default)]
pub struct NameTable {
    entries: HashMap<i64, FlatEntry>,
}

impl NameTable {
    pub fn new<I, S>(rows: I) -> Result<Self, TrieError>
    where
        I: IntoIterator<Item = (i64, S, Option<i64>)>,
        S: Into<String>,
    {
        let mut entries = HashMap::new();

        for (id, segment, parent_id) in rows {
            let entry = FlatEntry {
                segment: segment.into(),
                parent_id,
            };

            if entries.insert(id, entry).is_some() {
                return Err(TrieError::DuplicateId(id));
            }
        }

        Ok(Self { entries })
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Full name of `id`, or `None` when the table has no such row.
    pub fn resolve(&self, id: i64) -> Result<Option<String>, TrieError> {
        let mut memo = HashMap::new();
        self.resolve_with(id, &mut memo)
    }

    /// Resolves every id, sharing work between names with common prefixes.
    /// Ids missing from the table are left out of the result.
    pub fn resolve_all<I>(&self, ids: I) -> Result<HashMap<i64, String>, TrieError>
    where
        I: IntoIterator<Item = i64>,
    {
        let mut memo = HashMap::new();
        let mut names = HashMap::new();

        for id in ids {
            if let Some(name) = self.resolve_with(id, &mut memo)? {
                names.insert(id, name);
            }
        }

        Ok(names)
    }

    /// Resolves every id on its own, sharing work like [`NameTable::resolve_all`].
    /// A broken chain only fails the ids that run through it; ids missing
    /// from the table are left out.
    pub fn resolve_each<I>(&self, ids: I) -> HashMap<i64, Result<String, TrieError>>
    where
        I: IntoIterator<Item = i64>,
    {
        let mut memo = HashMap::new();
        let mut names = HashMap::new();

        for id in ids {
            match self.resolve_with(id, &mut memo) {
                Ok(Some(name)) => {
                    names.insert(id, Ok(name));
                }
                Ok(None) => {}
                Err(err) => {
                    names.insert(id, Err(err));
                }
            }
        }

        names
    }

    fn resolve_with(
        &self,
        id: i64,
        memo: &mut HashMap<i64, String>,
    ) -> Result<Option<String>, TrieError> {
        if !self.entries.contains_key(&id) {
            return Ok(None);
        }

        // Walk up until a root or an already resolved ancestor.
        let mut chain = Vec::new();
        let mut on_chain = HashSet::new();
        let mut current = Some(id);
        let mut prefix = String::new();

        while let Some(node_id) = current {
            if let Some(name) = memo.get(&node_id) {
                prefix.clone_from(name);
                break;
            }

            if !on_chain.insert(node_id) {
                return Err(TrieError::Cycle(node_id));
            }

            let Some(entry) = self.entries.get(&node_id) else {
                let child = chain.last().copied().unwrap_or(id);
                return Err(TrieError::MissingParent {
                    id: child,
                    parent_id: node_id,
                });
            };

            chain.push(node_id);
            current = entry.parent_id;
        }

        for node_id in chain.into_iter().rev() {
            if let Some(entry) = self.entries.get(&node_id) {
                prefix.push_str(&entry.segment);
                memo.insert(node_id, prefix.clone());
            }
        }

        Ok(Some(prefix))
    }
}
