use serde::{Deserialize, Serialize};
use std::{
    collections::{HashMap, HashSet},
    hash::Hash,
};

use crate::error::TrieError;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrieNode<K> {
    pub id: i64,
    pub parent_id: Option<i64>,
    pub key: K,
}

/// A shared-prefix tree keyed by path segments.
///
/// Each distinct `(parent, key)` pair is one node with a dense id handed out
/// from `start_id` upwards in creation order. Nodes are never removed, and a
/// node's parent always exists before it, so the tree cannot contain cycles.
#[derive(Debug, Clone)]
pub struct Trie<K> {
    nodes: Vec<TrieNode<K>>,
    positions: HashMap<i64, usize>,
    children: HashMap<(Option<i64>, K), i64>,
    next_id: i64,
}

impl<K: Clone + Eq + Hash> Trie<K> {
    pub fn new(start_id: i64) -> Self {
        Self {
            nodes: Vec::new(),
            positions: HashMap::new(),
            children: HashMap::new(),
            next_id: start_id,
        }
    }

    /// Rebuilds a trie from stored nodes.
    ///
    /// New ids continue from the larger of `start_id` and the highest stored id + 1.
    pub fn from_nodes<I>(nodes: I, start_id: i64) -> Result<Self, TrieError>
    where
        I: IntoIterator<Item = TrieNode<K>>,
    {
        let mut nodes = nodes.into_iter().collect::<Vec<_>>();
        nodes.sort_by_key(|node| node.id);

        let mut trie = Self::new(start_id);

        for node in nodes.iter() {
            if trie.positions.insert(node.id, trie.nodes.len()).is_some() {
                return Err(TrieError::DuplicateId(node.id));
            }

            let next_id = node
                .id
                .checked_add(1)
                .ok_or(TrieError::IdOverflow(node.id))?;

            trie.nodes.push(node.clone());
            trie.next_id = trie.next_id.max(next_id);
        }

        for node in nodes {
            if let Some(parent_id) = node.parent_id {
                if !trie.positions.contains_key(&parent_id) {
                    return Err(TrieError::MissingParent {
                        id: node.id,
                        parent_id,
                    });
                }
            }

            if trie
                .children
                .insert((node.parent_id, node.key), node.id)
                .is_some()
            {
                return Err(TrieError::DuplicateChild(node.id));
            }
        }

        trie.check_acyclic()?;

        Ok(trie)
    }

    fn check_acyclic(&self) -> Result<(), TrieError> {
        let mut rooted = HashSet::new();

        for node in self.nodes.iter() {
            let mut path = Vec::new();
            let mut on_path = HashSet::new();
            let mut current = Some(node.id);

            while let Some(id) = current {
                if rooted.contains(&id) {
                    break;
                }

                if !on_path.insert(id) {
                    return Err(TrieError::Cycle(id));
                }

                path.push(id);
                current = self.get(id).and_then(|n| n.parent_id);
            }

            rooted.extend(path);
        }

        Ok(())
    }

    pub fn next_id(&self) -> i64 {
        self.next_id
    }

    /// Highest id in the trie, `None` when it is empty.
    pub fn max_id(&self) -> Option<i64> {
        self.nodes.last().map(|node| node.id)
    }

    pub fn len(&self) -> usize {
        self.nodes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.is_empty()
    }

    pub fn get(&self, id: i64) -> Option<&TrieNode<K>> {
        self.positions.get(&id).map(|pos| &self.nodes[*pos])
    }

    pub fn child(&self, parent_id: Option<i64>, key: &K) -> Option<i64> {
        self.children.get(&(parent_id, key.clone())).copied()
    }

    /// Returns the id of the `key` child of `parent_id`, creating it if needed.
    pub fn upsert(&mut self, parent_id: Option<i64>, key: K) -> Result<i64, TrieError> {
        if let Some(id) = self.child(parent_id, &key) {
            return Ok(id);
        }

        let id = self.next_id;
        self.next_id = id.checked_add(1).ok_or(TrieError::IdOverflow(id))?;

        self.positions.insert(id, self.nodes.len());
        self.children.insert((parent_id, key.clone()), id);
        self.nodes.push(TrieNode { id, parent_id, key });

        Ok(id)
    }

    /// Inserts a path from the root and returns the node id at every level.
    pub fn insert<I: IntoIterator<Item = K>>(&mut self, path: I) -> Result<Vec<i64>, TrieError> {
        let mut parent_id = None;

        path.into_iter()
            .map(|key| -> Result<i64, TrieError> {
                let id = self.upsert(parent_id, key)?;
                parent_id = Some(id);
                Ok(id)
            })
            .collect()
    }

    /// Keys from the root down to `id`.
    pub fn path(&self, id: i64) -> Vec<&K> {
        let mut keys = Vec::new();
        let mut current = self.get(id);

        while let Some(node) = current {
            keys.push(&node.key);
            current = node.parent_id.and_then(|parent_id| self.get(parent_id));
        }

        keys.reverse();
        keys
    }

    /// Nodes in creation order, which is also id order.
    pub fn nodes(&self) -> impl Iterator<Item = &TrieNode<K>> {
        self.nodes.iter()
    }

    /// Nodes with an id of at least `id`, parents first.
    pub fn nodes_since(&self, id: i64) -> &[TrieNode<K>] {
        let start = self.nodes.partition_point(|node| node.id < id);
        &self.nodes[start..]
    }

    /// Depth-first pre-order; every parent precedes its children, which keep creation order.
    pub fn traverse(&self) -> Vec<&TrieNode<K>> {
        let mut children: HashMap<Option<i64>, Vec<usize>> = HashMap::new();
        for (pos, node) in self.nodes.iter().enumerate() {
            children.entry(node.parent_id).or_default().push(pos);
        }

        let mut out = Vec::with_capacity(self.nodes.len());
        let mut stack = children
            .get(&None)
            .map(|roots| roots.iter().rev().copied().collect::<Vec<_>>())
            .unwrap_or_default();

        while let Some(pos) = stack.pop() {
            let node = &self.nodes[pos];
            out.push(node);

            if let Some(kids) = children.get(&Some(node.id)) {
                stack.extend(kids.iter().rev().copied());
            }
        }

        out
    }
}
