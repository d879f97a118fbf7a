use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeSet, HashMap},
    fmt,
    str::FromStr,
};

use crate::{
    error::TrieError,
    symbol::explode,
    trie::{Trie, TrieNode},
};

/// The fixed levels of a symbol trie, root first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SegmentType {
    Scheme,
    PackageManager,
    PackageName,
    PackageVersion,
    DescriptorNamespace,
    DescriptorSuffix,
}

impl SegmentType {
    pub fn level(&self) -> usize {
        *self as usize
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentType::Scheme => "SCHEME",
            SegmentType::PackageManager => "PACKAGE_MANAGER",
            SegmentType::PackageName => "PACKAGE_NAME",
            SegmentType::PackageVersion => "PACKAGE_VERSION",
            SegmentType::DescriptorNamespace => "DESCRIPTOR_NAMESPACE",
            SegmentType::DescriptorSuffix => "DESCRIPTOR_SUFFIX",
        }
    }
}

impl fmt::Display for SegmentType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SegmentType {
    type Err = TrieError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "SCHEME" => SegmentType::Scheme,
            "PACKAGE_MANAGER" => SegmentType::PackageManager,
            "PACKAGE_NAME" => SegmentType::PackageName,
            "PACKAGE_VERSION" => SegmentType::PackageVersion,
            "DESCRIPTOR_NAMESPACE" => SegmentType::DescriptorNamespace,
            "DESCRIPTOR_SUFFIX" => SegmentType::DescriptorSuffix,
            other => return Err(TrieError::UnknownSegment(other.to_owned())),
        })
    }
}

/// Which lookups a descriptor suffix leaf serves.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum SegmentQuality {
    Precise,
    Fuzzy,
    Both,
}

impl SegmentQuality {
    pub fn as_str(&self) -> &'static str {
        match self {
            SegmentQuality::Precise => "PRECISE",
            SegmentQuality::Fuzzy => "FUZZY",
            SegmentQuality::Both => "BOTH",
        }
    }
}

impl fmt::Display for SegmentQuality {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for SegmentQuality {
    type Err = TrieError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Ok(match s {
            "PRECISE" => SegmentQuality::Precise,
            "FUZZY" => SegmentQuality::Fuzzy,
            "BOTH" => SegmentQuality::Both,
            other => return Err(TrieError::UnknownSegment(other.to_owned())),
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct Segment {
    pub segment_type: SegmentType,
    pub quality: Option<SegmentQuality>,
    pub text: String,
}

impl Segment {
    fn new(segment_type: SegmentType, text: impl Into<String>) -> Self {
        Self {
            segment_type,
            quality: None,
            text: text.into(),
        }
    }

    fn leaf(quality: SegmentQuality, text: impl Into<String>) -> Self {
        Self {
            segment_type: SegmentType::DescriptorSuffix,
            quality: Some(quality),
            text: text.into(),
        }
    }
}

/// A flattened node, in the shape it is stored and batch-inserted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SymbolNode {
    pub segment_type: SegmentType,
    pub quality: Option<SegmentQuality>,
    pub text: String,
    pub id: i64,
    pub parent_id: Option<i64>,
}

impl From<&TrieNode<Segment>> for SymbolNode {
    fn from(node: &TrieNode<Segment>) -> Self {
        Self {
            segment_type: node.key.segment_type,
            quality: node.key.quality,
            text: node.key.text.clone(),
            id: node.id,
            parent_id: node.parent_id,
        }
    }
}

/// Leaf ids a symbol resolves to. They are equal when the precise and fuzzy
/// suffixes share one `BOTH` leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct SuffixIds {
    pub descriptor_suffix_id: i64,
    pub fuzzy_descriptor_suffix_id: i64,
}

/// Symbol names compressed into a six-level trie.
#[derive(Debug, Clone)]
pub struct SymbolTrie {
    trie: Trie<Segment>,
    cache: HashMap<String, SuffixIds>,
    skipped: Vec<String>,
}

impl SymbolTrie {
    pub fn new(start_id: i64) -> Self {
        Self {
            trie: Trie::new(start_id),
            cache: HashMap::new(),
            skipped: Vec::new(),
        }
    }

    /// Builds a trie over `names`, inserted in ascending lexical order.
    ///
    /// Returns the trie and the next unassigned id. Names that fail to parse
    /// are recorded in [`SymbolTrie::skipped`].
    pub fn build<I, S>(names: I, start_id: i64) -> (Self, i64)
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let mut trie = Self::new(start_id);
        trie.extend(names);

        let next_id = trie.next_id();
        (trie, next_id)
    }

    /// Reloads stored nodes so later inserts reuse them.
    pub fn from_nodes<I>(nodes: I, start_id: i64) -> Result<Self, TrieError>
    where
        I: IntoIterator<Item = SymbolNode>,
    {
        let trie = Trie::from_nodes(
            nodes.into_iter().map(|node| TrieNode {
                id: node.id,
                parent_id: node.parent_id,
                key: Segment {
                    segment_type: node.segment_type,
                    quality: node.quality,
                    text: node.text,
                },
            }),
            start_id,
        )?;

        for node in trie.nodes() {
            let expected = node
                .parent_id
                .and_then(|id| trie.get(id))
                .map_or(0, |parent| parent.key.segment_type.level() + 1);
            let leaf_quality_ok =
                node.key.quality.is_some() == (node.key.segment_type == SegmentType::DescriptorSuffix);

            if node.key.segment_type.level() != expected || !leaf_quality_ok {
                return Err(TrieError::Level(node.id));
            }
        }

        Ok(Self {
            trie,
            cache: HashMap::new(),
            skipped: Vec::new(),
        })
    }

    /// Inserts `names` in ascending lexical order; returns how many were skipped.
    pub fn extend<I, S>(&mut self, names: I) -> usize
    where
        I: IntoIterator<Item = S>,
        S: AsRef<str>,
    {
        let names = names
            .into_iter()
            .map(|name| name.as_ref().to_owned())
            .collect::<BTreeSet<_>>();

        let before = self.skipped.len();

        for name in names {
            if self.insert(&name).is_err() {
                self.skipped.push(name);
            }
        }

        self.skipped.len() - before
    }

    /// Fails when `name` does not parse or the trie has run out of ids.
    pub fn insert(&mut self, name: &str) -> Result<SuffixIds, TrieError> {
        if let Some(ids) = self.cache.get(name) {
            return Ok(*ids);
        }

        let symbol = explode(name)?;

        let path = self.trie.insert([
            Segment::new(SegmentType::Scheme, symbol.scheme),
            Segment::new(SegmentType::PackageManager, symbol.package_manager),
            Segment::new(SegmentType::PackageName, symbol.package_name),
            Segment::new(SegmentType::PackageVersion, symbol.package_version),
            Segment::new(SegmentType::DescriptorNamespace, symbol.descriptor_namespace),
        ])?;
        let namespace_id = path.last().copied();

        let ids = if symbol.descriptor_suffix == symbol.fuzzy_descriptor_suffix {
            let id = self.trie.upsert(
                namespace_id,
                Segment::leaf(SegmentQuality::Both, symbol.descriptor_suffix),
            )?;

            SuffixIds {
                descriptor_suffix_id: id,
                fuzzy_descriptor_suffix_id: id,
            }
        } else {
            SuffixIds {
                descriptor_suffix_id: self.trie.upsert(
                    namespace_id,
                    Segment::leaf(SegmentQuality::Precise, symbol.descriptor_suffix),
                )?,
                fuzzy_descriptor_suffix_id: self.trie.upsert(
                    namespace_id,
                    Segment::leaf(SegmentQuality::Fuzzy, symbol.fuzzy_descriptor_suffix),
                )?,
            }
        };

        self.cache.insert(name.to_owned(), ids);

        Ok(ids)
    }

    pub fn get(&self, name: &str) -> Option<SuffixIds> {
        self.cache.get(name).copied()
    }

    pub fn skipped(&self) -> &[String] {
        &self.skipped
    }

    pub fn next_id(&self) -> i64 {
        self.trie.next_id()
    }

    pub fn max_id(&self) -> Option<i64> {
        self.trie.max_id()
    }

    pub fn len(&self) -> usize {
        self.trie.len()
    }

    pub fn is_empty(&self) -> bool {
        self.trie.is_empty()
    }

    /// Every node, depth-first with parents first.
    pub fn nodes(&self) -> impl Iterator<Item = SymbolNode> + '_ {
        self.trie.traverse().into_iter().map(SymbolNode::from)
    }

    /// Nodes created from id `id` on, in creation order with parents first.
    pub fn nodes_since(&self, id: i64) -> impl Iterator<Item = SymbolNode> + '_ {
        self.trie.nodes_since(id).iter().map(SymbolNode::from)
    }
}
