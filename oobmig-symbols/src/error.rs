#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("invalid symbol `{symbol}`: {reason}")]
pub struct ParseError {
    pub symbol: String,
    pub reason: &'static str,
}

impl ParseError {
    pub(crate) fn new(symbol: &str, reason: &'static str) -> Self {
        Self {
            symbol: symbol.to_owned(),
            reason,
        }
    }
}

/// Structural problems found while loading or growing a trie.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TrieError {
    #[error("node id {0} appears more than once")]
    DuplicateId(i64),

    #[error("node {id} references missing parent {parent_id}")]
    MissingParent { id: i64, parent_id: i64 },

    #[error("node {0} is part of a parent cycle")]
    Cycle(i64),

    #[error("node {0} duplicates a sibling")]
    DuplicateChild(i64),

    #[error("node {0} sits at the wrong level")]
    Level(i64),

    #[error("unknown segment `{0}`")]
    UnknownSegment(String),

    #[error("no node ids left after {0}")]
    IdOverflow(i64),

    #[error(transparent)]
    Parse(#[from] ParseError),
}
