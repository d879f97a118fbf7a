#![forbid(unsafe_code)]

mod error;
mod flat;
mod symbol;
mod symbol_trie;
mod trie;

pub use error::*;
pub use flat::*;
pub use symbol::*;
pub use symbol_trie::*;
pub use trie::*;
