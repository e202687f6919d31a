//! Search/replace patch blocks: parsing from model output and layered application.
//!
//! Blocks use a three-marker protocol:
//!
//! ```text
//! <<<<<<< SEARCH
//! exact lines to find
//! =======
//! replacement lines
//! >>>>>>> REPLACE
//! ```
//!
//! Each block is matched against the content produced by the blocks before it,
//! so a batch composes sequentially. Matching tries, in order: an exact
//! substring, a whitespace-normalized line window, and (when the search text
//! contains an ellipsis placeholder line) an ordered segment match.
//!
//! An ambiguous match is always an error; the first occurrence is never picked
//! silently. Applying a batch twice is only a no-op when the replacement text
//! no longer contains the search text.

mod apply;
mod parse;
mod symbols;

pub use apply::{apply_blocks, apply_blocks_with_symbols, is_placeholder_line};
pub use parse::{contains_patch_markers, parse_blocks};
pub use symbols::{HeuristicSymbolLookup, NoSymbols, SymbolLookup};

use serde::{Deserialize, Serialize};
use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PatchBlock {
    pub search: String,
    pub replace: String,
}

impl PatchBlock {
    pub fn new(search: impl Into<String>, replace: impl Into<String>) -> Self {
        Self {
            search: search.into(),
            replace: replace.into(),
        }
    }
}

/// One place an ambiguous search text matched.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MatchLocation {
    /// 1-based line number of the first matched line.
    pub line: usize,
    /// Enclosing function/type, when the symbol lookup can tell.
    pub symbol: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum PatchError {
    #[error(
        "block {block}: search text matches {} locations ({}); add surrounding lines so it matches exactly once",
        .locations.len(),
        describe_match_locations(.locations)
    )]
    Ambiguous {
        /// 1-based index of the failing block.
        block: usize,
        search: String,
        locations: Vec<MatchLocation>,
    },
    #[error("block {block}: search text not found in file:\n{search}")]
    NotFound { block: usize, search: String },
}

impl PatchError {
    pub fn block(&self) -> usize {
        match self {
            PatchError::Ambiguous { block, .. } | PatchError::NotFound { block, .. } => *block,
        }
    }

    pub fn search(&self) -> &str {
        match self {
            PatchError::Ambiguous { search, .. } | PatchError::NotFound { search, .. } => search,
        }
    }
}

pub fn describe_match_locations(locations: &[MatchLocation]) -> String {
    locations
        .iter()
        .map(|loc| match &loc.symbol {
            Some(symbol) => format!("line {} in {}", loc.line, symbol),
            None => format!("line {}", loc.line),
        })
        .collect::<Vec<_>>()
        .join(", ")
}
