//! Ticker mention extraction over submission and comment text.

pub mod extractor;
pub mod symbols;

pub use extractor::{merge_per_ticker, InheritanceFlags, MentionExtractor, INHERITED_CONFIDENCE};
pub use symbols::{Stoplist, SymbolTable, SynonymTable, Vocabulary};
