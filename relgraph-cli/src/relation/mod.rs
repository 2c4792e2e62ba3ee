//! Relation expressions
//!
//! Parses the textual relation expressions used to scope upserts and eager
//! fetches (`parent, pets, movies.[actors.[pets]]`) into a [`RelationTree`].

pub mod parser;
pub mod tree;

pub use parser::{MAX_DEPTH, ParseError, parse};
pub use tree::{RelationNode, RelationTree};
