//! Query filters
//!
//! Root filters for fetches and the named modifiers relation expressions can
//! attach to individual relations.

pub mod filters;

pub use filters::{CompareOp, Condition, Filter, Modifiers};
