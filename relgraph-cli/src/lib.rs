//! Graph upserts and eager fetches over a relational store
//!
//! A [`SchemaRegistry`] describes entities and their relations. A
//! [`GraphEngine`] uses it to load nested object graphs selected by a
//! relation expression such as `[pets, movies.[actors]]`, and to make the
//! stored rows match an incoming graph in a single transaction.

pub mod cli;
pub mod config;
pub mod engine;
pub mod error;
pub mod fetch;
pub mod graph;
pub mod query;
pub mod relation;
pub mod schema;
pub mod storage;
pub mod upsert;

#[cfg(test)]
pub mod testing;

pub use engine::{GraphEngine, Upserted};
pub use error::{GraphError, GraphResult};
pub use query::{Filter, Modifiers};
pub use relation::parse;
pub use schema::SchemaRegistry;
pub use storage::SqliteBackend;
