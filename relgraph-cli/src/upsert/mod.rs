//! Graph upserts: diff an incoming graph against storage, then apply the result

pub mod differ;
pub mod executor;
pub mod operation;

pub use differ::Differ;
pub use executor::{plan, Executor};
pub use operation::{Binding, EdgeRef, ExecutionReport, NodeRef, Operation};
