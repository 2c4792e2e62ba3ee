//! Schema registry
//!
//! Static description of entities, attributes and relations. A registry is
//! built once at startup, optionally installed process-wide, and then only
//! read. Every engine call receives it by reference.

pub mod dependency;
pub mod models;
pub mod registry;

use std::sync::Arc;

use once_cell::sync::OnceCell;

pub use dependency::{CycleError, DependencyGraph};
pub use models::{AttrType, EntityDef, RelationDef, RelationJoin, RelationKind, RowId};
pub use registry::{JoinTableDef, SchemaBuilder, SchemaRegistry};

use crate::error::{GraphError, GraphResult};

/// Schema used by the `demo` command and the test suite
pub const DEMO_SCHEMA: &str = include_str!("../../assets/demo_schema.toml");

static REGISTRY: OnceCell<Arc<SchemaRegistry>> = OnceCell::new();

/// Install the process-wide registry. Fails if one is already installed.
pub fn install(registry: SchemaRegistry) -> GraphResult<Arc<SchemaRegistry>> {
    let registry = Arc::new(registry);
    REGISTRY
        .set(registry.clone())
        .map_err(|_| GraphError::validation("schema registry is already installed"))?;
    log::debug!(
        "Installed schema registry with {} entities",
        registry.entities().count()
    );
    Ok(registry)
}

/// The process-wide registry, if one was installed
pub fn global() -> Option<Arc<SchemaRegistry>> {
    REGISTRY.get().cloned()
}
