//! Eager fetcher: roots plus a relation tree in one query per relation node

use std::collections::{HashMap, VecDeque};

use serde_json::{Map, Value};

use crate::error::GraphResult;
use crate::query::{Filter, Modifiers};
use crate::relation::{RelationNode, RelationTree};
use crate::schema::{EntityDef, RowId, SchemaRegistry};
use crate::storage::{Edge, Row, Storage};

/// A fetched row and the relation results stitched under it
#[derive(Debug)]
struct Slot<'r> {
    entity: &'r EntityDef,
    row: Row,
    relations: Vec<Stitched>,
}

#[derive(Debug)]
struct Stitched {
    key: String,
    to_many: bool,
    slots: Vec<usize>,
}

/// One relation node waiting to be fetched for a set of parent slots
struct Level<'t, 'r> {
    node: &'t RelationNode,
    source: &'r str,
    parents: Vec<usize>,
}

/// Runs relation trees against storage
pub struct EagerFetcher<'a> {
    registry: &'a SchemaRegistry,
    modifiers: &'a Modifiers,
}

impl<'a> EagerFetcher<'a> {
    pub fn new(registry: &'a SchemaRegistry, modifiers: &'a Modifiers) -> Self {
        Self {
            registry,
            modifiers,
        }
    }

    /// Fetch `entity` rows matching `filter` with the relations in `tree`
    ///
    /// Issues one query for the roots and then exactly one batched query per
    /// relation node, breadth-first, whatever the number of rows. Results are
    /// rendered as JSON objects ordered by primary key.
    pub async fn fetch<S: Storage + ?Sized>(
        &self,
        storage: &mut S,
        entity: &str,
        filter: &Filter,
        tree: &RelationTree,
    ) -> GraphResult<Vec<Value>> {
        let registry = self.registry;
        let root_entity = registry.entity(entity)?;
        let tree = registry.validate(tree, entity)?;
        let root_filter = filter.resolve(root_entity)?;

        let mut slots: Vec<Slot<'a>> = storage
            .fetch_rows(root_entity, &root_filter)
            .await?
            .into_iter()
            .map(|row| Slot {
                entity: root_entity,
                row,
                relations: Vec::new(),
            })
            .collect();
        let roots: Vec<usize> = (0..slots.len()).collect();
        log::debug!("Fetched {} {} rows", roots.len(), entity);

        let mut queue: VecDeque<Level<'_, 'a>> = tree
            .children
            .iter()
            .map(|node| Level {
                node,
                source: &root_entity.name,
                parents: roots.clone(),
            })
            .collect();

        while let Some(level) = queue.pop_front() {
            let edge = Edge::resolve(registry, level.source, &level.node.name)?;
            let filter = self.modifiers.combine(&level.node.modifiers)?.resolve(edge.target)?;

            // Parent slots sharing a row id all receive the same related rows
            let mut by_id: HashMap<RowId, Vec<usize>> = HashMap::new();
            let mut parent_ids = Vec::new();
            for parent in &level.parents {
                let id = slots[*parent].row.id;
                let entry = by_id.entry(id).or_default();
                if entry.is_empty() {
                    parent_ids.push(id);
                }
                entry.push(*parent);
                slots[*parent].relations.push(Stitched {
                    key: level.node.key().to_string(),
                    to_many: edge.relation.is_to_many(),
                    slots: Vec::new(),
                });
            }

            let related = storage.fetch_related(edge, &parent_ids, &filter).await?;
            log::debug!(
                "{}.{}: {} rows for {} parents",
                level.source,
                level.node.name,
                related.len(),
                parent_ids.len()
            );

            let mut fetched = Vec::with_capacity(related.len());
            for related_row in related {
                let Some(owners) = by_id.get(&related_row.owner) else {
                    continue;
                };
                for owner in owners {
                    let slot = slots.len();
                    slots.push(Slot {
                        entity: edge.target,
                        row: related_row.row.clone(),
                        relations: Vec::new(),
                    });
                    if let Some(stitched) = slots[*owner].relations.last_mut() {
                        stitched.slots.push(slot);
                    }
                    fetched.push(slot);
                }
            }

            for child in &level.node.children {
                queue.push_back(Level {
                    node: child,
                    source: &edge.target.name,
                    parents: fetched.clone(),
                });
            }
        }

        Ok(roots.into_iter().map(|root| render(&slots, root)).collect())
    }
}

fn render(slots: &[Slot<'_>], index: usize) -> Value {
    let slot = &slots[index];
    let mut object = Map::new();
    object.insert(slot.entity.primary_key.clone(), Value::from(slot.row.id));
    for (name, value) in &slot.row.attributes {
        object.insert(name.clone(), value.clone());
    }

    for stitched in &slot.relations {
        let value = if stitched.to_many {
            Value::Array(stitched.slots.iter().map(|s| render(slots, *s)).collect())
        } else {
            stitched
                .slots
                .first()
                .map(|s| render(slots, *s))
                .unwrap_or(Value::Null)
        };
        object.insert(stitched.key.clone(), value);
    }

    Value::Object(object)
}
