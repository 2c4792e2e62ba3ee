//! Shared fixtures for the test suite

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{json, Map, Value};

use crate::error::GraphResult;
use crate::query::Filter;
use crate::schema::{AttrType, EntityDef, RowId, SchemaRegistry, DEMO_SCHEMA};
use crate::storage::{Backend, Edge, JoinRow, RelatedRow, Row, Session, SqliteBackend, SqliteSession, Storage};

pub fn demo_registry() -> SchemaRegistry {
    SchemaRegistry::from_toml_str(DEMO_SCHEMA).expect("demo schema is valid")
}

/// Demo registry plus a fresh in-memory database with its tables
pub async fn demo_backend() -> (SchemaRegistry, SqliteBackend) {
    let registry = demo_registry();
    let backend = SqliteBackend::in_memory().await.expect("in-memory sqlite");
    backend.ensure_tables(&registry).await.expect("demo tables");
    (registry, backend)
}

/// Persons that each hold at most one passport, on a fresh in-memory database
pub async fn passport_backend() -> (SchemaRegistry, SqliteBackend) {
    let registry = SchemaRegistry::builder()
        .entity(
            EntityDef::new("person", "persons")
                .attribute("firstName", AttrType::Text)
                .has_one("passport", "passport", "holderId"),
        )
        .entity(
            EntityDef::new("passport", "passports")
                .attribute("holderId", AttrType::Integer)
                .attribute("number", AttrType::Text)
                .belongs_to_one("holder", "person", "holderId"),
        )
        .build()
        .expect("passport schema is valid");
    let backend = SqliteBackend::in_memory().await.expect("in-memory sqlite");
    backend.ensure_tables(&registry).await.expect("passport tables");
    (registry, backend)
}

/// Primary keys of the rows created by [`seed_matt`]
#[derive(Debug, Clone, Copy)]
pub struct Seeded {
    pub kent: RowId,
    pub matt: RowId,
    pub sylvester: RowId,
    pub ben: RowId,
    pub doggo: RowId,
    pub kat: RowId,
    pub martian: RowId,
    pub good_will_hunting: RowId,
}

fn object(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

/// Kent, his son Matt with two pets and two movies, and two unrelated actors
pub async fn seed_matt(backend: &SqliteBackend, registry: &SchemaRegistry) -> Seeded {
    let person = registry.entity("person").unwrap();
    let animal = registry.entity("animal").unwrap();
    let movie = registry.entity("movie").unwrap();
    let mut session = backend.begin().await.unwrap();

    let kent = session
        .insert(person, &object(json!({"firstName": "Kent", "lastName": "Damon", "age": 70})))
        .await
        .unwrap();
    let matt = session
        .insert(
            person,
            &object(json!({"firstName": "Matt", "lastName": "Damon", "age": 43, "parentId": kent})),
        )
        .await
        .unwrap();
    let sylvester = session
        .insert(person, &object(json!({"firstName": "Sylvester", "lastName": "Stallone", "age": 68})))
        .await
        .unwrap();
    let ben = session
        .insert(person, &object(json!({"firstName": "Ben", "lastName": "Affleck", "age": 40})))
        .await
        .unwrap();

    let doggo = session
        .insert(animal, &object(json!({"name": "Doggo", "species": "dog", "ownerId": matt})))
        .await
        .unwrap();
    let kat = session
        .insert(animal, &object(json!({"name": "Kat", "species": "cat", "ownerId": matt})))
        .await
        .unwrap();

    let martian = session
        .insert(movie, &object(json!({"name": "The Martian"})))
        .await
        .unwrap();
    let good_will_hunting = session
        .insert(movie, &object(json!({"name": "Good Will Hunting"})))
        .await
        .unwrap();

    let movies = Edge::resolve(registry, "person", "movies").unwrap();
    let join = movies.join_row().unwrap();
    session.relate(join, matt, martian).await.unwrap();
    session.relate(join, matt, good_will_hunting).await.unwrap();
    session.commit().await.unwrap();

    Seeded {
        kent,
        matt,
        sylvester,
        ben,
        doggo,
        kat,
        martian,
        good_will_hunting,
    }
}

/// Storage wrapper that counts queries by kind
pub struct CountingStorage<S> {
    inner: S,
    root_queries: Arc<AtomicUsize>,
    related_queries: Arc<AtomicUsize>,
}

impl<S> CountingStorage<S> {
    pub fn new(inner: S) -> Self {
        Self {
            inner,
            root_queries: Arc::new(AtomicUsize::new(0)),
            related_queries: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn root_queries(&self) -> usize {
        self.root_queries.load(Ordering::SeqCst)
    }

    pub fn related_queries(&self) -> usize {
        self.related_queries.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl<S: Storage> Storage for CountingStorage<S> {
    async fn fetch_rows(&mut self, entity: &EntityDef, filter: &Filter) -> GraphResult<Vec<Row>> {
        self.root_queries.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_rows(entity, filter).await
    }

    async fn fetch_related(
        &mut self,
        edge: Edge<'_>,
        parent_ids: &[RowId],
        filter: &Filter,
    ) -> GraphResult<Vec<RelatedRow>> {
        self.related_queries.fetch_add(1, Ordering::SeqCst);
        self.inner.fetch_related(edge, parent_ids, filter).await
    }

    async fn insert(&mut self, entity: &EntityDef, attributes: &Map<String, Value>) -> GraphResult<RowId> {
        self.inner.insert(entity, attributes).await
    }

    async fn update(
        &mut self,
        entity: &EntityDef,
        id: RowId,
        attributes: &Map<String, Value>,
    ) -> GraphResult<()> {
        self.inner.update(entity, id, attributes).await
    }

    async fn delete(&mut self, entity: &EntityDef, id: RowId) -> GraphResult<()> {
        self.inner.delete(entity, id).await
    }

    async fn relate(&mut self, join: JoinRow<'_>, owner: RowId, related: RowId) -> GraphResult<()> {
        self.inner.relate(join, owner, related).await
    }

    async fn unrelate(&mut self, join: JoinRow<'_>, owner: RowId, related: RowId) -> GraphResult<()> {
        self.inner.unrelate(join, owner, related).await
    }
}

#[async_trait]
impl<S: Session> Session for CountingStorage<S> {
    async fn commit(self) -> GraphResult<()> {
        self.inner.commit().await
    }

    async fn rollback(self) -> GraphResult<()> {
        self.inner.rollback().await
    }
}

/// Backend whose sessions count their queries into shared counters
#[derive(Clone)]
pub struct CountingBackend {
    inner: SqliteBackend,
    root_queries: Arc<AtomicUsize>,
    related_queries: Arc<AtomicUsize>,
}

impl CountingBackend {
    pub fn new(inner: SqliteBackend) -> Self {
        Self {
            inner,
            root_queries: Arc::new(AtomicUsize::new(0)),
            related_queries: Arc::new(AtomicUsize::new(0)),
        }
    }

    pub fn related_queries(&self) -> usize {
        self.related_queries.load(Ordering::SeqCst)
    }

    pub fn reset(&self) {
        self.root_queries.store(0, Ordering::SeqCst);
        self.related_queries.store(0, Ordering::SeqCst);
    }
}

#[async_trait]
impl Backend for CountingBackend {
    type Session = CountingStorage<SqliteSession>;

    async fn begin(&self) -> GraphResult<Self::Session> {
        Ok(CountingStorage {
            inner: self.inner.begin().await?,
            root_queries: self.root_queries.clone(),
            related_queries: self.related_queries.clone(),
        })
    }
}
