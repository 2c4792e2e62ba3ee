//! SQLite storage adapter on top of sqlx

use std::collections::BTreeSet;
use std::str::FromStr;

use async_trait::async_trait;
use serde_json::{Map, Value};
use sqlx::sqlite::{SqliteConnectOptions, SqlitePoolOptions, SqliteRow};
use sqlx::{QueryBuilder, Row as _, Sqlite, SqlitePool, Transaction};

use super::{Backend, Edge, JoinRow, RelatedRow, Row, Session, Storage};
use crate::error::{GraphError, GraphResult};
use crate::query::{CompareOp, Filter};
use crate::schema::{AttrType, EntityDef, RelationJoin, RowId, SchemaRegistry};

/// Alias of the owner key column in related-row queries
const OWNER_COLUMN: &str = "__owner";

fn quote(identifier: &str) -> String {
    format!("\"{}\"", identifier)
}

/// SQLite connection pool that hands out transactional sessions
#[derive(Debug, Clone)]
pub struct SqliteBackend {
    pool: SqlitePool,
}

impl SqliteBackend {
    /// Connect to a database URL such as `sqlite://relgraph.db`
    pub async fn connect(url: &str, max_connections: u32) -> GraphResult<Self> {
        let options = SqliteConnectOptions::from_str(url)?.create_if_missing(true);
        let backend = Self::connect_with(options, max_connections).await?;
        log::debug!("Connected to {}", url);
        Ok(backend)
    }

    /// Connect with explicit options; foreign keys are always enforced
    pub async fn connect_with(options: SqliteConnectOptions, max_connections: u32) -> GraphResult<Self> {
        let pool = SqlitePoolOptions::new()
            .max_connections(max_connections.max(1))
            .connect_with(options.foreign_keys(true))
            .await?;
        Ok(Self { pool })
    }

    /// Private in-memory database on a single long-lived connection
    pub async fn in_memory() -> GraphResult<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?.foreign_keys(true);
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Ok(Self { pool })
    }

    /// Create entity and join tables that don't exist yet
    ///
    /// Existing tables are left as they are; this does not migrate.
    pub async fn ensure_tables(&self, registry: &SchemaRegistry) -> GraphResult<()> {
        let mut tx = self.pool.begin().await?;

        for entity in registry.entities() {
            let sql = create_table_sql(entity, registry);
            log::debug!("{}", sql);
            sqlx::query(&sql).execute(&mut *tx).await?;
        }

        for join in registry.join_tables() {
            let mut columns = Vec::new();
            for (column, entity) in &join.columns {
                let referenced = registry.entity(entity)?;
                columns.push(format!(
                    "{} INTEGER NOT NULL REFERENCES {}({})",
                    quote(column),
                    quote(&referenced.table),
                    quote(&referenced.primary_key)
                ));
            }
            let sql = format!(
                "CREATE TABLE IF NOT EXISTS {} ({}, PRIMARY KEY ({}, {}))",
                quote(&join.table),
                columns.join(", "),
                quote(&join.columns[0].0),
                quote(&join.columns[1].0)
            );
            log::debug!("{}", sql);
            sqlx::query(&sql).execute(&mut *tx).await?;
        }

        tx.commit().await?;
        Ok(())
    }
}

/// `CREATE TABLE` for one entity, with every foreign key that lands on its rows
fn create_table_sql(entity: &EntityDef, registry: &SchemaRegistry) -> String {
    let mut definitions = vec![format!("{} INTEGER PRIMARY KEY AUTOINCREMENT", quote(&entity.primary_key))];
    for (name, attr_type) in &entity.attributes {
        definitions.push(format!("{} {}", quote(name), attr_type.sql_type()));
    }

    // (column, referenced table, referenced key)
    let mut foreign_keys: BTreeSet<(String, String, String)> = BTreeSet::new();
    for relation in registry.entities().flat_map(|e| e.relations.values()) {
        let (holder, referenced, column) = match &relation.join {
            RelationJoin::BelongsToOne { foreign_key } => {
                (&relation.source, &relation.target, foreign_key)
            }
            RelationJoin::HasOne { foreign_key } | RelationJoin::HasMany { foreign_key } => {
                (&relation.target, &relation.source, foreign_key)
            }
            RelationJoin::ManyToMany { .. } => continue,
        };
        if *holder != entity.name {
            continue;
        }
        if let Ok(referenced) = registry.entity(referenced) {
            foreign_keys.insert((
                column.clone(),
                referenced.table.clone(),
                referenced.primary_key.clone(),
            ));
        }
    }

    for (column, table, key) in foreign_keys {
        definitions.push(format!(
            "FOREIGN KEY ({}) REFERENCES {}({})",
            quote(&column),
            quote(&table),
            quote(&key)
        ));
    }

    format!(
        "CREATE TABLE IF NOT EXISTS {} ({})",
        quote(&entity.table),
        definitions.join(", ")
    )
}

#[async_trait]
impl Backend for SqliteBackend {
    type Session = SqliteSession;

    async fn begin(&self) -> GraphResult<SqliteSession> {
        let tx = self.pool.begin().await?;
        Ok(SqliteSession { tx, statements: 0 })
    }
}

/// One SQLite transaction
pub struct SqliteSession {
    tx: Transaction<'static, Sqlite>,
    statements: usize,
}

impl SqliteSession {
    /// Statements run in this transaction so far
    pub fn statements(&self) -> usize {
        self.statements
    }

    fn record(&mut self, sql: &str) {
        self.statements += 1;
        log::trace!("{}", sql);
    }
}

#[async_trait]
impl Session for SqliteSession {
    async fn commit(self) -> GraphResult<()> {
        self.tx.commit().await?;
        Ok(())
    }

    async fn rollback(self) -> GraphResult<()> {
        self.tx.rollback().await?;
        Ok(())
    }
}

/// Bind a JSON value as the SQLite type of its column
fn push_value(builder: &mut QueryBuilder<'static, Sqlite>, attr_type: AttrType, value: &Value) {
    match (attr_type, value) {
        (_, Value::Null) => {
            builder.push_bind(Option::<i64>::None);
        }
        (AttrType::Json, other) => {
            builder.push_bind(other.to_string());
        }
        (_, Value::Bool(b)) => {
            builder.push_bind(*b);
        }
        (_, Value::Number(n)) => {
            match n.as_i64() {
                Some(i) => builder.push_bind(i),
                None => builder.push_bind(n.as_f64().unwrap_or_default()),
            };
        }
        (_, Value::String(s)) => {
            builder.push_bind(s.clone());
        }
        (_, other) => {
            builder.push_bind(other.to_string());
        }
    }
}

fn push_columns(builder: &mut QueryBuilder<'static, Sqlite>, entity: &EntityDef) {
    let mut separated = builder.separated(", ");
    for (column, _) in entity.columns() {
        separated.push(format!("t.{} AS {}", quote(column), quote(column)));
    }
}

/// Append ` AND <condition>` for each filter condition on alias `t`
fn push_conditions(builder: &mut QueryBuilder<'static, Sqlite>, entity: &EntityDef, filter: &Filter) {
    for condition in &filter.conditions {
        let column = format!("t.{}", quote(&condition.column));
        let attr_type = entity.column_type(&condition.column).unwrap_or(AttrType::Text);

        builder.push(" AND ");
        match (&condition.value, condition.op) {
            (Value::Null, CompareOp::Ne) => {
                builder.push(format!("{} IS NOT NULL", column));
            }
            (Value::Null, _) => {
                builder.push(format!("{} IS NULL", column));
            }
            (value, op) => {
                builder.push(format!("{} {} ", column, op.sql()));
                push_value(builder, attr_type, value);
            }
        }
    }
}

fn decode_value(row: &SqliteRow, column: &str, attr_type: AttrType) -> GraphResult<Value> {
    let value = match attr_type {
        AttrType::Integer => row.try_get::<Option<i64>, _>(column)?.map(Value::from),
        AttrType::Real => row.try_get::<Option<f64>, _>(column)?.map(Value::from),
        AttrType::Text => row.try_get::<Option<String>, _>(column)?.map(Value::String),
        AttrType::Boolean => row.try_get::<Option<bool>, _>(column)?.map(Value::Bool),
        AttrType::Json => match row.try_get::<Option<String>, _>(column)? {
            Some(text) => Some(serde_json::from_str(&text).map_err(|e| {
                GraphError::Storage(format!("column '{}' holds invalid JSON: {}", column, e))
            })?),
            None => None,
        },
    };
    Ok(value.unwrap_or(Value::Null))
}

fn decode_row(row: &SqliteRow, entity: &EntityDef) -> GraphResult<Row> {
    let id: RowId = row.try_get(entity.primary_key.as_str())?;
    let mut attributes = Map::new();
    for (name, attr_type) in &entity.attributes {
        attributes.insert(name.clone(), decode_value(row, name, *attr_type)?);
    }
    Ok(Row { id, attributes })
}

#[async_trait]
impl Storage for SqliteSession {
    async fn fetch_rows(&mut self, entity: &EntityDef, filter: &Filter) -> GraphResult<Vec<Row>> {
        let mut builder = QueryBuilder::new("SELECT ");
        push_columns(&mut builder, entity);
        builder.push(format!(" FROM {} AS t WHERE 1 = 1", quote(&entity.table)));
        push_conditions(&mut builder, entity, filter);
        builder.push(format!(" ORDER BY t.{}", quote(&entity.primary_key)));

        self.record(builder.sql());
        let rows = builder.build().fetch_all(&mut *self.tx).await?;
        rows.iter().map(|row| decode_row(row, entity)).collect()
    }

    async fn fetch_related(
        &mut self,
        edge: Edge<'_>,
        parent_ids: &[RowId],
        filter: &Filter,
    ) -> GraphResult<Vec<RelatedRow>> {
        if parent_ids.is_empty() {
            return Ok(Vec::new());
        }

        let target = edge.target;
        let target_key = format!("t.{}", quote(&target.primary_key));

        // (owner expression, FROM/JOIN clause)
        let (owner, from) = match &edge.relation.join {
            RelationJoin::BelongsToOne { foreign_key } => (
                format!("o.{}", quote(&edge.source.primary_key)),
                format!(
                    "{} AS t JOIN {} AS o ON o.{} = {}",
                    quote(&target.table),
                    quote(&edge.source.table),
                    quote(foreign_key),
                    target_key
                ),
            ),
            RelationJoin::HasOne { foreign_key } | RelationJoin::HasMany { foreign_key } => (
                format!("t.{}", quote(foreign_key)),
                format!("{} AS t", quote(&target.table)),
            ),
            RelationJoin::ManyToMany {
                join_table,
                owner_column,
                related_column,
            } => (
                format!("j.{}", quote(owner_column)),
                format!(
                    "{} AS t JOIN {} AS j ON j.{} = {}",
                    quote(&target.table),
                    quote(join_table),
                    quote(related_column),
                    target_key
                ),
            ),
        };

        // All parent ids travel as one JSON array, so the id count never
        // runs into SQLite's bound-variable limit
        let ids = serde_json::to_string(parent_ids)
            .map_err(|e| GraphError::Storage(format!("failed to encode parent ids: {}", e)))?;

        let mut builder = QueryBuilder::new(format!("SELECT {} AS {}, ", owner, quote(OWNER_COLUMN)));
        push_columns(&mut builder, target);
        builder.push(format!(" FROM {} WHERE {} IN (SELECT value FROM json_each(", from, owner));
        builder.push_bind(ids);
        builder.push("))");
        push_conditions(&mut builder, target, filter);
        builder.push(format!(" ORDER BY {}, {}", quote(OWNER_COLUMN), target_key));

        self.record(builder.sql());
        let rows = builder.build().fetch_all(&mut *self.tx).await?;
        rows.iter()
            .map(|row| -> GraphResult<RelatedRow> {
                Ok(RelatedRow {
                    owner: row.try_get(OWNER_COLUMN)?,
                    row: decode_row(row, target)?,
                })
            })
            .collect()
    }

    async fn insert(&mut self, entity: &EntityDef, attributes: &Map<String, Value>) -> GraphResult<RowId> {
        let mut builder = QueryBuilder::new(format!("INSERT INTO {}", quote(&entity.table)));

        if attributes.is_empty() {
            builder.push(" DEFAULT VALUES");
        } else {
            builder.push(" (");
            {
                let mut columns = builder.separated(", ");
                for name in attributes.keys() {
                    columns.push(quote(name));
                }
            }
            builder.push(") VALUES (");
            for (i, (name, value)) in attributes.iter().enumerate() {
                if i > 0 {
                    builder.push(", ");
                }
                let attr_type = entity.column_type(name).unwrap_or(AttrType::Text);
                push_value(&mut builder, attr_type, value);
            }
            builder.push(")");
        }

        self.record(builder.sql());
        let result = builder.build().execute(&mut *self.tx).await?;
        Ok(result.last_insert_rowid())
    }

    async fn update(
        &mut self,
        entity: &EntityDef,
        id: RowId,
        attributes: &Map<String, Value>,
    ) -> GraphResult<()> {
        if attributes.is_empty() {
            return Ok(());
        }

        let mut builder = QueryBuilder::new(format!("UPDATE {} SET ", quote(&entity.table)));
        for (i, (name, value)) in attributes.iter().enumerate() {
            if i > 0 {
                builder.push(", ");
            }
            builder.push(format!("{} = ", quote(name)));
            let attr_type = entity.column_type(name).unwrap_or(AttrType::Text);
            push_value(&mut builder, attr_type, value);
        }
        builder.push(format!(" WHERE {} = ", quote(&entity.primary_key)));
        builder.push_bind(id);

        self.record(builder.sql());
        let result = builder.build().execute(&mut *self.tx).await?;
        if result.rows_affected() == 0 {
            return Err(GraphError::not_found(&entity.name, id));
        }
        Ok(())
    }

    async fn delete(&mut self, entity: &EntityDef, id: RowId) -> GraphResult<()> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ?",
            quote(&entity.table),
            quote(&entity.primary_key)
        );
        self.record(&sql);
        let result = sqlx::query(&sql).bind(id).execute(&mut *self.tx).await?;
        if result.rows_affected() == 0 {
            return Err(GraphError::not_found(&entity.name, id));
        }
        Ok(())
    }

    async fn relate(&mut self, join: JoinRow<'_>, owner: RowId, related: RowId) -> GraphResult<()> {
        let sql = format!(
            "INSERT INTO {} ({}, {}) VALUES (?, ?)",
            quote(join.table),
            quote(join.owner_column),
            quote(join.related_column)
        );
        self.record(&sql);
        sqlx::query(&sql)
            .bind(owner)
            .bind(related)
            .execute(&mut *self.tx)
            .await?;
        Ok(())
    }

    async fn unrelate(&mut self, join: JoinRow<'_>, owner: RowId, related: RowId) -> GraphResult<()> {
        let sql = format!(
            "DELETE FROM {} WHERE {} = ? AND {} = ?",
            quote(join.table),
            quote(join.owner_column),
            quote(join.related_column)
        );
        self.record(&sql);
        let result = sqlx::query(&sql)
            .bind(owner)
            .bind(related)
            .execute(&mut *self.tx)
            .await?;
        if result.rows_affected() == 0 {
            log::debug!(
                "No link {}({}, {}) to remove",
                join.table,
                owner,
                related
            );
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{demo_backend, demo_registry};
    use serde_json::json;
    use std::time::Duration;

    fn attrs(value: Value) -> Map<String, Value> {
        value.as_object().cloned().unwrap()
    }

    #[test]
    fn test_create_table_sql_collects_foreign_keys_once() {
        let registry = demo_registry();
        let sql = create_table_sql(registry.entity("person").unwrap(), &registry);
        assert_eq!(sql.matches("FOREIGN KEY").count(), 1);
        assert!(sql.contains("FOREIGN KEY (\"parentId\") REFERENCES \"persons\"(\"id\")"));
    }

    #[tokio::test]
    async fn test_insert_update_fetch() {
        let (registry, backend) = demo_backend().await;
        let person = registry.entity("person").unwrap();
        let mut session = backend.begin().await.unwrap();

        let id = session
            .insert(person, &attrs(json!({"firstName": "Sylvester", "age": 68, "address": {"city": "LA"}})))
            .await
            .unwrap();
        session
            .update(person, id, &attrs(json!({"age": 69})))
            .await
            .unwrap();

        let rows = session
            .fetch_rows(person, &Filter::new().eq("id", id))
            .await
            .unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].attributes["age"], json!(69));
        assert_eq!(rows[0].attributes["firstName"], json!("Sylvester"));
        assert_eq!(rows[0].attributes["address"], json!({"city": "LA"}));
        assert_eq!(rows[0].attributes["lastName"], Value::Null);
        session.commit().await.unwrap();
    }

    #[tokio::test]
    async fn test_update_missing_row_is_not_found() {
        let (registry, backend) = demo_backend().await;
        let person = registry.entity("person").unwrap();
        let mut session = backend.begin().await.unwrap();

        let err = session
            .update(person, 404, &attrs(json!({"age": 1})))
            .await
            .unwrap_err();
        assert_eq!(err, GraphError::not_found("person", 404));
    }

    #[tokio::test]
    async fn test_foreign_key_violation_is_constraint() {
        let (registry, backend) = demo_backend().await;
        let animal = registry.entity("animal").unwrap();
        let mut session = backend.begin().await.unwrap();

        let err = session
            .insert(animal, &attrs(json!({"name": "Stray", "ownerId": 999})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "constraint");
    }

    #[tokio::test]
    async fn test_fetch_related_all_join_shapes() {
        let (registry, backend) = demo_backend().await;
        let person = registry.entity("person").unwrap();
        let animal = registry.entity("animal").unwrap();
        let movie = registry.entity("movie").unwrap();
        let mut session = backend.begin().await.unwrap();

        let kent = session.insert(person, &attrs(json!({"firstName": "Kent"}))).await.unwrap();
        let matt = session
            .insert(person, &attrs(json!({"firstName": "Matt", "parentId": kent})))
            .await
            .unwrap();
        let dog = session
            .insert(animal, &attrs(json!({"name": "Doggo", "ownerId": matt})))
            .await
            .unwrap();
        let martian = session.insert(movie, &attrs(json!({"name": "The Martian"}))).await.unwrap();

        let movies = Edge::resolve(&registry, "person", "movies").unwrap();
        session
            .relate(movies.join_row().unwrap(), matt, martian)
            .await
            .unwrap();

        let parent = Edge::resolve(&registry, "person", "parent").unwrap();
        let rows = session.fetch_related(parent, &[matt, kent], &Filter::new()).await.unwrap();
        assert_eq!(rows.len(), 1);
        assert_eq!((rows[0].owner, rows[0].row.id), (matt, kent));

        let pets = Edge::resolve(&registry, "person", "pets").unwrap();
        let rows = session.fetch_related(pets, &[matt], &Filter::new()).await.unwrap();
        assert_eq!((rows[0].owner, rows[0].row.id), (matt, dog));

        let actors = Edge::resolve(&registry, "movie", "actors").unwrap();
        let rows = session.fetch_related(actors, &[martian], &Filter::new()).await.unwrap();
        assert_eq!((rows[0].owner, rows[0].row.id), (martian, matt));

        let rows = session
            .fetch_related(movies, &[matt], &Filter::new().eq("name", "Other"))
            .await
            .unwrap();
        assert!(rows.is_empty());
    }

    #[tokio::test]
    async fn test_fetch_related_many_parents_in_one_statement() {
        let (registry, backend) = demo_backend().await;
        let person = registry.entity("person").unwrap();
        let animal = registry.entity("animal").unwrap();
        let mut session = backend.begin().await.unwrap();

        let kent = session.insert(person, &attrs(json!({"firstName": "Kent"}))).await.unwrap();
        let mut children = Vec::new();
        for i in 0..1200 {
            let id = session
                .insert(person, &attrs(json!({"firstName": format!("Child {}", i), "parentId": kent})))
                .await
                .unwrap();
            children.push(id);
        }
        let first = children[0];
        let last = children[children.len() - 1];
        session
            .insert(animal, &attrs(json!({"name": "Doggo", "ownerId": first})))
            .await
            .unwrap();
        session
            .insert(animal, &attrs(json!({"name": "Kat", "ownerId": last})))
            .await
            .unwrap();

        let before = session.statements();
        let parent = Edge::resolve(&registry, "person", "parent").unwrap();
        let rows = session.fetch_related(parent, &children, &Filter::new()).await.unwrap();
        assert_eq!(session.statements() - before, 1);
        assert_eq!(rows.len(), children.len());
        assert!(rows.iter().all(|r| r.row.id == kent));
        assert_eq!(rows[rows.len() - 1].owner, last);

        let before = session.statements();
        let pets = Edge::resolve(&registry, "person", "pets").unwrap();
        let rows = session.fetch_related(pets, &children, &Filter::new()).await.unwrap();
        assert_eq!(session.statements() - before, 1);
        let owners: Vec<RowId> = rows.iter().map(|r| r.owner).collect();
        assert_eq!(owners, vec![first, last]);

        let before = session.statements();
        let rows = session.fetch_related(pets, &[], &Filter::new()).await.unwrap();
        assert!(rows.is_empty());
        assert_eq!(session.statements(), before);
    }

    #[tokio::test]
    async fn test_locked_database_is_concurrent_modification() {
        let dir = tempfile::tempdir().unwrap();
        let options = SqliteConnectOptions::new()
            .filename(dir.path().join("locked.db"))
            .create_if_missing(true)
            .busy_timeout(Duration::from_millis(50));
        let backend = SqliteBackend::connect_with(options, 2).await.unwrap();
        let registry = demo_registry();
        backend.ensure_tables(&registry).await.unwrap();
        let person = registry.entity("person").unwrap();

        // the first writer keeps its transaction open
        let mut first = backend.begin().await.unwrap();
        first
            .insert(person, &attrs(json!({"firstName": "Matt"})))
            .await
            .unwrap();

        let mut second = backend.begin().await.unwrap();
        let err = second
            .insert(person, &attrs(json!({"firstName": "Ben"})))
            .await
            .unwrap_err();
        assert_eq!(err.kind(), "concurrent_modification");
        drop(second);

        first.commit().await.unwrap();
        let mut session = backend.begin().await.unwrap();
        let rows = session.fetch_rows(person, &Filter::new()).await.unwrap();
        assert_eq!(rows.len(), 1);
    }
}
