//! `relgraph demo`: persons, pets and movies end to end

use std::path::Path;
use std::sync::Arc;

use anyhow::{Context, Result};
use colored::*;
use serde_json::{json, Value};

use super::fetch::handler::format_output;
use super::fetch::OutputFormat;
use crate::engine::GraphEngine;
use crate::query::Filter;
use crate::schema::{SchemaRegistry, DEMO_SCHEMA};
use crate::storage::SqliteBackend;

const EAGER: &str = "[parent, children, pets, movies.[actors.[pets]]]";

fn step(title: &str, value: &Value) -> Result<()> {
    println!("{}", title.bright_cyan().bold());
    println!("{}", format_output(value, OutputFormat::Json)?);
    println!();
    Ok(())
}

fn id_of(value: &Value, path: &str) -> Result<i64> {
    value
        .pointer(path)
        .and_then(Value::as_i64)
        .with_context(|| format!("No id at {} in {}", path, value))
}

pub async fn handle_demo_command(database_file: Option<&Path>) -> Result<()> {
    let registry = Arc::new(SchemaRegistry::from_toml_str(DEMO_SCHEMA)?);
    let backend = match database_file {
        Some(path) => {
            let url = format!("sqlite://{}", path.display());
            SqliteBackend::connect(&url, 1).await?
        }
        None => SqliteBackend::in_memory().await?,
    };
    backend.ensure_tables(&registry).await?;

    let engine = GraphEngine::new(backend, registry);

    let sylvester = engine
        .insert_graph(
            "person",
            &json!({"firstName": "Sylvester", "lastName": "Stallone", "age": 68}),
        )
        .await?;
    step("inserted", &sylvester.graph)?;

    let ben = engine
        .insert_graph("person", &json!({"firstName": "Ben", "lastName": "Affleck", "age": 40}))
        .await?;
    step("inserted", &ben.graph)?;

    let matt = engine
        .insert_graph(
            "person",
            &json!({
                "firstName": "Matt",
                "lastName": "Damon",
                "age": 43,
                "parent": {"firstName": "Kent", "lastName": "Damon", "age": 70},
                "pets": [
                    {"name": "Doggo", "species": "dog"},
                    {"name": "Kat", "species": "cat"}
                ],
                "movies": [{"name": "The Martian"}, {"name": "Good Will Hunting"}]
            }),
        )
        .await?;
    step("inserted", &matt.graph)?;

    let matt_id = id_of(&matt.graph, "/id")?;
    let kent_id = id_of(&matt.graph, "/parent/id")?;
    let doggo_id = id_of(&matt.graph, "/pets/0/id")?;
    let good_will_hunting_id = id_of(&matt.graph, "/movies/1/id")?;
    let ben_id = id_of(&ben.graph, "/id")?;

    let kent = engine.patch("person", kent_id, &json!({"age": 71})).await?;
    step("patched", &kent.graph)?;

    // Kat is deleted, Doggo renamed, Kitty inserted; movies stay as they are
    let upserted = engine
        .upsert_graph(
            "person",
            Some(matt_id),
            &json!({
                "id": matt_id,
                "pets": [
                    {"id": doggo_id, "name": "The dog"},
                    {"name": "Kitty", "species": "cat"}
                ]
            }),
            "pets",
        )
        .await?;
    step("upserted", &upserted.graph)?;

    let actor = engine
        .add_related("movie", good_will_hunting_id, "actors", &json!({"id": ben_id}))
        .await?;
    step("added actor", &actor.graph)?;

    let hound = engine
        .add_related("person", ben_id, "pets", &json!({"name": "The Hound", "species": "dog"}))
        .await?;
    step("added pet", &hound.graph)?;

    let people = engine
        .fetch_graph("person", &Filter::new().ge("age", 41), EAGER)
        .await?;
    step(&format!("persons aged 41+ with {}", EAGER), &Value::Array(people))?;

    Ok(())
}
