#![allow(dead_code)]

use std::path::Path;

use facetdrill::{
    Document,
    FacetsConfig,
    IndexAccessManager,
    IndexConfig,
    WriteToolbox,
};
use tantivy::schema::{STORED, STRING, Schema};
use tracing_subscriber::EnvFilter;

pub type TestResult = Result<(), Box<dyn std::error::Error>>;

pub const PRESENCE: &str = "used_fields";
pub const NAME: &str = "name";
pub const CATEGORY: &str = "category";
pub const COLOR: &str = "color";

pub fn init_tracing() {
    let filter = if let Ok(env) = std::env::var("FACETDRILL_LOG") {
        EnvFilter::new(env)
    } else {
        EnvFilter::new("warn")
    };

    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_test_writer()
        .without_time()
        .try_init();
}

pub fn schema() -> Schema {
    let mut builder = Schema::builder();
    builder.add_text_field(NAME, STRING | STORED);
    builder.add_text_field(CATEGORY, STRING);
    builder.add_text_field(COLOR, STRING);
    builder.build()
}

pub fn facets() -> FacetsConfig {
    let mut facets = FacetsConfig::new()
        .with_presence_field(PRESENCE)
        .expect("valid presence field");
    facets.set_multi_valued(CATEGORY, true);
    facets.set_multi_valued(COLOR, true);
    facets
}

fn item(name: &str, categories: &[&str], colors: &[&str]) -> Document {
    let mut doc = Document::new().text(NAME, name).facet(NAME, name);
    for category in categories {
        doc = doc.text(CATEGORY, *category).facet(CATEGORY, *category);
    }
    for color in colors {
        doc = doc.text(COLOR, *color).facet(COLOR, *color);
    }
    doc
}

/// Six things: two without a category, one of which has no color either.
pub fn documents() -> Vec<Document> {
    vec![
        item(
            "car",
            &["mobility", "technical", "expansive"],
            &["yellow", "green"],
        ),
        item("chicken", &["animal", "farm"], &["white"]),
        item(
            "train",
            &["mobility", "technical", "public transportation"],
            &["green"],
        ),
        item("horse", &["mobility", "animal"], &["brown", "white"]),
        item("blob", &[], &["rainbow"]),
        item("unknown", &[], &[]),
    ]
}

/// Ingests [`documents`] one by one, so ordinals follow document order,
/// and commits.
pub fn populate(manager: &IndexAccessManager) -> facetdrill::Result<()> {
    let writes = WriteToolbox::new(manager.open_write_session()?);
    for doc in documents() {
        writes.ingest(&doc)?;
    }
    writes.commit()?;
    manager.refresh()
}

pub fn in_ram() -> facetdrill::Result<IndexAccessManager> {
    init_tracing();
    let manager =
        IndexAccessManager::open(IndexConfig::in_ram(), schema(), facets())?;
    populate(&manager)?;
    Ok(manager)
}

pub fn on_disk(root: &Path) -> facetdrill::Result<IndexAccessManager> {
    init_tracing();
    IndexAccessManager::open(config(root), schema(), facets())
}

pub fn config(root: &Path) -> IndexConfig {
    IndexConfig::new(&root.join("index"), &root.join("taxonomy"))
}
