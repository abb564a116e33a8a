use std::{
    collections::{BTreeMap, BTreeSet},
    path::Path,
};

use serde::{Deserialize, Serialize};
use tantivy::TantivyDocument;

use crate::{
    document::{Document, FieldValue},
    error::{Error, Result},
    schema::IndexSchema,
    taxonomy::{FacetLabel, LABEL_SEPARATOR, TaxonomyWriter},
};

/// Per-dimension facet settings.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize,
)]
#[serde(default)]
pub struct DimConfig {
    /// Values are `/` separated paths rather than single labels.
    pub hierarchical: bool,
    /// A document may carry several values in this dimension.
    pub multi_valued: bool,
    /// Count documents at the dimension itself, which makes an exact
    /// dimension total available for multi-valued dimensions.
    pub require_dim_count: bool,
}

/// Facet settings for an index.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FacetsConfig {
    dims: BTreeMap<String, DimConfig>,
    presence_field: Option<String>,
}

impl FacetsConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Reads a configuration from a JSON file.
    pub fn from_json_file(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)?;
        let config: Self = serde_json::from_str(&raw)?;
        config.validate()?;
        Ok(config)
    }

    pub fn to_json_file(&self, path: &Path) -> Result<()> {
        let raw = serde_json::to_string_pretty(self)?;
        std::fs::write(path, raw)?;
        Ok(())
    }

    /// Tracks, per document, which dimensions received a value.
    ///
    /// The presence field is itself a flat multi-valued dimension whose
    /// values are dimension names; it is what absent selections and
    /// missing counts query against.
    pub fn with_presence_field(
        mut self,
        name: impl Into<String>,
    ) -> Result<Self> {
        let name = name.into();
        if name.is_empty() {
            return Err(Error::Config(
                "presence field name must not be empty".into(),
            ));
        }
        self.presence_field = Some(name);
        Ok(self)
    }

    pub fn presence_field(&self) -> Option<&str> {
        self.presence_field.as_deref()
    }

    pub fn set_hierarchical(&mut self, dim: &str, value: bool) {
        self.dims.entry(dim.to_string()).or_default().hierarchical = value;
    }

    pub fn set_multi_valued(&mut self, dim: &str, value: bool) {
        self.dims.entry(dim.to_string()).or_default().multi_valued = value;
    }

    pub fn set_require_dim_count(&mut self, dim: &str, value: bool) {
        self.dims.entry(dim.to_string()).or_default().require_dim_count =
            value;
    }

    /// Settings for `dim`; unknown dimensions get the defaults, except the
    /// presence field which is always multi-valued.
    pub fn dim_config(&self, dim: &str) -> DimConfig {
        let mut config = self.dims.get(dim).copied().unwrap_or_default();
        if self.presence_field.as_deref() == Some(dim) {
            config.hierarchical = false;
            config.multi_valued = true;
        }
        config
    }

    pub fn validate(&self) -> Result<()> {
        if self.dims.keys().any(String::is_empty) {
            return Err(Error::Config(
                "dimension names must not be empty".into(),
            ));
        }
        if self.presence_field.as_deref() == Some("") {
            return Err(Error::Config(
                "presence field name must not be empty".into(),
            ));
        }
        Ok(())
    }

    /// The category a `value` denotes in `dim`. Hierarchical values are
    /// split on `/`.
    pub fn label(&self, dim: &str, value: &str) -> Result<FacetLabel> {
        if dim.is_empty() {
            return Err(Error::Config(
                "dimension name must not be empty".into(),
            ));
        }
        if self.dim_config(dim).hierarchical {
            FacetLabel::new(std::iter::once(dim).chain(value.split('/')))
        } else {
            FacetLabel::new([dim, value])
        }
    }

    /// The indexed term selecting documents that carry `value` in `dim`.
    ///
    /// Values that could never have been indexed, such as empty ones, map
    /// to a term that matches nothing rather than to an error. Indexed
    /// terms never hold an empty component, so an empty one is inserted
    /// after the dimension.
    pub fn drill_down_term(&self, dim: &str, value: &str) -> String {
        match self.label(dim, value) {
            Ok(label) => label.encode(),
            Err(_) => format!("{dim}{LABEL_SEPARATOR}{LABEL_SEPARATOR}{value}"),
        }
    }

    /// Converts `document` into its indexable form.
    ///
    /// Facet values are registered in the taxonomy, their ordinals stored
    /// in the ordinals fast field and every path prefix indexed as a
    /// drill-down term. When a presence field is configured, the
    /// dimensions that received a value are recorded in it. A rejected
    /// document registers nothing.
    pub fn build(
        &self,
        document: &Document,
        schema: &IndexSchema,
        taxonomy: &TaxonomyWriter,
    ) -> Result<TantivyDocument> {
        self.prepare(document, schema)?.register(schema, taxonomy)
    }

    /// Resolves every field and facet label of `document` without
    /// touching the taxonomy.
    pub(crate) fn prepare(
        &self,
        document: &Document,
        schema: &IndexSchema,
    ) -> Result<PreparedDocument> {
        let mut out = TantivyDocument::default();
        let mut facets: Vec<(&str, &str)> = Vec::new();

        for (name, value) in document.fields() {
            match value {
                FieldValue::Facet(path) => {
                    facets.push((name.as_str(), path.as_str()))
                }
                FieldValue::Text(text) => {
                    out.add_text(schema.field(name)?, text)
                }
                FieldValue::U64(n) => out.add_u64(schema.field(name)?, *n),
                FieldValue::I64(n) => out.add_i64(schema.field(name)?, *n),
                FieldValue::Bytes(bytes) => {
                    out.add_bytes(schema.field(name)?, bytes.as_slice())
                }
            }
        }

        let mut per_dim: BTreeMap<&str, usize> = BTreeMap::new();
        let mut used_dims: Vec<&str> = Vec::new();
        for &(dim, _) in &facets {
            let count = per_dim.entry(dim).or_default();
            if *count == 0 {
                used_dims.push(dim);
            }
            *count += 1;
            if *count > 1 && !self.dim_config(dim).multi_valued {
                return Err(Error::Config(format!(
                    "dimension {dim:?} is single-valued but got several \
                     values"
                )));
            }
        }

        if let Some(presence) = self.presence_field.as_deref() {
            for dim in used_dims {
                if dim != presence {
                    facets.push((presence, dim));
                }
            }
        }

        let mut labels = Vec::with_capacity(facets.len());
        let mut terms = BTreeSet::new();
        for (dim, value) in facets {
            let label = self.label(dim, value)?;
            for len in 1..=label.len() {
                terms.insert(label.prefix(len).encode());
            }
            labels.push((label, self.dim_config(dim).require_dim_count));
        }

        for term in terms {
            out.add_text(schema.facets_field(), term);
        }

        Ok(PreparedDocument {
            document: out,
            labels,
        })
    }
}

/// A validated document whose categories are not registered yet.
#[derive(Debug)]
pub(crate) struct PreparedDocument {
    document: TantivyDocument,
    /// Each label with whether its dimension ordinal is counted.
    labels: Vec<(FacetLabel, bool)>,
}

impl PreparedDocument {
    /// Registers the categories and stores their ordinals.
    pub(crate) fn register(
        self,
        schema: &IndexSchema,
        taxonomy: &TaxonomyWriter,
    ) -> Result<TantivyDocument> {
        let Self {
            mut document,
            labels,
        } = self;

        let mut ordinals = BTreeSet::new();
        for (label, dim_count) in &labels {
            let path_ordinals = taxonomy.add_category(label)?;
            // Skip the dimension ordinal unless its count is wanted.
            let first = if *dim_count { 0 } else { 1 };
            ordinals.extend(path_ordinals.iter().skip(first).copied());
        }
        for ordinal in ordinals {
            document.add_u64(schema.ordinals_field(), ordinal);
        }

        Ok(document)
    }
}

#[cfg(test)]
mod tests {
    use tantivy::{Index, schema::Value};

    use super::*;
    use crate::taxonomy;

    fn fixture() -> (FacetsConfig, IndexSchema, TaxonomyWriter) {
        let mut config = FacetsConfig::new()
            .with_presence_field("used_fields")
            .unwrap();
        config.set_multi_valued("category", true);
        config.set_hierarchical("place", true);

        let mut builder = tantivy::schema::Schema::builder();
        builder.add_text_field("name", tantivy::schema::STRING);
        let schema = IndexSchema::extend(&builder.build()).unwrap();

        let index = Index::create_in_ram(taxonomy::build_schema());
        let writer = TaxonomyWriter::open(&index, 15_000_000).unwrap();
        (config, schema, writer)
    }

    fn texts(doc: &TantivyDocument, schema: &IndexSchema) -> Vec<String> {
        doc.get_all(schema.facets_field())
            .filter_map(|v| v.as_str().map(str::to_string))
            .collect()
    }

    #[test]
    fn drill_down_terms_split_hierarchical_values() {
        let (config, _, _) = fixture();
        assert_eq!(
            config.drill_down_term("place", "eu/de"),
            "place\u{1f}eu\u{1f}de"
        );
        assert_eq!(
            config.drill_down_term("category", "a/b"),
            "category\u{1f}a/b"
        );
    }

    #[test]
    fn build_indexes_prefixes_and_presence() {
        let (config, schema, taxonomy) = fixture();
        let document = Document::new()
            .text("name", "car")
            .facet("category", "mobility")
            .facet("category", "technical")
            .facet("place", "eu/de");

        let built = config.build(&document, &schema, &taxonomy).unwrap();
        let terms = texts(&built, &schema);

        assert!(terms.contains(&"category\u{1f}mobility".to_string()));
        assert!(terms.contains(&"place\u{1f}eu".to_string()));
        assert!(terms.contains(&"place\u{1f}eu\u{1f}de".to_string()));
        assert!(terms.contains(&"used_fields\u{1f}category".to_string()));
        assert!(terms.contains(&"used_fields\u{1f}place".to_string()));
        assert!(!terms.contains(&"used_fields\u{1f}name".to_string()));

        let ordinals: Vec<u64> = built
            .get_all(schema.ordinals_field())
            .filter_map(|v| v.as_u64())
            .collect();
        let snapshot = taxonomy.snapshot();
        let de = snapshot
            .ordinal(&FacetLabel::new(["place", "eu", "de"]).unwrap())
            .unwrap();
        let place = snapshot
            .ordinal(&FacetLabel::new(["place"]).unwrap())
            .unwrap();
        assert!(ordinals.contains(&de));
        assert!(!ordinals.contains(&place));
    }

    #[test]
    fn single_valued_dimensions_reject_repeats() {
        let (config, schema, taxonomy) = fixture();
        let document = Document::new()
            .facet("color", "green")
            .facet("color", "white");

        let err = config.build(&document, &schema, &taxonomy).unwrap_err();
        assert!(matches!(err, Error::Config(_)));
    }

    #[test]
    fn rejected_documents_register_no_categories() {
        let (config, schema, taxonomy) = fixture();
        let size = taxonomy.size();

        for document in [
            Document::new()
                .facet("category", "mobility")
                .facet("place", "eu//de"),
            Document::new()
                .facet("category", "mobility")
                .facet("category", ""),
            Document::new().facet("category", "mobility").text("nope", "x"),
        ] {
            assert!(config.build(&document, &schema, &taxonomy).is_err());
            assert_eq!(taxonomy.size(), size);
        }
    }

    #[test]
    fn unindexable_values_get_unmatchable_terms() {
        let (config, schema, taxonomy) = fixture();
        let document = Document::new().facet("place", "eu/de");
        let built = config.build(&document, &schema, &taxonomy).unwrap();
        let terms = texts(&built, &schema);

        for value in ["eu\u{1f}de", "eu//de", ""] {
            let term = config.drill_down_term("place", value);
            assert!(!terms.contains(&term), "{value:?} matches");
            assert!(
                FacetLabel::decode(&term)
                    .components()
                    .iter()
                    .any(String::is_empty)
            );
        }
    }

    #[test]
    fn unknown_plain_fields_are_rejected() {
        let (config, schema, taxonomy) = fixture();
        let document = Document::new().text("nope", "x");
        assert!(config.build(&document, &schema, &taxonomy).is_err());
    }

    #[test]
    fn json_round_trip() {
        let tmp = tempfile::tempdir().unwrap();
        let path = tmp.path().join("facets.json");
        let (config, _, _) = fixture();

        config.to_json_file(&path).unwrap();
        let loaded = FacetsConfig::from_json_file(&path).unwrap();

        assert_eq!(loaded, config);
        assert!(loaded.dim_config("category").multi_valued);
        assert!(loaded.dim_config("used_fields").multi_valued);
    }
}
