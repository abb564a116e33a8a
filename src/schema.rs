use tantivy::{
    Index,
    schema::*,
    tokenizer::{
        LowerCaser,
        RemoveLongFilter,
        SimpleTokenizer,
        Stemmer,
        TextAnalyzer,
    },
};

use crate::error::{Error, Result};

/// Reserved field names appended to every primary schema.
pub mod fields {
    /// Raw drill-down terms, one per facet path prefix.
    pub const FACETS: &str = "_facets";
    /// Taxonomy ordinals referenced by a document, as a fast field.
    pub const FACET_ORDINALS: &str = "_facet_ords";
}

/// Name of the stemming analyzer registered on every primary index.
pub const EN_STEM: &str = "en_stem";

pub(crate) fn is_reserved(name: &str) -> bool {
    name == fields::FACETS || name == fields::FACET_ORDINALS
}

/// A primary index schema: the caller's fields plus the reserved facet
/// fields.
#[derive(Debug, Clone)]
pub struct IndexSchema {
    schema: Schema,
    facets: Field,
    ordinals: Field,
}

impl IndexSchema {
    /// Appends the reserved fields to a caller-supplied schema.
    pub fn extend(user: &Schema) -> Result<Self> {
        let mut builder = Schema::builder();
        for (_, entry) in user.fields() {
            if is_reserved(entry.name()) {
                return Err(Error::Config(format!(
                    "field name {:?} is reserved",
                    entry.name()
                )));
            }
            builder.add_field(entry.clone());
        }

        let facets = builder.add_text_field(fields::FACETS, STRING);
        let ordinals = builder.add_u64_field(fields::FACET_ORDINALS, FAST);

        Ok(Self {
            schema: builder.build(),
            facets,
            ordinals,
        })
    }

    /// Adopts the schema of an existing index, which must already carry
    /// the reserved fields.
    pub fn resolve(schema: Schema) -> Result<Self> {
        let f = |name: &str| {
            schema.get_field(name).map_err(|_| {
                Error::Config(format!(
                    "index schema lacks the reserved field {name:?}"
                ))
            })
        };
        let facets = f(fields::FACETS)?;
        let ordinals = f(fields::FACET_ORDINALS)?;

        Ok(Self {
            schema,
            facets,
            ordinals,
        })
    }

    pub fn schema(&self) -> &Schema {
        &self.schema
    }

    pub fn facets_field(&self) -> Field {
        self.facets
    }

    pub fn ordinals_field(&self) -> Field {
        self.ordinals
    }

    /// Resolves a caller field by name.
    pub fn field(&self, name: &str) -> Result<Field> {
        if name.is_empty() {
            return Err(Error::Config("field name must not be empty".into()));
        }
        if is_reserved(name) {
            return Err(Error::Config(format!(
                "field name {name:?} is reserved"
            )));
        }
        self.schema
            .get_field(name)
            .map_err(|_| Error::Config(format!("unknown field {name:?}")))
    }

    /// Caller field names, reserved fields excluded.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.schema
            .fields()
            .map(|(_, entry)| entry.name())
            .filter(|name| !is_reserved(name))
    }
}

pub(crate) fn register_tokenizers(index: &Index) {
    let en_stem = TextAnalyzer::builder(SimpleTokenizer::default())
        .filter(RemoveLongFilter::limit(40))
        .filter(LowerCaser)
        .filter(Stemmer::new(tantivy::tokenizer::Language::English))
        .build();
    index.tokenizers().register(EN_STEM, en_stem);
}
