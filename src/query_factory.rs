use std::{collections::BTreeMap, sync::Arc};

use serde::{Deserialize, Serialize};
use tantivy::{
    Term,
    query::{
        AllQuery,
        BooleanQuery,
        ConstScoreQuery,
        Occur,
        Query,
        QueryParser,
        TermQuery,
    },
    schema::{FieldType, IndexRecordOption},
    tokenizer::TokenizerManager,
};
use tracing::debug;

use crate::{
    demotion::DemotedTerm,
    error::{Error, Result},
    facets_config::FacetsConfig,
    schema::IndexSchema,
    score_multiplier::ScoreMultiplierQuery,
    term_conjunction::{Selection, TermConjunction},
};

/// A value in a named schema field.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FieldTerm {
    pub field: String,
    pub value: String,
}

impl FieldTerm {
    pub fn new(field: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            value: value.into(),
        }
    }
}

/// Builds composite queries. Nothing here touches the index.
#[derive(Clone)]
pub struct QueryFactory {
    schema: IndexSchema,
    config: Arc<FacetsConfig>,
    tokenizers: TokenizerManager,
}

impl QueryFactory {
    pub fn new(
        schema: IndexSchema,
        config: Arc<FacetsConfig>,
        tokenizers: TokenizerManager,
    ) -> Self {
        Self {
            schema,
            config,
            tokenizers,
        }
    }

    pub fn facets_config(&self) -> &FacetsConfig {
        &self.config
    }

    pub fn match_all(&self) -> Box<dyn Query> {
        Box::new(AllQuery)
    }

    /// Restricts `base` by per-dimension selections.
    ///
    /// Dimensions are always combined with AND. Within a dimension the
    /// conjunction's mode applies, and absent selections match documents
    /// with no value in the dimension. The selections do not contribute
    /// to the score. An empty map returns `base` unchanged.
    pub fn drill_down(
        &self,
        base: Box<dyn Query>,
        dimensions: &BTreeMap<String, TermConjunction>,
    ) -> Result<Box<dyn Query>> {
        if dimensions.is_empty() {
            return Ok(base);
        }

        let mut clauses = vec![(Occur::Must, base)];
        for (dim, conjunction) in dimensions {
            require_name(dim, "dimension")?;
            let query = self.conjunction_query(dim, conjunction, |value| {
                Ok(self.facet_term(dim, value))
            })?;
            clauses.push((Occur::Must, filter(query)));
        }
        Ok(Box::new(BooleanQuery::new(clauses)))
    }

    /// ANDs `base` with an exact match on every term.
    pub fn mandatory(
        &self,
        base: Box<dyn Query>,
        terms: &[FieldTerm],
    ) -> Result<Box<dyn Query>> {
        let mut clauses = vec![(Occur::Must, base)];
        for term in terms {
            clauses.push((Occur::Must, term_query(self.term(term)?)));
        }
        Ok(Box::new(BooleanQuery::new(clauses)))
    }

    /// ANDs `base` with one clause per field, each combining the field's
    /// selections the way a drill-down dimension does.
    pub fn mandatory_conjunctions(
        &self,
        base: Box<dyn Query>,
        fields: &BTreeMap<String, TermConjunction>,
    ) -> Result<Box<dyn Query>> {
        let mut clauses = vec![(Occur::Must, base)];
        for (field, conjunction) in fields {
            let query = self.conjunction_query(field, conjunction, |value| {
                self.term(&FieldTerm::new(field.as_str(), value))
            })?;
            clauses.push((Occur::Must, query));
        }
        Ok(Box::new(BooleanQuery::new(clauses)))
    }

    /// Excludes documents matching any of `excluded` from `base`.
    pub fn filtered(
        &self,
        base: Box<dyn Query>,
        excluded: &[FieldTerm],
    ) -> Result<Box<dyn Query>> {
        let mut clauses = vec![(Occur::Must, base)];
        for term in excluded {
            clauses.push((Occur::MustNot, term_query(self.term(term)?)));
        }
        Ok(Box::new(BooleanQuery::new(clauses)))
    }

    /// Rescores `base` by each term's multiplier for the documents carrying
    /// that term. Matches are unchanged.
    pub fn demoted(
        &self,
        base: Box<dyn Query>,
        demoted: &[DemotedTerm],
    ) -> Result<Box<dyn Query>> {
        let mut query = base;
        for demotion in demoted {
            let matcher = term_query(self.term(&demotion.term)?);
            query = Box::new(ScoreMultiplierQuery::new(
                query,
                matcher,
                demotion.multiplier,
            ));
        }
        Ok(query)
    }

    /// Restricts `base` to documents with no value in any of `dimensions`,
    /// as recorded in `presence_field`.
    pub fn missing(
        &self,
        base: Box<dyn Query>,
        presence_field: &str,
        dimensions: &[&str],
    ) -> Result<Box<dyn Query>> {
        require_name(presence_field, "presence field")?;
        let mut clauses = vec![(Occur::Must, base)];
        for dim in dimensions {
            require_name(dim, "dimension")?;
            clauses.push((
                Occur::MustNot,
                term_query(self.facet_term(presence_field, dim)),
            ));
        }
        Ok(Box::new(BooleanQuery::new(clauses)))
    }

    /// ANDs `base` with every query in `queries`.
    pub fn and_conjunction(
        &self,
        base: Box<dyn Query>,
        queries: Vec<Box<dyn Query>>,
    ) -> Box<dyn Query> {
        if queries.is_empty() {
            return base;
        }
        let clauses = std::iter::once(base)
            .chain(queries)
            .map(|query| (Occur::Must, query))
            .collect();
        Box::new(BooleanQuery::new(clauses))
    }

    /// Parses user query syntax against `default_fields`, skipping what
    /// does not parse. Blank input matches everything.
    pub fn parse(
        &self,
        text: &str,
        default_fields: &[&str],
    ) -> Result<Box<dyn Query>> {
        if text.trim().is_empty() {
            return Ok(self.match_all());
        }
        let fields = default_fields
            .iter()
            .map(|name| self.schema.field(name))
            .collect::<Result<Vec<_>>>()?;
        let parser = QueryParser::new(
            self.schema.schema().clone(),
            fields,
            self.tokenizers.clone(),
        );
        let (query, errors) = parser.parse_query_lenient(text);
        if !errors.is_empty() {
            debug!(?errors, "query parsed leniently");
        }
        Ok(query)
    }

    /// The drill-down term for `value` in `dim`.
    pub fn facet_term(&self, dim: &str, value: &str) -> Term {
        Term::from_field_text(
            self.schema.facets_field(),
            &self.config.drill_down_term(dim, value),
        )
    }

    /// Resolves a caller field term against the schema.
    pub fn term(&self, term: &FieldTerm) -> Result<Term> {
        let field = self.schema.field(&term.field)?;
        let entry = self.schema.schema().get_field_entry(field);
        let parse_error = |kind: &str| {
            Error::Config(format!(
                "{:?} is not a valid {kind} for field {:?}",
                term.value, term.field
            ))
        };

        match entry.field_type() {
            FieldType::Str(_) => Ok(Term::from_field_text(field, &term.value)),
            FieldType::U64(_) => term
                .value
                .parse()
                .map(|n| Term::from_field_u64(field, n))
                .map_err(|_| parse_error("u64")),
            FieldType::I64(_) => term
                .value
                .parse()
                .map(|n| Term::from_field_i64(field, n))
                .map_err(|_| parse_error("i64")),
            _ => Err(Error::Config(format!(
                "field {:?} cannot be matched by term",
                term.field
            ))),
        }
    }

    fn conjunction_query(
        &self,
        key: &str,
        conjunction: &TermConjunction,
        term_for: impl Fn(&str) -> Result<Term>,
    ) -> Result<Box<dyn Query>> {
        let absent = || -> Result<Box<dyn Query>> {
            let presence = conjunction.presence_field().ok_or_else(|| {
                Error::Config(
                    "an absent selection requires a presence field".into(),
                )
            })?;
            Ok(term_query(self.facet_term(presence, key)))
        };

        if conjunction.uses_any() {
            let mut clauses = Vec::with_capacity(conjunction.terms().len());
            for selection in conjunction.terms() {
                let query: Box<dyn Query> = match selection {
                    Selection::Present(value) => term_query(term_for(value)?),
                    Selection::Absent => Box::new(BooleanQuery::new(vec![
                        (Occur::Must, self.match_all()),
                        (Occur::MustNot, absent()?),
                    ])),
                };
                clauses.push((Occur::Should, query));
            }
            return Ok(Box::new(BooleanQuery::new(clauses)));
        }

        let mut clauses = Vec::with_capacity(conjunction.terms().len() + 1);
        let mut positive = false;
        for selection in conjunction.terms() {
            match selection {
                Selection::Present(value) => {
                    clauses.push((Occur::Must, term_query(term_for(value)?)));
                    positive = true;
                }
                Selection::Absent => clauses.push((Occur::MustNot, absent()?)),
            }
        }
        if !positive {
            // Negative clauses alone match nothing.
            clauses.push((Occur::Must, self.match_all()));
        }
        Ok(Box::new(BooleanQuery::new(clauses)))
    }
}

impl std::fmt::Debug for QueryFactory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryFactory").finish_non_exhaustive()
    }
}

fn term_query(term: Term) -> Box<dyn Query> {
    Box::new(TermQuery::new(term, IndexRecordOption::Basic))
}

fn filter(query: Box<dyn Query>) -> Box<dyn Query> {
    Box::new(ConstScoreQuery::new(query, 0.0))
}

fn require_name(name: &str, what: &str) -> Result<()> {
    if name.is_empty() {
        return Err(Error::Config(format!("{what} name must not be empty")));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use tantivy::{
        Index,
        IndexWriter,
        collector::{Count, TopDocs},
        doc,
        schema::{STORED, STRING, Schema, TEXT, Value},
    };

    use super::*;
    use crate::term_conjunction::Conjunction;

    struct Fixture {
        factory: QueryFactory,
        index: Index,
    }

    /// Three documents with multi-valued colors, indexed the way ingestion
    /// would, plus a presence entry for every dimension with a value.
    fn fixture() -> Fixture {
        let mut builder = Schema::builder();
        builder.add_text_field("name", STRING | STORED);
        builder.add_text_field("body", TEXT);
        builder.add_u64_field("wheels", STORED | tantivy::schema::INDEXED);
        let schema = IndexSchema::extend(&builder.build()).unwrap();
        let mut config = FacetsConfig::new()
            .with_presence_field("used_fields")
            .unwrap();
        config.set_multi_valued("color", true);

        let index = Index::create_in_ram(schema.schema().clone());
        let factory = QueryFactory::new(
            schema.clone(),
            Arc::new(config),
            index.tokenizers().clone(),
        );

        let name = schema.field("name").unwrap();
        let body = schema.field("body").unwrap();
        let wheels = schema.field("wheels").unwrap();
        let facets = schema.facets_field();
        let term = |dim: &str, value: &str| {
            factory.facets_config().drill_down_term(dim, value)
        };

        let mut writer: IndexWriter = index.writer(15_000_000).unwrap();
        writer
            .add_document(doc!(
                name => "car",
                body => "fast red car",
                wheels => 4u64,
                facets => term("color", "yellow"),
                facets => term("color", "green"),
                facets => term("used_fields", "color"),
            ))
            .unwrap();
        writer
            .add_document(doc!(
                name => "horse",
                body => "brown horse",
                facets => term("color", "brown"),
                facets => term("color", "white"),
                facets => term("color", "green"),
                facets => term("used_fields", "color"),
            ))
            .unwrap();
        writer
            .add_document(doc!(name => "unknown", body => "nothing known"))
            .unwrap();
        writer.commit().unwrap();

        Fixture { factory, index }
    }

    fn names(fixture: &Fixture, query: &dyn Query) -> Vec<String> {
        let searcher = fixture.index.reader().unwrap().searcher();
        let name = fixture.factory.schema.field("name").unwrap();
        let mut names: Vec<String> = searcher
            .search(query, &TopDocs::with_limit(10))
            .unwrap()
            .into_iter()
            .map(|(_, address)| {
                let doc: tantivy::TantivyDocument =
                    searcher.doc(address).unwrap();
                doc.get_first(name).unwrap().as_str().unwrap().to_string()
            })
            .collect();
        names.sort();
        names
    }

    fn drill(
        fixture: &Fixture,
        terms: Vec<Selection>,
        mode: Conjunction,
    ) -> Vec<String> {
        let conjunction =
            TermConjunction::new(terms, mode, Some("used_fields".into()))
                .unwrap();
        let dims = BTreeMap::from([("color".to_string(), conjunction)]);
        let query = fixture
            .factory
            .drill_down(fixture.factory.match_all(), &dims)
            .unwrap();
        names(fixture, query.as_ref())
    }

    #[test]
    fn empty_drill_down_returns_base() {
        let f = fixture();
        let query = f
            .factory
            .drill_down(f.factory.match_all(), &BTreeMap::new())
            .unwrap();
        assert_eq!(names(&f, query.as_ref()).len(), 3);
    }

    #[test]
    fn single_term_any_equals_all() {
        let f = fixture();
        let any = drill(&f, vec!["green".into()], Conjunction::Any);
        let all = drill(&f, vec!["green".into()], Conjunction::All);
        assert_eq!(any, all);
        assert_eq!(any, ["car", "horse"]);
    }

    #[test]
    fn all_requires_every_term() {
        let f = fixture();
        let terms = vec!["green".into(), "white".into(), "yellow".into()];
        assert!(drill(&f, terms, Conjunction::All).is_empty());

        let terms = vec!["green".into(), "white".into()];
        assert_eq!(drill(&f, terms, Conjunction::All), ["horse"]);
    }

    #[test]
    fn any_requires_one_term() {
        let f = fixture();
        let terms = vec!["white".into(), "yellow".into()];
        assert_eq!(drill(&f, terms, Conjunction::Any), ["car", "horse"]);
    }

    #[test]
    fn absent_selections() {
        let f = fixture();
        assert_eq!(
            drill(&f, vec![Selection::Absent], Conjunction::All),
            ["unknown"]
        );
        let mixed = || vec![Selection::Absent, "yellow".into()];
        assert_eq!(drill(&f, mixed(), Conjunction::Any), ["car", "unknown"]);
        assert!(drill(&f, mixed(), Conjunction::All).is_empty());
        assert_eq!(
            drill(
                &f,
                vec![Selection::Absent, Selection::Absent],
                Conjunction::All
            ),
            ["unknown"]
        );
    }

    #[test]
    fn missing_query_excludes_dimensions_with_values() {
        let f = fixture();
        let query = f
            .factory
            .missing(f.factory.match_all(), "used_fields", &["color"])
            .unwrap();
        assert_eq!(names(&f, query.as_ref()), ["unknown"]);
        assert!(
            f.factory
                .missing(f.factory.match_all(), "", &["color"])
                .is_err()
        );
    }

    #[test]
    fn mandatory_and_filtered_terms() {
        let f = fixture();
        let four = [FieldTerm::new("wheels", "4")];
        let mandatory =
            f.factory.mandatory(f.factory.match_all(), &four).unwrap();
        assert_eq!(names(&f, mandatory.as_ref()), ["car"]);

        let excluded =
            [FieldTerm::new("name", "car"), FieldTerm::new("name", "horse")];
        let filtered =
            f.factory.filtered(f.factory.match_all(), &excluded).unwrap();
        assert_eq!(names(&f, filtered.as_ref()), ["unknown"]);

        let invalid = [FieldTerm::new("wheels", "x")];
        assert!(f.factory.mandatory(f.factory.match_all(), &invalid).is_err());
    }

    #[test]
    fn mandatory_conjunctions_per_field() {
        let f = fixture();
        let fields = BTreeMap::from([(
            "name".to_string(),
            TermConjunction::any(["car", "unknown"]).unwrap(),
        )]);
        let query = f
            .factory
            .mandatory_conjunctions(f.factory.match_all(), &fields)
            .unwrap();
        assert_eq!(names(&f, query.as_ref()), ["car", "unknown"]);
    }

    #[test]
    fn and_conjunction_and_parse() {
        let f = fixture();
        let parsed = f.factory.parse("horse", &["body"]).unwrap();
        let drilled =
            f.factory.and_conjunction(parsed, vec![f.factory.match_all()]);
        assert_eq!(names(&f, drilled.as_ref()), ["horse"]);

        let blank = f.factory.parse("   ", &["body"]).unwrap();
        let searcher = f.index.reader().unwrap().searcher();
        assert_eq!(searcher.search(blank.as_ref(), &Count).unwrap(), 3);

        assert!(f.factory.parse("horse", &["nope"]).is_err());
    }

    #[test]
    fn demoted_rescales_matching_documents_only() {
        let f = fixture();
        let demotions = [
            DemotedTerm {
                term: FieldTerm::new("name", "car"),
                multiplier: 0.5,
            },
            DemotedTerm {
                term: FieldTerm::new("name", "horse"),
                multiplier: 2.0,
            },
        ];
        let query = f
            .factory
            .demoted(f.factory.match_all(), &demotions)
            .unwrap();

        let searcher = f.index.reader().unwrap().searcher();
        assert_eq!(searcher.search(query.as_ref(), &Count).unwrap(), 3);

        let name = f.factory.schema.field("name").unwrap();
        let mut scores: Vec<(String, f32)> = searcher
            .search(query.as_ref(), &TopDocs::with_limit(10))
            .unwrap()
            .into_iter()
            .map(|(score, address)| {
                let doc: tantivy::TantivyDocument =
                    searcher.doc(address).unwrap();
                let value = doc.get_first(name).unwrap().as_str().unwrap();
                (value.to_string(), score)
            })
            .collect();
        scores.sort_by(|a, b| a.0.cmp(&b.0));

        assert_eq!(
            scores,
            [
                ("car".to_string(), 0.5),
                ("horse".to_string(), 2.0),
                ("unknown".to_string(), 1.0),
            ]
        );

        let unknown = [DemotedTerm {
            term: FieldTerm::new("nope", "car"),
            multiplier: 0.5,
        }];
        assert!(f.factory.demoted(f.factory.match_all(), &unknown).is_err());
    }

    #[test]
    fn drill_down_keeps_base_scores() {
        let f = fixture();
        let base = f.factory.parse("horse", &["body"]).unwrap();
        let searcher = f.index.reader().unwrap().searcher();
        let plain = searcher
            .search(base.as_ref(), &TopDocs::with_limit(1))
            .unwrap();

        let dims = BTreeMap::from([(
            "color".to_string(),
            TermConjunction::any(["green"]).unwrap(),
        )]);
        let drilled = f.factory.drill_down(base, &dims).unwrap();
        let scored = searcher
            .search(drilled.as_ref(), &TopDocs::with_limit(1))
            .unwrap();

        assert_eq!(plain[0].0, scored[0].0);
    }
}
