use std::{
    cmp::Ordering,
    collections::{BTreeMap, BTreeSet, BinaryHeap, HashSet},
    sync::Arc,
};

use tantivy::{
    DocAddress,
    DocId,
    DocSet,
    Score,
    SegmentOrdinal,
    SegmentReader,
    Searcher,
    TERMINATED,
    TantivyDocument,
    collector::{Collector, Count, DocSetCollector, SegmentCollector},
    query::{Explanation, Query},
    schema::{Field, FieldType, IndexRecordOption},
};

use crate::{
    document::StoredDocument,
    error::{Error, Result},
    facet_counts::{FacetCountCollector, FacetCounts, FacetResult},
    query_factory::QueryFactory,
    session::{ReadContext, ReadSession},
    taxonomy::FacetLabel,
};

/// A hit's position in relevance order, usable as a pagination cursor.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ScoreDoc {
    pub score: Score,
    pub address: DocAddress,
}

impl ScoreDoc {
    /// Whether `self` comes after `cursor`: a lower score, or the same
    /// score and a greater address.
    pub fn is_after(&self, cursor: &ScoreDoc) -> bool {
        rank(self, cursor) == Ordering::Greater
    }
}

fn rank(a: &ScoreDoc, b: &ScoreDoc) -> Ordering {
    b.score
        .total_cmp(&a.score)
        .then_with(|| a.address.cmp(&b.address))
}

/// Heap entry whose maximum is the worst ranked hit.
struct Ranked(ScoreDoc);

impl PartialEq for Ranked {
    fn eq(&self, other: &Self) -> bool {
        self.cmp(other) == Ordering::Equal
    }
}

impl Eq for Ranked {}

impl PartialOrd for Ranked {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Ranked {
    fn cmp(&self, other: &Self) -> Ordering {
        rank(&self.0, &other.0)
    }
}

/// Keeps the best `limit` hits that come after an optional cursor.
struct SearchAfter {
    limit: usize,
    after: Option<ScoreDoc>,
}

struct SearchAfterSegment {
    segment: SegmentOrdinal,
    limit: usize,
    after: Option<ScoreDoc>,
    heap: BinaryHeap<Ranked>,
}

impl Collector for SearchAfter {
    type Fruit = Vec<ScoreDoc>;
    type Child = SearchAfterSegment;

    fn for_segment(
        &self,
        segment_local_id: SegmentOrdinal,
        _segment: &SegmentReader,
    ) -> tantivy::Result<Self::Child> {
        Ok(SearchAfterSegment {
            segment: segment_local_id,
            limit: self.limit,
            after: self.after,
            heap: BinaryHeap::with_capacity(self.limit.min(1024) + 1),
        })
    }

    fn requires_scoring(&self) -> bool {
        true
    }

    fn merge_fruits(
        &self,
        segment_fruits: Vec<Vec<ScoreDoc>>,
    ) -> tantivy::Result<Vec<ScoreDoc>> {
        let mut hits: Vec<ScoreDoc> =
            segment_fruits.into_iter().flatten().collect();
        hits.sort_by(rank);
        hits.truncate(self.limit);
        Ok(hits)
    }
}

impl SegmentCollector for SearchAfterSegment {
    type Fruit = Vec<ScoreDoc>;

    fn collect(&mut self, doc: DocId, score: Score) {
        if self.limit == 0 {
            return;
        }
        let hit = ScoreDoc {
            score,
            address: DocAddress::new(self.segment, doc),
        };
        if self.after.is_some_and(|cursor| !hit.is_after(&cursor)) {
            return;
        }
        self.heap.push(Ranked(hit));
        if self.heap.len() > self.limit {
            self.heap.pop();
        }
    }

    fn harvest(self) -> Vec<ScoreDoc> {
        self.heap.into_iter().map(|ranked| ranked.0).collect()
    }
}

/// What to search for and how much of each hit to load.
#[derive(Debug)]
pub struct ReadRequest {
    query: Box<dyn Query>,
    max_hits: usize,
    max_documents: usize,
    max_explanations: usize,
    fields: Vec<String>,
    after: Option<ScoreDoc>,
}

impl ReadRequest {
    /// Ten hits with their documents and no explanations.
    pub fn new(query: Box<dyn Query>) -> Self {
        Self {
            query,
            max_hits: 10,
            max_documents: 10,
            max_explanations: 0,
            fields: Vec::new(),
            after: None,
        }
    }

    pub fn max_hits(mut self, max_hits: usize) -> Self {
        self.max_hits = max_hits;
        self
    }

    pub fn max_documents(mut self, max_documents: usize) -> Self {
        self.max_documents = max_documents;
        self
    }

    pub fn max_explanations(mut self, max_explanations: usize) -> Self {
        self.max_explanations = max_explanations;
        self
    }

    /// Stored fields to load; none means all of them.
    pub fn fields<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.fields = fields.into_iter().map(Into::into).collect();
        self
    }

    /// Only return hits ranked after `cursor`.
    pub fn after(mut self, cursor: ScoreDoc) -> Self {
        self.after = Some(cursor);
        self
    }

    pub fn query(&self) -> &dyn Query {
        self.query.as_ref()
    }
}

impl Clone for ReadRequest {
    fn clone(&self) -> Self {
        Self {
            query: self.query.box_clone(),
            max_hits: self.max_hits,
            max_documents: self.max_documents,
            max_explanations: self.max_explanations,
            fields: self.fields.clone(),
            after: self.after,
        }
    }
}

/// One page of results.
#[derive(Debug)]
pub struct SearchPage {
    /// All matching documents, not only those on this page.
    pub total_hits: usize,
    pub hits: Vec<ScoreDoc>,
    /// Stored fields of the leading hits.
    pub documents: Vec<StoredDocument>,
    /// Score explanations of the leading hits.
    pub explanations: Vec<Explanation>,
    pub facets: Option<FacetCounts>,
}

impl SearchPage {
    /// Cursor for the next page.
    pub fn last_hit(&self) -> Option<ScoreDoc> {
        self.hits.last().copied()
    }
}

/// Read operations over a [`ReadSession`]. Each call sees one snapshot.
#[derive(Debug, Clone, Copy)]
pub struct ReadToolbox<'a> {
    session: ReadSession<'a>,
}

impl<'a> ReadToolbox<'a> {
    pub fn new(session: ReadSession<'a>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &ReadSession<'a> {
        &self.session
    }

    pub fn query_factory(&self) -> QueryFactory {
        self.session.query_factory()
    }

    /// Runs `request` and loads the leading documents and explanations.
    /// The page is returned whole or not at all.
    pub fn load_documents(&self, request: &ReadRequest) -> Result<SearchPage> {
        self.session.read(|ctx| search(ctx, request, false))
    }

    /// Like [`ReadToolbox::load_documents`], counting facets over every
    /// match in the same pass.
    pub fn load_documents_and_facets(
        &self,
        request: &ReadRequest,
    ) -> Result<SearchPage> {
        self.session.read(|ctx| search(ctx, request, true))
    }

    pub fn load_facets(&self, query: &dyn Query) -> Result<FacetCounts> {
        self.session.read(|ctx| facet_counts(ctx, query))
    }

    pub fn load_count(&self, query: &dyn Query) -> Result<usize> {
        self.session.read(|ctx| Ok(ctx.searcher().search(query, &Count)?))
    }

    /// For each field, how many documents matching `query` have no
    /// indexed value in it. Names that are not schema fields count every
    /// match.
    pub fn load_missing_count(
        &self,
        query: &dyn Query,
        fields: &[&str],
    ) -> Result<BTreeMap<String, usize>> {
        self.session.read(|ctx| {
            let searcher = ctx.searcher();
            let matching = searcher.search(query, &DocSetCollector)?;
            let mut missing = BTreeMap::new();

            for &name in fields {
                if name.is_empty() {
                    return Err(Error::Config(
                        "field name must not be empty".into(),
                    ));
                }
                let count = match ctx.schema().field(name) {
                    Ok(field) => {
                        let present = documents_with_terms(searcher, field)?;
                        matching
                            .iter()
                            .filter(|address| !present.contains(address))
                            .count()
                    }
                    Err(_) => matching.len(),
                };
                missing.insert(name.to_string(), count);
            }

            Ok(missing)
        })
    }

    /// Distinct indexed values of a text field.
    pub fn existing_values(&self, field: &str) -> Result<BTreeSet<String>> {
        self.session.read(|ctx| {
            let handle = ctx.schema().field(field)?;
            let entry = ctx.schema().schema().get_field_entry(handle);
            if !matches!(entry.field_type(), FieldType::Str(_)) {
                return Err(Error::Config(format!(
                    "field {field:?} is not a text field"
                )));
            }

            let mut values = BTreeSet::new();
            for segment in ctx.searcher().segment_readers() {
                let inverted = segment.inverted_index(handle)?;
                let mut stream = inverted.terms().stream()?;
                while stream.advance() {
                    if let Ok(value) = std::str::from_utf8(stream.key()) {
                        values.insert(value.to_string());
                    }
                }
            }
            Ok(values)
        })
    }

    /// Schema fields holding at least one indexed term.
    pub fn indexed_fields(&self) -> Result<BTreeSet<String>> {
        self.session.read(|ctx| {
            let mut indexed = BTreeSet::new();
            for name in ctx.schema().field_names() {
                let field = ctx.schema().field(name)?;
                for segment in ctx.searcher().segment_readers() {
                    if segment.inverted_index(field)?.terms().num_terms() > 0 {
                        indexed.insert(name.to_string());
                        break;
                    }
                }
            }
            Ok(indexed)
        })
    }

    /// The `top_n` values of `dim` among documents matching `query`.
    pub fn facet_result(
        &self,
        query: &dyn Query,
        dim: &str,
        top_n: usize,
    ) -> Result<Option<FacetResult>> {
        self.session.read(|ctx| {
            facet_counts(ctx, query)?.top_children(top_n, dim, &[])
        })
    }

    pub fn facet_results(
        &self,
        query: &dyn Query,
        top_n: usize,
    ) -> Result<Vec<FacetResult>> {
        self.session
            .read(|ctx| facet_counts(ctx, query)?.all_dims(top_n))
    }

    /// Live documents in the snapshot.
    pub fn document_count(&self) -> Result<u64> {
        self.session.read(|ctx| Ok(ctx.searcher().num_docs()))
    }

    pub fn taxonomy_size(&self) -> Result<usize> {
        self.session.read(|ctx| Ok(ctx.taxonomy().size()))
    }

    pub fn facet_label(&self, ordinal: u64) -> Result<Option<FacetLabel>> {
        self.session.read(|ctx| Ok(ctx.taxonomy().label(ordinal).cloned()))
    }

    pub fn taxonomy_parents(&self) -> Result<Vec<u64>> {
        self.session.read(|ctx| Ok(ctx.taxonomy().parents().to_vec()))
    }

    pub fn taxonomy_children(&self, ordinal: u64) -> Result<Vec<u64>> {
        self.session
            .read(|ctx| Ok(ctx.taxonomy().children(ordinal).to_vec()))
    }

    pub fn taxonomy_siblings(&self, ordinal: u64) -> Result<Vec<u64>> {
        self.session.read(|ctx| Ok(ctx.taxonomy().siblings(ordinal)))
    }
}

fn facet_counts(
    ctx: &ReadContext<'_>,
    query: &dyn Query,
) -> Result<FacetCounts> {
    let collector = FacetCountCollector::new(ctx.taxonomy().size());
    let counts = ctx.searcher().search(query, &collector)?;
    Ok(FacetCounts::new(
        counts,
        Arc::clone(ctx.taxonomy()),
        Arc::clone(ctx.facets_config()),
    ))
}

fn search(
    ctx: &ReadContext<'_>,
    request: &ReadRequest,
    with_facets: bool,
) -> Result<SearchPage> {
    let searcher = ctx.searcher();
    let top = SearchAfter {
        limit: request.max_hits,
        after: request.after,
    };

    let (total_hits, hits, facets) = if with_facets {
        let collector = FacetCountCollector::new(ctx.taxonomy().size());
        let (total, hits, counts) =
            searcher.search(request.query(), &(Count, top, collector))?;
        let facets = FacetCounts::new(
            counts,
            Arc::clone(ctx.taxonomy()),
            Arc::clone(ctx.facets_config()),
        );
        (total, hits, Some(facets))
    } else {
        let (total, hits) = searcher.search(request.query(), &(Count, top))?;
        (total, hits, None)
    };

    let mut documents = Vec::new();
    for hit in hits.iter().take(request.max_documents) {
        let doc: TantivyDocument = searcher.doc(hit.address)?;
        documents.push(StoredDocument::from_tantivy(
            &doc,
            ctx.schema().schema(),
            &request.fields,
        ));
    }

    let mut explanations = Vec::new();
    for hit in hits.iter().take(request.max_explanations) {
        explanations.push(request.query().explain(searcher, hit.address)?);
    }

    Ok(SearchPage {
        total_hits,
        hits,
        documents,
        explanations,
        facets,
    })
}

/// Addresses of every document with at least one term in `field`,
/// deleted documents included.
fn documents_with_terms(
    searcher: &Searcher,
    field: Field,
) -> Result<HashSet<DocAddress>> {
    let mut present = HashSet::new();
    for (ordinal, segment) in searcher.segment_readers().iter().enumerate() {
        let inverted = segment.inverted_index(field)?;
        let mut stream = inverted.terms().stream()?;
        while stream.advance() {
            let mut postings = inverted.read_postings_from_terminfo(
                stream.value(),
                IndexRecordOption::Basic,
            )?;
            let mut doc = postings.doc();
            while doc != TERMINATED {
                present.insert(DocAddress::new(ordinal as SegmentOrdinal, doc));
                doc = postings.advance();
            }
        }
    }
    Ok(present)
}

#[cfg(test)]
mod tests {
    use tantivy::{
        query::AllQuery,
        schema::{STORED, STRING, Schema},
    };

    use super::*;
    use crate::{
        document::Document,
        facets_config::FacetsConfig,
        index_manager::{IndexAccessManager, IndexConfig},
        write_toolbox::WriteToolbox,
    };

    fn manager(names: &[&str]) -> IndexAccessManager {
        let mut builder = Schema::builder();
        builder.add_text_field("name", STRING | STORED);
        builder.add_text_field("note", STORED);
        let manager = IndexAccessManager::open(
            IndexConfig::in_ram(),
            builder.build(),
            FacetsConfig::new(),
        )
        .unwrap();

        let writes = WriteToolbox::new(manager.open_write_session().unwrap());
        for name in names {
            writes
                .ingest(
                    &Document::new()
                        .text("name", *name)
                        .text("note", format!("about {name}"))
                        .facet("kind", "vehicle"),
                )
                .unwrap();
        }
        writes.commit().unwrap();
        manager
    }

    #[test]
    fn search_after_walks_every_hit_once() {
        let manager = manager(&["car", "train", "horse", "blob", "chicken"]);
        let reads = ReadToolbox::new(manager.open_read_session().unwrap());

        let mut seen = Vec::new();
        let mut request = ReadRequest::new(Box::new(AllQuery)).max_hits(2);
        loop {
            let page = reads.load_documents(&request).unwrap();
            assert_eq!(page.total_hits, 5);
            let Some(last) = page.last_hit() else {
                break;
            };
            for document in &page.documents {
                seen.push(document.first_text("name").unwrap().to_string());
            }
            request = request.after(last);
        }

        seen.sort();
        assert_eq!(seen, ["blob", "car", "chicken", "horse", "train"]);
    }

    #[test]
    fn pages_limit_documents_and_fields() {
        let manager = manager(&["car", "train"]);
        let reads = ReadToolbox::new(manager.open_read_session().unwrap());

        let request = ReadRequest::new(Box::new(AllQuery))
            .max_documents(1)
            .max_explanations(2)
            .fields(["name"]);
        let page = reads.load_documents_and_facets(&request).unwrap();

        assert_eq!(page.hits.len(), 2);
        assert_eq!(page.documents.len(), 1);
        assert_eq!(page.explanations.len(), 2);
        let names: Vec<&str> = page.documents[0].field_names().collect();
        assert_eq!(names, ["name"]);
        let facets = page.facets.unwrap();
        assert_eq!(facets.specific_value("kind", &["vehicle"]), Some(2));
    }

    #[test]
    fn enumerates_values_and_fields() {
        let manager = manager(&["car", "train"]);
        let reads = ReadToolbox::new(manager.open_read_session().unwrap());

        let values = reads.existing_values("name").unwrap();
        assert_eq!(values.into_iter().collect::<Vec<_>>(), ["car", "train"]);
        assert_eq!(
            reads.indexed_fields().unwrap().into_iter().collect::<Vec<_>>(),
            ["name"]
        );
        assert!(reads.existing_values("missing").is_err());
        assert_eq!(reads.document_count().unwrap(), 2);
        assert_eq!(reads.taxonomy_size().unwrap(), 3);
        assert_eq!(reads.taxonomy_children(1).unwrap(), [2]);
    }

    #[test]
    fn cursor_ordering_breaks_ties_by_address() {
        let first = ScoreDoc {
            score: 1.0,
            address: DocAddress::new(0, 3),
        };
        let later = ScoreDoc {
            score: 1.0,
            address: DocAddress::new(0, 4),
        };
        let lower = ScoreDoc {
            score: 0.5,
            address: DocAddress::new(0, 0),
        };

        assert!(later.is_after(&first));
        assert!(lower.is_after(&later));
        assert!(!first.is_after(&first));
    }
}
