use std::fmt;

use tantivy::{
    DocId,
    DocSet,
    Score,
    SegmentReader,
    Term,
    query::{EnableScoring, Explanation, Query, Scorer, Weight},
};

/// Multiplies the score of `query` by `factor` for documents that also
/// match `matcher`.
///
/// The set of matching documents is exactly that of `query`; `matcher`
/// only decides which of them get rescored.
pub struct ScoreMultiplierQuery {
    query: Box<dyn Query>,
    matcher: Box<dyn Query>,
    factor: Score,
}

impl ScoreMultiplierQuery {
    pub fn new(
        query: Box<dyn Query>,
        matcher: Box<dyn Query>,
        factor: Score,
    ) -> Self {
        Self {
            query,
            matcher,
            factor,
        }
    }

    pub fn factor(&self) -> Score {
        self.factor
    }
}

impl Clone for ScoreMultiplierQuery {
    fn clone(&self) -> Self {
        Self {
            query: self.query.box_clone(),
            matcher: self.matcher.box_clone(),
            factor: self.factor,
        }
    }
}

impl fmt::Debug for ScoreMultiplierQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ScoreMultiplierQuery")
            .field("query", &self.query)
            .field("matcher", &self.matcher)
            .field("factor", &self.factor)
            .finish()
    }
}

impl Query for ScoreMultiplierQuery {
    fn weight(
        &self,
        enable_scoring: EnableScoring<'_>,
    ) -> tantivy::Result<Box<dyn Weight>> {
        let weight = self.query.weight(enable_scoring)?;
        let matcher_scoring =
            EnableScoring::disabled_from_schema(enable_scoring.schema());
        let matcher = self.matcher.weight(matcher_scoring)?;
        Ok(Box::new(ScoreMultiplierWeight {
            weight,
            matcher,
            factor: self.factor,
        }))
    }

    fn query_terms<'a>(&'a self, visitor: &mut dyn FnMut(&'a Term, bool)) {
        self.query.query_terms(visitor);
    }
}

struct ScoreMultiplierWeight {
    weight: Box<dyn Weight>,
    matcher: Box<dyn Weight>,
    factor: Score,
}

/// Positions `scorer` on `doc` if it contains it. `doc` must not be behind
/// the scorer's previous target.
fn contains(scorer: &mut dyn Scorer, doc: DocId) -> bool {
    if scorer.doc() < doc {
        scorer.seek(doc);
    }
    scorer.doc() == doc
}

impl Weight for ScoreMultiplierWeight {
    fn scorer(
        &self,
        reader: &SegmentReader,
        boost: Score,
    ) -> tantivy::Result<Box<dyn Scorer>> {
        Ok(Box::new(ScoreMultiplierScorer {
            scorer: self.weight.scorer(reader, boost)?,
            matcher: self.matcher.scorer(reader, 1.0)?,
            factor: self.factor,
        }))
    }

    fn explain(
        &self,
        reader: &SegmentReader,
        doc: DocId,
    ) -> tantivy::Result<Explanation> {
        let inner = self.weight.explain(reader, doc)?;
        let mut matcher = self.matcher.scorer(reader, 1.0)?;
        if !contains(matcher.as_mut(), doc) {
            return Ok(inner);
        }

        let mut explanation =
            Explanation::new("product of:", inner.value() * self.factor);
        explanation.add_detail(inner);
        explanation.add_const("score multiplier", self.factor);
        Ok(explanation)
    }
}

struct ScoreMultiplierScorer {
    scorer: Box<dyn Scorer>,
    matcher: Box<dyn Scorer>,
    factor: Score,
}

impl DocSet for ScoreMultiplierScorer {
    fn advance(&mut self) -> DocId {
        self.scorer.advance()
    }

    fn seek(&mut self, target: DocId) -> DocId {
        self.scorer.seek(target)
    }

    fn doc(&self) -> DocId {
        self.scorer.doc()
    }

    fn size_hint(&self) -> u32 {
        self.scorer.size_hint()
    }
}

impl Scorer for ScoreMultiplierScorer {
    fn score(&mut self) -> Score {
        let doc = self.scorer.doc();
        let score = self.scorer.score();
        if contains(self.matcher.as_mut(), doc) {
            score * self.factor
        } else {
            score
        }
    }
}
