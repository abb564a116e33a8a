use std::sync::Arc;

use serde::Serialize;
use tantivy::{
    DocId,
    Score,
    SegmentOrdinal,
    SegmentReader,
    collector::{Collector, SegmentCollector},
    columnar::Column,
};

use crate::{
    error::{Error, Result},
    facets_config::FacetsConfig,
    schema::fields,
    taxonomy::{FacetLabel, ROOT_ORDINAL, TaxonomySnapshot},
};

/// Counts, per taxonomy ordinal, how many matching documents reference it.
pub struct FacetCountCollector {
    size: usize,
}

impl FacetCountCollector {
    /// `size` is a sizing hint, normally the taxonomy size; ordinals past
    /// it are still counted.
    pub fn new(size: usize) -> Self {
        Self { size }
    }
}

pub struct FacetSegmentCollector {
    ordinals: Option<Column<u64>>,
    counts: Vec<u64>,
}

impl Collector for FacetCountCollector {
    type Fruit = Vec<u64>;
    type Child = FacetSegmentCollector;

    fn for_segment(
        &self,
        _segment_local_id: SegmentOrdinal,
        segment: &SegmentReader,
    ) -> tantivy::Result<Self::Child> {
        let ordinals = segment
            .fast_fields()
            .column_opt::<u64>(fields::FACET_ORDINALS)?;
        Ok(FacetSegmentCollector {
            ordinals,
            counts: vec![0; self.size],
        })
    }

    fn requires_scoring(&self) -> bool {
        false
    }

    fn merge_fruits(
        &self,
        segment_fruits: Vec<Vec<u64>>,
    ) -> tantivy::Result<Vec<u64>> {
        let len = segment_fruits
            .iter()
            .map(Vec::len)
            .max()
            .unwrap_or(0)
            .max(self.size);
        let mut merged = vec![0; len];
        for fruit in segment_fruits {
            for (total, count) in merged.iter_mut().zip(fruit) {
                *total += count;
            }
        }
        Ok(merged)
    }
}

impl SegmentCollector for FacetSegmentCollector {
    type Fruit = Vec<u64>;

    fn collect(&mut self, doc: DocId, _score: Score) {
        let Some(column) = &self.ordinals else {
            return;
        };
        for ordinal in column.values_for_doc(doc) {
            let slot = ordinal as usize;
            if slot >= self.counts.len() {
                self.counts.resize(slot + 1, 0);
            }
            self.counts[slot] += 1;
        }
    }

    fn harvest(self) -> Vec<u64> {
        self.counts
    }
}

/// A child label and the number of matching documents carrying it.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct LabelAndValue {
    pub label: String,
    pub value: u64,
}

/// The top children of one facet path.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FacetResult {
    pub dim: String,
    pub path: Vec<String>,
    /// Total for the path, when it can be known exactly: always for
    /// single-valued dimensions, for multi-valued ones only with a
    /// dimension count.
    pub value: Option<u64>,
    /// Number of distinct children with a non-zero count.
    pub child_count: usize,
    pub label_values: Vec<LabelAndValue>,
}

impl FacetResult {
    pub fn labels(&self) -> Vec<&str> {
        self.label_values.iter().map(|lv| lv.label.as_str()).collect()
    }
}

/// Facet counts of one query against one taxonomy snapshot.
#[derive(Clone)]
pub struct FacetCounts {
    counts: Vec<u64>,
    taxonomy: Arc<TaxonomySnapshot>,
    config: Arc<FacetsConfig>,
}

impl FacetCounts {
    pub(crate) fn new(
        counts: Vec<u64>,
        taxonomy: Arc<TaxonomySnapshot>,
        config: Arc<FacetsConfig>,
    ) -> Self {
        Self {
            counts,
            taxonomy,
            config,
        }
    }

    fn count(&self, ordinal: u64) -> u64 {
        self.counts.get(ordinal as usize).copied().unwrap_or(0)
    }

    /// The `top_n` children of `dim`/`path`, ordered by count and then by
    /// ordinal.
    ///
    /// Returns `None` when the path is unknown or none of its children
    /// were counted.
    pub fn top_children(
        &self,
        top_n: usize,
        dim: &str,
        path: &[&str],
    ) -> Result<Option<FacetResult>> {
        if top_n == 0 {
            return Err(Error::Config("top_n must be positive".into()));
        }
        let label =
            FacetLabel::new(std::iter::once(dim).chain(path.iter().copied()))?;
        let Some(ordinal) = self.taxonomy.ordinal(&label) else {
            return Ok(None);
        };

        let mut children: Vec<(u64, u64)> = self
            .taxonomy
            .children(ordinal)
            .iter()
            .map(|&child| (child, self.count(child)))
            .filter(|&(_, count)| count > 0)
            .collect();
        if children.is_empty() {
            return Ok(None);
        }

        let child_count = children.len();
        let sum: u64 = children.iter().map(|&(_, count)| count).sum();
        children.sort_by(|a, b| b.1.cmp(&a.1).then(a.0.cmp(&b.0)));
        children.truncate(top_n);

        let dim_config = self.config.dim_config(dim);
        let value = if dim_config.require_dim_count {
            Some(self.count(ordinal))
        } else if !dim_config.multi_valued {
            Some(sum)
        } else {
            None
        };

        let label_values = children
            .into_iter()
            .filter_map(|(child, value)| {
                let label = self.taxonomy.label(child)?.last()?.to_string();
                Some(LabelAndValue { label, value })
            })
            .collect();

        Ok(Some(FacetResult {
            dim: dim.to_string(),
            path: path.iter().map(|p| p.to_string()).collect(),
            value,
            child_count,
            label_values,
        }))
    }

    /// Top children of every dimension with counted values, in dimension
    /// registration order.
    pub fn all_dims(&self, top_n: usize) -> Result<Vec<FacetResult>> {
        let mut results = Vec::new();
        for &dim_ordinal in self.taxonomy.children(ROOT_ORDINAL) {
            let Some(dim) =
                self.taxonomy.label(dim_ordinal).and_then(FacetLabel::dim)
            else {
                continue;
            };
            if let Some(result) = self.top_children(top_n, dim, &[])? {
                results.push(result);
            }
        }
        Ok(results)
    }

    /// Count of one specific path, if it exists in the taxonomy.
    pub fn specific_value(&self, dim: &str, path: &[&str]) -> Option<u64> {
        let label =
            FacetLabel::new(std::iter::once(dim).chain(path.iter().copied()))
                .ok()?;
        self.taxonomy.ordinal(&label).map(|ordinal| self.count(ordinal))
    }

    pub fn taxonomy(&self) -> &TaxonomySnapshot {
        &self.taxonomy
    }
}

impl std::fmt::Debug for FacetCounts {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FacetCounts")
            .field("ordinals", &self.counts.len())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use tantivy::Index;

    use super::*;
    use crate::taxonomy::{self, TaxonomyWriter};

    fn counts_for(
        paths: &[(&str, &str)],
        counts: &[(usize, u64)],
        config: FacetsConfig,
    ) -> FacetCounts {
        let index = Index::create_in_ram(taxonomy::build_schema());
        let writer = TaxonomyWriter::open(&index, 15_000_000).unwrap();
        for (dim, value) in paths {
            writer
                .add_category(&FacetLabel::new([*dim, *value]).unwrap())
                .unwrap();
        }
        let snapshot = writer.snapshot();
        let mut raw = vec![0; snapshot.size()];
        for &(ordinal, count) in counts {
            raw[ordinal] = count;
        }
        FacetCounts::new(raw, snapshot, Arc::new(config))
    }

    #[test]
    fn ties_break_by_ordinal() {
        // ordinals: 1 color, 2 yellow, 3 green, 4 white
        let counts = counts_for(
            &[("color", "yellow"), ("color", "green"), ("color", "white")],
            &[(2, 1), (3, 2), (4, 1)],
            FacetsConfig::new(),
        );

        let result = counts.top_children(10, "color", &[]).unwrap().unwrap();
        assert_eq!(result.labels(), ["green", "yellow", "white"]);
        assert_eq!(result.child_count, 3);
        assert_eq!(result.value, Some(4));

        let top = counts.top_children(1, "color", &[]).unwrap().unwrap();
        assert_eq!(top.labels(), ["green"]);
        assert_eq!(top.child_count, 3);
    }

    #[test]
    fn multi_valued_dimensions_have_no_total() {
        let mut config = FacetsConfig::new();
        config.set_multi_valued("color", true);
        let counts = counts_for(&[("color", "green")], &[(2, 3)], config);

        let result = counts.top_children(5, "color", &[]).unwrap().unwrap();
        assert_eq!(result.value, None);
        assert_eq!(counts.specific_value("color", &["green"]), Some(3));
    }

    #[test]
    fn empty_or_unknown_dimensions_yield_none() {
        let counts =
            counts_for(&[("color", "green")], &[], FacetsConfig::new());

        assert!(counts.top_children(5, "color", &[]).unwrap().is_none());
        assert!(counts.top_children(5, "size", &[]).unwrap().is_none());
        assert!(counts.top_children(0, "color", &[]).is_err());
        assert!(counts.all_dims(5).unwrap().is_empty());
    }
}
