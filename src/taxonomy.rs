//! The taxonomy index: a dense mapping between category labels and
//! integer ordinals, persisted as its own tantivy index next to the
//! primary one.
//!
//! Ordinal 0 is the implicit root. Every other ordinal is stored as one
//! document carrying its label and its parent's ordinal. Ordinals are
//! assigned in insertion order and a parent is always registered before
//! its children, so a snapshot can be rebuilt by replaying documents in
//! ordinal order.

use std::{collections::HashMap, fmt, sync::Arc};

use parking_lot::{Mutex, RwLock, RwLockWriteGuard};
use serde::{Deserialize, Serialize};
use tantivy::{
    Index,
    IndexReader,
    IndexWriter,
    ReloadPolicy,
    Searcher,
    TantivyDocument,
    collector::DocSetCollector,
    doc,
    query::AllQuery,
    schema::*,
};
use tracing::{debug, trace};

use crate::error::{Error, Result};

/// Separator between label components in encoded form.
pub const LABEL_SEPARATOR: char = '\u{1f}';

/// Ordinal of the taxonomy root.
pub const ROOT_ORDINAL: u64 = 0;

/// Field names used in the taxonomy schema.
pub mod fields {
    pub const ORDINAL: &str = "ordinal";
    pub const PARENT: &str = "parent";
    pub const LABEL: &str = "label";
}

/// A category path: the dimension followed by zero or more components.
#[derive(
    Debug, Clone, Default, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize,
    Deserialize,
)]
pub struct FacetLabel {
    components: Vec<String>,
}

impl FacetLabel {
    /// Builds a label, rejecting empty components and components that
    /// contain the separator character.
    pub fn new<I, S>(components: I) -> Result<Self>
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        let components: Vec<String> =
            components.into_iter().map(Into::into).collect();
        for component in &components {
            if component.is_empty() {
                return Err(Error::Config(
                    "facet label components must not be empty".into(),
                ));
            }
            if component.contains(LABEL_SEPARATOR) {
                return Err(Error::Config(format!(
                    "facet label component {component:?} contains a \
                     reserved character"
                )));
            }
        }
        Ok(Self { components })
    }

    pub fn root() -> Self {
        Self::default()
    }

    pub fn components(&self) -> &[String] {
        &self.components
    }

    pub fn len(&self) -> usize {
        self.components.len()
    }

    pub fn is_root(&self) -> bool {
        self.components.is_empty()
    }

    pub fn dim(&self) -> Option<&str> {
        self.components.first().map(String::as_str)
    }

    pub fn last(&self) -> Option<&str> {
        self.components.last().map(String::as_str)
    }

    /// The label made of the first `len` components.
    pub fn prefix(&self, len: usize) -> Self {
        Self {
            components: self.components[..len.min(self.len())].to_vec(),
        }
    }

    pub fn child(&self, component: impl Into<String>) -> Self {
        let mut components = self.components.clone();
        components.push(component.into());
        Self { components }
    }

    pub fn encode(&self) -> String {
        let mut out = String::new();
        for (i, component) in self.components.iter().enumerate() {
            if i > 0 {
                out.push(LABEL_SEPARATOR);
            }
            out.push_str(component);
        }
        out
    }

    pub fn decode(encoded: &str) -> Self {
        if encoded.is_empty() {
            return Self::root();
        }
        Self {
            components: encoded
                .split(LABEL_SEPARATOR)
                .map(str::to_string)
                .collect(),
        }
    }
}

impl fmt::Display for FacetLabel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.components.join("/"))
    }
}

/// An immutable view of the taxonomy at one point in time.
#[derive(Debug, Clone)]
pub struct TaxonomySnapshot {
    labels: Vec<FacetLabel>,
    parents: Vec<u64>,
    children: Vec<Vec<u64>>,
    ordinals: HashMap<FacetLabel, u64>,
}

impl Default for TaxonomySnapshot {
    fn default() -> Self {
        let mut ordinals = HashMap::new();
        ordinals.insert(FacetLabel::root(), ROOT_ORDINAL);
        Self {
            labels: vec![FacetLabel::root()],
            parents: vec![ROOT_ORDINAL],
            children: vec![Vec::new()],
            ordinals,
        }
    }
}

impl TaxonomySnapshot {
    /// Number of ordinals, root included.
    pub fn size(&self) -> usize {
        self.labels.len()
    }

    pub fn ordinal(&self, label: &FacetLabel) -> Option<u64> {
        self.ordinals.get(label).copied()
    }

    pub fn label(&self, ordinal: u64) -> Option<&FacetLabel> {
        self.labels.get(ordinal as usize)
    }

    /// Parent ordinal; the root is its own parent.
    pub fn parent(&self, ordinal: u64) -> Option<u64> {
        self.parents.get(ordinal as usize).copied()
    }

    pub fn parents(&self) -> &[u64] {
        &self.parents
    }

    /// Children in insertion order.
    pub fn children(&self, ordinal: u64) -> &[u64] {
        self.children
            .get(ordinal as usize)
            .map(Vec::as_slice)
            .unwrap_or(&[])
    }

    pub fn siblings(&self, ordinal: u64) -> Vec<u64> {
        if ordinal == ROOT_ORDINAL {
            return Vec::new();
        }
        let Some(parent) = self.parent(ordinal) else {
            return Vec::new();
        };
        self.children(parent)
            .iter()
            .copied()
            .filter(|&sibling| sibling != ordinal)
            .collect()
    }

    fn push(&mut self, label: FacetLabel, parent: u64) -> u64 {
        let ordinal = self.labels.len() as u64;
        self.ordinals.insert(label.clone(), ordinal);
        self.labels.push(label);
        self.parents.push(parent);
        self.children.push(Vec::new());
        self.children[parent as usize].push(ordinal);
        ordinal
    }

    /// Replays committed taxonomy documents into a snapshot.
    fn load(searcher: &Searcher, fields: &TaxonomyFields) -> Result<Self> {
        let addresses = searcher.search(&AllQuery, &DocSetCollector)?;
        let mut rows = Vec::with_capacity(addresses.len());

        for address in addresses {
            let doc: TantivyDocument = searcher.doc(address)?;
            let ordinal = doc
                .get_first(fields.ordinal)
                .and_then(|v| v.as_u64())
                .ok_or_else(|| {
                    Error::Taxonomy("category without ordinal".into())
                })?;
            let parent = doc
                .get_first(fields.parent)
                .and_then(|v| v.as_u64())
                .ok_or_else(|| {
                    Error::Taxonomy(format!("ordinal {ordinal} has no parent"))
                })?;
            let label = doc
                .get_first(fields.label)
                .and_then(|v| v.as_str())
                .map(FacetLabel::decode)
                .ok_or_else(|| {
                    Error::Taxonomy(format!("ordinal {ordinal} has no label"))
                })?;
            rows.push((ordinal, parent, label));
        }

        rows.sort_by_key(|(ordinal, _, _)| *ordinal);

        let mut snapshot = Self::default();
        for (ordinal, parent, label) in rows {
            if ordinal != snapshot.size() as u64 {
                return Err(Error::Taxonomy(format!(
                    "expected ordinal {}, found {ordinal}",
                    snapshot.size()
                )));
            }
            if parent >= ordinal {
                return Err(Error::Taxonomy(format!(
                    "ordinal {ordinal} refers to unknown parent {parent}"
                )));
            }
            snapshot.push(label, parent);
        }

        Ok(snapshot)
    }
}

#[derive(Clone, Copy)]
struct TaxonomyFields {
    ordinal: Field,
    parent: Field,
    label: Field,
}

impl TaxonomyFields {
    fn resolve(schema: &Schema) -> Result<Self> {
        let f = |name: &str| {
            schema.get_field(name).map_err(|_| {
                Error::Taxonomy(format!("taxonomy schema lacks {name:?}"))
            })
        };
        Ok(Self {
            ordinal: f(fields::ORDINAL)?,
            parent: f(fields::PARENT)?,
            label: f(fields::LABEL)?,
        })
    }
}

/// Schema of the taxonomy index.
pub fn build_schema() -> Schema {
    let mut builder = Schema::builder();
    builder.add_u64_field(fields::ORDINAL, INDEXED | STORED);
    builder.add_u64_field(fields::PARENT, STORED);
    builder.add_text_field(fields::LABEL, STRING | STORED);
    builder.build()
}

/// Segment ids and deletion counts of the last commit, used to tell
/// whether a reader is behind.
pub(crate) type CommitState = Vec<(String, u32)>;

pub(crate) fn commit_state(index: &Index) -> Result<CommitState> {
    let metas = index.load_metas()?;
    let mut state: CommitState = metas
        .segments
        .iter()
        .map(|segment| (segment.id().uuid_string(), segment.num_deleted_docs()))
        .collect();
    state.sort();
    Ok(state)
}

/// Read side of the taxonomy, refreshed explicitly.
pub struct TaxonomyReader {
    index: Index,
    reader: IndexReader,
    fields: TaxonomyFields,
    state: RwLock<ReaderState>,
}

struct ReaderState {
    commit: CommitState,
    snapshot: Arc<TaxonomySnapshot>,
}

impl TaxonomyReader {
    pub fn open(index: &Index) -> Result<Self> {
        let fields = TaxonomyFields::resolve(&index.schema())?;
        let commit = commit_state(index)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let snapshot = TaxonomySnapshot::load(&reader.searcher(), &fields)?;
        debug!(size = snapshot.size(), "opened taxonomy reader");

        Ok(Self {
            index: index.clone(),
            reader,
            fields,
            state: RwLock::new(ReaderState {
                commit,
                snapshot: Arc::new(snapshot),
            }),
        })
    }

    pub fn snapshot(&self) -> Arc<TaxonomySnapshot> {
        Arc::clone(&self.state.read().snapshot)
    }

    /// Reloads if the taxonomy has been committed since the last load.
    /// Returns whether a newer snapshot was adopted.
    pub fn refresh(&self) -> Result<bool> {
        let commit = commit_state(&self.index)?;
        if commit == self.state.read().commit {
            return Ok(false);
        }

        self.reader.reload()?;
        let snapshot =
            TaxonomySnapshot::load(&self.reader.searcher(), &self.fields)?;
        debug!(size = snapshot.size(), "reloaded taxonomy reader");

        let mut state = self.state.write();
        state.commit = commit;
        state.snapshot = Arc::new(snapshot);
        Ok(true)
    }
}

impl fmt::Debug for TaxonomyReader {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaxonomyReader").finish_non_exhaustive()
    }
}

/// Write side of the taxonomy.
///
/// New categories are visible through [`TaxonomyWriter::snapshot`] at
/// once and become durable with the next commit of the underlying writer.
pub struct TaxonomyWriter {
    writer: RwLock<IndexWriter>,
    fields: TaxonomyFields,
    snapshot: Mutex<Arc<TaxonomySnapshot>>,
}

impl TaxonomyWriter {
    pub fn open(index: &Index, memory_budget: usize) -> Result<Self> {
        let fields = TaxonomyFields::resolve(&index.schema())?;
        let writer = index.writer_with_num_threads(1, memory_budget)?;
        let reader = index
            .reader_builder()
            .reload_policy(ReloadPolicy::Manual)
            .try_into()?;
        let snapshot = TaxonomySnapshot::load(&reader.searcher(), &fields)?;
        debug!(size = snapshot.size(), "opened taxonomy writer");

        Ok(Self {
            writer: RwLock::new(writer),
            fields,
            snapshot: Mutex::new(Arc::new(snapshot)),
        })
    }

    pub fn snapshot(&self) -> Arc<TaxonomySnapshot> {
        Arc::clone(&self.snapshot.lock())
    }

    pub fn size(&self) -> usize {
        self.snapshot.lock().size()
    }

    /// Registers `label` and all of its missing ancestors.
    ///
    /// Returns the ordinals of every prefix of the label, shortest first,
    /// so the result has one entry per component.
    pub fn add_category(&self, label: &FacetLabel) -> Result<Vec<u64>> {
        let mut current = self.snapshot.lock();
        let mut ordinals = Vec::with_capacity(label.len());
        let mut parent = ROOT_ORDINAL;

        for len in 1..=label.len() {
            let prefix = label.prefix(len);
            let ordinal = match current.ordinal(&prefix) {
                Some(ordinal) => ordinal,
                None => {
                    let ordinal = current.size() as u64;
                    self.writer.read().add_document(doc!(
                        self.fields.ordinal => ordinal,
                        self.fields.parent => parent,
                        self.fields.label => prefix.encode(),
                    ))?;
                    Arc::make_mut(&mut *current).push(prefix, parent);
                    trace!(ordinal, parent, "registered category");
                    ordinal
                }
            };
            ordinals.push(ordinal);
            parent = ordinal;
        }

        Ok(ordinals)
    }

    /// Exclusive access to the underlying writer, for the commit protocol.
    pub(crate) fn lock_writer(&self) -> RwLockWriteGuard<'_, IndexWriter> {
        self.writer.write()
    }

    /// Waits for pending merges and releases the writer lock.
    pub fn close(self) -> Result<()> {
        self.writer.into_inner().wait_merging_threads()?;
        Ok(())
    }
}

impl fmt::Debug for TaxonomyWriter {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TaxonomyWriter")
            .field("size", &self.size())
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn label(components: &[&str]) -> FacetLabel {
        FacetLabel::new(components.iter().copied()).unwrap()
    }

    #[test]
    fn labels_round_trip_through_encoding() {
        let l = label(&["category", "mobility", "rail"]);
        assert_eq!(FacetLabel::decode(&l.encode()), l);
        assert_eq!(l.to_string(), "category/mobility/rail");
        assert_eq!(l.prefix(1), label(&["category"]));
        assert_eq!(FacetLabel::decode(""), FacetLabel::root());
    }

    #[test]
    fn invalid_components_are_rejected() {
        assert!(FacetLabel::new(["category", ""]).is_err());
        assert!(FacetLabel::new(["cat\u{1f}egory"]).is_err());
    }

    #[test]
    fn add_category_registers_ancestors_once() {
        let index = Index::create_in_ram(build_schema());
        let writer = TaxonomyWriter::open(&index, 15_000_000).unwrap();

        let first = writer.add_category(&label(&["a", "b", "c"])).unwrap();
        assert_eq!(first, vec![1, 2, 3]);

        let second = writer.add_category(&label(&["a", "d"])).unwrap();
        assert_eq!(second, vec![1, 4]);

        let again = writer.add_category(&label(&["a", "b", "c"])).unwrap();
        assert_eq!(again, first);

        let snapshot = writer.snapshot();
        assert_eq!(snapshot.size(), 5);
        assert_eq!(snapshot.children(1), &[2, 4]);
        assert_eq!(snapshot.parent(3), Some(2));
        assert_eq!(snapshot.siblings(2), vec![4]);
        assert_eq!(snapshot.label(4), Some(&label(&["a", "d"])));
    }

    #[test]
    fn reader_sees_categories_after_commit_and_refresh() {
        let index = Index::create_in_ram(build_schema());
        let writer = TaxonomyWriter::open(&index, 15_000_000).unwrap();
        let reader = TaxonomyReader::open(&index).unwrap();

        writer.add_category(&label(&["color", "green"])).unwrap();
        assert_eq!(reader.snapshot().size(), 1);
        assert!(!reader.refresh().unwrap());

        writer.lock_writer().commit().unwrap();
        assert!(reader.refresh().unwrap());

        let snapshot = reader.snapshot();
        assert_eq!(snapshot.size(), 3);
        assert_eq!(snapshot.ordinal(&label(&["color", "green"])), Some(2));
        assert!(!reader.refresh().unwrap());
    }

    #[test]
    fn writer_reloads_committed_categories() {
        let tmp = tempfile::tempdir().unwrap();
        let dir = tantivy::directory::MmapDirectory::open(tmp.path()).unwrap();
        let index = Index::create(
            dir,
            build_schema(),
            tantivy::IndexSettings::default(),
        )
        .unwrap();

        {
            let writer = TaxonomyWriter::open(&index, 15_000_000).unwrap();
            writer.add_category(&label(&["name", "horse"])).unwrap();
            writer.lock_writer().commit().unwrap();
            writer.close().unwrap();
        }

        let reopened = Index::open_in_dir(tmp.path()).unwrap();
        let writer = TaxonomyWriter::open(&reopened, 15_000_000).unwrap();
        assert_eq!(writer.size(), 3);
        assert_eq!(
            writer.add_category(&label(&["name", "train"])).unwrap(),
            vec![1, 3]
        );
    }
}
