//! Interactive drill-down navigation.
//!
//! A [`FacetTree`] is an arena of immutable nodes. Each node names the
//! dimension it offers for selection and records the path of selections
//! that led to it, root first. Children are new nodes; existing nodes are
//! never modified, so items can be shared freely across threads.

use std::{collections::BTreeMap, fmt, sync::Arc};

use parking_lot::RwLock;
use tantivy::query::Query;
use tracing::trace;

use crate::{
    error::{Error, Result},
    facet_counts::FacetResult,
    query_factory::QueryFactory,
    read_toolbox::ReadToolbox,
    term_conjunction::{Conjunction, Selection, TermConjunction},
};

/// Handle of a node in a [`FacetTree`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(usize);

/// One selection on the way from the root to a node.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathStep {
    pub node: NodeId,
    pub dimension: String,
    pub selection: Selection,
}

#[derive(Debug)]
struct Node {
    dimension: String,
    path: Vec<PathStep>,
}

/// Arena of navigation nodes sharing one base query.
pub struct FacetTree {
    factory: QueryFactory,
    base: Box<dyn Query>,
    presence_field: String,
    nodes: RwLock<Vec<Arc<Node>>>,
}

impl FacetTree {
    /// A tree whose queries all start from `base`, such as the query of a
    /// search box. The facets configuration must name a presence field.
    pub fn new(factory: QueryFactory, base: Box<dyn Query>) -> Result<Self> {
        let presence_field = factory
            .facets_config()
            .presence_field()
            .ok_or_else(|| {
                Error::Config(
                    "navigation requires a presence field in the facets \
                     configuration"
                        .into(),
                )
            })?
            .to_string();

        Ok(Self {
            factory,
            base,
            presence_field,
            nodes: RwLock::new(Vec::new()),
        })
    }

    pub fn presence_field(&self) -> &str {
        &self.presence_field
    }

    pub fn query_factory(&self) -> &QueryFactory {
        &self.factory
    }

    pub fn len(&self) -> usize {
        self.nodes.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.nodes.read().is_empty()
    }

    /// A node offering `dimension` with nothing selected yet.
    pub fn create_root(&self, dimension: &str) -> Result<TreeItem<'_>> {
        require_dimension(dimension)?;
        let node = Node {
            dimension: dimension.to_string(),
            path: Vec::new(),
        };
        Ok(self.insert(node))
    }

    /// A node below `parent`, reached by choosing `selection` in the
    /// parent's dimension, that offers `next_dimension`.
    ///
    /// A dimension appears at most once on a path; reusing one is a
    /// structural error and creates no node.
    pub fn create_child(
        &self,
        parent: NodeId,
        selection: Selection,
        next_dimension: &str,
    ) -> Result<TreeItem<'_>> {
        require_dimension(next_dimension)?;
        if matches!(&selection, Selection::Present(v) if v.is_empty()) {
            return Err(Error::Config(
                "selected value must not be empty".into(),
            ));
        }

        let parent_node = self.node(parent)?;
        let path = extend_path(&parent_node, parent, selection)?;
        if path.iter().any(|step| step.dimension == next_dimension) {
            return Err(Error::Structural(format!(
                "dimension {next_dimension:?} is already selected on this path"
            )));
        }

        let node = Node {
            dimension: next_dimension.to_string(),
            path,
        };
        Ok(self.insert(node))
    }

    /// Shorthand for a child selecting documents with no value in the
    /// parent's dimension.
    pub fn create_missing_child(
        &self,
        parent: NodeId,
        next_dimension: &str,
    ) -> Result<TreeItem<'_>> {
        self.create_child(parent, Selection::Absent, next_dimension)
    }

    pub fn item(&self, id: NodeId) -> Result<TreeItem<'_>> {
        Ok(TreeItem {
            tree: self,
            id,
            node: self.node(id)?,
        })
    }

    fn node(&self, id: NodeId) -> Result<Arc<Node>> {
        self.nodes
            .read()
            .get(id.0)
            .cloned()
            .ok_or_else(|| Error::Structural(format!("unknown node {id:?}")))
    }

    fn insert(&self, node: Node) -> TreeItem<'_> {
        let node = Arc::new(node);
        let mut nodes = self.nodes.write();
        let id = NodeId(nodes.len());
        nodes.push(Arc::clone(&node));
        trace!(
            ?id,
            dimension = %node.dimension,
            depth = node.path.len(),
            "created node"
        );
        TreeItem {
            tree: self,
            id,
            node,
        }
    }
}

impl fmt::Debug for FacetTree {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FacetTree")
            .field("base", &self.base)
            .field("presence_field", &self.presence_field)
            .field("nodes", &self.len())
            .finish()
    }
}

/// The parent's path followed by the parent's own selection.
fn extend_path(
    parent: &Node,
    parent_id: NodeId,
    selection: Selection,
) -> Result<Vec<PathStep>> {
    if parent.path.iter().any(|step| step.node == parent_id) {
        return Err(Error::Structural(format!(
            "node {parent_id:?} is its own ancestor"
        )));
    }
    let mut path = parent.path.clone();
    path.push(PathStep {
        node: parent_id,
        dimension: parent.dimension.clone(),
        selection,
    });
    Ok(path)
}

fn require_dimension(dimension: &str) -> Result<()> {
    if dimension.is_empty() {
        return Err(Error::Config("dimension name must not be empty".into()));
    }
    Ok(())
}

/// A node of a [`FacetTree`].
#[derive(Clone)]
pub struct TreeItem<'t> {
    tree: &'t FacetTree,
    id: NodeId,
    node: Arc<Node>,
}

impl<'t> TreeItem<'t> {
    pub fn id(&self) -> NodeId {
        self.id
    }

    /// The dimension this node offers for selection.
    pub fn dimension(&self) -> &str {
        &self.node.dimension
    }

    /// Number of selections above this node.
    pub fn depth(&self) -> usize {
        self.node.path.len()
    }

    /// `(dimension, selection)` for every ancestor, root first.
    pub fn parent_selections(&self) -> Vec<(&str, &Selection)> {
        self.node
            .path
            .iter()
            .map(|step| (step.dimension.as_str(), &step.selection))
            .collect()
    }

    pub fn path(&self) -> &[PathStep] {
        &self.node.path
    }

    /// The base query restricted by every ancestor's selection.
    pub fn query(&self) -> Result<Box<dyn Query>> {
        self.query_with(Conjunction::All, &[])
    }

    /// Like [`TreeItem::query`], additionally restricting this node's own
    /// dimension by `selections` combined with `mode`.
    pub fn query_with(
        &self,
        mode: Conjunction,
        selections: &[Selection],
    ) -> Result<Box<dyn Query>> {
        let presence = Some(self.tree.presence_field.clone());
        let mut dimensions = BTreeMap::new();

        for step in &self.node.path {
            let conjunction = TermConjunction::single(
                step.selection.clone(),
                presence.clone(),
            )?;
            dimensions.insert(step.dimension.clone(), conjunction);
        }
        if !selections.is_empty() {
            dimensions.insert(
                self.node.dimension.clone(),
                TermConjunction::new(selections.to_vec(), mode, presence)?,
            );
        }

        self.tree
            .factory
            .drill_down(self.tree.base.box_clone(), &dimensions)
    }

    pub fn create_child(
        &self,
        selection: Selection,
        next_dimension: &str,
    ) -> Result<TreeItem<'t>> {
        self.tree.create_child(self.id, selection, next_dimension)
    }

    pub fn create_missing_child(
        &self,
        next_dimension: &str,
    ) -> Result<TreeItem<'t>> {
        self.tree.create_missing_child(self.id, next_dimension)
    }
}

impl fmt::Debug for TreeItem<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("TreeItem")
            .field("id", &self.id)
            .field("dimension", &self.node.dimension)
            .field("path", &self.node.path)
            .finish()
    }
}

/// Evaluates tree items against an index.
#[derive(Debug, Clone, Copy)]
pub struct NavigationFetcher<'a> {
    toolbox: &'a ReadToolbox<'a>,
}

impl<'a> NavigationFetcher<'a> {
    pub fn new(toolbox: &'a ReadToolbox<'a>) -> Self {
        Self { toolbox }
    }

    /// The `max_hits` most frequent values of the item's dimension among
    /// documents matching the item's query, or `None` if there are none.
    ///
    /// Keep `max_hits` bounded by what a caller can display.
    pub fn get_facet(
        &self,
        item: &TreeItem<'_>,
        max_hits: usize,
    ) -> Result<Option<FacetResult>> {
        let query = item.query()?;
        self.toolbox
            .facet_result(query.as_ref(), item.dimension(), max_hits)
    }

    /// How many documents matching the item's query have no value in the
    /// item's dimension.
    pub fn get_missing_count(&self, item: &TreeItem<'_>) -> Result<usize> {
        let query = item.tree.factory.missing(
            item.query()?,
            &item.tree.presence_field,
            &[item.dimension()],
        )?;
        self.toolbox.load_count(query.as_ref())
    }
}
