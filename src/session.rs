//! Scoped access to an index.
//!
//! A [`ReadSession`] leases a consistent searcher and taxonomy pair for
//! the duration of one closure. A [`WriteSession`] hands out the shared
//! writer pair; writers are long-lived and are never leased.

use std::sync::Arc;

use parking_lot::{RwLock, RwLockReadGuard, RwLockWriteGuard};
use tantivy::{Index, IndexWriter, Searcher};

use crate::{
    error::Result,
    facets_config::FacetsConfig,
    index_manager::IndexStorage,
    query_factory::QueryFactory,
    schema::IndexSchema,
    searcher_manager::{SearcherAndTaxonomy, SearcherTaxonomyManager},
    taxonomy::{TaxonomySnapshot, TaxonomyWriter},
};

/// Read access to one searcher manager.
#[derive(Debug, Clone, Copy)]
pub struct ReadSession<'a> {
    manager: &'a SearcherTaxonomyManager,
    storage: &'a IndexStorage,
    facets: &'a Arc<FacetsConfig>,
}

impl<'a> ReadSession<'a> {
    pub(crate) fn new(
        manager: &'a SearcherTaxonomyManager,
        storage: &'a IndexStorage,
        facets: &'a Arc<FacetsConfig>,
    ) -> Self {
        Self {
            manager,
            storage,
            facets,
        }
    }

    /// Runs `f` against the current snapshot.
    ///
    /// The snapshot is leased before `f` runs and released when it returns,
    /// errors and panics included. Refreshes happening meanwhile do not
    /// affect what `f` sees.
    pub fn read<R>(
        &self,
        f: impl FnOnce(&ReadContext<'_>) -> Result<R>,
    ) -> Result<R> {
        let context = ReadContext {
            lease: self.manager.acquire(),
            storage: self.storage,
            facets: self.facets,
        };
        f(&context)
    }

    /// Generation of the snapshot a read would currently see.
    pub fn generation(&self) -> u64 {
        self.manager.acquire().generation()
    }

    pub fn query_factory(&self) -> QueryFactory {
        self.storage.query_factory(self.facets)
    }
}

/// What a read closure may touch.
pub struct ReadContext<'a> {
    lease: Arc<SearcherAndTaxonomy>,
    storage: &'a IndexStorage,
    facets: &'a Arc<FacetsConfig>,
}

impl ReadContext<'_> {
    pub fn searcher(&self) -> &Searcher {
        self.lease.searcher()
    }

    pub fn taxonomy(&self) -> &Arc<TaxonomySnapshot> {
        self.lease.taxonomy()
    }

    pub fn facets_config(&self) -> &Arc<FacetsConfig> {
        self.facets
    }

    pub fn schema(&self) -> &IndexSchema {
        &self.storage.schema
    }

    pub fn generation(&self) -> u64 {
        self.lease.generation()
    }

    pub fn query_factory(&self) -> QueryFactory {
        self.storage.query_factory(self.facets)
    }
}

/// Write access to the shared writer pair.
#[derive(Debug, Clone, Copy)]
pub struct WriteSession<'a> {
    context: WriteContext<'a>,
}

impl<'a> WriteSession<'a> {
    pub(crate) fn new(
        writer: &'a RwLock<IndexWriter>,
        taxonomy: &'a TaxonomyWriter,
        taxonomy_index: &'a Index,
        storage: &'a IndexStorage,
        facets: &'a Arc<FacetsConfig>,
    ) -> Self {
        Self {
            context: WriteContext {
                writer,
                taxonomy,
                taxonomy_index,
                storage,
                facets,
            },
        }
    }

    pub fn write<R>(
        &self,
        f: impl FnOnce(&WriteContext<'a>) -> Result<R>,
    ) -> Result<R> {
        f(&self.context)
    }

    /// Like [`WriteSession::write`] for closures that add one document and
    /// return its opstamp.
    pub fn write_single_document(
        &self,
        f: impl FnOnce(&WriteContext<'a>) -> Result<u64>,
    ) -> Result<u64> {
        f(&self.context)
    }

    pub fn query_factory(&self) -> QueryFactory {
        self.context.storage.query_factory(self.context.facets)
    }
}

/// What a write closure may touch.
///
/// Document additions share the index writer; commits, merges and other
/// whole-index operations take it exclusively.
#[derive(Clone, Copy)]
pub struct WriteContext<'a> {
    writer: &'a RwLock<IndexWriter>,
    taxonomy: &'a TaxonomyWriter,
    taxonomy_index: &'a Index,
    storage: &'a IndexStorage,
    facets: &'a Arc<FacetsConfig>,
}

impl<'a> WriteContext<'a> {
    pub fn index_writer(&self) -> RwLockReadGuard<'a, IndexWriter> {
        self.writer.read()
    }

    pub fn index_writer_mut(&self) -> RwLockWriteGuard<'a, IndexWriter> {
        self.writer.write()
    }

    pub fn taxonomy_writer(&self) -> &'a TaxonomyWriter {
        self.taxonomy
    }

    pub fn facets_config(&self) -> &'a FacetsConfig {
        self.facets
    }

    pub fn schema(&self) -> &'a IndexSchema {
        &self.storage.schema
    }

    pub fn index(&self) -> &'a Index {
        &self.storage.index
    }

    pub fn taxonomy_index(&self) -> &'a Index {
        self.taxonomy_index
    }
}

impl std::fmt::Debug for WriteContext<'_> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WriteContext")
            .field("taxonomy", self.taxonomy)
            .finish_non_exhaustive()
    }
}
