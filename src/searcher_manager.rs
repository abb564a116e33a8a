use std::{fmt, sync::Arc};

use parking_lot::{Mutex, RwLock};
use tantivy::{Index, IndexReader, Searcher};
use tracing::debug;

use crate::{
    error::Result,
    taxonomy::{
        CommitState,
        TaxonomyReader,
        TaxonomySnapshot,
        TaxonomyWriter,
        commit_state,
    },
};

/// A searcher paired with the taxonomy it must be read against.
pub struct SearcherAndTaxonomy {
    searcher: Searcher,
    taxonomy: Arc<TaxonomySnapshot>,
    generation: u64,
}

impl SearcherAndTaxonomy {
    pub fn searcher(&self) -> &Searcher {
        &self.searcher
    }

    pub fn taxonomy(&self) -> &Arc<TaxonomySnapshot> {
        &self.taxonomy
    }

    /// Increases every time the manager adopts a newer pair.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// Where a manager takes its taxonomy from.
pub(crate) enum TaxonomySource {
    /// Committed categories only, reloaded on refresh.
    Reader(Arc<TaxonomyReader>),
    /// Every category registered so far, committed or not.
    Writer(Arc<TaxonomyWriter>),
}

impl TaxonomySource {
    fn snapshot(&self) -> Arc<TaxonomySnapshot> {
        match self {
            TaxonomySource::Reader(reader) => reader.snapshot(),
            TaxonomySource::Writer(writer) => writer.snapshot(),
        }
    }

    fn refresh(&self, current: &TaxonomySnapshot) -> Result<bool> {
        match self {
            TaxonomySource::Reader(reader) => reader.refresh(),
            TaxonomySource::Writer(writer) => {
                Ok(writer.size() != current.size())
            }
        }
    }
}

/// Hands out consistent (searcher, taxonomy) pairs and swaps in newer ones
/// on request.
///
/// Acquiring is a cheap reference count bump. A pair stays valid for as
/// long as its holder keeps it, regardless of later refreshes.
pub struct SearcherTaxonomyManager {
    index: Index,
    reader: IndexReader,
    taxonomy: TaxonomySource,
    current: RwLock<Arc<SearcherAndTaxonomy>>,
    refresh: Mutex<CommitState>,
}

impl SearcherTaxonomyManager {
    pub(crate) fn new(
        index: Index,
        reader: IndexReader,
        taxonomy: TaxonomySource,
    ) -> Result<Self> {
        let commit = commit_state(&index)?;
        reader.reload()?;
        // The taxonomy may predate the reload; it must catch up with it.
        taxonomy.refresh(&taxonomy.snapshot())?;
        let current = SearcherAndTaxonomy {
            searcher: reader.searcher(),
            taxonomy: taxonomy.snapshot(),
            generation: 0,
        };

        Ok(Self {
            index,
            reader,
            taxonomy,
            current: RwLock::new(Arc::new(current)),
            refresh: Mutex::new(commit),
        })
    }

    /// Leases the current pair. Dropping the returned handle releases it.
    pub fn acquire(&self) -> Arc<SearcherAndTaxonomy> {
        Arc::clone(&self.current.read())
    }

    /// Adopts a newer pair if the index or the taxonomy changed.
    ///
    /// The index is reloaded before the taxonomy, so the adopted taxonomy
    /// knows every category the adopted searcher can reference. A refresh
    /// already running elsewhere makes this call a no-op.
    pub fn maybe_refresh(&self) -> Result<bool> {
        let Some(mut last_commit) = self.refresh.try_lock() else {
            return Ok(false);
        };

        let commit = commit_state(&self.index)?;
        let index_changed = commit != *last_commit;
        if index_changed {
            self.reader.reload()?;
        }

        let current = self.acquire();
        let taxonomy_changed = self.taxonomy.refresh(current.taxonomy())?;
        if !index_changed && !taxonomy_changed {
            return Ok(false);
        }

        let next = SearcherAndTaxonomy {
            searcher: self.reader.searcher(),
            taxonomy: self.taxonomy.snapshot(),
            generation: current.generation + 1,
        };
        debug!(
            generation = next.generation,
            index_changed, taxonomy_changed, "refreshed searcher and taxonomy"
        );

        *self.current.write() = Arc::new(next);
        *last_commit = commit;
        Ok(true)
    }
}

impl fmt::Debug for SearcherTaxonomyManager {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearcherTaxonomyManager")
            .field("generation", &self.acquire().generation)
            .finish_non_exhaustive()
    }
}
