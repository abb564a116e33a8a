//! Lifecycle of the primary index and its taxonomy.
//!
//! [`IndexAccessManager`] creates every reader, writer and searcher
//! manager on first use and caches it until [`IndexAccessManager::close`].
//! Creation always establishes the index side before the taxonomy side,
//! and handles are released in the reverse dependency order.

use std::{
    path::{Path, PathBuf},
    sync::{Arc, OnceLock},
};

use parking_lot::{ReentrantMutex, RwLock};
use serde::{Deserialize, Serialize};
use tantivy::{
    Index,
    IndexReader,
    IndexWriter,
    ReloadPolicy,
    directory::MmapDirectory,
    schema::Schema,
};
use tracing::debug;

use crate::{
    data_dir::DataDir,
    error::{Error, Result},
    facets_config::FacetsConfig,
    query_factory::QueryFactory,
    schema::{self, IndexSchema},
    searcher_manager::{SearcherTaxonomyManager, TaxonomySource},
    session::{ReadSession, WriteSession},
    taxonomy::{self, TaxonomyReader, TaxonomyWriter},
};

/// Where an index lives.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum StorageLocation {
    Ram,
    Path(PathBuf),
}

/// Storage locations and writer budgets for one index pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct IndexConfig {
    pub index: StorageLocation,
    pub taxonomy: StorageLocation,
    /// Heap shared by the primary writer's indexing threads, in bytes.
    pub writer_memory_budget: usize,
    /// Heap of the single-threaded taxonomy writer, in bytes.
    pub taxonomy_memory_budget: usize,
}

impl IndexConfig {
    pub const DEFAULT_WRITER_MEMORY_BUDGET: usize = 50_000_000;
    pub const DEFAULT_TAXONOMY_MEMORY_BUDGET: usize = 15_000_000;
    /// Smallest budget a tantivy writer accepts.
    pub const MIN_MEMORY_BUDGET: usize = 15_000_000;

    pub fn new(index: &Path, taxonomy: &Path) -> Self {
        Self::with_locations(
            StorageLocation::Path(index.to_path_buf()),
            StorageLocation::Path(taxonomy.to_path_buf()),
        )
    }

    pub fn in_ram() -> Self {
        Self::with_locations(StorageLocation::Ram, StorageLocation::Ram)
    }

    pub fn from_data_dir(data_dir: &DataDir) -> Result<Self> {
        Ok(Self::new(&data_dir.index_dir()?, &data_dir.taxonomy_dir()?))
    }

    fn with_locations(
        index: StorageLocation,
        taxonomy: StorageLocation,
    ) -> Self {
        Self {
            index,
            taxonomy,
            writer_memory_budget: Self::DEFAULT_WRITER_MEMORY_BUDGET,
            taxonomy_memory_budget: Self::DEFAULT_TAXONOMY_MEMORY_BUDGET,
        }
    }
}

/// The primary index together with its resolved schema.
#[derive(Debug)]
pub(crate) struct IndexStorage {
    pub(crate) index: Index,
    pub(crate) schema: IndexSchema,
}

impl IndexStorage {
    pub(crate) fn query_factory(
        &self,
        facets: &Arc<FacetsConfig>,
    ) -> QueryFactory {
        QueryFactory::new(
            self.schema.clone(),
            Arc::clone(facets),
            self.index.tokenizers().clone(),
        )
    }
}

/// Owns the handles of one primary index and its taxonomy.
///
/// Fields are declared in close order, so dropping the manager releases
/// handles in the same order as [`IndexAccessManager::close`].
pub struct IndexAccessManager {
    write_backed_manager: OnceLock<SearcherTaxonomyManager>,
    read_manager: OnceLock<SearcherTaxonomyManager>,
    taxonomy_writer: OnceLock<Arc<TaxonomyWriter>>,
    index_writer: OnceLock<RwLock<IndexWriter>>,
    taxonomy_reader: OnceLock<Arc<TaxonomyReader>>,
    index_reader: OnceLock<IndexReader>,
    taxonomy_storage: OnceLock<Index>,
    index_storage: OnceLock<IndexStorage>,

    creation: ReentrantMutex<()>,
    config: IndexConfig,
    schema: Schema,
    facets: Arc<FacetsConfig>,
}

impl IndexAccessManager {
    /// Prepares a manager. Nothing is opened until a session asks for it.
    ///
    /// `schema` holds the caller's fields; the reserved facet fields are
    /// appended when a new index is created.
    pub fn open(
        config: IndexConfig,
        schema: Schema,
        facets: FacetsConfig,
    ) -> Result<Self> {
        facets.validate()?;
        IndexSchema::extend(&schema)?;
        check_budget("index writer", config.writer_memory_budget)?;
        check_budget("taxonomy", config.taxonomy_memory_budget)?;

        Ok(Self {
            write_backed_manager: OnceLock::new(),
            read_manager: OnceLock::new(),
            taxonomy_writer: OnceLock::new(),
            index_writer: OnceLock::new(),
            taxonomy_reader: OnceLock::new(),
            index_reader: OnceLock::new(),
            taxonomy_storage: OnceLock::new(),
            index_storage: OnceLock::new(),
            creation: ReentrantMutex::new(()),
            config,
            schema,
            facets: Arc::new(facets),
        })
    }

    pub fn config(&self) -> &IndexConfig {
        &self.config
    }

    pub fn facets_config(&self) -> &Arc<FacetsConfig> {
        &self.facets
    }

    /// A session over committed data, refreshed by
    /// [`IndexAccessManager::refresh`].
    pub fn open_read_session(&self) -> Result<ReadSession<'_>> {
        let manager = self.get_or_create(&self.read_manager, || {
            let reader = self.index_reader()?.clone();
            let taxonomy = Arc::clone(self.taxonomy_reader()?);
            let manager = SearcherTaxonomyManager::new(
                self.index_storage()?.index.clone(),
                reader,
                TaxonomySource::Reader(taxonomy),
            )?;
            debug!("created read-only searcher manager");
            Ok(manager)
        })?;
        Ok(ReadSession::new(manager, self.index_storage()?, &self.facets))
    }

    /// A session layered over the writer pair. Categories registered by
    /// writers are visible at once; documents after a commit and a
    /// refresh.
    pub fn open_write_backed_read_session(&self) -> Result<ReadSession<'_>> {
        let manager = self.get_or_create(&self.write_backed_manager, || {
            self.index_writer()?;
            let taxonomy = Arc::clone(self.taxonomy_writer()?);
            let index = self.index_storage()?.index.clone();
            let reader = manual_reader(&index)?;
            let manager = SearcherTaxonomyManager::new(
                index,
                reader,
                TaxonomySource::Writer(taxonomy),
            )?;
            debug!("created write-backed searcher manager");
            Ok(manager)
        })?;
        Ok(ReadSession::new(manager, self.index_storage()?, &self.facets))
    }

    pub fn open_write_session(&self) -> Result<WriteSession<'_>> {
        let writer = self.index_writer()?;
        let taxonomy = self.taxonomy_writer()?;
        Ok(WriteSession::new(
            writer,
            taxonomy,
            self.taxonomy_storage()?,
            self.index_storage()?,
            &self.facets,
        ))
    }

    pub fn query_factory(&self) -> Result<QueryFactory> {
        Ok(self.index_storage()?.query_factory(&self.facets))
    }

    /// Lets every searcher manager created so far adopt newer commits.
    /// Managers that do not exist yet are skipped.
    pub fn refresh(&self) -> Result<()> {
        if let Some(manager) = self.read_manager.get() {
            manager.maybe_refresh()?;
        }
        if let Some(manager) = self.write_backed_manager.get() {
            manager.maybe_refresh()?;
        }
        Ok(())
    }

    /// Releases every handle created so far.
    ///
    /// Uncommitted changes are discarded. A failing handle does not stop
    /// the others from being released; all failures are reported together.
    pub fn close(self) -> Result<()> {
        let Self {
            write_backed_manager,
            read_manager,
            taxonomy_writer,
            index_writer,
            taxonomy_reader,
            index_reader,
            taxonomy_storage,
            index_storage,
            ..
        } = self;
        let mut errors = Vec::new();

        drop(release(write_backed_manager, "write-backed searcher manager"));
        drop(release(read_manager, "read-only searcher manager"));

        if let Some(writer) = release(taxonomy_writer, "taxonomy writer") {
            match Arc::try_unwrap(writer) {
                Ok(writer) => {
                    if let Err(e) = writer.close() {
                        errors.push(e);
                    }
                }
                Err(_) => debug!("taxonomy writer still shared, dropping"),
            }
        }
        if let Some(writer) = release(index_writer, "index writer") {
            if let Err(e) = writer.into_inner().wait_merging_threads() {
                errors.push(e.into());
            }
        }

        drop(release(taxonomy_reader, "taxonomy reader"));
        drop(release(index_reader, "index reader"));
        drop(release(taxonomy_storage, "taxonomy storage"));
        drop(release(index_storage, "index storage"));

        if errors.is_empty() {
            Ok(())
        } else {
            Err(Error::Close(errors))
        }
    }

    fn index_storage(&self) -> Result<&IndexStorage> {
        self.get_or_create(&self.index_storage, || {
            let index = open_storage(
                &self.config.index,
                IndexSchema::extend(&self.schema)?.schema().clone(),
            )?;
            let schema = IndexSchema::resolve(index.schema())?;
            schema::register_tokenizers(&index);
            debug!(location = ?self.config.index, "opened index storage");
            Ok(IndexStorage { index, schema })
        })
    }

    fn taxonomy_storage(&self) -> Result<&Index> {
        self.get_or_create(&self.taxonomy_storage, || {
            let index =
                open_storage(&self.config.taxonomy, taxonomy::build_schema())?;
            debug!(location = ?self.config.taxonomy, "opened taxonomy storage");
            Ok(index)
        })
    }

    fn index_reader(&self) -> Result<&IndexReader> {
        self.get_or_create(&self.index_reader, || {
            let reader = manual_reader(&self.index_storage()?.index)?;
            debug!("opened index reader");
            Ok(reader)
        })
    }

    fn taxonomy_reader(&self) -> Result<&Arc<TaxonomyReader>> {
        self.get_or_create(&self.taxonomy_reader, || {
            // The index reader has to exist first.
            self.index_reader()?;
            let reader = TaxonomyReader::open(self.taxonomy_storage()?)?;
            Ok(Arc::new(reader))
        })
    }

    fn index_writer(&self) -> Result<&RwLock<IndexWriter>> {
        self.get_or_create(&self.index_writer, || {
            let writer = self
                .index_storage()?
                .index
                .writer(self.config.writer_memory_budget)?;
            debug!(
                budget = self.config.writer_memory_budget,
                "opened index writer"
            );
            Ok(RwLock::new(writer))
        })
    }

    fn taxonomy_writer(&self) -> Result<&Arc<TaxonomyWriter>> {
        self.get_or_create(&self.taxonomy_writer, || {
            // The index writer has to exist first.
            self.index_writer()?;
            let writer = TaxonomyWriter::open(
                self.taxonomy_storage()?,
                self.config.taxonomy_memory_budget,
            )?;
            Ok(Arc::new(writer))
        })
    }

    /// Returns the cached handle, creating it under the creation lock if
    /// needed. A failed creation leaves the cell empty.
    fn get_or_create<'a, T>(
        &'a self,
        cell: &'a OnceLock<T>,
        create: impl FnOnce() -> Result<T>,
    ) -> Result<&'a T> {
        if let Some(value) = cell.get() {
            return Ok(value);
        }
        let _guard = self.creation.lock();
        if let Some(value) = cell.get() {
            return Ok(value);
        }
        let value = create()?;
        Ok(cell.get_or_init(|| value))
    }
}

impl std::fmt::Debug for IndexAccessManager {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("IndexAccessManager")
            .field("config", &self.config)
            .field("read_manager", &self.read_manager.get().is_some())
            .field(
                "write_backed_manager",
                &self.write_backed_manager.get().is_some(),
            )
            .field("index_writer", &self.index_writer.get().is_some())
            .finish_non_exhaustive()
    }
}

fn release<T>(cell: OnceLock<T>, handle: &str) -> Option<T> {
    let value = cell.into_inner();
    if value.is_some() {
        debug!(handle, "closing");
    }
    value
}

fn check_budget(writer: &str, budget: usize) -> Result<()> {
    if budget < IndexConfig::MIN_MEMORY_BUDGET {
        return Err(Error::Config(format!(
            "{writer} memory budget of {budget} bytes is below the \
             {} byte minimum",
            IndexConfig::MIN_MEMORY_BUDGET
        )));
    }
    Ok(())
}

fn manual_reader(index: &Index) -> Result<IndexReader> {
    Ok(index
        .reader_builder()
        .reload_policy(ReloadPolicy::Manual)
        .try_into()?)
}

/// Opens the index at `location`, creating it with `schema` if needed.
fn open_storage(location: &StorageLocation, schema: Schema) -> Result<Index> {
    let dir = match location {
        StorageLocation::Ram => return Ok(Index::create_in_ram(schema)),
        StorageLocation::Path(dir) => dir,
    };

    std::fs::create_dir_all(dir)?;
    let mmap_dir = MmapDirectory::open(dir)
        .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?;
    let index = if Index::exists(&mmap_dir)
        .map_err(|e| tantivy::TantivyError::SystemError(e.to_string()))?
    {
        Index::open(mmap_dir)?
    } else {
        Index::create(mmap_dir, schema, tantivy::IndexSettings::default())?
    };
    Ok(index)
}
