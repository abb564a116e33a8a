use rayon::prelude::*;
use tantivy::{Index, Opstamp};
use tracing::{debug, trace};

use crate::{document::Document, error::Result, session::WriteSession};

/// Commit payload marking an index initialized while still empty.
const INITIALIZED: &str = "initialized";

/// Opstamps of the four steps of a commit, in execution order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct CommitStamps {
    pub taxonomy_prepared: Opstamp,
    pub index_prepared: Opstamp,
    pub taxonomy_committed: Opstamp,
    pub index_committed: Opstamp,
}

/// Write operations over a [`WriteSession`].
///
/// Ingestion may run concurrently. Commits, merges and purges take the
/// index writer exclusively and therefore never interleave with each
/// other or with an ingestion in flight.
#[derive(Debug, Clone, Copy)]
pub struct WriteToolbox<'a> {
    session: WriteSession<'a>,
}

impl<'a> WriteToolbox<'a> {
    pub fn new(session: WriteSession<'a>) -> Self {
        Self { session }
    }

    pub fn session(&self) -> &WriteSession<'a> {
        &self.session
    }

    /// Registers the document's facets and hands it to the index writer.
    /// Returns its opstamp. Duplicates are not detected.
    pub fn ingest(&self, document: &Document) -> Result<u64> {
        self.session.write_single_document(|ctx| {
            let writer = ctx.index_writer();
            let doc = ctx.facets_config().build(
                document,
                ctx.schema(),
                ctx.taxonomy_writer(),
            )?;
            let opstamp = writer.add_document(doc)?;
            trace!(opstamp, "ingested document");
            Ok(opstamp)
        })
    }

    /// Ingests a batch. Documents are validated in parallel before any of
    /// their categories is registered, then added in order. Nothing is
    /// added or registered if any document is rejected.
    pub fn ingest_all(&self, documents: &[Document]) -> Result<Vec<u64>> {
        self.session.write(|ctx| {
            let prepared = documents
                .par_iter()
                .map(|document| {
                    ctx.facets_config().prepare(document, ctx.schema())
                })
                .collect::<Result<Vec<_>>>()?;

            let writer = ctx.index_writer();
            let built = prepared
                .into_iter()
                .map(|doc| doc.register(ctx.schema(), ctx.taxonomy_writer()))
                .collect::<Result<Vec<_>>>()?;

            let mut opstamps = Vec::with_capacity(built.len());
            for doc in built {
                opstamps.push(writer.add_document(doc)?);
            }
            trace!(count = opstamps.len(), "ingested batch");
            Ok(opstamps)
        })
    }

    /// Makes everything written so far durable.
    ///
    /// Each phase handles the taxonomy before the index, so no committed
    /// document can reference a category that is not committed yet.
    pub fn commit(&self) -> Result<CommitStamps> {
        self.session.write(|ctx| {
            let mut index_writer = ctx.index_writer_mut();
            let mut taxonomy_writer = ctx.taxonomy_writer().lock_writer();

            let taxonomy_commit = taxonomy_writer.prepare_commit()?;
            let taxonomy_prepared = taxonomy_commit.opstamp();
            let index_commit = index_writer.prepare_commit()?;
            let index_prepared = index_commit.opstamp();

            let taxonomy_committed = taxonomy_commit.commit()?;
            let index_committed = index_commit.commit()?;

            trace!(taxonomy_committed, index_committed, "committed");
            Ok(CommitStamps {
                taxonomy_prepared,
                index_prepared,
                taxonomy_committed,
                index_committed,
            })
        })
    }

    /// Commits the empty taxonomy and then the empty index if neither has
    /// been committed before. Returns whether it did.
    pub fn initialize_index(&self) -> Result<bool> {
        self.session.write(|ctx| {
            let mut index_writer = ctx.index_writer_mut();
            let mut taxonomy_writer = ctx.taxonomy_writer().lock_writer();
            if !never_committed(ctx.taxonomy_index())?
                || !never_committed(ctx.index())?
            {
                return Ok(false);
            }

            let mut taxonomy_commit = taxonomy_writer.prepare_commit()?;
            taxonomy_commit.set_payload(INITIALIZED);
            taxonomy_commit.commit()?;

            let mut index_commit = index_writer.prepare_commit()?;
            index_commit.set_payload(INITIALIZED);
            index_commit.commit()?;

            debug!("initialized empty index");
            Ok(true)
        })
    }

    /// Merges every committed segment into one. Returns whether there was
    /// anything to merge.
    pub fn merge(&self) -> Result<bool> {
        self.session.write(|ctx| {
            let mut writer = ctx.index_writer_mut();
            let segments = ctx.index().searchable_segment_ids()?;
            if segments.len() < 2 {
                return Ok(false);
            }
            writer.merge(&segments).wait()?;
            trace!(segments = segments.len(), "merged segments");
            Ok(true)
        })
    }

    /// Deletes every document. Takes effect with the next commit.
    pub fn purge(&self) -> Result<u64> {
        self.session.write(|ctx| {
            let opstamp = ctx.index_writer_mut().delete_all_documents()?;
            trace!(opstamp, "purged index");
            Ok(opstamp)
        })
    }
}

fn never_committed(index: &Index) -> Result<bool> {
    let metas = index.load_metas()?;
    Ok(metas.segments.is_empty() && metas.payload.is_none())
}
