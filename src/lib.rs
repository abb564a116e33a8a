//! facetdrill - faceted drill-down search over a tantivy index.
//!
//! facetdrill keeps a primary
//! [Tantivy](https://github.com/quickwit-oss/tantivy) index next to a
//! taxonomy index of facet categories and manages the readers and writers
//! of both. On top of that it composes drill-down queries from
//! per-dimension selections, including selections of documents with no
//! value at all.
//!
//! # Quick start
//!
//! ```no_run
//! use facetdrill::{
//!     DataDir, Document, FacetsConfig, IndexAccessManager, IndexConfig,
//!     ReadToolbox, WriteToolbox,
//! };
//! use facetdrill::navigation::{FacetTree, NavigationFetcher};
//! use tantivy::schema::{Schema, STORED, STRING};
//!
//! let data_dir = DataDir::resolve(None).unwrap();
//! let mut builder = Schema::builder();
//! builder.add_text_field("name", STRING | STORED);
//! let mut facets = FacetsConfig::new().with_presence_field("used").unwrap();
//! facets.set_multi_valued("category", true);
//!
//! let manager = IndexAccessManager::open(
//!     IndexConfig::from_data_dir(&data_dir).unwrap(),
//!     builder.build(),
//!     facets,
//! )
//! .unwrap();
//!
//! let writes = WriteToolbox::new(manager.open_write_session().unwrap());
//! let car = Document::new()
//!     .text("name", "car")
//!     .facet("category", "mobility");
//! writes.ingest(&car).unwrap();
//! writes.commit().unwrap();
//! manager.refresh().unwrap();
//!
//! let reads = ReadToolbox::new(manager.open_read_session().unwrap());
//! let factory = reads.query_factory();
//! let base = factory.parse("car", &["name"]).unwrap();
//! let tree = FacetTree::new(factory, base).unwrap();
//! let root = tree.create_root("category").unwrap();
//!
//! let fetcher = NavigationFetcher::new(&reads);
//! if let Some(facet) = fetcher.get_facet(&root, 10).unwrap() {
//!     for lv in &facet.label_values {
//!         println!("{} ({})", lv.label, lv.value);
//!     }
//! }
//! ```

pub mod data_dir;
pub mod demotion;
pub mod document;
pub mod error;
pub mod facet_counts;
pub mod facets_config;
pub mod index_manager;
pub mod navigation;
pub mod query_factory;
pub mod read_toolbox;
pub mod schema;
pub mod score_multiplier;
pub mod searcher_manager;
pub mod session;
pub mod taxonomy;
pub mod term_conjunction;
pub mod write_toolbox;

pub use data_dir::DataDir;
pub use demotion::{DemotedTerm, DemotionLoader};
pub use document::{Document, FieldValue, StoredDocument, StoredValue};
pub use error::{Error, ErrorKind, Result};
pub use facet_counts::{FacetCounts, FacetResult, LabelAndValue};
pub use facets_config::{DimConfig, FacetsConfig};
pub use index_manager::{IndexAccessManager, IndexConfig, StorageLocation};
pub use query_factory::{FieldTerm, QueryFactory};
pub use read_toolbox::{ReadRequest, ReadToolbox, ScoreDoc, SearchPage};
pub use session::{ReadContext, ReadSession, WriteContext, WriteSession};
pub use term_conjunction::{Conjunction, Selection, TermConjunction};
pub use write_toolbox::{CommitStamps, WriteToolbox};
