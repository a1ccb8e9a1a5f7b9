//! GAR bulk import pipeline.
//!
//! The pipeline has four parts:
//!
//! - [`schema::SchemaInitializer`] provisions the database, schema and tables.
//! - a [`reader::BatchReader`] yields bounded batches per [`EntityKind`].
//! - a [`writer::BatchWriter`] bulk-copies each batch into PostgreSQL.
//! - [`orchestrator::ImportOrchestrator`] drains every kind in
//!   [`EntityKind::IMPORT_ORDER`], one batch at a time.
//!
//! [`run_import`] wires the production reader and writer from an
//! [`ImportConfig`]; the HTTP layer and the CLI both go through it.

pub mod config;
pub mod entities;
pub mod error;
pub mod jobs;
pub mod kind;
pub mod mapping;
pub mod orchestrator;
pub mod reader;
pub mod schema;
pub mod stats;
pub mod writer;

pub use config::ImportConfig;
pub use entities::EntityBatch;
pub use error::ImportError;
pub use jobs::ImportJobManager;
pub use kind::EntityKind;
pub use mapping::FieldMappings;
pub use orchestrator::{ImportObserver, ImportOrchestrator, ImportState, NoopObserver};
pub use reader::{BatchReader, GarXmlReader};
pub use schema::SchemaInitializer;
pub use stats::{ImportReport, KindStats};
pub use writer::{BatchWriter, BulkWriter};

use rocket_db_pools::sqlx::PgPool;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

/// Import the export at `config.data_path` into `pool`.
///
/// Tables must already exist; see [`SchemaInitializer::ensure_created`].
pub async fn run_import(
    pool: PgPool,
    config: &ImportConfig,
    observer: Arc<dyn ImportObserver>,
    cancel: &CancellationToken,
) -> Result<ImportReport, ImportError> {
    log::info!(
        "starting import from {} into schema {} (batch size {})",
        config.data_path.display(),
        config.schema,
        config.batch_size
    );

    let reader = GarXmlReader::new(config.data_path.clone(), config.reader_options());
    let writer = BulkWriter::new(pool).with_chunk_bytes(config.copy_chunk_bytes);
    let mappings = FieldMappings::new(&config.schema);

    let mut orchestrator =
        ImportOrchestrator::new(reader, writer, mappings).with_observer(observer);
    orchestrator.run(cancel).await
}
