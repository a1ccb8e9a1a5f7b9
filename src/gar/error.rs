use crate::gar::kind::EntityKind;
use rocket_db_pools::sqlx;
use thiserror::Error;

/// Errors surfaced by the import pipeline.
///
/// Nothing inside the pipeline recovers from these; they travel up to the
/// orchestrator and out to its caller.
#[derive(Debug, Error)]
pub enum ImportError {
    #[error("schema provisioning failed while {context}: {source}")]
    Provisioning {
        context: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("reader initialization failed: {0}")]
    ReaderInitialization(String),
    #[error("failed to read {kind} batch: {message}")]
    Read { kind: EntityKind, message: String },
    #[error("bulk write into {table} failed: {source}")]
    Write {
        table: String,
        #[source]
        source: sqlx::Error,
    },
    #[error("import cancelled")]
    Cancelled,
}

impl ImportError {
    pub fn provisioning(context: impl Into<String>, source: sqlx::Error) -> Self {
        ImportError::Provisioning {
            context: context.into(),
            source,
        }
    }

    pub fn read(kind: EntityKind, message: impl Into<String>) -> Self {
        ImportError::Read {
            kind,
            message: message.into(),
        }
    }

    pub fn write(table: impl Into<String>, source: sqlx::Error) -> Self {
        ImportError::Write {
            table: table.into(),
            source,
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, ImportError::Cancelled)
    }
}
