//! Bulk writer backed by PostgreSQL `COPY ... FROM STDIN`.
//!
//! Each batch is one copy round trip. Rows are encoded into a text buffer
//! and streamed in chunks of `chunk_bytes`; cancellation is checked before
//! the copy starts and between chunks, and a cancelled copy is aborted so
//! the server discards the partial batch.

use crate::gar::entities::EntityBatch;
use crate::gar::error::ImportError;
use crate::gar::mapping::{KindMapping, TableMapping};
use async_trait::async_trait;
use rocket_db_pools::sqlx::PgPool;
use tokio_util::sync::CancellationToken;

pub const DEFAULT_COPY_CHUNK_BYTES: usize = 1024 * 1024;

/// Sink for batches; the orchestrator only sees this seam.
#[async_trait]
pub trait BatchWriter: Send + Sync {
    /// Persist one batch through `mapping` and return the number of rows
    /// written.
    async fn write(
        &self,
        mapping: KindMapping<'_>,
        batch: &EntityBatch,
        cancel: &CancellationToken,
    ) -> Result<u64, ImportError>;
}

pub struct BulkWriter {
    pool: PgPool,
    chunk_bytes: usize,
}

impl BulkWriter {
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            chunk_bytes: DEFAULT_COPY_CHUNK_BYTES,
        }
    }

    pub fn with_chunk_bytes(mut self, chunk_bytes: usize) -> Self {
        self.chunk_bytes = chunk_bytes.max(1);
        self
    }

    /// Copy `batch` into the table described by `mapping`.
    pub async fn import<T: Sync>(
        &self,
        mapping: &TableMapping<T>,
        batch: &[T],
        cancel: &CancellationToken,
    ) -> Result<u64, ImportError> {
        if cancel.is_cancelled() {
            return Err(ImportError::Cancelled);
        }
        if batch.is_empty() {
            return Ok(0);
        }

        let table = mapping.qualified_table();
        let write_err = |e| ImportError::write(table.clone(), e);

        let mut conn = self.pool.acquire().await.map_err(write_err)?;
        let mut copy = conn
            .copy_in_raw(&mapping.copy_statement())
            .await
            .map_err(write_err)?;

        let mut buffer = String::with_capacity(self.chunk_bytes + 256);
        for row in batch {
            mapping.encode_row(row, &mut buffer);

            if buffer.len() >= self.chunk_bytes {
                if cancel.is_cancelled() {
                    if let Err(e) = copy.abort("import cancelled").await {
                        log::debug!("aborting copy into {} reported: {}", table, e);
                    }
                    return Err(ImportError::Cancelled);
                }
                copy.send(buffer.as_bytes()).await.map_err(write_err)?;
                buffer.clear();
            }
        }

        if cancel.is_cancelled() {
            if let Err(e) = copy.abort("import cancelled").await {
                log::debug!("aborting copy into {} reported: {}", table, e);
            }
            return Err(ImportError::Cancelled);
        }

        if !buffer.is_empty() {
            copy.send(buffer.as_bytes()).await.map_err(write_err)?;
        }

        let rows = copy.finish().await.map_err(write_err)?;

        if rows != batch.len() as u64 {
            log::warn!(
                "copy into {} wrote {} rows for a batch of {}",
                table,
                rows,
                batch.len()
            );
        }

        log::trace!("bulk copied {} rows into {}", rows, table);
        Ok(rows)
    }
}

#[async_trait]
impl BatchWriter for BulkWriter {
    async fn write(
        &self,
        mapping: KindMapping<'_>,
        batch: &EntityBatch,
        cancel: &CancellationToken,
    ) -> Result<u64, ImportError> {
        match (mapping, batch) {
            (KindMapping::Addresses(m), EntityBatch::Addresses(rows)) => {
                self.import(m, rows, cancel).await
            }
            (KindMapping::Apartments(m), EntityBatch::Apartments(rows)) => {
                self.import(m, rows, cancel).await
            }
            (KindMapping::Hierarchies(m), EntityBatch::Hierarchies(rows)) => {
                self.import(m, rows, cancel).await
            }
            (KindMapping::Houses(m), EntityBatch::Houses(rows)) => self.import(m, rows, cancel).await,
            (KindMapping::Rooms(m), EntityBatch::Rooms(rows)) => self.import(m, rows, cancel).await,
            (KindMapping::Steads(m), EntityBatch::Steads(rows)) => self.import(m, rows, cancel).await,
            (mapping, batch) => Err(ImportError::read(
                batch.kind(),
                format!("{} batch handed to the {} mapping", batch.kind(), mapping.kind()),
            )),
        }
    }
}
