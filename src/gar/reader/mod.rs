//! Batch-producing readers.
//!
//! The orchestrator depends only on [`BatchReader`]. [`GarXmlReader`] is the
//! implementation used in production; tests substitute in-memory readers.

mod files;
mod xml;

pub use files::{ArchiveLayout, MemberKind, MemberSource};
pub use xml::{DEFAULT_BATCH_SIZE, GarXmlReader, ReaderOptions};

use crate::gar::entities::EntityBatch;
use crate::gar::error::ImportError;
use crate::gar::kind::EntityKind;
use async_trait::async_trait;

/// Source of bounded record batches for each entity kind.
///
/// `initialize` must succeed before `can_read`/`read` are used. While
/// `can_read(kind)` is true, `read(kind)` returns a non-empty batch whose size
/// is bounded by the reader; repeated reads eventually exhaust the kind.
#[async_trait]
pub trait BatchReader: Send {
    async fn initialize(&mut self) -> Result<(), ImportError>;

    fn can_read(&self, kind: EntityKind) -> bool;

    async fn read(&mut self, kind: EntityKind) -> Result<EntityBatch, ImportError>;

    /// Release open files and parse buffers. Must tolerate repeated calls.
    fn release(&mut self);
}
