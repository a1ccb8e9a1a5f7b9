//! Import orchestration.
//!
//! Drives one import run: initialize the reader, then drain every entity kind
//! in [`EntityKind::IMPORT_ORDER`] through the writer, one batch at a time.
//! Kinds never overlap and batches never overlap within a kind, so a run has
//! at most one batch in memory besides the reader's look-ahead.
//!
//! Errors are not retried. The first failure stops the run; kinds that were
//! already drained stay committed.

use crate::gar::error::ImportError;
use crate::gar::kind::EntityKind;
use crate::gar::mapping::{FieldMappings, KindMapping};
use crate::gar::reader::BatchReader;
use crate::gar::stats::{ImportReport, KindStats};
use crate::gar::writer::BatchWriter;
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::Serialize;
use std::sync::Arc;
use std::time::Instant;
use tokio_util::sync::CancellationToken;

/// Position of a run in its lifecycle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, JsonSchema)]
#[serde(tag = "phase", content = "kind", rename_all = "camelCase")]
pub enum ImportState {
    NotStarted,
    ReaderInitializing,
    Importing(EntityKind),
    Completed,
    Failed,
    Cancelled,
}

impl ImportState {
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ImportState::Completed | ImportState::Failed | ImportState::Cancelled
        )
    }
}

/// Progress hooks invoked synchronously from the import loop.
pub trait ImportObserver: Send + Sync {
    fn state_changed(&self, _state: ImportState) {}

    fn batch_written(&self, _kind: EntityKind, _rows: u64) {}

    fn kind_completed(&self, _stats: &KindStats) {}
}

/// Observer that ignores every event; logging still happens in the loop.
pub struct NoopObserver;

impl ImportObserver for NoopObserver {}

pub struct ImportOrchestrator<R: BatchReader, W: BatchWriter> {
    reader: R,
    writer: W,
    mappings: Arc<FieldMappings>,
    observer: Arc<dyn ImportObserver>,
    state: ImportState,
    released: bool,
}

impl<R: BatchReader, W: BatchWriter> ImportOrchestrator<R, W> {
    pub fn new(reader: R, writer: W, mappings: FieldMappings) -> Self {
        Self {
            reader,
            writer,
            mappings: Arc::new(mappings),
            observer: Arc::new(NoopObserver),
            state: ImportState::NotStarted,
            released: false,
        }
    }

    pub fn with_observer(mut self, observer: Arc<dyn ImportObserver>) -> Self {
        self.observer = observer;
        self
    }

    pub fn state(&self) -> ImportState {
        self.state
    }

    /// Run the import to completion.
    ///
    /// The reader is released before this returns, whatever the outcome.
    /// A second call is rejected: a reader can only be drained once.
    pub async fn run(&mut self, cancel: &CancellationToken) -> Result<ImportReport, ImportError> {
        if self.state != ImportState::NotStarted {
            return Err(ImportError::ReaderInitialization(
                "import run was already started".to_string(),
            ));
        }

        let result = self.execute(cancel).await;
        self.release();

        match &result {
            Ok(report) => {
                log::info!(
                    "data transfer has ended in {}ms ({} rows)",
                    report.elapsed_ms,
                    report.total_rows()
                );
                self.transition(ImportState::Completed);
            }
            Err(ImportError::Cancelled) => {
                log::warn!("import cancelled while {:?}", self.state);
                self.transition(ImportState::Cancelled);
            }
            Err(e) => {
                log::error!("import failed while {:?}: {}", self.state, e);
                self.transition(ImportState::Failed);
            }
        }

        result
    }

    async fn execute(&mut self, cancel: &CancellationToken) -> Result<ImportReport, ImportError> {
        if cancel.is_cancelled() {
            return Err(ImportError::Cancelled);
        }

        self.transition(ImportState::ReaderInitializing);
        self.reader.initialize().await?;

        let started = Instant::now();
        let mut report = ImportReport::default();

        let mappings = Arc::clone(&self.mappings);
        for mapping in mappings.in_import_order() {
            self.transition(ImportState::Importing(mapping.kind()));
            let stats = self.drain(mapping, cancel).await?;
            report.push(stats);
        }

        report.elapsed_ms = started.elapsed().as_millis() as u64;
        Ok(report)
    }

    /// Pull batches of the mapping's kind until the reader runs dry.
    async fn drain(
        &mut self,
        mapping: KindMapping<'_>,
        cancel: &CancellationToken,
    ) -> Result<KindStats, ImportError> {
        let kind = mapping.kind();
        let started = Instant::now();
        let mut stats = KindStats::new(kind);

        while self.reader.can_read(kind) {
            if cancel.is_cancelled() {
                log::warn!(
                    "{}: cancellation observed after {} rows in {} batches",
                    kind,
                    stats.rows,
                    stats.batches
                );
                return Err(ImportError::Cancelled);
            }

            let batch = self.reader.read(kind).await?;
            if batch.kind() != kind {
                return Err(ImportError::read(
                    kind,
                    format!("reader returned a {} batch", batch.kind()),
                ));
            }
            if batch.is_empty() {
                return Err(ImportError::read(
                    kind,
                    "reader returned an empty batch while reporting more records",
                ));
            }

            let saved = self.writer.write(mapping, &batch, cancel).await.inspect_err(|e| {
                log::error!(
                    "{}: batch {} failed after {} rows: {}",
                    kind,
                    stats.batches + 1,
                    stats.rows,
                    e
                );
            })?;

            log::info!("{} saved from bucket: {}", kind, saved);
            stats.record_batch(saved);
            self.observer.batch_written(kind, saved);
        }

        stats.finish(started.elapsed());
        log::info!("{} copying has ended in {}ms", kind, stats.elapsed_ms);
        self.observer.kind_completed(&stats);
        Ok(stats)
    }

    fn transition(&mut self, state: ImportState) {
        log::debug!("import state {:?} -> {:?}", self.state, state);
        self.state = state;
        self.observer.state_changed(state);
    }

    /// Release the reader's resources. Only the first call has an effect.
    pub fn release(&mut self) {
        if self.released {
            return;
        }
        self.released = true;
        self.reader.release();
    }
}

impl<R: BatchReader, W: BatchWriter> Drop for ImportOrchestrator<R, W> {
    fn drop(&mut self) {
        self.release();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::gar::entities::EntityBatch;
    use async_trait::async_trait;
    use parking_lot::Mutex;
    use std::collections::{HashMap, VecDeque};

    fn mappings() -> FieldMappings {
        FieldMappings::new("public")
    }

    #[derive(Debug, Clone, PartialEq, Eq)]
    enum Call {
        Init,
        Read(EntityKind),
        Write(EntityKind, usize),
        Release,
    }

    type CallLog = Arc<Mutex<Vec<Call>>>;

    struct FakeReader {
        batches: HashMap<EntityKind, VecDeque<EntityBatch>>,
        log: CallLog,
        fail_init: bool,
    }

    impl FakeReader {
        fn new(log: CallLog) -> Self {
            Self {
                batches: HashMap::new(),
                log,
                fail_init: false,
            }
        }

        fn with_batches(mut self, kind: EntityKind, sizes: &[usize]) -> Self {
            let mut next_id = 1;
            let queue = self.batches.entry(kind).or_default();
            for &size in sizes {
                let mut batch = EntityBatch::empty(kind, size);
                for _ in 0..size {
                    batch.push(next_id, format!("{kind} {next_id}"));
                    next_id += 1;
                }
                queue.push_back(batch);
            }
            self
        }
    }

    #[async_trait]
    impl BatchReader for FakeReader {
        async fn initialize(&mut self) -> Result<(), ImportError> {
            self.log.lock().push(Call::Init);
            if self.fail_init {
                return Err(ImportError::ReaderInitialization("archive missing".into()));
            }
            Ok(())
        }

        fn can_read(&self, kind: EntityKind) -> bool {
            self.batches.get(&kind).map(|q| !q.is_empty()).unwrap_or(false)
        }

        async fn read(&mut self, kind: EntityKind) -> Result<EntityBatch, ImportError> {
            self.log.lock().push(Call::Read(kind));
            self.batches
                .get_mut(&kind)
                .and_then(VecDeque::pop_front)
                .ok_or_else(|| ImportError::read(kind, "exhausted"))
        }

        fn release(&mut self) {
            self.log.lock().push(Call::Release);
        }
    }

    struct FakeWriter {
        log: CallLog,
        fail_on: Option<(EntityKind, usize)>,
        cancel_after_writes: Option<(usize, CancellationToken)>,
        statements: Mutex<Vec<String>>,
    }

    impl FakeWriter {
        fn new(log: CallLog) -> Self {
            Self {
                log,
                fail_on: None,
                cancel_after_writes: None,
                statements: Mutex::default(),
            }
        }

        fn writes(&self) -> usize {
            self.log
                .lock()
                .iter()
                .filter(|c| matches!(c, Call::Write(..)))
                .count()
        }
    }

    #[async_trait]
    impl BatchWriter for FakeWriter {
        async fn write(
            &self,
            mapping: KindMapping<'_>,
            batch: &EntityBatch,
            cancel: &CancellationToken,
        ) -> Result<u64, ImportError> {
            if cancel.is_cancelled() {
                return Err(ImportError::Cancelled);
            }
            let kind = batch.kind();
            assert_eq!(mapping.kind(), kind, "mapping paired with the wrong batch");
            self.statements.lock().push(mapping.copy_statement());
            let index = self
                .log
                .lock()
                .iter()
                .filter(|c| matches!(c, Call::Write(k, _) if *k == kind))
                .count();
            if self.fail_on == Some((kind, index)) {
                return Err(ImportError::write(
                    kind.table_name(),
                    sqlx::Error::Protocol("rejected".into()),
                ));
            }
            self.log.lock().push(Call::Write(kind, batch.len()));
            if let Some((after, token)) = &self.cancel_after_writes {
                if self.writes() == *after {
                    token.cancel();
                }
            }
            Ok(batch.len() as u64)
        }
    }

    #[derive(Default)]
    struct RecordingObserver {
        states: Mutex<Vec<ImportState>>,
        batches: Mutex<Vec<(EntityKind, u64)>>,
    }

    impl ImportObserver for RecordingObserver {
        fn state_changed(&self, state: ImportState) {
            self.states.lock().push(state);
        }

        fn batch_written(&self, kind: EntityKind, rows: u64) {
            self.batches.lock().push((kind, rows));
        }
    }

    #[tokio::test]
    async fn drains_kinds_in_fixed_order() {
        let log = CallLog::default();
        let reader = FakeReader::new(log.clone())
            .with_batches(EntityKind::Steads, &[1])
            .with_batches(EntityKind::Houses, &[2, 2])
            .with_batches(EntityKind::Addresses, &[3, 3])
            .with_batches(EntityKind::Hierarchies, &[4]);
        let writer = FakeWriter::new(log.clone());

        let mut orchestrator = ImportOrchestrator::new(reader, writer, mappings());
        let report = orchestrator
            .run(&CancellationToken::new())
            .await
            .expect("import succeeds");

        assert_eq!(orchestrator.state(), ImportState::Completed);
        assert_eq!(report.total_rows(), 15);
        assert_eq!(report.rows_for(EntityKind::Addresses), 6);
        assert_eq!(report.kinds.len(), 6);
        assert_eq!(
            report.kinds.iter().map(|k| k.kind).collect::<Vec<_>>(),
            EntityKind::IMPORT_ORDER.to_vec()
        );

        let calls = log.lock().clone();
        assert_eq!(
            calls,
            vec![
                Call::Init,
                Call::Read(EntityKind::Addresses),
                Call::Write(EntityKind::Addresses, 3),
                Call::Read(EntityKind::Addresses),
                Call::Write(EntityKind::Addresses, 3),
                Call::Read(EntityKind::Hierarchies),
                Call::Write(EntityKind::Hierarchies, 4),
                Call::Read(EntityKind::Houses),
                Call::Write(EntityKind::Houses, 2),
                Call::Read(EntityKind::Houses),
                Call::Write(EntityKind::Houses, 2),
                Call::Read(EntityKind::Steads),
                Call::Write(EntityKind::Steads, 1),
                Call::Release,
            ]
        );
    }

    #[tokio::test]
    async fn writer_receives_each_kinds_mapping() {
        let log = CallLog::default();
        let reader = FakeReader::new(log.clone())
            .with_batches(EntityKind::Rooms, &[1])
            .with_batches(EntityKind::Addresses, &[2, 1]);

        let mut orchestrator =
            ImportOrchestrator::new(reader, FakeWriter::new(log.clone()), FieldMappings::new("gar"));
        orchestrator.run(&CancellationToken::new()).await.unwrap();

        assert_eq!(
            orchestrator.writer.statements.lock().clone(),
            vec![
                r#"COPY "gar"."AddressObject" ("ObjectId", "FullName") FROM STDIN"#.to_string(),
                r#"COPY "gar"."AddressObject" ("ObjectId", "FullName") FROM STDIN"#.to_string(),
                r#"COPY "gar"."Room" ("ObjectId", "FullName") FROM STDIN"#.to_string(),
            ]
        );
    }

    #[tokio::test]
    async fn writer_failure_stops_every_later_read() {
        let log = CallLog::default();
        let reader = FakeReader::new(log.clone())
            .with_batches(EntityKind::Addresses, &[2])
            .with_batches(EntityKind::Apartments, &[2, 2, 2])
            .with_batches(EntityKind::Rooms, &[5]);
        let mut writer = FakeWriter::new(log.clone());
        writer.fail_on = Some((EntityKind::Apartments, 1));

        let mut orchestrator = ImportOrchestrator::new(reader, writer, mappings());
        let err = orchestrator
            .run(&CancellationToken::new())
            .await
            .expect_err("second apartment batch fails");

        assert!(matches!(err, ImportError::Write { .. }));
        assert_eq!(orchestrator.state(), ImportState::Failed);

        let calls = log.lock().clone();
        assert_eq!(
            calls,
            vec![
                Call::Init,
                Call::Read(EntityKind::Addresses),
                Call::Write(EntityKind::Addresses, 2),
                Call::Read(EntityKind::Apartments),
                Call::Write(EntityKind::Apartments, 2),
                Call::Read(EntityKind::Apartments),
                Call::Release,
            ]
        );
    }

    #[tokio::test]
    async fn reader_initialization_failure_never_touches_writer() {
        let log = CallLog::default();
        let mut reader = FakeReader::new(log.clone()).with_batches(EntityKind::Addresses, &[1]);
        reader.fail_init = true;
        let writer = FakeWriter::new(log.clone());

        let mut orchestrator = ImportOrchestrator::new(reader, writer, mappings());
        let err = orchestrator.run(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, ImportError::ReaderInitialization(_)));
        assert_eq!(orchestrator.state(), ImportState::Failed);
        assert_eq!(log.lock().clone(), vec![Call::Init, Call::Release]);
    }

    #[tokio::test]
    async fn cancellation_stops_before_next_batch() {
        let log = CallLog::default();
        let token = CancellationToken::new();
        let reader = FakeReader::new(log.clone()).with_batches(EntityKind::Addresses, &[1, 1, 1, 1]);
        let mut writer = FakeWriter::new(log.clone());
        writer.cancel_after_writes = Some((2, token.clone()));

        let mut orchestrator = ImportOrchestrator::new(reader, writer, mappings());
        let err = orchestrator.run(&token).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(orchestrator.state(), ImportState::Cancelled);
        let writes: Vec<_> = log
            .lock()
            .iter()
            .filter(|c| matches!(c, Call::Write(..)))
            .cloned()
            .collect();
        assert_eq!(writes.len(), 2);
    }

    #[tokio::test]
    async fn pre_cancelled_run_initializes_nothing() {
        let log = CallLog::default();
        let token = CancellationToken::new();
        token.cancel();
        let reader = FakeReader::new(log.clone()).with_batches(EntityKind::Addresses, &[1]);

        let mut orchestrator = ImportOrchestrator::new(reader, FakeWriter::new(log.clone()), mappings());
        let err = orchestrator.run(&token).await.unwrap_err();

        assert!(err.is_cancelled());
        assert_eq!(log.lock().clone(), vec![Call::Release]);
    }

    #[tokio::test]
    async fn reader_is_released_exactly_once() {
        let log = CallLog::default();
        let reader = FakeReader::new(log.clone()).with_batches(EntityKind::Rooms, &[1]);

        {
            let mut orchestrator = ImportOrchestrator::new(reader, FakeWriter::new(log.clone()), mappings());
            orchestrator.run(&CancellationToken::new()).await.unwrap();
            orchestrator.release();
        }

        let releases = log.lock().iter().filter(|c| **c == Call::Release).count();
        assert_eq!(releases, 1);
    }

    #[tokio::test]
    async fn second_run_is_rejected() {
        let log = CallLog::default();
        let reader = FakeReader::new(log.clone());
        let mut orchestrator = ImportOrchestrator::new(reader, FakeWriter::new(log.clone()), mappings());

        orchestrator.run(&CancellationToken::new()).await.unwrap();
        let err = orchestrator.run(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(err, ImportError::ReaderInitialization(_)));
        assert_eq!(orchestrator.state(), ImportState::Completed);
    }

    #[tokio::test]
    async fn observer_sees_state_machine_and_batches() {
        let log = CallLog::default();
        let reader = FakeReader::new(log.clone()).with_batches(EntityKind::Addresses, &[3, 3]);
        let observer = Arc::new(RecordingObserver::default());

        let mut orchestrator = ImportOrchestrator::new(reader, FakeWriter::new(log.clone()), mappings())
            .with_observer(observer.clone());
        orchestrator.run(&CancellationToken::new()).await.unwrap();

        let states = observer.states.lock().clone();
        assert_eq!(states.first(), Some(&ImportState::ReaderInitializing));
        assert_eq!(states.get(1), Some(&ImportState::Importing(EntityKind::Addresses)));
        assert_eq!(states.last(), Some(&ImportState::Completed));
        assert_eq!(states.len(), 8);
        assert_eq!(
            observer.batches.lock().clone(),
            vec![(EntityKind::Addresses, 3), (EntityKind::Addresses, 3)]
        );
    }

    #[tokio::test]
    async fn empty_batch_is_a_read_error() {
        let log = CallLog::default();
        let mut reader = FakeReader::new(log.clone());
        reader
            .batches
            .entry(EntityKind::Addresses)
            .or_default()
            .push_back(EntityBatch::empty(EntityKind::Addresses, 0));

        let mut orchestrator = ImportOrchestrator::new(reader, FakeWriter::new(log.clone()), mappings());
        let err = orchestrator.run(&CancellationToken::new()).await.unwrap_err();

        assert!(matches!(
            err,
            ImportError::Read {
                kind: EntityKind::Addresses,
                ..
            }
        ));
    }
}
