use crate::gar::error::ImportError;
use crate::gar::kind::EntityKind;
use crate::gar::orchestrator::{ImportObserver, ImportState};
use crate::gar::stats::{ImportReport, KindStats};
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use rocket_okapi::okapi::schemars::JsonSchema;
use serde::Serialize;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio_util::sync::CancellationToken;
use uuid::Uuid;

/// Live counters for one kind of the running job.
#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct KindProgress {
    pub kind: EntityKind,
    pub batches: usize,
    pub rows: u64,
    /// Set once the kind is drained
    pub elapsed_ms: Option<u64>,
}

#[derive(Debug, Clone, Serialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportJobState {
    pub id: Option<String>,
    pub state: ImportState,
    pub progress: Vec<KindProgress>,
    pub report: Option<ImportReport>,
    pub error_message: Option<String>,
    pub started_at: Option<DateTime<Utc>>,
    pub completed_at: Option<DateTime<Utc>>,
}

impl Default for ImportJobState {
    fn default() -> Self {
        Self {
            id: None,
            state: ImportState::NotStarted,
            progress: Vec::new(),
            report: None,
            error_message: None,
            started_at: None,
            completed_at: None,
        }
    }
}

impl ImportJobState {
    pub fn is_active(&self) -> bool {
        self.started_at.is_some() && self.completed_at.is_none()
    }

    fn progress_mut(&mut self, kind: EntityKind) -> &mut KindProgress {
        let index = match self.progress.iter().position(|p| p.kind == kind) {
            Some(index) => index,
            None => {
                self.progress.push(KindProgress {
                    kind,
                    batches: 0,
                    rows: 0,
                    elapsed_ms: None,
                });
                self.progress.len() - 1
            }
        };
        &mut self.progress[index]
    }
}

/// Tracks the single import run the server allows at a time.
///
/// Observer callbacks arrive synchronously from the import loop, so state
/// sits behind a blocking mutex that is never held across an await.
/// A schema reset reserves the manager as well; runs and resets exclude
/// each other.
pub struct ImportJobManager {
    state: Mutex<ImportJobState>,
    cancellation_token: Mutex<Option<CancellationToken>>,
    resetting: AtomicBool,
}

/// Held for the duration of a schema reset; no import can start meanwhile.
pub struct ResetGuard<'a> {
    manager: &'a ImportJobManager,
}

impl Drop for ResetGuard<'_> {
    fn drop(&mut self) {
        self.manager.resetting.store(false, Ordering::Release);
    }
}

impl ImportJobManager {
    pub fn new() -> Self {
        Self {
            state: Mutex::new(ImportJobState::default()),
            cancellation_token: Mutex::new(None),
            resetting: AtomicBool::new(false),
        }
    }

    pub fn get_state(&self) -> ImportJobState {
        self.state.lock().clone()
    }

    /// Reserve the manager for a new run.
    ///
    /// Returns the job id and a fresh cancellation token, or an error when a
    /// run is already active.
    pub fn start_job(&self) -> Result<(String, CancellationToken), String> {
        let mut state = self.state.lock();

        if state.is_active() {
            return Err("An import job is already running".to_string());
        }
        if self.resetting.load(Ordering::Acquire) {
            return Err("The schema is being reset".to_string());
        }

        let job_id = Uuid::new_v4().to_string();
        let token = CancellationToken::new();
        *state = ImportJobState {
            id: Some(job_id.clone()),
            started_at: Some(Utc::now()),
            ..ImportJobState::default()
        };
        *self.cancellation_token.lock() = Some(token.clone());

        Ok((job_id, token))
    }

    /// Reserve the manager for a schema reset.
    ///
    /// Fails while an import is active or another reset holds the guard.
    pub fn begin_reset(&self) -> Result<ResetGuard<'_>, String> {
        let state = self.state.lock();

        if state.is_active() {
            return Err("Cannot reset the schema while an import is running".to_string());
        }
        if self.resetting.swap(true, Ordering::AcqRel) {
            return Err("A schema reset is already running".to_string());
        }

        Ok(ResetGuard { manager: self })
    }

    pub fn complete_job(&self, report: ImportReport) {
        let mut state = self.state.lock();
        state.state = ImportState::Completed;
        state.report = Some(report);
        state.completed_at = Some(Utc::now());
        self.cancellation_token.lock().take();
    }

    pub fn fail_job(&self, error: &ImportError) {
        let mut state = self.state.lock();
        state.state = if error.is_cancelled() {
            ImportState::Cancelled
        } else {
            ImportState::Failed
        };
        state.error_message = Some(error.to_string());
        state.completed_at = Some(Utc::now());
        self.cancellation_token.lock().take();
    }

    pub fn finish(&self, result: &Result<ImportReport, ImportError>) {
        match result {
            Ok(report) => self.complete_job(report.clone()),
            Err(err) => self.fail_job(err),
        }
    }

    /// Signal the active run to stop at its next batch boundary.
    ///
    /// Returns false when nothing is running.
    pub fn cancel_job(&self) -> bool {
        match self.cancellation_token.lock().as_ref() {
            Some(token) => {
                token.cancel();
                true
            }
            None => false,
        }
    }
}

impl Default for ImportJobManager {
    fn default() -> Self {
        Self::new()
    }
}

impl ImportObserver for ImportJobManager {
    fn state_changed(&self, state: ImportState) {
        self.state.lock().state = state;
    }

    fn batch_written(&self, kind: EntityKind, rows: u64) {
        let mut state = self.state.lock();
        let progress = state.progress_mut(kind);
        progress.batches += 1;
        progress.rows += rows;
    }

    fn kind_completed(&self, stats: &KindStats) {
        let mut state = self.state.lock();
        let progress = state.progress_mut(stats.kind);
        progress.batches = stats.batches;
        progress.rows = stats.rows;
        progress.elapsed_ms = Some(stats.elapsed_ms);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_start_is_rejected_while_running() {
        let manager = ImportJobManager::new();
        let (first_id, _token) = manager.start_job().expect("first start");

        assert!(manager.get_state().is_active());
        assert!(manager.start_job().is_err());

        manager.complete_job(ImportReport::default());
        let (second_id, _token) = manager.start_job().expect("restart after completion");
        assert_ne!(first_id, second_id);
    }

    #[test]
    fn reset_reservation_excludes_imports() {
        let manager = ImportJobManager::new();

        let guard = manager.begin_reset().expect("reset reservation");
        assert!(manager.start_job().is_err());
        assert!(manager.begin_reset().is_err());
        assert!(!manager.get_state().is_active());

        drop(guard);
        let (_, _token) = manager.start_job().expect("start after reset");
        assert!(manager.begin_reset().is_err());
    }

    #[test]
    fn observer_callbacks_accumulate_progress() {
        let manager = ImportJobManager::new();
        manager.start_job().unwrap();

        manager.state_changed(ImportState::Importing(EntityKind::Houses));
        manager.batch_written(EntityKind::Houses, 10);
        manager.batch_written(EntityKind::Houses, 4);

        let state = manager.get_state();
        assert_eq!(state.state, ImportState::Importing(EntityKind::Houses));
        assert_eq!(state.progress.len(), 1);
        assert_eq!(state.progress[0].batches, 2);
        assert_eq!(state.progress[0].rows, 14);
        assert_eq!(state.progress[0].elapsed_ms, None);

        let mut stats = KindStats::new(EntityKind::Houses);
        stats.record_batch(10);
        stats.record_batch(4);
        stats.finish(std::time::Duration::from_millis(25));
        manager.kind_completed(&stats);

        assert_eq!(manager.get_state().progress[0].elapsed_ms, Some(25));
    }

    #[test]
    fn cancel_trips_the_job_token() {
        let manager = ImportJobManager::new();
        assert!(!manager.cancel_job());

        let (_, token) = manager.start_job().unwrap();
        assert!(manager.cancel_job());
        assert!(token.is_cancelled());

        manager.fail_job(&ImportError::Cancelled);
        let state = manager.get_state();
        assert_eq!(state.state, ImportState::Cancelled);
        assert!(!state.is_active());
        assert!(!manager.cancel_job());
    }

    #[test]
    fn failure_records_message() {
        let manager = ImportJobManager::new();
        manager.start_job().unwrap();
        manager.finish(&Err(ImportError::read(EntityKind::Rooms, "truncated file")));

        let state = manager.get_state();
        assert_eq!(state.state, ImportState::Failed);
        assert!(
            state
                .error_message
                .as_deref()
                .is_some_and(|m| m.contains("truncated file"))
        );
        assert!(state.completed_at.is_some());
    }
}
