//! Endpoints controlling the background import run.

use crate::error::ApiError;
use crate::gar::jobs::ImportJobState;
use crate::gar::{self, ImportConfig, ImportJobManager, ImportObserver, SchemaInitializer};
use crate::models::{ImportStartResponse, MessageResponse};
use rocket::{State, get, post, serde::json::Json};
use rocket_db_pools::sqlx::PgPool;
use rocket_okapi::openapi;
use std::sync::Arc;

/// Spawn an import of the configured export.
///
/// The run bootstraps the schema first, then drains every kind. Only one
/// run may be active; a second request gets `409 Conflict`.
#[openapi(tag = "Import")]
#[post("/import/start")]
pub async fn start_import(
    pool: &State<PgPool>,
    config: &State<ImportConfig>,
    jobs: &State<Arc<ImportJobManager>>,
) -> Result<Json<ImportStartResponse>, ApiError> {
    let (job_id, token) = jobs.start_job().map_err(ApiError::Conflict)?;

    let pool = pool.inner().clone();
    let config = config.inner().clone();
    let manager = jobs.inner().clone();
    let data_path = config.data_path.display().to_string();
    let spawned_id = job_id.clone();

    tokio::spawn(async move {
        log::info!("import job {} started", spawned_id);

        let initializer = SchemaInitializer::new(pool.clone(), config.schema.clone());
        let result = match initializer.ensure_created().await {
            Ok(()) => {
                let observer: Arc<dyn ImportObserver> = manager.clone();
                gar::run_import(pool, &config, observer, &token).await
            }
            Err(err) => Err(err),
        };

        match &result {
            Ok(report) => log::info!(
                "import job {} completed with {} rows",
                spawned_id,
                report.total_rows()
            ),
            Err(err) => log::error!("import job {} ended: {}", spawned_id, err),
        }
        manager.finish(&result);
    });

    Ok(Json(ImportStartResponse {
        job_id,
        data_path: data_path.clone(),
        message: format!("Import from {data_path} started"),
    }))
}

/// Current or last import run: state, per-kind progress and report.
#[openapi(tag = "Import")]
#[get("/import/status")]
pub fn import_status(jobs: &State<Arc<ImportJobManager>>) -> Json<ImportJobState> {
    Json(jobs.get_state())
}

/// Ask the active run to stop at its next batch boundary.
#[openapi(tag = "Import")]
#[post("/import/cancel")]
pub fn cancel_import(
    jobs: &State<Arc<ImportJobManager>>,
) -> Result<Json<MessageResponse>, ApiError> {
    if !jobs.cancel_job() {
        return Err(ApiError::NotFound("No import job is running".to_string()));
    }

    Ok(Json(MessageResponse {
        message: "Cancellation requested".to_string(),
    }))
}
