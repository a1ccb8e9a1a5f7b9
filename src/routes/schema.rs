//! Schema bootstrap and reset endpoints.

use crate::error::ApiError;
use crate::gar::{EntityKind, ImportConfig, ImportJobManager, SchemaInitializer};
use crate::models::SchemaResponse;
use rocket::{State, post, serde::json::Json};
use rocket_db_pools::sqlx::PgPool;
use rocket_okapi::openapi;
use std::sync::Arc;

fn table_names() -> Vec<String> {
    EntityKind::IMPORT_ORDER
        .iter()
        .map(|kind| kind.table_name().to_string())
        .collect()
}

/// Create the schema and the six registry tables when missing.
#[openapi(tag = "Schema")]
#[post("/schema")]
pub async fn ensure_schema(
    pool: &State<PgPool>,
    config: &State<ImportConfig>,
) -> Result<Json<SchemaResponse>, ApiError> {
    let initializer = SchemaInitializer::new(pool.inner().clone(), config.schema.clone());
    initializer.ensure_created().await?;

    Ok(Json(SchemaResponse {
        schema: config.schema.clone(),
        tables: table_names(),
        message: "Schema is up to date".to_string(),
    }))
}

/// Drop the schema with everything in it, then bootstrap it again.
///
/// Refused while an import is running. No import can start until the
/// reset has finished.
#[openapi(tag = "Schema")]
#[post("/schema/reset")]
pub async fn reset_schema(
    pool: &State<PgPool>,
    config: &State<ImportConfig>,
    jobs: &State<Arc<ImportJobManager>>,
) -> Result<Json<SchemaResponse>, ApiError> {
    let _reservation = jobs.begin_reset().map_err(ApiError::Conflict)?;

    let initializer = SchemaInitializer::new(pool.inner().clone(), config.schema.clone());
    initializer.reset().await?;

    Ok(Json(SchemaResponse {
        schema: config.schema.clone(),
        tables: table_names(),
        message: "Schema was dropped and recreated".to_string(),
    }))
}
