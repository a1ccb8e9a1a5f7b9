//! Response payloads shared by the HTTP routes.

use rocket_okapi::okapi::schemars::JsonSchema;
use serde::{Deserialize, Serialize};

/// Simple message wrapper for acknowledgement responses.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
pub struct MessageResponse {
    pub message: String,
}

/// Result of a schema bootstrap or reset.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct SchemaResponse {
    pub schema: String,
    /// Tables guaranteed to exist after the call, in import order.
    pub tables: Vec<String>,
    pub message: String,
}

/// Acknowledgement for a newly spawned import run.
#[derive(Debug, Serialize, Deserialize, JsonSchema)]
#[serde(rename_all = "camelCase")]
pub struct ImportStartResponse {
    pub job_id: String,
    pub data_path: String,
    pub message: String,
}
