use crate::gar::reader::{DEFAULT_BATCH_SIZE, ReaderOptions};
use crate::gar::writer::DEFAULT_COPY_CHUNK_BYTES;
use std::env;
use std::path::PathBuf;

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|value| matches!(value.to_ascii_lowercase().as_str(), "1" | "true" | "yes"))
        .unwrap_or(default)
}

fn env_usize(key: &str, default: usize) -> usize {
    env::var(key)
        .ok()
        .and_then(|value| value.parse::<usize>().ok())
        .filter(|value| *value > 0)
        .unwrap_or(default)
}

fn env_string(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn env_list(key: &str) -> Option<Vec<String>> {
    env::var(key).ok().and_then(|value| parse_list(&value))
}

/// Split a comma separated list, dropping blanks. `None` when nothing remains.
pub fn parse_list(value: &str) -> Option<Vec<String>> {
    let items: Vec<String> = value
        .split(',')
        .map(str::trim)
        .filter(|item| !item.is_empty())
        .map(str::to_string)
        .collect();

    if items.is_empty() { None } else { Some(items) }
}

/// Runtime configuration for import runs.
#[derive(Debug, Clone)]
pub struct ImportConfig {
    pub data_path: PathBuf,
    pub batch_size: usize,
    pub schema: String,
    pub database_name: String,
    pub copy_chunk_bytes: usize,
    pub active_only: bool,
    pub regions: Option<Vec<String>>,
}

impl ImportConfig {
    pub fn from_env() -> Self {
        Self {
            data_path: PathBuf::from(env_string("GAR_DATA_PATH", "./gar")),
            batch_size: env_usize("GAR_BATCH_SIZE", DEFAULT_BATCH_SIZE),
            schema: env_string("GAR_SCHEMA", "public"),
            database_name: env_string("GAR_DATABASE_NAME", "gar"),
            copy_chunk_bytes: env_usize("GAR_COPY_CHUNK_BYTES", DEFAULT_COPY_CHUNK_BYTES),
            active_only: env_bool("GAR_ACTIVE_ONLY", false),
            regions: env_list("GAR_REGIONS"),
        }
    }

    pub fn reader_options(&self) -> ReaderOptions {
        ReaderOptions {
            batch_size: self.batch_size.max(1),
            active_only: self.active_only,
            regions: self.regions.clone(),
        }
    }
}

impl Default for ImportConfig {
    fn default() -> Self {
        Self::from_env()
    }
}
