use std::path::PathBuf;
use std::sync::Arc;

use clap::Parser;
use sqlx::postgres::{PgConnectOptions, PgPoolOptions};
use tokio_util::sync::CancellationToken;

use gar_importer::gar::{self, ImportConfig, NoopObserver, SchemaInitializer};

#[derive(Parser, Debug)]
#[command(
    name = "gar-import",
    about = "Bulk-load a GAR export into PostgreSQL"
)]
struct Args {
    /// The export: a gar_xml.zip archive or the directory it was extracted
    /// into (falls back to GAR_DATA_PATH).
    #[arg(long)]
    data_path: Option<PathBuf>,

    /// Records per batch (falls back to GAR_BATCH_SIZE).
    #[arg(long)]
    batch_size: Option<usize>,

    /// Target schema (falls back to GAR_SCHEMA).
    #[arg(long)]
    schema: Option<String>,

    /// Only import these region directories, comma separated.
    #[arg(long, value_delimiter = ',')]
    regions: Vec<String>,

    /// Skip records flagged inactive or not actual.
    #[arg(long)]
    active_only: bool,

    /// Drop the schema and recreate it before importing.
    #[arg(long)]
    reset: bool,

    /// Do not connect to the maintenance database to create the target database.
    #[arg(long)]
    skip_database_check: bool,

    /// Connection string for the target database.
    #[arg(long, env = "DATABASE_URL")]
    database_url: String,
}

impl Args {
    fn into_config(self) -> ImportConfig {
        let mut config = ImportConfig::from_env();
        if let Some(path) = self.data_path {
            config.data_path = path;
        }
        if let Some(size) = self.batch_size {
            config.batch_size = size.max(1);
        }
        if let Some(schema) = self.schema {
            config.schema = schema;
        }
        if !self.regions.is_empty() {
            config.regions = Some(self.regions);
        }
        config.active_only |= self.active_only;
        config
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info"))
        .format_timestamp(None)
        .init();

    let args = Args::parse();
    let reset = args.reset;
    let skip_database_check = args.skip_database_check;
    let options: PgConnectOptions = args.database_url.parse()?;
    let mut config = args.into_config();

    if let Some(name) = options.get_database() {
        config.database_name = name.to_string();
    }

    if !skip_database_check {
        let admin_pool = PgPoolOptions::new()
            .max_connections(1)
            .connect_with(options.clone().database("postgres"))
            .await?;
        let admin = SchemaInitializer::new(admin_pool, config.schema.clone());
        admin.ensure_database_exists(&config.database_name).await?;
        admin.close().await;
    }

    let pool = PgPoolOptions::new()
        .max_connections(5)
        .connect_with(options.database(&config.database_name))
        .await?;

    let initializer = SchemaInitializer::new(pool.clone(), config.schema.clone());
    if reset {
        initializer.reset().await?;
    } else {
        initializer.ensure_created().await?;
    }

    let cancel = CancellationToken::new();
    let ctrl_c = cancel.clone();
    tokio::spawn(async move {
        if tokio::signal::ctrl_c().await.is_ok() {
            log::warn!("interrupt received, stopping after the current batch");
            ctrl_c.cancel();
        }
    });

    let report = gar::run_import(pool.clone(), &config, Arc::new(NoopObserver), &cancel).await;
    pool.close().await;
    let report = report?;

    for stats in &report.kinds {
        println!(
            "{:<12} {:>10} rows in {:>6} batches ({} ms)",
            stats.kind.to_string(),
            stats.rows,
            stats.batches,
            stats.elapsed_ms
        );
    }
    println!(
        "imported {} rows in {} ms",
        report.total_rows(),
        report.elapsed_ms
    );

    Ok(())
}
