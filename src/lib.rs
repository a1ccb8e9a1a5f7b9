#[macro_use]
extern crate rocket;

pub mod db;
pub mod error;
pub mod gar;
pub mod models;
pub mod request_logger;
pub mod routes;

use crate::db::GarDb;
use crate::gar::{ImportConfig, ImportJobManager, SchemaInitializer};
use crate::request_logger::RequestLogger;
use env_logger::Env;
use rocket::fairing::AdHoc;
use rocket::{Build, Rocket};
use rocket_db_pools::Database;
use rocket_okapi::{
    openapi_get_routes,
    swagger_ui::{SwaggerUIConfig, make_swagger_ui},
};
use std::sync::{Arc, Once};

static LOGGER: Once = Once::new();

fn init_logger() {
    LOGGER.call_once(|| {
        env_logger::Builder::from_env(
            Env::default().default_filter_or("info,rocket::server=warn,rocket::request=warn"),
        )
        .init();
    });
}

pub fn rocket() -> Rocket<Build> {
    init_logger();

    let config = ImportConfig::from_env();
    log::info!(
        "import data path: {}, schema: {}",
        config.data_path.display(),
        config.schema
    );

    rocket::build()
        .attach(RequestLogger)
        .attach(GarDb::init())
        // Bootstrap schema and tables on startup
        .attach(AdHoc::try_on_ignite("Bootstrap Schema", |rocket| async move {
            let schema = rocket
                .state::<ImportConfig>()
                .map(|config| config.schema.clone())
                .unwrap_or_else(|| "public".to_string());

            match GarDb::fetch(&rocket) {
                Some(db) => {
                    let initializer = SchemaInitializer::new((**db).clone(), schema);
                    match initializer.ensure_created().await {
                        Ok(()) => {
                            log::info!("schema bootstrap successful");
                            Ok(rocket)
                        }
                        Err(e) => {
                            log::error!("schema bootstrap failed: {}", e);
                            Err(rocket)
                        }
                    }
                }
                None => {
                    log::error!("database pool not available for schema bootstrap");
                    Err(rocket)
                }
            }
        }))
        // Clone the pool into managed state for background import runs
        .attach(AdHoc::try_on_ignite("Manage DB Pool", |rocket| async move {
            match GarDb::fetch(&rocket) {
                Some(db) => {
                    let pool = (**db).clone();
                    Ok(rocket.manage(pool))
                }
                None => Err(rocket),
            }
        }))
        .manage(config)
        .manage(Arc::new(ImportJobManager::new()))
        .mount(
            "/api/v1",
            openapi_get_routes![
                routes::health::health_check,
                routes::schema::ensure_schema,
                routes::schema::reset_schema,
                routes::import::start_import,
                routes::import::import_status,
                routes::import::cancel_import,
            ],
        )
        .mount(
            "/api/docs/swagger/",
            make_swagger_ui(&SwaggerUIConfig {
                url: "../../v1/openapi.json".to_owned(),
                ..Default::default()
            }),
        )
}

#[cfg_attr(not(test), allow(dead_code))]
pub mod test_support {
    use crate::gar::{ImportConfig, ImportJobManager};
    use rocket::config::LogLevel;
    use rocket::figment::Figment;
    use rocket::local::asynchronous::Client as AsyncClient;
    use rocket::local::blocking::Client;
    use rocket::{Build, Rocket, Route};
    use rocket_db_pools::sqlx::PgPool;
    use std::sync::Arc;

    pub use database::{TestDatabase, TestDatabaseError};

    pub mod database {
        use crate::gar::{ImportError, SchemaInitializer};
        use log::LevelFilter;
        use rocket_db_pools::sqlx::postgres::{PgConnectOptions, PgPoolOptions};
        use rocket_db_pools::sqlx::{self, ConnectOptions, PgPool};
        use testcontainers::ContainerAsync;
        use testcontainers::core::error::TestcontainersError;
        use testcontainers_modules::postgres::Postgres;
        use testcontainers_modules::testcontainers::runners::AsyncRunner;
        use thiserror::Error;
        use tokio::runtime::Handle;
        use uuid::Uuid;

        #[derive(Debug, Error)]
        pub enum TestDatabaseError {
            /// Neither `TEST_DATABASE_URL` nor a container runtime is available.
            #[error("no test database available: {0}")]
            Unavailable(String),
            #[error("database error: {0}")]
            Sqlx(#[from] sqlx::Error),
            #[error("bootstrap error: {0}")]
            Bootstrap(#[from] ImportError),
            #[error("container error: {0}")]
            Container(#[from] TestcontainersError),
        }

        /// Ephemeral database factory for integration tests.
        ///
        /// Each instance owns a freshly created database with the registry
        /// tables bootstrapped in `public`.
        pub struct TestDatabase {
            pool: Option<PgPool>,
            admin_options: PgConnectOptions,
            database_name: String,
            container: Option<ContainerAsync<Postgres>>,
        }

        impl TestDatabase {
            /// Use `TEST_DATABASE_URL` when set, otherwise launch a disposable
            /// Postgres container.
            pub async fn new_from_env() -> Result<Self, TestDatabaseError> {
                match std::env::var("TEST_DATABASE_URL") {
                    Ok(url) => Self::new_with_url(&url, None).await,
                    Err(_) => {
                        let container = Postgres::default()
                            .start()
                            .await
                            .map_err(|e| TestDatabaseError::Unavailable(e.to_string()))?;
                        let host = container.get_host().await?.to_string();
                        let port = container.get_host_port_ipv4(5432).await?;
                        let url = format!("postgres://postgres:postgres@{}:{}/postgres", host, port);
                        Self::new_with_url(&url, Some(container)).await
                    }
                }
            }

            /// Provision a fresh database on the server behind `base_url`.
            pub async fn new_with_url(
                base_url: &str,
                container: Option<ContainerAsync<Postgres>>,
            ) -> Result<Self, TestDatabaseError> {
                let base_options: PgConnectOptions =
                    base_url.parse().map_err(TestDatabaseError::Sqlx)?;
                let base_options = base_options.log_statements(LevelFilter::Off);

                let admin_options = base_options.clone().database("postgres");
                let admin_pool = PgPoolOptions::new()
                    .max_connections(1)
                    .connect_with(admin_options.clone())
                    .await
                    .map_err(|e| TestDatabaseError::Unavailable(e.to_string()))?;

                let database_name = format!("gar_test_{}", Uuid::new_v4().simple());
                let admin = SchemaInitializer::new(admin_pool, "public");
                admin.ensure_database_exists(&database_name).await?;
                admin.close().await;

                let pool = PgPoolOptions::new()
                    .max_connections(5)
                    .connect_with(base_options.database(&database_name))
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                SchemaInitializer::new(pool.clone(), "public")
                    .ensure_created()
                    .await?;

                Ok(Self {
                    pool: Some(pool),
                    admin_options,
                    database_name,
                    container,
                })
            }

            /// Cloneable connection pool for use in tests and Rocket state.
            pub fn pool(&self) -> &PgPool {
                self.pool.as_ref().expect("test database pool is available")
            }

            pub fn pool_clone(&self) -> PgPool {
                self.pool().clone()
            }

            pub fn database_name(&self) -> &str {
                &self.database_name
            }

            /// Close pool connections and drop the ephemeral database.
            pub async fn close(mut self) -> Result<(), TestDatabaseError> {
                if let Some(pool) = self.pool.take() {
                    pool.close().await;
                }

                drop_database_with_fallback(self.admin_options.clone(), &self.database_name)
                    .await
                    .map_err(TestDatabaseError::Sqlx)?;

                if let Some(container) = self.container.take() {
                    drop(container);
                }

                Ok(())
            }
        }

        async fn drop_database_with_fallback(
            admin_options: PgConnectOptions,
            database_name: &str,
        ) -> Result<(), sqlx::Error> {
            let admin_pool = PgPoolOptions::new()
                .max_connections(1)
                .connect_with(admin_options)
                .await?;

            let drop_force = format!("DROP DATABASE \"{}\" WITH (FORCE)", database_name);
            match sqlx::query(&drop_force).execute(&admin_pool).await {
                Ok(_) => Ok(()),
                Err(err) if force_drop_unsupported(&err) => {
                    let drop_sql = format!("DROP DATABASE \"{}\"", database_name);
                    sqlx::query(&drop_sql).execute(&admin_pool).await?;
                    Ok(())
                }
                Err(err) => Err(err),
            }
        }

        fn force_drop_unsupported(err: &sqlx::Error) -> bool {
            matches!(
                err,
                sqlx::Error::Database(db_err)
                    if db_err
                        .code()
                        .map(|code| code == "42601" || code == "0A000")
                        .unwrap_or(false)
            )
        }

        impl Drop for TestDatabase {
            fn drop(&mut self) {
                if let Some(pool) = self.pool.take() {
                    let admin_options = self.admin_options.clone();
                    let db_name = self.database_name.clone();
                    if let Ok(handle) = Handle::try_current() {
                        handle.spawn(async move {
                            pool.close().await;
                            let _ = drop_database_with_fallback(admin_options, &db_name).await;
                        });
                    } else {
                        std::thread::spawn(move || {
                            if let Ok(rt) = tokio::runtime::Runtime::new() {
                                rt.block_on(async move {
                                    pool.close().await;
                                    let _ =
                                        drop_database_with_fallback(admin_options, &db_name).await;
                                });
                            }
                        });
                    }
                }

                if let Some(container) = self.container.take() {
                    drop(container);
                }
            }
        }
    }

    /// Builder for constructing Rocket instances tailored for integration tests.
    #[derive(Default)]
    pub struct TestRocketBuilder {
        figment: Figment,
        mounts: Vec<(String, Vec<Route>)>,
        pg_pool: Option<PgPool>,
        import_config: Option<ImportConfig>,
        job_manager: Option<Arc<ImportJobManager>>,
    }

    impl TestRocketBuilder {
        /// Start a builder with sensible defaults: random port, logging disabled.
        pub fn new() -> Self {
            let figment = rocket::Config::figment()
                .merge(("port", 0))
                .merge(("log_level", LogLevel::Off))
                .merge(("cli_colors", false));

            Self {
                figment,
                ..Default::default()
            }
        }

        /// Mount routes under `/api/v1`.
        pub fn mount_api_routes(mut self, routes: Vec<Route>) -> Self {
            self.mounts.push(("/api/v1".to_string(), routes));
            self
        }

        pub fn manage_pg_pool(mut self, pool: PgPool) -> Self {
            self.pg_pool = Some(pool);
            self
        }

        pub fn manage_import_config(mut self, config: ImportConfig) -> Self {
            self.import_config = Some(config);
            self
        }

        pub fn manage_job_manager(mut self, manager: Arc<ImportJobManager>) -> Self {
            self.job_manager = Some(manager);
            self
        }

        /// Finish building the Rocket instance.
        pub fn build(self) -> Rocket<Build> {
            let mut rocket = rocket::custom(self.figment);

            for (base, routes) in self.mounts {
                rocket = rocket.mount(base, routes);
            }

            if let Some(pool) = self.pg_pool {
                rocket = rocket.manage(pool);
            }
            if let Some(config) = self.import_config {
                rocket = rocket.manage(config);
            }
            if let Some(manager) = self.job_manager {
                rocket = rocket.manage(manager);
            }

            rocket
        }

        /// Convenience helper to produce a blocking local client.
        pub fn blocking_client(self) -> Client {
            Client::tracked(self.build()).expect("valid Rocket instance")
        }

        /// Convenience helper to produce an asynchronous local client.
        pub async fn async_client(self) -> AsyncClient {
            AsyncClient::tracked(self.build())
                .await
                .expect("valid Rocket instance")
        }
    }
}
