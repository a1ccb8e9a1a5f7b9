//! Idempotent schema bootstrap for the six GAR tables.
//!
//! Every statement here is safe to repeat: the database is created only when
//! `pg_database` does not list it, and schema/table creation use
//! `IF NOT EXISTS`. The only destructive operation is [`SchemaInitializer::drop_schema`].

use crate::gar::error::ImportError;
use crate::gar::kind::EntityKind;
use crate::gar::mapping::quote_ident;
use rocket_db_pools::sqlx::{self, PgPool};
use std::time::Instant;

/// Creates the target database, schema and tables when they are missing.
pub struct SchemaInitializer {
    pool: PgPool,
    schema: String,
}

impl SchemaInitializer {
    pub fn new(pool: PgPool, schema: impl Into<String>) -> Self {
        Self {
            pool,
            schema: schema.into(),
        }
    }

    /// Create database `name` unless it already exists.
    ///
    /// The pool must be connected to some other database of the same server
    /// (usually `postgres`) with a role allowed to create databases.
    /// Returns `true` when the database was created by this call.
    pub async fn ensure_database_exists(&self, name: &str) -> Result<bool, ImportError> {
        let exists: Option<i32> =
            sqlx::query_scalar("SELECT 1 FROM pg_catalog.pg_database WHERE datname = $1")
                .bind(name)
                .fetch_optional(&self.pool)
                .await
                .map_err(|e| ImportError::provisioning("checking database existence", e))?;

        if exists.is_some() {
            log::debug!("database {} already exists", name);
            return Ok(false);
        }

        // CREATE DATABASE does not accept bind parameters.
        let create_sql = format!("CREATE DATABASE {}", quote_ident(name));
        sqlx::query(&create_sql)
            .execute(&self.pool)
            .await
            .map_err(|e| ImportError::provisioning(format!("creating database {name}"), e))?;

        log::info!("database {} was created", name);
        Ok(true)
    }

    pub async fn ensure_schema_exists(&self) -> Result<(), ImportError> {
        let sql = format!("CREATE SCHEMA IF NOT EXISTS {}", quote_ident(&self.schema));
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| ImportError::provisioning("creating schema", e))?;

        log::info!("schema {} is ready", self.schema);
        Ok(())
    }

    /// Drop the schema and everything in it.
    ///
    /// **WARNING**: irreversible. Used to reset before a re-import.
    pub async fn drop_schema(&self) -> Result<(), ImportError> {
        let sql = format!("DROP SCHEMA IF EXISTS {} CASCADE", quote_ident(&self.schema));
        sqlx::query(&sql)
            .execute(&self.pool)
            .await
            .map_err(|e| ImportError::provisioning("dropping schema", e))?;

        log::warn!("schema {} was dropped", self.schema);
        Ok(())
    }

    pub async fn ensure_tables_exist(&self) -> Result<(), ImportError> {
        let started = Instant::now();

        for kind in EntityKind::IMPORT_ORDER {
            sqlx::query(&create_table_sql(&self.schema, kind))
                .execute(&self.pool)
                .await
                .map_err(|e| {
                    ImportError::provisioning(format!("creating table {}", kind.table_name()), e)
                })?;
        }

        log::info!(
            "database initialization has ended in {}ms",
            started.elapsed().as_millis()
        );
        Ok(())
    }

    /// Schema, then tables. What every startup runs.
    pub async fn ensure_created(&self) -> Result<(), ImportError> {
        self.ensure_schema_exists().await?;
        self.ensure_tables_exist().await
    }

    /// Drop the schema and bootstrap it again from scratch.
    pub async fn reset(&self) -> Result<(), ImportError> {
        self.drop_schema().await?;
        self.ensure_created().await
    }

    /// Close the underlying pool. Other clones of the pool are closed too.
    pub async fn close(self) {
        self.pool.close().await;
    }
}

fn create_table_sql(schema: &str, kind: EntityKind) -> String {
    format!(
        r#"CREATE TABLE IF NOT EXISTS {}.{} (
    "Id" SERIAL PRIMARY KEY,
    "ObjectId" bigint NOT NULL,
    {} text NOT NULL
)"#,
        quote_ident(schema),
        quote_ident(kind.table_name()),
        quote_ident(kind.text_column())
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn table_ddl_is_idempotent_and_never_constrains_object_id() {
        let sql = create_table_sql("public", EntityKind::Houses);
        assert!(sql.starts_with(r#"CREATE TABLE IF NOT EXISTS "public"."House""#));
        assert!(sql.contains(r#""Id" SERIAL PRIMARY KEY"#));
        assert!(sql.contains(r#""ObjectId" bigint NOT NULL"#));
        assert!(sql.contains(r#""FullName" text NOT NULL"#));
        assert!(!sql.contains("UNIQUE"));
        assert!(!sql.contains("REFERENCES"));
    }

    #[test]
    fn hierarchy_table_stores_path() {
        let sql = create_table_sql("gar", EntityKind::Hierarchies);
        assert!(sql.contains(r#""gar"."Hierarchy""#));
        assert!(sql.contains(r#""Path" text NOT NULL"#));
        assert!(!sql.contains("FullName"));
    }
}
