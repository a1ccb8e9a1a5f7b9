use gar_importer::gar::SchemaInitializer;
use gar_importer::test_support::{TestDatabase, TestDatabaseError};
use rocket_db_pools::sqlx::{self, PgPool};

async fn provision(test: &str) -> Option<TestDatabase> {
    match TestDatabase::new_from_env().await {
        Ok(db) => Some(db),
        Err(TestDatabaseError::Unavailable(reason)) => {
            eprintln!("skipping {test}: {reason}");
            None
        }
        Err(err) => panic!("failed to provision test database: {err:?}"),
    }
}

async fn table_names(pool: &PgPool, schema: &str) -> Vec<String> {
    sqlx::query_scalar(
        "SELECT table_name::text FROM information_schema.tables WHERE table_schema = $1 ORDER BY table_name",
    )
    .bind(schema)
    .fetch_all(pool)
    .await
    .expect("list tables")
}

#[tokio::test]
async fn bootstrap_is_idempotent() {
    let Some(test_db) = provision("bootstrap_is_idempotent").await else {
        return;
    };
    let initializer = SchemaInitializer::new(test_db.pool_clone(), "public");

    for _ in 0..3 {
        initializer.ensure_created().await.expect("bootstrap");
    }

    assert_eq!(
        table_names(test_db.pool(), "public").await,
        vec!["AddressObject", "Apartment", "Hierarchy", "House", "Room", "Stead"]
    );

    let path_columns: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM information_schema.columns WHERE table_schema = 'public' AND table_name = 'Hierarchy' AND column_name = 'Path'",
    )
    .fetch_one(test_db.pool())
    .await
    .expect("column lookup");
    assert_eq!(path_columns, 1);

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn existing_database_is_not_recreated() {
    let Some(test_db) = provision("existing_database_is_not_recreated").await else {
        return;
    };
    let initializer = SchemaInitializer::new(test_db.pool_clone(), "public");

    let created = initializer
        .ensure_database_exists(test_db.database_name())
        .await
        .expect("existence check");
    assert!(!created);

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn reset_discards_rows_and_recreates_tables() {
    let Some(test_db) = provision("reset_discards_rows_and_recreates_tables").await else {
        return;
    };
    let initializer = SchemaInitializer::new(test_db.pool_clone(), "public");

    sqlx::query(r#"INSERT INTO "public"."Stead" ("ObjectId", "FullName") VALUES (1, '12')"#)
        .execute(test_db.pool())
        .await
        .expect("seed row");

    initializer.reset().await.expect("reset");

    let rows: i64 = sqlx::query_scalar(r#"SELECT COUNT(*) FROM "public"."Stead""#)
        .fetch_one(test_db.pool())
        .await
        .expect("count rows");
    assert_eq!(rows, 0);
    assert_eq!(table_names(test_db.pool(), "public").await.len(), 6);

    test_db.close().await.expect("failed to drop test database");
}

#[tokio::test]
async fn schema_names_are_quoted() {
    let Some(test_db) = provision("schema_names_are_quoted").await else {
        return;
    };
    let initializer = SchemaInitializer::new(test_db.pool_clone(), r#"gar "import""#);

    initializer.ensure_created().await.expect("bootstrap");
    assert_eq!(
        table_names(test_db.pool(), r#"gar "import""#).await.len(),
        6
    );

    initializer.drop_schema().await.expect("drop");
    initializer.drop_schema().await.expect("drop is idempotent");
    assert!(table_names(test_db.pool(), r#"gar "import""#).await.is_empty());

    test_db.close().await.expect("failed to drop test database");
}
