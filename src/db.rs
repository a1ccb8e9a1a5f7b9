use rocket_db_pools::{Database, sqlx};

#[derive(Database)]
#[database("gar_db")]
pub struct GarDb(sqlx::PgPool);
