//! Database connection and schema bootstrap.

use crate::orm::{
    access_tokens, free_text_answers, participants, questions, respondents, surveys, votes,
};
use sea_orm::{
    ConnectOptions, ConnectionTrait, Database, DatabaseConnection, DbErr, EntityTrait, Schema,
};
use std::time::Duration;

/// Connects to `url` and makes sure every table exists.
pub async fn init_db(url: &str, max_connections: u32) -> Result<DatabaseConnection, DbErr> {
    ensure_sqlite_dir(url);

    let mut opt = ConnectOptions::new(url.to_owned());
    opt.max_connections(max_connections)
        .connect_timeout(Duration::from_secs(8))
        .sqlx_logging(false);

    let db = Database::connect(opt).await?;
    create_schema(&db).await?;
    log::info!("Database ready at {}", url);
    Ok(db)
}

/// Creates missing tables, parents before children.
pub async fn create_schema(db: &DatabaseConnection) -> Result<(), DbErr> {
    let schema = Schema::new(db.get_database_backend());

    create_table(db, &schema, surveys::Entity).await?;
    create_table(db, &schema, questions::Entity).await?;
    create_table(db, &schema, respondents::Entity).await?;
    create_table(db, &schema, access_tokens::Entity).await?;
    create_table(db, &schema, participants::Entity).await?;
    create_table(db, &schema, votes::Entity).await?;
    create_table(db, &schema, free_text_answers::Entity).await?;

    Ok(())
}

async fn create_table<E>(db: &DatabaseConnection, schema: &Schema, entity: E) -> Result<(), DbErr>
where
    E: EntityTrait,
{
    let mut stmt = schema.create_table_from_entity(entity);
    stmt.if_not_exists();
    db.execute(db.get_database_backend().build(&stmt)).await?;
    Ok(())
}

/// SQLite will not create the parent directory of a database file.
fn ensure_sqlite_dir(url: &str) {
    let path = match url.strip_prefix("sqlite://") {
        Some(rest) => rest.split('?').next().unwrap_or(rest),
        None => return,
    };

    if let Some(parent) = std::path::Path::new(path).parent() {
        if parent.as_os_str().is_empty() {
            return;
        }
        if let Err(e) = std::fs::create_dir_all(parent) {
            log::warn!("Could not create database directory {:?}: {}", parent, e);
        }
    }
}
