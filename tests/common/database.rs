//! Test database setup
#![allow(dead_code)]

use sea_orm::{DatabaseConnection, DbErr};

/// In-memory SQLite lives as long as its single pooled connection.
const TEST_DATABASE_URL: &str = "sqlite::memory:";

/// Fresh database with every table created.
pub async fn setup_test_database() -> Result<DatabaseConnection, DbErr> {
    votesite::db::init_db(TEST_DATABASE_URL, 1).await
}
