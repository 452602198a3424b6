use sqlx::{
    sqlite::{SqliteConnectOptions, SqlitePoolOptions},
    SqlitePool,
};
use std::str::FromStr;
use std::sync::Arc;

pub type DbPool = Arc<SqlitePool>;

pub async fn init_db(database_url: &str, max_connections: u32) -> Result<DbPool, sqlx::Error> {
    // Local dev default points into ./data
    if database_url.contains("./data/") {
        if let Err(e) = std::fs::create_dir_all("./data") {
            tracing::warn!("could not create ./data: {}", e);
        }
    }

    tracing::info!("Connecting to database: {}", database_url);

    let options = SqliteConnectOptions::from_str(database_url)?
        .create_if_missing(true)
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(max_connections)
        .connect_with(options)
        .await?;

    create_schema(&pool).await?;

    Ok(Arc::new(pool))
}

pub async fn create_schema(pool: &SqlitePool) -> Result<(), sqlx::Error> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS users (
            username TEXT PRIMARY KEY,
            password TEXT NOT NULL,
            first_name TEXT NOT NULL,
            last_name TEXT NOT NULL,
            phone TEXT NOT NULL,
            join_at TEXT NOT NULL,
            last_login_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS messages (
            id INTEGER PRIMARY KEY AUTOINCREMENT,
            from_username TEXT NOT NULL REFERENCES users(username),
            to_username TEXT NOT NULL REFERENCES users(username),
            body TEXT NOT NULL,
            sent_at TEXT NOT NULL,
            read_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_from_username ON messages(from_username)")
        .execute(pool)
        .await?;

    sqlx::query("CREATE INDEX IF NOT EXISTS idx_messages_to_username ON messages(to_username)")
        .execute(pool)
        .await?;

    Ok(())
}

/// Single-connection in-memory database; every connection to `:memory:` is
/// its own database, so the pool must never open a second one.
#[cfg(test)]
pub async fn test_pool() -> DbPool {
    let options = SqliteConnectOptions::from_str("sqlite::memory:")
        .unwrap()
        .foreign_keys(true);

    let pool = SqlitePoolOptions::new()
        .max_connections(1)
        .idle_timeout(None)
        .max_lifetime(None)
        .connect_with(options)
        .await
        .unwrap();

    create_schema(&pool).await.unwrap();
    Arc::new(pool)
}
