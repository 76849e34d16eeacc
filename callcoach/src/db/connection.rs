use libsql::{Builder, Connection};
use std::sync::Arc;

use crate::config::DatabaseConfig;
use crate::error::Result;

use super::schema;

/// Shared libsql handle. Every repository call opens its own connection.
#[derive(Clone)]
pub struct Database {
    db: Arc<libsql::Database>,
}

impl Database {
    pub async fn new(config: &DatabaseConfig) -> Result<Self> {
        let db = if config.url.starts_with("libsql://") || config.url.starts_with("https://") {
            let token = config.auth_token.clone().unwrap_or_default();
            match config.local_path {
                Some(ref local_path) => {
                    Builder::new_remote_replica(local_path, config.url.clone(), token)
                        .build()
                        .await?
                }
                None => Builder::new_remote(config.url.clone(), token).build().await?,
            }
        } else {
            let path = config.url.strip_prefix("file:").unwrap_or(&config.url);
            Builder::new_local(path).build().await?
        };

        let database = Self { db: Arc::new(db) };
        database.apply_pragmas(config).await;
        schema::init_schema(&database.connect()?).await?;

        tracing::debug!(url = %config.url, "Database ready");
        Ok(database)
    }

    pub fn connect(&self) -> Result<Connection> {
        Ok(self.db.connect()?)
    }

    /// Pragmas are best-effort: remote databases reject most of them.
    async fn apply_pragmas(&self, config: &DatabaseConfig) {
        let Ok(conn) = self.connect() else {
            return;
        };

        let pragmas = [
            format!("PRAGMA busy_timeout = {}", config.busy_timeout_ms),
            format!("PRAGMA journal_mode = {}", journal_mode(&config.journal_mode)),
            format!("PRAGMA synchronous = {}", synchronous(&config.synchronous)),
        ];

        for pragma in pragmas {
            if let Err(error) = conn.execute_batch(&pragma).await {
                tracing::warn!(%pragma, error = %error, "Failed to apply SQLite pragma");
            }
        }
    }

    pub async fn sync(&self) -> Result<()> {
        if let Ok(sync) = self.db.sync().await {
            tracing::info!("Database synced: {:?}", sync);
        }
        Ok(())
    }
}

fn journal_mode(value: &str) -> &'static str {
    match value.trim().to_uppercase().as_str() {
        "DELETE" => "DELETE",
        "TRUNCATE" => "TRUNCATE",
        "PERSIST" => "PERSIST",
        "MEMORY" => "MEMORY",
        "OFF" => "OFF",
        _ => "WAL",
    }
}

fn synchronous(value: &str) -> &'static str {
    match value.trim().to_uppercase().as_str() {
        "OFF" => "OFF",
        "FULL" => "FULL",
        "EXTRA" => "EXTRA",
        _ => "NORMAL",
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[tokio::test]
    async fn test_local_database_initializes_schema() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("coach.db");
        let config = DatabaseConfig::local(path.to_string_lossy().to_string());

        let db = Database::new(&config).await.unwrap();
        let conn = db.connect().unwrap();
        let mut rows = conn
            .query("SELECT COUNT(*) FROM analysis_cache", ())
            .await
            .unwrap();
        let row = rows.next().await.unwrap().unwrap();
        assert_eq!(row.get::<i64>(0).unwrap(), 0);
    }

    #[test]
    fn test_pragma_values_are_normalized() {
        assert_eq!(journal_mode("delete"), "DELETE");
        assert_eq!(journal_mode("bogus"), "WAL");
        assert_eq!(synchronous(" full "), "FULL");
        assert_eq!(synchronous(""), "NORMAL");
    }
}
