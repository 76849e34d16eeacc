mod cache_entries;
mod calls;
mod rubrics;
mod sessions;

pub use cache_entries::CacheEntryRepository;
pub use calls::CallRepository;
pub use rubrics::RubricRepository;
pub use sessions::SessionRepository;

use chrono::{DateTime, SecondsFormat, Utc};

use crate::error::{CoachError, Result};

/// Fixed-width UTC timestamps so `expires_at <= ?` compares correctly as text.
pub(crate) fn to_db_time(at: DateTime<Utc>) -> String {
    at.to_rfc3339_opts(SecondsFormat::Micros, true)
}

pub(crate) fn from_db_time(value: &str) -> DateTime<Utc> {
    DateTime::parse_from_rfc3339(value)
        .map(|dt| dt.with_timezone(&Utc))
        .unwrap_or_else(|_| Utc::now())
}

pub(crate) fn parse_column<T>(value: &str, column: &str) -> Result<T>
where
    T: std::str::FromStr<Err = String>,
{
    value
        .parse()
        .map_err(|e| CoachError::Internal(format!("Invalid {column} in database: {e}")))
}

#[cfg(test)]
pub(crate) async fn test_connection() -> libsql::Connection {
    let conn = libsql::Builder::new_local(":memory:")
        .build()
        .await
        .unwrap()
        .connect()
        .unwrap();
    crate::db::schema::init_schema(&conn).await.unwrap();
    conn
}
