use chrono::{DateTime, Utc};
use libsql::{params, Connection};

use crate::error::Result;
use crate::models::{CacheEntry, Dimension, RoleVariant};

use super::{from_db_time, parse_column, to_db_time};

pub struct CacheEntryRepository;

impl CacheEntryRepository {
    pub async fn get(conn: &Connection, key: &str) -> Result<Option<CacheEntry>> {
        let mut rows = conn
            .query(
                r#"
                SELECT key, dimension, role_variant, rubric_version, payload, created_at, expires_at
                FROM analysis_cache WHERE key = ?1
                "#,
                params![key],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(Self::row_to_entry(&row)?))
        } else {
            Ok(None)
        }
    }

    /// Keys are content-derived, so concurrent writers store the same value
    /// and last-writer-wins is fine.
    pub async fn upsert(conn: &Connection, entry: &CacheEntry) -> Result<()> {
        conn.execute(
            r#"
            INSERT INTO analysis_cache (
                key, dimension, role_variant, rubric_version, payload, created_at, expires_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7)
            ON CONFLICT(key) DO UPDATE SET
                rubric_version = excluded.rubric_version,
                payload = excluded.payload,
                created_at = excluded.created_at,
                expires_at = excluded.expires_at
            "#,
            params![
                entry.key.clone(),
                entry.dimension.as_str(),
                entry.role_variant.as_str(),
                entry.rubric_version.clone(),
                serde_json::to_string(&entry.result)?,
                to_db_time(entry.created_at),
                to_db_time(entry.expires_at),
            ],
        )
        .await?;

        Ok(())
    }

    pub async fn invalidate_superseded(
        conn: &Connection,
        dimension: Dimension,
        role: RoleVariant,
        active_version: &str,
    ) -> Result<u64> {
        let affected = conn
            .execute(
                r#"
                DELETE FROM analysis_cache
                WHERE dimension = ?1 AND role_variant = ?2 AND rubric_version != ?3
                "#,
                params![dimension.as_str(), role.as_str(), active_version],
            )
            .await?;
        Ok(affected)
    }

    pub async fn purge_expired(conn: &Connection, now: DateTime<Utc>) -> Result<u64> {
        let affected = conn
            .execute(
                "DELETE FROM analysis_cache WHERE expires_at <= ?1",
                params![to_db_time(now)],
            )
            .await?;
        Ok(affected)
    }

    pub async fn clear(conn: &Connection) -> Result<u64> {
        let affected = conn.execute("DELETE FROM analysis_cache", ()).await?;
        Ok(affected)
    }

    fn row_to_entry(row: &libsql::Row) -> Result<CacheEntry> {
        Ok(CacheEntry {
            key: row.get(0)?,
            dimension: parse_column(&row.get::<String>(1)?, "dimension")?,
            role_variant: parse_column(&row.get::<String>(2)?, "role_variant")?,
            rubric_version: row.get(3)?,
            result: serde_json::from_str(&row.get::<String>(4)?)?,
            created_at: from_db_time(&row.get::<String>(5)?),
            expires_at: from_db_time(&row.get::<String>(6)?),
        })
    }
}
