use chrono::Utc;
use libsql::{params, Connection};

use crate::error::Result;
use crate::models::{Dimension, RoleVariant, RubricVersion};

use super::{from_db_time, parse_column, to_db_time};

pub struct RubricRepository;

impl RubricRepository {
    /// Versions are immutable: inserting an existing version id is a no-op
    /// and returns `false`.
    pub async fn insert(conn: &Connection, rubric: &RubricVersion) -> Result<bool> {
        let affected = conn
            .execute(
                r#"
                INSERT INTO rubric_versions (
                    version_id, dimension, role_variant, criteria, published_at
                ) VALUES (?1, ?2, ?3, ?4, ?5)
                ON CONFLICT(version_id, dimension, role_variant) DO NOTHING
                "#,
                params![
                    rubric.version_id.clone(),
                    rubric.dimension.as_str(),
                    rubric.role_variant.as_str(),
                    serde_json::to_string(&rubric.criteria)?,
                    to_db_time(rubric.published_at),
                ],
            )
            .await?;
        Ok(affected > 0)
    }

    pub async fn get(
        conn: &Connection,
        dimension: Dimension,
        role: RoleVariant,
        version_id: &str,
    ) -> Result<Option<RubricVersion>> {
        let mut rows = conn
            .query(
                r#"
                SELECT version_id, dimension, role_variant, criteria, published_at
                FROM rubric_versions
                WHERE dimension = ?1 AND role_variant = ?2 AND version_id = ?3
                "#,
                params![dimension.as_str(), role.as_str(), version_id],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(Self::row_to_rubric(&row)?))
        } else {
            Ok(None)
        }
    }

    pub async fn get_active_version(
        conn: &Connection,
        dimension: Dimension,
        role: RoleVariant,
    ) -> Result<Option<String>> {
        let mut rows = conn
            .query(
                r#"
                SELECT version_id FROM active_rubric_versions
                WHERE dimension = ?1 AND role_variant = ?2
                "#,
                params![dimension.as_str(), role.as_str()],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(row.get::<String>(0)?))
        } else {
            Ok(None)
        }
    }

    /// Move the active pointer from `expected` to `new_version`. Returns
    /// `false` when another writer moved it first.
    pub async fn compare_and_set_active(
        conn: &Connection,
        dimension: Dimension,
        role: RoleVariant,
        expected: Option<&str>,
        new_version: &str,
    ) -> Result<bool> {
        let now = to_db_time(Utc::now());

        let affected = match expected {
            None => {
                conn.execute(
                    r#"
                    INSERT INTO active_rubric_versions (dimension, role_variant, version_id, updated_at)
                    VALUES (?1, ?2, ?3, ?4)
                    ON CONFLICT(dimension, role_variant) DO NOTHING
                    "#,
                    params![dimension.as_str(), role.as_str(), new_version, now],
                )
                .await?
            }
            Some(expected) => {
                conn.execute(
                    r#"
                    UPDATE active_rubric_versions
                    SET version_id = ?3, updated_at = ?4
                    WHERE dimension = ?1 AND role_variant = ?2 AND version_id = ?5
                    "#,
                    params![dimension.as_str(), role.as_str(), new_version, now, expected],
                )
                .await?
            }
        };

        Ok(affected == 1)
    }

    fn row_to_rubric(row: &libsql::Row) -> Result<RubricVersion> {
        Ok(RubricVersion {
            version_id: row.get(0)?,
            dimension: parse_column(&row.get::<String>(1)?, "dimension")?,
            role_variant: parse_column(&row.get::<String>(2)?, "role_variant")?,
            criteria: serde_json::from_str(&row.get::<String>(3)?)?,
            published_at: from_db_time(&row.get::<String>(4)?),
        })
    }
}
