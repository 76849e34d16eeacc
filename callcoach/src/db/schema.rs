use libsql::Connection;

use crate::error::Result;

pub async fn init_schema(conn: &Connection) -> Result<()> {
    conn.execute_batch(
        r#"
        -- Imported calls: transcript segments and participants as JSON
        CREATE TABLE IF NOT EXISTS calls (
            call_id TEXT PRIMARY KEY,
            segments TEXT NOT NULL DEFAULT '[]',
            participants TEXT NOT NULL DEFAULT '[]',
            duration REAL NOT NULL DEFAULT 0,
            evaluated_role TEXT,
            recorded_at TEXT,
            created_at TEXT NOT NULL,
            updated_at TEXT NOT NULL
        );

        -- Immutable rubric versions
        CREATE TABLE IF NOT EXISTS rubric_versions (
            version_id TEXT NOT NULL,
            dimension TEXT NOT NULL,
            role_variant TEXT NOT NULL,
            criteria TEXT NOT NULL DEFAULT '[]',
            published_at TEXT NOT NULL,
            PRIMARY KEY (version_id, dimension, role_variant)
        );

        CREATE INDEX IF NOT EXISTS idx_rubric_versions_scope
            ON rubric_versions(dimension, role_variant, published_at);

        -- Active version pointer per (dimension, role)
        CREATE TABLE IF NOT EXISTS active_rubric_versions (
            dimension TEXT NOT NULL,
            role_variant TEXT NOT NULL,
            version_id TEXT NOT NULL,
            updated_at TEXT NOT NULL,
            PRIMARY KEY (dimension, role_variant)
        );

        -- Per (chunk, dimension) analysis results keyed by content hash
        CREATE TABLE IF NOT EXISTS analysis_cache (
            key TEXT PRIMARY KEY,
            dimension TEXT NOT NULL,
            role_variant TEXT NOT NULL,
            rubric_version TEXT NOT NULL,
            payload TEXT NOT NULL,
            created_at TEXT NOT NULL,
            expires_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_analysis_cache_scope
            ON analysis_cache(dimension, role_variant, rubric_version);
        CREATE INDEX IF NOT EXISTS idx_analysis_cache_expires_at
            ON analysis_cache(expires_at);

        -- Persisted coaching evaluations
        CREATE TABLE IF NOT EXISTS coaching_sessions (
            call_id TEXT PRIMARY KEY,
            rep_email TEXT,
            team_id TEXT,
            role_variant TEXT NOT NULL,
            overall_score REAL,
            dimension_scores TEXT NOT NULL DEFAULT '{}',
            incomplete INTEGER NOT NULL DEFAULT 0,
            evaluation TEXT NOT NULL,
            evaluated_at TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_coaching_sessions_role
            ON coaching_sessions(role_variant, evaluated_at);
        CREATE INDEX IF NOT EXISTS idx_coaching_sessions_rep
            ON coaching_sessions(rep_email, evaluated_at);
        CREATE INDEX IF NOT EXISTS idx_coaching_sessions_team
            ON coaching_sessions(team_id);
        "#,
    )
    .await?;

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use libsql::Builder;

    #[tokio::test]
    async fn test_schema_creates_all_tables() {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        let conn = db.connect().unwrap();

        init_schema(&conn).await.unwrap();

        let mut rows = conn
            .query(
                "SELECT name FROM sqlite_master WHERE type = 'table' ORDER BY name",
                (),
            )
            .await
            .unwrap();

        let mut tables = Vec::new();
        while let Some(row) = rows.next().await.unwrap() {
            tables.push(row.get::<String>(0).unwrap());
        }

        for expected in [
            "active_rubric_versions",
            "analysis_cache",
            "calls",
            "coaching_sessions",
            "rubric_versions",
        ] {
            assert!(tables.iter().any(|t| t == expected), "missing table {expected}");
        }
    }

    #[tokio::test]
    async fn test_schema_is_idempotent() {
        let db = Builder::new_local(":memory:").build().await.unwrap();
        let conn = db.connect().unwrap();

        init_schema(&conn).await.unwrap();
        init_schema(&conn).await.unwrap();
    }
}
