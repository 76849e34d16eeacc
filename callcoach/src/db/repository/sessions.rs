use std::collections::BTreeMap;

use libsql::{params, Connection};

use crate::error::Result;
use crate::models::{CoachingEvaluation, Dimension, RoleVariant, SessionSummary, TimeWindow};

use super::{from_db_time, parse_column, to_db_time};

pub struct SessionRepository;

impl SessionRepository {
    /// One session per call; re-analysis replaces the previous evaluation.
    pub async fn save(conn: &Connection, evaluation: &CoachingEvaluation) -> Result<()> {
        let dimension_scores: BTreeMap<Dimension, f64> = evaluation
            .dimension_results
            .values()
            .filter(|r| !r.is_failed())
            .map(|r| (r.dimension, r.score))
            .collect();

        conn.execute(
            r#"
            INSERT INTO coaching_sessions (
                call_id, rep_email, team_id, role_variant, overall_score,
                dimension_scores, incomplete, evaluation, evaluated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)
            ON CONFLICT(call_id) DO UPDATE SET
                rep_email = excluded.rep_email,
                team_id = excluded.team_id,
                role_variant = excluded.role_variant,
                overall_score = excluded.overall_score,
                dimension_scores = excluded.dimension_scores,
                incomplete = excluded.incomplete,
                evaluation = excluded.evaluation,
                evaluated_at = excluded.evaluated_at
            "#,
            params![
                evaluation.call_id.clone(),
                evaluation.rep_email.as_deref().map(str::to_lowercase),
                evaluation.team_id.clone(),
                evaluation.evaluated_as_role.as_str(),
                evaluation.overall_score,
                serde_json::to_string(&dimension_scores)?,
                evaluation.incomplete as i32,
                serde_json::to_string(evaluation)?,
                to_db_time(evaluation.evaluated_at),
            ],
        )
        .await?;

        Ok(())
    }

    pub async fn get(conn: &Connection, call_id: &str) -> Result<Option<CoachingEvaluation>> {
        let mut rows = conn
            .query(
                "SELECT evaluation FROM coaching_sessions WHERE call_id = ?1",
                params![call_id],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(serde_json::from_str(&row.get::<String>(0)?)?))
        } else {
            Ok(None)
        }
    }

    pub async fn list(
        conn: &Connection,
        role: RoleVariant,
        window: &TimeWindow,
    ) -> Result<Vec<SessionSummary>> {
        let mut rows = conn
            .query(
                r#"
                SELECT call_id, rep_email, role_variant, overall_score, dimension_scores, evaluated_at
                FROM coaching_sessions
                WHERE role_variant = ?1
                  AND rep_email IS NOT NULL
                  AND evaluated_at >= ?2
                  AND evaluated_at <= ?3
                ORDER BY evaluated_at ASC
                "#,
                params![role.as_str(), to_db_time(window.start), to_db_time(window.end)],
            )
            .await?;

        let mut sessions = Vec::new();
        while let Some(row) = rows.next().await? {
            sessions.push(SessionSummary {
                call_id: row.get(0)?,
                rep_email: row.get(1)?,
                role_variant: parse_column(&row.get::<String>(2)?, "role_variant")?,
                overall_score: row.get(3)?,
                dimension_scores: serde_json::from_str(&row.get::<String>(4)?)
                    .unwrap_or_default(),
                evaluated_at: from_db_time(&row.get::<String>(5)?),
            });
        }
        Ok(sessions)
    }

    pub async fn latest_role_for_rep(
        conn: &Connection,
        rep_email: &str,
    ) -> Result<Option<RoleVariant>> {
        let mut rows = conn
            .query(
                r#"
                SELECT role_variant FROM coaching_sessions
                WHERE rep_email = ?1
                ORDER BY evaluated_at DESC
                LIMIT 1
                "#,
                params![rep_email.to_lowercase()],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(parse_column(&row.get::<String>(0)?, "role_variant")?))
        } else {
            Ok(None)
        }
    }

    /// Evaluated roles on a team, most common first.
    pub async fn team_role_counts(
        conn: &Connection,
        team_id: &str,
    ) -> Result<Vec<(RoleVariant, u64)>> {
        let mut rows = conn
            .query(
                r#"
                SELECT role_variant, COUNT(*) AS n FROM coaching_sessions
                WHERE team_id = ?1 AND role_variant != 'unassigned'
                GROUP BY role_variant
                ORDER BY n DESC, role_variant ASC
                "#,
                params![team_id],
            )
            .await?;

        let mut counts = Vec::new();
        while let Some(row) = rows.next().await? {
            let role = parse_column(&row.get::<String>(0)?, "role_variant")?;
            counts.push((role, row.get::<i64>(1)?.max(0) as u64));
        }
        Ok(counts)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{DimensionResult, FiveWinsEvaluation};
    use crate::db::repository::test_connection;
    use chrono::{Duration, Utc};

    fn evaluation(call_id: &str, rep: &str, team: &str, role: RoleVariant, score: f64) -> CoachingEvaluation {
        let mut dimension_results = BTreeMap::new();
        dimension_results.insert(
            Dimension::Discovery,
            DimensionResult {
                dimension: Dimension::Discovery,
                score,
                evidence: vec![],
                strengths: vec![],
                improvements: vec![],
                error: None,
                retry_count: 0,
                warnings: vec![],
            },
        );
        dimension_results.insert(
            Dimension::Engagement,
            DimensionResult::failed(Dimension::Engagement, "timeout"),
        );

        CoachingEvaluation {
            call_id: call_id.to_string(),
            evaluated_as_role: role,
            rep_email: Some(rep.to_string()),
            team_id: Some(team.to_string()),
            primary_framework: FiveWinsEvaluation {
                mapping_version: "test".to_string(),
                wins: vec![],
                total_score: 0.0,
                max_score: 100.0,
            },
            supplementary_frameworks: vec![],
            dimension_results,
            overall_score: Some(score),
            incomplete: true,
            narrative: String::new(),
            next_action: None,
            rubric_versions: BTreeMap::new(),
            evaluated_at: Utc::now(),
        }
    }

    #[tokio::test]
    async fn test_save_and_get_round_trip() {
        let conn = test_connection().await;
        let stored = evaluation("call_1", "Dana@Vendor.io", "west", RoleVariant::Ae, 71.0);

        SessionRepository::save(&conn, &stored).await.unwrap();
        let loaded = SessionRepository::get(&conn, "call_1").await.unwrap().unwrap();

        assert_eq!(loaded, stored);
        assert!(SessionRepository::get(&conn, "call_2").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_filters_by_role_and_window() {
        let conn = test_connection().await;
        SessionRepository::save(&conn, &evaluation("c1", "a@v.io", "west", RoleVariant::Ae, 60.0))
            .await
            .unwrap();
        SessionRepository::save(&conn, &evaluation("c2", "b@v.io", "west", RoleVariant::Se, 90.0))
            .await
            .unwrap();
        let mut old = evaluation("c3", "c@v.io", "west", RoleVariant::Ae, 30.0);
        old.evaluated_at = Utc::now() - Duration::days(120);
        SessionRepository::save(&conn, &old).await.unwrap();

        let sessions = SessionRepository::list(&conn, RoleVariant::Ae, &TimeWindow::last_days(30))
            .await
            .unwrap();

        assert_eq!(sessions.len(), 1);
        assert_eq!(sessions[0].call_id, "c1");
        assert_eq!(sessions[0].rep_email, "a@v.io");
        assert_eq!(sessions[0].score_for(Some(Dimension::Discovery)), Some(60.0));
        assert_eq!(sessions[0].score_for(Some(Dimension::Engagement)), None);
    }

    #[tokio::test]
    async fn test_role_lookups() {
        let conn = test_connection().await;
        SessionRepository::save(&conn, &evaluation("c1", "a@v.io", "west", RoleVariant::Se, 60.0))
            .await
            .unwrap();
        SessionRepository::save(&conn, &evaluation("c2", "b@v.io", "west", RoleVariant::Se, 70.0))
            .await
            .unwrap();
        SessionRepository::save(&conn, &evaluation("c3", "c@v.io", "west", RoleVariant::Ae, 80.0))
            .await
            .unwrap();

        let counts = SessionRepository::team_role_counts(&conn, "west").await.unwrap();
        assert_eq!(counts, vec![(RoleVariant::Se, 2), (RoleVariant::Ae, 1)]);
        assert!(SessionRepository::team_role_counts(&conn, "east").await.unwrap().is_empty());

        assert_eq!(
            SessionRepository::latest_role_for_rep(&conn, "C@V.io").await.unwrap(),
            Some(RoleVariant::Ae)
        );
    }
}
