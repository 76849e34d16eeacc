use chrono::Utc;
use libsql::{params, Connection};

use crate::error::Result;
use crate::models::{CallMetadata, RoleVariant, Transcript};

use super::{from_db_time, parse_column, to_db_time};

pub struct CallRepository;

impl CallRepository {
    /// Insert or replace a call. A re-import keeps a previously recorded
    /// evaluated role.
    pub async fn save(
        conn: &Connection,
        transcript: &Transcript,
        metadata: &CallMetadata,
    ) -> Result<()> {
        let now = to_db_time(Utc::now());
        conn.execute(
            r#"
            INSERT INTO calls (
                call_id, segments, participants, duration, evaluated_role,
                recorded_at, created_at, updated_at
            ) VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?7)
            ON CONFLICT(call_id) DO UPDATE SET
                segments = excluded.segments,
                participants = excluded.participants,
                duration = excluded.duration,
                evaluated_role = COALESCE(excluded.evaluated_role, calls.evaluated_role),
                recorded_at = excluded.recorded_at,
                updated_at = excluded.updated_at
            "#,
            params![
                transcript.call_id.clone(),
                serde_json::to_string(&transcript.segments)?,
                serde_json::to_string(&metadata.participants)?,
                metadata.duration.max(transcript.total_duration),
                metadata.evaluated_role.map(|r| r.as_str().to_string()),
                metadata.recorded_at.map(to_db_time),
                now,
            ],
        )
        .await?;

        Ok(())
    }

    pub async fn get_transcript(conn: &Connection, call_id: &str) -> Result<Option<Transcript>> {
        let mut rows = conn
            .query(
                "SELECT call_id, segments, duration FROM calls WHERE call_id = ?1",
                params![call_id],
            )
            .await?;

        if let Some(row) = rows.next().await? {
            Ok(Some(Transcript {
                call_id: row.get(0)?,
                segments: serde_json::from_str(&row.get::<String>(1)?)?,
                total_duration: row.get(2)?,
            }))
        } else {
            Ok(None)
        }
    }

    pub async fn get_metadata(conn: &Connection, call_id: &str) -> Result<Option<CallMetadata>> {
        let mut rows = conn
            .query(
                r#"
                SELECT call_id, participants, duration, evaluated_role, recorded_at
                FROM calls WHERE call_id = ?1
                "#,
                params![call_id],
            )
            .await?;

        let Some(row) = rows.next().await? else {
            return Ok(None);
        };

        let evaluated_role = match row.get::<Option<String>>(3)? {
            Some(role) => Some(parse_column::<RoleVariant>(&role, "evaluated_role")?),
            None => None,
        };

        Ok(Some(CallMetadata {
            call_id: row.get(0)?,
            participants: serde_json::from_str(&row.get::<String>(1)?)?,
            duration: row.get(2)?,
            evaluated_role,
            recorded_at: row
                .get::<Option<String>>(4)?
                .map(|value| from_db_time(&value)),
        }))
    }

    pub async fn set_evaluated_role(
        conn: &Connection,
        call_id: &str,
        role: RoleVariant,
    ) -> Result<bool> {
        let affected = conn
            .execute(
                "UPDATE calls SET evaluated_role = ?2, updated_at = ?3 WHERE call_id = ?1",
                params![call_id, role.as_str(), to_db_time(Utc::now())],
            )
            .await?;
        Ok(affected > 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::repository::test_connection;
    use crate::models::{Participant, Segment};

    fn call(call_id: &str) -> (Transcript, CallMetadata) {
        let transcript = Transcript {
            call_id: call_id.to_string(),
            segments: vec![Segment {
                speaker: "Dana".to_string(),
                start_time: 0.0,
                end_time: 42.0,
                text: "Thanks for joining, what prompted the evaluation?".to_string(),
            }],
            total_duration: 42.0,
        };
        let metadata = CallMetadata {
            call_id: call_id.to_string(),
            duration: 42.0,
            participants: vec![Participant {
                email: "dana@vendor.io".to_string(),
                name: Some("Dana".to_string()),
                team_id: Some("west".to_string()),
                role: RoleVariant::Ae,
                is_internal: true,
            }],
            evaluated_role: None,
            recorded_at: None,
        };
        (transcript, metadata)
    }

    #[tokio::test]
    async fn test_save_and_load_call() {
        let conn = test_connection().await;
        let (transcript, metadata) = call("call_1");

        CallRepository::save(&conn, &transcript, &metadata).await.unwrap();

        let loaded = CallRepository::get_transcript(&conn, "call_1").await.unwrap().unwrap();
        assert_eq!(loaded, transcript);

        let loaded_meta = CallRepository::get_metadata(&conn, "call_1").await.unwrap().unwrap();
        assert_eq!(loaded_meta.participants, metadata.participants);
        assert_eq!(loaded_meta.evaluated_role, None);

        assert!(CallRepository::get_transcript(&conn, "missing").await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_evaluated_role_survives_reimport() {
        let conn = test_connection().await;
        let (transcript, metadata) = call("call_2");
        CallRepository::save(&conn, &transcript, &metadata).await.unwrap();

        assert!(CallRepository::set_evaluated_role(&conn, "call_2", RoleVariant::Se)
            .await
            .unwrap());
        CallRepository::save(&conn, &transcript, &metadata).await.unwrap();

        let loaded = CallRepository::get_metadata(&conn, "call_2").await.unwrap().unwrap();
        assert_eq!(loaded.evaluated_role, Some(RoleVariant::Se));
        assert!(!CallRepository::set_evaluated_role(&conn, "nope", RoleVariant::Ae)
            .await
            .unwrap());
    }
}
