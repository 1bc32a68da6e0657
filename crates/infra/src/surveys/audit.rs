//! Append-only audit log.

use chrono::{DateTime, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::instrument;

use safework_core::ActorId;

use crate::db::{Database, DbError, SqlValue, parse_timestamp};

pub mod actions {
    pub const SURVEY_SUBMITTED: &str = "survey.submitted";
    pub const SURVEY_UPDATED: &str = "survey.updated";
    pub const SURVEY_DELETED: &str = "survey.deleted";
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AuditEntry {
    pub id: i64,
    pub actor: String,
    pub action: String,
    pub details: JsonValue,
    pub created_at: DateTime<Utc>,
}

#[derive(Debug, Clone)]
pub struct AuditLog {
    db: Database,
}

impl AuditLog {
    pub fn new(db: Database) -> Self {
        Self { db }
    }

    #[instrument(skip(self, details), fields(actor = %actor), err)]
    pub async fn append(
        &self,
        actor: &ActorId,
        action: &str,
        details: &JsonValue,
        at: DateTime<Utc>,
    ) -> Result<i64, DbError> {
        self.db
            .insert(
                "audit_logs",
                &[
                    ("actor", actor.as_str().into()),
                    ("action", action.into()),
                    ("details", SqlValue::json(details)),
                    ("created_at", SqlValue::timestamp(at)),
                ],
            )
            .await
    }

    /// Newest first.
    pub async fn recent(&self, limit: u32) -> Result<Vec<AuditEntry>, DbError> {
        let rows = self
            .db
            .query(
                "SELECT id, actor, action, details, created_at FROM audit_logs ORDER BY id DESC LIMIT ?",
                &[i64::from(limit).into()],
            )
            .await?;

        rows.into_iter()
            .map(|row| {
                let details = row
                    .get("details")
                    .and_then(JsonValue::as_str)
                    .map(serde_json::from_str)
                    .transpose()
                    .map_err(|e| DbError::Decode(format!("audit details: {e}")))?
                    .unwrap_or(JsonValue::Null);
                Ok(AuditEntry {
                    id: row.get("id").and_then(JsonValue::as_i64).unwrap_or_default(),
                    actor: str_col(&row, "actor"),
                    action: str_col(&row, "action"),
                    details,
                    created_at: parse_timestamp(&str_col(&row, "created_at"))?,
                })
            })
            .collect()
    }
}

fn str_col(row: &crate::db::Row, name: &str) -> String {
    row.get(name)
        .and_then(JsonValue::as_str)
        .unwrap_or_default()
        .to_string()
}

#[cfg(test)]
mod tests {
    use chrono::{Duration, TimeZone};
    use serde_json::json;

    use super::*;
    use crate::db::run_migrations;

    async fn log() -> AuditLog {
        let db = Database::connect_in_memory().await.unwrap();
        run_migrations(&db).await.unwrap();
        AuditLog::new(db)
    }

    fn at(minutes: i64) -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 6, 15, 9, 0, 0).unwrap() + Duration::minutes(minutes)
    }

    #[tokio::test]
    async fn stores_actor_action_and_details_verbatim() {
        let log = log().await;
        let actor = ActorId::new("안전관리자 kim@example.com");
        let details = json!({ "submission_id": 7, "changed_fields": ["age", "name"] });

        let id = log.append(&actor, actions::SURVEY_UPDATED, &details, at(0)).await.unwrap();

        let entries = log.recent(10).await.unwrap();
        assert_eq!(entries.len(), 1);
        assert_eq!(
            entries[0],
            AuditEntry {
                id,
                actor: "안전관리자 kim@example.com".to_string(),
                action: "survey.updated".to_string(),
                details,
                created_at: at(0),
            }
        );
    }

    #[tokio::test]
    async fn entries_are_appended_in_order_and_never_rewritten() {
        let log = log().await;
        let first = log
            .append(&ActorId::anonymous(), actions::SURVEY_SUBMITTED, &json!({ "submission_id": 1 }), at(0))
            .await
            .unwrap();
        let before = log.recent(10).await.unwrap();

        let second = log
            .append(&ActorId::new("admin"), actions::SURVEY_DELETED, &json!({ "submission_id": 1 }), at(5))
            .await
            .unwrap();
        let third = log
            .append(&ActorId::new("admin"), actions::SURVEY_UPDATED, &json!({}), at(1))
            .await
            .unwrap();
        assert!(first < second && second < third);

        let entries = log.recent(10).await.unwrap();
        let ids: Vec<i64> = entries.iter().map(|e| e.id).collect();
        assert_eq!(ids, vec![third, second, first]);
        assert_eq!(entries.last(), before.first());
        assert_eq!(entries[2].actor, "anonymous");
        assert_eq!(entries[0].created_at, at(1));
    }

    #[tokio::test]
    async fn recent_honours_the_limit() {
        let log = log().await;
        for i in 0..5 {
            log.append(&ActorId::new("admin"), actions::SURVEY_SUBMITTED, &json!({ "n": i }), at(i))
                .await
                .unwrap();
        }
        let entries = log.recent(2).await.unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].details["n"], 4);
        assert_eq!(entries[1].details["n"], 3);
    }
}
