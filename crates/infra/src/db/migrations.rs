//! Idempotent schema set-up, run at start-up.

use tracing::info;

use super::database::{Database, Statement};
use super::error::DbError;

const SCHEMA: &[&str] = &[
    r#"
    CREATE TABLE IF NOT EXISTS surveys (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        form_type TEXT NOT NULL,
        submitter_id TEXT,
        name TEXT,
        age INTEGER,
        gender TEXT,
        department TEXT,
        position TEXT,
        work_years INTEGER,
        work_months INTEGER,
        daily_work_hours INTEGER,
        physical_burden TEXT,
        has_symptoms INTEGER NOT NULL DEFAULT 0,
        selections TEXT NOT NULL DEFAULT '{}',
        responses TEXT NOT NULL,
        status TEXT NOT NULL DEFAULT 'submitted' CHECK (status IN ('submitted', 'deleted')),
        submission_date TEXT NOT NULL,
        created_at TEXT NOT NULL,
        updated_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_surveys_form_type ON surveys (form_type)",
    "CREATE INDEX IF NOT EXISTS idx_surveys_status ON surveys (status)",
    "CREATE INDEX IF NOT EXISTS idx_surveys_submission_date ON surveys (submission_date)",
    r#"
    CREATE TABLE IF NOT EXISTS audit_logs (
        id INTEGER PRIMARY KEY AUTOINCREMENT,
        actor TEXT NOT NULL,
        action TEXT NOT NULL,
        details TEXT,
        created_at TEXT NOT NULL
    )
    "#,
    "CREATE INDEX IF NOT EXISTS idx_audit_logs_created_at ON audit_logs (created_at)",
];

pub async fn run_migrations(db: &Database) -> Result<(), DbError> {
    let statements = SCHEMA.iter().map(|sql| Statement::new(*sql, Vec::new())).collect();
    db.transaction(statements).await?;
    info!(statements = SCHEMA.len(), "schema migrations applied");
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn migrations_are_idempotent() {
        let db = Database::connect_in_memory().await.unwrap();
        run_migrations(&db).await.unwrap();
        run_migrations(&db).await.unwrap();
        assert_eq!(db.count("surveys", None, &[]).await.unwrap(), 0);
        assert_eq!(db.count("audit_logs", None, &[]).await.unwrap(), 0);
    }
}
