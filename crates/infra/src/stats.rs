//! Read-only survey statistics: JSON summary and line-oriented exposition.

use std::collections::BTreeMap;
use std::fmt::Write as _;

use chrono::{DateTime, Duration, NaiveDate, Utc};
use serde::Serialize;
use serde_json::Value as JsonValue;
use tracing::instrument;

use safework_core::SharedClock;
use safework_survey::{FormType, SurveyStatus};

use crate::db::{Database, DbError, SqlValue, format_timestamp, parse_timestamp};
use crate::metrics::MetricsSnapshot;

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct DailyCount {
    pub date: NaiveDate,
    pub count: i64,
}

/// Aggregates over non-deleted submissions. Every field defaults to zero on an empty table.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StatsSummary {
    pub total: i64,
    /// Every known form code, including those with no rows.
    pub by_form_type: BTreeMap<String, i64>,
    pub symptom_positive: i64,
    pub average_age: f64,
    pub last_submission: Option<DateTime<Utc>>,
    /// Oldest first, one entry per day of the trailing window.
    pub daily: Vec<DailyCount>,
}

#[derive(Clone)]
pub struct StatisticsAggregator {
    db: Database,
    clock: SharedClock,
    window_days: u32,
}

impl std::fmt::Debug for StatisticsAggregator {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("StatisticsAggregator")
            .field("db", &self.db)
            .field("window_days", &self.window_days)
            .finish_non_exhaustive()
    }
}

fn int(row: &serde_json::Map<String, JsonValue>, key: &str) -> i64 {
    row.get(key)
        .and_then(|v| v.as_i64().or_else(|| v.as_f64().map(|f| f as i64)))
        .unwrap_or(0)
}

impl StatisticsAggregator {
    pub fn new(db: Database, clock: SharedClock, window_days: u32) -> Self {
        Self {
            db,
            clock,
            window_days: window_days.max(1),
        }
    }

    #[instrument(skip(self), err)]
    pub async fn summary(&self) -> Result<StatsSummary, DbError> {
        let live = SqlValue::from(SurveyStatus::Submitted.as_str());

        let totals = self
            .db
            .query_first(
                "SELECT COUNT(*) AS total, COALESCE(SUM(has_symptoms), 0) AS symptom_positive, \
                 AVG(age) AS average_age, MAX(submission_date) AS last_submission \
                 FROM surveys WHERE status = ?",
                std::slice::from_ref(&live),
            )
            .await?
            .unwrap_or_default();

        let mut by_form_type: BTreeMap<String, i64> =
            FormType::ALL.iter().map(|f| (f.code().to_string(), 0)).collect();
        let per_form = self
            .db
            .query(
                "SELECT form_type, COUNT(*) AS n FROM surveys WHERE status = ? GROUP BY form_type",
                std::slice::from_ref(&live),
            )
            .await?;
        for row in &per_form {
            if let Some(code) = row.get("form_type").and_then(JsonValue::as_str) {
                by_form_type.insert(code.to_string(), int(row, "n"));
            }
        }

        let today = self.clock.now().date_naive();
        let first_day = today - Duration::days(i64::from(self.window_days) - 1);
        let window_start = first_day.and_time(chrono::NaiveTime::MIN).and_utc();
        let per_day = self
            .db
            .query(
                "SELECT substr(submission_date, 1, 10) AS day, COUNT(*) AS n FROM surveys \
                 WHERE status = ? AND submission_date >= ? GROUP BY day",
                &[live.clone(), SqlValue::Text(format_timestamp(window_start))],
            )
            .await?;
        let counts: BTreeMap<String, i64> = per_day
            .iter()
            .filter_map(|row| {
                row.get("day")
                    .and_then(JsonValue::as_str)
                    .map(|d| (d.to_string(), int(row, "n")))
            })
            .collect();
        let daily = first_day
            .iter_days()
            .take(self.window_days as usize)
            .map(|date| DailyCount {
                date,
                count: counts.get(&date.format("%Y-%m-%d").to_string()).copied().unwrap_or(0),
            })
            .collect();

        let average_age = totals
            .get("average_age")
            .and_then(JsonValue::as_f64)
            .map(|a| (a * 10.0).round() / 10.0)
            .unwrap_or(0.0);
        let last_submission = match totals.get("last_submission").and_then(JsonValue::as_str) {
            Some(raw) => Some(parse_timestamp(raw)?),
            None => None,
        };

        Ok(StatsSummary {
            total: int(&totals, "total"),
            by_form_type,
            symptom_positive: int(&totals, "symptom_positive"),
            average_age,
            last_submission,
            daily,
        })
    }
}

fn family(out: &mut String, name: &str, kind: &str, help: &str) {
    let _ = writeln!(out, "# HELP {name} {help}");
    let _ = writeln!(out, "# TYPE {name} {kind}");
}

/// Render `name{labels} value` lines with `# HELP`/`# TYPE` headers.
///
/// A failed summary still yields a body: `safework_up 0` plus the process counters.
pub fn render_exposition(summary: Result<&StatsSummary, &DbError>, counters: &MetricsSnapshot) -> String {
    let mut out = String::new();

    family(&mut out, "safework_up", "gauge", "1 when survey statistics could be read.");
    match summary {
        Ok(s) => {
            let _ = writeln!(out, "safework_up 1");

            family(&mut out, "safework_surveys_total", "gauge", "Non-deleted survey submissions.");
            let _ = writeln!(out, "safework_surveys_total {}", s.total);

            family(&mut out, "safework_surveys_by_form", "gauge", "Non-deleted submissions per form type.");
            for (form_type, count) in &s.by_form_type {
                let _ = writeln!(out, "safework_surveys_by_form{{form_type=\"{form_type}\"}} {count}");
            }

            family(&mut out, "safework_symptom_positive_total", "gauge", "Submissions reporting symptoms.");
            let _ = writeln!(out, "safework_symptom_positive_total {}", s.symptom_positive);

            family(&mut out, "safework_average_age", "gauge", "Average respondent age.");
            let _ = writeln!(out, "safework_average_age {}", s.average_age);

            family(
                &mut out,
                "safework_last_submission_timestamp_seconds",
                "gauge",
                "Unix time of the latest submission, 0 when none.",
            );
            let last = s.last_submission.map(|t| t.timestamp()).unwrap_or(0);
            let _ = writeln!(out, "safework_last_submission_timestamp_seconds {last}");

            family(&mut out, "safework_submissions_daily", "gauge", "Submissions per UTC day.");
            for day in &s.daily {
                let _ = writeln!(out, "safework_submissions_daily{{date=\"{}\"}} {}", day.date, day.count);
            }
        }
        Err(_) => {
            let _ = writeln!(out, "safework_up 0");
        }
    }

    let counter_lines = [
        ("safework_submissions_accepted_total", "Submissions accepted by this process.", counters.submissions),
        ("safework_mirror_failures_total", "Failed cache mirror writes.", counters.mirror_failures),
        ("safework_audit_failures_total", "Failed audit-log appends.", counters.audit_failures),
        ("safework_jobs_acked_total", "Job messages acknowledged.", counters.jobs_acked),
        ("safework_jobs_retried_total", "Job messages scheduled for retry.", counters.jobs_retried),
        ("safework_jobs_dead_lettered_total", "Job messages dead-lettered.", counters.jobs_dead_lettered),
    ];
    for (name, help, value) in counter_lines {
        family(&mut out, name, "counter", help);
        let _ = writeln!(out, "{name} {value}");
    }
    out
}
