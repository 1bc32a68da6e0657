use std::sync::Arc;

use reqwest::StatusCode;
use serde_json::json;

use safework_ai::FixedCompletion;
use safework_api::app::services::{AppServices, Backends, Workers};
use safework_core::SystemClock;
use safework_infra::AppConfig;
use safework_infra::cache::InMemoryKvStore;
use safework_infra::db::{Database, run_migrations};
use safework_infra::jobs::{InMemoryQueue, RetryPolicy};
use safework_infra::storage::{InMemoryObjectStore, ObjectStore};

const ADMIN: &str = "safety-officer";

struct TestServer {
    base_url: String,
    services: Arc<AppServices>,
    workers: Option<Workers>,
    handle: tokio::task::JoinHandle<()>,
}

impl TestServer {
    async fn spawn() -> Self {
        // Same router as prod, in-process backends, ephemeral port.
        let config = AppConfig::from_lookup(|key| match key {
            "QUEUE_POLL_MS" => Some("20".to_string()),
            _ => None,
        })
        .expect("default config is valid");

        let database = Database::connect_in_memory().await.expect("in-memory sqlite");
        run_migrations(&database).await.expect("migrations");

        let services = Arc::new(AppServices::from_backends(
            config,
            Backends {
                database,
                cache: Arc::new(InMemoryKvStore::new()),
                storage: Arc::new(InMemoryObjectStore::new()),
                queue: Arc::new(InMemoryQueue::new(RetryPolicy::default())),
                ai: Arc::new(FixedCompletion::replying("## Summary\nNo elevated risk.")),
                clock: SystemClock::shared(),
            },
        ));
        let workers = services.spawn_workers();
        let app = safework_api::app::build_app(services.clone());

        let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
            .await
            .expect("failed to bind ephemeral port");
        let addr = listener.local_addr().unwrap();
        let base_url = format!("http://{}", addr);

        let handle = tokio::spawn(async move {
            axum::serve(listener, app).await.unwrap();
        });

        Self {
            base_url,
            services,
            workers: Some(workers),
            handle,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url, path)
    }

    async fn submit(&self, client: &reqwest::Client, body: serde_json::Value) -> i64 {
        let res = client.post(self.url("/api/surveys")).json(&body).send().await.unwrap();
        assert_eq!(res.status(), StatusCode::CREATED);
        let body: serde_json::Value = res.json().await.unwrap();
        body["submissionId"].as_i64().expect("numeric submission id")
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.handle.abort();
        self.workers.take();
    }
}

#[tokio::test]
async fn submission_is_persisted_and_readable_by_id() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/api/surveys"))
        .json(&json!({ "form_type": "001", "name": "홍길동", "age": 35, "gender": "남" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["success"], true);
    let id = body["submissionId"].as_i64().expect("submissionId present");

    let res = client.get(srv.url(&format!("/api/surveys/{id}"))).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["data"]["age"], 35);
    assert_eq!(body["data"]["responses"]["name"], "홍길동");
    assert_eq!(body["data"]["status"], "submitted");
}

#[tokio::test]
async fn form_encoded_submission_collects_checkbox_groups() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/api/surveys"))
        .header("content-type", "application/x-www-form-urlencoded")
        .body("form_type=001&name=%EA%B9%80%EC%B2%A0%EC%88%98&age=41&gender=%EB%82%A8&pain_areas%5B%5D=neck&pain_areas%5B%5D=back")
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::CREATED);
    let id = res.json::<serde_json::Value>().await.unwrap()["submissionId"].as_i64().unwrap();

    let body: serde_json::Value = client
        .get(srv.url(&format!("/api/surveys/{id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["age"], 41);
    assert_eq!(body["data"]["selections"]["pain_areas"], json!(["neck", "back"]));
    assert_eq!(body["data"]["has_symptoms"], true);
}

#[tokio::test]
async fn invalid_submissions_are_rejected_with_400() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let missing_age = client
        .post(srv.url("/api/surveys"))
        .json(&json!({ "form_type": "001", "name": "홍길동", "gender": "남" }))
        .send()
        .await
        .unwrap();
    assert_eq!(missing_age.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = missing_age.json().await.unwrap();
    assert_eq!(body["success"], false);
    assert_eq!(body["error"], "validation_error");

    let unknown_form = client
        .post(srv.url("/api/surveys"))
        .json(&json!({ "form_type": "999", "name": "x" }))
        .send()
        .await
        .unwrap();
    assert_eq!(unknown_form.status(), StatusCode::BAD_REQUEST);

    let malformed = client
        .post(srv.url("/api/surveys"))
        .header("content-type", "application/json")
        .body("{not json")
        .send()
        .await
        .unwrap();
    assert_eq!(malformed.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = malformed.json().await.unwrap();
    assert_eq!(body["error"], "invalid_json");

    let array_body = client
        .post(srv.url("/api/surveys"))
        .json(&json!([{ "form_type": "001" }]))
        .send()
        .await
        .unwrap();
    assert_eq!(array_body.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = array_body.json().await.unwrap();
    assert_eq!(body["error"], "validation_error");
    assert_eq!(body["message"], "payload must be a JSON object");

    let stats: serde_json::Value = client.get(srv.url("/api/stats")).send().await.unwrap().json().await.unwrap();
    assert_eq!(stats["data"]["total"], 0);
}

#[tokio::test]
async fn unknown_submission_is_404_and_bad_id_is_400() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/api/surveys/424242")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client.get(srv.url("/api/surveys/abc")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn admin_operations_require_an_authenticated_caller() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let id = srv
        .submit(&client, json!({ "form_type": "001", "name": "홍길동", "age": 35, "gender": "남" }))
        .await;

    let res = client.delete(srv.url(&format!("/api/surveys/{id}"))).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client
        .post(srv.url("/api/admin/jobs"))
        .json(&json!({ "type": "cleanup" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);

    let res = client.get(srv.url("/api/admin/jobs/dead-letters")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::UNAUTHORIZED);
}

#[tokio::test]
async fn update_and_soft_delete_keep_the_row_readable() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    let id = srv
        .submit(&client, json!({ "form_type": "001", "name": "홍길동", "age": 35, "gender": "남" }))
        .await;

    let res = client
        .put(srv.url(&format!("/api/surveys/{id}")))
        .header("x-authenticated-user", ADMIN)
        .json(&json!({ "age": 36 }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["data"]["age"], 36);
    assert_eq!(body["data"]["responses"]["name"], "홍길동");

    let res = client
        .delete(srv.url(&format!("/api/surveys/{id}")))
        .header("x-authenticated-user", ADMIN)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);

    let body: serde_json::Value = client
        .get(srv.url(&format!("/api/surveys/{id}")))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["data"]["status"], "deleted");

    let list: serde_json::Value = client.get(srv.url("/api/surveys")).send().await.unwrap().json().await.unwrap();
    assert_eq!(list["total"], 0);
    let list: serde_json::Value = client
        .get(srv.url("/api/surveys?include_deleted=true"))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(list["total"], 1);

    let stats: serde_json::Value = client.get(srv.url("/api/stats")).send().await.unwrap().json().await.unwrap();
    assert_eq!(stats["data"]["total"], 0);
}

#[tokio::test]
async fn csv_export_is_an_attachment_with_bom() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    srv.submit(&client, json!({ "form_type": "001", "name": "홍길동", "age": 35, "gender": "남" }))
        .await;

    let res = client
        .get(srv.url("/api/surveys/export.csv?form_type=001"))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "text/csv; charset=utf-8");
    let disposition = res.headers()["content-disposition"].to_str().unwrap().to_string();
    assert!(disposition.starts_with("attachment; filename=\"safework_001_"));
    assert!(disposition.ends_with(".csv\""));

    let body = res.bytes().await.unwrap();
    assert!(body.starts_with(&[0xEF, 0xBB, 0xBF]));
    let text = String::from_utf8_lossy(&body);
    assert!(text.contains("홍길동"));
}

#[tokio::test]
async fn stats_and_metrics_on_an_empty_store() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let body: serde_json::Value = client.get(srv.url("/api/stats")).send().await.unwrap().json().await.unwrap();
    assert_eq!(body["success"], true);
    assert_eq!(body["data"]["total"], 0);
    assert_eq!(body["data"]["average_age"], 0.0);
    assert_eq!(body["data"]["by_form_type"]["001"], 0);
    assert_eq!(body["data"]["daily"].as_array().unwrap().len(), 7);

    let res = client.get(srv.url("/metrics")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert!(res.headers()["content-type"].to_str().unwrap().starts_with("text/plain"));
    let text = res.text().await.unwrap();
    assert!(text.contains("safework_up 1"));
    assert!(text.contains("safework_surveys_total 0"));
}

#[tokio::test]
async fn enqueued_export_is_processed_and_downloadable() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();
    srv.submit(&client, json!({ "form_type": "001", "name": "홍길동", "age": 35, "gender": "남" }))
        .await;

    let res = client
        .post(srv.url("/api/admin/jobs"))
        .header("x-authenticated-user", ADMIN)
        .json(&json!({ "type": "export", "payload": { "form_type": "001", "format": "csv" } }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::ACCEPTED);
    let body: serde_json::Value = res.json().await.unwrap();
    assert!(body["messageId"].as_str().is_some());

    // The embedded consumer polls every 20ms.
    let mut artifact = None;
    for _ in 0..100 {
        let objects = srv.services.storage.list("exports/001/").await.unwrap();
        if let Some(info) = objects.into_iter().next() {
            artifact = Some(info);
            break;
        }
        tokio::time::sleep(std::time::Duration::from_millis(20)).await;
    }
    let artifact = artifact.expect("export artifact written by the worker");
    let filename = artifact.metadata["filename"].clone();

    let res = client.get(srv.url(&format!("/api/downloads/{filename}"))).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    assert_eq!(res.headers()["content-type"], "text/csv; charset=utf-8");
    assert!(String::from_utf8_lossy(&res.bytes().await.unwrap()).contains("홍길동"));
}

#[tokio::test]
async fn unknown_job_type_and_unknown_download() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client
        .post(srv.url("/api/admin/jobs"))
        .header("x-authenticated-user", ADMIN)
        .json(&json!({ "type": "teleport" }))
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::BAD_REQUEST);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["error"], "unknown_job_type");

    let res = client.get(srv.url("/api/downloads/nothing_here.csv")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::NOT_FOUND);

    let res = client
        .get(srv.url("/api/admin/jobs/dead-letters"))
        .header("x-authenticated-user", ADMIN)
        .send()
        .await
        .unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["items"], json!([]));
}

#[tokio::test]
async fn health_reports_every_dependency() {
    let srv = TestServer::spawn().await;
    let client = reqwest::Client::new();

    let res = client.get(srv.url("/health")).send().await.unwrap();
    assert_eq!(res.status(), StatusCode::OK);
    let body: serde_json::Value = res.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["database"], true);
    assert_eq!(body["checks"]["queue"], true);
}
