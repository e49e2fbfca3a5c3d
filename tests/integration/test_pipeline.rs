//! End-to-end tests for the grading API.
//!
//! Each test starts the real router on an ephemeral port, backed by an
//! in-memory datastore and a mock OpenAI-compatible completion service,
//! and drives it over HTTP.

use std::net::SocketAddr;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use rubric_grading::{AnalysisResult, ExerciseBrief, OpenAiCompatClient};
use rubric_pipeline::{
    create_router, AppState, Config, Datastore, MemoryStore, Pipeline, Submission, UserAccount,
};
use serde_json::{json, Value};
use wiremock::matchers::{method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

/// Path to the fixtures directory.
fn fixture_path() -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR")).join("fixtures")
}

fn read_fixture<T: serde::de::DeserializeOwned>(name: &str) -> T {
    let contents = std::fs::read_to_string(fixture_path().join(name))
        .unwrap_or_else(|e| panic!("Failed to read fixture {name}: {e}"));
    serde_json::from_str(&contents).expect("Fixture is not valid JSON")
}

/// Completion output with all ten scores and an aggregate of 7.5.
fn valid_output() -> String {
    json!({
        "scores": {
            "clarity": 7, "audienceRelevance": 8, "persuasiveness": 6,
            "structure": 9, "grammar": 7, "tone": 8, "attentionGrabbing": 6,
            "consistency": 9, "emotionalAppeal": 7, "callToAction": 8,
            "overallScore": 7.5
        },
        "improvement": {
            "tips": [{"title": "Lead with the offer", "advice": "Put the free month first."}],
            "rewrittenVersion": "<p>Your first month back is <strong>free</strong>.</p>"
        }
    })
    .to_string()
}

fn chat_completion(content: &str) -> Value {
    json!({
        "id": "chatcmpl-test",
        "object": "chat.completion",
        "choices": [{
            "index": 0,
            "message": {"role": "assistant", "content": content},
            "finish_reason": "stop"
        }]
    })
}

/// Mounts a completion endpoint answering with `content`, expected `calls` times.
async fn mock_completion(server: &MockServer, content: &str, calls: u64) {
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(200).set_body_json(chat_completion(content)))
        .expect(calls)
        .mount(server)
        .await;
}

/// Store seeded from the fixtures: `ada` with `credits`, `lin` with none.
async fn seeded_store(credits: u32) -> Arc<MemoryStore> {
    let store = Arc::new(MemoryStore::new());
    store
        .insert_user(&UserAccount::new("ada", credits))
        .await
        .unwrap();
    store.insert_user(&UserAccount::new("lin", 0)).await.unwrap();
    let brief: ExerciseBrief = read_fixture("brief.json");
    store.insert_brief(&brief).await.unwrap();
    let submission: Submission = read_fixture("submission.json");
    store.insert_submission(&submission).await.unwrap();
    store
        .insert_submission(&Submission {
            id: "sub-lin-1".into(),
            user_id: "lin".into(),
            brief_id: "brief-gym".into(),
            response: "Come back.".into(),
            grade: None,
            xp_awarded: false,
        })
        .await
        .unwrap();
    store
}

/// Starts the API against `completion` and returns its base URL.
async fn spawn_server(store: Arc<MemoryStore>, completion: &MockServer) -> String {
    let mut config = Config::load_from_file(&fixture_path().join("rubric.json"))
        .expect("Failed to load fixture config");
    config.grading.base_url = completion.uri();

    let client = OpenAiCompatClient::new(config.grading.client_config()).unwrap();
    let pipeline = Pipeline::new(&config, store, Arc::new(client)).unwrap();
    let router = create_router(AppState::new(pipeline));

    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("Failed to bind");
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(
            listener,
            router.into_make_service_with_connect_info::<SocketAddr>(),
        )
        .await
        .expect("Server failed");
    });

    // Give the server a moment to start
    tokio::time::sleep(Duration::from_millis(50)).await;

    format!("http://{addr}")
}

async fn analyze(
    base: &str,
    route: &str,
    token: Option<&str>,
    submission_id: &str,
    client_ip: &str,
) -> reqwest::Response {
    let mut request = reqwest::Client::new()
        .post(format!("{base}{route}"))
        .header("x-forwarded-for", client_ip)
        .json(&json!({ "submissionId": submission_id }));
    if let Some(token) = token {
        request = request.bearer_auth(token);
    }
    request.send().await.expect("Request failed")
}

async fn error_message(response: reqwest::Response) -> String {
    let body: Value = response.json().await.expect("Error body is not JSON");
    body["error"].as_str().expect("Missing error field").to_string()
}

#[test]
fn test_fixture_config_loads() {
    let config = Config::load_from_file(&fixture_path().join("rubric.json"))
        .expect("Failed to load config");

    assert_eq!(config.rate_limit.max_requests, 3);
    assert_eq!(config.grading.model, "fixture-model");
    assert_eq!(config.auth.tokens.get("token-ada").map(String::as_str), Some("ada"));
    assert_eq!(config.progression.level_table().unwrap().level_for(60), 2);
    assert!(config.serialize_submissions);
}

#[tokio::test]
async fn test_grade_then_cached() {
    let completion = MockServer::start().await;
    mock_completion(&completion, &valid_output(), 1).await;
    let store = seeded_store(3).await;
    let base = spawn_server(store.clone(), &completion).await;

    let first = analyze(&base, "/api/analysis", Some("token-ada"), "sub-ada-1", "198.51.100.1").await;
    assert_eq!(first.status(), 200);
    let first: AnalysisResult = first.json().await.unwrap();
    assert_eq!(first.submission_id, "sub-ada-1");
    assert!((first.scores.overall_score - 7.5).abs() < f64::EPSILON);
    assert_eq!(first.improvement.tips.len(), 1);

    let ada = store.user("ada").await.unwrap().unwrap();
    assert_eq!((ada.credits, ada.total_xp, ada.level), (2, 10, 1));
    let submission = store.submission("sub-ada-1").await.unwrap().unwrap();
    assert_eq!(submission.grade, Some(7.5));

    // The alternate path serves the stored analysis without a second completion call.
    let second = analyze(
        &base,
        "/api/submissions/analyze",
        Some("token-ada"),
        "sub-ada-1",
        "198.51.100.1",
    )
    .await;
    assert_eq!(second.status(), 200);
    let second: AnalysisResult = second.json().await.unwrap();
    assert_eq!(second.id, first.id);

    let ada = store.user("ada").await.unwrap().unwrap();
    assert_eq!((ada.credits, ada.total_xp), (1, 10));
    assert_eq!(store.analysis_count("sub-ada-1"), 1);
}

#[tokio::test]
async fn test_admission_rejections() {
    let completion = MockServer::start().await;
    mock_completion(&completion, &valid_output(), 0).await;
    let store = seeded_store(3).await;
    let base = spawn_server(store.clone(), &completion).await;

    let response = analyze(&base, "/api/analysis", None, "sub-ada-1", "198.51.100.2").await;
    assert_eq!(response.status(), 401);
    assert_eq!(error_message(response).await, "Unauthorized");

    let response = analyze(&base, "/api/analysis", Some("forged"), "sub-ada-1", "198.51.100.3").await;
    assert_eq!(response.status(), 401);

    let response = analyze(&base, "/api/analysis", Some("token-lin"), "sub-lin-1", "198.51.100.4").await;
    assert_eq!(response.status(), 403);
    assert_eq!(error_message(response).await, "Insufficient credits");

    // Another user's submission is indistinguishable from a missing one.
    let response = analyze(&base, "/api/analysis", Some("token-lin"), "sub-ada-1", "198.51.100.5").await;
    assert_eq!(response.status(), 404);
    assert_eq!(error_message(response).await, "Submission not found");

    let ada = store.user("ada").await.unwrap().unwrap();
    assert_eq!(ada.credits, 3);
}

#[tokio::test]
async fn test_rate_limit_per_client() {
    let completion = MockServer::start().await;
    mock_completion(&completion, &valid_output(), 1).await;
    let store = seeded_store(10).await;
    let base = spawn_server(store.clone(), &completion).await;

    for _ in 0..3 {
        let response =
            analyze(&base, "/api/analysis", Some("token-ada"), "sub-ada-1", "203.0.113.9").await;
        assert_eq!(response.status(), 200);
    }
    let response = analyze(&base, "/api/analysis", Some("token-ada"), "sub-ada-1", "203.0.113.9").await;
    assert_eq!(response.status(), 429);

    // A different client is unaffected.
    let response = analyze(&base, "/api/analysis", Some("token-ada"), "sub-ada-1", "203.0.113.10").await;
    assert_eq!(response.status(), 200);

    // Rejected requests are not charged.
    assert_eq!(store.user("ada").await.unwrap().unwrap().credits, 6);
}

#[tokio::test]
async fn test_malformed_output_returns_500() {
    let completion = MockServer::start().await;
    let mut output: Value = serde_json::from_str(&valid_output()).unwrap();
    output["scores"].as_object_mut().unwrap().remove("tone");
    let missing_tone = output.to_string();
    mock_completion(&completion, &missing_tone, 1).await;
    let store = seeded_store(2).await;
    let base = spawn_server(store.clone(), &completion).await;

    let response = analyze(&base, "/api/analysis", Some("token-ada"), "sub-ada-1", "192.0.2.44").await;
    assert_eq!(response.status(), 500);
    assert_eq!(error_message(response).await, "Grading output was malformed");

    // The credit stays spent; nothing is stored and no XP is awarded.
    let ada = store.user("ada").await.unwrap().unwrap();
    assert_eq!((ada.credits, ada.total_xp), (1, 0));
    assert_eq!(store.analysis_count("sub-ada-1"), 0);
}

#[tokio::test]
async fn test_upstream_failure_returns_500() {
    let completion = MockServer::start().await;
    Mock::given(method("POST"))
        .and(path("/chat/completions"))
        .respond_with(ResponseTemplate::new(503).set_body_string("overloaded"))
        .expect(1)
        .mount(&completion)
        .await;
    let store = seeded_store(2).await;
    let base = spawn_server(store, &completion).await;

    let response = analyze(&base, "/api/analysis", Some("token-ada"), "sub-ada-1", "192.0.2.45").await;
    assert_eq!(response.status(), 500);
    let message = error_message(response).await;
    assert_eq!(message, "Grading service unavailable");
    assert!(!message.contains("overloaded"));
}

#[tokio::test]
async fn test_health() {
    let completion = MockServer::start().await;
    let base = spawn_server(Arc::new(MemoryStore::new()), &completion).await;

    let body: Value = reqwest::get(format!("{base}/api/health"))
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["status"], "ok");
}
