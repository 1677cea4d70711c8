//! Router-level tests exercising the HTTP surface with the mock provider.

mod common;

use axum::body::Body;
use axum::http::{Method, Request, StatusCode};
use axum::Router;
use http_body_util::BodyExt;
use serde_json::{json, Value};
use tower::ServiceExt;

use common::{test_app, wait_for_messages, wait_for_state, TestApp};
use worldline_api::router::build_app_router;
use worldline_api::runner::RunnerState;

async fn build_router(app: &TestApp) -> Router {
    build_app_router(app.state.clone(), &app.state.sim.config)
}

async fn send(
    router: &Router,
    method: Method,
    uri: &str,
    body: Option<Value>,
) -> (StatusCode, Value) {
    let request = match body {
        Some(body) => Request::builder()
            .method(method)
            .uri(uri)
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap(),
        None => Request::builder()
            .method(method)
            .uri(uri)
            .body(Body::empty())
            .unwrap(),
    };
    let response = router.clone().oneshot(request).await.unwrap();
    let status = response.status();
    let bytes = response.into_body().collect().await.unwrap().to_bytes();
    let value = if bytes.is_empty() {
        Value::Null
    } else {
        serde_json::from_slice(&bytes).unwrap_or(Value::Null)
    };
    (status, value)
}

async fn create_session(router: &Router) -> (String, String) {
    let (status, body) = send(
        router,
        Method::POST,
        "/api/session/create",
        Some(json!({
            "world_preset": "a steampunk city",
            "tick_label": "1 month",
            "post_gen_delay_sec": 0,
            "output_language": "en",
        })),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["running"], false);
    (
        body["session_id"].as_str().unwrap().to_string(),
        body["active_branch_id"].as_str().unwrap().to_string(),
    )
}

// ---------------------------------------------------------------------------
// Test: health endpoint
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn health_reports_ok() {
    let app = test_app().await;
    let router = build_router(&app).await;
    let (status, body) = send(&router, Method::GET, "/health", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], "ok");
}

// ---------------------------------------------------------------------------
// Test: session create / detail / settings / history
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn session_lifecycle_round_trips() {
    let app = test_app().await;
    let router = build_router(&app).await;
    let (session_id, branch_id) = create_session(&router).await;

    let (status, detail) =
        send(&router, Method::GET, &format!("/api/session/{session_id}"), None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(detail["world_preset"], "a steampunk city");
    assert_eq!(detail["tick_label"], "1 month");
    assert_eq!(detail["active_branch_id"], branch_id.as_str());
    assert_eq!(detail["output_language"], "en");
    assert_eq!(detail["timeline_step_unit"], "month");

    let (status, _) = send(
        &router,
        Method::PATCH,
        &format!("/api/session/{session_id}/settings"),
        Some(json!({"tick_label": "2 weeks", "timeline_step_unit": "week"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (_, detail) =
        send(&router, Method::GET, &format!("/api/session/{session_id}"), None).await;
    assert_eq!(detail["tick_label"], "2 weeks");
    assert_eq!(detail["timeline_step_unit"], "week");

    let (status, history) = send(&router, Method::GET, "/api/session/history?limit=5", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(history["sessions"][0]["session_id"], session_id.as_str());

    let (status, _) = send(&router, Method::GET, "/api/session/missing-id", None).await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Test: validation failures map to 400
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn empty_world_preset_is_rejected() {
    let app = test_app().await;
    let router = build_router(&app).await;
    let (status, body) = send(
        &router,
        Method::POST,
        "/api/session/create",
        Some(json!({"world_preset": "   "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "VALIDATION_ERROR");
}

// ---------------------------------------------------------------------------
// Test: provider binding round-trip and the start precondition
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn provider_switch_requires_model_reselection() {
    let app = test_app().await;
    let router = build_router(&app).await;
    let (session_id, _) = create_session(&router).await;

    // Starting before any provider is bound is refused.
    let (status, body) = send(
        &router,
        Method::POST,
        &format!("/api/session/{session_id}/start"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "NO_MODEL_SELECTED");

    // Bind the provider without selecting a model: still refused.
    let (status, _) = send(
        &router,
        Method::POST,
        &format!("/api/provider/{session_id}/set"),
        Some(json!({"provider": "mock"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);

    let (status, body) = send(
        &router,
        Method::POST,
        &format!("/api/session/{session_id}/start"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "NO_MODEL_SELECTED");

    // Listing models broadcasts and returns the mock catalogue.
    let (status, body) = send(
        &router,
        Method::GET,
        &format!("/api/provider/{session_id}/models?provider=mock"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let models: Vec<&str> = body["models"]
        .as_array()
        .unwrap()
        .iter()
        .filter_map(Value::as_str)
        .collect();
    assert!(models.contains(&"fixture-v1"));

    // Select a model; the configured view round-trips; start succeeds.
    let (status, view) = send(
        &router,
        Method::POST,
        &format!("/api/provider/{session_id}/select-model"),
        Some(json!({"model_name": "fixture-v1"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["provider"], "mock");
    assert_eq!(view["model_name"], "fixture-v1");
    assert_eq!(view["has_api_key"], false);

    let (status, view) = send(
        &router,
        Method::GET,
        &format!("/api/provider/{session_id}/current"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(view["provider"], "mock");
    assert_eq!(view["model_name"], "fixture-v1");

    let (status, body) = send(
        &router,
        Method::POST,
        &format!("/api/session/{session_id}/start"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["running"], true);

    let (status, body) = send(
        &router,
        Method::POST,
        &format!("/api/session/{session_id}/pause"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["running"], false);
    app.state.runner.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: unknown provider tag is a 400
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn unknown_provider_is_rejected() {
    let app = test_app().await;
    let router = build_router(&app).await;
    let (session_id, _) = create_session(&router).await;

    let (status, body) = send(
        &router,
        Method::POST,
        &format!("/api/provider/{session_id}/set"),
        Some(json!({"provider": "skynet"})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["code"], "PROVIDER_UNSUPPORTED");
}

// ---------------------------------------------------------------------------
// Test: delete-last returns 409 BUSY while running, works after pause
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn delete_last_conflicts_while_running() {
    let app = test_app().await;
    let router = build_router(&app).await;
    let (session_id, branch_id) = create_session(&router).await;
    common::bind_mock_provider(&app.state, &session_id).await;

    let (status, _) = send(
        &router,
        Method::POST,
        &format!("/api/session/{session_id}/start"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    wait_for_messages(&app.state, &branch_id, 1).await;

    let (status, body) = send(
        &router,
        Method::DELETE,
        &format!("/api/message/{session_id}/last?branch_id={branch_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::CONFLICT);
    assert_eq!(body["code"], "BUSY");

    let (status, _) = send(
        &router,
        Method::POST,
        &format!("/api/session/{session_id}/pause"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    wait_for_state(&app.state, &session_id, RunnerState::Paused).await;

    let (status, body) = send(
        &router,
        Method::DELETE,
        &format!("/api/message/{session_id}/last?branch_id={branch_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["branch_id"], branch_id.as_str());
    app.state.runner.shutdown().await;
}

// ---------------------------------------------------------------------------
// Test: interventions, timeline reads, and message edits
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn intervention_and_edit_flow() {
    let app = test_app().await;
    let router = build_router(&app).await;
    let (session_id, branch_id) = create_session(&router).await;

    // Queue an intervention; its mirror message shows up in the timeline.
    let (status, body) = send(
        &router,
        Method::POST,
        &format!("/api/intervention/{session_id}"),
        Some(json!({"content": "a drought strikes the north"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["branch_id"], branch_id.as_str());

    let (status, timeline) = send(
        &router,
        Method::GET,
        &format!("/api/timeline/{session_id}?branch_id={branch_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    let messages = timeline["messages"].as_array().unwrap();
    assert_eq!(messages.len(), 1);
    assert_eq!(messages[0]["role"], "user_intervention");
    assert_eq!(messages[0]["seq"], 1);
    let message_id = messages[0]["id"].as_str().unwrap().to_string();

    // Empty interventions are rejected.
    let (status, _) = send(
        &router,
        Method::POST,
        &format!("/api/intervention/{session_id}"),
        Some(json!({"content": "   "})),
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);

    // Edit the plain message.
    let (status, body) = send(
        &router,
        Method::PATCH,
        &format!("/api/message/{session_id}/{message_id}"),
        Some(json!({"content": "a flood strikes the south"})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["message"]["content"], "a flood strikes the south");
    assert_eq!(body["message"]["is_user_edited"], true);
    assert_eq!(body["message"]["seq"], 1);

    // Editing an unknown message is a 404.
    let (status, _) = send(
        &router,
        Method::PATCH,
        &format!("/api/message/{session_id}/nonexistent"),
        Some(json!({"content": "x"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Test: branch fork and switch over HTTP
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn branch_fork_and_switch() {
    let app = test_app().await;
    let router = build_router(&app).await;
    let (session_id, branch_id) = create_session(&router).await;

    let (status, body) = send(
        &router,
        Method::POST,
        &format!("/api/branch/{session_id}/fork"),
        Some(json!({"source_branch_id": branch_id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["name"], "branch-2");
    let fork_id = body["id"].as_str().unwrap().to_string();

    let (status, body) = send(
        &router,
        Method::POST,
        &format!("/api/branch/{session_id}/switch"),
        Some(json!({"branch_id": fork_id})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active_branch_id"], fork_id.as_str());

    let (status, body) = send(
        &router,
        Method::GET,
        &format!("/api/branch/{session_id}"),
        None,
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["active_branch_id"], fork_id.as_str());
    assert_eq!(body["branches"].as_array().unwrap().len(), 2);

    // Forking from a message that is not in the source branch fails.
    let (status, _) = send(
        &router,
        Method::POST,
        &format!("/api/branch/{session_id}/fork"),
        Some(json!({"source_branch_id": branch_id, "from_message_id": "ghost"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);
}

// ---------------------------------------------------------------------------
// Test: debug settings round-trip
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn debug_settings_round_trip() {
    let app = test_app().await;
    let router = build_router(&app).await;

    let (status, settings) = send(&router, Method::GET, "/api/debug/settings", None).await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(settings["default_post_gen_delay_sec"], 0);

    let (status, updated) = send(
        &router,
        Method::PATCH,
        "/api/debug/settings",
        Some(json!({"default_post_gen_delay_sec": 9, "memory_max_snippets": 3})),
    )
    .await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(updated["default_post_gen_delay_sec"], 9);
    assert_eq!(updated["memory_max_snippets"], 3);

    let (_, settings) = send(&router, Method::GET, "/api/debug/settings", None).await;
    assert_eq!(settings["default_post_gen_delay_sec"], 9);
}
