// All functions in this module are shared test helpers. Not every test binary
// uses every helper, so we suppress dead_code warnings at the item level.
#![allow(dead_code)]

use std::time::Duration;

use tempfile::TempDir;

use worldline_api::config::AppConfig;
use worldline_api::services::{provider, sessions};
use worldline_api::state::AppState;
use worldline_db::models::message::TimelineMessage;
use worldline_db::repositories::MessageRepo;

/// A test application state backed by a throwaway on-disk SQLite file.
///
/// The temp dir must outlive the state, so it is returned alongside it.
pub struct TestApp {
    pub state: AppState,
    _db_dir: TempDir,
}

/// Build state over a fresh database with test configuration.
pub async fn test_app() -> TestApp {
    test_app_with(AppConfig::for_tests()).await
}

/// Build state over a fresh database with a custom configuration.
pub async fn test_app_with(config: AppConfig) -> TestApp {
    let db_dir = tempfile::tempdir().expect("temp dir");
    let db_url = format!(
        "sqlite://{}/worldline-test.db",
        db_dir.path().to_str().expect("utf-8 temp path")
    );
    let pool = worldline_db::create_pool(&db_url).await.expect("pool");
    worldline_db::init_schema(&pool).await.expect("schema");

    let state = AppState::build(config, pool).expect("state");
    TestApp {
        state,
        _db_dir: db_dir,
    }
}

/// Create a session with zero post-generation delay; returns
/// `(session_id, main_branch_id)`.
pub async fn create_test_session(state: &AppState) -> (String, String) {
    let session = sessions::create_session(
        &state.sim,
        sessions::CreateSessionInput {
            world_preset: "a steampunk city".into(),
            tick_label: Some("1 month".into()),
            post_gen_delay_sec: Some(0),
            output_language: Some("en".into()),
            ..sessions::CreateSessionInput::default()
        },
    )
    .await
    .expect("create session");
    let branch_id = session.active_branch_id.clone().expect("main branch");
    (session.id, branch_id)
}

/// Bind the mock provider with a selected model.
pub async fn bind_mock_provider(state: &AppState, session_id: &str) {
    provider::set_provider(
        &state.sim,
        session_id,
        "mock",
        None,
        None,
        Some("fixture-v1".into()),
    )
    .await
    .expect("bind mock provider");
}

/// Poll until the branch holds at least `count` messages, or panic.
pub async fn wait_for_messages(
    state: &AppState,
    branch_id: &str,
    count: usize,
) -> Vec<TimelineMessage> {
    for _ in 0..400 {
        let mut conn = state.sim.pool.acquire().await.expect("conn");
        let messages = MessageRepo::list_recent(&mut conn, branch_id, 500)
            .await
            .expect("list messages");
        if messages.len() >= count {
            return messages;
        }
        drop(conn);
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("branch {branch_id} never reached {count} messages");
}

/// Poll until the runner reaches the given state, or panic.
pub async fn wait_for_state(
    state: &AppState,
    session_id: &str,
    expected: worldline_api::runner::RunnerState,
) {
    for _ in 0..400 {
        if state.runner.state(session_id).await == expected {
            return;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    panic!("runner for {session_id} never reached {expected:?}");
}
