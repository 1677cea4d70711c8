//! Vector-memory collaborator behavior: indexing, retrieval, fork
//! inheritance, invalidation on delete, and re-indexing on edit.

mod common;

use common::{create_test_session, test_app_with};

use worldline_api::config::{AppConfig, MemoryMode};
use worldline_api::services::branches;
use worldline_db::repositories::MessageRepo;

fn vector_config() -> AppConfig {
    AppConfig {
        memory_mode: MemoryMode::Vector,
        ..AppConfig::for_tests()
    }
}

// ---------------------------------------------------------------------------
// Test: persisted messages become retrievable snippets
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn persisted_messages_are_retrievable() {
    let app = test_app_with(vector_config()).await;
    let (session_id, branch_id) = create_test_session(&app.state).await;

    branches::enqueue_intervention(
        &app.state.sim,
        &session_id,
        None,
        "a drought strikes the north",
    )
    .await
    .unwrap();
    branches::enqueue_intervention(&app.state.sim, &session_id, None, "the fleet sets sail")
        .await
        .unwrap();

    let snippets = app
        .state
        .sim
        .memory
        .retrieve_context(&session_id, &branch_id, "what about the drought in the north?")
        .await;
    assert!(!snippets.is_empty());
    assert_eq!(snippets[0], "a drought strikes the north");
}

// ---------------------------------------------------------------------------
// Test: fork inherits the memory scope up to the cut
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn fork_inherits_memory_scope() {
    let app = test_app_with(vector_config()).await;
    let (session_id, branch_id) = create_test_session(&app.state).await;

    branches::enqueue_intervention(&app.state.sim, &session_id, None, "iron prices collapse")
        .await
        .unwrap();

    let fork = branches::fork_branch(&app.state.sim, &session_id, &branch_id, None)
        .await
        .unwrap();

    let snippets = app
        .state
        .sim
        .memory
        .retrieve_context(&session_id, &fork.id, "what happened to iron prices?")
        .await;
    assert_eq!(snippets, vec!["iron prices collapse".to_string()]);
}

// ---------------------------------------------------------------------------
// Test: deleting the last message invalidates its memory
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn delete_invalidates_memory_items() {
    let app = test_app_with(vector_config()).await;
    let (session_id, branch_id) = create_test_session(&app.state).await;

    branches::enqueue_intervention(&app.state.sim, &session_id, None, "the dam cracks")
        .await
        .unwrap();
    branches::delete_last_message(&app.state.sim, &session_id, None)
        .await
        .unwrap();

    let snippets = app
        .state
        .sim
        .memory
        .retrieve_context(&session_id, &branch_id, "what about the dam?")
        .await;
    assert!(snippets.is_empty());
}

// ---------------------------------------------------------------------------
// Test: editing a message replaces its indexed content
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread")]
async fn edit_reindexes_message_content() {
    let app = test_app_with(vector_config()).await;
    let (session_id, branch_id) = create_test_session(&app.state).await;

    let (_, mirror) =
        branches::enqueue_intervention(&app.state.sim, &session_id, None, "the dam cracks")
            .await
            .unwrap();

    // Edit through the repo plus the memory hooks, as the handler does.
    let mut tx = app.state.sim.pool.begin().await.unwrap();
    let edited = MessageRepo::edit(&mut tx, &mirror.id, "the dam holds firm", None)
        .await
        .unwrap()
        .unwrap();
    app.state
        .sim
        .memory
        .on_message_deleted(&mut tx, &session_id, &branch_id, &edited.id)
        .await;
    app.state
        .sim
        .memory
        .on_message_persisted(&mut tx, &edited)
        .await;
    tx.commit().await.unwrap();

    let snippets = app
        .state
        .sim
        .memory
        .retrieve_context(&session_id, &branch_id, "status of the dam")
        .await;
    assert_eq!(snippets, vec!["the dam holds firm".to_string()]);
}
