//! Integration tests for timeline message and intervention persistence.
//!
//! Exercises dense sequence assignment, rollback-by-one deletion, and the
//! consume-at-most-once contract for interventions.

use sqlx::SqlitePool;

use worldline_core::types::{new_id, utc_now};
use worldline_db::models::message::NewMessage;
use worldline_db::models::session::NewSession;
use worldline_db::repositories::{BranchRepo, InterventionRepo, MessageRepo, SessionRepo};

mod common {
    use super::*;
    use worldline_db::models::branch::NewBranch;

    /// Create a session with a `main` branch; returns `(session_id, branch_id)`.
    pub async fn seed_session(pool: &SqlitePool) -> (String, String) {
        worldline_db::init_schema(pool).await.unwrap();
        let session_id = new_id();
        let branch_id = new_id();
        let mut conn = pool.acquire().await.unwrap();
        SessionRepo::create(
            &mut conn,
            &NewSession {
                id: session_id.clone(),
                title: None,
                world_preset: "a steampunk city".into(),
                tick_label: "1 month".into(),
                post_gen_delay_sec: 0,
                active_branch_id: branch_id.clone(),
                output_language: "en".into(),
                timeline_start_iso: utc_now().to_rfc3339(),
                timeline_step_value: 1,
                timeline_step_unit: "month".into(),
            },
        )
        .await
        .unwrap();
        BranchRepo::create(
            &mut conn,
            &NewBranch {
                id: branch_id.clone(),
                session_id: session_id.clone(),
                name: "main".into(),
                parent_branch_id: None,
                fork_from_message_id: None,
            },
        )
        .await
        .unwrap();
        (session_id, branch_id)
    }

    pub fn report(session_id: &str, branch_id: &str, content: &str) -> NewMessage {
        NewMessage {
            session_id: session_id.into(),
            branch_id: branch_id.into(),
            role: "system_report",
            content: content.into(),
            time_jump_label: "1 month".into(),
            model_provider: Some("mock".into()),
            model_name: Some("fixture-v1".into()),
            token_in: None,
            token_out: None,
            report_snapshot_json: None,
        }
    }
}

// ---------------------------------------------------------------------------
// Test: appended seq values are dense 1..N
// ---------------------------------------------------------------------------

#[sqlx::test]
async fn append_assigns_dense_sequences(pool: SqlitePool) {
    let (session_id, branch_id) = common::seed_session(&pool).await;
    let mut conn = pool.acquire().await.unwrap();

    for i in 1..=5 {
        let message = MessageRepo::append(
            &mut conn,
            &common::report(&session_id, &branch_id, &format!("round {i}")),
        )
        .await
        .unwrap();
        assert_eq!(message.seq, i);
    }

    let rows = MessageRepo::list_recent(&mut conn, &branch_id, 100).await.unwrap();
    let seqs: Vec<i64> = rows.iter().map(|m| m.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3, 4, 5]);
}

// ---------------------------------------------------------------------------
// Test: delete_last removes exactly the max seq and preserves density
// ---------------------------------------------------------------------------

#[sqlx::test]
async fn delete_last_decrements_max_seq_by_one(pool: SqlitePool) {
    let (session_id, branch_id) = common::seed_session(&pool).await;
    let mut conn = pool.acquire().await.unwrap();

    for i in 1..=3 {
        MessageRepo::append(
            &mut conn,
            &common::report(&session_id, &branch_id, &format!("round {i}")),
        )
        .await
        .unwrap();
    }

    let deleted = MessageRepo::delete_last(&mut conn, &branch_id)
        .await
        .unwrap()
        .expect("a message to delete");
    assert_eq!(deleted.seq, 3);
    assert_eq!(MessageRepo::max_seq(&mut conn, &branch_id).await.unwrap(), 2);

    let rows = MessageRepo::list_recent(&mut conn, &branch_id, 100).await.unwrap();
    let seqs: Vec<i64> = rows.iter().map(|m| m.seq).collect();
    assert_eq!(seqs, vec![1, 2]);

    // A fresh append continues from the new max.
    let next = MessageRepo::append(&mut conn, &common::report(&session_id, &branch_id, "again"))
        .await
        .unwrap();
    assert_eq!(next.seq, 3);
}

// ---------------------------------------------------------------------------
// Test: delete_last on an empty branch is None
// ---------------------------------------------------------------------------

#[sqlx::test]
async fn delete_last_on_empty_branch_returns_none(pool: SqlitePool) {
    let (_, branch_id) = common::seed_session(&pool).await;
    let mut conn = pool.acquire().await.unwrap();
    assert!(MessageRepo::delete_last(&mut conn, &branch_id)
        .await
        .unwrap()
        .is_none());
}

// ---------------------------------------------------------------------------
// Test: list_recent returns the tail in ascending order
// ---------------------------------------------------------------------------

#[sqlx::test]
async fn list_recent_returns_ascending_tail(pool: SqlitePool) {
    let (session_id, branch_id) = common::seed_session(&pool).await;
    let mut conn = pool.acquire().await.unwrap();

    for i in 1..=10 {
        MessageRepo::append(
            &mut conn,
            &common::report(&session_id, &branch_id, &format!("round {i}")),
        )
        .await
        .unwrap();
    }

    let rows = MessageRepo::list_recent(&mut conn, &branch_id, 3).await.unwrap();
    let seqs: Vec<i64> = rows.iter().map(|m| m.seq).collect();
    assert_eq!(seqs, vec![8, 9, 10]);
}

// ---------------------------------------------------------------------------
// Test: interventions transition pending -> consumed exactly once
// ---------------------------------------------------------------------------

#[sqlx::test]
async fn interventions_consume_at_most_once(pool: SqlitePool) {
    let (session_id, branch_id) = common::seed_session(&pool).await;
    let mut conn = pool.acquire().await.unwrap();

    let first = InterventionRepo::add(&mut conn, &session_id, &branch_id, "a drought strikes")
        .await
        .unwrap();
    let second = InterventionRepo::add(&mut conn, &session_id, &branch_id, "rebels gather")
        .await
        .unwrap();
    assert_eq!(first.status, "pending");

    let pending = InterventionRepo::list_pending(&mut conn, &branch_id).await.unwrap();
    assert_eq!(pending.len(), 2);
    assert_eq!(pending[0].id, first.id, "FIFO order by creation time");

    let ids: Vec<String> = pending.iter().map(|i| i.id.clone()).collect();
    assert_eq!(
        InterventionRepo::mark_consumed(&mut conn, &ids).await.unwrap(),
        2
    );
    // Second pass is a no-op: the rows are no longer pending.
    assert_eq!(
        InterventionRepo::mark_consumed(&mut conn, &ids).await.unwrap(),
        0
    );

    let row = InterventionRepo::find_by_id(&mut conn, &second.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "consumed");
    assert!(row.consumed_at.is_some());
    assert!(InterventionRepo::list_pending(&mut conn, &branch_id)
        .await
        .unwrap()
        .is_empty());
}

// ---------------------------------------------------------------------------
// Test: rollback inside a transaction reverts consumption
// ---------------------------------------------------------------------------

#[sqlx::test]
async fn consumption_rolls_back_with_the_transaction(pool: SqlitePool) {
    let (session_id, branch_id) = common::seed_session(&pool).await;

    let mut conn = pool.acquire().await.unwrap();
    let intervention =
        InterventionRepo::add(&mut conn, &session_id, &branch_id, "a flood hits the delta")
            .await
            .unwrap();
    drop(conn);

    let mut tx = pool.begin().await.unwrap();
    InterventionRepo::mark_consumed(&mut tx, std::slice::from_ref(&intervention.id))
        .await
        .unwrap();
    tx.rollback().await.unwrap();

    let mut conn = pool.acquire().await.unwrap();
    let row = InterventionRepo::find_by_id(&mut conn, &intervention.id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(row.status, "pending");
    assert!(row.consumed_at.is_none());
}

// ---------------------------------------------------------------------------
// Test: edit replaces content without touching seq
// ---------------------------------------------------------------------------

#[sqlx::test]
async fn edit_preserves_sequence_and_marks_edited(pool: SqlitePool) {
    let (session_id, branch_id) = common::seed_session(&pool).await;
    let mut conn = pool.acquire().await.unwrap();

    let original = MessageRepo::append(&mut conn, &common::report(&session_id, &branch_id, "v1"))
        .await
        .unwrap();
    let edited = MessageRepo::edit(&mut conn, &original.id, "v2", Some("{\"title\":\"T\"}"))
        .await
        .unwrap()
        .unwrap();

    assert_eq!(edited.seq, original.seq);
    assert_eq!(edited.content, "v2");
    assert!(edited.is_user_edited);
    assert!(edited.edited_at.is_some());
    assert_eq!(edited.report_snapshot_json.as_deref(), Some("{\"title\":\"T\"}"));
}
