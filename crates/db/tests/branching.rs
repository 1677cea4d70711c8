//! Integration tests for copy-on-fork branch isolation.

use sqlx::SqlitePool;

use worldline_core::types::{new_id, utc_now};
use worldline_db::models::branch::NewBranch;
use worldline_db::models::message::NewMessage;
use worldline_db::models::session::NewSession;
use worldline_db::repositories::{BranchRepo, MessageRepo, SessionRepo};

async fn seed_session(pool: &SqlitePool) -> (String, String) {
    worldline_db::init_schema(pool).await.unwrap();
    let session_id = new_id();
    let branch_id = new_id();
    let mut conn = pool.acquire().await.unwrap();
    SessionRepo::create(
        &mut conn,
        &NewSession {
            id: session_id.clone(),
            title: Some("fork test".into()),
            world_preset: "an island republic".into(),
            tick_label: "1 week".into(),
            post_gen_delay_sec: 0,
            active_branch_id: branch_id.clone(),
            output_language: "en".into(),
            timeline_start_iso: utc_now().to_rfc3339(),
            timeline_step_value: 1,
            timeline_step_unit: "week".into(),
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

fn report(session_id: &str, branch_id: &str, content: &str) -> NewMessage {
    NewMessage {
        session_id: session_id.into(),
        branch_id: branch_id.into(),
        role: "system_report",
        content: content.into(),
        time_jump_label: "1 week".into(),
        model_provider: None,
        model_name: None,
        token_in: None,
        token_out: None,
        report_snapshot_json: None,
    }
}

/// Fork helper mirroring the service-level transaction: create the branch,
/// then copy messages with seq <= cut.
async fn fork(
    pool: &SqlitePool,
    session_id: &str,
    source_branch_id: &str,
    cut_seq: i64,
    name: &str,
) -> String {
    let mut tx = pool.begin().await.unwrap();
    let new_branch = BranchRepo::create(
        &mut tx,
        &NewBranch {
            id: new_id(),
            session_id: session_id.into(),
            name: name.into(),
            parent_branch_id: Some(source_branch_id.into()),
            fork_from_message_id: None,
        },
    )
    .await
    .unwrap();
    let sources = MessageRepo::list_up_to_seq(&mut tx, source_branch_id, cut_seq)
        .await
        .unwrap();
    MessageRepo::clone_to_branch(&mut tx, &sources, session_id, &new_branch.id)
        .await
        .unwrap();
    tx.commit().await.unwrap();
    new_branch.id
}

// ---------------------------------------------------------------------------
// Test: fork at seq=k yields a dense 1..k copy
// ---------------------------------------------------------------------------

#[sqlx::test]
async fn fork_copies_prefix_with_dense_seqs(pool: SqlitePool) {
    let (session_id, main_id) = seed_session(&pool).await;
    let mut conn = pool.acquire().await.unwrap();
    for i in 1..=5 {
        MessageRepo::append(&mut conn, &report(&session_id, &main_id, &format!("m{i}")))
            .await
            .unwrap();
    }
    drop(conn);

    let fork_id = fork(&pool, &session_id, &main_id, 3, "branch-2").await;

    let mut conn = pool.acquire().await.unwrap();
    assert_eq!(MessageRepo::max_seq(&mut conn, &fork_id).await.unwrap(), 3);
    let rows = MessageRepo::list_recent(&mut conn, &fork_id, 100).await.unwrap();
    let seqs: Vec<i64> = rows.iter().map(|m| m.seq).collect();
    assert_eq!(seqs, vec![1, 2, 3]);
    assert_eq!(rows[2].content, "m3");
    // Copied rows get fresh ids.
    let main_rows = MessageRepo::list_recent(&mut conn, &main_id, 100).await.unwrap();
    assert!(rows.iter().all(|copy| main_rows.iter().all(|src| src.id != copy.id)));
}

// ---------------------------------------------------------------------------
// Test: appends after a fork stay isolated on both sides
// ---------------------------------------------------------------------------

#[sqlx::test]
async fn fork_isolates_future_appends(pool: SqlitePool) {
    let (session_id, main_id) = seed_session(&pool).await;
    let mut conn = pool.acquire().await.unwrap();
    for i in 1..=3 {
        MessageRepo::append(&mut conn, &report(&session_id, &main_id, &format!("m{i}")))
            .await
            .unwrap();
    }
    drop(conn);

    let fork_id = fork(&pool, &session_id, &main_id, 3, "branch-2").await;

    let mut conn = pool.acquire().await.unwrap();
    // New round on the fork continues from cut_seq + 1.
    let on_fork = MessageRepo::append(&mut conn, &report(&session_id, &fork_id, "fork-only"))
        .await
        .unwrap();
    assert_eq!(on_fork.seq, 4);

    // The source branch is untouched.
    assert_eq!(MessageRepo::max_seq(&mut conn, &main_id).await.unwrap(), 3);

    // And an append on the source does not appear on the fork.
    MessageRepo::append(&mut conn, &report(&session_id, &main_id, "main-only"))
        .await
        .unwrap();
    let fork_rows = MessageRepo::list_recent(&mut conn, &fork_id, 100).await.unwrap();
    assert!(fork_rows.iter().all(|m| m.content != "main-only"));
    assert_eq!(MessageRepo::max_seq(&mut conn, &fork_id).await.unwrap(), 4);
}

// ---------------------------------------------------------------------------
// Test: branch names are unique per session
// ---------------------------------------------------------------------------

#[sqlx::test]
async fn duplicate_branch_name_is_rejected(pool: SqlitePool) {
    let (session_id, _) = seed_session(&pool).await;
    let mut conn = pool.acquire().await.unwrap();
    let result = BranchRepo::create(
        &mut conn,
        &NewBranch {
            id: new_id(),
            session_id: session_id.clone(),
            name: "main".into(),
            parent_branch_id: None,
            fork_from_message_id: None,
        },
    )
    .await;
    assert!(matches!(
        result,
        Err(sqlx::Error::Database(ref db)) if db.is_unique_violation()
    ));
}

// ---------------------------------------------------------------------------
// Test: branch listing covers the session and counts match
// ---------------------------------------------------------------------------

#[sqlx::test]
async fn list_and_count_by_session(pool: SqlitePool) {
    let (session_id, main_id) = seed_session(&pool).await;
    let fork_id = fork(&pool, &session_id, &main_id, 0, "branch-2").await;

    let mut conn = pool.acquire().await.unwrap();
    let branches = BranchRepo::list_by_session(&mut conn, &session_id).await.unwrap();
    assert_eq!(branches.len(), 2);
    assert_eq!(
        BranchRepo::count_by_session(&mut conn, &session_id).await.unwrap(),
        2
    );
    let fork = branches.iter().find(|b| b.id == fork_id).unwrap();
    assert_eq!(fork.parent_branch_id.as_deref(), Some(main_id.as_str()));
    assert!(!fork.is_archived);
}
