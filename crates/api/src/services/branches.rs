//! Branch workflows: fork, switch, rollback, interventions.

use worldline_core::error::CoreError;
use worldline_core::sanitize::sanitize_text;
use worldline_core::types::{new_id, Role};
use worldline_db::models::branch::{Branch, NewBranch};
use worldline_db::models::intervention::UserIntervention;
use worldline_db::models::message::{NewMessage, TimelineMessage};
use worldline_db::models::session::WorldSession;
use worldline_db::repositories::{message_repo, BranchRepo, InterventionRepo, MessageRepo, SessionRepo};
use worldline_events::SessionEvent;

use crate::error::{AppError, AppResult};
use crate::services::message_event_payload;
use crate::state::SimContext;

pub const MAX_INTERVENTION_LEN: usize = 2000;

fn session_not_found(session_id: &str) -> AppError {
    AppError::Core(CoreError::NotFound {
        entity: "Session",
        id: session_id.to_string(),
    })
}

fn branch_not_found(branch_id: &str) -> AppError {
    AppError::Core(CoreError::NotFound {
        entity: "Branch",
        id: branch_id.to_string(),
    })
}

/// Resolve an explicit branch id or fall back to the session's active branch.
fn resolve_branch_id(session: &WorldSession, branch_id: Option<&str>) -> AppResult<String> {
    branch_id
        .map(str::to_string)
        .or_else(|| session.active_branch_id.clone())
        .ok_or(AppError::Core(CoreError::Validation(
            "Active branch is missing".into(),
        )))
}

/// Active branch id plus all branches of a session.
pub async fn list_branches(
    ctx: &SimContext,
    session_id: &str,
) -> AppResult<(Option<String>, Vec<Branch>)> {
    let mut conn = ctx.pool.acquire().await?;
    let session = SessionRepo::find_by_id(&mut conn, session_id)
        .await?
        .ok_or_else(|| session_not_found(session_id))?;
    let branches = BranchRepo::list_by_session(&mut conn, session_id).await?;
    Ok((session.active_branch_id, branches))
}

/// Fork a new branch from source history up to a message boundary.
///
/// Copy-on-fork: rows with `seq <= cut_seq` are duplicated under the new
/// branch in the same transaction that creates it, so the fork is never
/// observable half-built. The new branch inherits the matching memory scope.
pub async fn fork_branch(
    ctx: &SimContext,
    session_id: &str,
    source_branch_id: &str,
    from_message_id: Option<&str>,
) -> AppResult<Branch> {
    let mut tx = ctx.pool.begin().await?;

    let session = SessionRepo::find_by_id(&mut tx, session_id)
        .await?
        .ok_or_else(|| session_not_found(session_id))?;
    let source = BranchRepo::find_in_session(&mut tx, session_id, source_branch_id)
        .await?
        .ok_or_else(|| branch_not_found(source_branch_id))?;

    // Fork point: the named message (must live in the source branch) or the
    // source's current last message. An empty source forks at seq 0.
    let fork_point = match from_message_id {
        Some(message_id) => Some(
            MessageRepo::find_in_branch(&mut tx, &source.id, message_id)
                .await?
                .ok_or(AppError::Core(CoreError::NotFound {
                    entity: "Message",
                    id: message_id.to_string(),
                }))?,
        ),
        None => MessageRepo::find_last(&mut tx, &source.id).await?,
    };
    let cut_seq = fork_point.as_ref().map(|message| message.seq).unwrap_or(0);

    let branch_count = BranchRepo::count_by_session(&mut tx, session_id).await?;
    let new_branch = BranchRepo::create(
        &mut tx,
        &NewBranch {
            id: new_id(),
            session_id: session.id.clone(),
            name: format!("branch-{}", branch_count + 1),
            parent_branch_id: Some(source.id.clone()),
            fork_from_message_id: fork_point.as_ref().map(|message| message.id.clone()),
        },
    )
    .await?;

    if cut_seq > 0 {
        let sources = MessageRepo::list_up_to_seq(&mut tx, &source.id, cut_seq).await?;
        MessageRepo::clone_to_branch(&mut tx, &sources, session_id, &new_branch.id).await?;
    }
    ctx.memory
        .on_fork(&mut tx, session_id, &source.id, &new_branch.id, cut_seq)
        .await;

    tx.commit().await?;
    tracing::info!(
        session_id,
        source_branch_id = %source.id,
        new_branch_id = %new_branch.id,
        cut_seq,
        "Branch forked"
    );
    Ok(new_branch)
}

/// Switch the session's active branch.
///
/// The runner reads the active branch at the top of each round, so the
/// switch takes effect on the next round, never mid-round.
pub async fn switch_branch(
    ctx: &SimContext,
    session_id: &str,
    branch_id: &str,
) -> AppResult<String> {
    let mut tx = ctx.pool.begin().await?;
    let branch = BranchRepo::find_in_session(&mut tx, session_id, branch_id)
        .await?
        .ok_or_else(|| branch_not_found(branch_id))?;
    if branch.is_archived {
        return Err(AppError::Core(CoreError::Validation(
            "Cannot switch to an archived branch".into(),
        )));
    }
    SessionRepo::update_active_branch(&mut tx, session_id, branch_id)
        .await?
        .ok_or_else(|| session_not_found(session_id))?;
    tx.commit().await?;

    ctx.event_bus
        .publish(
            session_id,
            SessionEvent::BranchSwitched {
                active_branch_id: branch_id.to_string(),
            },
        )
        .await;
    Ok(branch_id.to_string())
}

/// Delete the latest message in a branch (rollback by one step).
///
/// The busy gate against a concurrently writing runner lives in the
/// transport layer; here the deletion itself plus memory invalidation run
/// atomically.
pub async fn delete_last_message(
    ctx: &SimContext,
    session_id: &str,
    branch_id: Option<&str>,
) -> AppResult<TimelineMessage> {
    let mut tx = ctx.pool.begin().await?;
    let session = SessionRepo::find_by_id(&mut tx, session_id)
        .await?
        .ok_or_else(|| session_not_found(session_id))?;
    let target_branch_id = resolve_branch_id(&session, branch_id)?;
    BranchRepo::find_in_session(&mut tx, session_id, &target_branch_id)
        .await?
        .ok_or_else(|| branch_not_found(&target_branch_id))?;

    let deleted = MessageRepo::delete_last(&mut tx, &target_branch_id)
        .await?
        .ok_or(AppError::Core(CoreError::NotFound {
            entity: "Message",
            id: target_branch_id.clone(),
        }))?;
    ctx.memory
        .on_message_deleted(&mut tx, session_id, &target_branch_id, &deleted.id)
        .await;
    tx.commit().await?;

    tracing::info!(session_id, branch_id = %target_branch_id, seq = deleted.seq, "Last message deleted");
    Ok(deleted)
}

/// Queue a pending intervention and mirror it into the timeline.
pub async fn enqueue_intervention(
    ctx: &SimContext,
    session_id: &str,
    branch_id: Option<&str>,
    content: &str,
) -> AppResult<(UserIntervention, TimelineMessage)> {
    let content = sanitize_text(content, MAX_INTERVENTION_LEN);
    if content.is_empty() {
        return Err(AppError::Core(CoreError::Validation(
            "Intervention content must not be empty".into(),
        )));
    }

    let mut attempt = 0;
    let (intervention, message) = loop {
        let mut tx = ctx.pool.begin().await?;
        let session = SessionRepo::find_by_id(&mut tx, session_id)
            .await?
            .ok_or_else(|| session_not_found(session_id))?;
        let target_branch_id = resolve_branch_id(&session, branch_id)?;
        let branch = BranchRepo::find_in_session(&mut tx, session_id, &target_branch_id)
            .await?
            .ok_or_else(|| branch_not_found(&target_branch_id))?;
        if branch.is_archived {
            return Err(AppError::Core(CoreError::Validation(
                "Cannot intervene on an archived branch".into(),
            )));
        }

        let intervention =
            InterventionRepo::add(&mut tx, session_id, &target_branch_id, &content).await?;
        let appended = MessageRepo::append(
            &mut tx,
            &NewMessage {
                session_id: session.id.clone(),
                branch_id: target_branch_id.clone(),
                role: Role::UserIntervention.as_str(),
                content: content.clone(),
                time_jump_label: session.tick_label.clone(),
                model_provider: None,
                model_name: None,
                token_in: None,
                token_out: None,
                report_snapshot_json: None,
            },
        )
        .await;

        match appended {
            Ok(message) => {
                ctx.memory.on_message_persisted(&mut tx, &message).await;
                tx.commit().await?;
                break (intervention, message);
            }
            Err(err)
                if message_repo::is_unique_violation(&err)
                    && attempt + 1 < message_repo::APPEND_RETRIES =>
            {
                tx.rollback().await?;
                attempt += 1;
            }
            Err(err) => return Err(err.into()),
        }
    };

    ctx.event_bus
        .publish(
            session_id,
            SessionEvent::MessageCreated {
                branch_id: message.branch_id.clone(),
                message: message_event_payload(&message),
            },
        )
        .await;
    Ok((intervention, message))
}
