//! One simulation round: snapshot state, build the prompt, call the
//! provider, persist the report, publish it.

use rand::rngs::StdRng;
use rand::SeedableRng;

use worldline_core::event_dice::{EventDice, TickContext};
use worldline_core::prompt::{HistoryEntry, PromptBuilder, PromptInput};
use worldline_core::report::{parse_report_snapshot, snapshot_to_content, snapshot_to_storage_json};
use worldline_core::types::{Role, StepUnit};
use worldline_core::worldline_context::{ReportView, WorldlineContext};
use worldline_db::models::message::{NewMessage, TimelineMessage};
use worldline_db::repositories::{message_repo, InterventionRepo, MessageRepo, SessionRepo};
use worldline_events::SessionEvent;
use worldline_providers::{GenerateOptions, ProviderError};

use crate::error::AppError;
use crate::services::{message_event_payload, provider};
use crate::state::SimContext;

/// Recent-window size fed to the prompt builder.
const PROMPT_WINDOW: i64 = 20;

// ---------------------------------------------------------------------------
// Round errors
// ---------------------------------------------------------------------------

/// Failure of one generation round, split by how the runner reacts.
#[derive(Debug)]
pub enum RoundError {
    /// Provider failure; `retryable()` decides backoff vs stop.
    Provider(ProviderError),
    /// Anything else; the runner parks with this code.
    Fatal { code: String, message: String },
}

impl RoundError {
    pub fn code(&self) -> String {
        match self {
            RoundError::Provider(err) => err.code().to_string(),
            RoundError::Fatal { code, .. } => code.clone(),
        }
    }

    pub fn message(&self) -> String {
        match self {
            RoundError::Provider(err) => err.to_string(),
            RoundError::Fatal { message, .. } => message.clone(),
        }
    }

    pub fn retryable(&self) -> bool {
        matches!(self, RoundError::Provider(err) if err.retryable())
    }
}

impl From<sqlx::Error> for RoundError {
    fn from(err: sqlx::Error) -> Self {
        RoundError::Fatal {
            code: "RUNNER_FAILED".into(),
            message: format!("Database error: {err}"),
        }
    }
}

impl From<AppError> for RoundError {
    fn from(err: AppError) -> Self {
        match err {
            AppError::Provider(provider) => RoundError::Provider(provider),
            AppError::Core(core) => RoundError::Fatal {
                code: core.code().to_string(),
                message: core.to_string(),
            },
            other => RoundError::Fatal {
                code: "RUNNER_FAILED".into(),
                message: other.to_string(),
            },
        }
    }
}

// ---------------------------------------------------------------------------
// Round body
// ---------------------------------------------------------------------------

/// Generate and persist the next timeline report for the active branch.
///
/// Interventions snapshotted here are marked consumed only inside the
/// persist transaction: any failure before commit leaves them pending for
/// the next round.
pub async fn generate_next(
    ctx: &SimContext,
    session_id: &str,
) -> Result<TimelineMessage, RoundError> {
    // --- Snapshot ---
    let mut conn = ctx.pool.acquire().await?;
    let session = SessionRepo::find_by_id(&mut conn, session_id)
        .await?
        .ok_or_else(|| RoundError::Fatal {
            code: "SESSION_NOT_FOUND".into(),
            message: "Session not found".into(),
        })?;
    let branch_id = session
        .active_branch_id
        .clone()
        .ok_or_else(|| RoundError::Fatal {
            code: "BRANCH_NOT_FOUND".into(),
            message: "Session has no active branch".into(),
        })?;

    let timeline = MessageRepo::list_recent(&mut conn, &branch_id, PROMPT_WINDOW).await?;
    let interventions = InterventionRepo::list_pending(&mut conn, &branch_id).await?;
    drop(conn);

    let next_seq = timeline.last().map(|message| message.seq + 1).unwrap_or(1);
    let step_unit = StepUnit::parse_or_month(&session.timeline_step_unit);
    let recent_contents: Vec<String> = timeline
        .iter()
        .map(|message| message.content.clone())
        .collect();

    let (dice_plan, prompt_builder) = {
        let runtime = ctx.runtime.read().await;
        let dice = EventDice::new(runtime.event_dice.clone());
        let plan = dice.build_plan(
            &mut StdRng::from_entropy(),
            &recent_contents,
            TickContext {
                timeline_start_iso: Some(&session.timeline_start_iso),
                timeline_step_value: session.timeline_step_value,
                timeline_step_unit: step_unit,
                next_seq,
                output_language: &session.output_language,
            },
        );
        let builder = PromptBuilder::new(
            PROMPT_WINDOW as usize,
            runtime.memory_max_snippets,
            runtime.memory_max_chars,
        );
        (plan, builder)
    };

    // --- Memory retrieval (failures degrade to no snippets) ---
    let memory_query = build_memory_query(&session.world_preset, &timeline, &interventions, &session);
    let memory_snippets = ctx
        .memory
        .retrieve_context(session_id, &branch_id, &memory_query)
        .await;

    // --- Build ---
    let report_views: Vec<ReportView<'_>> = timeline
        .iter()
        .map(|message| ReportView {
            seq: message.seq,
            role: &message.role,
            content: &message.content,
            report_snapshot_json: message.report_snapshot_json.as_deref(),
        })
        .collect();
    let worldline_context = WorldlineContext::default().build_context(&report_views);

    let history: Vec<HistoryEntry> = timeline
        .iter()
        .map(|message| HistoryEntry {
            seq: message.seq,
            content: message.content.clone(),
        })
        .collect();
    let intervention_texts: Vec<String> = interventions
        .iter()
        .map(|intervention| intervention.content.clone())
        .collect();
    let messages = prompt_builder.build_messages(&PromptInput {
        world_preset: &session.world_preset,
        tick_label: &session.tick_label,
        timeline: &history,
        interventions: &intervention_texts,
        memory_snippets: &memory_snippets,
        worldline_context: &worldline_context,
        output_language: &session.output_language,
        dice_plan: Some(&dice_plan),
    });

    // --- Generate (the only long suspension point) ---
    let runtime_cfg = provider::generation_config(ctx, session_id).await?;
    let adapter = ctx.providers.get(runtime_cfg.provider);
    let result = adapter
        .generate(&runtime_cfg, &messages, &GenerateOptions::default())
        .await
        .map_err(RoundError::Provider)?;

    // --- Normalize ---
    let snapshot = parse_report_snapshot(&result.text, &session.tick_label);
    let (content, snapshot_json) = match &snapshot {
        Some(snapshot) => (
            snapshot_to_content(snapshot),
            Some(snapshot_to_storage_json(snapshot)),
        ),
        // Unparseable output is persisted raw, with no snapshot.
        None => (result.text.clone(), None),
    };

    // --- Persist + consume + index, atomically ---
    let intervention_ids: Vec<String> = interventions
        .iter()
        .map(|intervention| intervention.id.clone())
        .collect();
    let new_message = NewMessage {
        session_id: session.id.clone(),
        branch_id: branch_id.clone(),
        role: Role::SystemReport.as_str(),
        content,
        time_jump_label: session.tick_label.clone(),
        model_provider: Some(runtime_cfg.provider.as_str().to_string()),
        model_name: Some(runtime_cfg.model_name.clone()),
        token_in: result.token_in,
        token_out: result.token_out,
        report_snapshot_json: snapshot_json,
    };

    let mut attempt = 0;
    let message = loop {
        let mut tx = ctx.pool.begin().await?;
        match MessageRepo::append(&mut tx, &new_message).await {
            Ok(message) => {
                InterventionRepo::mark_consumed(&mut tx, &intervention_ids).await?;
                ctx.memory.on_message_persisted(&mut tx, &message).await;
                tx.commit().await?;
                break message;
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

    // --- Publish ---
    ctx.event_bus
        .publish(
            session_id,
            SessionEvent::MessageCreated {
                branch_id: message.branch_id.clone(),
                message: message_event_payload(&message),
            },
        )
        .await;

    tracing::debug!(
        session_id,
        branch_id = %message.branch_id,
        seq = message.seq,
        consumed = intervention_ids.len(),
        "Round persisted"
    );
    Ok(message)
}

/// Query text handed to the memory collaborator for retrieval.
fn build_memory_query(
    world_preset: &str,
    timeline: &[TimelineMessage],
    interventions: &[worldline_db::models::intervention::UserIntervention],
    session: &worldline_db::models::session::WorldSession,
) -> String {
    // The tail of each list, kept in ascending order.
    let mut recent: Vec<&str> = timeline
        .iter()
        .rev()
        .take(3)
        .map(|message| message.content.as_str())
        .collect();
    recent.reverse();
    let mut pending: Vec<&str> = interventions
        .iter()
        .rev()
        .take(3)
        .map(|intervention| intervention.content.as_str())
        .collect();
    pending.reverse();
    format!(
        "World preset: {world_preset}\n\
         Recent timeline focus: {}\n\
         Pending interventions: {}\n\
         Time advance label: {}\n\
         Timeline step: {} {}",
        recent.join(" "),
        pending.join(" "),
        session.tick_label,
        session.timeline_step_value,
        session.timeline_step_unit,
    )
}
