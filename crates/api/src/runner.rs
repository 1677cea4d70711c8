//! Per-session generation runner.
//!
//! One cooperative task per session drives the round loop. Commands arrive on
//! an unbounded channel and are idempotent; state transitions only happen at
//! round boundaries, so an in-flight generate always completes (and persists)
//! before a pause is observed. Transient provider failures retry with a fixed
//! backoff ladder before the task parks in the error state.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU8, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::Instant;

use worldline_core::error::CoreError;
use worldline_db::repositories::SessionRepo;
use worldline_events::SessionEvent;

use crate::error::{AppError, AppResult};
use crate::services::simulation::{self, RoundError};
use crate::state::SimContext;

/// Backoff ladder between transient-failure retries; exhausting it parks the
/// runner in [`RunnerState::ErrorBackoff`].
pub const BACKOFF_DELAYS: [Duration; 3] = [
    Duration::from_secs(1),
    Duration::from_secs(2),
    Duration::from_secs(4),
];

/// How long shutdown waits for each task before aborting it.
const SHUTDOWN_GRACE: Duration = Duration::from_secs(5);

// ---------------------------------------------------------------------------
// States & commands
// ---------------------------------------------------------------------------

/// Lifecycle state of a session's runner task.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum RunnerState {
    Idle = 0,
    Running = 1,
    Paused = 2,
    ErrorBackoff = 3,
    Stopped = 4,
}

impl RunnerState {
    fn from_u8(value: u8) -> Self {
        match value {
            1 => RunnerState::Running,
            2 => RunnerState::Paused,
            3 => RunnerState::ErrorBackoff,
            4 => RunnerState::Stopped,
            _ => RunnerState::Idle,
        }
    }
}

/// Command delivered to a runner task. All commands are idempotent.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunnerCommand {
    Start,
    Pause,
    Resume,
    Stop,
}

/// Pure transition function for commands.
///
/// `Start` and `Resume` are equivalent: both re-enter `Running` from any
/// non-terminal state (including `ErrorBackoff`, which resets the retry
/// counter at the call site).
fn apply_command(state: RunnerState, command: RunnerCommand) -> RunnerState {
    if state == RunnerState::Stopped {
        return RunnerState::Stopped;
    }
    match command {
        RunnerCommand::Start | RunnerCommand::Resume => RunnerState::Running,
        RunnerCommand::Pause => RunnerState::Paused,
        RunnerCommand::Stop => RunnerState::Stopped,
    }
}

// ---------------------------------------------------------------------------
// Manager
// ---------------------------------------------------------------------------

struct RunnerHandle {
    commands: mpsc::UnboundedSender<RunnerCommand>,
    task: JoinHandle<()>,
    state: Arc<AtomicU8>,
    generating: Arc<AtomicBool>,
}

/// Owns at most one runner task per session.
pub struct RunnerManager {
    sim: SimContext,
    handles: tokio::sync::Mutex<HashMap<String, RunnerHandle>>,
}

impl RunnerManager {
    pub fn new(sim: SimContext) -> Self {
        Self {
            sim,
            handles: tokio::sync::Mutex::new(HashMap::new()),
        }
    }

    /// Start (or resume) the runner for a session.
    ///
    /// Persists `running = true`, ensures the task exists, and broadcasts the
    /// new session state. Returns the resulting running flag.
    pub async fn start(&self, session_id: &str) -> AppResult<bool> {
        self.set_running(session_id, true).await?;
        self.ensure_task(session_id).await;
        self.send(session_id, RunnerCommand::Start).await;
        self.sim
            .event_bus
            .publish(session_id, SessionEvent::SessionState { running: true })
            .await;
        Ok(true)
    }

    /// Pause the runner at the next round boundary.
    pub async fn pause(&self, session_id: &str) -> AppResult<bool> {
        self.set_running(session_id, false).await?;
        self.send(session_id, RunnerCommand::Pause).await;
        self.sim
            .event_bus
            .publish(session_id, SessionEvent::SessionState { running: false })
            .await;
        Ok(false)
    }

    /// Resume a paused or error-parked runner.
    pub async fn resume(&self, session_id: &str) -> AppResult<bool> {
        self.start(session_id).await
    }

    /// Current state of a session's runner (`Idle` when no task exists).
    pub async fn state(&self, session_id: &str) -> RunnerState {
        let handles = self.handles.lock().await;
        match handles.get(session_id) {
            Some(handle) if !handle.task.is_finished() => {
                RunnerState::from_u8(handle.state.load(Ordering::SeqCst))
            }
            _ => RunnerState::Idle,
        }
    }

    /// Whether the runner may be writing to the timeline.
    ///
    /// True while the task is in `Running` (covering the whole round loop,
    /// including the post-generation delay) or an individual round is in
    /// flight. Deleting the last message while busy returns `Busy`.
    pub async fn is_busy(&self, session_id: &str) -> bool {
        let handles = self.handles.lock().await;
        match handles.get(session_id) {
            Some(handle) if !handle.task.is_finished() => {
                handle.generating.load(Ordering::SeqCst)
                    || RunnerState::from_u8(handle.state.load(Ordering::SeqCst))
                        == RunnerState::Running
            }
            _ => false,
        }
    }

    /// Stop and forget every runner task (process shutdown).
    pub async fn shutdown(&self) {
        let handles: Vec<RunnerHandle> = {
            let mut map = self.handles.lock().await;
            map.drain().map(|(_, handle)| handle).collect()
        };
        for handle in &handles {
            let _ = handle.commands.send(RunnerCommand::Stop);
        }
        for mut handle in handles {
            if tokio::time::timeout(SHUTDOWN_GRACE, &mut handle.task)
                .await
                .is_err()
            {
                handle.task.abort();
            }
        }
        tracing::info!("All runner tasks stopped");
    }

    async fn set_running(&self, session_id: &str, running: bool) -> AppResult<()> {
        let mut conn = self.sim.pool.acquire().await?;
        SessionRepo::update_running(&mut conn, session_id, running)
            .await?
            .map(|_| ())
            .ok_or(AppError::Core(CoreError::NotFound {
                entity: "Session",
                id: session_id.to_string(),
            }))
    }

    async fn send(&self, session_id: &str, command: RunnerCommand) {
        let handles = self.handles.lock().await;
        if let Some(handle) = handles.get(session_id) {
            let _ = handle.commands.send(command);
        }
    }

    async fn ensure_task(&self, session_id: &str) {
        let mut handles = self.handles.lock().await;
        if let Some(existing) = handles.get(session_id) {
            if !existing.task.is_finished() {
                return;
            }
        }
        let (tx, rx) = mpsc::unbounded_channel();
        let state = Arc::new(AtomicU8::new(RunnerState::Idle as u8));
        let generating = Arc::new(AtomicBool::new(false));
        let task = tokio::spawn(run_loop(
            self.sim.clone(),
            session_id.to_string(),
            rx,
            Arc::clone(&state),
            Arc::clone(&generating),
        ));
        handles.insert(
            session_id.to_string(),
            RunnerHandle {
                commands: tx,
                task,
                state,
                generating,
            },
        );
        tracing::info!(session_id, "Runner task spawned");
    }
}

// ---------------------------------------------------------------------------
// Task loop
// ---------------------------------------------------------------------------

async fn run_loop(
    sim: SimContext,
    session_id: String,
    mut commands: mpsc::UnboundedReceiver<RunnerCommand>,
    state_cell: Arc<AtomicU8>,
    generating: Arc<AtomicBool>,
) {
    let mut state = RunnerState::Idle;
    let mut retry_attempt: usize = 0;

    loop {
        state_cell.store(state as u8, Ordering::SeqCst);
        match state {
            RunnerState::Idle | RunnerState::Paused | RunnerState::ErrorBackoff => {
                let Some(command) = commands.recv().await else {
                    state = RunnerState::Stopped;
                    continue;
                };
                let next = apply_command(state, command);
                if next == RunnerState::Running && state != RunnerState::Running {
                    retry_attempt = 0;
                }
                state = next;
            }

            RunnerState::Running => {
                // Drain queued commands; a Pause/Stop issued mid-round takes
                // effect here, at the boundary.
                while let Ok(command) = commands.try_recv() {
                    state = apply_command(state, command);
                }
                if state != RunnerState::Running {
                    continue;
                }

                generating.store(true, Ordering::SeqCst);
                let result = simulation::generate_next(&sim, &session_id).await;
                generating.store(false, Ordering::SeqCst);

                match result {
                    Ok(message) => {
                        retry_attempt = 0;
                        match post_gen_delay(&sim, &session_id).await {
                            Some(delay_secs) => {
                                tracing::debug!(
                                    session_id,
                                    seq = message.seq,
                                    delay_secs,
                                    "Round complete"
                                );
                                state = sleep_or_command(
                                    Duration::from_secs(delay_secs),
                                    &mut commands,
                                    state,
                                )
                                .await;
                            }
                            // Session deleted or externally paused.
                            None => state = RunnerState::Paused,
                        }
                    }

                    Err(err) if err.retryable() => match BACKOFF_DELAYS.get(retry_attempt) {
                        Some(delay) => {
                            tracing::warn!(
                                session_id,
                                code = %err.code(),
                                attempt = retry_attempt + 1,
                                "Transient provider failure; retrying"
                            );
                            sim.event_bus
                                .publish(
                                    &session_id,
                                    SessionEvent::Error {
                                        code: err.code(),
                                        message: format!(
                                            "{} Retrying in {}s.",
                                            err.message(),
                                            delay.as_secs()
                                        ),
                                        hint: None,
                                    },
                                )
                                .await;
                            retry_attempt += 1;
                            state = sleep_or_command(*delay, &mut commands, state).await;
                        }
                        None => {
                            retry_attempt = 0;
                            park(
                                &sim,
                                &session_id,
                                "ERROR_BACKOFF",
                                "Provider failed repeatedly. Runner paused; resume to retry.",
                                Some("Resume to retry."),
                            )
                            .await;
                            state = RunnerState::ErrorBackoff;
                        }
                    },

                    Err(err) => {
                        park(&sim, &session_id, &err.code(), &err.message(), None).await;
                        state = RunnerState::ErrorBackoff;
                    }
                }
            }

            RunnerState::Stopped => {
                state_cell.store(state as u8, Ordering::SeqCst);
                break;
            }
        }
    }
    tracing::info!(session_id, "Runner task exited");
}

/// Sleep for the post-round delay, reacting to commands immediately.
///
/// A zero delay still yields once so back-to-back rounds cannot starve the
/// executor.
async fn sleep_or_command(
    duration: Duration,
    commands: &mut mpsc::UnboundedReceiver<RunnerCommand>,
    mut state: RunnerState,
) -> RunnerState {
    if duration.is_zero() {
        tokio::task::yield_now().await;
        while let Ok(command) = commands.try_recv() {
            state = apply_command(state, command);
        }
        return state;
    }

    let deadline = Instant::now() + duration;
    loop {
        if state != RunnerState::Running {
            return state;
        }
        tokio::select! {
            _ = tokio::time::sleep_until(deadline) => return state,
            command = commands.recv() => match command {
                None => return RunnerState::Stopped,
                Some(command) => state = apply_command(state, command),
            },
        }
    }
}

/// Read the session's post-generation delay; `None` when the session is gone
/// or no longer marked running.
async fn post_gen_delay(sim: &SimContext, session_id: &str) -> Option<u64> {
    let mut conn = sim.pool.acquire().await.ok()?;
    let session = SessionRepo::find_by_id(&mut conn, session_id).await.ok()??;
    if !session.running {
        return None;
    }
    Some(session.post_gen_delay_sec.max(0) as u64)
}

/// Park the runner: persist `running = false` and broadcast the error.
async fn park(sim: &SimContext, session_id: &str, code: &str, message: &str, hint: Option<&str>) {
    if let Ok(mut conn) = sim.pool.acquire().await {
        if let Err(error) = SessionRepo::update_running(&mut conn, session_id, false).await {
            tracing::error!(%error, session_id, "Failed to persist paused state");
        }
    }
    tracing::warn!(session_id, code, message, "Runner parked");
    sim.event_bus
        .publish(
            session_id,
            SessionEvent::Error {
                code: code.to_string(),
                message: message.to_string(),
                hint: hint.map(str::to_string),
            },
        )
        .await;
    sim.event_bus
        .publish(session_id, SessionEvent::SessionState { running: false })
        .await;
}
