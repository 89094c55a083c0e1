//! Run stream reducer
//!
//! All run bookkeeping lives here as a pure, synchronous fold:
//! `reduce(state, action, now_ms) -> state`. No IO, no clock reads, no
//! randomness. Replaying the same actions yields the same state.

use std::collections::HashMap;

use controlroom_protocol::{ServerEvent, Usage, WsEvent};
use serde::Serialize;
use serde_json::Value;

/// Runs retained across all sessions; oldest arrivals are evicted first.
pub const MAX_RUNS: usize = 80;

/// Session a run is attributed to when the first event seen for it has none.
pub const DEFAULT_SESSION_KEY: &str = "web:control-room";

const DEFAULT_TOOL_NAME: &str = "tool";
const DEFAULT_AGENT_ERROR: &str = "Unexpected agent error";

// ---------------------------------------------------------------------------
// Run model
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RunStatus {
    Streaming,
    Final,
    Error,
}

impl RunStatus {
    /// `final` and `error` are terminal.
    pub fn is_settled(self) -> bool {
        !matches!(self, RunStatus::Streaming)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ToolStepStatus {
    Running,
    Done,
}

/// One tool invocation inside a run
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ToolActivityStep {
    pub id: String,
    pub name: String,
    pub args: Option<Value>,
    pub status: ToolStepStatus,
    pub result_preview: Option<String>,
    pub ok: Option<bool>,
}

/// One streamed agent execution
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct StreamRun {
    pub run_id: String,
    pub session_key: String,
    pub status: RunStatus,
    pub content: String,
    pub tools: Vec<ToolActivityStep>,
    pub usage: Option<Usage>,
    pub error: Option<String>,
    pub created_at_ms: u64,
    pub updated_at_ms: u64,
}

impl StreamRun {
    fn new(run_id: String, session_key: String, now_ms: u64) -> Self {
        Self {
            run_id,
            session_key,
            status: RunStatus::Streaming,
            content: String::new(),
            tools: Vec::new(),
            usage: None,
            error: None,
            created_at_ms: now_ms,
            updated_at_ms: now_ms,
        }
    }

    fn touch(&mut self, now_ms: u64) {
        self.updated_at_ms = self.updated_at_ms.max(now_ms);
    }

    /// Index of the most recently opened running step named `name`.
    fn open_tool_step(&self, name: &str) -> Option<usize> {
        self.tools
            .iter()
            .rposition(|step| step.name == name && step.status == ToolStepStatus::Running)
    }
}

// ---------------------------------------------------------------------------
// RunStreamState: the reducer's whole state
// ---------------------------------------------------------------------------

/// Invariants: every id in `order` has an entry in `runs` and vice versa;
/// `order.len() <= MAX_RUNS`.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct RunStreamState {
    order: Vec<String>,
    runs: HashMap<String, StreamRun>,
    active_run_by_session: HashMap<String, Option<String>>,
    next_tool_seq: u64,
}

impl RunStreamState {
    /// Run ids in arrival order.
    pub fn order(&self) -> &[String] {
        &self.order
    }

    pub fn run(&self, run_id: &str) -> Option<&StreamRun> {
        self.runs.get(run_id)
    }

    /// Runs in arrival order.
    pub fn iter(&self) -> impl Iterator<Item = &StreamRun> {
        self.order.iter().filter_map(|id| self.runs.get(id))
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    /// Most recent non-terminal run touched for `session_key`.
    pub fn active_run(&self, session_key: &str) -> Option<&str> {
        self.active_run_by_session
            .get(session_key)
            .and_then(|id| id.as_deref())
    }

    /// Raw pointer table; a `None` value means the session's run settled.
    pub fn active_run_by_session(&self) -> &HashMap<String, Option<String>> {
        &self.active_run_by_session
    }

    fn next_tool_step_id(&mut self, run_id: &str) -> String {
        self.next_tool_seq += 1;
        format!("{}-tool-{}", run_id, self.next_tool_seq)
    }

    fn claim_active(&mut self, session_key: &str, run_id: &str) {
        self.active_run_by_session
            .insert(session_key.to_string(), Some(run_id.to_string()));
    }

    /// Stale releases (pointer already moved on) are no-ops.
    fn release_active(&mut self, session_key: &str, run_id: &str) {
        if let Some(slot) = self.active_run_by_session.get_mut(session_key) {
            if slot.as_deref() == Some(run_id) {
                *slot = None;
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Actions
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq)]
pub enum RunAction {
    /// A decoded socket frame
    Event(WsEvent),
    /// The session was resynced from persisted history; drop its settled runs.
    SessionSynced { session_key: String },
    /// Drop one run (optimistic cleanup after cancel).
    ClearRun { run_id: String },
}

impl From<WsEvent> for RunAction {
    fn from(event: WsEvent) -> Self {
        RunAction::Event(event)
    }
}

impl From<ServerEvent> for RunAction {
    fn from(event: ServerEvent) -> Self {
        RunAction::Event(WsEvent::Server(event))
    }
}

/// What a commit does to the session's active-run pointer.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum ActivePointer {
    Claim,
    Release,
}

// ---------------------------------------------------------------------------
// reduce(): the pure core
// ---------------------------------------------------------------------------

/// Pure, synchronous state transition.
///
/// `now_ms` stamps `created_at_ms`/`updated_at_ms`; it is a parameter so
/// callers own the clock.
pub fn reduce(state: RunStreamState, action: RunAction, now_ms: u64) -> RunStreamState {
    match action {
        RunAction::Event(WsEvent::Server(event)) => reduce_server_event(state, event, now_ms),
        RunAction::Event(WsEvent::Unrecognized(_)) => state,
        RunAction::SessionSynced { session_key } => {
            clear_settled_runs_for_session(state, &session_key)
        }
        RunAction::ClearRun { run_id } => clear_single_run(state, &run_id),
    }
}

fn reduce_server_event(mut state: RunStreamState, event: ServerEvent, now_ms: u64) -> RunStreamState {
    match event {
        // -- Run lifecycle ----------------------------------------------------
        ServerEvent::ChatAck {
            run_id: Some(run_id),
            session_key: Some(session_key),
        } => {
            // Settled runs are immutable: a repeated ack cannot reopen them.
            if state.run(&run_id).is_some_and(|run| run.status.is_settled()) {
                return state;
            }
            let run = StreamRun::new(run_id, session_key, now_ms);
            commit_run(state, run, ActivePointer::Claim)
        }

        ServerEvent::ChatDelta {
            run_id: Some(run_id),
            text_delta,
        } => {
            let Some(mut run) = open_run(&state, &run_id, None, now_ms) else {
                return state;
            };
            run.content.push_str(text_delta.as_deref().unwrap_or_default());
            run.status = RunStatus::Streaming;
            run.touch(now_ms);
            commit_run(state, run, ActivePointer::Claim)
        }

        ServerEvent::ChatFinal {
            run_id: Some(run_id),
            full_text,
            usage,
            session_key,
        } => {
            let Some(mut run) = open_run(&state, &run_id, session_key.as_deref(), now_ms) else {
                return state;
            };
            if let Some(session_key) = session_key {
                if session_key != run.session_key {
                    state.release_active(&run.session_key, &run.run_id);
                    run.session_key = session_key;
                }
            }
            if let Some(full_text) = full_text.filter(|text| !text.is_empty()) {
                run.content = full_text;
            }
            run.status = RunStatus::Final;
            run.usage = usage;
            run.touch(now_ms);
            commit_run(state, run, ActivePointer::Release)
        }

        ServerEvent::AgentError {
            run_id: Some(run_id),
            message,
        } => {
            let Some(mut run) = open_run(&state, &run_id, None, now_ms) else {
                return state;
            };
            run.status = RunStatus::Error;
            run.error = Some(message.unwrap_or_else(|| DEFAULT_AGENT_ERROR.to_string()));
            run.touch(now_ms);
            commit_run(state, run, ActivePointer::Release)
        }

        // -- Tool activity ----------------------------------------------------
        ServerEvent::ToolStart {
            run_id: Some(run_id),
            tool_name,
            args,
        } => {
            let Some(mut run) = open_run(&state, &run_id, None, now_ms) else {
                return state;
            };
            let id = state.next_tool_step_id(&run_id);
            run.tools.push(ToolActivityStep {
                id,
                name: tool_name.unwrap_or_else(|| DEFAULT_TOOL_NAME.to_string()),
                args,
                status: ToolStepStatus::Running,
                result_preview: None,
                ok: None,
            });
            run.touch(now_ms);
            commit_run(state, run, ActivePointer::Claim)
        }

        ServerEvent::ToolEnd {
            run_id: Some(run_id),
            tool_name,
            result_preview,
            ok,
        } => {
            let Some(mut run) = open_run(&state, &run_id, None, now_ms) else {
                return state;
            };
            let name = tool_name.unwrap_or_else(|| DEFAULT_TOOL_NAME.to_string());
            match run.open_tool_step(&name) {
                Some(idx) => {
                    let step = &mut run.tools[idx];
                    step.status = ToolStepStatus::Done;
                    step.result_preview = result_preview;
                    step.ok = ok;
                }
                None => {
                    // End without a matching start: record it as already done.
                    let id = state.next_tool_step_id(&run_id);
                    run.tools.push(ToolActivityStep {
                        id,
                        name,
                        args: None,
                        status: ToolStepStatus::Done,
                        result_preview,
                        ok,
                    });
                }
            }
            run.touch(now_ms);
            commit_run(state, run, ActivePointer::Claim)
        }

        // -- Events without a usable run id, or not about runs --------------
        ServerEvent::ChatAck { .. }
        | ServerEvent::ChatDelta { run_id: None, .. }
        | ServerEvent::ChatFinal { run_id: None, .. }
        | ServerEvent::AgentError { run_id: None, .. }
        | ServerEvent::ToolStart { run_id: None, .. }
        | ServerEvent::ToolEnd { run_id: None, .. }
        | ServerEvent::SessionUpdated { .. } => state,
    }
}

/// Clone of the run to mutate, creating it when unseen.
/// Settled runs are immutable, so they yield `None`.
fn open_run(
    state: &RunStreamState,
    run_id: &str,
    session_key: Option<&str>,
    now_ms: u64,
) -> Option<StreamRun> {
    match state.run(run_id) {
        Some(run) if run.status.is_settled() => None,
        Some(run) => Some(run.clone()),
        None => Some(StreamRun::new(
            run_id.to_string(),
            session_key.unwrap_or(DEFAULT_SESSION_KEY).to_string(),
            now_ms,
        )),
    }
}

/// Write `run` back, keeping `order`/`runs` consistent and bounded.
///
/// Eviction drops the oldest arrivals first but never the run being
/// committed in this same step.
fn commit_run(mut state: RunStreamState, run: StreamRun, pointer: ActivePointer) -> RunStreamState {
    let run_id = run.run_id.clone();
    let session_key = run.session_key.clone();

    if !state.runs.contains_key(&run_id) {
        state.order.push(run_id.clone());
    }
    state.runs.insert(run_id.clone(), run);

    while state.order.len() > MAX_RUNS {
        let Some(idx) = state.order.iter().position(|id| *id != run_id) else {
            break;
        };
        let evicted_id = state.order.remove(idx);
        if let Some(evicted) = state.runs.remove(&evicted_id) {
            state.release_active(&evicted.session_key, &evicted_id);
        }
    }

    match pointer {
        ActivePointer::Claim => state.claim_active(&session_key, &run_id),
        ActivePointer::Release => state.release_active(&session_key, &run_id),
    }
    state
}

fn clear_settled_runs_for_session(mut state: RunStreamState, session_key: &str) -> RunStreamState {
    let runs = &mut state.runs;
    state.order.retain(|run_id| {
        let remove = runs
            .get(run_id)
            .is_some_and(|run| run.session_key == session_key && run.status.is_settled());
        if remove {
            runs.remove(run_id);
        }
        !remove
    });

    let dangling = state
        .active_run(session_key)
        .is_some_and(|run_id| !state.runs.contains_key(run_id));
    if dangling {
        state
            .active_run_by_session
            .insert(session_key.to_string(), None);
    }
    state
}

fn clear_single_run(mut state: RunStreamState, run_id: &str) -> RunStreamState {
    let Some(run) = state.runs.remove(run_id) else {
        return state;
    };
    state.order.retain(|id| id != run_id);
    state.release_active(&run.session_key, run_id);
    state
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
