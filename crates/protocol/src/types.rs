//! REST entity types shared by the web API and clients

use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

// ---------------------------------------------------------------------------
// Sessions
// ---------------------------------------------------------------------------

/// One row of `GET /sessions`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SessionSummary {
    pub key: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SessionList {
    #[serde(default)]
    pub sessions: Vec<SessionSummary>,
}

/// A message persisted in a session's history
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SessionMessage {
    pub role: String,
    /// Tool-call turns may carry no text.
    #[serde(default)]
    pub content: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<String>,
}

/// `GET /sessions/{key}`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionDetail {
    pub key: String,
    #[serde(default)]
    pub created_at: String,
    #[serde(default)]
    pub updated_at: String,
    #[serde(default)]
    pub metadata: Map<String, Value>,
    #[serde(default)]
    pub messages: Vec<SessionMessage>,
    #[serde(default)]
    pub path: String,
}

// ---------------------------------------------------------------------------
// Cron
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScheduleKind {
    Every,
    Cron,
    At,
}

impl std::fmt::Display for ScheduleKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(match self {
            ScheduleKind::Every => "every",
            ScheduleKind::Cron => "cron",
            ScheduleKind::At => "at",
        })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronSchedule {
    pub kind: ScheduleKind,
    #[serde(default)]
    pub every_ms: Option<u64>,
    #[serde(default)]
    pub expr: Option<String>,
    #[serde(default)]
    pub at_ms: Option<i64>,
    #[serde(default)]
    pub tz: Option<String>,
}

impl CronSchedule {
    /// Short human-readable form: `every 300s`, `cron */5 * * * *`, `at 1700000000000`.
    pub fn describe(&self) -> String {
        match self.kind {
            ScheduleKind::Every => match self.every_ms {
                Some(ms) => format!("every {}s", ms / 1000),
                None => "every ?".to_string(),
            },
            ScheduleKind::Cron => format!("cron {}", self.expr.as_deref().unwrap_or("?")),
            ScheduleKind::At => match self.at_ms {
                Some(ms) => format!("at {ms}"),
                None => "at ?".to_string(),
            },
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronPayload {
    #[serde(default)]
    pub message: String,
    #[serde(default)]
    pub channel: Option<String>,
    #[serde(default)]
    pub to: Option<String>,
    #[serde(default)]
    pub deliver: bool,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJobState {
    #[serde(default)]
    pub next_run_at_ms: Option<i64>,
    #[serde(default)]
    pub last_run_at_ms: Option<i64>,
    #[serde(default)]
    pub last_status: Option<String>,
    #[serde(default)]
    pub last_error: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CronJob {
    pub id: String,
    pub name: String,
    pub enabled: bool,
    pub schedule: CronSchedule,
    pub payload: CronPayload,
    #[serde(default)]
    pub state: CronJobState,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub created_at_ms: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at_ms: Option<i64>,
    #[serde(default)]
    pub delete_after_run: bool,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct CronJobList {
    #[serde(default)]
    pub jobs: Vec<CronJob>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CronJobEnvelope {
    pub job: CronJob,
}

/// `POST /cron/jobs`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronJobCreate {
    pub name: String,
    pub message: String,
    pub schedule_kind: ScheduleKind,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub every_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_expr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_iso: Option<String>,
    #[serde(default)]
    pub deliver: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub channel: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub to: Option<String>,
    #[serde(default)]
    pub delete_after_run: bool,
}

/// `PATCH /cron/jobs/{id}`; absent fields are left unchanged server-side.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct CronJobPatch {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub enabled: Option<bool>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub schedule_kind: Option<ScheduleKind>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub every_seconds: Option<u64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cron_expr: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub at_iso: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub delete_after_run: Option<bool>,
}

// ---------------------------------------------------------------------------
// Heartbeat
// ---------------------------------------------------------------------------

pub const DEFAULT_HEARTBEAT_INTERVAL_SECONDS: u64 = 1800;

fn default_heartbeat_interval() -> u64 {
    DEFAULT_HEARTBEAT_INTERVAL_SECONDS
}

/// `GET /heartbeat`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatInfo {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default = "default_heartbeat_interval")]
    pub interval_seconds: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub path: Option<String>,
    #[serde(default)]
    pub content: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HeartbeatUpdate {
    pub content: String,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeartbeatTriggerResult {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub response: Option<String>,
}

// ---------------------------------------------------------------------------
// Skills
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillItem {
    pub name: String,
    #[serde(default)]
    pub path: String,
    #[serde(default)]
    pub source: String,
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default)]
    pub always: Option<bool>,
    #[serde(default)]
    pub description: String,
    #[serde(default)]
    pub available: bool,
}

fn default_true() -> bool {
    true
}

/// Per-skill override; `None` leaves the skill's own default in place.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SkillSetting {
    #[serde(default)]
    pub enabled: Option<bool>,
    #[serde(default)]
    pub always: Option<bool>,
}

pub type SkillSettings = BTreeMap<String, SkillSetting>;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillsResponse {
    #[serde(default)]
    pub skills: Vec<SkillItem>,
    #[serde(default)]
    pub settings: SkillSettings,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SkillSettingsUpdate {
    pub skills: SkillSettings,
}

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// `GET /config` and the body of `PUT /config`. Secrets arrive masked.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ConfigEnvelope {
    #[serde(default)]
    pub config: Map<String, Value>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConfigUpdateResult {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub config: Map<String, Value>,
    #[serde(default)]
    pub restart_required: bool,
}

// ---------------------------------------------------------------------------
// Status
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueDepths {
    #[serde(default)]
    pub inbound: u64,
    #[serde(default)]
    pub outbound: u64,
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct HeartbeatStatus {
    #[serde(default)]
    pub enabled: bool,
    #[serde(default)]
    pub interval_seconds: u64,
    #[serde(default)]
    pub file_exists: bool,
}

/// `GET /status`
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GatewayStatus {
    #[serde(default)]
    pub gateway_port: Option<u16>,
    #[serde(default)]
    pub workspace: Option<String>,
    #[serde(default)]
    pub queues: QueueDepths,
    #[serde(default)]
    pub cron: Value,
    #[serde(default)]
    pub heartbeat: HeartbeatStatus,
    #[serde(default)]
    pub channels: Value,
    #[serde(default)]
    pub active_runs: u64,
}

impl GatewayStatus {
    /// Messages waiting in either bus direction
    pub fn queue_depth(&self) -> u64 {
        self.queues.inbound + self.queues.outbound
    }
}

/// `{ "ok": true }` acknowledgement
#[derive(Debug, Clone, Copy, Default, Serialize, Deserialize)]
pub struct OkResponse {
    #[serde(default)]
    pub ok: bool,
}
