//! REST-backed control-room caches.
//!
//! Every operation surfaces failure as the single dismissible notice and
//! leaves the cache it was refreshing untouched. Concurrent callers are not
//! de-duplicated; whichever response lands last wins.

use std::fmt;

use controlroom_protocol::{
    CronJob, CronJobCreate, CronJobPatch, GatewayStatus, HeartbeatInfo, SessionDetail,
    SessionSummary, SkillItem, SkillSettings, SkillsResponse, DEFAULT_HEARTBEAT_INTERVAL_SECONDS,
};
use serde_json::{Map, Value};
use tracing::{debug, warn};

use crate::api::{ApiClient, ApiError};
use crate::config::ClientConfig;

pub const CONFIG_SAVED_NOTICE: &str = "Config saved. Restart required for provider/channel changes.";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum NoticeKind {
    Info,
    Error,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Notice {
    pub kind: NoticeKind,
    pub text: String,
}

impl Notice {
    pub fn info(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Info,
            text: text.into(),
        }
    }

    pub fn error(text: impl Into<String>) -> Self {
        Self {
            kind: NoticeKind::Error,
            text: text.into(),
        }
    }

    pub fn is_error(&self) -> bool {
        self.kind == NoticeKind::Error
    }
}

impl fmt::Display for Notice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.text)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HeartbeatState {
    pub content: String,
    pub interval_seconds: u64,
}

impl Default for HeartbeatState {
    fn default() -> Self {
        Self {
            content: String::new(),
            interval_seconds: DEFAULT_HEARTBEAT_INTERVAL_SECONDS,
        }
    }
}

/// Fresh thread key: `web:{base36 millis}-{5 random chars}`.
pub fn generate_session_key() -> String {
    let suffix: String = controlroom_protocol::new_id()
        .chars()
        .filter(char::is_ascii_alphanumeric)
        .take(5)
        .collect();
    format!("web:{}-{}", to_base36(crate::now_ms()), suffix)
}

fn to_base36(mut value: u64) -> String {
    const DIGITS: &[u8; 36] = b"0123456789abcdefghijklmnopqrstuvwxyz";
    if value == 0 {
        return "0".to_string();
    }
    let mut digits = Vec::new();
    while value > 0 {
        digits.push(DIGITS[(value % 36) as usize]);
        value /= 36;
    }
    digits.iter().rev().map(|&digit| digit as char).collect()
}

pub struct ControlRoomData {
    api: ApiClient,
    notice: Option<Notice>,
    status: GatewayStatus,
    sessions: Vec<SessionSummary>,
    selected_session_key: String,
    session_detail: Option<SessionDetail>,
    channel: String,
    chat_id: String,
    cron_jobs: Vec<CronJob>,
    heartbeat: HeartbeatState,
    skills: Vec<SkillItem>,
    skill_settings: SkillSettings,
    config: Map<String, Value>,
}

impl ControlRoomData {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        Ok(Self::with_api(ApiClient::new(config)?, config))
    }

    pub fn with_api(api: ApiClient, config: &ClientConfig) -> Self {
        Self {
            api,
            notice: None,
            status: GatewayStatus::default(),
            sessions: Vec::new(),
            selected_session_key: config.session_key.clone(),
            session_detail: None,
            channel: config.channel.clone(),
            chat_id: config.chat_id.clone(),
            cron_jobs: Vec::new(),
            heartbeat: HeartbeatState::default(),
            skills: Vec::new(),
            skill_settings: SkillSettings::new(),
            config: Map::new(),
        }
    }

    // -- Read access ------------------------------------------------------

    pub fn api(&self) -> &ApiClient {
        &self.api
    }

    pub fn notice(&self) -> Option<&Notice> {
        self.notice.as_ref()
    }

    pub fn status(&self) -> &GatewayStatus {
        &self.status
    }

    pub fn sessions(&self) -> &[SessionSummary] {
        &self.sessions
    }

    pub fn has_session(&self, key: &str) -> bool {
        self.sessions.iter().any(|session| session.key == key)
    }

    pub fn selected_session_key(&self) -> &str {
        &self.selected_session_key
    }

    pub fn session_detail(&self) -> Option<&SessionDetail> {
        self.session_detail.as_ref()
    }

    pub fn channel(&self) -> &str {
        &self.channel
    }

    pub fn chat_id(&self) -> &str {
        &self.chat_id
    }

    pub fn cron_jobs(&self) -> &[CronJob] {
        &self.cron_jobs
    }

    pub fn heartbeat(&self) -> &HeartbeatState {
        &self.heartbeat
    }

    pub fn skills(&self) -> &[SkillItem] {
        &self.skills
    }

    pub fn skill_settings(&self) -> &SkillSettings {
        &self.skill_settings
    }

    pub fn config(&self) -> &Map<String, Value> {
        &self.config
    }

    /// Messages waiting in either bus direction.
    pub fn queue_depth(&self) -> u64 {
        self.status.queue_depth()
    }

    pub fn active_runs(&self) -> u64 {
        self.status.active_runs
    }

    // -- Notices ----------------------------------------------------------

    pub fn push_notice(&mut self, notice: Notice) {
        self.notice = Some(notice);
    }

    pub fn clear_notice(&mut self) {
        self.notice = None;
    }

    pub fn take_notice(&mut self) -> Option<Notice> {
        self.notice.take()
    }

    fn fail(&mut self, err: ApiError) {
        warn!(
            component = "data",
            event = "data.request.failed",
            error = %err,
            "Control-room request failed"
        );
        self.notice = Some(Notice::error(err.to_string()));
    }

    // -- Routing ----------------------------------------------------------

    pub fn set_channel(&mut self, channel: impl Into<String>) {
        self.channel = channel.into();
    }

    pub fn set_chat_id(&mut self, chat_id: impl Into<String>) {
        self.chat_id = chat_id.into();
    }

    // -- Loaders ----------------------------------------------------------

    /// Fetch every cache concurrently, then apply the results.
    pub async fn refresh_all(&mut self) {
        let api = &self.api;
        let (status, sessions, jobs, heartbeat, skills, config) = tokio::join!(
            api.status(),
            api.list_sessions(),
            api.list_cron_jobs(),
            api.get_heartbeat(),
            api.list_skills(),
            api.get_config(),
        );
        self.apply_status(status);
        self.apply_sessions(sessions);
        self.apply_cron_jobs(jobs);
        self.apply_heartbeat(heartbeat);
        self.apply_skills(skills);
        self.apply_config(config);
    }

    pub async fn load_status(&mut self) {
        let result = self.api.status().await;
        self.apply_status(result);
    }

    /// Repopulate the list; if the selection vanished, fall back to the
    /// first listed session.
    pub async fn refresh_sessions(&mut self) {
        let result = self.api.list_sessions().await;
        self.apply_sessions(result);
    }

    /// Failure clears the detail without raising a notice.
    pub async fn load_session_detail(&mut self, key: &str) -> bool {
        match self.api.get_session(key).await {
            Ok(detail) => {
                self.session_detail = Some(detail);
                true
            }
            Err(err) => {
                debug!(
                    component = "data",
                    event = "data.session_detail.unavailable",
                    session_key = %key,
                    error = %err,
                    "Session detail unavailable"
                );
                self.session_detail = None;
                false
            }
        }
    }

    pub async fn load_cron_jobs(&mut self) {
        let result = self.api.list_cron_jobs().await;
        self.apply_cron_jobs(result);
    }

    pub async fn load_heartbeat(&mut self) {
        let result = self.api.get_heartbeat().await;
        self.apply_heartbeat(result);
    }

    pub async fn load_skills(&mut self) {
        let result = self.api.list_skills().await;
        self.apply_skills(result);
    }

    pub async fn load_config(&mut self) {
        let result = self.api.get_config().await;
        self.apply_config(result);
    }

    fn apply_status(&mut self, result: Result<GatewayStatus, ApiError>) {
        match result {
            Ok(status) => self.status = status,
            Err(err) => self.fail(err),
        }
    }

    fn apply_sessions(&mut self, result: Result<Vec<SessionSummary>, ApiError>) {
        match result {
            Ok(sessions) => {
                self.sessions = sessions;
                if !self.has_session(&self.selected_session_key) {
                    if let Some(first) = self.sessions.first() {
                        self.selected_session_key = first.key.clone();
                    }
                }
                self.drop_stale_detail();
            }
            Err(err) => self.fail(err),
        }
    }

    fn apply_cron_jobs(&mut self, result: Result<Vec<CronJob>, ApiError>) {
        match result {
            Ok(jobs) => self.cron_jobs = jobs,
            Err(err) => self.fail(err),
        }
    }

    fn apply_heartbeat(&mut self, result: Result<HeartbeatInfo, ApiError>) {
        match result {
            Ok(info) => {
                self.heartbeat = HeartbeatState {
                    content: info.content,
                    interval_seconds: info.interval_seconds,
                }
            }
            Err(err) => self.fail(err),
        }
    }

    fn apply_skills(&mut self, result: Result<SkillsResponse, ApiError>) {
        match result {
            Ok(response) => {
                self.skills = response.skills;
                self.skill_settings = response.settings;
            }
            Err(err) => self.fail(err),
        }
    }

    fn apply_config(&mut self, result: Result<Map<String, Value>, ApiError>) {
        match result {
            Ok(config) => self.config = config,
            Err(err) => self.fail(err),
        }
    }

    /// Detail only ever describes a listed, selected session.
    fn drop_stale_detail(&mut self) {
        let stale = match &self.session_detail {
            Some(detail) => {
                detail.key != self.selected_session_key || !self.has_session(&detail.key)
            }
            None => false,
        };
        if stale {
            self.session_detail = None;
        }
    }

    // -- Sessions ---------------------------------------------------------

    /// Record the selection. Fetching detail is left to the caller.
    pub fn select_session(&mut self, key: impl Into<String>) {
        self.selected_session_key = key.into();
        self.drop_stale_detail();
    }

    /// Start a new, not-yet-persisted thread and select it.
    pub fn create_thread(&mut self) -> String {
        let key = generate_session_key();
        self.selected_session_key = key.clone();
        self.session_detail = None;
        key
    }

    pub async fn delete_session(&mut self, key: &str) -> bool {
        if let Err(err) = self.api.delete_session(key).await {
            self.fail(err);
            return false;
        }
        if self.selected_session_key == key {
            self.create_thread();
        }
        self.refresh_sessions().await;
        true
    }

    // -- Cron -------------------------------------------------------------

    pub async fn create_cron(&mut self, job: &CronJobCreate) -> bool {
        let result = self.api.create_cron_job(job).await.map(drop);
        self.after_cron_write(result).await
    }

    pub async fn patch_cron(&mut self, id: &str, patch: &CronJobPatch) -> bool {
        let result = self.api.patch_cron_job(id, patch).await.map(drop);
        self.after_cron_write(result).await
    }

    pub async fn run_cron(&mut self, id: &str) -> bool {
        let result = self.api.run_cron_job(id).await.map(drop);
        self.after_cron_write(result).await
    }

    pub async fn remove_cron(&mut self, id: &str) -> bool {
        let result = self.api.delete_cron_job(id).await.map(drop);
        self.after_cron_write(result).await
    }

    async fn after_cron_write(&mut self, result: Result<(), ApiError>) -> bool {
        match result {
            Ok(()) => {
                self.load_cron_jobs().await;
                true
            }
            Err(err) => {
                self.fail(err);
                false
            }
        }
    }

    // -- Heartbeat --------------------------------------------------------

    pub async fn save_heartbeat(&mut self, content: &str) -> bool {
        match self.api.save_heartbeat(content).await {
            Ok(_) => {
                self.load_heartbeat().await;
                true
            }
            Err(err) => {
                self.fail(err);
                false
            }
        }
    }

    pub async fn trigger_heartbeat(&mut self) -> bool {
        match self.api.trigger_heartbeat().await {
            Ok(result) => {
                let response = result.response.as_deref().unwrap_or("(empty)");
                self.notice = Some(Notice::info(format!("Heartbeat response: {response}")));
                true
            }
            Err(err) => {
                self.fail(err);
                false
            }
        }
    }

    // -- Skills and config ------------------------------------------------

    pub async fn save_skills(&mut self, settings: &SkillSettings) -> bool {
        match self.api.save_skill_settings(settings).await {
            Ok(_) => {
                self.load_skills().await;
                true
            }
            Err(err) => {
                self.fail(err);
                false
            }
        }
    }

    pub async fn save_config(&mut self, config: Map<String, Value>) -> bool {
        match self.api.save_config(config).await {
            Ok(result) => {
                self.config = result.config;
                self.notice = Some(Notice::info(CONFIG_SAVED_NOTICE));
                true
            }
            Err(err) => {
                self.fail(err);
                false
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::FakeBackend;
    use axum::http::StatusCode;
    use serde_json::json;

    fn data_for(backend: &FakeBackend) -> ControlRoomData {
        ControlRoomData::new(&backend.config()).expect("data layer")
    }

    fn seed_everything(backend: &FakeBackend) {
        backend.respond(
            "GET",
            "/api/v1/status",
            json!({"queues": {"inbound": 2, "outbound": 3}, "activeRuns": 1}),
        );
        backend.respond(
            "GET",
            "/api/v1/sessions",
            json!({"sessions": [{"key": "web:one"}, {"key": "web:two"}]}),
        );
        backend.respond("GET", "/api/v1/cron/jobs", json!({"jobs": []}));
        backend.respond(
            "GET",
            "/api/v1/heartbeat",
            json!({"enabled": true, "intervalSeconds": 600, "content": "check inbox"}),
        );
        backend.respond(
            "GET",
            "/api/v1/skills",
            json!({"skills": [{"name": "github"}], "settings": {}}),
        );
        backend.respond("GET", "/api/v1/config", json!({"config": {"agents": {}}}));
    }

    #[test]
    fn generated_keys_follow_web_thread_shape() {
        let key = generate_session_key();
        let rest = key.strip_prefix("web:").expect("web: prefix");
        let (millis, suffix) = rest.split_once('-').expect("dash separator");
        assert!(!millis.is_empty());
        assert!(millis.chars().all(|c| c.is_ascii_digit() || c.is_ascii_lowercase()));
        assert_eq!(suffix.len(), 5);
        assert_ne!(generate_session_key(), generate_session_key());
    }

    #[test]
    fn base36_matches_radix_formatting() {
        assert_eq!(to_base36(0), "0");
        assert_eq!(to_base36(35), "z");
        assert_eq!(to_base36(36), "10");
        assert_eq!(to_base36(1_700_000_000_000), "loyw3v28");
    }

    #[tokio::test]
    async fn refresh_all_populates_every_cache() {
        let backend = FakeBackend::start().await;
        seed_everything(&backend);
        let mut data = data_for(&backend);

        data.refresh_all().await;

        assert!(data.notice().is_none());
        assert_eq!(data.queue_depth(), 5);
        assert_eq!(data.active_runs(), 1);
        assert_eq!(data.sessions().len(), 2);
        assert_eq!(
            data.selected_session_key(),
            "web:one",
            "default selection is not listed, so the first session wins"
        );
        assert_eq!(data.heartbeat().interval_seconds, 600);
        assert_eq!(data.heartbeat().content, "check inbox");
        assert_eq!(data.skills()[0].name, "github");
        assert!(data.config().contains_key("agents"));
    }

    #[tokio::test]
    async fn one_failing_loader_sets_notice_and_others_still_apply() {
        let backend = FakeBackend::start().await;
        seed_everything(&backend);
        backend.respond_with(
            "GET",
            "/api/v1/status",
            StatusCode::INTERNAL_SERVER_ERROR,
            json!({}),
        );
        let mut data = data_for(&backend);

        data.refresh_all().await;

        let notice = data.notice().expect("notice");
        assert!(notice.is_error());
        assert_eq!(notice.text, "GET /status failed: 500");
        assert_eq!(data.queue_depth(), 0);
        assert_eq!(data.sessions().len(), 2);
    }

    #[tokio::test]
    async fn failed_reload_leaves_cache_untouched() {
        let backend = FakeBackend::start().await;
        backend.respond(
            "GET",
            "/api/v1/cron/jobs",
            json!({"jobs": [{
                "id": "job-1",
                "name": "daily",
                "enabled": true,
                "schedule": {"kind": "cron", "expr": "0 9 * * *"},
                "payload": {"message": "standup"},
            }]}),
        );
        let mut data = data_for(&backend);
        data.load_cron_jobs().await;
        assert_eq!(data.cron_jobs().len(), 1);

        backend.respond_with("GET", "/api/v1/cron/jobs", StatusCode::BAD_GATEWAY, json!({}));
        data.load_cron_jobs().await;
        assert_eq!(data.cron_jobs().len(), 1);
        assert_eq!(
            data.notice().map(|notice| notice.text.as_str()),
            Some("GET /cron/jobs failed: 502")
        );

        data.clear_notice();
        assert!(data.notice().is_none());
    }

    #[tokio::test]
    async fn refresh_sessions_keeps_listed_selection() {
        let backend = FakeBackend::start().await;
        backend.respond(
            "GET",
            "/api/v1/sessions",
            json!({"sessions": [{"key": "web:one"}, {"key": "web:two"}]}),
        );
        let mut data = data_for(&backend);
        data.select_session("web:two");

        data.refresh_sessions().await;
        assert_eq!(data.selected_session_key(), "web:two");

        backend.respond("GET", "/api/v1/sessions", json!({"sessions": []}));
        data.refresh_sessions().await;
        assert_eq!(
            data.selected_session_key(),
            "web:two",
            "an empty list leaves the selection alone"
        );
    }

    #[tokio::test]
    async fn session_detail_failure_clears_silently() {
        let backend = FakeBackend::start().await;
        backend.respond(
            "GET",
            "/api/v1/sessions",
            json!({"sessions": [{"key": "web:one"}]}),
        );
        backend.respond(
            "GET",
            "/api/v1/sessions/web%3Aone",
            json!({"key": "web:one", "messages": []}),
        );
        let mut data = data_for(&backend);
        data.refresh_sessions().await;

        assert!(data.load_session_detail("web:one").await);
        assert_eq!(data.session_detail().map(|d| d.key.as_str()), Some("web:one"));

        backend.respond_with(
            "GET",
            "/api/v1/sessions/web%3Aone",
            StatusCode::NOT_FOUND,
            json!({}),
        );
        assert!(!data.load_session_detail("web:one").await);
        assert!(data.session_detail().is_none());
        assert!(data.notice().is_none());
    }

    #[tokio::test]
    async fn deleting_the_selected_session_starts_a_new_thread() {
        let backend = FakeBackend::start().await;
        backend.respond(
            "GET",
            "/api/v1/sessions",
            json!({"sessions": [{"key": "web:one"}, {"key": "web:two"}]}),
        );
        backend.respond("DELETE", "/api/v1/sessions/web%3Aone", json!({"ok": true}));
        let mut data = data_for(&backend);
        data.refresh_sessions().await;
        assert_eq!(data.selected_session_key(), "web:one");

        backend.respond(
            "GET",
            "/api/v1/sessions",
            json!({"sessions": [{"key": "web:two"}]}),
        );
        assert!(data.delete_session("web:one").await);

        // The fresh thread is not listed yet, so the refresh falls back.
        assert_eq!(data.selected_session_key(), "web:two");
        assert_eq!(data.sessions().len(), 1);
        assert_eq!(backend.request_count("GET", "/api/v1/sessions"), 2);
    }

    #[tokio::test]
    async fn failed_delete_keeps_selection_and_list() {
        let backend = FakeBackend::start().await;
        backend.respond(
            "GET",
            "/api/v1/sessions",
            json!({"sessions": [{"key": "web:one"}]}),
        );
        let mut data = data_for(&backend);
        data.refresh_sessions().await;

        assert!(!data.delete_session("web:one").await);
        assert_eq!(data.selected_session_key(), "web:one");
        assert_eq!(
            data.notice().map(|notice| notice.text.as_str()),
            Some("DELETE /sessions/web%3Aone failed: 404")
        );
        assert_eq!(backend.request_count("GET", "/api/v1/sessions"), 1);
    }

    #[tokio::test]
    async fn cron_writes_reload_jobs() {
        let backend = FakeBackend::start().await;
        backend.respond("GET", "/api/v1/cron/jobs", json!({"jobs": []}));
        backend.respond("POST", "/api/v1/cron/jobs/job-1/run", json!({"ok": true}));
        let mut data = data_for(&backend);

        assert!(data.run_cron("job-1").await);
        assert_eq!(backend.request_count("GET", "/api/v1/cron/jobs"), 1);

        assert!(!data.remove_cron("job-1").await);
        assert_eq!(backend.request_count("GET", "/api/v1/cron/jobs"), 1);
        assert!(data.notice().is_some_and(Notice::is_error));
    }

    #[tokio::test]
    async fn heartbeat_trigger_reports_response() {
        let backend = FakeBackend::start().await;
        backend.respond("POST", "/api/v1/heartbeat/trigger", json!({"ok": true, "response": "done"}));
        let mut data = data_for(&backend);

        assert!(data.trigger_heartbeat().await);
        assert_eq!(data.notice(), Some(&Notice::info("Heartbeat response: done")));

        backend.respond("POST", "/api/v1/heartbeat/trigger", json!({"ok": true}));
        assert!(data.trigger_heartbeat().await);
        assert_eq!(
            data.notice().map(|notice| notice.text.as_str()),
            Some("Heartbeat response: (empty)")
        );
    }

    #[tokio::test]
    async fn save_config_replaces_config_and_flags_restart() {
        let backend = FakeBackend::start().await;
        backend.respond(
            "PUT",
            "/api/v1/config",
            json!({"ok": true, "config": {"channels": {"telegram": {"enabled": true}}}, "restartRequired": true}),
        );
        let mut data = data_for(&backend);

        let mut next = Map::new();
        next.insert("channels".to_string(), json!({"telegram": {"enabled": true}}));
        assert!(data.save_config(next).await);
        assert!(data.config().contains_key("channels"));
        assert_eq!(data.take_notice(), Some(Notice::info(CONFIG_SAVED_NOTICE)));
        assert!(data.notice().is_none());
    }

    #[tokio::test]
    async fn create_thread_selects_fresh_key_and_clears_detail() {
        let backend = FakeBackend::start().await;
        let mut data = data_for(&backend);
        let key = data.create_thread();
        assert!(key.starts_with("web:"));
        assert_eq!(data.selected_session_key(), key);
        assert!(data.session_detail().is_none());
    }
}
