//! REST client for the control-room endpoints under `/api/v1`.

use std::time::Duration;

use controlroom_protocol::{
    ConfigEnvelope, ConfigUpdateResult, CronJob, CronJobCreate, CronJobEnvelope, CronJobList,
    CronJobPatch, GatewayStatus, HeartbeatInfo, HeartbeatTriggerResult, HeartbeatUpdate,
    OkResponse, SessionDetail, SessionList, SessionSummary, SkillSettings, SkillSettingsUpdate,
    SkillsResponse,
};
use reqwest::Method;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::{Map, Value};
use thiserror::Error;
use tracing::debug;

use crate::config::ClientConfig;

const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// `path` is relative to `/api/v1`, matching what the server logs.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{method} {path} failed: {status}")]
    Status {
        method: Method,
        path: String,
        status: u16,
    },

    #[error("{method} {path} failed: {source}")]
    Transport {
        method: Method,
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("{method} {path} returned an unexpected body: {source}")]
    Decode {
        method: Method,
        path: String,
        #[source]
        source: reqwest::Error,
    },

    #[error("failed to build HTTP client: {0}")]
    Client(#[source] reqwest::Error),
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

#[derive(Debug, Clone)]
pub struct ApiClient {
    http: reqwest::Client,
    base: String,
    token: Option<String>,
}

impl ApiClient {
    pub fn new(config: &ClientConfig) -> Result<Self, ApiError> {
        let http = reqwest::Client::builder()
            .timeout(REQUEST_TIMEOUT)
            .build()
            .map_err(ApiError::Client)?;
        Ok(Self {
            http,
            base: config.api_base(),
            token: config.token.clone(),
        })
    }

    // -- Status ---------------------------------------------------------------

    pub async fn status(&self) -> Result<GatewayStatus, ApiError> {
        self.get("/status").await
    }

    // -- Sessions -------------------------------------------------------------

    pub async fn list_sessions(&self) -> Result<Vec<SessionSummary>, ApiError> {
        let list: SessionList = self.get("/sessions").await?;
        Ok(list.sessions)
    }

    pub async fn get_session(&self, key: &str) -> Result<SessionDetail, ApiError> {
        self.get(&session_path(key)).await
    }

    pub async fn delete_session(&self, key: &str) -> Result<OkResponse, ApiError> {
        self.send(Method::DELETE, &session_path(key), None::<&()>)
            .await
    }

    // -- Cron -----------------------------------------------------------------

    pub async fn list_cron_jobs(&self) -> Result<Vec<CronJob>, ApiError> {
        let list: CronJobList = self.get("/cron/jobs").await?;
        Ok(list.jobs)
    }

    pub async fn create_cron_job(&self, job: &CronJobCreate) -> Result<CronJob, ApiError> {
        let envelope: CronJobEnvelope = self.send(Method::POST, "/cron/jobs", Some(job)).await?;
        Ok(envelope.job)
    }

    pub async fn patch_cron_job(&self, id: &str, patch: &CronJobPatch) -> Result<CronJob, ApiError> {
        let envelope: CronJobEnvelope = self
            .send(Method::PATCH, &cron_job_path(id), Some(patch))
            .await?;
        Ok(envelope.job)
    }

    pub async fn run_cron_job(&self, id: &str) -> Result<OkResponse, ApiError> {
        let path = format!("{}/run", cron_job_path(id));
        self.send(Method::POST, &path, Some(&Map::new())).await
    }

    pub async fn delete_cron_job(&self, id: &str) -> Result<OkResponse, ApiError> {
        self.send(Method::DELETE, &cron_job_path(id), None::<&()>)
            .await
    }

    // -- Heartbeat ------------------------------------------------------------

    pub async fn get_heartbeat(&self) -> Result<HeartbeatInfo, ApiError> {
        self.get("/heartbeat").await
    }

    pub async fn save_heartbeat(&self, content: &str) -> Result<OkResponse, ApiError> {
        let body = HeartbeatUpdate {
            content: content.to_string(),
        };
        self.send(Method::PUT, "/heartbeat/file", Some(&body)).await
    }

    pub async fn trigger_heartbeat(&self) -> Result<HeartbeatTriggerResult, ApiError> {
        self.send(Method::POST, "/heartbeat/trigger", Some(&Map::new()))
            .await
    }

    // -- Skills ---------------------------------------------------------------

    pub async fn list_skills(&self) -> Result<SkillsResponse, ApiError> {
        self.get("/skills").await
    }

    /// Returns the merged settings the server stored.
    pub async fn save_skill_settings(
        &self,
        skills: &SkillSettings,
    ) -> Result<SkillSettings, ApiError> {
        let body = SkillSettingsUpdate {
            skills: skills.clone(),
        };
        let response: SkillsResponse = self
            .send(Method::PUT, "/skills/settings", Some(&body))
            .await?;
        Ok(response.settings)
    }

    // -- Config ---------------------------------------------------------------

    pub async fn get_config(&self) -> Result<Map<String, Value>, ApiError> {
        let envelope: ConfigEnvelope = self.get("/config").await?;
        Ok(envelope.config)
    }

    pub async fn save_config(&self, config: Map<String, Value>) -> Result<ConfigUpdateResult, ApiError> {
        let body = ConfigEnvelope { config };
        self.send(Method::PUT, "/config", Some(&body)).await
    }

    // -- Plumbing -------------------------------------------------------------

    async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<T, ApiError> {
        self.send(Method::GET, path, None::<&()>).await
    }

    async fn send<T, B>(&self, method: Method, path: &str, body: Option<&B>) -> Result<T, ApiError>
    where
        T: DeserializeOwned,
        B: Serialize + ?Sized,
    {
        let url = format!("{}{}", self.base, path);
        let mut request = self.http.request(method.clone(), &url);
        if let Some(token) = &self.token {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        debug!(
            component = "api",
            event = "api.request",
            method = %method,
            path = %path,
            "REST request"
        );

        let response = request.send().await.map_err(|source| ApiError::Transport {
            method: method.clone(),
            path: path.to_string(),
            source,
        })?;

        let status = response.status();
        if !status.is_success() {
            return Err(ApiError::Status {
                method,
                path: path.to_string(),
                status: status.as_u16(),
            });
        }

        response.json::<T>().await.map_err(|source| ApiError::Decode {
            method,
            path: path.to_string(),
            source,
        })
    }
}

fn session_path(key: &str) -> String {
    format!("/sessions/{}", urlencoding::encode(key))
}

fn cron_job_path(id: &str) -> String {
    format!("/cron/jobs/{}", urlencoding::encode(id))
}
