//! Mazu snapshot client.
//!
//! This crate defines the request/response surface the store and the CLI
//! depend on. `HttpApi` talks to the service over HTTP; `MockApi` serves
//! configured collections from memory for tests.

#![forbid(unsafe_code)]

use mazu_core::*;
use serde_json::Value;

mod http;
mod mock;

pub use http::HttpApi;
pub use mock::{MockApi, MockState};

/// Failure of a snapshot or command request.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    /// The request never produced a response (connect, TLS, timeout).
    #[error("http: {0}")]
    Http(#[from] reqwest::Error),
    /// Non-2xx response. `message` is already normalized for display.
    #[error("{status}: {message}")]
    Status { status: u16, message: String, payload: Option<Value> },
    #[error("decode {path}: {source}")]
    Decode {
        path: String,
        #[source]
        source: serde_json::Error,
    },
}

impl ApiError {
    pub fn status(&self) -> Option<u16> {
        match self {
            ApiError::Status { status, .. } => Some(*status),
            _ => None,
        }
    }
}

pub type ApiResult<T> = Result<T, ApiError>;

/// Message shown for a failed response: the JSON body's `error` or `message`
/// field, else the raw body when non-blank, else the reason phrase.
pub fn status_message(reason: &str, body: &str) -> (String, Option<Value>) {
    let payload: Option<Value> = serde_json::from_str(body).ok();
    let field = |key: &str| payload.as_ref().and_then(|v| v.get(key)).and_then(Value::as_str).map(str::to_string);
    let from_json = field("error").or_else(|| field("message"));
    let message = match from_json {
        Some(m) => m,
        None if !body.trim().is_empty() => body.to_string(),
        None => reason.to_string(),
    };
    (message, payload)
}

/// Request surface of the remote service, all paths under `/api`.
#[async_trait::async_trait]
pub trait MazuApi: Send + Sync {
    async fn version(&self) -> ApiResult<VersionInfo>;

    // challenges
    async fn list_challenges(&self) -> ApiResult<Vec<Challenge>>;
    async fn create_challenge(&self, req: CreateChallenge) -> ApiResult<Challenge>;
    async fn update_challenge(&self, id: i32, req: CreateChallenge) -> ApiResult<Challenge>;
    async fn delete_challenge(&self, id: i32) -> ApiResult<()>;
    async fn set_challenge_enabled(&self, id: i32, enabled: bool) -> ApiResult<()>;

    // teams
    async fn list_teams(&self) -> ApiResult<Vec<Team>>;
    async fn create_team(&self, req: CreateTeam) -> ApiResult<Team>;
    async fn update_team(&self, id: i32, req: CreateTeam) -> ApiResult<Team>;
    async fn delete_team(&self, id: i32) -> ApiResult<()>;

    // exploits
    async fn list_exploits(&self, challenge_id: Option<i32>) -> ApiResult<Vec<Exploit>>;
    async fn create_exploit(&self, req: CreateExploit) -> ApiResult<Exploit>;
    async fn update_exploit(&self, id: i32, req: UpdateExploit) -> ApiResult<Exploit>;
    async fn delete_exploit(&self, id: i32) -> ApiResult<()>;

    // exploit runs
    async fn list_exploit_runs(&self, challenge_id: Option<i32>, team_id: Option<i32>) -> ApiResult<Vec<ExploitRun>>;
    async fn create_exploit_run(&self, req: CreateExploitRun) -> ApiResult<ExploitRun>;
    async fn update_exploit_run(&self, id: i32, req: UpdateExploitRun) -> ApiResult<ExploitRun>;
    async fn delete_exploit_run(&self, id: i32) -> ApiResult<()>;
    async fn reorder_exploit_runs(&self, items: Vec<ReorderExploitRunItem>) -> ApiResult<()>;

    // rounds
    async fn list_rounds(&self) -> ApiResult<Vec<Round>>;
    async fn current_round(&self) -> ApiResult<Option<Round>>;
    /// Returns the id of the new round.
    async fn create_round(&self) -> ApiResult<i32>;
    async fn run_round(&self, id: i32) -> ApiResult<()>;
    async fn rerun_round(&self, id: i32) -> ApiResult<()>;
    async fn rerun_unflagged_round(&self, id: i32) -> ApiResult<()>;
    async fn schedule_unflagged_round(&self, id: i32) -> ApiResult<()>;

    // jobs
    async fn list_jobs(&self, round_id: i32) -> ApiResult<Vec<ExploitJob>>;
    async fn get_job(&self, id: i32) -> ApiResult<ExploitJob>;
    async fn enqueue_single_job(&self, req: EnqueueSingleJobRequest, debug: bool) -> ApiResult<ExploitJob>;
    async fn enqueue_existing_job(&self, id: i32, debug: bool) -> ApiResult<ExploitJob>;
    async fn stop_job(&self, id: i32) -> ApiResult<ExploitJob>;
    async fn reorder_jobs(&self, items: Vec<ReorderJobItem>) -> ApiResult<()>;

    // flags
    async fn list_flags(&self, round_id: Option<i32>) -> ApiResult<Vec<Flag>>;
    async fn submit_flag(&self, req: SubmitFlagRequest) -> ApiResult<Flag>;
    async fn update_flags(&self, items: Vec<UpdateFlagRequest>, force: bool) -> ApiResult<Vec<bool>>;

    // settings
    async fn list_settings(&self) -> ApiResult<Vec<Setting>>;
    async fn update_setting(&self, req: UpdateSetting) -> ApiResult<()>;

    // containers
    async fn list_containers(&self) -> ApiResult<Vec<ContainerInfo>>;
    async fn container_runners(&self, id: &str) -> ApiResult<Vec<ExploitJob>>;
    async fn delete_container(&self, id: &str) -> ApiResult<()>;
    async fn restart_container(&self, id: &str, opts: RestartContainerOpts) -> ApiResult<()>;
    async fn restart_all_containers(&self, challenge_id: Option<i32>) -> ApiResult<ContainerBulkOpResult>;
    async fn remove_all_containers(&self, challenge_id: Option<i32>) -> ApiResult<ContainerBulkOpResult>;

    // relations
    async fn list_relations(&self, challenge_id: i32) -> ApiResult<Vec<ChallengeTeamRelation>>;
    async fn get_relation(&self, challenge_id: i32, team_id: i32) -> ApiResult<Option<ChallengeTeamRelation>>;
    async fn update_relation(&self, challenge_id: i32, team_id: i32, req: UpdateConnectionInfo) -> ApiResult<ChallengeTeamRelation>;

    async fn list_ws_connections(&self) -> ApiResult<Vec<WsConnection>>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn message_prefers_json_error_then_message_field() {
        let (m, p) = status_message("Bad Request", r#"{"error":"round 3 is running"}"#);
        assert_eq!(m, "round 3 is running");
        assert!(p.is_some());
        let (m, _) = status_message("Bad Request", r#"{"message":"nope","error":null}"#);
        assert_eq!(m, "nope");
    }

    #[test]
    fn message_falls_back_to_body_then_reason() {
        assert_eq!(status_message("Conflict", "already exists").0, "already exists");
        assert_eq!(status_message("Conflict", r#"{"detail":1}"#).0, r#"{"detail":1}"#);
        let (m, p) = status_message("Service Unavailable", "  ");
        assert_eq!(m, "Service Unavailable");
        assert!(p.is_none());
    }

    #[test]
    fn status_accessor_only_for_status_errors() {
        let e = ApiError::Status { status: 404, message: "gone".into(), payload: None };
        assert_eq!(e.status(), Some(404));
        assert_eq!(e.to_string(), "404: gone");
    }
}
