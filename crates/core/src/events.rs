//! Push events delivered over the live channel.
//!
//! Frames look like `{"type": "round_created", "data": {...}}`. Each kind maps
//! to exactly one variant; anything else fails to decode and is dropped by the
//! transport, never dispatched.

use serde::{Deserialize, Serialize};

use crate::models::*;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum PushEvent {
    ChallengeCreated(Challenge),
    ChallengeUpdated(Challenge),
    ChallengeDeleted(i32),

    TeamCreated(Team),
    TeamUpdated(Team),
    TeamDeleted(i32),

    ExploitCreated(Exploit),
    ExploitUpdated(Exploit),
    ExploitDeleted(i32),

    ExploitRunCreated(ExploitRun),
    ExploitRunUpdated(ExploitRun),
    ExploitRunDeleted(i32),
    /// Bulk sequence change; no payload.
    ExploitRunsReordered,

    RoundCreated(Round),
    RoundUpdated(Round),
    RoundDeleted(i32),
    RoundJobsReady(RoundJobsReady),

    JobCreated(ExploitJob),
    JobUpdated(ExploitJob),
    JobDeleted(i32),
    JobsChanged(JobsChanged),

    FlagCreated(Flag),
    FlagUpdated(Flag),
    FlagDeleted(i32),

    SettingUpdated(Setting),

    ContainerCreated(ContainerInfo),
    ContainerUpdated(ContainerInfo),
    ContainerDeleted(String),
    ContainerExecsUpdated(ContainerExecs),

    RelationUpdated(serde_json::Value),
    ConnectionInfoUpdated(serde_json::Value),

    WsConnections(Vec<WsConnection>),

    Error(ErrorFrame),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RoundJobsReady {
    pub round_id: i32,
    pub success: bool,
    #[serde(default)]
    pub created: Option<u64>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct JobsChanged {
    pub round_id: i32,
    #[serde(default)]
    pub created: Option<u64>,
}

/// Partial patch of a container's exec counters.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ContainerExecs {
    pub id: String,
    pub running_execs: usize,
    pub max_execs: usize,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Default)]
pub struct ErrorFrame {
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub code: Option<String>,
}

impl PushEvent {
    /// Decode one text frame. Errors are for logging only.
    pub fn from_frame(text: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(text)
    }

    /// Wire name of the event kind, for logs and metrics labels.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::ChallengeCreated(_) => "challenge_created",
            Self::ChallengeUpdated(_) => "challenge_updated",
            Self::ChallengeDeleted(_) => "challenge_deleted",
            Self::TeamCreated(_) => "team_created",
            Self::TeamUpdated(_) => "team_updated",
            Self::TeamDeleted(_) => "team_deleted",
            Self::ExploitCreated(_) => "exploit_created",
            Self::ExploitUpdated(_) => "exploit_updated",
            Self::ExploitDeleted(_) => "exploit_deleted",
            Self::ExploitRunCreated(_) => "exploit_run_created",
            Self::ExploitRunUpdated(_) => "exploit_run_updated",
            Self::ExploitRunDeleted(_) => "exploit_run_deleted",
            Self::ExploitRunsReordered => "exploit_runs_reordered",
            Self::RoundCreated(_) => "round_created",
            Self::RoundUpdated(_) => "round_updated",
            Self::RoundDeleted(_) => "round_deleted",
            Self::RoundJobsReady(_) => "round_jobs_ready",
            Self::JobCreated(_) => "job_created",
            Self::JobUpdated(_) => "job_updated",
            Self::JobDeleted(_) => "job_deleted",
            Self::JobsChanged(_) => "jobs_changed",
            Self::FlagCreated(_) => "flag_created",
            Self::FlagUpdated(_) => "flag_updated",
            Self::FlagDeleted(_) => "flag_deleted",
            Self::SettingUpdated(_) => "setting_updated",
            Self::ContainerCreated(_) => "container_created",
            Self::ContainerUpdated(_) => "container_updated",
            Self::ContainerDeleted(_) => "container_deleted",
            Self::ContainerExecsUpdated(_) => "container_execs_updated",
            Self::RelationUpdated(_) => "relation_updated",
            Self::ConnectionInfoUpdated(_) => "connection_info_updated",
            Self::WsConnections(_) => "ws_connections",
            Self::Error(_) => "error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn decodes_record_payload() {
        let frame = json!({
            "type": "round_created",
            "data": { "id": 2, "started_at": "2024-05-01T10:00:00Z", "finished_at": null, "status": "pending" }
        })
        .to_string();
        match PushEvent::from_frame(&frame).unwrap() {
            PushEvent::RoundCreated(r) => {
                assert_eq!(r.id, 2);
                assert!(r.is_pending());
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn decodes_bare_id_and_string_id_deletes() {
        let ev = PushEvent::from_frame(r#"{"type":"team_deleted","data":7}"#).unwrap();
        assert_eq!(ev, PushEvent::TeamDeleted(7));
        let ev = PushEvent::from_frame(r#"{"type":"container_deleted","data":"abc123"}"#).unwrap();
        assert_eq!(ev, PushEvent::ContainerDeleted("abc123".into()));
    }

    #[test]
    fn decodes_payloadless_reorder() {
        let ev = PushEvent::from_frame(r#"{"type":"exploit_runs_reordered"}"#).unwrap();
        assert_eq!(ev, PushEvent::ExploitRunsReordered);
        assert_eq!(ev.kind(), "exploit_runs_reordered");
    }

    #[test]
    fn decodes_fan_out_signals() {
        let ev = PushEvent::from_frame(r#"{"type":"round_jobs_ready","data":{"round_id":4,"success":true,"created":12}}"#).unwrap();
        assert_eq!(ev, PushEvent::RoundJobsReady(RoundJobsReady { round_id: 4, success: true, created: Some(12) }));
        let ev = PushEvent::from_frame(r#"{"type":"jobs_changed","data":{"round_id":4}}"#).unwrap();
        assert_eq!(ev, PushEvent::JobsChanged(JobsChanged { round_id: 4, created: None }));
    }

    #[test]
    fn unknown_kind_and_garbage_fail_to_decode() {
        assert!(PushEvent::from_frame(r#"{"type":"something_new","data":1}"#).is_err());
        assert!(PushEvent::from_frame("not json").is_err());
        assert!(PushEvent::from_frame(r#"{"type":"team_deleted","data":"seven"}"#).is_err());
    }
}
