//! Minimal records for tests across the workspace.

use chrono::{TimeZone, Utc};

use crate::models::*;

fn ts() -> chrono::DateTime<Utc> { Utc.with_ymd_and_hms(2024, 5, 1, 10, 0, 0).unwrap() }

pub fn challenge(id: i32) -> Challenge {
    Challenge { id, name: format!("chal-{}", id), enabled: true, default_port: None, priority: 0, flag_regex: None, created_at: ts() }
}

pub fn team(id: i32) -> Team {
    Team { id, team_id: format!("t{}", id), team_name: format!("team {}", id), default_ip: None, priority: 0, enabled: true, created_at: ts() }
}

pub fn exploit(id: i32, challenge_id: i32) -> Exploit {
    Exploit {
        id,
        name: format!("exp-{}", id),
        challenge_id,
        enabled: true,
        max_per_container: 1,
        max_containers: 1,
        docker_image: "exp:latest".into(),
        entrypoint: None,
        timeout_secs: 30,
        default_counter: 0,
        created_at: ts(),
    }
}

pub fn exploit_run(id: i32, exploit_id: i32) -> ExploitRun {
    ExploitRun { id, exploit_id, challenge_id: 1, team_id: 1, priority: None, sequence: id, enabled: true, created_at: ts() }
}

pub fn round(id: i32, status: &str) -> Round {
    Round { id, started_at: ts(), finished_at: None, status: status.to_string(), jobs_ready: None }
}

pub fn job(id: i32, round_id: i32) -> ExploitJob {
    ExploitJob {
        id,
        round_id,
        exploit_run_id: Some(1),
        team_id: 1,
        priority: 0,
        status: "pending".into(),
        container_id: None,
        stdout: None,
        stderr: None,
        duration_ms: None,
        schedule_at: None,
        started_at: None,
        finished_at: None,
        created_at: ts(),
    }
}

pub fn flag(id: i32, round_id: i32) -> Flag {
    Flag {
        id,
        job_id: None,
        round_id,
        challenge_id: 1,
        team_id: 1,
        flag_value: format!("FLAG{{{}}}", id),
        status: "captured".into(),
        submitted_at: None,
        created_at: ts(),
    }
}

pub fn setting(key: &str, value: &str) -> Setting {
    Setting { key: key.to_string(), value: value.to_string() }
}

pub fn container(id: &str) -> ContainerInfo {
    ContainerInfo {
        id: id.to_string(),
        exploit_id: 1,
        status: "running".into(),
        counter: 0,
        running_execs: 0,
        max_execs: 1,
        created_at: ts(),
        affinity_runs: Vec::new(),
    }
}
