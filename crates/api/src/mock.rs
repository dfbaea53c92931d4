// ----------------- Mock implementation -----------------

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use chrono::Utc;
use mazu_core::*;

use crate::{ApiError, ApiResult, MazuApi};

/// Backing data served by `MockApi`. Tests seed it directly.
#[derive(Debug, Default)]
pub struct MockState {
    pub challenges: Vec<Challenge>,
    pub teams: Vec<Team>,
    pub exploits: Vec<Exploit>,
    pub exploit_runs: Vec<ExploitRun>,
    pub rounds: Vec<Round>,
    pub jobs: Vec<ExploitJob>,
    pub flags: Vec<Flag>,
    pub settings: Vec<Setting>,
    pub containers: Vec<ContainerInfo>,
    pub runners: HashMap<String, Vec<ExploitJob>>,
    pub relations: Vec<ChallengeTeamRelation>,
    pub ws_connections: Vec<WsConnection>,
}

/// In-memory implementation for tests: records every call by operation name,
/// can fail or delay a named operation.
#[derive(Default)]
pub struct MockApi {
    state: Mutex<MockState>,
    calls: Mutex<Vec<String>>,
    failing: Mutex<HashSet<String>>,
    delays: Mutex<HashMap<String, Duration>>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> { m.lock().unwrap_or_else(PoisonError::into_inner) }

fn next_id<T>(items: &[T], id: impl Fn(&T) -> i32) -> i32 { items.iter().map(id).max().unwrap_or(0) + 1 }

fn not_found(what: &str, id: impl std::fmt::Display) -> ApiError {
    ApiError::Status { status: 404, message: format!("{} {} not found", what, id), payload: None }
}

impl MockApi {
    pub fn new() -> Self { Self::default() }

    pub fn with_state(state: MockState) -> Self { Self { state: Mutex::new(state), ..Self::default() } }

    /// Mutate the served data.
    pub fn seed(&self, f: impl FnOnce(&mut MockState)) { f(&mut lock(&self.state)) }

    /// Operation names in call order, e.g. `list_jobs`, `run_round`.
    pub fn calls(&self) -> Vec<String> { lock(&self.calls).clone() }

    pub fn call_count(&self, op: &str) -> usize { lock(&self.calls).iter().filter(|c| *c == op).count() }

    pub fn clear_calls(&self) { lock(&self.calls).clear() }

    /// Make `op` return a 500 until `recover` is called.
    pub fn fail(&self, op: &str) { lock(&self.failing).insert(op.to_string()); }

    pub fn recover(&self, op: &str) { lock(&self.failing).remove(op); }

    /// Hold every later call of `op` for `d` before it answers.
    pub fn delay(&self, op: &str, d: Duration) { lock(&self.delays).insert(op.to_string(), d); }

    async fn enter(&self, op: &str) -> ApiResult<()> {
        lock(&self.calls).push(op.to_string());
        let delay = lock(&self.delays).get(op).copied();
        if let Some(d) = delay {
            tokio::time::sleep(d).await;
        }
        if lock(&self.failing).contains(op) {
            return Err(ApiError::Status { status: 500, message: format!("{} failed", op), payload: None });
        }
        Ok(())
    }

    fn read<R>(&self, f: impl FnOnce(&MockState) -> R) -> R { f(&lock(&self.state)) }

    fn write<R>(&self, f: impl FnOnce(&mut MockState) -> R) -> R { f(&mut lock(&self.state)) }
}

#[async_trait::async_trait]
impl MazuApi for MockApi {
    async fn version(&self) -> ApiResult<VersionInfo> {
        self.enter("version").await?;
        Ok(VersionInfo { version: "mock".into(), git_hash: None })
    }

    async fn list_challenges(&self) -> ApiResult<Vec<Challenge>> {
        self.enter("list_challenges").await?;
        Ok(self.read(|s| s.challenges.clone()))
    }

    async fn create_challenge(&self, req: CreateChallenge) -> ApiResult<Challenge> {
        self.enter("create_challenge").await?;
        Ok(self.write(|s| {
            let c = Challenge {
                id: next_id(&s.challenges, |c| c.id),
                name: req.name,
                enabled: req.enabled.unwrap_or(true),
                default_port: req.default_port,
                priority: req.priority.unwrap_or(0),
                flag_regex: req.flag_regex,
                created_at: Utc::now(),
            };
            s.challenges.push(c.clone());
            c
        }))
    }

    async fn update_challenge(&self, id: i32, req: CreateChallenge) -> ApiResult<Challenge> {
        self.enter("update_challenge").await?;
        self.write(|s| {
            let c = s.challenges.iter_mut().find(|c| c.id == id).ok_or_else(|| not_found("challenge", id))?;
            c.name = req.name;
            if let Some(v) = req.enabled { c.enabled = v; }
            if let Some(v) = req.priority { c.priority = v; }
            c.default_port = req.default_port;
            c.flag_regex = req.flag_regex;
            Ok(c.clone())
        })
    }

    async fn delete_challenge(&self, id: i32) -> ApiResult<()> {
        self.enter("delete_challenge").await?;
        self.write(|s| s.challenges.retain(|c| c.id != id));
        Ok(())
    }

    async fn set_challenge_enabled(&self, id: i32, enabled: bool) -> ApiResult<()> {
        self.enter("set_challenge_enabled").await?;
        self.write(|s| {
            let c = s.challenges.iter_mut().find(|c| c.id == id).ok_or_else(|| not_found("challenge", id))?;
            c.enabled = enabled;
            Ok(())
        })
    }

    async fn list_teams(&self) -> ApiResult<Vec<Team>> {
        self.enter("list_teams").await?;
        Ok(self.read(|s| s.teams.clone()))
    }

    async fn create_team(&self, req: CreateTeam) -> ApiResult<Team> {
        self.enter("create_team").await?;
        Ok(self.write(|s| {
            let t = Team {
                id: next_id(&s.teams, |t| t.id),
                team_id: req.team_id,
                team_name: req.team_name,
                default_ip: req.default_ip,
                priority: req.priority.unwrap_or(0),
                enabled: req.enabled.unwrap_or(true),
                created_at: Utc::now(),
            };
            s.teams.push(t.clone());
            t
        }))
    }

    async fn update_team(&self, id: i32, req: CreateTeam) -> ApiResult<Team> {
        self.enter("update_team").await?;
        self.write(|s| {
            let t = s.teams.iter_mut().find(|t| t.id == id).ok_or_else(|| not_found("team", id))?;
            t.team_id = req.team_id;
            t.team_name = req.team_name;
            t.default_ip = req.default_ip;
            if let Some(v) = req.priority { t.priority = v; }
            if let Some(v) = req.enabled { t.enabled = v; }
            Ok(t.clone())
        })
    }

    async fn delete_team(&self, id: i32) -> ApiResult<()> {
        self.enter("delete_team").await?;
        self.write(|s| s.teams.retain(|t| t.id != id));
        Ok(())
    }

    async fn list_exploits(&self, challenge_id: Option<i32>) -> ApiResult<Vec<Exploit>> {
        self.enter("list_exploits").await?;
        Ok(self.read(|s| s.exploits.iter().filter(|e| challenge_id.map_or(true, |c| e.challenge_id == c)).cloned().collect()))
    }

    async fn create_exploit(&self, req: CreateExploit) -> ApiResult<Exploit> {
        self.enter("create_exploit").await?;
        Ok(self.write(|s| {
            let e = Exploit {
                id: next_id(&s.exploits, |e| e.id),
                name: req.name,
                challenge_id: req.challenge_id,
                enabled: req.enabled.unwrap_or(true),
                max_per_container: req.max_per_container.unwrap_or(1),
                max_containers: req.max_containers.unwrap_or(1),
                docker_image: req.docker_image,
                entrypoint: req.entrypoint,
                timeout_secs: req.timeout_secs.unwrap_or(30),
                default_counter: req.default_counter.unwrap_or(0),
                created_at: Utc::now(),
            };
            s.exploits.push(e.clone());
            e
        }))
    }

    async fn update_exploit(&self, id: i32, req: UpdateExploit) -> ApiResult<Exploit> {
        self.enter("update_exploit").await?;
        self.write(|s| {
            let e = s.exploits.iter_mut().find(|e| e.id == id).ok_or_else(|| not_found("exploit", id))?;
            e.name = req.name;
            e.docker_image = req.docker_image;
            e.entrypoint = req.entrypoint;
            if let Some(v) = req.enabled { e.enabled = v; }
            if let Some(v) = req.max_per_container { e.max_per_container = v; }
            if let Some(v) = req.max_containers { e.max_containers = v; }
            if let Some(v) = req.timeout_secs { e.timeout_secs = v; }
            if let Some(v) = req.default_counter { e.default_counter = v; }
            Ok(e.clone())
        })
    }

    async fn delete_exploit(&self, id: i32) -> ApiResult<()> {
        self.enter("delete_exploit").await?;
        self.write(|s| s.exploits.retain(|e| e.id != id));
        Ok(())
    }

    async fn list_exploit_runs(&self, challenge_id: Option<i32>, team_id: Option<i32>) -> ApiResult<Vec<ExploitRun>> {
        self.enter("list_exploit_runs").await?;
        Ok(self.read(|s| {
            s.exploit_runs
                .iter()
                .filter(|r| challenge_id.map_or(true, |c| r.challenge_id == c) && team_id.map_or(true, |t| r.team_id == t))
                .cloned()
                .collect()
        }))
    }

    async fn create_exploit_run(&self, req: CreateExploitRun) -> ApiResult<ExploitRun> {
        self.enter("create_exploit_run").await?;
        Ok(self.write(|s| {
            let id = next_id(&s.exploit_runs, |r| r.id);
            let r = ExploitRun {
                id,
                exploit_id: req.exploit_id,
                challenge_id: req.challenge_id,
                team_id: req.team_id,
                priority: req.priority,
                sequence: req.sequence.unwrap_or(id),
                enabled: true,
                created_at: Utc::now(),
            };
            s.exploit_runs.push(r.clone());
            r
        }))
    }

    async fn update_exploit_run(&self, id: i32, req: UpdateExploitRun) -> ApiResult<ExploitRun> {
        self.enter("update_exploit_run").await?;
        self.write(|s| {
            let r = s.exploit_runs.iter_mut().find(|r| r.id == id).ok_or_else(|| not_found("exploit run", id))?;
            if req.priority.is_some() { r.priority = req.priority; }
            if let Some(v) = req.sequence { r.sequence = v; }
            if let Some(v) = req.enabled { r.enabled = v; }
            Ok(r.clone())
        })
    }

    async fn delete_exploit_run(&self, id: i32) -> ApiResult<()> {
        self.enter("delete_exploit_run").await?;
        self.write(|s| s.exploit_runs.retain(|r| r.id != id));
        Ok(())
    }

    async fn reorder_exploit_runs(&self, items: Vec<ReorderExploitRunItem>) -> ApiResult<()> {
        self.enter("reorder_exploit_runs").await?;
        self.write(|s| {
            for it in items {
                if let Some(r) = s.exploit_runs.iter_mut().find(|r| r.id == it.id) {
                    r.sequence = it.sequence;
                }
            }
            s.exploit_runs.sort_by_key(|r| r.sequence);
        });
        Ok(())
    }

    async fn list_rounds(&self) -> ApiResult<Vec<Round>> {
        self.enter("list_rounds").await?;
        Ok(self.read(|s| s.rounds.clone()))
    }

    async fn current_round(&self) -> ApiResult<Option<Round>> {
        self.enter("current_round").await?;
        Ok(self.read(|s| s.rounds.iter().find(|r| r.status == "running").cloned()))
    }

    async fn create_round(&self) -> ApiResult<i32> {
        self.enter("create_round").await?;
        Ok(self.write(|s| {
            let id = next_id(&s.rounds, |r| r.id);
            let round = Round { id, started_at: Utc::now(), finished_at: None, status: ROUND_PENDING.into(), jobs_ready: None };
            s.rounds.insert(0, round);
            id
        }))
    }

    async fn run_round(&self, id: i32) -> ApiResult<()> {
        self.enter("run_round").await?;
        self.write(|s| {
            let r = s.rounds.iter_mut().find(|r| r.id == id).ok_or_else(|| not_found("round", id))?;
            r.status = "running".into();
            Ok(())
        })
    }

    async fn rerun_round(&self, id: i32) -> ApiResult<()> {
        self.enter("rerun_round").await?;
        self.read(|s| s.rounds.iter().any(|r| r.id == id)).then_some(()).ok_or_else(|| not_found("round", id))
    }

    async fn rerun_unflagged_round(&self, id: i32) -> ApiResult<()> {
        self.enter("rerun_unflagged_round").await?;
        self.read(|s| s.rounds.iter().any(|r| r.id == id)).then_some(()).ok_or_else(|| not_found("round", id))
    }

    async fn schedule_unflagged_round(&self, id: i32) -> ApiResult<()> {
        self.enter("schedule_unflagged_round").await?;
        self.read(|s| s.rounds.iter().any(|r| r.id == id)).then_some(()).ok_or_else(|| not_found("round", id))
    }

    async fn list_jobs(&self, round_id: i32) -> ApiResult<Vec<ExploitJob>> {
        self.enter("list_jobs").await?;
        Ok(self.read(|s| s.jobs.iter().filter(|j| j.round_id == round_id).cloned().collect()))
    }

    async fn get_job(&self, id: i32) -> ApiResult<ExploitJob> {
        self.enter("get_job").await?;
        self.read(|s| s.jobs.iter().find(|j| j.id == id).cloned()).ok_or_else(|| not_found("job", id))
    }

    async fn enqueue_single_job(&self, req: EnqueueSingleJobRequest, _debug: bool) -> ApiResult<ExploitJob> {
        self.enter("enqueue_single_job").await?;
        self.write(|s| {
            let round_id = s.rounds.first().map(|r| r.id).ok_or_else(|| not_found("round", "current"))?;
            let job = ExploitJob {
                id: next_id(&s.jobs, |j| j.id),
                round_id,
                exploit_run_id: Some(req.exploit_run_id),
                team_id: req.team_id,
                priority: 0,
                status: "pending".into(),
                container_id: None,
                stdout: None,
                stderr: None,
                duration_ms: None,
                schedule_at: None,
                started_at: None,
                finished_at: None,
                created_at: Utc::now(),
            };
            s.jobs.push(job.clone());
            Ok(job)
        })
    }

    async fn enqueue_existing_job(&self, id: i32, _debug: bool) -> ApiResult<ExploitJob> {
        self.enter("enqueue_existing_job").await?;
        self.write(|s| {
            let j = s.jobs.iter_mut().find(|j| j.id == id).ok_or_else(|| not_found("job", id))?;
            j.status = "pending".into();
            Ok(j.clone())
        })
    }

    async fn stop_job(&self, id: i32) -> ApiResult<ExploitJob> {
        self.enter("stop_job").await?;
        self.write(|s| {
            let j = s.jobs.iter_mut().find(|j| j.id == id).ok_or_else(|| not_found("job", id))?;
            j.status = "stopped".into();
            Ok(j.clone())
        })
    }

    async fn reorder_jobs(&self, items: Vec<ReorderJobItem>) -> ApiResult<()> {
        self.enter("reorder_jobs").await?;
        self.write(|s| {
            for it in items {
                if let Some(j) = s.jobs.iter_mut().find(|j| j.id == it.id) {
                    j.priority = it.priority;
                }
            }
        });
        Ok(())
    }

    async fn list_flags(&self, round_id: Option<i32>) -> ApiResult<Vec<Flag>> {
        self.enter("list_flags").await?;
        Ok(self.read(|s| s.flags.iter().filter(|f| round_id.map_or(true, |r| f.round_id == r)).cloned().collect()))
    }

    async fn submit_flag(&self, req: SubmitFlagRequest) -> ApiResult<Flag> {
        self.enter("submit_flag").await?;
        Ok(self.write(|s| {
            let f = Flag {
                id: next_id(&s.flags, |f| f.id),
                job_id: None,
                round_id: req.round_id,
                challenge_id: req.challenge_id,
                team_id: req.team_id,
                flag_value: req.flag_value,
                status: "captured".into(),
                submitted_at: None,
                created_at: Utc::now(),
            };
            s.flags.insert(0, f.clone());
            f
        }))
    }

    async fn update_flags(&self, items: Vec<UpdateFlagRequest>, _force: bool) -> ApiResult<Vec<bool>> {
        self.enter("update_flags").await?;
        Ok(self.write(|s| {
            items
                .into_iter()
                .map(|it| match s.flags.iter_mut().find(|f| f.id == it.id) {
                    Some(f) => {
                        f.status = it.status;
                        true
                    }
                    None => false,
                })
                .collect()
        }))
    }

    async fn list_settings(&self) -> ApiResult<Vec<Setting>> {
        self.enter("list_settings").await?;
        Ok(self.read(|s| s.settings.clone()))
    }

    async fn update_setting(&self, req: UpdateSetting) -> ApiResult<()> {
        self.enter("update_setting").await?;
        self.write(|s| match s.settings.iter_mut().find(|it| it.key == req.key) {
            Some(it) => it.value = req.value,
            None => s.settings.push(Setting { key: req.key, value: req.value }),
        });
        Ok(())
    }

    async fn list_containers(&self) -> ApiResult<Vec<ContainerInfo>> {
        self.enter("list_containers").await?;
        Ok(self.read(|s| s.containers.clone()))
    }

    async fn container_runners(&self, id: &str) -> ApiResult<Vec<ExploitJob>> {
        self.enter("container_runners").await?;
        Ok(self.read(|s| s.runners.get(id).cloned().unwrap_or_default()))
    }

    async fn delete_container(&self, id: &str) -> ApiResult<()> {
        self.enter("delete_container").await?;
        self.write(|s| {
            s.containers.retain(|c| c.id != id);
            s.runners.remove(id);
        });
        Ok(())
    }

    async fn restart_container(&self, id: &str, _opts: RestartContainerOpts) -> ApiResult<()> {
        self.enter("restart_container").await?;
        self.read(|s| s.containers.iter().any(|c| c.id == id)).then_some(()).ok_or_else(|| not_found("container", id))
    }

    async fn restart_all_containers(&self, _challenge_id: Option<i32>) -> ApiResult<ContainerBulkOpResult> {
        self.enter("restart_all_containers").await?;
        Ok(ContainerBulkOpResult { success: self.read(|s| s.containers.len()), failed: 0 })
    }

    async fn remove_all_containers(&self, _challenge_id: Option<i32>) -> ApiResult<ContainerBulkOpResult> {
        self.enter("remove_all_containers").await?;
        Ok(self.write(|s| {
            let n = s.containers.len();
            s.containers.clear();
            s.runners.clear();
            ContainerBulkOpResult { success: n, failed: 0 }
        }))
    }

    async fn list_relations(&self, challenge_id: i32) -> ApiResult<Vec<ChallengeTeamRelation>> {
        self.enter("list_relations").await?;
        Ok(self.read(|s| s.relations.iter().filter(|r| r.challenge_id == challenge_id).cloned().collect()))
    }

    async fn get_relation(&self, challenge_id: i32, team_id: i32) -> ApiResult<Option<ChallengeTeamRelation>> {
        self.enter("get_relation").await?;
        Ok(self.read(|s| s.relations.iter().find(|r| r.challenge_id == challenge_id && r.team_id == team_id).cloned()))
    }

    async fn update_relation(&self, challenge_id: i32, team_id: i32, req: UpdateConnectionInfo) -> ApiResult<ChallengeTeamRelation> {
        self.enter("update_relation").await?;
        Ok(self.write(|s| {
            let id = next_id(&s.relations, |r| r.id);
            let idx = match s.relations.iter().position(|r| r.challenge_id == challenge_id && r.team_id == team_id) {
                Some(i) => i,
                None => {
                    s.relations.push(ChallengeTeamRelation { id, challenge_id, team_id, addr: None, port: None, created_at: Utc::now() });
                    s.relations.len() - 1
                }
            };
            let rel = &mut s.relations[idx];
            rel.addr = req.addr;
            rel.port = req.port;
            rel.clone()
        }))
    }

    async fn list_ws_connections(&self) -> ApiResult<Vec<WsConnection>> {
        self.enter("list_ws_connections").await?;
        Ok(self.read(|s| s.ws_connections.clone()))
    }
}
