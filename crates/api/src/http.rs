use std::time::Instant;

use mazu_core::*;
use reqwest::{Client, Method, RequestBuilder, Response};
use serde::de::DeserializeOwned;
use serde::Serialize;
use tracing::debug;

use crate::{status_message, ApiError, ApiResult, MazuApi};

/// HTTP implementation against a running service.
#[derive(Clone)]
pub struct HttpApi {
    http: Client,
    base_url: String,
    token: Option<String>,
}

/// Query pairs from optional filters; `None`s are dropped.
fn query(pairs: &[(&'static str, Option<String>)]) -> Vec<(&'static str, String)> {
    pairs.iter().filter_map(|(k, v)| v.clone().map(|v| (*k, v))).collect()
}

fn debug_flag(debug: bool) -> Vec<(&'static str, String)> {
    query(&[("debug", debug.then(|| "1".to_string()))])
}

impl HttpApi {
    pub fn new(base_url: impl Into<String>) -> Self {
        Self::with_client(Client::new(), base_url)
    }

    pub fn with_client(http: Client, base_url: impl Into<String>) -> Self {
        let base_url = base_url.into().trim_end_matches('/').to_string();
        Self { http, base_url, token: None }
    }

    /// Bearer token sent with every request.
    pub fn with_token(mut self, token: Option<String>) -> Self {
        self.token = token;
        self
    }

    pub fn base_url(&self) -> &str { &self.base_url }

    fn request(&self, method: Method, path: &str) -> RequestBuilder {
        let req = self.http.request(method, format!("{}/api{}", self.base_url, path));
        match &self.token {
            Some(t) => req.bearer_auth(t),
            None => req,
        }
    }

    async fn send(&self, req: RequestBuilder, path: &str) -> ApiResult<Response> {
        let t0 = Instant::now();
        let resp = req.send().await?;
        let status = resp.status();
        debug!(path, status = status.as_u16(), took_ms = %t0.elapsed().as_millis(), "api: response");
        if status.is_success() {
            return Ok(resp);
        }
        let body = resp.text().await.unwrap_or_default();
        let (message, payload) = status_message(status.canonical_reason().unwrap_or("request failed"), &body);
        Err(ApiError::Status { status: status.as_u16(), message, payload })
    }

    async fn decode<T: DeserializeOwned>(&self, req: RequestBuilder, path: &str) -> ApiResult<T> {
        let bytes = self.send(req, path).await?.bytes().await?;
        serde_json::from_slice(&bytes).map_err(|source| ApiError::Decode { path: path.to_string(), source })
    }

    /// Success status is all that matters; the body is ignored.
    async fn unit(&self, req: RequestBuilder, path: &str) -> ApiResult<()> {
        self.send(req, path).await.map(|_| ())
    }

    async fn get<T: DeserializeOwned>(&self, path: &str, q: &[(&'static str, String)]) -> ApiResult<T> {
        self.decode(self.request(Method::GET, path).query(q), path).await
    }

    async fn send_json<T: DeserializeOwned, B: Serialize + ?Sized>(&self, method: Method, path: &str, body: &B) -> ApiResult<T> {
        self.decode(self.request(method, path).json(body), path).await
    }
}

#[async_trait::async_trait]
impl MazuApi for HttpApi {
    async fn version(&self) -> ApiResult<VersionInfo> { self.get("/version", &[]).await }

    async fn list_challenges(&self) -> ApiResult<Vec<Challenge>> { self.get("/challenges", &[]).await }

    async fn create_challenge(&self, req: CreateChallenge) -> ApiResult<Challenge> {
        self.send_json(Method::POST, "/challenges", &req).await
    }

    async fn update_challenge(&self, id: i32, req: CreateChallenge) -> ApiResult<Challenge> {
        self.send_json(Method::PUT, &format!("/challenges/{}", id), &req).await
    }

    async fn delete_challenge(&self, id: i32) -> ApiResult<()> {
        let path = format!("/challenges/{}", id);
        self.unit(self.request(Method::DELETE, &path), &path).await
    }

    async fn set_challenge_enabled(&self, id: i32, enabled: bool) -> ApiResult<()> {
        let path = format!("/challenges/{}/enabled/{}", id, enabled);
        self.unit(self.request(Method::PUT, &path), &path).await
    }

    async fn list_teams(&self) -> ApiResult<Vec<Team>> { self.get("/teams", &[]).await }

    async fn create_team(&self, req: CreateTeam) -> ApiResult<Team> { self.send_json(Method::POST, "/teams", &req).await }

    async fn update_team(&self, id: i32, req: CreateTeam) -> ApiResult<Team> {
        self.send_json(Method::PUT, &format!("/teams/{}", id), &req).await
    }

    async fn delete_team(&self, id: i32) -> ApiResult<()> {
        let path = format!("/teams/{}", id);
        self.unit(self.request(Method::DELETE, &path), &path).await
    }

    async fn list_exploits(&self, challenge_id: Option<i32>) -> ApiResult<Vec<Exploit>> {
        self.get("/exploits", &query(&[("challenge_id", challenge_id.map(|v| v.to_string()))])).await
    }

    async fn create_exploit(&self, req: CreateExploit) -> ApiResult<Exploit> {
        self.send_json(Method::POST, "/exploits", &req).await
    }

    async fn update_exploit(&self, id: i32, req: UpdateExploit) -> ApiResult<Exploit> {
        self.send_json(Method::PUT, &format!("/exploits/{}", id), &req).await
    }

    async fn delete_exploit(&self, id: i32) -> ApiResult<()> {
        let path = format!("/exploits/{}", id);
        self.unit(self.request(Method::DELETE, &path), &path).await
    }

    async fn list_exploit_runs(&self, challenge_id: Option<i32>, team_id: Option<i32>) -> ApiResult<Vec<ExploitRun>> {
        let q = query(&[("challenge_id", challenge_id.map(|v| v.to_string())), ("team_id", team_id.map(|v| v.to_string()))]);
        self.get("/exploit-runs", &q).await
    }

    async fn create_exploit_run(&self, req: CreateExploitRun) -> ApiResult<ExploitRun> {
        self.send_json(Method::POST, "/exploit-runs", &req).await
    }

    async fn update_exploit_run(&self, id: i32, req: UpdateExploitRun) -> ApiResult<ExploitRun> {
        self.send_json(Method::PUT, &format!("/exploit-runs/{}", id), &req).await
    }

    async fn delete_exploit_run(&self, id: i32) -> ApiResult<()> {
        let path = format!("/exploit-runs/{}", id);
        self.unit(self.request(Method::DELETE, &path), &path).await
    }

    async fn reorder_exploit_runs(&self, items: Vec<ReorderExploitRunItem>) -> ApiResult<()> {
        let path = "/exploit-runs/reorder";
        self.unit(self.request(Method::POST, path).json(&items), path).await
    }

    async fn list_rounds(&self) -> ApiResult<Vec<Round>> { self.get("/rounds", &[]).await }

    async fn current_round(&self) -> ApiResult<Option<Round>> { self.get("/rounds/current", &[]).await }

    async fn create_round(&self) -> ApiResult<i32> {
        let path = "/rounds";
        self.decode(self.request(Method::POST, path), path).await
    }

    async fn run_round(&self, id: i32) -> ApiResult<()> {
        let path = format!("/rounds/{}/run", id);
        self.unit(self.request(Method::POST, &path), &path).await
    }

    async fn rerun_round(&self, id: i32) -> ApiResult<()> {
        let path = format!("/rounds/{}/rerun", id);
        self.unit(self.request(Method::POST, &path), &path).await
    }

    async fn rerun_unflagged_round(&self, id: i32) -> ApiResult<()> {
        let path = format!("/rounds/{}/rerun-unflagged", id);
        self.unit(self.request(Method::POST, &path), &path).await
    }

    async fn schedule_unflagged_round(&self, id: i32) -> ApiResult<()> {
        let path = format!("/rounds/{}/schedule-unflagged", id);
        self.unit(self.request(Method::POST, &path), &path).await
    }

    async fn list_jobs(&self, round_id: i32) -> ApiResult<Vec<ExploitJob>> {
        self.get("/jobs", &[("round_id", round_id.to_string())]).await
    }

    async fn get_job(&self, id: i32) -> ApiResult<ExploitJob> { self.get(&format!("/jobs/{}", id), &[]).await }

    async fn enqueue_single_job(&self, req: EnqueueSingleJobRequest, debug: bool) -> ApiResult<ExploitJob> {
        let path = "/jobs/enqueue";
        self.decode(self.request(Method::POST, path).query(&debug_flag(debug)).json(&req), path).await
    }

    async fn enqueue_existing_job(&self, id: i32, debug: bool) -> ApiResult<ExploitJob> {
        let path = format!("/jobs/{}/enqueue", id);
        self.decode(self.request(Method::POST, &path).query(&debug_flag(debug)), &path).await
    }

    async fn stop_job(&self, id: i32) -> ApiResult<ExploitJob> {
        let path = format!("/jobs/{}/stop", id);
        self.decode(self.request(Method::POST, &path), &path).await
    }

    async fn reorder_jobs(&self, items: Vec<ReorderJobItem>) -> ApiResult<()> {
        let path = "/jobs/reorder";
        self.unit(self.request(Method::POST, path).json(&items), path).await
    }

    async fn list_flags(&self, round_id: Option<i32>) -> ApiResult<Vec<Flag>> {
        self.get("/flags", &query(&[("round_id", round_id.map(|v| v.to_string()))])).await
    }

    async fn submit_flag(&self, req: SubmitFlagRequest) -> ApiResult<Flag> { self.send_json(Method::POST, "/flags", &req).await }

    async fn update_flags(&self, items: Vec<UpdateFlagRequest>, force: bool) -> ApiResult<Vec<bool>> {
        let path = "/flags";
        let q = query(&[("force", force.then(|| "true".to_string()))]);
        self.decode(self.request(Method::PATCH, path).query(&q).json(&items), path).await
    }

    async fn list_settings(&self) -> ApiResult<Vec<Setting>> { self.get("/settings", &[]).await }

    async fn update_setting(&self, req: UpdateSetting) -> ApiResult<()> {
        let path = "/settings";
        self.unit(self.request(Method::POST, path).json(&req), path).await
    }

    async fn list_containers(&self) -> ApiResult<Vec<ContainerInfo>> { self.get("/containers", &[]).await }

    async fn container_runners(&self, id: &str) -> ApiResult<Vec<ExploitJob>> {
        self.get(&format!("/containers/{}/runners", id), &[]).await
    }

    async fn delete_container(&self, id: &str) -> ApiResult<()> {
        let path = format!("/containers/{}", id);
        self.unit(self.request(Method::DELETE, &path), &path).await
    }

    async fn restart_container(&self, id: &str, opts: RestartContainerOpts) -> ApiResult<()> {
        let path = format!("/containers/{}/restart", id);
        self.unit(self.request(Method::POST, &path).json(&opts), &path).await
    }

    async fn restart_all_containers(&self, challenge_id: Option<i32>) -> ApiResult<ContainerBulkOpResult> {
        let path = "/containers/restart-all";
        let q = query(&[("challenge_id", challenge_id.map(|v| v.to_string()))]);
        self.decode(self.request(Method::POST, path).query(&q), path).await
    }

    async fn remove_all_containers(&self, challenge_id: Option<i32>) -> ApiResult<ContainerBulkOpResult> {
        let path = "/containers/remove-all";
        let q = query(&[("challenge_id", challenge_id.map(|v| v.to_string()))]);
        self.decode(self.request(Method::POST, path).query(&q), path).await
    }

    async fn list_relations(&self, challenge_id: i32) -> ApiResult<Vec<ChallengeTeamRelation>> {
        self.get(&format!("/relations/{}", challenge_id), &[]).await
    }

    async fn get_relation(&self, challenge_id: i32, team_id: i32) -> ApiResult<Option<ChallengeTeamRelation>> {
        self.get(&format!("/relations/{}/{}", challenge_id, team_id), &[]).await
    }

    async fn update_relation(&self, challenge_id: i32, team_id: i32, req: UpdateConnectionInfo) -> ApiResult<ChallengeTeamRelation> {
        self.send_json(Method::PUT, &format!("/relations/{}/{}", challenge_id, team_id), &req).await
    }

    async fn list_ws_connections(&self) -> ApiResult<Vec<WsConnection>> { self.get("/ws-connections", &[]).await }
}
