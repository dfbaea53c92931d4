use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex, PoisonError, Weak};
use std::time::Instant;

use mazu_api::MazuApi;
use mazu_core::*;
use mazu_hub::{Channel, ChannelConfig, EventHandler};
use mazu_store::{
    resolve_board_selection, resolve_flag_selection, resolve_round_selection, Collection, ContainerRunners, InsertAt, SelectionChange,
    Selections,
};
use metrics::{counter, histogram};
use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::dispatch::{self, Action, Mutation, ObservedScope};
use crate::SyncError;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadyState {
    NotReady,
    Loading,
    Ready,
}

/// Held for one pass of `load_all`. Dropping it before `complete` (an error
/// or a cancelled future) leaves the store `NotReady`; either way the
/// in-flight flag is cleared.
struct LoadGuard<'a> {
    loading: &'a AtomicBool,
    ready_tx: &'a watch::Sender<ReadyState>,
    completed: bool,
}

impl<'a> LoadGuard<'a> {
    fn new(loading: &'a AtomicBool, ready_tx: &'a watch::Sender<ReadyState>) -> Self {
        ready_tx.send_replace(ReadyState::Loading);
        Self { loading, ready_tx, completed: false }
    }

    fn complete(mut self) {
        self.completed = true;
        self.ready_tx.send_replace(ReadyState::Ready);
    }
}

impl Drop for LoadGuard<'_> {
    fn drop(&mut self) {
        if !self.completed {
            self.ready_tx.send_replace(ReadyState::NotReady);
        }
        self.loading.store(false, Ordering::SeqCst);
    }
}

/// Client-side mirror of the service: bulk loads, live events, commands and
/// the selections that scope them.
pub struct SyncStore {
    api: Arc<dyn MazuApi>,
    channel: Arc<Channel>,

    challenges: Collection<Challenge>,
    teams: Collection<Team>,
    exploits: Collection<Exploit>,
    exploit_runs: Collection<ExploitRun>,
    rounds: Collection<Round>,
    jobs: Collection<ExploitJob>,
    flags: Collection<Flag>,
    settings: Collection<Setting>,
    containers: Collection<ContainerInfo>,
    ws_connections: Collection<WsConnection>,
    runners: ContainerRunners,
    selections: Selections,

    ready_tx: watch::Sender<ReadyState>,
    loading: AtomicBool,
    /// Set when a full reload was asked for while another load was running.
    reload_pending: AtomicBool,
    /// Dispatcher task of the live session; `Some` while started.
    session: Mutex<Option<JoinHandle<()>>>,
}

impl SyncStore {
    pub fn new(api: Arc<dyn MazuApi>, cfg: ChannelConfig) -> Arc<Self> { Self::with_channel(api, Channel::new(cfg)) }

    pub fn with_channel(api: Arc<dyn MazuApi>, channel: Arc<Channel>) -> Arc<Self> {
        let (ready_tx, _) = watch::channel(ReadyState::NotReady);
        Arc::new(Self {
            api,
            channel,
            challenges: Collection::new("challenges"),
            teams: Collection::new("teams"),
            exploits: Collection::new("exploits"),
            exploit_runs: Collection::new("exploit_runs"),
            rounds: Collection::newest_first("rounds"),
            jobs: Collection::new("jobs"),
            flags: Collection::newest_first("flags"),
            settings: Collection::new("settings"),
            containers: Collection::new("containers"),
            ws_connections: Collection::new("ws_connections"),
            runners: ContainerRunners::new(),
            selections: Selections::new(),
            ready_tx,
            loading: AtomicBool::new(false),
            reload_pending: AtomicBool::new(false),
            session: Mutex::new(None),
        })
    }

    pub fn api(&self) -> &Arc<dyn MazuApi> { &self.api }
    pub fn channel(&self) -> &Arc<Channel> { &self.channel }

    pub fn challenges(&self) -> &Collection<Challenge> { &self.challenges }
    pub fn teams(&self) -> &Collection<Team> { &self.teams }
    pub fn exploits(&self) -> &Collection<Exploit> { &self.exploits }
    pub fn exploit_runs(&self) -> &Collection<ExploitRun> { &self.exploit_runs }
    pub fn rounds(&self) -> &Collection<Round> { &self.rounds }
    pub fn jobs(&self) -> &Collection<ExploitJob> { &self.jobs }
    pub fn flags(&self) -> &Collection<Flag> { &self.flags }
    pub fn settings(&self) -> &Collection<Setting> { &self.settings }
    pub fn containers(&self) -> &Collection<ContainerInfo> { &self.containers }
    pub fn ws_connections(&self) -> &Collection<WsConnection> { &self.ws_connections }
    pub fn runners(&self) -> &ContainerRunners { &self.runners }
    pub fn selections(&self) -> &Selections { &self.selections }

    pub fn ready(&self) -> ReadyState { *self.ready_tx.borrow() }

    pub fn subscribe_ready(&self) -> watch::Receiver<ReadyState> { self.ready_tx.subscribe() }

    pub fn observed_scope(&self) -> ObservedScope {
        ObservedScope { round: self.selections.round(), flag_round: self.selections.flag_round() }
    }

    // ----------------- Bulk loads -----------------

    /// Pull every snapshot concurrently and replace the collections.
    /// Any failed pull leaves the collections untouched and the store `NotReady`.
    /// A reload requested while this runs triggers one more pass before it returns.
    pub async fn load_all(&self) -> Result<(), SyncError> {
        if self.loading.swap(true, Ordering::SeqCst) {
            return Err(SyncError::AlreadyLoading);
        }
        loop {
            self.reload_pending.store(false, Ordering::SeqCst);
            self.load_pass(LoadGuard::new(&self.loading, &self.ready_tx)).await?;
            // The guard is released by now; a request that lost the race for
            // `loading` is visible here.
            if !self.reload_pending.load(Ordering::SeqCst) || self.loading.swap(true, Ordering::SeqCst) {
                return Ok(());
            }
            debug!("sync: reload requested during load; pulling again");
        }
    }

    /// Full reload on behalf of a push event. If a load is already running it
    /// is asked to pull once more instead.
    async fn reload_all(&self) {
        self.reload_pending.store(true, Ordering::SeqCst);
        match self.load_all().await {
            Ok(()) => {}
            Err(SyncError::AlreadyLoading) => debug!("sync: reload deferred to the load in flight"),
            Err(e) => warn!(error = %e, "sync: reload failed"),
        }
    }

    async fn load_pass(&self, guard: LoadGuard<'_>) -> Result<(), SyncError> {
        let t0 = Instant::now();
        info!("sync: load_all start");
        let api = &self.api;
        let pulled = tokio::try_join!(
            api.list_challenges(),
            api.list_teams(),
            api.list_exploits(None),
            api.list_exploit_runs(None, None),
            api.list_rounds(),
            api.list_settings(),
        );
        let (challenges, teams, exploits, exploit_runs, rounds, settings) = match pulled {
            Ok(v) => v,
            Err(e) => {
                warn!(error = %e, took_ms = %t0.elapsed().as_millis(), "sync: load_all failed");
                return Err(e.into());
            }
        };
        self.challenges.replace_all(challenges);
        self.teams.replace_all(teams);
        self.exploits.replace_all(exploits);
        self.exploit_runs.replace_all(exploit_runs);
        self.rounds.replace_all(rounds);
        self.settings.replace_all(settings);
        self.ensure_selections().await;
        guard.complete();
        let took = t0.elapsed().as_secs_f64() * 1000.0;
        histogram!("sync_load_all_ms", took);
        info!(
            challenges = self.challenges.len(),
            teams = self.teams.len(),
            rounds = self.rounds.len(),
            took_ms = %t0.elapsed().as_millis(),
            "sync: load_all ok"
        );
        Ok(())
    }

    /// Replace jobs with those of `round`. The response is applied only if
    /// `round` is still the selected round when it arrives.
    pub async fn load_jobs(&self, round: Option<i32>) -> Result<(), SyncError> {
        let Some(round_id) = round else {
            self.jobs.clear();
            return Ok(());
        };
        let jobs = self.api.list_jobs(round_id).await?;
        if self.selections.round() == Some(round_id) {
            self.jobs.replace_all(jobs);
        } else {
            debug!(round_id, "sync: stale jobs response dropped");
        }
        Ok(())
    }

    pub async fn load_flags(&self, round: Option<i32>) -> Result<(), SyncError> {
        let flags = self.api.list_flags(round).await?;
        self.flags.replace_all(flags);
        Ok(())
    }

    pub async fn load_containers(&self) -> Result<(), SyncError> {
        let containers = self.api.list_containers().await?;
        self.containers.replace_all(containers);
        Ok(())
    }

    pub async fn load_runners(&self, container_id: &str) -> Result<(), SyncError> {
        let runners = self.api.container_runners(container_id).await?;
        self.runners.set(container_id, runners);
        Ok(())
    }

    /// Forget every container and runner list locally.
    pub fn reset_containers(&self) {
        self.containers.clear();
        self.runners.clear();
    }

    pub async fn load_ws_connections(&self) -> Result<(), SyncError> {
        let list = self.api.list_ws_connections().await?;
        self.ws_connections.replace_all(list);
        Ok(())
    }

    // ----------------- Commands -----------------

    /// Create a round, focus it and clear the job list until its jobs exist.
    pub async fn create_round(&self) -> Result<i32, SyncError> {
        let id = self.api.create_round().await?;
        self.selections.set_round(Some(id));
        self.jobs.clear();
        info!(round_id = id, "sync: round created");
        Ok(id)
    }

    pub async fn run_round(&self, id: Option<i32>) -> Result<(), SyncError> {
        let Some(id) = id else { return Ok(()) };
        self.api.run_round(id).await?;
        Ok(())
    }

    pub async fn rerun_round(&self, id: Option<i32>) -> Result<(), SyncError> {
        let Some(id) = id else { return Ok(()) };
        self.api.rerun_round(id).await?;
        Ok(())
    }

    pub async fn rerun_unflagged_round(&self, id: Option<i32>) -> Result<(), SyncError> {
        let Some(id) = id else { return Ok(()) };
        self.api.rerun_unflagged_round(id).await?;
        Ok(())
    }

    pub async fn schedule_unflagged_round(&self, id: Option<i32>) -> Result<(), SyncError> {
        let Some(id) = id else { return Ok(()) };
        self.api.schedule_unflagged_round(id).await?;
        Ok(())
    }

    /// Submit a flag and echo it into the flag list when in scope.
    pub async fn submit_flag(&self, req: SubmitFlagRequest) -> Result<Flag, SyncError> {
        let flag = self.api.submit_flag(req).await?;
        let in_scope = self.selections.flag_round().map_or(true, |r| r == flag.round_id);
        if in_scope && !self.flags.contains(&flag.id) {
            self.flags.upsert_at(flag.clone(), InsertAt::Append);
        }
        Ok(flag)
    }

    // ----------------- Navigation -----------------

    pub fn select_challenge(&self, requested: Option<i32>) -> Option<i32> {
        let snap = self.challenges.snapshot();
        let id = resolve_board_selection(&snap.items, self.selections.challenge(), requested);
        self.selections.set_challenge(id);
        id
    }

    /// Resolve and focus a round; a different round reloads jobs.
    pub async fn select_round(&self, requested: Option<i32>) -> Result<Option<i32>, SyncError> {
        let snap = self.rounds.snapshot();
        let id = resolve_round_selection(&snap.items, self.selections.round(), requested);
        if self.selections.set_round(id) {
            self.load_jobs(id).await?;
        }
        Ok(id)
    }

    /// Resolve the flag filter; a changed filter reloads flags.
    pub async fn select_flag_round(&self, requested: Option<i32>) -> Result<Option<i32>, SyncError> {
        let snap = self.rounds.snapshot();
        let id = resolve_flag_selection(&snap.items, requested);
        if self.selections.set_flag_round(id) {
            self.load_flags(id).await?;
        }
        Ok(id)
    }

    async fn ensure_selections(&self) -> SelectionChange {
        let change = self.selections.ensure(&self.challenges.snapshot().items, &self.rounds.snapshot().items);
        if change.round {
            let round = self.selections.round();
            debug!(round_id = ?round, "sync: round selection repaired");
            if let Err(e) = self.load_jobs(round).await {
                warn!(round_id = ?round, error = %e, "sync: job reload failed");
            }
        }
        if change.flag_round {
            debug!("sync: flag round filter cleared");
            if let Err(e) = self.load_flags(None).await {
                warn!(error = %e, "sync: flag reload failed");
            }
        }
        change
    }

    // ----------------- Live session -----------------

    pub fn is_started(&self) -> bool { self.session.lock().unwrap_or_else(PoisonError::into_inner).is_some() }

    /// Open the push session. No-op when already started.
    pub fn start(self: &Arc<Self>) {
        let mut session = self.session.lock().unwrap_or_else(PoisonError::into_inner);
        if session.is_some() {
            return;
        }
        let (tx, mut rx) = mpsc::unbounded_channel::<PushEvent>();
        let handler: EventHandler = Arc::new(move |ev| {
            let _ = tx.send(ev);
        });
        let weak: Weak<Self> = Arc::downgrade(self);
        *session = Some(tokio::spawn(async move {
            while let Some(ev) = rx.recv().await {
                let Some(store) = weak.upgrade() else { break };
                store.handle_event(ev).await;
            }
            debug!("sync: dispatcher stopped");
        }));
        self.channel.connect(handler);
        info!("sync: session started");
    }

    /// Close the push session. No-op when not started.
    pub fn stop(&self) {
        let task = self.session.lock().unwrap_or_else(PoisonError::into_inner).take();
        if let Some(task) = task {
            self.channel.disconnect();
            task.abort();
            info!("sync: session stopped");
        }
    }

    /// Drop the live session and open a new one, e.g. after a credential change.
    pub fn restart(self: &Arc<Self>) {
        self.channel.disconnect();
        self.stop();
        self.start();
    }

    /// Stop the session and forget all state.
    pub fn teardown(&self) {
        self.stop();
        self.challenges.clear();
        self.teams.clear();
        self.exploits.clear();
        self.exploit_runs.clear();
        self.rounds.clear();
        self.jobs.clear();
        self.flags.clear();
        self.settings.clear();
        self.containers.clear();
        self.ws_connections.clear();
        self.runners.clear();
        self.selections.clear();
        self.ready_tx.send_replace(ReadyState::NotReady);
        info!("sync: torn down");
    }

    /// Apply one push event. Mutations land before any await, so readers see
    /// either none or all of them.
    pub async fn handle_event(&self, event: PushEvent) {
        let actions = dispatch::plan(&event, &self.observed_scope());
        if actions.is_empty() {
            counter!("sync_events_ignored_total", 1u64);
            debug!(kind = event.kind(), "sync: event ignored");
            return;
        }
        counter!("sync_events_applied_total", 1u64);
        let mut structural = false;
        for action in actions {
            match action {
                Action::Mutate(m) => structural |= self.apply(m),
                Action::ReloadJobs(round_id) => {
                    if let Err(e) = self.load_jobs(Some(round_id)).await {
                        warn!(round_id, error = %e, "sync: job reload failed");
                    }
                }
                Action::ReloadAll => self.reload_all().await,
            }
        }
        if structural {
            self.ensure_selections().await;
        }
    }

    /// Returns whether selections need repair afterwards.
    fn apply(&self, m: Mutation) -> bool {
        let structural = m.is_structural();
        match m {
            Mutation::UpsertChallenge(c) => self.challenges.upsert(c),
            Mutation::RemoveChallenge(id) => {
                self.challenges.remove(&id);
            }
            Mutation::UpsertTeam(t) => self.teams.upsert(t),
            Mutation::RemoveTeam(id) => {
                self.teams.remove(&id);
            }
            Mutation::UpsertExploit(x) => self.exploits.upsert(x),
            Mutation::RemoveExploit(id) => {
                self.exploits.remove(&id);
            }
            Mutation::UpsertExploitRun(r) => self.exploit_runs.upsert(r),
            Mutation::RemoveExploitRun(id) => {
                self.exploit_runs.remove(&id);
            }
            Mutation::InsertRound(r) | Mutation::UpsertRound(r) => self.rounds.upsert(r),
            Mutation::RemoveRound(id) => {
                self.rounds.remove(&id);
            }
            Mutation::MarkJobsReady(id) => {
                self.rounds.update(&id, |r| r.jobs_ready = Some(true));
            }
            Mutation::UpsertJob(j) => self.jobs.upsert(j),
            Mutation::RemoveJob(id) => {
                self.jobs.remove(&id);
            }
            Mutation::UpsertFlag(f) => self.flags.upsert(f),
            Mutation::RemoveFlag(id) => {
                self.flags.remove(&id);
            }
            Mutation::UpsertSetting(s) => self.settings.upsert(s),
            Mutation::UpsertContainer(c) => self.containers.upsert(c),
            Mutation::RemoveContainer(id) => {
                self.containers.remove(&id);
                self.runners.remove(&id);
            }
            Mutation::PatchContainerExecs(p) => {
                self.containers.update(&p.id, |c| {
                    c.running_execs = p.running_execs;
                    c.max_execs = p.max_execs;
                });
            }
            Mutation::ReplaceWsConnections(list) => self.ws_connections.replace_all(list),
        }
        structural
    }
}
