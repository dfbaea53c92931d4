//! Pure mapping from a push event to the store actions it implies.
//!
//! `plan` never touches the store. Everything it needs to know about the
//! client's focus arrives through `ObservedScope`, so every routing rule is
//! testable with plain values.

use mazu_core::*;

/// Parents the client currently observes. Scoped events for any other parent
/// are dropped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ObservedScope {
    /// Round whose jobs are loaded.
    pub round: Option<i32>,
    /// Round filter of the flag list; `None` observes every round.
    pub flag_round: Option<i32>,
}

impl ObservedScope {
    fn observes_round(&self, round_id: i32) -> bool { self.round == Some(round_id) }

    fn observes_flag(&self, round_id: i32) -> bool { self.flag_round.map_or(true, |r| r == round_id) }
}

/// One synchronous collection change.
#[derive(Debug, Clone, PartialEq)]
pub enum Mutation {
    UpsertChallenge(Challenge),
    RemoveChallenge(i32),
    UpsertTeam(Team),
    RemoveTeam(i32),
    UpsertExploit(Exploit),
    RemoveExploit(i32),
    UpsertExploitRun(ExploitRun),
    RemoveExploitRun(i32),
    /// New round from the push channel; its jobs are not materialized yet.
    InsertRound(Round),
    UpsertRound(Round),
    RemoveRound(i32),
    MarkJobsReady(i32),
    UpsertJob(ExploitJob),
    RemoveJob(i32),
    UpsertFlag(Flag),
    RemoveFlag(i32),
    UpsertSetting(Setting),
    UpsertContainer(ContainerInfo),
    /// Drops the container and its runner list.
    RemoveContainer(String),
    PatchContainerExecs(ContainerExecs),
    ReplaceWsConnections(Vec<WsConnection>),
}

impl Mutation {
    /// Whether applying this may leave a selection pointing at nothing, or
    /// give an empty selection something to point at.
    pub fn is_structural(&self) -> bool {
        matches!(self, Mutation::RemoveChallenge(_) | Mutation::RemoveRound(_) | Mutation::InsertRound(_))
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum Action {
    Mutate(Mutation),
    /// Re-pull the job list of this round.
    ReloadJobs(i32),
    /// Full snapshot refresh.
    ReloadAll,
}

/// Actions for `event` under `scope`, in the order they must be applied.
/// An empty plan means the event is ignored.
pub fn plan(event: &PushEvent, scope: &ObservedScope) -> Vec<Action> {
    use Mutation as M;
    use PushEvent as E;

    let mutate = |m: Mutation| vec![Action::Mutate(m)];
    match event {
        E::ChallengeCreated(c) | E::ChallengeUpdated(c) => mutate(M::UpsertChallenge(c.clone())),
        E::ChallengeDeleted(id) => mutate(M::RemoveChallenge(*id)),
        E::TeamCreated(t) | E::TeamUpdated(t) => mutate(M::UpsertTeam(t.clone())),
        E::TeamDeleted(id) => mutate(M::RemoveTeam(*id)),
        E::ExploitCreated(x) | E::ExploitUpdated(x) => mutate(M::UpsertExploit(x.clone())),
        E::ExploitDeleted(id) => mutate(M::RemoveExploit(*id)),
        E::ExploitRunCreated(r) | E::ExploitRunUpdated(r) => mutate(M::UpsertExploitRun(r.clone())),
        E::ExploitRunDeleted(id) => mutate(M::RemoveExploitRun(*id)),
        E::ExploitRunsReordered => vec![Action::ReloadAll],

        E::RoundCreated(r) => {
            let mut round = r.clone();
            round.jobs_ready = Some(false);
            mutate(M::InsertRound(round))
        }
        E::RoundUpdated(r) => mutate(M::UpsertRound(r.clone())),
        E::RoundDeleted(id) => mutate(M::RemoveRound(*id)),
        E::RoundJobsReady(ready) => {
            let mut actions = vec![Action::Mutate(M::MarkJobsReady(ready.round_id))];
            if scope.observes_round(ready.round_id) {
                actions.push(Action::ReloadJobs(ready.round_id));
            }
            actions
        }

        E::JobCreated(j) | E::JobUpdated(j) if scope.observes_round(j.round_id) => mutate(M::UpsertJob(j.clone())),
        E::JobCreated(_) | E::JobUpdated(_) => Vec::new(),
        // Bare id: no round to scope by, and removal of an absent id is a no-op.
        E::JobDeleted(id) => mutate(M::RemoveJob(*id)),
        E::JobsChanged(c) if scope.observes_round(c.round_id) => vec![Action::ReloadJobs(c.round_id)],
        E::JobsChanged(_) => Vec::new(),

        E::FlagCreated(f) | E::FlagUpdated(f) if scope.observes_flag(f.round_id) => mutate(M::UpsertFlag(f.clone())),
        E::FlagCreated(_) | E::FlagUpdated(_) => Vec::new(),
        E::FlagDeleted(id) => mutate(M::RemoveFlag(*id)),

        E::SettingUpdated(s) => mutate(M::UpsertSetting(s.clone())),

        E::ContainerCreated(c) | E::ContainerUpdated(c) => mutate(M::UpsertContainer(c.clone())),
        E::ContainerDeleted(id) => mutate(M::RemoveContainer(id.clone())),
        E::ContainerExecsUpdated(p) => mutate(M::PatchContainerExecs(p.clone())),

        E::WsConnections(list) => mutate(M::ReplaceWsConnections(list.clone())),

        E::RelationUpdated(_) | E::ConnectionInfoUpdated(_) | E::Error(_) => Vec::new(),
    }
}
