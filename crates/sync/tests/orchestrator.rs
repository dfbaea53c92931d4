use std::sync::Arc;
use std::time::Duration;

use mazu_api::{MazuApi, MockApi};
use mazu_core::fixtures::*;
use mazu_core::*;
use mazu_hub::ChannelConfig;
use mazu_sync::{ReadyState, SyncError, SyncStore};

fn seeded() -> Arc<MockApi> {
    let api = MockApi::new();
    api.seed(|s| {
        s.challenges = vec![challenge(1), challenge(2)];
        s.teams = vec![team(1)];
        s.exploits = vec![exploit(1, 1)];
        s.exploit_runs = vec![exploit_run(1, 1)];
        s.rounds = vec![round(1, "running")];
        s.settings = vec![setting("submit_url", "http://flags")];
        s.jobs = vec![job(10, 1), job(11, 1), job(20, 2)];
    });
    Arc::new(api)
}

fn store_for(api: &Arc<MockApi>) -> Arc<SyncStore> {
    let api: Arc<dyn MazuApi> = api.clone();
    SyncStore::new(api, ChannelConfig::new("http://127.0.0.1:9", "test"))
}

fn ids<T: Entity<Id = i32>>(items: Vec<T>) -> Vec<i32> { items.iter().map(Entity::id).collect() }

#[tokio::test]
async fn load_all_populates_and_resolves_selections() {
    let api = seeded();
    let store = store_for(&api);
    assert_eq!(store.ready(), ReadyState::NotReady);
    store.load_all().await.unwrap();

    assert_eq!(store.ready(), ReadyState::Ready);
    assert_eq!(store.challenges().ids(), vec![1, 2]);
    assert_eq!(store.settings().ids(), vec!["submit_url".to_string()]);
    assert_eq!(store.selections().challenge(), Some(1));
    assert_eq!(store.selections().round(), Some(1));
    assert_eq!(store.selections().flag_round(), None);
    // repaired round selection pulls its jobs
    assert_eq!(ids(store.jobs().items()), vec![10, 11]);
}

#[tokio::test]
async fn round_created_after_load_keeps_non_pending_selection() {
    let api = seeded();
    let store = store_for(&api);
    store.load_all().await.unwrap();

    store.handle_event(PushEvent::RoundCreated(round(2, "pending"))).await;

    let mut got = store.rounds().ids();
    got.sort();
    assert_eq!(got, vec![1, 2]);
    assert_eq!(store.rounds().ids()[0], 2);
    assert_eq!(store.selections().round(), Some(1));
    assert_eq!(store.rounds().get(&2).unwrap().jobs_ready, Some(false));
}

#[tokio::test]
async fn job_update_for_unobserved_round_is_dropped() {
    let api = seeded();
    let store = store_for(&api);
    store.load_all().await.unwrap();
    let before = store.jobs().epoch();

    store.handle_event(PushEvent::JobUpdated(job(30, 2))).await;
    assert_eq!(store.jobs().epoch(), before);
    assert!(!store.jobs().contains(&30));

    store.handle_event(PushEvent::JobCreated(job(31, 1))).await;
    assert!(store.jobs().contains(&31));
}

#[tokio::test]
async fn failed_load_leaves_collections_untouched() {
    let api = seeded();
    let store = store_for(&api);
    store.load_all().await.unwrap();

    api.seed(|s| s.challenges.push(challenge(3)));
    api.fail("list_teams");
    let err = store.load_all().await.unwrap_err();
    assert!(matches!(err, SyncError::Api(_)));
    assert_eq!(store.ready(), ReadyState::NotReady);
    assert_eq!(store.challenges().ids(), vec![1, 2]);

    api.recover("list_teams");
    store.load_all().await.unwrap();
    assert_eq!(store.challenges().ids(), vec![1, 2, 3]);
}

#[tokio::test]
async fn overlapping_load_is_rejected() {
    let api = seeded();
    api.delay("list_rounds", Duration::from_millis(100));
    let store = store_for(&api);
    let second = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert_eq!(store.ready(), ReadyState::Loading);
        store.load_all().await
    };
    let (first, second) = tokio::join!(store.load_all(), second);
    first.unwrap();
    assert!(matches!(second, Err(SyncError::AlreadyLoading)));
    assert_eq!(api.call_count("list_rounds"), 1);
    // the guard is released afterwards
    store.load_all().await.unwrap();
}

#[tokio::test]
async fn stale_jobs_response_is_not_applied() {
    let api = seeded();
    let store = store_for(&api);
    store.load_all().await.unwrap();
    api.delay("list_jobs", Duration::from_millis(80));

    let switch = async {
        tokio::time::sleep(Duration::from_millis(10)).await;
        store.selections().set_round(Some(2));
    };
    let (res, _) = tokio::join!(store.load_jobs(Some(1)), switch);
    res.unwrap();
    assert_eq!(ids(store.jobs().items()), vec![10, 11]);

    store.load_jobs(Some(2)).await.unwrap();
    assert_eq!(ids(store.jobs().items()), vec![20]);
    store.load_jobs(None).await.unwrap();
    assert!(store.jobs().is_empty());
}

#[tokio::test]
async fn deleting_selected_round_falls_back_and_reloads_jobs() {
    let api = seeded();
    api.seed(|s| s.rounds = vec![round(2, "running"), round(1, "finished")]);
    let store = store_for(&api);
    store.load_all().await.unwrap();
    assert_eq!(store.selections().round(), Some(2));
    assert_eq!(ids(store.jobs().items()), vec![20]);

    store.handle_event(PushEvent::RoundDeleted(2)).await;
    assert_eq!(store.rounds().ids(), vec![1]);
    assert_eq!(store.selections().round(), Some(1));
    assert_eq!(ids(store.jobs().items()), vec![10, 11]);
}

#[tokio::test]
async fn deleting_selected_challenge_moves_to_first() {
    let api = seeded();
    let store = store_for(&api);
    store.load_all().await.unwrap();
    store.select_challenge(Some(2));
    store.handle_event(PushEvent::ChallengeDeleted(2)).await;
    assert_eq!(store.selections().challenge(), Some(1));
}

#[tokio::test]
async fn round_jobs_ready_marks_round_and_reloads_observed_jobs() {
    let api = seeded();
    let store = store_for(&api);
    store.load_all().await.unwrap();
    store.handle_event(PushEvent::RoundCreated(round(2, "pending"))).await;
    store.select_round(Some(2)).await.unwrap();
    assert_eq!(ids(store.jobs().items()), vec![20]);

    api.seed(|s| s.jobs.push(job(21, 2)));
    let calls = api.call_count("list_jobs");
    store.handle_event(PushEvent::RoundJobsReady(RoundJobsReady { round_id: 2, success: true, created: Some(2) })).await;
    assert_eq!(store.rounds().get(&2).unwrap().jobs_ready, Some(true));
    assert_eq!(api.call_count("list_jobs"), calls + 1);
    assert_eq!(ids(store.jobs().items()), vec![20, 21]);

    // an update from the server keeps the client-side flag
    store.handle_event(PushEvent::RoundUpdated(round(2, "running"))).await;
    let r = store.rounds().get(&2).unwrap();
    assert_eq!(r.status, "running");
    assert_eq!(r.jobs_ready, Some(true));
}

#[tokio::test]
async fn jobs_changed_for_other_round_does_not_reload() {
    let api = seeded();
    let store = store_for(&api);
    store.load_all().await.unwrap();
    let calls = api.call_count("list_jobs");
    store.handle_event(PushEvent::JobsChanged(JobsChanged { round_id: 7, created: None })).await;
    assert_eq!(api.call_count("list_jobs"), calls);
    store.handle_event(PushEvent::JobsChanged(JobsChanged { round_id: 1, created: None })).await;
    assert_eq!(api.call_count("list_jobs"), calls + 1);
}

#[tokio::test]
async fn reorder_triggers_full_reload() {
    let api = seeded();
    let store = store_for(&api);
    store.load_all().await.unwrap();
    store.handle_event(PushEvent::ExploitRunsReordered).await;
    assert_eq!(api.call_count("list_exploit_runs"), 2);
    assert_eq!(store.ready(), ReadyState::Ready);
}

#[tokio::test]
async fn container_events_patch_and_drop_runners() {
    let api = seeded();
    api.seed(|s| {
        s.containers = vec![container("c1"), container("c2")];
        s.runners.insert("c1".into(), vec![job(10, 1)]);
    });
    let store = store_for(&api);
    store.load_containers().await.unwrap();
    store.load_runners("c1").await.unwrap();
    assert_eq!(store.runners().get("c1").map(|r| r.len()), Some(1));

    store
        .handle_event(PushEvent::ContainerExecsUpdated(ContainerExecs { id: "c2".into(), running_execs: 3, max_execs: 4 }))
        .await;
    let c2 = store.containers().get(&"c2".to_string()).unwrap();
    assert_eq!((c2.running_execs, c2.max_execs), (3, 4));

    store.handle_event(PushEvent::ContainerExecsUpdated(ContainerExecs { id: "zz".into(), running_execs: 1, max_execs: 1 })).await;
    assert!(!store.containers().contains(&"zz".to_string()));

    store.handle_event(PushEvent::ContainerDeleted("c1".into())).await;
    assert_eq!(store.containers().ids(), vec!["c2".to_string()]);
    assert!(store.runners().get("c1").is_none());

    store.reset_containers();
    assert!(store.containers().is_empty());
}

#[tokio::test]
async fn settings_and_ws_connections_follow_events() {
    let api = seeded();
    let store = store_for(&api);
    store.load_all().await.unwrap();
    store.handle_event(PushEvent::SettingUpdated(setting("submit_url", "http://other"))).await;
    store.handle_event(PushEvent::SettingUpdated(setting("round_secs", "60"))).await;
    assert_eq!(store.settings().get(&"submit_url".to_string()).unwrap().value, "http://other");
    assert_eq!(store.settings().len(), 2);

    let conn = WsConnection { id: "a".into(), client: Some("web".into()), user: None, remote_addr: None, connected_at: None };
    store.handle_event(PushEvent::WsConnections(vec![conn.clone()])).await;
    assert_eq!(store.ws_connections().items(), vec![conn]);
    store.handle_event(PushEvent::WsConnections(Vec::new())).await;
    assert!(store.ws_connections().is_empty());
}

#[tokio::test]
async fn flag_events_and_submit_respect_scope() {
    let api = seeded();
    let store = store_for(&api);
    store.load_all().await.unwrap();
    store.handle_event(PushEvent::RoundCreated(round(2, "pending"))).await;

    store.handle_event(PushEvent::FlagCreated(flag(1, 1))).await;
    store.handle_event(PushEvent::FlagCreated(flag(2, 2))).await;
    assert_eq!(store.flags().ids(), vec![2, 1]);

    assert_eq!(store.select_flag_round(Some(1)).await.unwrap(), Some(1));
    store.handle_event(PushEvent::FlagCreated(flag(3, 2))).await;
    assert!(!store.flags().contains(&3));

    let req = |round_id| SubmitFlagRequest { round_id, challenge_id: 1, team_id: 1, flag_value: "FLAG{x}".into() };
    let outside = store.submit_flag(req(2)).await.unwrap();
    assert!(!store.flags().contains(&outside.id));
    let inside = store.submit_flag(req(1)).await.unwrap();
    assert!(store.flags().contains(&inside.id));

    // the push echo of the same flag does not duplicate it
    let len = store.flags().len();
    store.handle_event(PushEvent::FlagCreated(inside)).await;
    assert_eq!(store.flags().len(), len);
}

#[tokio::test]
async fn invalid_flag_round_request_clears_filter() {
    let api = seeded();
    let store = store_for(&api);
    store.load_all().await.unwrap();
    store.select_flag_round(Some(1)).await.unwrap();
    assert_eq!(store.select_flag_round(Some(99)).await.unwrap(), None);
    assert_eq!(store.selections().flag_round(), None);
}

#[tokio::test]
async fn create_round_focuses_new_round_and_clears_jobs() {
    let api = seeded();
    let store = store_for(&api);
    store.load_all().await.unwrap();
    assert!(!store.jobs().is_empty());
    let id = store.create_round().await.unwrap();
    assert_eq!(id, 2);
    assert_eq!(store.selections().round(), Some(2));
    assert!(store.jobs().is_empty());
}

#[tokio::test]
async fn round_commands_skip_missing_id_and_surface_failures() {
    let api = seeded();
    let store = store_for(&api);
    store.run_round(None).await.unwrap();
    store.rerun_round(None).await.unwrap();
    store.rerun_unflagged_round(None).await.unwrap();
    store.schedule_unflagged_round(None).await.unwrap();
    assert!(api.calls().is_empty());

    store.run_round(Some(1)).await.unwrap();
    store.schedule_unflagged_round(Some(1)).await.unwrap();
    assert_eq!(api.calls(), vec!["run_round".to_string(), "schedule_unflagged_round".to_string()]);

    match store.rerun_round(Some(42)).await {
        Err(SyncError::Api(e)) => assert_eq!(e.status(), Some(404)),
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn select_round_prefers_valid_request_and_reloads_jobs() {
    let api = seeded();
    api.seed(|s| s.rounds = vec![round(2, "pending"), round(1, "running")]);
    let store = store_for(&api);
    store.load_all().await.unwrap();
    assert_eq!(store.selections().round(), Some(1));

    assert_eq!(store.select_round(Some(2)).await.unwrap(), Some(2));
    assert_eq!(ids(store.jobs().items()), vec![20]);
    assert_eq!(store.select_round(Some(99)).await.unwrap(), Some(2));
}

#[tokio::test]
async fn events_before_load_are_applied() {
    let api = seeded();
    let store = store_for(&api);
    store.handle_event(PushEvent::TeamCreated(team(9))).await;
    assert_eq!(store.teams().ids(), vec![9]);
}

#[tokio::test]
async fn teardown_forgets_everything() {
    let api = seeded();
    let store = store_for(&api);
    store.load_all().await.unwrap();
    store.teardown();
    assert_eq!(store.ready(), ReadyState::NotReady);
    assert!(store.challenges().is_empty());
    assert!(store.rounds().is_empty());
    assert!(store.jobs().is_empty());
    assert_eq!(store.selections().round(), None);
    assert_eq!(store.selections().challenge(), None);
    assert!(!store.is_started());
}

#[tokio::test]
async fn cancelled_load_leaves_store_not_ready() {
    let api = seeded();
    api.delay("list_rounds", Duration::from_millis(200));
    let store = store_for(&api);
    let task = {
        let store = store.clone();
        tokio::spawn(async move { store.load_all().await })
    };
    tokio::time::sleep(Duration::from_millis(30)).await;
    assert_eq!(store.ready(), ReadyState::Loading);
    task.abort();
    assert!(task.await.unwrap_err().is_cancelled());

    assert_eq!(store.ready(), ReadyState::NotReady);
    assert!(store.challenges().is_empty());
    api.delay("list_rounds", Duration::ZERO);
    store.load_all().await.unwrap();
    assert_eq!(store.ready(), ReadyState::Ready);
}

#[tokio::test]
async fn reorder_during_load_pulls_again() {
    let api = seeded();
    let store = store_for(&api);
    store.load_all().await.unwrap();
    api.clear_calls();
    api.delay("list_rounds", Duration::from_millis(100));

    let reorder = async {
        tokio::time::sleep(Duration::from_millis(20)).await;
        api.seed(|s| s.exploit_runs[0].sequence = 9);
        store.handle_event(PushEvent::ExploitRunsReordered).await;
    };
    let (res, _) = tokio::join!(store.load_all(), reorder);
    res.unwrap();

    assert_eq!(store.exploit_runs().get(&1).unwrap().sequence, 9);
    assert_eq!(api.call_count("list_exploit_runs"), 2);
    assert_eq!(store.ready(), ReadyState::Ready);
}

#[tokio::test]
async fn clearing_flag_filter_on_round_delete_reloads_flags() {
    let api = seeded();
    api.seed(|s| {
        s.rounds = vec![round(2, "running"), round(1, "finished")];
        s.flags = vec![flag(2, 2), flag(1, 1)];
    });
    let store = store_for(&api);
    store.load_all().await.unwrap();
    assert_eq!(store.select_flag_round(Some(2)).await.unwrap(), Some(2));
    assert_eq!(ids(store.flags().items()), vec![2]);

    store.handle_event(PushEvent::RoundDeleted(2)).await;

    assert_eq!(store.selections().flag_round(), None);
    assert_eq!(ids(store.flags().items()), vec![2, 1]);
    assert_eq!(api.call_count("list_flags"), 2);
}

#[tokio::test]
async fn submitted_flag_lands_at_the_end() {
    let api = seeded();
    api.seed(|s| s.flags = vec![flag(2, 1), flag(1, 1)]);
    let store = store_for(&api);
    store.load_all().await.unwrap();
    store.load_flags(None).await.unwrap();

    let req = SubmitFlagRequest { round_id: 1, challenge_id: 1, team_id: 1, flag_value: "FLAG{y}".into() };
    let submitted = store.submit_flag(req).await.unwrap();
    assert_eq!(ids(store.flags().items()), vec![2, 1, submitted.id]);
}
