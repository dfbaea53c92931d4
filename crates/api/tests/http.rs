use std::collections::HashMap;

use axum::extract::{Path, Query};
use axum::http::{HeaderMap, StatusCode};
use axum::routing::{get, post};
use axum::{Json, Router};
use mazu_api::{ApiError, HttpApi, MazuApi};
use mazu_core::fixtures;
use serde_json::{json, Value};

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        let _ = axum::serve(listener, app).await;
    });
    format!("http://{}", addr)
}

fn app() -> Router {
    Router::new()
        .route("/api/challenges", get(|| async { Json(vec![fixtures::challenge(1), fixtures::challenge(2)]) }))
        .route(
            "/api/exploit-runs",
            get(|Query(q): Query<HashMap<String, String>>| async move {
                let mut run = fixtures::exploit_run(1, 1);
                run.challenge_id = q.get("challenge_id").and_then(|v| v.parse().ok()).unwrap_or(0);
                run.team_id = if q.contains_key("team_id") { -1 } else { 0 };
                Json(vec![run])
            }),
        )
        .route("/api/rounds", post(|| async { Json(json!(7)) }))
        .route("/api/rounds/current", get(|| async { Json(Value::Null) }))
        .route(
            "/api/rounds/:id/run",
            post(|Path(id): Path<i32>| async move {
                if id == 9 {
                    (StatusCode::CONFLICT, Json(json!({"error": "round 9 busy"})))
                } else {
                    (StatusCode::OK, Json(json!("ok")))
                }
            }),
        )
        .route("/api/teams", get(|| async { (StatusCode::SERVICE_UNAVAILABLE, "") }))
        .route("/api/settings", get(|| async { "definitely not json" }))
        .route(
            "/api/version",
            get(|headers: HeaderMap| async move {
                let auth = headers.get("authorization").and_then(|v| v.to_str().ok()).unwrap_or("").to_string();
                Json(json!({"version": auth}))
            }),
        )
}

#[tokio::test]
async fn lists_decode_into_records() {
    let api = HttpApi::new(serve(app()).await);
    let challenges = api.list_challenges().await.unwrap();
    assert_eq!(challenges.iter().map(|c| c.id).collect::<Vec<_>>(), vec![1, 2]);
}

#[tokio::test]
async fn optional_filters_become_query_params() {
    let api = HttpApi::new(serve(app()).await);
    let runs = api.list_exploit_runs(Some(4), None).await.unwrap();
    assert_eq!(runs[0].challenge_id, 4);
    assert_eq!(runs[0].team_id, 0);
    let runs = api.list_exploit_runs(None, Some(2)).await.unwrap();
    assert_eq!(runs[0].challenge_id, 0);
    assert_eq!(runs[0].team_id, -1);
}

#[tokio::test]
async fn create_round_returns_new_id_and_null_current_round_is_none() {
    let api = HttpApi::new(serve(app()).await);
    assert_eq!(api.create_round().await.unwrap(), 7);
    assert_eq!(api.current_round().await.unwrap(), None);
    api.run_round(3).await.unwrap();
}

#[tokio::test]
async fn error_message_comes_from_json_body() {
    let api = HttpApi::new(serve(app()).await);
    match api.run_round(9).await {
        Err(ApiError::Status { status, message, payload }) => {
            assert_eq!(status, 409);
            assert_eq!(message, "round 9 busy");
            assert_eq!(payload, Some(json!({"error": "round 9 busy"})));
        }
        other => panic!("unexpected: {:?}", other),
    }
}

#[tokio::test]
async fn empty_error_body_falls_back_to_reason_phrase() {
    let api = HttpApi::new(serve(app()).await);
    let err = api.list_teams().await.unwrap_err();
    assert_eq!(err.status(), Some(503));
    assert_eq!(err.to_string(), "503: Service Unavailable");
}

#[tokio::test]
async fn malformed_success_body_is_a_decode_error() {
    let api = HttpApi::new(serve(app()).await);
    assert!(matches!(api.list_settings().await, Err(ApiError::Decode { .. })));
}

#[tokio::test]
async fn token_is_sent_as_bearer() {
    let api = HttpApi::new(serve(app()).await).with_token(Some("s3cr3t".into()));
    assert_eq!(api.version().await.unwrap().version, "Bearer s3cr3t");
}

#[tokio::test]
async fn unreachable_service_is_a_transport_error() {
    let listener = std::net::TcpListener::bind("127.0.0.1:0").unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);
    let api = HttpApi::new(format!("http://{}", addr));
    assert!(matches!(api.list_rounds().await, Err(ApiError::Http(_))));
}
