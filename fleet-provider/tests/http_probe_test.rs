//! Integration tests for the HTTP activity probe
//!
//! Spins up a throwaway axum server standing in for a deployed instance.

use axum::{http::StatusCode, routing::get, Json, Router};
use fleet_provider::{ActivityProbe, HttpActivityProbe};
use serde_json::{json, Value};

async fn serve(app: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind test listener");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, app).await.expect("serve");
    });
    format!("http://{addr}/")
}

#[tokio::test]
async fn test_probe_reads_timestamp() {
    let app = Router::new().route(
        "/api/last-user-activity",
        get(|| async {
            Json(json!({
                "timestamp": "2024-05-02T08:00:00Z",
                "route": "/dashboard",
                "method": "GET",
                "uptime": 321.0
            }))
        }),
    );
    let base = serve(app).await;

    let ts = HttpActivityProbe::new()
        .last_user_activity(&base)
        .await
        .expect("probe")
        .expect("timestamp");

    assert_eq!(ts.to_rfc3339(), "2024-05-02T08:00:00+00:00");
}

#[tokio::test]
async fn test_probe_without_timestamp_reports_none() {
    let app = Router::new().route(
        "/api/last-user-activity",
        get(|| async { Json(json!({ "uptime": 5.0 })) }),
    );
    let base = serve(app).await;

    let ts = HttpActivityProbe::new()
        .last_user_activity(base.trim_end_matches('/'))
        .await
        .expect("probe");

    assert!(ts.is_none());
}

#[tokio::test]
async fn test_probe_surfaces_http_errors() {
    let app = Router::new().route(
        "/api/last-user-activity",
        get(|| async { (StatusCode::SERVICE_UNAVAILABLE, Json(Value::Null)) }),
    );
    let base = serve(app).await;

    let result = HttpActivityProbe::new().last_user_activity(&base).await;
    assert!(result.is_err());
}
