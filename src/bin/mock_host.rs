//! Mock host binary for integration testing
//!
//! Implements a minimal robot server so the session and runner can be
//! exercised without launching a real IDE. It reads the port from the
//! `-Drobot-server.port=N` launch flag like the real host does.
//!
//! Commands:
//! - `GET /hello`: readiness probe
//! - `POST /echo`: returns the request body
//! - `POST /fail`: HTTP 500 with a JSON message
//! - `POST /reset`: aborts the response mid-stream; the host stays up
//! - `POST /crash`: exits with code 3 without answering
//! - `POST /delay`: sleeps `{"millis": N}` then answers
//! - `POST /count`: number of commands received so far
//! - `POST /exit`: answers, then exits with code 0
//!
//! `MOCK_HOST_STARTUP_DELAY_MS` delays binding the port.

use std::io;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use axum::body::{Body, Bytes};
use axum::extract::{Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde_json::{json, Value};
use tokio::sync::Notify;

const PORT_FLAG: &str = "-Drobot-server.port=";

#[derive(Clone, Default)]
struct HostState {
    commands: Arc<AtomicUsize>,
    exit: Arc<Notify>,
}

#[tokio::main]
async fn main() {
    let port = std::env::args()
        .find_map(|arg| arg.strip_prefix(PORT_FLAG).and_then(|p| p.parse::<u16>().ok()))
        .unwrap_or(8082);

    if let Some(delay) = std::env::var("MOCK_HOST_STARTUP_DELAY_MS")
        .ok()
        .and_then(|v| v.parse::<u64>().ok())
    {
        tokio::time::sleep(Duration::from_millis(delay)).await;
    }

    let listener = match tokio::net::TcpListener::bind(("127.0.0.1", port)).await {
        Ok(listener) => listener,
        Err(e) => {
            eprintln!("mock_host: cannot bind port {}: {}", port, e);
            std::process::exit(2);
        }
    };
    eprintln!("mock_host: robot server on 127.0.0.1:{}", port);

    let state = HostState::default();
    let exit = Arc::clone(&state.exit);
    let app = Router::new()
        .route("/hello", get(hello))
        .route("/{command}", post(command))
        .with_state(state);

    let served = axum::serve(listener, app)
        .with_graceful_shutdown(async move { exit.notified().await })
        .await;
    if let Err(e) = served {
        eprintln!("mock_host: server error: {}", e);
        std::process::exit(1);
    }
}

async fn hello() -> Json<Value> {
    Json(json!({ "status": "ok" }))
}

async fn command(
    State(state): State<HostState>,
    Path(command): Path<String>,
    body: Bytes,
) -> Response {
    let arguments: Value = serde_json::from_slice(&body).unwrap_or(Value::Null);
    let seen = state.commands.fetch_add(1, Ordering::SeqCst) + 1;

    match command.as_str() {
        "echo" => Json(arguments).into_response(),
        "fail" => (
            StatusCode::INTERNAL_SERVER_ERROR,
            Json(json!({ "message": "component not found" })),
        )
            .into_response(),
        "reset" => {
            let broken = futures_util::stream::once(async {
                Err::<Bytes, io::Error>(io::Error::new(io::ErrorKind::ConnectionReset, "reset"))
            });
            Response::new(Body::from_stream(broken))
        }
        "crash" => std::process::exit(3),
        "delay" => {
            let millis = arguments["millis"].as_u64().unwrap_or(0);
            tokio::time::sleep(Duration::from_millis(millis)).await;
            Json(json!({ "slept": millis })).into_response()
        }
        "count" => Json(json!(seen)).into_response(),
        "exit" => {
            state.exit.notify_one();
            Json(json!({ "status": "exiting" })).into_response()
        }
        other => (
            StatusCode::NOT_FOUND,
            Json(json!({ "message": format!("unknown command '{}'", other) })),
        )
            .into_response(),
    }
}
