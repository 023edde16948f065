//! # HTTP server
//!
//! Serves the status document and the command triggers over HTTP:
//!
//! | Path | Response |
//! |---|---|
//! | `/status`, `/json/status` | status document as JSON |
//! | `/trig/start_bag` | queues `StartScan`, empty 200 |
//! | `/trig/stop_bag` | queues `StopScan`, empty 200 |
//! | `/trig/stopscan` | queues `TriggerStopScan`, empty 200 |
//! | `/trig/toggle` | queues `TriggerContinuousScanning`, empty 200 |
//! | anything else | HTML index page |
//!
//! Triggers are fire and forget, the controller decides on its next tick
//! whether the command applies.
//!
//! The server runs on its own thread inside a single threaded tokio runtime.
//! It also listens for Ctrl-C, which raises the global shutdown flag.

// ------------------------------------------------------------------------------------------------
// IMPORTS
// ------------------------------------------------------------------------------------------------

use std::net::SocketAddr;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use axum::{
    extract::State,
    http::StatusCode,
    response::{Html, IntoResponse},
    routing::get,
    Json, Router,
};
use comms_if::cmd::{ScanCmd, ALL_CMDS};
use log::{debug, error, info, warn};
use tokio::net::TcpListener;

use crate::scan_ctrl::ScanHandle;
use crate::status::StatusBoard;

// ------------------------------------------------------------------------------------------------
// CONSTANTS
// ------------------------------------------------------------------------------------------------

/// How often the shutdown flag is checked
const SHUTDOWN_POLL_PERIOD: Duration = Duration::from_millis(100);

const INDEX_PAGE: &str = r#"<!DOCTYPE html>
<html>
<head><title>Scan Rig</title></head>
<body>
<h1>Scan Rig</h1>
<ul>
<li><a href="/status">Status</a></li>
<li><a href="/trig/start_bag">Start continuous scanning</a></li>
<li><a href="/trig/stop_bag">Stop continuous scanning</a></li>
<li><a href="/trig/stopscan">Trigger stop scan</a></li>
<li><a href="/trig/toggle">Toggle continuous scanning</a></li>
</ul>
</body>
</html>
"#;

// ------------------------------------------------------------------------------------------------
// STRUCTS
// ------------------------------------------------------------------------------------------------

/// State shared by every request handler.
#[derive(Clone)]
pub struct HttpState {
    pub board: StatusBoard,
    pub handle: ScanHandle,
}

// ------------------------------------------------------------------------------------------------
// ENUMS
// ------------------------------------------------------------------------------------------------

#[derive(Debug, thiserror::Error)]
pub enum HttpServerError {
    #[error("Could not build the HTTP runtime: {0}")]
    Runtime(std::io::Error),

    #[error("Could not bind the HTTP server to {0}: {1}")]
    Bind(SocketAddr, std::io::Error),

    #[error("HTTP server I/O error: {0}")]
    Io(std::io::Error),
}

// ------------------------------------------------------------------------------------------------
// PUBLIC FUNCTIONS
// ------------------------------------------------------------------------------------------------

/// Build the router for the scan rig's HTTP surface.
pub fn router(state: HttpState) -> Router {
    let mut router = Router::new()
        .route("/status", get(status))
        .route("/json/status", get(status));

    for cmd in ALL_CMDS.iter().copied() {
        router = router.route(
            cmd.http_path(),
            get(move |State(state): State<HttpState>| async move { trigger(&state, cmd) }),
        );
    }

    router.fallback(index).with_state(state)
}

/// Bind `addr` and serve on a new thread until `shutdown` is raised.
///
/// Returns the server thread and the address actually bound.
pub fn spawn_http_server(
    addr: SocketAddr,
    state: HttpState,
    shutdown: Arc<AtomicBool>,
) -> Result<(JoinHandle<()>, SocketAddr), HttpServerError> {
    let runtime = tokio::runtime::Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(HttpServerError::Runtime)?;

    let listener = runtime
        .block_on(TcpListener::bind(addr))
        .map_err(|e| HttpServerError::Bind(addr, e))?;
    let local_addr = listener.local_addr().map_err(HttpServerError::Io)?;

    info!("HTTP server listening on {}", local_addr);

    let handle = thread::spawn(move || {
        runtime.block_on(async move {
            let res = axum::serve(listener, router(state))
                .with_graceful_shutdown(shutdown_signal(shutdown))
                .await;

            if let Err(e) = res {
                error!("HTTP server failed: {}", e);
            }
        });

        info!("HTTP server stopped");
    });

    Ok((handle, local_addr))
}

// ------------------------------------------------------------------------------------------------
// PRIVATE FUNCTIONS
// ------------------------------------------------------------------------------------------------

async fn status(State(state): State<HttpState>) -> impl IntoResponse {
    Json(state.board.document())
}

fn trigger(state: &HttpState, cmd: ScanCmd) -> StatusCode {
    debug!("HTTP trigger {}", cmd);

    if !state.handle.send(cmd) {
        warn!("Controller not running, {} dropped", cmd);
    }

    StatusCode::OK
}

async fn index() -> impl IntoResponse {
    (StatusCode::OK, Html(INDEX_PAGE))
}

/// Resolves once the shutdown flag is raised, raising it on Ctrl-C.
async fn shutdown_signal(shutdown: Arc<AtomicBool>) {
    let mut poll = tokio::time::interval(SHUTDOWN_POLL_PERIOD);
    let ctrl_c = tokio::signal::ctrl_c();
    tokio::pin!(ctrl_c);

    loop {
        tokio::select! {
            res = &mut ctrl_c => {
                match res {
                    Ok(()) => {
                        info!("Ctrl-C received, shutting down");
                        shutdown.store(true, Ordering::Relaxed);
                        return;
                    }
                    Err(e) => {
                        warn!("Could not listen for Ctrl-C: {}", e);
                        break;
                    }
                }
            }
            _ = poll.tick() => {
                if shutdown.load(Ordering::Relaxed) {
                    return;
                }
            }
        }
    }

    while !shutdown.load(Ordering::Relaxed) {
        poll.tick().await;
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::app_state::AppState;
    use crate::chunk::ChunkPersistenceEngine;
    use crate::clients::fs_client::FsClient;
    use crate::clients::{SensorClientHandle, SensorRegistry};
    use crate::scan_ctrl::{ScanController, ScanCtrlParams};
    use crate::timestamp::TimestampAuthority;
    use axum::body::Body;
    use axum::http::Request;
    use std::io::{Read, Write};
    use std::time::Instant;
    use tower::ServiceExt;

    fn idle_controller(root: &std::path::Path) -> ScanController {
        let authority = Arc::new(TimestampAuthority::new());
        let registry = Arc::new(SensorRegistry::new(authority));
        registry.attach(SensorClientHandle::new("gpio"));
        registry.attach(SensorClientHandle::new("fs"));
        let engine = Arc::new(ChunkPersistenceEngine::new(registry.clone()));

        let mut ctrl = ScanController::new(
            ScanCtrlParams::default(),
            registry,
            engine,
            Arc::new(FsClient::new(root)),
            None,
        );
        ctrl.tick(Instant::now());
        assert_eq!(ctrl.state(), AppState::Idle);
        ctrl
    }

    fn http_state(ctrl: &ScanController) -> HttpState {
        let registry = Arc::new(SensorRegistry::new(Arc::new(TimestampAuthority::new())));
        HttpState {
            board: StatusBoard::new(ctrl.state_cell(), registry),
            handle: ctrl.handle(),
        }
    }

    async fn get_path(app: Router, path: &str) -> (StatusCode, Vec<u8>) {
        let response = app
            .oneshot(Request::builder().uri(path).body(Body::empty()).unwrap())
            .await
            .unwrap();
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        (status, body.to_vec())
    }

    #[tokio::test]
    async fn test_status_routes() {
        let root = tempfile::tempdir().unwrap();
        let ctrl = idle_controller(root.path());
        let app = router(http_state(&ctrl));

        for path in ["/status", "/json/status"].iter() {
            let (status, body) = get_path(app.clone(), path).await;
            assert_eq!(status, StatusCode::OK);

            let doc: serde_json::Value = serde_json::from_slice(&body).unwrap();
            assert_eq!(doc["name"], "ScanRig");
            assert_eq!(doc["state"], "IDLE");
        }
    }

    #[tokio::test]
    async fn test_trigger_queues_command() {
        let root = tempfile::tempdir().unwrap();
        let mut ctrl = idle_controller(root.path());
        let app = router(http_state(&ctrl));

        let (status, body) = get_path(app.clone(), "/trig/start_bag").await;
        assert_eq!(status, StatusCode::OK);
        assert!(body.is_empty());

        // Nothing happens until the controller ticks
        assert_eq!(ctrl.state(), AppState::Idle);
        ctrl.tick(Instant::now());
        assert_eq!(ctrl.state(), AppState::Scanning);

        // A rejected command still answers 200
        let (status, _) = get_path(app.clone(), "/trig/stopscan").await;
        assert_eq!(status, StatusCode::OK);
        ctrl.tick(Instant::now());
        assert_eq!(ctrl.state(), AppState::Scanning);

        let (status, _) = get_path(app, "/trig/toggle").await;
        assert_eq!(status, StatusCode::OK);
        ctrl.tick(Instant::now());
        assert_eq!(ctrl.state(), AppState::Idle);
    }

    #[tokio::test]
    async fn test_index_fallback() {
        let root = tempfile::tempdir().unwrap();
        let ctrl = idle_controller(root.path());
        let app = router(http_state(&ctrl));

        let (status, body) = get_path(app, "/some/other/page").await;
        assert_eq!(status, StatusCode::OK);
        assert!(String::from_utf8(body).unwrap().contains("/trig/stopscan"));
    }

    #[test]
    fn test_server_thread_stops_on_shutdown() {
        let root = tempfile::tempdir().unwrap();
        let ctrl = idle_controller(root.path());
        let shutdown = Arc::new(AtomicBool::new(false));

        let (handle, addr) = spawn_http_server(
            "127.0.0.1:0".parse().unwrap(),
            http_state(&ctrl),
            shutdown.clone(),
        )
        .unwrap();

        let mut stream = std::net::TcpStream::connect(addr).unwrap();
        stream
            .write_all(b"GET /status HTTP/1.1\r\nHost: localhost\r\nConnection: close\r\n\r\n")
            .unwrap();
        let mut response = String::new();
        stream.read_to_string(&mut response).unwrap();
        assert!(response.starts_with("HTTP/1.1 200"));
        assert!(response.contains("\"ScanRig\""));

        shutdown.store(true, Ordering::Relaxed);
        handle.join().unwrap();
    }
}
