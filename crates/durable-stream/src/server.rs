//! HTTP gateway: two routes under a configurable prefix, append over JSON
//! POST and read/subscribe over SSE GET (spec.md §5).

use std::{sync::Arc, time::Duration};

use axum::{
    body::Bytes,
    extract::{Path, Query, State},
    http::StatusCode,
    response::{
        sse::{Event as SseEvent, KeepAlive},
        IntoResponse, Json, Response, Sse,
    },
    routing::get,
    Router,
};
use futures::{Stream, StreamExt};
use serde::{Deserialize, Serialize};
use tower_http::{
    compression::CompressionLayer,
    cors::{Any, CorsLayer},
};
use tracing::{error, info, warn};

use crate::{
    error::{EnvelopeError, StreamError},
    manager::StreamManager,
    stream::SubscribeMode,
    types::{parse_offset, validate_stream_path, EventInput, ServerOptions, BEFORE_START},
};

/// Application state shared across handlers.
#[derive(Clone)]
pub struct AppState {
    pub manager: Arc<StreamManager>,
    pub options: ServerOptions,
}

/// Query parameters accepted on the read/subscribe route.
#[derive(Debug, Deserialize, Default)]
pub struct ReadQuery {
    pub offset: Option<String>,
    pub live: Option<String>,
}

/// Build the router. Both routes live under `options.path_prefix`; an empty
/// path after the prefix means `subscribeAll` (spec.md §5).
pub fn create_router(state: AppState) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any);

    let prefix = state.options.path_prefix.clone();

    let routed = Router::new()
        .route("/", get(handle_read_root))
        .route("/{*path}", get(handle_read).post(handle_append))
        .with_state(state);

    let mounted = if prefix.is_empty() || prefix == "/" {
        routed
    } else {
        Router::new().nest(&prefix, routed)
    };

    mounted.layer(cors).layer(CompressionLayer::new())
}

fn bad_request(message: impl ToString) -> Response {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorBody {
            error: message.to_string(),
        }),
    )
        .into_response()
}

/// Append success body per spec.md §6: `{"ok":true,"offset":"<assigned>"}`.
#[derive(Serialize)]
struct AppendResponse {
    ok: bool,
    offset: String,
}

#[derive(Serialize)]
struct ErrorBody {
    error: String,
}

/// Resolve the `offset` query parameter into the `after` bound passed to
/// storage: absent or the `-1` sentinel both mean "from the beginning",
/// an empty string is a client error, anything else must be a well-formed
/// offset (spec.md §5, §7).
fn resolve_after(offset: Option<&str>) -> Result<Option<String>, EnvelopeError> {
    match offset {
        None => Ok(None),
        Some(BEFORE_START) => Ok(None),
        Some("") => Err(EnvelopeError::EmptyOffset),
        Some(o) => {
            if parse_offset(o).is_none() {
                return Err(EnvelopeError::InvalidOffset);
            }
            Ok(Some(o.to_string()))
        }
    }
}

fn resolve_mode(live: Option<&str>) -> SubscribeMode {
    match live {
        Some("sse") | Some("true") => SubscribeMode::HistoryThenLive,
        _ => SubscribeMode::HistoryOnly,
    }
}

async fn handle_read_root(
    State(state): State<AppState>,
    Query(query): Query<ReadQuery>,
) -> Response {
    do_read(state, String::new(), query).await
}

async fn handle_read(
    State(state): State<AppState>,
    Path(path): Path<String>,
    Query(query): Query<ReadQuery>,
) -> Response {
    do_read(state, path, query).await
}

async fn do_read(state: AppState, path: String, query: ReadQuery) -> Response {
    if !path.is_empty() && !validate_stream_path(&path) {
        return bad_request(EnvelopeError::InvalidPath);
    }

    let after = match resolve_after(query.offset.as_deref()) {
        Ok(after) => after,
        Err(e) => return bad_request(e),
    };
    let mode = resolve_mode(query.live.as_deref());

    let events: std::pin::Pin<Box<dyn Stream<Item = Result<crate::types::Event, StreamError>> + Send>> =
        if path.is_empty() {
            Box::pin(state.manager.subscribe_all(mode, after))
        } else {
            Box::pin(state.manager.subscribe(&path, mode, after))
        };

    let sse_stream = events.map(|item| {
        let event = match item {
            Ok(event) => event,
            Err(e) => {
                warn!(error = %e, "subscribe stream terminated with error");
                return Ok(SseEvent::default().event("error").data(e.to_string()));
            }
        };
        Ok::<_, std::convert::Infallible>(
            SseEvent::default()
                .event("data")
                .id(event.offset.clone())
                .data(event.to_sse_data()),
        )
    });

    Sse::new(sse_stream)
        .keep_alive(KeepAlive::new().interval(Duration::from_secs(15)).text("keepalive"))
        .into_response()
}

async fn handle_append(
    State(state): State<AppState>,
    Path(path): Path<String>,
    body: Bytes,
) -> Response {
    if !validate_stream_path(&path) {
        return bad_request(EnvelopeError::InvalidPath);
    }

    let input: EventInput = match serde_json::from_slice(&body) {
        Ok(input) => input,
        Err(e) => return bad_request(EnvelopeError::InvalidJson(e)),
    };
    if let Err(e) = input.validate() {
        return bad_request(e);
    }

    match state.manager.append(&path, input).await {
        Ok(event) => (
            StatusCode::OK,
            Json(AppendResponse {
                ok: true,
                offset: event.offset,
            }),
        )
            .into_response(),
        Err(e) => {
            error!(path = %path, error = %e, "append failed");
            (
                StatusCode::INTERNAL_SERVER_ERROR,
                Json(ErrorBody {
                    error: e.to_string(),
                }),
            )
                .into_response()
        }
    }
}

async fn shutdown_signal() {
    let ctrl_c = async {
        tokio::signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())
            .expect("failed to install SIGTERM handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {}
        _ = terminate => {}
    }
    info!("shutdown signal received");
}

/// Start the server, running until a shutdown signal is received.
pub async fn start_server(state: AppState) -> std::io::Result<()> {
    let addr = format!("{}:{}", state.options.host, state.options.port);
    let router = create_router(state);

    info!(%addr, "starting durable-stream server");
    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, router)
        .with_graceful_shutdown(shutdown_signal())
        .await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::storage::memory::MemoryStore;
    use axum::http::Request;
    use tower::ServiceExt;

    fn test_app() -> Router {
        let manager = StreamManager::new(Arc::new(MemoryStore::new()));
        let state = AppState {
            manager,
            options: ServerOptions {
                path_prefix: "/agents".to_string(),
                ..ServerOptions::default()
            },
        };
        create_router(state)
    }

    async fn body_text(response: Response) -> String {
        let bytes = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .unwrap();
        String::from_utf8(bytes.to_vec()).unwrap()
    }

    #[tokio::test]
    async fn test_append_response_shape() {
        let app = test_app();

        let append = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/agents/session-1")
                    .body(axum::body::Body::from(r#"{"type":"msg","payload":{}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(append.status(), StatusCode::OK);
        let body: serde_json::Value = serde_json::from_str(&body_text(append).await).unwrap();
        assert_eq!(body["ok"], serde_json::json!(true));
        assert_eq!(body["offset"], serde_json::json!(crate::types::format_offset(0)));
    }

    #[tokio::test]
    async fn test_append_then_read_history() {
        let app = test_app();

        let append = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/agents/session-1")
                    .header("content-type", "application/json")
                    .body(axum::body::Body::from(r#"{"type":"msg","payload":{"n":1}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(append.status(), StatusCode::OK);

        let read = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/agents/session-1")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(read.status(), StatusCode::OK);
        let text = body_text(read).await;
        assert!(text.contains("event: data"));
        assert!(text.contains("\"type\":\"msg\""));
    }

    #[tokio::test]
    async fn test_append_rejects_invalid_json() {
        let app = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/agents/session-1")
                    .body(axum::body::Body::from("not json"))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_append_rejects_empty_type() {
        let app = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/agents/session-1")
                    .body(axum::body::Body::from(r#"{"type":"","payload":{}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_read_rejects_empty_offset() {
        let app = test_app();
        let response = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/agents/session-1?offset=")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    }

    #[tokio::test]
    async fn test_read_resume_from_offset_excludes_replayed_event() {
        let app = test_app();

        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/agents/session-1")
                    .body(axum::body::Body::from(r#"{"type":"t0","payload":{}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        let second = app
            .clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/agents/session-1")
                    .body(axum::body::Body::from(r#"{"type":"t1","payload":{}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        let second_body: serde_json::Value =
            serde_json::from_str(&body_text(second).await).unwrap();
        let second_offset = second_body["offset"].as_str().unwrap();

        let read = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri(format!("/agents/session-1?offset={}", second_offset))
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let text = body_text(read).await;
        assert!(!text.contains("\"t0\""));
        assert!(!text.contains("\"t1\""));
    }

    #[tokio::test]
    async fn test_isolation_between_paths() {
        let app = test_app();

        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/agents/a")
                    .body(axum::body::Body::from(r#"{"type":"on-a","payload":{}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        let read_b = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/agents/b")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        let text = body_text(read_b).await;
        assert!(text.is_empty());
    }

    #[tokio::test]
    async fn test_subscribe_all_merges_paths() {
        let app = test_app();

        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/agents/a")
                    .body(axum::body::Body::from(r#"{"type":"t","payload":{}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();
        app.clone()
            .oneshot(
                Request::builder()
                    .method("POST")
                    .uri("/agents/b")
                    .body(axum::body::Body::from(r#"{"type":"t","payload":{}}"#))
                    .unwrap(),
            )
            .await
            .unwrap();

        let read = app
            .oneshot(
                Request::builder()
                    .method("GET")
                    .uri("/agents/")
                    .body(axum::body::Body::empty())
                    .unwrap(),
            )
            .await
            .unwrap();
        assert_eq!(read.status(), StatusCode::OK);
        let text = body_text(read).await;
        assert!(text.matches("event: data").count() == 2);
    }
}
