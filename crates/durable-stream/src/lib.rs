//! Durable event streams.
//!
//! An append-only log per stream path, exposed over HTTP: `POST` appends a
//! JSON event, `GET` replays history and optionally tails it live over
//! Server-Sent Events.
//!
//! # Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use durable_stream::{manager::StreamManager, server, storage::memory::MemoryStore, types::ServerOptions};
//!
//! #[tokio::main]
//! async fn main() {
//!     let manager = StreamManager::new(Arc::new(MemoryStore::new()));
//!     let state = server::AppState {
//!         manager,
//!         options: ServerOptions::default(),
//!     };
//!     server::start_server(state).await.unwrap();
//! }
//! ```
//!
//! # Protocol
//!
//! ## Appending an event
//!
//! ```text
//! POST /agents/session-17 HTTP/1.1
//! Content-Type: application/json
//!
//! {"type": "user.message", "payload": {"text": "hi"}, "version": 1}
//!
//! Response: 200 OK
//! {"type":"user.message","payload":{"text":"hi"},"offset":"0000000000000000","createdAt":"2025-01-20T12:00:00.123Z","path":"session-17","version":1}
//! ```
//!
//! ## Replaying history
//!
//! ```text
//! GET /agents/session-17 HTTP/1.1
//!
//! Response: 200 OK
//! Content-Type: text/event-stream
//!
//! event: data
//! id: 0000000000000000
//! data: {"type":"user.message", ...}
//! ```
//!
//! ## Tailing live
//!
//! ```text
//! GET /agents/session-17?offset=0000000000000000&live=sse HTTP/1.1
//! Accept: text/event-stream
//!
//! (stream stays open, further appends arrive as additional `data` events)
//! ```
//!
//! ## Subscribing to every path
//!
//! ```text
//! GET /agents/ HTTP/1.1
//! ```

pub mod error;
pub mod manager;
pub mod path_encoding;
pub mod server;
pub mod storage;
pub mod stream;
pub mod types;

pub use error::{EnvelopeError, StorageError, StreamError};
pub use manager::StreamManager;
pub use server::{create_router, start_server, AppState};
pub use stream::{AppendHook, SubscribeMode};
pub use types::{BackendKind, Event, EventInput, ServerOptions};
