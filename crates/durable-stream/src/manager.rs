//! Stream manager: process-wide registry of per-path streams, lazily
//! created on first use (spec.md §4.3).

use std::collections::HashMap;
use std::sync::Arc;

use futures::Stream;
use parking_lot::RwLock;
use tokio::sync::broadcast;
use tracing::error;

use crate::error::{StorageError, StreamError};
use crate::storage::Storage;
use crate::stream::{AppendHook, PerPathStream, SubscribeMode};
use crate::types::{parse_offset, Event, EventInput};

/// Live fan-out capacity for the process-wide `subscribeAll` channel.
const GLOBAL_QUEUE_CAPACITY: usize = 1024;

/// Singleton within a process. Holds the concurrent registry
/// `StreamPath -> PerPathStream` and the shared storage handle.
pub struct StreamManager {
    storage: Arc<dyn Storage>,
    streams: RwLock<HashMap<String, Arc<PerPathStream>>>,
    global_tx: broadcast::Sender<Event>,
    hook: Option<AppendHook>,
}

impl StreamManager {
    pub fn new(storage: Arc<dyn Storage>) -> Arc<Self> {
        Self::with_hook(storage, None)
    }

    pub fn with_hook(storage: Arc<dyn Storage>, hook: Option<AppendHook>) -> Arc<Self> {
        let (global_tx, _) = broadcast::channel(GLOBAL_QUEUE_CAPACITY);
        Arc::new(Self {
            storage,
            streams: RwLock::new(HashMap::new()),
            global_tx,
            hook,
        })
    }

    /// Return the stream for `path`, constructing it under a write-lock
    /// guard if this is the first reference. The write lock rechecks for
    /// an existing entry before inserting, which is what makes this
    /// double-checked get-or-create atomic: two concurrent first-callers
    /// for the same path never construct two `PerPathStream`s.
    fn get_or_create(&self, path: &str) -> Arc<PerPathStream> {
        if let Some(stream) = self.streams.read().get(path) {
            return stream.clone();
        }

        let mut streams = self.streams.write();
        streams
            .entry(path.to_string())
            .or_insert_with(|| {
                Arc::new(PerPathStream::new(
                    path.to_string(),
                    self.storage.clone(),
                    self.global_tx.clone(),
                    self.hook.clone(),
                ))
            })
            .clone()
    }

    pub async fn append(&self, path: &str, input: EventInput) -> Result<Event, StorageError> {
        self.get_or_create(path).append(input).await
    }

    pub fn subscribe(
        &self,
        path: &str,
        mode: SubscribeMode,
        after: Option<String>,
    ) -> impl Stream<Item = Result<Event, StreamError>> + Send + 'static {
        self.get_or_create(path).subscribe(mode, after)
    }

    /// Merged stream over every known path. A global receiver is attached
    /// before `listPaths()` is snapshotted, so paths created after
    /// subscription start are still picked up through the fan-out — and a
    /// `(path, offset)` seen during the per-path history phase is never
    /// re-delivered once the live phase begins (spec.md §4.3).
    pub fn subscribe_all(
        &self,
        mode: SubscribeMode,
        after: Option<String>,
    ) -> impl Stream<Item = Result<Event, StreamError>> + Send + 'static {
        let storage = self.storage.clone();
        let mut global_rx = self.global_tx.subscribe();

        async_stream::stream! {
            let mut last_emitted: HashMap<String, u64> = HashMap::new();

            if matches!(mode, SubscribeMode::HistoryOnly | SubscribeMode::HistoryThenLive) {
                let storage_for_list = storage.clone();
                let paths = match tokio::task::spawn_blocking(move || storage_for_list.list_paths())
                    .await
                    .expect("list_paths task panicked")
                {
                    Ok(paths) => paths,
                    Err(e) => {
                        error!(error = %e, "subscribeAll: listPaths failed");
                        yield Err(StreamError::Storage(e));
                        return;
                    }
                };

                // Seeded per path from the requested bound, not just from
                // what history yields: if `after` is beyond a path's current
                // tail that path's history read comes up empty, but the live
                // filter below must still honour `after` for it rather than
                // treating it as "nothing delivered yet" (spec.md §8).
                let after_bound = after.as_deref().and_then(parse_offset);
                if let Some(bound) = after_bound {
                    for path in &paths {
                        last_emitted.insert(path.clone(), bound);
                    }
                }

                // Cross-path order is unspecified (spec.md §4.3); a simple
                // sequential per-path replay preserves each path's internal
                // order, which is the only guarantee required.
                for path in paths {
                    let storage = storage.clone();
                    let path_for_read = path.clone();
                    let after = after.clone();
                    let result = tokio::task::spawn_blocking(move || {
                        storage.read(&path_for_read, after.as_deref(), None)
                    })
                    .await
                    .expect("storage read task panicked");

                    match result {
                        Ok(events) => {
                            for event in events {
                                let offset = parse_offset(&event.offset)
                                    .expect("stored offset is well-formed");
                                last_emitted.insert(event.path.clone(), offset);
                                yield Ok(event);
                            }
                        }
                        Err(e) => {
                            error!(path = %path, error = %e, "subscribeAll: history read failed");
                            yield Err(StreamError::Storage(e));
                            return;
                        }
                    }
                }
            }

            if mode == SubscribeMode::HistoryOnly {
                return;
            }

            loop {
                match global_rx.recv().await {
                    Ok(event) => {
                        let offset = parse_offset(&event.offset).expect("stored offset is well-formed");
                        let already_delivered = last_emitted
                            .get(&event.path)
                            .is_some_and(|&last| offset <= last);
                        if !already_delivered {
                            last_emitted.insert(event.path.clone(), offset);
                            yield Ok(event);
                        }
                    }
                    Err(broadcast::error::RecvError::Lagged(_)) => {
                        yield Err(StreamError::SubscriberLagged);
                        return;
                    }
                    Err(broadcast::error::RecvError::Closed) => return,
                }
            }
        }
    }
}
