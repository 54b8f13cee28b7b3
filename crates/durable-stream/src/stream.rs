//! Per-path stream: one writer, many live subscribers, gap-free splice of
//! history and live delivery (spec.md §4.2).

use std::sync::Arc;

use futures::Stream;
use tokio::sync::broadcast;
use tracing::{debug, error};

use crate::error::{StorageError, StreamError};
use crate::storage::Storage;
use crate::types::{parse_offset, Event, EventInput};

/// Observes writes before they are delegated to storage. Per the redesign
/// note in spec.md §9, this is the core's only extension point for
/// out-of-process adapters — it cannot see the allocated offset and cannot
/// veto the append.
pub type AppendHook = Arc<dyn Fn(&str, &EventInput) + Send + Sync>;

/// How a subscriber wants events delivered relative to the point it
/// attaches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SubscribeMode {
    /// Replay from `after` to the current tail, then end.
    HistoryOnly,
    /// Emit only events appended from the moment of subscription onward.
    LiveOnly,
    /// Replay from `after`, then seamlessly continue with live events.
    HistoryThenLive,
}

/// Live fan-out capacity per path. A lagging subscriber's next `recv()`
/// call resolves to `Lagged`, which this crate treats as terminal
/// (spec.md §4.2's "drop-and-disconnect on overflow").
const LIVE_QUEUE_CAPACITY: usize = 1024;

/// Coordinates one writer with N live subscribers for a single stream path.
pub struct PerPathStream {
    path: String,
    storage: Arc<dyn Storage>,
    tx: broadcast::Sender<Event>,
    /// Also published to on every append, so `subscribeAll` can merge
    /// across paths without each `PerPathStream` knowing about siblings.
    global_tx: broadcast::Sender<Event>,
    hook: Option<AppendHook>,
}

impl PerPathStream {
    pub fn new(
        path: String,
        storage: Arc<dyn Storage>,
        global_tx: broadcast::Sender<Event>,
        hook: Option<AppendHook>,
    ) -> Self {
        let (tx, _) = broadcast::channel(LIVE_QUEUE_CAPACITY);
        Self {
            path,
            storage,
            tx,
            global_tx,
            hook,
        }
    }

    pub fn path(&self) -> &str {
        &self.path
    }

    /// Append an event, persisting it durably before publishing to live
    /// subscribers. Publish is non-blocking on the caller: `broadcast::send`
    /// never awaits, it only marks slow receivers as lagged.
    pub async fn append(&self, input: EventInput) -> Result<Event, StorageError> {
        if let Some(hook) = &self.hook {
            hook(&self.path, &input);
        }

        let storage = self.storage.clone();
        let path = self.path.clone();
        let event = tokio::task::spawn_blocking(move || storage.append(&path, input))
            .await
            .expect("storage append task panicked")?;

        debug!(path = %self.path, offset = %event.offset, "appended event");

        // Errors here just mean there are currently no live subscribers.
        let _ = self.tx.send(event.clone());
        let _ = self.global_tx.send(event.clone());

        Ok(event)
    }

    /// Subscribe per the mode in spec.md §4.2. The returned stream ends
    /// (without an error) when the caller drops it, which also drops the
    /// underlying broadcast receiver — detachment is automatic and
    /// idempotent, so no explicit subscriber registry is needed.
    pub fn subscribe(
        &self,
        mode: SubscribeMode,
        after: Option<String>,
    ) -> impl Stream<Item = Result<Event, StreamError>> + Send + 'static {
        let storage = self.storage.clone();
        let path = self.path.clone();
        // Attached before the history read below, so no event appended
        // during the scan is lost (spec.md §4.2's splice algorithm, step 1).
        let mut rx = self.tx.subscribe();

        async_stream::stream! {
            // Seeded from the requested bound, not just from what history
            // actually yields: if `after` is beyond the current tail the
            // history read comes up empty, but the live filter below must
            // still honour `after` rather than accepting everything.
            let mut last_emitted: Option<u64> = after.as_deref().and_then(parse_offset);

            if matches!(mode, SubscribeMode::HistoryOnly | SubscribeMode::HistoryThenLive) {
                let storage = storage.clone();
                let path = path.clone();
                let after = after.clone();
                let result = tokio::task::spawn_blocking(move || storage.read(&path, after.as_deref(), None))
                    .await
                    .expect("storage read task panicked");

                match result {
                    Ok(events) => {
                        for event in events {
                            last_emitted = Some(
                                parse_offset(&event.offset).expect("stored offset is well-formed"),
                            );
                            yield Ok(event);
                        }
                    }
                    Err(e) => {
                        error!(path = %path, error = %e, "history read failed");
                        yield Err(StreamError::Storage(e));
                        return;
                    }
                }
            }

            if mode == SubscribeMode::HistoryOnly {
                return;
            }

            loop {
                match rx.recv().await {
                    Ok(event) => {
                        let offset = parse_offset(&event.offset).expect("stored offset is well-formed");
                        if last_emitted.map_or(true, |lo| offset > lo) {
                            last_emitted = Some(offset);
                            yield Ok(event);
                        }
                        // else: already delivered during the history phase, discard.
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
