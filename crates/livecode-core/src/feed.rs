//! Latest snapshot + broadcast feed for session observers.

use std::sync::RwLock;

use futures::StreamExt;
use tokio::sync::broadcast;
use tokio_stream::wrappers::BroadcastStream;

use crate::SessionState;

/// Live update buffer per session. Slow observers skip ahead.
const FEED_CAPACITY: usize = 256;

/// Per-session observer feed.
///
/// New observers receive the latest snapshot first, then every
/// subsequent update in publish order.
pub struct SessionFeed {
    latest: RwLock<Option<SessionState>>,
    sender: broadcast::Sender<SessionState>,
}

impl Default for SessionFeed {
    fn default() -> Self {
        Self::new()
    }
}

impl SessionFeed {
    /// Create an empty feed.
    #[must_use]
    pub fn new() -> Self {
        let (sender, _) = broadcast::channel(FEED_CAPACITY);
        Self {
            latest: RwLock::new(None),
            sender,
        }
    }

    /// Record a snapshot and notify live observers.
    ///
    /// Snapshots older than the recorded one are dropped.
    pub fn publish(&self, state: SessionState) {
        {
            let mut latest = match self.latest.write() {
                Ok(guard) => guard,
                Err(poisoned) => poisoned.into_inner(),
            };
            if latest.as_ref().is_some_and(|l| l.revision > state.revision) {
                return;
            }
            *latest = Some(state.clone());
        }
        let _ = self.sender.send(state); // no observers is fine
    }

    /// Most recently published snapshot.
    #[must_use]
    pub fn latest(&self) -> Option<SessionState> {
        match self.latest.read() {
            Ok(guard) => guard.clone(),
            Err(poisoned) => poisoned.into_inner().clone(),
        }
    }

    /// Receiver for live updates only.
    #[must_use]
    pub fn subscribe(&self) -> broadcast::Receiver<SessionState> {
        self.sender.subscribe()
    }

    /// Number of live observers.
    #[must_use]
    pub fn observer_count(&self) -> usize {
        self.sender.receiver_count()
    }

    /// Stream that yields the latest snapshot first, then live updates.
    #[must_use]
    pub fn latest_plus_stream(&self) -> futures::stream::BoxStream<'static, SessionState> {
        let rx = self.subscribe();
        let latest = self.latest();
        let floor = latest.as_ref().map_or(0, |s| s.revision);

        let head = futures::stream::iter(latest);
        let live = BroadcastStream::new(rx).filter_map(move |res| async move {
            match res {
                Ok(state) if state.revision > floor => Some(state),
                Ok(_) => None,
                Err(e) => {
                    tracing::debug!("Session feed observer lagged: {e}");
                    None
                }
            }
        });

        Box::pin(head.chain(live))
    }

    /// SSE stream (requires `sse` feature).
    ///
    /// Each snapshot is rendered through `render` into the JSON payload
    /// of a `session` event whose id is the revision.
    #[cfg(feature = "sse")]
    #[must_use]
    pub fn sse_stream<T, F>(
        &self,
        render: F,
    ) -> futures::stream::BoxStream<'static, Result<axum::response::sse::Event, std::convert::Infallible>>
    where
        T: serde::Serialize,
        F: Fn(SessionState) -> T + Send + 'static,
    {
        self.latest_plus_stream()
            .map(move |state| {
                let revision = state.revision;
                let event = axum::response::sse::Event::default()
                    .event("session")
                    .id(revision.to_string());
                Ok(event.json_data(render(state)).unwrap_or_else(|e| {
                    axum::response::sse::Event::default()
                        .event("error")
                        .data(e.to_string())
                }))
            })
            .boxed()
    }
}
