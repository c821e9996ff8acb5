use std::{collections::BTreeSet, sync::Arc, time::Duration};

use futures::{Stream, StreamExt};
use tokio::sync::mpsc;
use tokio_stream::wrappers::ReceiverStream;
use tokio_util::sync::CancellationToken;

use crate::blob::{BlobEvent, BlobStore};
use crate::pipeline::{Envelope, PipelineError, Source};

/// Sending half of the blob notification channel.
#[derive(Clone)]
pub struct BlobEventSender {
    tx: mpsc::Sender<Envelope<BlobEvent>>,
}

impl BlobEventSender {
    pub async fn notify(&self, object: &str) -> Result<(), PipelineError> {
        let env = Envelope::now(BlobEvent {
            object: object.to_string(),
        });
        self.tx.send(env).await.map_err(|_| {
            metrics::counter!("blob_notifications_dropped_total").increment(1);
            PipelineError::Source("blob notification channel closed".to_string())
        })?;
        metrics::counter!("blob_notifications_total").increment(1);
        Ok(())
    }

    /// Queue a notification without waiting for channel capacity. When the
    /// channel is full the send is handed to a background task, so the caller
    /// never blocks on a slow consumer and the event is still delivered.
    pub fn notify_detached(&self, object: &str) {
        let env = Envelope::now(BlobEvent {
            object: object.to_string(),
        });
        match self.tx.try_send(env) {
            Ok(()) => metrics::counter!("blob_notifications_total").increment(1),
            Err(mpsc::error::TrySendError::Full(env)) => {
                metrics::counter!("blob_notifications_deferred_total").increment(1);
                tracing::debug!(object = %env.payload.object, "notification channel full, deferring");
                let tx = self.tx.clone();
                tokio::spawn(async move {
                    let object = env.payload.object.clone();
                    match tx.send(env).await {
                        Ok(()) => metrics::counter!("blob_notifications_total").increment(1),
                        Err(_) => {
                            metrics::counter!("blob_notifications_dropped_total").increment(1);
                            tracing::warn!(object = %object, "notification channel closed before deferred send");
                        }
                    }
                });
            }
            Err(mpsc::error::TrySendError::Closed(env)) => {
                metrics::counter!("blob_notifications_dropped_total").increment(1);
                tracing::warn!(object = %env.payload.object, "blob notification channel closed");
            }
        }
    }
}

/// Receiving half of the blob notification channel, consumed by the trigger.
#[derive(Clone)]
pub struct BlobEventSource {
    receiver: Arc<tokio::sync::Mutex<Option<mpsc::Receiver<Envelope<BlobEvent>>>>>,
}

impl BlobEventSource {
    pub fn channel(capacity: usize) -> (BlobEventSender, BlobEventSource) {
        let (tx, rx) = mpsc::channel(capacity.max(1));
        (
            BlobEventSender { tx },
            BlobEventSource {
                receiver: Arc::new(tokio::sync::Mutex::new(Some(rx))),
            },
        )
    }
}

#[async_trait::async_trait]
impl Source<BlobEvent> for BlobEventSource {
    async fn stream(
        &self,
    ) -> std::pin::Pin<Box<dyn Stream<Item = Result<Envelope<BlobEvent>, PipelineError>> + Send>> {
        let mut guard = self.receiver.lock().await;
        match guard.take() {
            Some(rx) => Box::pin(ReceiverStream::new(rx).map(Ok)),
            None => Box::pin(futures::stream::once(async {
                Err(PipelineError::Source(
                    "BlobEventSource stream already taken; only one consumer supported".to_string(),
                ))
            })),
        }
    }
}

/// Names remembered by the poller before the oldest ones collapse into a
/// floor below which everything counts as seen.
const POLLER_MEMORY: usize = 4096;

/// Bounded record of announced object names.
///
/// Landed names sort by creation time, so the newest `capacity` names are kept
/// exactly and anything at or below the last evicted name is treated as seen.
/// Late arrivals within that window are still announced.
struct SeenNames {
    names: BTreeSet<String>,
    floor: Option<String>,
    capacity: usize,
}

impl SeenNames {
    fn new(capacity: usize) -> Self {
        Self {
            names: BTreeSet::new(),
            floor: None,
            capacity: capacity.max(1),
        }
    }

    fn contains(&self, name: &str) -> bool {
        self.floor.as_deref().is_some_and(|floor| name <= floor) || self.names.contains(name)
    }

    fn insert(&mut self, name: String) {
        self.names.insert(name);
        while self.names.len() > self.capacity {
            if let Some(oldest) = self.names.pop_first() {
                self.floor = Some(oldest);
            }
        }
    }
}

/// Watch a blob store for objects landed by other processes and notify for
/// each name not seen before. The first scan notifies for every existing
/// object, which re-ingests them idempotently after a restart.
pub fn spawn_poller(
    store: Arc<dyn BlobStore>,
    events: BlobEventSender,
    interval: Duration,
    cancel: CancellationToken,
) -> tokio::task::JoinHandle<()> {
    tokio::spawn(async move {
        let mut seen = SeenNames::new(POLLER_MEMORY);
        let mut ticker = tokio::time::interval(interval);
        ticker.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = ticker.tick() => {}
            }

            let names = match store.list().await {
                Ok(names) => names,
                Err(e) => {
                    tracing::warn!(error = %e, "blob poll failed");
                    continue;
                }
            };

            for name in names {
                if seen.contains(&name) {
                    continue;
                }
                if events.notify(&name).await.is_err() {
                    tracing::info!("notification channel closed, stopping blob poller");
                    return;
                }
                seen.insert(name);
            }
        }
    })
}
