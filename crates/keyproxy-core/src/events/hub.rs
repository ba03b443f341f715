use std::future::Future;
use std::pin::Pin;
use std::sync::Arc;

use tokio::sync::{RwLock, broadcast};

use super::types::Event;

pub trait EventSink: Send + Sync {
    fn write<'a>(&'a self, event: &'a Event) -> Pin<Box<dyn Future<Output = ()> + Send + 'a>>;
}

/// Broadcast hub for structured pool/checker/queue events.
///
/// Every `emit` both fans out to `subscribe`rs (for in-process observers,
/// e.g. an admin SSE endpoint) and pushes to registered sinks (for
/// out-of-process logging/metrics). A lagged broadcast receiver simply misses
/// events; sinks never block `emit` since each write runs on its own task.
#[derive(Clone)]
pub struct EventHub {
    inner: Arc<Inner>,
}

struct Inner {
    tx: broadcast::Sender<Event>,
    sinks: RwLock<Vec<Arc<dyn EventSink>>>,
}

impl EventHub {
    pub fn new(buffer: usize) -> Self {
        let (tx, _) = broadcast::channel(buffer);
        Self {
            inner: Arc::new(Inner {
                tx,
                sinks: RwLock::new(Vec::new()),
            }),
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<Event> {
        self.inner.tx.subscribe()
    }

    pub async fn add_sink(&self, sink: Arc<dyn EventSink>) {
        self.inner.sinks.write().await.push(sink);
    }

    pub async fn emit(&self, event: Event) {
        let _ = self.inner.tx.send(event.clone());
        let sinks = self.inner.sinks.read().await.clone();
        for sink in sinks {
            let event_ref = event.clone();
            tokio::spawn(async move {
                sink.write(&event_ref).await;
            });
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::types::CredentialEvent;
    use crate::service::Service;

    #[tokio::test]
    async fn subscribers_receive_emitted_events() {
        let hub = EventHub::new(16);
        let mut rx = hub.subscribe();
        hub.emit(Event::Credential(CredentialEvent::Rechecked {
            at: time::OffsetDateTime::now_utc(),
            service: Service::OpenAI,
            hash: "abc".into(),
        }))
        .await;
        let received = rx.recv().await.unwrap();
        match received {
            Event::Credential(CredentialEvent::Rechecked { hash, .. }) => assert_eq!(hash, "abc"),
            _ => panic!("wrong event"),
        }
    }
}
