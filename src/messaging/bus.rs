use async_trait::async_trait;
use bytes::Bytes;
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, warn};

use super::{MessageHandler, MessageProducer, MessagingError, RedeliveryPolicy, Result};

struct Topic {
    tx: mpsc::UnboundedSender<Bytes>,
    rx: Option<mpsc::UnboundedReceiver<Bytes>>,
    handlers: Vec<Arc<dyn MessageHandler>>,
}

impl Topic {
    fn new() -> Self {
        let (tx, rx) = mpsc::unbounded_channel();
        Self {
            tx,
            rx: Some(rx),
            handlers: Vec::new(),
        }
    }
}

struct Inner {
    topics: Mutex<HashMap<String, Topic>>,
    policy: RedeliveryPolicy,
    started: AtomicBool,
    stopped: AtomicBool,
}

/// In-process pub/sub channel
///
/// Each topic is an unbounded FIFO. Messages published before [`start`]
/// are buffered. Once started, every message is handed to each handler of
/// its topic in a separate tokio task; a failing handler gets the message
/// again after the policy's backoff until it succeeds or the attempts run
/// out, at which point the message is dropped with an error log.
///
/// [`start`]: InMemoryBus::start
#[derive(Clone)]
pub struct InMemoryBus {
    inner: Arc<Inner>,
}

impl InMemoryBus {
    pub fn new(policy: RedeliveryPolicy) -> Self {
        Self {
            inner: Arc::new(Inner {
                topics: Mutex::new(HashMap::new()),
                policy,
                started: AtomicBool::new(false),
                stopped: AtomicBool::new(false),
            }),
        }
    }

    /// Subscribe `handler` to `topic`; only allowed before [`Self::start`]
    pub fn register_handler(&self, topic: &str, handler: Arc<dyn MessageHandler>) -> Result<()> {
        if self.inner.started.load(Ordering::SeqCst) {
            return Err(MessagingError::ConsumerStarted(topic.to_string()));
        }

        let mut topics = self.lock_topics()?;
        topics
            .entry(topic.to_string())
            .or_insert_with(Topic::new)
            .handlers
            .push(handler);

        info!(topic, "Registered message handler");
        Ok(())
    }

    /// Start consuming every known topic until `cancel` fires
    ///
    /// The returned handle completes once all in-flight deliveries have
    /// finished.
    pub fn start(&self, cancel: CancellationToken) -> Result<JoinHandle<()>> {
        if self.inner.started.swap(true, Ordering::SeqCst) {
            return Err(MessagingError::ConsumerStarted("*".to_string()));
        }

        let consumers: Vec<_> = {
            let mut topics = self.lock_topics()?;
            topics
                .iter_mut()
                .filter_map(|(name, topic)| {
                    topic
                        .rx
                        .take()
                        .map(|rx| (Arc::<str>::from(name.as_str()), rx, topic.handlers.clone()))
                })
                .collect()
        };

        let inner = Arc::clone(&self.inner);
        let handle = tokio::spawn(async move {
            let tracker = TaskTracker::new();

            for (topic, rx, handlers) in consumers {
                tracker.spawn(consume_topic(
                    topic,
                    rx,
                    handlers,
                    inner.policy,
                    tracker.clone(),
                    cancel.clone(),
                ));
            }

            cancel.cancelled().await;
            tracker.close();
            tracker.wait().await;

            inner.stopped.store(true, Ordering::SeqCst);
            info!("Message bus stopped");
        });

        Ok(handle)
    }

    fn lock_topics(&self) -> Result<std::sync::MutexGuard<'_, HashMap<String, Topic>>> {
        self.inner
            .topics
            .lock()
            .map_err(|_| MessagingError::ConnectionError("topic table poisoned".to_string()))
    }
}

#[async_trait]
impl MessageProducer for InMemoryBus {
    async fn publish(&self, topic: &str, message: Vec<u8>) -> Result<()> {
        if self.inner.stopped.load(Ordering::SeqCst) {
            return Err(MessagingError::PublishFailed("bus is stopped".to_string()));
        }

        let mut topics = self.lock_topics()?;
        let started = self.inner.started.load(Ordering::SeqCst);

        if !topics.contains_key(topic) {
            if started {
                debug!(topic, "No subscribers, message dropped");
                return Ok(());
            }
            topics.insert(topic.to_string(), Topic::new());
        }

        let size = message.len();
        topics[topic]
            .tx
            .send(Bytes::from(message))
            .map_err(|_| MessagingError::PublishFailed(format!("topic '{}' is closed", topic)))?;

        debug!(topic, size, "Published message");
        Ok(())
    }

    async fn health(&self) -> bool {
        !self.inner.stopped.load(Ordering::SeqCst)
    }
}

async fn consume_topic(
    topic: Arc<str>,
    mut rx: mpsc::UnboundedReceiver<Bytes>,
    handlers: Vec<Arc<dyn MessageHandler>>,
    policy: RedeliveryPolicy,
    tracker: TaskTracker,
    cancel: CancellationToken,
) {
    debug!(topic = %topic, handlers = handlers.len(), "Topic consumer started");

    loop {
        let payload = tokio::select! {
            _ = cancel.cancelled() => break,
            message = rx.recv() => match message {
                Some(payload) => payload,
                None => break,
            },
        };

        if handlers.is_empty() {
            debug!(topic = %topic, "No handlers, message dropped");
            continue;
        }

        for handler in &handlers {
            tracker.spawn(deliver(
                Arc::clone(&topic),
                payload.clone(),
                Arc::clone(handler),
                policy,
                cancel.clone(),
            ));
        }
    }

    debug!(topic = %topic, "Topic consumer stopped");
}

async fn deliver(
    topic: Arc<str>,
    payload: Bytes,
    handler: Arc<dyn MessageHandler>,
    policy: RedeliveryPolicy,
    cancel: CancellationToken,
) {
    let max_attempts = policy.max_attempts.max(1);

    for attempt in 1..=max_attempts {
        let err = match handler.handle(&topic, &payload).await {
            Ok(()) => return,
            Err(e) => e,
        };

        if attempt == max_attempts {
            error!(
                topic = %topic,
                attempts = attempt,
                error = %err,
                "Message handler kept failing, dropping message"
            );
            return;
        }

        warn!(topic = %topic, attempt, error = %err, "Message handler failed, redelivering");

        tokio::select! {
            _ = cancel.cancelled() => {
                warn!(topic = %topic, "Shutdown during redelivery backoff, message dropped");
                return;
            }
            _ = tokio::time::sleep(policy.backoff) => {}
        }
    }
}
