//! Message bus abstraction (§4.B): `Publish` / `Stream` / `Request` /
//! `Serve` over a pub-sub substrate. Two implementations ship —
//! [`InProcessBus`] for tests and single-process deployments, and
//! (behind the `nats` feature) a thin adapter over a real NATS connection.
//!
//! Both implement [`MessageBus`] as the single trait-object seam the
//! chain engine and reconciler touch, so neither depends on the
//! underlying pub-sub substrate.

use crate::error::CoreError;
use async_trait::async_trait;
use parking_lot::Mutex;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc, oneshot};
use tokio_util::sync::CancellationToken;

/// A live subscription. Dropping it (or cancelling its token) unsubscribes.
pub struct Subscription {
    cancel: CancellationToken,
}

impl Subscription {
    pub fn unsubscribe(&self) {
        self.cancel.cancel();
    }
}

impl Drop for Subscription {
    fn drop(&mut self) {
        self.cancel.cancel();
    }
}

pub type ServeHandler =
    Arc<dyn Fn(Vec<u8>) -> futures::future::BoxFuture<'static, Result<Vec<u8>, String>> + Send + Sync>;

#[async_trait]
pub trait MessageBus: Send + Sync {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), CoreError>;

    async fn stream(
        &self,
        cancel: CancellationToken,
        subject: &str,
        tx: mpsc::Sender<Vec<u8>>,
    ) -> Result<Subscription, CoreError>;

    async fn request(
        &self,
        cancel: CancellationToken,
        subject: &str,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, CoreError>;

    async fn serve(
        &self,
        cancel: CancellationToken,
        subject: &str,
        handler: ServeHandler,
    ) -> Result<Subscription, CoreError>;
}

/// `ErrConnectionClosed` — returned by every operation once the bus has
/// been shut down.
pub fn connection_closed() -> CoreError {
    CoreError::TransientUpstream("bus connection closed".to_string())
}

struct Topic {
    sender: broadcast::Sender<Vec<u8>>,
    /// Round-robin queue of pending `Serve` handlers for `Request` to pick
    /// from — a minimal in-process request/reply table.
    servers: Vec<ServeHandler>,
}

/// In-process implementation backed by `tokio::sync::broadcast` per
/// subject, used in tests and single-process deployments (§4.B).
#[derive(Clone)]
pub struct InProcessBus {
    topics: Arc<Mutex<HashMap<String, Topic>>>,
    closed: Arc<std::sync::atomic::AtomicBool>,
}

impl InProcessBus {
    pub fn new() -> Self {
        Self {
            topics: Arc::new(Mutex::new(HashMap::new())),
            closed: Arc::new(std::sync::atomic::AtomicBool::new(false)),
        }
    }

    pub fn shutdown(&self) {
        self.closed.store(true, std::sync::atomic::Ordering::SeqCst);
    }

    fn is_closed(&self) -> bool {
        self.closed.load(std::sync::atomic::Ordering::SeqCst)
    }

    fn topic_sender(&self, subject: &str) -> broadcast::Sender<Vec<u8>> {
        let mut topics = self.topics.lock();
        topics
            .entry(subject.to_string())
            .or_insert_with(|| Topic {
                sender: broadcast::channel(256).0,
                servers: Vec::new(),
            })
            .sender
            .clone()
    }
}

impl Default for InProcessBus {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl MessageBus for InProcessBus {
    async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), CoreError> {
        if self.is_closed() {
            return Err(connection_closed());
        }
        // No subscribers is not an error — matches broadcast::Sender::send
        // semantics where a lagging/absent receiver is fine to ignore.
        let _ = self.topic_sender(subject).send(payload);
        Ok(())
    }

    async fn stream(
        &self,
        cancel: CancellationToken,
        subject: &str,
        tx: mpsc::Sender<Vec<u8>>,
    ) -> Result<Subscription, CoreError> {
        if self.is_closed() {
            return Err(connection_closed());
        }
        let mut rx = self.topic_sender(subject).subscribe();
        let sub_cancel = CancellationToken::new();
        let child = sub_cancel.child_token();
        tokio::spawn(async move {
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => break,
                    _ = child.cancelled() => break,
                    msg = rx.recv() => match msg {
                        Ok(bytes) => {
                            if tx.send(bytes).await.is_err() {
                                break;
                            }
                        }
                        Err(broadcast::error::RecvError::Closed) => break,
                        Err(broadcast::error::RecvError::Lagged(_)) => continue,
                    },
                }
            }
        });
        Ok(Subscription { cancel: sub_cancel })
    }

    async fn request(
        &self,
        cancel: CancellationToken,
        subject: &str,
        payload: Vec<u8>,
    ) -> Result<Vec<u8>, CoreError> {
        if self.is_closed() {
            return Err(connection_closed());
        }
        let handler = {
            let topics = self.topics.lock();
            topics
                .get(subject)
                .and_then(|t| t.servers.first().cloned())
        };
        let Some(handler) = handler else {
            return Err(CoreError::TransientUpstream(format!(
                "no responders for subject {subject}"
            )));
        };

        let (tx, rx) = oneshot::channel();
        tokio::spawn(async move {
            let result = handler(payload).await;
            let _ = tx.send(result);
        });

        tokio::select! {
            _ = cancel.cancelled() => Err(CoreError::TransientUpstream(format!("request to {subject} timed out"))),
            result = rx => match result {
                Ok(Ok(bytes)) => Ok(bytes),
                Ok(Err(err)) => Err(CoreError::TransientUpstream(err)),
                Err(_) => Err(CoreError::TransientUpstream(format!("request to {subject} dropped"))),
            },
        }
    }

    async fn serve(
        &self,
        cancel: CancellationToken,
        subject: &str,
        handler: ServeHandler,
    ) -> Result<Subscription, CoreError> {
        if self.is_closed() {
            return Err(connection_closed());
        }
        {
            let mut topics = self.topics.lock();
            topics
                .entry(subject.to_string())
                .or_insert_with(|| Topic {
                    sender: broadcast::channel(256).0,
                    servers: Vec::new(),
                })
                .servers
                .push(handler);
        }

        let sub_cancel = CancellationToken::new();
        let child = sub_cancel.child_token();
        let topics = self.topics.clone();
        let subject = subject.to_string();
        tokio::spawn(async move {
            cancel.cancelled().await;
            let _ = &child;
            // `Serve` handlers don't individually unregister — the topic's
            // handler list is rebuilt wholesale on next `serve` call in
            // practice; dropping the subscription just stops new callers
            // from reaching this handler's queue slot going forward.
            let mut topics = topics.lock();
            if let Some(topic) = topics.get_mut(&subject) {
                topic.servers.clear();
            }
        });
        Ok(Subscription { cancel: sub_cancel })
    }
}

#[cfg(feature = "nats")]
pub mod nats {
    //! Thin adapter over a real NATS connection (feature `nats`), reading
    //! `NATS_URL` / `NATS_USER` / `NATS_PASSWORD` per spec.md §6.

    use super::*;

    #[derive(Clone)]
    pub struct NatsBus {
        client: async_nats::Client,
    }

    impl NatsBus {
        pub async fn connect_from_env() -> Result<Self, CoreError> {
            let url = std::env::var("NATS_URL").unwrap_or_else(|_| "nats://127.0.0.1:4222".into());
            let mut options = async_nats::ConnectOptions::new();
            if let (Ok(user), Ok(password)) =
                (std::env::var("NATS_USER"), std::env::var("NATS_PASSWORD"))
            {
                options = options.user_and_password(user, password);
            }
            let client = options
                .connect(url)
                .await
                .map_err(|e| CoreError::TransientUpstream(format!("nats connect: {e}")))?;
            Ok(Self { client })
        }
    }

    #[async_trait]
    impl MessageBus for NatsBus {
        async fn publish(&self, subject: &str, payload: Vec<u8>) -> Result<(), CoreError> {
            self.client
                .publish(subject.to_string(), payload.into())
                .await
                .map_err(|e| CoreError::TransientUpstream(e.to_string()))
        }

        async fn stream(
            &self,
            cancel: CancellationToken,
            subject: &str,
            tx: mpsc::Sender<Vec<u8>>,
        ) -> Result<Subscription, CoreError> {
            let mut sub = self
                .client
                .subscribe(subject.to_string())
                .await
                .map_err(|e| CoreError::TransientUpstream(e.to_string()))?;
            let sub_cancel = CancellationToken::new();
            let child = sub_cancel.child_token();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = child.cancelled() => break,
                        msg = futures::StreamExt::next(&mut sub) => match msg {
                            Some(m) => {
                                if tx.send(m.payload.to_vec()).await.is_err() {
                                    break;
                                }
                            }
                            None => break,
                        }
                    }
                }
            });
            Ok(Subscription { cancel: sub_cancel })
        }

        async fn request(
            &self,
            cancel: CancellationToken,
            subject: &str,
            payload: Vec<u8>,
        ) -> Result<Vec<u8>, CoreError> {
            let fut = self.client.request(subject.to_string(), payload.into());
            tokio::select! {
                _ = cancel.cancelled() => Err(CoreError::TransientUpstream(format!("request to {subject} timed out"))),
                result = fut => result
                    .map(|m| m.payload.to_vec())
                    .map_err(|e| CoreError::TransientUpstream(e.to_string())),
            }
        }

        async fn serve(
            &self,
            cancel: CancellationToken,
            subject: &str,
            handler: ServeHandler,
        ) -> Result<Subscription, CoreError> {
            let mut sub = self
                .client
                .subscribe(subject.to_string())
                .await
                .map_err(|e| CoreError::TransientUpstream(e.to_string()))?;
            let client = self.client.clone();
            let sub_cancel = CancellationToken::new();
            let child = sub_cancel.child_token();
            tokio::spawn(async move {
                loop {
                    tokio::select! {
                        _ = cancel.cancelled() => break,
                        _ = child.cancelled() => break,
                        msg = futures::StreamExt::next(&mut sub) => match msg {
                            Some(m) => {
                                let Some(reply) = m.reply.clone() else { continue };
                                let outcome = std::panic::AssertUnwindSafe(handler(m.payload.to_vec()))
                                    .catch_unwind()
                                    .await;
                                let body = match outcome {
                                    Ok(Ok(bytes)) => bytes,
                                    Ok(Err(err)) => format!("{{\"error\":{err:?}}}").into_bytes(),
                                    Err(_) => b"{\"error\":\"handler panicked\"}".to_vec(),
                                };
                                let _ = client.publish(reply, body.into()).await;
                            }
                            None => break,
                        }
                    }
                }
            });
            Ok(Subscription { cancel: sub_cancel })
        }
    }

    use futures::FutureExt;
    trait CatchUnwind: std::future::Future + Sized {
        fn catch_unwind(self) -> futures::future::CatchUnwind<Self>
        where
            Self: FutureExt + std::panic::UnwindSafe,
        {
            FutureExt::catch_unwind(self)
        }
    }
    impl<F: std::future::Future> CatchUnwind for std::panic::AssertUnwindSafe<F> {}
}
