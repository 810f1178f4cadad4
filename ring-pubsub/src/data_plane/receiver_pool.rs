//! Refcounted receivers keyed by subscribed topic.

use crate::error::PubSubError;
use crate::observability::events;
use std::collections::HashMap;
use std::future::Future;
use std::sync::Arc;
use tokio::sync::{Mutex, OnceCell};
use tracing::debug;

const COMPONENT: &str = "receiver_pool";

type StartOutcome = Arc<OnceCell<Result<(), PubSubError>>>;

struct ReceiverBinding<R> {
    ref_count: usize,
    receiver: R,
    started: StartOutcome,
}

/// Outcome of [`ReceiverPool::attach`].
pub(crate) struct Attached<R> {
    pub(crate) receiver: R,
    /// `true` when this attach created the receiver.
    pub(crate) created: bool,
    started: StartOutcome,
}

impl<R> Attached<R> {
    /// Runs `start` once per receiver. Every attacher, including the ones that
    /// arrive while it is running, sees the same outcome.
    pub(crate) async fn started<F, Fut>(&self, start: F) -> Result<(), PubSubError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<(), PubSubError>>,
    {
        self.started.get_or_init(start).await.clone()
    }
}

pub(crate) struct ReceiverPool<R> {
    receivers: Mutex<HashMap<String, ReceiverBinding<R>>>,
}

impl<R: Clone> ReceiverPool<R> {
    pub(crate) fn new() -> Self {
        Self {
            receivers: Mutex::new(HashMap::new()),
        }
    }

    /// Adds one application listener for `topic`, creating the receiver on first use.
    pub(crate) async fn attach(&self, topic: &str, create: impl FnOnce() -> R) -> Attached<R> {
        let mut receivers = self.receivers.lock().await;

        if let Some(binding) = receivers.get_mut(topic) {
            binding.ref_count += 1;
            debug!(
                event = events::RECEIVER_REUSE,
                component = COMPONENT,
                topic,
                ref_count = binding.ref_count,
                "reusing receiver"
            );
            return Attached {
                receiver: binding.receiver.clone(),
                created: false,
                started: binding.started.clone(),
            };
        }

        let receiver = create();
        let started = StartOutcome::default();
        receivers.insert(
            topic.to_string(),
            ReceiverBinding {
                ref_count: 1,
                receiver: receiver.clone(),
                started: started.clone(),
            },
        );
        Attached {
            receiver,
            created: true,
            started,
        }
    }

    /// Drops one listener for `topic`. Returns the receiver once no listener is left.
    pub(crate) async fn detach(&self, topic: &str) -> Option<R> {
        let mut receivers = self.receivers.lock().await;

        let binding = receivers.get_mut(topic)?;
        binding.ref_count -= 1;
        if binding.ref_count > 0 {
            return None;
        }
        receivers.remove(topic).map(|binding| binding.receiver)
    }

    pub(crate) async fn get(&self, topic: &str) -> Option<R> {
        self.receivers
            .lock()
            .await
            .get(topic)
            .map(|binding| binding.receiver.clone())
    }

    pub(crate) async fn drain(&self) -> Vec<R> {
        self.receivers
            .lock()
            .await
            .drain()
            .map(|(_, binding)| binding.receiver)
            .collect()
    }
}
