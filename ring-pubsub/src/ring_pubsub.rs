/********************************************************************************
 * Copyright (c) 2024 Contributors to the Eclipse Foundation
 *
 * See the NOTICE file(s) distributed with this work for additional
 * information regarding copyright ownership.
 *
 * This program and the accompanying materials are made available under the
 * terms of the Apache License Version 2.0 which is available at
 * https://www.apache.org/licenses/LICENSE-2.0
 *
 * SPDX-License-Identifier: Apache-2.0
 ********************************************************************************/

use crate::config::PubSubConfig;
use crate::control_plane::commands::PubSubCommands;
use crate::control_plane::router_context::RouterContext;
use crate::data_plane::application_listener::{ApplicationListener, Listener};
use crate::data_plane::receiver::{Receiver, ReceiverSnapshot};
use crate::data_plane::receiver_pool::ReceiverPool;
use crate::error::PubSubError;
use crate::local_bus::{BusListener, LocalBus, TopicBus};
use crate::membership::{
    Membership, MembershipEvent, PeerId, PubSubRequest, PublishRequest, NAMESPACE,
};
use crate::message::Message;
use crate::observability::events;
use crate::routing::topic_key::TopicSyntax;
use crate::runtime::ready_gate::ReadyGate;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{broadcast, Mutex};
use tracing::{debug, info, warn};

const COMPONENT: &str = "ring_pubsub";

/// Application listener registrations: (topic, listener address) to the bus adapters
/// registered for it, most recent last.
type ListenerRegistrations = HashMap<(String, usize), Vec<Arc<dyn BusListener>>>;

fn listener_address(listener: &Arc<dyn Listener>) -> usize {
    Arc::as_ptr(listener) as *const () as usize
}

/// Pub/sub instance of one ring peer.
///
/// Publishes are routed to the owner of the topic's key; subscriptions attach a
/// receiver that streams matching messages from wherever they are owned into this
/// peer's local bus.
///
/// ```
/// use std::sync::Arc;
/// use memory_ring::{MemoryCluster, RecordingListener};
/// use ring_pubsub::{Message, PubSubConfig, RingPubSub};
/// use serde_json::json;
///
/// # tokio::runtime::Runtime::new().unwrap().block_on(async {
/// let cluster = MemoryCluster::new();
/// let pubsub = RingPubSub::new(cluster.join("solo"), PubSubConfig::default());
/// let listener = Arc::new(RecordingListener::default());
///
/// pubsub.on("hello/world", listener.clone()).await.unwrap();
/// pubsub
///     .emit(Message::new("hello/world", json!({ "my": "message" })))
///     .await
///     .unwrap();
///
/// assert_eq!(listener.topics(), vec!["hello/world".to_string()]);
/// pubsub.close().await.unwrap();
/// # });
/// ```
#[derive(Clone)]
pub struct RingPubSub {
    context: Arc<RouterContext>,
    receivers: Arc<ReceiverPool<Receiver>>,
    listeners: Arc<Mutex<ListenerRegistrations>>,
    ready: Arc<ReadyGate>,
}

impl RingPubSub {
    /// Creates an instance on top of `membership` using the default [`TopicBus`].
    ///
    /// Must be called from within a Tokio runtime.
    pub fn new(membership: Arc<dyn Membership>, config: PubSubConfig) -> Self {
        let bus: Arc<dyn LocalBus> = Arc::new(TopicBus::new(config.topic_syntax.clone()));
        Self::with_bus(membership, bus, config)
    }

    /// Creates an instance delivering through a caller-provided local bus.
    pub fn with_bus(
        membership: Arc<dyn Membership>,
        bus: Arc<dyn LocalBus>,
        config: PubSubConfig,
    ) -> Self {
        let membership_events = membership.events();
        let ready = Arc::new(ReadyGate::new(membership.is_ready()));
        let context = Arc::new(RouterContext::new(membership.clone(), bus, config));

        membership.serve(NAMESPACE, Arc::new(PubSubCommands::new(context.clone())));

        if ready.is_open() {
            info!(
                event = events::INSTANCE_READY,
                component = COMPONENT,
                peer = context.me().as_str(),
                "instance ready"
            );
        } else {
            tokio::spawn(wait_until_up(
                membership,
                membership_events,
                ready.clone(),
            ));
        }

        Self {
            context,
            receivers: Arc::new(ReceiverPool::new()),
            listeners: Arc::new(Mutex::new(HashMap::new())),
            ready,
        }
    }

    pub fn whoami(&self) -> PeerId {
        self.context.me().clone()
    }

    pub fn topic_syntax(&self) -> &TopicSyntax {
        self.context.syntax()
    }

    /// Number of local-bus deliveries currently in flight.
    pub fn current(&self) -> usize {
        self.context.bus().current()
    }

    pub fn is_closing(&self) -> bool {
        self.context.is_closing()
    }

    /// Resolves once the membership service reported this peer up.
    pub async fn ready(&self) -> Result<(), PubSubError> {
        self.ready.wait().await
    }

    /// Publishes `message` through the owner of its topic's key.
    ///
    /// Resolves after every listener reached by the owner handled the message.
    pub async fn emit(&self, message: Message) -> Result<(), PubSubError> {
        self.ready.wait().await?;
        if self.context.is_closing() {
            return Err(PubSubError::Closing);
        }

        let key = self.context.syntax().derive_key(&message.topic);
        debug!(
            component = COMPONENT,
            topic = message.topic.as_str(),
            key = key.as_str(),
            "publishing"
        );

        self.context
            .membership()
            .request(
                &key,
                PubSubRequest::Publish(PublishRequest {
                    key: key.clone(),
                    msg: message,
                    replica: false,
                }),
            )
            .await
            .map(|_| ())
    }

    /// Subscribes `listener` to `topic`. Resolves once the subscription is live.
    pub async fn on(&self, topic: &str, listener: Arc<dyn Listener>) -> Result<(), PubSubError> {
        self.ready.wait().await?;
        if self.context.is_closing() {
            return Err(PubSubError::Closing);
        }

        let adapter: Arc<dyn BusListener> = Arc::new(ApplicationListener::new(listener.clone()));
        self.context.bus().on(topic, adapter.clone()).await?;
        self.listeners
            .lock()
            .await
            .entry((topic.to_string(), listener_address(&listener)))
            .or_default()
            .push(adapter.clone());

        let attached = self
            .receivers
            .attach(topic, || Receiver::new(self.context.clone(), topic))
            .await;
        if let Err(err) = attached.started(|| attached.receiver.send()).await {
            warn!(
                component = COMPONENT,
                topic,
                shared = !attached.created,
                err = %err,
                "subscription failed, rolling back listener"
            );
            self.forget_listener(topic, &listener, &adapter).await;
            if let Some(receiver) = self.receivers.detach(topic).await {
                receiver.unsubscribe();
            }
            return Err(err);
        }
        Ok(())
    }

    /// Removes one registration of `listener` for `topic`. Unknown pairs are a no-op.
    pub async fn remove_listener(
        &self,
        topic: &str,
        listener: &Arc<dyn Listener>,
    ) -> Result<(), PubSubError> {
        let adapter = {
            let mut listeners = self.listeners.lock().await;
            let registration = (topic.to_string(), listener_address(listener));
            let Some(adapters) = listeners.get_mut(&registration) else {
                return Ok(());
            };
            let adapter = adapters.pop();
            if adapters.is_empty() {
                listeners.remove(&registration);
            }
            adapter
        };
        let Some(adapter) = adapter else {
            return Ok(());
        };

        self.context.bus().remove_listener(topic, &adapter).await?;
        if let Some(receiver) = self.receivers.detach(topic).await {
            receiver.unsubscribe();
        }
        Ok(())
    }

    /// Shuts the instance down. Idempotent.
    ///
    /// New work is refused first, then receivers and inbound subscriptions are torn
    /// down, then the local bus and finally the membership service are closed.
    pub async fn close(&self) -> Result<(), PubSubError> {
        if !self.context.begin_close() {
            return Ok(());
        }

        info!(
            event = events::INSTANCE_CLOSE_START,
            component = COMPONENT,
            peer = self.context.me().as_str(),
            "closing instance"
        );

        self.ready.close();
        for receiver in self.receivers.drain().await {
            receiver.unsubscribe();
        }
        self.context.inbound().close_all().await;
        self.listeners.lock().await.clear();
        self.context.bus().close().await;
        self.context.membership().close().await;

        info!(
            event = events::INSTANCE_CLOSE_OK,
            component = COMPONENT,
            peer = self.context.me().as_str(),
            "instance closed"
        );
        Ok(())
    }

    /// State of the receiver serving `topic`, if any.
    #[doc(hidden)]
    pub async fn receiver_snapshot(&self, topic: &str) -> Option<ReceiverSnapshot> {
        self.receivers
            .get(topic)
            .await
            .map(|receiver| receiver.snapshot())
    }

    /// Number of subscriptions other peers hold against this one.
    #[doc(hidden)]
    pub fn inbound_subscriptions(&self) -> usize {
        self.context.inbound().len()
    }

    async fn forget_listener(
        &self,
        topic: &str,
        listener: &Arc<dyn Listener>,
        adapter: &Arc<dyn BusListener>,
    ) {
        {
            let mut listeners = self.listeners.lock().await;
            let registration = (topic.to_string(), listener_address(listener));
            if let Some(adapters) = listeners.get_mut(&registration) {
                adapters.retain(|registered| !Arc::ptr_eq(registered, adapter));
                if adapters.is_empty() {
                    listeners.remove(&registration);
                }
            }
        }
        let _ = self.context.bus().remove_listener(topic, adapter).await;
    }
}

async fn wait_until_up(
    membership: Arc<dyn Membership>,
    mut membership_events: broadcast::Receiver<MembershipEvent>,
    ready: Arc<ReadyGate>,
) {
    loop {
        if membership.is_ready() {
            break;
        }
        match membership_events.recv().await {
            Ok(MembershipEvent::Up) => break,
            Ok(MembershipEvent::Close) | Err(RecvError::Closed) => {
                ready.close();
                return;
            }
            Ok(_) | Err(RecvError::Lagged(_)) => continue,
        }
    }

    if ready.open() {
        info!(
            event = events::INSTANCE_READY,
            component = COMPONENT,
            peer = membership.whoami().as_str(),
            "instance ready"
        );
    }
}
