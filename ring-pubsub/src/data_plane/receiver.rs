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

//! Subscriber-side owner of the delivery streams feeding one topic into the local bus.
//!
//! A keyed topic holds one primary stream from the key owner plus a standby stream
//! from the owner's successor. A low-wildcard topic holds one stream per remote
//! peer. When this peer owns the key itself no stream is opened at all.

use crate::control_plane::migration_tracker::{MigrationTracker, TrackerTransition};
use crate::control_plane::router_context::RouterContext;
use crate::data_plane::stream::{delivery_channel, DeliveryFrame, InboundStream, StreamCloser};
use crate::error::{PubSubError, StreamError};
use crate::membership::{MembershipEvent, PeerId, PubSubReply, PubSubRequest, SubscribeRequest};
use crate::observability::{events, fields};
use futures::future::join_all;
use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::broadcast::error::RecvError;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};
use uuid::Uuid;

const COMPONENT: &str = "receiver";

/// Lifecycle of a [`Receiver`].
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ReceiverState {
    /// Created, first subscription not answered yet.
    Pending,
    /// At least one remote stream is live.
    Active,
    /// This peer owns the key; deliveries arrive through the local bus directly.
    Local,
    /// The primary stream died and a new one is being negotiated.
    Resubscribing,
    Destroyed,
}

/// Point-in-time view of a receiver, for diagnostics and tests.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct ReceiverSnapshot {
    pub state: ReceiverState,
    pub streams: usize,
    /// Peers holding a wildcard stream for this topic.
    pub peers: Vec<PeerId>,
    pub standby: Option<PeerId>,
    /// Failure behind the most recent resubscribe, if any.
    pub last_failure: Option<PubSubError>,
}

#[derive(Clone, Debug, PartialEq, Eq, Hash)]
enum StreamRole {
    Primary,
    Standby(PeerId),
    Peer(PeerId),
}

impl StreamRole {
    fn label(&self) -> &'static str {
        match self {
            StreamRole::Primary => "primary",
            StreamRole::Standby(_) => "standby",
            StreamRole::Peer(_) => "peer",
        }
    }

    fn peer(&self) -> Option<&str> {
        match self {
            StreamRole::Primary => None,
            StreamRole::Standby(peer) | StreamRole::Peer(peer) => Some(peer),
        }
    }
}

struct StreamSlot {
    generation: u64,
    closer: StreamCloser,
}

struct ReceiverSlots {
    state: ReceiverState,
    streams: HashMap<StreamRole, StreamSlot>,
    standby_target: Option<PeerId>,
    next_generation: u64,
    last_failure: Option<PubSubError>,
}

struct ReceiverInner {
    id: String,
    topic: String,
    key: Option<String>,
    context: Arc<RouterContext>,
    slots: Mutex<ReceiverSlots>,
    cancellation: CancellationToken,
}

#[derive(Clone)]
pub(crate) struct Receiver {
    inner: Arc<ReceiverInner>,
}

impl Receiver {
    pub(crate) fn new(context: Arc<RouterContext>, topic: &str) -> Self {
        let syntax = context.syntax();
        let key = (!syntax.is_low_wildcard(topic)).then(|| syntax.derive_key(topic));
        let id = Uuid::new_v4().to_string();

        debug!(
            event = events::RECEIVER_CREATE,
            component = COMPONENT,
            receiver_id = id.as_str(),
            topic,
            key = fields::format_key(key.as_deref()).as_str(),
            "creating receiver"
        );

        Self {
            inner: Arc::new(ReceiverInner {
                id,
                topic: topic.to_string(),
                key,
                context,
                slots: Mutex::new(ReceiverSlots {
                    state: ReceiverState::Pending,
                    streams: HashMap::new(),
                    standby_target: None,
                    next_generation: 0,
                    last_failure: None,
                }),
                cancellation: CancellationToken::new(),
            }),
        }
    }

    pub(crate) fn topic(&self) -> &str {
        &self.inner.topic
    }

    /// Opens the initial subscription(s). Retryable failures are retried in the background.
    pub(crate) async fn send(&self) -> Result<(), PubSubError> {
        let inner = &self.inner;
        if inner.cancellation.is_cancelled() {
            return Err(PubSubError::Destroyed);
        }

        let Some(key) = inner.key.clone() else {
            inner.clone().start_peer_watch();
            let peers = inner.context.membership().peers(false);
            join_all(
                peers
                    .into_iter()
                    .map(|peer| inner.clone().open_with_retry(StreamRole::Peer(peer), 1)),
            )
            .await;
            inner.mark_active();
            return Ok(());
        };

        if inner.context.membership().allocated_to_me(&key) {
            inner.clone().enter_local(key);
            return Ok(());
        }

        match inner.clone().open_stream(StreamRole::Primary, 1).await {
            Ok(()) => Ok(()),
            Err(err) if err.is_retryable() => {
                warn!(
                    event = events::RECEIVER_SUBSCRIBE_FAILED,
                    component = COMPONENT,
                    receiver_id = inner.id.as_str(),
                    topic = inner.topic.as_str(),
                    err = %err,
                    "initial subscribe failed, retrying in background"
                );
                inner.set_state(ReceiverState::Resubscribing);
                inner.clone().schedule_retry(StreamRole::Primary, 2, err);
                Ok(())
            }
            Err(err) => Err(err),
        }
    }

    /// Destroys every stream. Idempotent.
    pub(crate) fn unsubscribe(&self) {
        let inner = &self.inner;

        let drained: Vec<StreamSlot> = {
            let mut slots = inner.lock();
            if slots.state == ReceiverState::Destroyed {
                return;
            }
            slots.state = ReceiverState::Destroyed;
            inner.cancellation.cancel();
            slots.standby_target = None;
            slots.streams.drain().map(|(_, slot)| slot).collect()
        };
        for slot in &drained {
            slot.closer.destroy();
        }

        info!(
            event = events::RECEIVER_DESTROY,
            component = COMPONENT,
            receiver_id = inner.id.as_str(),
            topic = inner.topic.as_str(),
            streams = drained.len(),
            "receiver destroyed"
        );
    }

    pub(crate) fn snapshot(&self) -> ReceiverSnapshot {
        let slots = self.inner.lock();
        let mut peers: Vec<PeerId> = slots
            .streams
            .keys()
            .filter_map(|role| match role {
                StreamRole::Peer(peer) => Some(peer.clone()),
                _ => None,
            })
            .collect();
        peers.sort();

        ReceiverSnapshot {
            state: slots.state,
            streams: slots.streams.len(),
            peers,
            standby: slots.standby_target.clone(),
            last_failure: slots.last_failure.clone(),
        }
    }
}

impl ReceiverInner {
    fn lock(&self) -> MutexGuard<'_, ReceiverSlots> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn set_state(&self, state: ReceiverState) {
        let mut slots = self.lock();
        if slots.state != ReceiverState::Destroyed {
            slots.state = state;
        }
    }

    fn mark_active(&self) {
        let mut slots = self.lock();
        if matches!(
            slots.state,
            ReceiverState::Pending | ReceiverState::Resubscribing
        ) {
            slots.state = ReceiverState::Active;
        }
    }

    fn has_stream(&self, role: &StreamRole) -> bool {
        self.lock().streams.contains_key(role)
    }

    /// Whether a retry for `role` still makes sense.
    fn still_wanted(&self, role: &StreamRole) -> bool {
        if self.cancellation.is_cancelled() || self.context.is_closing() {
            return false;
        }
        match role {
            StreamRole::Primary => self.lock().state != ReceiverState::Local,
            StreamRole::Standby(peer) => {
                let slots = self.lock();
                slots.standby_target.as_deref() == Some(peer.as_str())
                    && !slots.streams.contains_key(role)
            }
            StreamRole::Peer(peer) => {
                self.context.membership().peers(false).contains(peer) && !self.has_stream(role)
            }
        }
    }

    async fn open_stream(
        self: Arc<Self>,
        role: StreamRole,
        attempt: u32,
    ) -> Result<(), PubSubError> {
        if self.cancellation.is_cancelled() {
            return Err(PubSubError::Destroyed);
        }

        let membership = self.context.membership();
        let (writer, inbound) = delivery_channel(self.context.config().stream_capacity);
        let request = PubSubRequest::Subscribe(SubscribeRequest {
            topic: self.topic.clone(),
            key: self.key.clone(),
            from: self.context.me().clone(),
            replica: matches!(role, StreamRole::Standby(_)),
            messages: Some(Arc::new(writer)),
        });

        debug!(
            event = events::RECEIVER_SUBSCRIBE_START,
            component = COMPONENT,
            receiver_id = self.id.as_str(),
            topic = self.topic.as_str(),
            role = role.label(),
            peer = role.peer().unwrap_or(fields::NONE),
            attempt,
            "subscribing"
        );

        let reply = match (&role, &self.key) {
            (StreamRole::Primary, Some(key)) => membership.request(key, request).await,
            (StreamRole::Primary, None) => Err(PubSubError::Transport(
                "primary stream requires a routing key".to_string(),
            )),
            (StreamRole::Standby(peer), _) | (StreamRole::Peer(peer), _) => {
                match membership.peer_conn(peer) {
                    Ok(connection) => connection.request(request).await,
                    Err(err) => Err(err),
                }
            }
        };

        let replica = match reply {
            Ok(PubSubReply::Subscribed { replica }) => replica,
            Ok(other) => {
                inbound.destroy();
                return Err(PubSubError::Transport(format!(
                    "unexpected reply to subscribe: {other:?}"
                )));
            }
            Err(err) => {
                inbound.destroy();
                debug!(
                    event = events::RECEIVER_SUBSCRIBE_FAILED,
                    component = COMPONENT,
                    receiver_id = self.id.as_str(),
                    topic = self.topic.as_str(),
                    role = role.label(),
                    attempt,
                    err = %err,
                    "subscribe failed"
                );
                return Err(err);
            }
        };

        let generation = {
            let mut slots = self.lock();
            if self.cancellation.is_cancelled() {
                drop(slots);
                inbound.destroy();
                return Err(PubSubError::Destroyed);
            }
            if let StreamRole::Standby(peer) = &role {
                if slots.standby_target.as_deref() != Some(peer.as_str()) {
                    drop(slots);
                    inbound.destroy();
                    return Ok(());
                }
            }

            let generation = slots.next_generation;
            slots.next_generation += 1;
            let replaced = slots.streams.insert(
                role.clone(),
                StreamSlot {
                    generation,
                    closer: inbound.closer(),
                },
            );
            if let Some(replaced) = replaced {
                replaced.closer.destroy();
            }
            if matches!(
                slots.state,
                ReceiverState::Pending | ReceiverState::Resubscribing
            ) {
                slots.state = ReceiverState::Active;
            }
            generation
        };

        info!(
            event = events::RECEIVER_SUBSCRIBE_OK,
            component = COMPONENT,
            receiver_id = self.id.as_str(),
            topic = self.topic.as_str(),
            role = role.label(),
            peer = role.peer().unwrap_or(fields::NONE),
            replica = fields::format_peer(replica.as_ref()).as_str(),
            "stream established"
        );

        let is_primary = role == StreamRole::Primary;
        tokio::spawn(self.clone().pump(role, generation, attempt, inbound));
        if is_primary {
            self.link_standby(replica);
        }
        Ok(())
    }

    async fn open_with_retry(self: Arc<Self>, role: StreamRole, attempt: u32) {
        match self.clone().open_stream(role.clone(), attempt).await {
            Ok(()) | Err(PubSubError::Destroyed) => {}
            Err(err) => {
                warn!(
                    event = events::RECEIVER_SUBSCRIBE_FAILED,
                    component = COMPONENT,
                    receiver_id = self.id.as_str(),
                    topic = self.topic.as_str(),
                    role = role.label(),
                    peer = role.peer().unwrap_or(fields::NONE),
                    attempt,
                    err = %err,
                    "subscribe failed, scheduling retry"
                );
                self.schedule_retry(role, attempt + 1, err);
            }
        }
    }

    /// Feeds frames of one stream into the local bus until it closes.
    async fn pump(
        self: Arc<Self>,
        role: StreamRole,
        generation: u64,
        attempt: u32,
        mut inbound: InboundStream,
    ) {
        let opened_at = Instant::now();

        while let Some(frame) = inbound.next().await {
            let (frame, ack) = frame.into_parts();
            match frame {
                DeliveryFrame::Message(message) => {
                    let delivered = self.context.deliver_locally(message, false).await;
                    if let Err(err) = &delivered {
                        warn!(
                            event = events::RECEIVER_DELIVER_FAILED,
                            component = COMPONENT,
                            receiver_id = self.id.as_str(),
                            topic = self.topic.as_str(),
                            err = %err,
                            "local delivery failed"
                        );
                    }
                    ack.ack(delivered.map_err(|err| StreamError::Rejected(err.to_string())));
                }
                DeliveryFrame::Replica(successor) => {
                    ack.ack(Ok(()));
                    if role == StreamRole::Primary {
                        self.link_standby(successor);
                    }
                }
            }
        }

        self.on_stream_closed(role, generation, attempt, opened_at.elapsed());
    }

    fn on_stream_closed(
        self: Arc<Self>,
        role: StreamRole,
        generation: u64,
        attempt: u32,
        lived: Duration,
    ) {
        let current = {
            let mut slots = self.lock();
            let current = slots
                .streams
                .get(&role)
                .is_some_and(|slot| slot.generation == generation);
            if current {
                slots.streams.remove(&role);
                if role == StreamRole::Primary && slots.state == ReceiverState::Active {
                    slots.state = ReceiverState::Resubscribing;
                }
            }
            current
        };

        debug!(
            event = events::RECEIVER_STREAM_CLOSED,
            component = COMPONENT,
            receiver_id = self.id.as_str(),
            topic = self.topic.as_str(),
            role = role.label(),
            peer = role.peer().unwrap_or(fields::NONE),
            lived_ms = lived.as_millis() as u64,
            "stream closed"
        );

        if !current || !self.still_wanted(&role) {
            return;
        }

        let next_attempt = if lived >= self.context.config().stable_stream_after() {
            1
        } else {
            attempt + 1
        };
        self.schedule_retry(
            role,
            next_attempt,
            PubSubError::StreamFailure(StreamError::Closed),
        );
    }

    fn schedule_retry(self: Arc<Self>, role: StreamRole, attempt: u32, cause: PubSubError) {
        tokio::spawn(self.retry(role, attempt, cause));
    }

    /// Resubscribes `role` until it succeeds or `attempt` exceeds the retry budget.
    async fn retry(self: Arc<Self>, role: StreamRole, mut attempt: u32, mut cause: PubSubError) {
        let config = self.context.config();

        loop {
            self.lock().last_failure = Some(cause.clone());
            if attempt > config.max_resubscribe_attempts {
                warn!(
                    event = events::RECEIVER_RESUBSCRIBE_ABANDONED,
                    component = COMPONENT,
                    receiver_id = self.id.as_str(),
                    topic = self.topic.as_str(),
                    role = role.label(),
                    peer = role.peer().unwrap_or(fields::NONE),
                    attempt,
                    reason = fields::REASON_RETRIES_EXHAUSTED,
                    err = %cause,
                    "giving up on stream"
                );
                return;
            }

            tokio::select! {
                _ = self.cancellation.cancelled() => return,
                _ = tokio::time::sleep(config.resubscribe_delay()) => {}
            }
            if !self.still_wanted(&role) {
                return;
            }

            if let (StreamRole::Primary, Some(key)) = (&role, &self.key) {
                if self.context.membership().allocated_to_me(key) {
                    self.clone().enter_local(key.clone());
                    return;
                }
            }

            info!(
                event = events::RECEIVER_RESUBSCRIBE,
                component = COMPONENT,
                receiver_id = self.id.as_str(),
                topic = self.topic.as_str(),
                role = role.label(),
                peer = role.peer().unwrap_or(fields::NONE),
                attempt,
                cause = %cause,
                "resubscribing"
            );

            match self.clone().open_stream(role.clone(), attempt).await {
                Ok(()) | Err(PubSubError::Destroyed) => return,
                Err(err) => {
                    attempt += 1;
                    cause = err;
                }
            }
        }
    }

    /// Points the standby stream at `successor`, replacing any previous one.
    fn link_standby(self: &Arc<Self>, successor: Option<PeerId>) {
        let successor = successor.filter(|peer| peer != self.context.me());

        let superseded = {
            let mut slots = self.lock();
            if self.cancellation.is_cancelled()
                || slots.state == ReceiverState::Local
                || slots.standby_target == successor
            {
                return;
            }
            let previous = std::mem::replace(&mut slots.standby_target, successor.clone());
            previous.and_then(|peer| slots.streams.remove(&StreamRole::Standby(peer)))
        };
        if let Some(slot) = superseded {
            slot.closer.destroy();
        }

        debug!(
            event = events::RECEIVER_STANDBY_LINK,
            component = COMPONENT,
            receiver_id = self.id.as_str(),
            topic = self.topic.as_str(),
            replica = fields::format_peer(successor.as_ref()).as_str(),
            "linking standby stream"
        );

        if let Some(peer) = successor {
            tokio::spawn(self.clone().open_with_retry(StreamRole::Standby(peer), 1));
        }
    }

    /// Switches to local delivery while this peer owns `key`.
    fn enter_local(self: Arc<Self>, key: String) {
        let dropped: Vec<StreamSlot> = {
            let mut slots = self.lock();
            if self.cancellation.is_cancelled() {
                return;
            }
            slots.state = ReceiverState::Local;
            slots.standby_target = None;
            let roles: Vec<StreamRole> = slots
                .streams
                .keys()
                .filter(|role| matches!(role, StreamRole::Primary | StreamRole::Standby(_)))
                .cloned()
                .collect();
            roles
                .iter()
                .filter_map(|role| slots.streams.remove(role))
                .collect()
        };
        for slot in dropped {
            slot.closer.destroy();
        }

        info!(
            event = events::RECEIVER_LOCAL,
            component = COMPONENT,
            receiver_id = self.id.as_str(),
            topic = self.topic.as_str(),
            key = key.as_str(),
            "key owned locally, no stream needed"
        );

        let membership = self.context.membership().clone();
        let mut tracker = MigrationTracker::owner(membership.as_ref(), &key);
        if !membership.allocated_to_me(&key) {
            tracker.end();
            self.leave_local(key);
            return;
        }

        tokio::spawn(async move {
            loop {
                let transition = tokio::select! {
                    _ = self.cancellation.cancelled() => break,
                    transition = tracker.next_transition(membership.as_ref()) => transition,
                };
                match transition {
                    Some(TrackerTransition::Moved { .. }) => {
                        tracker.end();
                        self.leave_local(key);
                        break;
                    }
                    Some(_) => continue,
                    None => break,
                }
            }
        });
    }

    fn leave_local(self: Arc<Self>, key: String) {
        {
            let mut slots = self.lock();
            if slots.state != ReceiverState::Local {
                return;
            }
            slots.state = ReceiverState::Resubscribing;
        }
        self.schedule_retry(StreamRole::Primary, 1, PubSubError::NotAllocated(key));
    }

    /// Opens a stream to every peer that joins while a wildcard receiver is alive.
    fn start_peer_watch(self: Arc<Self>) {
        let mut membership_events = self.context.membership().events();

        tokio::spawn(async move {
            loop {
                let event = tokio::select! {
                    _ = self.cancellation.cancelled() => break,
                    event = membership_events.recv() => event,
                };
                match event {
                    Ok(MembershipEvent::PeerUp(peer)) => {
                        let role = StreamRole::Peer(peer);
                        if role.peer() != Some(self.context.me().as_str())
                            && !self.has_stream(&role)
                        {
                            self.clone().open_with_retry(role, 1).await;
                        }
                    }
                    Ok(MembershipEvent::Close) => break,
                    Ok(_) | Err(RecvError::Lagged(_)) => continue,
                    Err(RecvError::Closed) => break,
                }
            }
        });
    }
}
