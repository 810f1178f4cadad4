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

//! Contract between the pub/sub layer and the hash-ring membership service.
//!
//! The membership service owns peer discovery, key allocation, and the
//! request/response transport between peers. `ring-pubsub` only ever talks to
//! it through the traits in this module.

use crate::data_plane::stream::DeliveryStream;
use crate::error::PubSubError;
use crate::message::Message;
use async_trait::async_trait;
use std::fmt::{Debug, Formatter};
use std::sync::Arc;
use tokio::sync::{broadcast, mpsc};

/// Opaque identifier of a ring peer, comparable for equality.
pub type PeerId = String;

/// Namespace under which the pub/sub command handler is registered.
pub const NAMESPACE: &str = "pubsub";

/// Cluster-level notifications published by the membership service.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum MembershipEvent {
    /// This peer joined the ring and can serve requests.
    Up,
    PeerUp(PeerId),
    PeerDown(PeerId),
    /// The membership service shut down.
    Close,
}

/// Notification delivered to a key tracker.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum RingEvent {
    /// Ownership of the tracked key moved to the given peer.
    Move(PeerId),
    /// The successor (replica target) of the tracked key changed.
    Replica(Option<PeerId>),
}

#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct TrackOptions {
    /// Track the key from the point of view of a replica instead of the owner.
    pub replica: bool,
}

/// Live registration of interest in a key's ownership.
///
/// Events arrive in ring order. [`TrackHandle::end`] detaches the tracker from
/// the membership service; it is idempotent and runs automatically on drop.
pub struct TrackHandle {
    key: String,
    events: mpsc::UnboundedReceiver<RingEvent>,
    detach: Option<Box<dyn FnOnce() + Send + Sync>>,
}

impl TrackHandle {
    pub fn new(
        key: &str,
        events: mpsc::UnboundedReceiver<RingEvent>,
        detach: impl FnOnce() + Send + Sync + 'static,
    ) -> Self {
        Self {
            key: key.to_string(),
            events,
            detach: Some(Box::new(detach)),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Waits for the next ring event. Returns `None` once the tracker ended.
    pub async fn next_event(&mut self) -> Option<RingEvent> {
        if self.detach.is_none() {
            return None;
        }
        self.events.recv().await
    }

    pub fn end(&mut self) {
        if let Some(detach) = self.detach.take() {
            detach();
            self.events.close();
        }
    }

    pub fn is_ended(&self) -> bool {
        self.detach.is_none()
    }
}

impl Drop for TrackHandle {
    fn drop(&mut self) {
        self.end();
    }
}

impl Debug for TrackHandle {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TrackHandle")
            .field("key", &self.key)
            .field("ended", &self.is_ended())
            .finish()
    }
}

#[derive(Clone, Debug)]
pub struct PublishRequest {
    /// Ownership key the publish was routed by.
    pub key: String,
    pub msg: Message,
    /// Set when the request is a copy forwarded by the key owner to its successor.
    pub replica: bool,
}

#[derive(Clone)]
pub struct SubscribeRequest {
    pub topic: String,
    /// Ownership key of the topic; `None` for low-wildcard subscriptions.
    pub key: Option<String>,
    /// Peer that opened the subscription.
    pub from: PeerId,
    /// Standby subscription opened at the key's successor.
    pub replica: bool,
    /// Writable half of the delivery stream the receiving peer should feed.
    pub messages: Option<Arc<dyn DeliveryStream>>,
}

impl Debug for SubscribeRequest {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SubscribeRequest")
            .field("topic", &self.topic)
            .field("key", &self.key)
            .field("from", &self.from)
            .field("replica", &self.replica)
            .field("messages", &self.messages.is_some())
            .finish()
    }
}

/// Commands served under [`NAMESPACE`].
#[derive(Clone, Debug)]
pub enum PubSubRequest {
    Publish(PublishRequest),
    Subscribe(SubscribeRequest),
}

impl PubSubRequest {
    pub fn command(&self) -> &'static str {
        match self {
            PubSubRequest::Publish(_) => "publish",
            PubSubRequest::Subscribe(_) => "subscribe",
        }
    }

    /// Delivery stream carried by the request, if any.
    ///
    /// Transports close it when the connection carrying the request is lost.
    pub fn messages(&self) -> Option<&Arc<dyn DeliveryStream>> {
        match self {
            PubSubRequest::Publish(_) => None,
            PubSubRequest::Subscribe(request) => request.messages.as_ref(),
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum PubSubReply {
    Published,
    Subscribed {
        /// Successor of the key at the time of the subscription, if keyed and owned.
        replica: Option<PeerId>,
    },
}

/// Server side of the pub/sub namespace.
#[async_trait]
pub trait CommandHandler: Send + Sync {
    async fn handle(&self, request: PubSubRequest) -> Result<PubSubReply, PubSubError>;
}

/// Request channel to one specific peer.
#[async_trait]
pub trait PeerConnection: Send + Sync {
    fn peer(&self) -> &str;

    async fn request(&self, request: PubSubRequest) -> Result<PubSubReply, PubSubError>;
}

/// Consistent-hash membership service.
#[async_trait]
pub trait Membership: Send + Sync {
    fn whoami(&self) -> PeerId;

    fn is_ready(&self) -> bool;

    fn allocated_to_me(&self, key: &str) -> bool;

    /// Successor of the peer owning `key`, if the ring has more than one peer.
    fn next(&self, key: &str) -> Option<PeerId>;

    fn peers(&self, include_self: bool) -> Vec<PeerId>;

    fn track(&self, key: &str, options: TrackOptions) -> TrackHandle;

    fn events(&self) -> broadcast::Receiver<MembershipEvent>;

    /// Registers the handler that serves requests arriving for `namespace`.
    fn serve(&self, namespace: &'static str, handler: Arc<dyn CommandHandler>);

    /// Routes `request` to the current owner of `key`, which may be this peer.
    async fn request(
        &self,
        key: &str,
        request: PubSubRequest,
    ) -> Result<PubSubReply, PubSubError>;

    fn peer_conn(&self, peer: &str) -> Result<Arc<dyn PeerConnection>, PubSubError>;

    async fn close(&self);
}
