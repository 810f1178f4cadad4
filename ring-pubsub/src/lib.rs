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

//! # ring-pubsub
//!
//! `ring-pubsub` turns a consistent-hash membership ring into a cluster-wide
//! publish/subscribe bus with MQTT-style topic wildcards.
//!
//! Every topic maps to a routing key made of its first two levels. The ring peer
//! owning that key is the single point where messages for the topic are
//! delivered: publishers send to it, subscribers hold a stream from it. The
//! owner also replicates every publish to its ring successor, where subscribers
//! keep a silent standby stream so no message is lost while ownership moves.
//!
//! ## Quick start
//!
//! ```
//! use std::sync::Arc;
//! use memory_ring::{MemoryCluster, RecordingListener};
//! use ring_pubsub::{Message, PubSubConfig, RingPubSub};
//! use serde_json::json;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let cluster = MemoryCluster::new();
//! let a = RingPubSub::new(cluster.join("peer-a"), PubSubConfig::default());
//! let b = RingPubSub::new(cluster.join("peer-b"), PubSubConfig::default());
//!
//! let everything = Arc::new(RecordingListener::default());
//! b.on("#", everything.clone()).await.unwrap();
//!
//! a.emit(Message::new("hello", json!("from a"))).await.unwrap();
//! everything.wait_for(1).await;
//!
//! a.close().await.unwrap();
//! b.close().await.unwrap();
//! # });
//! ```
//!
//! ## Topic classes
//!
//! ```
//! use ring_pubsub::TopicSyntax;
//!
//! let syntax = TopicSyntax::default();
//! assert_eq!(syntax.derive_key("hello/world/deep"), "hello/world");
//! // wildcards in the first two levels cannot be routed to a single owner
//! assert!(syntax.is_low_wildcard("hello/+"));
//! assert!(!syntax.is_low_wildcard("hello/world/#"));
//! ```
//!
//! ## Internal architecture map
//!
//! - API facade: [`RingPubSub`] with `emit` / `on` / `remove_listener` / `close`
//! - Control plane: `pubsub` command handler, publish and subscribe routers,
//!   per-key migration tracking
//! - Routing: key derivation, delivery rounds and duplicate suppression
//! - Data plane: acknowledged delivery streams, stream listeners and receivers
//! - Local bus: wildcard-aware in-process emitter
//! - Runtime: readiness gating
//!
//! ## Observability model
//!
//! The workspace uses `tracing` for logs/events.
//! Library code emits events/spans and does not unconditionally initialize a global
//! subscriber. Binaries/plugins/tests are responsible for one-time
//! `tracing_subscriber` initialization at process boundaries.

mod config;
pub use config::PubSubConfig;

mod control_plane;
mod data_plane;
pub use data_plane::application_listener::{listener_fn, FnListener, Listener};
pub use data_plane::receiver::{ReceiverSnapshot, ReceiverState};
pub use data_plane::stream::{
    delivery_channel, ChannelStream, DeliveryFrame, DeliveryStream, FrameAck, InboundFrame,
    InboundStream, StreamCloser,
};

mod error;
pub use error::{ListenerError, PubSubError, StreamError};

pub mod local_bus;
pub use local_bus::TopicBus;

pub mod membership;
pub use membership::{Membership, PeerId};

mod message;
pub use message::{Delivery, Message};

#[doc(hidden)]
pub mod observability;
mod routing;
pub use routing::topic_key::TopicSyntax;
mod runtime;

mod ring_pubsub;
pub use ring_pubsub::RingPubSub;

#[cfg(test)]
mod test_support;
