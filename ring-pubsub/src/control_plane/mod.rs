//! Control-plane layer.
//!
//! Serves the `pubsub` command namespace: the publish router delivers locally and
//! replicates to the key's successor, the subscribe router turns incoming
//! subscriptions into stream listeners and follows key ownership with a
//! migration tracker until the stream closes.
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
//! let listener = Arc::new(RecordingListener::default());
//! b.on("orders/eu", listener.clone()).await.unwrap();
//!
//! // whichever peer owns "orders/eu" answers the publish and feeds b's stream
//! a.emit(Message::new("orders/eu", json!({ "id": 7 }))).await.unwrap();
//! listener.wait_for(1).await;
//!
//! a.close().await.unwrap();
//! b.close().await.unwrap();
//! # });
//! ```

pub(crate) mod commands;
pub(crate) mod inbound_registry;
pub(crate) mod migration_tracker;
pub(crate) mod publish_router;
pub(crate) mod router_context;
pub(crate) mod subscribe_router;
