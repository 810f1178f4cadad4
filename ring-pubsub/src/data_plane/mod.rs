//! Data-plane layer.
//!
//! Owns delivery streams end to end: the acknowledged stream primitive, the
//! owner-side listener that writes matching deliveries into a subscriber's
//! stream, and the subscriber-side receiver that pumps stream frames back into
//! the local bus.
//!
//! ```
//! use std::sync::Arc;
//! use ring_pubsub::{delivery_channel, DeliveryFrame, DeliveryStream, Message};
//! use serde_json::json;
//!
//! # tokio::runtime::Runtime::new().unwrap().block_on(async {
//! let (writer, mut reader) = delivery_channel(4);
//!
//! let consumer = tokio::spawn(async move {
//!     let frame = reader.next().await.unwrap();
//!     let (_, ack) = frame.into_parts();
//!     ack.ack(Ok(()));
//! });
//!
//! // the write resolves once the reader acknowledged the frame
//! let message = Arc::new(Message::new("a/b", json!("hello")));
//! writer.write(DeliveryFrame::Message(message)).await.unwrap();
//! consumer.await.unwrap();
//! # });
//! ```

pub(crate) mod application_listener;
pub(crate) mod receiver;
pub(crate) mod receiver_pool;
pub(crate) mod stream;
pub(crate) mod subscription_listener;
