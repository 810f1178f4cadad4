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

//! Acknowledged, bounded delivery streams between a key owner and a subscriber.

use crate::error::StreamError;
use crate::membership::PeerId;
use crate::message::Message;
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{mpsc, oneshot, watch};

/// Unit carried by a delivery stream.
#[derive(Clone, Debug, PartialEq)]
pub enum DeliveryFrame {
    Message(Arc<Message>),
    /// The owner's successor changed; the subscriber should move its standby there.
    Replica(Option<PeerId>),
}

/// Writable half of a delivery stream as seen by the key owner.
#[async_trait]
pub trait DeliveryStream: Send + Sync {
    /// Writes one frame and waits until the reader acknowledged it.
    async fn write(&self, frame: DeliveryFrame) -> Result<(), StreamError>;

    /// Resolves once either side closed the stream.
    async fn closed(&self);

    fn is_closed(&self) -> bool;

    fn destroy(&self);
}

type Ack = oneshot::Sender<Result<(), StreamError>>;

struct StreamState {
    closed: watch::Sender<bool>,
}

impl StreamState {
    fn new() -> Self {
        let (closed, _) = watch::channel(false);
        Self { closed }
    }

    fn close(&self) {
        self.closed.send_if_modified(|closed| {
            if *closed {
                false
            } else {
                *closed = true;
                true
            }
        });
    }

    fn is_closed(&self) -> bool {
        *self.closed.borrow()
    }

    async fn wait_closed(&self) {
        let mut closed = self.closed.subscribe();
        // the sender lives as long as `self`, so the wait cannot fail
        let _ = closed.wait_for(|closed| *closed).await;
    }
}

/// Creates a connected writer/reader pair holding at most `capacity` unacknowledged frames.
pub fn delivery_channel(capacity: usize) -> (ChannelStream, InboundStream) {
    let (frames_tx, frames_rx) = mpsc::channel(capacity.max(1));
    let state = Arc::new(StreamState::new());

    (
        ChannelStream {
            frames: frames_tx,
            state: state.clone(),
        },
        InboundStream {
            frames: frames_rx,
            state,
        },
    )
}

/// In-process [`DeliveryStream`] writer backed by a bounded channel.
#[derive(Clone)]
pub struct ChannelStream {
    frames: mpsc::Sender<(DeliveryFrame, Ack)>,
    state: Arc<StreamState>,
}

#[async_trait]
impl DeliveryStream for ChannelStream {
    async fn write(&self, frame: DeliveryFrame) -> Result<(), StreamError> {
        if self.state.is_closed() {
            return Err(StreamError::Closed);
        }

        let (ack_tx, ack_rx) = oneshot::channel();
        tokio::select! {
            sent = self.frames.send((frame, ack_tx)) => {
                sent.map_err(|_| StreamError::Closed)?;
            }
            _ = self.state.wait_closed() => return Err(StreamError::Closed),
        }

        tokio::select! {
            ack = ack_rx => ack.unwrap_or(Err(StreamError::Closed)),
            _ = self.state.wait_closed() => Err(StreamError::Closed),
        }
    }

    async fn closed(&self) {
        self.state.wait_closed().await;
    }

    fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    fn destroy(&self) {
        self.state.close();
    }
}

/// One frame read from an [`InboundStream`], pending acknowledgement.
pub struct InboundFrame {
    frame: DeliveryFrame,
    ack: Ack,
}

impl InboundFrame {
    pub fn frame(&self) -> &DeliveryFrame {
        &self.frame
    }

    pub fn into_parts(self) -> (DeliveryFrame, FrameAck) {
        (self.frame, FrameAck { ack: self.ack })
    }
}

/// Acknowledgement slot of a frame; dropping it without acking fails the write.
pub struct FrameAck {
    ack: Ack,
}

impl FrameAck {
    pub fn ack(self, result: Result<(), StreamError>) {
        // the writer may have given up already
        let _ = self.ack.send(result);
    }
}

/// Readable half of a delivery stream as seen by the subscriber.
pub struct InboundStream {
    frames: mpsc::Receiver<(DeliveryFrame, Ack)>,
    state: Arc<StreamState>,
}

impl InboundStream {
    /// Next frame, or `None` once the stream closed.
    pub async fn next(&mut self) -> Option<InboundFrame> {
        if self.state.is_closed() {
            return None;
        }

        let received = tokio::select! {
            biased;
            _ = self.state.wait_closed() => None,
            received = self.frames.recv() => received,
        };

        match received {
            Some((frame, ack)) => Some(InboundFrame { frame, ack }),
            None => {
                // every writer was dropped
                self.state.close();
                None
            }
        }
    }

    pub fn closer(&self) -> StreamCloser {
        StreamCloser {
            state: self.state.clone(),
        }
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    pub fn destroy(&self) {
        self.state.close();
    }
}

/// Detached handle that can close a stream owned by another task.
#[derive(Clone)]
pub struct StreamCloser {
    state: Arc<StreamState>,
}

impl StreamCloser {
    pub fn destroy(&self) {
        self.state.close();
    }

    pub fn is_closed(&self) -> bool {
        self.state.is_closed()
    }

    pub async fn closed(&self) {
        self.state.wait_closed().await;
    }
}

#[cfg(test)]
mod tests {
    use super::{delivery_channel, DeliveryFrame, DeliveryStream};
    use crate::error::StreamError;
    use crate::message::Message;
    use serde_json::json;
    use std::sync::Arc;

    fn frame(topic: &str) -> DeliveryFrame {
        DeliveryFrame::Message(Arc::new(Message::new(topic, json!(null))))
    }

    #[tokio::test]
    async fn write_resolves_with_reader_acknowledgement() {
        let (writer, mut reader) = delivery_channel(4);

        let reader_task = tokio::spawn(async move {
            let inbound = reader.next().await.expect("frame expected");
            assert_eq!(inbound.frame(), &frame("a/b"));
            let (_, ack) = inbound.into_parts();
            ack.ack(Err(StreamError::Rejected("listener failed".to_string())));
        });

        assert_eq!(
            writer.write(frame("a/b")).await,
            Err(StreamError::Rejected("listener failed".to_string()))
        );
        reader_task.await.unwrap();
    }

    #[tokio::test]
    async fn destroy_on_reader_side_closes_writer() {
        let (writer, reader) = delivery_channel(4);

        reader.closer().destroy();

        writer.closed().await;
        assert!(writer.is_closed());
        assert_eq!(writer.write(frame("a/b")).await, Err(StreamError::Closed));
    }

    #[tokio::test]
    async fn destroy_on_writer_side_ends_reader() {
        let (writer, mut reader) = delivery_channel(4);

        writer.destroy();

        assert!(reader.next().await.is_none());
        assert!(reader.is_closed());
    }

    #[tokio::test]
    async fn dropping_every_writer_ends_reader() {
        let (writer, mut reader) = delivery_channel(4);

        drop(writer);

        assert!(reader.next().await.is_none());
        assert!(reader.is_closed());
    }

    #[tokio::test]
    async fn pending_write_fails_when_stream_is_destroyed() {
        let (writer, mut reader) = delivery_channel(1);
        let closer = reader.closer();

        let pending = tokio::spawn(async move { writer.write(frame("a/b")).await });
        let inbound = reader.next().await.expect("frame expected");

        closer.destroy();
        drop(inbound);

        assert_eq!(pending.await.unwrap(), Err(StreamError::Closed));
    }
}
