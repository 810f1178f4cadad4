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

//! Error taxonomy shared by the routers, the receiver and the caller API.

use crate::membership::PeerId;
use std::error::Error;
use std::fmt::{Display, Formatter};

/// Failure raised by a local-bus listener while handling a delivery.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ListenerError {
    message: String,
}

impl ListenerError {
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }

    pub fn message(&self) -> &str {
        &self.message
    }
}

impl Display for ListenerError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl Error for ListenerError {}

/// Failure writing to or reading from a delivery stream.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum StreamError {
    /// Either side destroyed the stream or the connection carrying it dropped.
    Closed,
    /// The reader refused the frame (its local delivery failed).
    Rejected(String),
}

impl Display for StreamError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            StreamError::Closed => write!(f, "delivery stream closed"),
            StreamError::Rejected(reason) => write!(f, "delivery rejected: {reason}"),
        }
    }
}

impl Error for StreamError {}

/// Errors surfaced by the pub/sub overlay.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum PubSubError {
    /// The instance is shutting down; no new work is accepted.
    Closing,
    /// A subscribe request arrived without its `messages` stream.
    NoStream,
    /// Forwarding a publish to the ring successor failed.
    Replication(String),
    /// A delivery stream died.
    StreamFailure(StreamError),
    /// A local listener failed while handling a message.
    Listener(ListenerError),
    /// The receiving peer does not own the routing key of the request.
    NotAllocated(String),
    /// No live connection to the addressed peer.
    PeerUnavailable(PeerId),
    /// The receiver was unsubscribed.
    Destroyed,
    /// The membership transport failed in a way not covered above.
    Transport(String),
}

impl PubSubError {
    /// `true` for failures a receiver may recover from by resubscribing.
    pub fn is_retryable(&self) -> bool {
        matches!(
            self,
            PubSubError::StreamFailure(_)
                | PubSubError::NotAllocated(_)
                | PubSubError::PeerUnavailable(_)
                | PubSubError::Transport(_)
        )
    }
}

impl Display for PubSubError {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            PubSubError::Closing => write!(f, "instance closing"),
            PubSubError::NoStream => write!(f, "missing messages stream"),
            PubSubError::Replication(reason) => {
                write!(f, "unable to replicate to successor: {reason}")
            }
            PubSubError::StreamFailure(err) => write!(f, "stream failure: {err}"),
            PubSubError::Listener(err) => write!(f, "listener failed: {err}"),
            PubSubError::NotAllocated(key) => write!(f, "key '{key}' is not allocated here"),
            PubSubError::PeerUnavailable(peer) => write!(f, "peer '{peer}' is unavailable"),
            PubSubError::Destroyed => write!(f, "already destroyed"),
            PubSubError::Transport(reason) => write!(f, "transport failure: {reason}"),
        }
    }
}

impl Error for PubSubError {
    fn source(&self) -> Option<&(dyn Error + 'static)> {
        match self {
            PubSubError::StreamFailure(err) => Some(err),
            PubSubError::Listener(err) => Some(err),
            _ => None,
        }
    }
}

impl From<ListenerError> for PubSubError {
    fn from(err: ListenerError) -> Self {
        PubSubError::Listener(err)
    }
}

impl From<StreamError> for PubSubError {
    fn from(err: StreamError) -> Self {
        PubSubError::StreamFailure(err)
    }
}

#[cfg(test)]
mod tests {
    use super::{ListenerError, PubSubError, StreamError};
    use std::error::Error;

    #[test]
    fn closing_error_display_is_stable() {
        assert_eq!(PubSubError::Closing.to_string(), "instance closing");
        assert!(PubSubError::Closing.source().is_none());
    }

    #[test]
    fn listener_error_is_exposed_as_source() {
        let error: PubSubError = ListenerError::new("boom").into();

        assert_eq!(error.to_string(), "listener failed: boom");
        assert!(error.source().is_some());
        assert!(!error.is_retryable());
    }

    #[test]
    fn stream_failures_are_retryable() {
        let error: PubSubError = StreamError::Closed.into();

        assert!(error.is_retryable());
        assert!(!PubSubError::NoStream.is_retryable());
        assert!(!PubSubError::Destroyed.is_retryable());
    }
}
