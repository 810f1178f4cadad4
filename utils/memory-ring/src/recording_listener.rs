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

use async_trait::async_trait;
use ring_pubsub::{Listener, ListenerError, Message};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;
use tokio::sync::Notify;
use tracing::debug;

const WAIT_TIMEOUT: Duration = Duration::from_secs(5);

/// Listener that keeps every message it receives.
#[derive(Default)]
pub struct RecordingListener {
    message_store: Mutex<Vec<Arc<Message>>>,
    arrived: Notify,
}

impl RecordingListener {
    fn store(&self) -> MutexGuard<'_, Vec<Arc<Message>>> {
        self.message_store.lock().unwrap_or_else(|e| e.into_inner())
    }

    pub fn messages(&self) -> Vec<Arc<Message>> {
        self.store().clone()
    }

    pub fn topics(&self) -> Vec<String> {
        self.store()
            .iter()
            .map(|message| message.topic.clone())
            .collect()
    }

    pub fn count(&self) -> usize {
        self.store().len()
    }

    pub fn clear(&self) {
        self.store().clear();
    }

    /// Waits until at least `count` messages arrived.
    ///
    /// Panics after five seconds; this is a test helper.
    pub async fn wait_for(&self, count: usize) {
        let waited = tokio::time::timeout(WAIT_TIMEOUT, async {
            loop {
                let arrived = self.arrived.notified();
                if self.count() >= count {
                    return;
                }
                arrived.await;
            }
        })
        .await;

        if waited.is_err() {
            panic!(
                "expected {count} messages, got {} ({:?})",
                self.count(),
                self.topics()
            );
        }
    }
}

#[async_trait]
impl Listener for RecordingListener {
    async fn on_message(&self, message: Arc<Message>) -> Result<(), ListenerError> {
        debug!(topic = message.topic.as_str(), "recording listener received message");
        self.store().push(message);
        self.arrived.notify_waiters();
        Ok(())
    }
}

/// Listener that rejects every message.
#[derive(Default)]
pub struct FailingListener;

#[async_trait]
impl Listener for FailingListener {
    async fn on_message(&self, message: Arc<Message>) -> Result<(), ListenerError> {
        Err(ListenerError::new(format!(
            "refusing message on '{}'",
            message.topic
        )))
    }
}
