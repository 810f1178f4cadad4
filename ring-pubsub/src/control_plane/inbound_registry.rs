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

//! Book-keeping of subscriptions other peers opened against this one.

use crate::data_plane::stream::DeliveryStream;
use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::task::JoinHandle;

struct InboundSubscription {
    stream: Arc<dyn DeliveryStream>,
    watcher: Option<JoinHandle<()>>,
}

/// Live inbound subscriptions keyed by subscription id.
#[derive(Default)]
pub(crate) struct InboundRegistry {
    subscriptions: Mutex<HashMap<String, InboundSubscription>>,
}

impl InboundRegistry {
    pub(crate) fn insert(&self, subscription_id: &str, stream: Arc<dyn DeliveryStream>) {
        self.lock().insert(
            subscription_id.to_string(),
            InboundSubscription {
                stream,
                watcher: None,
            },
        );
    }

    /// Attaches the watcher task; ignored if the subscription already ended.
    pub(crate) fn attach_watcher(&self, subscription_id: &str, watcher: JoinHandle<()>) {
        if let Some(subscription) = self.lock().get_mut(subscription_id) {
            subscription.watcher = Some(watcher);
        }
    }

    pub(crate) fn remove(&self, subscription_id: &str) {
        self.lock().remove(subscription_id);
    }

    pub(crate) fn len(&self) -> usize {
        self.lock().len()
    }

    /// Destroys every stream and waits for the watcher tasks to unwind.
    pub(crate) async fn close_all(&self) {
        let drained: Vec<InboundSubscription> =
            self.lock().drain().map(|(_, subscription)| subscription).collect();

        for subscription in &drained {
            subscription.stream.destroy();
        }
        for subscription in drained {
            if let Some(watcher) = subscription.watcher {
                let _ = watcher.await;
            }
        }
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, HashMap<String, InboundSubscription>> {
        self.subscriptions.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[cfg(test)]
mod tests {
    use super::InboundRegistry;
    use crate::data_plane::stream::{delivery_channel, DeliveryStream};
    use std::sync::Arc;

    #[tokio::test]
    async fn close_all_destroys_streams_and_joins_watchers() {
        let registry = InboundRegistry::default();
        let (writer, _reader) = delivery_channel(1);
        let writer: Arc<dyn DeliveryStream> = Arc::new(writer);

        registry.insert("sub-1", writer.clone());
        let watched = writer.clone();
        registry.attach_watcher(
            "sub-1",
            tokio::spawn(async move { watched.closed().await }),
        );
        assert_eq!(registry.len(), 1);

        registry.close_all().await;

        assert!(writer.is_closed());
        assert_eq!(registry.len(), 0);
    }

    #[test]
    fn watcher_for_finished_subscription_is_ignored() {
        let registry = InboundRegistry::default();
        let runtime = tokio::runtime::Builder::new_current_thread()
            .build()
            .unwrap();

        runtime.block_on(async {
            registry.attach_watcher("missing", tokio::spawn(async {}));
        });

        assert_eq!(registry.len(), 0);
    }
}
