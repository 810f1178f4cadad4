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

use super::matcher::TopicPattern;
use super::{BusListener, ListenerIdentityKey, LocalBus};
use crate::error::PubSubError;
use crate::message::Delivery;
use crate::observability::{events, fields};
use crate::routing::topic_key::TopicSyntax;
use async_trait::async_trait;
use futures::future::join_all;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::RwLock;
use tracing::debug;

const COMPONENT: &str = "topic_bus";

struct Registration {
    pattern: TopicPattern,
    listener: ListenerIdentityKey,
    handler: Arc<dyn BusListener>,
}

struct InFlight<'a>(&'a AtomicUsize);

impl<'a> InFlight<'a> {
    fn enter(counter: &'a AtomicUsize) -> Self {
        counter.fetch_add(1, Ordering::SeqCst);
        Self(counter)
    }
}

impl Drop for InFlight<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::SeqCst);
    }
}

/// Default [`LocalBus`]: ordered registrations matched level by level.
pub struct TopicBus {
    syntax: TopicSyntax,
    registrations: RwLock<Vec<Registration>>,
    in_flight: AtomicUsize,
    closed: AtomicBool,
}

impl TopicBus {
    pub fn new(syntax: TopicSyntax) -> Self {
        Self {
            syntax,
            registrations: RwLock::new(Vec::new()),
            in_flight: AtomicUsize::new(0),
            closed: AtomicBool::new(false),
        }
    }

    pub fn syntax(&self) -> &TopicSyntax {
        &self.syntax
    }

    async fn matching(&self, topic: &str) -> Vec<Arc<dyn BusListener>> {
        self.registrations
            .read()
            .await
            .iter()
            .filter(|registration| registration.pattern.matches(topic, &self.syntax))
            .map(|registration| registration.handler.clone())
            .collect()
    }
}

impl Default for TopicBus {
    fn default() -> Self {
        Self::new(TopicSyntax::default())
    }
}

#[async_trait]
impl LocalBus for TopicBus {
    async fn on(&self, topic: &str, listener: Arc<dyn BusListener>) -> Result<(), PubSubError> {
        if self.closed.load(Ordering::SeqCst) {
            return Err(PubSubError::Closing);
        }

        self.registrations.write().await.push(Registration {
            pattern: TopicPattern::parse(topic, &self.syntax),
            listener: ListenerIdentityKey::new(&listener),
            handler: listener,
        });
        Ok(())
    }

    async fn remove_listener(
        &self,
        topic: &str,
        listener: &Arc<dyn BusListener>,
    ) -> Result<(), PubSubError> {
        let identity = ListenerIdentityKey::new(listener);
        let mut registrations = self.registrations.write().await;

        if let Some(index) = registrations.iter().position(|registration| {
            registration.pattern.as_str() == topic && registration.listener == identity
        }) {
            registrations.remove(index);
        }
        Ok(())
    }

    async fn emit(&self, delivery: Delivery) -> Result<(), PubSubError> {
        if self.closed.load(Ordering::SeqCst) {
            debug!(
                event = events::LOCAL_BUS_EMIT_REJECTED,
                component = COMPONENT,
                topic = delivery.topic(),
                round = delivery.round(),
                "bus closed, dropping delivery"
            );
            return Err(PubSubError::Closing);
        }

        let _in_flight = InFlight::enter(&self.in_flight);
        let listeners = self.matching(delivery.topic()).await;

        if tracing::enabled!(tracing::Level::DEBUG) {
            debug!(
                component = COMPONENT,
                topic = delivery.topic(),
                round = delivery.round(),
                replica = delivery.is_replica(),
                listeners = listeners.len(),
                message = fields::format_message(delivery.message()).as_str(),
                "emitting"
            );
        }

        let results = join_all(
            listeners
                .iter()
                .map(|listener| listener.on_delivery(&delivery)),
        )
        .await;

        match results.into_iter().find_map(Result::err) {
            Some(err) => Err(PubSubError::Listener(err)),
            None => Ok(()),
        }
    }

    async fn close(&self) {
        self.closed.store(true, Ordering::SeqCst);
        self.registrations.write().await.clear();
    }

    fn current(&self) -> usize {
        self.in_flight.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::TopicBus;
    use crate::error::{ListenerError, PubSubError};
    use crate::local_bus::{BusListener, LocalBus};
    use crate::message::{Delivery, Message};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Arc;

    #[derive(Default)]
    struct CountingListener {
        calls: AtomicUsize,
        fail: bool,
    }

    #[async_trait]
    impl BusListener for CountingListener {
        async fn on_delivery(&self, _delivery: &Delivery) -> Result<(), ListenerError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail {
                Err(ListenerError::new("listener exploded"))
            } else {
                Ok(())
            }
        }
    }

    fn delivery(topic: &str) -> Delivery {
        Delivery::new(1, Arc::new(Message::new(topic, json!(null))), false)
    }

    #[tokio::test]
    async fn emit_reaches_every_matching_listener() {
        let bus = TopicBus::default();
        let exact = Arc::new(CountingListener::default());
        let wildcard = Arc::new(CountingListener::default());
        let other = Arc::new(CountingListener::default());

        bus.on("a/b", exact.clone()).await.unwrap();
        bus.on("a/#", wildcard.clone()).await.unwrap();
        bus.on("c/+", other.clone()).await.unwrap();

        bus.emit(delivery("a/b")).await.unwrap();

        assert_eq!(exact.calls.load(Ordering::SeqCst), 1);
        assert_eq!(wildcard.calls.load(Ordering::SeqCst), 1);
        assert_eq!(other.calls.load(Ordering::SeqCst), 0);
        assert_eq!(bus.current(), 0);
    }

    #[tokio::test]
    async fn listener_error_is_reported_after_all_listeners_ran() {
        let bus = TopicBus::default();
        let failing = Arc::new(CountingListener {
            fail: true,
            ..Default::default()
        });
        let healthy = Arc::new(CountingListener::default());

        bus.on("a/b", failing.clone()).await.unwrap();
        bus.on("a/b", healthy.clone()).await.unwrap();

        let result = bus.emit(delivery("a/b")).await;

        assert_eq!(
            result,
            Err(PubSubError::Listener(ListenerError::new("listener exploded")))
        );
        assert_eq!(healthy.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn remove_listener_drops_one_registration() {
        let bus = TopicBus::default();
        let listener = Arc::new(CountingListener::default());
        let as_bus_listener: Arc<dyn BusListener> = listener.clone();

        bus.on("a/b", as_bus_listener.clone()).await.unwrap();
        bus.on("a/b", as_bus_listener.clone()).await.unwrap();
        bus.remove_listener("a/b", &as_bus_listener).await.unwrap();
        bus.remove_listener("x/y", &as_bus_listener).await.unwrap();

        bus.emit(delivery("a/b")).await.unwrap();
        assert_eq!(listener.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn closed_bus_rejects_emit_and_registration() {
        let bus = TopicBus::default();
        let listener = Arc::new(CountingListener::default());
        bus.on("a/b", listener.clone()).await.unwrap();

        bus.close().await;

        assert_eq!(bus.emit(delivery("a/b")).await, Err(PubSubError::Closing));
        assert_eq!(
            bus.on("a/b", listener.clone()).await,
            Err(PubSubError::Closing)
        );
        assert_eq!(listener.calls.load(Ordering::SeqCst), 0);
    }
}
