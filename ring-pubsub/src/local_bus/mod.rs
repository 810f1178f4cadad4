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

//! Local topic bus.
//!
//! Every peer owns one bus. Application listeners and the subscribe router's
//! stream listeners are registered on it side by side; an emit invokes all
//! listeners whose pattern matches the delivery's topic and completes once
//! every one of them finished.

use crate::error::{ListenerError, PubSubError};
use crate::message::Delivery;
use async_trait::async_trait;
use std::hash::{Hash, Hasher};
use std::sync::Arc;

pub(crate) mod matcher;
mod topic_bus;

pub use topic_bus::TopicBus;

#[async_trait]
pub trait BusListener: Send + Sync {
    async fn on_delivery(&self, delivery: &Delivery) -> Result<(), ListenerError>;
}

/// Wildcard-aware in-process emitter.
#[async_trait]
pub trait LocalBus: Send + Sync {
    async fn on(&self, topic: &str, listener: Arc<dyn BusListener>) -> Result<(), PubSubError>;

    /// Removes one registration of `listener` for `topic`. Unknown pairs are ignored.
    async fn remove_listener(
        &self,
        topic: &str,
        listener: &Arc<dyn BusListener>,
    ) -> Result<(), PubSubError>;

    /// Delivers to every matching listener; the first listener error is returned.
    async fn emit(&self, delivery: Delivery) -> Result<(), PubSubError>;

    async fn close(&self);

    /// Number of emits currently in flight.
    fn current(&self) -> usize;
}

/// Identity of a listener registration, compared by allocation rather than value.
#[derive(Clone)]
pub(crate) struct ListenerIdentityKey(Arc<dyn BusListener>);

impl ListenerIdentityKey {
    pub(crate) fn new(listener: &Arc<dyn BusListener>) -> Self {
        Self(listener.clone())
    }

    fn address(&self) -> usize {
        Arc::as_ptr(&self.0) as *const () as usize
    }
}

impl PartialEq for ListenerIdentityKey {
    fn eq(&self, other: &Self) -> bool {
        self.address() == other.address()
    }
}

impl Eq for ListenerIdentityKey {}

impl Hash for ListenerIdentityKey {
    fn hash<H: Hasher>(&self, state: &mut H) {
        self.address().hash(state);
    }
}
