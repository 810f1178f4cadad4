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

//! State shared by the routers, the receivers and the caller facade of one peer.

use crate::config::PubSubConfig;
use crate::control_plane::inbound_registry::InboundRegistry;
use crate::error::PubSubError;
use crate::local_bus::LocalBus;
use crate::membership::{Membership, PeerId};
use crate::message::{Delivery, Message};
use crate::routing::dedup_window::DedupWindow;
use crate::routing::delivery_rounds::DeliveryRounds;
use crate::routing::topic_key::TopicSyntax;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

pub(crate) struct RouterContext {
    me: PeerId,
    membership: Arc<dyn Membership>,
    bus: Arc<dyn LocalBus>,
    config: PubSubConfig,
    rounds: DeliveryRounds,
    dedup: DedupWindow,
    closing: AtomicBool,
    inbound: InboundRegistry,
}

impl RouterContext {
    pub(crate) fn new(
        membership: Arc<dyn Membership>,
        bus: Arc<dyn LocalBus>,
        config: PubSubConfig,
    ) -> Self {
        Self {
            me: membership.whoami(),
            dedup: DedupWindow::new(config.dedup_window_rounds),
            rounds: DeliveryRounds::new(),
            closing: AtomicBool::new(false),
            inbound: InboundRegistry::default(),
            membership,
            bus,
            config,
        }
    }

    pub(crate) fn me(&self) -> &PeerId {
        &self.me
    }

    pub(crate) fn membership(&self) -> &Arc<dyn Membership> {
        &self.membership
    }

    pub(crate) fn bus(&self) -> &Arc<dyn LocalBus> {
        &self.bus
    }

    pub(crate) fn config(&self) -> &PubSubConfig {
        &self.config
    }

    pub(crate) fn syntax(&self) -> &TopicSyntax {
        &self.config.topic_syntax
    }

    pub(crate) fn dedup(&self) -> &DedupWindow {
        &self.dedup
    }

    pub(crate) fn inbound(&self) -> &InboundRegistry {
        &self.inbound
    }

    pub(crate) fn is_closing(&self) -> bool {
        self.closing.load(Ordering::SeqCst)
    }

    /// Flags the instance as closing. Returns `true` for the first caller only.
    pub(crate) fn begin_close(&self) -> bool {
        !self.closing.swap(true, Ordering::SeqCst)
    }

    /// Emits `message` into the local bus under a fresh delivery round.
    pub(crate) async fn deliver_locally(
        &self,
        message: Arc<Message>,
        replica: bool,
    ) -> Result<(), PubSubError> {
        let round = self.rounds.next_round();
        let result = self
            .bus
            .emit(Delivery::new(round, message, replica))
            .await;
        self.dedup.finish(round);
        result
    }
}
