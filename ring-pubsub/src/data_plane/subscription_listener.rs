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

//! Bus listener that forwards matching deliveries into a remote subscriber's stream.

use crate::control_plane::router_context::RouterContext;
use crate::data_plane::stream::{DeliveryFrame, DeliveryStream};
use crate::error::{ListenerError, StreamError};
use crate::local_bus::BusListener;
use crate::membership::PeerId;
use crate::message::Delivery;
use crate::observability::{events, fields};
use crate::routing::dedup_window::Admission;
use async_trait::async_trait;
use std::sync::Arc;
use tracing::{debug, warn};

const COMPONENT: &str = "subscription_listener";

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum ListenerMode {
    /// Registered at the key owner or for a wildcard subscription.
    Primary,
    /// Registered at the successor; silent until this peer owns `key`.
    Standby { key: String },
}

pub(crate) struct SubscriptionListener {
    subscription_id: String,
    topic: String,
    from: PeerId,
    low_wildcard: bool,
    mode: ListenerMode,
    stream: Arc<dyn DeliveryStream>,
    context: Arc<RouterContext>,
}

impl SubscriptionListener {
    pub(crate) fn new(
        subscription_id: &str,
        topic: &str,
        from: &str,
        mode: ListenerMode,
        stream: Arc<dyn DeliveryStream>,
        context: Arc<RouterContext>,
    ) -> Self {
        Self {
            subscription_id: subscription_id.to_string(),
            topic: topic.to_string(),
            from: from.to_string(),
            low_wildcard: context.syntax().is_low_wildcard(topic),
            mode,
            stream,
            context,
        }
    }

    fn drop_reason(&self, delivery: &Delivery) -> Option<(&'static str, &'static str)> {
        let membership = self.context.membership();

        if self.low_wildcard && delivery.is_replica() {
            return Some((
                events::LISTENER_DROP_DUPLICATE,
                fields::REASON_LOW_WILDCARD_REPLICA,
            ));
        }

        if !delivery.is_replica() {
            let base = self.context.syntax().derive_key(delivery.topic());
            if !membership.allocated_to_me(&base) {
                return Some((
                    events::LISTENER_DROP_NOT_ALLOCATED,
                    fields::REASON_BASE_NOT_OWNED,
                ));
            }
        }

        if let ListenerMode::Standby { key } = &self.mode {
            if !membership.allocated_to_me(key) {
                return Some((
                    events::LISTENER_DROP_STANDBY,
                    fields::REASON_STANDBY_NOT_OWNER,
                ));
            }
        }

        None
    }

    fn log_duplicate(&self, delivery: &Delivery) {
        debug!(
            event = events::LISTENER_DROP_DUPLICATE,
            component = COMPONENT,
            subscription_id = self.subscription_id.as_str(),
            topic = delivery.topic(),
            from = self.from.as_str(),
            round = delivery.round(),
            "destination already served this round"
        );
    }
}

#[async_trait]
impl BusListener for SubscriptionListener {
    async fn on_delivery(&self, delivery: &Delivery) -> Result<(), ListenerError> {
        let subscription_id = self.subscription_id.as_str();

        if let Some((event, reason)) = self.drop_reason(delivery) {
            debug!(
                event,
                component = COMPONENT,
                subscription_id,
                topic = delivery.topic(),
                from = self.from.as_str(),
                round = delivery.round(),
                reason,
                "dropping delivery"
            );
            return Ok(());
        }

        let claim = loop {
            match self.context.dedup().admit(delivery.round(), &self.from) {
                Admission::Granted(claim) => break claim,
                Admission::Served => {
                    self.log_duplicate(delivery);
                    return Ok(());
                }
                Admission::InFlight(mut outcome) => {
                    let reached = outcome
                        .wait_for(Option::is_some)
                        .await
                        .map(|outcome| *outcome == Some(true))
                        .unwrap_or(false);
                    if reached {
                        self.log_duplicate(delivery);
                        return Ok(());
                    }
                }
            }
        };

        debug!(
            event = events::LISTENER_WRITE,
            component = COMPONENT,
            subscription_id,
            subscription = self.topic.as_str(),
            topic = delivery.topic(),
            from = self.from.as_str(),
            round = delivery.round(),
            "writing delivery to subscriber stream"
        );

        match self
            .stream
            .write(DeliveryFrame::Message(delivery.message().clone()))
            .await
        {
            Ok(()) => {
                claim.confirm();
                Ok(())
            }
            Err(StreamError::Rejected(reason)) => {
                claim.confirm();
                Err(ListenerError::new(reason))
            }
            Err(err) => {
                drop(claim);
                warn!(
                    event = events::LISTENER_WRITE_FAILED,
                    component = COMPONENT,
                    subscription_id,
                    topic = delivery.topic(),
                    from = self.from.as_str(),
                    err = %err,
                    "subscriber stream unavailable, it will resubscribe"
                );
                Ok(())
            }
        }
    }
}
