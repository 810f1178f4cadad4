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

use crate::routing::topic_key::TopicSyntax;
use serde::{Deserialize, Serialize};
use std::time::Duration;

/// Tunables of a [`RingPubSub`](crate::RingPubSub) instance.
///
/// Every field has a default, so a partial document deserializes cleanly:
///
/// ```
/// use ring_pubsub::PubSubConfig;
///
/// let config: PubSubConfig = serde_json::from_str(r#"{ "stream_capacity": 64 }"#).unwrap();
/// assert_eq!(config.stream_capacity, 64);
/// assert_eq!(config.max_resubscribe_attempts, 5);
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct PubSubConfig {
    pub topic_syntax: TopicSyntax,
    /// Unacknowledged frames a delivery stream may buffer.
    pub stream_capacity: usize,
    pub resubscribe_delay_ms: u64,
    pub max_resubscribe_attempts: u32,
    /// A stream that lived this long resets the resubscribe attempt counter.
    pub stable_stream_after_ms: u64,
    /// Delivery rounds remembered for duplicate suppression.
    pub dedup_window_rounds: usize,
}

impl Default for PubSubConfig {
    fn default() -> Self {
        Self {
            topic_syntax: TopicSyntax::default(),
            stream_capacity: 16,
            resubscribe_delay_ms: 200,
            max_resubscribe_attempts: 5,
            stable_stream_after_ms: 1000,
            dedup_window_rounds: 1024,
        }
    }
}

impl PubSubConfig {
    pub fn resubscribe_delay(&self) -> Duration {
        Duration::from_millis(self.resubscribe_delay_ms)
    }

    pub fn stable_stream_after(&self) -> Duration {
        Duration::from_millis(self.stable_stream_after_ms)
    }
}
