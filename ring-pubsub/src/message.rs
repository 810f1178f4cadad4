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

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::Arc;

///
/// [`Message`] is what applications publish and receive: a topic, a payload and any
/// number of application-defined fields carried alongside.
///
/// # Examples
///
/// ```
/// use ring_pubsub::Message;
/// use serde_json::json;
///
/// let message = Message::new("hello/world", json!({ "my": "message" })).with_field("count", 1);
///
/// assert_eq!(message.topic, "hello/world");
/// assert_eq!(message.fields["count"], json!(1));
/// ```
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub topic: String,
    #[serde(default)]
    pub payload: Value,
    #[serde(flatten)]
    pub fields: Map<String, Value>,
}

impl Message {
    pub fn new(topic: impl Into<String>, payload: impl Into<Value>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
            fields: Map::new(),
        }
    }

    pub fn with_field(mut self, name: impl Into<String>, value: impl Into<Value>) -> Self {
        self.fields.insert(name.into(), value.into());
        self
    }
}

/// One message handed to the local bus during a single delivery round.
///
/// The replication flag lives here and not on [`Message`], so only router listeners
/// can tell a replica copy apart from a primary delivery.
#[derive(Clone, Debug)]
pub struct Delivery {
    round: u64,
    message: Arc<Message>,
    replica: bool,
}

impl Delivery {
    pub fn new(round: u64, message: Arc<Message>, replica: bool) -> Self {
        Self {
            round,
            message,
            replica,
        }
    }

    pub fn round(&self) -> u64 {
        self.round
    }

    pub fn message(&self) -> &Arc<Message> {
        &self.message
    }

    pub fn topic(&self) -> &str {
        &self.message.topic
    }

    pub fn is_replica(&self) -> bool {
        self.replica
    }
}

#[cfg(test)]
mod tests {
    use super::Message;
    use serde_json::json;

    #[test]
    fn application_fields_flatten_next_to_topic_and_payload() {
        let message = Message::new("hello", json!("from 42")).with_field("count", 3);

        let encoded = serde_json::to_value(&message).expect("message should serialize");

        assert_eq!(
            encoded,
            json!({ "topic": "hello", "payload": "from 42", "count": 3 })
        );
    }

    #[test]
    fn missing_payload_decodes_as_null() {
        let message: Message =
            serde_json::from_value(json!({ "topic": "a/b" })).expect("message should decode");

        assert_eq!(message.payload, json!(null));
        assert!(message.fields.is_empty());
    }
}
