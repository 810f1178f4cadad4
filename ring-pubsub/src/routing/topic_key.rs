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

//! Routing-key derivation and low-level wildcard classification.

use serde::{Deserialize, Serialize};

/// Separator and wildcard markers shared by key derivation and topic matching.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
#[serde(deny_unknown_fields, default)]
pub struct TopicSyntax {
    pub separator: String,
    pub single_level: String,
    pub multi_level: String,
}

impl Default for TopicSyntax {
    fn default() -> Self {
        Self {
            separator: "/".to_string(),
            single_level: "+".to_string(),
            multi_level: "#".to_string(),
        }
    }
}

impl TopicSyntax {
    /// Returns the routing key of `topic`.
    ///
    /// ```
    /// use ring_pubsub::TopicSyntax;
    ///
    /// let syntax = TopicSyntax::default();
    /// assert_eq!(syntax.derive_key("hello"), "hello");
    /// assert_eq!(syntax.derive_key("hello/world/deep"), "hello/world");
    /// assert_eq!(syntax.derive_key("hello/#"), "hello");
    /// ```
    pub fn derive_key(&self, topic: &str) -> String {
        let mut levels = topic.split(self.separator.as_str());
        let first = levels.next().unwrap_or_default();

        match levels.next() {
            None => topic.to_string(),
            Some(second) if second == self.multi_level => first.to_string(),
            Some(second) => format!("{first}{}{second}", self.separator),
        }
    }

    /// `true` when the first or second level is a wildcard marker, which makes the
    /// topic impossible to route to a single owner.
    pub fn is_low_wildcard(&self, topic: &str) -> bool {
        topic
            .split(self.separator.as_str())
            .take(2)
            .any(|level| self.is_wildcard_level(level))
    }

    pub(crate) fn is_wildcard_level(&self, level: &str) -> bool {
        level == self.single_level || level == self.multi_level
    }
}
