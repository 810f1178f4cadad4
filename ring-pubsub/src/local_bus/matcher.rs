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

//! Level-wise topic pattern matching.

use crate::routing::topic_key::TopicSyntax;

#[derive(Clone, Debug, PartialEq, Eq)]
enum PatternLevel {
    Literal(String),
    /// Exactly one level, any value.
    Single,
    /// Zero or more trailing levels.
    Multi,
}

/// Parsed subscription topic.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct TopicPattern {
    source: String,
    levels: Vec<PatternLevel>,
}

impl TopicPattern {
    pub(crate) fn parse(pattern: &str, syntax: &TopicSyntax) -> Self {
        let levels = pattern
            .split(syntax.separator.as_str())
            .map(|level| {
                if level == syntax.multi_level {
                    PatternLevel::Multi
                } else if level == syntax.single_level {
                    PatternLevel::Single
                } else {
                    PatternLevel::Literal(level.to_string())
                }
            })
            .collect();

        Self {
            source: pattern.to_string(),
            levels,
        }
    }

    pub(crate) fn as_str(&self) -> &str {
        &self.source
    }

    pub(crate) fn matches(&self, topic: &str, syntax: &TopicSyntax) -> bool {
        let mut topic_levels = topic.split(syntax.separator.as_str());

        for level in &self.levels {
            match level {
                PatternLevel::Multi => return true,
                PatternLevel::Single => {
                    if topic_levels.next().is_none() {
                        return false;
                    }
                }
                PatternLevel::Literal(literal) => match topic_levels.next() {
                    Some(topic_level) if topic_level == literal => {}
                    _ => return false,
                },
            }
        }

        topic_levels.next().is_none()
    }
}
