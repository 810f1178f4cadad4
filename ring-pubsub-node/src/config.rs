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

use ring_pubsub::PubSubConfig;
use serde::{Deserialize, Serialize};
use std::time::Duration;

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct Config {
    #[serde(default)]
    pub(crate) pubsub: PubSubConfig,
    pub(crate) cluster: ClusterConfig,
    pub(crate) demo: DemoConfig,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct ClusterConfig {
    pub(crate) peers: Vec<String>,
    #[serde(default = "default_virtual_nodes")]
    pub(crate) virtual_nodes: usize,
}

#[derive(Deserialize, Serialize, Debug, Clone)]
#[serde(deny_unknown_fields)]
pub struct DemoConfig {
    pub(crate) topic: String,
    pub(crate) publish_interval_ms: u64,
    #[serde(default = "default_subscribe")]
    pub(crate) subscribe: String,
}

fn default_virtual_nodes() -> usize {
    32
}

fn default_subscribe() -> String {
    "#".to_string()
}

impl DemoConfig {
    pub fn publish_interval(&self) -> Duration {
        Duration::from_millis(self.publish_interval_ms.max(1))
    }
}

impl Config {
    pub fn validate(&self) -> Result<(), String> {
        if self.cluster.peers.is_empty() {
            return Err("cluster.peers must name at least one peer".to_string());
        }
        let mut names = self.cluster.peers.clone();
        names.sort();
        names.dedup();
        if names.len() != self.cluster.peers.len() {
            return Err("cluster.peers contains duplicate names".to_string());
        }
        Ok(())
    }
}
