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

use memory_ring::MemoryCluster;
use ring_pubsub::{PubSubConfig, RingPubSub};
use std::future::Future;
use std::time::Duration;
use tracing_subscriber::EnvFilter;

const EVENTUALLY_TIMEOUT: Duration = Duration::from_secs(5);
const POLL_INTERVAL: Duration = Duration::from_millis(10);

pub(crate) fn init_logging() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_test_writer()
        .try_init();
}

pub(crate) fn test_config() -> PubSubConfig {
    PubSubConfig {
        resubscribe_delay_ms: 50,
        ..PubSubConfig::default()
    }
}

/// Registers `peer`, serves the overlay on it, then places it on the ring.
pub(crate) async fn start_node(cluster: &MemoryCluster, peer: &str) -> RingPubSub {
    let ring = cluster.prepare(peer);
    let node = RingPubSub::new(ring.clone(), test_config());
    ring.start();
    node.ready().await.expect("node should become ready");
    node
}

pub(crate) async fn start_nodes(cluster: &MemoryCluster, peers: &[&str]) -> Vec<RingPubSub> {
    let mut nodes = Vec::with_capacity(peers.len());
    for peer in peers {
        nodes.push(start_node(cluster, peer).await);
    }
    nodes
}

/// Polls `check` until it holds; panics with `what` after five seconds.
pub(crate) async fn eventually<F, Fut>(what: &str, mut check: F)
where
    F: FnMut() -> Fut,
    Fut: Future<Output = bool>,
{
    let polled = tokio::time::timeout(EVENTUALLY_TIMEOUT, async {
        while !check().await {
            tokio::time::sleep(POLL_INTERVAL).await;
        }
    })
    .await;

    assert!(polled.is_ok(), "timed out waiting for {what}");
}

/// Gives in-flight duplicates a chance to show up before counting.
pub(crate) async fn settle() {
    tokio::time::sleep(Duration::from_millis(150)).await;
}

#[allow(dead_code)]
pub(crate) async fn close_all(nodes: &[RingPubSub]) {
    for node in nodes {
        node.close().await.expect("close should succeed");
    }
}
