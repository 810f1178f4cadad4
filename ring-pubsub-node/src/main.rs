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

mod config;

use crate::config::Config;
use clap::Parser;
use memory_ring::MemoryCluster;
use ring_pubsub::{listener_fn, ListenerError, Message, RingPubSub};
use serde_json::json;
use std::error::Error;
use std::fs::File;
use std::io::Read;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

#[derive(Parser)]
#[command()]
struct NodeArgs {
    #[arg(short, long, value_name = "FILE")]
    config: String,
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    let _ = tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .try_init();

    info!("Started ring-pubsub-node");

    // Get the config file.
    let args = NodeArgs::parse();
    let mut file = File::open(&args.config)
        .map_err(|e| format!("Unable to open config file {}: {e}", args.config))?;
    let mut contents = String::new();
    file.read_to_string(&mut contents)
        .map_err(|e| format!("Unable to read config file: {e}"))?;
    let config: Config =
        json5::from_str(&contents).map_err(|e| format!("Unable to parse config file: {e}"))?;
    config.validate()?;

    // Boot every peer on one in-process ring.
    let cluster = MemoryCluster::with_virtual_nodes(config.cluster.virtual_nodes);
    let mut nodes = Vec::with_capacity(config.cluster.peers.len());
    for peer in &config.cluster.peers {
        let node = RingPubSub::new(cluster.join(peer), config.pubsub.clone());
        let me = node.whoami();
        node.on(
            &config.demo.subscribe,
            listener_fn(move |message| {
                let me = me.clone();
                async move {
                    info!(
                        peer = me.as_str(),
                        topic = message.topic.as_str(),
                        payload = %message.payload,
                        "received"
                    );
                    Ok::<(), ListenerError>(())
                }
            }),
        )
        .await?;
        nodes.push(node);
    }

    info!(peers = ?cluster.peers(), topic = config.demo.topic.as_str(), "cluster is up");

    let mut interval = tokio::time::interval(config.demo.publish_interval());
    let mut sequence: u64 = 0;
    loop {
        tokio::select! {
            _ = interval.tick() => {
                sequence += 1;
                for node in &nodes {
                    let message = Message::new(
                        config.demo.topic.clone(),
                        json!({ "from": node.whoami(), "seq": sequence }),
                    );
                    if let Err(err) = node.emit(message).await {
                        warn!(peer = node.whoami().as_str(), %err, "publish failed");
                    }
                }
            }
            _ = tokio::signal::ctrl_c() => {
                info!("Shutting down");
                break;
            }
        }
    }

    for node in nodes {
        node.close().await?;
    }

    Ok(())
}
