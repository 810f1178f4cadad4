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

mod support;

use memory_ring::{FailingListener, MemoryCluster, RecordingListener};
use ring_pubsub::{Listener, Message, PubSubError, ReceiverState};
use serde_json::json;
use std::sync::Arc;
use support::{close_all, eventually, init_logging, settle, start_node, start_nodes};

#[tokio::test(flavor = "multi_thread")]
async fn keyed_subscription_receives_publish_from_any_peer() {
    init_logging();

    let cluster = MemoryCluster::new();
    let nodes = start_nodes(&cluster, &["peer-a", "peer-b", "peer-c"]).await;
    let topic = cluster
        .key_owned_by("hello", "peer-a", None)
        .expect("some topic is owned by peer-a");

    let listener = Arc::new(RecordingListener::default());
    nodes[1].on(&topic, listener.clone()).await.unwrap();

    let snapshot = nodes[1].receiver_snapshot(&topic).await.unwrap();
    assert_eq!(snapshot.state, ReceiverState::Active);

    for node in &nodes {
        node.emit(Message::new(topic.clone(), json!({ "from": node.whoami() })))
            .await
            .unwrap();
    }

    listener.wait_for(3).await;
    settle().await;
    assert_eq!(listener.count(), 3);
    assert!(listener.topics().iter().all(|received| *received == topic));

    close_all(&nodes).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn subscription_on_owned_key_is_served_locally() {
    init_logging();

    let cluster = MemoryCluster::new();
    let nodes = start_nodes(&cluster, &["peer-a", "peer-b"]).await;
    let topic = cluster.key_owned_by("own", "peer-b", None).unwrap();

    let listener = Arc::new(RecordingListener::default());
    nodes[1].on(&topic, listener.clone()).await.unwrap();

    let snapshot = nodes[1].receiver_snapshot(&topic).await.unwrap();
    assert_eq!(snapshot.state, ReceiverState::Local);
    assert_eq!(snapshot.streams, 0);

    nodes[0]
        .emit(Message::new(topic.clone(), json!("remote publish")))
        .await
        .unwrap();
    listener.wait_for(1).await;

    close_all(&nodes).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn overlapping_subscriptions_each_see_a_message_once() {
    init_logging();

    let cluster = MemoryCluster::new();
    let nodes = start_nodes(&cluster, &["peer-a", "peer-b", "peer-c"]).await;
    let topic = cluster.key_owned_by("a", "peer-b", None).unwrap();

    let exact = Arc::new(RecordingListener::default());
    let level = Arc::new(RecordingListener::default());
    let everything = Arc::new(RecordingListener::default());
    let subscriber = &nodes[2];
    subscriber.on(&topic, exact.clone()).await.unwrap();
    subscriber.on("a/+", level.clone()).await.unwrap();
    subscriber.on("#", everything.clone()).await.unwrap();

    for seq in 0..5 {
        nodes[0]
            .emit(Message::new(topic.clone(), json!({ "seq": seq })))
            .await
            .unwrap();
    }

    everything.wait_for(5).await;
    settle().await;
    assert_eq!(exact.count(), 5);
    assert_eq!(level.count(), 5);
    assert_eq!(everything.count(), 5);

    let payloads: Vec<_> = exact
        .messages()
        .iter()
        .map(|message| message.payload["seq"].clone())
        .collect();
    assert_eq!(payloads, (0..5).map(|seq| json!(seq)).collect::<Vec<_>>());

    close_all(&nodes).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn wildcard_subscription_reaches_late_joiner() {
    init_logging();

    let cluster = MemoryCluster::new();
    let mut nodes = start_nodes(&cluster, &["peer-a", "peer-b", "peer-c"]).await;

    let everything = Arc::new(RecordingListener::default());
    nodes[2].on("#", everything.clone()).await.unwrap();
    let snapshot = nodes[2].receiver_snapshot("#").await.unwrap();
    assert_eq!(
        snapshot.peers,
        vec!["peer-a".to_string(), "peer-b".to_string()]
    );

    nodes.push(start_node(&cluster, "peer-d").await);
    let subscriber = nodes[2].clone();
    eventually("wildcard stream to peer-d", || {
        let subscriber = subscriber.clone();
        async move {
            subscriber
                .receiver_snapshot("#")
                .await
                .is_some_and(|snapshot| snapshot.peers.contains(&"peer-d".to_string()))
        }
    })
    .await;

    let topic = cluster.key_owned_by("late", "peer-d", None).unwrap();
    nodes[0]
        .emit(Message::new(topic.clone(), json!("hi")))
        .await
        .unwrap();

    everything.wait_for(1).await;
    settle().await;
    assert_eq!(everything.topics(), vec![topic]);

    close_all(&nodes).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn remote_listener_failure_fails_the_publish() {
    init_logging();

    let cluster = MemoryCluster::new();
    let nodes = start_nodes(&cluster, &["peer-a", "peer-b", "peer-c"]).await;
    let topic = cluster.key_owned_by("fail", "peer-a", None).unwrap();

    nodes[1]
        .on(&topic, Arc::new(FailingListener))
        .await
        .unwrap();

    let err = nodes[2]
        .emit(Message::new(topic.clone(), json!(null)))
        .await
        .unwrap_err();
    assert!(matches!(err, PubSubError::Listener(_)), "{err:?}");

    close_all(&nodes).await;
}

#[tokio::test(flavor = "multi_thread")]
async fn removed_listener_stops_receiving() {
    init_logging();

    let cluster = MemoryCluster::new();
    let nodes = start_nodes(&cluster, &["peer-a", "peer-b"]).await;
    let topic = cluster.key_owned_by("rm", "peer-a", None).unwrap();

    let recording = Arc::new(RecordingListener::default());
    let listener: Arc<dyn Listener> = recording.clone();
    nodes[1].on(&topic, listener.clone()).await.unwrap();
    nodes[0]
        .emit(Message::new(topic.clone(), json!(1)))
        .await
        .unwrap();
    recording.wait_for(1).await;

    nodes[1].remove_listener(&topic, &listener).await.unwrap();
    assert!(nodes[1].receiver_snapshot(&topic).await.is_none());

    let owner = nodes[0].clone();
    eventually("owner dropped the subscription", || {
        let owner = owner.clone();
        async move { owner.inbound_subscriptions() == 0 }
    })
    .await;

    nodes[0]
        .emit(Message::new(topic.clone(), json!(2)))
        .await
        .unwrap();
    settle().await;
    assert_eq!(recording.count(), 1);

    close_all(&nodes).await;
}
