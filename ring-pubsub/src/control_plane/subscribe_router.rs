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

//! Handling of `subscribe` commands and the lifetime of the resulting stream listeners.

use crate::control_plane::migration_tracker::{MigrationTracker, TrackerTransition};
use crate::control_plane::router_context::RouterContext;
use crate::data_plane::stream::{DeliveryFrame, DeliveryStream};
use crate::data_plane::subscription_listener::{ListenerMode, SubscriptionListener};
use crate::error::PubSubError;
use crate::local_bus::BusListener;
use crate::membership::{PeerId, PubSubReply, SubscribeRequest};
use crate::observability::{events, fields};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

const COMPONENT: &str = "subscribe_router";

/// Registration decided for one incoming subscribe request.
struct Placement {
    mode: ListenerMode,
    tracker: Option<MigrationTracker>,
    replica: Option<PeerId>,
}

fn place(context: &RouterContext, request: &SubscribeRequest) -> Result<Placement, PubSubError> {
    let membership = context.membership();

    let key = match &request.key {
        Some(key) if !context.syntax().is_low_wildcard(&request.topic) => key,
        _ => {
            return Ok(Placement {
                mode: ListenerMode::Primary,
                tracker: None,
                replica: None,
            })
        }
    };

    // a peer owning the key delivers to itself through its own bus
    if request.from == *context.me() {
        return Err(PubSubError::NotAllocated(key.clone()));
    }

    if membership.allocated_to_me(key) {
        return Ok(Placement {
            mode: ListenerMode::Primary,
            tracker: Some(MigrationTracker::owner(membership.as_ref(), key)),
            replica: membership.next(key),
        });
    }

    if request.replica {
        return Ok(Placement {
            mode: ListenerMode::Standby { key: key.clone() },
            tracker: Some(MigrationTracker::standby(membership.as_ref(), key)),
            replica: None,
        });
    }

    Err(PubSubError::NotAllocated(key.clone()))
}

pub(crate) async fn subscribe(
    context: &Arc<RouterContext>,
    request: SubscribeRequest,
) -> Result<PubSubReply, PubSubError> {
    let Some(stream) = request.messages.clone() else {
        warn!(
            event = events::SUBSCRIBE_NO_STREAM,
            component = COMPONENT,
            topic = request.topic.as_str(),
            from = request.from.as_str(),
            "subscribe request without messages stream"
        );
        return Err(PubSubError::NoStream);
    };

    if context.is_closing() {
        debug!(
            event = events::SUBSCRIBE_REJECTED_CLOSING,
            component = COMPONENT,
            topic = request.topic.as_str(),
            from = request.from.as_str(),
            "instance closing, rejecting subscribe"
        );
        stream.destroy();
        return Err(PubSubError::Closing);
    }

    let subscription_id = Uuid::new_v4().to_string();
    debug!(
        event = events::SUBSCRIBE_RECEIVED,
        component = COMPONENT,
        subscription_id = subscription_id.as_str(),
        topic = request.topic.as_str(),
        key = fields::format_key(request.key.as_deref()).as_str(),
        from = request.from.as_str(),
        replica = request.replica,
        "subscribe received"
    );

    let placement = match place(context, &request) {
        Ok(placement) => placement,
        Err(err) => {
            info!(
                event = events::SUBSCRIBE_NOT_ALLOCATED,
                component = COMPONENT,
                subscription_id = subscription_id.as_str(),
                topic = request.topic.as_str(),
                from = request.from.as_str(),
                "key not allocated here, closing stream"
            );
            stream.destroy();
            return Err(err);
        }
    };

    let listener: Arc<dyn BusListener> = Arc::new(SubscriptionListener::new(
        &subscription_id,
        &request.topic,
        &request.from,
        placement.mode.clone(),
        stream.clone(),
        context.clone(),
    ));

    if let Err(err) = context.bus().on(&request.topic, listener.clone()).await {
        stream.destroy();
        return Err(err);
    }

    context.inbound().insert(&subscription_id, stream.clone());
    let watcher = tokio::spawn(watch_subscription(
        context.clone(),
        WatchedSubscription {
            subscription_id: subscription_id.clone(),
            topic: request.topic.clone(),
            listener,
            stream,
            tracker: placement.tracker,
        },
    ));
    context.inbound().attach_watcher(&subscription_id, watcher);

    info!(
        event = events::SUBSCRIBE_REGISTERED,
        component = COMPONENT,
        subscription_id = subscription_id.as_str(),
        topic = request.topic.as_str(),
        from = request.from.as_str(),
        standby = matches!(placement.mode, ListenerMode::Standby { .. }),
        replica = fields::format_peer(placement.replica.as_ref()).as_str(),
        "subscription registered"
    );

    Ok(PubSubReply::Subscribed {
        replica: placement.replica,
    })
}

struct WatchedSubscription {
    subscription_id: String,
    topic: String,
    listener: Arc<dyn BusListener>,
    stream: Arc<dyn DeliveryStream>,
    tracker: Option<MigrationTracker>,
}

/// Follows ownership of a keyed subscription until its stream closes, then unregisters it.
async fn watch_subscription(context: Arc<RouterContext>, mut watched: WatchedSubscription) {
    let subscription_id = watched.subscription_id.clone();

    loop {
        let transition = match watched.tracker.as_mut() {
            Some(tracker) => {
                tokio::select! {
                    _ = watched.stream.closed() => break,
                    transition = tracker.next_transition(context.membership().as_ref()) => {
                        transition
                    }
                }
            }
            None => {
                watched.stream.closed().await;
                break;
            }
        };

        match transition {
            None => {
                watched.tracker = None;
            }
            Some(TrackerTransition::Moved { to }) => {
                info!(
                    event = events::SUBSCRIPTION_MOVED,
                    component = COMPONENT,
                    subscription_id = subscription_id.as_str(),
                    topic = watched.topic.as_str(),
                    peer = to.as_str(),
                    reason = fields::REASON_OWNERSHIP_MOVED,
                    "key moved, closing subscriber stream"
                );
                watched.stream.destroy();
                break;
            }
            Some(TrackerTransition::Demoted) => {
                info!(
                    event = events::SUBSCRIPTION_DEMOTED,
                    component = COMPONENT,
                    subscription_id = subscription_id.as_str(),
                    topic = watched.topic.as_str(),
                    reason = fields::REASON_OFF_SUCCESSOR_CHAIN,
                    "standby no longer on the successor chain"
                );
                watched.stream.destroy();
                break;
            }
            Some(TrackerTransition::Promoted) => {
                info!(
                    event = events::SUBSCRIPTION_PROMOTED,
                    component = COMPONENT,
                    subscription_id = subscription_id.as_str(),
                    topic = watched.topic.as_str(),
                    "standby subscription now owns the key"
                );
            }
            Some(TrackerTransition::ReplicaChanged(successor)) => {
                debug!(
                    event = events::SUBSCRIPTION_REPLICA_CHANGED,
                    component = COMPONENT,
                    subscription_id = subscription_id.as_str(),
                    topic = watched.topic.as_str(),
                    replica = fields::format_peer(successor.as_ref()).as_str(),
                    "announcing new successor"
                );
                if let Err(err) = watched
                    .stream
                    .write(DeliveryFrame::Replica(successor))
                    .await
                {
                    debug!(
                        component = COMPONENT,
                        subscription_id = subscription_id.as_str(),
                        err = %err,
                        "unable to announce successor"
                    );
                }
            }
        }
    }

    if let Some(tracker) = watched.tracker.as_mut() {
        tracker.end();
    }
    if let Err(err) = context
        .bus()
        .remove_listener(&watched.topic, &watched.listener)
        .await
    {
        debug!(
            component = COMPONENT,
            subscription_id = subscription_id.as_str(),
            err = %err,
            "unable to remove subscription listener"
        );
    }
    context.inbound().remove(&subscription_id);

    debug!(
        event = events::SUBSCRIPTION_STREAM_CLOSED,
        component = COMPONENT,
        subscription_id = subscription_id.as_str(),
        topic = watched.topic.as_str(),
        "subscription stream closed"
    );
}

#[cfg(test)]
mod tests {
    use super::subscribe;
    use crate::config::PubSubConfig;
    use crate::control_plane::router_context::RouterContext;
    use crate::data_plane::stream::{delivery_channel, DeliveryFrame, DeliveryStream};
    use crate::error::PubSubError;
    use crate::local_bus::TopicBus;
    use crate::membership::{PubSubReply, SubscribeRequest};
    use crate::message::Message;
    use crate::test_support::SoloMembership;
    use serde_json::json;
    use std::sync::Arc;
    use std::time::Duration;

    fn context() -> Arc<RouterContext> {
        Arc::new(RouterContext::new(
            SoloMembership::new("solo", true),
            Arc::new(TopicBus::default()),
            PubSubConfig::default(),
        ))
    }

    fn request(from: &str, stream: Option<Arc<dyn DeliveryStream>>) -> SubscribeRequest {
        SubscribeRequest {
            topic: "a/b".to_string(),
            key: Some("a/b".to_string()),
            from: from.to_string(),
            replica: false,
            messages: stream,
        }
    }

    #[tokio::test]
    async fn request_without_stream_is_refused() {
        let result = subscribe(&context(), request("peer-b", None)).await;

        assert_eq!(result, Err(PubSubError::NoStream));
    }

    #[tokio::test]
    async fn keyed_subscription_from_self_is_not_allocated() {
        let (writer, _reader) = delivery_channel(1);
        let writer: Arc<dyn DeliveryStream> = Arc::new(writer);

        let result = subscribe(&context(), request("solo", Some(writer.clone()))).await;

        assert_eq!(result, Err(PubSubError::NotAllocated("a/b".to_string())));
        assert!(writer.is_closed());
    }

    #[tokio::test]
    async fn closing_instance_refuses_and_closes_stream() {
        let context = context();
        context.begin_close();
        let (writer, _reader) = delivery_channel(1);
        let writer: Arc<dyn DeliveryStream> = Arc::new(writer);

        let result = subscribe(&context, request("peer-b", Some(writer.clone()))).await;

        assert_eq!(result, Err(PubSubError::Closing));
        assert!(writer.is_closed());
    }

    #[tokio::test]
    async fn owned_subscription_streams_deliveries_until_closed() {
        let context = context();
        let (writer, mut reader) = delivery_channel(4);
        let closer = reader.closer();

        let reply = subscribe(&context, request("peer-b", Some(Arc::new(writer))))
            .await
            .unwrap();
        assert_eq!(reply, PubSubReply::Subscribed { replica: None });
        assert_eq!(context.inbound().len(), 1);

        let consumer = tokio::spawn(async move {
            let inbound = reader.next().await.expect("frame expected");
            let (frame, ack) = inbound.into_parts();
            ack.ack(Ok(()));
            frame
        });
        context
            .deliver_locally(Arc::new(Message::new("a/b", json!(1))), false)
            .await
            .unwrap();
        assert_eq!(
            consumer.await.unwrap(),
            DeliveryFrame::Message(Arc::new(Message::new("a/b", json!(1))))
        );

        closer.destroy();
        tokio::time::timeout(Duration::from_secs(1), async {
            while context.inbound().len() > 0 {
                tokio::task::yield_now().await;
            }
        })
        .await
        .expect("watcher should unregister the subscription");
    }
}
