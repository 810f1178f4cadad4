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

//! Handling of `publish` commands: local delivery, then replication to the successor.

use crate::control_plane::router_context::RouterContext;
use crate::error::PubSubError;
use crate::membership::{PubSubReply, PubSubRequest, PublishRequest};
use crate::message::Message;
use crate::observability::events;
use std::sync::Arc;
use tracing::{debug, warn};

const COMPONENT: &str = "publish_router";

pub(crate) async fn publish(
    context: &Arc<RouterContext>,
    request: PublishRequest,
) -> Result<PubSubReply, PubSubError> {
    let PublishRequest { key, msg, replica } = request;

    if context.is_closing() {
        debug!(
            event = events::PUBLISH_REJECTED_CLOSING,
            component = COMPONENT,
            topic = msg.topic.as_str(),
            key = key.as_str(),
            "instance closing, rejecting publish"
        );
        return Err(PubSubError::Closing);
    }

    debug!(
        event = events::PUBLISH_RECEIVED,
        component = COMPONENT,
        topic = msg.topic.as_str(),
        key = key.as_str(),
        replica,
        "emitting message"
    );

    let message = Arc::new(msg);
    let delivered = context.deliver_locally(message.clone(), replica).await;

    if let Err(err) = &delivered {
        debug!(
            event = events::PUBLISH_DELIVERY_FAILED,
            component = COMPONENT,
            topic = message.topic.as_str(),
            key = key.as_str(),
            err = %err,
            "local delivery failed"
        );
    }

    if should_replicate(context, &key, &message, replica) {
        let context = context.clone();
        tokio::spawn(async move {
            replicate(&context, key, message).await;
        });
    }

    delivered.map(|_| PubSubReply::Published)
}

fn should_replicate(context: &RouterContext, key: &str, message: &Message, replica: bool) -> bool {
    !replica
        && !context.syntax().is_low_wildcard(&message.topic)
        && context.membership().allocated_to_me(key)
}

async fn replicate(context: &RouterContext, key: String, message: Arc<Message>) {
    let Some(successor) = context.membership().next(&key) else {
        debug!(
            event = events::REPLICATION_SKIPPED,
            component = COMPONENT,
            key = key.as_str(),
            reason = "no_successor",
            "nothing to replicate to"
        );
        return;
    };

    if context.is_closing() {
        return;
    }

    debug!(
        event = events::REPLICATION_SEND,
        component = COMPONENT,
        key = key.as_str(),
        peer = successor.as_str(),
        "replicating publish to successor"
    );

    let request = PubSubRequest::Publish(PublishRequest {
        key: key.clone(),
        msg: Message::clone(&message),
        replica: true,
    });

    let result = match context.membership().peer_conn(&successor) {
        Ok(connection) => connection.request(request).await,
        Err(err) => Err(err),
    };

    match result {
        Ok(_) => debug!(
            event = events::REPLICATION_OK,
            component = COMPONENT,
            key = key.as_str(),
            peer = successor.as_str(),
            "replica delivered"
        ),
        Err(err) => {
            let err = PubSubError::Replication(err.to_string());
            warn!(
                event = events::REPLICATION_FAILED,
                component = COMPONENT,
                key = key.as_str(),
                peer = successor.as_str(),
                err = %err,
                "replication failed"
            );
        }
    }
}
