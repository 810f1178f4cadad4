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

use crate::control_plane::router_context::RouterContext;
use crate::control_plane::{publish_router, subscribe_router};
use crate::error::PubSubError;
use crate::membership::{CommandHandler, PubSubReply, PubSubRequest};
use async_trait::async_trait;
use std::sync::Arc;

/// [`CommandHandler`] registered under the `pubsub` namespace.
pub(crate) struct PubSubCommands {
    context: Arc<RouterContext>,
}

impl PubSubCommands {
    pub(crate) fn new(context: Arc<RouterContext>) -> Self {
        Self { context }
    }
}

#[async_trait]
impl CommandHandler for PubSubCommands {
    async fn handle(&self, request: PubSubRequest) -> Result<PubSubReply, PubSubError> {
        match request {
            PubSubRequest::Publish(request) => {
                publish_router::publish(&self.context, request).await
            }
            PubSubRequest::Subscribe(request) => {
                subscribe_router::subscribe(&self.context, request).await
            }
        }
    }
}
