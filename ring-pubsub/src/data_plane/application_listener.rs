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

//! Caller-facing listener contract and its adapter onto the local bus.

use crate::error::ListenerError;
use crate::local_bus::BusListener;
use crate::message::{Delivery, Message};
use async_trait::async_trait;
use std::future::Future;
use std::marker::PhantomData;
use std::sync::Arc;

/// Application callback invoked for every message matching a subscribed topic.
#[async_trait]
pub trait Listener: Send + Sync {
    async fn on_message(&self, message: Arc<Message>) -> Result<(), ListenerError>;
}

/// [`Listener`] backed by an async closure.
pub struct FnListener<F, Fut> {
    callback: F,
    _future: PhantomData<fn() -> Fut>,
}

#[async_trait]
impl<F, Fut> Listener for FnListener<F, Fut>
where
    F: Fn(Arc<Message>) -> Fut + Send + Sync,
    Fut: Future<Output = Result<(), ListenerError>> + Send,
{
    async fn on_message(&self, message: Arc<Message>) -> Result<(), ListenerError> {
        (self.callback)(message).await
    }
}

/// Wraps an async closure into a shareable [`Listener`].
///
/// ```
/// use ring_pubsub::{listener_fn, ListenerError};
///
/// let listener = listener_fn(|message| async move {
///     println!("{}", message.topic);
///     Ok::<(), ListenerError>(())
/// });
/// # let _ = listener;
/// ```
pub fn listener_fn<F, Fut>(callback: F) -> Arc<dyn Listener>
where
    F: Fn(Arc<Message>) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ListenerError>> + Send + 'static,
{
    Arc::new(FnListener {
        callback,
        _future: PhantomData,
    })
}

/// Registers an application [`Listener`] on the local bus.
///
/// Replica deliveries only exist for the routers' benefit and never reach the
/// application.
pub(crate) struct ApplicationListener {
    listener: Arc<dyn Listener>,
}

impl ApplicationListener {
    pub(crate) fn new(listener: Arc<dyn Listener>) -> Self {
        Self { listener }
    }
}

#[async_trait]
impl BusListener for ApplicationListener {
    async fn on_delivery(&self, delivery: &Delivery) -> Result<(), ListenerError> {
        if delivery.is_replica() {
            return Ok(());
        }
        self.listener.on_message(delivery.message().clone()).await
    }
}
