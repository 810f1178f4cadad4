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

//! Routing layer.
//!
//! Pure topic classification plus the per-round bookkeeping used to suppress
//! duplicate deliveries. Nothing in here talks to the network.
//!
//! ```
//! use ring_pubsub::TopicSyntax;
//!
//! let syntax = TopicSyntax::default();
//!
//! // keyed topics route to one owner, low wildcards fan out to every peer
//! assert_eq!(syntax.derive_key("sensors/kitchen/temp"), "sensors/kitchen");
//! assert!(!syntax.is_low_wildcard("sensors/kitchen/+"));
//! assert!(syntax.is_low_wildcard("sensors/+"));
//! ```

pub(crate) mod dedup_window;
pub(crate) mod delivery_rounds;
pub(crate) mod topic_key;
