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

//! In-process consistent-hash ring implementing [`ring_pubsub::Membership`],
//! plus listeners used by tests and demos.

mod cluster;
pub use cluster::{MemoryCluster, MemoryRing};
mod hash_ring;
mod recording_listener;
pub use recording_listener::{FailingListener, RecordingListener};
