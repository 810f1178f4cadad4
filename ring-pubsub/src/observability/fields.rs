/********************************************************************************
 * Copyright (c) 2026 Contributors to the Eclipse Foundation
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

//! Canonical structured field values and value-format helpers.

use crate::membership::PeerId;
use crate::message::Message;

pub const NONE: &str = "none";
pub const REASON_OWNERSHIP_MOVED: &str = "ownership_moved";
pub const REASON_OFF_SUCCESSOR_CHAIN: &str = "off_successor_chain";
pub const REASON_RETRIES_EXHAUSTED: &str = "retries_exhausted";
pub const REASON_LOW_WILDCARD_REPLICA: &str = "low_wildcard_replica";
pub const REASON_BASE_NOT_OWNED: &str = "base_not_owned";
pub const REASON_STANDBY_NOT_OWNER: &str = "standby_not_owner";

pub fn format_peer(peer: Option<&PeerId>) -> String {
    peer.cloned().unwrap_or_else(|| NONE.to_string())
}

pub fn format_key(key: Option<&str>) -> String {
    key.map(str::to_string).unwrap_or_else(|| NONE.to_string())
}

/// Compact one-line rendering of a message for debug events.
pub fn format_message(message: &Message) -> String {
    format!("{} {}", message.topic, message.payload)
}
