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

//! Generation counter that stamps every local-bus emit with a delivery round.

use std::sync::atomic::{AtomicU64, Ordering};

pub(crate) const MAX_ROUND: u64 = (1 << 31) - 1;

pub(crate) struct DeliveryRounds {
    current: AtomicU64,
}

impl DeliveryRounds {
    pub(crate) fn new() -> Self {
        Self::starting_at(0)
    }

    fn starting_at(start: u64) -> Self {
        Self {
            current: AtomicU64::new(start),
        }
    }

    /// Returns the next round id, wrapping back to zero after [`MAX_ROUND`].
    pub(crate) fn next_round(&self) -> u64 {
        let mut round = 0;
        let _ = self
            .current
            .fetch_update(Ordering::AcqRel, Ordering::Acquire, |current| {
                round = current;
                Some(if current >= MAX_ROUND { 0 } else { current + 1 })
            });
        round
    }
}
