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

//! Immutable consistent-hash ring snapshot.

use ring_pubsub::PeerId;
use xxhash_rust::xxh3::xxh3_64;

pub(crate) const DEFAULT_VIRTUAL_NODES: usize = 32;

#[derive(Clone, Debug, Default)]
pub(crate) struct RingSnapshot {
    virtual_nodes: usize,
    /// Sorted by hash, then peer id.
    points: Vec<(u64, PeerId)>,
}

impl RingSnapshot {
    pub(crate) fn new(virtual_nodes: usize) -> Self {
        Self {
            virtual_nodes: virtual_nodes.max(1),
            points: Vec::new(),
        }
    }

    pub(crate) fn with_peer(&self, peer: &str) -> Self {
        let mut points: Vec<(u64, PeerId)> = self
            .points
            .iter()
            .filter(|(_, existing)| existing != peer)
            .cloned()
            .collect();
        points.extend(
            (0..self.virtual_nodes)
                .map(|replica| (xxh3_64(format!("{peer}#{replica}").as_bytes()), peer.to_string())),
        );
        points.sort();

        Self {
            virtual_nodes: self.virtual_nodes,
            points,
        }
    }

    pub(crate) fn without_peer(&self, peer: &str) -> Self {
        Self {
            virtual_nodes: self.virtual_nodes,
            points: self
                .points
                .iter()
                .filter(|(_, existing)| existing != peer)
                .cloned()
                .collect(),
        }
    }

    pub(crate) fn contains(&self, peer: &str) -> bool {
        self.points.iter().any(|(_, existing)| existing == peer)
    }

    pub(crate) fn peers(&self) -> Vec<PeerId> {
        let mut peers: Vec<PeerId> = self.points.iter().map(|(_, peer)| peer.clone()).collect();
        peers.sort();
        peers.dedup();
        peers
    }

    fn owner_index(&self, key: &str) -> Option<usize> {
        if self.points.is_empty() {
            return None;
        }
        let hash = xxh3_64(key.as_bytes());
        let index = self.points.partition_point(|(point, _)| *point < hash);
        Some(if index == self.points.len() { 0 } else { index })
    }

    pub(crate) fn owner(&self, key: &str) -> Option<PeerId> {
        self.owner_index(key)
            .map(|index| self.points[index].1.clone())
    }

    /// First peer clockwise from the owner that is not the owner.
    pub(crate) fn successor(&self, key: &str) -> Option<PeerId> {
        let start = self.owner_index(key)?;
        let owner = &self.points[start].1;

        (1..self.points.len())
            .map(|offset| &self.points[(start + offset) % self.points.len()].1)
            .find(|peer| *peer != owner)
            .cloned()
    }
}
