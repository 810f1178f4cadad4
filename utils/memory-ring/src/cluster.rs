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

//! In-process cluster: shared ring, per-peer handlers, key trackers and open streams.

use crate::hash_ring::{RingSnapshot, DEFAULT_VIRTUAL_NODES};
use arc_swap::ArcSwap;
use async_trait::async_trait;
use ring_pubsub::membership::{
    CommandHandler, MembershipEvent, PeerConnection, PubSubReply, PubSubRequest, RingEvent,
    TrackHandle, TrackOptions,
};
use ring_pubsub::{DeliveryStream, Membership, PeerId, PubSubError};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info};

const COMPONENT: &str = "memory_ring";
const EVENT_CAPACITY: usize = 64;

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(|e| e.into_inner())
}

struct PeerSlot {
    id: PeerId,
    alive: AtomicBool,
    handler: Mutex<Option<Arc<dyn CommandHandler>>>,
    events: broadcast::Sender<MembershipEvent>,
}

impl PeerSlot {
    fn new(id: &str) -> Self {
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        Self {
            id: id.to_string(),
            alive: AtomicBool::new(false),
            handler: Mutex::new(None),
            events,
        }
    }

    fn is_alive(&self) -> bool {
        self.alive.load(Ordering::SeqCst)
    }

    fn notify(&self, event: MembershipEvent) {
        // nobody listening yet is fine
        let _ = self.events.send(event);
    }
}

struct TrackerEntry {
    id: u64,
    peer: PeerId,
    key: String,
    owner: Option<PeerId>,
    successor: Option<PeerId>,
    events: mpsc::UnboundedSender<RingEvent>,
}

struct StreamEntry {
    requester: PeerId,
    target: PeerId,
    stream: Arc<dyn DeliveryStream>,
}

struct ClusterState {
    ring: ArcSwap<RingSnapshot>,
    peers: Mutex<HashMap<PeerId, Arc<PeerSlot>>>,
    trackers: Mutex<Vec<TrackerEntry>>,
    streams: Mutex<Vec<StreamEntry>>,
    next_tracker: AtomicU64,
}

/// Shared consistent-hash ring hosting any number of in-process peers.
#[derive(Clone)]
pub struct MemoryCluster {
    state: Arc<ClusterState>,
}

impl Default for MemoryCluster {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryCluster {
    pub fn new() -> Self {
        Self::with_virtual_nodes(DEFAULT_VIRTUAL_NODES)
    }

    pub fn with_virtual_nodes(virtual_nodes: usize) -> Self {
        Self {
            state: Arc::new(ClusterState {
                ring: ArcSwap::from_pointee(RingSnapshot::new(virtual_nodes)),
                peers: Mutex::new(HashMap::new()),
                trackers: Mutex::new(Vec::new()),
                streams: Mutex::new(Vec::new()),
                next_tracker: AtomicU64::new(0),
            }),
        }
    }

    /// Registers `peer` without placing it on the ring; call [`MemoryRing::start`] later.
    pub fn prepare(&self, peer: &str) -> Arc<MemoryRing> {
        let slot = Arc::new(PeerSlot::new(peer));
        lock(&self.state.peers).insert(peer.to_string(), slot.clone());

        Arc::new(MemoryRing {
            cluster: self.clone(),
            slot,
        })
    }

    /// Registers `peer` and places it on the ring right away.
    pub fn join(&self, peer: &str) -> Arc<MemoryRing> {
        let ring = self.prepare(peer);
        ring.start();
        ring
    }

    /// Removes `peer` abruptly, as if its process died.
    pub fn kill(&self, peer: &str) {
        self.remove(peer, "killed");
    }

    pub fn owner_of(&self, key: &str) -> Option<PeerId> {
        self.state.ring.load().owner(key)
    }

    pub fn successor_of(&self, key: &str) -> Option<PeerId> {
        self.state.ring.load().successor(key)
    }

    pub fn peers(&self) -> Vec<PeerId> {
        self.state.ring.load().peers()
    }

    /// Live delivery streams opened through this cluster.
    pub fn open_streams(&self) -> usize {
        let mut streams = lock(&self.state.streams);
        streams.retain(|entry| !entry.stream.is_closed());
        streams.len()
    }

    /// First `{prefix}/{n}` topic owned by `owner` (and, if given, with `successor` next).
    pub fn key_owned_by(
        &self,
        prefix: &str,
        owner: &str,
        successor: Option<&str>,
    ) -> Option<String> {
        let ring = self.state.ring.load();
        (0..100_000).map(|n| format!("{prefix}/{n}")).find(|key| {
            ring.owner(key).as_deref() == Some(owner)
                && successor.map_or(true, |successor| {
                    ring.successor(key).as_deref() == Some(successor)
                })
        })
    }

    /// First `{prefix}/{n}` topic that would move to `joining` once it starts, with
    /// its current owner.
    pub fn key_moving_to(&self, prefix: &str, joining: &str) -> Option<(String, PeerId)> {
        let current = self.state.ring.load();
        let future = current.with_peer(joining);
        (0..100_000).map(|n| format!("{prefix}/{n}")).find_map(|key| {
            match (current.owner(&key), future.owner(&key)) {
                (Some(before), Some(after)) if after == joining && before != joining => {
                    Some((key, before))
                }
                _ => None,
            }
        })
    }

    fn slot(&self, peer: &str) -> Option<Arc<PeerSlot>> {
        lock(&self.state.peers).get(peer).cloned()
    }

    fn add(&self, peer: &str) {
        let Some(slot) = self.slot(peer) else {
            return;
        };
        if slot.alive.swap(true, Ordering::SeqCst) {
            return;
        }

        self.state.ring.rcu(|ring| ring.with_peer(peer));
        self.refresh_trackers();

        info!(component = COMPONENT, peer, "peer joined the ring");
        for other in self.alive_slots() {
            if other.id == peer {
                other.notify(MembershipEvent::Up);
            } else {
                other.notify(MembershipEvent::PeerUp(peer.to_string()));
            }
        }
    }

    fn remove(&self, peer: &str, reason: &'static str) {
        let Some(slot) = self.slot(peer) else {
            return;
        };
        if !slot.alive.swap(false, Ordering::SeqCst) {
            return;
        }

        self.state.ring.rcu(|ring| ring.without_peer(peer));
        lock(&slot.handler).take();
        lock(&self.state.trackers).retain(|tracker| tracker.peer != peer);
        self.refresh_trackers();

        let closed: Vec<Arc<dyn DeliveryStream>> = {
            let mut streams = lock(&self.state.streams);
            let (dead, alive): (Vec<StreamEntry>, Vec<StreamEntry>) =
                streams.drain(..).partition(|entry| {
                    entry.requester == peer || entry.target == peer || entry.stream.is_closed()
                });
            *streams = alive;
            dead.into_iter().map(|entry| entry.stream).collect()
        };
        for stream in &closed {
            stream.destroy();
        }

        info!(
            component = COMPONENT,
            peer,
            reason,
            closed_streams = closed.len(),
            "peer left the ring"
        );
        slot.notify(MembershipEvent::Close);
        for other in self.alive_slots() {
            other.notify(MembershipEvent::PeerDown(peer.to_string()));
        }
    }

    fn alive_slots(&self) -> Vec<Arc<PeerSlot>> {
        lock(&self.state.peers)
            .values()
            .filter(|slot| slot.is_alive())
            .cloned()
            .collect()
    }

    /// Re-evaluates every tracked key against the current ring.
    fn refresh_trackers(&self) {
        let ring = self.state.ring.load();
        let mut trackers = lock(&self.state.trackers);
        trackers.retain(|tracker| !tracker.events.is_closed());

        for tracker in trackers.iter_mut() {
            let owner = ring.owner(&tracker.key);
            let successor = ring.successor(&tracker.key);

            if owner != tracker.owner {
                tracker.owner = owner.clone();
                if let Some(owner) = owner {
                    debug!(
                        component = COMPONENT,
                        tracker_id = tracker.id,
                        peer = tracker.peer.as_str(),
                        key = tracker.key.as_str(),
                        owner = owner.as_str(),
                        "tracked key moved"
                    );
                    let _ = tracker.events.send(RingEvent::Move(owner));
                }
            }
            if successor != tracker.successor {
                tracker.successor = successor.clone();
                let _ = tracker.events.send(RingEvent::Replica(successor));
            }
        }
    }

    fn track(&self, peer: &str, key: &str) -> TrackHandle {
        let ring = self.state.ring.load();
        let (events, receiver) = mpsc::unbounded_channel();
        let id = self.state.next_tracker.fetch_add(1, Ordering::SeqCst);

        lock(&self.state.trackers).push(TrackerEntry {
            id,
            peer: peer.to_string(),
            key: key.to_string(),
            owner: ring.owner(key),
            successor: ring.successor(key),
            events,
        });

        let state = Arc::downgrade(&self.state);
        TrackHandle::new(key, receiver, move || {
            if let Some(state) = state.upgrade() {
                lock(&state.trackers).retain(|tracker| tracker.id != id);
            }
        })
    }

    async fn dispatch(
        &self,
        requester: &str,
        target: &str,
        request: PubSubRequest,
    ) -> Result<PubSubReply, PubSubError> {
        let alive = |peer: &str| self.slot(peer).is_some_and(|slot| slot.is_alive());

        if !alive(requester) {
            if let Some(stream) = request.messages() {
                stream.destroy();
            }
            return Err(PubSubError::Transport(format!("peer '{requester}' is down")));
        }

        let handler = self
            .slot(target)
            .filter(|slot| slot.is_alive())
            .and_then(|slot| lock(&slot.handler).clone());
        let Some(handler) = handler else {
            if let Some(stream) = request.messages() {
                stream.destroy();
            }
            return Err(PubSubError::PeerUnavailable(target.to_string()));
        };

        if let Some(stream) = request.messages() {
            let mut streams = lock(&self.state.streams);
            streams.retain(|entry| !entry.stream.is_closed());
            streams.push(StreamEntry {
                requester: requester.to_string(),
                target: target.to_string(),
                stream: stream.clone(),
            });
        }

        debug!(
            component = COMPONENT,
            requester,
            target,
            command = request.command(),
            "dispatching request"
        );
        handler.handle(request).await
    }
}

/// [`Membership`] view of one peer of a [`MemoryCluster`].
pub struct MemoryRing {
    cluster: MemoryCluster,
    slot: Arc<PeerSlot>,
}

impl MemoryRing {
    /// Places this peer on the ring; emits `Up` locally and `PeerUp` elsewhere.
    pub fn start(&self) {
        self.cluster.add(&self.slot.id);
    }

    pub fn peer_id(&self) -> &str {
        &self.slot.id
    }

    pub fn cluster(&self) -> &MemoryCluster {
        &self.cluster
    }
}

#[async_trait]
impl Membership for MemoryRing {
    fn whoami(&self) -> PeerId {
        self.slot.id.clone()
    }

    fn is_ready(&self) -> bool {
        self.slot.is_alive()
    }

    fn allocated_to_me(&self, key: &str) -> bool {
        self.slot.is_alive() && self.cluster.owner_of(key).as_deref() == Some(self.peer_id())
    }

    fn next(&self, key: &str) -> Option<PeerId> {
        self.cluster.successor_of(key)
    }

    fn peers(&self, include_self: bool) -> Vec<PeerId> {
        self.cluster
            .peers()
            .into_iter()
            .filter(|peer| include_self || peer != self.peer_id())
            .collect()
    }

    fn track(&self, key: &str, _options: TrackOptions) -> TrackHandle {
        self.cluster.track(&self.slot.id, key)
    }

    fn events(&self) -> broadcast::Receiver<MembershipEvent> {
        self.slot.events.subscribe()
    }

    fn serve(&self, _namespace: &'static str, handler: Arc<dyn CommandHandler>) {
        *lock(&self.slot.handler) = Some(handler);
    }

    async fn request(
        &self,
        key: &str,
        request: PubSubRequest,
    ) -> Result<PubSubReply, PubSubError> {
        let Some(owner) = self.cluster.owner_of(key) else {
            return Err(PubSubError::Transport("ring is empty".to_string()));
        };
        self.cluster.dispatch(&self.slot.id, &owner, request).await
    }

    fn peer_conn(&self, peer: &str) -> Result<Arc<dyn PeerConnection>, PubSubError> {
        if !self.cluster.state.ring.load().contains(peer) {
            return Err(PubSubError::PeerUnavailable(peer.to_string()));
        }
        Ok(Arc::new(MemoryConnection {
            cluster: self.cluster.clone(),
            requester: self.slot.id.clone(),
            target: peer.to_string(),
        }))
    }

    async fn close(&self) {
        self.cluster.remove(&self.slot.id, "closed");
    }
}

struct MemoryConnection {
    cluster: MemoryCluster,
    requester: PeerId,
    target: PeerId,
}

#[async_trait]
impl PeerConnection for MemoryConnection {
    fn peer(&self) -> &str {
        &self.target
    }

    async fn request(&self, request: PubSubRequest) -> Result<PubSubReply, PubSubError> {
        self.cluster
            .dispatch(&self.requester, &self.target, request)
            .await
    }
}
