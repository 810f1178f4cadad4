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

//! Per-key ownership state machine driven by membership tracker events.

use crate::membership::{Membership, PeerId, RingEvent, TrackHandle, TrackOptions};

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub(crate) enum TrackerRole {
    Owner,
    Standby,
    Detached,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) enum TrackerTransition {
    /// Owner lost the key.
    Moved { to: PeerId },
    /// Standby became the owner.
    Promoted,
    /// Standby fell off the successor chain.
    Demoted,
    /// Owner's successor changed.
    ReplicaChanged(Option<PeerId>),
}

/// Ownership facts for the tracked key sampled when an event arrives.
#[derive(Clone, Debug, PartialEq, Eq)]
pub(crate) struct OwnershipView {
    pub(crate) owned: bool,
    pub(crate) successor: Option<PeerId>,
}

impl OwnershipView {
    pub(crate) fn sample(membership: &dyn Membership, key: &str) -> Self {
        Self {
            owned: membership.allocated_to_me(key),
            successor: membership.next(key),
        }
    }
}

pub(crate) struct MigrationTracker {
    key: String,
    me: PeerId,
    role: TrackerRole,
    handle: TrackHandle,
}

impl MigrationTracker {
    pub(crate) fn owner(membership: &dyn Membership, key: &str) -> Self {
        Self::with_handle(
            key,
            membership.whoami(),
            TrackerRole::Owner,
            membership.track(key, TrackOptions { replica: false }),
        )
    }

    pub(crate) fn standby(membership: &dyn Membership, key: &str) -> Self {
        Self::with_handle(
            key,
            membership.whoami(),
            TrackerRole::Standby,
            membership.track(key, TrackOptions { replica: true }),
        )
    }

    fn with_handle(key: &str, me: PeerId, role: TrackerRole, handle: TrackHandle) -> Self {
        Self {
            key: key.to_string(),
            me,
            role,
            handle,
        }
    }

    pub(crate) fn key(&self) -> &str {
        &self.key
    }

    pub(crate) fn role(&self) -> TrackerRole {
        self.role
    }

    /// Folds one ring event into the state machine.
    pub(crate) fn apply(
        &mut self,
        event: RingEvent,
        view: &OwnershipView,
    ) -> Option<TrackerTransition> {
        match (self.role, event) {
            (TrackerRole::Detached, _) => None,
            (TrackerRole::Owner, RingEvent::Move(to)) if to != self.me => {
                self.role = TrackerRole::Detached;
                Some(TrackerTransition::Moved { to })
            }
            (TrackerRole::Owner, RingEvent::Move(_)) => None,
            (TrackerRole::Owner, RingEvent::Replica(successor)) => {
                Some(TrackerTransition::ReplicaChanged(successor))
            }
            (TrackerRole::Standby, RingEvent::Move(to)) if to == self.me || view.owned => {
                self.role = TrackerRole::Owner;
                Some(TrackerTransition::Promoted)
            }
            (TrackerRole::Standby, _) if view.owned => {
                self.role = TrackerRole::Owner;
                Some(TrackerTransition::Promoted)
            }
            (TrackerRole::Standby, _) if view.successor.as_deref() == Some(self.me.as_str()) => {
                None
            }
            (TrackerRole::Standby, _) => {
                self.role = TrackerRole::Detached;
                Some(TrackerTransition::Demoted)
            }
        }
    }

    /// Waits for the next event that changes something. `None` once tracking ended.
    pub(crate) async fn next_transition(
        &mut self,
        membership: &dyn Membership,
    ) -> Option<TrackerTransition> {
        loop {
            if self.role == TrackerRole::Detached {
                return None;
            }
            let event = self.handle.next_event().await?;
            let view = OwnershipView::sample(membership, &self.key);
            if let Some(transition) = self.apply(event, &view) {
                return Some(transition);
            }
        }
    }

    pub(crate) fn end(&mut self) {
        self.role = TrackerRole::Detached;
        self.handle.end();
    }
}

#[cfg(test)]
mod tests {
    use super::{MigrationTracker, OwnershipView, TrackerRole, TrackerTransition};
    use crate::membership::{RingEvent, TrackHandle};
    use tokio::sync::mpsc;

    fn tracker(role: TrackerRole) -> (MigrationTracker, mpsc::UnboundedSender<RingEvent>) {
        let (tx, rx) = mpsc::unbounded_channel();
        let handle = TrackHandle::new("a/b", rx, || {});
        (
            MigrationTracker::with_handle("a/b", "peer-a".to_string(), role, handle),
            tx,
        )
    }

    fn view(owned: bool, successor: Option<&str>) -> OwnershipView {
        OwnershipView {
            owned,
            successor: successor.map(str::to_string),
        }
    }

    #[test]
    fn owner_detaches_when_key_moves_away() {
        let (mut tracker, _tx) = tracker(TrackerRole::Owner);

        let transition = tracker.apply(RingEvent::Move("peer-b".to_string()), &view(false, None));

        assert_eq!(
            transition,
            Some(TrackerTransition::Moved {
                to: "peer-b".to_string()
            })
        );
        assert_eq!(tracker.role(), TrackerRole::Detached);
        assert_eq!(
            tracker.apply(RingEvent::Replica(None), &view(false, None)),
            None
        );
    }

    #[test]
    fn owner_reports_successor_changes() {
        let (mut tracker, _tx) = tracker(TrackerRole::Owner);

        let transition = tracker.apply(
            RingEvent::Replica(Some("peer-c".to_string())),
            &view(true, Some("peer-c")),
        );

        assert_eq!(
            transition,
            Some(TrackerTransition::ReplicaChanged(Some("peer-c".to_string())))
        );
        assert_eq!(tracker.role(), TrackerRole::Owner);
    }

    #[test]
    fn standby_is_promoted_when_key_moves_here() {
        let (mut tracker, _tx) = tracker(TrackerRole::Standby);

        let transition = tracker.apply(RingEvent::Move("peer-a".to_string()), &view(true, None));

        assert_eq!(transition, Some(TrackerTransition::Promoted));
        assert_eq!(tracker.role(), TrackerRole::Owner);
    }

    #[test]
    fn standby_stays_silent_while_still_successor() {
        let (mut tracker, _tx) = tracker(TrackerRole::Standby);

        let transition = tracker.apply(
            RingEvent::Move("peer-x".to_string()),
            &view(false, Some("peer-a")),
        );

        assert_eq!(transition, None);
        assert_eq!(tracker.role(), TrackerRole::Standby);
    }

    #[test]
    fn standby_is_demoted_when_off_successor_chain() {
        let (mut tracker, _tx) = tracker(TrackerRole::Standby);

        let transition = tracker.apply(
            RingEvent::Replica(Some("peer-c".to_string())),
            &view(false, Some("peer-c")),
        );

        assert_eq!(transition, Some(TrackerTransition::Demoted));
        assert_eq!(tracker.role(), TrackerRole::Detached);
    }

    #[tokio::test]
    async fn end_stops_transitions() {
        let (mut tracker, tx) = tracker(TrackerRole::Owner);

        tracker.end();
        let _ = tx.send(RingEvent::Move("peer-b".to_string()));

        assert_eq!(tracker.role(), TrackerRole::Detached);
        assert_eq!(tracker.key(), "a/b");
    }
}
