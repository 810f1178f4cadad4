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


//! Per-round destination filter that collapses concurrent duplicate writes.

use crate::membership::PeerId;
use std::collections::{HashMap, VecDeque};
use std::sync::{Mutex, MutexGuard};
use tokio::sync::watch;

enum ClaimState {
    /// A write is in flight; the channel reports whether it reached the destination.
    InFlight(watch::Sender<Option<bool>>),
    Served,
}

struct RoundEntry {
    round: u64,
    claims: HashMap<PeerId, ClaimState>,
}

/// Result of [`DedupWindow::admit`].
pub(crate) enum Admission<'a> {
    /// The caller owns the write for this destination and round.
    Granted(Claim<'a>),
    /// A write already reached the destination in this round.
    Served,
    /// Another write is in flight. Resolves to `Some(true)` once it reached the
    /// destination and to `Some(false)` when it failed.
    InFlight(watch::Receiver<Option<bool>>),
}

/// Exclusive right to write one round to one destination.
///
/// [`Claim::confirm`] marks the destination served. Dropping the claim without
/// confirming releases it and wakes the writes waiting on it.
pub(crate) struct Claim<'a> {
    window: &'a DedupWindow,
    round: u64,
    destination: PeerId,
    settled: bool,
}

impl Claim<'_> {
    pub(crate) fn confirm(mut self) {
        self.settled = true;
        self.window.settle(self.round, &self.destination, true);
    }
}

impl Drop for Claim<'_> {
    fn drop(&mut self) {
        if !self.settled {
            self.window.settle(self.round, &self.destination, false);
        }
    }
}

/// Remembers which destination peers were already served in each open delivery round.
///
/// Rounds are opened lazily by [`DedupWindow::admit`] and closed by
/// [`DedupWindow::finish`] once the emit that owns the round completes. At most
/// `capacity` rounds are kept; the oldest is evicted first.
pub(crate) struct DedupWindow {
    capacity: usize,
    rounds: Mutex<VecDeque<RoundEntry>>,
}

impl DedupWindow {
    pub(crate) fn new(capacity: usize) -> Self {
        Self {
            capacity: capacity.max(1),
            rounds: Mutex::new(VecDeque::new()),
        }
    }

    fn lock(&self) -> MutexGuard<'_, VecDeque<RoundEntry>> {
        self.rounds.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Claims `destination` for `round`, unless it was served or is being served.
    pub(crate) fn admit(&self, round: u64, destination: &str) -> Admission<'_> {
        let mut rounds = self.lock();

        let index = match rounds.iter().position(|entry| entry.round == round) {
            Some(index) => index,
            None => {
                if rounds.len() == self.capacity {
                    rounds.pop_front();
                }
                rounds.push_back(RoundEntry {
                    round,
                    claims: HashMap::new(),
                });
                rounds.len() - 1
            }
        };

        let claims = &mut rounds[index].claims;
        match claims.get(destination) {
            Some(ClaimState::Served) => Admission::Served,
            Some(ClaimState::InFlight(outcome)) => Admission::InFlight(outcome.subscribe()),
            None => {
                let (outcome, _) = watch::channel(None);
                claims.insert(destination.to_string(), ClaimState::InFlight(outcome));
                Admission::Granted(Claim {
                    window: self,
                    round,
                    destination: destination.to_string(),
                    settled: false,
                })
            }
        }
    }

    fn settle(&self, round: u64, destination: &str, served: bool) {
        let mut rounds = self.lock();
        let Some(entry) = rounds.iter_mut().find(|entry| entry.round == round) else {
            return;
        };
        if !matches!(entry.claims.get(destination), Some(ClaimState::InFlight(_))) {
            return;
        }

        let previous = if served {
            entry
                .claims
                .insert(destination.to_string(), ClaimState::Served)
        } else {
            entry.claims.remove(destination)
        };
        if let Some(ClaimState::InFlight(outcome)) = previous {
            outcome.send_replace(Some(served));
        }
    }

    pub(crate) fn finish(&self, round: u64) {
        self.lock().retain(|entry| entry.round != round);
    }

    #[cfg(test)]
    pub(crate) fn open_rounds(&self) -> usize {
        self.lock().len()
    }
}

#[cfg(test)]
mod tests {
    use super::{Admission, DedupWindow};

    fn granted(admission: Admission<'_>) -> super::Claim<'_> {
        match admission {
            Admission::Granted(claim) => claim,
            Admission::Served => panic!("destination already served"),
            Admission::InFlight(_) => panic!("destination has a write in flight"),
        }
    }

    #[test]
    fn same_round_same_destination_is_served_once() {
        let window = DedupWindow::new(8);

        granted(window.admit(1, "peer-a")).confirm();

        assert!(matches!(window.admit(1, "peer-a"), Admission::Served));
        assert!(matches!(window.admit(1, "peer-b"), Admission::Granted(_)));
    }

    #[test]
    fn different_rounds_do_not_suppress_each_other() {
        let window = DedupWindow::new(8);

        granted(window.admit(1, "peer-a")).confirm();

        assert!(matches!(window.admit(2, "peer-a"), Admission::Granted(_)));
    }

    #[test]
    fn finished_round_is_forgotten() {
        let window = DedupWindow::new(8);

        granted(window.admit(1, "peer-a")).confirm();
        window.finish(1);

        assert_eq!(window.open_rounds(), 0);
        assert!(matches!(window.admit(1, "peer-a"), Admission::Granted(_)));
    }

    #[tokio::test]
    async fn in_flight_claim_reports_success_to_waiters() {
        let window = DedupWindow::new(8);
        let claim = granted(window.admit(4, "peer-a"));

        let Admission::InFlight(mut outcome) = window.admit(4, "peer-a") else {
            panic!("second admission should wait on the first write");
        };
        claim.confirm();

        let reached = *outcome.wait_for(Option::is_some).await.unwrap();
        assert_eq!(reached, Some(true));
        assert!(matches!(window.admit(4, "peer-a"), Admission::Served));
    }

    #[tokio::test]
    async fn dropped_claim_hands_the_destination_to_a_waiter() {
        let window = DedupWindow::new(8);
        let claim = granted(window.admit(4, "peer-a"));
        let Admission::InFlight(mut outcome) = window.admit(4, "peer-a") else {
            panic!("second admission should wait on the first write");
        };

        drop(claim);

        let reached = *outcome.wait_for(Option::is_some).await.unwrap();
        assert_eq!(reached, Some(false));
        assert!(matches!(window.admit(4, "peer-a"), Admission::Granted(_)));
    }

    #[test]
    fn window_is_bounded_by_capacity() {
        let window = DedupWindow::new(2);

        granted(window.admit(1, "peer-a")).confirm();
        granted(window.admit(2, "peer-a")).confirm();
        granted(window.admit(3, "peer-a")).confirm();

        assert_eq!(window.open_rounds(), 2);
        // round 1 was evicted, so the destination is admitted again
        assert!(matches!(window.admit(1, "peer-a"), Admission::Granted(_)));
    }
}
