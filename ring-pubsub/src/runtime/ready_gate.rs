//! Holds caller operations back until the membership service reported `Up`.

use crate::error::PubSubError;
use tokio::sync::watch;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
enum GateState {
    Waiting,
    Ready,
    Closed,
}

pub(crate) struct ReadyGate {
    state: watch::Sender<GateState>,
}

impl ReadyGate {
    pub(crate) fn new(ready: bool) -> Self {
        let initial = if ready {
            GateState::Ready
        } else {
            GateState::Waiting
        };
        let (state, _) = watch::channel(initial);
        Self { state }
    }

    /// Opens the gate. Returns `true` when this call opened it.
    pub(crate) fn open(&self) -> bool {
        self.state.send_if_modified(|state| {
            if *state == GateState::Waiting {
                *state = GateState::Ready;
                true
            } else {
                false
            }
        })
    }

    pub(crate) fn close(&self) {
        self.state.send_replace(GateState::Closed);
    }

    pub(crate) fn is_open(&self) -> bool {
        *self.state.borrow() == GateState::Ready
    }

    /// Resolves once the gate opened, or fails if it was closed first.
    pub(crate) async fn wait(&self) -> Result<(), PubSubError> {
        let mut state = self.state.subscribe();
        let settled = state
            .wait_for(|state| *state != GateState::Waiting)
            .await
            .map(|state| *state)
            .unwrap_or(GateState::Closed);

        match settled {
            GateState::Ready => Ok(()),
            _ => Err(PubSubError::Closing),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::ReadyGate;
    use crate::error::PubSubError;
    use std::sync::Arc;

    #[tokio::test]
    async fn waiters_are_released_when_gate_opens() {
        let gate = Arc::new(ReadyGate::new(false));
        let waiter = {
            let gate = gate.clone();
            tokio::spawn(async move { gate.wait().await })
        };

        assert!(!gate.is_open());
        assert!(gate.open());
        assert!(!gate.open());
        assert_eq!(waiter.await.unwrap(), Ok(()));
    }

    #[tokio::test]
    async fn closing_releases_waiters_with_error() {
        let gate = ReadyGate::new(false);

        gate.close();

        assert_eq!(gate.wait().await, Err(PubSubError::Closing));
        assert!(!gate.open());
    }

    #[tokio::test]
    async fn ready_gate_passes_immediately() {
        let gate = ReadyGate::new(true);

        assert_eq!(gate.wait().await, Ok(()));
    }
}
