//! Runtime integration layer.
//!
//! Start-up ordering for the caller API: calls issued before the membership
//! service is up wait on the ready gate.

pub(crate) mod ready_gate;
