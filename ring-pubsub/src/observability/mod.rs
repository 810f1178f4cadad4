//! Event names and canonical field values shared by the `tracing` calls in the crate.

pub mod events;
pub mod fields;
