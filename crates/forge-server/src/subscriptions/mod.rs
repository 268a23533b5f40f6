//! Status subscriptions: per-session interest sets and delta fan-out.

pub mod engine;
pub mod set;
