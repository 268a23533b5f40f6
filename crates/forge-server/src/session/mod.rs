//! Client session lifecycle and outbound delivery.

pub mod manager;
pub mod queue;
pub mod session;
