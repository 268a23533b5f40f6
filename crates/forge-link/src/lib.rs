//! # forge-link
//!
//! The persistent connection to the printer firmware host.
//!
//! The firmware host speaks newline-delimited JSON-RPC over a Unix domain
//! socket. This crate owns that socket end to end:
//!
//! - **[`FirmwareLink`]**: connect/reconnect loop with exponential backoff,
//!   handshake, framed writes, and the receive loop
//! - **[`state::LinkState`]**: the validated connection state machine,
//!   observable through a `watch` channel
//! - **[`pending::PendingCalls`]**: correlation table for outstanding calls,
//!   keyed by request id
//! - **[`wire`]**: frame encoding/parsing for the firmware protocol
//!
//! Requests are written in submission order; responses correlate by id only
//! and may arrive out of order. A firmware disconnect fails every
//! outstanding call with `ConnectionLost` and restarts the reconnect loop
//! without affecting server liveness.

#![deny(unsafe_code)]

pub mod link;
pub mod pending;
pub mod state;
pub mod wire;

pub use link::{FirmwareLink, FirmwareNotification};
pub use state::LinkState;
