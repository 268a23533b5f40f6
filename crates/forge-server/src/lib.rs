//! Client-facing server: dispatch core, sessions, subscriptions, component
//! lifecycle, and the axum HTTP/WebSocket transports.

#![deny(unsafe_code)]

pub mod auth;
pub mod bridge;
pub mod components;
pub mod http;
pub mod rpc;
pub mod server;
pub mod session;
pub mod snapshot;
pub mod subscriptions;

pub use server::ForgeServer;
