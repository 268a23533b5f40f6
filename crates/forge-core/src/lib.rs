//! # forge-core
//!
//! Foundation types shared by all forge crates.
//!
//! Forge bridges web clients to a single printer-firmware host process. This
//! crate provides the vocabulary the rest of the workspace speaks:
//!
//! - **RPC types**: [`rpc::RpcRequest`], [`rpc::ClientRequest`], response
//!   framing for the JSON-RPC 2.0 client surface
//! - **Errors**: [`errors::RpcError`] taxonomy with JSON-RPC error codes
//! - **Connection state**: [`state::ConnectionState`] machine for the
//!   firmware link, with validated transitions
//! - **Events**: [`events::ServerEvent`] tagged union and [`events::EventBus`]
//!   publish/subscribe
//! - **IDs**: [`ids::SessionId`] newtype and [`ids::RequestIdSeq`] per-transport
//!   request-id generation
//! - **Logging**: [`logging::init`] tracing-subscriber setup
//!
//! ## Crate Position
//!
//! Foundation crate. Depended on by all other forge crates.

#![deny(unsafe_code)]

pub mod errors;
pub mod events;
pub mod ids;
pub mod logging;
pub mod rpc;
pub mod state;
