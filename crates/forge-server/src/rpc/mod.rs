//! JSON-RPC method routing.

pub mod context;
pub mod dispatch;
pub mod handlers;
pub mod registry;
