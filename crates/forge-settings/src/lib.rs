//! # forge-settings
//!
//! Configuration management with layered sources for the forge server.
//!
//! Settings are loaded from three layers (in priority order):
//! 1. **Compiled defaults** — [`ForgeSettings::default()`]
//! 2. **User file** — `~/.forge/settings.json` (deep-merged over defaults)
//! 3. **Environment variables** — `FORGE_*` overrides (highest priority)
//!
//! All timing and bound policy lives here: reconnect backoff, handshake
//! timeout, per-session queue bounds, and the notification-coalescing
//! window are configuration, not constants. The loaded value is plain data;
//! the caller decides how to share it (the server holds one
//! `Arc<ForgeSettings>` for its lifetime).

#![deny(unsafe_code)]

pub mod errors;
pub mod loader;
pub mod types;

pub use errors::{Result, SettingsError};
pub use loader::{deep_merge, load_settings, load_settings_from_path, settings_path};
pub use types::*;
