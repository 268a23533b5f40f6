//! Settings type definitions.
//!
//! All types use `#[serde(rename_all = "camelCase")]` to match the JSON wire
//! format, and `#[serde(default)]` so partial files are deep-merged over
//! compiled defaults. Reconnect/backoff, handshake timing, queue bounds, and
//! the notification-coalescing window are all policy here, never hard-coded
//! constants in the crates that use them.

use serde::{Deserialize, Serialize};

/// Root settings for the forge server.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ForgeSettings {
    /// Settings schema version.
    pub version: String,
    /// Application name, reported in `server.info` and the firmware
    /// handshake.
    pub name: String,
    /// HTTP/WebSocket listener settings.
    pub server: ServerSettings,
    /// Firmware link settings.
    pub link: LinkSettings,
    /// Per-client-session settings.
    pub session: SessionSettings,
    /// Status subscription fan-out settings.
    pub subscriptions: SubscriptionSettings,
    /// Component lifecycle settings.
    pub components: ComponentSettings,
    /// Logging configuration.
    pub logging: LoggingSettings,
}

impl Default for ForgeSettings {
    fn default() -> Self {
        Self {
            version: "0.1.0".to_string(),
            name: "forge".to_string(),
            server: ServerSettings::default(),
            link: LinkSettings::default(),
            session: SessionSettings::default(),
            subscriptions: SubscriptionSettings::default(),
            components: ComponentSettings::default(),
            logging: LoggingSettings::default(),
        }
    }
}

impl ForgeSettings {
    /// Correct invalid values in place rather than rejecting the file, so a
    /// typo degrades to a warning instead of a refusal to start.
    pub fn validate(&mut self) {
        if self.link.backoff.multiplier < 1.0 {
            tracing::warn!(
                multiplier = self.link.backoff.multiplier,
                "backoff multiplier below 1.0, correcting to 2.0"
            );
            self.link.backoff.multiplier = 2.0;
        }
        if self.link.backoff.max_ms < self.link.backoff.initial_ms {
            tracing::warn!(
                initial_ms = self.link.backoff.initial_ms,
                max_ms = self.link.backoff.max_ms,
                "backoff cap below initial delay, raising cap"
            );
            self.link.backoff.max_ms = self.link.backoff.initial_ms;
        }
        if self.session.queue_bound < 8 {
            tracing::warn!(
                queue_bound = self.session.queue_bound,
                "session queue bound too small, raising to 8"
            );
            self.session.queue_bound = 8;
        }
        if self.link.max_line_len < 1024 {
            tracing::warn!(
                max_line_len = self.link.max_line_len,
                "max line length too small, raising to 1024"
            );
            self.link.max_line_len = 1024;
        }
    }
}

/// HTTP/WebSocket listener settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ServerSettings {
    /// Bind address.
    pub host: String,
    /// Bind port.
    pub port: u16,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 7125,
        }
    }
}

/// Firmware link settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LinkSettings {
    /// Path of the firmware host's Unix domain socket.
    pub socket_path: String,
    /// Uniform deadline for outbound firmware calls, in milliseconds.
    pub request_timeout_ms: u64,
    /// How long the handshake may sit in Startup before the connection is
    /// reset, in milliseconds.
    pub handshake_timeout_ms: u64,
    /// Reconnect backoff policy.
    pub backoff: BackoffSettings,
    /// Maximum accepted line length on the firmware socket, in bytes.
    pub max_line_len: usize,
    /// Malformed lines tolerated inside [`Self::malformed_window_ms`] before
    /// the connection is reset.
    pub malformed_line_threshold: u32,
    /// Rolling window for the malformed-line counter, in milliseconds.
    pub malformed_window_ms: u64,
}

impl Default for LinkSettings {
    fn default() -> Self {
        Self {
            socket_path: "/tmp/firmware_uds".to_string(),
            request_timeout_ms: 30_000,
            handshake_timeout_ms: 10_000,
            backoff: BackoffSettings::default(),
            max_line_len: 4 * 1024 * 1024,
            malformed_line_threshold: 10,
            malformed_window_ms: 10_000,
        }
    }
}

/// Exponential backoff policy for firmware reconnects.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct BackoffSettings {
    /// First retry delay, in milliseconds.
    pub initial_ms: u64,
    /// Delay cap, in milliseconds.
    pub max_ms: u64,
    /// Growth factor per failed attempt.
    pub multiplier: f64,
}

impl Default for BackoffSettings {
    fn default() -> Self {
        Self {
            initial_ms: 250,
            max_ms: 10_000,
            multiplier: 2.0,
        }
    }
}

/// Per-client-session settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SessionSettings {
    /// Outbound queue capacity per session. Status deltas are dropped first
    /// on overflow; a session that stays full is closed as a slow consumer.
    pub queue_bound: usize,
    /// Deadline for client-submitted requests, in milliseconds.
    pub request_timeout_ms: u64,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            queue_bound: 1000,
            request_timeout_ms: 60_000,
        }
    }
}

/// Status subscription fan-out settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct SubscriptionSettings {
    /// Coalescing window: rapid successive changes to the same field inside
    /// this window merge into one delta. Zero disables coalescing.
    pub coalesce_window_ms: u64,
    /// Whether field-change detection compares nested values structurally.
    /// When false, objects and arrays always count as changed.
    pub structural_equality: bool,
}

impl Default for SubscriptionSettings {
    fn default() -> Self {
        Self {
            coalesce_window_ms: 250,
            structural_equality: true,
        }
    }
}

/// Component lifecycle settings.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct ComponentSettings {
    /// Grace period for each component's `stop()` during shutdown, in
    /// milliseconds. A component exceeding it is force-terminated.
    pub shutdown_grace_ms: u64,
}

impl Default for ComponentSettings {
    fn default() -> Self {
        Self {
            shutdown_grace_ms: 5_000,
        }
    }
}

/// Logging configuration.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct LoggingSettings {
    /// Default env-filter directive when `RUST_LOG` is unset.
    pub filter: String,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            filter: "info".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let s = ForgeSettings::default();
        assert_eq!(s.name, "forge");
        assert_eq!(s.server.port, 7125);
        assert_eq!(s.link.backoff.initial_ms, 250);
        assert_eq!(s.link.backoff.max_ms, 10_000);
        assert_eq!(s.session.queue_bound, 1000);
        assert_eq!(s.subscriptions.coalesce_window_ms, 250);
        assert!(s.subscriptions.structural_equality);
    }

    #[test]
    fn partial_json_gets_defaults() {
        let s: ForgeSettings =
            serde_json::from_str(r#"{"server": {"port": 9000}}"#).unwrap();
        assert_eq!(s.server.port, 9000);
        assert_eq!(s.server.host, "127.0.0.1");
        assert_eq!(s.link.request_timeout_ms, 30_000);
    }

    #[test]
    fn camel_case_wire_names() {
        let s: ForgeSettings = serde_json::from_str(
            r#"{"link": {"socketPath": "/run/fw.sock", "maxLineLen": 8192}}"#,
        )
        .unwrap();
        assert_eq!(s.link.socket_path, "/run/fw.sock");
        assert_eq!(s.link.max_line_len, 8192);
    }

    #[test]
    fn validate_corrects_backoff() {
        let mut s = ForgeSettings::default();
        s.link.backoff.multiplier = 0.5;
        s.link.backoff.max_ms = 10;
        s.link.backoff.initial_ms = 100;
        s.validate();
        assert_eq!(s.link.backoff.multiplier, 2.0);
        assert_eq!(s.link.backoff.max_ms, 100);
    }

    #[test]
    fn validate_raises_tiny_queue_bound() {
        let mut s = ForgeSettings::default();
        s.session.queue_bound = 1;
        s.validate();
        assert_eq!(s.session.queue_bound, 8);
    }
}
