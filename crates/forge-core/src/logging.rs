//! Tracing subscriber setup for the server binary.

use tracing_subscriber::EnvFilter;

/// Initialize the global tracing subscriber.
///
/// `filter` is an env-filter directive string (e.g. `info,forge_link=debug`);
/// `RUST_LOG` takes precedence when set. Safe to call once per process;
/// later calls are ignored so tests can race freely.
pub fn init(filter: &str) {
    let env_filter = EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| EnvFilter::new(filter));

    let _ = tracing_subscriber::fmt()
        .with_env_filter(env_filter)
        .with_target(true)
        .try_init();
}

#[cfg(test)]
mod tests {
    #[test]
    fn init_twice_does_not_panic() {
        super::init("info");
        super::init("debug");
    }
}
