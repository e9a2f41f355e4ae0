//! Tracing subscriber setup
//!
//! Library code only emits `tracing` events; binaries and tests call
//! [`init_tracing`] once to print them.

use tracing_subscriber::fmt;
use tracing_subscriber::EnvFilter;

/// Default filter when `RUST_LOG` is unset
pub const DEFAULT_FILTER: &str = "info";

/// Install a global fmt subscriber filtered by `RUST_LOG`
///
/// Returns `false` if a global subscriber was already installed.
pub fn init_tracing(json: bool) -> bool {
    init_with_filter(json, None)
}

/// Install a global fmt subscriber with an explicit filter directive
///
/// `directive` takes precedence over `RUST_LOG`. Returns `false` if a global
/// subscriber was already installed.
pub fn init_with_filter(json: bool, directive: Option<&str>) -> bool {
    let filter = match directive {
        Some(d) => EnvFilter::new(d),
        None => EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(DEFAULT_FILTER)),
    };
    let builder = fmt().with_env_filter(filter).with_target(false);
    let result = if json {
        builder.json().try_init()
    } else {
        builder.try_init()
    };
    result.is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_init_is_noop() {
        let _ = init_with_filter(false, Some("warn"));
        assert!(!init_with_filter(true, Some("debug")));
    }
}
