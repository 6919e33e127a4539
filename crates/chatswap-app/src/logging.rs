use std::io::IsTerminal;

use tracing_subscriber::{fmt, layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

pub const DEFAULT_FILTER: &str = "chatswap_app=info,chatswap_core=info";

/// Installs the global subscriber. `RUST_LOG` wins over `default_filter`.
/// Returns false when a subscriber was already installed.
///
/// Events go to stderr; stdout carries the response stream.
pub fn init_logging(default_filter: &str) -> bool {
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_filter));

    tracing_subscriber::registry()
        .with(filter)
        .with(
            fmt::layer()
                .with_target(true)
                .with_writer(std::io::stderr)
                .with_ansi(std::io::stderr().is_terminal()),
        )
        .try_init()
        .is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn second_install_is_a_no_op() {
        init_logging(DEFAULT_FILTER);

        assert!(!init_logging(DEFAULT_FILTER));
    }
}
