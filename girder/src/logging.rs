//! Thin facade over the structured logging stack.
//!
//! Components take an `Into<Option<&Logger>>` at construction and fall back
//! to a discarding root logger, so library code never checks for a logger.

pub use slog::{debug, error, info, o, trace, warn, Discard, Logger};

use sloggers::{Config, LoggerConfig};

/// Build a logger from a TOML description understood by `sloggers`.
pub fn from_toml(config: &str) -> Result<Logger, String> {
    let config: LoggerConfig = serdeconv::from_toml_str(config).map_err(|e| e.to_string())?;

    config.build_logger().map_err(|e| e.to_string())
}

/// A stderr terminal logger at debug level, for binaries and examples that
/// do not carry their own logging configuration.
pub fn terminal() -> Result<Logger, String> {
    from_toml(
        r#"
type = "terminal"
level = "debug"
destination = "stderr"
"#,
    )
}

/// Root logger that drops everything.
#[inline]
pub fn discard() -> Logger {
    Logger::root(Discard, o!())
}

/// Resolve an optional parent logger into a child or a discarding root.
#[inline]
pub fn child<'a, L: Into<Option<&'a Logger>>>(log: L) -> Logger {
    match log.into() {
        Some(log) => log.new(o!()),
        None => discard(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_discard_is_usable() {
        let log = discard();
        info!(log, "dropped"; "value" => 1);
    }

    #[test]
    fn test_child_of_none() {
        let log = child(None);
        debug!(log, "also dropped");
    }

    #[test]
    fn test_from_toml_rejects_garbage() {
        assert!(from_toml("not really toml [").is_err());
    }
}
