//! Common utilities shared between the release and verification commands

pub mod config;
pub mod error;
pub mod logging;
pub mod paths;

pub use error::{Error, Result};

/// Parse a control endpoint address given as `host:port`.
/// A bare port is taken to mean `127.0.0.1:PORT`, and `localhost` is
/// rewritten to `127.0.0.1` so the probe does not race IPv6 resolution.
pub fn parse_endpoint(value: &str) -> Result<std::net::SocketAddr> {
    let value = value.trim();
    let normalized = if value.parse::<u16>().is_ok() {
        format!("127.0.0.1:{}", value)
    } else if let Some(port) = value.strip_prefix("localhost:") {
        format!("127.0.0.1:{}", port)
    } else {
        value.to_string()
    };

    normalized
        .parse()
        .map_err(|_| Error::Config(format!("Invalid control endpoint '{}'", value)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_endpoint_forms() {
        assert_eq!(parse_endpoint("8082").unwrap().to_string(), "127.0.0.1:8082");
        assert_eq!(
            parse_endpoint("localhost:8082").unwrap().to_string(),
            "127.0.0.1:8082"
        );
        assert_eq!(
            parse_endpoint("10.0.0.5:9000").unwrap().to_string(),
            "10.0.0.5:9000"
        );
        assert!(parse_endpoint("nowhere").is_err());
    }
}
