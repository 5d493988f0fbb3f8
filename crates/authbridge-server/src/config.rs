//! Server configuration.

use std::net::SocketAddr;
use std::time::Duration;

use authbridge_config::BridgeConfig;

use crate::error::{Result, ServerError};

/// Default max inbound body size (10 MB).
pub const DEFAULT_MAX_BODY_SIZE: usize = 10 * 1024 * 1024;

/// Default timeout for one forwarded call.
pub const DEFAULT_UPSTREAM_TIMEOUT: Duration = Duration::from_secs(30);

/// Default retries after a forwarded call times out.
pub const DEFAULT_FORWARD_RETRIES: u32 = 2;

/// Default first backoff between forward retries.
pub const DEFAULT_FORWARD_BACKOFF: Duration = Duration::from_millis(100);

/// Listener and forwarding settings.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    /// Address to bind the server to.
    pub bind_address: SocketAddr,

    /// Enable request logging.
    pub request_logging: bool,

    /// Maximum inbound request body size in bytes.
    pub max_body_size: usize,

    /// Timeout for one forwarded call, unless the route overrides it.
    pub upstream_timeout: Duration,

    /// Retries after a forwarded call times out.
    pub forward_retries: u32,

    /// First backoff between forward retries; doubles per attempt.
    pub forward_backoff: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_address: SocketAddr::from(([127, 0, 0, 1], 8088)),
            request_logging: true,
            max_body_size: DEFAULT_MAX_BODY_SIZE,
            upstream_timeout: DEFAULT_UPSTREAM_TIMEOUT,
            forward_retries: DEFAULT_FORWARD_RETRIES,
            forward_backoff: DEFAULT_FORWARD_BACKOFF,
        }
    }
}

impl ServerConfig {
    pub fn new() -> Self {
        Self::default()
    }

    /// Listener and forwarding settings from a loaded config.
    pub fn from_bridge(config: &BridgeConfig) -> Result<Self> {
        let server = config.server();
        let upstream = config.upstream();
        Ok(Self {
            bind_address: server
                .bind_addr()
                .map_err(|e| ServerError::Config(e.to_string()))?,
            request_logging: server.request_logging,
            max_body_size: server.max_body_size,
            upstream_timeout: upstream.timeout(),
            forward_retries: upstream.forward_retries,
            forward_backoff: upstream.initial_backoff(),
        })
    }

    pub fn with_bind_address(mut self, addr: SocketAddr) -> Self {
        self.bind_address = addr;
        self
    }

    pub fn with_request_logging(mut self, enabled: bool) -> Self {
        self.request_logging = enabled;
        self
    }

    pub fn with_max_body_size(mut self, size: usize) -> Self {
        self.max_body_size = size;
        self
    }

    pub fn with_upstream_timeout(mut self, timeout: Duration) -> Self {
        self.upstream_timeout = timeout;
        self
    }

    pub fn with_forward_retries(mut self, retries: u32, backoff: Duration) -> Self {
        self.forward_retries = retries;
        self.forward_backoff = backoff;
        self
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builder() {
        let config = ServerConfig::new()
            .with_bind_address("0.0.0.0:9000".parse().unwrap())
            .with_request_logging(false)
            .with_forward_retries(5, Duration::from_millis(10));

        assert_eq!(config.bind_address.port(), 9000);
        assert!(!config.request_logging);
        assert_eq!(config.forward_retries, 5);
        assert_eq!(config.upstream_timeout, DEFAULT_UPSTREAM_TIMEOUT);
    }

    #[test]
    fn test_from_bridge() {
        let bridge = BridgeConfig::from_toml(
            r#"
[server]
bind = "127.0.0.1:7000"
request_logging = false

[upstream]
timeout_secs = 5
forward_retries = 0
"#,
        )
        .unwrap();

        let config = ServerConfig::from_bridge(&bridge).unwrap();
        assert_eq!(config.bind_address.port(), 7000);
        assert!(!config.request_logging);
        assert_eq!(config.upstream_timeout, Duration::from_secs(5));
        assert_eq!(config.forward_retries, 0);
    }

    #[test]
    fn test_from_bridge_bad_bind() {
        let bridge = BridgeConfig::from_toml("[server]\nbind = \"nope\"\n").unwrap();
        assert!(matches!(
            ServerConfig::from_bridge(&bridge),
            Err(ServerError::Config(_))
        ));
    }
}
