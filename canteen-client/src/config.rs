//! Client configuration

/// Configuration for connecting to the canteen server
#[derive(Debug, Clone)]
pub struct ClientConfig {
    /// Message bus TCP address (e.g. "127.0.0.1:8081")
    pub message_tcp_addr: String,

    /// Client name reported during handshake
    pub client_name: String,

    /// RPC timeout in seconds
    pub request_timeout_secs: u64,

    /// First reconnect delay in milliseconds
    pub reconnect_base_delay_ms: u64,

    /// Reconnect delay cap in milliseconds
    pub reconnect_max_delay_ms: u64,

    /// Reconnect attempts before giving up
    pub max_reconnect_attempts: u32,
}

impl ClientConfig {
    pub fn new(message_tcp_addr: impl Into<String>) -> Self {
        Self {
            message_tcp_addr: message_tcp_addr.into(),
            client_name: "canteen-client".to_string(),
            request_timeout_secs: 10,
            reconnect_base_delay_ms: 500,
            reconnect_max_delay_ms: 30_000,
            max_reconnect_attempts: 10,
        }
    }

    pub fn with_client_name(mut self, name: impl Into<String>) -> Self {
        self.client_name = name.into();
        self
    }

    pub fn with_request_timeout(mut self, seconds: u64) -> Self {
        self.request_timeout_secs = seconds;
        self
    }

    pub fn with_reconnect_policy(
        mut self,
        base_delay_ms: u64,
        max_delay_ms: u64,
        max_attempts: u32,
    ) -> Self {
        self.reconnect_base_delay_ms = base_delay_ms;
        self.reconnect_max_delay_ms = max_delay_ms;
        self.max_reconnect_attempts = max_attempts;
        self
    }

    /// Reconnect delay for the given attempt, exponential with a cap
    pub fn reconnect_delay(&self, attempt: u32) -> std::time::Duration {
        let factor = 1u64.checked_shl(attempt.min(16)).unwrap_or(u64::MAX);
        let millis = self
            .reconnect_base_delay_ms
            .saturating_mul(factor)
            .min(self.reconnect_max_delay_ms);
        std::time::Duration::from_millis(millis)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_reconnect_backoff_is_capped() {
        let config = ClientConfig::new("127.0.0.1:8081").with_reconnect_policy(500, 30_000, 10);
        assert_eq!(config.reconnect_delay(0).as_millis(), 500);
        assert_eq!(config.reconnect_delay(1).as_millis(), 1000);
        assert_eq!(config.reconnect_delay(3).as_millis(), 4000);
        assert_eq!(config.reconnect_delay(20).as_millis(), 30_000);
    }
}
