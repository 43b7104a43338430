use std::time::Duration;

use shared::order::{OrderKind, OwnerClass};

/// Server configuration
///
/// # Environment variables
///
/// Every field can be overridden through the environment:
///
/// | Variable | Default | Meaning |
/// |----------|---------|---------|
/// | WORK_DIR | /var/lib/canteen | Working directory (order store, logs) |
/// | HTTP_PORT | 3000 | HTTP API port |
/// | MESSAGE_TCP_PORT | 8081 | TCP message bus port |
/// | KITCHEN_KEY | kitchen-dev-key | Shared key for kitchen/admin calls |
/// | CANCEL_WINDOW_REGULAR_SECS | 300 | Cancellation window, regular |
/// | CANCEL_WINDOW_BULK_SECS | 300 | Cancellation window, bulk |
/// | CANCEL_WINDOW_SCHEDULED_SECS | 300 | Cancellation window, scheduled |
/// | BULK_MIN_QTY_STUDENT | 5 | Minimum total quantity, student bulk |
/// | BULK_MIN_QTY_FACULTY | 6 | Minimum total quantity, faculty bulk |
/// | SWEEPER_INTERVAL_SECS | 5 | Compensation sweeper poll interval |
/// | ENVIRONMENT | development | development \| staging \| production |
#[derive(Debug, Clone)]
pub struct Config {
    /// Working directory for the order store and logs
    pub work_dir: String,
    /// HTTP API port
    pub http_port: u16,
    /// TCP message bus port
    pub message_tcp_port: u16,
    /// Shared key authorizing kitchen/admin status updates and room joins
    pub kitchen_key: String,
    /// Cancellation window per order kind (seconds)
    pub cancel_window_regular_secs: u64,
    pub cancel_window_bulk_secs: u64,
    pub cancel_window_scheduled_secs: u64,
    /// Bulk-order minimum total quantity per owner class
    pub bulk_min_qty_student: u32,
    pub bulk_min_qty_faculty: u32,
    /// Per regular/bulk line item
    pub max_line_quantity: u32,
    /// Per scheduled ("special") line item
    pub max_special_line_quantity: u32,
    /// Compensation sweeper poll interval (seconds)
    pub sweeper_interval_secs: u64,
    /// Runtime environment: development | staging | production
    pub environment: String,
}

fn env_parse<T: std::str::FromStr>(key: &str, default: T) -> T {
    std::env::var(key)
        .ok()
        .and_then(|v| v.parse().ok())
        .unwrap_or(default)
}

impl Config {
    /// Load configuration from environment variables, falling back to
    /// defaults for anything unset.
    pub fn from_env() -> Self {
        Self {
            work_dir: std::env::var("WORK_DIR").unwrap_or_else(|_| "/var/lib/canteen".into()),
            http_port: env_parse("HTTP_PORT", 3000),
            message_tcp_port: env_parse("MESSAGE_TCP_PORT", 8081),
            kitchen_key: std::env::var("KITCHEN_KEY").unwrap_or_else(|_| "kitchen-dev-key".into()),
            cancel_window_regular_secs: env_parse("CANCEL_WINDOW_REGULAR_SECS", 300),
            cancel_window_bulk_secs: env_parse("CANCEL_WINDOW_BULK_SECS", 300),
            cancel_window_scheduled_secs: env_parse("CANCEL_WINDOW_SCHEDULED_SECS", 300),
            bulk_min_qty_student: env_parse("BULK_MIN_QTY_STUDENT", 5),
            bulk_min_qty_faculty: env_parse("BULK_MIN_QTY_FACULTY", 6),
            max_line_quantity: env_parse("MAX_LINE_QUANTITY", 10),
            max_special_line_quantity: env_parse("MAX_SPECIAL_LINE_QUANTITY", 4),
            sweeper_interval_secs: env_parse("SWEEPER_INTERVAL_SECS", 5),
            environment: std::env::var("ENVIRONMENT").unwrap_or_else(|_| "development".into()),
        }
    }

    /// Override paths and ports, typically for tests
    pub fn with_overrides(
        work_dir: impl Into<String>,
        http_port: u16,
        message_tcp_port: u16,
    ) -> Self {
        let mut config = Self::from_env();
        config.work_dir = work_dir.into();
        config.http_port = http_port;
        config.message_tcp_port = message_tcp_port;
        config
    }

    /// Cancellation window for an order kind
    pub fn cancel_window(&self, kind: OrderKind) -> Duration {
        let secs = match kind {
            OrderKind::Regular => self.cancel_window_regular_secs,
            OrderKind::Bulk => self.cancel_window_bulk_secs,
            OrderKind::Scheduled => self.cancel_window_scheduled_secs,
        };
        Duration::from_secs(secs)
    }

    /// Bulk minimum total quantity for an owner class
    pub fn bulk_min_qty(&self, owner_class: OwnerClass) -> u32 {
        match owner_class {
            OwnerClass::Student => self.bulk_min_qty_student,
            OwnerClass::Faculty => self.bulk_min_qty_faculty,
        }
    }

    pub fn is_production(&self) -> bool {
        self.environment == "production"
    }
}

impl Default for Config {
    fn default() -> Self {
        Self::from_env()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_per_kind_windows() {
        let mut config = Config::with_overrides("/tmp/canteen-test", 0, 0);
        config.cancel_window_bulk_secs = 600;
        assert_eq!(
            config.cancel_window(OrderKind::Regular),
            Duration::from_secs(300)
        );
        assert_eq!(
            config.cancel_window(OrderKind::Bulk),
            Duration::from_secs(600)
        );
    }

    #[test]
    fn test_bulk_minimums_per_owner_class() {
        let config = Config::with_overrides("/tmp/canteen-test", 0, 0);
        assert_eq!(config.bulk_min_qty(OwnerClass::Student), 5);
        assert_eq!(config.bulk_min_qty(OwnerClass::Faculty), 6);
    }
}
