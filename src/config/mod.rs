use serde::Deserialize;
use std::time::Duration;

/// Complete relay configuration
#[derive(Debug, Clone, Deserialize, Default)]
pub struct RelayConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub channel: ChannelConfig,
    #[serde(default)]
    pub polling: PollingConfig,
    #[serde(default)]
    pub promotion: PromotionConfig,
    #[serde(default)]
    pub dedup: DedupConfig,
    #[serde(default)]
    pub presence: PresenceConfig,
    #[serde(default)]
    pub store: StoreConfig,
}

/// HTTP/WebSocket server configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
}

fn default_bind_addr() -> String {
    "0.0.0.0:8080".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
        }
    }
}

/// Push channel configuration
#[derive(Debug, Clone, Deserialize)]
pub struct ChannelConfig {
    /// No acknowledgment within this window counts as handshake failure
    #[serde(default = "default_handshake_timeout")]
    pub handshake_timeout_seconds: u64,
    /// Per-topic broadcast buffer size
    #[serde(default = "default_topic_capacity")]
    pub topic_capacity: usize,
}

fn default_handshake_timeout() -> u64 {
    10
}

fn default_topic_capacity() -> usize {
    256
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            handshake_timeout_seconds: default_handshake_timeout(),
            topic_capacity: default_topic_capacity(),
        }
    }
}

/// Polling fallback configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PollingConfig {
    /// Fixed interval between latest-position queries while in Polling
    #[serde(default = "default_poll_interval")]
    pub interval_seconds: u64,
}

fn default_poll_interval() -> u64 {
    5
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_seconds: default_poll_interval(),
        }
    }
}

/// Polling→Live promotion configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PromotionConfig {
    #[serde(default = "default_initial_backoff")]
    pub initial_backoff_seconds: u64,
    #[serde(default = "default_max_backoff")]
    pub max_backoff_seconds: u64,
    /// A live session must survive this long before backoff resets
    #[serde(default = "default_stable_live")]
    pub stable_live_seconds: u64,
}

fn default_initial_backoff() -> u64 {
    5
}

fn default_max_backoff() -> u64 {
    60
}

fn default_stable_live() -> u64 {
    30
}

impl Default for PromotionConfig {
    fn default() -> Self {
        Self {
            initial_backoff_seconds: default_initial_backoff(),
            max_backoff_seconds: default_max_backoff(),
            stable_live_seconds: default_stable_live(),
        }
    }
}

/// Dedup window configuration
#[derive(Debug, Clone, Deserialize)]
pub struct DedupConfig {
    /// Observation timestamps remembered per subscription
    #[serde(default = "default_dedup_window")]
    pub window: usize,
}

fn default_dedup_window() -> usize {
    64
}

impl Default for DedupConfig {
    fn default() -> Self {
        Self {
            window: default_dedup_window(),
        }
    }
}

/// Presence configuration
#[derive(Debug, Clone, Deserialize)]
pub struct PresenceConfig {
    /// No fix within this window marks an entity Offline
    #[serde(default = "default_offline_after")]
    pub offline_after_seconds: i64,
}

fn default_offline_after() -> i64 {
    300
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            offline_after_seconds: default_offline_after(),
        }
    }
}

/// Position store client configuration
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    #[serde(default = "default_store_url")]
    pub base_url: String,
}

fn default_store_url() -> String {
    "http://localhost:8081".to_string()
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: default_store_url(),
        }
    }
}

/// Timing knobs consumed by the subscription manager.
#[derive(Debug, Clone)]
pub struct SubscriptionConfig {
    pub handshake_timeout: Duration,
    pub poll_interval: Duration,
    pub initial_backoff: Duration,
    pub max_backoff: Duration,
    pub stable_live: Duration,
    pub dedup_window: usize,
}

impl SubscriptionConfig {
    pub fn from_relay_config(config: &RelayConfig) -> Self {
        Self {
            handshake_timeout: Duration::from_secs(config.channel.handshake_timeout_seconds),
            poll_interval: Duration::from_secs(config.polling.interval_seconds),
            initial_backoff: Duration::from_secs(config.promotion.initial_backoff_seconds),
            max_backoff: Duration::from_secs(config.promotion.max_backoff_seconds),
            stable_live: Duration::from_secs(config.promotion.stable_live_seconds),
            dedup_window: config.dedup.window,
        }
    }
}

impl Default for SubscriptionConfig {
    fn default() -> Self {
        Self::from_relay_config(&RelayConfig::default())
    }
}

/// Load configuration from TOML file
pub fn load_config(path: &str) -> Result<RelayConfig, Box<dyn std::error::Error>> {
    let contents = std::fs::read_to_string(path)?;
    let config: RelayConfig = toml::from_str(&contents)?;
    Ok(config)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = RelayConfig::default();
        assert_eq!(config.server.bind_addr, "0.0.0.0:8080");
        assert_eq!(config.channel.handshake_timeout_seconds, 10);
        assert_eq!(config.polling.interval_seconds, 5);
        assert_eq!(config.promotion.initial_backoff_seconds, 5);
        assert_eq!(config.promotion.max_backoff_seconds, 60);
        assert_eq!(config.dedup.window, 64);
        assert_eq!(config.presence.offline_after_seconds, 300);
    }

    #[test]
    fn test_config_deserialization() {
        let toml = r#"
            [server]
            bind_addr = "127.0.0.1:9090"

            [channel]
            handshake_timeout_seconds = 3
            topic_capacity = 64

            [polling]
            interval_seconds = 2

            [promotion]
            initial_backoff_seconds = 1
            max_backoff_seconds = 30
            stable_live_seconds = 10

            [dedup]
            window = 16

            [presence]
            offline_after_seconds = 120

            [store]
            base_url = "http://store.internal:8081"
        "#;

        let config: RelayConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.server.bind_addr, "127.0.0.1:9090");
        assert_eq!(config.channel.handshake_timeout_seconds, 3);
        assert_eq!(config.channel.topic_capacity, 64);
        assert_eq!(config.polling.interval_seconds, 2);
        assert_eq!(config.promotion.max_backoff_seconds, 30);
        assert_eq!(config.dedup.window, 16);
        assert_eq!(config.presence.offline_after_seconds, 120);
        assert_eq!(config.store.base_url, "http://store.internal:8081");
    }

    #[test]
    fn test_partial_config() {
        // Missing sections use defaults
        let toml = r#"
            [polling]
            interval_seconds = 1
        "#;

        let config: RelayConfig = toml::from_str(toml).unwrap();
        assert_eq!(config.polling.interval_seconds, 1);
        assert_eq!(config.channel.handshake_timeout_seconds, 10); // Default
        assert_eq!(config.dedup.window, 64); // Default
    }

    #[test]
    fn test_load_config_from_file() {
        use std::io::Write;

        let mut file = tempfile::NamedTempFile::new().unwrap();
        writeln!(file, "[server]\nbind_addr = \"127.0.0.1:0\"").unwrap();
        writeln!(file, "[polling]\ninterval_seconds = 7").unwrap();

        let config = load_config(file.path().to_str().unwrap()).unwrap();
        assert_eq!(config.server.bind_addr, "127.0.0.1:0");
        assert_eq!(config.polling.interval_seconds, 7);
    }

    #[test]
    fn test_load_config_missing_file_errors() {
        assert!(load_config("/nonexistent/fixrelay.toml").is_err());
    }

    #[test]
    fn test_subscription_config_conversion() {
        let config = RelayConfig::default();
        let sub = SubscriptionConfig::from_relay_config(&config);
        assert_eq!(sub.handshake_timeout, Duration::from_secs(10));
        assert_eq!(sub.poll_interval, Duration::from_secs(5));
        assert_eq!(sub.dedup_window, 64);
    }
}
