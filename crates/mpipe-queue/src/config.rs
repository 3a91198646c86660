//! Queue configuration.

use std::time::Duration;

/// Queue configuration.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Redis URL
    pub redis_url: String,
    /// Stream carrying upload notifications
    pub stream_name: String,
    /// Consumer group name
    pub consumer_group: String,
    /// Dead letter stream name
    pub dlq_stream_name: String,
    /// Failed attempts per record before it is dead-lettered
    pub max_delivery_attempts: u32,
    /// Unacknowledged records idle this long are redelivered
    pub claim_min_idle: Duration,
    /// How often idle records are reclaimed
    pub claim_interval: Duration,
    /// How long one read blocks waiting for new records
    pub block: Duration,
    /// Records fetched per read
    pub batch_size: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            redis_url: "redis://localhost:6379".to_string(),
            stream_name: "mpipe:uploads".to_string(),
            consumer_group: "mpipe:workers".to_string(),
            dlq_stream_name: "mpipe:dlq".to_string(),
            max_delivery_attempts: 3,
            claim_min_idle: Duration::from_secs(600), // 10 minutes
            claim_interval: Duration::from_secs(30),
            block: Duration::from_secs(5),
            batch_size: 10,
        }
    }
}

impl QueueConfig {
    /// Create config from environment variables.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            redis_url: std::env::var("REDIS_URL").unwrap_or(defaults.redis_url),
            stream_name: std::env::var("QUEUE_STREAM").unwrap_or(defaults.stream_name),
            consumer_group: std::env::var("QUEUE_CONSUMER_GROUP")
                .unwrap_or(defaults.consumer_group),
            dlq_stream_name: std::env::var("QUEUE_DLQ_STREAM").unwrap_or(defaults.dlq_stream_name),
            max_delivery_attempts: std::env::var("QUEUE_MAX_DELIVERY_ATTEMPTS")
                .ok()
                .and_then(|s| s.parse().ok())
                .filter(|n| *n > 0)
                .unwrap_or(defaults.max_delivery_attempts),
            claim_min_idle: std::env::var("QUEUE_CLAIM_MIN_IDLE_SECS")
                .ok()
                .and_then(|s| s.parse().ok())
                .map(Duration::from_secs)
                .unwrap_or(defaults.claim_min_idle),
            ..defaults
        }
    }

    /// How often in-flight records have their idle time refreshed; well
    /// inside `claim_min_idle` so a slow file is never reclaimed.
    pub fn keep_alive_interval(&self) -> Duration {
        (self.claim_min_idle / 3).max(Duration::from_secs(1))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keep_alive_inside_claim_window() {
        let config = QueueConfig::default();
        assert_eq!(config.keep_alive_interval(), Duration::from_secs(200));

        let short = QueueConfig {
            claim_min_idle: Duration::from_secs(2),
            ..QueueConfig::default()
        };
        assert_eq!(short.keep_alive_interval(), Duration::from_secs(1));
    }
}
