//! Environment-resolved configuration. Every knob has a default so the core
//! runs with an empty environment; `.env` loading happens in `main`.

use std::env;
use std::time::Duration;

#[derive(Debug, Clone, PartialEq)]
pub struct ReconnectionConfig {
    pub enabled: bool,
    /// Base delay between attempts; grows linearly per attempt.
    pub delay: Duration,
    /// Cap on the grown delay.
    pub delay_max: Duration,
    pub attempts: u32,
}

impl Default for ReconnectionConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            delay: Duration::from_millis(1000),
            delay_max: Duration::from_millis(5000),
            attempts: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct HeartbeatConfig {
    pub interval: Duration,
    pub timeout: Duration,
}

impl Default for HeartbeatConfig {
    fn default() -> Self {
        Self {
            interval: Duration::from_secs(25),
            timeout: Duration::from_secs(60),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct MessageLimits {
    pub min_length: usize,
    pub max_length: usize,
}

impl Default for MessageLimits {
    fn default() -> Self {
        Self {
            min_length: 1,
            max_length: 1000,
        }
    }
}

/// Client-side advisory only; the core does not enforce these.
#[derive(Debug, Clone, PartialEq)]
pub struct RateLimitHints {
    pub messages_per_minute: u32,
    pub burst_limit: u32,
}

impl Default for RateLimitHints {
    fn default() -> Self {
        Self {
            messages_per_minute: 30,
            burst_limit: 5,
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct ChatConfig {
    pub enabled: bool,
    pub analytics_enabled: bool,
    pub endpoint: String,
    pub reconnection: ReconnectionConfig,
    pub heartbeat: HeartbeatConfig,
    pub message: MessageLimits,
    pub rate_limit: RateLimitHints,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            analytics_enabled: false,
            endpoint: "ws://localhost:4100/chat".to_string(),
            reconnection: ReconnectionConfig::default(),
            heartbeat: HeartbeatConfig::default(),
            message: MessageLimits::default(),
            rate_limit: RateLimitHints::default(),
        }
    }
}

fn env_bool(key: &str, default: bool) -> bool {
    env::var(key)
        .ok()
        .map(|v| matches!(v.trim(), "1" | "true" | "TRUE" | "yes"))
        .unwrap_or(default)
}

fn env_u64(key: &str, default: u64) -> u64 {
    env::var(key)
        .ok()
        .and_then(|v| v.trim().parse().ok())
        .unwrap_or(default)
}

impl ChatConfig {
    /// Resolve configuration from the process environment, falling back to
    /// defaults for anything unset or unparseable.
    pub fn from_env() -> Self {
        let defaults = Self::default();
        Self {
            enabled: env_bool("CHAT_ENABLED", defaults.enabled),
            analytics_enabled: env_bool("CHAT_ANALYTICS_ENABLED", defaults.analytics_enabled),
            endpoint: env::var("CHAT_ENDPOINT").unwrap_or(defaults.endpoint),
            reconnection: ReconnectionConfig {
                enabled: env_bool("CHAT_RECONNECT_ENABLED", defaults.reconnection.enabled),
                delay: Duration::from_millis(env_u64(
                    "CHAT_RECONNECT_DELAY_MS",
                    defaults.reconnection.delay.as_millis() as u64,
                )),
                delay_max: Duration::from_millis(env_u64(
                    "CHAT_RECONNECT_DELAY_MAX_MS",
                    defaults.reconnection.delay_max.as_millis() as u64,
                )),
                attempts: env_u64("CHAT_RECONNECT_ATTEMPTS", defaults.reconnection.attempts as u64)
                    as u32,
            },
            heartbeat: HeartbeatConfig {
                interval: Duration::from_millis(env_u64(
                    "CHAT_HEARTBEAT_INTERVAL_MS",
                    defaults.heartbeat.interval.as_millis() as u64,
                )),
                timeout: Duration::from_millis(env_u64(
                    "CHAT_HEARTBEAT_TIMEOUT_MS",
                    defaults.heartbeat.timeout.as_millis() as u64,
                )),
            },
            message: MessageLimits {
                min_length: env_u64("CHAT_MESSAGE_MIN_LENGTH", defaults.message.min_length as u64)
                    as usize,
                max_length: env_u64("CHAT_MESSAGE_MAX_LENGTH", defaults.message.max_length as u64)
                    as usize,
            },
            rate_limit: RateLimitHints {
                messages_per_minute: env_u64(
                    "CHAT_RATE_MESSAGES_PER_MINUTE",
                    defaults.rate_limit.messages_per_minute as u64,
                ) as u32,
                burst_limit: env_u64("CHAT_RATE_BURST_LIMIT", defaults.rate_limit.burst_limit as u64)
                    as u32,
            },
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;

    #[test]
    fn defaults_match_documented_limits() {
        let config = ChatConfig::default();
        assert_eq!(config.message.min_length, 1);
        assert_eq!(config.message.max_length, 1000);
        assert_eq!(config.reconnection.attempts, 5);
        assert!(config.reconnection.enabled);
    }
}
