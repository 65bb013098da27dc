use std::env;
use std::time::Duration;

use crate::engine::scheduler::RefreshSettings;
use crate::error::AppError;

#[derive(Debug, Clone)]
pub struct Config {
    pub http_port: u16,
    pub log_level: String,
    pub feed_poll_interval_secs: u64,
    pub feed_poll_window_secs: u64,
    pub feed_command_buffer: usize,
    pub completion_sweep_secs: u64,
}

impl Config {
    pub fn from_env() -> Result<Self, AppError> {
        let _ = dotenvy::dotenv();

        let config = Self {
            http_port: parse_or_default("HTTP_PORT", 3000)?,
            log_level: env::var("LOG_LEVEL").unwrap_or_else(|_| "info".to_string()),
            feed_poll_interval_secs: parse_or_default("FEED_POLL_INTERVAL_SECS", 5)?,
            feed_poll_window_secs: parse_or_default("FEED_POLL_WINDOW_SECS", 300)?,
            feed_command_buffer: parse_or_default("FEED_COMMAND_BUFFER", 32)?,
            completion_sweep_secs: parse_or_default("COMPLETION_SWEEP_SECS", 60)?,
        };

        if config.feed_poll_interval_secs == 0 || config.completion_sweep_secs == 0 {
            return Err(AppError::Internal(
                "poll and sweep intervals must be > 0".to_string(),
            ));
        }

        Ok(config)
    }

    pub fn refresh_settings(&self) -> RefreshSettings {
        RefreshSettings {
            interval: Duration::from_secs(self.feed_poll_interval_secs),
            window: Duration::from_secs(self.feed_poll_window_secs),
            command_buffer: self.feed_command_buffer.max(1),
        }
    }

    pub fn completion_sweep_interval(&self) -> Duration {
        Duration::from_secs(self.completion_sweep_secs)
    }
}

fn parse_or_default<T>(key: &str, default: T) -> Result<T, AppError>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
{
    match env::var(key) {
        Ok(raw) => raw
            .parse::<T>()
            .map_err(|err| AppError::Internal(format!("invalid {key}: {err}"))),
        Err(_) => Ok(default),
    }
}
