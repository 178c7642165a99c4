use std::{fs, path::Path, time::Duration};

use anyhow::Context;
use client_core::{ChannelConfig, ReconnectPolicy};
use serde::Deserialize;

#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub endpoint: String,
    pub max_reconnect_attempts: u32,
    pub reconnect_base_delay_ms: u64,
    pub reconnect_max_delay_ms: u64,
    /// `0` disables liveness tracking.
    pub keepalive_interval_secs: u64,
    pub missed_keepalives: u32,
    pub ack_keepalives: bool,
    pub outbound_buffer: usize,
    pub log_filter: String,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            endpoint: "ws://127.0.0.1:8080/ws".into(),
            max_reconnect_attempts: 5,
            reconnect_base_delay_ms: 500,
            reconnect_max_delay_ms: 30_000,
            keepalive_interval_secs: 30,
            missed_keepalives: 3,
            ack_keepalives: false,
            outbound_buffer: 256,
            log_filter: "info".into(),
        }
    }
}

impl Settings {
    pub fn channel_config(&self) -> ChannelConfig {
        ChannelConfig {
            reconnect: ReconnectPolicy::new(
                self.max_reconnect_attempts,
                Duration::from_millis(self.reconnect_base_delay_ms),
                Duration::from_millis(self.reconnect_max_delay_ms),
            ),
            keepalive_interval: (self.keepalive_interval_secs > 0)
                .then(|| Duration::from_secs(self.keepalive_interval_secs)),
            missed_keepalives: self.missed_keepalives,
            ack_keepalives: self.ack_keepalives,
            outbound_buffer: self.outbound_buffer,
        }
    }
}

/// Reads `path` when it exists, then applies environment overrides.
pub fn load_settings(path: &Path) -> anyhow::Result<Settings> {
    let mut settings = read_settings_file(path)?;
    apply_env_overrides(&mut settings, |key| std::env::var(key).ok());
    Ok(settings)
}

fn read_settings_file(path: &Path) -> anyhow::Result<Settings> {
    if !path.exists() {
        return Ok(Settings::default());
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read settings file '{}'", path.display()))?;
    toml::from_str(&raw)
        .with_context(|| format!("failed to parse settings file '{}'", path.display()))
}

fn apply_env_overrides(settings: &mut Settings, env: impl Fn(&str) -> Option<String>) {
    if let Some(v) = env("PLAYGROUND_ENDPOINT") {
        settings.endpoint = v;
    }
    if let Some(v) = env("APP__ENDPOINT") {
        settings.endpoint = v;
    }

    if let Some(v) = env("APP__MAX_RECONNECT_ATTEMPTS").and_then(|v| v.parse().ok()) {
        settings.max_reconnect_attempts = v;
    }
    if let Some(v) = env("APP__RECONNECT_BASE_DELAY_MS").and_then(|v| v.parse().ok()) {
        settings.reconnect_base_delay_ms = v;
    }
    if let Some(v) = env("APP__RECONNECT_MAX_DELAY_MS").and_then(|v| v.parse().ok()) {
        settings.reconnect_max_delay_ms = v;
    }
    if let Some(v) = env("APP__KEEPALIVE_INTERVAL_SECS").and_then(|v| v.parse().ok()) {
        settings.keepalive_interval_secs = v;
    }
    if let Some(v) = env("APP__ACK_KEEPALIVES").and_then(|v| v.parse().ok()) {
        settings.ack_keepalives = v;
    }

    if let Some(v) = env("RUST_LOG") {
        settings.log_filter = v;
    }
}

#[cfg(test)]
#[path = "tests/config_tests.rs"]
mod tests;
