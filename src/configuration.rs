//! Config for the environment adapters
//!
//! This module provides configuration options for controlling how the adapters reach the
//! environment server and how they behave once connected.
//!
//! Configuration can be created programmatically using [`Configuration::new()`] or by reading
//! environment variables using [`Configuration::from_env()`].
//!
//! # Environment Variables
//!
//! The following environment variables can be used to override configuration values. All
//! values are optional, and case-insensitive.
//!
//! - `HYPERTOKEN_ADDR`: Server WebSocket URL, `ws://host:port` or bare `host:port` (default: `ws://localhost:9999`)
//! - `HYPERTOKEN_TIMEOUT_MS`: Connect and reply timeout in milliseconds (default: `30000`)
//! - `HYPERTOKEN_RENDER`: Set to `"human"` to render after every reset and step (default: none)
//! - `HYPERTOKEN_MASK_POLICY`: Set to `"reject"` to check action masks client-side (default: `forward`)
//! - `HYPERTOKEN_LOG`: Set to `"true"` to enable logging to a file (default: `false`)
//! - `HYPERTOKEN_LOG_DIR`: Directory receiving the log file (default: `.`)

use std::{path::PathBuf, time::Duration};

/// Whether the server is asked to render after every `reset` and `step`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RenderMode {
    /// Never render implicitly
    #[default]
    None,
    /// Server-side console rendering after every reset and step
    Human,
}

/// What to do with an action the agent's action mask flags as illegal.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum MaskPolicy {
    /// Send the action anyway and let the server decide.
    #[default]
    Forward,
    /// Fetch the mask before stepping and fail with
    /// [`BridgeError::IllegalAction`](crate::error::BridgeError::IllegalAction) without sending
    /// anything when the action is masked out.
    Reject,
}

/// Configuration for adapter behaviors.
#[derive(Debug, Clone)]
pub struct Configuration {
    pub(crate) address: String,
    pub(crate) timeout: Duration,
    pub(crate) render_mode: RenderMode,
    pub(crate) mask_policy: MaskPolicy,
    pub(crate) log: bool,
    pub(crate) log_dir: PathBuf,
}

impl Configuration {
    /// Default server address.
    pub const DEFAULT_ADDRESS: &'static str = "ws://localhost:9999";
    /// Default connect and reply timeout.
    pub const DEFAULT_TIMEOUT: Duration = Duration::from_secs(30);

    /// Create a new configuration with default parameters.
    ///
    /// By default:
    /// - The server is expected at `ws://localhost:9999`.
    /// - Connecting and waiting for each reply may take up to 30 seconds.
    /// - Nothing is rendered implicitly.
    /// - Actions are forwarded to the server even when masked out.
    /// - Logging to file is disabled.
    pub fn new() -> Self {
        Self {
            address: Self::DEFAULT_ADDRESS.to_string(),
            timeout: Self::DEFAULT_TIMEOUT,
            render_mode: RenderMode::None,
            mask_policy: MaskPolicy::Forward,
            log: false,
            log_dir: PathBuf::from("."),
        }
    }

    /// Create configuration from environment variables.
    ///
    /// Any unset or unparsable variable results in the default value for its field.
    pub fn from_env() -> Self {
        fn get_env_flag(var: &str, default: bool) -> bool {
            match std::env::var(var) {
                Ok(val) => val.eq_ignore_ascii_case("true"),
                Err(_) => default,
            }
        }

        fn get_env_millis(var: &str) -> Option<Duration> {
            std::env::var(var)
                .ok()?
                .parse::<u64>()
                .ok()
                .map(Duration::from_millis)
        }

        let defaults = Self::new();
        let render_mode = match std::env::var("HYPERTOKEN_RENDER") {
            Ok(val) if val.eq_ignore_ascii_case("human") => RenderMode::Human,
            _ => RenderMode::None,
        };
        let mask_policy = match std::env::var("HYPERTOKEN_MASK_POLICY") {
            Ok(val) if val.eq_ignore_ascii_case("reject") => MaskPolicy::Reject,
            _ => MaskPolicy::Forward,
        };

        Self {
            address: std::env::var("HYPERTOKEN_ADDR").unwrap_or(defaults.address),
            timeout: get_env_millis("HYPERTOKEN_TIMEOUT_MS").unwrap_or(defaults.timeout),
            render_mode,
            mask_policy,
            log: get_env_flag("HYPERTOKEN_LOG", false),
            log_dir: std::env::var("HYPERTOKEN_LOG_DIR")
                .map(PathBuf::from)
                .unwrap_or(defaults.log_dir),
        }
    }

    /// Set the server address.
    pub fn with_address(mut self, address: impl Into<String>) -> Self {
        self.address = address.into();
        self
    }

    /// Set the connect and reply timeout.
    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    /// Set the render mode.
    pub fn with_render_mode(mut self, mode: RenderMode) -> Self {
        self.render_mode = mode;
        self
    }

    /// Set the action mask policy.
    pub fn with_mask_policy(mut self, policy: MaskPolicy) -> Self {
        self.mask_policy = policy;
        self
    }

    /// Enable or disable logging to file.
    pub fn with_log(mut self, value: bool) -> Self {
        self.log = value;
        self
    }

    /// Directory receiving the log file when logging is enabled.
    pub fn with_log_dir(mut self, dir: impl Into<PathBuf>) -> Self {
        self.log_dir = dir.into();
        self
    }

    /// Server address.
    pub fn address(&self) -> &str {
        &self.address
    }

    /// Connect and reply timeout.
    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Render mode.
    pub fn render_mode(&self) -> RenderMode {
        self.render_mode
    }

    /// Action mask policy.
    pub fn mask_policy(&self) -> MaskPolicy {
        self.mask_policy
    }
}

impl Default for Configuration {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults() {
        let config = Configuration::default();
        assert_eq!(config.address(), "ws://localhost:9999");
        assert_eq!(config.timeout(), Duration::from_secs(30));
        assert_eq!(config.render_mode(), RenderMode::None);
        assert_eq!(config.mask_policy(), MaskPolicy::Forward);
        assert!(!config.log);
    }

    #[test]
    fn builder_overrides() {
        let config = Configuration::new()
            .with_address("ws://10.0.0.2:7000")
            .with_timeout(Duration::from_millis(250))
            .with_render_mode(RenderMode::Human)
            .with_mask_policy(MaskPolicy::Reject)
            .with_log(true)
            .with_log_dir("/tmp");
        assert_eq!(config.address(), "ws://10.0.0.2:7000");
        assert_eq!(config.timeout(), Duration::from_millis(250));
        assert_eq!(config.render_mode(), RenderMode::Human);
        assert_eq!(config.mask_policy(), MaskPolicy::Reject);
        assert!(config.log);
        assert_eq!(config.log_dir, PathBuf::from("/tmp"));
    }
}
