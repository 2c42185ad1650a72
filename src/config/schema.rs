//! Configuration schema definitions.
//!
//! This module defines the complete configuration structure for the relay.
//! All types derive Serde traits for deserialization from config files.

use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::relay::rewrite::DEFAULT_TARGET_VERSION;

/// Root configuration for the relay.
#[derive(Debug, Clone, Deserialize, Serialize, Default)]
#[serde(default)]
pub struct RelayConfig {
    /// Listener configuration (bind address, concurrency ceiling).
    pub listener: ListenerConfig,

    /// Daemon control socket.
    pub upstream: UpstreamConfig,

    /// Version rewriting rules.
    pub rewrite: RewriteConfig,

    /// Byte pump tuning.
    pub relay: PumpConfig,

    /// Timeout configuration.
    pub timeouts: TimeoutConfig,

    /// Observability settings.
    pub observability: ObservabilityConfig,
}

/// Listener configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ListenerConfig {
    /// Bind address (e.g., "0.0.0.0:2375").
    pub bind_address: String,

    /// Maximum concurrent relayed connections.
    pub max_connections: usize,

    /// What to do with new clients once `max_connections` is reached.
    pub overload: OverloadPolicy,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            bind_address: "0.0.0.0:2375".to_string(),
            max_connections: 1024,
            overload: OverloadPolicy::Wait,
        }
    }
}

/// Behaviour when every connection slot is taken.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum OverloadPolicy {
    /// Stop accepting until a slot frees up (kernel backlog absorbs the rest).
    #[default]
    Wait,
    /// Accept and immediately close the excess connection.
    Shed,
}

/// Upstream daemon configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct UpstreamConfig {
    /// Path of the daemon's Unix control socket.
    pub socket_path: PathBuf,
}

impl Default for UpstreamConfig {
    fn default() -> Self {
        Self {
            socket_path: PathBuf::from("/var/run/docker.sock"),
        }
    }
}

/// Request rewriting configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RewriteConfig {
    /// Version written into `Api-Version` and `User-Agent`.
    pub target_version: String,

    /// Which requests on a keep-alive connection get header rewriting.
    pub policy: RewritePolicy,

    /// Largest request head buffered before falling back to passthrough.
    pub max_head_bytes: usize,
}

impl Default for RewriteConfig {
    fn default() -> Self {
        Self {
            target_version: DEFAULT_TARGET_VERSION.to_string(),
            policy: RewritePolicy::FirstRequest,
            max_head_bytes: 64 * 1024,
        }
    }
}

/// Header rewrite scope across pipelined requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum RewritePolicy {
    /// Headers rewritten on the first request only; later requests get the path rule.
    #[default]
    FirstRequest,
    /// Every request gets the full rule set.
    EveryRequest,
}

/// Byte pump configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PumpConfig {
    /// Read buffer per direction, in bytes.
    pub buffer_size: usize,
}

impl Default for PumpConfig {
    fn default() -> Self {
        Self {
            buffer_size: 16 * 1024,
        }
    }
}

/// Timeout configuration for various operations.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TimeoutConfig {
    /// Upstream connect timeout in seconds.
    pub connect_secs: u64,

    /// Idle connection timeout in seconds (0 disables).
    pub idle_secs: u64,

    /// How long in-flight connections may drain on shutdown.
    pub shutdown_grace_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            connect_secs: 5,
            idle_secs: 300,
            shutdown_grace_secs: 30,
        }
    }
}

/// Observability configuration.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ObservabilityConfig {
    /// Log level (trace, debug, info, warn, error).
    pub log_level: String,

    /// Log output format.
    pub log_format: LogFormat,

    /// Enable metrics endpoint.
    pub metrics_enabled: bool,

    /// Metrics endpoint bind address.
    pub metrics_address: String,
}

impl Default for ObservabilityConfig {
    fn default() -> Self {
        Self {
            log_level: "info".to_string(),
            log_format: LogFormat::Pretty,
            metrics_enabled: false,
            metrics_address: "127.0.0.1:9090".to_string(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize, Serialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    #[default]
    Pretty,
    Json,
}
