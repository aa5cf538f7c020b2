//! Controller binary configuration (spec.md §6 "Environment/flags").
//!
//! Grounded on the teacher's `main.rs` clap usage, generalized from its
//! flat Stellar-specific flags into the full engine-level surface: run
//! mode, cache strategy, namespace scoping, ports, concurrency bound,
//! leader-election id, and log level.

use clap::{Parser, ValueEnum};

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum RunMode {
    Production,
    Dev,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            RunMode::Production => write!(f, "production"),
            RunMode::Dev => write!(f, "dev"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum CacheStrategy {
    Standard,
    Lazy,
    Selective,
    OnDemand,
    None,
}

impl std::fmt::Display for CacheStrategy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            CacheStrategy::Standard => write!(f, "standard"),
            CacheStrategy::Lazy => write!(f, "lazy"),
            CacheStrategy::Selective => write!(f, "selective"),
            CacheStrategy::OnDemand => write!(f, "on-demand"),
            CacheStrategy::None => write!(f, "none"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum LogLevel {
    Trace,
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_filter_str())
    }
}

impl LogLevel {
    pub fn as_filter_str(&self) -> &'static str {
        match self {
            LogLevel::Trace => "trace",
            LogLevel::Debug => "debug",
            LogLevel::Info => "info",
            LogLevel::Warn => "warn",
            LogLevel::Error => "error",
        }
    }
}

#[derive(Debug, Parser, Clone)]
#[command(name = "graphdb-operator", about = "Kubernetes operator for distributed graph-DB clusters")]
pub struct Config {
    #[arg(long, env = "GRAPHDB_MODE", value_enum, default_value_t = RunMode::Production)]
    pub mode: RunMode,

    #[arg(long, env = "GRAPHDB_CACHE_STRATEGY", value_enum, default_value_t = CacheStrategy::Standard)]
    pub cache_strategy: CacheStrategy,

    /// Restrict watches to this namespace; unset watches all namespaces.
    #[arg(long, env = "GRAPHDB_WATCH_NAMESPACE")]
    pub watch_namespace: Option<String>,

    /// Only watch namespaces whose name starts with this prefix.
    #[arg(long, env = "GRAPHDB_NAMESPACE_PREFIX")]
    pub namespace_prefix: Option<String>,

    #[arg(long, env = "GRAPHDB_METRICS_PORT", default_value_t = 9090)]
    pub metrics_port: u16,

    #[arg(long, env = "GRAPHDB_HEALTH_PORT", default_value_t = 8080)]
    pub health_port: u16,

    /// Per-kind concurrent reconcile bound (spec.md §5).
    #[arg(long, env = "GRAPHDB_CONCURRENCY", default_value_t = 3)]
    pub concurrency: usize,

    #[arg(long, env = "GRAPHDB_LEADER_ELECTION_ID", default_value = "graphdb-operator-leader")]
    pub leader_election_id: String,

    #[arg(long, env = "GRAPHDB_LEASE_NAMESPACE", default_value = "graphdb-system")]
    pub lease_namespace: String,

    #[arg(long, env = "GRAPHDB_LOG_LEVEL", value_enum, default_value_t = LogLevel::Info)]
    pub log_level: LogLevel,

    #[arg(long, env = "OTEL_EXPORTER_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,
}

impl Config {
    pub fn load() -> Self {
        Config::parse()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_parse_from_empty_args() {
        let cfg = Config::parse_from(["graphdb-operator"]);
        assert_eq!(cfg.mode, RunMode::Production);
        assert_eq!(cfg.concurrency, 3);
        assert_eq!(cfg.metrics_port, 9090);
    }
}
