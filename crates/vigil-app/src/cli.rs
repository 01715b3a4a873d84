//! CLI argument definitions for the Vigil binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use clap::Parser;
use std::path::PathBuf;
use vigil_core::config::PrometheusConfig;
use vigil_core::VigilConfig;

/// Vigil - ask questions about your infrastructure in plain language.
#[derive(Parser, Debug)]
#[command(name = "vigil", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config")]
    pub config: Option<PathBuf>,

    /// API server port.
    #[arg(short = 'p', long = "port")]
    pub port: Option<u16>,

    /// Address the API server binds to.
    #[arg(long = "host")]
    pub host: Option<String>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level")]
    pub log_level: Option<String>,

    /// Prometheus base URL; enables the Prometheus connector.
    #[arg(long = "prometheus-url")]
    pub prometheus_url: Option<String>,
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > VIGIL_CONFIG env var > ~/.vigil/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        self.config_path_from(|key| std::env::var(key).ok())
    }

    fn config_path_from<F>(&self, lookup: F) -> PathBuf
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Some(p) = lookup("VIGIL_CONFIG").filter(|p| !p.trim().is_empty()) {
            return PathBuf::from(p);
        }
        default_config_path(lookup("HOME"))
    }

    /// Resolve the API server port.
    ///
    /// Priority: --port flag > VIGIL_PORT env var > config file value.
    pub fn resolve_port(&self, config_port: u16) -> u16 {
        self.port_from(config_port, |key| std::env::var(key).ok())
    }

    fn port_from<F>(&self, config_port: u16, lookup: F) -> u16
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(p) = self.port {
            return p;
        }
        if let Some(val) = lookup("VIGIL_PORT") {
            match val.trim().parse::<u16>() {
                Ok(p) => return p,
                Err(_) => tracing::warn!(value = %val, "Ignoring invalid VIGIL_PORT"),
            }
        }
        config_port
    }

    /// Write flag values over an already loaded (and env-overridden) config.
    pub fn apply_to(&self, config: &mut VigilConfig) {
        config.server.port = self.resolve_port(config.server.port);
        self.apply_flags(config);
    }

    fn apply_flags(&self, config: &mut VigilConfig) {
        if let Some(ref host) = self.host {
            config.server.host = host.clone();
        }
        if let Some(ref level) = self.log_level {
            config.logging.level = level.clone();
        }
        if let Some(ref url) = self.prometheus_url {
            config
                .connectors
                .prometheus
                .get_or_insert_with(PrometheusConfig::default)
                .url = url.clone();
        }
    }
}

fn default_config_path(home: Option<String>) -> PathBuf {
    match home {
        Some(home) => PathBuf::from(home).join(".vigil").join("config.toml"),
        None => PathBuf::from("config.toml"),
    }
}
