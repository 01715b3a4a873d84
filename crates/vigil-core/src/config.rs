use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::error::{Result, VigilError};

/// Top-level configuration for Vigil.
///
/// Loaded from `~/.vigil/config.toml` by default. Connector credentials and
/// URLs are read once at startup; the connector set is fixed for the life of
/// the process.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct VigilConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub chat: ChatConfig,
    #[serde(default)]
    pub query: QueryConfig,
    #[serde(default)]
    pub cache: CacheConfig,
    #[serde(default)]
    pub connectors: ConnectorsConfig,
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl VigilConfig {
    /// Load configuration from a TOML file.
    ///
    /// Returns an error if the file cannot be read, parsed, or validated.
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: VigilConfig = toml::from_str(&content)?;
        config.validate()?;
        info!("Configuration loaded from {}", path.display());
        Ok(config)
    }

    /// Load configuration from a TOML file, falling back to defaults if the
    /// file does not exist or cannot be parsed.
    pub fn load_or_default(path: &Path) -> Self {
        match Self::load(path) {
            Ok(config) => config,
            Err(e) => {
                warn!(
                    "Failed to load config from {}: {}. Using defaults.",
                    path.display(),
                    e
                );
                Self::default()
            }
        }
    }

    /// Save the current configuration to a TOML file.
    pub fn save(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content =
            toml::to_string_pretty(self).map_err(|e| VigilError::Config(e.to_string()))?;
        std::fs::write(path, content)?;
        info!("Configuration saved to {}", path.display());
        Ok(())
    }

    /// Apply `VIGIL_*` environment overrides on top of the file values.
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    /// Apply overrides from an arbitrary key lookup.
    ///
    /// Recognised keys: `VIGIL_PROMETHEUS_URL`, `VIGIL_ALERTMANAGER_URL`,
    /// `VIGIL_LOG_LEVEL`.
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(url) = lookup("VIGIL_PROMETHEUS_URL").filter(|v| !v.trim().is_empty()) {
            self.connectors
                .prometheus
                .get_or_insert_with(PrometheusConfig::default)
                .url = url;
        }
        if let Some(url) = lookup("VIGIL_ALERTMANAGER_URL").filter(|v| !v.trim().is_empty()) {
            if let Some(prom) = self.connectors.prometheus.as_mut() {
                prom.alertmanager_url = Some(url);
            } else {
                warn!("VIGIL_ALERTMANAGER_URL set without a Prometheus connector; ignoring");
            }
        }
        if let Some(level) = lookup("VIGIL_LOG_LEVEL").filter(|v| !v.trim().is_empty()) {
            self.logging.level = level;
        }
    }

    /// Check cross-field constraints that serde cannot express.
    pub fn validate(&self) -> Result<()> {
        let min = self.query.min_duration();
        let max = self.query.max_duration();
        if min > max {
            return Err(VigilError::Config(format!(
                "query.min_time_range ({}) exceeds query.max_time_range ({})",
                self.query.min_time_range, self.query.max_time_range
            )));
        }
        if self.chat.max_history == 0 {
            return Err(VigilError::Config(
                "chat.max_history must be at least 1".to_string(),
            ));
        }
        if self.chat.max_message_length == 0 {
            return Err(VigilError::Config(
                "chat.max_message_length must be at least 1".to_string(),
            ));
        }
        if self.connectors.call_timeout_ms == 0 || self.chat.turn_deadline_ms == 0 {
            return Err(VigilError::Config(
                "timeouts must be greater than zero".to_string(),
            ));
        }
        if let Some(prom) = &self.connectors.prometheus {
            if prom.url.trim().is_empty() {
                return Err(VigilError::Config(
                    "connectors.prometheus.url must not be empty".to_string(),
                ));
            }
        }
        Ok(())
    }
}

/// HTTP server settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    /// Comma-separated allowed origins, or `*`.
    pub cors_origins: String,
    pub rate_limit_per_sec: u64,
    pub max_body_bytes: usize,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8000,
            cors_origins: "*".to_string(),
            rate_limit_per_sec: 100,
            max_body_bytes: 64 * 1024,
        }
    }
}

/// Conversation engine settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatConfig {
    /// Maximum message length in characters.
    pub max_message_length: usize,
    /// Turns retained per session; oldest evicted first.
    pub max_history: usize,
    /// Idle minutes before a session expires.
    pub session_idle_minutes: u32,
    /// Hard ceiling on one turn, connector fan-out included.
    pub turn_deadline_ms: u64,
    /// Service names the classifier recognises without a naming convention.
    pub known_services: Vec<String>,
}

impl Default for ChatConfig {
    fn default() -> Self {
        Self {
            max_message_length: 2000,
            max_history: 50,
            session_idle_minutes: 24 * 60,
            turn_deadline_ms: 8000,
            known_services: Vec::new(),
        }
    }
}

impl ChatConfig {
    pub fn turn_deadline(&self) -> Duration {
        Duration::from_millis(self.turn_deadline_ms)
    }

    pub fn session_idle(&self) -> Duration {
        Duration::from_secs(u64::from(self.session_idle_minutes) * 60)
    }
}

/// Query planning bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueryConfig {
    pub default_time_range: String,
    pub min_time_range: String,
    pub max_time_range: String,
    pub max_results: usize,
}

impl Default for QueryConfig {
    fn default() -> Self {
        Self {
            default_time_range: "1h".to_string(),
            min_time_range: "1m".to_string(),
            max_time_range: "7d".to_string(),
            max_results: 1000,
        }
    }
}

impl QueryConfig {
    pub fn default_duration(&self) -> Duration {
        parse_duration(&self.default_time_range).unwrap_or(Duration::from_secs(3600))
    }

    pub fn min_duration(&self) -> Duration {
        parse_duration(&self.min_time_range).unwrap_or(Duration::from_secs(60))
    }

    pub fn max_duration(&self) -> Duration {
        parse_duration(&self.max_time_range).unwrap_or(Duration::from_secs(7 * 86_400))
    }

    /// Clamp a requested window into `[min_time_range, max_time_range]`.
    pub fn clamp(&self, requested: Duration) -> Duration {
        requested.clamp(self.min_duration(), self.max_duration())
    }
}

/// Result cache settings. TTLs are per query kind.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    pub enabled: bool,
    pub metrics_ttl_secs: u64,
    pub alerts_ttl_secs: u64,
    pub services_ttl_secs: u64,
    pub sweep_interval_secs: u64,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            metrics_ttl_secs: 60,
            alerts_ttl_secs: 30,
            services_ttl_secs: 300,
            sweep_interval_secs: 60,
        }
    }
}

/// Connector timeouts and per-backend credentials.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ConnectorsConfig {
    /// Per-call timeout for a single connector request.
    pub call_timeout_ms: u64,
    /// Overall deadline for one fan-out.
    pub fanout_deadline_ms: u64,
    /// How long a health check result is reused before fan-outs check again.
    /// 0 checks before every fan-out.
    pub health_ttl_secs: u64,
    pub prometheus: Option<PrometheusConfig>,
    pub azure_monitor: Option<AzureMonitorConfig>,
}

impl Default for ConnectorsConfig {
    fn default() -> Self {
        Self {
            call_timeout_ms: 5000,
            fanout_deadline_ms: 7000,
            health_ttl_secs: 15,
            prometheus: None,
            azure_monitor: None,
        }
    }
}

impl ConnectorsConfig {
    pub fn call_timeout(&self) -> Duration {
        Duration::from_millis(self.call_timeout_ms)
    }

    pub fn fanout_deadline(&self) -> Duration {
        Duration::from_millis(self.fanout_deadline_ms)
    }

    pub fn health_ttl(&self) -> Duration {
        Duration::from_secs(self.health_ttl_secs)
    }
}

/// Prometheus (and optional Alertmanager) endpoint.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PrometheusConfig {
    pub url: String,
    /// Defaults to the Prometheus URL with port 9090 swapped for 9093.
    pub alertmanager_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
}

/// Azure Monitor subscription access. The bearer token is supplied by the
/// deployment; Vigil never negotiates one.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct AzureMonitorConfig {
    pub subscription_id: String,
    pub bearer_token: String,
    /// Full ARM resource ids queried for metrics.
    pub resource_ids: Vec<String>,
}

/// Log output settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// trace, debug, info, warn, error, or a full `EnvFilter` directive.
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

// =============================================================================
// Duration helpers
// =============================================================================

/// Parse a compact duration like `30s`, `15m`, `1h`, `7d`, or `2w`.
///
/// A bare number is read as seconds. Returns `None` for anything else.
pub fn parse_duration(raw: &str) -> Option<Duration> {
    let s = raw.trim().to_lowercase();
    if s.is_empty() {
        return None;
    }
    let split = s.find(|c: char| !c.is_ascii_digit()).unwrap_or(s.len());
    let (digits, unit) = s.split_at(split);
    let n: u64 = digits.parse().ok()?;
    let secs = match unit.trim() {
        "" | "s" | "sec" | "secs" | "second" | "seconds" => n,
        "m" | "min" | "mins" | "minute" | "minutes" => n.checked_mul(60)?,
        "h" | "hr" | "hrs" | "hour" | "hours" => n.checked_mul(3600)?,
        "d" | "day" | "days" => n.checked_mul(86_400)?,
        "w" | "week" | "weeks" => n.checked_mul(7 * 86_400)?,
        _ => return None,
    };
    Some(Duration::from_secs(secs))
}

/// Render a duration in the largest whole unit (`90m` stays `90m`, `3600s` is `1h`).
pub fn format_duration(d: Duration) -> String {
    let secs = d.as_secs();
    if secs > 0 && secs % 86_400 == 0 {
        format!("{}d", secs / 86_400)
    } else if secs > 0 && secs % 3600 == 0 {
        format!("{}h", secs / 3600)
    } else if secs > 0 && secs % 60 == 0 {
        format!("{}m", secs / 60)
    } else {
        format!("{}s", secs)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::collections::HashMap;
    use std::io::Write;
    use tempfile::NamedTempFile;

    fn create_temp_config(content: &str) -> NamedTempFile {
        let mut file = NamedTempFile::new().unwrap();
        file.write_all(content.as_bytes()).unwrap();
        file
    }

    #[test]
    fn test_default_config() {
        let config = VigilConfig::default();
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.chat.max_history, 50);
        assert_eq!(config.chat.max_message_length, 2000);
        assert_eq!(config.query.default_time_range, "1h");
        assert_eq!(config.cache.alerts_ttl_secs, 30);
        assert!(config.cache.alerts_ttl_secs < config.cache.services_ttl_secs);
        assert!(config.connectors.prometheus.is_none());
        assert_eq!(config.connectors.health_ttl(), Duration::from_secs(15));
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_turn_deadline_below_sum_of_call_timeouts() {
        let config = VigilConfig::default();
        assert!(config.chat.turn_deadline() < config.connectors.call_timeout() * 2);
    }

    #[test]
    fn test_load_valid_config() {
        let content = r#"
[server]
port = 9100

[chat]
max_history = 10
known_services = ["checkout", "payments"]

[cache]
alerts_ttl_secs = 5

[connectors.prometheus]
url = "http://prometheus:9090"
username = "ops"
password = "secret"
"#;
        let file = create_temp_config(content);
        let config = VigilConfig::load(file.path()).unwrap();
        assert_eq!(config.server.port, 9100);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.chat.max_history, 10);
        assert_eq!(config.chat.known_services.len(), 2);
        assert_eq!(config.cache.alerts_ttl_secs, 5);
        assert_eq!(config.cache.metrics_ttl_secs, 60);
        let prom = config.connectors.prometheus.unwrap();
        assert_eq!(prom.url, "http://prometheus:9090");
        assert_eq!(prom.username.as_deref(), Some("ops"));
        assert!(prom.alertmanager_url.is_none());
    }

    #[test]
    fn test_load_invalid_toml_is_config_error() {
        let file = create_temp_config("[server\nport = ");
        let err = VigilConfig::load(file.path()).unwrap_err();
        assert!(matches!(err, VigilError::Config(_)));
    }

    #[test]
    fn test_load_rejects_inverted_time_bounds() {
        let content = r#"
[query]
min_time_range = "2d"
max_time_range = "1h"
"#;
        let file = create_temp_config(content);
        let err = VigilConfig::load(file.path()).unwrap_err();
        assert!(err.to_string().contains("min_time_range"));
    }

    #[test]
    fn test_load_or_default_missing_file() {
        let config = VigilConfig::load_or_default(Path::new("/nonexistent/vigil.toml"));
        assert_eq!(config.server.port, 8000);
    }

    #[test]
    fn test_save_and_reload_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.toml");
        let mut config = VigilConfig::default();
        config.server.port = 9999;
        config.connectors.azure_monitor = Some(AzureMonitorConfig {
            subscription_id: "sub-1".into(),
            bearer_token: "token".into(),
            resource_ids: vec!["/subscriptions/sub-1/rg/vm".into()],
        });
        config.save(&path).unwrap();
        let loaded = VigilConfig::load(&path).unwrap();
        assert_eq!(loaded.server.port, 9999);
        assert_eq!(
            loaded.connectors.azure_monitor.unwrap().resource_ids.len(),
            1
        );
    }

    #[test]
    fn test_overrides_create_prometheus_section() {
        let env: HashMap<&str, &str> = [
            ("VIGIL_PROMETHEUS_URL", "http://prom:9090"),
            ("VIGIL_ALERTMANAGER_URL", "http://am:9093"),
            ("VIGIL_LOG_LEVEL", "debug"),
        ]
        .into_iter()
        .collect();
        let mut config = VigilConfig::default();
        config.apply_overrides(|k| env.get(k).map(|v| v.to_string()));
        let prom = config.connectors.prometheus.unwrap();
        assert_eq!(prom.url, "http://prom:9090");
        assert_eq!(prom.alertmanager_url.as_deref(), Some("http://am:9093"));
        assert_eq!(config.logging.level, "debug");
    }

    #[test]
    fn test_alertmanager_override_without_prometheus_ignored() {
        let mut config = VigilConfig::default();
        config.apply_overrides(|k| {
            (k == "VIGIL_ALERTMANAGER_URL").then(|| "http://am:9093".to_string())
        });
        assert!(config.connectors.prometheus.is_none());
    }

    #[test]
    fn test_validate_rejects_zero_history() {
        let mut config = VigilConfig::default();
        config.chat.max_history = 0;
        assert!(config.validate().is_err());
    }

    // ---- Durations ----

    #[test]
    fn test_parse_duration_units() {
        assert_eq!(parse_duration("30s"), Some(Duration::from_secs(30)));
        assert_eq!(parse_duration("15m"), Some(Duration::from_secs(900)));
        assert_eq!(parse_duration("1h"), Some(Duration::from_secs(3600)));
        assert_eq!(parse_duration("7d"), Some(Duration::from_secs(604_800)));
        assert_eq!(parse_duration("2 hours"), Some(Duration::from_secs(7200)));
        assert_eq!(parse_duration("1w"), Some(Duration::from_secs(604_800)));
        assert_eq!(parse_duration("45"), Some(Duration::from_secs(45)));
    }

    #[test]
    fn test_parse_duration_rejects_garbage() {
        assert_eq!(parse_duration(""), None);
        assert_eq!(parse_duration("h"), None);
        assert_eq!(parse_duration("5 fortnights"), None);
    }

    #[test]
    fn test_format_duration() {
        assert_eq!(format_duration(Duration::from_secs(3600)), "1h");
        assert_eq!(format_duration(Duration::from_secs(5400)), "90m");
        assert_eq!(format_duration(Duration::from_secs(86_400 * 7)), "7d");
        assert_eq!(format_duration(Duration::from_secs(45)), "45s");
    }

    #[test]
    fn test_clamp_time_range() {
        let q = QueryConfig::default();
        assert_eq!(q.clamp(Duration::from_secs(1)), Duration::from_secs(60));
        assert_eq!(
            q.clamp(Duration::from_secs(30 * 86_400)),
            Duration::from_secs(7 * 86_400)
        );
        assert_eq!(q.clamp(Duration::from_secs(900)), Duration::from_secs(900));
    }

    #[test]
    fn test_invalid_bound_strings_fall_back() {
        let q = QueryConfig {
            default_time_range: "soon".into(),
            ..QueryConfig::default()
        };
        assert_eq!(q.default_duration(), Duration::from_secs(3600));
    }
}
