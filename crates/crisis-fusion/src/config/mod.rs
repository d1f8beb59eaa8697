use crate::allocation::{AllocatorConfig, DemandConfig};
use crate::scoring::{ScoringConfig, ScoringConfigError};
use crate::signals::{CredibilityConfig, NormalizerConfig, WindowConfig};
use serde::{Deserialize, Serialize};
use std::env;
use std::fmt;
use std::net::{IpAddr, SocketAddr};
use std::path::{Path, PathBuf};

/// Distinguishes runtime behavior for different stages of the service.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AppEnvironment {
    Development,
    Test,
    Production,
}

impl AppEnvironment {
    fn from_str(value: &str) -> Self {
        match value.trim().to_ascii_lowercase().as_str() {
            "prod" | "production" => Self::Production,
            "test" | "ci" => Self::Test,
            _ => Self::Development,
        }
    }
}

/// Top-level configuration for the application.
#[derive(Debug, Clone)]
pub struct AppConfig {
    pub environment: AppEnvironment,
    pub server: ServerConfig,
    pub telemetry: TelemetryConfig,
    pub engine: EngineConfig,
}

impl AppConfig {
    pub fn load() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let environment = AppEnvironment::from_str(
            &env::var("APP_ENV").unwrap_or_else(|_| "development".to_string()),
        );

        let host = env::var("APP_HOST").unwrap_or_else(|_| "127.0.0.1".to_string());
        let port = env::var("APP_PORT")
            .unwrap_or_else(|_| "3000".to_string())
            .parse::<u16>()
            .map_err(|_| ConfigError::InvalidPort)?;

        let log_level = env::var("APP_LOG_LEVEL").unwrap_or_else(|_| "info".to_string());

        let mut engine = match env::var("ENGINE_CONFIG_PATH") {
            Ok(path) if !path.trim().is_empty() => EngineConfig::from_path(Path::new(path.trim()))?,
            _ => EngineConfig::default(),
        };
        engine.apply_env_overrides()?;
        engine.validate()?;

        Ok(Self {
            environment,
            server: ServerConfig { host, port },
            telemetry: TelemetryConfig { log_level },
            engine,
        })
    }
}

/// Settings controlling the HTTP server binding.
#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl ServerConfig {
    pub fn socket_addr(&self) -> Result<SocketAddr, ConfigError> {
        if self.host.eq_ignore_ascii_case("localhost") {
            return Ok(SocketAddr::new(IpAddr::from([127, 0, 0, 1]), self.port));
        }

        let ip: IpAddr = self
            .host
            .parse()
            .map_err(|source| ConfigError::InvalidHost { source })?;

        Ok(SocketAddr::new(ip, self.port))
    }
}

/// Tracing and metrics controls.
#[derive(Debug, Clone)]
pub struct TelemetryConfig {
    pub log_level: String,
}

/// Scheduling and freshness bounds for decision cycles.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CycleConfig {
    pub cadence_secs: u64,
    pub timeout_secs: u64,
    /// Zone or resource snapshots older than this flag scores as low confidence.
    pub reference_max_age_secs: u64,
}

impl Default for CycleConfig {
    fn default() -> Self {
        Self {
            cadence_secs: 300,
            timeout_secs: 30,
            reference_max_age_secs: 86_400,
        }
    }
}

/// Every tunable of the fusion and allocation engine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub normalizer: NormalizerConfig,
    pub credibility: CredibilityConfig,
    pub window: WindowConfig,
    pub scoring: ScoringConfig,
    pub demand: DemandConfig,
    pub allocator: AllocatorConfig,
    pub travel_speed_kmh: f64,
    pub cycle: CycleConfig,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            normalizer: NormalizerConfig::default(),
            credibility: CredibilityConfig::default(),
            window: WindowConfig::default(),
            scoring: ScoringConfig::default(),
            demand: DemandConfig::default(),
            allocator: AllocatorConfig::default(),
            travel_speed_kmh: 40.0,
            cycle: CycleConfig::default(),
        }
    }
}

impl EngineConfig {
    pub fn from_path(path: &Path) -> Result<Self, ConfigError> {
        let raw = std::fs::read_to_string(path).map_err(|source| ConfigError::EngineFile {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_json(&raw).map_err(|source| ConfigError::EngineParse {
            path: path.to_path_buf(),
            source,
        })
    }

    pub fn from_json(raw: &str) -> Result<Self, serde_json::Error> {
        serde_json::from_str(raw)
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(threshold) = env_parse::<f64>("CREDIBILITY_THRESHOLD")? {
            self.credibility.suppression_threshold = threshold;
        }
        if let Some(cadence) = env_parse::<u64>("CYCLE_CADENCE_SECS")? {
            self.cycle.cadence_secs = cadence;
        }
        if let Some(timeout) = env_parse::<u64>("CYCLE_TIMEOUT_SECS")? {
            self.cycle.timeout_secs = timeout;
        }
        if let Some(max_age) = env_parse::<u64>("REFERENCE_MAX_AGE_SECS")? {
            self.cycle.reference_max_age_secs = max_age;
        }
        Ok(())
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.scoring.validate().map_err(ConfigError::Scoring)?;
        if !(0.0..=1.0).contains(&self.credibility.suppression_threshold) {
            return Err(ConfigError::OutOfRange {
                field: "credibility.suppression_threshold",
            });
        }
        let retention = self.window.retention_hours;
        if [retention.weather, retention.social, retention.seismic]
            .iter()
            .any(|hours| !(*hours >= 0.0))
        {
            return Err(ConfigError::OutOfRange {
                field: "window.retention_hours",
            });
        }
        if !(self.travel_speed_kmh > 0.0) {
            return Err(ConfigError::OutOfRange {
                field: "travel_speed_kmh",
            });
        }
        if self.cycle.cadence_secs == 0 || self.cycle.timeout_secs == 0 {
            return Err(ConfigError::OutOfRange {
                field: "cycle cadence/timeout",
            });
        }
        Ok(())
    }
}

fn env_parse<T: std::str::FromStr>(key: &'static str) -> Result<Option<T>, ConfigError> {
    match env::var(key) {
        Ok(value) if !value.trim().is_empty() => value
            .trim()
            .parse::<T>()
            .map(Some)
            .map_err(|_| ConfigError::InvalidOverride { key, value }),
        _ => Ok(None),
    }
}

#[derive(Debug)]
pub enum ConfigError {
    InvalidPort,
    InvalidHost { source: std::net::AddrParseError },
    InvalidOverride { key: &'static str, value: String },
    EngineFile { path: PathBuf, source: std::io::Error },
    EngineParse { path: PathBuf, source: serde_json::Error },
    Scoring(ScoringConfigError),
    OutOfRange { field: &'static str },
}

impl fmt::Display for ConfigError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConfigError::InvalidPort => write!(f, "APP_PORT must be a valid u16"),
            ConfigError::InvalidHost { .. } => {
                write!(f, "APP_HOST must parse to an IPv4 or IPv6 address")
            }
            ConfigError::InvalidOverride { key, value } => {
                write!(f, "{key} has unparseable value '{value}'")
            }
            ConfigError::EngineFile { path, .. } => {
                write!(f, "unable to read engine config {}", path.display())
            }
            ConfigError::EngineParse { path, source } => {
                write!(f, "engine config {} is invalid: {source}", path.display())
            }
            ConfigError::Scoring(err) => write!(f, "scoring config rejected: {err}"),
            ConfigError::OutOfRange { field } => write!(f, "{field} is out of range"),
        }
    }
}

impl std::error::Error for ConfigError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ConfigError::InvalidHost { source } => Some(source),
            ConfigError::EngineFile { source, .. } => Some(source),
            ConfigError::EngineParse { source, .. } => Some(source),
            ConfigError::Scoring(err) => Some(err),
            ConfigError::InvalidPort
            | ConfigError::InvalidOverride { .. }
            | ConfigError::OutOfRange { .. } => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::env;
    use std::sync::{Mutex, OnceLock};

    fn env_guard() -> &'static Mutex<()> {
        static GUARD: OnceLock<Mutex<()>> = OnceLock::new();
        GUARD.get_or_init(|| Mutex::new(()))
    }

    fn reset_env() {
        for key in [
            "APP_ENV",
            "APP_HOST",
            "APP_PORT",
            "APP_LOG_LEVEL",
            "ENGINE_CONFIG_PATH",
            "CREDIBILITY_THRESHOLD",
            "CYCLE_CADENCE_SECS",
            "CYCLE_TIMEOUT_SECS",
            "REFERENCE_MAX_AGE_SECS",
        ] {
            env::remove_var(key);
        }
    }

    #[test]
    fn load_uses_defaults_when_env_missing() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        let config = AppConfig::load().expect("config loads with defaults");
        assert_eq!(config.environment, AppEnvironment::Development);
        assert_eq!(config.server.host, "127.0.0.1");
        assert_eq!(config.server.port, 3000);
        assert_eq!(config.telemetry.log_level, "info");
        assert_eq!(config.engine.cycle.cadence_secs, 300);
        assert_eq!(config.engine.credibility.suppression_threshold, 0.15);
    }

    #[test]
    fn accepts_localhost_host() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("APP_HOST", "localhost");
        let config = AppConfig::load().expect("config loads");
        let addr = config.server.socket_addr().expect("localhost resolves");
        assert_eq!(addr, SocketAddr::new(IpAddr::from([127, 0, 0, 1]), 3000));
        reset_env();
    }

    #[test]
    fn env_overrides_engine_settings() {
        let _lock = env_guard().lock().expect("env mutex poisoned");
        reset_env();
        env::set_var("CREDIBILITY_THRESHOLD", "0.3");
        env::set_var("CYCLE_TIMEOUT_SECS", "5");
        let config = AppConfig::load().expect("config loads");
        assert_eq!(config.engine.credibility.suppression_threshold, 0.3);
        assert_eq!(config.engine.cycle.timeout_secs, 5);

        env::set_var("CYCLE_CADENCE_SECS", "soon");
        let err = AppConfig::load().expect_err("bad override");
        assert!(err.to_string().contains("CYCLE_CADENCE_SECS"));
        reset_env();
    }

    #[test]
    fn engine_json_rejects_bad_fusion_weights() {
        let config = EngineConfig::from_json(
            r#"{ "scoring": { "weights": { "hazard": 0.6, "exposure": 0.3, "vulnerability": 0.3 } } }"#,
        )
        .expect("parses");
        assert_eq!(config.travel_speed_kmh, 40.0);
        assert!(matches!(
            config.validate(),
            Err(ConfigError::Scoring(ScoringConfigError::WeightsDoNotSumToOne(_)))
        ));
    }

    #[test]
    fn engine_json_reads_signal_retention() {
        let config = EngineConfig::from_json(
            r#"{ "window": { "retention_hours": { "weather": 12.0, "social": 1.0, "seismic": 6.0 } } }"#,
        )
        .expect("parses");
        assert_eq!(config.window.retention_hours.social, 1.0);
        assert!(config.validate().is_ok());

        let mut negative = EngineConfig::default();
        negative.window.retention_hours.weather = -1.0;
        assert!(matches!(
            negative.validate(),
            Err(ConfigError::OutOfRange {
                field: "window.retention_hours"
            })
        ));
    }
}
