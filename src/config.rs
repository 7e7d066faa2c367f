use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;
use url::Url;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub workfossa: WorkFossaConfig,
    pub scheduler: SchedulerConfig,
    pub logging: LoggingConfig,
    pub metrics: MetricsConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub request_timeout: u64,
    pub shutdown_timeout: u64,
    #[serde(default)]
    pub cors_origins: Vec<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub min_connections: u32,
    pub acquire_timeout: u64,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkFossaConfig {
    pub base_url: String,
    pub username: Option<String>,
    pub password: Option<String>,
    pub chrome_path: Option<String>,
    pub headless: bool,
    pub request_timeout: u64,
    pub retry_attempts: u32,
    pub retry_delay_ms: u64,
    pub user_agent: String,
    pub screenshots_dir: Option<PathBuf>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SchedulerConfig {
    pub enabled: bool,
    pub max_consecutive_failures: u32,
    pub job_timeout: u64,
    pub history_retention: u32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    pub level: String,
    pub directory: Option<PathBuf>,
    pub file_prefix: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MetricsConfig {
    pub enabled: bool,
    pub port: u16,
    pub endpoint: String,
}

impl AppConfig {
    pub fn from_env() -> Result<Self, ConfigError> {
        Self::load_from(Path::new("config"))
    }

    /// Layered load: `default`, `{RUN_MODE}`, `local` from `dir`, then
    /// `FOSSA__*` environment variables.
    pub fn load_from(dir: &Path) -> Result<Self, ConfigError> {
        let run_mode = env::var("RUN_MODE").unwrap_or_else(|_| "development".into());

        let s = Config::builder()
            // Start with default configuration
            .add_source(File::from(dir.join("default")))
            // Add environment-specific config
            .add_source(File::from(dir.join(&run_mode)).required(false))
            // Add local config (ignored by git)
            .add_source(File::from(dir.join("local")).required(false))
            // Add environment variables with prefix "FOSSA__"
            .add_source(
                Environment::with_prefix("FOSSA")
                    .prefix_separator("__")
                    .separator("__"),
            )
            .build()?;

        let mut config: AppConfig = s.try_deserialize()?;

        // Add Chrome path from environment if not set
        if config.workfossa.chrome_path.is_none() {
            config.workfossa.chrome_path = env::var("CHROME_PATH").ok();
        }

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        // Validate server configuration
        if self.server.port == 0 {
            return Err(ConfigError::Message("Server port must be greater than 0".into()));
        }

        for origin in &self.server.cors_origins {
            if Url::parse(origin).is_err() {
                return Err(ConfigError::Message(format!("Invalid CORS origin: {}", origin)));
            }
        }

        // Validate database configuration
        if self.database.url.trim().is_empty() {
            return Err(ConfigError::Message("Database url must not be empty".into()));
        }

        if self.database.max_connections == 0 {
            return Err(ConfigError::Message("Database max_connections must be greater than 0".into()));
        }

        if self.database.min_connections > self.database.max_connections {
            return Err(ConfigError::Message("Database min_connections cannot exceed max_connections".into()));
        }

        // Validate WorkFossa configuration
        if Url::parse(&self.workfossa.base_url).is_err() {
            return Err(ConfigError::Message("Invalid WorkFossa base URL format".into()));
        }

        if self.workfossa.request_timeout == 0 {
            return Err(ConfigError::Message("WorkFossa request_timeout must be greater than 0".into()));
        }

        if self.workfossa.retry_attempts == 0 {
            return Err(ConfigError::Message("WorkFossa retry_attempts must be at least 1".into()));
        }

        if self.workfossa.username.is_some() != self.workfossa.password.is_some() {
            return Err(ConfigError::Message(
                "WorkFossa username and password must be set together".into(),
            ));
        }

        // Validate scheduler configuration
        if self.scheduler.job_timeout == 0 {
            return Err(ConfigError::Message("Scheduler job_timeout must be greater than 0".into()));
        }

        if self.scheduler.history_retention == 0 {
            return Err(ConfigError::Message("Scheduler history_retention must be greater than 0".into()));
        }

        // Validate logging configuration
        if tracing_subscriber::EnvFilter::try_new(&self.logging.level).is_err() {
            return Err(ConfigError::Message(format!(
                "Invalid logging level directive: {}",
                self.logging.level
            )));
        }

        // Validate metrics configuration
        if self.metrics.port == 0 {
            return Err(ConfigError::Message("Metrics port must be greater than 0".into()));
        }

        if self.metrics.enabled && self.metrics.port == self.server.port {
            return Err(ConfigError::Message("Metrics port must differ from server port".into()));
        }

        if !self.metrics.endpoint.starts_with('/') {
            return Err(ConfigError::Message("Metrics endpoint must start with '/'".into()));
        }

        Ok(())
    }

    pub fn has_credentials(&self) -> bool {
        self.workfossa.username.is_some() && self.workfossa.password.is_some()
    }
}

impl WorkFossaConfig {
    pub fn request_timeout(&self) -> Duration {
        Duration::from_secs(self.request_timeout)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }
}

impl SchedulerConfig {
    pub fn job_timeout(&self) -> Duration {
        Duration::from_secs(self.job_timeout)
    }
}

#[cfg(test)]
pub(crate) fn valid_config() -> AppConfig {
    AppConfig {
        server: ServerConfig {
            host: "0.0.0.0".to_string(),
            port: 8000,
            request_timeout: 30,
            shutdown_timeout: 10,
            cors_origins: vec!["http://localhost:5173".to_string()],
        },
        database: DatabaseConfig {
            url: "sqlite::memory:".to_string(),
            max_connections: 5,
            min_connections: 1,
            acquire_timeout: 30,
        },
        workfossa: WorkFossaConfig {
            base_url: "https://app.workfossa.com".to_string(),
            username: Some("tech@example.com".to_string()),
            password: Some("hunter2".to_string()),
            chrome_path: None,
            headless: true,
            request_timeout: 30,
            retry_attempts: 3,
            retry_delay_ms: 2000,
            user_agent: "FossaWork/1.0".to_string(),
            screenshots_dir: None,
        },
        scheduler: SchedulerConfig {
            enabled: true,
            max_consecutive_failures: 5,
            job_timeout: 900,
            history_retention: 100,
        },
        logging: LoggingConfig {
            level: "fossawork=debug,tower_http=info".to_string(),
            directory: None,
            file_prefix: "fossawork.log".to_string(),
        },
        metrics: MetricsConfig {
            enabled: false,
            port: 9001,
            endpoint: "/metrics".to_string(),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_config_validation_valid() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn test_config_validation_invalid_port() {
        let mut config = valid_config();
        config.server.port = 0;

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("port must be greater than 0"));
    }

    #[test]
    fn test_config_validation_invalid_base_url() {
        let mut config = valid_config();
        config.workfossa.base_url = "not-a-valid-url".to_string();

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("Invalid WorkFossa base URL"));
    }

    #[test]
    fn test_config_validation_invalid_db_connections() {
        let mut config = valid_config();
        config.database.min_connections = 15;
        config.database.max_connections = 10;

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("min_connections cannot exceed max_connections"));
    }

    #[test]
    fn test_config_validation_half_credentials() {
        let mut config = valid_config();
        config.workfossa.password = None;

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("must be set together"));
        assert!(!config.has_credentials());
    }

    #[test]
    fn test_config_validation_zero_retention() {
        let mut config = valid_config();
        config.scheduler.history_retention = 0;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_config_validation_invalid_metrics_endpoint() {
        let mut config = valid_config();
        config.metrics.endpoint = "metrics".to_string(); // Missing leading slash

        let result = config.validate();
        assert!(result.is_err());
        assert!(result.unwrap_err().to_string().contains("endpoint must start with"));
    }

    #[test]
    fn test_config_validation_metrics_port_clash() {
        let mut config = valid_config();
        config.metrics.enabled = true;
        config.metrics.port = config.server.port;

        assert!(config.validate().is_err());
    }

    #[test]
    fn test_load_from_layers_local_over_default() {
        let dir = TempDir::new().unwrap();
        let defaults = toml_from(&valid_config());
        fs::write(dir.path().join("default.toml"), defaults).unwrap();
        fs::write(
            dir.path().join("local.toml"),
            "[scheduler]\nmax_consecutive_failures = 9\n",
        )
        .unwrap();

        let config = AppConfig::load_from(dir.path()).unwrap();
        assert_eq!(config.scheduler.max_consecutive_failures, 9);
        assert_eq!(config.server.port, 8000);
        assert_eq!(config.workfossa.retry_delay(), Duration::from_millis(2000));
    }

    #[test]
    fn test_load_from_missing_default_fails() {
        let dir = TempDir::new().unwrap();
        assert!(AppConfig::load_from(dir.path()).is_err());
    }

    #[test]
    fn test_shipped_default_config_is_valid() {
        let dir = Path::new(env!("CARGO_MANIFEST_DIR")).join("config");
        let config = AppConfig::load_from(&dir).unwrap();
        assert_eq!(config.database.url, "sqlite://data/fossawork.db");
    }

    // Just enough TOML to feed the loader the values of `config`
    fn toml_from(config: &AppConfig) -> String {
        format!(
            r#"
[server]
host = "{host}"
port = {port}
request_timeout = 30
shutdown_timeout = 10

[database]
url = "{db}"
max_connections = 5
min_connections = 1
acquire_timeout = 30

[workfossa]
base_url = "{base}"
headless = true
request_timeout = 30
retry_attempts = 3
retry_delay_ms = 2000
user_agent = "FossaWork/1.0"

[scheduler]
enabled = true
max_consecutive_failures = 5
job_timeout = 900
history_retention = 100

[logging]
level = "fossawork=info"
file_prefix = "fossawork.log"

[metrics]
enabled = false
port = 9001
endpoint = "/metrics"
"#,
            host = config.server.host,
            port = config.server.port,
            db = config.database.url,
            base = config.workfossa.base_url,
        )
    }
}
