//! Configuration file parsing and management.
//!
//! The whole process runs from one immutable [`ServerConfig`] value. It is
//! read from a TOML file, patched with `RDDS_*` environment overrides and
//! validated before any socket is bound or database connection opened.

use crate::error::ConfigError;
use serde::de::{self, Deserializer};
use serde::Deserialize;
use std::env;
use std::fs;
use std::net::SocketAddr;
use std::path::{Path, PathBuf};
use std::time::Duration;

/// Environment variable naming an explicit configuration file.
pub const CONFIG_ENV_VAR: &str = "RDDS_CONFIG";

/// Standard locations searched when no file is named explicitly.
pub const DEFAULT_CONFIG_PATHS: [&str; 2] = ["./rdds.toml", "/etc/rdds/rdds.toml"];

/// Complete process configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct ServerConfig {
    /// Registry database connection and pool sizing
    #[serde(default)]
    pub database: DatabaseConfig,

    /// Registrar identity shown in every response
    pub registrar: RegistrarProfile,

    /// Privacy and data-minimisation switches
    #[serde(default)]
    pub policy: PolicyConfig,

    #[serde(default)]
    pub rate_limit: RateLimitConfig,

    #[serde(default)]
    pub rdap: RdapConfig,

    #[serde(default)]
    pub whois: WhoisConfig,

    #[serde(default)]
    pub runtime: RuntimeConfig,

    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Database connection parameters.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    pub name: String,
    pub user: String,
    pub password: String,

    /// Connections opened at startup and kept for the process lifetime
    pub pool_size: usize,

    /// How long a request waits for a free connection
    #[serde(deserialize_with = "deserialize_duration")]
    pub checkout_timeout: Duration,

    /// Per-connection connect timeout
    #[serde(deserialize_with = "deserialize_duration")]
    pub connect_timeout: Duration,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 3306,
            name: String::new(),
            user: String::new(),
            password: String::new(),
            pool_size: 16,
            checkout_timeout: Duration::from_secs(5),
            connect_timeout: Duration::from_secs(10),
        }
    }
}

/// Registrar identity. No defaults: every deployment must state these.
#[derive(Debug, Clone, Deserialize)]
pub struct RegistrarProfile {
    pub name: String,
    pub iana_id: u32,
    pub abuse_email: String,
    pub abuse_phone: String,

    /// Public web site
    pub url: String,

    /// Host name announced as the registrar WHOIS server
    pub whois_server: String,

    /// Public base URL of the RDAP service, without trailing slash
    pub rdap_url: String,
}

impl RegistrarProfile {
    /// RDAP base URL with any trailing slash removed.
    pub fn rdap_base(&self) -> &str {
        self.rdap_url.trim_end_matches('/')
    }
}

/// Output policy switches.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct PolicyConfig {
    /// Redact personal contact data in both protocols
    pub privacy: bool,

    /// Omit the contact entities from RDAP domain objects
    pub minimum_data: bool,

    /// Served extensions; when absent they are read from the database
    pub allowed_tlds: Option<Vec<String>>,
}

impl Default for PolicyConfig {
    fn default() -> Self {
        Self {
            privacy: true,
            minimum_data: false,
            allowed_tlds: None,
        }
    }
}

/// Per-address request limits.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RateLimitConfig {
    pub enabled: bool,

    /// Requests allowed per window
    pub limit: u32,

    /// Window length
    #[serde(deserialize_with = "deserialize_duration")]
    pub period: Duration,
}

impl Default for RateLimitConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            limit: 1000,
            period: Duration::from_secs(60),
        }
    }
}

/// RDAP listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RdapConfig {
    pub bind: SocketAddr,

    /// Requests in flight before new ones are shed with 503
    pub max_connections: usize,

    /// Upper bound on a single request
    #[serde(deserialize_with = "deserialize_duration")]
    pub idle_timeout: Duration,
}

impl Default for RdapConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([127, 0, 0, 1], 7500)),
            max_connections: 1024,
            idle_timeout: Duration::from_secs(600),
        }
    }
}

/// WHOIS listener settings.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct WhoisConfig {
    pub bind: SocketAddr,

    /// Open connections before new ones are refused
    pub max_connections: usize,

    /// Connections that send nothing for this long are closed
    #[serde(deserialize_with = "deserialize_duration")]
    pub idle_timeout: Duration,

    /// Longest accepted query line in bytes, CR/LF terminator excluded
    pub max_message_size: usize,
}

impl Default for WhoisConfig {
    fn default() -> Self {
        Self {
            bind: SocketAddr::from(([0, 0, 0, 0], 43)),
            max_connections: 1024,
            idle_timeout: Duration::from_secs(120),
            max_message_size: 8192,
        }
    }
}

/// Worker runtime sizing.
#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct RuntimeConfig {
    /// Worker threads; defaults to twice the available CPUs
    pub worker_threads: Option<usize>,
}

impl RuntimeConfig {
    /// Effective worker count.
    pub fn worker_threads(&self) -> usize {
        self.worker_threads.unwrap_or_else(|| {
            std::thread::available_parallelism()
                .map(|n| n.get())
                .unwrap_or(1)
                * 2
        })
    }
}

/// Logging output.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Filter directive, e.g. "info" or "rdds_lib=debug"
    pub level: String,

    /// Emit JSON lines instead of human-readable text
    pub json: bool,

    /// Also write a daily-rotated log file here
    pub directory: Option<PathBuf>,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
            json: false,
            directory: None,
        }
    }
}

impl ServerConfig {
    /// Parse configuration from TOML text without overrides or validation.
    pub fn from_toml_str(content: &str) -> Result<Self, ConfigError> {
        toml::from_str(content).map_err(|e| ConfigError::Parse {
            message: e.to_string(),
        })
    }

    /// One-line description used by `--check-config` and the startup log.
    pub fn summary(&self) -> String {
        format!(
            "registrar '{}' (IANA {}), rdap {}, whois {}, db {}@{}:{}/{} pool {}, privacy {}, rate limit {}",
            self.registrar.name,
            self.registrar.iana_id,
            self.rdap.bind,
            self.whois.bind,
            self.database.user,
            self.database.host,
            self.database.port,
            self.database.name,
            self.database.pool_size,
            if self.policy.privacy { "on" } else { "off" },
            if self.rate_limit.enabled {
                format!(
                    "{}/{}s",
                    self.rate_limit.limit,
                    self.rate_limit.period.as_secs()
                )
            } else {
                "off".to_string()
            },
        )
    }

    /// Apply `RDDS_*` overrides from the process environment.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides_from(|key| env::var(key).ok())
    }

    /// Apply `RDDS_*` overrides using the given variable lookup.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError::Invalid` when a port or boolean override does not parse.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(host) = lookup("RDDS_DB_HOST") {
            self.database.host = host;
        }
        if let Some(port) = lookup("RDDS_DB_PORT") {
            self.database.port = port.trim().parse().map_err(|_| {
                ConfigError::invalid(format!("RDDS_DB_PORT='{}' is not a valid port", port))
            })?;
        }
        if let Some(name) = lookup("RDDS_DB_NAME") {
            self.database.name = name;
        }
        if let Some(user) = lookup("RDDS_DB_USER") {
            self.database.user = user;
        }
        if let Some(password) = lookup("RDDS_DB_PASSWORD") {
            self.database.password = password;
        }
        if let Some(privacy) = lookup("RDDS_PRIVACY") {
            self.policy.privacy = parse_bool(&privacy).ok_or_else(|| {
                ConfigError::invalid(format!("RDDS_PRIVACY='{}', use true/false", privacy))
            })?;
        }
        if let Some(level) = lookup("RDDS_LOG_LEVEL") {
            if !level.trim().is_empty() {
                self.logging.level = level;
            }
        }
        Ok(())
    }

    /// Check every value before anything is started.
    ///
    /// # Errors
    ///
    /// Returns the first `ConfigError::Invalid` found.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let registrar = &self.registrar;
        for (field, value) in [
            ("registrar.name", &registrar.name),
            ("registrar.url", &registrar.url),
            ("registrar.whois_server", &registrar.whois_server),
            ("registrar.rdap_url", &registrar.rdap_url),
        ] {
            if value.trim().is_empty() {
                return Err(ConfigError::invalid(format!("{} must not be empty", field)));
            }
        }
        if registrar.iana_id == 0 {
            return Err(ConfigError::invalid("registrar.iana_id must be non-zero"));
        }

        let db = &self.database;
        if db.host.trim().is_empty() || db.name.trim().is_empty() || db.user.trim().is_empty() {
            return Err(ConfigError::invalid(
                "database.host, database.name and database.user must be set",
            ));
        }
        if db.pool_size == 0 || db.pool_size > 512 {
            return Err(ConfigError::invalid(
                "database.pool_size must be between 1 and 512",
            ));
        }
        if db.checkout_timeout.is_zero() {
            return Err(ConfigError::invalid(
                "database.checkout_timeout must be greater than zero",
            ));
        }

        if self.rate_limit.enabled && self.rate_limit.limit == 0 {
            return Err(ConfigError::invalid(
                "rate_limit.limit must be greater than zero when rate limiting is enabled",
            ));
        }
        if self.rate_limit.period.is_zero() {
            return Err(ConfigError::invalid(
                "rate_limit.period must be greater than zero",
            ));
        }

        if self.rdap.max_connections == 0 || self.whois.max_connections == 0 {
            return Err(ConfigError::invalid(
                "max_connections must be greater than zero",
            ));
        }
        if self.rdap.idle_timeout.is_zero() || self.whois.idle_timeout.is_zero() {
            return Err(ConfigError::invalid("idle_timeout must be greater than zero"));
        }
        if !(64..=65536).contains(&self.whois.max_message_size) {
            return Err(ConfigError::invalid(
                "whois.max_message_size must be between 64 and 65536 bytes",
            ));
        }
        if self.rdap.bind == self.whois.bind {
            return Err(ConfigError::invalid(format!(
                "rdap.bind and whois.bind must differ (both are {})",
                self.rdap.bind
            )));
        }

        if let Some(workers) = self.runtime.worker_threads {
            if workers == 0 || workers > 1024 {
                return Err(ConfigError::invalid(
                    "runtime.worker_threads must be between 1 and 1024",
                ));
            }
        }

        if let Some(tlds) = &self.policy.allowed_tlds {
            if tlds.is_empty() {
                return Err(ConfigError::invalid(
                    "policy.allowed_tlds must not be empty when set",
                ));
            }
            for tld in tlds {
                if !is_valid_tld_entry(tld) {
                    return Err(ConfigError::invalid(format!(
                        "invalid TLD '{}' in policy.allowed_tlds, use a form like '.com' or '.co.uk'",
                        tld
                    )));
                }
            }
        }

        Ok(())
    }
}

/// Configuration discovery and loading functionality.
pub struct ConfigManager {
    /// Whether to report which file was picked
    pub verbose: bool,
}

impl ConfigManager {
    /// Create a new configuration manager.
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    /// Load a specific file: parse, apply environment overrides, validate.
    ///
    /// # Arguments
    ///
    /// * `path` - Path to the configuration file
    ///
    /// # Returns
    ///
    /// The validated configuration or the first error encountered.
    pub fn load_file<P: AsRef<Path>>(&self, path: P) -> Result<ServerConfig, ConfigError> {
        let path = path.as_ref();

        if !path.exists() {
            return Err(ConfigError::NotFound {
                path: path.to_string_lossy().into_owned(),
            });
        }

        let content = fs::read_to_string(path).map_err(|e| ConfigError::Read {
            path: path.to_string_lossy().into_owned(),
            message: e.to_string(),
        })?;

        let mut config = ServerConfig::from_toml_str(&content)?;
        config.apply_env_overrides()?;
        config.validate()?;

        if self.verbose {
            tracing::info!(path = %path.display(), "loaded configuration");
        }

        Ok(config)
    }

    /// Find and load the active configuration file.
    ///
    /// Precedence: `explicit`, then `RDDS_CONFIG`, then the standard paths.
    pub fn discover_and_load(&self, explicit: Option<&Path>) -> Result<ServerConfig, ConfigError> {
        let path = self.discover(explicit)?;
        self.load_file(path)
    }

    /// Resolve which file would be loaded.
    pub fn discover(&self, explicit: Option<&Path>) -> Result<PathBuf, ConfigError> {
        if let Some(path) = explicit {
            return Ok(path.to_path_buf());
        }

        if let Some(path) = env::var_os(CONFIG_ENV_VAR) {
            if !path.is_empty() {
                return Ok(PathBuf::from(path));
            }
        }

        DEFAULT_CONFIG_PATHS
            .iter()
            .map(Path::new)
            .find(|p| p.exists())
            .map(Path::to_path_buf)
            .ok_or_else(|| ConfigError::NoConfigFile {
                searched: DEFAULT_CONFIG_PATHS.join(", "),
            })
    }
}

/// Whether a configured allow-list entry looks like ".tld" or ".sld.tld".
fn is_valid_tld_entry(tld: &str) -> bool {
    let Some(rest) = tld.strip_prefix('.') else {
        return false;
    };
    let labels: Vec<&str> = rest.split('.').collect();
    (1..=2).contains(&labels.len())
        && labels.iter().all(|label| {
            !label.is_empty()
                && label.len() <= 63
                && label.chars().all(|c| c.is_ascii_alphanumeric() || c == '-')
        })
}

/// Parse boolean environment values.
pub(crate) fn parse_bool(value: &str) -> Option<bool> {
    match value.trim().to_lowercase().as_str() {
        "true" | "1" | "yes" | "on" => Some(true),
        "false" | "0" | "no" | "off" => Some(false),
        _ => None,
    }
}

/// Parse timeout strings like "5s", "30s", "2m" into seconds.
pub fn parse_timeout_string(timeout_str: &str) -> Option<u64> {
    let timeout_str = timeout_str.trim().to_lowercase();

    if let Some(secs) = timeout_str.strip_suffix('s') {
        secs.trim().parse::<u64>().ok()
    } else if let Some(mins) = timeout_str.strip_suffix('m') {
        mins.trim().parse::<u64>().ok().and_then(|m| m.checked_mul(60))
    } else {
        // Assume seconds if no unit
        timeout_str.parse::<u64>().ok()
    }
}

#[derive(Deserialize)]
#[serde(untagged)]
enum RawDuration {
    Seconds(u64),
    Text(String),
}

fn deserialize_duration<'de, D>(deserializer: D) -> Result<Duration, D::Error>
where
    D: Deserializer<'de>,
{
    match RawDuration::deserialize(deserializer)? {
        RawDuration::Seconds(secs) => Ok(Duration::from_secs(secs)),
        RawDuration::Text(text) => parse_timeout_string(&text)
            .map(Duration::from_secs)
            .ok_or_else(|| {
                de::Error::custom(format!(
                    "invalid duration '{}', use a format like '5s', '30s', '2m'",
                    text
                ))
            }),
    }
}
