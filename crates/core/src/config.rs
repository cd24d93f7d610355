use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use secrecy::{ExposeSecret, SecretString};
use serde::{Deserialize, Serialize};
use thiserror::Error;

pub const MIN_JWT_SECRET_LEN: usize = 16;

#[derive(Clone, Debug)]
pub struct AppConfig {
    pub database: DatabaseConfig,
    pub server: ServerConfig,
    pub auth: AuthConfig,
    pub quoting: QuotingConfig,
    pub logging: LoggingConfig,
}

#[derive(Clone, Debug)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
    pub timeout_secs: u64,
}

#[derive(Clone, Debug)]
pub struct ServerConfig {
    pub bind_address: String,
    pub port: u16,
    pub graceful_shutdown_secs: u64,
}

#[derive(Clone, Debug)]
pub struct AuthConfig {
    pub jwt_secret: SecretString,
    pub access_ttl_secs: u64,
    pub refresh_ttl_secs: u64,
}

#[derive(Clone, Debug)]
pub struct QuotingConfig {
    pub default_distance_km: f64,
    pub km_per_transit_day: f64,
    pub kg_per_extra_day: f64,
}

#[derive(Clone, Debug)]
pub struct LoggingConfig {
    pub level: String,
    pub format: LogFormat,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Clone, Debug, Default)]
pub struct ConfigOverrides {
    pub database_url: Option<String>,
    pub log_level: Option<String>,
    pub bind_address: Option<String>,
    pub port: Option<u16>,
    pub jwt_secret: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct LoadOptions {
    pub config_path: Option<PathBuf>,
    pub require_file: bool,
    pub overrides: ConfigOverrides,
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("could not read config file `{path}`: {source}")]
    ReadFile { path: PathBuf, source: std::io::Error },
    #[error("could not parse config file `{path}`: {source}")]
    ParseFile { path: PathBuf, source: toml::de::Error },
    #[error("required config file was not found: `{0}`")]
    MissingConfigFile(PathBuf),
    #[error("environment variable interpolation failed for `{var}`")]
    MissingEnvInterpolation { var: String },
    #[error("unterminated environment interpolation expression")]
    UnterminatedInterpolation,
    #[error("invalid environment override for `{key}`: `{value}`")]
    InvalidEnvOverride { key: String, value: String },
    #[error("configuration validation failed: {0}")]
    Validation(String),
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            database: DatabaseConfig {
                url: "sqlite://freightdesk.db?mode=rwc".to_string(),
                max_connections: 5,
                timeout_secs: 30,
            },
            server: ServerConfig {
                bind_address: "127.0.0.1".to_string(),
                port: 8080,
                graceful_shutdown_secs: 15,
            },
            auth: AuthConfig {
                jwt_secret: String::new().into(),
                access_ttl_secs: 15 * 60,
                refresh_ttl_secs: 7 * 24 * 60 * 60,
            },
            quoting: QuotingConfig {
                default_distance_km: 500.0,
                km_per_transit_day: 500.0,
                kg_per_extra_day: 1000.0,
            },
            logging: LoggingConfig { level: "info".to_string(), format: LogFormat::Compact },
        }
    }
}

fn secret_value(value: String) -> SecretString {
    value.into()
}

impl std::str::FromStr for LogFormat {
    type Err = ConfigError;

    fn from_str(value: &str) -> Result<Self, Self::Err> {
        match value.trim().to_ascii_lowercase().as_str() {
            "compact" => Ok(Self::Compact),
            "pretty" => Ok(Self::Pretty),
            "json" => Ok(Self::Json),
            other => Err(ConfigError::Validation(format!(
                "unsupported log format `{other}` (expected compact|pretty|json)"
            ))),
        }
    }
}

impl AppConfig {
    pub fn load(options: LoadOptions) -> Result<Self, ConfigError> {
        let mut config = Self::default();
        let maybe_path = resolve_config_path(options.config_path.as_deref());

        if let Some(path) = maybe_path {
            let patch = read_patch(&path)?;
            config.apply_patch(patch);
        } else if options.require_file {
            let expected =
                options.config_path.unwrap_or_else(|| PathBuf::from("freightdesk.toml"));
            return Err(ConfigError::MissingConfigFile(expected));
        }

        config.apply_env_overrides()?;
        config.apply_overrides(options.overrides);
        config.validate()?;

        Ok(config)
    }

    fn apply_patch(&mut self, patch: ConfigPatch) {
        if let Some(database) = patch.database {
            if let Some(url) = database.url {
                self.database.url = url;
            }
            if let Some(max_connections) = database.max_connections {
                self.database.max_connections = max_connections;
            }
            if let Some(timeout_secs) = database.timeout_secs {
                self.database.timeout_secs = timeout_secs;
            }
        }

        if let Some(server) = patch.server {
            if let Some(bind_address) = server.bind_address {
                self.server.bind_address = bind_address;
            }
            if let Some(port) = server.port {
                self.server.port = port;
            }
            if let Some(graceful_shutdown_secs) = server.graceful_shutdown_secs {
                self.server.graceful_shutdown_secs = graceful_shutdown_secs;
            }
        }

        if let Some(auth) = patch.auth {
            if let Some(jwt_secret) = auth.jwt_secret {
                self.auth.jwt_secret = secret_value(jwt_secret);
            }
            if let Some(access_ttl_secs) = auth.access_ttl_secs {
                self.auth.access_ttl_secs = access_ttl_secs;
            }
            if let Some(refresh_ttl_secs) = auth.refresh_ttl_secs {
                self.auth.refresh_ttl_secs = refresh_ttl_secs;
            }
        }

        if let Some(quoting) = patch.quoting {
            if let Some(default_distance_km) = quoting.default_distance_km {
                self.quoting.default_distance_km = default_distance_km;
            }
            if let Some(km_per_transit_day) = quoting.km_per_transit_day {
                self.quoting.km_per_transit_day = km_per_transit_day;
            }
            if let Some(kg_per_extra_day) = quoting.kg_per_extra_day {
                self.quoting.kg_per_extra_day = kg_per_extra_day;
            }
        }

        if let Some(logging) = patch.logging {
            if let Some(level) = logging.level {
                self.logging.level = level;
            }
            if let Some(format) = logging.format {
                self.logging.format = format;
            }
        }
    }

    fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        if let Some(value) = read_env("FREIGHTDESK_DATABASE_URL") {
            self.database.url = value;
        }
        if let Some(value) = read_env("FREIGHTDESK_DATABASE_MAX_CONNECTIONS") {
            self.database.max_connections =
                parse_env("FREIGHTDESK_DATABASE_MAX_CONNECTIONS", &value)?;
        }
        if let Some(value) = read_env("FREIGHTDESK_DATABASE_TIMEOUT_SECS") {
            self.database.timeout_secs = parse_env("FREIGHTDESK_DATABASE_TIMEOUT_SECS", &value)?;
        }

        if let Some(value) = read_env("FREIGHTDESK_SERVER_BIND_ADDRESS") {
            self.server.bind_address = value;
        }
        if let Some(value) = read_env("FREIGHTDESK_SERVER_PORT") {
            self.server.port = parse_env("FREIGHTDESK_SERVER_PORT", &value)?;
        }
        if let Some(value) = read_env("FREIGHTDESK_SERVER_GRACEFUL_SHUTDOWN_SECS") {
            self.server.graceful_shutdown_secs =
                parse_env("FREIGHTDESK_SERVER_GRACEFUL_SHUTDOWN_SECS", &value)?;
        }

        if let Some(value) = read_env("FREIGHTDESK_AUTH_JWT_SECRET") {
            self.auth.jwt_secret = secret_value(value);
        }
        if let Some(value) = read_env("FREIGHTDESK_AUTH_ACCESS_TTL_SECS") {
            self.auth.access_ttl_secs = parse_env("FREIGHTDESK_AUTH_ACCESS_TTL_SECS", &value)?;
        }
        if let Some(value) = read_env("FREIGHTDESK_AUTH_REFRESH_TTL_SECS") {
            self.auth.refresh_ttl_secs = parse_env("FREIGHTDESK_AUTH_REFRESH_TTL_SECS", &value)?;
        }

        if let Some(value) = read_env("FREIGHTDESK_QUOTING_DEFAULT_DISTANCE_KM") {
            self.quoting.default_distance_km =
                parse_env("FREIGHTDESK_QUOTING_DEFAULT_DISTANCE_KM", &value)?;
        }
        if let Some(value) = read_env("FREIGHTDESK_QUOTING_KM_PER_TRANSIT_DAY") {
            self.quoting.km_per_transit_day =
                parse_env("FREIGHTDESK_QUOTING_KM_PER_TRANSIT_DAY", &value)?;
        }
        if let Some(value) = read_env("FREIGHTDESK_QUOTING_KG_PER_EXTRA_DAY") {
            self.quoting.kg_per_extra_day =
                parse_env("FREIGHTDESK_QUOTING_KG_PER_EXTRA_DAY", &value)?;
        }

        let log_level =
            read_env("FREIGHTDESK_LOGGING_LEVEL").or_else(|| read_env("FREIGHTDESK_LOG_LEVEL"));
        if let Some(value) = log_level {
            self.logging.level = value;
        }
        let log_format =
            read_env("FREIGHTDESK_LOGGING_FORMAT").or_else(|| read_env("FREIGHTDESK_LOG_FORMAT"));
        if let Some(value) = log_format {
            self.logging.format = value.parse()?;
        }

        Ok(())
    }

    fn apply_overrides(&mut self, overrides: ConfigOverrides) {
        if let Some(database_url) = overrides.database_url {
            self.database.url = database_url;
        }
        if let Some(log_level) = overrides.log_level {
            self.logging.level = log_level;
        }
        if let Some(bind_address) = overrides.bind_address {
            self.server.bind_address = bind_address;
        }
        if let Some(port) = overrides.port {
            self.server.port = port;
        }
        if let Some(jwt_secret) = overrides.jwt_secret {
            self.auth.jwt_secret = secret_value(jwt_secret);
        }
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        validate_database(&self.database)?;
        validate_server(&self.server)?;
        validate_auth(&self.auth)?;
        validate_quoting(&self.quoting)?;
        validate_logging(&self.logging)?;
        Ok(())
    }
}

fn resolve_config_path(explicit_path: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = explicit_path {
        return path.exists().then_some(path.to_path_buf());
    }

    [PathBuf::from("freightdesk.toml"), PathBuf::from("config/freightdesk.toml")]
        .into_iter()
        .find(|path| path.exists())
}

fn read_patch(path: &Path) -> Result<ConfigPatch, ConfigError> {
    let raw = fs::read_to_string(path)
        .map_err(|source| ConfigError::ReadFile { path: path.to_path_buf(), source })?;

    let interpolated = interpolate_env_vars(&raw)?;
    toml::from_str::<ConfigPatch>(&interpolated)
        .map_err(|source| ConfigError::ParseFile { path: path.to_path_buf(), source })
}

fn interpolate_env_vars(input: &str) -> Result<String, ConfigError> {
    let mut output = String::with_capacity(input.len());
    let mut chars = input.chars().peekable();

    while let Some(ch) = chars.next() {
        if ch == '$' && matches!(chars.peek(), Some('{')) {
            chars.next();
            let mut key = String::new();

            loop {
                match chars.next() {
                    Some('}') => break,
                    Some(next) => key.push(next),
                    None => return Err(ConfigError::UnterminatedInterpolation),
                }
            }

            let value = env::var(&key)
                .map_err(|_| ConfigError::MissingEnvInterpolation { var: key.clone() })?;
            output.push_str(&value);
            continue;
        }

        output.push(ch);
    }

    Ok(output)
}

fn validate_database(database: &DatabaseConfig) -> Result<(), ConfigError> {
    let url = database.url.trim();
    let sqlite_url =
        url.starts_with("sqlite://") || url.starts_with("sqlite::") || url == ":memory:";
    if !sqlite_url {
        return Err(ConfigError::Validation(
            "database.url must be a sqlite URL (`sqlite://...`, `sqlite::...`, or `:memory:`)"
                .to_string(),
        ));
    }

    if database.max_connections == 0 {
        return Err(ConfigError::Validation(
            "database.max_connections must be greater than zero".to_string(),
        ));
    }

    if database.timeout_secs == 0 || database.timeout_secs > 300 {
        return Err(ConfigError::Validation(
            "database.timeout_secs must be in range 1..=300".to_string(),
        ));
    }

    Ok(())
}

fn validate_server(server: &ServerConfig) -> Result<(), ConfigError> {
    if server.bind_address.trim().is_empty() {
        return Err(ConfigError::Validation("server.bind_address is required".to_string()));
    }

    if server.port == 0 {
        return Err(ConfigError::Validation("server.port must be greater than zero".to_string()));
    }

    if server.graceful_shutdown_secs == 0 {
        return Err(ConfigError::Validation(
            "server.graceful_shutdown_secs must be greater than zero".to_string(),
        ));
    }

    Ok(())
}

fn validate_auth(auth: &AuthConfig) -> Result<(), ConfigError> {
    let secret = auth.jwt_secret.expose_secret();
    if secret.trim().is_empty() {
        return Err(ConfigError::Validation(
            "auth.jwt_secret is required (set FREIGHTDESK_AUTH_JWT_SECRET)".to_string(),
        ));
    }
    if secret.len() < MIN_JWT_SECRET_LEN {
        return Err(ConfigError::Validation(format!(
            "auth.jwt_secret must be at least {MIN_JWT_SECRET_LEN} characters"
        )));
    }

    if auth.access_ttl_secs == 0 {
        return Err(ConfigError::Validation(
            "auth.access_ttl_secs must be greater than zero".to_string(),
        ));
    }
    if auth.refresh_ttl_secs <= auth.access_ttl_secs {
        return Err(ConfigError::Validation(
            "auth.refresh_ttl_secs must be longer than auth.access_ttl_secs".to_string(),
        ));
    }

    Ok(())
}

fn validate_quoting(quoting: &QuotingConfig) -> Result<(), ConfigError> {
    if !quoting.default_distance_km.is_finite() || quoting.default_distance_km < 0.0 {
        return Err(ConfigError::Validation(
            "quoting.default_distance_km must be a non-negative number".to_string(),
        ));
    }

    let divisors = [
        ("quoting.km_per_transit_day", quoting.km_per_transit_day),
        ("quoting.kg_per_extra_day", quoting.kg_per_extra_day),
    ];
    for (name, value) in divisors {
        if !value.is_finite() || value <= 0.0 {
            return Err(ConfigError::Validation(format!("{name} must be greater than zero")));
        }
    }

    Ok(())
}

fn validate_logging(logging: &LoggingConfig) -> Result<(), ConfigError> {
    let level = logging.level.trim().to_ascii_lowercase();
    match level.as_str() {
        "trace" | "debug" | "info" | "warn" | "error" => Ok(()),
        _ => Err(ConfigError::Validation(
            "logging.level must be one of trace|debug|info|warn|error".to_string(),
        )),
    }
}

fn read_env(key: &str) -> Option<String> {
    env::var(key).ok().filter(|value| !value.trim().is_empty())
}

fn parse_env<T: std::str::FromStr>(key: &str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse::<T>().map_err(|_| ConfigError::InvalidEnvOverride {
        key: key.to_string(),
        value: value.to_string(),
    })
}

#[derive(Debug, Default, Deserialize)]
struct ConfigPatch {
    database: Option<DatabasePatch>,
    server: Option<ServerPatch>,
    auth: Option<AuthPatch>,
    quoting: Option<QuotingPatch>,
    logging: Option<LoggingPatch>,
}

#[derive(Debug, Default, Deserialize)]
struct DatabasePatch {
    url: Option<String>,
    max_connections: Option<u32>,
    timeout_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct ServerPatch {
    bind_address: Option<String>,
    port: Option<u16>,
    graceful_shutdown_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct AuthPatch {
    jwt_secret: Option<String>,
    access_ttl_secs: Option<u64>,
    refresh_ttl_secs: Option<u64>,
}

#[derive(Debug, Default, Deserialize)]
struct QuotingPatch {
    default_distance_km: Option<f64>,
    km_per_transit_day: Option<f64>,
    kg_per_extra_day: Option<f64>,
}

#[derive(Debug, Default, Deserialize)]
struct LoggingPatch {
    level: Option<String>,
    format: Option<LogFormat>,
}

#[cfg(test)]
mod tests {
    use std::env;
    use std::fs;
    use std::io;
    use std::sync::{Mutex, OnceLock};

    use secrecy::ExposeSecret;
    use tempfile::TempDir;

    use super::{AppConfig, ConfigError, ConfigOverrides, LoadOptions, LogFormat};

    static ENV_LOCK: OnceLock<Mutex<()>> = OnceLock::new();

    const TEST_SECRET: &str = "test-secret-0123456789";

    fn env_lock() -> &'static Mutex<()> {
        ENV_LOCK.get_or_init(|| Mutex::new(()))
    }

    fn clear_vars(vars: &[&str]) {
        for var in vars {
            env::remove_var(var);
        }
    }

    fn ensure(condition: bool, message: &'static str) -> Result<(), String> {
        if condition {
            Ok(())
        } else {
            Err(message.to_string())
        }
    }

    #[test]
    fn file_load_supports_env_interpolation() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("TEST_FREIGHTDESK_SECRET", "interpolated-secret-value");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("freightdesk.toml");
            fs::write(
                &path,
                r#"
[auth]
jwt_secret = "${TEST_FREIGHTDESK_SECRET}"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config =
                AppConfig::load(LoadOptions { config_path: Some(path), ..LoadOptions::default() })
                    .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.auth.jwt_secret.expose_secret() == "interpolated-secret-value",
                "jwt secret should be loaded from environment",
            )
        })();

        clear_vars(&["TEST_FREIGHTDESK_SECRET"]);
        result
    }

    #[test]
    fn logging_env_aliases_are_supported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("FREIGHTDESK_AUTH_JWT_SECRET", TEST_SECRET);
        env::set_var("FREIGHTDESK_LOG_LEVEL", "warn");
        env::set_var("FREIGHTDESK_LOG_FORMAT", "pretty");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;

            ensure(config.logging.level == "warn", "warning log level should be set from env var")?;
            ensure(
                matches!(config.logging.format, LogFormat::Pretty),
                "pretty logging format should be set from env var",
            )
        })();

        clear_vars(&[
            "FREIGHTDESK_AUTH_JWT_SECRET",
            "FREIGHTDESK_LOG_LEVEL",
            "FREIGHTDESK_LOG_FORMAT",
        ]);
        result
    }

    #[test]
    fn precedence_defaults_file_env_overrides() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("FREIGHTDESK_DATABASE_URL", "sqlite://from-env.db");
        env::set_var("FREIGHTDESK_SERVER_PORT", "9090");
        env::set_var("FREIGHTDESK_AUTH_JWT_SECRET", "env-secret-0123456789");

        let result = (|| -> Result<(), String> {
            let dir = TempDir::new().map_err(|err: io::Error| err.to_string())?;
            let path = dir.path().join("freightdesk.toml");
            fs::write(
                &path,
                r#"
[database]
url = "sqlite://from-file.db"

[server]
port = 7070

[auth]
jwt_secret = "file-secret-0123456789"

[quoting]
default_distance_km = 750.0

[logging]
level = "warn"
"#,
            )
            .map_err(|err| err.to_string())?;

            let config = AppConfig::load(LoadOptions {
                config_path: Some(path),
                overrides: ConfigOverrides {
                    database_url: Some("sqlite://from-override.db".to_string()),
                    log_level: Some("debug".to_string()),
                    ..ConfigOverrides::default()
                },
                ..LoadOptions::default()
            })
            .map_err(|err| format!("config load failed: {err}"))?;

            ensure(
                config.database.url == "sqlite://from-override.db",
                "override database url should win",
            )?;
            ensure(config.logging.level == "debug", "overridden log level should be debug")?;
            ensure(config.server.port == 9090, "env port should win over file")?;
            ensure(
                config.auth.jwt_secret.expose_secret() == "env-secret-0123456789",
                "env jwt secret should win over file and defaults",
            )?;
            ensure(
                (config.quoting.default_distance_km - 750.0).abs() < f64::EPSILON,
                "file quoting value should win over defaults",
            )
        })();

        clear_vars(&[
            "FREIGHTDESK_DATABASE_URL",
            "FREIGHTDESK_SERVER_PORT",
            "FREIGHTDESK_AUTH_JWT_SECRET",
        ]);
        result
    }

    #[test]
    fn validation_fails_fast_with_actionable_error() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("FREIGHTDESK_AUTH_JWT_SECRET", "short");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => {
                    return Err("expected validation failure but config load succeeded".to_string())
                }
                Err(error) => error,
            };
            let has_message = matches!(
                error,
                ConfigError::Validation(ref message) if message.contains("auth.jwt_secret")
            );
            ensure(has_message, "validation failure should mention auth.jwt_secret")
        })();

        clear_vars(&["FREIGHTDESK_AUTH_JWT_SECRET"]);
        result
    }

    #[test]
    fn invalid_numeric_env_override_is_reported() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("FREIGHTDESK_AUTH_JWT_SECRET", TEST_SECRET);
        env::set_var("FREIGHTDESK_QUOTING_KM_PER_TRANSIT_DAY", "fast");

        let result = (|| -> Result<(), String> {
            let error = match AppConfig::load(LoadOptions::default()) {
                Ok(_) => return Err("expected env override failure".to_string()),
                Err(error) => error,
            };
            ensure(
                matches!(
                    error,
                    ConfigError::InvalidEnvOverride { ref key, .. }
                        if key == "FREIGHTDESK_QUOTING_KM_PER_TRANSIT_DAY"
                ),
                "invalid override should name the offending variable",
            )
        })();

        clear_vars(&["FREIGHTDESK_AUTH_JWT_SECRET", "FREIGHTDESK_QUOTING_KM_PER_TRANSIT_DAY"]);
        result
    }

    #[test]
    fn secret_values_are_not_leaked_by_debug() -> Result<(), String> {
        let _guard = env_lock().lock().map_err(|_| "env lock is poisoned".to_string())?;

        env::set_var("FREIGHTDESK_AUTH_JWT_SECRET", "very-secret-signing-value");

        let result = (|| -> Result<(), String> {
            let config = AppConfig::load(LoadOptions::default())
                .map_err(|err| format!("config load failed: {err}"))?;
            let debug = format!("{config:?}");

            ensure(
                !debug.contains("very-secret-signing-value"),
                "debug output should not contain the jwt secret",
            )?;
            ensure(
                matches!(config.logging.format, LogFormat::Compact),
                "default logging format should be compact",
            )
        })();

        clear_vars(&["FREIGHTDESK_AUTH_JWT_SECRET"]);
        result
    }
}
