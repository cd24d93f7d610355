use std::env;
use std::fs;
use std::path::{Path, PathBuf};

use freightdesk_core::config::{AppConfig, LoadOptions};
use secrecy::ExposeSecret;
use toml::Value;

/// One rendered config entry: dotted key, env override name and display value.
struct Entry {
    key: &'static str,
    env_key: &'static str,
    value: String,
}

pub fn run() -> String {
    let config = match AppConfig::load(LoadOptions::default()) {
        Ok(config) => config,
        Err(error) => return format!("config validation failed: {error}"),
    };

    let config_file_path = detect_config_path();
    let config_file_doc = load_config_file_doc(config_file_path.as_deref());

    let mut lines = vec!["effective config (source precedence: env > file > default):".to_string()];
    for entry in entries(&config) {
        lines.push(render_line(
            entry.key,
            &entry.value,
            field_source(
                entry.key,
                Some(entry.env_key),
                config_file_doc.as_ref(),
                config_file_path.as_deref(),
            ),
        ));
    }

    lines.join("\n")
}

fn entries(config: &AppConfig) -> Vec<Entry> {
    let entry = |key, env_key, value: String| Entry { key, env_key, value };
    vec![
        entry("database.url", "FREIGHTDESK_DATABASE_URL", config.database.url.clone()),
        entry(
            "database.max_connections",
            "FREIGHTDESK_DATABASE_MAX_CONNECTIONS",
            config.database.max_connections.to_string(),
        ),
        entry(
            "database.timeout_secs",
            "FREIGHTDESK_DATABASE_TIMEOUT_SECS",
            config.database.timeout_secs.to_string(),
        ),
        entry(
            "server.bind_address",
            "FREIGHTDESK_SERVER_BIND_ADDRESS",
            config.server.bind_address.clone(),
        ),
        entry("server.port", "FREIGHTDESK_SERVER_PORT", config.server.port.to_string()),
        entry(
            "server.graceful_shutdown_secs",
            "FREIGHTDESK_SERVER_GRACEFUL_SHUTDOWN_SECS",
            config.server.graceful_shutdown_secs.to_string(),
        ),
        entry(
            "auth.jwt_secret",
            "FREIGHTDESK_AUTH_JWT_SECRET",
            redact_secret(config.auth.jwt_secret.expose_secret()),
        ),
        entry(
            "auth.access_ttl_secs",
            "FREIGHTDESK_AUTH_ACCESS_TTL_SECS",
            config.auth.access_ttl_secs.to_string(),
        ),
        entry(
            "auth.refresh_ttl_secs",
            "FREIGHTDESK_AUTH_REFRESH_TTL_SECS",
            config.auth.refresh_ttl_secs.to_string(),
        ),
        entry(
            "quoting.default_distance_km",
            "FREIGHTDESK_QUOTING_DEFAULT_DISTANCE_KM",
            config.quoting.default_distance_km.to_string(),
        ),
        entry(
            "quoting.km_per_transit_day",
            "FREIGHTDESK_QUOTING_KM_PER_TRANSIT_DAY",
            config.quoting.km_per_transit_day.to_string(),
        ),
        entry(
            "quoting.kg_per_extra_day",
            "FREIGHTDESK_QUOTING_KG_PER_EXTRA_DAY",
            config.quoting.kg_per_extra_day.to_string(),
        ),
        entry("logging.level", "FREIGHTDESK_LOGGING_LEVEL", config.logging.level.clone()),
        entry(
            "logging.format",
            "FREIGHTDESK_LOGGING_FORMAT",
            format!("{:?}", config.logging.format),
        ),
    ]
}

fn detect_config_path() -> Option<PathBuf> {
    let root = PathBuf::from("freightdesk.toml");
    if root.exists() {
        return Some(root);
    }

    let nested = PathBuf::from("config/freightdesk.toml");
    if nested.exists() {
        return Some(nested);
    }

    None
}

fn load_config_file_doc(path: Option<&Path>) -> Option<Value> {
    let path = path?;
    let raw = fs::read_to_string(path).ok()?;
    raw.parse::<Value>().ok()
}

fn field_source(
    key_path: &str,
    env_key: Option<&str>,
    config_file_doc: Option<&Value>,
    config_file_path: Option<&Path>,
) -> String {
    if let Some(env_key) = env_key {
        if env::var_os(env_key).is_some() {
            return format!("env ({env_key})");
        }
    }

    if let Some(doc) = config_file_doc {
        if contains_path(doc, key_path) {
            let file_path = config_file_path
                .map(|path| path.display().to_string())
                .unwrap_or_else(|| "config file".to_string());
            return format!("file ({file_path})");
        }
    }

    "default".to_string()
}

fn contains_path(root: &Value, key_path: &str) -> bool {
    let mut current = root;
    for key in key_path.split('.') {
        let Some(next) = current.get(key) else {
            return false;
        };
        current = next;
    }
    true
}

fn render_line(key: &str, value: &str, source: String) -> String {
    format!("- {key} = {value} (source: {source})")
}

/// Only the length survives, so operators can tell a placeholder from a real secret.
fn redact_secret(secret: &str) -> String {
    let trimmed = secret.trim();
    if trimmed.is_empty() {
        return "<empty>".to_string();
    }
    format!("<redacted, {} chars>", trimmed.chars().count())
}
