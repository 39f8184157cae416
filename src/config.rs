//! Client configuration.
//!
//! Terminal identity (admin URL, API key, terminal id) is resolved from, in
//! order: environment variables, the OS credential store, and the `terminal`
//! category of `local_settings`. An API key pasted as a connection string
//! (JSON or base64 JSON carrying `key`, `url`, `tid`) fills in whichever of
//! the other two values are still missing.

use base64::engine::general_purpose::STANDARD as BASE64_STANDARD;
use base64::Engine as _;
use serde_json::Value;
use std::path::{Path, PathBuf};
use std::time::Duration;
use tracing::debug;

use crate::db::{self, DbState};
use crate::error::ApiError;
use crate::storage;

pub const ENV_ADMIN_URL: &str = "POS_ADMIN_URL";
pub const ENV_API_KEY: &str = "POS_API_KEY";
pub const ENV_TERMINAL_ID: &str = "POS_TERMINAL_ID";
pub const ENV_DATA_DIR: &str = "POS_DATA_DIR";

const SETTINGS_CATEGORY: &str = "terminal";

#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub admin_url: String,
    pub api_key: String,
    pub terminal_id: String,
    pub data_dir: PathBuf,
    /// Upper bound for snapshot and command requests.
    pub request_timeout: Duration,
    /// Upper bound for one intake submission; expiry counts as a failure.
    pub submit_timeout: Duration,
    pub health_timeout: Duration,
    pub probe_interval: Duration,
    pub reconnect_min_delay: Duration,
    pub reconnect_max_delay: Duration,
}

impl ClientConfig {
    pub fn new(
        admin_url: &str,
        api_key: &str,
        terminal_id: &str,
        data_dir: impl Into<PathBuf>,
    ) -> Self {
        let decoded = decode_connection_string_payload(api_key);
        let api_key = decoded
            .as_ref()
            .and_then(|v| payload_str(v, &["key"]))
            .unwrap_or_else(|| api_key.trim().to_string());
        let admin_url = Some(admin_url.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| decoded.as_ref().and_then(|v| payload_str(v, &["url"])))
            .unwrap_or_default();
        let terminal_id = Some(terminal_id.trim())
            .filter(|s| !s.is_empty())
            .map(str::to_string)
            .or_else(|| {
                decoded
                    .as_ref()
                    .and_then(|v| payload_str(v, &["tid", "terminalId"]))
            })
            .unwrap_or_default();

        Self {
            admin_url: normalize_admin_url(&admin_url),
            api_key,
            terminal_id,
            data_dir: data_dir.into(),
            request_timeout: Duration::from_secs(30),
            submit_timeout: Duration::from_secs(15),
            health_timeout: Duration::from_secs(5),
            probe_interval: Duration::from_secs(15),
            reconnect_min_delay: Duration::from_secs(1),
            reconnect_max_delay: Duration::from_secs(60),
        }
    }

    /// Resolve from environment, OS credential store, then local settings.
    pub fn resolve(data_dir: &Path, db: Option<&DbState>) -> Result<Self, ApiError> {
        Self::resolve_with(data_dir, |key| {
            env_for_credential(key)
                .and_then(|name| std::env::var(name).ok())
                .filter(|v| !v.trim().is_empty())
                .or_else(|| storage::get_credential(key))
                .or_else(|| {
                    let conn = db?.lock().ok()?;
                    db::get_setting(&conn, SETTINGS_CATEGORY, key)
                })
        })
    }

    /// Resolve with an arbitrary credential lookup keyed by the
    /// `storage::KEY_*` names.
    pub fn resolve_with(
        data_dir: &Path,
        lookup: impl Fn(&str) -> Option<String>,
    ) -> Result<Self, ApiError> {
        let api_key = lookup(storage::KEY_API_KEY)
            .ok_or_else(|| ApiError::NotConfigured("missing API key".into()))?;
        let admin_url = lookup(storage::KEY_ADMIN_URL).unwrap_or_default();
        let terminal_id = lookup(storage::KEY_TERMINAL_ID).unwrap_or_default();

        let config = Self::new(&admin_url, &api_key, &terminal_id, data_dir);
        config.validate()?;
        debug!(
            admin_url = %config.admin_url,
            terminal_id = %mask_terminal_id(&config.terminal_id),
            "Client configuration resolved"
        );
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ApiError> {
        if self.api_key.trim().is_empty() {
            return Err(ApiError::NotConfigured("missing API key".into()));
        }
        if self.admin_url.trim().is_empty() {
            return Err(ApiError::NotConfigured("missing admin URL".into()));
        }
        if self.terminal_id.trim().is_empty() {
            return Err(ApiError::NotConfigured("missing terminal ID".into()));
        }
        Ok(())
    }
}

/// Data directory from `POS_DATA_DIR`, falling back to the platform data dir.
pub fn default_data_dir() -> PathBuf {
    if let Ok(dir) = std::env::var(ENV_DATA_DIR) {
        if !dir.trim().is_empty() {
            return PathBuf::from(dir);
        }
    }
    let base = std::env::var("LOCALAPPDATA")
        .or_else(|_| std::env::var("XDG_DATA_HOME"))
        .map(PathBuf::from)
        .unwrap_or_else(|_| {
            PathBuf::from(std::env::var("HOME").unwrap_or_else(|_| ".".into()))
                .join(".local")
                .join("share")
        });
    base.join("com.thesmall.pos")
}

fn env_for_credential(key: &str) -> Option<&'static str> {
    match key {
        storage::KEY_ADMIN_URL => Some(ENV_ADMIN_URL),
        storage::KEY_API_KEY => Some(ENV_API_KEY),
        storage::KEY_TERMINAL_ID => Some(ENV_TERMINAL_ID),
        _ => None,
    }
}

/// Normalise the admin dashboard URL:
/// - strip trailing slashes
/// - strip a trailing `/api` segment
/// - ensure a scheme is present (https, or http for localhost)
pub fn normalize_admin_url(url: &str) -> String {
    let mut url = url.trim().to_string();
    if url.is_empty() {
        return url;
    }

    if !url.starts_with("http://") && !url.starts_with("https://") {
        if url.starts_with("localhost") || url.starts_with("127.0.0.1") {
            url = format!("http://{url}");
        } else {
            url = format!("https://{url}");
        }
    }

    while url.ends_with('/') {
        url.pop();
    }
    if url.ends_with("/api") {
        url.truncate(url.len() - 4);
    }
    while url.ends_with('/') {
        url.pop();
    }

    url
}

fn decode_connection_string_payload(raw: &str) -> Option<Value> {
    let compact: String = raw.chars().filter(|c| !c.is_whitespace()).collect();
    if compact.starts_with('{') {
        return serde_json::from_str::<Value>(&compact).ok();
    }
    if compact.len() < 20 {
        return None;
    }

    let base64 = compact.replace('-', "+").replace('_', "/");
    let padded = format!(
        "{}{}",
        base64,
        "=".repeat((4usize.wrapping_sub(base64.len() % 4)) % 4)
    );
    let decoded = BASE64_STANDARD.decode(padded).ok()?;
    serde_json::from_slice::<Value>(&decoded)
        .ok()
        .filter(Value::is_object)
}

fn payload_str(v: &Value, keys: &[&str]) -> Option<String> {
    keys.iter()
        .filter_map(|k| v.get(*k).and_then(Value::as_str))
        .map(|s| s.trim().to_string())
        .find(|s| !s.is_empty())
}

pub fn mask_terminal_id(terminal_id: &str) -> String {
    let trimmed = terminal_id.trim();
    if trimmed.is_empty() {
        return "unknown".to_string();
    }
    let suffix: String = trimmed
        .chars()
        .rev()
        .take(4)
        .collect::<Vec<char>>()
        .into_iter()
        .rev()
        .collect();
    format!("***{suffix}")
}

#[cfg(test)]
mod tests {
    use super::*;
    use serial_test::serial;
    use std::collections::HashMap;

    #[test]
    fn test_normalize_admin_url() {
        assert_eq!(
            normalize_admin_url("admin.thesmall.app/api/"),
            "https://admin.thesmall.app"
        );
        assert_eq!(normalize_admin_url("localhost:3001/"), "http://localhost:3001");
        assert_eq!(
            normalize_admin_url("https://pos.example.com"),
            "https://pos.example.com"
        );
        assert_eq!(normalize_admin_url("   "), "");
    }

    #[test]
    fn test_connection_string_fills_missing_fields() {
        let payload = serde_json::json!({
            "key": "sk_live_123",
            "url": "admin.thesmall.app",
            "tid": "terminal-0042"
        });
        let encoded = BASE64_STANDARD.encode(payload.to_string());

        let config = ClientConfig::new("", &encoded, "", "/tmp/pos");
        assert_eq!(config.api_key, "sk_live_123");
        assert_eq!(config.admin_url, "https://admin.thesmall.app");
        assert_eq!(config.terminal_id, "terminal-0042");

        let explicit = ClientConfig::new("https://other.example", &encoded, "t-1", "/tmp/pos");
        assert_eq!(explicit.admin_url, "https://other.example");
        assert_eq!(explicit.terminal_id, "t-1");
    }

    #[test]
    fn test_resolve_with_reports_missing_values() {
        let empty = |_: &str| None;
        assert_eq!(
            ClientConfig::resolve_with(Path::new("/tmp"), empty).unwrap_err(),
            ApiError::NotConfigured("missing API key".into())
        );

        let values: HashMap<&str, &str> = [(storage::KEY_API_KEY, "plain-key")].into();
        let err = ClientConfig::resolve_with(Path::new("/tmp"), |k| {
            values.get(k).map(|v| v.to_string())
        })
        .unwrap_err();
        assert_eq!(err, ApiError::NotConfigured("missing admin URL".into()));
    }

    #[test]
    #[serial]
    fn test_resolve_prefers_environment() {
        std::env::set_var(ENV_API_KEY, "env-key");
        std::env::set_var(ENV_ADMIN_URL, "pos.example.com");
        std::env::set_var(ENV_TERMINAL_ID, "env-terminal");

        let db = DbState::open_in_memory().unwrap();
        {
            let conn = db.lock().unwrap();
            db::set_setting(&conn, SETTINGS_CATEGORY, storage::KEY_API_KEY, "db-key").unwrap();
        }

        let config = ClientConfig::resolve(Path::new("/tmp/pos"), Some(&db)).unwrap();
        assert_eq!(config.api_key, "env-key");
        assert_eq!(config.admin_url, "https://pos.example.com");
        assert_eq!(config.terminal_id, "env-terminal");

        std::env::remove_var(ENV_API_KEY);
        std::env::remove_var(ENV_ADMIN_URL);
        std::env::remove_var(ENV_TERMINAL_ID);
    }

    #[test]
    fn test_mask_terminal_id() {
        assert_eq!(mask_terminal_id("terminal-0042"), "***0042");
        assert_eq!(mask_terminal_id(""), "unknown");
    }
}
