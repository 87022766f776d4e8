//! Process-wide configuration for the document pipeline.
//!
//! Built once at start from the environment and shared as `Arc<PipelineConfig>`.
//! Components never read the environment themselves.

use std::env;
use std::path::{Path, PathBuf};
use std::time::Duration;

use thiserror::Error;

const DEFAULT_APP_SECRET: &str = "loan-docs-secret-change-in-production";
const DEFAULT_STORAGE_ROOT: &str = "./storage";
const DEFAULT_BRAND: &str = "Bancozim";
const DEFAULT_BASE_URL: &str = "http://127.0.0.1:8080";
const DEFAULT_MEMORY_LIMIT: &str = "512M";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid value '{value}' for {key}: expected {expected}")]
    InvalidValue {
        key: &'static str,
        value: String,
        expected: &'static str,
    },
}

/// Immutable settings injected into every pipeline component.
#[derive(Debug, Clone)]
pub struct PipelineConfig {
    /// Key for access-token signatures and password binding. Never logged.
    pub server_secret: String,
    pub storage_root: PathBuf,
    pub encryption_enabled: bool,
    pub owner_password_length: usize,
    pub watermark_enabled: bool,
    pub token_ttl: chrono::Duration,
    pub brand: String,
    pub public_base_url: String,
    pub generation_timeout: Duration,
    /// Memory the process may spend on a render, in bytes.
    pub memory_limit_bytes: u64,
    pub slow_threshold: Duration,
    pub single_flight: bool,
    pub typst_bin: String,
    pub template_dir: PathBuf,
    pub server: ServerConfig,
}

#[derive(Debug, Clone)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl PipelineConfig {
    /// Read the configuration from the process environment (after `.env`).
    pub fn from_env() -> Result<Self, ConfigError> {
        dotenvy::dotenv().ok();

        let server_secret = env::var("APP_SECRET").unwrap_or_else(|_| {
            log::warn!("APP_SECRET not set, using default secret. SET THIS IN PRODUCTION!");
            DEFAULT_APP_SECRET.to_string()
        });

        let memory_raw = env_or("PDF_MEMORY_LIMIT", DEFAULT_MEMORY_LIMIT);
        let memory_limit_bytes =
            parse_byte_size(&memory_raw).ok_or_else(|| ConfigError::InvalidValue {
                key: "PDF_MEMORY_LIMIT",
                value: memory_raw.clone(),
                expected: "a size such as 512M or 1G",
            })?;

        Ok(Self {
            server_secret,
            storage_root: PathBuf::from(env_or("DOCUMENT_STORAGE_ROOT", DEFAULT_STORAGE_ROOT)),
            encryption_enabled: parse_bool("PDF_ENCRYPTION_ENABLED", true)?,
            owner_password_length: parse_number("PDF_OWNER_PASSWORD_LENGTH", 16)?,
            watermark_enabled: parse_bool("PDF_WATERMARK_ENABLED", false)?,
            token_ttl: token_ttl_hours(parse_number("PDF_TOKEN_TTL_HOURS", 24)?)?,
            brand: env_or("PDF_BRAND", DEFAULT_BRAND),
            public_base_url: env_or("PUBLIC_BASE_URL", DEFAULT_BASE_URL)
                .trim_end_matches('/')
                .to_string(),
            generation_timeout: Duration::from_secs(parse_number(
                "PDF_GENERATION_TIMEOUT_SECS",
                120,
            )?),
            memory_limit_bytes,
            slow_threshold: Duration::from_secs(parse_number("PDF_SLOW_THRESHOLD_SECS", 10)?),
            single_flight: parse_bool("PDF_SINGLE_FLIGHT", true)?,
            typst_bin: env_or("TYPST_BIN", "typst"),
            template_dir: env::var("PDF_TEMPLATE_DIR")
                .map(PathBuf::from)
                .unwrap_or_else(|_| default_template_dir().to_path_buf()),
            server: ServerConfig {
                host: env_or("APP_HOST", "0.0.0.0"),
                port: parse_number("APP_PORT", 8080)?,
            },
        })
    }

    /// Defaults with an explicit storage root and secret; used by tests and tools.
    pub fn for_storage_root(root: impl Into<PathBuf>, secret: impl Into<String>) -> Self {
        Self {
            server_secret: secret.into(),
            storage_root: root.into(),
            encryption_enabled: true,
            owner_password_length: 16,
            watermark_enabled: false,
            token_ttl: chrono::Duration::hours(24),
            brand: DEFAULT_BRAND.to_string(),
            public_base_url: DEFAULT_BASE_URL.to_string(),
            generation_timeout: Duration::from_secs(120),
            memory_limit_bytes: 512 * 1024 * 1024,
            slow_threshold: Duration::from_secs(10),
            single_flight: true,
            typst_bin: "typst".to_string(),
            template_dir: default_template_dir().to_path_buf(),
            server: ServerConfig {
                host: "127.0.0.1".to_string(),
                port: 8080,
            },
        }
    }
}

/// Templates shipped with the crate.
pub fn default_template_dir() -> &'static Path {
    Path::new(concat!(env!("CARGO_MANIFEST_DIR"), "/static/templates"))
}

fn env_or(key: &str, default: &str) -> String {
    env::var(key).unwrap_or_else(|_| default.to_string())
}

fn parse_bool(key: &'static str, default: bool) -> Result<bool, ConfigError> {
    let Ok(raw) = env::var(key) else {
        return Ok(default);
    };
    match raw.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: raw,
            expected: "a boolean",
        }),
    }
}

fn parse_number<T: std::str::FromStr>(key: &'static str, default: T) -> Result<T, ConfigError> {
    let Ok(raw) = env::var(key) else {
        return Ok(default);
    };
    raw.trim().parse::<T>().map_err(|_| ConfigError::InvalidValue {
        key,
        value: raw,
        expected: "a number",
    })
}

fn token_ttl_hours(hours: i64) -> Result<chrono::Duration, ConfigError> {
    chrono::Duration::try_hours(hours).ok_or_else(|| ConfigError::InvalidValue {
        key: "PDF_TOKEN_TTL_HOURS",
        value: hours.to_string(),
        expected: "a number of hours that fits a duration",
    })
}

/// Parse sizes such as `256M`, `1G`, `512k` or a plain byte count.
pub fn parse_byte_size(value: &str) -> Option<u64> {
    let value = value.trim();
    let last = value.chars().last()?;
    let (digits, multiplier) = match last.to_ascii_lowercase() {
        'g' => (&value[..value.len() - 1], 1024 * 1024 * 1024),
        'm' => (&value[..value.len() - 1], 1024 * 1024),
        'k' => (&value[..value.len() - 1], 1024),
        _ => (value, 1),
    };
    digits
        .trim()
        .parse::<u64>()
        .ok()
        .and_then(|n| n.checked_mul(multiplier))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_byte_size_units() {
        assert_eq!(parse_byte_size("256M"), Some(256 * 1024 * 1024));
        assert_eq!(parse_byte_size("1g"), Some(1024 * 1024 * 1024));
        assert_eq!(parse_byte_size("64k"), Some(64 * 1024));
        assert_eq!(parse_byte_size("1000"), Some(1000));
        assert_eq!(parse_byte_size("lots"), None);
        assert_eq!(parse_byte_size(""), None);
    }

    #[test]
    fn test_oversized_values_are_rejected_not_wrapped() {
        assert_eq!(parse_byte_size("18446744073709551615G"), None);
        assert_eq!(parse_byte_size("17179869184G"), None);
        assert_eq!(parse_byte_size("18446744073709551615"), Some(u64::MAX));

        assert!(matches!(
            token_ttl_hours(i64::MAX),
            Err(ConfigError::InvalidValue { key: "PDF_TOKEN_TTL_HOURS", .. })
        ));
        assert_eq!(token_ttl_hours(48).unwrap(), chrono::Duration::hours(48));
    }

    #[test]
    fn test_for_storage_root_defaults() {
        let config = PipelineConfig::for_storage_root("/tmp/docs", "secret");
        assert_eq!(config.storage_root, PathBuf::from("/tmp/docs"));
        assert!(config.encryption_enabled);
        assert!(!config.watermark_enabled);
        assert_eq!(config.owner_password_length, 16);
        assert_eq!(config.token_ttl, chrono::Duration::hours(24));
    }
}
