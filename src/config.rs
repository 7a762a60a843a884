use crate::downloader::DEFAULT_LOOKUP_URL;
use crate::error::Locale;
use crate::limits::DEFAULT_MAX_BYTES;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Invalid YAML in {path}: {source}")]
    Yaml {
        path: PathBuf,
        #[source]
        source: serde_yaml::Error,
    },

    #[error("Invalid credentials file {path}: {source}")]
    Credentials {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Invalid value for {key}: {value}")]
    InvalidValue { key: &'static str, value: String },
}

/// Stored platform login, read from the credentials file.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub bot_token: Option<String>,
    pub channel_id: Option<i64>,
    pub http_port: u16,
    pub pair_site: Option<String>,
    pub cookies_file: PathBuf,
    pub auth_file: PathBuf,
    pub max_file_size_bytes: u64,
    pub max_requests_per_window: usize,
    pub rate_window_secs: u64,
    pub fetch_timeout_secs: u64,
    pub ytdlp_path: PathBuf,
    pub gallery_dl_path: PathBuf,
    pub pinterest_lookup_url: String,
    pub locale: Locale,
    pub mirror_web_downloads: bool,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            bot_token: None,
            channel_id: None,
            http_port: 5000,
            pair_site: None,
            cookies_file: PathBuf::from("cookies.txt"),
            auth_file: PathBuf::from("auth.json"),
            max_file_size_bytes: DEFAULT_MAX_BYTES,
            max_requests_per_window: 5,
            rate_window_secs: 60,
            fetch_timeout_secs: 300,
            ytdlp_path: PathBuf::from("yt-dlp"),
            gallery_dl_path: PathBuf::from("gallery-dl"),
            pinterest_lookup_url: DEFAULT_LOOKUP_URL.to_string(),
            locale: Locale::En,
            mirror_web_downloads: false,
        }
    }
}

impl Config {
    pub fn rate_window(&self) -> Duration {
        Duration::from_secs(self.rate_window_secs)
    }

    pub fn fetch_timeout(&self) -> Duration {
        Duration::from_secs(self.fetch_timeout_secs)
    }

    /// Cookie file path, if the file exists.
    pub fn cookies(&self) -> Option<PathBuf> {
        self.cookies_file
            .is_file()
            .then(|| self.cookies_file.clone())
    }

    /// Stored credentials, if the credentials file exists.
    pub fn load_credentials(&self) -> Result<Option<Credentials>, ConfigError> {
        if !self.auth_file.is_file() {
            return Ok(None);
        }
        let content = fs::read_to_string(&self.auth_file).map_err(|source| ConfigError::Io {
            path: self.auth_file.clone(),
            source,
        })?;
        let credentials =
            serde_json::from_str(&content).map_err(|source| ConfigError::Credentials {
                path: self.auth_file.clone(),
                source,
            })?;
        Ok(Some(credentials))
    }

    /// Load a YAML file; a missing file yields the defaults.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }
        let content = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        if content.trim().is_empty() {
            return Ok(Self::default());
        }
        serde_yaml::from_str(&content).map_err(|source| ConfigError::Yaml {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Override fields from environment-style lookups.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let get = |key: &str| lookup(key).filter(|v| !v.trim().is_empty());

        if let Some(v) = get("BOT_TOKEN") {
            self.bot_token = Some(v);
        }
        if let Some(v) = get("CHANNEL_ID") {
            self.channel_id = Some(parse("CHANNEL_ID", &v)?);
        }
        if let Some(v) = get("HTTP_PORT").or_else(|| get("FLASK_PORT")) {
            self.http_port = parse("HTTP_PORT", &v)?;
        }
        if let Some(v) = get("PAIR_SITE") {
            self.pair_site = Some(v);
        }
        if let Some(v) = get("COOKIES_FILE") {
            self.cookies_file = PathBuf::from(v);
        }
        if let Some(v) = get("AUTH_FILE") {
            self.auth_file = PathBuf::from(v);
        }
        if let Some(v) = get("MAX_FILE_SIZE_MB") {
            let mib: u64 = parse("MAX_FILE_SIZE_MB", &v)?;
            self.max_file_size_bytes =
                mib.checked_mul(1024 * 1024)
                    .ok_or_else(|| ConfigError::InvalidValue {
                        key: "MAX_FILE_SIZE_MB",
                        value: v.clone(),
                    })?;
        }
        if let Some(v) = get("MAX_REQUESTS_PER_MINUTE") {
            self.max_requests_per_window = parse("MAX_REQUESTS_PER_MINUTE", &v)?;
        }
        if let Some(v) = get("FETCH_TIMEOUT_SECS") {
            self.fetch_timeout_secs = parse("FETCH_TIMEOUT_SECS", &v)?;
        }
        if let Some(v) = get("YTDLP_PATH") {
            self.ytdlp_path = PathBuf::from(v);
        }
        if let Some(v) = get("GALLERY_DL_PATH") {
            self.gallery_dl_path = PathBuf::from(v);
        }
        if let Some(v) = get("PINTEREST_LOOKUP_URL") {
            self.pinterest_lookup_url = v;
        }
        if let Some(v) = get("LOCALE") {
            self.locale = v.parse().map_err(|_| ConfigError::InvalidValue {
                key: "LOCALE",
                value: v.clone(),
            })?;
        }
        if let Some(v) = get("MIRROR_WEB_DOWNLOADS") {
            self.mirror_web_downloads = parse_bool("MIRROR_WEB_DOWNLOADS", &v)?;
        }

        Ok(())
    }
}

fn parse<T: std::str::FromStr>(key: &'static str, value: &str) -> Result<T, ConfigError> {
    value.trim().parse().map_err(|_| ConfigError::InvalidValue {
        key,
        value: value.to_string(),
    })
}

fn parse_bool(key: &'static str, value: &str) -> Result<bool, ConfigError> {
    match value.trim().to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Ok(true),
        "0" | "false" | "no" | "off" => Ok(false),
        _ => Err(ConfigError::InvalidValue {
            key,
            value: value.to_string(),
        }),
    }
}

// ============ LOADING ============

pub fn config_dir() -> PathBuf {
    dirs::home_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join(".config")
        .join("media-relay")
}

pub fn config_path() -> PathBuf {
    std::env::var_os("MEDIA_RELAY_CONFIG")
        .map(PathBuf::from)
        .unwrap_or_else(|| config_dir().join("config.yml"))
}

/// Defaults, then the YAML file, then `.env` and the process environment.
pub fn get_config() -> Result<Config, ConfigError> {
    let _ = dotenvy::dotenv();
    let mut config = Config::from_file(&config_path())?;
    config.apply_env(|key| std::env::var(key).ok())?;
    Ok(config)
}
