//! Application configuration for the conference mapper.
//!
//! User config lives at `~/.confmap/confmap.toml`.
//! CLI flags override config file values, which override defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::error::{ConfMapError, Result};
use crate::types::Category;

/// Default configuration file name.
const CONFIG_FILE_NAME: &str = "confmap.toml";

/// Default config directory name under the user's home.
const CONFIG_DIR_NAME: &str = ".confmap";

/// Categories tracked out of the box.
pub const DEFAULT_CATEGORIES: &[&str] = &[
    "artificial intelligence",
    "computer science",
    "machine learning",
    "engineering",
    "information technology",
    "education",
    "software engineering",
    "security",
    "data mining",
    "communications",
    "big data",
    "robotics",
    "cloud computing",
    "image processing",
    "signal processing",
    "computer vision",
    "multimedia",
    "humanities",
    "bioinformatics",
    "medicine",
    "medical",
    "health informatics",
    "social networks",
    "social media",
];

// ---------------------------------------------------------------------------
// Config structs (matching confmap.toml schema)
// ---------------------------------------------------------------------------

/// Top-level application config, deserialized from TOML.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Category labels seeded into the lookup table.
    #[serde(default = "default_categories")]
    pub categories: Vec<String>,

    /// Listing crawl settings.
    #[serde(default)]
    pub crawl: CrawlSection,

    /// Geocoding service settings.
    #[serde(default)]
    pub geocoder: GeocoderSection,

    /// Storage backend settings.
    #[serde(default)]
    pub database: DatabaseSection,

    /// Batch scheduling settings.
    #[serde(default)]
    pub pipeline: PipelineSection,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            categories: default_categories(),
            crawl: CrawlSection::default(),
            geocoder: GeocoderSection::default(),
            database: DatabaseSection::default(),
            pipeline: PipelineSection::default(),
        }
    }
}

fn default_categories() -> Vec<String> {
    DEFAULT_CATEGORIES.iter().map(|c| c.to_string()).collect()
}

/// `[crawl]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CrawlSection {
    /// Listing URL with a `{}` placeholder for the category label.
    #[serde(default = "default_start_url_template")]
    pub start_url_template: String,

    /// Maximum listing pages fetched per category, first page included.
    #[serde(default = "default_max_pages")]
    pub max_pages: u32,

    /// Per-request timeout.
    #[serde(default = "default_crawl_timeout")]
    pub timeout_secs: u64,

    /// Delay between consecutive page fetches of one category.
    #[serde(default = "default_rate_limit")]
    pub rate_limit_ms: u64,
}

impl Default for CrawlSection {
    fn default() -> Self {
        Self {
            start_url_template: default_start_url_template(),
            max_pages: default_max_pages(),
            timeout_secs: default_crawl_timeout(),
            rate_limit_ms: default_rate_limit(),
        }
    }
}

fn default_start_url_template() -> String {
    "http://www.wikicfp.com/cfp/call?conference={}".into()
}
fn default_max_pages() -> u32 {
    20
}
fn default_crawl_timeout() -> u64 {
    30
}
fn default_rate_limit() -> u64 {
    500
}

/// `[geocoder]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeocoderSection {
    /// Nominatim-compatible search endpoint.
    #[serde(default = "default_geocoder_endpoint")]
    pub endpoint: String,

    /// User-Agent sent to the geocoder (required by Nominatim's usage policy).
    #[serde(default = "default_geocoder_user_agent")]
    pub user_agent: String,

    /// Per-request timeout.
    #[serde(default = "default_geocoder_timeout")]
    pub timeout_secs: u64,

    /// Minimum spacing between two geocoder requests.
    #[serde(default = "default_min_interval")]
    pub min_interval_ms: u64,
}

impl Default for GeocoderSection {
    fn default() -> Self {
        Self {
            endpoint: default_geocoder_endpoint(),
            user_agent: default_geocoder_user_agent(),
            timeout_secs: default_geocoder_timeout(),
            min_interval_ms: default_min_interval(),
        }
    }
}

fn default_geocoder_endpoint() -> String {
    "https://nominatim.openstreetmap.org/search".into()
}
fn default_geocoder_user_agent() -> String {
    concat!("confmap/", env!("CARGO_PKG_VERSION")).into()
}
fn default_geocoder_timeout() -> u64 {
    10
}
fn default_min_interval() -> u64 {
    1000
}

/// `[database]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DatabaseSection {
    /// Local file path (`~` expanded) or a `libsql://` / `http(s)://` server URL.
    #[serde(default = "default_database_url")]
    pub url: String,

    /// Name of the env var holding the remote auth token (never store the token itself).
    #[serde(default = "default_auth_token_env")]
    pub auth_token_env: String,

    /// Connection attempts before giving up.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    /// Delay between connection attempts.
    #[serde(default = "default_retry_delay")]
    pub retry_delay_ms: u64,
}

impl Default for DatabaseSection {
    fn default() -> Self {
        Self {
            url: default_database_url(),
            auth_token_env: default_auth_token_env(),
            connect_attempts: default_connect_attempts(),
            retry_delay_ms: default_retry_delay(),
        }
    }
}

fn default_database_url() -> String {
    "~/.confmap/conference_mapper.db".into()
}
fn default_auth_token_env() -> String {
    "CONFMAP_DB_AUTH_TOKEN".into()
}
fn default_connect_attempts() -> u32 {
    30
}
fn default_retry_delay() -> u64 {
    2000
}

/// `[pipeline]` section.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineSection {
    /// Categories processed concurrently.
    #[serde(default = "default_workers")]
    pub workers: u32,

    /// Remove stored duplicate names before any rows are written.
    #[serde(default)]
    pub repair_duplicates: bool,
}

impl Default for PipelineSection {
    fn default() -> Self {
        Self {
            workers: default_workers(),
            repair_duplicates: false,
        }
    }
}

fn default_workers() -> u32 {
    1
}

impl AppConfig {
    /// Reject values the pipeline cannot run with.
    pub fn validate(&self) -> Result<()> {
        if self.crawl.max_pages == 0 {
            return Err(ConfMapError::config("crawl.max_pages must be at least 1"));
        }
        if !self.crawl.start_url_template.contains("{}") {
            return Err(ConfMapError::config(
                "crawl.start_url_template must contain a {} placeholder",
            ));
        }
        if self.pipeline.workers == 0 {
            return Err(ConfMapError::config("pipeline.workers must be at least 1"));
        }
        if self.database.connect_attempts == 0 {
            return Err(ConfMapError::config(
                "database.connect_attempts must be at least 1",
            ));
        }
        self.category_list().map(|_| ())
    }

    /// The configured categories as validated [`Category`] values.
    pub fn category_list(&self) -> Result<Vec<Category>> {
        self.categories
            .iter()
            .map(|label| Category::new(label.as_str()))
            .collect::<Result<Vec<_>>>()
            .map_err(|e| ConfMapError::config(e.to_string()))
    }
}

// ---------------------------------------------------------------------------
// Runtime configs (merged from config + CLI flags)
// ---------------------------------------------------------------------------

/// Runtime crawl configuration.
#[derive(Debug, Clone)]
pub struct CrawlConfig {
    pub start_url_template: String,
    pub max_pages: u32,
    pub timeout: Duration,
    pub rate_limit_ms: u64,
}

impl From<&AppConfig> for CrawlConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            start_url_template: config.crawl.start_url_template.clone(),
            max_pages: config.crawl.max_pages,
            timeout: Duration::from_secs(config.crawl.timeout_secs),
            rate_limit_ms: config.crawl.rate_limit_ms,
        }
    }
}

/// Runtime geocoder configuration.
#[derive(Debug, Clone)]
pub struct GeocoderConfig {
    pub endpoint: String,
    pub user_agent: String,
    pub timeout: Duration,
    pub min_interval: Duration,
}

impl From<&AppConfig> for GeocoderConfig {
    fn from(config: &AppConfig) -> Self {
        Self {
            endpoint: config.geocoder.endpoint.clone(),
            user_agent: config.geocoder.user_agent.clone(),
            timeout: Duration::from_secs(config.geocoder.timeout_secs),
            min_interval: Duration::from_millis(config.geocoder.min_interval_ms),
        }
    }
}

/// Where the database lives.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DatabaseTarget {
    /// Embedded file.
    Local(PathBuf),
    /// Remote libSQL server.
    Remote { url: String, auth_token: String },
}

/// Runtime database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    pub target: DatabaseTarget,
    pub connect_attempts: u32,
    pub retry_delay: Duration,
}

impl DatabaseConfig {
    /// Resolve the `[database]` section, reading the auth token from the environment.
    pub fn from_app(config: &AppConfig) -> Result<Self> {
        let url = config.database.url.trim();
        let is_remote = ["libsql://", "http://", "https://"]
            .iter()
            .any(|scheme| url.starts_with(scheme));

        let target = if is_remote {
            let auth_token = std::env::var(&config.database.auth_token_env).unwrap_or_default();
            DatabaseTarget::Remote {
                url: url.to_string(),
                auth_token,
            }
        } else {
            DatabaseTarget::Local(expand_home(url)?)
        };

        Ok(Self {
            target,
            connect_attempts: config.database.connect_attempts,
            retry_delay: Duration::from_millis(config.database.retry_delay_ms),
        })
    }
}

/// Expand a leading `~/` to the user's home directory.
pub fn expand_home(path: &str) -> Result<PathBuf> {
    match path.strip_prefix("~/") {
        Some(rest) => {
            let home = dirs::home_dir()
                .ok_or_else(|| ConfMapError::config("could not determine home directory"))?;
            Ok(home.join(rest))
        }
        None => Ok(PathBuf::from(path)),
    }
}

// ---------------------------------------------------------------------------
// Config loading
// ---------------------------------------------------------------------------

/// Get the path to the config directory (`~/.confmap/`).
pub fn config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir()
        .ok_or_else(|| ConfMapError::config("could not determine home directory"))?;
    Ok(home.join(CONFIG_DIR_NAME))
}

/// Get the path to the config file (`~/.confmap/confmap.toml`).
pub fn config_file_path() -> Result<PathBuf> {
    Ok(config_dir()?.join(CONFIG_FILE_NAME))
}

/// Load the application config from disk. Returns defaults if the file does not exist.
pub fn load_config() -> Result<AppConfig> {
    let path = config_file_path()?;

    if !path.exists() {
        tracing::debug!(?path, "config file not found, using defaults");
        return Ok(AppConfig::default());
    }

    load_config_from(&path)
}

/// Load the application config from a specific file path.
pub fn load_config_from(path: &Path) -> Result<AppConfig> {
    let content = std::fs::read_to_string(path).map_err(|e| ConfMapError::io(path, e))?;

    toml::from_str(&content)
        .map_err(|e| ConfMapError::config(format!("failed to parse {}: {e}", path.display())))
}

/// Create the config directory and write a default config file.
/// Returns the path to the created file.
pub fn init_config() -> Result<PathBuf> {
    let dir = config_dir()?;
    std::fs::create_dir_all(&dir).map_err(|e| ConfMapError::io(&dir, e))?;

    let path = dir.join(CONFIG_FILE_NAME);
    let config = AppConfig::default();
    let content =
        toml::to_string_pretty(&config).map_err(|e| ConfMapError::config(e.to_string()))?;

    std::fs::write(&path, content).map_err(|e| ConfMapError::io(&path, e))?;
    tracing::info!(?path, "created default config file");

    Ok(path)
}
