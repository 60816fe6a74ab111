use serde::{Deserialize, Serialize};
use std::net::IpAddr;
use std::path::PathBuf;

use crate::selection::QualityTier;

/// Root configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    pub overseerr: OverseerrConfig,
    #[serde(default)]
    pub credentials: CredentialsConfig,
    #[serde(default)]
    pub browser: BrowserConfig,
    #[serde(default)]
    pub selection: SelectionConfig,
    #[serde(default)]
    pub scheduler: SchedulerConfig,
    #[serde(default)]
    pub recovery: RecoveryConfig,
}

/// Server configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ServerConfig {
    #[serde(default = "default_host")]
    pub host: IpAddr,
    #[serde(default = "default_port")]
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
        }
    }
}

fn default_host() -> IpAddr {
    IpAddr::from([0, 0, 0, 0])
}

fn default_port() -> u16 {
    8777
}

/// Database configuration
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DatabaseConfig {
    #[serde(default = "default_db_path")]
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: default_db_path(),
        }
    }
}

fn default_db_path() -> PathBuf {
    PathBuf::from("seerrbridge.db")
}

/// Overseerr (or Jellyseerr) request source.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct OverseerrConfig {
    /// When disabled, cycles work from stored requests only.
    #[serde(default = "default_true")]
    pub enabled: bool,
    /// Base URL, e.g. "http://localhost:5055"
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub api_key: String,
    /// Request timeout in seconds (default: 30)
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
    /// Page size for the approved-request listing.
    #[serde(default = "default_take")]
    pub take: u32,
}

fn default_http_timeout() -> u64 {
    30
}

fn default_take() -> u32 {
    500
}

/// Provider credential file and token endpoint.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct CredentialsConfig {
    #[serde(default = "default_credentials_path")]
    pub path: PathBuf,
    #[serde(default = "default_token_url")]
    pub token_url: String,
    /// Refresh when less than this many seconds of validity remain.
    #[serde(default = "default_refresh_margin")]
    pub refresh_margin_secs: u64,
    #[serde(default = "default_http_timeout")]
    pub timeout_secs: u64,
}

impl Default for CredentialsConfig {
    fn default() -> Self {
        Self {
            path: default_credentials_path(),
            token_url: default_token_url(),
            refresh_margin_secs: default_refresh_margin(),
            timeout_secs: default_http_timeout(),
        }
    }
}

fn default_credentials_path() -> PathBuf {
    PathBuf::from("credentials.json")
}

fn default_token_url() -> String {
    "https://api.real-debrid.com/oauth/v2/token".to_string()
}

fn default_refresh_margin() -> u64 {
    600
}

/// Automation surface settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrowserConfig {
    /// Run without a visible window.
    #[serde(default = "default_true")]
    pub headless: bool,
    #[serde(default = "default_base_url")]
    pub base_url: String,
    /// Chrome/Chromium binary; autodetected when unset.
    #[serde(default)]
    pub executable: Option<PathBuf>,
    /// Launch the session at startup instead of on first acquire.
    #[serde(default)]
    pub launch_at_startup: bool,
    #[serde(default = "default_acquire_timeout")]
    pub acquire_timeout_secs: u64,
    #[serde(default = "default_step_timeout")]
    pub step_timeout_secs: u64,
    #[serde(default = "default_ready_timeout")]
    pub ready_timeout_secs: u64,
    /// How many times to expand the result list while collecting candidates.
    #[serde(default = "default_show_more_clicks")]
    pub show_more_clicks: u32,
}

impl Default for BrowserConfig {
    fn default() -> Self {
        Self {
            headless: true,
            base_url: default_base_url(),
            executable: None,
            launch_at_startup: false,
            acquire_timeout_secs: default_acquire_timeout(),
            step_timeout_secs: default_step_timeout(),
            ready_timeout_secs: default_ready_timeout(),
            show_more_clicks: default_show_more_clicks(),
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_base_url() -> String {
    "https://debridmediamanager.com".to_string()
}

fn default_acquire_timeout() -> u64 {
    600
}

fn default_step_timeout() -> u64 {
    30
}

fn default_ready_timeout() -> u64 {
    20
}

fn default_show_more_clicks() -> u32 {
    3
}

/// Candidate filtering and ranking.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SelectionConfig {
    /// 0 = unbounded
    #[serde(default)]
    pub max_movie_size_gb: f64,
    /// 0 = unbounded
    #[serde(default)]
    pub max_episode_size_gb: f64,
    /// Ordered quality tiers; the first tier matching any candidate wins.
    #[serde(default = "crate::selection::default_tiers")]
    pub tiers: Vec<QualityTier>,
    /// Candidates whose title matches are dropped before ranking.
    #[serde(default = "crate::selection::default_exclude_pattern")]
    pub exclude_pattern: Option<String>,
}

impl Default for SelectionConfig {
    fn default() -> Self {
        Self {
            max_movie_size_gb: 0.0,
            max_episode_size_gb: 0.0,
            tiers: crate::selection::default_tiers(),
            exclude_pattern: crate::selection::default_exclude_pattern(),
        }
    }
}

/// Scheduler settings.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SchedulerConfig {
    /// When disabled, cycles only run on webhook or manual triggers.
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_poll_interval")]
    pub poll_interval_secs: u64,
    /// Run one cycle right after start.
    #[serde(default = "default_true")]
    pub run_on_start: bool,
}

impl Default for SchedulerConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            poll_interval_secs: default_poll_interval(),
            run_on_start: true,
        }
    }
}

/// Smallest poll interval accepted by validation.
pub const MIN_POLL_INTERVAL_SECS: u64 = 60;

fn default_poll_interval() -> u64 {
    180
}

/// Failure handling and retry policy.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct RecoveryConfig {
    /// Upper bound on one full process() invocation.
    #[serde(default = "default_attempt_timeout")]
    pub attempt_timeout_secs: u64,
    #[serde(default = "default_snapshot_timeout")]
    pub snapshot_timeout_secs: u64,
    #[serde(default = "default_evidence_dir")]
    pub evidence_dir: PathBuf,
    /// Number of snapshots kept on disk.
    #[serde(default = "default_evidence_retain")]
    pub evidence_retain: usize,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_base_delay")]
    pub base_delay_secs: u64,
    #[serde(default = "default_max_delay")]
    pub max_delay_secs: u64,
    #[serde(default = "default_multiplier")]
    pub multiplier: f64,
}

impl Default for RecoveryConfig {
    fn default() -> Self {
        Self {
            attempt_timeout_secs: default_attempt_timeout(),
            snapshot_timeout_secs: default_snapshot_timeout(),
            evidence_dir: default_evidence_dir(),
            evidence_retain: default_evidence_retain(),
            max_attempts: default_max_attempts(),
            base_delay_secs: default_base_delay(),
            max_delay_secs: default_max_delay(),
            multiplier: default_multiplier(),
        }
    }
}

fn default_attempt_timeout() -> u64 {
    300
}

fn default_snapshot_timeout() -> u64 {
    10
}

fn default_evidence_dir() -> PathBuf {
    PathBuf::from("evidence")
}

fn default_evidence_retain() -> usize {
    20
}

fn default_max_attempts() -> u32 {
    5
}

fn default_base_delay() -> u64 {
    300
}

fn default_max_delay() -> u64 {
    6 * 60 * 60
}

fn default_multiplier() -> f64 {
    2.0
}

/// Sanitized config for API responses (secrets redacted)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedConfig {
    pub server: ServerConfig,
    pub database: DatabaseConfig,
    pub overseerr: SanitizedOverseerrConfig,
    pub credentials: CredentialsConfig,
    pub browser: BrowserConfig,
    pub selection: SelectionConfig,
    pub scheduler: SchedulerConfig,
    pub recovery: RecoveryConfig,
}

/// Sanitized Overseerr config (API key hidden)
#[derive(Debug, Clone, Serialize)]
pub struct SanitizedOverseerrConfig {
    pub enabled: bool,
    pub url: String,
    pub api_key_configured: bool,
    pub timeout_secs: u64,
    pub take: u32,
}

impl From<&Config> for SanitizedConfig {
    fn from(config: &Config) -> Self {
        Self {
            server: config.server.clone(),
            database: config.database.clone(),
            overseerr: SanitizedOverseerrConfig {
                enabled: config.overseerr.enabled,
                url: config.overseerr.url.clone(),
                api_key_configured: !config.overseerr.api_key.is_empty(),
                timeout_secs: config.overseerr.timeout_secs,
                take: config.overseerr.take,
            },
            credentials: config.credentials.clone(),
            browser: config.browser.clone(),
            selection: config.selection.clone(),
            scheduler: config.scheduler.clone(),
            recovery: config.recovery.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const MINIMAL: &str = r#"
[overseerr]
url = "http://localhost:5055"
api_key = "secret"
"#;

    #[test]
    fn test_deserialize_minimal_config_uses_defaults() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        assert_eq!(config.server.port, 8777);
        assert_eq!(config.server.host.to_string(), "0.0.0.0");
        assert!(config.browser.headless);
        assert_eq!(config.scheduler.poll_interval_secs, 180);
        assert_eq!(config.credentials.refresh_margin_secs, 600);
        assert_eq!(config.recovery.max_attempts, 5);
        assert_eq!(config.selection.max_movie_size_gb, 0.0);
        assert!(!config.selection.tiers.is_empty());
    }

    #[test]
    fn test_deserialize_missing_overseerr_fails() {
        let toml = r#"
[server]
port = 8080
"#;
        let result: Result<Config, _> = toml::from_str(toml);
        assert!(result.is_err());
    }

    #[test]
    fn test_deserialize_custom_tiers() {
        let toml = r#"
[overseerr]
url = "http://localhost:5055"
api_key = "secret"

[selection]
max_episode_size_gb = 1.5
tiers = [
    { name = "remux", pattern = "(?i)remux" },
    { name = "any", pattern = ".*" },
]
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.selection.tiers.len(), 2);
        assert_eq!(config.selection.tiers[0].name, "remux");
        assert_eq!(config.selection.max_episode_size_gb, 1.5);
    }

    #[test]
    fn test_sanitized_config_hides_api_key() {
        let config: Config = toml::from_str(MINIMAL).unwrap();
        let sanitized = SanitizedConfig::from(&config);
        let json = serde_json::to_string(&sanitized).unwrap();
        assert!(!json.contains("secret"));
        assert!(sanitized.overseerr.api_key_configured);
    }
}
