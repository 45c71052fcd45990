//! Build configuration.
//!
//! Settings are layered with figment, later layers winning:
//!
//! 1. built-in defaults
//! 2. a TOML file (`--config`, or `config.toml` in the platform config dir)
//! 3. `SASTBRIDGE_*` environment variables, `__` separating sections
//!    (`SASTBRIDGE_PROJECT__NAME=Payments`)
//! 4. command-line flags, applied through [`ConfigOverrides`]
//!
//! The resulting [`Config`] is the single context object for one build; it
//! is handed to each component rather than read from global state.

use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use directories::ProjectDirs;
use figment::providers::{Env, Format, Serialized, Toml};
use figment::Figment;
use serde::{Deserialize, Serialize};

use crate::archive::{FilterError, FilterSpec};
use crate::client::envelope::{ProjectSettings, DEFAULT_LCID};
use crate::client::retry::RetryPolicy;
use crate::client::session::Credentials;
use crate::client::submit::ScanOptions;
use crate::client::ClientSettings;
use crate::results::Thresholds;

/// Prefix of configuration environment variables.
pub const ENV_PREFIX: &str = "SASTBRIDGE_";

/// Default archive size limit (200 MiB).
pub const DEFAULT_MAX_ARCHIVE_BYTES: u64 = 200 * 1024 * 1024;

/// Folders left out of the archive unless configured otherwise.
pub const DEFAULT_EXCLUDE_FOLDERS: &str = "_cvs, .svn, .hg, .git, .bzr, bin, obj, backup, .idea";

/// Files left out of the archive unless configured otherwise.
pub const DEFAULT_FILTER_PATTERN: &str = "!**/*.DS_Store, !**/*.ipr, !**/*.iws, !**/*.bak, \
     !**/*.tmp, !**/*.mp3, !**/*.mp4, !**/*.avi, !**/*.bmp, !**/*.gif, !**/*.jpg, !**/*.png, \
     !**/*.psd, !**/*.jar, !**/*.zip, !**/*.rar, !**/*.exe, !**/*.dll, !**/*.pdb, !**/*.7z, \
     !**/*.gz, !**/*.tar, !**/*.class, !**/*.iml";

/// Complete configuration for one build.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Server root, e.g. `https://sast.example.com` (no path).
    pub server_url: String,
    pub username: String,
    #[serde(skip_serializing)]
    pub password: String,
    pub project: ProjectConfig,
    pub archive: ArchiveConfig,
    pub retry: RetryConfig,
    pub polling: PollingConfig,
    pub thresholds: Thresholds,
    pub report: ReportConfig,
    pub http: HttpConfig,
}

/// Project the scan is filed under, and per-scan flags.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ProjectConfig {
    pub name: String,
    pub preset_id: i64,
    pub team_id: String,
    pub scan_configuration_id: i64,
    pub description: String,
    pub incremental: bool,
    pub private: bool,
    pub comment: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArchiveConfig {
    /// Comma/newline separated Ant patterns; `!` marks an exclude.
    pub filter: String,
    /// Comma separated folder names excluded at any depth.
    pub exclude_folders: String,
    /// Compressed size limit in bytes; 0 disables the check.
    pub max_size_bytes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryConfig {
    /// Upload attempts, including the first.
    pub submit_attempts: u32,
    /// Report generation attempts, including the first.
    pub report_attempts: u32,
    /// Failed status polls tolerated over a whole scan.
    pub poll_retries: u32,
    /// Wait before retrying, in seconds.
    pub delay_secs: u64,
    /// Factor applied to the wait after each failure.
    pub backoff: u32,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct PollingConfig {
    pub scan_interval_secs: u64,
    pub report_interval_secs: u64,
    /// Give up waiting for the scan after this many minutes; 0 waits forever.
    pub scan_timeout_minutes: u64,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    /// Directory receiving the downloaded reports.
    pub output_dir: PathBuf,
    /// Also download a PDF report.
    pub generate_pdf: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub connect_timeout_secs: u64,
    /// Whole-request timeout; 0 lets uploads take as long as they need.
    pub request_timeout_secs: u64,
    pub lcid: u32,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            server_url: String::new(),
            username: String::new(),
            password: String::new(),
            project: ProjectConfig::default(),
            archive: ArchiveConfig::default(),
            retry: RetryConfig::default(),
            polling: PollingConfig::default(),
            thresholds: Thresholds::default(),
            report: ReportConfig::default(),
            http: HttpConfig::default(),
        }
    }
}

impl Default for ProjectConfig {
    fn default() -> Self {
        Self {
            name: String::new(),
            preset_id: 0,
            team_id: String::new(),
            scan_configuration_id: 1,
            description: String::new(),
            incremental: false,
            private: false,
            comment: String::new(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            filter: DEFAULT_FILTER_PATTERN.to_string(),
            exclude_folders: DEFAULT_EXCLUDE_FOLDERS.to_string(),
            max_size_bytes: DEFAULT_MAX_ARCHIVE_BYTES,
        }
    }
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self {
            submit_attempts: 3,
            report_attempts: 3,
            poll_retries: 3,
            delay_secs: 5,
            backoff: 1,
        }
    }
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            scan_interval_secs: 10,
            report_interval_secs: 2,
            scan_timeout_minutes: 0,
        }
    }
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            output_dir: PathBuf::from("sast-reports"),
            generate_pdf: false,
        }
    }
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            connect_timeout_secs: 30,
            request_timeout_secs: 0,
            lcid: DEFAULT_LCID,
        }
    }
}

/// Values given on the command line. `None` leaves the layered value alone.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigOverrides {
    pub server_url: Option<String>,
    pub username: Option<String>,
    pub password: Option<String>,
    pub project_name: Option<String>,
    pub preset_id: Option<i64>,
    pub team_id: Option<String>,
    pub comment: Option<String>,
    pub incremental: Option<bool>,
    pub private: Option<bool>,
    pub filter: Option<String>,
    pub exclude_folders: Option<String>,
    pub max_archive_bytes: Option<u64>,
    pub scan_timeout_minutes: Option<u64>,
    pub report_dir: Option<PathBuf>,
    pub generate_pdf: Option<bool>,
    pub high_threshold: Option<u64>,
    pub medium_threshold: Option<u64>,
    pub low_threshold: Option<u64>,
}

impl ConfigOverrides {
    /// Apply every value that was given.
    pub fn apply(self, config: &mut Config) {
        fn set<T>(target: &mut T, value: Option<T>) {
            if let Some(value) = value {
                *target = value;
            }
        }

        set(&mut config.server_url, self.server_url);
        set(&mut config.username, self.username);
        set(&mut config.password, self.password);
        set(&mut config.project.name, self.project_name);
        set(&mut config.project.preset_id, self.preset_id);
        set(&mut config.project.team_id, self.team_id);
        set(&mut config.project.comment, self.comment);
        set(&mut config.project.incremental, self.incremental);
        set(&mut config.project.private, self.private);
        set(&mut config.archive.filter, self.filter);
        set(&mut config.archive.exclude_folders, self.exclude_folders);
        set(&mut config.archive.max_size_bytes, self.max_archive_bytes);
        set(&mut config.polling.scan_timeout_minutes, self.scan_timeout_minutes);
        set(&mut config.report.output_dir, self.report_dir);
        set(&mut config.report.generate_pdf, self.generate_pdf);
        if self.high_threshold.is_some() {
            config.thresholds.high = self.high_threshold;
        }
        if self.medium_threshold.is_some() {
            config.thresholds.medium = self.medium_threshold;
        }
        if self.low_threshold.is_some() {
            config.thresholds.low = self.low_threshold;
        }
    }
}

/// A setting that makes a scan impossible.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required setting '{0}'")]
    Missing(&'static str),

    #[error("Setting '{name}' is invalid: {reason}")]
    Invalid { name: &'static str, reason: String },
}

impl Config {
    /// Default configuration file location.
    #[must_use]
    pub fn default_path() -> Option<PathBuf> {
        ProjectDirs::from("com", "sastbridge", "sastbridge")
            .map(|dirs| dirs.config_dir().join("config.toml"))
    }

    /// The layered figment: defaults, TOML file, environment.
    ///
    /// Without an explicit `path` the default file is used if it exists.
    pub fn figment(path: Option<&Path>) -> Figment {
        let mut figment = Figment::from(Serialized::defaults(Config::default()));
        match path {
            Some(path) => figment = figment.merge(Toml::file(path)),
            None => {
                if let Some(default) = Self::default_path().filter(|p| p.exists()) {
                    log::debug!("Using configuration file {}", default.display());
                    figment = figment.merge(Toml::file(default));
                }
            }
        }
        figment.merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Load the layered configuration and apply command-line overrides.
    ///
    /// # Errors
    ///
    /// Returns an error if an explicit file does not exist, cannot be parsed,
    /// or a value has the wrong type.
    pub fn load(path: Option<&Path>, overrides: ConfigOverrides) -> Result<Self> {
        if let Some(path) = path {
            anyhow::ensure!(
                path.is_file(),
                "Configuration file {} does not exist",
                path.display()
            );
        }
        let mut config: Config = Self::figment(path)
            .extract()
            .context("Failed to load configuration")?;
        overrides.apply(&mut config);
        Ok(config)
    }

    /// Check the settings a scan needs.
    ///
    /// # Errors
    ///
    /// The first missing or invalid setting.
    pub fn validate_for_scan(&self) -> Result<(), ConfigError> {
        if self.server_url.trim().is_empty() {
            return Err(ConfigError::Missing("server_url"));
        }
        if self.username.is_empty() {
            return Err(ConfigError::Missing("username"));
        }
        if self.password.is_empty() {
            return Err(ConfigError::Missing("password"));
        }
        if self.project.name.trim().is_empty() {
            return Err(ConfigError::Missing("project.name"));
        }
        if self.polling.scan_interval_secs == 0 {
            return Err(ConfigError::Invalid {
                name: "polling.scan_interval_secs",
                reason: "must be at least 1".to_string(),
            });
        }
        self.filter_spec().map_err(|e| ConfigError::Invalid {
            name: "archive.filter",
            reason: e.to_string(),
        })?;
        Ok(())
    }

    /// Parsed archive filter including the excluded folders.
    ///
    /// # Errors
    ///
    /// Returns [`FilterError`] for an invalid pattern.
    pub fn filter_spec(&self) -> Result<FilterSpec, FilterError> {
        FilterSpec::parse(&self.archive.filter)?.with_excluded_folders(&self.archive.exclude_folders)
    }

    #[must_use]
    pub fn credentials(&self) -> Credentials {
        Credentials::new(self.username.clone(), self.password.clone())
    }

    #[must_use]
    pub fn project_settings(&self) -> ProjectSettings {
        ProjectSettings {
            project_name: self.project.name.clone(),
            preset_id: self.project.preset_id,
            team_id: self.project.team_id.clone(),
            scan_configuration_id: self.project.scan_configuration_id,
            description: self.project.description.clone(),
        }
    }

    #[must_use]
    pub fn scan_options(&self) -> ScanOptions {
        ScanOptions {
            is_incremental: self.project.incremental,
            is_private: self.project.private,
            comment: self.project.comment.clone(),
        }
    }

    #[must_use]
    pub fn client_settings(&self) -> ClientSettings {
        let delay = Duration::from_secs(self.retry.delay_secs);
        ClientSettings {
            submit_retry: RetryPolicy::new(self.retry.submit_attempts, delay)
                .with_backoff(self.retry.backoff),
            report_retry: RetryPolicy::new(self.retry.report_attempts, delay)
                .with_backoff(self.retry.backoff),
            poll_retries: self.retry.poll_retries,
            scan_poll_interval: Duration::from_secs(self.polling.scan_interval_secs),
            report_poll_interval: Duration::from_secs(self.polling.report_interval_secs),
            scan_timeout: (self.polling.scan_timeout_minutes > 0)
                .then(|| Duration::from_secs(self.polling.scan_timeout_minutes.saturating_mul(60))),
            lcid: self.http.lcid,
        }
    }

    #[must_use]
    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.http.connect_timeout_secs)
    }

    #[must_use]
    pub fn request_timeout(&self) -> Option<Duration> {
        (self.http.request_timeout_secs > 0).then(|| Duration::from_secs(self.http.request_timeout_secs))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;

    #[test]
    fn test_defaults() {
        let config = Config::default();
        assert_eq!(config.archive.max_size_bytes, 200 * 1024 * 1024);
        assert_eq!(config.polling.scan_interval_secs, 10);
        assert_eq!(config.polling.report_interval_secs, 2);
        assert_eq!(config.retry.poll_retries, 3);
        assert_eq!(config.http.lcid, 1033);
        assert!(config.client_settings().scan_timeout.is_none());
    }

    #[test]
    fn test_default_filter_excludes_vcs_and_binaries() {
        let filter = Config::default().filter_spec().unwrap();
        assert!(filter.matches(Path::new("src/Main.java")));
        assert!(!filter.matches(Path::new(".git/config")));
        assert!(!filter.matches(Path::new("lib/vendor.jar")));
        assert!(!filter.matches(Path::new("module/bin/App.class")));
    }

    #[test]
    fn test_file_then_env_then_overrides() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "sastbridge.toml",
                r#"
                server_url = "https://file.example.com"
                username = "ci"

                [project]
                name = "FromFile"
                preset_id = 7

                [polling]
                scan_timeout_minutes = 30
                "#,
            )?;
            jail.set_env("SASTBRIDGE_PROJECT__NAME", "FromEnv");
            jail.set_env("SASTBRIDGE_PASSWORD", "s3cret");

            let overrides = ConfigOverrides {
                server_url: Some("https://cli.example.com".to_string()),
                ..Default::default()
            };
            let config = Config::load(Some(Path::new("sastbridge.toml")), overrides)
                .map_err(|e| figment::Error::from(e.to_string()))?;

            assert_eq!(config.server_url, "https://cli.example.com");
            assert_eq!(config.username, "ci");
            assert_eq!(config.password, "s3cret");
            assert_eq!(config.project.name, "FromEnv");
            assert_eq!(config.project.preset_id, 7);
            assert_eq!(
                config.client_settings().scan_timeout,
                Some(Duration::from_secs(1800))
            );
            Ok(())
        });
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        Jail::expect_with(|_| {
            assert!(Config::load(Some(Path::new("absent.toml")), ConfigOverrides::default()).is_err());
            Ok(())
        });
    }

    #[test]
    fn test_validate_for_scan() {
        let mut config = Config::default();
        assert_eq!(config.validate_for_scan(), Err(ConfigError::Missing("server_url")));

        config.server_url = "https://sast.example.com".to_string();
        config.username = "ci".to_string();
        config.password = "pw".to_string();
        config.project.name = "Payments".to_string();
        assert_eq!(config.validate_for_scan(), Ok(()));

        config.archive.filter = "src/[".to_string();
        assert!(matches!(
            config.validate_for_scan(),
            Err(ConfigError::Invalid { name: "archive.filter", .. })
        ));
    }

    #[test]
    fn test_huge_scan_timeout_saturates() {
        let mut config = Config::default();
        config.polling.scan_timeout_minutes = u64::MAX;
        assert_eq!(
            config.client_settings().scan_timeout,
            Some(Duration::from_secs(u64::MAX))
        );
    }

    #[test]
    fn test_password_not_serialized() {
        let mut config = Config::default();
        config.password = "hunter2".to_string();
        let text = toml::to_string(&config).unwrap();
        assert!(!text.contains("hunter2"));
    }
}
