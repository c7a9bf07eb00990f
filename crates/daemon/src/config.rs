use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use tracing::warn;
use uvclink_common::filter::DeviceFilter;
use uvclink_common::types::PreviewSize;

use crate::error::ConfigError;

pub const DEFAULT_CONFIG_PATH: &str = "/etc/uvclink/config.toml";
pub const CONFIG_ENV: &str = "UVCLINK_CONFIG";

#[derive(Debug, Clone, Default, Deserialize, PartialEq, Eq)]
pub struct Config {
    #[serde(default)]
    pub filter: DeviceFilter,
    #[serde(default)]
    pub preview: PreviewConfig,
    #[serde(default)]
    pub surface: SurfaceConfig,
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct PreviewConfig {
    /// Resolutions tried in order; the first one the driver accepts wins.
    #[serde(default = "default_sizes")]
    pub sizes: Vec<PreviewSize>,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_health_check_delay_ms")]
    pub health_check_delay_ms: u64,
    #[serde(default = "default_retry_delay_ms")]
    pub retry_delay_ms: u64,
    #[serde(default = "default_preclean_delay_ms")]
    pub preclean_delay_ms: u64,
}

impl Default for PreviewConfig {
    fn default() -> Self {
        Self {
            sizes: default_sizes(),
            max_attempts: default_max_attempts(),
            health_check_delay_ms: default_health_check_delay_ms(),
            retry_delay_ms: default_retry_delay_ms(),
            preclean_delay_ms: default_preclean_delay_ms(),
        }
    }
}

impl PreviewConfig {
    pub fn attempts(&self) -> u32 {
        self.max_attempts.max(1)
    }

    pub fn health_check_delay(&self) -> Duration {
        Duration::from_millis(self.health_check_delay_ms)
    }

    pub fn retry_delay(&self) -> Duration {
        Duration::from_millis(self.retry_delay_ms)
    }

    pub fn preclean_delay(&self) -> Duration {
        Duration::from_millis(self.preclean_delay_ms)
    }
}

#[derive(Debug, Clone, Deserialize, PartialEq, Eq)]
pub struct SurfaceConfig {
    #[serde(default = "default_mirror")]
    pub mirror: bool,
}

impl Default for SurfaceConfig {
    fn default() -> Self {
        Self {
            mirror: default_mirror(),
        }
    }
}

pub fn default_sizes() -> Vec<PreviewSize> {
    vec![
        PreviewSize::new(640, 480),
        PreviewSize::new(320, 240),
        PreviewSize::new(800, 600),
        PreviewSize::new(1024, 768),
    ]
}

pub fn default_max_attempts() -> u32 {
    3
}

pub fn default_health_check_delay_ms() -> u64 {
    800
}

pub fn default_retry_delay_ms() -> u64 {
    1000
}

pub fn default_preclean_delay_ms() -> u64 {
    200
}

fn default_mirror() -> bool {
    true
}

pub fn config_path() -> PathBuf {
    std::env::var_os(CONFIG_ENV)
        .map(PathBuf::from)
        .unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH))
}

pub fn load_config_from(path: &Path) -> Result<Config, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        path: path.display().to_string(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::Parse {
        path: path.display().to_string(),
        source,
    })
}

/// Reads the config once at startup; any problem falls back to defaults.
pub fn load_config() -> Config {
    let path = config_path();
    match load_config_from(&path) {
        Ok(config) => config,
        Err(ConfigError::Io { source, .. }) if source.kind() == std::io::ErrorKind::NotFound => {
            Config::default()
        }
        Err(e) => {
            warn!(error = %e, "using default configuration");
            Config::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_match_documented_values() {
        let config = Config::default();
        assert_eq!(config.preview.sizes, default_sizes());
        assert_eq!(config.preview.attempts(), 3);
        assert_eq!(config.preview.health_check_delay(), Duration::from_millis(800));
        assert_eq!(config.preview.retry_delay(), Duration::from_millis(1000));
        assert!(config.surface.mirror);
        assert_eq!(config.filter, DeviceFilter::uvc());
    }

    #[test]
    fn partial_file_keeps_other_defaults() {
        let text = r#"
            [preview]
            sizes = [[320, 240]]
            max_attempts = 5

            [surface]
            mirror = false
        "#;
        let config: Config = toml::from_str(text).expect("parse");
        assert_eq!(config.preview.sizes, vec![PreviewSize::new(320, 240)]);
        assert_eq!(config.preview.max_attempts, 5);
        assert_eq!(config.preview.retry_delay_ms, 1000);
        assert!(!config.surface.mirror);
        assert_eq!(config.filter, DeviceFilter::uvc());
    }

    #[test]
    fn zero_attempts_still_tries_once() {
        let preview = PreviewConfig {
            max_attempts: 0,
            ..Default::default()
        };
        assert_eq!(preview.attempts(), 1);
    }

    #[test]
    fn missing_file_is_an_io_error() {
        let err = load_config_from(Path::new("/nonexistent/uvclink.toml")).unwrap_err();
        assert!(matches!(err, ConfigError::Io { .. }));
    }
}
