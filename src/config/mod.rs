use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;

const DEFAULT_PORT: u16 = 5001;
const DEFAULT_MAX_UPLOAD_BYTES: u64 = 500 * 1024 * 1024;
const DEFAULT_SCRIPT_TIMEOUT_SECS: u64 = 3600;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    pub host: String,
    pub port: u16,
    pub allowed_origin: Option<String>,
    pub temp_root: PathBuf,
    pub max_connections: usize,
    pub max_upload_bytes: u64,
    pub script_timeout_secs: u64,
    pub shell: Option<String>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: DEFAULT_PORT,
            allowed_origin: None,
            temp_root: std::env::temp_dir(),
            max_connections: 1,
            max_upload_bytes: DEFAULT_MAX_UPLOAD_BYTES,
            script_timeout_secs: DEFAULT_SCRIPT_TIMEOUT_SECS,
            shell: None,
        }
    }
}

impl Config {
    pub fn from_env() -> Result<Self> {
        let mut config = Self::default();

        if let Some(file_config) = Self::from_conf_file()? {
            config.apply_file(file_config);
        }

        if let Ok(host) = std::env::var("HOST") {
            config.host = host;
        }

        if let Ok(port) = std::env::var("PORT") {
            config.port = port.parse().unwrap_or(DEFAULT_PORT);
        }

        if let Ok(origin) = std::env::var("CLIENT_HOST") {
            config.allowed_origin = Some(origin);
        }

        if let Ok(temp_root) = std::env::var("WARP_TEMP_ROOT") {
            config.temp_root = PathBuf::from(temp_root);
        }

        if let Ok(max) = std::env::var("MAX_CONNECTIONS") {
            config.max_connections = max
                .parse()
                .with_context(|| format!("Invalid MAX_CONNECTIONS value '{}'", max))?;
        }

        if let Ok(secs) = std::env::var("SCRIPT_TIMEOUT_SECS") {
            config.script_timeout_secs = secs
                .parse()
                .with_context(|| format!("Invalid SCRIPT_TIMEOUT_SECS value '{}'", secs))?;
        }

        config.normalize()?;
        Ok(config)
    }

    pub fn script_timeout(&self) -> Duration {
        Duration::from_secs(self.script_timeout_secs)
    }

    fn from_conf_file() -> Result<Option<FileConfig>> {
        let path = crate::paths::conf_dir()?.join("config.json");
        if !path.is_file() {
            return Ok(None);
        }

        let content = std::fs::read_to_string(&path)
            .with_context(|| format!("Failed to read config file {}", path.display()))?;
        let file_config = serde_json::from_str(&content)
            .with_context(|| format!("Invalid config file {}", path.display()))?;
        Ok(Some(file_config))
    }

    fn apply_file(&mut self, file_config: FileConfig) {
        if let Some(host) = file_config.host {
            self.host = host;
        }
        if let Some(port) = file_config.port {
            self.port = port;
        }
        if let Some(origin) = file_config.allowed_origin {
            self.allowed_origin = Some(origin);
        }
        if let Some(temp_root) = file_config.temp_root {
            self.temp_root = PathBuf::from(temp_root);
        }
        if let Some(max) = file_config.max_connections {
            self.max_connections = max;
        }
        if let Some(max) = file_config.max_upload_bytes {
            self.max_upload_bytes = max;
        }
        if let Some(secs) = file_config.script_timeout_secs {
            self.script_timeout_secs = secs;
        }
        if let Some(shell) = file_config.shell {
            self.shell = Some(shell);
        }
    }

    fn normalize(&mut self) -> Result<()> {
        if self.max_connections == 0 {
            anyhow::bail!("max_connections must be at least 1");
        }
        if self.script_timeout_secs == 0 {
            anyhow::bail!("script_timeout_secs must be at least 1");
        }
        if self.max_upload_bytes == 0 {
            anyhow::bail!("max_upload_bytes must be greater than zero");
        }
        if !self.temp_root.is_absolute() {
            anyhow::bail!(
                "temp_root must be an absolute path: {}",
                self.temp_root.display()
            );
        }
        if let Some(origin) = &self.allowed_origin {
            if origin.trim().is_empty() {
                self.allowed_origin = None;
            }
        }
        if let Some(shell) = &self.shell {
            if shell.trim().is_empty() {
                anyhow::bail!("shell in config cannot be empty");
            }
        }
        Ok(())
    }
}

#[derive(Debug, Deserialize)]
struct FileConfig {
    host: Option<String>,
    port: Option<u16>,
    allowed_origin: Option<String>,
    temp_root: Option<String>,
    max_connections: Option<usize>,
    max_upload_bytes: Option<u64>,
    script_timeout_secs: Option<u64>,
    shell: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_valid() {
        let mut config = Config::default();
        config.normalize().unwrap();
        assert_eq!(config.max_connections, 1);
        assert_eq!(config.max_upload_bytes, 500 * 1024 * 1024);
        assert_eq!(config.script_timeout(), Duration::from_secs(3600));
    }

    #[test]
    fn file_values_override_defaults() {
        let mut config = Config::default();
        let file_config: FileConfig = serde_json::from_str(
            r#"{"port": 7000, "allowed_origin": "https://client.local", "script_timeout_secs": 30}"#,
        )
        .unwrap();
        config.apply_file(file_config);
        config.normalize().unwrap();
        assert_eq!(config.port, 7000);
        assert_eq!(config.allowed_origin.as_deref(), Some("https://client.local"));
        assert_eq!(config.script_timeout_secs, 30);
    }

    #[test]
    fn rejects_zero_connections_and_relative_temp_root() {
        let mut config = Config {
            max_connections: 0,
            ..Config::default()
        };
        assert!(config.normalize().is_err());

        let mut config = Config {
            temp_root: PathBuf::from("relative/tmp"),
            ..Config::default()
        };
        assert!(config.normalize().is_err());
    }

    #[test]
    fn blank_origin_means_any() {
        let mut config = Config {
            allowed_origin: Some("  ".to_string()),
            ..Config::default()
        };
        config.normalize().unwrap();
        assert!(config.allowed_origin.is_none());
    }
}
