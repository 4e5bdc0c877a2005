use std::path::{Path, PathBuf};
use std::time::Duration;
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

/// Environment variables read by [`ServiceConfig::apply_env`]
pub const ENV_PORT: &str = "PORT";
pub const ENV_STORAGE_URL: &str = "SUPABASE_URL";
pub const ENV_STORAGE_KEY: &str = "SUPABASE_KEY";
pub const ENV_STORAGE_BUCKET: &str = "SUPABASE_BUCKET";
pub const ENV_EDITLY_BIN: &str = "EDITLY_BIN";
pub const ENV_RENDER_TIMEOUT_MS: &str = "RENDER_TIMEOUT_MS";

/// Configuration for the render service
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServiceConfig {
    /// Address to bind the HTTP listener to
    pub host: String,
    /// Port to listen on
    pub port: u16,
    /// Directory under which per-job workspaces are created
    pub scratch_root: PathBuf,
    /// Path to the editly binary
    pub editly_bin: PathBuf,
    /// X display handed to editly's headless GL backend
    pub display: String,
    /// Hard wall-clock limit for a single render, in milliseconds
    pub render_timeout_ms: u64,
    /// Largest accepted request body
    pub max_body_bytes: usize,
    /// Upper bound on in-flight render jobs (None = unbounded)
    pub max_concurrent_renders: Option<usize>,
    /// How long in-flight requests may run after a shutdown signal
    pub shutdown_grace_secs: u64,
    /// Remove leftover `render_*` workspaces under `scratch_root` at startup
    pub sweep_orphans_on_startup: bool,
    /// Remote object storage for uploads
    pub storage: StorageConfig,
}

/// Remote object storage settings.
///
/// Upload is enabled only when url, key and bucket are all present and
/// non-empty; anything less behaves exactly like no storage at all.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct StorageConfig {
    pub url: Option<String>,
    pub key: Option<String>,
    pub bucket: Option<String>,
}

/// A complete storage triple, only obtainable through [`StorageConfig::target`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StorageTarget {
    pub url: String,
    pub key: String,
    pub bucket: String,
}

impl StorageConfig {
    /// Resolve the configured triple, or None if any part is missing
    pub fn target(&self) -> Option<StorageTarget> {
        fn present(value: &Option<String>) -> Option<String> {
            value.as_deref().filter(|v| !v.is_empty()).map(str::to_string)
        }

        Some(StorageTarget {
            url: present(&self.url)?,
            key: present(&self.key)?,
            bucket: present(&self.bucket)?,
        })
    }

    pub fn is_enabled(&self) -> bool {
        self.target().is_some()
    }
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self::default_config()
    }
}

impl ServiceConfig {
    /// Create a default configuration with sensible values
    pub fn default_config() -> Self {
        Self {
            host: "0.0.0.0".to_string(),
            port: 8080,
            scratch_root: PathBuf::from("/tmp"),
            editly_bin: PathBuf::from("editly"),
            display: ":99".to_string(),
            render_timeout_ms: 300_000, // 5 minutes
            max_body_bytes: 50 * 1024 * 1024, // 50MB
            max_concurrent_renders: None,
            shutdown_grace_secs: 0,
            sweep_orphans_on_startup: false,
            storage: StorageConfig::default(),
        }
    }

    /// Load configuration from a file, or return defaults if path is None or file doesn't exist
    pub fn load_config(path: Option<&Path>) -> Result<Self> {
        let mut config = Self::default_config();

        if let Some(config_path) = path {
            if config_path.exists() {
                let content = std::fs::read_to_string(config_path)
                    .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

                // TOML by extension, JSON otherwise
                if config_path.extension().and_then(|s| s.to_str()) == Some("toml") {
                    config = toml::from_str(&content)
                        .with_context(|| format!("Failed to parse TOML config: {}", config_path.display()))?;
                } else {
                    config = serde_json::from_str(&content)
                        .with_context(|| format!("Failed to parse JSON config: {}", config_path.display()))?;
                }
            }
        }

        Ok(config)
    }

    /// Overlay values from the process environment
    pub fn apply_process_env(&mut self) -> Result<()> {
        self.apply_env(|name| std::env::var(name).ok())
    }

    /// Overlay values from an environment lookup. Empty values are ignored.
    pub fn apply_env<F>(&mut self, lookup: F) -> Result<()>
    where
        F: Fn(&str) -> Option<String>,
    {
        let var = |name: &str| lookup(name).filter(|v| !v.is_empty());

        if let Some(port) = var(ENV_PORT) {
            self.port = port
                .parse()
                .with_context(|| format!("Invalid {} value: {}", ENV_PORT, port))?;
        }
        if let Some(timeout) = var(ENV_RENDER_TIMEOUT_MS) {
            self.render_timeout_ms = timeout
                .parse()
                .with_context(|| format!("Invalid {} value: {}", ENV_RENDER_TIMEOUT_MS, timeout))?;
        }
        if let Some(bin) = var(ENV_EDITLY_BIN) {
            self.editly_bin = PathBuf::from(bin);
        }
        if let Some(url) = var(ENV_STORAGE_URL) {
            self.storage.url = Some(url);
        }
        if let Some(key) = var(ENV_STORAGE_KEY) {
            self.storage.key = Some(key);
        }
        if let Some(bucket) = var(ENV_STORAGE_BUCKET) {
            self.storage.bucket = Some(bucket);
        }

        Ok(())
    }

    pub fn render_timeout(&self) -> Duration {
        Duration::from_millis(self.render_timeout_ms)
    }
}
