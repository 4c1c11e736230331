use anyhow::{Context, Result};
use directories::ProjectDirs;
use serde::Deserialize;
use std::path::PathBuf;

/// Store connection configuration, injected as JSON via `MORSEL_STORE_CONFIG`.
#[derive(Debug, Clone, Deserialize)]
pub struct StoreConfig {
    pub base_url: String,
    #[serde(default)]
    pub api_key: Option<String>,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            base_url: "http://127.0.0.1:8080".to_string(),
            api_key: None,
        }
    }
}

/// Environment-injected configuration: application id, store connection
/// config, and an optional pre-issued auth token. The data directory is only
/// used by `morsel serve` (database file and API key).
pub struct Config {
    pub app_id: String,
    pub store: StoreConfig,
    pub auth_token: Option<String>,
    pub data_dir: PathBuf,
}

impl Config {
    pub fn load() -> Result<Self> {
        let proj_dirs =
            ProjectDirs::from("", "", "morsel").context("Could not determine home directory")?;

        let data_dir = proj_dirs.data_dir().to_path_buf();
        std::fs::create_dir_all(&data_dir)
            .with_context(|| format!("Failed to create data directory: {}", data_dir.display()))?;

        let app_id = non_blank(std::env::var("MORSEL_APP_ID").ok())
            .unwrap_or_else(|| "default-app".to_string());
        let store = match std::env::var("MORSEL_STORE_CONFIG") {
            Ok(raw) => parse_store_config(&raw)?,
            Err(_) => StoreConfig::default(),
        };
        let auth_token = non_blank(std::env::var("MORSEL_AUTH_TOKEN").ok());

        Ok(Config {
            app_id,
            store,
            auth_token,
            data_dir,
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("morsel.db")
    }

    /// Load the serve-mode API key from disk, or generate a new one.
    ///
    /// Returns `(key, newly_created)` where `newly_created` is true when a
    /// fresh key was just generated (first run).
    pub fn load_or_create_api_key(&self) -> Result<(String, bool)> {
        use rand::Rng;
        use std::fmt::Write;

        let path = self.data_dir.join("api_key");

        if path.exists() {
            let key = std::fs::read_to_string(&path).context("Failed to read API key file")?;
            let key = key.trim().to_string();
            if !key.is_empty() {
                return Ok((key, false));
            }
        }

        let bytes: [u8; 32] = rand::rng().random();
        let key = bytes
            .iter()
            .fold(String::with_capacity(64), |mut acc: String, b| {
                let _ = write!(acc, "{b:02x}");
                acc
            });
        std::fs::write(&path, &key).context("Failed to write API key file")?;
        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o600))
                .context("Failed to set API key file permissions")?;
        }
        eprintln!("Generated new API key: {key}");
        eprintln!("Clients connect with: MORSEL_STORE_CONFIG='{{\"base_url\":...,\"api_key\":\"{key}\"}}'");
        Ok((key, true))
    }
}

fn parse_store_config(raw: &str) -> Result<StoreConfig> {
    serde_json::from_str(raw)
        .context("Invalid MORSEL_STORE_CONFIG (expected JSON with a base_url field)")
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.filter(|s| !s.trim().is_empty())
}
