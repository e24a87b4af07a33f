//! Configuration management for redliner
//!
//! Stores settings in ~/.config/redliner/config.json. The API key never lives
//! in this file: it comes from the environment or the system keychain.

use crate::error::{ReviewError, Result};
use crate::llm::models::{Model, DEFAULT_TEMPERATURE};
use crate::redline::DiffMarkers;
use keyring::Entry;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::warn;

/// Default OpenRouter chat-completions endpoint
pub const DEFAULT_ENDPOINT: &str = "https://openrouter.ai/api/v1/chat/completions";

/// Generation over a full contract takes minutes, not seconds.
pub const DEFAULT_TIMEOUT_SECS: u64 = 300;

const API_KEY_ENV_VARS: &[&str] = &["REDLINER_API_KEY", "OPENROUTER_API_KEY"];

const KEYRING_SERVICE: &str = "redliner";
const KEYRING_USERNAME: &str = "openrouter_api_key";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Model tier ("balanced", "smart") or a raw provider model id
    pub model: String,
    pub endpoint: String,
    pub request_timeout_secs: u64,
    pub max_output_tokens: u32,
    pub temperature: f32,
    /// Treat an `anchor_start` that occurs more than once as a blocking error
    pub strict_anchors: bool,
    /// Override the strikethrough/underline markup in rendered redlines
    #[serde(skip_serializing_if = "Option::is_none")]
    pub diff_markers: Option<DiffMarkers>,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            model: "balanced".to_string(),
            endpoint: DEFAULT_ENDPOINT.to_string(),
            request_timeout_secs: DEFAULT_TIMEOUT_SECS,
            max_output_tokens: Model::Balanced.max_tokens(),
            temperature: DEFAULT_TEMPERATURE,
            strict_anchors: false,
            diff_markers: None,
        }
    }
}

fn keyring_disabled() -> bool {
    if cfg!(test) {
        return true;
    }
    matches!(
        std::env::var("REDLINER_DISABLE_KEYRING")
            .unwrap_or_default()
            .to_lowercase()
            .as_str(),
        "1" | "true" | "yes"
    )
}

fn keyring_entry() -> std::result::Result<Entry, keyring::Error> {
    Entry::new(KEYRING_SERVICE, KEYRING_USERNAME)
}

fn read_keyring_key() -> std::result::Result<Option<String>, keyring::Error> {
    if keyring_disabled() {
        return Ok(None);
    }
    let entry = keyring_entry()?;
    match entry.get_password() {
        Ok(key) => Ok(Some(key)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(err) => Err(err),
    }
}

fn write_keyring_key(key: &str) -> std::result::Result<(), keyring::Error> {
    let entry = keyring_entry()?;
    entry.set_password(key)
}

impl Config {
    /// Get the config directory path
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("redliner"))
    }

    /// Get the config file path
    pub fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk, or return default
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    /// Load from an explicit path. A missing file yields defaults; a corrupt
    /// one is moved aside to `config.json.corrupt` and defaults are used.
    pub fn load_from(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                preserve_corrupt_config(path, &content);
                warn!(
                    path = %path.display(),
                    error = %err,
                    "config file was corrupted; a backup was saved and defaults were loaded"
                );
                Self::default()
            }
        }
    }

    /// Save config to disk
    pub fn save(&self) -> Result<()> {
        let path = Self::config_path()
            .ok_or_else(|| ReviewError::Config("could not determine config directory".to_string()))?;
        self.save_to(&path)
    }

    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(dir) = path.parent() {
            fs::create_dir_all(dir).map_err(|e| {
                ReviewError::Config(format!("failed to create config directory: {}", e))
            })?;

            #[cfg(unix)]
            {
                use std::os::unix::fs::PermissionsExt;
                if let Err(e) = fs::set_permissions(dir, fs::Permissions::from_mode(0o700)) {
                    warn!(error = %e, "failed to set config directory permissions");
                }
            }
        }

        let content = serde_json::to_string_pretty(self)
            .map_err(|e| ReviewError::Config(format!("failed to serialize config: {}", e)))?;

        write_config_atomic(path, &content)
            .map_err(|e| ReviewError::Config(format!("failed to write config: {}", e)))
    }

    /// Get the API key (from environment or keychain)
    pub fn get_api_key(&self) -> Option<String> {
        // Environment variables take precedence
        for var in API_KEY_ENV_VARS {
            if let Ok(key) = std::env::var(var) {
                if !key.trim().is_empty() {
                    return Some(key.trim().to_string());
                }
            }
        }

        match read_keyring_key() {
            Ok(key) => key,
            Err(err) => {
                warn!(
                    error = %err,
                    "failed to read API key from system keychain; set REDLINER_API_KEY as a workaround"
                );
                None
            }
        }
    }

    /// Store the API key in the system keychain and read it back to verify.
    pub fn set_api_key(key: &str) -> Result<()> {
        write_keyring_key(key).map_err(|e| {
            ReviewError::Config(format!(
                "failed to store API key in system keychain: {}. \
                 You can set the REDLINER_API_KEY environment variable instead.",
                e
            ))
        })?;

        match read_keyring_key() {
            Ok(Some(stored)) if stored == key => Ok(()),
            Ok(_) => Err(ReviewError::Config(
                "API key verification failed: key was not persisted to keychain. \
                 You can set the REDLINER_API_KEY environment variable instead."
                    .to_string(),
            )),
            Err(e) => Err(ReviewError::Config(format!(
                "API key verification failed: couldn't read back from keychain ({})",
                e
            ))),
        }
    }

    /// Validate API key format (should start with sk-)
    pub fn validate_api_key_format(key: &str) -> bool {
        key.starts_with("sk-")
    }

    /// Provider model id after resolving tier names.
    pub fn model_id(&self) -> String {
        Model::resolve_id(&self.model)
    }

    /// The endpoint, checked to be an absolute http(s) URL.
    pub fn validated_endpoint(&self) -> Result<String> {
        let parsed = url::Url::parse(self.endpoint.trim()).map_err(|e| {
            ReviewError::Config(format!("invalid endpoint {:?}: {}", self.endpoint, e))
        })?;
        match parsed.scheme() {
            "http" | "https" => Ok(parsed.to_string()),
            other => Err(ReviewError::Config(format!(
                "endpoint must use http or https, not {:?}",
                other
            ))),
        }
    }

    pub fn markers(&self) -> DiffMarkers {
        self.diff_markers.clone().unwrap_or_default()
    }

    /// Get the config file location for display
    pub fn config_location() -> String {
        Self::config_path()
            .map(|p| p.display().to_string())
            .unwrap_or_else(|| "~/.config/redliner/config.json".to_string())
    }
}

/// Interactive prompt to set up the API key
pub fn setup_api_key_interactive() -> anyhow::Result<()> {
    use std::io;

    println!();
    println!("  ┌─────────────────────────────────────────────────────────┐");
    println!("  │  OPENROUTER SETUP                                       │");
    println!("  └─────────────────────────────────────────────────────────┘");
    println!();
    println!("  redliner uses OpenRouter to draft contract edits.");
    println!();
    println!("  1. Get an API key at: https://openrouter.ai/keys");
    println!("  2. Paste it below (saved in your system keychain)");
    println!();
    print!("  API Key: ");
    io::stdout().flush()?;

    let mut key = String::new();
    io::stdin().read_line(&mut key)?;
    let key = key.trim();

    if key.is_empty() {
        return Err(anyhow::anyhow!("No API key provided"));
    }

    if !Config::validate_api_key_format(key) {
        println!();
        println!("  Warning: Key doesn't look like an OpenRouter key (should start with sk-)");
        println!("     Saving anyway...");
    }

    Config::set_api_key(key)?;

    println!();
    println!("  + API key saved to the system keychain");
    println!();
    Ok(())
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

fn write_config_atomic(path: &Path, content: &str) -> std::io::Result<()> {
    let tmp_path = path.with_extension("tmp");
    let mut options = fs::OpenOptions::new();
    options.write(true).create(true).truncate(true);
    #[cfg(unix)]
    {
        use std::os::unix::fs::OpenOptionsExt;
        options.mode(0o600);
    }

    let mut file = options.open(&tmp_path)?;
    file.write_all(content.as_bytes())?;
    file.sync_all()?;
    drop(file);

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_default() {
        let config = Config::default();
        assert_eq!(config.request_timeout_secs, 300);
        assert_eq!(config.max_output_tokens, 16384);
        assert!(!config.strict_anchors);
        assert_eq!(config.model_id(), Model::Balanced.id());
    }

    #[test]
    fn test_missing_file_gives_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let config = Config::load_from(&dir.path().join("config.json"));
        assert_eq!(config, Config::default());
    }

    #[test]
    fn test_save_and_reload() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = Config {
            model: "smart".to_string(),
            strict_anchors: true,
            diff_markers: Some(DiffMarkers {
                delete_open: "[-".into(),
                delete_close: "-]".into(),
                insert_open: "{+".into(),
                insert_close: "+}".into(),
            }),
            ..Config::default()
        };
        config.save_to(&path).unwrap();
        assert!(!path.with_extension("tmp").exists());
        assert_eq!(Config::load_from(&path), config);

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            let mode = fs::metadata(&path).unwrap().permissions().mode();
            assert_eq!(mode & 0o777, 0o600);
        }
    }

    #[test]
    fn test_partial_file_fills_defaults() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, r#"{"temperature": 0.0}"#).unwrap();
        let config = Config::load_from(&path);
        assert_eq!(config.temperature, 0.0);
        assert_eq!(config.endpoint, DEFAULT_ENDPOINT);
    }

    #[test]
    fn test_corrupt_file_is_preserved() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.json");
        fs::write(&path, "{not json").unwrap();
        let config = Config::load_from(&path);
        assert_eq!(config, Config::default());
        let backup = dir.path().join("config.json.corrupt");
        assert_eq!(fs::read_to_string(backup).unwrap(), "{not json");
    }

    #[test]
    fn test_endpoint_validation() {
        let mut config = Config::default();
        assert!(config.validated_endpoint().is_ok());
        config.endpoint = "ftp://example.com/v1".to_string();
        assert!(matches!(config.validated_endpoint(), Err(ReviewError::Config(_))));
        config.endpoint = "not a url".to_string();
        assert!(matches!(config.validated_endpoint(), Err(ReviewError::Config(_))));
    }

    #[test]
    fn test_markers_fall_back_to_defaults() {
        assert_eq!(Config::default().markers(), DiffMarkers::default());
    }
}
