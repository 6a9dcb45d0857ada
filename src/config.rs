//! Configuration for scenesmith
//!
//! Settings live in ~/.config/scenesmith/config.json. The API key itself
//! prefers the system keyring; the config field is a plaintext fallback
//! for machines without one.

use crate::keyring;
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::Write as _;
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Plaintext fallback used when the system keyring is unavailable.
    pub openai_api_key: Option<String>,
    /// OpenAI model name used by the hosted backend.
    #[serde(default = "default_openai_model")]
    pub openai_model: String,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            openai_api_key: None,
            openai_model: default_openai_model(),
        }
    }
}

fn default_openai_model() -> String {
    "gpt-4o".to_string()
}

impl Config {
    fn config_dir() -> Option<PathBuf> {
        dirs::config_dir().map(|p| p.join("scenesmith"))
    }

    fn config_path() -> Option<PathBuf> {
        Self::config_dir().map(|p| p.join("config.json"))
    }

    /// Load config from disk, or return defaults.
    pub fn load() -> Self {
        match Self::config_path() {
            Some(path) => Self::load_from(&path),
            None => Self::default(),
        }
    }

    fn load_from(path: &Path) -> Self {
        let Ok(content) = fs::read_to_string(path) else {
            return Self::default();
        };
        match serde_json::from_str(&content) {
            Ok(config) => config,
            Err(err) => {
                preserve_corrupt_config(path, &content);
                eprintln!(
                    "  Warning: Config file was corrupted ({}). A backup was saved and defaults were loaded.",
                    err
                );
                Self::default()
            }
        }
    }

    /// Save config to disk.
    pub fn save(&self) -> Result<(), String> {
        let dir = Self::config_dir().ok_or_else(|| "Could not determine config directory".to_string())?;
        self.save_to(&dir)
    }

    fn save_to(&self, dir: &Path) -> Result<(), String> {
        fs::create_dir_all(dir).map_err(|e| format!("Failed to create config directory: {}", e))?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = fs::set_permissions(dir, fs::Permissions::from_mode(0o700)) {
                eprintln!("  Warning: Failed to set config directory permissions: {}", e);
            }
        }

        let path = dir.join("config.json");
        let content = serde_json::to_string_pretty(self)
            .map_err(|e| format!("Failed to serialize config: {}", e))?;

        write_config_atomic(&path, &content).map_err(|e| format!("Failed to write config: {}", e))
    }

    /// Resolve the OpenAI API key through the credential chain:
    /// system keyring, then the persisted config field, then the
    /// OPENAI_API_KEY environment variable.
    pub fn resolve_api_key(&self) -> Option<String> {
        let keyring_key = match keyring::get_api_key() {
            Ok(key) => key,
            Err(err) => {
                keyring::warn_keyring_error_once("the OpenAI API key", &err);
                None
            }
        };
        resolve_api_key(
            keyring_key,
            self.openai_api_key.clone(),
            std::env::var("OPENAI_API_KEY").ok(),
        )
    }

    /// Validate API key format (OpenAI keys start with sk-).
    pub fn validate_api_key_format(key: &str) -> bool {
        key.starts_with("sk-")
    }
}

/// Ordered credential resolution: first non-empty source wins.
///
/// Pure over its three inputs so the priority chain stays testable.
pub fn resolve_api_key(
    keyring_key: Option<String>,
    config_key: Option<String>,
    env_key: Option<String>,
) -> Option<String> {
    [keyring_key, config_key, env_key]
        .into_iter()
        .flatten()
        .map(|key| key.trim().to_string())
        .find(|key| !key.is_empty())
}

/// Interactive prompt to store (or clear) the OpenAI API key.
pub fn setup_api_key_interactive() -> Result<(), String> {
    use std::io::{self, Write};

    println!();
    println!("  scenesmith uses OpenAI for the hosted `chatgpt` backend.");
    println!("  1. Create an API key at: https://platform.openai.com/api-keys");
    println!("  2. Paste it below (stored in your system keyring when available)");
    println!("  Leave the field empty to remove a previously stored key.");
    println!();
    print!("  API Key: ");
    io::stdout().flush().map_err(|e| e.to_string())?;

    let mut key = String::new();
    io::stdin().read_line(&mut key).map_err(|e| e.to_string())?;
    let key = key.trim().to_string();

    let mut config = Config::load();

    // An empty submission clears every stored copy of the key.
    if key.is_empty() {
        keyring::delete_api_key()?;
        if config.openai_api_key.take().is_some() {
            config.save()?;
        }
        println!("  Stored API key removed.");
        return Ok(());
    }

    if !Config::validate_api_key_format(&key) {
        println!("  Warning: Key doesn't look like an OpenAI key (should start with sk-)");
        println!("     Saving anyway...");
    }

    match keyring::set_api_key(&key) {
        Ok(()) => {
            // Verify the write by reading it back, then drop any plaintext copy.
            match keyring::get_api_key() {
                Ok(Some(stored)) if stored == key => {
                    config.openai_api_key = None;
                    config.save()?;
                    println!("  + API key saved to the system keyring.");
                    Ok(())
                }
                _ => Err("API key verification failed: key was not persisted to the keyring. \
                     You can set the OPENAI_API_KEY environment variable instead."
                    .to_string()),
            }
        }
        Err(err) => {
            // No usable keyring; keep the plaintext fallback in the config file.
            eprintln!("  Warning: Couldn't store the key in the system keyring: {}", err);
            config.openai_api_key = Some(key);
            config.save()?;
            println!("  + API key saved to {}", config_location());
            Ok(())
        }
    }
}

/// Config file location for display.
pub fn config_location() -> String {
    Config::config_path()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|| "~/.config/scenesmith/config.json".to_string())
}

fn preserve_corrupt_config(path: &Path, content: &str) {
    let corrupt_path = path.with_extension("json.corrupt");
    if fs::rename(path, &corrupt_path).is_err() {
        let _ = fs::write(&corrupt_path, content);
    }
}

fn write_config_atomic(path: &Path, content: &str) -> Result<(), String> {
    let tmp_path = path.with_extension("tmp");
    {
        let mut file = fs::OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(true)
            .open(&tmp_path)
            .map_err(|e| e.to_string())?;

        #[cfg(unix)]
        {
            use std::os::unix::fs::PermissionsExt;
            if let Err(e) = file.set_permissions(fs::Permissions::from_mode(0o600)) {
                eprintln!("  Warning: Failed to set config file permissions: {}", e);
            }
        }

        file.write_all(content.as_bytes()).map_err(|e| e.to_string())?;
    }

    if let Err(err) = fs::rename(&tmp_path, path) {
        let _ = fs::remove_file(&tmp_path);
        return Err(err.to_string());
    }
    Ok(())
}
