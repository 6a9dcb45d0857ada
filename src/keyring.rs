//! System keyring storage for the OpenAI API key.
//!
//! Keyring access can fail (locked keychain, headless session), so every
//! failure degrades to a warning and the caller falls through to the next
//! credential source.

use keyring::Entry;
use std::sync::atomic::{AtomicBool, Ordering};

const KEYRING_SERVICE: &str = "scenesmith";
const KEYRING_USERNAME: &str = "openai_api_key";

static KEYRING_ERROR_WARNED: AtomicBool = AtomicBool::new(false);

fn keyring_disabled() -> bool {
    if cfg!(test) {
        return true;
    }
    matches!(
        std::env::var("SCENESMITH_DISABLE_KEYRING")
            .unwrap_or_default()
            .to_lowercase()
            .as_str(),
        "1" | "true" | "yes"
    )
}

fn entry() -> Result<Entry, keyring::Error> {
    Entry::new(KEYRING_SERVICE, KEYRING_USERNAME)
}

/// Warn about keyring errors only once per session.
pub fn warn_keyring_error_once(context: &str, err: &str) {
    if KEYRING_ERROR_WARNED.swap(true, Ordering::Relaxed) {
        return;
    }
    eprintln!("  Warning: Couldn't access system keyring for {}: {}", context, err);
    eprintln!("  Tip: Set the OPENAI_API_KEY environment variable to bypass the keyring.");
}

/// Read the stored API key. `Ok(None)` when nothing is stored.
pub fn get_api_key() -> Result<Option<String>, String> {
    if keyring_disabled() {
        return Ok(None);
    }
    let entry = entry().map_err(|e| e.to_string())?;
    match entry.get_password() {
        Ok(key) => Ok(Some(key)),
        Err(keyring::Error::NoEntry) => Ok(None),
        Err(err) => Err(err.to_string()),
    }
}

/// Store the API key in the keyring.
pub fn set_api_key(key: &str) -> Result<(), String> {
    if keyring_disabled() {
        return Err("keyring is disabled".to_string());
    }
    let entry = entry().map_err(|e| e.to_string())?;
    entry.set_password(key).map_err(|e| e.to_string())
}

/// Remove any stored API key. Removing a missing entry is not an error.
pub fn delete_api_key() -> Result<(), String> {
    if keyring_disabled() {
        return Ok(());
    }
    let entry = entry().map_err(|e| e.to_string())?;
    match entry.delete_credential() {
        Ok(()) | Err(keyring::Error::NoEntry) => Ok(()),
        Err(err) => Err(err.to_string()),
    }
}
