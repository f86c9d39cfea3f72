use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

const APP_NAME: &str = "voucher-value";
const KEYCHAIN_SERVICE: &str = "voucher-value.session";

/// Keychain entry holding the backend session cookie value.
pub const SESSION_SECRET_KEY: &str = "session_token";
/// Overrides the stored session for one run.
pub const SESSION_ENV: &str = "VOUCHER_VALUE_SESSION";

pub const DEFAULT_IDENTITY_PROVIDER: &str = "https://auth.emergentagent.com/";
pub const DEFAULT_ORIGIN: &str = "http://localhost:3000";

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub provider: ProviderConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub polling: PollingConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    #[default]
    Mock,
    Http,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ProviderConfig {
    #[serde(default)]
    pub kind: ProviderKind,
    /// Backend root; `/api` is appended per call.
    pub base_url: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthConfig {
    #[serde(default = "default_identity_provider")]
    pub identity_provider_url: String,
    #[serde(default = "default_origin")]
    pub origin_url: String,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            identity_provider_url: default_identity_provider(),
            origin_url: default_origin(),
        }
    }
}

fn default_identity_provider() -> String {
    DEFAULT_IDENTITY_PROVIDER.to_string()
}

fn default_origin() -> String {
    DEFAULT_ORIGIN.to_string()
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct PollingConfig {
    #[serde(default = "default_interval_ms")]
    pub interval_ms: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

impl Default for PollingConfig {
    fn default() -> Self {
        Self {
            interval_ms: default_interval_ms(),
            max_attempts: default_max_attempts(),
        }
    }
}

fn default_interval_ms() -> u64 {
    2000
}

fn default_max_attempts() -> u32 {
    5
}

pub fn load() -> Result<AppConfig> {
    let cfg: AppConfig = confy::load(APP_NAME, None).context("Failed to load app config")?;
    Ok(cfg)
}

pub fn store(cfg: &AppConfig) -> Result<()> {
    confy::store(APP_NAME, None, cfg).context("Failed to store app config")?;
    Ok(())
}

/// Where the config file lives on this machine.
pub fn config_path() -> Result<std::path::PathBuf> {
    confy::get_configuration_file_path(APP_NAME, None).context("Failed to locate app config")
}

/// Store a secret in the OS keychain
pub fn store_secret(key: &str, value: &str) -> Result<()> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    entry.set_password(value)?;
    Ok(())
}

/// Retrieve a secret from the OS keychain
pub fn get_secret(key: &str) -> Result<String> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    let password = entry.get_password()?;
    Ok(password)
}

/// Delete a secret from the OS keychain
pub fn delete_secret(key: &str) -> Result<()> {
    let entry = keyring::Entry::new(KEYCHAIN_SERVICE, key)?;
    entry.delete_password()?;
    Ok(())
}

/// The saved session, from the environment first, then the keychain.
pub fn session_token() -> Option<String> {
    std::env::var(SESSION_ENV)
        .ok()
        .filter(|t| !t.trim().is_empty())
        .or_else(|| get_secret(SESSION_SECRET_KEY).ok())
}
