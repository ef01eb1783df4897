use config::{Config, ConfigError, Environment, File};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::network::RetryPolicy;

pub const DEFAULT_ENDPOINT: &str = "https://dog-emotion-detector-api.onrender.com/predict";

/// Contents of the bundled `pawmood.toml`, used to seed the user config.
const BLUEPRINT: &str = include_str!("../pawmood.toml");

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct Settings {
    pub endpoint: String,
    pub max_attempts: u32,
    pub initial_delay_ms: u64,
    pub request_timeout_secs: Option<u64>,
    pub log_file: Option<String>,
}

impl Settings {
    pub fn new() -> Result<Self, ConfigError> {
        Self::load(get_user_config_path().as_deref(), Environment::with_prefix("PAWMOOD"))
    }

    fn load(user_config_path: Option<&Path>, env: Environment) -> Result<Self, ConfigError> {
        let mut builder = Config::builder()
            .set_default("endpoint", DEFAULT_ENDPOINT)?
            .set_default("max_attempts", 3)?
            .set_default("initial_delay_ms", 1000)?;
        if let Some(path) = user_config_path {
            builder = builder.add_source(File::from(path).required(false));
        }
        let s = builder
            // Local pawmood.toml from CWD. Optional override.
            .add_source(File::with_name("pawmood.toml").required(false))
            .add_source(env.try_parsing(true))
            .build()?;

        s.try_deserialize()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts.max(1),
            initial_delay: Duration::from_millis(self.initial_delay_ms),
        }
    }

    pub fn request_timeout(&self) -> Option<Duration> {
        self.request_timeout_secs.filter(|s| *s > 0).map(Duration::from_secs)
    }

    pub fn log_path(&self) -> Option<PathBuf> {
        match &self.log_file {
            Some(raw) => shellexpand::full(raw).ok().map(|p| PathBuf::from(p.as_ref())),
            None => config_dir().map(|dir| dir.join("pawmood.log")),
        }
    }
}

fn config_dir() -> Option<PathBuf> {
    let mut path = dirs::home_dir()?;
    path.push(".config");
    path.push("pawmood");
    Some(path)
}

pub fn get_user_config_path() -> Option<PathBuf> {
    config_dir().map(|dir| dir.join("pawmood.toml"))
}

/// Writes the blueprint to the user config path if nothing is there yet.
/// Returns the path when a file was written.
pub fn seed_user_config() -> io::Result<Option<PathBuf>> {
    match get_user_config_path() {
        Some(path) => seed_user_config_at(&path).map(|written| written.then_some(path)),
        None => Ok(None),
    }
}

fn seed_user_config_at(path: &Path) -> io::Result<bool> {
    if path.exists() {
        return Ok(false);
    }
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, BLUEPRINT)?;
    Ok(true)
}

pub fn save_endpoint(endpoint: &str) -> Result<(), anyhow::Error> {
    let user_config_path =
        get_user_config_path().ok_or_else(|| anyhow::anyhow!("Failed to get home directory"))?;
    save_endpoint_to(&user_config_path, endpoint)
}

fn save_endpoint_to(path: &Path, endpoint: &str) -> Result<(), anyhow::Error> {
    let config_str = fs::read_to_string(path).unwrap_or_else(|_| "".to_string());
    let mut doc = config_str.parse::<toml::Table>()?;

    doc.insert("endpoint".to_string(), toml::Value::String(endpoint.to_string()));

    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    fs::write(path, doc.to_string())?;

    Ok(())
}
