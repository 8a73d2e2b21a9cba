// Copyright (c) 2024-2025 Jesse Morgan / Morgan Forge
// SPDX-License-Identifier: AGPL-3.0-or-later

//! User configuration stored in `~/.cinefetch/config.json`.

use std::fs;
use std::path::{Path, PathBuf};

use anyhow::{bail, Context, Result};
use serde::{Deserialize, Serialize};

use crate::catalog::yts::DEFAULT_YTS_URL;
use crate::download::{
    CoordinatorOptions, DriverKind, FileSaver, FileStore, PausePolicy, ResumePolicy, SimulationSettings,
};

/// Name of the config file inside the config directory.
pub const CONFIG_FILE: &str = "config.json";

/// Keys accepted by [`Config::set`].
pub const SETTABLE_KEYS: &[&str] = &[
    "catalog_url",
    "catalog_file",
    "download_dir",
    "state_dir",
    "driver",
    "pause_policy",
    "resume_policy",
    "stale_timeout_secs",
];

#[derive(Debug, Serialize, Deserialize, Clone, PartialEq)]
pub struct Config {
    /// Base URL of the catalog API
    #[serde(default = "default_catalog_url")]
    pub catalog_url: String,
    /// Local JSON catalog used instead of the API when set
    #[serde(default)]
    pub catalog_file: Option<PathBuf>,
    /// Where finished downloads are written (default: the user's download dir)
    #[serde(default)]
    pub download_dir: Option<PathBuf>,
    /// Where the completed record lives (default: ~/.cinefetch/state)
    #[serde(default)]
    pub state_dir: Option<PathBuf>,
    #[serde(default)]
    pub driver: DriverKind,
    #[serde(default)]
    pub pause_policy: PausePolicy,
    #[serde(default)]
    pub resume_policy: ResumePolicy,
    /// Fail transfers that stay silent this long (default: never)
    #[serde(default)]
    pub stale_timeout_secs: Option<u64>,
    #[serde(default)]
    pub simulation: SimulationSettings,
}

fn default_catalog_url() -> String {
    DEFAULT_YTS_URL.to_string()
}

impl Default for Config {
    fn default() -> Self {
        Self {
            catalog_url: default_catalog_url(),
            catalog_file: None,
            download_dir: None,
            state_dir: None,
            driver: DriverKind::default(),
            pause_policy: PausePolicy::default(),
            resume_policy: ResumePolicy::default(),
            stale_timeout_secs: None,
            simulation: SimulationSettings::default(),
        }
    }
}

impl Config {
    pub fn download_dir(&self) -> PathBuf {
        self.download_dir.clone().unwrap_or_else(FileSaver::default_dir)
    }

    pub fn state_dir(&self) -> PathBuf {
        self.state_dir.clone().unwrap_or_else(FileStore::default_dir)
    }

    /// Staging area for in-flight fetches.
    pub fn staging_dir(&self) -> PathBuf {
        self.state_dir().join("partial")
    }

    pub fn coordinator_options(&self) -> CoordinatorOptions {
        CoordinatorOptions {
            pause_policy: self.pause_policy,
            resume_policy: self.resume_policy,
            stale_timeout: self.stale_timeout_secs.filter(|secs| *secs > 0).and_then(|secs| {
                let timeout = stale_timeout(secs);
                if timeout.is_none() {
                    tracing::warn!("Ignoring out-of-range stale_timeout_secs {}", secs);
                }
                timeout
            }),
        }
    }

    /// Set a single key from its string form. `none` clears optional keys.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        let cleared = value.eq_ignore_ascii_case("none") || value.is_empty();
        let path = || if cleared { None } else { Some(PathBuf::from(value)) };

        match key {
            "catalog_url" => {
                if cleared {
                    self.catalog_url = default_catalog_url();
                } else {
                    reqwest::Url::parse(value).with_context(|| format!("Invalid catalog URL: {}", value))?;
                    self.catalog_url = value.trim_end_matches('/').to_string();
                }
            }
            "catalog_file" => self.catalog_file = path(),
            "download_dir" => self.download_dir = path(),
            "state_dir" => self.state_dir = path(),
            "driver" => self.driver = value.parse().map_err(anyhow::Error::msg)?,
            "pause_policy" => self.pause_policy = parse_keyword(key, value)?,
            "resume_policy" => self.resume_policy = parse_keyword(key, value)?,
            "stale_timeout_secs" => {
                self.stale_timeout_secs = if cleared {
                    None
                } else {
                    let secs: u64 = value.parse().with_context(|| format!("Invalid number of seconds: {}", value))?;
                    if stale_timeout(secs).is_none() {
                        bail!("Stale timeout of {} seconds is out of range", secs);
                    }
                    Some(secs)
                }
            }
            other => bail!("Unknown config key '{}'. Valid keys: {}", other, SETTABLE_KEYS.join(", ")),
        }
        Ok(())
    }
}

/// `secs` as a timeout, or `None` when chrono cannot represent it.
fn stale_timeout(secs: u64) -> Option<chrono::Duration> {
    i64::try_from(secs).ok().and_then(chrono::Duration::try_seconds)
}

/// Parse a snake_case enum keyword the same way the config file does.
fn parse_keyword<T: serde::de::DeserializeOwned>(key: &str, value: &str) -> Result<T> {
    serde_json::from_value(serde_json::Value::String(value.to_string()))
        .with_context(|| format!("Invalid value '{}' for {}", value, key))
}

pub fn get_config_dir() -> Result<PathBuf> {
    let home = dirs::home_dir().context("Could not find home directory")?;
    let config_dir = home.join(".cinefetch");
    if !config_dir.exists() {
        fs::create_dir_all(&config_dir)?;
    }
    Ok(config_dir)
}

pub fn load_config() -> Result<Config> {
    load_config_from(&get_config_dir()?)
}

pub fn save_config(config: &Config) -> Result<()> {
    save_config_to(&get_config_dir()?, config)
}

pub fn load_config_from(dir: &Path) -> Result<Config> {
    let config_path = dir.join(CONFIG_FILE);
    if !config_path.exists() {
        return Ok(Config::default());
    }

    let content = fs::read_to_string(&config_path)
        .with_context(|| format!("Failed to read config: {:?}", config_path))?;
    serde_json::from_str(&content).with_context(|| format!("Failed to parse config: {:?}", config_path))
}

pub fn save_config_to(dir: &Path, config: &Config) -> Result<()> {
    fs::create_dir_all(dir)?;
    let content = serde_json::to_string_pretty(config)?;
    fs::write(dir.join(CONFIG_FILE), content)?;
    Ok(())
}
