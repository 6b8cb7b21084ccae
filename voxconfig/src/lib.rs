//! # VoxMusic Configuration Module
//!
//! This module provides configuration management for VoxMusic, including:
//! - Loading configuration from YAML files
//! - Merging with embedded default configuration
//! - Type-safe getters and setters for configuration values
//! - Thread-safe singleton access pattern
//!
//! ## Usage
//!
//! ```no_run
//! use voxconfig::get_config;
//!
//! let config = get_config();
//! let max_queue = config.get_max_queue_size()?;
//! let cache_dir = config.get_cache_dir()?;
//! # Ok::<(), anyhow::Error>(())
//! ```

use anyhow::{anyhow, Result};
use dirs::home_dir;
use lazy_static::lazy_static;
use serde_yaml::{Mapping, Number, Value};
use std::{
    env, fs,
    path::{Path, PathBuf},
    sync::Mutex,
};
use tracing::info;

// Embedded default configuration
const DEFAULT_CONFIG: &str = include_str!("voxmusic.yaml");

const ENV_CONFIG_DIR: &str = "VOXMUSIC_CONFIG";
const CONFIG_FILE: &str = "voxmusic.yaml";

lazy_static! {
    static ref CONFIG: Config =
        Config::load_config("").expect("Failed to load VoxMusic configuration");
}

/// Returns the global configuration singleton.
pub fn get_config() -> &'static Config {
    &CONFIG
}

/// Macro to generate getter/setter for usize values with default
macro_rules! impl_usize_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<usize> {
            match self.get_value($path)? {
                Some(Value::Number(n)) if n.is_i64() => Ok(n.as_i64().unwrap() as usize),
                Some(Value::Number(n)) if n.is_u64() => Ok(n.as_u64().unwrap() as usize),
                _ => Ok($default),
            }
        }

        pub fn $setter(&self, size: usize) -> Result<()> {
            let n = Number::from(size as u64);
            self.set_value($path, Value::Number(n))
        }
    };
}

/// Macro to generate getter/setter for string values with default
macro_rules! impl_string_config {
    ($getter:ident, $setter:ident, $path:expr, $default:expr) => {
        pub fn $getter(&self) -> Result<String> {
            match self.get_value($path)? {
                Some(Value::String(s)) => Ok(s),
                _ => Ok($default.to_string()),
            }
        }

        pub fn $setter(&self, value: &str) -> Result<()> {
            self.set_value($path, Value::String(value.to_string()))
        }
    };
}

/// Configuration manager for VoxMusic
///
/// Holds the merged YAML tree (defaults + user file) behind a mutex and
/// exposes typed getters/setters addressed by dotted paths
/// (e.g. `"player.max_queue_size"`).
#[derive(Debug)]
pub struct Config {
    config_dir: String,
    path: String,
    data: Mutex<Value>,
}

impl Clone for Config {
    fn clone(&self) -> Self {
        let data = self.data.lock().unwrap().clone();
        Self {
            config_dir: self.config_dir.clone(),
            path: self.path.clone(),
            data: Mutex::new(data),
        }
    }
}

impl Config {
    /// Finds a config directory by trying different locations in order
    fn find_config_dir(directory: &str) -> String {
        // 1. Provided directory
        if !directory.is_empty() {
            return directory.to_string();
        }

        // 2. Environment variable
        if let Ok(env_path) = env::var(ENV_CONFIG_DIR) {
            info!(env_var = ENV_CONFIG_DIR, path = %env_path, "Loading config dir from env");
            return env_path;
        }

        // 3. Current directory
        if Path::new(".voxmusic").exists() {
            return ".voxmusic".to_string();
        }

        // 4. Home directory
        if let Some(home) = home_dir() {
            return home.join(".voxmusic").to_string_lossy().into_owned();
        }

        ".voxmusic".to_string()
    }

    /// Loads the configuration from `directory` (or the default lookup chain
    /// when empty), merging the user file over the embedded defaults.
    pub fn load_config(directory: &str) -> Result<Config> {
        let config_dir = Self::find_config_dir(directory);
        let path = Path::new(&config_dir).join(CONFIG_FILE);

        let mut data: Value = serde_yaml::from_str(DEFAULT_CONFIG)?;

        if path.exists() {
            let raw = fs::read_to_string(&path)?;
            let user: Value = serde_yaml::from_str(&raw)?;
            merge_values(&mut data, &user);
            info!(path = %path.display(), "Loaded user configuration");
        }

        Ok(Config {
            config_dir,
            path: path.to_string_lossy().into_owned(),
            data: Mutex::new(data),
        })
    }

    /// Directory holding the configuration (and default cache location).
    pub fn config_dir(&self) -> &str {
        &self.config_dir
    }

    /// Returns the value at a dotted path, or `None` if absent.
    pub fn get_value(&self, path: &str) -> Result<Option<Value>> {
        let data = self.data.lock().unwrap();
        let mut node = &*data;
        for key in path.split('.') {
            match node.get(key) {
                Some(next) => node = next,
                None => return Ok(None),
            }
        }
        Ok(Some(node.clone()))
    }

    /// Sets the value at a dotted path, creating intermediate mappings as
    /// needed, and persists the whole tree to the config file.
    pub fn set_value(&self, path: &str, value: Value) -> Result<()> {
        {
            let mut data = self.data.lock().unwrap();
            let keys: Vec<&str> = path.split('.').collect();
            let mut node = &mut *data;

            for key in &keys[..keys.len() - 1] {
                if !node.is_mapping() {
                    *node = Value::Mapping(Mapping::new());
                }
                let map = node.as_mapping_mut().unwrap();
                let entry = Value::String(key.to_string());
                if !map.contains_key(&entry) {
                    map.insert(entry.clone(), Value::Mapping(Mapping::new()));
                }
                node = map.get_mut(&entry).unwrap();
            }

            let last = Value::String(keys[keys.len() - 1].to_string());
            if !node.is_mapping() {
                *node = Value::Mapping(Mapping::new());
            }
            node.as_mapping_mut().unwrap().insert(last, value);
        }

        self.save()
    }

    /// Writes the current configuration tree back to disk.
    pub fn save(&self) -> Result<()> {
        let data = self.data.lock().unwrap();
        let parent = Path::new(&self.path)
            .parent()
            .ok_or_else(|| anyhow!("Config path {} has no parent directory", self.path))?;
        fs::create_dir_all(parent)?;
        fs::write(&self.path, serde_yaml::to_string(&*data)?)?;
        Ok(())
    }

    // Player limits
    impl_usize_config!(get_max_queue_size, set_max_queue_size, "player.max_queue_size", 50);
    impl_usize_config!(get_max_duration_secs, set_max_duration_secs, "player.max_duration", 3600);
    impl_usize_config!(get_auto_leave_secs, set_auto_leave_secs, "player.auto_leave_secs", 180);
    impl_usize_config!(
        get_reaper_interval_secs,
        set_reaper_interval_secs,
        "player.reaper_interval_secs",
        60
    );
    impl_string_config!(get_ffplay_bin, set_ffplay_bin, "player.ffplay_bin", "ffplay");

    // Cache
    impl_usize_config!(get_cache_limit, set_cache_limit, "cache.limit", 500);
    impl_usize_config!(get_cache_ttl_secs, set_cache_ttl_secs, "cache.ttl_secs", 3600);
    impl_usize_config!(
        get_janitor_interval_secs,
        set_janitor_interval_secs,
        "cache.janitor_interval_secs",
        1800
    );

    // Resolver
    impl_string_config!(get_yt_dlp_bin, set_yt_dlp_bin, "resolver.yt_dlp_bin", "yt-dlp");

    /// Returns the media cache directory, creating it if necessary.
    ///
    /// Defaults to `<config dir>/downloads` when `cache.dir` is unset.
    pub fn get_cache_dir(&self) -> Result<PathBuf> {
        let dir = match self.get_value("cache.dir")? {
            Some(Value::String(s)) if !s.is_empty() => PathBuf::from(s),
            _ => Path::new(&self.config_dir).join("downloads"),
        };
        fs::create_dir_all(&dir)?;
        Ok(dir)
    }
}

/// Recursively merges `overlay` into `base` (mappings merge key by key,
/// anything else replaces the base value).
fn merge_values(base: &mut Value, overlay: &Value) {
    match (base, overlay) {
        (Value::Mapping(base_map), Value::Mapping(overlay_map)) => {
            for (key, value) in overlay_map {
                match base_map.get_mut(key) {
                    Some(existing) => merge_values(existing, value),
                    None => {
                        base_map.insert(key.clone(), value.clone());
                    }
                }
            }
        }
        (base_slot, overlay_value) => {
            *base_slot = overlay_value.clone();
        }
    }
}
