/* src/config.rs */

use crate::zone::ZoneOptions;
use fancy_log::{LogLevel, log};
use serde::Deserialize;
use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

const DEFAULT_CONFIG_TEMPLATE: &str = r#"
# Directory scanned for zone files. Each file is named <origin>.json,
# e.g. example.com.json serves example.com.
zones_dir = "~/lazy-geodns/zones"

# Address for the UDP and TCP listeners. BIND_PORT overrides the port.
listen = "0.0.0.0:53"

# Seconds between scans of zones_dir.
reload_interval = 2

# Defaults for zones that don't set their own.
default_ttl = 120
default_max_hosts = 2
"#;

#[derive(Debug, Deserialize)]
#[serde(default)]
pub struct AppConfig {
    pub zones_dir: PathBuf,
    pub listen: String,
    pub reload_interval: u64,
    pub default_ttl: u32,
    pub default_max_hosts: usize,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            zones_dir: home_dir().join("lazy-geodns").join("zones"),
            listen: "0.0.0.0:53".to_string(),
            reload_interval: 2,
            default_ttl: 120,
            default_max_hosts: 2,
        }
    }
}

impl AppConfig {
    /// Loads the config file named by `CONFIG_PATH` (default
    /// `~/lazy-geodns/config.toml`, created from a template when missing),
    /// then applies `ZONES_DIR` and `BIND_PORT` from the environment.
    pub fn load_from_env() -> Result<Self, Box<dyn std::error::Error>> {
        let config_path = env::var("CONFIG_PATH")
            .ok()
            .filter(|s| !s.is_empty())
            .map(PathBuf::from)
            .unwrap_or_else(|| home_dir().join("lazy-geodns").join("config.toml"));

        let mut config = Self::load_or_create_default(&config_path)?;

        if let Some(dir) = env::var("ZONES_DIR").ok().filter(|s| !s.is_empty()) {
            config.zones_dir = PathBuf::from(dir);
        }
        if let Some(port) = env::var("BIND_PORT").ok().filter(|s| !s.is_empty()) {
            config.listen = with_port(&config.listen, &port);
        }
        config.zones_dir = expand_home(&config.zones_dir);

        if !config.zones_dir.exists() {
            log(
                LogLevel::Warn,
                &format!(
                    "Zones directory not found. Creating {:?}",
                    config.zones_dir
                ),
            );
            fs::create_dir_all(&config.zones_dir)?;
        }

        Ok(config)
    }

    pub fn load_or_create_default(config_path: &Path) -> Result<Self, Box<dyn std::error::Error>> {
        if !config_path.exists() {
            log(
                LogLevel::Warn,
                &format!(
                    "Config file not found. Creating default at {:?}",
                    config_path
                ),
            );
            if let Some(parent_dir) = config_path.parent() {
                fs::create_dir_all(parent_dir)?;
            }
            fs::write(config_path, DEFAULT_CONFIG_TEMPLATE)?;
        }

        log(
            LogLevel::Info,
            &format!("Loading config from {:?}", config_path),
        );
        let config_str = fs::read_to_string(config_path)?;
        let config: AppConfig = toml::from_str(&config_str)?;

        if config.reload_interval == 0 {
            return Err("reload_interval must be at least 1 second".into());
        }

        Ok(config)
    }

    pub fn reload_period(&self) -> Duration {
        Duration::from_secs(self.reload_interval)
    }

    /// Zone settings used where a zone file leaves them out.
    pub fn zone_defaults(&self) -> ZoneOptions {
        ZoneOptions {
            ttl: self.default_ttl,
            max_hosts: self.default_max_hosts,
            ..ZoneOptions::default()
        }
    }
}

fn home_dir() -> PathBuf {
    dirs::home_dir().unwrap_or_else(|| PathBuf::from("."))
}

fn expand_home(path: &Path) -> PathBuf {
    match path.strip_prefix("~") {
        Ok(rest) => home_dir().join(rest),
        Err(_) => path.to_path_buf(),
    }
}

/// `listen` with its port replaced.
fn with_port(listen: &str, port: &str) -> String {
    match listen.rsplit_once(':') {
        Some((host, _)) => format!("{}:{}", host, port),
        None => format!("{}:{}", listen, port),
    }
}
