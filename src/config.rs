use std::path::{Path, PathBuf};

use able_vm::RuntimeConfig;
use log::{debug, info};

/// `<config_dir>/able/config.json`
pub fn default_config_path() -> Option<PathBuf> {
    dirs::config_dir().map(|mut path| {
        path.push("able");
        path.push("config.json");
        path
    })
}

/// Loads the runtime configuration.
///
/// An explicit path must exist. The default path is optional: when it is
/// missing the built-in defaults are used.
pub fn load_config(explicit: Option<&Path>) -> Result<RuntimeConfig, String> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => match default_config_path() {
            Some(path) if path.exists() => path,
            _ => {
                debug!("no config file found, using defaults");
                return Ok(RuntimeConfig::default());
            }
        },
    };
    let text = std::fs::read_to_string(&path)
        .map_err(|e| format!("Failed to read config file {}: {e}", path.display()))?;
    let config: RuntimeConfig = serde_json::from_str(&text)
        .map_err(|e| format!("Invalid config file {}: {e}", path.display()))?;
    info!("loaded config from {}", path.display());
    Ok(config)
}

/// 命令行参数覆盖配置文件
#[derive(Debug, Default, Clone, Copy)]
pub struct Overrides {
    pub time_slice: Option<usize>,
    pub flush_limit: Option<usize>,
}

impl Overrides {
    pub fn apply(self, mut config: RuntimeConfig) -> RuntimeConfig {
        if let Some(time_slice) = self.time_slice {
            config = config.with_time_slice(time_slice);
        }
        if let Some(limit) = self.flush_limit {
            config = config.with_flush_limit(Some(limit));
        }
        config
    }
}
