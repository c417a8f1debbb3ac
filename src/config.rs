#![forbid(unsafe_code)]

use anyhow::{Context, Result, anyhow};
use std::{
    collections::HashMap,
    env, fs,
    net::IpAddr,
    path::{Path, PathBuf},
    time::Duration,
};

use crate::media::RetentionPolicy;

pub const DEFAULT_ENV_PATH: &str = ".env";
pub const DEFAULT_PORT: u16 = 5000;
pub const DEFAULT_HOST: &str = "0.0.0.0";
pub const DEFAULT_YTDLP: &str = "yt-dlp";
/// Subdirectory of the system temp dir used when none is configured.
pub const DEFAULT_TEMP_SUBDIR: &str = "tubefetch";

/// Fully resolved settings for one server process.
#[derive(Debug, Clone)]
pub struct RuntimeSettings {
    pub host: IpAddr,
    pub port: u16,
    pub ytdlp: PathBuf,
    pub temp_dir: PathBuf,
    pub retention: RetentionPolicy,
    pub timeout: Option<Duration>,
}

/// Values given on the command line. They win over the environment and the
/// `.env` file.
#[derive(Debug, Clone, Default)]
pub struct RuntimeOverrides {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub ytdlp: Option<PathBuf>,
    pub temp_dir: Option<PathBuf>,
    pub retention: Option<String>,
    pub timeout_secs: Option<u64>,
    pub env_path: Option<PathBuf>,
}

pub fn resolve_runtime_settings(overrides: RuntimeOverrides) -> Result<RuntimeSettings> {
    let env_path = overrides
        .env_path
        .clone()
        .unwrap_or_else(|| PathBuf::from(DEFAULT_ENV_PATH));
    let file_vars = read_env_file(&env_path)?;
    build_runtime_settings_with_overrides(&file_vars, env_var_string, overrides)
}

#[cfg(test)]
fn build_runtime_settings(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
) -> Result<RuntimeSettings> {
    build_runtime_settings_with_overrides(file_vars, env_lookup, RuntimeOverrides::default())
}

fn build_runtime_settings_with_overrides(
    file_vars: &HashMap<String, String>,
    env_lookup: impl Fn(&str) -> Option<String>,
    overrides: RuntimeOverrides,
) -> Result<RuntimeSettings> {
    let host_raw = non_blank(overrides.host)
        .or_else(|| lookup_value("TUBEFETCH_HOST", file_vars, &env_lookup))
        .unwrap_or_else(|| DEFAULT_HOST.to_string());
    let host = host_raw
        .parse::<IpAddr>()
        .with_context(|| format!("expected a valid IPv4 or IPv6 address, got {host_raw:?}"))?;

    let port = match overrides.port {
        Some(port) => port,
        None => match lookup_value("TUBEFETCH_PORT", file_vars, &env_lookup) {
            Some(value) => value
                .parse::<u16>()
                .with_context(|| format!("TUBEFETCH_PORT must be a port number, got {value:?}"))?,
            None => DEFAULT_PORT,
        },
    };

    let ytdlp = overrides
        .ytdlp
        .or_else(|| lookup_value("TUBEFETCH_YTDLP", file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| PathBuf::from(DEFAULT_YTDLP));

    let temp_dir = overrides
        .temp_dir
        .or_else(|| lookup_value("TUBEFETCH_TEMP_DIR", file_vars, &env_lookup).map(PathBuf::from))
        .unwrap_or_else(|| env::temp_dir().join(DEFAULT_TEMP_SUBDIR));

    let retention = match non_blank(overrides.retention)
        .or_else(|| lookup_value("TUBEFETCH_RETENTION", file_vars, &env_lookup))
    {
        Some(value) => RetentionPolicy::parse(&value)
            .ok_or_else(|| anyhow!("unknown retention policy {value:?}; use delete or keep"))?,
        None => RetentionPolicy::Delete,
    };

    let timeout_secs = match overrides.timeout_secs {
        Some(secs) => Some(secs),
        None => lookup_value("TUBEFETCH_TIMEOUT_SECS", file_vars, &env_lookup)
            .map(|value| {
                value.parse::<u64>().with_context(|| {
                    format!("TUBEFETCH_TIMEOUT_SECS must be a whole number, got {value:?}")
                })
            })
            .transpose()?,
    };
    // Zero keeps the default of waiting for the tool indefinitely.
    let timeout = timeout_secs
        .filter(|secs| *secs > 0)
        .map(Duration::from_secs);

    Ok(RuntimeSettings {
        host,
        port,
        ytdlp,
        temp_dir,
        retention,
        timeout,
    })
}

fn non_blank(value: Option<String>) -> Option<String> {
    value.and_then(|value| {
        let trimmed = value.trim();
        if trimmed.is_empty() {
            None
        } else {
            Some(trimmed.to_string())
        }
    })
}

fn env_var_string(key: &str) -> Option<String> {
    non_blank(env::var(key).ok())
}

fn lookup_value(
    key: &str,
    file_vars: &HashMap<String, String>,
    env_lookup: &impl Fn(&str) -> Option<String>,
) -> Option<String> {
    env_lookup(key).or_else(|| non_blank(file_vars.get(key).cloned()))
}

pub fn read_env_file(path: &Path) -> Result<HashMap<String, String>> {
    let mut vars = HashMap::new();
    if !path.exists() {
        return Ok(vars);
    }
    let content =
        fs::read_to_string(path).with_context(|| format!("Reading {}", path.display()))?;
    for line in content.lines() {
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }
        let line = trimmed.strip_prefix("export ").unwrap_or(trimmed);
        let Some((key, value_raw)) = line.split_once('=') else {
            continue;
        };
        let key = key.trim();
        if key.is_empty() {
            continue;
        }
        let value = value_raw.trim();
        let value = value
            .strip_prefix('"')
            .and_then(|value| value.strip_suffix('"'))
            .or_else(|| {
                value
                    .strip_prefix('\'')
                    .and_then(|value| value.strip_suffix('\''))
            })
            .unwrap_or(value);
        vars.insert(key.to_string(), value.to_string());
    }
    Ok(vars)
}
