use chrono::Duration;
use serde::{Deserialize, Serialize};
use std::{
  env,
  fs,
  path::{Path, PathBuf},
};

use crate::error::{BracketError, BracketResult};
use crate::populate::PairingPolicy;

pub const CONFIG_PATH_VAR: &str = "TRIVIA_BRACKET_CONFIG";
pub const PAIRING_SEED_VAR: &str = "TRIVIA_BRACKET_PAIRING_SEED";
pub const CLAIM_TIMEOUT_VAR: &str = "TRIVIA_BRACKET_CLAIM_TIMEOUT_SECS";
pub const LOG_DIR_VAR: &str = "TRIVIA_BRACKET_LOG_DIR";

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct EngineConfig {
  pub pairing: PairingPolicy,
  /// Abandoned claims return to pending after this long. `None` keeps them forever.
  pub claim_timeout_secs: Option<u64>,
  pub log_dir: Option<String>,
  pub log_filter: String,
}

impl Default for EngineConfig {
  fn default() -> Self {
    EngineConfig {
      pairing: PairingPolicy::Seeded,
      claim_timeout_secs: None,
      log_dir: None,
      log_filter: "info".to_string(),
    }
  }
}

impl EngineConfig {
  pub fn claim_timeout(&self) -> Option<Duration> {
    self
      .claim_timeout_secs
      .and_then(|secs| i64::try_from(secs).ok())
      .map(Duration::seconds)
  }
}

pub fn env_default(key: &str) -> Option<String> {
  env::var(key)
    .ok()
    .map(|value| value.trim().to_string())
    .filter(|value| !value.is_empty())
}

pub fn config_path() -> Option<PathBuf> {
  env_default(CONFIG_PATH_VAR).map(PathBuf::from)
}

pub fn apply_env_defaults(mut config: EngineConfig) -> BracketResult<EngineConfig> {
  if let Some(value) = env_default(PAIRING_SEED_VAR) {
    let seed = value
      .parse::<u64>()
      .map_err(|e| BracketError::InvalidInput(format!("{PAIRING_SEED_VAR}={value}: {e}")))?;
    config.pairing = PairingPolicy::Shuffled { seed };
  }
  if let Some(value) = env_default(CLAIM_TIMEOUT_VAR) {
    let secs = value
      .parse::<u64>()
      .map_err(|e| BracketError::InvalidInput(format!("{CLAIM_TIMEOUT_VAR}={value}: {e}")))?;
    config.claim_timeout_secs = Some(secs);
  }
  if let Some(value) = env_default(LOG_DIR_VAR) {
    config.log_dir = Some(value);
  }
  Ok(config)
}

pub fn load_config_from(path: &Path) -> BracketResult<EngineConfig> {
  if !path.is_file() {
    return Ok(EngineConfig::default());
  }
  let data = fs::read_to_string(path)
    .map_err(|e| BracketError::InvalidInput(format!("read config {}: {e}", path.display())))?;
  serde_json::from_str::<EngineConfig>(&data)
    .map_err(|e| BracketError::InvalidInput(format!("parse config {}: {e}", path.display())))
}

pub fn load_config() -> BracketResult<EngineConfig> {
  let config = match config_path() {
    Some(path) => load_config_from(&path)?,
    None => EngineConfig::default(),
  };
  apply_env_defaults(config)
}

/// Loads `KEY=value` lines into the environment without overriding what is already set.
pub fn load_env_file(path: &Path) {
  let contents = match fs::read_to_string(path) {
    Ok(data) => data,
    Err(_) => return,
  };
  for line in contents.lines() {
    if let Some((key, value)) = parse_env_line(line) {
      if env::var_os(&key).is_none() {
        env::set_var(key, value);
      }
    }
  }
}

pub fn parse_env_line(line: &str) -> Option<(String, String)> {
  let trimmed = line.trim();
  if trimmed.is_empty() || trimmed.starts_with('#') {
    return None;
  }
  let trimmed = trimmed.strip_prefix("export ").unwrap_or(trimmed);
  let (key, raw_value) = trimmed.split_once('=')?;
  let key = key.trim();
  if key.is_empty() {
    return None;
  }
  let mut value = raw_value.trim();
  if value.starts_with('"') && value.ends_with('"') && value.len() >= 2 {
    value = &value[1..value.len() - 1];
  } else if value.starts_with('\'') && value.ends_with('\'') && value.len() >= 2 {
    value = &value[1..value.len() - 1];
  } else if let Some(idx) = value.find('#') {
    value = value[..idx].trim_end();
  }
  Some((key.to_string(), value.to_string()))
}

pub fn log_config_warnings(config: &EngineConfig) {
  let mut warnings = Vec::new();

  if config.claim_timeout_secs == Some(0) {
    warnings.push("claimTimeoutSecs is 0; every in-progress match will be released on the next sweep");
  }
  if matches!(config.pairing, PairingPolicy::Shuffled { .. }) {
    warnings.push("shuffled pairing is enabled; round-1 pairings ignore seed order below the top seed");
  }

  for msg in warnings {
    tracing::warn!("{}", msg);
  }
}
