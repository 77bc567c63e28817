//! Typed process configuration loaded once from the environment, the
//! same `envy` + `OnceLock` shape the teacher uses in `config.rs`,
//! trimmed down since the outer HTTP surface's own env loading is out
//! of scope here.

use std::sync::OnceLock;

use docksmith_logger::LogConfig;
use serde::Deserialize;

#[derive(Debug, Clone, Deserialize)]
pub struct Env {
  #[serde(default = "default_bind_ip")]
  pub docksmith_bind_ip: String,
  #[serde(default = "default_port")]
  pub docksmith_port: u16,
  #[serde(default = "default_check_interval_secs")]
  pub docksmith_check_interval_secs: u64,
  #[serde(default = "default_worker_limit")]
  pub docksmith_worker_limit: usize,
  #[serde(default = "default_registry_base_url")]
  pub docksmith_registry_base_url: String,
  #[serde(default = "default_registry_ttl_secs")]
  pub docksmith_registry_ttl_secs: u64,
  #[serde(default = "default_log_level")]
  pub docksmith_logging_level: String,
}

fn default_bind_ip() -> String {
  "0.0.0.0".to_string()
}
fn default_port() -> u16 {
  8120
}
fn default_check_interval_secs() -> u64 {
  300
}
fn default_worker_limit() -> usize {
  8
}
fn default_registry_base_url() -> String {
  "https://registry-1.docker.io".to_string()
}
fn default_registry_ttl_secs() -> u64 {
  3600
}
fn default_log_level() -> String {
  "info".to_string()
}

#[derive(Debug, Clone)]
pub struct Config {
  pub bind_ip: String,
  pub port: u16,
  pub check_interval_secs: u64,
  pub worker_limit: usize,
  pub registry_base_url: String,
  pub registry_ttl_secs: u64,
  pub logging: LogConfig,
}

pub fn config() -> &'static Config {
  static CONFIG: OnceLock<Config> = OnceLock::new();
  CONFIG.get_or_init(|| {
    let env: Env = match envy::from_env() {
      Ok(env) => env,
      Err(e) => panic!("failed to parse docksmithd environment: {e:?}"),
    };
    Config {
      bind_ip: env.docksmith_bind_ip,
      port: env.docksmith_port,
      check_interval_secs: env.docksmith_check_interval_secs,
      worker_limit: env.docksmith_worker_limit,
      registry_base_url: env.docksmith_registry_base_url,
      registry_ttl_secs: env.docksmith_registry_ttl_secs,
      logging: LogConfig {
        level: env.docksmith_logging_level,
        ..Default::default()
      },
    }
  })
}
