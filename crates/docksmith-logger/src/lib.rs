//! Structured logging init, following the same config-driven
//! `tracing_subscriber` setup the rest of the ambient stack uses.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use tracing_subscriber::{
  EnvFilter, Registry, layer::SubscriberExt, util::SubscriberInitExt,
};

#[derive(
  Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default,
)]
#[serde(rename_all = "lowercase")]
pub enum StdioLogMode {
  #[default]
  Standard,
  Json,
  None,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
  pub level: String,
  pub stdio: StdioLogMode,
  pub pretty: bool,
}

impl Default for LogConfig {
  fn default() -> Self {
    LogConfig {
      level: "info".to_string(),
      stdio: StdioLogMode::default(),
      pretty: false,
    }
  }
}

pub fn init(config: &LogConfig) -> anyhow::Result<()> {
  let filter = EnvFilter::try_new(&config.level)
    .unwrap_or_else(|_| EnvFilter::new("info"));
  let registry = Registry::default().with(filter);

  match (config.stdio, config.pretty) {
    (StdioLogMode::Standard, true) => registry
      .with(
        tracing_subscriber::fmt::layer()
          .pretty()
          .with_file(false)
          .with_line_number(false),
      )
      .try_init(),
    (StdioLogMode::Standard, false) => registry
      .with(
        tracing_subscriber::fmt::layer()
          .with_file(false)
          .with_line_number(false),
      )
      .try_init(),
    (StdioLogMode::Json, _) => {
      registry.with(tracing_subscriber::fmt::layer().json()).try_init()
    }
    (StdioLogMode::None, _) => Ok(()),
  }
  .context("failed to init logger")
}
