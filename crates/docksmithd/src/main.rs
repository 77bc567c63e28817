use std::{net::SocketAddr, str::FromStr};

use anyhow::Context;
use tower_http::cors::{Any, CorsLayer};

use crate::config::config;

mod adapters;
mod config;
mod error;
mod handlers;
mod state;

async fn app() -> anyhow::Result<()> {
  dotenvy::dotenv().ok();
  let config = config();
  docksmith_logger::init(&config.logging)?;

  tracing::info!("docksmithd v{}", env!("CARGO_PKG_VERSION"));

  let app_state = state::AppState::build(config)?;
  app_state.checker.start();

  let router = handlers::router(app_state)
    .layer(CorsLayer::new().allow_origin(Any).allow_methods(Any).allow_headers(Any));

  let addr = format!("{}:{}", config.bind_ip, config.port);
  let socket_addr =
    SocketAddr::from_str(&addr).context("failed to parse listen address")?;
  let listener = tokio::net::TcpListener::bind(socket_addr)
    .await
    .context("failed to bind listen address")?;

  tracing::info!("docksmithd starting on http://{socket_addr}");
  axum::serve(listener, router).await.context("server exited")
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
  let mut term_signal =
    tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate())?;
  tokio::select! {
    res = tokio::spawn(app()) => res?,
    _ = term_signal.recv() => Ok(()),
  }
}
