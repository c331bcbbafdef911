//! Listener configuration and serve loop.

use std::net::{IpAddr, SocketAddr};

use axum::Router;
use thiserror::Error;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum ServerConfigError {
    #[error("invalid value for {var}: {value:?}")]
    Invalid { var: &'static str, value: String },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ServerConfig {
    pub addr: SocketAddr,
}

impl ServerConfig {
    /// `BIND_ADDR` (default `0.0.0.0`) and `PORT` (default `3000`).
    pub fn from_env() -> Result<Self, ServerConfigError> {
        Self::from_lookup(|name| std::env::var(name).ok())
    }

    pub fn from_lookup<F>(lookup: F) -> Result<Self, ServerConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        let ip: IpAddr = match lookup("BIND_ADDR") {
            None => IpAddr::from([0, 0, 0, 0]),
            Some(raw) => raw.trim().parse().map_err(|_| ServerConfigError::Invalid {
                var: "BIND_ADDR",
                value: raw.clone(),
            })?,
        };
        let port: u16 = match lookup("PORT") {
            None => 3000,
            Some(raw) => raw.trim().parse().map_err(|_| ServerConfigError::Invalid {
                var: "PORT",
                value: raw.clone(),
            })?,
        };
        Ok(Self {
            addr: SocketAddr::new(ip, port),
        })
    }
}

/// Bind and serve until the process is stopped.
pub async fn serve(config: ServerConfig, app: Router) -> std::io::Result<()> {
    let listener = tokio::net::TcpListener::bind(config.addr).await?;
    tracing::info!("listening on {}", listener.local_addr()?);
    axum::serve(listener, app).await
}
