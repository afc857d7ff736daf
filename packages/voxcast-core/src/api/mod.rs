//! HTTP API layer.
//!
//! This module contains thin handlers that delegate to services.
//! It provides the router construction and server startup functionality.

use std::collections::HashMap;
use std::sync::Arc;

use thiserror::Error;

use crate::bootstrap::BootstrappedServices;
use crate::cache::CacheService;
use crate::config::Config;
use crate::preset::Preset;
use crate::services::{GenerationService, StreamService};

pub mod http;
pub mod response;

/// Errors that can occur when starting or running the server.
#[derive(Debug, Error)]
pub enum ServerError {
    /// Failed to bind to a TCP port.
    #[error("Failed to bind to port: {0}")]
    Bind(#[from] std::io::Error),
}

/// Shared application state for the API layer.
///
/// This is a thin wrapper that holds references to services.
/// All business logic lives in the services themselves.
#[derive(Clone)]
pub struct AppState {
    /// Resolved application configuration.
    pub config: Arc<Config>,
    /// Loaded preset table, keyed by preset id.
    pub presets: Arc<HashMap<String, Preset>>,
    /// Drives `/api/generate`.
    pub generation: Arc<GenerationService>,
    /// Drives `/api/stream/*`.
    pub stream: Arc<StreamService>,
    /// Used by `/api/stream/status`'s cache-stats-free variant and future
    /// diagnostic endpoints.
    pub cache: Arc<CacheService>,
}

/// Builder for constructing an `AppState`.
#[derive(Default)]
pub struct AppStateBuilder {
    config: Option<Arc<Config>>,
    presets: Option<Arc<HashMap<String, Preset>>>,
    generation: Option<Arc<GenerationService>>,
    stream: Option<Arc<StreamService>>,
    cache: Option<Arc<CacheService>>,
}

impl AppStateBuilder {
    /// Creates a new builder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Populates all fields from a `BootstrappedServices` container.
    pub fn from_services(mut self, services: &BootstrappedServices) -> Self {
        self.config = Some(Arc::clone(&services.config));
        self.presets = Some(Arc::clone(&services.presets));
        self.generation = Some(Arc::clone(&services.generation));
        self.stream = Some(Arc::clone(&services.stream));
        self.cache = Some(Arc::clone(&services.cache));
        self
    }

    /// Builds the `AppState`, panicking if required fields are missing.
    pub fn build(self) -> AppState {
        AppState {
            config: self.config.expect("config is required"),
            presets: self.presets.expect("presets is required"),
            generation: self.generation.expect("generation is required"),
            stream: self.stream.expect("stream is required"),
            cache: self.cache.expect("cache is required"),
        }
    }
}

impl AppState {
    /// Creates a new builder for constructing an `AppState`.
    pub fn builder() -> AppStateBuilder {
        AppStateBuilder::new()
    }
}

/// Starts the HTTP server on the configured port.
pub async fn start_server(state: AppState) -> Result<(), ServerError> {
    let addr = std::net::SocketAddr::from(([0, 0, 0, 0], state.config.bind_port));
    let listener = tokio::net::TcpListener::bind(&addr).await?;

    log::info!("Server listening on http://0.0.0.0:{}", state.config.bind_port);
    let app = http::create_router(state);

    axum::serve(listener, app.into_make_service()).await?;
    Ok(())
}
