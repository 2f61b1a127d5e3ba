//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Wrap the application router with the admission gate
//! - Wire up middleware (request id, tracing, timeout)
//! - Serve with peer addresses available to the gate
//! - Shut down gracefully on the shutdown broadcast

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use axum::{http::HeaderName, middleware, routing::get, Router};
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower::ServiceBuilder;
use tower_http::{
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::GateConfig;
use crate::security::{rate_limit_middleware, AdmissionGate};

pub const X_REQUEST_ID: &str = "x-request-id";

/// Routes this service answers itself. Webhook delivery routes are merged
/// in by the embedding application.
pub fn app_routes() -> Router {
    Router::new().route("/ping", get(ping))
}

async fn ping() -> &'static str {
    "pong"
}

/// HTTP server fronted by the admission gate.
pub struct HttpServer {
    router: Router,
    config: GateConfig,
}

impl HttpServer {
    /// Create a server for `app`.
    ///
    /// With `gate == None` every request passes straight through.
    pub fn new(config: GateConfig, gate: Option<Arc<AdmissionGate>>, app: Router) -> Self {
        let router = Self::build_router(&config, gate, app);
        Self { router, config }
    }

    /// Build the Axum router with all middleware layers.
    #[allow(deprecated)]
    fn build_router(config: &GateConfig, gate: Option<Arc<AdmissionGate>>, app: Router) -> Router {
        let app = match gate {
            Some(gate) => app.layer(middleware::from_fn_with_state(gate, rate_limit_middleware)),
            None => app,
        };

        let request_id = HeaderName::from_static(X_REQUEST_ID);
        app.layer(
            ServiceBuilder::new()
                .layer(SetRequestIdLayer::new(request_id.clone(), MakeRequestUuid))
                .layer(TraceLayer::new_for_http())
                .layer(PropagateRequestIdLayer::new(request_id))
                .layer(TimeoutLayer::new(Duration::from_secs(
                    config.listener.request_timeout_secs,
                ))),
        )
    }

    /// Run the server until `shutdown` fires.
    pub async fn run(
        self,
        listener: TcpListener,
        mut shutdown: broadcast::Receiver<()>,
    ) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(address = %addr, "HTTP server starting");

        let app = self.router.into_make_service_with_connect_info::<SocketAddr>();

        axum::serve(listener, app)
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }

    /// Get a reference to the config.
    pub fn config(&self) -> &GateConfig {
        &self.config
    }
}
