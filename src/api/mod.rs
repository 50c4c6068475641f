use crate::{rotation::RotationEngine, vault::renew::ShutdownSignal};
use anyhow::Result;
use axum::{
    body::Body,
    extract::MatchedPath,
    http::{HeaderName, HeaderValue, Request},
    routing::get,
    Extension, Router,
};
use sqlx::PgPool;
use tokio::{net::TcpListener, sync::mpsc};
use tower::ServiceBuilder;
use tower_http::{
    request_id::PropagateRequestIdLayer, set_header::SetRequestHeaderLayer, trace::TraceLayer,
};
use tracing::{info, info_span, warn, Span};
use ulid::Ulid;
use utoipa_swagger_ui::SwaggerUi;

pub mod handlers;
mod openapi;

pub use openapi::openapi;

use handlers::{health, rotation};

/// Build the application router.
///
/// `pool` is only used by the health check; `None` reports in-memory mode.
#[must_use]
pub fn router(engine: RotationEngine, pool: Option<PgPool>) -> Router {
    Router::new()
        .route("/health", get(health::health).options(health::health))
        .route("/rotation/secrets", get(rotation::rotate_secrets))
        .route("/rotation/signing-keys", get(rotation::rotate_signing_keys))
        .merge(SwaggerUi::new("/swagger-ui").url("/api-docs/openapi.json", openapi()))
        .layer(
            ServiceBuilder::new()
                .layer(SetRequestHeaderLayer::if_not_present(
                    HeaderName::from_static("x-request-id"),
                    |_req: &_| HeaderValue::from_str(Ulid::new().to_string().as_str()).ok(),
                ))
                .layer(PropagateRequestIdLayer::new(HeaderName::from_static(
                    "x-request-id",
                )))
                .layer(TraceLayer::new_for_http().make_span_with(make_span))
                .layer(Extension(engine))
                .layer(Extension(pool)),
        )
}

/// Start the server
/// # Errors
/// Return error if failed to start the server
pub async fn new(
    port: u16,
    engine: RotationEngine,
    pool: Option<PgPool>,
    rx: mpsc::UnboundedReceiver<ShutdownSignal>,
) -> Result<()> {
    let app = router(engine, pool);

    let listener = TcpListener::bind(format!("::0:{port}")).await?;

    info!("Listening on [::]:{}", port);

    axum::serve(listener, app.into_make_service())
        .with_graceful_shutdown(shutdown(rx))
        .await?;

    Ok(())
}

async fn shutdown(mut rx: mpsc::UnboundedReceiver<ShutdownSignal>) {
    tokio::select! {
        Some(signal) = rx.recv() => {
            warn!(signal = signal.as_str(), "Gracefully shutdown");
        }
        _ = tokio::signal::ctrl_c() => {
            info!("Gracefully shutdown");
        }
    }
}

fn make_span(request: &Request<Body>) -> Span {
    let request_id = request
        .headers()
        .get("x-request-id")
        .and_then(|val| val.to_str().ok())
        .unwrap_or("none");
    let matched_path = request
        .extensions()
        .get::<MatchedPath>()
        .map_or_else(|| request.uri().path(), MatchedPath::as_str);

    info_span!(
        "http.request",
        http.method = %request.method(),
        http.route = matched_path,
        request_id
    )
}
