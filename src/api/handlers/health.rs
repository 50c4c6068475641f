use crate::GIT_COMMIT_HASH;
use axum::{
    body::Body,
    extract::Extension,
    http::{HeaderMap, HeaderValue, Method, StatusCode},
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use sqlx::{Connection, PgPool};
use tracing::{debug, error, info_span, Instrument};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug)]
pub struct Health {
    commit: String,
    name: String,
    version: String,
    /// `ok`, `error`, or `memory` when running without a database.
    database: String,
}

async fn ping(pool: &PgPool) -> Result<(), StatusCode> {
    let acquire_span = info_span!(
        "db.acquire",
        db.system = "postgresql",
        db.operation = "ACQUIRE"
    );
    let mut conn = pool.acquire().instrument(acquire_span).await.map_err(|e| {
        error!("Failed to acquire database connection: {}", e);
        StatusCode::SERVICE_UNAVAILABLE
    })?;

    let ping_span = info_span!("db.ping", db.system = "postgresql", db.operation = "PING");
    conn.ping().instrument(ping_span).await.map_err(|e| {
        error!("Failed to ping database: {}", e);
        StatusCode::SERVICE_UNAVAILABLE
    })
}

#[utoipa::path(
    get,
    path = "/health",
    responses(
        (status = 200, description = "Service is healthy", body = Health),
        (status = 503, description = "Database is unreachable", body = Health)
    ),
    tag = "health"
)]
// axum handler for health
pub async fn health(method: Method, pool: Extension<Option<PgPool>>) -> impl IntoResponse {
    let (status, database) = match pool.0.as_ref() {
        Some(pool) => match ping(pool).await {
            Ok(()) => (StatusCode::OK, "ok"),
            Err(status) => (status, "error"),
        },
        None => (StatusCode::OK, "memory"),
    };
    debug!(database, "health check");

    let health = Health {
        commit: GIT_COMMIT_HASH.to_string(),
        name: env!("CARGO_PKG_NAME").to_string(),
        version: env!("CARGO_PKG_VERSION").to_string(),
        database: database.to_string(),
    };

    let body = if method == Method::GET {
        Json(&health).into_response()
    } else {
        Body::empty().into_response()
    };

    let short_hash = if health.commit.len() > 7 {
        &health.commit[0..7]
    } else {
        ""
    };

    let mut headers = HeaderMap::new();
    match format!("{}:{}:{}", health.name, health.version, short_hash).parse::<HeaderValue>() {
        Ok(value) => {
            headers.insert("X-App", value);
        }
        Err(err) => error!("Failed to parse X-App header: {}", err),
    }

    (status, headers, body)
}
