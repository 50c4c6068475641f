use super::handlers::{health, rotation};
use utoipa::OpenApi;

#[derive(OpenApi)]
#[openapi(
    paths(
        health::health,
        rotation::rotate_secrets,
        rotation::rotate_signing_keys
    ),
    components(schemas(health::Health, rotation::RotationResponse)),
    tags(
        (name = "health", description = "Service health"),
        (name = "rotation", description = "Scheduled secret and signing key rotation")
    )
)]
struct ApiDoc;

/// `OpenAPI` document; info is taken from the Cargo metadata.
#[must_use]
pub fn openapi() -> utoipa::openapi::OpenApi {
    ApiDoc::openapi()
}
