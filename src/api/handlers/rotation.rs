//! Rotation triggers called by the external scheduler.
//!
//! A run that finds the lock held is reported as `too_early` with status 200,
//! so an aggressive trigger cadence is harmless. Only a failing lock store
//! answers 500; failures inside a run are listed in `errors`.

use crate::rotation::{RotationEngine, RotationRun};
use anyhow::Result;
use axum::{
    extract::Extension,
    http::StatusCode,
    response::{IntoResponse, Json},
};
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};
use utoipa::ToSchema;

#[derive(ToSchema, Serialize, Deserialize, Debug, Default, PartialEq, Eq)]
pub struct RotationResponse {
    pub ok: bool,
    pub errors: Vec<String>,
    /// The lock was held, nothing was rotated.
    pub too_early: bool,
}

impl From<RotationRun> for RotationResponse {
    fn from(run: RotationRun) -> Self {
        match run {
            RotationRun::TooEarly => Self {
                ok: true,
                errors: Vec::new(),
                too_early: true,
            },
            RotationRun::Completed(errors) => Self {
                ok: errors.is_empty(),
                errors: errors.messages(),
                too_early: false,
            },
        }
    }
}

fn respond(kind: &str, result: Result<RotationRun>) -> (StatusCode, Json<RotationResponse>) {
    match result {
        Ok(run) => {
            let response = RotationResponse::from(run);
            if response.too_early {
                info!(kind, "rotation skipped, lock held");
            } else if !response.ok {
                warn!(kind, errors = response.errors.len(), "rotation finished with errors");
            }
            (StatusCode::OK, Json(response))
        }
        Err(err) => {
            error!(kind, "rotation failed: {err:#}");
            let response = RotationResponse {
                ok: false,
                errors: vec![format!("{err:#}")],
                too_early: false,
            };
            (StatusCode::INTERNAL_SERVER_ERROR, Json(response))
        }
    }
}

#[utoipa::path(
    get,
    path = "/rotation/secrets",
    responses(
        (status = 200, description = "Rotation ran, possibly with per-type errors, or was too early", body = RotationResponse),
        (status = 500, description = "Rotation lock could not be acquired", body = RotationResponse)
    ),
    tag = "rotation"
)]
pub async fn rotate_secrets(engine: Extension<RotationEngine>) -> impl IntoResponse {
    respond("secrets", engine.run_secret_rotation().await)
}

#[utoipa::path(
    get,
    path = "/rotation/signing-keys",
    responses(
        (status = 200, description = "Rotation ran, possibly with per-realm errors, or was too early", body = RotationResponse),
        (status = 500, description = "Rotation lock could not be acquired", body = RotationResponse)
    ),
    tag = "rotation"
)]
pub async fn rotate_signing_keys(engine: Extension<RotationEngine>) -> impl IntoResponse {
    respond("signing_keys", engine.run_signing_key_rotation().await)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rotation::RotationErrors;
    use anyhow::anyhow;

    #[test]
    fn test_response_from_run() {
        assert_eq!(
            RotationResponse::from(RotationRun::TooEarly),
            RotationResponse {
                ok: true,
                errors: vec![],
                too_early: true
            }
        );

        let mut errors = RotationErrors::new();
        errors.push(anyhow!("cookie_keys: upstream down"));
        let response = RotationResponse::from(RotationRun::Completed(errors));
        assert!(!response.ok);
        assert!(!response.too_early);
        assert_eq!(response.errors.len(), 1);
    }

    #[test]
    fn test_lock_fault_is_server_error() {
        let (status, Json(body)) = respond("secrets", Err(anyhow!("lock store unavailable")));
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert!(!body.ok);
        assert_eq!(body.errors, vec!["lock store unavailable".to_string()]);
    }
}
