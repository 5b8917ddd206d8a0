//! Shared application state and the error type every handler returns.

use std::{result, sync::Arc};

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
};
use echopipe_common::{control_plane::ControlPlane, prelude::*};

/// Shared application state: the single [`ControlPlane`] instance every
/// handler drives.
#[derive(Clone)]
pub struct AppState {
    /// The process-wide control plane.
    pub control_plane: Arc<ControlPlane>,
}

/// An error type for `echopipe-orchestrator`. Wraps any [`Error`] and
/// renders it as a `500` with the display message in the body; validation
/// failures from `PATCH /config` also flow through this, which is the one
/// place a caller-facing `400` would be warranted, but distinguishing that
/// from an internal failure isn't worth a richer error enum yet.
#[derive(Debug)]
pub struct EchopipeError(pub Error);

impl IntoResponse for EchopipeError {
    fn into_response(self) -> Response {
        error!("{:?}", self.0);
        let payload = format!("{}", self.0);
        (StatusCode::INTERNAL_SERVER_ERROR, payload).into_response()
    }
}

impl From<Error> for EchopipeError {
    fn from(err: Error) -> Self {
        EchopipeError(err)
    }
}

/// The result type returned by every `echopipe-orchestrator` handler.
pub type EchopipeResult<T> = result::Result<T, EchopipeError>;
