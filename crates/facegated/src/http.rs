//! HTTP surface of the daemon.
//!
//! JSON API over axum: registration and identification take multipart
//! uploads, user management is plain JSON. Internal errors are logged
//! and mapped to generic responses; they are never echoed to clients.

use std::sync::Arc;

use axum::extract::{DefaultBodyLimit, Multipart, Path, State};
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::{Json, Router};
use serde::{Deserialize, Serialize};

use facegate_store::{StoreError, UserRecord, UserRegistry};

use crate::pipeline::{IdentifyOutcome, PipelineError, Pipelines, RegisterOutcome};

pub struct AppState {
    pub pipelines: Pipelines,
    pub registry: UserRegistry,
}

pub fn router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/api/health", get(health))
        .route("/api/users", get(list_users).post(register))
        .route(
            "/api/users/:id",
            get(get_user).put(update_user).delete(delete_user),
        )
        .route("/api/identify", post(identify))
        // Uploaded photos routinely exceed axum's 2 MB default.
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

const MAX_UPLOAD_BYTES: usize = 10 * 1024 * 1024;

#[derive(Debug)]
enum ApiError {
    BadRequest(String),
    NotFound,
    Conflict(String),
    Timeout,
    Internal,
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, message) = match self {
            Self::BadRequest(msg) => (StatusCode::BAD_REQUEST, msg),
            Self::NotFound => (StatusCode::NOT_FOUND, "user not found".to_string()),
            Self::Conflict(msg) => (StatusCode::CONFLICT, msg),
            Self::Timeout => (
                StatusCode::SERVICE_UNAVAILABLE,
                "request timed out".to_string(),
            ),
            Self::Internal => (
                StatusCode::INTERNAL_SERVER_ERROR,
                "internal error".to_string(),
            ),
        };
        (status, Json(serde_json::json!({ "error": message }))).into_response()
    }
}

impl From<PipelineError> for ApiError {
    fn from(err: PipelineError) -> Self {
        match err {
            PipelineError::InvalidImage(msg) => Self::BadRequest(format!("invalid image: {msg}")),
            PipelineError::Storage(StoreError::NotFound(_)) => Self::NotFound,
            PipelineError::Storage(StoreError::Duplicate) => {
                Self::Conflict("a user with that email already exists".to_string())
            }
            PipelineError::Timeout(_) => {
                tracing::warn!("pipeline timed out");
                Self::Timeout
            }
            PipelineError::Storage(_) | PipelineError::Engine(_) => {
                tracing::error!(error = %err, "pipeline failure");
                Self::Internal
            }
        }
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::NotFound(_) => Self::NotFound,
            StoreError::Duplicate => {
                Self::Conflict("a user with that email already exists".to_string())
            }
            other => {
                tracing::error!(error = %other, "store failure");
                Self::Internal
            }
        }
    }
}

#[derive(Serialize)]
struct RegisterResponse {
    success: bool,
    status: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<UserRecord>,
}

#[derive(Serialize)]
struct IdentifyResponse {
    matched: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    user: Option<UserRecord>,
    #[serde(skip_serializing_if = "Option::is_none")]
    distance: Option<f32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    status: Option<String>,
}

#[derive(Deserialize)]
struct UpdateUser {
    name: String,
    email: String,
}

async fn health() -> Json<serde_json::Value> {
    Json(serde_json::json!({ "version": env!("CARGO_PKG_VERSION") }))
}

async fn register(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<RegisterResponse>, ApiError> {
    let form = read_register_form(multipart).await?;
    let outcome = state
        .pipelines
        .register(form.name, form.email, form.image)
        .await?;

    Ok(Json(match outcome {
        RegisterOutcome::Registered(user) => RegisterResponse {
            success: true,
            status: "registration successful".to_string(),
            user: Some(user),
        },
        RegisterOutcome::DuplicateUser => RegisterResponse {
            success: false,
            status: "user already exists".to_string(),
            user: None,
        },
        RegisterOutcome::NoFaceDetected => RegisterResponse {
            success: false,
            status: "no face detected in image".to_string(),
            user: None,
        },
    }))
}

async fn identify(
    State(state): State<Arc<AppState>>,
    multipart: Multipart,
) -> Result<Json<IdentifyResponse>, ApiError> {
    let image = read_image_field(multipart).await?;
    let outcome = state.pipelines.identify(image).await?;

    Ok(Json(match outcome {
        IdentifyOutcome::Match { user, distance } => IdentifyResponse {
            matched: true,
            user: Some(user),
            distance: Some(distance),
            status: None,
        },
        IdentifyOutcome::NoMatch => IdentifyResponse {
            matched: false,
            user: None,
            distance: None,
            status: Some("no matching user".to_string()),
        },
        IdentifyOutcome::NoFaceDetected => IdentifyResponse {
            matched: false,
            user: None,
            distance: None,
            status: Some("no face detected in image".to_string()),
        },
    }))
}

async fn list_users(
    State(state): State<Arc<AppState>>,
) -> Result<Json<Vec<UserRecord>>, ApiError> {
    Ok(Json(state.registry.all().await?))
}

async fn get_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<UserRecord>, ApiError> {
    Ok(Json(state.registry.get(id).await?))
}

async fn update_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
    Json(body): Json<UpdateUser>,
) -> Result<Json<UserRecord>, ApiError> {
    let user = state
        .registry
        .update_identity(id, body.name, body.email)
        .await?;
    Ok(Json(user))
}

async fn delete_user(
    State(state): State<Arc<AppState>>,
    Path(id): Path<i64>,
) -> Result<Json<UserRecord>, ApiError> {
    // A deleted user takes its blobs with it.
    Ok(Json(state.pipelines.remove_user(id).await?))
}

struct RegisterForm {
    name: String,
    email: String,
    image: Vec<u8>,
}

async fn read_register_form(mut multipart: Multipart) -> Result<RegisterForm, ApiError> {
    let mut name = None;
    let mut email = None;
    let mut image = None;

    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        // Take an owned copy: reading the field consumes it.
        let field_name = field.name().map(str::to_string);
        match field_name.as_deref() {
            Some("name") => {
                name = Some(field.text().await.map_err(|e| ApiError::BadRequest(e.to_string()))?);
            }
            Some("email") => {
                email = Some(field.text().await.map_err(|e| ApiError::BadRequest(e.to_string()))?);
            }
            Some("image") => {
                image = Some(
                    field
                        .bytes()
                        .await
                        .map_err(|e| ApiError::BadRequest(e.to_string()))?
                        .to_vec(),
                );
            }
            _ => {}
        }
    }

    Ok(RegisterForm {
        name: name.ok_or_else(|| ApiError::BadRequest("missing field `name`".to_string()))?,
        email: email.ok_or_else(|| ApiError::BadRequest("missing field `email`".to_string()))?,
        image: image.ok_or_else(|| ApiError::BadRequest("missing field `image`".to_string()))?,
    })
}

async fn read_image_field(mut multipart: Multipart) -> Result<Vec<u8>, ApiError> {
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        let field_name = field.name().map(str::to_string);
        if field_name.as_deref() == Some("image") {
            return Ok(field
                .bytes()
                .await
                .map_err(|e| ApiError::BadRequest(e.to_string()))?
                .to_vec());
        }
    }
    Err(ApiError::BadRequest("missing field `image`".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn api_error_status_codes() {
        let cases = [
            (ApiError::BadRequest("x".into()), StatusCode::BAD_REQUEST),
            (ApiError::NotFound, StatusCode::NOT_FOUND),
            (ApiError::Conflict("x".into()), StatusCode::CONFLICT),
            (ApiError::Timeout, StatusCode::SERVICE_UNAVAILABLE),
            (ApiError::Internal, StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(err.into_response().status(), expected);
        }
    }

    #[test]
    fn register_response_hides_absent_user() {
        let body = serde_json::to_value(RegisterResponse {
            success: false,
            status: "user already exists".into(),
            user: None,
        })
        .unwrap();
        assert_eq!(body["success"], false);
        assert!(body.get("user").is_none());
    }

    #[test]
    fn internal_errors_are_not_echoed() {
        let response = ApiError::Internal.into_response();
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        // Body is the generic message, no internal detail to leak.
    }
}
