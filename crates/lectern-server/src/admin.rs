//! Administrative cache endpoints
//!
//! Lecture invalidation is open to instructors and admins; cleanup, full
//! clear and statistics require the admin role.

use axum::extract::{FromRequest, Path, Request, State};
use axum::routing::{delete, get, post};
use axum::{Json, Router};
use http::StatusCode;
use lectern_cache::{CacheService, CacheStats};
use secrecy::SecretString;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};

use crate::access::{Caller, Role};
use crate::error::AdminError;

/// Literal a caller must send to wipe the whole cache
pub const CLEAR_ALL_CONFIRMATION: &str = "DELETE_ALL_CACHE";

/// Shared state for the admin endpoints
#[derive(Clone)]
pub struct AdminState {
    pub cache: CacheService,
    pub gateway_secret: SecretString,
    /// Threshold used when a cleanup request omits `days`
    pub cleanup_days: u32,
}

/// Number of entries removed by an operation
#[derive(Debug, Serialize, Deserialize)]
pub struct DeletedResponse {
    pub deleted: u64,
}

#[derive(Debug, Default, Deserialize)]
pub struct CleanupBody {
    #[serde(default)]
    pub days: Option<u32>,
}

#[derive(Debug, Default, Deserialize)]
pub struct ClearBody {
    #[serde(default)]
    pub confirm: Option<String>,
}

/// JSON body whose rejections use the admin error envelope
pub struct AdminJson<T>(pub T);

impl<T, S> FromRequest<S> for AdminJson<T>
where
    T: DeserializeOwned,
    S: Send + Sync,
{
    type Rejection = AdminError;

    async fn from_request(request: Request, state: &S) -> Result<Self, Self::Rejection> {
        match Json::<T>::from_request(request, state).await {
            Ok(Json(value)) => Ok(Self(value)),
            Err(rejection) => Err(AdminError::InvalidBody {
                status: rejection.status(),
                message: rejection.body_text(),
            }),
        }
    }
}

/// Build the admin router, to be nested under the configured prefix
pub fn router(state: AdminState) -> Router {
    Router::new()
        .route("/lectures/{lecture_id}", delete(invalidate_lecture_handler))
        .route("/cleanup", post(cleanup_handler))
        .route("/clear", post(clear_handler))
        .route("/stats", get(stats_handler))
        .with_state(state)
}

async fn invalidate_lecture_handler(
    State(state): State<AdminState>,
    caller: Caller,
    Path(lecture_id): Path<String>,
) -> Result<Json<DeletedResponse>, AdminError> {
    caller.require(&[Role::Instructor, Role::Admin])?;

    let deleted = state.cache.invalidate_lecture_cache(&lecture_id).await?;
    Ok(Json(DeletedResponse { deleted }))
}

async fn cleanup_handler(
    State(state): State<AdminState>,
    caller: Caller,
    AdminJson(body): AdminJson<CleanupBody>,
) -> Result<Json<DeletedResponse>, AdminError> {
    caller.require(&[Role::Admin])?;

    let days = body.days.unwrap_or(state.cleanup_days);
    let deleted = state.cache.clear_old_cache(days).await?;
    Ok(Json(DeletedResponse { deleted }))
}

async fn clear_handler(
    State(state): State<AdminState>,
    caller: Caller,
    AdminJson(body): AdminJson<ClearBody>,
) -> Result<StatusCode, AdminError> {
    caller.require(&[Role::Admin])?;

    if body.confirm.as_deref() != Some(CLEAR_ALL_CONFIRMATION) {
        return Err(AdminError::ConfirmationRequired);
    }

    state.cache.clear_all_cache().await?;
    tracing::warn!(role = %caller.role, "cache cleared by admin request");
    Ok(StatusCode::NO_CONTENT)
}

async fn stats_handler(State(state): State<AdminState>, caller: Caller) -> Result<Json<CacheStats>, AdminError> {
    caller.require(&[Role::Admin])?;
    Ok(Json(state.cache.get_cache_stats().await))
}
