//! HTTP API: channel config CRUD, HTTP publish and the GitOps observer flag.
//!
//! Responses never carry secure values, only which secure fields are set.

use crate::identity::Caller;
use crate::state::AppState;
use axum::{
    extract::{Path, State},
    http::StatusCode,
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use bytes::Bytes;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::sync::Arc;
use tenvis_live_core::{
    CallContext, DashboardActivityChannel, DispatchError, OrgRole, PublishOutcome, SignedInUser,
    Status,
};
use tenvis_live_store::{
    CreateLiveChannelConfigCommand, DeleteLiveChannelConfigCommand, GetLiveChannelConfigQuery,
    ListLiveChannelConfigQuery, LiveChannelConfig, LiveChannelPlainConfig,
    LiveChannelSecureConfig, StoreError, UpdateLiveChannelConfigCommand,
};
use tracing::error;

/// Routes under `/api/live`.
pub fn routes() -> Router<Arc<AppState>> {
    Router::new()
        .route(
            "/api/live/channel-configs",
            get(list_configs).post(create_config),
        )
        .route(
            "/api/live/channel-configs/:id",
            get(get_config).put(update_config).delete(delete_config),
        )
        .route("/api/live/publish", post(publish))
        .route("/api/live/gitops", get(gitops))
}

/// API error with its HTTP status.
#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    fn forbidden() -> Self {
        Self::new(StatusCode::FORBIDDEN, "permission denied")
    }

    fn internal(e: &dyn std::fmt::Display) -> Self {
        error!(error = %e, "Live API request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, "internal error")
    }
}

impl From<StoreError> for ApiError {
    fn from(e: StoreError) -> Self {
        match e {
            StoreError::NotFound => Self::new(StatusCode::NOT_FOUND, e.to_string()),
            StoreError::Conflict { .. } | StoreError::VersionConflict { .. } => {
                Self::new(StatusCode::CONFLICT, e.to_string())
            }
            StoreError::InvalidChannel(_) => Self::new(StatusCode::BAD_REQUEST, e.to_string()),
            other => Self::internal(&other),
        }
    }
}

impl From<DispatchError> for ApiError {
    fn from(e: DispatchError) -> Self {
        match e {
            DispatchError::InvalidChannel(_) | DispatchError::Hub(_) => {
                Self::new(StatusCode::BAD_REQUEST, e.to_string())
            }
            DispatchError::Resolution(_) => Self::new(StatusCode::NOT_FOUND, e.to_string()),
            other => Self::internal(&other),
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        (
            self.status,
            Json(serde_json::json!({ "message": self.message })),
        )
            .into_response()
    }
}

type ApiResult<T> = Result<T, ApiError>;

fn require_admin(user: &SignedInUser) -> ApiResult<()> {
    if user.has_role(OrgRole::Admin) {
        Ok(())
    } else {
        Err(ApiError::forbidden())
    }
}

/// A channel config as returned by the API.
#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ChannelConfigDto {
    pub id: i64,
    pub org_id: i64,
    pub version: i64,
    pub channel: String,
    pub created: DateTime<Utc>,
    pub config: LiveChannelPlainConfig,
    pub secure_fields: BTreeMap<String, bool>,
}

impl From<LiveChannelConfig> for ChannelConfigDto {
    fn from(c: LiveChannelConfig) -> Self {
        let secure_fields = c.secure.fields().map(|f| (f.to_string(), true)).collect();
        Self {
            id: c.id,
            org_id: c.org_id,
            version: c.version,
            channel: c.channel,
            created: c.created,
            config: c.config,
            secure_fields,
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CreateConfigBody {
    pub channel: String,
    #[serde(default)]
    pub config: LiveChannelPlainConfig,
    #[serde(default)]
    pub secure: LiveChannelSecureConfig,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct UpdateConfigBody {
    pub version: i64,
    #[serde(default)]
    pub config: Option<LiveChannelPlainConfig>,
    #[serde(default)]
    pub secure: Option<LiveChannelSecureConfig>,
}

async fn list_configs(
    State(state): State<Arc<AppState>>,
    Caller(user): Caller,
) -> ApiResult<Json<Vec<ChannelConfigDto>>> {
    require_admin(&user)?;
    let configs = state
        .store
        .list(ListLiveChannelConfigQuery {
            org_id: user.org_id,
        })
        .await?;
    Ok(Json(configs.into_iter().map(Into::into).collect()))
}

async fn create_config(
    State(state): State<Arc<AppState>>,
    Caller(user): Caller,
    Json(body): Json<CreateConfigBody>,
) -> ApiResult<(StatusCode, Json<ChannelConfigDto>)> {
    require_admin(&user)?;
    let created = state
        .store
        .create(CreateLiveChannelConfigCommand {
            org_id: user.org_id,
            channel: body.channel,
            config: body.config,
            secure: body.secure,
        })
        .await?;
    Ok((StatusCode::CREATED, Json(created.into())))
}

async fn get_config(
    State(state): State<Arc<AppState>>,
    Caller(user): Caller,
    Path(id): Path<i64>,
) -> ApiResult<Json<ChannelConfigDto>> {
    require_admin(&user)?;
    let config = state
        .store
        .get(GetLiveChannelConfigQuery {
            id,
            org_id: user.org_id,
        })
        .await?;
    Ok(Json(config.into()))
}

async fn update_config(
    State(state): State<Arc<AppState>>,
    Caller(user): Caller,
    Path(id): Path<i64>,
    Json(body): Json<UpdateConfigBody>,
) -> ApiResult<Json<ChannelConfigDto>> {
    require_admin(&user)?;
    let updated = state
        .store
        .update(UpdateLiveChannelConfigCommand {
            id,
            org_id: user.org_id,
            version: body.version,
            config: body.config,
            secure: body.secure,
        })
        .await?;
    Ok(Json(updated.into()))
}

async fn delete_config(
    State(state): State<Arc<AppState>>,
    Caller(user): Caller,
    Path(id): Path<i64>,
) -> ApiResult<StatusCode> {
    require_admin(&user)?;
    let existing = state
        .store
        .get(GetLiveChannelConfigQuery {
            id,
            org_id: user.org_id,
        })
        .await?;
    state
        .store
        .delete(DeleteLiveChannelConfigCommand {
            id,
            org_id: user.org_id,
        })
        .await?;
    state.forwarder.forget(user.org_id, &existing.channel);
    Ok(StatusCode::NO_CONTENT)
}

#[derive(Debug, Deserialize)]
pub struct PublishBody {
    pub channel: String,
    pub data: serde_json::Value,
}

#[derive(Debug, Serialize)]
pub struct PublishResponse {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub offset: Option<u64>,
    pub recipients: usize,
}

/// Publish JSON data through the channel's handler, as a WebSocket client
/// would.
async fn publish(
    State(state): State<Arc<AppState>>,
    Caller(user): Caller,
    Json(body): Json<PublishBody>,
) -> ApiResult<Json<PublishResponse>> {
    let data = Bytes::from(serde_json::to_vec(&body.data).map_err(|e| ApiError::internal(&e))?);
    let ctx = CallContext::new(format!("http_{}", user.user_id));

    match state
        .dispatcher
        .publish(&ctx, &user, &body.channel, data)
        .await?
    {
        PublishOutcome::Published {
            offset, recipients, ..
        } => Ok(Json(PublishResponse { offset, recipients })),
        PublishOutcome::Rejected(Status::NotFound) => {
            Err(ApiError::new(StatusCode::NOT_FOUND, "channel not found"))
        }
        PublishOutcome::Rejected(_) => Err(ApiError::forbidden()),
    }
}

async fn gitops(State(state): State<Arc<AppState>>, Caller(user): Caller) -> impl IntoResponse {
    let observed = state.activity.has_gitops_observer(user.org_id);
    Json(serde_json::json!({ "observed": observed }))
}
