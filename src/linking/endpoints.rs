//! The JSON endpoints the linking client script drives the flow through.
//!
//! The script obtains a session token, opens the aggregator's linking UI
//! with it, and reports the UI's callbacks back here. Errors are returned
//! as `{"error_message": "..."}` bodies for the script to display.

use axum::{
    Extension, Json,
    extract::{FromRef, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use serde::{Deserialize, Serialize};

use crate::{
    AppState,
    gateway::AccountGateway,
    user_record::{ConnectionStatus, Username},
};

use super::controller::{ExchangeCredential, LinkSessionController};

/// The state needed to serve the linking endpoints.
#[derive(Clone)]
pub struct LinkState {
    /// The per-user linking flow state machine.
    pub controller: LinkSessionController,
    /// Access to user records for the status endpoint.
    pub gateway: AccountGateway,
}

impl FromRef<AppState> for LinkState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            controller: state.controller.clone(),
            gateway: state.gateway.clone(),
        }
    }
}

/// The session token issued for one linking UI instance.
#[derive(Debug, Serialize, Deserialize)]
pub struct LinkSessionResponse {
    /// The token the client hands to the linking UI.
    pub link_token: String,
}

/// The payload of the linking UI's success callback.
#[derive(Debug, Serialize, Deserialize)]
pub struct CompleteLinkRequest {
    /// The single-use token produced when the user completed the UI.
    pub public_token: String,
    /// The institution name from the success metadata.
    pub institution_name: String,
}

/// The payload of the linking UI's exit callback.
#[derive(Debug, Serialize, Deserialize)]
pub struct ExitLinkRequest {
    /// The error the UI reported, absent when the user simply cancelled.
    #[serde(default)]
    pub error_message: Option<String>,
}

/// An informational event reported while the linking UI is open.
#[derive(Debug, Serialize, Deserialize)]
pub struct LinkEventRequest {
    /// The event name, e.g. "OPEN" or "SELECT_INSTITUTION".
    pub event_name: String,
    /// Extra detail attached to the event.
    #[serde(default)]
    pub metadata: Option<serde_json::Value>,
}

/// The logged-in user's connection status.
#[derive(Debug, Serialize, Deserialize)]
pub struct UserInfoResponse {
    /// The logged-in user's name.
    pub username: String,
    /// Whether the user has linked a bank account.
    pub user_status: ConnectionStatus,
    /// A short description of where the linking flow currently is.
    pub link_phase: String,
}

/// Start a linking attempt for the logged-in user and return the session
/// token for the linking UI.
pub async fn post_link_session(
    State(state): State<LinkState>,
    Extension(username): Extension<Username>,
) -> Response {
    match state.controller.begin(username.as_str()).await {
        Ok(link_token) => (StatusCode::OK, Json(LinkSessionResponse { link_token })).into_response(),
        Err(error) => error.into_api_response(),
    }
}

/// Handle the linking UI's success callback by exchanging the captured
/// credential and saving the connection.
pub async fn post_link_complete(
    State(state): State<LinkState>,
    Extension(username): Extension<Username>,
    Json(request): Json<CompleteLinkRequest>,
) -> Response {
    let credential = ExchangeCredential {
        raw_token: request.public_token,
        institution_name: request.institution_name,
    };

    match state
        .controller
        .complete(username.as_str(), credential)
        .await
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error.into_api_response(),
    }
}

/// Handle the linking UI closing without success.
pub async fn post_link_exit(
    State(state): State<LinkState>,
    Extension(username): Extension<Username>,
    Json(request): Json<ExitLinkRequest>,
) -> Response {
    match state.controller.exit(username.as_str(), request.error_message) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error.into_api_response(),
    }
}

/// Record an informational event from the open linking UI.
pub async fn post_link_event(
    State(state): State<LinkState>,
    Extension(username): Extension<Username>,
    Json(request): Json<LinkEventRequest>,
) -> Response {
    match state
        .controller
        .record_progress(username.as_str(), request.event_name, request.metadata)
    {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error.into_api_response(),
    }
}

/// Retry saving a connection whose exchange succeeded but whose record
/// write failed.
pub async fn post_link_retry(
    State(state): State<LinkState>,
    Extension(username): Extension<Username>,
) -> Response {
    match state.controller.retry_persistence(username.as_str()) {
        Ok(()) => StatusCode::NO_CONTENT.into_response(),
        Err(error) => error.into_api_response(),
    }
}

/// Report the logged-in user's connection status and linking phase.
pub async fn get_user_info(
    State(state): State<LinkState>,
    Extension(username): Extension<Username>,
) -> Response {
    let record = match state.gateway.fetch_user_status(username.as_str()) {
        Ok(record) => record,
        Err(error) => return error.into_api_response(),
    };

    let link_phase = match state.controller.phase(username.as_str()) {
        Ok(phase) => phase.describe().to_owned(),
        Err(error) => return error.into_api_response(),
    };

    (
        StatusCode::OK,
        Json(UserInfoResponse {
            username: record.username,
            user_status: record.connection_status,
            link_phase,
        }),
    )
        .into_response()
}
