//! LedgerLink is a web app that links your bank accounts through a data
//! aggregator and keeps an eye on the spending they report.
//!
//! This library provides a REST API that directly serves HTML pages.

#![warn(missing_docs)]

use std::{net::SocketAddr, time::Duration};

use axum::{
    Json,
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_server::Handle;
use serde_json::json;
use tokio::signal;

mod aggregation;
mod aggregator;
mod alert;
mod app_state;
mod auth_cookie;
mod auth_middleware;
mod dashboard;
mod db;
mod endpoints;
mod gateway;
mod html;
mod internal_server_error;
mod linking;
mod log_in;
mod log_out;
mod logging;
mod navigation;
mod not_found;
mod routing;
mod timezone;
mod transactions_page;
mod user_record;

pub use aggregator::{AggregatorClient, HttpAggregatorClient};
pub use app_state::AppState;
pub use db::initialize as initialize_db;
pub use logging::{LOG_BODY_LENGTH_LIMIT, logging_middleware};
pub use routing::build_router;

use crate::{
    alert::ErrorAlert, internal_server_error::InternalServerError,
    not_found::get_404_not_found_response,
};

/// An async task that waits for either the ctrl+c or terminate signal, whichever comes first, and
/// then signals the server to shut down gracefully.
///
/// `handle` is a handle to an Axum `Server`.
pub async fn graceful_shutdown(handle: Handle<SocketAddr>) {
    let ctrl_c = async {
        signal::ctrl_c()
            .await
            .expect("failed to install Ctrl+C handler");
    };

    #[cfg(unix)]
    let terminate = async {
        signal::unix::signal(signal::unix::SignalKind::terminate())
            .expect("failed to install signal handler")
            .recv()
            .await;
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {
            tracing::debug!("Received ctrl+c signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
        _ = terminate => {
            tracing::debug!("Received terminate signal.");
            handle.graceful_shutdown(Some(Duration::from_secs(1)));
        },
    }
}

/// The errors that may occur in the application.
#[derive(Debug, thiserror::Error, PartialEq)]
pub enum Error {
    /// The aggregator could not issue a link session token.
    ///
    /// The linking flow returns to its initial state so the user can try
    /// again.
    #[error("could not create a link session: {0}")]
    SessionCreation(String),

    /// A link session was requested while a linking flow is already in
    /// progress or the user is already connected.
    #[error("a link session is already active for this user")]
    SessionAlreadyActive,

    /// The aggregator refused to exchange the public token.
    ///
    /// Public tokens are single use and short lived, so this typically means
    /// the token expired or was already exchanged.
    #[error("the aggregator rejected the public token: {0}")]
    ExchangeRejected(String),

    /// The user record could not be updated after a successful token
    /// exchange.
    ///
    /// The access credential obtained from the exchange is retained in
    /// memory so that the write alone can be retried without contacting the
    /// aggregator again.
    #[error("could not save the connection details: {0}")]
    Persistence(String),

    /// An operation that needs a linked bank account was attempted before
    /// linking completed.
    #[error("no bank account is connected")]
    NotConnected,

    /// The aggregator could not be reached or answered with a server error.
    #[error("the aggregator is unavailable: {0}")]
    UpstreamUnavailable(String),

    /// The aggregator rejected the application's client ID and secret.
    #[error("the aggregator rejected the application credentials")]
    Unauthorized,

    /// A linking operation was attempted in a phase of the flow that does
    /// not allow it, e.g. completing a session that was never started.
    #[error("the linking flow does not allow this operation: {0}")]
    IllegalLinkState(String),

    /// The requested resource was not found.
    ///
    /// For HTTP request handlers, the client should check that the parameters
    /// (e.g., username) are correct and that the resource has been created.
    ///
    /// Internally, this error may occur when a query returns no rows.
    #[error("the requested resource could not be found")]
    NotFound,

    /// An unhandled/unexpected SQL error.
    #[error("an unexpected SQL error occurred: {0}")]
    SqlError(rusqlite::Error),

    /// Could not acquire the database lock
    #[error("could not acquire the database lock")]
    DatabaseLockError,

    /// Could not acquire the lock guarding the per-user linking state
    #[error("could not acquire the link state lock")]
    LinkStateLockError,

    /// An error occurred while getting the local timezone from a canonical timezone string.
    #[error("invalid timezone {0}")]
    InvalidTimezoneError(String),

    /// There was an error parsing the date in the cookie or creating the new
    /// expiry date time.
    ///
    /// Callers should pass in the original error as a string and the date
    /// string that caused the error.
    #[error("could not format expiry cookie date-time string \"{1}\": {0}")]
    InvalidDateFormat(String, String),

    /// The auth token cookie is missing from the cookie jar in the request.
    #[error("no cookies in the cookie jar :(")]
    CookieMissing,

    /// The aggregator base URL could not be parsed.
    #[error("invalid aggregator URL: {0}")]
    InvalidAggregatorUrl(String),
}

impl From<rusqlite::Error> for Error {
    fn from(value: rusqlite::Error) -> Self {
        match value {
            rusqlite::Error::QueryReturnedNoRows => Error::NotFound,
            error => {
                tracing::error!("an unhandled SQL error occurred: {}", error);
                Error::SqlError(error)
            }
        }
    }
}

impl IntoResponse for Error {
    fn into_response(self) -> Response {
        match self {
            Error::NotFound => get_404_not_found_response(),
            Error::InvalidTimezoneError(timezone) => InternalServerError {
                description: "Invalid Timezone Settings",
                fix: &format!(
                    "Could not get local timezone \"{timezone}\". Check your server settings and \
                    ensure the timezone has been set to valid, canonical timezone string"
                ),
            }
            .into_response(),
            Error::DatabaseLockError => InternalServerError::default().into_response(),
            // Any errors that are not handled above are not intended to be shown to the client.
            error => {
                tracing::error!("An unexpected error occurred: {}", error);
                InternalServerError::default().into_response()
            }
        }
    }
}

impl Error {
    /// Render the error as an HTML alert fragment for HTMX requests.
    fn into_alert_response(self) -> Response {
        match self {
            Error::InvalidTimezoneError(timezone) => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorAlert {
                    message: "Invalid Timezone Settings",
                    details: &format!(
                        "Could not get local timezone \"{timezone}\". Check your server settings and \
                    ensure the timezone has been set to valid, canonical timezone string"
                    ),
                }
                .into_markup(),
            )
                .into_response(),
            Error::UpstreamUnavailable(_) => (
                StatusCode::BAD_GATEWAY,
                ErrorAlert {
                    message: "Bank data unavailable",
                    details: "The bank data aggregator could not be reached. Try again in a minute.",
                }
                .into_markup(),
            )
                .into_response(),
            _ => (
                StatusCode::INTERNAL_SERVER_ERROR,
                ErrorAlert {
                    message: "Something went wrong",
                    details: "An unexpected error occurred, check the server logs for more details.",
                }
                .into_markup(),
            )
                .into_response(),
        }
    }

    /// Render the error as a JSON response for the linking API.
    ///
    /// The body always has the shape `{"error_message": "..."}` so the
    /// client script can display it without caring which error occurred.
    fn into_api_response(self) -> Response {
        let status = match &self {
            Error::SessionAlreadyActive | Error::IllegalLinkState(_) | Error::NotConnected => {
                StatusCode::CONFLICT
            }
            Error::ExchangeRejected(_) => StatusCode::BAD_REQUEST,
            Error::SessionCreation(_) | Error::UpstreamUnavailable(_) | Error::Unauthorized => {
                StatusCode::BAD_GATEWAY
            }
            Error::Persistence(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Error::NotFound => StatusCode::NOT_FOUND,
            error => {
                tracing::error!("An unexpected error occurred: {}", error);

                return (
                    StatusCode::INTERNAL_SERVER_ERROR,
                    Json(json!({ "error_message": "an unexpected error occurred" })),
                )
                    .into_response();
            }
        };

        (status, Json(json!({ "error_message": self.to_string() }))).into_response()
    }
}
