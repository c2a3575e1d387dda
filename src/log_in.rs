//! This file defines the routes for displaying the log-in page and handling log-in requests.
//! The auth_cookie and auth_middleware modules handle the lower level cookie auth logic.

use std::sync::Arc;

use axum::{
    Form,
    extract::{FromRef, State},
    http::StatusCode,
    response::{IntoResponse, Response},
};
use axum_extra::extract::{PrivateCookieJar, cookie::Key};
use axum_htmx::HxRedirect;
use maud::{Markup, html};
use serde::{Deserialize, Serialize};
use time::Duration;

use crate::{
    AppState,
    auth_cookie::{invalidate_auth_cookie, set_auth_cookie},
    endpoints,
    html::{
        BUTTON_PRIMARY_STYLE, FORM_LABEL_STYLE, FORM_TEXT_INPUT_STYLE, base, log_in_card,
        loading_spinner,
    },
    user_record::{UserRecordStore, Username},
};

pub const EMPTY_USERNAME_ERROR_MSG: &str = "Please enter a username.";

/// Display the log-in page.
pub async fn get_log_in_page() -> Response {
    base(
        "Log In",
        &[],
        &log_in_card("Sign in to your account", &log_in_form(None)),
    )
    .into_response()
}

/// Renders the log-in form, optionally with an error message below the
/// username input.
fn log_in_form(error_message: Option<&str>) -> Markup {
    html! {
        form
            class="space-y-4 md:space-y-6"
            hx-post=(endpoints::LOG_IN_API)
            hx-swap="outerHTML"
            hx-target-error="#alert-container"
        {
            div {
                label for="username" class=(FORM_LABEL_STYLE) { "Username" }
                input
                    type="text"
                    name="username"
                    id="username"
                    class=(FORM_TEXT_INPUT_STYLE)
                    placeholder="yourname"
                    required
                    autofocus;

                @if let Some(error_message) = error_message {
                    p class="mt-2 text-sm text-red-600 dark:text-red-500" { (error_message) }
                }
            }

            button type="submit" class=(BUTTON_PRIMARY_STYLE) {
                span id="indicator" class="htmx-indicator" { (loading_spinner()) }
                "Sign in"
            }
        }
    }
}

/// The state needed to perform a login.
#[derive(Clone)]
pub struct LoginState {
    /// The key to be used for signing and encrypting private cookies.
    pub cookie_key: Key,
    /// The duration for which cookies used for authentication are valid.
    pub cookie_duration: Duration,
    /// The store that holds one record per username.
    pub user_records: Arc<dyn UserRecordStore>,
}

impl FromRef<AppState> for LoginState {
    fn from_ref(state: &AppState) -> Self {
        Self {
            cookie_key: state.cookie_key.clone(),
            cookie_duration: state.cookie_duration,
            user_records: state.user_records.clone(),
        }
    }
}

// this impl tells `PrivateCookieJar` how to access the key from our state
impl FromRef<LoginState> for Key {
    fn from_ref(state: &LoginState) -> Self {
        state.cookie_key.clone()
    }
}

/// Handler for log-in requests via the POST method.
///
/// There are no passwords. A username names a profile, and signing in with a
/// new username creates the profile on the spot. On a successful log-in
/// request, the auth cookie is set and the client is redirected to the
/// dashboard page. Otherwise, the form is returned with an error message
/// explaining the problem.
pub async fn post_log_in(
    State(state): State<LoginState>,
    jar: PrivateCookieJar,
    Form(user_data): Form<LogInData>,
) -> Response {
    let username = user_data.username.trim();

    if username.is_empty() {
        return (StatusCode::OK, log_in_form(Some(EMPTY_USERNAME_ERROR_MSG))).into_response();
    }

    let record = match state.user_records.find_or_create(username) {
        Ok(record) => record,
        Err(error) => {
            tracing::error!("Error getting user record during log-in: {error}");
            return error.into_alert_response();
        }
    };

    set_auth_cookie(
        jar.clone(),
        Username::new(&record.username),
        state.cookie_duration,
    )
    .map(|updated_jar| {
        (
            StatusCode::SEE_OTHER,
            HxRedirect(endpoints::DASHBOARD_VIEW.to_owned()),
            updated_jar,
        )
    })
    .map_err(|err| {
        tracing::error!("Error setting auth cookie: {err}");
        (
            StatusCode::INTERNAL_SERVER_ERROR,
            HxRedirect(endpoints::INTERNAL_ERROR_VIEW.to_owned()),
            invalidate_auth_cookie(jar),
        )
    })
    .into_response()
}

/// The raw data entered by the user in the log-in form.
///
/// The username is stored as a plain string. The handler trims whitespace and
/// rejects empty names, any other value names a profile.
#[derive(Clone, Serialize, Deserialize)]
pub struct LogInData {
    /// Username entered during log-in.
    pub username: String,
}


#[cfg(test)]
mod log_in_tests {
    use std::sync::{Arc, Mutex};

    use axum::{
        Form, Router,
        body::Body,
        extract::State,
        http::{Response, StatusCode, header::SET_COOKIE},
        routing::post,
    };
    use axum_extra::extract::{
        PrivateCookieJar,
        cookie::{Cookie, Key},
    };
    use axum_htmx::HX_REDIRECT;
    use axum_test::TestServer;
    use rusqlite::Connection;
    use sha2::Digest;
    use time::OffsetDateTime;

    use crate::{
        auth_cookie::{COOKIE_TOKEN, DEFAULT_COOKIE_DURATION},
        endpoints,
        user_record::{
            ConnectionStatus, SqliteUserRecordStore, UserRecordStore, create_user_record_table,
        },
    };

    use super::{EMPTY_USERNAME_ERROR_MSG, LogInData, LoginState, post_log_in};

    #[tokio::test]
    async fn log_in_succeeds_with_username() {
        let (state, _) = get_test_state();

        let response = new_log_in_request(
            state,
            LogInData {
                username: "alice".to_string(),
            },
        )
        .await;

        assert_hx_redirect(&response, endpoints::DASHBOARD_VIEW);
        assert_set_cookie(&response);
    }

    #[tokio::test]
    async fn log_in_creates_user_record() {
        let (state, store) = get_test_state();

        let response = new_log_in_request(
            state,
            LogInData {
                username: "alice".to_string(),
            },
        )
        .await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        let record = store
            .get("alice")
            .expect("logging in should have created a record for alice");
        assert_eq!(record.connection_status, ConnectionStatus::NotConnected);
        assert_eq!(record.access_credential, None);
    }

    #[tokio::test]
    async fn log_in_trims_whitespace_around_username() {
        let (state, store) = get_test_state();

        let response = new_log_in_request(
            state,
            LogInData {
                username: "  alice  ".to_string(),
            },
        )
        .await;

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert!(store.get("alice").is_ok());
    }

    #[tokio::test]
    async fn log_in_fails_with_missing_username_field() {
        let (state, _) = get_test_state();
        let app = Router::new()
            .route(endpoints::LOG_IN_API, post(post_log_in))
            .with_state(state);

        let server = TestServer::new(app).expect("Could not create test server.");

        server
            .post(endpoints::LOG_IN_API)
            .content_type("application/x-www-form-urlencoded")
            .await
            .assert_status(StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn form_deserialises() {
        let (state, _) = get_test_state();
        let app = Router::new()
            .route(endpoints::LOG_IN_API, post(post_log_in))
            .with_state(state);
        let server = TestServer::new(app).expect("Could not create test server.");
        let form = [("username", "alice")];

        let response = server.post(endpoints::LOG_IN_API).form(&form).await;

        assert_ne!(response.status_code(), StatusCode::UNPROCESSABLE_ENTITY);
    }

    #[tokio::test]
    async fn log_in_fails_with_blank_username() {
        let (state, _) = get_test_state();

        let response = new_log_in_request(
            state,
            LogInData {
                username: String::new(),
            },
        )
        .await;

        assert_eq!(response.status(), StatusCode::OK);
        assert_body_contains_message(response, EMPTY_USERNAME_ERROR_MSG).await;
    }

    fn get_test_state() -> (LoginState, Arc<dyn UserRecordStore>) {
        let connection =
            Connection::open_in_memory().expect("Could not open in-memory SQLite database");
        create_user_record_table(&connection).expect("Could not create user record table");
        let store: Arc<dyn UserRecordStore> =
            Arc::new(SqliteUserRecordStore::new(Arc::new(Mutex::new(connection))));

        let state = LoginState {
            cookie_key: Key::from(&sha2::Sha512::digest("foobar")),
            cookie_duration: DEFAULT_COOKIE_DURATION,
            user_records: store.clone(),
        };

        (state, store)
    }

    async fn new_log_in_request(state: LoginState, log_in_form: LogInData) -> Response<Body> {
        let jar = PrivateCookieJar::new(state.cookie_key.clone());

        post_log_in(State(state), jar, Form(log_in_form)).await
    }

    #[track_caller]
    fn assert_hx_redirect(response: &Response<Body>, want_location: &str) {
        let redirect_location = response.headers().get(HX_REDIRECT).unwrap();

        assert_eq!(response.status(), StatusCode::SEE_OTHER);
        assert_eq!(redirect_location, want_location);
    }

    #[track_caller]
    fn assert_set_cookie(response: &Response<Body>) {
        let mut found_token_cookie = false;

        for cookie_headers in response.headers().get_all(SET_COOKIE) {
            let cookie_string = cookie_headers.to_str().unwrap();
            let cookie = Cookie::parse(cookie_string).unwrap();

            match cookie.name() {
                COOKIE_TOKEN => {
                    assert!(cookie.expires_datetime() > Some(OffsetDateTime::now_utc()));
                    found_token_cookie = true;
                }
                _ => panic!("Unexpected cookie found: {}", cookie.name()),
            }
        }

        assert!(
            found_token_cookie,
            "could not find cookie '{COOKIE_TOKEN}' in response headers"
        );
    }

    async fn assert_body_contains_message(response: Response<Body>, message: &str) {
        let body = response.into_body();
        let body = axum::body::to_bytes(body, usize::MAX).await.unwrap();

        let text = String::from_utf8_lossy(&body).to_string();

        assert!(
            text.contains(message),
            "response body should contain the text '{}' but got {}",
            message,
            text
        );
    }
}
