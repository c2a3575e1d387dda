//! Implements a struct that holds the state of the REST server.

use std::sync::{Arc, Mutex};

use axum::extract::FromRef;
use axum_extra::extract::cookie::Key;
use rusqlite::Connection;
use sha2::{Digest, Sha512};
use time::Duration;

use crate::{
    Error,
    aggregator::AggregatorClient,
    auth_cookie::DEFAULT_COOKIE_DURATION,
    db::initialize,
    gateway::AccountGateway,
    linking::LinkSessionController,
    user_record::{SqliteUserRecordStore, UserRecordStore},
};

/// The state of the REST server.
#[derive(Clone)]
pub struct AppState {
    /// The key to be used for signing and encrypting private cookies.
    pub cookie_key: Key,

    /// The duration for which cookies used for authentication are valid.
    pub cookie_duration: Duration,

    /// The local timezone as a canonical timezone name, e.g. "Pacific/Auckland".
    pub local_timezone: String,

    /// The store holding each user's bank connection record.
    pub user_records: Arc<dyn UserRecordStore>,

    /// The boundary to the aggregator API and the user record store.
    pub gateway: AccountGateway,

    /// The per-user bank linking flow state machine.
    pub controller: LinkSessionController,
}

impl AppState {
    /// Create a new [AppState] with a SQLite database connection.
    ///
    /// This function will initialize the database by adding the table for
    /// user records. `local_timezone` should be a valid, canonical timezone
    /// name, e.g. "Pacific/Auckland". `aggregator_client` is the client used
    /// for all calls to the bank data aggregator.
    ///
    /// # Errors
    /// Returns an error if the database cannot be initialized.
    pub fn new(
        db_connection: Connection,
        cookie_secret: &str,
        local_timezone: &str,
        aggregator_client: Arc<dyn AggregatorClient>,
    ) -> Result<Self, Error> {
        initialize(&db_connection)?;

        let user_records: Arc<dyn UserRecordStore> = Arc::new(SqliteUserRecordStore::new(
            Arc::new(Mutex::new(db_connection)),
        ));
        let gateway = AccountGateway::new(aggregator_client, user_records.clone());
        let controller = LinkSessionController::new(gateway.clone());

        Ok(Self {
            cookie_key: create_cookie_key(cookie_secret),
            cookie_duration: DEFAULT_COOKIE_DURATION,
            local_timezone: local_timezone.to_owned(),
            user_records,
            gateway,
            controller,
        })
    }
}

// this impl tells `PrivateCookieJar` how to access the key from our state
impl FromRef<AppState> for Key {
    fn from_ref(state: &AppState) -> Self {
        state.cookie_key.clone()
    }
}

/// Create a signing key for cookies from a `secret`s string.
pub fn create_cookie_key(secret: &str) -> Key {
    let hash = Sha512::digest(secret);

    Key::from(&hash)
}
