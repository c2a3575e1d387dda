//! Defines the per-user account record, its storage interface, and the
//! SQLite implementation used in production.
//!
//! Everything the linking flow knows about a user lives in one row keyed by
//! username: whether the user has connected a bank, the durable access
//! credential obtained from the aggregator, and the institution they linked.

use std::sync::{Arc, Mutex};

use rusqlite::{Connection, Row};
use serde::{Deserialize, Serialize};

use crate::Error;

// ============================================================================
// MODELS
// ============================================================================

/// A newtype wrapper for usernames.
///
/// This disambiguates the logged-in username from other strings, most
/// importantly the one the auth middleware stores in request extensions.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize, Hash)]
pub struct Username(String);

impl Username {
    /// Create a new username.
    pub fn new(username: &str) -> Self {
        Self(username.to_owned())
    }

    /// The username as a string slice.
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for Username {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        self.0.fmt(f)
    }
}

/// Whether a user has completed linking a bank account.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConnectionStatus {
    /// The user has not linked a bank account yet.
    NotConnected,
    /// The user holds a durable access credential for a linked institution.
    Connected,
}

impl ConnectionStatus {
    /// The wire/database spelling of the status.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionStatus::NotConnected => "not_connected",
            ConnectionStatus::Connected => "connected",
        }
    }
}

impl std::fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One user's account-linking state.
///
/// Invariant: `connection_status` is [ConnectionStatus::Connected] if and
/// only if `access_credential` is present. [UserRecordStore::mark_connected]
/// writes all three linking fields in a single statement so a concurrent
/// reader can never observe the record halfway through the update.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UserAccountRecord {
    /// The user's unique name. Immutable after creation.
    pub username: String,

    /// The durable secret used for data-fetch calls against the linked
    /// institution. Present only after a successful exchange.
    pub access_credential: Option<String>,

    /// Whether the user has linked a bank account.
    pub connection_status: ConnectionStatus,

    /// The display name of the linked institution, e.g. "Chase".
    pub linked_institution_name: Option<String>,
}

impl UserAccountRecord {
    /// Whether the user holds a durable access credential.
    pub fn is_connected(&self) -> bool {
        self.connection_status == ConnectionStatus::Connected
    }
}

// ============================================================================
// STORE
// ============================================================================

/// Handles the creation and retrieval of [UserAccountRecord]s.
///
/// The linking flow only ever reads whole records and performs one kind of
/// write, so the interface stays narrow enough that the storage technology
/// never leaks into the callers.
pub trait UserRecordStore: Send + Sync {
    /// Get the record for `username`, creating it with not-connected
    /// defaults if this is the first time the username has been seen.
    ///
    /// # Errors
    /// Returns [Error::SqlError] if an SQL related error occurred.
    fn find_or_create(&self, username: &str) -> Result<UserAccountRecord, Error>;

    /// Get the record for `username`.
    ///
    /// # Errors
    /// Returns [Error::NotFound] if the username has never logged in, or
    /// [Error::SqlError] if an SQL related error occurred.
    fn get(&self, username: &str) -> Result<UserAccountRecord, Error>;

    /// Store the access credential obtained from a successful exchange and
    /// mark the record connected, as one atomic update.
    ///
    /// # Errors
    /// Returns [Error::NotFound] if the username has never logged in, or
    /// [Error::SqlError] if an SQL related error occurred.
    fn mark_connected(
        &self,
        username: &str,
        access_credential: &str,
        institution_name: &str,
    ) -> Result<(), Error>;
}

/// [UserRecordStore] backed by the application's SQLite database.
#[derive(Debug, Clone)]
pub struct SqliteUserRecordStore {
    connection: Arc<Mutex<Connection>>,
}

impl SqliteUserRecordStore {
    /// Create a new store sharing `connection`.
    pub fn new(connection: Arc<Mutex<Connection>>) -> Self {
        Self { connection }
    }

    fn lock_connection(&self) -> Result<std::sync::MutexGuard<'_, Connection>, Error> {
        self.connection
            .lock()
            .inspect_err(|error| tracing::error!("could not acquire database lock: {error}"))
            .map_err(|_| Error::DatabaseLockError)
    }
}

impl UserRecordStore for SqliteUserRecordStore {
    fn find_or_create(&self, username: &str) -> Result<UserAccountRecord, Error> {
        let connection = self.lock_connection()?;

        connection.execute(
            "INSERT OR IGNORE INTO user_record (username, connection_status) VALUES (?1, ?2)",
            (username, ConnectionStatus::NotConnected.as_str()),
        )?;

        get_user_record(username, &connection)
    }

    fn get(&self, username: &str) -> Result<UserAccountRecord, Error> {
        let connection = self.lock_connection()?;

        get_user_record(username, &connection)
    }

    fn mark_connected(
        &self,
        username: &str,
        access_credential: &str,
        institution_name: &str,
    ) -> Result<(), Error> {
        let connection = self.lock_connection()?;

        let rows_updated = connection.execute(
            "UPDATE user_record
             SET access_credential = ?2,
                 connection_status = ?3,
                 linked_institution_name = ?4
             WHERE username = ?1",
            (
                username,
                access_credential,
                ConnectionStatus::Connected.as_str(),
                institution_name,
            ),
        )?;

        if rows_updated == 0 {
            return Err(Error::NotFound);
        }

        Ok(())
    }
}

// ============================================================================
// DATABASE FUNCTIONS
// ============================================================================

/// Create the user record table.
///
/// # Errors
/// This function will return an error if the SQL query failed.
pub fn create_user_record_table(connection: &Connection) -> Result<(), rusqlite::Error> {
    connection.execute(
        "CREATE TABLE IF NOT EXISTS user_record (
                username TEXT PRIMARY KEY,
                access_credential TEXT,
                connection_status TEXT NOT NULL DEFAULT 'not_connected',
                linked_institution_name TEXT
                )",
        (),
    )?;

    Ok(())
}

/// Retrieve the record for `username`, or [Error::NotFound] if the username
/// has never been seen.
fn get_user_record(username: &str, connection: &Connection) -> Result<UserAccountRecord, Error> {
    connection
        .prepare(
            "SELECT username, access_credential, connection_status, linked_institution_name
             FROM user_record WHERE username = :username",
        )?
        .query_row(&[(":username", username)], map_user_record_row)
        .map_err(|error| error.into())
}

/// Map a database row to a [UserAccountRecord].
fn map_user_record_row(row: &Row) -> Result<UserAccountRecord, rusqlite::Error> {
    let username = row.get(0)?;
    let access_credential = row.get(1)?;
    let raw_status: String = row.get(2)?;
    let linked_institution_name = row.get(3)?;

    let connection_status = match raw_status.as_str() {
        "connected" => ConnectionStatus::Connected,
        "not_connected" => ConnectionStatus::NotConnected,
        other => {
            return Err(rusqlite::Error::FromSqlConversionFailure(
                2,
                rusqlite::types::Type::Text,
                format!("unknown connection status \"{other}\"").into(),
            ));
        }
    };

    Ok(UserAccountRecord {
        username,
        access_credential,
        connection_status,
        linked_institution_name,
    })
}

// ============================================================================
// TESTS
// ============================================================================

#[cfg(test)]
mod user_record_tests {
    use std::sync::{Arc, Mutex};

    use rusqlite::Connection;

    use crate::Error;

    use super::{
        ConnectionStatus, SqliteUserRecordStore, UserRecordStore, create_user_record_table,
    };

    fn get_store() -> SqliteUserRecordStore {
        let connection =
            Connection::open_in_memory().expect("Could not create in-memory SQLite database");
        create_user_record_table(&connection).expect("Could not create user record table");

        SqliteUserRecordStore::new(Arc::new(Mutex::new(connection)))
    }

    #[test]
    fn find_or_create_returns_not_connected_defaults() {
        let store = get_store();

        let record = store.find_or_create("alice").unwrap();

        assert_eq!(record.username, "alice");
        assert_eq!(record.connection_status, ConnectionStatus::NotConnected);
        assert_eq!(record.access_credential, None);
        assert_eq!(record.linked_institution_name, None);
        assert!(!record.is_connected());
    }

    #[test]
    fn find_or_create_does_not_overwrite_existing_record() {
        let store = get_store();
        store.find_or_create("alice").unwrap();
        store
            .mark_connected("alice", "access-token-123", "Chase")
            .unwrap();

        let record = store.find_or_create("alice").unwrap();

        assert_eq!(record.connection_status, ConnectionStatus::Connected);
        assert_eq!(record.access_credential.as_deref(), Some("access-token-123"));
        assert_eq!(record.linked_institution_name.as_deref(), Some("Chase"));
    }

    #[test]
    fn get_fails_for_unknown_username() {
        let store = get_store();

        assert_eq!(store.get("nobody"), Err(Error::NotFound));
    }

    #[test]
    fn mark_connected_updates_all_linking_fields_together() {
        let store = get_store();
        store.find_or_create("bob").unwrap();

        store
            .mark_connected("bob", "access-token-456", "First National")
            .unwrap();

        let record = store.get("bob").unwrap();
        assert!(record.is_connected());
        assert_eq!(record.access_credential.as_deref(), Some("access-token-456"));
        assert_eq!(
            record.linked_institution_name.as_deref(),
            Some("First National")
        );
    }

    #[test]
    fn mark_connected_fails_for_unknown_username() {
        let store = get_store();

        let result = store.mark_connected("nobody", "access-token-789", "Chase");

        assert_eq!(result, Err(Error::NotFound));
    }

    #[test]
    fn connected_status_always_pairs_with_credential() {
        let store = get_store();
        store.find_or_create("carol").unwrap();

        let before = store.get("carol").unwrap();
        assert_eq!(
            before.is_connected(),
            before.access_credential.is_some(),
            "record must never be connected without a credential"
        );

        store.mark_connected("carol", "access-token-abc", "Chase").unwrap();

        let after = store.get("carol").unwrap();
        assert_eq!(after.is_connected(), after.access_credential.is_some());
        assert!(after.is_connected());
    }
}
