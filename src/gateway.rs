//! The boundary between the application and its two external collaborators:
//! the aggregator API and the user record store.
//!
//! [AccountGateway] normalizes both so the linking flow and the pages only
//! ever see application errors and domain types. It also owns the one piece
//! of compensation state in the system: an access credential obtained from a
//! successful exchange whose database write failed, retained in memory so
//! the write alone can be retried. Exchange tokens are single-use, so
//! re-running the exchange is never an option.

use std::{
    collections::HashMap,
    sync::{Arc, Mutex},
};

use crate::{
    Error,
    aggregator::{AggregatorClient, AuthNumbers, LinkSession, TransactionsFeed},
    user_record::{UserAccountRecord, UserRecordStore},
};

/// An access credential that was obtained upstream but not yet saved.
#[derive(Debug, Clone)]
struct RetainedCredential {
    access_credential: String,
    institution_name: String,
}

/// Wraps the aggregator client and the user record store.
#[derive(Clone)]
pub struct AccountGateway {
    client: Arc<dyn AggregatorClient>,
    records: Arc<dyn UserRecordStore>,
    retained: Arc<Mutex<HashMap<String, RetainedCredential>>>,
}

impl AccountGateway {
    /// Create a gateway over `client` and `records`.
    pub fn new(client: Arc<dyn AggregatorClient>, records: Arc<dyn UserRecordStore>) -> Self {
        Self {
            client,
            records,
            retained: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Request a link session for `username` from the aggregator.
    ///
    /// # Errors
    /// Returns [Error::UpstreamUnavailable] if the aggregator cannot be
    /// reached and [Error::Unauthorized] if it rejects the application
    /// credentials.
    pub async fn create_link_session(&self, username: &str) -> Result<LinkSession, Error> {
        self.client.create_link_session(username).await
    }

    /// Exchange `raw_token` for a durable access credential and persist the
    /// connection for `username`.
    ///
    /// The credential, connected status, and institution name are written as
    /// a single update so a concurrent reader never observes a record that
    /// is connected without a credential or vice versa.
    ///
    /// # Errors
    /// Returns [Error::ExchangeRejected] if the aggregator refuses the
    /// token. Returns [Error::Persistence] if the record update fails after
    /// a successful exchange; the obtained credential is retained in memory
    /// so [AccountGateway::retry_persistence] can attempt the write again.
    pub async fn exchange_credential(
        &self,
        username: &str,
        raw_token: &str,
        institution_name: &str,
    ) -> Result<(), Error> {
        let outcome = self.client.exchange_public_token(raw_token).await?;

        tracing::info!(username, item_id = %outcome.item_id, "exchanged linking credential");

        self.persist_connection(
            username,
            outcome.access_credential,
            institution_name.to_owned(),
        )
    }

    /// Retry the record update for a connection whose exchange succeeded but
    /// whose persistence failed.
    ///
    /// This never contacts the aggregator. The retained credential is
    /// dropped once the write succeeds.
    ///
    /// # Errors
    /// Returns [Error::NotFound] if there is nothing retained for
    /// `username`, or [Error::Persistence] if the write failed again.
    pub fn retry_persistence(&self, username: &str) -> Result<(), Error> {
        let retained = {
            let retained = self
                .retained
                .lock()
                .inspect_err(|error| {
                    tracing::error!("could not acquire retained credential lock: {error}")
                })
                .map_err(|_| Error::LinkStateLockError)?;

            retained.get(username).cloned()
        };

        match retained {
            Some(credential) => self.persist_connection(
                username,
                credential.access_credential,
                credential.institution_name,
            ),
            None => Err(Error::NotFound),
        }
    }

    /// Read the stored account record for `username`.
    ///
    /// # Errors
    /// Returns [Error::NotFound] if the username has never logged in.
    pub fn fetch_user_status(&self, username: &str) -> Result<UserAccountRecord, Error> {
        self.records.get(username)
    }

    /// Fetch the transaction feed for the account `username` has linked.
    ///
    /// # Errors
    /// Returns [Error::NotConnected] if the user has not completed linking.
    pub async fn fetch_transactions(&self, username: &str) -> Result<TransactionsFeed, Error> {
        let record = self.records.get(username)?;

        let Some(access_credential) = record.access_credential else {
            return Err(Error::NotConnected);
        };

        self.client.fetch_transactions(&access_credential).await
    }

    /// Fetch ACH account/routing numbers for the account `username` has
    /// linked.
    ///
    /// # Errors
    /// Returns [Error::NotConnected] if the user has not completed linking.
    pub async fn fetch_auth_numbers(&self, username: &str) -> Result<AuthNumbers, Error> {
        let record = self.records.get(username)?;

        let Some(access_credential) = record.access_credential else {
            return Err(Error::NotConnected);
        };

        self.client.fetch_auth_numbers(&access_credential).await
    }

    fn persist_connection(
        &self,
        username: &str,
        access_credential: String,
        institution_name: String,
    ) -> Result<(), Error> {
        match self
            .records
            .mark_connected(username, &access_credential, &institution_name)
        {
            Ok(()) => {
                match self.retained.lock() {
                    Ok(mut retained) => {
                        retained.remove(username);
                    }
                    Err(error) => {
                        tracing::error!(
                            "could not clear retained credential for {username}: {error}"
                        );
                    }
                }

                Ok(())
            }
            Err(error) => {
                tracing::error!("could not persist connection details for {username}: {error}");

                match self.retained.lock() {
                    Ok(mut retained) => {
                        retained.insert(
                            username.to_owned(),
                            RetainedCredential {
                                access_credential,
                                institution_name,
                            },
                        );
                        tracing::warn!(
                            "retained access credential for {username} until persistence succeeds"
                        );
                    }
                    Err(lock_error) => {
                        tracing::error!(
                            "could not retain access credential for {username}: {lock_error}"
                        );
                    }
                }

                Err(Error::Persistence(error.to_string()))
            }
        }
    }
}

#[cfg(test)]
mod gateway_tests {
    use std::sync::{
        Arc, Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    };

    use async_trait::async_trait;
    use rusqlite::Connection;
    use time::macros::date;

    use crate::{
        Error,
        aggregator::{
            AggregatorClient, AuthNumbers, LinkSession, TransactionRecord, TransactionsFeed,
            contract::{AccountRecord, ExchangeOutcome, NumberSets},
        },
        user_record::{
            ConnectionStatus, SqliteUserRecordStore, UserAccountRecord, UserRecordStore,
            create_user_record_table,
        },
    };

    use super::AccountGateway;

    struct StubAggregatorClient {
        exchange_calls: AtomicUsize,
    }

    impl StubAggregatorClient {
        fn new() -> Self {
            Self {
                exchange_calls: AtomicUsize::new(0),
            }
        }
    }

    #[async_trait]
    impl AggregatorClient for StubAggregatorClient {
        async fn create_link_session(&self, username: &str) -> Result<LinkSession, Error> {
            Ok(LinkSession {
                session_token: format!("link-token-for-{username}"),
                expiry: None,
            })
        }

        async fn exchange_public_token(
            &self,
            public_token: &str,
        ) -> Result<ExchangeOutcome, Error> {
            self.exchange_calls.fetch_add(1, Ordering::SeqCst);

            Ok(ExchangeOutcome {
                access_credential: format!("access-from-{public_token}"),
                item_id: "item-1".to_owned(),
            })
        }

        async fn fetch_transactions(
            &self,
            _access_credential: &str,
        ) -> Result<TransactionsFeed, Error> {
            Ok(TransactionsFeed {
                added: vec![TransactionRecord {
                    account_id: "acc-1".to_owned(),
                    merchant_name: Some("Corner Cafe".to_owned()),
                    amount: 4.2,
                    currency_code: Some("USD".to_owned()),
                    date: date!(2024 - 06 - 01),
                    category: Some(vec!["Food and Drink".to_owned()]),
                }],
                accounts: vec![AccountRecord {
                    account_id: "acc-1".to_owned(),
                    name: "Plaid Checking".to_owned(),
                }],
            })
        }

        async fn fetch_auth_numbers(&self, _access_credential: &str) -> Result<AuthNumbers, Error> {
            Ok(AuthNumbers {
                accounts: Vec::new(),
                numbers: NumberSets { ach: Vec::new() },
            })
        }
    }

    struct RejectingClient;

    #[async_trait]
    impl AggregatorClient for RejectingClient {
        async fn create_link_session(&self, _username: &str) -> Result<LinkSession, Error> {
            todo!()
        }

        async fn exchange_public_token(
            &self,
            _public_token: &str,
        ) -> Result<ExchangeOutcome, Error> {
            Err(Error::ExchangeRejected(
                "public token already exchanged".to_owned(),
            ))
        }

        async fn fetch_transactions(
            &self,
            _access_credential: &str,
        ) -> Result<TransactionsFeed, Error> {
            todo!()
        }

        async fn fetch_auth_numbers(
            &self,
            _access_credential: &str,
        ) -> Result<AuthNumbers, Error> {
            todo!()
        }
    }

    /// Store whose writes can be made to fail, for exercising the
    /// persistence retry path.
    struct FlakyRecordStore {
        inner: SqliteUserRecordStore,
        fail_writes: AtomicBool,
    }

    impl UserRecordStore for FlakyRecordStore {
        fn find_or_create(&self, username: &str) -> Result<UserAccountRecord, Error> {
            self.inner.find_or_create(username)
        }

        fn get(&self, username: &str) -> Result<UserAccountRecord, Error> {
            self.inner.get(username)
        }

        fn mark_connected(
            &self,
            username: &str,
            access_credential: &str,
            institution_name: &str,
        ) -> Result<(), Error> {
            if self.fail_writes.load(Ordering::SeqCst) {
                return Err(Error::DatabaseLockError);
            }

            self.inner
                .mark_connected(username, access_credential, institution_name)
        }
    }

    fn get_record_store() -> SqliteUserRecordStore {
        let connection =
            Connection::open_in_memory().expect("Could not create in-memory SQLite database");
        create_user_record_table(&connection).expect("Could not create user record table");

        SqliteUserRecordStore::new(Arc::new(Mutex::new(connection)))
    }

    #[tokio::test]
    async fn create_link_session_forwards_username() {
        let gateway = AccountGateway::new(
            Arc::new(StubAggregatorClient::new()),
            Arc::new(get_record_store()),
        );

        let session = gateway.create_link_session("alice").await.unwrap();

        assert_eq!(session.session_token, "link-token-for-alice");
    }

    #[tokio::test]
    async fn exchange_credential_persists_connection() {
        let records = Arc::new(get_record_store());
        records.find_or_create("alice").unwrap();
        let gateway = AccountGateway::new(Arc::new(StubAggregatorClient::new()), records.clone());

        gateway
            .exchange_credential("alice", "public-token-1", "Chase")
            .await
            .unwrap();

        let record = records.get("alice").unwrap();
        assert_eq!(record.connection_status, ConnectionStatus::Connected);
        assert_eq!(
            record.access_credential.as_deref(),
            Some("access-from-public-token-1")
        );
        assert_eq!(record.linked_institution_name.as_deref(), Some("Chase"));
    }

    #[tokio::test]
    async fn exchange_credential_surfaces_rejection_and_leaves_record_unchanged() {
        let records = Arc::new(get_record_store());
        records.find_or_create("alice").unwrap();
        let gateway = AccountGateway::new(Arc::new(RejectingClient), records.clone());

        let result = gateway
            .exchange_credential("alice", "public-token-1", "Chase")
            .await;

        assert!(matches!(result, Err(Error::ExchangeRejected(_))));

        let record = records.get("alice").unwrap();
        assert_eq!(record.connection_status, ConnectionStatus::NotConnected);
        assert_eq!(record.access_credential, None);
    }

    #[tokio::test]
    async fn failed_persistence_retains_credential_for_storage_only_retry() {
        let client = Arc::new(StubAggregatorClient::new());
        let records = Arc::new(FlakyRecordStore {
            inner: get_record_store(),
            fail_writes: AtomicBool::new(true),
        });
        records.find_or_create("alice").unwrap();
        let gateway = AccountGateway::new(client.clone(), records.clone());

        let result = gateway
            .exchange_credential("alice", "public-token-1", "Chase")
            .await;

        assert!(matches!(result, Err(Error::Persistence(_))));
        assert_eq!(
            records.get("alice").unwrap().connection_status,
            ConnectionStatus::NotConnected
        );

        // The storage comes back and the retry must reuse the credential
        // from the original exchange rather than exchanging again.
        records.fail_writes.store(false, Ordering::SeqCst);

        gateway.retry_persistence("alice").unwrap();

        let record = records.get("alice").unwrap();
        assert_eq!(record.connection_status, ConnectionStatus::Connected);
        assert_eq!(
            record.access_credential.as_deref(),
            Some("access-from-public-token-1")
        );
        assert_eq!(client.exchange_calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn retry_persistence_clears_retained_credential_after_success() {
        let records = Arc::new(FlakyRecordStore {
            inner: get_record_store(),
            fail_writes: AtomicBool::new(true),
        });
        records.find_or_create("alice").unwrap();
        let gateway = AccountGateway::new(Arc::new(StubAggregatorClient::new()), records.clone());

        let _ = gateway
            .exchange_credential("alice", "public-token-1", "Chase")
            .await;
        records.fail_writes.store(false, Ordering::SeqCst);
        gateway.retry_persistence("alice").unwrap();

        assert_eq!(gateway.retry_persistence("alice"), Err(Error::NotFound));
    }

    #[tokio::test]
    async fn retry_persistence_without_retained_credential_fails() {
        let gateway = AccountGateway::new(
            Arc::new(StubAggregatorClient::new()),
            Arc::new(get_record_store()),
        );

        assert_eq!(gateway.retry_persistence("alice"), Err(Error::NotFound));
    }

    #[tokio::test]
    async fn retry_persistence_reports_poisoned_retained_lock_as_link_state_error() {
        let gateway = AccountGateway::new(
            Arc::new(StubAggregatorClient::new()),
            Arc::new(get_record_store()),
        );

        let retained = gateway.retained.clone();
        std::thread::spawn(move || {
            let _guard = retained.lock().unwrap();
            panic!("poison the retained credential lock");
        })
        .join()
        .unwrap_err();

        assert_eq!(
            gateway.retry_persistence("alice"),
            Err(Error::LinkStateLockError)
        );
    }

    #[tokio::test]
    async fn fetch_transactions_requires_connection() {
        let records = Arc::new(get_record_store());
        records.find_or_create("alice").unwrap();
        let gateway = AccountGateway::new(Arc::new(StubAggregatorClient::new()), records);

        let result = gateway.fetch_transactions("alice").await;

        assert_eq!(result, Err(Error::NotConnected));
    }

    #[tokio::test]
    async fn fetch_transactions_returns_feed_once_connected() {
        let records = Arc::new(get_record_store());
        records.find_or_create("alice").unwrap();
        let gateway = AccountGateway::new(Arc::new(StubAggregatorClient::new()), records.clone());
        gateway
            .exchange_credential("alice", "public-token-1", "Chase")
            .await
            .unwrap();

        let feed = gateway.fetch_transactions("alice").await.unwrap();

        assert_eq!(feed.added.len(), 1);
        assert_eq!(feed.accounts[0].name, "Plaid Checking");
    }

    #[tokio::test]
    async fn fetch_auth_numbers_requires_connection() {
        let records = Arc::new(get_record_store());
        records.find_or_create("alice").unwrap();
        let gateway = AccountGateway::new(Arc::new(StubAggregatorClient::new()), records);

        let result = gateway.fetch_auth_numbers("alice").await;

        assert_eq!(result, Err(Error::NotConnected));
    }
}
