//! The interface the rest of the application uses to talk to the
//! aggregator.

use async_trait::async_trait;

use crate::{
    Error,
    aggregator::contract::{AuthNumbers, ExchangeOutcome, LinkSession, TransactionsFeed},
};

/// Calls against the financial-data aggregator's API.
///
/// The application consumes this as a trait object so tests can drive the
/// linking flow without a network.
#[async_trait]
pub trait AggregatorClient: Send + Sync {
    /// Create a link session authorizing one linking-UI instance for
    /// `username`.
    ///
    /// # Errors
    /// Returns [Error::UpstreamUnavailable] if the aggregator cannot be
    /// reached and [Error::Unauthorized] if it rejects the application
    /// credentials.
    async fn create_link_session(&self, username: &str) -> Result<LinkSession, Error>;

    /// Exchange the short-lived `public_token` produced by the linking UI
    /// for a durable access credential.
    ///
    /// # Errors
    /// Returns [Error::ExchangeRejected] if the aggregator refuses the
    /// token, for example because it was already exchanged once.
    async fn exchange_public_token(&self, public_token: &str) -> Result<ExchangeOutcome, Error>;

    /// Fetch the transaction feed for a linked item.
    async fn fetch_transactions(&self, access_credential: &str)
    -> Result<TransactionsFeed, Error>;

    /// Fetch ACH account/routing numbers for a linked item.
    async fn fetch_auth_numbers(&self, access_credential: &str) -> Result<AuthNumbers, Error>;
}
