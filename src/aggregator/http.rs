//! [AggregatorClient] implementation over the aggregator's hosted REST API.

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::{Deserialize, Serialize, de::DeserializeOwned};

use crate::{
    Error,
    aggregator::{
        client::AggregatorClient,
        contract::{AuthNumbers, ExchangeOutcome, LinkSession, TransactionsFeed},
    },
};

/// The application name shown to the user inside the linking UI.
const CLIENT_NAME: &str = "LedgerLink";

/// Talks to the aggregator over HTTPS.
///
/// Application credentials are sent with every request using HTTP basic
/// auth, which is why they are stored here rather than in any request body.
#[derive(Debug, Clone)]
pub struct HttpAggregatorClient {
    base_url: Url,
    client_id: String,
    secret: String,
    http: reqwest::Client,
}

impl HttpAggregatorClient {
    /// Create a client for the aggregator environment at `base_url`.
    ///
    /// # Errors
    /// Returns [Error::InvalidAggregatorUrl] if `base_url` cannot be parsed
    /// as an absolute URL.
    pub fn new(base_url: &str, client_id: String, secret: String) -> Result<Self, Error> {
        let base_url =
            Url::parse(base_url).map_err(|error| Error::InvalidAggregatorUrl(error.to_string()))?;

        Ok(Self {
            base_url,
            client_id,
            secret,
            http: reqwest::Client::new(),
        })
    }

    async fn post_json<Payload: Serialize>(
        &self,
        path: &str,
        payload: &Payload,
    ) -> Result<reqwest::Response, Error> {
        let endpoint = self
            .base_url
            .join(path)
            .map_err(|error| Error::InvalidAggregatorUrl(error.to_string()))?;

        self.http
            .post(endpoint)
            .basic_auth(&self.client_id, Some(&self.secret))
            .json(payload)
            .send()
            .await
            .inspect_err(|error| tracing::warn!("aggregator request to {path} failed: {error}"))
            .map_err(|error| Error::UpstreamUnavailable(error.to_string()))
    }
}

#[async_trait]
impl AggregatorClient for HttpAggregatorClient {
    async fn create_link_session(&self, username: &str) -> Result<LinkSession, Error> {
        let response = self
            .post_json(
                "link/token/create",
                &CreateLinkSessionRequest {
                    user: LinkSessionUser {
                        client_user_id: username,
                    },
                    client_name: CLIENT_NAME,
                    language: "en",
                    country_codes: &["US"],
                    products: &["auth", "transactions"],
                },
            )
            .await?;

        expect_success("link/token/create", response).await
    }

    async fn exchange_public_token(&self, public_token: &str) -> Result<ExchangeOutcome, Error> {
        let response = self
            .post_json(
                "item/public_token/exchange",
                &ExchangePublicTokenRequest { public_token },
            )
            .await?;
        let status = response.status();

        if status.is_success() {
            return decode_body("item/public_token/exchange", response).await;
        }

        let message = read_error_message(response).await;

        match status {
            StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::Unauthorized),
            // The common rejection is reuse of an already-exchanged token.
            status if status.is_client_error() => Err(Error::ExchangeRejected(message)),
            _ => Err(Error::UpstreamUnavailable(message)),
        }
    }

    async fn fetch_transactions(
        &self,
        access_credential: &str,
    ) -> Result<TransactionsFeed, Error> {
        let response = self
            .post_json(
                "transactions/sync",
                &AccessCredentialRequest {
                    access_token: access_credential,
                },
            )
            .await?;

        expect_success("transactions/sync", response).await
    }

    async fn fetch_auth_numbers(&self, access_credential: &str) -> Result<AuthNumbers, Error> {
        let response = self
            .post_json(
                "auth/get",
                &AccessCredentialRequest {
                    access_token: access_credential,
                },
            )
            .await?;

        expect_success("auth/get", response).await
    }
}

/// Decode a success response, or map the error status into the application
/// error taxonomy.
async fn expect_success<Response: DeserializeOwned>(
    path: &str,
    response: reqwest::Response,
) -> Result<Response, Error> {
    let status = response.status();

    if status.is_success() {
        return decode_body(path, response).await;
    }

    let message = read_error_message(response).await;

    match status {
        StatusCode::UNAUTHORIZED | StatusCode::FORBIDDEN => Err(Error::Unauthorized),
        _ => Err(Error::UpstreamUnavailable(message)),
    }
}

async fn decode_body<Response: DeserializeOwned>(
    path: &str,
    response: reqwest::Response,
) -> Result<Response, Error> {
    response.json().await.map_err(|error| {
        tracing::error!("could not decode aggregator response from {path}: {error}");
        Error::UpstreamUnavailable(format!("invalid response body: {error}"))
    })
}

/// Pull the human-readable message out of an aggregator error body.
async fn read_error_message(response: reqwest::Response) -> String {
    response
        .json::<ErrorResponse>()
        .await
        .map(|body| body.error_message)
        .unwrap_or_else(|_| "unknown error".to_owned())
}

#[derive(Debug, Serialize)]
struct CreateLinkSessionRequest<'a> {
    user: LinkSessionUser<'a>,
    client_name: &'a str,
    language: &'a str,
    country_codes: &'a [&'a str],
    products: &'a [&'a str],
}

#[derive(Debug, Serialize)]
struct LinkSessionUser<'a> {
    client_user_id: &'a str,
}

#[derive(Debug, Serialize)]
struct ExchangePublicTokenRequest<'a> {
    public_token: &'a str,
}

#[derive(Debug, Serialize)]
struct AccessCredentialRequest<'a> {
    access_token: &'a str,
}

#[derive(Debug, Deserialize)]
struct ErrorResponse {
    error_message: String,
}
