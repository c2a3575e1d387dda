//! Aggregator module
//!
//! Provides the typed contract for the financial-data aggregator's API, the
//! [AggregatorClient] trait the rest of the application consumes, and the
//! HTTP implementation used in production.

mod client;
pub(crate) mod contract;
mod http;

pub use client::AggregatorClient;
pub use contract::{AuthNumbers, LinkSession, TransactionRecord, TransactionsFeed};
pub use http::HttpAggregatorClient;
