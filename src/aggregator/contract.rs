//! The typed request/response contract for the aggregator's REST API.
//!
//! Field names follow the aggregator's wire format where they differ from
//! the names used in the rest of the application.

use serde::{Deserialize, Serialize};
use time::Date;

/// A link session issued by the aggregator.
///
/// The session token authorizes one instance of the external linking UI to
/// operate. It is conceptually single-use and the aggregator enforces its
/// TTL, so the expiry is kept as an opaque string for logging only.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LinkSession {
    /// Opaque token handed to the external linking UI.
    #[serde(rename = "link_token")]
    pub session_token: String,

    /// When the aggregator will stop accepting the token, if reported.
    #[serde(rename = "expiration", default)]
    pub expiry: Option<String>,
}

/// The durable credential obtained by exchanging a short-lived public token.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ExchangeOutcome {
    /// Durable secret used for all subsequent data-fetch calls.
    #[serde(rename = "access_token")]
    pub access_credential: String,

    /// The aggregator's identifier for this username-to-institution linkage.
    pub item_id: String,
}

/// One linked account as reported by the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AccountRecord {
    /// The aggregator's stable identifier for the account.
    pub account_id: String,

    /// The institution's display name for the account, e.g. "Plaid Checking".
    pub name: String,
}

/// A single transaction from the aggregator's feed.
///
/// Records are read-only: the application never writes transactions back.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionRecord {
    /// The account the transaction was posted to.
    pub account_id: String,

    /// The cleaned-up merchant name, when the aggregator could derive one.
    #[serde(default)]
    pub merchant_name: Option<String>,

    /// Signed amount. Positive values are spend (debits), negative values
    /// are credits such as refunds and income.
    pub amount: f64,

    /// ISO 4217 currency code, absent for unofficial currencies.
    #[serde(rename = "iso_currency_code", default)]
    pub currency_code: Option<String>,

    /// The calendar date the transaction posted. No time component.
    pub date: Date,

    /// Category hierarchy, most general label first. Absent when the
    /// aggregator could not categorize the transaction.
    #[serde(default)]
    pub category: Option<Vec<String>>,
}

/// The transaction feed for one linked item.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TransactionsFeed {
    /// Transactions added since the feed was created.
    pub added: Vec<TransactionRecord>,

    /// The accounts the transactions belong to.
    pub accounts: Vec<AccountRecord>,
}

/// Account and routing numbers for the linked item's depository accounts.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AuthNumbers {
    /// The accounts covered by `numbers`.
    pub accounts: Vec<AccountRecord>,

    /// Per-network number sets.
    pub numbers: NumberSets,
}

/// Number sets grouped by payment network.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NumberSets {
    /// ACH account/routing number pairs.
    pub ach: Vec<AchNumbers>,
}

/// ACH numbers for one account.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AchNumbers {
    /// The account the numbers belong to.
    pub account_id: String,

    /// The full account number.
    pub account: String,

    /// The bank's routing number.
    pub routing: String,
}
