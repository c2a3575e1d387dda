//! The state machine that walks each user through linking a bank account.
//!
//! A linking attempt moves through the phases in [LinkPhase]: a session
//! token is requested from the aggregator, the external linking UI runs
//! until the user completes or abandons it, and the resulting single-use
//! credential is exchanged for a durable one. Every user gets their own
//! flow, keyed by username.

use std::{
    collections::{HashMap, VecDeque},
    sync::{Arc, Mutex, MutexGuard},
};

use crate::{Error, gateway::AccountGateway};

/// Upper bound on buffered progress events per linking flow.
///
/// The linking UI may emit any number of events while it is open, so the log
/// drops its oldest entry once full.
const PROGRESS_EVENT_LIMIT: usize = 32;

/// The single-use credential produced when the user completes the linking
/// UI.
///
/// Exists only between the UI's success callback and the exchange call, it
/// is never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ExchangeCredential {
    /// Short-lived token to exchange for a durable access credential.
    pub raw_token: String,

    /// Institution name reported in the linking UI's success metadata.
    pub institution_name: String,
}

/// A named notification the linking UI reported while it was open.
#[derive(Debug, Clone, PartialEq)]
pub struct ProgressEvent {
    /// The event name reported by the linking UI, e.g. "OPEN".
    pub name: String,

    /// Extra detail the linking UI attached to the event.
    pub metadata: Option<serde_json::Value>,
}

/// Where a user currently is in the bank linking flow.
#[derive(Debug, Clone, PartialEq, Default)]
pub enum LinkPhase {
    /// No linking attempt is in progress.
    #[default]
    Idle,

    /// A session token has been requested from the aggregator but not
    /// received yet.
    SessionRequested,

    /// The linking UI holds the session token and the flow is waiting on
    /// the user.
    AwaitingUserCompletion {
        /// The token driving the open linking UI.
        session_token: String,
    },

    /// The user completed the linking UI. Either the token exchange is in
    /// flight, or it succeeded and only the record write remains to be
    /// retried.
    ExchangePending {
        /// The captured credential while the exchange call is in flight.
        /// Cleared once the exchange has happened; after a failed record
        /// write the retained copy lives in the gateway.
        credential: Option<ExchangeCredential>,
    },

    /// The exchange completed and the connection details are saved.
    Connected,
}

impl LinkPhase {
    /// A short lowercase description for error messages and logs.
    pub fn describe(&self) -> &'static str {
        match self {
            LinkPhase::Idle => "idle",
            LinkPhase::SessionRequested => "requesting a session",
            LinkPhase::AwaitingUserCompletion { .. } => "awaiting user completion",
            LinkPhase::ExchangePending { .. } => "exchanging the credential",
            LinkPhase::Connected => "connected",
        }
    }
}

/// The linking state tracked for one user.
#[derive(Debug, Default)]
struct LinkFlow {
    phase: LinkPhase,
    progress: VecDeque<ProgressEvent>,
}

/// Drives the linking flow for every user of the application.
///
/// Flows are keyed by username and isolated from each other: one user's
/// open linking UI never blocks another user's. The internal lock is only
/// held to inspect or swap a phase, never across a call to the aggregator.
#[derive(Clone)]
pub struct LinkSessionController {
    gateway: AccountGateway,
    flows: Arc<Mutex<HashMap<String, LinkFlow>>>,
}

impl LinkSessionController {
    /// Create a controller that links accounts through `gateway`.
    pub fn new(gateway: AccountGateway) -> Self {
        Self {
            gateway,
            flows: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    /// Start a linking attempt for `username` and return the session token
    /// to hand to the linking UI.
    ///
    /// # Errors
    /// Returns [Error::SessionAlreadyActive] if the user's flow is not idle,
    /// including when the user is already connected. Returns
    /// [Error::SessionCreation] if the aggregator does not issue a token;
    /// the flow returns to idle so the user can try again.
    pub async fn begin(&self, username: &str) -> Result<String, Error> {
        {
            let mut flows = self.lock_flows()?;
            let flow = flows.entry(username.to_owned()).or_default();

            if flow.phase != LinkPhase::Idle {
                return Err(Error::SessionAlreadyActive);
            }

            flow.phase = LinkPhase::SessionRequested;
            flow.progress.clear();
        }

        match self.gateway.create_link_session(username).await {
            Ok(session) => {
                tracing::info!("created link session for {username}");

                self.set_phase(
                    username,
                    LinkPhase::AwaitingUserCompletion {
                        session_token: session.session_token.clone(),
                    },
                );

                Ok(session.session_token)
            }
            Err(error) => {
                self.set_phase(username, LinkPhase::Idle);

                Err(Error::SessionCreation(error.to_string()))
            }
        }
    }

    /// Exchange the credential captured by the linking UI's success callback
    /// and persist the connection for `username`.
    ///
    /// # Errors
    /// Returns [Error::IllegalLinkState] if no linking UI is awaiting
    /// completion for this user; no exchange call is attempted in that case.
    /// Returns [Error::ExchangeRejected] or [Error::UpstreamUnavailable] if
    /// the exchange fails, resetting the flow to idle since the credential
    /// is single use. Returns [Error::Persistence] if the exchange succeeded
    /// but the record write failed; the flow stays exchange-pending so
    /// [LinkSessionController::retry_persistence] can retry the write alone.
    pub async fn complete(
        &self,
        username: &str,
        credential: ExchangeCredential,
    ) -> Result<(), Error> {
        {
            let mut flows = self.lock_flows()?;
            let flow = flows.entry(username.to_owned()).or_default();

            let LinkPhase::AwaitingUserCompletion { .. } = flow.phase else {
                return Err(Error::IllegalLinkState(format!(
                    "cannot exchange a credential while {}",
                    flow.phase.describe()
                )));
            };

            flow.phase = LinkPhase::ExchangePending {
                credential: Some(credential.clone()),
            };
        }

        let result = self
            .gateway
            .exchange_credential(
                username,
                &credential.raw_token,
                &credential.institution_name,
            )
            .await;

        match result {
            Ok(()) => {
                tracing::info!("bank account connected for {username}");

                self.set_phase(username, LinkPhase::Connected);

                Ok(())
            }
            Err(Error::Persistence(message)) => {
                // The exchange itself succeeded and the gateway retains the
                // obtained credential, so only the record write is retried.
                self.set_phase(username, LinkPhase::ExchangePending { credential: None });

                Err(Error::Persistence(message))
            }
            Err(error) => {
                self.set_phase(username, LinkPhase::Idle);

                Err(error)
            }
        }
    }

    /// Handle the linking UI closing without success, returning the flow to
    /// idle.
    ///
    /// `reason` is the error the linking UI reported, absent when the user
    /// simply cancelled. The exit is ignored when no linking UI is awaiting
    /// completion, e.g. when it raced a success callback.
    ///
    /// # Errors
    /// Returns [Error::LinkStateLockError] if the flow state is
    /// inaccessible.
    pub fn exit(&self, username: &str, reason: Option<String>) -> Result<(), Error> {
        let mut flows = self.lock_flows()?;
        let flow = flows.entry(username.to_owned()).or_default();

        match flow.phase {
            LinkPhase::AwaitingUserCompletion { .. } => {
                match reason {
                    Some(reason) => {
                        tracing::info!("linking abandoned for {username}: {reason}")
                    }
                    None => tracing::info!("linking cancelled by {username}"),
                }

                flow.phase = LinkPhase::Idle;
            }
            ref phase => {
                tracing::debug!(
                    "ignoring linking exit for {username} while {}",
                    phase.describe()
                );
            }
        }

        Ok(())
    }

    /// Record a progress event the linking UI reported while open.
    ///
    /// Events are informational and never transition the flow. Events that
    /// arrive while no linking UI is awaiting completion are dropped.
    ///
    /// # Errors
    /// Returns [Error::LinkStateLockError] if the flow state is
    /// inaccessible.
    pub fn record_progress(
        &self,
        username: &str,
        name: String,
        metadata: Option<serde_json::Value>,
    ) -> Result<(), Error> {
        let mut flows = self.lock_flows()?;
        let flow = flows.entry(username.to_owned()).or_default();

        let LinkPhase::AwaitingUserCompletion { .. } = flow.phase else {
            tracing::debug!(
                "dropping linking event {name} for {username} while {}",
                flow.phase.describe()
            );

            return Ok(());
        };

        tracing::debug!("linking event for {username}: {name}");

        if flow.progress.len() == PROGRESS_EVENT_LIMIT {
            flow.progress.pop_front();
        }

        flow.progress.push_back(ProgressEvent { name, metadata });

        Ok(())
    }

    /// Retry the record write for a connection whose exchange succeeded but
    /// whose persistence failed.
    ///
    /// # Errors
    /// Returns [Error::IllegalLinkState] unless the flow is waiting on
    /// exactly this retry. Returns [Error::Persistence] if the write failed
    /// again, leaving the flow retryable.
    pub fn retry_persistence(&self, username: &str) -> Result<(), Error> {
        {
            let mut flows = self.lock_flows()?;
            let flow = flows.entry(username.to_owned()).or_default();

            match flow.phase {
                LinkPhase::ExchangePending { credential: None } => {}
                ref phase => {
                    return Err(Error::IllegalLinkState(format!(
                        "cannot retry saving the connection while {}",
                        phase.describe()
                    )));
                }
            }
        }

        self.gateway.retry_persistence(username)?;

        tracing::info!("bank account connected for {username} after retrying the record write");

        self.set_phase(username, LinkPhase::Connected);

        Ok(())
    }

    /// The phase `username`'s flow is currently in.
    ///
    /// Users without a flow are idle.
    ///
    /// # Errors
    /// Returns [Error::LinkStateLockError] if the flow state is
    /// inaccessible.
    pub fn phase(&self, username: &str) -> Result<LinkPhase, Error> {
        let flows = self.lock_flows()?;

        Ok(flows
            .get(username)
            .map(|flow| flow.phase.clone())
            .unwrap_or_default())
    }

    /// The progress events buffered for `username`'s current flow.
    #[cfg(test)]
    pub fn progress_events(&self, username: &str) -> Result<Vec<ProgressEvent>, Error> {
        let flows = self.lock_flows()?;

        Ok(flows
            .get(username)
            .map(|flow| flow.progress.iter().cloned().collect())
            .unwrap_or_default())
    }

    fn lock_flows(&self) -> Result<MutexGuard<'_, HashMap<String, LinkFlow>>, Error> {
        self.flows
            .lock()
            .inspect_err(|error| tracing::error!("could not acquire link state lock: {error}"))
            .map_err(|_| Error::LinkStateLockError)
    }

    fn set_phase(&self, username: &str, phase: LinkPhase) {
        match self.flows.lock() {
            Ok(mut flows) => {
                flows.entry(username.to_owned()).or_default().phase = phase;
            }
            Err(error) => {
                tracing::error!("could not update link state for {username}: {error}");
            }
        }
    }
}
