//! The application session and the single-flight token exchange.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use futures::FutureExt;
use futures::future::{BoxFuture, Shared};
use parking_lot::{Mutex, RwLock};

use crate::error::{CancelReason, Error};
use crate::exchange::TokenExchanger;
use crate::transport::Transport;
use crate::types::{IdentityAssertion, UserProfile};

/// Backend-issued credentials plus the provider identity they belong to.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ApplicationSession {
    pub access_token: String,
    pub token_type: String,
    /// Identity-provider refresh token, when the provider issued one.
    pub refresh_token: Option<String>,
    pub user: UserProfile,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionPhase {
    Unauthenticated,
    /// First exchange in flight. A refresh keeps the phase at `Authenticated`.
    Authenticating,
    Authenticated,
}

/// What the identity provider hands over on sign-in or token renewal.
#[derive(Debug, Clone)]
pub struct IdentityCallback {
    pub assertion: IdentityAssertion,
    pub refresh_token: Option<String>,
    pub user: UserProfile,
}

impl IdentityCallback {
    #[must_use]
    pub fn new(assertion: IdentityAssertion, user: UserProfile) -> Self {
        Self {
            assertion,
            refresh_token: None,
            user,
        }
    }

    #[must_use]
    pub fn with_refresh_token(mut self, token: impl Into<String>) -> Self {
        self.refresh_token = Some(token.into());
        self
    }
}

struct State {
    phase: SessionPhase,
    session: Option<Arc<ApplicationSession>>,
    // Bumped on sign-out so an exchange started before it cannot install a session.
    epoch: u64,
}

type SharedExchange = Shared<BoxFuture<'static, Result<Arc<ApplicationSession>, Error>>>;

struct InFlight {
    id: u64,
    assertion: IdentityAssertion,
    future: SharedExchange,
}

/// Holds the current [`ApplicationSession`].
///
/// Consumers call [`current`](Self::current) at the moment of use. Only the
/// identity-provider callback ([`accept`](Self::accept)) and
/// [`sign_out`](Self::sign_out) change it.
pub struct SessionStore<T: Transport> {
    exchanger: TokenExchanger<T>,
    state: Arc<RwLock<State>>,
    in_flight: Arc<Mutex<Option<InFlight>>>,
    next_flight: AtomicU64,
}

impl<T: Transport> SessionStore<T> {
    #[must_use]
    pub fn new(exchanger: TokenExchanger<T>) -> Self {
        Self {
            exchanger,
            state: Arc::new(RwLock::new(State {
                phase: SessionPhase::Unauthenticated,
                session: None,
                epoch: 0,
            })),
            in_flight: Arc::new(Mutex::new(None)),
            next_flight: AtomicU64::new(0),
        }
    }

    /// The session as of now, or `None` when signed out.
    #[must_use]
    pub fn current(&self) -> Option<Arc<ApplicationSession>> {
        self.state.read().session.clone()
    }

    #[must_use]
    pub fn phase(&self) -> SessionPhase {
        self.state.read().phase
    }

    /// Whether a token exchange is in flight.
    #[must_use]
    pub fn is_exchanging(&self) -> bool {
        self.in_flight.lock().is_some()
    }

    /// Shorthand for [`accept`](Self::accept) without a provider refresh token.
    ///
    /// # Errors
    ///
    /// See [`accept`](Self::accept).
    pub async fn establish(
        &self,
        assertion: IdentityAssertion,
        user: UserProfile,
    ) -> Result<Arc<ApplicationSession>, Error> {
        self.accept(IdentityCallback::new(assertion, user)).await
    }

    /// Exchange the provider's assertion and install the resulting session.
    ///
    /// Callers presenting the same assertion while its exchange is in flight
    /// share that exchange. A different assertion waits for the in-flight one
    /// to settle first, so at most one exchange runs at a time.
    ///
    /// # Errors
    ///
    /// Returns the exchange error (the previous session, if any, stays in
    /// place), or [`Error::Cancelled`] if [`sign_out`](Self::sign_out) ran
    /// while the exchange was in flight.
    pub async fn accept(&self, callback: IdentityCallback) -> Result<Arc<ApplicationSession>, Error> {
        loop {
            let (future, joined_own) = {
                let mut slot = self.in_flight.lock();
                match slot.as_ref() {
                    Some(flight) => (
                        flight.future.clone(),
                        flight.assertion == callback.assertion,
                    ),
                    None => {
                        let flight = self.start(callback.clone());
                        let future = flight.future.clone();
                        *slot = Some(flight);
                        (future, true)
                    }
                }
            };

            let result = future.await;
            if joined_own {
                return result;
            }
            tracing::debug!("Waited for a different in-flight exchange, starting ours");
        }
    }

    /// Drop the session. An exchange still in flight will not install its result.
    pub fn sign_out(&self) {
        {
            let mut state = self.state.write();
            state.epoch += 1;
            state.session = None;
            state.phase = SessionPhase::Unauthenticated;
        }
        self.in_flight.lock().take();
        tracing::info!("Signed out");
    }

    fn start(&self, callback: IdentityCallback) -> InFlight {
        let id = self.next_flight.fetch_add(1, Ordering::Relaxed);
        let epoch = {
            let mut state = self.state.write();
            if state.phase == SessionPhase::Unauthenticated {
                state.phase = SessionPhase::Authenticating;
            }
            state.epoch
        };

        let exchanger = self.exchanger.clone();
        let state = Arc::clone(&self.state);
        let slot = Arc::clone(&self.in_flight);
        let assertion = callback.assertion.clone();

        // Spawned so the exchange settles even if every caller is dropped.
        let task = tokio::spawn(async move {
            let result = exchanger.exchange(&callback.assertion).await;

            let outcome = {
                let mut state = state.write();
                if state.epoch == epoch {
                    install(&mut state, result, callback)
                } else {
                    tracing::info!("Discarding token exchange that finished after sign-out");
                    Err(Error::Cancelled(CancelReason::Aborted))
                }
            };

            let mut slot = slot.lock();
            if slot.as_ref().is_some_and(|flight| flight.id == id) {
                *slot = None;
            }
            outcome
        });

        let future = async move {
            task.await.unwrap_or_else(|e| {
                tracing::error!(error = %e, "Token exchange task failed");
                Err(Error::Cancelled(CancelReason::Aborted))
            })
        }
        .boxed()
        .shared();

        InFlight {
            id,
            assertion,
            future,
        }
    }
}

fn install(
    state: &mut State,
    result: Result<crate::types::TokenGrant, Error>,
    callback: IdentityCallback,
) -> Result<Arc<ApplicationSession>, Error> {
    match result {
        Ok(grant) => {
            let refreshed = state.session.is_some();
            let session = Arc::new(ApplicationSession {
                access_token: grant.access_token,
                token_type: grant.token_type,
                refresh_token: callback.refresh_token,
                user: callback.user,
            });
            state.session = Some(session.clone());
            state.phase = SessionPhase::Authenticated;
            tracing::info!(user = %session.user.name, refreshed, "Application session established");
            Ok(session)
        }
        Err(e) => {
            state.phase = if state.session.is_some() {
                SessionPhase::Authenticated
            } else {
                SessionPhase::Unauthenticated
            };
            tracing::warn!(error = %e, "Token exchange failed");
            Err(e)
        }
    }
}
