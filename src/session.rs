//! OAuth token lifecycle.
//!
//! [`SessionManager`] owns the current [`Credential`] and moves between the
//! states of [`SessionState`]:
//!
//! ```text
//! Unauthenticated --exchange_code ok--> Authenticated
//! Unauthenticated --restore (stored pair)--> Authenticated
//! Authenticated --refresh--> Refreshing --ok--> Authenticated (new pair)
//!                                       --err--> Ended
//! Ended --exchange_code ok--> Authenticated
//! ```
//!
//! Expiry is never predicted. A caller learns the access token is stale
//! when an authorized request returns [`HeatmapError::Unauthorized`], and
//! [`SessionManager::with_credential`] then runs exactly one refresh and
//! one retry.
//!
//! Every new pair is written to the [`CredentialStore`] before the state
//! changes, so the in-memory credential and the stored one never diverge.

use std::collections::HashSet;
use std::fmt;
use std::future::Future;

use async_trait::async_trait;
use log::{debug, info, warn};

use crate::error::{HeatmapError, Result};
use crate::store::CredentialStore;

/// An access/refresh token pair for the Strava API.
#[derive(Clone, PartialEq, Eq)]
pub struct Credential {
    pub access_token: String,
    pub refresh_token: String,
}

impl Credential {
    pub fn new(access_token: String, refresh_token: String) -> Self {
        Self { access_token, refresh_token }
    }
}

// Tokens never reach logs in full
impl fmt::Debug for Credential {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Credential")
            .field("access_token", &redact(&self.access_token))
            .field("refresh_token", &redact(&self.refresh_token))
            .finish()
    }
}

/// First four characters of a token followed by `***`.
pub(crate) fn redact(token: &str) -> String {
    let prefix: String = token.chars().take(4).collect();
    format!("{}***", prefix)
}

/// The OAuth token endpoint.
///
/// Implementations report a rejected code as [`HeatmapError::AuthExchange`]
/// and a rejected refresh token as [`HeatmapError::AuthRefresh`].
#[async_trait(?Send)]
pub trait TokenEndpoint {
    /// Trade a one-time authorization code for a credential.
    async fn exchange_code(&self, code: &str) -> Result<Credential>;

    /// Trade a refresh token for a new credential.
    async fn refresh_token(&self, refresh_token: &str) -> Result<Credential>;
}

/// Where the session is in its lifecycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionState {
    /// No credential. Initial state, and a valid resting state.
    Unauthenticated,
    /// A credential is current.
    Authenticated(Credential),
    /// A refresh is in flight; no authorized request may start.
    Refreshing,
    /// A refresh failed. Only a new authorization code can start over.
    Ended,
}

/// Owns the credential and every transition between [`SessionState`]s.
pub struct SessionManager<T, S> {
    endpoint: T,
    store: S,
    state: SessionState,
    consumed_codes: HashSet<String>,
}

impl<T: TokenEndpoint, S: CredentialStore> SessionManager<T, S> {
    /// Create an unauthenticated session.
    pub fn new(endpoint: T, store: S) -> Self {
        Self {
            endpoint,
            store,
            state: SessionState::Unauthenticated,
            consumed_codes: HashSet::new(),
        }
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn is_authenticated(&self) -> bool {
        matches!(self.state, SessionState::Authenticated(_))
    }

    pub fn store(&self) -> &S {
        &self.store
    }

    pub fn endpoint(&self) -> &T {
        &self.endpoint
    }

    /// Adopt a previously stored credential without touching the network.
    ///
    /// Only applies while unauthenticated. Returns whether the session is
    /// authenticated afterwards.
    pub fn restore(&mut self) -> Result<bool> {
        if self.state == SessionState::Unauthenticated {
            if let Some(credential) = self.store.load()? {
                info!(
                    "[Session] Restored stored credential {}",
                    redact(&credential.access_token)
                );
                self.state = SessionState::Authenticated(credential);
            } else {
                debug!("[Session] No stored credential");
            }
        }
        Ok(self.is_authenticated())
    }

    /// The current credential. Never contacts the network and never checks
    /// expiry.
    pub fn valid_credential(&self) -> Result<&Credential> {
        match &self.state {
            SessionState::Authenticated(credential) => Ok(credential),
            _ => Err(HeatmapError::NotAuthenticated),
        }
    }

    /// Exchange an authorization code and make the result current.
    ///
    /// A code is accepted once per session manager; a repeat is rejected
    /// without contacting the endpoint. A code only counts as used once the
    /// endpoint has answered, so a transport failure leaves it retryable.
    /// On failure the state is unchanged.
    pub async fn exchange_code(&mut self, code: &str) -> Result<Credential> {
        if self.consumed_codes.contains(code) {
            warn!("[Session] Authorization code already used");
            return Err(HeatmapError::AuthExchange {
                message: "authorization code already used".to_string(),
                status_code: None,
            });
        }

        let result = self.endpoint.exchange_code(code).await;
        if endpoint_answered(&result) {
            self.consumed_codes.insert(code.to_string());
        }
        let credential = match result {
            Ok(credential) => credential,
            Err(e) => {
                warn!("[Session] Code exchange failed: {}", e);
                return Err(e);
            }
        };

        self.store.save(&credential)?;
        info!(
            "[Session] Authorized with new credential {}",
            redact(&credential.access_token)
        );
        self.state = SessionState::Authenticated(credential.clone());
        Ok(credential)
    }

    /// Replace the current credential using its refresh token.
    ///
    /// Failure ends the session: the stored credential is cleared and the
    /// state becomes [`SessionState::Ended`]. Never retried. If the returned
    /// future is dropped mid-flight the previous state comes back.
    pub async fn refresh(&mut self) -> Result<Credential> {
        let refresh_token = self.valid_credential()?.refresh_token.clone();
        let in_flight = RefreshInFlight::begin(&mut self.state);
        debug!("[Session] Refreshing with {}", redact(&refresh_token));

        let result = match self.endpoint.refresh_token(&refresh_token).await {
            Ok(credential) => self.store.save(&credential).map(|()| credential),
            Err(e @ HeatmapError::AuthRefresh { .. }) => Err(e),
            Err(e) => Err(HeatmapError::AuthRefresh {
                message: e.to_string(),
                status_code: None,
            }),
        };

        match result {
            Ok(credential) => {
                info!(
                    "[Session] Refreshed credential {}",
                    redact(&credential.access_token)
                );
                in_flight.finish(SessionState::Authenticated(credential.clone()));
                Ok(credential)
            }
            Err(e) => {
                warn!("[Session] Refresh failed, ending session: {}", e);
                if let Err(clear_err) = self.store.clear() {
                    warn!("[Session] Could not clear stored credential: {}", clear_err);
                }
                in_flight.finish(SessionState::Ended);
                Err(e)
            }
        }
    }

    /// Run an authorized request with the current credential.
    ///
    /// If the request fails with [`HeatmapError::Unauthorized`] the
    /// credential is refreshed once and the request retried once. A second
    /// authorization failure is returned as-is.
    pub async fn with_credential<R, F, Fut>(&mut self, mut request: F) -> Result<R>
    where
        F: FnMut(Credential) -> Fut,
        Fut: Future<Output = Result<R>>,
    {
        let credential = self.valid_credential()?.clone();

        match request(credential).await {
            Err(e) if e.is_unauthorized() => {
                info!("[Session] Access token rejected, refreshing once");
                let credential = self.refresh().await?;
                let retry = request(credential).await;
                if let Err(e) = &retry {
                    warn!("[Session] Request failed after refresh: {}", e);
                }
                retry
            }
            other => other,
        }
    }

    /// Forget the credential, in memory and in the store.
    pub fn sign_out(&mut self) -> Result<()> {
        self.store.clear()?;
        self.state = SessionState::Unauthenticated;
        Ok(())
    }
}

/// True when the token endpoint produced an answer, as opposed to the
/// request never reaching it.
fn endpoint_answered(result: &Result<Credential>) -> bool {
    match result {
        Ok(_) => true,
        Err(HeatmapError::AuthExchange { status_code, .. }) => status_code.is_some(),
        Err(_) => false,
    }
}

/// Holds the session in [`SessionState::Refreshing`] and puts the previous
/// state back unless finished.
struct RefreshInFlight<'a> {
    state: &'a mut SessionState,
    previous: Option<SessionState>,
}

impl<'a> RefreshInFlight<'a> {
    fn begin(state: &'a mut SessionState) -> Self {
        let previous = std::mem::replace(state, SessionState::Refreshing);
        Self { state, previous: Some(previous) }
    }

    fn finish(mut self, next: SessionState) {
        self.previous = None;
        *self.state = next;
    }
}

impl Drop for RefreshInFlight<'_> {
    fn drop(&mut self) {
        if let Some(previous) = self.previous.take() {
            debug!("[Session] Refresh abandoned, restoring previous state");
            *self.state = previous;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::MemoryCredentialStore;
    use std::cell::{Cell, RefCell};

    fn credential(access: &str, refresh: &str) -> Credential {
        Credential::new(access.to_string(), refresh.to_string())
    }

    /// Token endpoint that hands out numbered credentials.
    #[derive(Default)]
    struct FakeEndpoint {
        reject_codes: bool,
        reject_refresh: bool,
        /// Fail the next exchange as if the connection dropped
        offline_once: Cell<bool>,
        /// Never answer a refresh
        hang_refresh: bool,
        exchanges: Cell<u32>,
        refreshes: RefCell<Vec<String>>,
    }

    #[async_trait(?Send)]
    impl TokenEndpoint for FakeEndpoint {
        async fn exchange_code(&self, code: &str) -> Result<Credential> {
            self.exchanges.set(self.exchanges.get() + 1);
            if self.offline_once.replace(false) {
                return Err(HeatmapError::AuthExchange {
                    message: "Request error: connection reset".to_string(),
                    status_code: None,
                });
            }
            if self.reject_codes {
                return Err(HeatmapError::AuthExchange {
                    message: "Bad Request".to_string(),
                    status_code: Some(400),
                });
            }
            Ok(credential(&format!("access-{}", code), &format!("refresh-{}", code)))
        }

        async fn refresh_token(&self, refresh_token: &str) -> Result<Credential> {
            self.refreshes.borrow_mut().push(refresh_token.to_string());
            if self.hang_refresh {
                std::future::pending::<()>().await;
            }
            if self.reject_refresh {
                return Err(HeatmapError::AuthRefresh {
                    message: "invalid refresh token".to_string(),
                    status_code: Some(400),
                });
            }
            let n = self.refreshes.borrow().len();
            Ok(credential(&format!("access-r{}", n), &format!("refresh-r{}", n)))
        }
    }

    fn manager(endpoint: FakeEndpoint) -> SessionManager<FakeEndpoint, MemoryCredentialStore> {
        SessionManager::new(endpoint, MemoryCredentialStore::new())
    }

    #[test]
    fn test_initial_state() {
        let session = manager(FakeEndpoint::default());
        assert_eq!(session.state(), &SessionState::Unauthenticated);
        assert_eq!(session.valid_credential(), Err(HeatmapError::NotAuthenticated));
    }

    #[test]
    fn test_restore_without_stored_credential() {
        let mut session = manager(FakeEndpoint::default());
        assert!(!session.restore().unwrap());
        assert_eq!(session.state(), &SessionState::Unauthenticated);
    }

    #[test]
    fn test_restore_uses_store_without_network() {
        let store = MemoryCredentialStore::with_credential(credential("a", "r"));
        let mut session = SessionManager::new(FakeEndpoint::default(), store);

        assert!(session.restore().unwrap());
        assert_eq!(session.valid_credential().unwrap(), &credential("a", "r"));
        assert_eq!(session.endpoint().exchanges.get(), 0);
        assert!(session.endpoint().refreshes.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_exchange_persists_before_returning() {
        let mut session = manager(FakeEndpoint::default());
        let returned = session.exchange_code("abc").await.unwrap();

        assert_eq!(returned, credential("access-abc", "refresh-abc"));
        assert_eq!(session.valid_credential().unwrap(), &returned);
        assert_eq!(session.store().load().unwrap(), Some(returned));
        assert_eq!(session.store().writes(), 1);
    }

    #[tokio::test]
    async fn test_exchange_failure_stays_unauthenticated() {
        let mut session = manager(FakeEndpoint { reject_codes: true, ..Default::default() });
        let err = session.exchange_code("abc").await.unwrap_err();

        assert!(matches!(err, HeatmapError::AuthExchange { status_code: Some(400), .. }));
        assert_eq!(session.state(), &SessionState::Unauthenticated);
        assert_eq!(session.store().load().unwrap(), None);

        // Strava saw and rejected the code, so it is spent
        assert!(session.exchange_code("abc").await.is_err());
        assert_eq!(session.endpoint().exchanges.get(), 1);
    }

    #[tokio::test]
    async fn test_transport_failure_leaves_code_usable() {
        let endpoint = FakeEndpoint::default();
        endpoint.offline_once.set(true);
        let mut session = manager(endpoint);

        let err = session.exchange_code("abc").await.unwrap_err();
        assert!(matches!(err, HeatmapError::AuthExchange { status_code: None, .. }));
        assert_eq!(session.state(), &SessionState::Unauthenticated);

        let credential = session.exchange_code("abc").await.unwrap();
        assert_eq!(credential, Credential::new("access-abc".to_string(), "refresh-abc".to_string()));
        assert_eq!(session.endpoint().exchanges.get(), 2);
        assert!(session.is_authenticated());
    }

    #[tokio::test]
    async fn test_code_is_one_shot() {
        let mut session = manager(FakeEndpoint::default());
        session.exchange_code("abc").await.unwrap();

        let err = session.exchange_code("abc").await.unwrap_err();
        assert!(matches!(err, HeatmapError::AuthExchange { status_code: None, .. }));
        assert_eq!(session.endpoint().exchanges.get(), 1);
        // The first credential is still current
        assert_eq!(
            session.valid_credential().unwrap(),
            &credential("access-abc", "refresh-abc")
        );
    }

    #[tokio::test]
    async fn test_refresh_replaces_pair() {
        let store = MemoryCredentialStore::with_credential(credential("old-a", "old-r"));
        let mut session = SessionManager::new(FakeEndpoint::default(), store);
        session.restore().unwrap();

        let refreshed = session.refresh().await.unwrap();
        assert_eq!(refreshed, credential("access-r1", "refresh-r1"));
        assert_eq!(session.endpoint().refreshes.borrow().as_slice(), ["old-r"]);
        assert_eq!(session.store().load().unwrap(), Some(refreshed.clone()));
        assert_eq!(session.store().writes(), 1);
        assert_eq!(session.valid_credential().unwrap(), &refreshed);
    }

    #[tokio::test]
    async fn test_abandoned_refresh_restores_previous_state() {
        let store = MemoryCredentialStore::with_credential(credential("old-a", "old-r"));
        let mut session = SessionManager::new(
            FakeEndpoint { hang_refresh: true, ..Default::default() },
            store,
        );
        session.restore().unwrap();

        // The refresh starts, parks on the endpoint, then gets dropped
        tokio::select! {
            biased;
            _ = session.refresh() => panic!("refresh should still be pending"),
            _ = std::future::ready(()) => {}
        }

        assert_eq!(session.endpoint().refreshes.borrow().len(), 1);
        assert_eq!(
            session.state(),
            &SessionState::Authenticated(credential("old-a", "old-r"))
        );
        assert_eq!(session.valid_credential().unwrap(), &credential("old-a", "old-r"));
        assert_eq!(session.store().writes(), 0);
    }

    #[tokio::test]
    async fn test_refresh_failure_ends_session() {
        let store = MemoryCredentialStore::with_credential(credential("old-a", "old-r"));
        let mut session = SessionManager::new(
            FakeEndpoint { reject_refresh: true, ..Default::default() },
            store,
        );
        session.restore().unwrap();

        let err = session.refresh().await.unwrap_err();
        assert!(matches!(err, HeatmapError::AuthRefresh { .. }));
        assert_eq!(session.state(), &SessionState::Ended);
        assert_eq!(session.store().load().unwrap(), None);

        // Ended sessions do not pick the old pair back up
        assert!(!session.restore().unwrap());
        assert!(session.refresh().await.is_err());
        assert_eq!(session.endpoint().refreshes.borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_new_code_after_ended_session() {
        let store = MemoryCredentialStore::with_credential(credential("old-a", "old-r"));
        let mut session = SessionManager::new(
            FakeEndpoint { reject_refresh: true, ..Default::default() },
            store,
        );
        session.restore().unwrap();
        let _ = session.refresh().await;

        session.exchange_code("fresh").await.unwrap();
        assert!(session.is_authenticated());
    }

    #[tokio::test]
    async fn test_with_credential_retries_once_after_unauthorized() {
        let store = MemoryCredentialStore::with_credential(credential("stale", "old-r"));
        let mut session = SessionManager::new(FakeEndpoint::default(), store);
        session.restore().unwrap();

        let seen = RefCell::new(Vec::new());
        let result = session
            .with_credential(|cred| {
                seen.borrow_mut().push(cred.access_token.clone());
                let rejected = cred.access_token == "stale";
                async move {
                    if rejected {
                        Err(HeatmapError::Unauthorized)
                    } else {
                        Ok(7)
                    }
                }
            })
            .await;

        assert_eq!(result, Ok(7));
        assert_eq!(seen.into_inner(), vec!["stale".to_string(), "access-r1".to_string()]);
        assert_eq!(
            session.store().load().unwrap(),
            Some(credential("access-r1", "refresh-r1"))
        );
    }

    #[tokio::test]
    async fn test_with_credential_second_unauthorized_is_final() {
        let store = MemoryCredentialStore::with_credential(credential("stale", "old-r"));
        let mut session = SessionManager::new(FakeEndpoint::default(), store);
        session.restore().unwrap();

        let calls = Cell::new(0);
        let result: Result<()> = session
            .with_credential(|_| {
                calls.set(calls.get() + 1);
                async { Err(HeatmapError::Unauthorized) }
            })
            .await;

        assert_eq!(result, Err(HeatmapError::Unauthorized));
        assert_eq!(calls.get(), 2);
        assert_eq!(session.endpoint().refreshes.borrow().len(), 1);
    }

    #[tokio::test]
    async fn test_with_credential_other_errors_skip_refresh() {
        let store = MemoryCredentialStore::with_credential(credential("a", "r"));
        let mut session = SessionManager::new(FakeEndpoint::default(), store);
        session.restore().unwrap();

        let calls = Cell::new(0);
        let result: Result<()> = session
            .with_credential(|_| {
                calls.set(calls.get() + 1);
                async {
                    Err(HeatmapError::ActivityFetch {
                        message: "Internal Server Error".to_string(),
                        status_code: Some(500),
                    })
                }
            })
            .await;

        assert!(matches!(result, Err(HeatmapError::ActivityFetch { .. })));
        assert_eq!(calls.get(), 1);
        assert!(session.endpoint().refreshes.borrow().is_empty());
    }

    #[tokio::test]
    async fn test_with_credential_requires_session() {
        let mut session = manager(FakeEndpoint::default());
        let result: Result<()> = session.with_credential(|_| async { Ok(()) }).await;
        assert_eq!(result, Err(HeatmapError::NotAuthenticated));
    }

    #[test]
    fn test_debug_redacts_tokens() {
        let debug = format!("{:?}", credential("abcdefgh", "12345678"));
        assert!(debug.contains("abcd***"));
        assert!(!debug.contains("abcdefgh"));
        assert!(!debug.contains("12345678"));
    }

    #[test]
    fn test_sign_out() {
        let store = MemoryCredentialStore::with_credential(credential("a", "r"));
        let mut session = SessionManager::new(FakeEndpoint::default(), store);
        session.restore().unwrap();
        session.sign_out().unwrap();
        assert_eq!(session.state(), &SessionState::Unauthenticated);
        assert_eq!(session.store().load().unwrap(), None);
    }
}
