use std::{
    collections::HashSet,
    sync::{
        atomic::{AtomicUsize, Ordering},
        Mutex,
    },
};

use async_trait::async_trait;
use tracing::debug;

use super::{AuthorizationRequest, CredentialBundle, Identity, OAuth2Error, Provider, Result};

/// An in-process identity provider. Every code except `"denied"` is accepted and every issued
/// access token stays valid until [`StaticProvider::expire`] is called. Useful for running the
/// whole login flow without a real provider, and it counts calls so tests can check how often the
/// provider was bothered.
///
/// Test support only. `main` always wires up [`super::provider::OAuth2Provider`].
#[derive(Debug)]
pub struct StaticProvider {
    first_name: String,
    state: Mutex<State>,
    exchange_calls: AtomicUsize,
    refresh_calls: AtomicUsize,
    verify_calls: AtomicUsize,
}

#[derive(Debug, Default)]
struct State {
    issued: usize,
    valid_access: HashSet<String>,
    revoked_refresh: HashSet<String>,
    /// When set, new access tokens are handed out but never verify.
    reject_new_tokens: bool,
}

impl StaticProvider {
    pub fn new(first_name: impl Into<String>) -> Self {
        Self {
            first_name: first_name.into(),
            state: Mutex::new(State::default()),
            exchange_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            verify_calls: AtomicUsize::new(0),
        }
    }

    /// Issue a bundle as if a login had just completed.
    pub fn issue(&self) -> CredentialBundle {
        let mut state = self.lock();
        state.issued += 1;
        let bundle = CredentialBundle {
            access_token: format!("access-{}", state.issued),
            token_type: "bearer".to_string(),
            expires_in: 3600,
            refresh_token: format!("refresh-{}", state.issued),
        };
        if !state.reject_new_tokens {
            state.valid_access.insert(bundle.access_token.clone());
        }
        bundle
    }

    /// Make an access token fail verification from now on.
    pub fn expire(&self, access_token: &str) {
        self.lock().valid_access.remove(access_token);
    }

    /// Make a refresh token fail from now on.
    pub fn revoke(&self, refresh_token: &str) {
        self.lock().revoked_refresh.insert(refresh_token.to_string());
    }

    /// Expire everything issued so far and make every future access token fail too, while still
    /// accepting refreshes.
    pub fn reject_all_access_tokens(&self) {
        let mut state = self.lock();
        state.valid_access.clear();
        state.reject_new_tokens = true;
    }

    pub fn exchange_calls(&self) -> usize {
        self.exchange_calls.load(Ordering::SeqCst)
    }

    pub fn refresh_calls(&self) -> usize {
        self.refresh_calls.load(Ordering::SeqCst)
    }

    pub fn verify_calls(&self) -> usize {
        self.verify_calls.load(Ordering::SeqCst)
    }

    pub fn total_calls(&self) -> usize {
        self.exchange_calls() + self.refresh_calls() + self.verify_calls()
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, State> {
        // A panic while holding the lock can only come from a test; keep going with its data.
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}

#[async_trait]
impl Provider for StaticProvider {
    fn authorization_request(&self) -> Result<AuthorizationRequest> {
        debug!("authorization request");
        let n = self.lock().issued;
        let csrf_state = format!("state-{n}");
        Ok(AuthorizationRequest {
            url: format!("https://provider.invalid/authorize?state={csrf_state}"),
            csrf_state,
            code_verifier: format!("verifier-{n}"),
        })
    }

    async fn exchange_code(&self, code: String, _code_verifier: String) -> Result<CredentialBundle> {
        debug!("exchange code");
        self.exchange_calls.fetch_add(1, Ordering::SeqCst);
        if code == "denied" {
            return Err(OAuth2Error::TokenExchange("invalid_grant".to_string()));
        }
        Ok(self.issue())
    }

    async fn refresh_token(&self, refresh_token: String) -> Result<CredentialBundle> {
        debug!("refresh token");
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        if self.lock().revoked_refresh.contains(&refresh_token) {
            return Err(OAuth2Error::TokenRefresh("invalid_grant".to_string()));
        }
        Ok(self.issue())
    }

    async fn verify(&self, access_token: &str) -> Option<Identity> {
        debug!("verify");
        self.verify_calls.fetch_add(1, Ordering::SeqCst);
        self.lock()
            .valid_access
            .contains(access_token)
            .then(|| Identity {
                first_name: self.first_name.clone(),
            })
    }
}
