use std::sync::Arc;

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use tracing::{info, instrument, warn};

use crate::app_config::AppConfig;
use crate::oauth::{
    pending::PendingAuthStore, CallbackParams, Identity, OAuth2Error, Provider, Result,
};
use crate::token_store::TokenStore;

pub const PENDING_LOGIN_COOKIE: &str = "choreclock_login";

/// Why a request could not be tied to a user.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthFailure {
    /// No credential cookie at all.
    NotLoggedIn,
    /// A credential was presented but neither it nor its refresh worked.
    InvalidSession,
}

impl AuthFailure {
    pub fn message(&self) -> &'static str {
        match self {
            AuthFailure::NotLoggedIn => "not logged in",
            AuthFailure::InvalidSession => "invalid session",
        }
    }
}

/// Drives the authorization-code login, and on every later request works out who the browser
/// belongs to.
pub struct FlowCoordinator<P: ?Sized> {
    provider: Arc<P>,
    tokens: TokenStore,
    pending: PendingAuthStore,
    secure: bool,
}

impl<P: Provider + ?Sized> FlowCoordinator<P> {
    pub fn new(config: &AppConfig, provider: Arc<P>) -> Result<Self> {
        Ok(Self {
            provider,
            tokens: TokenStore::new(config)?,
            pending: PendingAuthStore::new(config.login_ttl()),
            secure: config.secure_cookies(),
        })
    }

    pub fn token_store(&self) -> &TokenStore {
        &self.tokens
    }

    /// Begin a login. Returns the jar carrying the pending-login cookie and the provider URL to
    /// send the user-agent to.
    #[instrument(skip_all)]
    pub async fn start_login(&self, jar: CookieJar) -> Result<(CookieJar, String)> {
        let request = self.provider.authorization_request()?;
        let id = self
            .pending
            .insert(request.code_verifier, request.csrf_state)
            .await?;

        let cookie = Cookie::build((PENDING_LOGIN_COOKIE, id))
            .path("/api")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax);

        Ok((jar.add(cookie), request.url))
    }

    /// Finish a login from the provider's redirect. The pending login is consumed whatever the
    /// outcome, so a callback can never be replayed.
    #[instrument(skip_all)]
    pub async fn handle_callback(&self, jar: CookieJar, params: CallbackParams) -> Result<CookieJar> {
        let id = jar
            .get(PENDING_LOGIN_COOKIE)
            .map(|c| c.value().to_string())
            .ok_or(OAuth2Error::PendingAuthMissing)?;
        let jar = self.clear_pending_cookie(jar);

        let pending = self
            .pending
            .take(&id)
            .await
            .ok_or(OAuth2Error::PendingAuthMissing)?;

        if params.state.as_deref() != Some(pending.csrf_state.as_str()) {
            return Err(OAuth2Error::StateMismatch);
        }

        let code = params.authorization_code()?.to_string();
        let bundle = self
            .provider
            .exchange_code(code, pending.code_verifier)
            .await?;

        info!("Login completed");
        self.tokens.persist(jar, &bundle)
    }

    /// Work out who owns the credential in the jar. A rejected access token gets exactly one
    /// refresh and one retry; if that doesn't produce a verified identity the credential is
    /// dropped from the jar.
    #[instrument(skip_all)]
    pub async fn resolve_identity(
        &self,
        jar: CookieJar,
    ) -> (CookieJar, std::result::Result<Identity, AuthFailure>) {
        let Some(bundle) = self.tokens.retrieve(&jar) else {
            return (jar, Err(AuthFailure::NotLoggedIn));
        };

        if let Some(identity) = self.provider.verify(&bundle.access_token).await {
            return (jar, Ok(identity));
        }

        let refreshed = match self
            .tokens
            .refresh(&jar, self.provider.as_ref(), &bundle.refresh_token)
            .await
        {
            Ok(j) => j,
            Err(e) => {
                warn!("Dropping session after failed refresh: {}", e);
                return (self.tokens.clear(jar), Err(AuthFailure::InvalidSession));
            }
        };

        let retried = match self.tokens.retrieve(&refreshed) {
            Some(b) => self.provider.verify(&b.access_token).await,
            None => None,
        };

        match retried {
            Some(identity) => {
                info!("Session refreshed");
                (refreshed, Ok(identity))
            }
            None => {
                warn!("Refreshed access token was rejected too");
                (self.tokens.clear(refreshed), Err(AuthFailure::InvalidSession))
            }
        }
    }

    /// Forget the credential and any login still in flight.
    pub async fn logout(&self, jar: CookieJar) -> CookieJar {
        if let Some(c) = jar.get(PENDING_LOGIN_COOKIE) {
            self.pending.discard(c.value()).await;
        }
        let jar = self.clear_pending_cookie(jar);
        self.tokens.clear(jar)
    }

    fn clear_pending_cookie(&self, jar: CookieJar) -> CookieJar {
        jar.remove(Cookie::build(PENDING_LOGIN_COOKIE).path("/api"))
    }
}
