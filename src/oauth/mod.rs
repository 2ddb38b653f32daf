pub mod provider;
use async_trait::async_trait;
pub use provider::*;
pub mod types;
pub use types::*;
pub mod pending;
pub mod static_provider;

pub(crate) mod utils;

pub type Result<T> = std::result::Result<T, OAuth2Error>;

/// The identity provider as seen from this service: an OAuth2 authorization server plus a profile
/// endpoint.
#[async_trait]
pub trait Provider: Send + Sync + 'static {
    /// Build a consent URL with a fresh PKCE verifier and CSRF state.
    fn authorization_request(&self) -> Result<AuthorizationRequest>;

    /// Exchange the authorization code from the callback, together with the PKCE verifier stored
    /// at login start, for a set of tokens.
    async fn exchange_code(&self, code: String, code_verifier: String)
        -> Result<CredentialBundle>;

    /// Trade a refresh token for a new set of tokens.
    async fn refresh_token(&self, refresh_token: String) -> Result<CredentialBundle>;

    /// Ask the provider who owns this access token. Anything but a successful, parseable answer
    /// is `None`; the caller decides whether a refresh is worth trying.
    async fn verify(&self, access_token: &str) -> Option<Identity>;
}
