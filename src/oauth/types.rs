use serde::{Deserialize, Serialize};
use thiserror::Error;

/// Tokens handed out by the identity provider. This only ever lives inside the sealed credential
/// cookie; the server keeps no copy.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct CredentialBundle {
    pub access_token: String,
    pub token_type: String,
    /// Lifetime of the access token in seconds, as reported by the provider.
    pub expires_in: u64,
    #[serde(default)]
    pub refresh_token: String,
}

/// Minimal identity of the logged in user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Identity {
    pub first_name: String,
}

/// Shape of the provider's profile response. Providers disagree on the field name, so we accept
/// the common spellings.
#[derive(Debug, Deserialize)]
pub(crate) struct ProfileResponse {
    #[serde(
        rename = "firstName",
        alias = "given_name",
        alias = "givenName",
        alias = "first_name"
    )]
    pub first_name: String,
}

impl From<ProfileResponse> for Identity {
    fn from(p: ProfileResponse) -> Self {
        Self {
            first_name: p.first_name,
        }
    }
}

/// Everything needed to send the user-agent to the provider for consent.
#[derive(Debug, Clone)]
pub struct AuthorizationRequest {
    pub url: String,
    /// Opaque CSRF value the provider echoes back as `state`.
    pub csrf_state: String,
    /// PKCE secret proving the later code exchange comes from us.
    pub code_verifier: String,
}

/// Query parameters of the provider's redirect back to `/api/callback`.
#[derive(Debug, Default, Deserialize)]
pub struct CallbackParams {
    pub code: Option<String>,
    pub state: Option<String>,
    pub error: Option<String>,
}

impl CallbackParams {
    /// Pull the authorization code out of the callback, rejecting provider-side refusals.
    pub fn authorization_code(&self) -> Result<&str, OAuth2Error> {
        if let Some(e) = &self.error {
            return Err(OAuth2Error::AuthFlow(format!("provider returned {e}")));
        }
        match self.code.as_deref() {
            Some(code) if !code.is_empty() => Ok(code),
            _ => Err(OAuth2Error::AuthFlow(
                "No authorization code presented".to_string(),
            )),
        }
    }
}

#[derive(Debug, Error, Clone)]
pub enum OAuth2Error {
    /// Configuration error of the OAuth2 client.
    #[error("Error while configuring oauth2 client: {0}")]
    ClientConfig(#[from] oauth2::url::ParseError),

    /// Error building the outbound HTTP client.
    #[error("Error while building http client: {0}")]
    HttpClient(String),

    /// The provider refused consent or sent an incomplete callback.
    #[error("OAuth2 flow error: {0}")]
    AuthFlow(String),

    /// The callback could not be matched with a login we started. Either the login expired, was
    /// already completed, or the callback is forged.
    #[error("No pending login for this callback")]
    PendingAuthMissing,

    /// The `state` echoed by the provider does not match the one we issued.
    #[error("Callback state does not match the pending login")]
    StateMismatch,

    /// An error occuring while exchanging the authorization code for tokens.
    #[error("Error exchanging code for token: {0}")]
    TokenExchange(String),

    /// An error occuring while exchanging a refresh token for new tokens.
    #[error("Error refreshing token: {0}")]
    TokenRefresh(String),

    /// The cookie sealing key has the wrong length.
    #[error("Secret key must be 32 bytes, got {0}")]
    SecretKeyLength(usize),

    /// The credential bundle could not be serialized for sealing.
    #[error("Token encoding error: {0}")]
    Encoding(String),

    /// Error with the encryption of the credential cookie.
    #[error("Token encryption error: {0}")]
    Encryption(#[from] orion::errors::UnknownCryptoError),

    /// Error with the decryption of the credential cookie.
    #[error("Token decryption error: {0}")]
    Decryption(String),
}

impl OAuth2Error {
    /// Protocol violations point at a broken or replayed callback rather than a user who simply
    /// needs to log in again.
    pub fn is_protocol_violation(&self) -> bool {
        matches!(
            self,
            OAuth2Error::PendingAuthMissing | OAuth2Error::StateMismatch
        )
    }
}
