use async_trait::async_trait;
use oauth2::{
    basic::{BasicClient, BasicTokenResponse},
    AuthorizationCode, CsrfToken, PkceCodeChallenge, PkceCodeVerifier, RefreshToken, Scope,
    TokenResponse,
};
use tracing::{debug, instrument, warn};

use super::*;
use crate::app_config::AppConfig;

/// Talks to a standards-compliant OAuth2 provider.
#[derive(Debug, Clone)]
pub struct OAuth2Provider {
    /// Exchanges codes and refresh tokens.
    oauth2_client: BasicClient,

    /// Shared client carrying the provider timeout.
    http: reqwest::Client,

    profile_url: String,
    scopes: Vec<String>,
}

impl OAuth2Provider {
    pub fn new(config: &AppConfig) -> Result<Self> {
        let oauth2_client = utils::build_oauth2_client_from_config(config)?;
        let http = utils::build_http_client(config)?;
        oauth2::url::Url::parse(&config.profile_url)?;
        Ok(Self {
            oauth2_client,
            http,
            profile_url: config.profile_url.clone(),
            scopes: config.scopes.clone(),
        })
    }
}

/// Flatten the provider's token response into the bundle we keep in the cookie. Providers that
/// don't rotate refresh tokens omit them from refresh responses, in which case `previous_refresh`
/// is carried over.
fn bundle_from_response(
    response: &BasicTokenResponse,
    previous_refresh: Option<&str>,
) -> CredentialBundle {
    CredentialBundle {
        access_token: response.access_token().secret().to_string(),
        token_type: AsRef::<str>::as_ref(response.token_type()).to_string(),
        expires_in: response.expires_in().map(|d| d.as_secs()).unwrap_or_default(),
        refresh_token: response
            .refresh_token()
            .map(|t| t.secret().to_string())
            .or_else(|| previous_refresh.map(str::to_string))
            .unwrap_or_default(),
    }
}

#[async_trait]
impl Provider for OAuth2Provider {
    fn authorization_request(&self) -> Result<AuthorizationRequest> {
        let (challenge, verifier) = PkceCodeChallenge::new_random_sha256();
        let (url, csrf) = self
            .oauth2_client
            .authorize_url(CsrfToken::new_random)
            .add_scopes(self.scopes.iter().cloned().map(Scope::new))
            .set_pkce_challenge(challenge)
            .url();

        Ok(AuthorizationRequest {
            url: url.to_string(),
            csrf_state: csrf.secret().to_string(),
            code_verifier: verifier.secret().to_string(),
        })
    }

    #[instrument(skip_all)]
    async fn exchange_code(&self, code: String, code_verifier: String) -> Result<CredentialBundle> {
        let http = self.http.clone();
        match self
            .oauth2_client
            .exchange_code(AuthorizationCode::new(code))
            .set_pkce_verifier(PkceCodeVerifier::new(code_verifier))
            .request_async(|req| utils::send_oauth2_request(http, req))
            .await
        {
            Ok(t) => Ok(bundle_from_response(&t, None)),
            Err(e) => Err(OAuth2Error::TokenExchange(e.to_string())),
        }
    }

    #[instrument(skip_all)]
    async fn refresh_token(&self, refresh_token: String) -> Result<CredentialBundle> {
        if refresh_token.is_empty() {
            return Err(OAuth2Error::TokenRefresh(
                "No refresh token available".to_string(),
            ));
        }

        let http = self.http.clone();
        let token = RefreshToken::new(refresh_token);
        match self
            .oauth2_client
            .exchange_refresh_token(&token)
            .request_async(|req| utils::send_oauth2_request(http, req))
            .await
        {
            Ok(t) => Ok(bundle_from_response(&t, Some(token.secret()))),
            Err(e) => Err(OAuth2Error::TokenRefresh(e.to_string())),
        }
    }

    #[instrument(skip_all)]
    async fn verify(&self, access_token: &str) -> Option<Identity> {
        let response = match self
            .http
            .get(&self.profile_url)
            .bearer_auth(access_token)
            .send()
            .await
        {
            Ok(r) => r,
            Err(e) => {
                warn!("Profile lookup failed: {}", e);
                return None;
            }
        };

        if response.status() != reqwest::StatusCode::OK {
            debug!(status = %response.status(), "Access token rejected");
            return None;
        }

        match response.json::<types::ProfileResponse>().await {
            Ok(p) => Some(p.into()),
            Err(e) => {
                warn!("Unparseable profile response: {}", e);
                None
            }
        }
    }
}
