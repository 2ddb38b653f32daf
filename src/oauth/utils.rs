use std::{
    sync::Arc,
    time::{SystemTime, UNIX_EPOCH},
};

use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use oauth2::{basic::BasicClient, AuthUrl, ClientId, ClientSecret, RedirectUrl, TokenUrl};
use orion::aead;

use crate::app_config::AppConfig;

use super::{OAuth2Error, Result};

pub const SECRET_KEY_LEN: usize = 32;

pub fn base64url_encode<T: AsRef<[u8]>>(key_bytes: T) -> String {
    URL_SAFE_NO_PAD.encode(key_bytes)
}

pub fn base64url_decode<T: AsRef<[u8]>>(
    key_bytes: T,
) -> std::result::Result<Vec<u8>, base64::DecodeError> {
    URL_SAFE_NO_PAD.decode(key_bytes)
}

/// orion accepts any non-empty slice here but only seals with 32-byte keys, so the length is
/// checked up front.
pub fn build_secret_key(secret_key: &str) -> Result<Arc<aead::SecretKey>> {
    if secret_key.len() != SECRET_KEY_LEN {
        return Err(OAuth2Error::SecretKeyLength(secret_key.len()));
    }
    aead::SecretKey::from_slice(secret_key.as_bytes())
        .map(Arc::new)
        .map_err(OAuth2Error::Encryption)
}

pub fn build_oauth2_client_from_config(config: &AppConfig) -> Result<BasicClient> {
    Ok(BasicClient::new(
        ClientId::new(config.client_id.clone()),
        Some(ClientSecret::new(config.client_secret.clone())),
        AuthUrl::new(config.authorize_url.clone())?,
        Some(TokenUrl::new(config.token_url.clone())?),
    )
    .set_redirect_uri(RedirectUrl::new(config.redirect_uri.clone())?))
}

/// One client for every provider call. Redirects are never followed and no call outlives the
/// configured timeout.
pub fn build_http_client(config: &AppConfig) -> Result<reqwest::Client> {
    reqwest::Client::builder()
        .redirect(reqwest::redirect::Policy::none())
        .timeout(config.provider_timeout())
        .build()
        .map_err(|e| OAuth2Error::HttpClient(e.to_string()))
}

/// Adapter letting the `oauth2` crate send its token requests through our own `reqwest::Client`
/// rather than the timeout-less default one.
pub async fn send_oauth2_request(
    client: reqwest::Client,
    request: oauth2::HttpRequest,
) -> std::result::Result<oauth2::HttpResponse, oauth2::reqwest::Error<reqwest::Error>> {
    let response = client
        .request(request.method, request.url.as_str())
        .headers(request.headers)
        .body(request.body)
        .send()
        .await
        .map_err(oauth2::reqwest::Error::Reqwest)?;

    let status_code = response.status();
    let headers = response.headers().to_owned();
    let body = response
        .bytes()
        .await
        .map_err(oauth2::reqwest::Error::Reqwest)?
        .to_vec();

    Ok(oauth2::HttpResponse {
        status_code,
        headers,
        body,
    })
}

pub fn current_epoch() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_secs())
        .unwrap_or_default()
}

pub fn generate_random_key() -> Result<[u8; 32]> {
    let mut key_bytes = [0u8; 32];
    orion::util::secure_rand_bytes(&mut key_bytes).map_err(OAuth2Error::Encryption)?;
    Ok(key_bytes)
}
