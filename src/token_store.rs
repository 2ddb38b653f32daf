use std::sync::Arc;

use axum_extra::extract::cookie::{Cookie, CookieJar, SameSite};
use orion::aead;
use tracing::{debug, instrument, warn};

use crate::app_config::AppConfig;
use crate::oauth::{utils, CredentialBundle, OAuth2Error, Provider, Result};

pub const CREDENTIAL_COOKIE: &str = "choreclock_credentials";

/// Keeps the user's [`CredentialBundle`] in a cookie sealed with the server's secret key, so the
/// browser holds the tokens but can neither read nor alter them.
#[derive(Debug, Clone)]
pub struct TokenStore {
    /// Used for symmetric encryption of the cookie value.
    secret_key: Arc<aead::SecretKey>,

    /// Only send the cookie over https.
    secure: bool,
}

impl TokenStore {
    pub fn new(config: &AppConfig) -> Result<Self> {
        Ok(Self {
            secret_key: utils::build_secret_key(&config.secret_key)?,
            secure: config.secure_cookies(),
        })
    }

    /// Write the bundle into the jar, replacing whatever was there.
    pub fn persist(&self, jar: CookieJar, bundle: &CredentialBundle) -> Result<CookieJar> {
        let value = self.seal(bundle)?;
        let cookie = Cookie::build((CREDENTIAL_COOKIE, value))
            .path("/")
            .http_only(true)
            .secure(self.secure)
            .same_site(SameSite::Lax);
        Ok(jar.add(cookie))
    }

    /// Read the bundle back. A missing, tampered or otherwise unreadable cookie just means nobody
    /// is logged in.
    pub fn retrieve(&self, jar: &CookieJar) -> Option<CredentialBundle> {
        let cookie = jar.get(CREDENTIAL_COOKIE)?;
        match self.unseal(cookie.value()) {
            Ok(b) => Some(b),
            Err(e) => {
                debug!("Ignoring unreadable credential cookie: {}", e);
                None
            }
        }
    }

    /// Remove the cookie. Fine to call when there is none.
    pub fn clear(&self, jar: CookieJar) -> CookieJar {
        jar.remove(Cookie::build(CREDENTIAL_COOKIE).path("/"))
    }

    /// Trade the refresh token for new tokens and persist them. On failure the caller's jar is
    /// left exactly as it was.
    #[instrument(skip_all)]
    pub async fn refresh<P: Provider + ?Sized>(
        &self,
        jar: &CookieJar,
        provider: &P,
        refresh_token: &str,
    ) -> Result<CookieJar> {
        let bundle = provider
            .refresh_token(refresh_token.to_string())
            .await
            .map_err(|e| {
                warn!("{}", e);
                e
            })?;
        self.persist(jar.clone(), &bundle)
    }

    fn seal(&self, bundle: &CredentialBundle) -> Result<String> {
        let plaintext =
            serde_json::to_vec(bundle).map_err(|e| OAuth2Error::Encoding(e.to_string()))?;
        aead::seal(&self.secret_key, &plaintext)
            .map_err(OAuth2Error::Encryption)
            .map(utils::base64url_encode)
    }

    fn unseal(&self, value: &str) -> Result<CredentialBundle> {
        let bytes =
            utils::base64url_decode(value).map_err(|e| OAuth2Error::Decryption(e.to_string()))?;

        let decrypted_bytes = aead::open(&self.secret_key, &bytes)
            .map_err(|e| OAuth2Error::Decryption(e.to_string()))?;

        serde_json::from_slice(&decrypted_bytes).map_err(|e| OAuth2Error::Decryption(e.to_string()))
    }
}

#[cfg(test)]
mod tests {
    use crate::oauth::static_provider::StaticProvider;

    use super::*;

    fn build_test_store(redirect_uri: &str) -> TokenStore {
        TokenStore::new(&AppConfig {
            secret_key: "11111111111111111111111111111111".into(),
            redirect_uri: redirect_uri.into(),
            ..Default::default()
        })
        .unwrap()
    }

    fn bundle() -> CredentialBundle {
        CredentialBundle {
            access_token: "access".to_string(),
            token_type: "bearer".to_string(),
            expires_in: 3600,
            refresh_token: "refresh".to_string(),
        }
    }

    #[test]
    fn persisted_cookie_is_sealed_and_flagged() {
        let store = build_test_store("http://localhost/api/callback");
        let jar = store.persist(CookieJar::new(), &bundle()).unwrap();

        let cookie = jar.get(CREDENTIAL_COOKIE).unwrap();
        assert!(!cookie.value().contains("access"));
        assert_eq!(cookie.http_only(), Some(true));
        assert_eq!(cookie.secure(), Some(false));
        assert_eq!(store.retrieve(&jar), Some(bundle()));
    }

    #[test]
    fn short_secret_key_is_rejected_up_front() {
        let res = TokenStore::new(&AppConfig {
            secret_key: "short".into(),
            ..Default::default()
        });
        assert!(matches!(res, Err(OAuth2Error::SecretKeyLength(5))));
    }

    #[test]
    fn https_deployments_get_secure_cookies() {
        let store = build_test_store("https://chores.example.com/api/callback");
        let jar = store.persist(CookieJar::new(), &bundle()).unwrap();
        assert_eq!(jar.get(CREDENTIAL_COOKIE).unwrap().secure(), Some(true));
    }

    #[test]
    fn persist_overwrites() {
        let store = build_test_store("http://localhost/api/callback");
        let jar = store.persist(CookieJar::new(), &bundle()).unwrap();
        let replacement = CredentialBundle {
            access_token: "other".to_string(),
            ..bundle()
        };
        let jar = store.persist(jar, &replacement).unwrap();
        assert_eq!(store.retrieve(&jar), Some(replacement));
    }

    #[test]
    fn malformed_cookie_is_not_logged_in() {
        let store = build_test_store("http://localhost/api/callback");
        let garbage = utils::base64url_encode([0u8; 64]);
        for value in ["", "not base64!", "aGVsbG8", garbage.as_str()] {
            let jar = CookieJar::new().add(Cookie::new(CREDENTIAL_COOKIE, value.to_string()));
            assert!(store.retrieve(&jar).is_none(), "{value}");
        }
    }

    #[test]
    fn cookie_from_another_key_is_rejected() {
        let store = build_test_store("http://localhost/api/callback");
        let other = TokenStore::new(&AppConfig {
            secret_key: "22222222222222222222222222222222".into(),
            ..Default::default()
        })
        .unwrap();
        let jar = other.persist(CookieJar::new(), &bundle()).unwrap();
        assert!(store.retrieve(&jar).is_none());
    }

    #[test]
    fn clear_is_idempotent() {
        let store = build_test_store("http://localhost/api/callback");
        let jar = store.persist(CookieJar::new(), &bundle()).unwrap();
        let jar = store.clear(jar);
        assert!(store.retrieve(&jar).is_none());
        let jar = store.clear(jar);
        assert!(store.retrieve(&jar).is_none());
    }

    #[tokio::test]
    async fn refresh_replaces_bundle() {
        let store = build_test_store("http://localhost/api/callback");
        let provider = StaticProvider::new("Ada");
        let jar = store.persist(CookieJar::new(), &bundle()).unwrap();

        let refreshed = store.refresh(&jar, &provider, "refresh").await.unwrap();
        let new_bundle = store.retrieve(&refreshed).unwrap();
        assert_ne!(new_bundle, bundle());
        assert_eq!(provider.refresh_calls(), 1);
    }

    #[tokio::test]
    async fn failed_refresh_leaves_jar_untouched() {
        let store = build_test_store("http://localhost/api/callback");
        let provider = StaticProvider::new("Ada");
        provider.revoke("refresh");
        let jar = store.persist(CookieJar::new(), &bundle()).unwrap();

        let res = store.refresh(&jar, &provider, "refresh").await;
        assert!(matches!(res, Err(OAuth2Error::TokenRefresh(_))));
        assert_eq!(store.retrieve(&jar), Some(bundle()));
    }
}
