use anyhow::Result;
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::{env, fs, net::SocketAddr, path::PathBuf, time::Duration};

pub const DEFAULT_STATUS_KEYS: [&str; 2] = ["last_emptied", "last_cleaned"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct AppConfig {
    pub client_id: String,
    pub client_secret: String,
    pub redirect_uri: String,
    pub authorize_url: String,
    pub token_url: String,
    pub profile_url: String,
    pub scopes: Vec<String>,
    pub addr: SocketAddr,
    pub log_level: String,
    pub secret_key: String,
    pub status_file: PathBuf,
    pub status_keys: Vec<String>,
    pub provider_timeout_secs: u64,
    pub login_ttl_secs: u64,
    pub otlp_endpoint: Option<String>,
    pub otlp_headers: Option<String>,
    pub log_format: LogFormat,
}

impl AppConfig {
    pub fn merge_source_config(&mut self, c: ConfigSource) {
        if let Some(addr) = c.addr {
            self.addr = addr;
        }
        if let Some(log_level) = c.log_level {
            self.log_level = log_level;
        }
        if let Some(log_format) = c.log_format {
            self.log_format = log_format;
        }
        if let Some(client_id) = c.client_id {
            self.client_id = client_id;
        }
        if let Some(client_secret) = c.client_secret {
            self.client_secret = client_secret;
        }
        if let Some(redirect_uri) = c.redirect_uri {
            self.redirect_uri = redirect_uri;
        }
        if let Some(authorize_url) = c.authorize_url {
            self.authorize_url = authorize_url;
        }
        if let Some(token_url) = c.token_url {
            self.token_url = token_url;
        }
        if let Some(profile_url) = c.profile_url {
            self.profile_url = profile_url;
        }
        if let Some(scopes) = c.scopes {
            self.scopes = scopes;
        }
        if let Some(secret_key) = c.secret_key {
            self.secret_key = secret_key;
        }
        if let Some(status_file) = c.status_file {
            self.status_file = status_file;
        }
        if let Some(status_keys) = c.status_keys {
            self.status_keys = status_keys;
        }
        if let Some(secs) = c.provider_timeout_secs {
            self.provider_timeout_secs = secs;
        }
        if let Some(secs) = c.login_ttl_secs {
            self.login_ttl_secs = secs;
        }
        if let Some(otlp_endpoint) = c.otlp_endpoint {
            self.otlp_endpoint = Some(otlp_endpoint);
        }
        if let Some(otlp_headers) = c.otlp_headers {
            self.otlp_headers = Some(otlp_headers);
        }
    }

    pub fn validate(&self) -> Result<()> {
        if self.client_id.is_empty() {
            anyhow::bail!("Client ID must be set");
        }
        if self.client_secret.is_empty() {
            anyhow::bail!("Client secret must be set");
        }
        if url::Url::parse(&self.redirect_uri).is_err() {
            anyhow::bail!("Redirect URI must be an absolute URL");
        }
        if self.secret_key.len() != crate::oauth::utils::SECRET_KEY_LEN {
            anyhow::bail!("Secret key must be exactly 32 bytes");
        }
        if self.status_keys.is_empty() {
            anyhow::bail!("At least one status key must be configured");
        }
        Ok(())
    }

    /// The credential cookie is only marked `Secure` when the app itself is served over https,
    /// which we learn from the scheme of the OAuth2 redirect URI.
    pub fn secure_cookies(&self) -> bool {
        url::Url::parse(&self.redirect_uri)
            .map(|u| u.scheme() == "https")
            .unwrap_or(false)
    }

    pub fn provider_timeout(&self) -> Duration {
        Duration::from_secs(self.provider_timeout_secs)
    }

    pub fn login_ttl(&self) -> Duration {
        Duration::from_secs(self.login_ttl_secs)
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        let status_file = match env::current_dir() {
            Ok(dir) => dir,
            Err(_) => env::temp_dir(),
        }
        .join("data")
        .join("status.json");
        Self {
            client_id: "".to_string(),
            client_secret: "".to_string(),
            redirect_uri: "http://127.0.0.1:8080/api/callback".to_string(),
            authorize_url: "".to_string(),
            token_url: "".to_string(),
            profile_url: "".to_string(),
            scopes: vec![],
            addr: SocketAddr::from(([127, 0, 0, 1], 8080)),
            log_level: "choreclock=debug,tower_http=debug".into(),
            secret_key: "".to_string(),
            status_file,
            status_keys: DEFAULT_STATUS_KEYS.iter().map(|k| k.to_string()).collect(),
            provider_timeout_secs: 10,
            login_ttl_secs: 600,
            otlp_endpoint: None,
            otlp_headers: None,
            log_format: LogFormat::Compact,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize, clap::ValueEnum, PartialEq)]
pub enum LogFormat {
    Compact,
    Pretty,
    Json,
}

#[derive(Parser, Serialize, Deserialize, Debug, Default)]
#[clap(author, version, about)]
pub struct ConfigSource {
    /// TOML configuration file to read
    #[clap(long, hide_env_values(true), value_parser, env = "CHORECLOCK_CONFIG")]
    pub config: Option<PathBuf>,

    /// socket address to listen on
    #[clap(long, hide_env_values(true), value_parser, env = "CHORECLOCK_ADDR")]
    pub addr: Option<SocketAddr>,

    /// Set log level in RUST_LOG format
    #[clap(long, hide_env_values(true), value_parser, env = "CHORECLOCK_LOG_LEVEL")]
    pub log_level: Option<String>,

    /// Log format to use on stdout.
    #[clap(long, hide_env_values(true), value_enum, env = "CHORECLOCK_LOG_FORMAT")]
    pub log_format: Option<LogFormat>,

    /// OAuth2 client id registered with the identity provider
    #[clap(long, hide_env_values(true), value_parser, env = "CHORECLOCK_CLIENT_ID")]
    pub client_id: Option<String>,

    /// OAuth2 client secret registered with the identity provider
    #[clap(long, hide_env_values(true), value_parser, env = "CHORECLOCK_CLIENT_SECRET")]
    pub client_secret: Option<String>,

    /// Absolute URL of /api/callback as seen by the browser. An https scheme marks the credential
    /// cookie as secure-only.
    #[clap(long, hide_env_values(true), value_parser, env = "CHORECLOCK_REDIRECT_URI")]
    pub redirect_uri: Option<String>,

    /// Provider authorization endpoint
    #[clap(long, hide_env_values(true), value_parser, env = "CHORECLOCK_AUTHORIZE_URL")]
    pub authorize_url: Option<String>,

    /// Provider token endpoint
    #[clap(long, hide_env_values(true), value_parser, env = "CHORECLOCK_TOKEN_URL")]
    pub token_url: Option<String>,

    /// Provider "who am I" endpoint, called with the access token as a bearer credential
    #[clap(long, hide_env_values(true), value_parser, env = "CHORECLOCK_PROFILE_URL")]
    pub profile_url: Option<String>,

    /// Comma separated scopes to request at login
    #[clap(
        long,
        hide_env_values(true),
        value_delimiter = ',',
        env = "CHORECLOCK_SCOPES"
    )]
    pub scopes: Option<Vec<String>>,

    /// 32 byte secret key used to seal the credential cookie
    #[clap(long, hide_env_values(true), value_parser, env = "CHORECLOCK_SECRET_KEY")]
    pub secret_key: Option<String>,

    /// JSON file holding the status record
    #[clap(long, hide_env_values(true), value_parser, env = "CHORECLOCK_STATUS_FILE")]
    pub status_file: Option<PathBuf>,

    /// Comma separated key names the status record is created with
    #[clap(
        long,
        hide_env_values(true),
        value_delimiter = ',',
        env = "CHORECLOCK_STATUS_KEYS"
    )]
    pub status_keys: Option<Vec<String>>,

    /// Timeout in seconds for every call to the identity provider
    #[clap(long, hide_env_values(true), value_parser, env = "CHORECLOCK_PROVIDER_TIMEOUT_SECS")]
    pub provider_timeout_secs: Option<u64>,

    /// Seconds a started login may wait for its callback
    #[clap(long, hide_env_values(true), value_parser, env = "CHORECLOCK_LOGIN_TTL_SECS")]
    pub login_ttl_secs: Option<u64>,

    /// URL to send OTLP traces to. Will only send traces if this property is specified.
    #[clap(long, hide_env_values(true), value_parser, env = "CHORECLOCK_OTLP_ENDPOINT")]
    pub otlp_endpoint: Option<String>,

    /// Additional headers in k=v,k=v format to send with OTLP traces.
    #[clap(long, hide_env_values(true), value_parser, env = "CHORECLOCK_OTLP_HEADERS")]
    pub otlp_headers: Option<String>,
}

pub fn load() -> Result<AppConfig> {
    let cli_args = ConfigSource::parse();
    let mut conf = AppConfig::default();

    if let Some(p) = &cli_args.config {
        let file_conf: ConfigSource = toml::from_str(&fs::read_to_string(p)?)?;
        conf.merge_source_config(file_conf);
    }

    conf.merge_source_config(cli_args);
    conf.validate()?;

    Ok(conf)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn valid_config() -> AppConfig {
        AppConfig {
            client_id: "not_empty".to_string(),
            client_secret: "not_empty".to_string(),
            secret_key: "11111111111111111111111111111111".to_string(),
            ..Default::default()
        }
    }

    #[test]
    fn merge_none_does_nothing() {
        let mut base = AppConfig::default();
        base.merge_source_config(ConfigSource::default());
        assert_eq!(base, AppConfig::default());
    }

    #[test]
    fn merge_multiple_layers() {
        let mut base = AppConfig::default();
        let layer = ConfigSource {
            log_level: Some("test".to_string()),
            ..Default::default()
        };
        let second_layer = ConfigSource {
            log_level: Some("second_test".to_string()),
            client_id: Some("id".to_string()),
            status_keys: Some(vec!["fed_cat".to_string()]),
            ..Default::default()
        };

        base.merge_source_config(layer);
        assert_eq!(base.log_level, "test".to_string());
        assert!(base.client_id.is_empty());

        base.merge_source_config(second_layer);
        assert_eq!(base.log_level, "second_test".to_string());
        assert_eq!(base.client_id, "id".to_string());
        assert_eq!(base.status_keys, vec!["fed_cat".to_string()]);
    }

    #[test]
    fn toml_layer_parses_lists() {
        let layer: ConfigSource = toml::from_str(
            r#"
            scopes = ["openid", "offline_access"]
            status_keys = ["last_emptied"]
            provider_timeout_secs = 3
            "#,
        )
        .unwrap();
        let mut base = AppConfig::default();
        base.merge_source_config(layer);
        assert_eq!(base.scopes, vec!["openid", "offline_access"]);
        assert_eq!(base.status_keys, vec!["last_emptied"]);
        assert_eq!(base.provider_timeout(), Duration::from_secs(3));
    }

    #[test]
    fn validate_fails_with_missing_client_id() {
        let res = AppConfig::default().validate();
        assert_eq!(res.unwrap_err().to_string(), "Client ID must be set");
    }

    #[test]
    fn validate_fails_with_missing_client_secret() {
        let base = AppConfig {
            client_secret: "".to_string(),
            ..valid_config()
        };
        let res = base.validate();
        assert_eq!(res.unwrap_err().to_string(), "Client secret must be set");
    }

    #[test]
    fn validate_fails_with_short_secret_key() {
        let base = AppConfig {
            secret_key: "short".to_string(),
            ..valid_config()
        };
        let res = base.validate();
        assert_eq!(
            res.unwrap_err().to_string(),
            "Secret key must be exactly 32 bytes"
        );
    }

    #[test]
    fn validate_fails_with_relative_redirect_uri() {
        let base = AppConfig {
            redirect_uri: "/api/callback".to_string(),
            ..valid_config()
        };
        assert!(base.validate().is_err());
    }

    #[test]
    fn validate_passes_with_required_fields() {
        assert!(valid_config().validate().is_ok());
    }

    #[test]
    fn secure_cookies_follow_redirect_scheme() {
        let plain = valid_config();
        assert!(!plain.secure_cookies());

        let tls = AppConfig {
            redirect_uri: "https://chores.example.com/api/callback".to_string(),
            ..valid_config()
        };
        assert!(tls.secure_cookies());
    }
}
