use crate::{
    oauth::{AccessTokenSource, CachedTokenSource, ServiceAccountTokenSource, TokenExchangeClient},
    Error, APPLE_KEYS_URI, APPLE_PRODUCTION_RECEIPT_URI, APPLE_SANDBOX_RECEIPT_URI,
    FACEBOOK_GRAPH_URI, FCM_URI, GOOGLE_PLAY_API_URI, GOOGLE_TOKENINFO_URI, GOOGLE_TOKEN_URI,
};
use serde::Deserialize;
use std::{fs, sync::Arc, time::Duration};

#[derive(Clone, Debug, Deserialize)]
pub struct Settings {
    /// Timeout in seconds applied to every outbound request; default 30
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,

    /// Apple receipt validation endpoint for production purchases
    #[serde(default = "default_apple_production_url")]
    pub apple_production_url: String,
    /// Apple receipt validation endpoint for sandbox purchases
    #[serde(default = "default_apple_sandbox_url")]
    pub apple_sandbox_url: String,
    /// Apple's published Sign in with Apple key set
    #[serde(default = "default_apple_keys_url")]
    pub apple_keys_url: String,
    /// App-specific shared secret sent with every receipt
    pub apple_shared_secret: Option<String>,
    /// Validate receipts against the sandbox only
    #[serde(default)]
    pub apple_use_sandbox: bool,

    /// OAuth2 token endpoint; also the `aud` of service account assertions
    #[serde(default = "default_google_token_url")]
    pub google_token_url: String,
    #[serde(default = "default_google_tokeninfo_url")]
    pub google_tokeninfo_url: String,
    #[serde(default = "default_google_play_api_url")]
    pub google_play_api_url: String,
    /// OAuth client id that Google ID tokens must be issued for
    pub google_client_id: Option<String>,
    /// Play Developer API service account, as inline JSON or a path to the JSON file
    pub google_service_account: Option<String>,

    #[serde(default = "default_facebook_graph_url")]
    pub facebook_graph_url: String,
    pub facebook_app_id: Option<String>,
    pub facebook_app_secret: Option<String>,

    #[serde(default = "default_fcm_url")]
    pub fcm_url: String,
    pub firebase_project_id: Option<String>,
    /// Cloud Messaging service account, as inline JSON or a path to the JSON file
    pub firebase_service_account: Option<String>,

    /// Reuse access tokens until shortly before they expire
    #[serde(default)]
    pub cache_access_tokens: bool,
    /// Key set lifetime in seconds when the provider sends no max-age; default 1 hour
    #[serde(default = "default_jwks_cache_secs")]
    pub jwks_cache_secs: u64,

    /// Whether the social login endpoints are advertised to the app
    #[serde(default)]
    pub social_login_enabled: bool,
    /// Course ids sold as in-app products
    #[serde(default)]
    pub iap_course_ids: Vec<String>,
}

/// The two fields of a Google service account file used to mint assertions.
#[derive(Clone, Deserialize)]
pub struct ServiceAccountKey {
    pub client_email: String,
    pub private_key: String,
}

impl std::fmt::Debug for ServiceAccountKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ServiceAccountKey")
            .field("client_email", &self.client_email)
            .finish_non_exhaustive()
    }
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_apple_production_url() -> String {
    APPLE_PRODUCTION_RECEIPT_URI.to_string()
}

fn default_apple_sandbox_url() -> String {
    APPLE_SANDBOX_RECEIPT_URI.to_string()
}

fn default_apple_keys_url() -> String {
    APPLE_KEYS_URI.to_string()
}

fn default_google_token_url() -> String {
    GOOGLE_TOKEN_URI.to_string()
}

fn default_google_tokeninfo_url() -> String {
    GOOGLE_TOKENINFO_URI.to_string()
}

fn default_google_play_api_url() -> String {
    GOOGLE_PLAY_API_URI.to_string()
}

fn default_facebook_graph_url() -> String {
    FACEBOOK_GRAPH_URI.to_string()
}

fn default_fcm_url() -> String {
    FCM_URI.to_string()
}

fn default_jwks_cache_secs() -> u64 {
    3600
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            timeout_secs: default_timeout_secs(),
            apple_production_url: default_apple_production_url(),
            apple_sandbox_url: default_apple_sandbox_url(),
            apple_keys_url: default_apple_keys_url(),
            apple_shared_secret: None,
            apple_use_sandbox: false,
            google_token_url: default_google_token_url(),
            google_tokeninfo_url: default_google_tokeninfo_url(),
            google_play_api_url: default_google_play_api_url(),
            google_client_id: None,
            google_service_account: None,
            facebook_graph_url: default_facebook_graph_url(),
            facebook_app_id: None,
            facebook_app_secret: None,
            fcm_url: default_fcm_url(),
            firebase_project_id: None,
            firebase_service_account: None,
            cache_access_tokens: false,
            jwks_cache_secs: default_jwks_cache_secs(),
            social_login_enabled: false,
            iap_course_ids: Vec::new(),
        }
    }
}

impl Settings {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs)
    }

    pub fn jwks_cache_duration(&self) -> Duration {
        Duration::from_secs(self.jwks_cache_secs)
    }

    /// One client shared by every verifier so the timeout applies uniformly.
    pub fn http_client(&self) -> Result<reqwest::Client, Error> {
        Ok(reqwest::Client::builder().timeout(self.timeout()).build()?)
    }

    pub fn google_service_account(&self) -> Option<Result<ServiceAccountKey, Error>> {
        self.google_service_account
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .map(ServiceAccountKey::from_json_or_path)
    }

    pub fn firebase_service_account(&self) -> Option<Result<ServiceAccountKey, Error>> {
        self.firebase_service_account
            .as_deref()
            .filter(|value| !value.trim().is_empty())
            .map(ServiceAccountKey::from_json_or_path)
    }

    pub fn token_source(
        &self,
        client: reqwest::Client,
        key: ServiceAccountKey,
        scope: &str,
        with_subject: bool,
    ) -> Arc<dyn AccessTokenSource> {
        let source = ServiceAccountTokenSource::new(
            key,
            scope,
            with_subject,
            TokenExchangeClient::new(client, &self.google_token_url),
        );
        if self.cache_access_tokens {
            Arc::new(CachedTokenSource::new(source))
        } else {
            Arc::new(source)
        }
    }
}

impl ServiceAccountKey {
    pub fn from_json(json: &str) -> Result<Self, Error> {
        let key: Self = serde_json::from_str(json)
            .map_err(|err| Error::Configuration(format!("invalid service account json: {err}")))?;
        if key.client_email.is_empty() || key.private_key.is_empty() {
            return Err(Error::Configuration(
                "service account is missing client_email or private_key".to_string(),
            ));
        }
        Ok(key)
    }

    /// Inline JSON is recognised by its opening brace; anything else is read
    /// as a path.
    pub fn from_json_or_path(json_or_path: &str) -> Result<Self, Error> {
        if json_or_path.trim_start().starts_with('{') {
            Self::from_json(json_or_path)
        } else {
            Self::from_json(&fs::read_to_string(json_or_path)?)
        }
    }
}
