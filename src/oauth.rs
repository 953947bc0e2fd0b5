use crate::{jwt, Claims, Error, ServiceAccountKey, ALG};
use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use serde_json::Value;
use std::time::{Duration, Instant};
use tokio::sync::Mutex;

pub const JWT_BEARER_GRANT: &str = "urn:ietf:params:oauth:grant-type:jwt-bearer";
pub const ANDROID_PUBLISHER_SCOPE: &str = "https://www.googleapis.com/auth/androidpublisher";
pub const FIREBASE_MESSAGING_SCOPE: &str = "https://www.googleapis.com/auth/firebase.messaging";

const ASSERTION_LIFETIME_SECS: i64 = 3600;
const DEFAULT_EXPIRES_IN_SECS: u64 = 3600;
const REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Claim set for a service account assertion. `sub` is only set when the
/// token is used for Play Developer API calls.
pub fn assertion_claims(
    key: &ServiceAccountKey,
    scope: &str,
    audience: &str,
    with_subject: bool,
    issued_at: DateTime<Utc>,
) -> Claims {
    let iat = issued_at.timestamp();
    let mut claims = Claims::new();
    claims.insert("iss".into(), Value::from(key.client_email.as_str()));
    if with_subject {
        claims.insert("sub".into(), Value::from(key.client_email.as_str()));
    }
    claims.insert("scope".into(), Value::from(scope));
    claims.insert("aud".into(), Value::from(audience));
    claims.insert("exp".into(), Value::from(iat + ASSERTION_LIFETIME_SECS));
    claims.insert("iat".into(), Value::from(iat));
    claims
}

pub fn build_assertion(
    key: &ServiceAccountKey,
    scope: &str,
    audience: &str,
    with_subject: bool,
) -> Result<String, Error> {
    jwt::sign(
        &assertion_claims(key, scope, audience, with_subject, Utc::now()),
        &key.private_key,
        ALG,
    )
}

#[derive(Clone, Debug)]
pub struct AccessToken {
    pub token: String,
    pub expires_in: Duration,
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: Option<String>,
    expires_in: Option<u64>,
    error: Option<String>,
    error_description: Option<String>,
}

impl TokenResponse {
    fn error_message(self) -> Option<String> {
        self.error_description.or(self.error)
    }
}

#[derive(Clone)]
pub struct TokenExchangeClient {
    client: reqwest::Client,
    token_url: String,
}

impl TokenExchangeClient {
    pub fn new(client: reqwest::Client, token_url: impl Into<String>) -> Self {
        Self {
            client,
            token_url: token_url.into(),
        }
    }

    pub fn token_url(&self) -> &str {
        &self.token_url
    }

    pub async fn exchange(&self, assertion: &str) -> Result<AccessToken, Error> {
        let response = self
            .client
            .post(&self.token_url)
            .form(&[("grant_type", JWT_BEARER_GRANT), ("assertion", assertion)])
            .send()
            .await?;
        let status = response.status();
        let body = response.text().await?;
        let parsed = serde_json::from_str::<TokenResponse>(&body).ok();

        if !status.is_success() {
            let message = parsed
                .and_then(TokenResponse::error_message)
                .unwrap_or_else(|| format!("token endpoint returned {status}"));
            tracing::warn!(%status, reason = %message, "access token exchange rejected");
            return Err(Error::TokenExchange(message));
        }

        match parsed {
            Some(TokenResponse {
                access_token: Some(token),
                expires_in,
                ..
            }) if !token.is_empty() => Ok(AccessToken {
                token,
                expires_in: Duration::from_secs(expires_in.unwrap_or(DEFAULT_EXPIRES_IN_SECS)),
            }),
            Some(response) => Err(Error::TokenExchange(
                response
                    .error_message()
                    .unwrap_or_else(|| "response missing access_token".to_string()),
            )),
            None => Err(Error::TokenExchange("response is not json".to_string())),
        }
    }
}

#[async_trait]
pub trait AccessTokenSource: Send + Sync {
    async fn access_token(&self) -> Result<String, Error>;
}

/// Mints and exchanges a fresh assertion on every call.
pub struct ServiceAccountTokenSource {
    key: ServiceAccountKey,
    scope: String,
    with_subject: bool,
    exchange: TokenExchangeClient,
}

impl ServiceAccountTokenSource {
    pub fn new(
        key: ServiceAccountKey,
        scope: impl Into<String>,
        with_subject: bool,
        exchange: TokenExchangeClient,
    ) -> Self {
        Self {
            key,
            scope: scope.into(),
            with_subject,
            exchange,
        }
    }

    pub async fn mint(&self) -> Result<AccessToken, Error> {
        let assertion = build_assertion(
            &self.key,
            &self.scope,
            self.exchange.token_url(),
            self.with_subject,
        )?;
        let token = self.exchange.exchange(&assertion).await?;
        tracing::debug!(scope = %self.scope, client_email = %self.key.client_email, "minted access token");
        Ok(token)
    }
}

#[async_trait]
impl AccessTokenSource for ServiceAccountTokenSource {
    async fn access_token(&self) -> Result<String, Error> {
        self.mint().await.map(|token| token.token)
    }
}

/// Reuses a minted token until shortly before it expires.
pub struct CachedTokenSource {
    inner: ServiceAccountTokenSource,
    cached: Mutex<Option<(String, Instant)>>,
}

impl CachedTokenSource {
    pub fn new(inner: ServiceAccountTokenSource) -> Self {
        Self {
            inner,
            cached: Mutex::new(None),
        }
    }
}

#[async_trait]
impl AccessTokenSource for CachedTokenSource {
    async fn access_token(&self) -> Result<String, Error> {
        let mut cached = self.cached.lock().await;
        if let Some((token, refresh_at)) = cached.as_ref() {
            if Instant::now() < *refresh_at {
                return Ok(token.clone());
            }
        }

        let minted = self.inner.mint().await?;
        *cached = minted
            .expires_in
            .checked_sub(REFRESH_MARGIN)
            .filter(|ttl| !ttl.is_zero())
            .map(|ttl| (minted.token.clone(), Instant::now() + ttl));
        Ok(minted.token)
    }
}
