use crate::{audit::AuditSink, jwk::KeyResolver, Error, Settings, VerificationRecord};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::{collections::HashMap, fmt, sync::Arc};

mod apple;
mod facebook;
mod google;

pub use apple::{AppleIdentityVerifier, APPLE_ISSUER};
pub use facebook::FacebookIdentityVerifier;
pub use google::GoogleIdentityVerifier;

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
#[serde(rename_all = "lowercase")]
pub enum Provider {
    Apple,
    Google,
    Facebook,
}

impl Provider {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Apple => "apple",
            Self::Google => "google",
            Self::Facebook => "facebook",
        }
    }
}

impl fmt::Display for Provider {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A verified third-party identity.
#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct IdentityClaims {
    pub provider: Provider,
    /// Provider scoped user id (`sub` or Facebook user id)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub subject: Option<String>,
    pub email: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    /// Profile picture URL, when the provider shares one.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub picture: Option<String>,
}

#[async_trait]
pub trait IdentityVerifier: Send + Sync {
    fn provider(&self) -> Provider;

    async fn verify(&self, token: &str) -> Result<IdentityClaims, Error>;
}

/// Dispatches identity tokens to the verifier for their provider and records
/// every attempt.
pub struct SocialLogin {
    verifiers: HashMap<Provider, Arc<dyn IdentityVerifier>>,
    enabled: Vec<Provider>,
    audit: Arc<dyn AuditSink>,
}

impl SocialLogin {
    pub fn new(audit: Arc<dyn AuditSink>) -> Self {
        Self {
            verifiers: HashMap::new(),
            enabled: Vec::new(),
            audit,
        }
    }

    /// Registers a verifier. Disabled providers are still verifiable but are
    /// not advertised by [`SocialLogin::enabled_providers`].
    pub fn with_verifier(mut self, verifier: Arc<dyn IdentityVerifier>, enabled: bool) -> Self {
        let provider = verifier.provider();
        if enabled && !self.enabled.contains(&provider) {
            self.enabled.push(provider);
        }
        self.verifiers.insert(provider, verifier);
        self
    }

    pub fn from_settings(
        settings: &Settings,
        client: reqwest::Client,
        keys: Arc<dyn KeyResolver>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        let configured = |value: &Option<String>| value.as_deref().is_some_and(|v| !v.is_empty());

        Self::new(audit)
            .with_verifier(
                Arc::new(FacebookIdentityVerifier::new(
                    client.clone(),
                    &settings.facebook_graph_url,
                    settings.facebook_app_id.clone(),
                    settings.facebook_app_secret.clone(),
                )),
                configured(&settings.facebook_app_id),
            )
            .with_verifier(
                Arc::new(GoogleIdentityVerifier::new(
                    client,
                    &settings.google_tokeninfo_url,
                    settings.google_client_id.clone(),
                )),
                configured(&settings.google_client_id),
            )
            .with_verifier(Arc::new(AppleIdentityVerifier::new(keys)), true)
    }

    pub fn enabled_providers(&self) -> &[Provider] {
        &self.enabled
    }

    pub fn is_enabled(&self, provider: Provider) -> bool {
        self.enabled.contains(&provider)
    }

    pub async fn verify(&self, provider: Provider, token: &str) -> Result<IdentityClaims, Error> {
        let outcome = match self.verifiers.get(&provider) {
            Some(verifier) => verifier.verify(token).await,
            None => Err(Error::Configuration(format!("{provider} sign-in"))),
        };
        if let Err(ref err) = outcome {
            if err.is_configuration() {
                tracing::error!(%provider, ?err, "identity verification is not configured");
            }
        }

        let subject = match &outcome {
            Ok(claims) => claims.email.as_str(),
            Err(_) => "unknown",
        };
        self.audit
            .record(VerificationRecord::new(provider.as_str(), subject, &outcome));
        outcome
    }
}
