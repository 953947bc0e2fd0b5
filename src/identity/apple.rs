use super::{IdentityClaims, IdentityVerifier, Provider};
use crate::{jwk::KeyResolver, jwt, Claims, Error, ALG};
use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use std::sync::Arc;

pub const APPLE_ISSUER: &str = "https://appleid.apple.com";

/// Sign in with Apple identity tokens.
pub struct AppleIdentityVerifier {
    keys: Arc<dyn KeyResolver>,
}

fn string_claim<'a>(claims: &'a Claims, name: &str) -> Option<&'a str> {
    claims.get(name).and_then(Value::as_str)
}

impl AppleIdentityVerifier {
    pub fn new(keys: Arc<dyn KeyResolver>) -> Self {
        Self { keys }
    }

    /// Verifies against the given clock, in seconds since the epoch.
    pub async fn verify_at(&self, identity_token: &str, now: i64) -> Result<IdentityClaims, Error> {
        let kid = jwt::decode_header(identity_token)?
            .kid
            .ok_or_else(|| Error::MalformedToken("header has no kid".to_string()))?;
        let public_key = self.keys.resolve(&kid).await?;
        let claims = jwt::verify(identity_token, &public_key, &[ALG])?;

        let issuer = string_claim(&claims, "iss").unwrap_or_default();
        if issuer != APPLE_ISSUER {
            return Err(Error::InvalidIssuer(issuer.to_string()));
        }
        let expires_at = claims
            .get("exp")
            .and_then(Value::as_i64)
            .ok_or_else(|| Error::MalformedToken("payload has no exp".to_string()))?;
        if expires_at < now {
            return Err(Error::ExpiredToken(expires_at));
        }
        let email = string_claim(&claims, "email")
            .filter(|email| !email.is_empty())
            .ok_or(Error::MissingEmail)?;

        Ok(IdentityClaims {
            provider: Provider::Apple,
            subject: string_claim(&claims, "sub").map(str::to_string),
            email: email.to_string(),
            name: None,
            picture: None,
        })
    }
}

#[async_trait]
impl IdentityVerifier for AppleIdentityVerifier {
    fn provider(&self) -> Provider {
        Provider::Apple
    }

    async fn verify(&self, identity_token: &str) -> Result<IdentityClaims, Error> {
        self.verify_at(identity_token, Utc::now().timestamp()).await
    }
}
