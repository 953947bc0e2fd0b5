use super::{IdentityClaims, IdentityVerifier, Provider};
use crate::Error;
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct TokenInfo {
    aud: Option<String>,
    sub: Option<String>,
    email: Option<String>,
    name: Option<String>,
    picture: Option<String>,
    error: Option<String>,
    error_description: Option<String>,
}

/// Google ID tokens, checked through the tokeninfo endpoint.
pub struct GoogleIdentityVerifier {
    client: reqwest::Client,
    tokeninfo_url: String,
    client_id: Option<String>,
}

impl GoogleIdentityVerifier {
    pub fn new(
        client: reqwest::Client,
        tokeninfo_url: impl Into<String>,
        client_id: Option<String>,
    ) -> Self {
        Self {
            client,
            tokeninfo_url: tokeninfo_url.into(),
            client_id,
        }
    }
}

#[async_trait]
impl IdentityVerifier for GoogleIdentityVerifier {
    fn provider(&self) -> Provider {
        Provider::Google
    }

    async fn verify(&self, id_token: &str) -> Result<IdentityClaims, Error> {
        let client_id = self
            .client_id
            .as_deref()
            .filter(|id| !id.is_empty())
            .ok_or_else(|| Error::Configuration("google client id".to_string()))?;

        let response = self
            .client
            .get(&self.tokeninfo_url)
            .query(&[("id_token", id_token)])
            .send()
            .await?;
        let status = response.status();
        let info = match response.json::<TokenInfo>().await {
            Ok(info) => info,
            Err(_) if !status.is_success() => {
                return Err(Error::Rejected(format!("tokeninfo returned {status}")))
            }
            Err(err) => return Err(err.into()),
        };

        if let Some(error) = info.error {
            return Err(Error::Rejected(info.error_description.unwrap_or(error)));
        }
        if info.aud.as_deref() != Some(client_id) {
            return Err(Error::InvalidAudience);
        }
        let email = info
            .email
            .filter(|email| !email.is_empty())
            .ok_or(Error::MissingEmail)?;

        Ok(IdentityClaims {
            provider: Provider::Google,
            subject: info.sub,
            email,
            name: info.name,
            picture: info.picture,
        })
    }
}
