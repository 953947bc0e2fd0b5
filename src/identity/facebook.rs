use super::{IdentityClaims, IdentityVerifier, Provider};
use crate::Error;
use async_trait::async_trait;
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct AppToken {
    access_token: Option<String>,
}

#[derive(Debug, Deserialize)]
struct DebugToken {
    data: Option<DebugTokenData>,
}

#[derive(Debug, Deserialize)]
struct DebugTokenData {
    app_id: Option<String>,
    #[serde(default)]
    is_valid: bool,
}

#[derive(Debug, Deserialize)]
struct Me {
    id: Option<String>,
    email: Option<String>,
    name: Option<String>,
    picture: Option<Picture>,
}

#[derive(Debug, Deserialize)]
struct Picture {
    data: Option<PictureData>,
}

#[derive(Debug, Deserialize)]
struct PictureData {
    url: Option<String>,
}

/// Facebook user access tokens. The token is checked with `debug_token`
/// under an app access token before it is used to read the profile.
pub struct FacebookIdentityVerifier {
    client: reqwest::Client,
    graph_url: String,
    app_id: Option<String>,
    app_secret: Option<String>,
}

impl FacebookIdentityVerifier {
    pub fn new(
        client: reqwest::Client,
        graph_url: impl Into<String>,
        app_id: Option<String>,
        app_secret: Option<String>,
    ) -> Self {
        Self {
            client,
            graph_url: graph_url.into(),
            app_id,
            app_secret,
        }
    }

    async fn app_access_token(&self, app_id: &str, app_secret: &str) -> Result<String, Error> {
        let token: AppToken = self
            .client
            .get(format!("{}/oauth/access_token", self.graph_url))
            .query(&[
                ("client_id", app_id),
                ("client_secret", app_secret),
                ("grant_type", "client_credentials"),
            ])
            .send()
            .await?
            .json()
            .await?;
        token
            .access_token
            .filter(|token| !token.is_empty())
            .ok_or_else(|| Error::TokenExchange("facebook app id or secret is invalid".to_string()))
    }
}

#[async_trait]
impl IdentityVerifier for FacebookIdentityVerifier {
    fn provider(&self) -> Provider {
        Provider::Facebook
    }

    async fn verify(&self, user_token: &str) -> Result<IdentityClaims, Error> {
        let (app_id, app_secret) = match (self.app_id.as_deref(), self.app_secret.as_deref()) {
            (Some(id), Some(secret)) if !id.is_empty() && !secret.is_empty() => (id, secret),
            _ => return Err(Error::Configuration("facebook app id or secret".to_string())),
        };
        let app_token = self.app_access_token(app_id, app_secret).await?;

        let debug: DebugToken = self
            .client
            .get(format!("{}/debug_token", self.graph_url))
            .query(&[("input_token", user_token), ("access_token", app_token.as_str())])
            .send()
            .await?
            .json()
            .await?;
        match debug.data {
            Some(DebugTokenData {
                app_id: Some(issued_for),
                is_valid: true,
            }) if issued_for == app_id => (),
            Some(DebugTokenData { is_valid: true, .. }) => {
                return Err(Error::Rejected("token was issued for another app".to_string()))
            }
            _ => return Err(Error::Rejected("token is not valid".to_string())),
        }

        let me: Me = self
            .client
            .get(format!("{}/me", self.graph_url))
            .query(&[("fields", "id,email,name,picture"), ("access_token", user_token)])
            .send()
            .await?
            .json()
            .await?;
        let email = me
            .email
            .filter(|email| !email.is_empty())
            .ok_or(Error::MissingEmail)?;

        Ok(IdentityClaims {
            provider: Provider::Facebook,
            subject: me.id,
            email,
            name: me.name,
            picture: me.picture.and_then(|picture| picture.data).and_then(|data| data.url),
        })
    }
}
