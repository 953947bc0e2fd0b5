use crate::{oauth::FIREBASE_MESSAGING_SCOPE, AccessTokenSource, Error, Settings};
use serde::{Deserialize, Serialize};
use serde_json::{json, Value};
use std::{collections::BTreeMap, sync::Arc};

const LOGGED_TOKEN_CHARS: usize = 20;

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Platform {
    Ios,
    Android,
}

/// A registered device. Persisting devices is up to the host.
#[derive(Clone, Debug, Deserialize, Serialize, PartialEq)]
pub struct Device {
    pub token: String,
    pub platform: Platform,
}

#[derive(Clone, Debug, Default, PartialEq)]
pub struct Notification {
    pub title: String,
    pub body: String,
    pub data: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize)]
struct SendResponse {
    name: Option<String>,
}

fn loggable_token(token: &str) -> String {
    let mut prefix: String = token.chars().take(LOGGED_TOKEN_CHARS).collect();
    prefix.push_str("...");
    prefix
}

pub fn message_body(device: &Device, notification: &Notification) -> Value {
    let mut message = json!({
        "token": device.token,
        "notification": {
            "title": notification.title,
            "body": notification.body,
        },
    });
    if !notification.data.is_empty() {
        message["data"] = json!(notification.data);
    }
    match device.platform {
        Platform::Ios => {
            message["apns"] = json!({"payload": {"aps": {"sound": "default", "badge": 1}}});
        }
        Platform::Android => {
            message["android"] = json!({"priority": "high", "notification": {"sound": "default"}});
        }
    }
    json!({ "message": message })
}

pub struct PushSender {
    client: reqwest::Client,
    send_url: String,
    tokens: Arc<dyn AccessTokenSource>,
}

impl PushSender {
    pub fn new(
        client: reqwest::Client,
        fcm_url: &str,
        project_id: &str,
        tokens: Arc<dyn AccessTokenSource>,
    ) -> Self {
        Self {
            client,
            send_url: format!("{fcm_url}/v1/projects/{project_id}/messages:send"),
            tokens,
        }
    }

    /// `None` unless both the project id and the service account are set.
    pub fn from_settings(settings: &Settings, client: reqwest::Client) -> Result<Option<Self>, Error> {
        let Some(project_id) = settings
            .firebase_project_id
            .as_deref()
            .filter(|id| !id.is_empty())
        else {
            return Ok(None);
        };
        let Some(key) = settings.firebase_service_account().transpose()? else {
            return Ok(None);
        };
        let tokens = settings.token_source(client.clone(), key, FIREBASE_MESSAGING_SCOPE, false);
        Ok(Some(Self::new(client, &settings.fcm_url, project_id, tokens)))
    }

    /// Sends one message and returns the message name FCM assigned to it.
    pub async fn send(&self, device: &Device, notification: &Notification) -> Result<String, Error> {
        let access_token = self.tokens.access_token().await?;
        self.deliver(&access_token, device, notification).await
    }

    /// Sends to every device under one access token. Returns how many
    /// deliveries FCM accepted.
    pub async fn send_all(&self, devices: &[Device], notification: &Notification) -> usize {
        if devices.is_empty() {
            return 0;
        }
        let access_token = match self.tokens.access_token().await {
            Ok(token) => token,
            Err(err) => {
                tracing::error!(?err, "failed to get firebase access token");
                return 0;
            }
        };

        let mut delivered = 0;
        for device in devices {
            let device_token = loggable_token(&device.token);
            match self.deliver(&access_token, device, notification).await {
                Ok(name) => {
                    delivered += 1;
                    tracing::info!(%device_token, title = %notification.title, %name, "push delivered");
                }
                Err(err) => {
                    metrics::counter!("push-rejected", "reason" => err.reason()).increment(1);
                    tracing::warn!(%device_token, title = %notification.title, ?err, "push rejected");
                }
            }
        }
        delivered
    }

    async fn deliver(
        &self,
        access_token: &str,
        device: &Device,
        notification: &Notification,
    ) -> Result<String, Error> {
        let body = self
            .client
            .post(&self.send_url)
            .bearer_auth(access_token)
            .json(&message_body(device, notification))
            .send()
            .await?
            .text()
            .await?;

        serde_json::from_str::<SendResponse>(&body)
            .ok()
            .and_then(|response| response.name)
            .ok_or(Error::PushRejected(body))
    }
}
