use crate::{audit::AuditSink, oauth::ANDROID_PUBLISHER_SCOPE, Error, Settings, VerificationRecord};
use serde::{Deserialize, Serialize};
use std::{fmt, sync::Arc};

mod apple;
mod google;

pub use apple::{AppleReceiptResponse, AppleReceiptVerifier, SANDBOX_RECEIPT_STATUS};
pub use google::{GooglePurchaseResponse, GoogleReceiptVerifier};

#[derive(Clone, Copy, Debug, Deserialize, Serialize, PartialEq, Eq, Hash)]
pub enum Store {
    #[serde(rename = "apple")]
    AppStore,
    #[serde(rename = "google")]
    GooglePlay,
}

impl Store {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::AppStore => "apple",
            Self::GooglePlay => "google",
        }
    }
}

impl fmt::Display for Store {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Clone, Debug, PartialEq, Serialize)]
pub struct PurchaseClaims {
    pub store: Store,
    pub product_id: String,
    /// Apple transaction id or Google order id, when the store reports one.
    pub transaction_id: Option<String>,
}

/// Entry point for purchase verification. A store whose credentials are not
/// configured fails every check with [`Error::Configuration`].
pub struct ReceiptVerifier {
    apple: Option<AppleReceiptVerifier>,
    google: Option<GoogleReceiptVerifier>,
    audit: Arc<dyn AuditSink>,
}

impl ReceiptVerifier {
    pub fn new(
        apple: Option<AppleReceiptVerifier>,
        google: Option<GoogleReceiptVerifier>,
        audit: Arc<dyn AuditSink>,
    ) -> Self {
        Self {
            apple,
            google,
            audit,
        }
    }

    pub fn from_settings(
        settings: &Settings,
        client: reqwest::Client,
        audit: Arc<dyn AuditSink>,
    ) -> Result<Self, Error> {
        let apple = settings
            .apple_shared_secret
            .as_deref()
            .filter(|secret| !secret.is_empty())
            .map(|secret| {
                AppleReceiptVerifier::new(
                    client.clone(),
                    &settings.apple_production_url,
                    &settings.apple_sandbox_url,
                    secret,
                    settings.apple_use_sandbox,
                )
            });
        let google = settings
            .google_service_account()
            .transpose()?
            .map(|key| {
                GoogleReceiptVerifier::new(
                    client.clone(),
                    &settings.google_play_api_url,
                    settings.token_source(client.clone(), key, ANDROID_PUBLISHER_SCOPE, true),
                )
            });
        Ok(Self::new(apple, google, audit))
    }

    pub async fn check(
        &self,
        store: Store,
        receipt: &str,
        expected_product_id: &str,
    ) -> Result<PurchaseClaims, Error> {
        match store {
            Store::AppStore => match &self.apple {
                Some(apple) => apple.check(receipt, expected_product_id).await,
                None => Err(Error::Configuration("apple shared secret".to_string())),
            },
            Store::GooglePlay => match &self.google {
                Some(google) => google.check(receipt, expected_product_id).await,
                None => Err(Error::Configuration("google service account".to_string())),
            },
        }
    }

    /// [`ReceiptVerifier::check`] plus an audit record of the outcome.
    pub async fn verify_purchase(
        &self,
        store: Store,
        receipt: &str,
        expected_product_id: &str,
        user_id: Option<u64>,
    ) -> Result<PurchaseClaims, Error> {
        let outcome = self.check(store, receipt, expected_product_id).await;
        if let Err(ref err) = outcome {
            if err.is_configuration() {
                tracing::error!(%store, ?err, "receipt verification is not configured");
            }
        }
        self.audit.record(
            VerificationRecord::new(store.as_str(), expected_product_id, &outcome).with_user_id(user_id),
        );
        outcome
    }

    /// Failures of any kind deny.
    pub async fn verify(
        &self,
        store: Store,
        receipt: &str,
        expected_product_id: &str,
        user_id: Option<u64>,
    ) -> bool {
        self.verify_purchase(store, receipt, expected_product_id, user_id)
            .await
            .is_ok()
    }

    pub async fn verify_apple_receipt(&self, receipt_data: &str, expected_product_id: &str) -> bool {
        self.verify(Store::AppStore, receipt_data, expected_product_id, None)
            .await
    }

    pub async fn verify_google_receipt(&self, receipt_json: &str, expected_product_id: &str) -> bool {
        self.verify(Store::GooglePlay, receipt_json, expected_product_id, None)
            .await
    }
}
