use super::{PurchaseClaims, Store};
use crate::Error;
use serde::{Deserialize, Serialize};

/// "This receipt is from the test environment, but it was sent to the
/// production environment for verification."
pub const SANDBOX_RECEIPT_STATUS: i64 = 21007;

#[derive(Serialize)]
struct VerifyReceiptRequest<'a> {
    #[serde(rename = "receipt-data")]
    receipt_data: &'a str,
    password: &'a str,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppleReceiptResponse {
    pub status: i64,
    #[serde(default)]
    pub receipt: Option<AppleReceipt>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct AppleReceipt {
    #[serde(default)]
    pub bundle_id: Option<String>,
    #[serde(default)]
    pub in_app: Vec<InAppPurchase>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct InAppPurchase {
    pub product_id: String,
    #[serde(default)]
    pub transaction_id: Option<String>,
}

/// verifyReceipt client. Production is tried first; a sandbox receipt
/// (status 21007) is retried once against the sandbox endpoint.
pub struct AppleReceiptVerifier {
    client: reqwest::Client,
    production_url: String,
    sandbox_url: String,
    shared_secret: String,
    use_sandbox: bool,
}

impl AppleReceiptVerifier {
    pub fn new(
        client: reqwest::Client,
        production_url: impl Into<String>,
        sandbox_url: impl Into<String>,
        shared_secret: impl Into<String>,
        use_sandbox: bool,
    ) -> Self {
        Self {
            client,
            production_url: production_url.into(),
            sandbox_url: sandbox_url.into(),
            shared_secret: shared_secret.into(),
            use_sandbox,
        }
    }

    pub async fn check(
        &self,
        receipt_data: &str,
        expected_product_id: &str,
    ) -> Result<PurchaseClaims, Error> {
        let request = VerifyReceiptRequest {
            receipt_data,
            password: &self.shared_secret,
        };

        let response = if self.use_sandbox {
            self.send(&self.sandbox_url, &request).await?
        } else {
            let production = self.send(&self.production_url, &request).await?;
            if production.status == SANDBOX_RECEIPT_STATUS {
                tracing::debug!("sandbox receipt sent to production, retrying against sandbox");
                self.send(&self.sandbox_url, &request).await?
            } else {
                production
            }
        };

        decide(response, expected_product_id)
    }

    async fn send(
        &self,
        url: &str,
        request: &VerifyReceiptRequest<'_>,
    ) -> Result<AppleReceiptResponse, Error> {
        Ok(self
            .client
            .post(url)
            .json(request)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?)
    }
}

fn decide(response: AppleReceiptResponse, expected_product_id: &str) -> Result<PurchaseClaims, Error> {
    if response.status != 0 {
        return Err(Error::ReceiptStatusNonZero(response.status));
    }
    response
        .receipt
        .into_iter()
        .flat_map(|receipt| receipt.in_app)
        .find(|purchase| purchase.product_id == expected_product_id)
        .map(|purchase| PurchaseClaims {
            store: Store::AppStore,
            product_id: purchase.product_id,
            transaction_id: purchase.transaction_id,
        })
        .ok_or_else(|| Error::ProductMismatch {
            expected: expected_product_id.to_string(),
        })
}
