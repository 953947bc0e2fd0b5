use super::{PurchaseClaims, Store};
use crate::{oauth::AccessTokenSource, Error};
use serde::Deserialize;
use std::sync::Arc;

/// `purchaseState` of a completed purchase. Pending (2) and cancelled (1)
/// purchases are rejected alike.
const PURCHASED: i64 = 0;

/// Receipt payload the app receives from Play Billing.
#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PlayReceipt {
    package_name: Option<String>,
    product_id: Option<String>,
    purchase_token: Option<String>,
}

/// purchases.products resource, trimmed to the fields used here.
#[derive(Clone, Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GooglePurchaseResponse {
    pub purchase_state: Option<i64>,
    pub order_id: Option<String>,
    pub product_id: Option<String>,
}

pub struct GoogleReceiptVerifier {
    client: reqwest::Client,
    api_url: String,
    tokens: Arc<dyn AccessTokenSource>,
}

fn required(value: Option<String>, name: &str) -> Result<String, Error> {
    value
        .filter(|value| !value.is_empty())
        .ok_or_else(|| Error::MalformedReceipt(format!("missing {name}")))
}

/// Receipt values each become one percent-encoded path segment. Dot segments
/// are refused.
fn path_segment<'a>(value: &'a str, name: &str) -> Result<&'a str, Error> {
    match value {
        "." | ".." => Err(Error::MalformedReceipt(format!("invalid {name}"))),
        value => Ok(value),
    }
}

impl GoogleReceiptVerifier {
    pub fn new(
        client: reqwest::Client,
        api_url: impl Into<String>,
        tokens: Arc<dyn AccessTokenSource>,
    ) -> Self {
        Self {
            client,
            api_url: api_url.into(),
            tokens,
        }
    }

    fn purchase_url(
        &self,
        package_name: &str,
        product_id: &str,
        purchase_token: &str,
    ) -> Result<reqwest::Url, Error> {
        let segments = [
            "applications",
            path_segment(package_name, "packageName")?,
            "purchases",
            "products",
            path_segment(product_id, "productId")?,
            "tokens",
            path_segment(purchase_token, "purchaseToken")?,
        ];
        let invalid_url = || Error::Configuration(format!("google play api url {}", self.api_url));
        let mut url = reqwest::Url::parse(&self.api_url).map_err(|_| invalid_url())?;
        url.path_segments_mut()
            .map_err(|_| invalid_url())?
            .pop_if_empty()
            .extend(segments);
        Ok(url)
    }

    pub async fn check(
        &self,
        receipt_json: &str,
        expected_product_id: &str,
    ) -> Result<PurchaseClaims, Error> {
        let receipt: PlayReceipt = serde_json::from_str(receipt_json)
            .map_err(|err| Error::MalformedReceipt(err.to_string()))?;
        let package_name = required(receipt.package_name, "packageName")?;
        let product_id = required(receipt.product_id, "productId")?;
        let purchase_token = required(receipt.purchase_token, "purchaseToken")?;

        let url = self.purchase_url(&package_name, &product_id, &purchase_token)?;
        let access_token = self.tokens.access_token().await?;
        let purchase: GooglePurchaseResponse = self
            .client
            .get(url)
            .bearer_auth(access_token)
            .send()
            .await?
            .error_for_status()?
            .json()
            .await?;

        match purchase.purchase_state {
            Some(PURCHASED) => (),
            Some(state) => return Err(Error::PurchaseNotCompleted(state)),
            None => return Err(Error::MalformedReceipt("missing purchaseState".to_string())),
        }
        let purchased_product = purchase.product_id.as_deref().unwrap_or(&product_id);
        if product_id != expected_product_id || purchased_product != expected_product_id {
            return Err(Error::ProductMismatch {
                expected: expected_product_id.to_string(),
            });
        }

        Ok(PurchaseClaims {
            store: Store::GooglePlay,
            product_id,
            transaction_id: purchase.order_id,
        })
    }
}
