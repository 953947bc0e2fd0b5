pub mod audit;
pub mod base64url;
pub mod fcm;
pub mod identity;
mod jwk;
pub mod jwt;
pub mod oauth;
pub mod receipt;
pub mod rest;
mod settings;

pub use audit::{AuditSink, MemoryAuditSink, TracingAuditSink, VerificationRecord};
pub use fcm::{Device, Notification, Platform, PushSender};
pub use identity::{IdentityClaims, IdentityVerifier, Provider, SocialLogin};
pub use jwk::{AppleKeyResolver, CachedKeyResolver, Jwk, JwkCache, KeyResolver};
pub use oauth::{AccessTokenSource, CachedTokenSource, ServiceAccountTokenSource, TokenExchangeClient};
pub use receipt::{PurchaseClaims, ReceiptVerifier, Store};
pub use rest::{router, AppState, Lms};
pub use settings::{ServiceAccountKey, Settings};

pub const KTY: &str = "RSA";
pub const ALG: &str = "RS256";
pub const TOKEN_SIG_TYPE: &str = "JWT";

/// Decoded JWT payload. Claim semantics are left to the caller.
pub type Claims = serde_json::Map<String, serde_json::Value>;

#[derive(Debug, thiserror::Error)]
pub enum Error {
    #[error("malformed token: {0}")]
    MalformedToken(String),
    #[error("unsupported algorithm {0}")]
    UnsupportedAlgorithm(String),
    #[error("token signature does not verify")]
    SignatureInvalid,
    #[error("token kid does not match known key {0}")]
    KeyNotFound(String),
    #[error("unsupported key type {0}")]
    UnsupportedKeyType(String),
    #[error("invalid key material: {0}")]
    InvalidKey(String),
    #[error("failed to sign token: {0}")]
    SigningFailed(String),
    #[error("base64url decode error {0}")]
    Decode(#[from] base64::DecodeError),
    #[error("upstream request failed {0}")]
    Transport(#[from] reqwest::Error),
    #[error("token exchange failed: {0}")]
    TokenExchange(String),
    #[error("unexpected token issuer {0}")]
    InvalidIssuer(String),
    #[error("token expired at {0}")]
    ExpiredToken(i64),
    #[error("identity carries no email")]
    MissingEmail,
    #[error("token audience does not match configured client id")]
    InvalidAudience,
    #[error("token rejected by provider: {0}")]
    Rejected(String),
    #[error("receipt returned status {0}")]
    ReceiptStatusNonZero(i64),
    #[error("no purchase of {expected} in receipt")]
    ProductMismatch { expected: String },
    #[error("purchase state {0} is not purchased")]
    PurchaseNotCompleted(i64),
    #[error("malformed receipt: {0}")]
    MalformedReceipt(String),
    #[error("push message rejected: {0}")]
    PushRejected(String),
    #[error("not configured: {0}")]
    Configuration(String),
    #[error("error reading key from file {0}")]
    KeyReadFile(#[from] std::io::Error),
}

impl Error {
    /// Stable code used as the `reason` label on metrics and audit records.
    pub fn reason(&self) -> &'static str {
        match self {
            Self::MalformedToken(_) => "malformed-token",
            Self::UnsupportedAlgorithm(_) => "unsupported-algorithm",
            Self::SignatureInvalid => "signature-invalid",
            Self::KeyNotFound(_) => "key-not-found",
            Self::UnsupportedKeyType(_) => "unsupported-key-type",
            Self::InvalidKey(_) => "invalid-key",
            Self::SigningFailed(_) => "signing-failed",
            Self::Decode(_) => "decode-error",
            Self::Transport(_) => "transport-error",
            Self::TokenExchange(_) => "token-exchange",
            Self::InvalidIssuer(_) => "invalid-issuer",
            Self::ExpiredToken(_) => "expired-token",
            Self::MissingEmail => "missing-email",
            Self::InvalidAudience => "invalid-audience",
            Self::Rejected(_) => "rejected",
            Self::ReceiptStatusNonZero(_) => "receipt-status",
            Self::ProductMismatch { .. } => "product-mismatch",
            Self::PurchaseNotCompleted(_) => "purchase-state",
            Self::MalformedReceipt(_) => "malformed-receipt",
            Self::PushRejected(_) => "push-rejected",
            Self::Configuration(_) => "configuration",
            Self::KeyReadFile(_) => "key-read-file",
        }
    }

    /// Configuration faults are reported separately from routine verification
    /// failures.
    pub fn is_configuration(&self) -> bool {
        matches!(self, Self::Configuration(_) | Self::KeyReadFile(_))
    }
}

pub(crate) const APPLE_PRODUCTION_RECEIPT_URI: &str = "https://buy.itunes.apple.com/verifyReceipt";
pub(crate) const APPLE_SANDBOX_RECEIPT_URI: &str = "https://sandbox.itunes.apple.com/verifyReceipt";
pub(crate) const APPLE_KEYS_URI: &str = "https://appleid.apple.com/auth/keys";
pub(crate) const GOOGLE_TOKEN_URI: &str = "https://oauth2.googleapis.com/token";
pub(crate) const GOOGLE_TOKENINFO_URI: &str = "https://oauth2.googleapis.com/tokeninfo";
pub(crate) const GOOGLE_PLAY_API_URI: &str =
    "https://androidpublisher.googleapis.com/androidpublisher/v3";
pub(crate) const FACEBOOK_GRAPH_URI: &str = "https://graph.facebook.com";
pub(crate) const FCM_URI: &str = "https://fcm.googleapis.com";
