use crate::{Error, IdentityClaims, Provider, ReceiptVerifier, Settings, SocialLogin, Store};
use async_trait::async_trait;
use axum::{
    extract::State,
    http::{HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    routing::{get, post},
    Json, Router,
};
use serde::Deserialize;
use serde_json::{json, Value};
use std::sync::Arc;

/// Enrollment source recorded for courses bought in the app.
pub const IAP_ENROLLMENT_SOURCE: &str = "mobile_app_iap";

pub type HostError = Box<dyn std::error::Error + Send + Sync>;

/// The host LMS.
#[async_trait]
pub trait Lms: Send + Sync {
    /// The signed-in user making the request, if any.
    fn current_user_id(&self, headers: &HeaderMap) -> Option<u64>;

    async fn enroll_student(&self, user_id: u64, course_id: &str, source: &str) -> Result<(), HostError>;

    /// Finds or registers the user behind a verified identity and returns the
    /// session payload handed back to the app.
    async fn sign_in(&self, identity: &IdentityClaims) -> Result<Value, HostError>;
}

#[derive(Clone)]
pub struct AppState {
    social: Arc<SocialLogin>,
    receipts: Arc<ReceiptVerifier>,
    lms: Arc<dyn Lms>,
    social_enabled: bool,
    iap_course_ids: Arc<[String]>,
}

impl AppState {
    pub fn new(
        settings: &Settings,
        social: Arc<SocialLogin>,
        receipts: Arc<ReceiptVerifier>,
        lms: Arc<dyn Lms>,
    ) -> Self {
        Self {
            social,
            receipts,
            lms,
            social_enabled: settings.social_login_enabled,
            iap_course_ids: settings.iap_course_ids.clone().into(),
        }
    }
}

pub fn router(state: AppState) -> Router {
    Router::new()
        .route("/mobile-app/enable-social", get(enable_social))
        .route("/mobile-app/product-iap", get(product_iap))
        .route("/mobile-app/verify-apple", post(verify_apple))
        .route("/mobile-app/verify-google", post(verify_google))
        .route("/mobile-app/verify-facebook", post(verify_facebook))
        .route("/mobile-app/verify-receipt", post(verify_receipt))
        .with_state(state)
}

#[derive(Debug)]
pub struct ApiError {
    status: StatusCode,
    message: String,
}

impl ApiError {
    fn new(status: StatusCode, message: impl Into<String>) -> Self {
        Self {
            status,
            message: message.into(),
        }
    }

    /// Configuration faults are the server's problem; anything else means the
    /// caller's token or receipt was not accepted.
    fn verification(err: Error, denied: StatusCode) -> Self {
        if err.is_configuration() {
            Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
        } else {
            Self::new(denied, err.to_string())
        }
    }

    fn host(err: HostError) -> Self {
        tracing::error!(?err, "host lms request failed");
        Self::new(StatusCode::INTERNAL_SERVER_ERROR, err.to_string())
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let body = json!({
            "status": "error",
            "message": self.message,
        });
        (self.status, Json(body)).into_response()
    }
}

async fn enable_social(State(state): State<AppState>) -> Json<Value> {
    Json(json!({
        "enabled": state.social_enabled,
        "providers": state.social.enabled_providers(),
    }))
}

async fn product_iap(State(state): State<AppState>) -> Json<Value> {
    Json(json!(&state.iap_course_ids[..]))
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct AppleSignIn {
    identity_token: String,
    #[serde(default)]
    full_name: Option<String>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GoogleSignIn {
    id_token: String,
}

#[derive(Debug, Deserialize)]
struct FacebookSignIn {
    token: String,
}

async fn verify_apple(
    State(state): State<AppState>,
    Json(request): Json<AppleSignIn>,
) -> Result<Json<Value>, ApiError> {
    // Apple only shares the user's name with the app, on first sign-in
    let full_name = request.full_name.filter(|name| !name.trim().is_empty());
    sign_in(&state, Provider::Apple, &request.identity_token, full_name).await
}

async fn verify_google(
    State(state): State<AppState>,
    Json(request): Json<GoogleSignIn>,
) -> Result<Json<Value>, ApiError> {
    sign_in(&state, Provider::Google, &request.id_token, None).await
}

async fn verify_facebook(
    State(state): State<AppState>,
    Json(request): Json<FacebookSignIn>,
) -> Result<Json<Value>, ApiError> {
    sign_in(&state, Provider::Facebook, &request.token, None).await
}

async fn sign_in(
    state: &AppState,
    provider: Provider,
    token: &str,
    full_name: Option<String>,
) -> Result<Json<Value>, ApiError> {
    if !state.social_enabled || !state.social.is_enabled(provider) {
        tracing::debug!(%provider, "sign-in with disabled provider");
        return Err(ApiError::new(
            StatusCode::NOT_FOUND,
            format!("{provider} sign-in is not enabled"),
        ));
    }

    let mut identity = state
        .social
        .verify(provider, token)
        .await
        .map_err(|err| ApiError::verification(err, StatusCode::UNAUTHORIZED))?;
    if full_name.is_some() {
        identity.name = full_name;
    }

    state
        .lms
        .sign_in(&identity)
        .await
        .map(Json)
        .map_err(ApiError::host)
}

#[derive(Debug, Deserialize)]
struct ReceiptRequest {
    #[serde(rename = "receipt-data")]
    receipt_data: String,
    #[serde(rename = "is-ios")]
    is_ios: bool,
    #[serde(rename = "course-id")]
    course_id: String,
}

async fn verify_receipt(
    State(state): State<AppState>,
    headers: HeaderMap,
    Json(request): Json<ReceiptRequest>,
) -> Result<Json<Value>, ApiError> {
    let Some(user_id) = state.lms.current_user_id(&headers) else {
        return Err(ApiError::new(StatusCode::UNAUTHORIZED, "user not logged in"));
    };

    let store = if request.is_ios {
        Store::AppStore
    } else {
        Store::GooglePlay
    };
    state
        .receipts
        .verify_purchase(store, &request.receipt_data, &request.course_id, Some(user_id))
        .await
        .map_err(|err| ApiError::verification(err, StatusCode::FORBIDDEN))?;

    state
        .lms
        .enroll_student(user_id, &request.course_id, IAP_ENROLLMENT_SOURCE)
        .await
        .map_err(ApiError::host)?;
    tracing::info!(user_id, course_id = %request.course_id, %store, "enrolled after in-app purchase");

    Ok(Json(json!({
        "status": "success",
        "message": "Enrollment successful",
        "enrolled": true,
    })))
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::{
        audit::MemoryAuditSink, identity::IdentityVerifier, receipt::AppleReceiptVerifier,
    };
    use axum::{body::Body, http::Request};
    use std::sync::Mutex;
    use tower::ServiceExt;
    use wiremock::{
        matchers::{method, path},
        Mock, MockServer, ResponseTemplate,
    };

    #[derive(Default)]
    struct TestLms {
        enrollments: Mutex<Vec<(u64, String, String)>>,
        fail_enrollment: bool,
    }

    #[async_trait]
    impl Lms for TestLms {
        fn current_user_id(&self, headers: &HeaderMap) -> Option<u64> {
            headers
                .get("x-user-id")
                .and_then(|value| value.to_str().ok())
                .and_then(|value| value.parse().ok())
        }

        async fn enroll_student(&self, user_id: u64, course_id: &str, source: &str) -> Result<(), HostError> {
            if self.fail_enrollment {
                return Err("course is closed".into());
            }
            self.enrollments
                .lock()
                .expect("lock")
                .push((user_id, course_id.to_string(), source.to_string()));
            Ok(())
        }

        async fn sign_in(&self, identity: &IdentityClaims) -> Result<Value, HostError> {
            Ok(json!({"token": "session-token", "user_email": identity.email, "name": identity.name}))
        }
    }

    struct Accepting(Provider);

    #[async_trait]
    impl IdentityVerifier for Accepting {
        fn provider(&self) -> Provider {
            self.0
        }

        async fn verify(&self, token: &str) -> Result<IdentityClaims, Error> {
            if token != "good-token" {
                return Err(Error::SignatureInvalid);
            }
            Ok(IdentityClaims {
                provider: self.0,
                subject: Some("sub-1".to_string()),
                email: "learner@example.com".to_string(),
                name: None,
                picture: None,
            })
        }
    }

    fn social() -> SocialLogin {
        SocialLogin::new(Arc::new(MemoryAuditSink::default()))
            .with_verifier(Arc::new(Accepting(Provider::Google)), true)
            .with_verifier(Arc::new(Accepting(Provider::Apple)), true)
            .with_verifier(Arc::new(Accepting(Provider::Facebook)), false)
    }

    fn app(receipts: ReceiptVerifier, lms: Arc<TestLms>) -> Router {
        let settings = Settings {
            social_login_enabled: true,
            iap_course_ids: vec!["course_42".to_string(), "course_43".to_string()],
            ..Settings::default()
        };
        router(AppState::new(&settings, Arc::new(social()), Arc::new(receipts), lms))
    }

    fn no_receipts() -> ReceiptVerifier {
        ReceiptVerifier::new(None, None, Arc::new(MemoryAuditSink::default()))
    }

    async fn apple_receipts(server: &MockServer) -> ReceiptVerifier {
        Mock::given(method("POST"))
            .and(path("/verifyReceipt"))
            .respond_with(ResponseTemplate::new(200).set_body_json(json!({
                "status": 0,
                "receipt": {"in_app": [{"product_id": "course_42", "transaction_id": "1"}]},
            })))
            .mount(server)
            .await;
        let apple = AppleReceiptVerifier::new(
            reqwest::Client::new(),
            format!("{}/verifyReceipt", server.uri()),
            format!("{}/sandbox", server.uri()),
            "shared-secret",
            false,
        );
        ReceiptVerifier::new(Some(apple), None, Arc::new(MemoryAuditSink::default()))
    }

    async fn call(app: Router, request: Request<Body>) -> (StatusCode, Value) {
        let response = app.oneshot(request).await.expect("infallible");
        let status = response.status();
        let body = axum::body::to_bytes(response.into_body(), usize::MAX)
            .await
            .expect("body");
        (status, serde_json::from_slice(&body).expect("json body"))
    }

    fn post_json(uri: &str, body: Value, user_id: Option<u64>) -> Request<Body> {
        let mut builder = Request::builder()
            .method("POST")
            .uri(uri)
            .header("content-type", "application/json");
        if let Some(user_id) = user_id {
            builder = builder.header("x-user-id", user_id.to_string());
        }
        builder.body(Body::from(body.to_string())).expect("request")
    }

    fn get_request(uri: &str) -> Request<Body> {
        Request::builder().uri(uri).body(Body::empty()).expect("request")
    }

    #[tokio::test]
    async fn advertises_providers_and_products() {
        let (status, body) = call(
            app(no_receipts(), Arc::default()),
            get_request("/mobile-app/enable-social"),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body, json!({"enabled": true, "providers": ["google", "apple"]}));

        let (_, body) = call(
            app(no_receipts(), Arc::default()),
            get_request("/mobile-app/product-iap"),
        )
        .await;
        assert_eq!(body, json!(["course_42", "course_43"]));
    }

    #[tokio::test]
    async fn identity_routes_map_outcomes() {
        let (status, body) = call(
            app(no_receipts(), Arc::default()),
            post_json("/mobile-app/verify-google", json!({"idToken": "good-token"}), None),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["user_email"], "learner@example.com");

        let (status, body) = call(
            app(no_receipts(), Arc::default()),
            post_json("/mobile-app/verify-google", json!({"idToken": "forged"}), None),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["status"], "error");

        let (status, _) = call(
            app(no_receipts(), Arc::default()),
            post_json("/mobile-app/verify-facebook", json!({"token": "good-token"}), None),
        )
        .await;
        assert_eq!(status, StatusCode::NOT_FOUND);
    }

    #[tokio::test]
    async fn apple_sign_in_keeps_full_name() {
        let (status, body) = call(
            app(no_receipts(), Arc::default()),
            post_json(
                "/mobile-app/verify-apple",
                json!({"identityToken": "good-token", "fullName": "Ada Learner"}),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["name"], "Ada Learner");
    }

    #[tokio::test]
    async fn receipt_requires_a_user() {
        let (status, body) = call(
            app(no_receipts(), Arc::default()),
            post_json(
                "/mobile-app/verify-receipt",
                json!({"receipt-data": "MIIT...", "is-ios": true, "course-id": "course_42"}),
                None,
            ),
        )
        .await;
        assert_eq!(status, StatusCode::UNAUTHORIZED);
        assert_eq!(body["message"], "user not logged in");
    }

    #[tokio::test]
    async fn verified_receipt_enrolls_user() {
        let server = MockServer::start().await;
        let lms = Arc::new(TestLms::default());
        let (status, body) = call(
            app(apple_receipts(&server).await, lms.clone()),
            post_json(
                "/mobile-app/verify-receipt",
                json!({"receipt-data": "MIIT...", "is-ios": true, "course-id": "course_42"}),
                Some(7),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["enrolled"], true);
        assert_eq!(
            *lms.enrollments.lock().expect("lock"),
            [(7, "course_42".to_string(), "mobile_app_iap".to_string())]
        );
    }

    #[tokio::test]
    async fn receipt_outcomes_map_to_status() {
        let server = MockServer::start().await;
        let lms = Arc::new(TestLms::default());
        let (status, _) = call(
            app(apple_receipts(&server).await, lms.clone()),
            post_json(
                "/mobile-app/verify-receipt",
                json!({"receipt-data": "MIIT...", "is-ios": true, "course-id": "course_99"}),
                Some(7),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::FORBIDDEN);
        assert!(lms.enrollments.lock().expect("lock").is_empty());

        // no google service account configured
        let (status, _) = call(
            app(apple_receipts(&server).await, lms),
            post_json(
                "/mobile-app/verify-receipt",
                json!({"receipt-data": "{}", "is-ios": false, "course-id": "course_42"}),
                Some(7),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);

        let failing = Arc::new(TestLms {
            fail_enrollment: true,
            ..TestLms::default()
        });
        let (status, body) = call(
            app(apple_receipts(&server).await, failing),
            post_json(
                "/mobile-app/verify-receipt",
                json!({"receipt-data": "MIIT...", "is-ios": true, "course-id": "course_42"}),
                Some(7),
            ),
        )
        .await;
        assert_eq!(status, StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(body["message"], "course is closed");
    }
}
