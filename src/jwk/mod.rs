use crate::{Error, KTY};
use async_trait::async_trait;
use rsa::{
    pkcs8::{EncodePublicKey, LineEnding},
    BigUint, RsaPublicKey,
};
use serde::Deserialize;

mod base64_serde;
mod cache;
mod jwk_set;

pub use cache::{CachedKeyResolver, JwkCache};

/// A JSON Web Key as published in a provider key set. `n` and `e` hold the
/// decoded big-endian modulus and exponent for RSA keys.
#[derive(Clone, Debug, Deserialize, PartialEq)]
pub struct Jwk {
    pub kty: String,
    #[serde(default)]
    pub kid: Option<String>,
    #[serde(default)]
    pub alg: Option<String>,
    #[serde(default, deserialize_with = "base64_serde::deserialize_optional")]
    pub n: Option<Vec<u8>>,
    #[serde(default, deserialize_with = "base64_serde::deserialize_optional")]
    pub e: Option<Vec<u8>>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct JwkSet {
    pub keys: Vec<Jwk>,
}

impl Jwk {
    pub fn rsa(kid: impl Into<String>, n: Vec<u8>, e: Vec<u8>) -> Self {
        Self {
            kty: KTY.to_string(),
            kid: Some(kid.into()),
            alg: None,
            n: Some(n),
            e: Some(e),
        }
    }

    fn rsa_public_key(&self) -> Result<RsaPublicKey, Error> {
        if self.kty != KTY {
            return Err(Error::UnsupportedKeyType(self.kty.clone()));
        }
        match (&self.n, &self.e) {
            (Some(n), Some(e)) if !n.is_empty() && !e.is_empty() => {
                RsaPublicKey::new(BigUint::from_bytes_be(n), BigUint::from_bytes_be(e))
                    .map_err(|err| Error::InvalidKey(err.to_string()))
            }
            _ => Err(Error::InvalidKey("rsa jwk without modulus or exponent".to_string())),
        }
    }

    /// DER `SubjectPublicKeyInfo` for an RSA key.
    pub fn to_public_key_der(&self) -> Result<Vec<u8>, Error> {
        let der = self
            .rsa_public_key()?
            .to_public_key_der()
            .map_err(|err| Error::InvalidKey(err.to_string()))?;
        Ok(der.as_bytes().to_vec())
    }

    pub fn to_pem(&self) -> Result<String, Error> {
        self.rsa_public_key()?
            .to_public_key_pem(LineEnding::LF)
            .map_err(|err| Error::InvalidKey(err.to_string()))
    }
}

/// Looks up a provider signing key by `kid`, returned as a PEM public key.
#[async_trait]
pub trait KeyResolver: Send + Sync {
    async fn resolve(&self, kid: &str) -> Result<String, Error>;
}

/// Fetches the key set on every lookup.
#[derive(Clone)]
pub struct AppleKeyResolver {
    client: reqwest::Client,
    url: String,
}

impl AppleKeyResolver {
    pub fn new(client: reqwest::Client, url: impl Into<String>) -> Self {
        Self {
            client,
            url: url.into(),
        }
    }
}

#[async_trait]
impl KeyResolver for AppleKeyResolver {
    async fn resolve(&self, kid: &str) -> Result<String, Error> {
        let (keys, _) = jwk_set::fetch_key_set(&self.client, &self.url).await?;
        keys.get(kid)
            .ok_or_else(|| Error::KeyNotFound(kid.to_string()))?
            .to_pem()
    }
}

#[cfg(test)]
mod test {
    use super::*;
    use crate::testdata;
    use rsa::{
        pkcs1v15::{Signature, SigningKey, VerifyingKey},
        pkcs8::{DecodePrivateKey, DecodePublicKey},
        signature::{SignatureEncoding, Signer, Verifier},
        RsaPrivateKey, RsaPublicKey,
    };
    use sha2::Sha256;
    use wiremock::{matchers::method, Mock, MockServer, ResponseTemplate};

    fn fixture_key(kid: &str) -> Jwk {
        serde_json::from_str::<JwkSet>(testdata::JWKS)
            .expect("fixture key set")
            .keys
            .into_iter()
            .find(|key| key.kid.as_deref() == Some(kid))
            .expect("fixture kid")
    }

    #[test]
    fn pem_matches_reference_encoding() {
        let pem = fixture_key("test-kid").to_pem().expect("rsa key");
        assert_eq!(pem, testdata::PUBLIC_KEY);
        let pem = fixture_key("other-kid").to_pem().expect("rsa key");
        assert_eq!(pem, testdata::OTHER_PUBLIC_KEY);
    }

    #[test]
    fn converted_key_verifies_matching_signatures_only() {
        let public_key = RsaPublicKey::from_public_key_pem(
            &fixture_key("test-kid").to_pem().expect("rsa key"),
        )
        .expect("parses as spki");
        let verifier = VerifyingKey::<Sha256>::new(public_key);

        let message = b"arbitrary data";
        let sign = |pem: &str| {
            let key = RsaPrivateKey::from_pkcs8_pem(pem).expect("fixture key");
            SigningKey::<Sha256>::new(key).sign(message).to_vec()
        };

        let good = Signature::try_from(sign(testdata::PRIVATE_KEY).as_slice()).expect("sig");
        assert!(verifier.verify(message, &good).is_ok());

        let foreign = Signature::try_from(sign(testdata::OTHER_PRIVATE_KEY).as_slice()).expect("sig");
        assert!(verifier.verify(message, &foreign).is_err());
    }

    #[test]
    fn rejects_non_rsa_keys() {
        let key: Jwk = serde_json::from_value(serde_json::json!({
            "kty": "EC",
            "kid": "ec",
            "crv": "P-256",
            "x": "f83OJ3D2xF1Bg8vub9tLe1gHMzV76e8Tus9uPHvRVEU",
            "y": "x_FEzRu9m36HLN_tue659LNpXW6pCyStikYjKIWI5a0",
        }))
        .expect("deserializes");
        assert!(matches!(key.to_pem(), Err(Error::UnsupportedKeyType(kty)) if kty == "EC"));
    }

    #[test]
    fn rejects_rsa_key_without_modulus() {
        let key = Jwk {
            n: None,
            ..Jwk::rsa("kid", vec![1], vec![1, 0, 1])
        };
        assert!(matches!(key.to_pem(), Err(Error::InvalidKey(_))));
    }

    #[test]
    fn rejects_invalid_exponent() {
        let key = Jwk::rsa("kid", vec![0xc5; 256], vec![1]);
        assert!(matches!(key.to_pem(), Err(Error::InvalidKey(_))));
    }

    #[test]
    fn der_is_the_pem_body() {
        let key = fixture_key("test-kid");
        let der = key.to_public_key_der().expect("rsa key");
        let parsed = RsaPublicKey::from_public_key_der(&der).expect("parses as spki");
        assert_eq!(
            parsed,
            RsaPublicKey::from_public_key_pem(testdata::PUBLIC_KEY).expect("fixture")
        );
    }

    #[tokio::test]
    async fn resolves_key_by_kid() {
        let server = MockServer::start().await;
        Mock::given(method("GET"))
            .respond_with(ResponseTemplate::new(200).set_body_raw(testdata::JWKS, "application/json"))
            .expect(2)
            .mount(&server)
            .await;

        let resolver = AppleKeyResolver::new(reqwest::Client::new(), server.uri());
        assert_eq!(
            resolver.resolve("test-kid").await.expect("key"),
            testdata::PUBLIC_KEY
        );
        assert!(matches!(
            resolver.resolve("missing").await,
            Err(Error::KeyNotFound(kid)) if kid == "missing"
        ));
    }
}
