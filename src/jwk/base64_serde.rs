use serde::{Deserialize, Deserializer};

/// Decodes an optional base64url member such as a JWK `n` or `e`.
pub fn deserialize_optional<'de, D>(deserializer: D) -> Result<Option<Vec<u8>>, D::Error>
where
    D: Deserializer<'de>,
{
    use serde::de::Error;
    Option::<String>::deserialize(deserializer).and_then(|string| {
        string
            .map(|value| crate::base64url::decode(value).map_err(|err| Error::custom(err.to_string())))
            .transpose()
    })
}
