use super::{Jwk, JwkSet};
use crate::Error;
use reqwest::{header::CACHE_CONTROL, Response};
use std::{collections::HashMap, time::Duration};

pub(super) async fn fetch_key_set(
    client: &reqwest::Client,
    url: &str,
) -> Result<(HashMap<String, Jwk>, Option<Duration>), Error> {
    let response = client
        .get(url)
        .send()
        .await?
        .error_for_status()
        .inspect_err(|err| {
            tracing::warn!(?err, url, "failed to retrieve jwk set");
        })?;

    let max_age = parse_max_age(&response).map(Duration::from_secs);
    let key_set = response
        .json::<JwkSet>()
        .await?
        .keys
        .into_iter()
        .filter_map(|key| key.kid.clone().map(|kid| (kid, key)))
        .collect();
    Ok((key_set, max_age))
}

fn parse_max_age(resp: &Response) -> Option<u64> {
    resp.headers()
        .get(CACHE_CONTROL)
        .and_then(|cache_control| cache_control.to_str().ok())
        .and_then(max_age_directive)
}

fn max_age_directive(header: &str) -> Option<u64> {
    header
        .split(',')
        .filter_map(|item| item.trim().split_once('='))
        .filter(|(name, _)| name.trim().eq_ignore_ascii_case("max-age"))
        .filter_map(|(_, value)| value.trim().parse::<u64>().ok())
        .last()
}
