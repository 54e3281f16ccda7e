use std::time::Duration;

use anyhow::{anyhow, Context, Result};
use once_cell::sync::Lazy;
use reqwest::{Client, Url};
use serde_json::{Map, Value};

const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 60;
const DEFAULT_CONNECT_TIMEOUT_SECS: u64 = 10;
const REDACTED_PARAMS: [&str; 2] = ["key", "token"];

static HTTP_CLIENT: Lazy<Client> = Lazy::new(|| {
    Client::builder()
        .user_agent("crime-atlas/0.1")
        .timeout(Duration::from_secs(DEFAULT_HTTP_TIMEOUT_SECS))
        .connect_timeout(Duration::from_secs(DEFAULT_CONNECT_TIMEOUT_SECS))
        .build()
        .expect("failed to build HTTP client")
});

pub async fn fetch_json(url: &Url) -> Result<Value> {
    let body = fetch_text(url).await?;
    let shown = redact_url(url);
    serde_json::from_str(&body).with_context(|| format!("invalid JSON response: {shown}"))
}

pub async fn fetch_text(url: &Url) -> Result<String> {
    let shown = redact_url(url);
    let response = HTTP_CLIENT
        .get(url.clone())
        .send()
        .await
        .with_context(|| format!("failed GET request: {shown}"))?;
    let status = response.status();
    let body = response
        .text()
        .await
        .with_context(|| format!("failed reading response body: {shown}"))?;
    if !status.is_success() {
        let preview: String = body.chars().take(180).collect();
        return Err(anyhow!("GET {shown} returned {status}: {preview}"));
    }
    Ok(body)
}

/// Credentials never reach logs or error messages.
pub fn redact_url(url: &Url) -> String {
    let mut shown = url.clone();
    let pairs = url
        .query_pairs()
        .map(|(k, v)| {
            let value = if REDACTED_PARAMS.contains(&k.as_ref()) {
                "***".to_string()
            } else {
                v.into_owned()
            };
            (k.into_owned(), value)
        })
        .collect::<Vec<_>>();
    if pairs.is_empty() {
        return shown.to_string();
    }
    shown.query_pairs_mut().clear().extend_pairs(pairs);
    shown.to_string()
}

pub fn string_property(object: &Map<String, Value>, keys: &[&str]) -> Option<String> {
    for key in keys {
        match object_get_case_insensitive(object, key) {
            Some(Value::String(s)) if !s.trim().is_empty() => return Some(s.trim().to_string()),
            Some(Value::Number(n)) => return Some(n.to_string()),
            _ => {}
        }
    }
    None
}

pub fn number_property(object: &Map<String, Value>, keys: &[&str]) -> Option<f64> {
    keys.iter()
        .filter_map(|key| object_get_case_insensitive(object, key))
        .find_map(to_f64)
}

pub fn to_f64(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => {
            let sanitized = s.trim().replace(',', "");
            sanitized.parse::<f64>().ok()
        }
        _ => None,
    }
}

fn object_get_case_insensitive<'a>(object: &'a Map<String, Value>, key: &str) -> Option<&'a Value> {
    object.get(key).or_else(|| {
        object
            .iter()
            .find(|(k, _)| k.eq_ignore_ascii_case(key))
            .map(|(_, v)| v)
    })
}

#[cfg(test)]
mod tests {
    use reqwest::Url;
    use serde_json::json;

    use crate::census::http::{number_property, redact_url, string_property, to_f64};

    #[test]
    fn redacts_api_keys_from_urls() {
        let url = Url::parse_with_params(
            "https://api.census.gov/data/2018/acs/acs5",
            &[("get", "NAME"), ("key", "secret123")],
        )
        .unwrap();
        let shown = redact_url(&url);
        assert!(!shown.contains("secret123"));
        assert!(shown.contains("get=NAME"));
    }

    #[test]
    fn reads_properties_case_insensitively() {
        let payload = json!({ "geoid": 24510010100u64, "Population": "2,345", "NAME": " Tract 101 " });
        let object = payload.as_object().unwrap();
        assert_eq!(
            string_property(object, &["GEOID"]).as_deref(),
            Some("24510010100")
        );
        assert_eq!(number_property(object, &["population"]), Some(2345.0));
        assert_eq!(string_property(object, &["NAME"]).as_deref(), Some("Tract 101"));
        assert_eq!(to_f64(&json!(null)), None);
    }
}
