//! Signed HTTP client: issues HMAC-SHA256-authenticated requests against
//! the control-plane REST API, follows cursor pagination, and normalizes
//! responses.

use base64::{engine::general_purpose::STANDARD, Engine};
use hmac::{Hmac, Mac};
use serde_json::Value;
use sha2::Sha256;
use std::time::Duration;
use tracing::{debug, instrument};

use crate::errors::ClientError;

type HmacSha256 = Hmac<Sha256>;

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HttpMethod {
    Get,
    Post,
    Delete,
}

impl HttpMethod {
    fn as_str(&self) -> &'static str {
        match self {
            HttpMethod::Get => "GET",
            HttpMethod::Post => "POST",
            HttpMethod::Delete => "DELETE",
        }
    }
}

/// Builds the canonical query string for a raw query component:
/// percent-encode name and value of each pair, sort ascending by encoded
/// name (stable with respect to value order), join with `&`.
///
/// Parsing is strict: a pair with no `=` is a fatal error.
pub fn canonicalize_query(raw_query: &str) -> Result<String, ClientError> {
    if raw_query.is_empty() {
        return Ok(String::new());
    }

    let mut pairs: Vec<(String, String)> = Vec::new();
    for pair in raw_query.split('&') {
        let mut parts = pair.splitn(2, '=');
        let name = parts.next().unwrap_or("");
        let value = match parts.next() {
            Some(v) => v,
            None => {
                return Err(ClientError::MalformedQuery(format!(
                    "pair '{}' has no '=' separator",
                    pair
                )))
            }
        };
        let decoded_name = urlencoding::decode(name)
            .map_err(|e| ClientError::MalformedQuery(e.to_string()))?
            .into_owned();
        let decoded_value = urlencoding::decode(value)
            .map_err(|e| ClientError::MalformedQuery(e.to_string()))?
            .into_owned();
        pairs.push((
            urlencoding::encode(&decoded_name).into_owned(),
            urlencoding::encode(&decoded_value).into_owned(),
        ));
    }

    pairs.sort_by(|a, b| a.0.cmp(&b.0));

    Ok(pairs
        .into_iter()
        .map(|(k, v)| format!("{}={}", k, v))
        .collect::<Vec<_>>()
        .join("&"))
}

/// Joins a set of `name -> value` query parameters into a raw (not yet
/// canonicalized) query string suitable for dispatch, via ordinary
/// form-urlencoding. Pair order is not significant for dispatch; the
/// client canonicalizes separately when signing.
pub fn build_raw_query(params: &std::collections::HashMap<String, Value>) -> String {
    let mut pairs: Vec<String> = Vec::new();
    for (k, v) in params {
        let value_str = match v {
            Value::String(s) => s.clone(),
            other => other.to_string(),
        };
        pairs.push(format!(
            "{}={}",
            urlencoding::encode(k),
            urlencoding::encode(&value_str)
        ));
    }
    pairs.join("&")
}

fn string_to_sign(
    method: HttpMethod,
    timestamp: &str,
    path: &str,
    canonical_query: &str,
    body: &[u8],
) -> Vec<u8> {
    let mut sts = Vec::new();
    sts.extend_from_slice(method.as_str().as_bytes());
    sts.push(b'\n');
    sts.extend_from_slice(timestamp.as_bytes());
    sts.push(b'\n');
    sts.extend_from_slice(path.as_bytes());
    sts.push(b'\n');
    sts.extend_from_slice(canonical_query.as_bytes());
    sts.push(b'\n');
    sts.extend_from_slice(body);
    sts
}

/// Computes the `X-Scalr-Signature` header value for a request.
pub fn sign(
    secret: &str,
    method: HttpMethod,
    timestamp: &str,
    path: &str,
    canonical_query: &str,
    body: &[u8],
) -> String {
    let sts = string_to_sign(method, timestamp, path, canonical_query, body);
    let mut mac =
        HmacSha256::new_from_slice(secret.as_bytes()).expect("HMAC accepts a key of any length");
    mac.update(&sts);
    let digest = mac.finalize().into_bytes();
    format!("V1-HMAC-SHA256 {}", STANDARD.encode(digest))
}

/// Issues authenticated requests to the control plane and normalizes
/// responses.
pub struct SignedHttpClient {
    base_url: String,
    key_id: String,
    key_secret: String,
    http: reqwest::Client,
}

impl SignedHttpClient {
    pub fn new(base_url: impl Into<String>, key_id: impl Into<String>, key_secret: impl Into<String>) -> Self {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .build()
            .expect("reqwest client builds with default TLS backend");
        Self {
            base_url: base_url.into(),
            key_id: key_id.into(),
            key_secret: key_secret.into(),
            http,
        }
    }

    fn full_url(&self, path: &str) -> String {
        if path.starts_with(&self.base_url) || path.starts_with("http") {
            path.to_string()
        } else {
            format!("{}{}", self.base_url, path)
        }
    }

    #[instrument(skip(self, body), fields(method = method.as_str(), path))]
    async fn dispatch(
        &self,
        method: HttpMethod,
        path: &str,
        body: Option<&Value>,
    ) -> Result<Value, ClientError> {
        let full_url = self.full_url(path);
        let url = reqwest::Url::parse(&full_url)
            .map_err(|e| ClientError::MalformedQuery(e.to_string()))?;

        let raw_query = url.query().unwrap_or("");
        let canonical_query = canonicalize_query(raw_query)?;
        let url_path = url.path().to_string();

        let body_bytes = match body {
            Some(b) => serde_json::to_vec(b).map_err(|e| ClientError::MalformedResponse(e.to_string()))?,
            None => Vec::new(),
        };

        let timestamp = chrono::Utc::now().to_rfc3339();
        let signature = sign(&self.key_secret, method, &timestamp, &url_path, &canonical_query, &body_bytes);

        debug!(signature = %signature, "signed request");

        let mut req = match method {
            HttpMethod::Get => self.http.get(url.clone()),
            HttpMethod::Post => self.http.post(url.clone()),
            HttpMethod::Delete => self.http.delete(url.clone()),
        };
        req = req
            .header("X-Scalr-Key-Id", &self.key_id)
            .header("X-Scalr-Signature", signature)
            .header("X-Scalr-Date", timestamp);

        if let Some(b) = body {
            req = req.json(b);
        }

        let response = req
            .send()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        let status = response.status();
        let text = response
            .text()
            .await
            .map_err(|e| ClientError::Network(e.to_string()))?;

        if !status.is_success() {
            return Err(ClientError::RequestFailed {
                method: method.as_str().to_string(),
                path: path.to_string(),
                status: status.as_u16(),
                body: text,
            });
        }

        serde_json::from_str(&text).map_err(|e| ClientError::MalformedResponse(e.to_string()))
    }

    /// Walks `pagination.next` cursors, concatenating `data` arrays until
    /// `next` is absent. Returns the full sequence.
    pub async fn list(&self, path: &str) -> Result<Vec<Value>, ClientError> {
        let mut results = Vec::new();
        let mut next_path = Some(path.to_string());

        while let Some(current) = next_path {
            let body = self.dispatch(HttpMethod::Get, &current, None).await?;
            let data = body
                .get("data")
                .and_then(Value::as_array)
                .ok_or_else(|| ClientError::MalformedResponse("missing 'data' array".to_string()))?;
            results.extend(data.iter().cloned());

            next_path = body
                .get("pagination")
                .and_then(|p| p.get("next"))
                .and_then(Value::as_str)
                .map(|s| s.to_string());
        }

        Ok(results)
    }

    /// Issues a POST and returns the `data` field of the response.
    pub async fn post(&self, path: &str, body: &Value) -> Result<Value, ClientError> {
        let response = self.dispatch(HttpMethod::Post, path, Some(body)).await?;
        response
            .get("data")
            .cloned()
            .ok_or_else(|| ClientError::MalformedResponse("missing 'data' field".to_string()))
    }

    /// As `post`, but GET.
    pub async fn fetch(&self, path: &str) -> Result<Value, ClientError> {
        let response = self.dispatch(HttpMethod::Get, path, None).await?;
        response
            .get("data")
            .cloned()
            .ok_or_else(|| ClientError::MalformedResponse("missing 'data' field".to_string()))
    }

    pub async fn delete(&self, path: &str) -> Result<(), ClientError> {
        self.dispatch(HttpMethod::Delete, path, None).await?;
        Ok(())
    }
}
