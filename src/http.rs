//! JSON-over-HTTPS base client shared by every provider adapter.
//!
//! Thin and stateless: bearer (or header) auth, JSON bodies, typed
//! `Error::Api` on non-2xx. Retries belong to the caller (`waiter::retry`).

use std::time::Duration;

use serde::de::DeserializeOwned;
use serde_json::Value;

use crate::errors::{Error, Result};

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(60);
const CONNECT_TIMEOUT: Duration = Duration::from_secs(10);

/// How the token travels: `Authorization: Bearer ...` or a custom header
/// (Scaleway uses `X-Auth-Token`).
#[derive(Debug, Clone)]
pub enum Auth {
    Bearer(String),
    Header(&'static str, String),
    None,
}

pub struct ApiClient {
    base_url: String,
    auth: Auth,
    http: reqwest::Client,
}

impl ApiClient {
    pub fn new(base_url: &str, auth: Auth) -> Self {
        let http = reqwest::Client::builder()
            .timeout(DEFAULT_TIMEOUT)
            .connect_timeout(CONNECT_TIMEOUT)
            .build()
            .expect("failed to build HTTP client");
        Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            auth,
            http,
        }
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str, query: &[(&str, &str)]) -> Result<T> {
        let mut req = self.http.get(self.url(path));
        if !query.is_empty() {
            req = req.query(query);
        }
        self.send(req, "GET", path).await
    }

    pub async fn post<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T> {
        let req = self.http.post(self.url(path)).json(body);
        self.send(req, "POST", path).await
    }

    pub async fn put<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T> {
        let req = self.http.put(self.url(path)).json(body);
        self.send(req, "PUT", path).await
    }

    pub async fn patch<T: DeserializeOwned>(&self, path: &str, body: &Value) -> Result<T> {
        let req = self.http.patch(self.url(path)).json(body);
        self.send(req, "PATCH", path).await
    }

    pub async fn delete<T: DeserializeOwned>(&self, path: &str) -> Result<T> {
        let req = self.http.delete(self.url(path));
        self.send(req, "DELETE", path).await
    }

    /// Multipart PUT with an explicit boundary, for endpoints that reject
    /// JSON bodies.
    pub async fn put_multipart<T: DeserializeOwned>(
        &self,
        path: &str,
        parts: &[(&str, &str)],
        boundary: &str,
    ) -> Result<T> {
        let body = multipart_body(parts, boundary);
        self.put_raw(
            path,
            body,
            &format!("multipart/form-data; boundary={}", boundary),
        )
        .await
    }

    /// Raw-body PUT with an explicit content type, for payloads that must
    /// not be JSON-encoded (cloud-init user data, multipart forms).
    pub async fn put_raw<T: DeserializeOwned>(
        &self,
        path: &str,
        body: Vec<u8>,
        content_type: &str,
    ) -> Result<T> {
        let req = self
            .http
            .put(self.url(path))
            .header(reqwest::header::CONTENT_TYPE, content_type.to_string())
            .body(body);
        self.send(req, "PUT", path).await
    }

    fn url(&self, path: &str) -> String {
        format!("{}/{}", self.base_url, path.trim_start_matches('/'))
    }

    fn authorize(&self, req: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        match &self.auth {
            Auth::Bearer(token) => req.bearer_auth(token),
            Auth::Header(name, value) => req.header(*name, value.clone()),
            Auth::None => req,
        }
    }

    async fn send<T: DeserializeOwned>(
        &self,
        req: reqwest::RequestBuilder,
        method: &str,
        path: &str,
    ) -> Result<T> {
        let resp = self.authorize(req).send().await?;
        let status = resp.status();
        let body = resp.text().await?;

        if !status.is_success() {
            tracing::debug!("{} {} -> {}: {}", method, path, status.as_u16(), body);
            return Err(Error::api(
                status.as_u16(),
                body,
                format!("{} {} failed", method, path),
            ));
        }

        if body.trim().is_empty() {
            // DELETEs and some PUTs return 204 with no body; let callers
            // deserialize into Value::Null via Option<...> or Value.
            return serde_json::from_str("null")
                .map_err(|e| Error::Other(format!("empty response for {} {}: {}", method, path, e)));
        }

        serde_json::from_str(&body).map_err(|e| {
            Error::Other(format!(
                "invalid JSON from {} {}: {} (body: {})",
                method,
                path,
                e,
                truncate(&body, 200)
            ))
        })
    }
}

fn multipart_body(parts: &[(&str, &str)], boundary: &str) -> Vec<u8> {
    let mut body = String::new();
    for (name, content) in parts {
        body.push_str(&format!("--{}\r\n", boundary));
        body.push_str(&format!(
            "Content-Disposition: form-data; name=\"{}\"\r\n\r\n",
            name
        ));
        body.push_str(content);
        body.push_str("\r\n");
    }
    body.push_str(&format!("--{}--\r\n", boundary));
    body.into_bytes()
}

fn truncate(s: &str, max: usize) -> &str {
    match s.char_indices().nth(max) {
        Some((idx, _)) => &s[..idx],
        None => s,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_without_double_slash() {
        let client = ApiClient::new("https://api.example.com/v1/", Auth::None);
        assert_eq!(client.url("/servers"), "https://api.example.com/v1/servers");
        assert_eq!(client.url("servers"), "https://api.example.com/v1/servers");
    }

    #[test]
    fn test_multipart_body_layout() {
        let body = multipart_body(&[("metadata", "{}"), ("script", "export {}")], "xYzBoundary");
        let text = String::from_utf8(body).unwrap();
        assert!(text.starts_with("--xYzBoundary\r\n"));
        assert!(text.contains("Content-Disposition: form-data; name=\"script\""));
        assert!(text.ends_with("--xYzBoundary--\r\n"));
    }

    #[test]
    fn test_truncate_respects_char_boundaries() {
        assert_eq!(truncate("hello", 200), "hello");
        assert_eq!(truncate("hello", 2), "he");
        assert_eq!(truncate("héllo", 2), "hé");
    }
}
