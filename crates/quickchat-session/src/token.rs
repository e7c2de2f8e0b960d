//! Access token retrieval.
//!
//! The token endpoint is queried as `GET <url>?identity=<id>`. It answers
//! with either a JSON object carrying a `token` field (plus optional
//! metadata such as the granted identity) or the bare token as plain text.

use async_trait::async_trait;
use reqwest::{Client, Url, header::CONTENT_TYPE};
use serde::Deserialize;
use tracing::{debug, warn};

use crate::{AccessToken, Identity, TokenError};

/// Source of access tokens for an identity.
#[async_trait]
pub trait TokenSource: Send + Sync {
    /// Fetch a fresh token for `identity`.
    async fn fetch_token(&self, identity: &Identity) -> Result<AccessToken, TokenError>;
}

/// JSON body returned by the token endpoint.
#[derive(Debug, Deserialize)]
struct TokenResponse {
    token: String,
    #[serde(default)]
    identity: Option<String>,
}

/// Token endpoint reached over HTTP(S).
#[derive(Debug, Clone)]
pub struct HttpTokenSource {
    http: Client,
    url: Url,
}

impl HttpTokenSource {
    /// Token source for the endpoint at `url`.
    pub fn new(url: Url) -> Self {
        Self::with_client(Client::new(), url)
    }

    /// Token source sharing an existing HTTP client.
    pub fn with_client(http: Client, url: Url) -> Self {
        Self { http, url }
    }

    /// Endpoint URL.
    pub fn url(&self) -> &Url {
        &self.url
    }
}

#[async_trait]
impl TokenSource for HttpTokenSource {
    async fn fetch_token(&self, identity: &Identity) -> Result<AccessToken, TokenError> {
        let response = self
            .http
            .get(self.url.clone())
            .query(&[("identity", identity.as_str())])
            .send()
            .await
            .map_err(|e| TokenError::Request(e.to_string()))?;

        let status = response.status();
        if !status.is_success() {
            return Err(TokenError::Status { status: status.as_u16() });
        }

        let is_json = response
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|value| value.to_str().ok())
            .is_some_and(|value| value.contains("json"));
        let body = response.text().await.map_err(|e| TokenError::Request(e.to_string()))?;

        let token = parse_token_body(&body, is_json)?;
        debug!(%identity, "token endpoint issued access token");
        Ok(token)
    }
}

/// Extract the token from an endpoint response body.
fn parse_token_body(body: &str, is_json: bool) -> Result<AccessToken, TokenError> {
    let body = body.trim();

    if is_json || body.starts_with('{') {
        let response: TokenResponse =
            serde_json::from_str(body).map_err(|e| TokenError::Malformed(e.to_string()))?;
        if response.token.is_empty() {
            return Err(TokenError::Malformed("empty token".to_string()));
        }
        if let Some(granted) = response.identity {
            debug!(%granted, "token endpoint granted identity");
        }
        return Ok(AccessToken::new(response.token));
    }

    if body.is_empty() || body.contains(char::is_whitespace) {
        warn!(len = body.len(), "token endpoint returned unusable text body");
        return Err(TokenError::Malformed("expected a single token".to_string()));
    }
    Ok(AccessToken::new(body))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn json_body_with_metadata() {
        let token = parse_token_body(r#"{"identity":"alice","token":"tok123"}"#, true).unwrap();
        assert_eq!(token.expose(), "tok123");
    }

    #[test]
    fn json_body_without_content_type() {
        let token = parse_token_body("  {\"token\":\"tok123\"}\n", false).unwrap();
        assert_eq!(token.expose(), "tok123");
    }

    #[test]
    fn plain_text_body() {
        let token = parse_token_body("tok123\n", false).unwrap();
        assert_eq!(token.expose(), "tok123");
    }

    #[test]
    fn malformed_bodies_are_rejected() {
        assert!(matches!(parse_token_body("", false), Err(TokenError::Malformed(_))));
        assert!(matches!(parse_token_body("not a token", false), Err(TokenError::Malformed(_))));
        assert!(matches!(parse_token_body(r#"{"token":""}"#, true), Err(TokenError::Malformed(_))));
        assert!(matches!(parse_token_body(r#"{"jwt":"x"}"#, true), Err(TokenError::Malformed(_))));
    }
}
