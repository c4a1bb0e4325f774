//! Ollama HTTP client configuration shared by the embedding and generation backends.

use crate::error::{DocentError, Result};
use std::time::Duration;
use url::Url;

/// Timeout for establishing a connection to the Ollama server.
const CONNECT_TIMEOUT_SECS: u64 = 10;

/// Thin handle on an Ollama server: an HTTP client plus the parsed base URL.
#[derive(Debug, Clone)]
pub struct OllamaClient {
    http: reqwest::Client,
    base: Url,
}

impl OllamaClient {
    /// Create a client for the server at `base_url`.
    ///
    /// Only the connect phase is bounded here; long generations are bounded by the caller.
    pub fn new(base_url: &str) -> Result<Self> {
        let mut base = Url::parse(base_url).map_err(|e| {
            DocentError::InvalidConfiguration(format!("Invalid Ollama URL '{}': {}", base_url, e))
        })?;
        if !base.path().ends_with('/') {
            let path = format!("{}/", base.path());
            base.set_path(&path);
        }

        let http = reqwest::Client::builder()
            .connect_timeout(Duration::from_secs(CONNECT_TIMEOUT_SECS))
            .build()
            .map_err(|e| DocentError::InvalidConfiguration(format!("HTTP client: {}", e)))?;

        Ok(Self { http, base })
    }

    /// Absolute URL of an API path such as `api/embed`.
    pub fn endpoint(&self, path: &str) -> Result<Url> {
        self.base.join(path).map_err(|e| {
            DocentError::InvalidConfiguration(format!("Invalid Ollama endpoint '{}': {}", path, e))
        })
    }

    pub fn http(&self) -> &reqwest::Client {
        &self.http
    }

    pub fn base_url(&self) -> &Url {
        &self.base
    }
}

/// Read an error body for a failed response, without failing on unreadable bodies.
pub async fn describe_failure(response: reqwest::Response) -> String {
    let status = response.status();
    let body = response.text().await.unwrap_or_default();
    let message = serde_json::from_str::<serde_json::Value>(&body)
        .ok()
        .and_then(|v| v.get("error").and_then(|e| e.as_str()).map(str::to_string))
        .unwrap_or(body);

    if message.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_endpoint_joins_relative_paths() {
        let client = OllamaClient::new("http://localhost:11434").unwrap();
        assert_eq!(
            client.endpoint("api/embed").unwrap().as_str(),
            "http://localhost:11434/api/embed"
        );

        let client = OllamaClient::new("http://gpu-box:8080/ollama").unwrap();
        assert_eq!(
            client.endpoint("api/generate").unwrap().as_str(),
            "http://gpu-box:8080/ollama/api/generate"
        );
    }

    #[test]
    fn test_rejects_invalid_url() {
        assert!(matches!(
            OllamaClient::new("localhost without scheme"),
            Err(DocentError::InvalidConfiguration(_))
        ));
    }
}
