//! Google Generative AI (Gemini) client implementing the rewrite oracle.

use async_trait::async_trait;
use reqwest::{Client, StatusCode};
use serde::{Deserialize, Serialize};
use std::time::Duration;
use tracing::info;

use crate::oracle::{OracleError, RewriteOracle};

pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

const API_BASE_URL: &str = "https://generativelanguage.googleapis.com/v1beta";

/// Rewrite-oracle calls can take minutes for large files.
const REQUEST_TIMEOUT: Duration = Duration::from_secs(600);

#[derive(Clone)]
pub struct GeminiClient {
    client: Client,
    api_key: String,
    model: String,
}

#[derive(Debug, Serialize)]
struct GenerateContentRequest {
    contents: Vec<Content>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Content {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<String>,
    parts: Vec<Part>,
}

#[derive(Debug, Serialize, Deserialize)]
struct Part {
    text: String,
}

#[derive(Debug, Deserialize)]
struct GenerateContentResponse {
    candidates: Option<Vec<Candidate>>,
}

#[derive(Debug, Deserialize)]
struct Candidate {
    content: Option<Content>,
}

impl GeminiClient {
    pub fn new(api_key: String) -> Self {
        Self::with_model(api_key, DEFAULT_MODEL)
    }

    pub fn with_model(api_key: String, model: &str) -> Self {
        let client = Client::builder()
            .user_agent(concat!("securebot/", env!("CARGO_PKG_VERSION")))
            .timeout(REQUEST_TIMEOUT)
            .build()
            .expect("Failed to create HTTP client");

        Self {
            client,
            api_key,
            model: model.to_string(),
        }
    }
}

#[async_trait]
impl RewriteOracle for GeminiClient {
    async fn rewrite(&self, prompt: &str) -> Result<String, OracleError> {
        let url = format!("{}/models/{}:generateContent", API_BASE_URL, self.model);

        let request_body = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: prompt.to_string(),
                }],
            }],
        };

        let response = self
            .client
            .post(&url)
            .header("x-goog-api-key", &self.api_key)
            .json(&request_body)
            .send()
            .await
            .map_err(|e| {
                OracleError::Unavailable(format!("Failed to send generateContent request: {}", e))
            })?;

        let status = response.status();
        if !status.is_success() {
            let error_text = response.text().await.unwrap_or_default();
            return Err(classify_api_error(status, &error_text));
        }

        let parsed: GenerateContentResponse = response.json().await.map_err(|e| {
            OracleError::Other(format!("Failed to parse generateContent response: {}", e))
        })?;

        let text = parsed
            .candidates
            .and_then(|mut candidates| {
                if candidates.is_empty() {
                    None
                } else {
                    candidates.remove(0).content
                }
            })
            .map(|content| {
                content
                    .parts
                    .into_iter()
                    .map(|part| part.text)
                    .collect::<String>()
            })
            .filter(|text| !text.is_empty())
            .ok_or_else(|| {
                OracleError::Other("Gemini returned no candidate content".to_string())
            })?;

        info!("Gemini returned {} bytes of rewritten content", text.len());
        Ok(text.trim().to_string())
    }
}

/// Map a non-2xx Gemini response onto the oracle failure taxonomy.
///
/// Quota errors sometimes arrive as 400/403 with a descriptive message, so
/// the body is inspected alongside the status code.
fn classify_api_error(status: StatusCode, body: &str) -> OracleError {
    let message = format!("Gemini API error: {} - {}", status, body);
    let lower = body.to_lowercase();

    if status == StatusCode::TOO_MANY_REQUESTS
        || lower.contains("quota")
        || lower.contains("rate limit")
    {
        OracleError::RateLimited(message)
    } else if status.is_server_error() {
        OracleError::Unavailable(message)
    } else {
        OracleError::Other(message)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_429_maps_to_rate_limited() {
        let err = classify_api_error(StatusCode::TOO_MANY_REQUESTS, "slow down");
        assert!(matches!(err, OracleError::RateLimited(_)));
    }

    #[test]
    fn test_quota_message_maps_to_rate_limited_regardless_of_status() {
        let err = classify_api_error(
            StatusCode::FORBIDDEN,
            "Quota exceeded for quota metric 'GenerateContent requests'",
        );
        assert!(matches!(err, OracleError::RateLimited(_)));
    }

    #[test]
    fn test_server_error_maps_to_unavailable() {
        let err = classify_api_error(StatusCode::SERVICE_UNAVAILABLE, "backend overloaded");
        assert!(matches!(err, OracleError::Unavailable(_)));
    }

    #[test]
    fn test_client_error_maps_to_other() {
        let err = classify_api_error(StatusCode::BAD_REQUEST, "invalid argument");
        assert!(matches!(err, OracleError::Other(_)));
    }

    #[test]
    fn test_request_body_wire_shape() {
        let body = GenerateContentRequest {
            contents: vec![Content {
                role: Some("user".to_string()),
                parts: vec![Part {
                    text: "fix this".to_string(),
                }],
            }],
        };
        let value = serde_json::to_value(&body).expect("serialize request");
        assert_eq!(value["contents"][0]["role"], "user");
        assert_eq!(value["contents"][0]["parts"][0]["text"], "fix this");
    }

    #[test]
    fn test_response_text_extraction_shape() {
        let raw = r#"{"candidates":[{"content":{"role":"model","parts":[{"text":"fixed"}]}}]}"#;
        let parsed: GenerateContentResponse = serde_json::from_str(raw).expect("parse response");
        let text: String = parsed
            .candidates
            .expect("candidates present")
            .remove(0)
            .content
            .expect("content present")
            .parts
            .into_iter()
            .map(|p| p.text)
            .collect();
        assert_eq!(text, "fixed");
    }
}
