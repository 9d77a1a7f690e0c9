use std::time::Duration;

use reqwest::{Client, StatusCode};
use serde_json::json;

use super::{AiService, RawMetadata, parse_ai_response};
use crate::error::{Error, Result, classify_model_error};

/// Google Gemini `generateContent` client.
///
/// The request pins a JSON response schema so the model returns
/// `{title, category, tags}` directly; the parser still tolerates fenced or
/// prose-wrapped output as a fallback.
pub struct GeminiService {
    api_key: String,
    model: String,
    timeout: Duration,
    client: Client,
}

impl GeminiService {
    pub fn new(api_key: String, model: String, timeout: Duration) -> Self {
        Self {
            api_key,
            model,
            timeout,
            client: Client::new(),
        }
    }
}

#[async_trait::async_trait]
impl AiService for GeminiService {
    fn name(&self) -> &str {
        "Gemini"
    }

    async fn analyze(
        &self,
        image_base64: &str,
        prompt: &str,
        mime_type: &str,
    ) -> Result<RawMetadata> {
        let url = format!(
            "https://generativelanguage.googleapis.com/v1beta/models/{}:generateContent?key={}",
            self.model, self.api_key
        );

        let body = json!({
            "contents": [
                {
                    "parts": [
                        {
                            "inline_data": {
                                "mime_type": mime_type,
                                "data": image_base64
                            }
                        },
                        { "text": prompt }
                    ]
                }
            ],
            "generationConfig": {
                "maxOutputTokens": 2048,
                "responseMimeType": "application/json",
                "responseSchema": {
                    "type": "OBJECT",
                    "properties": {
                        "title": { "type": "STRING" },
                        "category": { "type": "STRING" },
                        "tags": { "type": "ARRAY", "items": { "type": "STRING" } }
                    },
                    "required": ["title", "category", "tags"]
                }
            }
        });

        let resp = self
            .client
            .post(&url)
            .timeout(self.timeout)
            .json(&body)
            .send()
            .await
            .map_err(|e| {
                if e.is_timeout() {
                    Error::ModelRequest(format!(
                        "Gemini request timed out after {}s",
                        self.timeout.as_secs()
                    ))
                } else {
                    Error::ModelRequest(format!("Gemini request failed: {e}"))
                }
            })?;

        let status = resp.status();
        let text = resp
            .text()
            .await
            .map_err(|e| Error::ModelRequest(format!("Failed to read Gemini response: {e}")))?;

        if status == StatusCode::TOO_MANY_REQUESTS {
            return Err(Error::QuotaExceeded);
        }
        if !status.is_success() {
            return Err(classify_model_error(format!(
                "Gemini API error ({status}): {text}"
            )));
        }

        let json: serde_json::Value = serde_json::from_str(&text)
            .map_err(|e| Error::ModelRequest(format!("Failed to parse Gemini response JSON: {e}")))?;

        let content = json["candidates"][0]["content"]["parts"][0]["text"]
            .as_str()
            .ok_or_else(|| Error::ModelRequest("No content in Gemini response".to_string()))?;

        parse_ai_response(content)
    }
}
