use std::future::Future;
use std::pin::Pin;
use std::time::Duration;

use reqwest::Url;
use reqwest::header::HeaderValue;
use serde::{Deserialize, Serialize};

use super::{BindError, Generation, GenerativeModel, ModelBinder, RequestError};
use crate::response::excerpt;

/// Finish reasons that mean the answer was withheld rather than produced.
const BLOCKED_FINISH_REASONS: &[&str] = &["SAFETY", "BLOCKLIST", "PROHIBITED_CONTENT", "SPII"];

/// Settings shared by every key bound through a [`GeminiBinder`].
#[derive(Debug, Clone)]
pub struct GeminiSettings {
    pub model: String,
    pub endpoint: String,
    pub system_instruction: String,
    pub timeout: Duration,
}

/// Binds keys to the Gemini `generateContent` REST endpoint with JSON output forced.
pub struct GeminiBinder {
    client: reqwest::Client,
    settings: GeminiSettings,
}

impl GeminiBinder {
    pub fn new(settings: GeminiSettings) -> Result<Self, BindError> {
        let client = reqwest::Client::builder()
            .timeout(settings.timeout)
            .build()
            .map_err(|e| BindError::Client(e.to_string()))?;
        Ok(Self { client, settings })
    }

    fn url(&self) -> Result<Url, BindError> {
        let raw = format!(
            "{}/models/{}:generateContent",
            self.settings.endpoint.trim_end_matches('/'),
            self.settings.model
        );
        Url::parse(&raw).map_err(|e| BindError::InvalidEndpoint {
            url: raw.clone(),
            message: e.to_string(),
        })
    }
}

impl ModelBinder for GeminiBinder {
    fn name(&self) -> &str {
        "Gemini"
    }

    fn bind(&self, api_key: &str) -> Result<Box<dyn GenerativeModel>, BindError> {
        let api_key = api_key.trim();
        if api_key.is_empty() {
            return Err(BindError::EmptyKey);
        }
        let mut key = HeaderValue::from_str(api_key).map_err(|_| BindError::InvalidKey)?;
        key.set_sensitive(true);

        Ok(Box::new(GeminiModel {
            client: self.client.clone(),
            url: self.url()?,
            key,
            system_instruction: self.settings.system_instruction.clone(),
        }))
    }
}

/// One Gemini model bound to one key.
pub struct GeminiModel {
    client: reqwest::Client,
    url: Url,
    key: HeaderValue,
    system_instruction: String,
}

impl GenerativeModel for GeminiModel {
    fn generate<'a>(
        &'a self,
        user_text: &'a str,
    ) -> Pin<Box<dyn Future<Output = Result<Generation, RequestError>> + Send + 'a>> {
        Box::pin(async move {
            let body = GenerateContentRequest::new(&self.system_instruction, user_text);

            let resp = self
                .client
                .post(self.url.clone())
                .header("x-goog-api-key", self.key.clone())
                .json(&body)
                .send()
                .await?;

            let status = resp.status();
            if status.as_u16() == 429 {
                return Err(RequestError::RateLimited);
            }
            if !status.is_success() {
                let text = resp.text().await.unwrap_or_default();
                return Err(RequestError::Status {
                    status: status.as_u16(),
                    body: excerpt(&text, 300).to_string(),
                });
            }

            let parsed: GenerateContentResponse = resp
                .json()
                .await
                .map_err(|e| RequestError::Malformed(e.to_string()))?;
            interpret_response(parsed)
        })
    }
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentRequest<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    system_instruction: Option<Content<'a>>,
    contents: Vec<Content<'a>>,
    generation_config: GenerationConfig,
}

impl<'a> GenerateContentRequest<'a> {
    fn new(system_instruction: &'a str, user_text: &'a str) -> Self {
        let system_instruction = (!system_instruction.trim().is_empty()).then(|| Content {
            role: None,
            parts: vec![Part {
                text: system_instruction,
            }],
        });
        Self {
            system_instruction,
            contents: vec![Content {
                role: Some("user"),
                parts: vec![Part { text: user_text }],
            }],
            generation_config: GenerationConfig {
                response_mime_type: "application/json",
            },
        }
    }
}

#[derive(Debug, Serialize)]
struct Content<'a> {
    #[serde(skip_serializing_if = "Option::is_none")]
    role: Option<&'a str>,
    parts: Vec<Part<'a>>,
}

#[derive(Debug, Serialize)]
struct Part<'a> {
    text: &'a str,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct GenerationConfig {
    response_mime_type: &'static str,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct GenerateContentResponse {
    #[serde(default)]
    candidates: Vec<Candidate>,
    prompt_feedback: Option<PromptFeedback>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PromptFeedback {
    block_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Candidate {
    content: Option<CandidateContent>,
    finish_reason: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct CandidateContent {
    #[serde(default)]
    parts: Vec<ResponsePart>,
}

#[derive(Debug, Default, Deserialize)]
struct ResponsePart {
    text: Option<String>,
}

fn interpret_response(resp: GenerateContentResponse) -> Result<Generation, RequestError> {
    if let Some(reason) = resp.prompt_feedback.and_then(|f| f.block_reason) {
        return Ok(Generation::Blocked { reason });
    }

    let candidate = resp.candidates.into_iter().next().ok_or(RequestError::Empty)?;
    let text: String = candidate
        .content
        .map(|c| c.parts.into_iter().filter_map(|p| p.text).collect())
        .unwrap_or_default();

    if text.trim().is_empty() {
        return match candidate.finish_reason {
            Some(reason) if BLOCKED_FINISH_REASONS.contains(&reason.as_str()) => {
                Ok(Generation::Blocked { reason })
            }
            _ => Err(RequestError::Empty),
        };
    }
    Ok(Generation::Text(text))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings() -> GeminiSettings {
        GeminiSettings {
            model: "gemini-2.5-flash".into(),
            endpoint: "https://generativelanguage.googleapis.com/v1beta/".into(),
            system_instruction: "Return JSON.".into(),
            timeout: Duration::from_secs(5),
        }
    }

    fn response(json: &str) -> GenerateContentResponse {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn url_joins_endpoint_and_model() {
        let binder = GeminiBinder::new(settings()).unwrap();
        assert_eq!(
            binder.url().unwrap().as_str(),
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-2.5-flash:generateContent"
        );
    }

    #[test]
    fn bind_rejects_blank_key() {
        let binder = GeminiBinder::new(settings()).unwrap();
        assert!(matches!(binder.bind("   "), Err(BindError::EmptyKey)));
    }

    #[test]
    fn bind_rejects_key_with_newline() {
        let binder = GeminiBinder::new(settings()).unwrap();
        assert!(matches!(binder.bind("abc\ndef"), Err(BindError::InvalidKey)));
    }

    #[test]
    fn bind_rejects_bad_endpoint() {
        let binder = GeminiBinder::new(GeminiSettings {
            endpoint: "not a url".into(),
            ..settings()
        })
        .unwrap();
        assert!(matches!(
            binder.bind("key"),
            Err(BindError::InvalidEndpoint { .. })
        ));
    }

    #[test]
    fn request_forces_json_and_carries_instruction() {
        let body = GenerateContentRequest::new("Be precise.", "Paper text:\nHello");
        let json = serde_json::to_value(&body).unwrap();
        assert_eq!(
            json["generationConfig"]["responseMimeType"],
            "application/json"
        );
        assert_eq!(json["systemInstruction"]["parts"][0]["text"], "Be precise.");
        assert_eq!(json["contents"][0]["role"], "user");
        assert_eq!(json["contents"][0]["parts"][0]["text"], "Paper text:\nHello");
    }

    #[test]
    fn empty_instruction_is_omitted() {
        let body = GenerateContentRequest::new("", "x");
        let json = serde_json::to_value(&body).unwrap();
        assert!(json.get("systemInstruction").is_none());
    }

    #[test]
    fn text_parts_are_concatenated() {
        let resp = response(
            r#"{"candidates":[{"content":{"parts":[{"text":"{\"title\":"},{"text":"\"X\"}"}]},"finishReason":"STOP"}]}"#,
        );
        assert_eq!(
            interpret_response(resp).unwrap(),
            Generation::Text(r#"{"title":"X"}"#.into())
        );
    }

    #[test]
    fn prompt_block_reason_is_blocked() {
        let resp = response(r#"{"promptFeedback":{"blockReason":"SAFETY"}}"#);
        assert_eq!(
            interpret_response(resp).unwrap(),
            Generation::Blocked {
                reason: "SAFETY".into()
            }
        );
    }

    #[test]
    fn safety_finish_without_text_is_blocked() {
        let resp = response(r#"{"candidates":[{"finishReason":"PROHIBITED_CONTENT"}]}"#);
        assert!(matches!(
            interpret_response(resp).unwrap(),
            Generation::Blocked { .. }
        ));
    }

    #[test]
    fn no_candidates_is_error() {
        let resp = response(r#"{"candidates":[]}"#);
        assert!(matches!(interpret_response(resp), Err(RequestError::Empty)));
    }
}
