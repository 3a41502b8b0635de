//! Wire types for the generate-content endpoint.
//!
//! Outbound requests serialize with camelCase keys; inbound response objects
//! are deserialized leniently since the streamed objects only carry the fields
//! relevant to the current chunk.

use serde::{Deserialize, Serialize};

#[derive(Serialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GenerateRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub safety_settings: Option<Vec<SafetySetting>>,
    pub generation_config: GenerationConfig,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct Content {
    #[serde(default)]
    pub role: String,
    #[serde(default)]
    pub parts: Vec<WirePart>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct WirePart {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub text: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub inline_data: Option<InlineData>,
}

impl WirePart {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            inline_data: None,
        }
    }

    pub fn inline(mime_type: impl Into<String>, data: impl Into<String>) -> Self {
        Self {
            text: None,
            inline_data: Some(InlineData {
                mime_type: mime_type.into(),
                data: data.into(),
            }),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct InlineData {
    pub mime_type: String,
    /// Base64-encoded payload.
    pub data: String,
}

#[derive(Serialize, Debug, Clone, PartialEq)]
pub struct SafetySetting {
    pub category: &'static str,
    pub threshold: &'static str,
}

/// Harm categories relaxed when the caller disables provider safety filtering.
pub const HARM_CATEGORIES: [&str; 4] = [
    "HARM_CATEGORY_HARASSMENT",
    "HARM_CATEGORY_HATE_SPEECH",
    "HARM_CATEGORY_SEXUALLY_EXPLICIT",
    "HARM_CATEGORY_DANGEROUS_CONTENT",
];

pub fn permissive_safety_settings() -> Vec<SafetySetting> {
    HARM_CATEGORIES
        .iter()
        .map(|&category| SafetySetting {
            category,
            threshold: "BLOCK_NONE",
        })
        .collect()
}

#[derive(Serialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct GenerationConfig {
    pub temperature: f32,
    /// Requested media type of the reply; voice turns ask for audio.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub response_mime_type: Option<String>,
}

impl GenerationConfig {
    pub fn text(temperature: f32) -> Self {
        Self {
            temperature,
            response_mime_type: None,
        }
    }
}

/// One element of the streamed response array.
#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct GenerateResponse {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
    #[serde(default)]
    pub prompt_feedback: Option<PromptFeedback>,
    #[serde(default)]
    pub error: Option<ApiErrorBody>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    #[serde(default)]
    pub content: Option<Content>,
    #[serde(default)]
    pub finish_reason: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
#[serde(rename_all = "camelCase")]
pub struct PromptFeedback {
    #[serde(default)]
    pub block_reason: Option<String>,
    #[serde(default)]
    pub block_reason_message: Option<String>,
}

#[derive(Deserialize, Debug, Default)]
pub struct ApiErrorBody {
    #[serde(default)]
    pub code: Option<i64>,
    #[serde(default)]
    pub message: Option<String>,
    #[serde(default)]
    pub status: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_omits_safety_settings_when_absent() {
        let request = GenerateRequest {
            contents: vec![Content {
                role: "user".into(),
                parts: vec![WirePart::text("hello")],
            }],
            safety_settings: None,
            generation_config: GenerationConfig::text(0.5),
        };
        let value = serde_json::to_value(&request).expect("serialize");
        assert_eq!(
            value,
            serde_json::json!({
                "contents": [{"role": "user", "parts": [{"text": "hello"}]}],
                "generationConfig": {"temperature": 0.5}
            })
        );
    }

    #[test]
    fn permissive_settings_cover_every_category() {
        let settings = permissive_safety_settings();
        assert_eq!(settings.len(), HARM_CATEGORIES.len());
        assert!(settings.iter().all(|s| s.threshold == "BLOCK_NONE"));
    }

    #[test]
    fn response_tolerates_missing_fields() {
        let parsed: GenerateResponse =
            serde_json::from_str(r#"{"usageMetadata":{"promptTokenCount":3}}"#).expect("parse");
        assert!(parsed.candidates.is_empty());
        assert!(parsed.prompt_feedback.is_none());
        assert!(parsed.error.is_none());
    }

    #[test]
    fn inline_data_parts_use_camel_case() {
        let part = WirePart::inline("audio/wav", "AAAA");
        let value = serde_json::to_value(&part).expect("serialize");
        assert_eq!(
            value,
            serde_json::json!({"inlineData": {"mimeType": "audio/wav", "data": "AAAA"}})
        );
    }
}
