//! Client for the Gemini generative language API, streaming flavor.

use anyhow::{Result, bail};
use futures::stream::BoxStream;
use futures_util::StreamExt;
use serde::{Deserialize, Serialize};

#[derive(Clone, Copy, Serialize, Deserialize, Debug, PartialEq)]
pub enum Role {
    #[serde(rename = "user")]
    User,
    #[serde(rename = "model")]
    Model,
}

#[derive(Clone, Serialize, Debug)]
pub struct Part {
    pub text: String,
}

#[derive(Clone, Serialize, Debug)]
pub struct Content {
    pub role: Role,
    pub parts: Vec<Part>,
}

/// System instruction block. Same shape as `Content` on the wire but
/// carries no role.
#[derive(Clone, Serialize, Debug)]
pub struct SystemInstruction {
    pub parts: Vec<Part>,
}

impl SystemInstruction {
    pub fn new(text: &str) -> Self {
        Self {
            parts: vec![Part {
                text: text.to_string(),
            }],
        }
    }
}

#[derive(Clone, Serialize, Debug)]
pub struct GoogleSearch {}

/// Tool declarations for the request. Only the provider-executed
/// search tool is supported; it runs inside the API, not here.
#[derive(Clone, Serialize, Debug)]
pub struct Tool {
    #[serde(rename = "googleSearch")]
    pub google_search: GoogleSearch,
}

impl Tool {
    pub fn google_search() -> Self {
        Self {
            google_search: GoogleSearch {},
        }
    }
}

#[derive(Clone, Copy, Serialize, Debug, PartialEq)]
pub enum HarmCategory {
    #[serde(rename = "HARM_CATEGORY_HARASSMENT")]
    Harassment,
    #[serde(rename = "HARM_CATEGORY_HATE_SPEECH")]
    HateSpeech,
}

#[derive(Clone, Copy, Serialize, Debug, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum HarmBlockThreshold {
    BlockOnlyHigh,
}

#[derive(Clone, Serialize, Debug)]
pub struct SafetySetting {
    pub category: HarmCategory,
    pub threshold: HarmBlockThreshold,
}

#[derive(Clone, Serialize, Debug)]
#[serde(rename_all = "camelCase")]
pub struct GenerateContentRequest {
    pub contents: Vec<Content>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub system_instruction: Option<SystemInstruction>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub tools: Vec<Tool>,
    #[serde(skip_serializing_if = "Vec::is_empty")]
    pub safety_settings: Vec<SafetySetting>,
}

// Object {
//     "candidates": Array [
//         Object {
//             "content": Object {
//                 "parts": Array [Object {"text": String("June 24th")}],
//                 "role": String("model")
//             },
//             "finishReason": String("STOP"),
//             "groundingMetadata": Object {
//                 "groundingChunks": Array [
//                     Object {"web": Object {"uri": String("..."), "title": String("...")}}
//                 ]
//             }
//         }
//     ]
// }
#[derive(Debug, Deserialize)]
pub struct GenerateContentChunk {
    #[serde(default)]
    pub candidates: Vec<Candidate>,
}

impl GenerateContentChunk {
    /// Concatenated text of the first candidate's parts, or `None`
    /// when the chunk carries no visible text.
    pub fn text(&self) -> Option<String> {
        let content = self.candidates.first()?.content.as_ref()?;
        let text: String = content
            .parts
            .iter()
            .filter_map(|part| part.text.as_deref())
            .collect();
        if text.is_empty() { None } else { Some(text) }
    }
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Candidate {
    pub content: Option<CandidateContent>,
    pub finish_reason: Option<FinishReason>,
    pub grounding_metadata: Option<GroundingMetadata>,
}

#[derive(Debug, Deserialize)]
pub struct CandidateContent {
    #[serde(default)]
    pub parts: Vec<CandidatePart>,
}

#[derive(Debug, Deserialize)]
pub struct CandidatePart {
    pub text: Option<String>,
}

#[derive(Clone, Copy, Debug, Deserialize, PartialEq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FinishReason {
    Stop,
    MaxTokens,
    Safety,
    Recitation,
    #[serde(other)]
    Other,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct GroundingMetadata {
    /// `None` and an empty list mean different things downstream:
    /// an absent list leaves previously captured sources alone while
    /// a present one replaces them.
    pub grounding_chunks: Option<Vec<GroundingChunk>>,
}

#[derive(Debug, Deserialize)]
pub struct GroundingChunk {
    pub web: Option<WebSource>,
}

#[derive(Debug, Deserialize)]
pub struct WebSource {
    pub uri: Option<String>,
    pub title: Option<String>,
}

/// Call the streaming generate-content endpoint and yield one parsed
/// chunk per SSE event as they arrive.
pub async fn generate_content_stream(
    request: &GenerateContentRequest,
    api_hostname: &str,
    api_key: &str,
    model: &str,
) -> Result<BoxStream<'static, Result<GenerateContentChunk>>> {
    let url = format!(
        "{}/v1beta/models/{}:streamGenerateContent?alt=sse",
        api_hostname.trim_end_matches("/"),
        model
    );
    let response = reqwest::Client::new()
        .post(url)
        .header("x-goog-api-key", api_key)
        .header("Content-Type", "application/json")
        .json(request)
        .send()
        .await?;

    let status = response.status();
    if !status.is_success() {
        let body = response.text().await.unwrap_or_default();
        bail!("Model request failed with status {}: {}", status, body);
    }

    let mut stream = response.bytes_stream();

    Ok(Box::pin(async_stream::try_stream! {
        let mut buffer: Vec<u8> = Vec::new();

        while let Some(chunk) = stream.next().await {
            let chunk = chunk?;

            // A network read can end mid-line and even mid-character,
            // so buffer raw bytes and decode only complete lines; a
            // line break never lands inside a multi-byte UTF-8
            // sequence.
            buffer.extend_from_slice(&chunk);

            // Process all complete lines from the buffer. Events are
            // split per line rather than per blank-line pair because
            // this API terminates lines with CRLF and sends a single
            // data line per event.
            while let Some(line_end) = buffer.iter().position(|byte| *byte == b'\n') {
                let line_bytes: Vec<u8> = buffer.drain(..=line_end).collect();
                let line = std::str::from_utf8(&line_bytes[..line_end])?.trim();

                if line.is_empty() {
                    continue;
                }

                // Extract the JSON payload (after "data:")
                let Some(data) = line.strip_prefix("data:") else {
                    continue;
                };
                let data = data.trim();
                if data.is_empty() {
                    continue;
                }

                let parsed = serde_json::from_str::<GenerateContentChunk>(data).inspect_err(|e| {
                    tracing::error!("Parsing stream chunk failed for {}\nError:{}", data, e)
                })?;
                yield parsed;
            }
        }
    }))
}
