//! Streaming relay between a conversation and the generative model.

use anyhow::{Result, anyhow, bail};
use futures::stream::BoxStream;
use futures_util::StreamExt;

use crate::core::AppConfig;
use crate::gemini::{
    Candidate, Content, FinishReason, GenerateContentRequest, GroundingChunk, HarmBlockThreshold,
    HarmCategory, Part, Role, SafetySetting, SystemInstruction, Tool, generate_content_stream,
};

use super::models::{Source, Trailer, Turn};

#[derive(Debug, Default, PartialEq)]
enum TrailerPhase {
    /// Fragments are still being consumed from the model.
    #[default]
    Streaming,
    /// The trailer has been serialized and handed to the output.
    Flushed,
    /// The output stream is finished.
    Closed,
}

/// Tracks citation sources across one streamed model reply.
///
/// While streaming, every terminal-looking fragment (natural stop or
/// length limit) that carries grounding chunks replaces the held
/// source list, so the last capture wins. The trailer is flushed
/// exactly once, after the caller has seen the upstream stream end;
/// a finish reason alone is not the end, trailing fragments can still
/// arrive after it.
#[derive(Debug, Default)]
pub struct TrailerState {
    phase: TrailerPhase,
    sources: Vec<Source>,
}

impl TrailerState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Inspect one fragment's candidate. Returns whether a capture
    /// replaced the held source list.
    pub fn observe(&mut self, candidate: &Candidate) -> Result<bool> {
        if self.phase != TrailerPhase::Streaming {
            bail!("Fragment observed after the trailer was flushed");
        }
        if !matches!(
            candidate.finish_reason,
            Some(FinishReason::Stop | FinishReason::MaxTokens)
        ) {
            return Ok(false);
        }
        let Some(metadata) = &candidate.grounding_metadata else {
            return Ok(false);
        };
        let Some(chunks) = &metadata.grounding_chunks else {
            return Ok(false);
        };

        // A present chunk list always replaces, even when filtering
        // leaves it empty
        self.sources = extract_sources(chunks);
        Ok(true)
    }

    /// Serialize the trailer frame. Valid exactly once, after the
    /// upstream stream is exhausted.
    pub fn flush(&mut self) -> Result<String> {
        if self.phase != TrailerPhase::Streaming {
            bail!("Trailer already flushed");
        }
        self.phase = TrailerPhase::Flushed;
        let trailer = Trailer {
            sources: std::mem::take(&mut self.sources),
        };
        Ok(serde_json::to_string(&trailer)?)
    }

    /// Mark the output stream finished.
    pub fn close(&mut self) {
        self.phase = TrailerPhase::Closed;
    }

    pub fn sources(&self) -> &[Source] {
        &self.sources
    }
}

/// Keep grounding chunks that point somewhere: a missing or empty URI
/// drops the entry, a missing title becomes the empty string.
fn extract_sources(chunks: &[GroundingChunk]) -> Vec<Source> {
    chunks
        .iter()
        .filter_map(|chunk| {
            let web = chunk.web.as_ref()?;
            let uri = web.uri.clone().unwrap_or_default();
            if uri.is_empty() {
                return None;
            }
            Some(Source {
                uri,
                title: web.title.clone().unwrap_or_default(),
            })
        })
        .collect()
}

/// Relay a conversation to the model and stream the reply: each
/// non-empty text fragment in upstream order, then one JSON trailer
/// frame carrying the citation sources.
///
/// The upstream call is made before the stream is returned, so
/// connection and credential failures surface here rather than
/// mid-body. Dropping the returned stream drops the upstream
/// connection with it.
pub async fn relay(
    history: Vec<Turn>,
    message: String,
    config: &AppConfig,
) -> Result<BoxStream<'static, Result<String>>> {
    let api_key = config
        .gemini_api_key
        .clone()
        .ok_or_else(|| anyhow!("GEMINI_API_KEY is not configured"))?;

    let mut contents: Vec<Content> = history
        .iter()
        .map(|turn| Content {
            role: turn.sender.upstream_role(),
            parts: vec![Part {
                text: turn.text.clone(),
            }],
        })
        .collect();
    contents.push(Content {
        role: Role::User,
        parts: vec![Part { text: message }],
    });

    let request = GenerateContentRequest {
        contents,
        system_instruction: Some(SystemInstruction::new(&config.system_instruction)),
        tools: vec![Tool::google_search()],
        safety_settings: relaxed_safety_settings(),
    };

    let mut chunks = generate_content_stream(
        &request,
        &config.gemini_api_hostname,
        &api_key,
        &config.gemini_model,
    )
    .await?;

    Ok(Box::pin(async_stream::try_stream! {
        let mut trailer = TrailerState::new();

        while let Some(chunk) = chunks.next().await {
            let chunk = chunk?;
            if let Some(text) = chunk.text() {
                yield text;
            }
            if let Some(candidate) = chunk.candidates.first() {
                trailer.observe(candidate)?;
            }
        }

        // Only emitted once the upstream stream is exhausted, not at
        // the first finish reason
        yield trailer.flush()?;
        trailer.close();
    }))
}

/// Block only high-severity harassment and hate speech; every other
/// category keeps the provider default.
fn relaxed_safety_settings() -> Vec<SafetySetting> {
    vec![
        SafetySetting {
            category: HarmCategory::Harassment,
            threshold: HarmBlockThreshold::BlockOnlyHigh,
        },
        SafetySetting {
            category: HarmCategory::HateSpeech,
            threshold: HarmBlockThreshold::BlockOnlyHigh,
        },
    ]
}

#[cfg(test)]
mod tests {
    use super::*;

    fn candidate(json: &str) -> Candidate {
        serde_json::from_str(json).unwrap()
    }

    #[test]
    fn test_observe_captures_on_stop() {
        let mut trailer = TrailerState::new();
        let captured = trailer
            .observe(&candidate(
                r#"{
                    "finishReason": "STOP",
                    "groundingMetadata": {
                        "groundingChunks": [
                            {"web": {"uri": "https://example.com", "title": "Madrid Pride"}}
                        ]
                    }
                }"#,
            ))
            .unwrap();

        assert!(captured);
        assert_eq!(
            trailer.sources(),
            &[Source {
                uri: "https://example.com".to_string(),
                title: "Madrid Pride".to_string(),
            }]
        );
    }

    #[test]
    fn test_observe_captures_on_max_tokens() {
        let mut trailer = TrailerState::new();
        let captured = trailer
            .observe(&candidate(
                r#"{
                    "finishReason": "MAX_TOKENS",
                    "groundingMetadata": {
                        "groundingChunks": [{"web": {"uri": "https://example.com"}}]
                    }
                }"#,
            ))
            .unwrap();

        assert!(captured);
        assert_eq!(trailer.sources()[0].title, "");
    }

    #[test]
    fn test_observe_ignores_non_terminal_fragments() {
        let mut trailer = TrailerState::new();

        let captured = trailer
            .observe(&candidate(
                r#"{
                    "groundingMetadata": {
                        "groundingChunks": [{"web": {"uri": "https://example.com"}}]
                    }
                }"#,
            ))
            .unwrap();
        assert!(!captured);
        assert!(trailer.sources().is_empty());

        // Safety stops do not capture either
        let captured = trailer
            .observe(&candidate(
                r#"{
                    "finishReason": "SAFETY",
                    "groundingMetadata": {
                        "groundingChunks": [{"web": {"uri": "https://example.com"}}]
                    }
                }"#,
            ))
            .unwrap();
        assert!(!captured);
    }

    #[test]
    fn test_last_capture_wins() {
        let mut trailer = TrailerState::new();
        trailer
            .observe(&candidate(
                r#"{
                    "finishReason": "STOP",
                    "groundingMetadata": {
                        "groundingChunks": [{"web": {"uri": "https://first.example"}}]
                    }
                }"#,
            ))
            .unwrap();
        trailer
            .observe(&candidate(
                r#"{
                    "finishReason": "STOP",
                    "groundingMetadata": {
                        "groundingChunks": [{"web": {"uri": "https://second.example"}}]
                    }
                }"#,
            ))
            .unwrap();

        assert_eq!(trailer.sources().len(), 1);
        assert_eq!(trailer.sources()[0].uri, "https://second.example");
    }

    #[test]
    fn test_terminal_fragment_without_grounding_keeps_sources() {
        let mut trailer = TrailerState::new();
        trailer
            .observe(&candidate(
                r#"{
                    "finishReason": "STOP",
                    "groundingMetadata": {
                        "groundingChunks": [{"web": {"uri": "https://example.com"}}]
                    }
                }"#,
            ))
            .unwrap();

        let captured = trailer
            .observe(&candidate(r#"{"finishReason": "STOP"}"#))
            .unwrap();
        assert!(!captured);
        assert_eq!(trailer.sources()[0].uri, "https://example.com");
    }

    #[test]
    fn test_present_empty_grounding_list_clears_sources() {
        let mut trailer = TrailerState::new();
        trailer
            .observe(&candidate(
                r#"{
                    "finishReason": "STOP",
                    "groundingMetadata": {
                        "groundingChunks": [{"web": {"uri": "https://example.com"}}]
                    }
                }"#,
            ))
            .unwrap();

        let captured = trailer
            .observe(&candidate(
                r#"{"finishReason": "STOP", "groundingMetadata": {"groundingChunks": []}}"#,
            ))
            .unwrap();
        assert!(captured);
        assert!(trailer.sources().is_empty());
    }

    #[test]
    fn test_entries_without_uri_are_dropped() {
        let chunks: Vec<GroundingChunk> = serde_json::from_str(
            r#"[
                {"web": {"uri": "", "title": "No uri"}},
                {"web": {"title": "Missing uri"}},
                {},
                {"web": {"uri": "https://example.com", "title": "Kept"}}
            ]"#,
        )
        .unwrap();

        let sources = extract_sources(&chunks);
        assert_eq!(
            sources,
            vec![Source {
                uri: "https://example.com".to_string(),
                title: "Kept".to_string(),
            }]
        );
    }

    #[test]
    fn test_flush_serializes_sources() {
        let mut trailer = TrailerState::new();
        trailer
            .observe(&candidate(
                r#"{
                    "finishReason": "STOP",
                    "groundingMetadata": {
                        "groundingChunks": [
                            {"web": {"uri": "https://example.com", "title": "Madrid Pride"}}
                        ]
                    }
                }"#,
            ))
            .unwrap();

        assert_eq!(
            trailer.flush().unwrap(),
            r#"{"sources":[{"uri":"https://example.com","title":"Madrid Pride"}]}"#
        );
    }

    #[test]
    fn test_flush_without_captures_is_empty_list() {
        let mut trailer = TrailerState::new();
        assert_eq!(trailer.flush().unwrap(), r#"{"sources":[]}"#);
    }

    #[test]
    fn test_flush_twice_fails() {
        let mut trailer = TrailerState::new();
        trailer.flush().unwrap();
        assert!(trailer.flush().is_err());
    }

    #[test]
    fn test_observe_after_flush_fails() {
        let mut trailer = TrailerState::new();
        trailer.flush().unwrap();
        assert!(trailer.observe(&candidate(r#"{"finishReason": "STOP"}"#)).is_err());
    }

    #[test]
    fn test_observe_after_close_fails() {
        let mut trailer = TrailerState::new();
        trailer.flush().unwrap();
        trailer.close();
        assert!(trailer.observe(&candidate("{}")).is_err());
    }

    #[test]
    fn test_safety_settings_wire_format() {
        let json = serde_json::to_value(relaxed_safety_settings()).unwrap();
        assert_eq!(
            json,
            serde_json::json!([
                {"category": "HARM_CATEGORY_HARASSMENT", "threshold": "BLOCK_ONLY_HIGH"},
                {"category": "HARM_CATEGORY_HATE_SPEECH", "threshold": "BLOCK_ONLY_HIGH"}
            ])
        );
    }

    #[tokio::test]
    async fn test_relay_requires_api_key() {
        let config = AppConfig {
            gemini_api_key: None,
            gemini_api_hostname: "http://127.0.0.1:1".to_string(),
            gemini_model: "gemini-2.5-flash".to_string(),
            system_instruction: "Be helpful.".to_string(),
        };

        let result = relay(vec![], "When is Madrid Pride?".to_string(), &config).await;
        assert!(result.is_err());
    }
}
