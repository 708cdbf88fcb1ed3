use std::env;

/// Model used when no override is configured.
pub const DEFAULT_MODEL: &str = "gemini-2.5-flash";

const DEFAULT_API_HOSTNAME: &str = "https://generativelanguage.googleapis.com";

/// Persona used when no system instruction is configured.
const DEFAULT_SYSTEM_INSTRUCTION: &str = "You are a friendly, knowledgeable travel concierge. \
You help travelers plan trips and find accurate dates for festivals, Pride events, and other \
celebrations around the world. Use your search tool to ground answers in current information, \
keep replies short and conversational, cite the sources you used, and remind travelers to \
confirm dates with the organizers before booking.";

#[derive(Clone, Debug)]
pub struct AppConfig {
    /// Credential for the generative language API. `None` when the
    /// environment does not provide one; requests fail individually
    /// rather than the process refusing to start.
    pub gemini_api_key: Option<String>,
    pub gemini_api_hostname: String,
    pub gemini_model: String,
    pub system_instruction: String,
}

impl AppConfig {
    pub fn from_env() -> Self {
        let gemini_api_key = env::var("GEMINI_API_KEY").ok().filter(|key| !key.is_empty());
        let gemini_api_hostname = env::var("CONCIERGE_GEMINI_API_URL")
            .unwrap_or_else(|_| DEFAULT_API_HOSTNAME.to_string());
        let gemini_model =
            env::var("CONCIERGE_GEMINI_MODEL").unwrap_or_else(|_| DEFAULT_MODEL.to_string());
        let system_instruction = env::var("CONCIERGE_SYSTEM_INSTRUCTION")
            .unwrap_or_else(|_| DEFAULT_SYSTEM_INSTRUCTION.to_string());

        Self {
            gemini_api_key,
            gemini_api_hostname,
            gemini_model,
            system_instruction,
        }
    }
}
