mod core;

pub use self::core::{
    Candidate, CandidateContent, CandidatePart, Content, FinishReason, GenerateContentChunk,
    GenerateContentRequest, GoogleSearch, GroundingChunk, GroundingMetadata, HarmBlockThreshold,
    HarmCategory, Part, Role, SafetySetting, SystemInstruction, Tool, WebSource,
    generate_content_stream,
};
