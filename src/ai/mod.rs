//! Completion provider access
//!
//! Prompt rendering, the structured completion client with its retry policy,
//! and the transports it can drive (Gemini over HTTP, or a scripted replay).

pub mod completion;
pub mod gemini;
pub mod prompt;
pub mod scripted;
pub mod utils;

pub use completion::{
    CompletionOutcome, CompletionReport, CompletionRequest, CompletionTransport, InlineImage,
    ProviderReply, StructuredCompletionClient,
};
pub use gemini::GeminiTransport;
pub use prompt::PromptAssembler;
pub use scripted::{ScriptedReply, ScriptedTransport};
