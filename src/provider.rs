//! The `UpstreamProvider` boundary: the only interface the Producer has onto
//! an LLM backend. The core never talks to a concrete model API directly —
//! it depends on this trait and, in tests and local runs, the deterministic
//! `LoremProvider` double.

pub mod lorem;

use std::pin::Pin;

use rocket::async_trait;
use tokio_stream::Stream;

use crate::errors::UpstreamFault;

/// A single chunk surfaced from an in-flight upstream completion.
#[derive(Debug, Clone)]
pub enum UpstreamChunk {
    Text(String),
    Usage(UpstreamUsage),
}

/// Token accounting the provider reports at the end of a completion, if any.
#[derive(Debug, Default, Clone, Copy)]
pub struct UpstreamUsage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub reasoning_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

pub type UpstreamChunkResult = Result<UpstreamChunk, UpstreamFault>;
pub type UpstreamStream = Pin<Box<dyn Stream<Item = UpstreamChunkResult> + Send>>;

/// One prior turn of the thread, flattened out of earlier `Chat` rows so a
/// provider backend can rebuild conversational context (§4.1 Inputs: "the
/// previous messages of the thread, if any").
#[derive(Debug, Clone)]
pub struct ThreadMessage {
    pub role: ThreadRole,
    pub content: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ThreadRole {
    User,
    Assistant,
}

/// A single provider-agnostic chat completion request.
#[derive(Debug, Clone)]
pub struct UpstreamRequest {
    pub system_prompt: Option<String>,
    pub user_prompt: String,
    pub model: String,
    /// Prior turns of the thread this chat belongs to, oldest first. Empty
    /// for the first chat in a thread.
    pub history: Vec<ThreadMessage>,
}

/// Unified API the Producer drives to obtain an upstream token stream.
///
/// `chat_stream` returning `Err` before any chunk is produced is the
/// `UpstreamInvocationFailure` case (§4.1 step 1): the Producer finalizes
/// the chat as `failed` without ever opening the channel to the Emitter.
#[async_trait]
pub trait UpstreamProvider: Send + Sync {
    async fn chat_stream(&self, request: &UpstreamRequest) -> Result<UpstreamStream, UpstreamFault>;
}
