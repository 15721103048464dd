//! A deterministic test double for `UpstreamProvider` (grounded in the
//! teacher's `provider::lorem`): streams fixed words at a fixed interval, so
//! Producer tests can assert exact chunk counts, ids, and timing without a
//! real model backend.

use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::Duration;

use rocket::async_trait;
use tokio::time::{interval, Interval};
use tokio_stream::Stream;

use crate::errors::UpstreamFault;
use crate::provider::{UpstreamChunk, UpstreamChunkResult, UpstreamProvider, UpstreamRequest, UpstreamStream, UpstreamUsage};

const LOREM_WORDS: &[&str] = &[
    "Lorem ipsum ",
    "dolor sit ",
    "amet, consectetur ",
    "adipiscing elit, ",
    "sed do ",
    "eiusmod tempor ",
    "incididunt ut ",
    "labore et ",
    "dolore magna ",
    "aliqua.",
];

#[derive(Debug, Clone)]
pub struct LoremProvider {
    /// Delay between words.
    pub word_interval: Duration,
    /// If set, `chat_stream` itself fails before returning any stream —
    /// exercises the `UpstreamInvocationFailure` path.
    pub fail_on_invoke: bool,
    /// If set, the stream yields this many words then a mid-stream error
    /// instead of completing — exercises `UpstreamStreamFault`.
    pub fail_after_words: Option<usize>,
    /// If set, the stream never reaches end-of-stream — exercises the
    /// total-deadline timeout path.
    pub never_ends: bool,
}

impl Default for LoremProvider {
    fn default() -> Self {
        Self {
            word_interval: Duration::from_millis(50),
            fail_on_invoke: false,
            fail_after_words: None,
            never_ends: false,
        }
    }
}

impl LoremProvider {
    pub fn new() -> Self {
        Self::default()
    }
}

struct LoremStream {
    words: &'static [&'static str],
    index: usize,
    interval: Interval,
    fail_after_words: Option<usize>,
    never_ends: bool,
    usage_emitted: bool,
}

impl Stream for LoremStream {
    type Item = UpstreamChunkResult;

    fn poll_next(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Option<Self::Item>> {
        if let Some(limit) = self.fail_after_words {
            if self.index >= limit {
                return Poll::Ready(Some(Err(UpstreamFault::StreamFault("synthetic mid-stream fault".into()))));
            }
        }

        if !self.never_ends && self.index >= self.words.len() {
            if self.usage_emitted {
                return Poll::Ready(None);
            }
            self.usage_emitted = true;
            let output = self.words.len() as i32;
            return Poll::Ready(Some(Ok(UpstreamChunk::Usage(UpstreamUsage {
                input_tokens: Some(1),
                output_tokens: Some(output),
                reasoning_tokens: None,
                total_tokens: Some(1 + output),
            }))));
        }

        match Pin::new(&mut self.interval).poll_tick(cx) {
            Poll::Ready(_) => {
                let word = self.words[self.index % self.words.len()];
                self.index += 1;
                Poll::Ready(Some(Ok(UpstreamChunk::Text(word.to_owned()))))
            }
            Poll::Pending => Poll::Pending,
        }
    }
}

#[async_trait]
impl UpstreamProvider for LoremProvider {
    async fn chat_stream(&self, _request: &UpstreamRequest) -> Result<UpstreamStream, UpstreamFault> {
        if self.fail_on_invoke {
            return Err(UpstreamFault::InvocationFailure("synthetic invocation failure".into()));
        }

        let stream: UpstreamStream = Box::pin(LoremStream {
            words: LOREM_WORDS,
            index: 0,
            interval: interval(self.word_interval),
            fail_after_words: self.fail_after_words,
            never_ends: self.never_ends,
            usage_emitted: false,
        });

        Ok(stream)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio_stream::StreamExt;

    fn request() -> UpstreamRequest {
        UpstreamRequest {
            system_prompt: None,
            user_prompt: "hello".into(),
            model: "lorem".into(),
            history: Vec::new(),
        }
    }

    #[tokio::test]
    async fn streams_all_words_then_usage() {
        let provider = LoremProvider {
            word_interval: Duration::from_millis(1),
            ..Default::default()
        };
        let mut stream = provider.chat_stream(&request()).await.unwrap();

        let mut texts = Vec::new();
        let mut saw_usage = false;
        while let Some(chunk) = stream.next().await {
            match chunk.unwrap() {
                UpstreamChunk::Text(t) => texts.push(t),
                UpstreamChunk::Usage(u) => {
                    saw_usage = true;
                    assert_eq!(u.output_tokens, Some(LOREM_WORDS.len() as i32));
                }
            }
        }

        assert_eq!(texts.len(), LOREM_WORDS.len());
        assert!(saw_usage);
    }

    #[tokio::test]
    async fn fails_on_invoke_when_configured() {
        let provider = LoremProvider {
            fail_on_invoke: true,
            ..Default::default()
        };
        assert!(provider.chat_stream(&request()).await.is_err());
    }

    #[tokio::test]
    async fn mid_stream_fault_surfaces_as_error_chunk() {
        let provider = LoremProvider {
            word_interval: Duration::from_millis(1),
            fail_after_words: Some(2),
            ..Default::default()
        };
        let mut stream = provider.chat_stream(&request()).await.unwrap();

        let mut ok_count = 0;
        let mut saw_err = false;
        while let Some(chunk) = stream.next().await {
            match chunk {
                Ok(_) => ok_count += 1,
                Err(_) => {
                    saw_err = true;
                    break;
                }
            }
        }

        assert_eq!(ok_count, 2);
        assert!(saw_err);
    }
}
