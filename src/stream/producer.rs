//! The Producer (§4.1): drives one chat's upstream token stream to
//! completion, feeding a local channel and flushing durably along the way.
//!
//! Spawned via `tokio::spawn`, detached from the request-handling task, so
//! that dropping the Emitter's stream (client disconnect) can never cancel
//! persistence. This detachment is the whole of the "shielded finalization"
//! contract — Rust has no async `Drop` that can `.await`, so there is no
//! language-level finalizer to lean on; a function called from every exit
//! path stands in for it instead.

use std::sync::Arc;
use std::time::Duration;

use tokio::sync::mpsc;
use tokio_stream::StreamExt;
use uuid::Uuid;

use crate::buffer::TokenBuffer;
use crate::chat_record::ChatRecordStore;
use crate::config::ChatStreamConfig;
use crate::db::models::{ChatStatus, ChatUsage};
use crate::provider::{UpstreamChunk, UpstreamProvider, UpstreamRequest, UpstreamStream};
use crate::sentinel;
use crate::status::StatusStore;

/// Channel capacity between Producer and Emitter. Bounded so a slow client
/// applies backpressure to the upstream read loop instead of the Producer
/// buffering unboundedly in memory.
const CHANNEL_CAPACITY: usize = 64;

/// The external collaborators a Producer needs, grouped so `spawn_producer`
/// takes one argument instead of four.
pub struct ProducerDeps {
    pub status_store: Arc<dyn StatusStore>,
    pub buffer: Arc<dyn TokenBuffer>,
    pub chat_record: Arc<dyn ChatRecordStore>,
    pub provider: Arc<dyn UpstreamProvider>,
    pub config: ChatStreamConfig,
}

/// Spawns the Producer as a detached task and returns the receiving half of
/// its channel for the Emitter to read from.
pub fn spawn_producer(uuid: Uuid, request: UpstreamRequest, deps: ProducerDeps) -> mpsc::Receiver<String> {
    let (tx, rx) = mpsc::channel(CHANNEL_CAPACITY);
    tokio::spawn(run_producer(uuid, request, deps, tx));
    rx
}

/// One-shot, non-streaming entry path (§6.1 `"stream": false`): drives the
/// upstream provider to completion directly, with no local channel and no
/// Token Buffer writes — there is no SSE client to replay to, so there is
/// nothing for the Buffer to serve (SPEC_FULL.md §9 Open Questions). Writes
/// the Chat Record once, at the end, the way the non-streaming call in the
/// original implementation awaits a single response and saves it in one
/// shot rather than going through the producer/queue machinery.
///
/// Returns `true` if any response text was produced, `false` if the
/// upstream call failed before yielding any content (the caller surfaces
/// this as a 502, §6.1).
pub async fn run_once(
    uuid: Uuid,
    request: UpstreamRequest,
    chat_record: Arc<dyn ChatRecordStore>,
    provider: Arc<dyn UpstreamProvider>,
    config: ChatStreamConfig,
) -> bool {
    let mut stream = match provider.chat_stream(&request).await {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(%uuid, error = %err, "upstream invocation failed, no tokens produced");
            if let Err(err) = chat_record
                .final_write(uuid, ChatStatus::Failed, "", ChatUsage::default())
                .await
            {
                tracing::error!(%uuid, error = %err, "final chat record write failed, response may be lost");
            }
            return false;
        }
    };

    let mut all_chunks = String::new();
    let mut usage = ChatUsage::default();
    let total_deadline = Duration::from_secs(config.total_response_timeout_s);

    let status = match tokio::time::timeout(total_deadline, drain_once(&mut stream, &mut all_chunks, &mut usage)).await {
        Ok(DrainOutcome::Completed) => ChatStatus::Completed,
        Ok(DrainOutcome::Failed) => ChatStatus::Failed,
        Err(_elapsed) => {
            tracing::warn!(%uuid, "non-streaming call exceeded total response timeout");
            ChatStatus::Failed
        }
    };

    let produced_content = !all_chunks.is_empty();
    if let Err(err) = chat_record.final_write(uuid, status, &all_chunks, usage).await {
        tracing::error!(%uuid, error = %err, "final chat record write failed, response may be lost");
    }
    produced_content
}

enum DrainOutcome {
    Completed,
    Failed,
}

/// Drains the upstream stream to completion, accumulating text and
/// capturing usage, with no per-chunk heartbeat timeout and no interrupt
/// check — there is no connected SSE client for either to matter to.
async fn drain_once(stream: &mut UpstreamStream, all_chunks: &mut String, usage: &mut ChatUsage) -> DrainOutcome {
    loop {
        match stream.next().await {
            None => return DrainOutcome::Completed,
            Some(Err(fault)) => {
                tracing::warn!(error = %fault, "upstream stream fault during non-streaming call");
                return DrainOutcome::Failed;
            }
            Some(Ok(UpstreamChunk::Usage(reported))) => {
                *usage = ChatUsage {
                    input_tokens: reported.input_tokens,
                    output_tokens: reported.output_tokens,
                    reasoning_tokens: reported.reasoning_tokens,
                    total_tokens: reported.total_tokens,
                };
            }
            Some(Ok(UpstreamChunk::Text(text))) => all_chunks.push_str(&text),
        }
    }
}

enum LoopOutcome {
    Completed,
    Interrupted,
    Failed,
}

async fn run_producer(uuid: Uuid, request: UpstreamRequest, deps: ProducerDeps, tx: mpsc::Sender<String>) {
    let ProducerDeps {
        status_store,
        buffer,
        chat_record,
        provider,
        config,
    } = deps;

    let mut all_chunks = String::new();
    let mut redis_buf: Vec<String> = Vec::new();
    let mut db_buf: Vec<String> = Vec::new();
    let mut usage = ChatUsage::default();

    let stream = match provider.chat_stream(&request).await {
        Ok(stream) => stream,
        Err(err) => {
            tracing::warn!(%uuid, error = %err, "upstream invocation failed, no tokens produced");
            finalize(
                uuid,
                ChatStatus::Failed,
                &mut all_chunks,
                &mut redis_buf,
                usage,
                &tx,
                &status_store,
                &buffer,
                &chat_record,
                &config,
            )
            .await;
            return;
        }
    };
    let mut stream = stream;

    let total_deadline = Duration::from_secs(config.total_response_timeout_s);
    let outcome = tokio::time::timeout(
        total_deadline,
        drive_loop(
            uuid,
            &mut stream,
            &tx,
            &mut all_chunks,
            &mut redis_buf,
            &mut db_buf,
            &mut usage,
            &status_store,
            &buffer,
            &chat_record,
            &config,
        ),
    )
    .await;

    let status = match outcome {
        Ok(LoopOutcome::Completed) => ChatStatus::Completed,
        Ok(LoopOutcome::Interrupted) => ChatStatus::Interrupted,
        Ok(LoopOutcome::Failed) => ChatStatus::Failed,
        Err(_elapsed) => {
            tracing::warn!(%uuid, "producer exceeded total response timeout");
            ChatStatus::Failed
        }
    };

    finalize(
        uuid,
        status,
        &mut all_chunks,
        &mut redis_buf,
        usage,
        &tx,
        &status_store,
        &buffer,
        &chat_record,
        &config,
    )
    .await;
}

#[allow(clippy::too_many_arguments)]
async fn drive_loop(
    uuid: Uuid,
    stream: &mut UpstreamStream,
    tx: &mpsc::Sender<String>,
    all_chunks: &mut String,
    redis_buf: &mut Vec<String>,
    db_buf: &mut Vec<String>,
    usage: &mut ChatUsage,
    status_store: &Arc<dyn StatusStore>,
    buffer: &Arc<dyn TokenBuffer>,
    chat_record: &Arc<dyn ChatRecordStore>,
    config: &ChatStreamConfig,
) -> LoopOutcome {
    let per_chunk_timeout = Duration::from_secs_f64(config.alive_interval_s);

    loop {
        let text = match tokio::time::timeout(per_chunk_timeout, stream.next()).await {
            Err(_elapsed) => {
                tracing::debug!(%uuid, "upstream stalled, emitting heartbeat");
                sentinel::HEARTBEAT.to_owned()
            }
            Ok(None) => return LoopOutcome::Completed,
            Ok(Some(Err(fault))) => {
                tracing::warn!(%uuid, error = %fault, "upstream stream fault");
                return LoopOutcome::Failed;
            }
            Ok(Some(Ok(UpstreamChunk::Usage(reported)))) => {
                *usage = ChatUsage {
                    input_tokens: reported.input_tokens,
                    output_tokens: reported.output_tokens,
                    reasoning_tokens: reported.reasoning_tokens,
                    total_tokens: reported.total_tokens,
                };
                continue;
            }
            // An empty string is still a present `delta.content` and must
            // flow through the normal pipeline (flush thresholds, interrupt
            // check); only an absent chunk would be skipped uncounted, and
            // the provider boundary never yields one (§4.1 step 2: "if
            // `None`, skip without counting").
            Ok(Some(Ok(UpstreamChunk::Text(text)))) => text,
        };

        all_chunks.push_str(&text);
        redis_buf.push(text.clone());
        db_buf.push(text.clone());
        if tx.send(text).await.is_err() {
            tracing::debug!(%uuid, "emitter is gone, continuing for durability");
        }

        if redis_buf.len() >= config.redis_flush_every_n {
            flush_to_buffer(uuid, redis_buf, buffer, config.redis_ttl_s).await;
        }
        if db_buf.len() >= config.db_flush_every_m {
            flush_partial(uuid, all_chunks, db_buf, chat_record).await;
        }

        if observed_interrupt(uuid, status_store, chat_record).await {
            return LoopOutcome::Interrupted;
        }
    }
}

async fn observed_interrupt(
    uuid: Uuid,
    status_store: &Arc<dyn StatusStore>,
    chat_record: &Arc<dyn ChatRecordStore>,
) -> bool {
    match status_store.get_status(uuid).await {
        Ok(status) => status == Some(ChatStatus::Interrupted),
        Err(err) => {
            tracing::warn!(%uuid, error = %err, "status store read failed, falling back to chat record");
            matches!(chat_record.get(uuid).await, Ok(Some(chat)) if chat.status == ChatStatus::Interrupted)
        }
    }
}

async fn flush_to_buffer(uuid: Uuid, redis_buf: &mut Vec<String>, buffer: &Arc<dyn TokenBuffer>, ttl_s: i64) {
    if let Err(err) = buffer.append_batch(uuid, redis_buf, ttl_s).await {
        tracing::warn!(%uuid, error = %err, "buffer flush failed, continuing without it");
    }
    redis_buf.clear();
}

/// Writes the full accumulation so far (not just the batch since the last
/// flush) — `db_buf` only tracks how many chunks have arrived since the last
/// partial write threshold crossing, it is not the content written.
async fn flush_partial(uuid: Uuid, all_chunks: &str, db_buf: &mut Vec<String>, chat_record: &Arc<dyn ChatRecordStore>) {
    if let Err(err) = chat_record.partial_write(uuid, all_chunks).await {
        tracing::warn!(%uuid, error = %err, "partial chat record write failed, continuing");
    }
    db_buf.clear();
}

/// Runs from every exit path. Appends exactly one terminal sentinel (§3
/// invariant 4), flushes the remaining Buffer batch synchronously, writes
/// the full accumulation and usage to the Chat Record, and sets the
/// terminal Status.
#[allow(clippy::too_many_arguments)]
async fn finalize(
    uuid: Uuid,
    status: ChatStatus,
    all_chunks: &mut String,
    redis_buf: &mut Vec<String>,
    usage: ChatUsage,
    tx: &mpsc::Sender<String>,
    status_store: &Arc<dyn StatusStore>,
    buffer: &Arc<dyn TokenBuffer>,
    chat_record: &Arc<dyn ChatRecordStore>,
    config: &ChatStreamConfig,
) {
    let terminal = match status {
        ChatStatus::Completed => sentinel::DONE,
        ChatStatus::Interrupted => sentinel::INTERRUPTED,
        ChatStatus::Failed => sentinel::FAILED,
        ChatStatus::Active => unreachable!("producer never finalizes into Active"),
    };

    all_chunks.push_str(terminal);
    redis_buf.push(terminal.to_owned());
    if tx.send(terminal.to_owned()).await.is_err() {
        tracing::debug!(%uuid, "emitter is gone at finalization");
    }

    flush_to_buffer(uuid, redis_buf, buffer, config.redis_ttl_s).await;

    if let Err(err) = chat_record.final_write(uuid, status, all_chunks, usage).await {
        tracing::error!(%uuid, error = %err, "final chat record write failed, response may be lost");
    }

    if let Err(err) = status_store.set_status(uuid, status, config.redis_ttl_s).await {
        tracing::warn!(%uuid, error = %err, "final status write failed");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration as StdDuration;

    use chrono::Utc;

    use super::*;
    use crate::buffer::fake::FakeTokenBuffer;
    use crate::chat_record::fake::FakeChatRecordStore;
    use crate::db::models::Chat;
    use crate::provider::lorem::LoremProvider;
    use crate::status::fake::FakeStatusStore;

    fn seed_chat(uuid: Uuid) -> Chat {
        Chat {
            id: 1,
            uuid,
            thread_id: Some(1),
            user_prompt: "hi".into(),
            final_prompt: "hi".into(),
            system_prompt: None,
            llm_response: String::new(),
            status: ChatStatus::Active,
            model: "lorem".into(),
            provider: "lorem".into(),
            role: "assistant".into(),
            input_tokens: None,
            output_tokens: None,
            reasoning_tokens: None,
            total_tokens: None,
            meta: None,
            complete_response: None,
            created_at: Utc::now(),
            updated_at: Utc::now(),
            deleted_at: None,
            is_deleted: false,
        }
    }

    fn deps(
        status_store: Arc<FakeStatusStore>,
        buffer: Arc<FakeTokenBuffer>,
        chat_record: Arc<FakeChatRecordStore>,
        provider: LoremProvider,
        config: ChatStreamConfig,
    ) -> ProducerDeps {
        ProducerDeps {
            status_store,
            buffer,
            chat_record,
            provider: Arc::new(provider),
            config,
        }
    }

    #[tokio::test]
    async fn happy_path_accumulates_text_and_completes() {
        let uuid = Uuid::now_v7();
        let status_store = Arc::new(FakeStatusStore::new());
        let buffer = Arc::new(FakeTokenBuffer::new());
        let chat_record = Arc::new(FakeChatRecordStore::new());
        chat_record.insert(seed_chat(uuid));

        let config = ChatStreamConfig {
            redis_flush_every_n: 3,
            db_flush_every_m: 100,
            alive_interval_s: 5.0,
            total_response_timeout_s: 5,
            ..ChatStreamConfig::default()
        };
        let provider = LoremProvider {
            word_interval: StdDuration::from_millis(1),
            ..LoremProvider::default()
        };

        let mut rx = spawn_producer(
            uuid,
            UpstreamRequest {
                system_prompt: None,
                user_prompt: "hi".into(),
                model: "lorem".into(),
                history: Vec::new(),
            },
            deps(status_store.clone(), buffer.clone(), chat_record.clone(), provider, config),
        );

        let mut received = Vec::new();
        while let Some(chunk) = rx.recv().await {
            received.push(chunk);
        }

        assert_eq!(received.last().map(String::as_str), Some(sentinel::DONE));

        let row = chat_record.snapshot(uuid).unwrap();
        assert_eq!(row.status, ChatStatus::Completed);
        assert!(!row.llm_response.contains(sentinel::DONE));
        assert!(!row.llm_response.is_empty());

        assert_eq!(status_store.get_status(uuid).await.unwrap(), Some(ChatStatus::Completed));
    }

    #[tokio::test]
    async fn invocation_failure_finalizes_as_failed_without_tokens() {
        let uuid = Uuid::now_v7();
        let status_store = Arc::new(FakeStatusStore::new());
        let buffer = Arc::new(FakeTokenBuffer::new());
        let chat_record = Arc::new(FakeChatRecordStore::new());
        chat_record.insert(seed_chat(uuid));

        let provider = LoremProvider {
            fail_on_invoke: true,
            ..LoremProvider::default()
        };

        let mut rx = spawn_producer(
            uuid,
            UpstreamRequest {
                system_prompt: None,
                user_prompt: "hi".into(),
                model: "lorem".into(),
                history: Vec::new(),
            },
            deps(
                status_store.clone(),
                buffer.clone(),
                chat_record.clone(),
                provider,
                ChatStreamConfig::default(),
            ),
        );

        let first = rx.recv().await;
        assert_eq!(first.as_deref(), Some(sentinel::FAILED));
        assert!(rx.recv().await.is_none());

        let row = chat_record.snapshot(uuid).unwrap();
        assert_eq!(row.status, ChatStatus::Failed);
        assert_eq!(row.llm_response, "");
    }

    #[tokio::test]
    async fn mid_stream_interrupt_stops_cleanly() {
        let uuid = Uuid::now_v7();
        let status_store = Arc::new(FakeStatusStore::new());
        let buffer = Arc::new(FakeTokenBuffer::new());
        let chat_record = Arc::new(FakeChatRecordStore::new());
        chat_record.insert(seed_chat(uuid));

        let config = ChatStreamConfig {
            redis_flush_every_n: 1,
            db_flush_every_m: 1,
            alive_interval_s: 5.0,
            total_response_timeout_s: 5,
            ..ChatStreamConfig::default()
        };
        let provider = LoremProvider {
            word_interval: StdDuration::from_millis(20),
            ..LoremProvider::default()
        };

        let mut rx = spawn_producer(
            uuid,
            UpstreamRequest {
                system_prompt: None,
                user_prompt: "hi".into(),
                model: "lorem".into(),
                history: Vec::new(),
            },
            deps(status_store.clone(), buffer.clone(), chat_record.clone(), provider, config),
        );

        // Let a couple of chunks through, then signal interrupt externally,
        // the way `/chat/stop` would.
        let _first = rx.recv().await;
        let _second = rx.recv().await;
        status_store.set_status(uuid, ChatStatus::Interrupted, 3600).await.unwrap();

        let mut saw_terminal = None;
        while let Some(chunk) = rx.recv().await {
            saw_terminal = Some(chunk);
        }

        assert_eq!(saw_terminal.as_deref(), Some(sentinel::INTERRUPTED));
        let row = chat_record.snapshot(uuid).unwrap();
        assert_eq!(row.status, ChatStatus::Interrupted);
    }

    #[tokio::test]
    async fn exactly_one_terminal_sentinel_on_the_channel() {
        let uuid = Uuid::now_v7();
        let status_store = Arc::new(FakeStatusStore::new());
        let buffer = Arc::new(FakeTokenBuffer::new());
        let chat_record = Arc::new(FakeChatRecordStore::new());
        chat_record.insert(seed_chat(uuid));

        let provider = LoremProvider {
            word_interval: StdDuration::from_millis(1),
            ..LoremProvider::default()
        };

        let mut rx = spawn_producer(
            uuid,
            UpstreamRequest {
                system_prompt: None,
                user_prompt: "hi".into(),
                model: "lorem".into(),
                history: Vec::new(),
            },
            deps(
                status_store.clone(),
                buffer.clone(),
                chat_record.clone(),
                provider,
                ChatStreamConfig::default(),
            ),
        );

        let mut terminal_count = 0;
        while let Some(chunk) = rx.recv().await {
            if sentinel::classify(&chunk).is_some_and(|s| s.is_terminal()) {
                terminal_count += 1;
            }
        }
        assert_eq!(terminal_count, 1);
    }

    #[tokio::test]
    async fn run_once_completes_without_touching_the_buffer() {
        let uuid = Uuid::now_v7();
        let buffer = Arc::new(FakeTokenBuffer::new());
        let chat_record = Arc::new(FakeChatRecordStore::new());
        chat_record.insert(seed_chat(uuid));

        let provider = Arc::new(LoremProvider {
            word_interval: StdDuration::from_millis(1),
            ..LoremProvider::default()
        });

        let produced = run_once(
            uuid,
            UpstreamRequest {
                system_prompt: None,
                user_prompt: "hi".into(),
                model: "lorem".into(),
                history: Vec::new(),
            },
            chat_record.clone(),
            provider,
            ChatStreamConfig::default(),
        )
        .await;

        assert!(produced);
        let row = chat_record.snapshot(uuid).unwrap();
        assert_eq!(row.status, ChatStatus::Completed);
        assert!(!row.llm_response.is_empty());
        assert!(buffer.contents(uuid).is_empty());
    }

    #[tokio::test]
    async fn run_once_reports_no_content_on_invocation_failure() {
        let uuid = Uuid::now_v7();
        let chat_record = Arc::new(FakeChatRecordStore::new());
        chat_record.insert(seed_chat(uuid));

        let provider = Arc::new(LoremProvider {
            fail_on_invoke: true,
            ..LoremProvider::default()
        });

        let produced = run_once(
            uuid,
            UpstreamRequest {
                system_prompt: None,
                user_prompt: "hi".into(),
                model: "lorem".into(),
                history: Vec::new(),
            },
            chat_record.clone(),
            provider,
            ChatStreamConfig::default(),
        )
        .await;

        assert!(!produced);
        let row = chat_record.snapshot(uuid).unwrap();
        assert_eq!(row.status, ChatStatus::Failed);
        assert_eq!(row.llm_response, "");
    }
}
