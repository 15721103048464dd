//! The Reconnect Replayer (§4.3): serves a client that returns with a known
//! `chat_uuid` and `Last-Event-ID`, preferring the Buffer and falling back
//! to polling the Chat Record Store when the cache is unavailable.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use rocket::response::stream::Event;
use uuid::Uuid;

use crate::buffer::TokenBuffer;
use crate::chat_record::ChatRecordStore;
use crate::config::ChatStreamConfig;
use crate::db::models::{Chat, ChatStatus};
use crate::errors::DbFault;
use crate::sentinel::{self, Sentinel};
use crate::status::StatusStore;
use crate::stream::emitter::SseStream;

/// Result of checking the preconditions in §4.3 before committing to an SSE
/// response. The HTTP layer decides the response shape from this.
pub enum ReplayPrecondition {
    NotFound,
    /// The chat already reached a terminal status; the HTTP layer returns
    /// this as a plain JSON body rather than opening a stream (§6.1).
    Terminal { status: ChatStatus, text: String },
    /// The chat is still active; the HTTP layer opens an SSE response
    /// driven by [`replay`].
    Active { chat: Chat },
}

pub async fn check_precondition(
    uuid: Uuid,
    chat_record: &Arc<dyn ChatRecordStore>,
) -> Result<ReplayPrecondition, DbFault> {
    let Some(chat) = chat_record.get(uuid).await? else {
        return Ok(ReplayPrecondition::NotFound);
    };

    if chat.status == ChatStatus::Active {
        Ok(ReplayPrecondition::Active { chat })
    } else {
        Ok(ReplayPrecondition::Terminal {
            status: chat.status,
            text: chat.llm_response,
        })
    }
}

/// Dependencies the Replayer needs, mirroring [`crate::stream::producer::ProducerDeps`].
pub struct ReplayerDeps {
    pub status_store: Arc<dyn StatusStore>,
    pub buffer: Arc<dyn TokenBuffer>,
    pub chat_record: Arc<dyn ChatRecordStore>,
    pub config: ChatStreamConfig,
}

/// Streams the remainder of an active chat starting at Buffer index
/// `last_event_id` (§4.3's resolved semantics: `sent_so_far` is initialized
/// to `last_event_id` directly, not `last_event_id - 1`).
pub fn replay(chat: Chat, last_event_id: i64, deps: ReplayerDeps) -> SseStream {
    let ReplayerDeps {
        status_store,
        buffer,
        chat_record,
        config,
    } = deps;

    let stream = async_stream::stream! {
        let uuid = chat.uuid;
        let deadline = chat.created_at + chrono::Duration::seconds(config.total_response_timeout_s as i64);
        let mut sent_so_far = last_event_id.max(0);
        let mut db_content_sent: usize = 0;
        let mut cache_available = true;

        loop {
            if Utc::now() >= deadline {
                yield terminal_frame(Sentinel::Failed);
                return;
            }

            if cache_available {
                match buffer.slice(uuid, sent_so_far).await {
                    Ok(chunks) => {
                        for raw in chunks {
                            let idx = sent_so_far;
                            sent_so_far += 1;
                            if sentinel::classify(&raw).is_none() {
                                yield chunk_frame(idx, &raw);
                            }
                        }

                        if let Some(status) = observed_terminal_status(&status_store, uuid).await {
                            yield terminal_frame(status.terminal_sentinel());
                            return;
                        }

                        tokio::time::sleep(capped_sleep(config.reconnect_poll_interval_redis_s, deadline)).await;
                        continue;
                    }
                    Err(err) => {
                        tracing::warn!(%uuid, error = %err, "buffer read failed during reconnection, falling back to chat record polling");
                        cache_available = false;
                    }
                }
            }

            match chat_record.get(uuid).await {
                Ok(Some(row)) => {
                    if row.llm_response.len() > db_content_sent {
                        let fragment = &row.llm_response[db_content_sent..];
                        let cleaned = sentinel::strip_sentinels(fragment);
                        db_content_sent = row.llm_response.len();
                        if !cleaned.is_empty() {
                            yield chunk_frame_no_id(&cleaned);
                        }
                    }
                    if row.status != ChatStatus::Active {
                        yield terminal_frame(row.status.terminal_sentinel());
                        return;
                    }
                }
                Ok(None) => {
                    yield terminal_frame(Sentinel::Failed);
                    return;
                }
                Err(err) => {
                    tracing::warn!(%uuid, error = %err, "chat record read failed during reconnection fallback polling");
                }
            }

            tokio::time::sleep(capped_sleep(config.reconnect_poll_interval_db_s, deadline)).await;
        }
    };

    Box::pin(stream)
}

/// Caps a poll interval to whatever time remains until `deadline`, matching
/// the reference implementation's `min(interval, max(time_left, 0))` so a
/// poll sleep can never carry the loop past the deadline before the next
/// check (§4.3 step 4).
fn capped_sleep(interval_s: f64, deadline: chrono::DateTime<Utc>) -> Duration {
    let remaining = (deadline - Utc::now()).to_std().unwrap_or(Duration::ZERO);
    Duration::from_secs_f64(interval_s).min(remaining)
}

async fn observed_terminal_status(status_store: &Arc<dyn StatusStore>, uuid: Uuid) -> Option<ChatStatus> {
    match status_store.get_status(uuid).await {
        Ok(Some(status)) if status != ChatStatus::Active => Some(status),
        _ => None,
    }
}

fn chunk_frame(idx: i64, text: &str) -> Event {
    let data = serde_json::json!({ "text": text }).to_string();
    Event::data(data).event("chunk").id(idx.to_string())
}

/// Chunk frame for the DB fallback path (§4.3 step 2), which has no Buffer
/// index to attach as `id`.
fn chunk_frame_no_id(text: &str) -> Event {
    let data = serde_json::json!({ "text": text }).to_string();
    Event::data(data).event("chunk")
}

fn terminal_frame(sentinel: Sentinel) -> Event {
    Event::data(sentinel.sse_data()).event(sentinel.sse_event())
}
