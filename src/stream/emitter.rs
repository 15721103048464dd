//! The SSE Emitter (§4.2): translates the Producer's local channel into a
//! client-visible `text/event-stream` response.
//!
//! The Emitter owns no persistence and makes no decisions about chat
//! status — it only classifies sentinels and formats frames. The Producer
//! is already detached onto its own task before this stream is built, so a
//! client disconnecting (which drops this stream) has no effect on it.

use std::pin::Pin;
use std::time::Duration;

use rocket::response::stream::Event;
use tokio::sync::mpsc;
use tokio_stream::Stream;
use uuid::Uuid;

use crate::config::ChatStreamConfig;
use crate::sentinel::{self, Sentinel};

/// The boxed stream type shared by the Emitter and the Replayer, so the
/// HTTP layer can return either behind one `EventStream` response variant
/// (§6.1) without naming the anonymous `async_stream` generator type.
pub type SseStream = Pin<Box<dyn Stream<Item = Event> + Send>>;

/// Builds the SSE response for a freshly started chat: an `init` frame
/// followed by one frame per item received from the Producer's channel,
/// ending at the first terminal sentinel.
pub fn emit(uuid: Uuid, thread_id: Option<i64>, mut rx: mpsc::Receiver<String>, config: ChatStreamConfig) -> SseStream {
    let stream = async_stream::stream! {
        yield init_frame(uuid, thread_id, config.sse_reconnection_delay_ms);

        let per_chunk_timeout = Duration::from_secs_f64(config.alive_interval_s);
        let mut chunk_idx: i64 = 0;

        loop {
            match tokio::time::timeout(per_chunk_timeout, rx.recv()).await {
                Ok(Some(raw)) => match sentinel::classify(&raw) {
                    Some(Sentinel::Heartbeat) => yield Event::comment("PING"),
                    Some(terminal) if terminal.is_terminal() => {
                        yield terminal_frame(terminal);
                        return;
                    }
                    Some(_) => unreachable!("is_terminal covers every non-heartbeat variant"),
                    None => {
                        yield chunk_frame(chunk_idx, &raw);
                        chunk_idx += 1;
                    }
                },
                // Channel closed without a terminal sentinel: the Producer
                // task panicked or was aborted. Close the stream rather
                // than hang forever.
                Ok(None) => return,
                // No item within ALIVE_INTERVAL_S. The Producer emits its
                // own HEARTBEAT on every stall, so this is a defensive
                // fallback (§4.2), not the normal path.
                Err(_elapsed) => yield Event::comment("PING"),
            }
        }
    };

    Box::pin(stream)
}

fn init_frame(uuid: Uuid, thread_id: Option<i64>, retry_ms: u64) -> Event {
    let data = serde_json::json!({ "chat_uuid": uuid, "thread_id": thread_id }).to_string();
    Event::data(data)
        .event("init")
        .id(uuid.to_string())
        .retry(Duration::from_millis(retry_ms))
}

fn chunk_frame(idx: i64, text: &str) -> Event {
    let data = serde_json::json!({ "text": text }).to_string();
    Event::data(data).event("chunk").id(idx.to_string())
}

fn terminal_frame(sentinel: Sentinel) -> Event {
    Event::data(sentinel.sse_data()).event(sentinel.sse_event())
}
