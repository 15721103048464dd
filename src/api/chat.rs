//! The thin HTTP surface (§6.1) wired directly onto the core: `POST /chat`
//! (new chat, streaming or not, or a reconnection) and `POST /chat/stop`
//! (cooperative interrupt). Request parsing here is intentionally minimal —
//! deep validation, auth, and routing concerns are out of scope (§1).

use std::sync::Arc;

use rocket::response::stream::EventStream;
use rocket::response::Responder;
use rocket::serde::json::Json;
use rocket::{post, routes, State};
use serde::Deserialize;
use uuid::Uuid;

use crate::buffer::{RedisTokenBuffer, TokenBuffer};
use crate::chat_record::ChatRecordStore;
use crate::config::{AppConfig, ChatStreamConfig};
use crate::db::models::ChatStatus;
use crate::db::services::ChatDbService;
use crate::db::DbPool;
use crate::errors::ApiError;
use crate::provider::lorem::LoremProvider;
use crate::provider::{UpstreamProvider, UpstreamRequest};
use crate::sentinel;
use crate::status::{RedisStatusStore, StatusStore};
use crate::stream::emitter::{self, SseStream};
use crate::stream::producer::{self, spawn_producer, ProducerDeps};
use crate::stream::replayer::{self, ReplayPrecondition, ReplayerDeps};
use crate::stream::LastEventId;

pub fn get_routes() -> impl Into<Vec<rocket::Route>> {
    routes![chat, stop]
}

#[derive(Deserialize)]
#[serde(crate = "rocket::serde")]
pub struct ChatRequestBody {
    pub model: Option<String>,
    pub provider: Option<String>,
    pub user_prompt: Option<String>,
    pub system_prompt: Option<String>,
    #[serde(default = "default_stream")]
    pub stream: bool,
    pub thread_id: Option<i64>,
    pub chat_uuid: Option<Uuid>,
}

fn default_stream() -> bool {
    true
}

#[derive(Deserialize)]
#[serde(crate = "rocket::serde")]
pub struct StopRequestBody {
    pub chat_uuid: Uuid,
}

#[derive(Responder)]
pub enum ChatResponse {
    Stream(EventStream<SseStream>),
    Json(Json<serde_json::Value>),
}

/// `POST /chat` (§6.1): dispatches to a reconnection or a fresh chat based
/// on whether `chat_uuid` is present in the body.
#[post("/chat", data = "<body>")]
pub async fn chat(
    body: Json<ChatRequestBody>,
    last_event_id: LastEventId,
    app_config: &State<AppConfig>,
    db_pool: &State<DbPool>,
    redis_pool: &State<fred::prelude::Pool>,
) -> Result<ChatResponse, ApiError> {
    let config = ChatStreamConfig::from(app_config.inner());
    let chat_record: Arc<dyn ChatRecordStore> = Arc::new(ChatDbService::new(db_pool.inner().clone()));
    let status_store: Arc<dyn StatusStore> = Arc::new(RedisStatusStore::new(redis_pool.inner().clone()));
    let buffer: Arc<dyn TokenBuffer> = Arc::new(RedisTokenBuffer::new(redis_pool.inner().clone()));

    if let Some(uuid) = body.chat_uuid {
        return reconnect(uuid, last_event_id.0, chat_record, status_store, buffer, config).await;
    }

    let model = require_field(body.model.as_deref(), "model")?;
    let provider_name = require_field(body.provider.as_deref(), "provider")?;
    let user_prompt = require_field(body.user_prompt.as_deref(), "user_prompt")?;

    let db_service = ChatDbService::new(db_pool.inner().clone());
    let chat = db_service
        .create_chat(body.thread_id, user_prompt, body.system_prompt.as_deref(), model, provider_name)
        .await?;

    let provider = resolve_provider(provider_name)?;
    let history = match chat.thread_id {
        Some(thread_id) => db_service.thread_history(thread_id, chat.id).await?,
        None => Vec::new(),
    };
    let request = UpstreamRequest {
        system_prompt: body.system_prompt.clone(),
        user_prompt: user_prompt.to_owned(),
        model: model.to_owned(),
        history,
    };

    if body.stream {
        let deps = ProducerDeps {
            status_store,
            buffer,
            chat_record: chat_record.clone(),
            provider,
            config,
        };
        let rx = spawn_producer(chat.uuid, request, deps);
        Ok(ChatResponse::Stream(EventStream::from(emitter::emit(
            chat.uuid,
            chat.thread_id,
            rx,
            config,
        ))))
    } else {
        non_streaming_response(chat.uuid, chat.thread_id, request, chat_record, provider, config).await
    }
}

/// `POST /chat/stop` (§6.1): idempotent cooperative interrupt signal.
#[post("/chat/stop", data = "<body>")]
pub async fn stop(
    body: Json<StopRequestBody>,
    app_config: &State<AppConfig>,
    db_pool: &State<DbPool>,
    redis_pool: &State<fred::prelude::Pool>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let config = ChatStreamConfig::from(app_config.inner());
    let status_store = RedisStatusStore::new(redis_pool.inner().clone());
    let chat_record = ChatDbService::new(db_pool.inner().clone());

    let Some(current) = status_store.get_status(body.chat_uuid).await? else {
        return Err(ApiError::NotFound);
    };

    if current != ChatStatus::Active {
        return Ok(Json(serde_json::json!({ "acknowledged": true, "status": current.as_str() })));
    }

    status_store
        .set_status(body.chat_uuid, ChatStatus::Interrupted, config.redis_ttl_s)
        .await?;
    chat_record.mark_interrupted(body.chat_uuid).await?;

    Ok(Json(serde_json::json!({
        "acknowledged": true,
        "status": ChatStatus::Interrupted.as_str(),
    })))
}

async fn reconnect(
    uuid: Uuid,
    last_event_id: i64,
    chat_record: Arc<dyn ChatRecordStore>,
    status_store: Arc<dyn StatusStore>,
    buffer: Arc<dyn TokenBuffer>,
    config: ChatStreamConfig,
) -> Result<ChatResponse, ApiError> {
    match replayer::check_precondition(uuid, &chat_record).await? {
        ReplayPrecondition::NotFound => Err(ApiError::NotFound),
        ReplayPrecondition::Terminal { status, text } => Ok(ChatResponse::Json(Json(serde_json::json!({
            "text": sentinel::clean_response(&text),
            "status": status.as_str(),
        })))),
        ReplayPrecondition::Active { chat } => {
            let deps = ReplayerDeps {
                status_store,
                buffer,
                chat_record,
                config,
            };
            Ok(ChatResponse::Stream(EventStream::from(replayer::replay(chat, last_event_id, deps))))
        }
    }
}

/// Drives the upstream provider to completion via the one-shot
/// `producer::run_once` and reports the final Chat Record row. This never
/// spawns a Producer or touches the Token Buffer — there is no SSE client
/// for either to serve (SPEC_FULL.md §9 Open Questions), matching the
/// reference implementation's separate, queue-free non-streaming call.
async fn non_streaming_response(
    uuid: Uuid,
    thread_id: Option<i64>,
    request: UpstreamRequest,
    chat_record: Arc<dyn ChatRecordStore>,
    provider: Arc<dyn UpstreamProvider>,
    config: ChatStreamConfig,
) -> Result<ChatResponse, ApiError> {
    let produced_content = producer::run_once(uuid, request, chat_record.clone(), provider, config).await;

    let row = chat_record.get(uuid).await?.ok_or(ApiError::NotFound)?;
    if !produced_content && row.status == ChatStatus::Failed {
        return Err(ApiError::UpstreamEmpty);
    }

    Ok(ChatResponse::Json(Json(serde_json::json!({
        "chat_uuid": row.uuid,
        "text": row.llm_response,
        "usage": {
            "input_tokens": row.input_tokens,
            "output_tokens": row.output_tokens,
            "reasoning_tokens": row.reasoning_tokens,
            "total_tokens": row.total_tokens,
        },
        "thread_id": thread_id,
    }))))
}

fn require_field<'r>(field: Option<&'r str>, name: &'static str) -> Result<&'r str, ApiError> {
    field
        .filter(|v| !v.is_empty())
        .ok_or_else(|| ApiError::Validation(format!("{name} is required for a new chat")))
}

/// Resolves a provider name to an `UpstreamProvider` implementation. The
/// only concrete backend in this crate is the deterministic `LoremProvider`
/// test double — real model backends (credential management, provider
/// SDKs) are out of scope (§1) and would plug in here behind the same
/// trait.
fn resolve_provider(name: &str) -> Result<Arc<dyn UpstreamProvider>, ApiError> {
    match name {
        "lorem" => Ok(Arc::new(LoremProvider::default())),
        other => Err(ApiError::Validation(format!("unknown provider: {other}"))),
    }
}

