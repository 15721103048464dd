//! The Token Buffer (§4.5): an ordered, append-only, TTL-bounded cache of
//! chunks for a single chat, used by the Emitter's reconnect path to replay
//! everything sent since a client's `Last-Event-ID` without touching Postgres.

use async_trait::async_trait;
use fred::prelude::{KeysInterface, ListInterface};
use uuid::Uuid;

use crate::errors::CacheFault;

#[async_trait]
pub trait TokenBuffer: Send + Sync {
    /// Appends a batch of chunks and (re)sets the key's TTL, in a single
    /// round-trip — the batched flush to Buffer described in §4.1. A no-op
    /// for an empty batch.
    async fn append_batch(&self, uuid: Uuid, chunks: &[String], ttl_s: i64) -> Result<(), CacheFault>;

    /// Returns every chunk at index >= `from_idx`, in order. An empty vec
    /// means either nothing at/after that index, or the key doesn't exist.
    async fn slice(&self, uuid: Uuid, from_idx: i64) -> Result<Vec<String>, CacheFault>;
}

pub fn buffer_key(uuid: Uuid) -> String {
    format!("chat:buffer:{uuid}")
}

pub struct RedisTokenBuffer {
    pool: fred::prelude::Pool,
}

impl RedisTokenBuffer {
    pub fn new(pool: fred::prelude::Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl TokenBuffer for RedisTokenBuffer {
    async fn append_batch(&self, uuid: Uuid, chunks: &[String], ttl_s: i64) -> Result<(), CacheFault> {
        if chunks.is_empty() {
            return Ok(());
        }
        let key = buffer_key(uuid);
        let pipeline = self.pool.pipeline();
        for chunk in chunks {
            let _: () = pipeline.rpush(&key, chunk).await?;
        }
        let _: () = pipeline.expire(&key, ttl_s, None).await?;
        let _: Vec<fred::prelude::Value> = pipeline.all().await?;
        Ok(())
    }

    async fn slice(&self, uuid: Uuid, from_idx: i64) -> Result<Vec<String>, CacheFault> {
        let chunks: Vec<String> = self.pool.lrange(buffer_key(uuid), from_idx, -1).await?;
        Ok(chunks)
    }
}
