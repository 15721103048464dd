//! The Status Store (§4.4): a durable `chat_uuid → status` record in the
//! cache with TTL, used for cooperative cancellation across process
//! boundaries and as the Replayer's preferred source of the current status.

use async_trait::async_trait;
use fred::prelude::{Expiration, KeysInterface};
use uuid::Uuid;

use crate::db::models::ChatStatus;
use crate::errors::CacheFault;

#[async_trait]
pub trait StatusStore: Send + Sync {
    /// Idempotent write with TTL.
    async fn set_status(&self, uuid: Uuid, status: ChatStatus, ttl_s: i64) -> Result<(), CacheFault>;

    /// Returns `None` if no entry exists (expired, never written, or evicted).
    async fn get_status(&self, uuid: Uuid) -> Result<Option<ChatStatus>, CacheFault>;
}

pub fn status_key(uuid: Uuid) -> String {
    format!("chat:status:{uuid}")
}

pub struct RedisStatusStore {
    pool: fred::prelude::Pool,
}

impl RedisStatusStore {
    pub fn new(pool: fred::prelude::Pool) -> Self {
        Self { pool }
    }
}

#[async_trait]
impl StatusStore for RedisStatusStore {
    async fn set_status(&self, uuid: Uuid, status: ChatStatus, ttl_s: i64) -> Result<(), CacheFault> {
        let _: () = self
            .pool
            .set(status_key(uuid), status.as_str(), Some(Expiration::EX(ttl_s)), None, false)
            .await?;
        Ok(())
    }

    async fn get_status(&self, uuid: Uuid) -> Result<Option<ChatStatus>, CacheFault> {
        let raw: Option<String> = self.pool.get(status_key(uuid)).await?;
        Ok(raw.and_then(|s| s.parse().ok()))
    }
}

#[cfg(test)]
pub mod fake {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use super::*;

    /// In-memory `StatusStore` for tests — no TTL enforcement, since tests
    /// run far faster than any real `REDIS_TTL_S`.
    #[derive(Default)]
    pub struct FakeStatusStore {
        entries: Mutex<HashMap<Uuid, ChatStatus>>,
        /// When set, `get_status`/`set_status` return this error once then clear it,
        /// simulating a transient cache outage (used by reconnect-replayer tests).
        pub fail_next: Mutex<bool>,
    }

    impl FakeStatusStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn seed(&self, uuid: Uuid, status: ChatStatus) {
            self.entries.lock().unwrap().insert(uuid, status);
        }
    }

    #[async_trait]
    impl StatusStore for FakeStatusStore {
        async fn set_status(&self, uuid: Uuid, status: ChatStatus, _ttl_s: i64) -> Result<(), CacheFault> {
            if std::mem::take(&mut *self.fail_next.lock().unwrap()) {
                return Err(CacheFault::Backend(fred::error::Error::new(
                    fred::error::ErrorKind::IO,
                    "simulated outage",
                )));
            }
            self.entries.lock().unwrap().insert(uuid, status);
            Ok(())
        }

        async fn get_status(&self, uuid: Uuid) -> Result<Option<ChatStatus>, CacheFault> {
            if std::mem::take(&mut *self.fail_next.lock().unwrap()) {
                return Err(CacheFault::Backend(fred::error::Error::new(
                    fred::error::ErrorKind::IO,
                    "simulated outage",
                )));
            }
            Ok(self.entries.lock().unwrap().get(&uuid).copied())
        }
    }
}
