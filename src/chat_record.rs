//! The Chat Record Store interface (§3, §4.1, §4.3): the relational source of
//! truth for a chat. The Producer and Replayer depend on this trait, not on
//! Diesel directly, so both can be exercised in tests against an in-memory fake.

use async_trait::async_trait;
use uuid::Uuid;

use crate::db::models::{Chat, ChatStatus, ChatUsage};
use crate::errors::DbFault;

#[async_trait]
pub trait ChatRecordStore: Send + Sync {
    /// Fetch the current row for a chat, if it exists.
    async fn get(&self, uuid: Uuid) -> Result<Option<Chat>, DbFault>;

    /// Mid-stream partial write: raw accumulation (sentinels included), no
    /// status or usage change.
    async fn partial_write(&self, uuid: Uuid, raw_accum: &str) -> Result<(), DbFault>;

    /// Terminal write: cleaned response, final status, and usage counters.
    async fn final_write(
        &self,
        uuid: Uuid,
        status: ChatStatus,
        raw_accum: &str,
        usage: ChatUsage,
    ) -> Result<(), DbFault>;

    /// Mirrors an externally observed interrupt into the row (used by the
    /// `/chat/stop` handler, not the Producer itself).
    async fn mark_interrupted(&self, uuid: Uuid) -> Result<(), DbFault>;
}

#[cfg(test)]
pub mod fake {
    use std::collections::HashMap;
    use std::sync::Mutex;

    use chrono::Utc;

    use super::*;
    use crate::sentinel::clean_response;

    /// In-memory `ChatRecordStore` seeded with a single row per test, used by
    /// Producer/Replayer tests so they never touch Postgres.
    #[derive(Default)]
    pub struct FakeChatRecordStore {
        rows: Mutex<HashMap<Uuid, Chat>>,
    }

    impl FakeChatRecordStore {
        pub fn new() -> Self {
            Self::default()
        }

        pub fn insert(&self, chat: Chat) {
            self.rows.lock().unwrap().insert(chat.uuid, chat);
        }

        pub fn snapshot(&self, uuid: Uuid) -> Option<Chat> {
            self.rows.lock().unwrap().get(&uuid).cloned()
        }
    }

    #[async_trait]
    impl ChatRecordStore for FakeChatRecordStore {
        async fn get(&self, uuid: Uuid) -> Result<Option<Chat>, DbFault> {
            Ok(self.rows.lock().unwrap().get(&uuid).cloned())
        }

        async fn partial_write(&self, uuid: Uuid, raw_accum: &str) -> Result<(), DbFault> {
            if let Some(row) = self.rows.lock().unwrap().get_mut(&uuid) {
                row.llm_response = raw_accum.to_owned();
                row.updated_at = Utc::now();
            }
            Ok(())
        }

        async fn final_write(
            &self,
            uuid: Uuid,
            status: ChatStatus,
            raw_accum: &str,
            usage: ChatUsage,
        ) -> Result<(), DbFault> {
            if let Some(row) = self.rows.lock().unwrap().get_mut(&uuid) {
                row.llm_response = clean_response(raw_accum);
                row.status = status;
                row.input_tokens = usage.input_tokens;
                row.output_tokens = usage.output_tokens;
                row.reasoning_tokens = usage.reasoning_tokens;
                row.total_tokens = usage.total_tokens;
                row.updated_at = Utc::now();
            }
            Ok(())
        }

        async fn mark_interrupted(&self, uuid: Uuid) -> Result<(), DbFault> {
            if let Some(row) = self.rows.lock().unwrap().get_mut(&uuid) {
                row.status = ChatStatus::Interrupted;
                row.updated_at = Utc::now();
            }
            Ok(())
        }
    }
}
