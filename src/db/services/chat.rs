use async_trait::async_trait;
use chrono::Utc;
use diesel::prelude::*;
use diesel_async::RunQueryDsl;
use uuid::Uuid;

use crate::chat_record::ChatRecordStore;
use crate::db::models::{
    Chat, ChatStatus, ChatUsage, FinalChatUpdate, NewChat, NewChatThread, PartialChatUpdate,
    StatusOnlyUpdate,
};
use crate::db::schema::{chat, chat_thread};
use crate::db::DbPool;
use crate::errors::DbFault;
use crate::provider::{ThreadMessage, ThreadRole};
use crate::sentinel::clean_response;

/// Diesel-backed Postgres implementation of the chat-related data access
/// methods, including thread creation and the `ChatRecordStore` interface
/// the Producer and Replayer use.
pub struct ChatDbService {
    pool: DbPool,
}

impl ChatDbService {
    pub fn new(pool: DbPool) -> Self {
        Self { pool }
    }

    /// Creates a thread (titled from the first 100 characters of the prompt)
    /// if `thread_id` is absent, then inserts the chat row with status
    /// `active`. `thread_id` is assigned before this returns, satisfying
    /// invariant 6 (assigned before the first client-visible byte).
    pub async fn create_chat(
        &self,
        thread_id: Option<i64>,
        user_prompt: &str,
        system_prompt: Option<&str>,
        model: &str,
        provider: &str,
    ) -> Result<Chat, DbFault> {
        let mut conn = self.pool.get().await?;

        let resolved_thread_id = match thread_id {
            Some(id) => id,
            None => {
                let title: String = user_prompt.chars().take(100).collect();
                diesel::insert_into(chat_thread::table)
                    .values(NewChatThread { thread_title: &title })
                    .returning(chat_thread::id)
                    .get_result(&mut conn)
                    .await?
            }
        };

        let uuid = Uuid::now_v7();
        let new_chat = NewChat {
            uuid: &uuid,
            thread_id: Some(resolved_thread_id),
            user_prompt,
            final_prompt: user_prompt,
            system_prompt,
            llm_response: "",
            status: ChatStatus::Active,
            model,
            provider,
            role: "assistant",
        };

        let id: i64 = diesel::insert_into(chat::table)
            .values(&new_chat)
            .returning(chat::id)
            .get_result(&mut conn)
            .await?;

        self.get(uuid)
            .await?
            .ok_or_else(|| DbFault::Query(diesel::result::Error::NotFound))
            .map(|row| {
                debug_assert_eq!(row.id, id);
                row
            })
    }

    /// Flattens the prior chats of a thread into alternating user/assistant
    /// messages, oldest first, for a provider backend to use as context
    /// (§4.1 Inputs). A chat still `active` or with an empty response
    /// contributes only its user turn. `exclude_chat_id` leaves out the chat
    /// row just created for the current turn so it isn't echoed back as history.
    pub async fn thread_history(&self, thread_id: i64, exclude_chat_id: i64) -> Result<Vec<ThreadMessage>, DbFault> {
        let mut conn = self.pool.get().await?;
        let rows = chat::table
            .filter(chat::thread_id.eq(thread_id))
            .filter(chat::id.ne(exclude_chat_id))
            .order_by(chat::created_at.asc())
            .select(Chat::as_select())
            .load(&mut conn)
            .await?;

        let mut messages = Vec::with_capacity(rows.len() * 2);
        for row in rows {
            messages.push(ThreadMessage {
                role: ThreadRole::User,
                content: row.final_prompt,
            });
            if !row.llm_response.is_empty() {
                messages.push(ThreadMessage {
                    role: ThreadRole::Assistant,
                    content: row.llm_response,
                });
            }
        }
        Ok(messages)
    }
}

#[async_trait]
impl ChatRecordStore for ChatDbService {
    async fn get(&self, uuid: Uuid) -> Result<Option<Chat>, DbFault> {
        let mut conn = self.pool.get().await?;
        let row = chat::table
            .filter(chat::uuid.eq(uuid))
            .select(Chat::as_select())
            .first(&mut conn)
            .await
            .optional()?;
        Ok(row)
    }

    async fn partial_write(&self, uuid: Uuid, raw_accum: &str) -> Result<(), DbFault> {
        let mut conn = self.pool.get().await?;
        diesel::update(chat::table.filter(chat::uuid.eq(uuid)))
            .set(PartialChatUpdate {
                llm_response: raw_accum,
                updated_at: Utc::now(),
            })
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn final_write(
        &self,
        uuid: Uuid,
        status: ChatStatus,
        raw_accum: &str,
        usage: ChatUsage,
    ) -> Result<(), DbFault> {
        let cleaned = clean_response(raw_accum);
        let mut conn = self.pool.get().await?;
        diesel::update(chat::table.filter(chat::uuid.eq(uuid)))
            .set(FinalChatUpdate {
                llm_response: &cleaned,
                status,
                input_tokens: usage.input_tokens,
                output_tokens: usage.output_tokens,
                reasoning_tokens: usage.reasoning_tokens,
                total_tokens: usage.total_tokens,
                updated_at: Utc::now(),
            })
            .execute(&mut conn)
            .await?;
        Ok(())
    }

    async fn mark_interrupted(&self, uuid: Uuid) -> Result<(), DbFault> {
        let mut conn = self.pool.get().await?;
        diesel::update(chat::table.filter(chat::uuid.eq(uuid)))
            .set(StatusOnlyUpdate {
                status: Some(ChatStatus::Interrupted),
                updated_at: Some(Utc::now()),
            })
            .execute(&mut conn)
            .await?;
        Ok(())
    }
}
