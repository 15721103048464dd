use chrono::{DateTime, Utc};
use diesel::prelude::{AsChangeset, Identifiable, Insertable, Queryable};
use diesel::Selectable;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a `Chat`. Transitions are monotone: `Active` is the only
/// status a chat is ever created with, and once it leaves `Active` it never
/// returns to it.
#[derive(diesel_derive_enum::DbEnum)]
#[db_enum(existing_type_path = "crate::db::schema::sql_types::ChatStatusType")]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChatStatus {
    Active,
    Interrupted,
    Completed,
    Failed,
}

impl ChatStatus {
    /// Whether this status is terminal (no further transitions are valid).
    pub fn is_terminal(self) -> bool {
        !matches!(self, ChatStatus::Active)
    }

    /// The lowercase wire representation used as the Redis status value, matching
    /// the serde `snake_case` rendering so cache and DB agree byte-for-byte.
    pub fn as_str(self) -> &'static str {
        match self {
            ChatStatus::Active => "active",
            ChatStatus::Interrupted => "interrupted",
            ChatStatus::Completed => "completed",
            ChatStatus::Failed => "failed",
        }
    }

    /// Maps a terminal status to the sentinel the Producer emitted to reach
    /// it, used by the Reconnect Replayer (§4.3 step 3) to translate an
    /// observed terminal status into the matching SSE close frame.
    pub fn terminal_sentinel(self) -> crate::sentinel::Sentinel {
        match self {
            ChatStatus::Completed => crate::sentinel::Sentinel::Done,
            ChatStatus::Interrupted => crate::sentinel::Sentinel::Interrupted,
            ChatStatus::Failed => crate::sentinel::Sentinel::Failed,
            ChatStatus::Active => unreachable!("active is not a terminal status"),
        }
    }
}

impl std::str::FromStr for ChatStatus {
    type Err = ();

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(ChatStatus::Active),
            "interrupted" => Ok(ChatStatus::Interrupted),
            "completed" => Ok(ChatStatus::Completed),
            "failed" => Ok(ChatStatus::Failed),
            _ => Err(()),
        }
    }
}

#[derive(Identifiable, Queryable, Selectable, Serialize)]
#[diesel(table_name = super::schema::chat_thread)]
pub struct ChatThread {
    pub id: i64,
    pub thread_title: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: Option<DateTime<Utc>>,
    pub deleted_at: Option<DateTime<Utc>>,
}

#[derive(Insertable)]
#[diesel(table_name = super::schema::chat_thread)]
pub struct NewChatThread<'r> {
    pub thread_title: &'r str,
}

#[derive(Identifiable, Queryable, Selectable, Serialize, Clone)]
#[diesel(table_name = super::schema::chat)]
pub struct Chat {
    pub id: i64,
    pub uuid: Uuid,
    pub thread_id: Option<i64>,
    pub user_prompt: String,
    pub final_prompt: String,
    pub system_prompt: Option<String>,
    pub llm_response: String,
    pub status: ChatStatus,
    pub model: String,
    pub provider: String,
    pub role: String,
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub reasoning_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
    pub meta: Option<serde_json::Value>,
    pub complete_response: Option<serde_json::Value>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub deleted_at: Option<DateTime<Utc>>,
    pub is_deleted: bool,
}

#[derive(Insertable)]
#[diesel(table_name = super::schema::chat)]
pub struct NewChat<'r> {
    pub uuid: &'r Uuid,
    pub thread_id: Option<i64>,
    pub user_prompt: &'r str,
    pub final_prompt: &'r str,
    pub system_prompt: Option<&'r str>,
    pub llm_response: &'r str,
    pub status: ChatStatus,
    pub model: &'r str,
    pub provider: &'r str,
    pub role: &'r str,
}

/// Usage counters reported by the upstream provider on its final chunk.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct ChatUsage {
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub reasoning_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
}

/// Partial update written mid-stream: raw accumulation (sentinels included),
/// never touches `status` or usage counters.
#[derive(AsChangeset)]
#[diesel(table_name = super::schema::chat)]
pub struct PartialChatUpdate<'r> {
    pub llm_response: &'r str,
    pub updated_at: DateTime<Utc>,
}

/// Final update written once, at terminal: cleaned response, status, and usage.
#[derive(AsChangeset)]
#[diesel(table_name = super::schema::chat)]
pub struct FinalChatUpdate<'r> {
    pub llm_response: &'r str,
    pub status: ChatStatus,
    pub input_tokens: Option<i32>,
    pub output_tokens: Option<i32>,
    pub reasoning_tokens: Option<i32>,
    pub total_tokens: Option<i32>,
    pub updated_at: DateTime<Utc>,
}

#[derive(AsChangeset, Default)]
#[diesel(table_name = super::schema::chat)]
pub struct StatusOnlyUpdate {
    pub status: Option<ChatStatus>,
    pub updated_at: Option<DateTime<Utc>>,
}
