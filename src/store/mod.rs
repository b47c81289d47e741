pub mod memory;
pub mod models;

use std::sync::Arc;

use async_trait::async_trait;

pub use memory::InMemoryStore;
pub use models::{
    CalendarEvent, Conversation, ConversationTurn, CoreMemory, NewEvent, NewTask, Priority,
    Project, Role, Task, TaskStatus,
};

/// Data-access collaborator. Every call is its own unit of work; nothing spans an exchange.
#[async_trait]
pub trait DataStore: Send + Sync {
    async fn append_turn(
        &self,
        conversation_id: i64,
        role: Role,
        content: &str,
        tool_name: Option<&str>,
    ) -> anyhow::Result<ConversationTurn>;

    /// Turns of one conversation in ascending sequence order.
    async fn list_turns(&self, conversation_id: i64) -> anyhow::Result<Vec<ConversationTurn>>;

    async fn get_conversation(&self, conversation_id: i64) -> anyhow::Result<Option<Conversation>>;

    async fn create_task(&self, task: NewTask) -> anyhow::Result<Task>;

    async fn create_event(&self, event: NewEvent) -> anyhow::Result<CalendarEvent>;

    async fn load_core_memories(&self) -> anyhow::Result<Vec<CoreMemory>>;

    async fn resolve_project_by_name(&self, name: &str) -> anyhow::Result<Option<Project>>;
}

pub type SharedDataStore = Arc<dyn DataStore>;
