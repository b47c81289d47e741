use std::sync::atomic::{AtomicI64, AtomicU64, Ordering};
use std::sync::Mutex;

use anyhow::anyhow;
use async_trait::async_trait;
use chrono::Utc;

use super::models::{
    CalendarEvent, Conversation, ConversationTurn, CoreMemory, NewEvent, NewTask, Project, Role,
    Task,
};
use super::DataStore;

#[derive(Default)]
struct Tables {
    conversations: Vec<Conversation>,
    turns: Vec<ConversationTurn>,
    tasks: Vec<Task>,
    events: Vec<CalendarEvent>,
    memories: Vec<CoreMemory>,
    projects: Vec<Project>,
}

/// Process-local stand-in for the durable store.
#[derive(Default)]
pub struct InMemoryStore {
    tables: Mutex<Tables>,
    id_counter: AtomicI64,
    sequence: AtomicU64,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    fn next_id(&self) -> i64 {
        self.id_counter.fetch_add(1, Ordering::Relaxed) + 1
    }

    fn lock(&self) -> anyhow::Result<std::sync::MutexGuard<'_, Tables>> {
        self.tables
            .lock()
            .map_err(|_| anyhow!("in-memory store lock poisoned"))
    }

    pub fn create_conversation(&self, title: impl Into<String>) -> anyhow::Result<Conversation> {
        let conversation = Conversation {
            id: self.next_id(),
            title: title.into(),
            created_at: Utc::now(),
        };
        self.lock()?.conversations.push(conversation.clone());
        Ok(conversation)
    }

    /// Returns the existing project when one with the same name is already present.
    pub fn create_project(
        &self,
        name: impl Into<String>,
        description: Option<String>,
    ) -> anyhow::Result<Project> {
        let name = name.into();
        let mut tables = self.lock()?;
        if let Some(existing) = tables.projects.iter().find(|p| p.name == name) {
            return Ok(existing.clone());
        }

        let project = Project {
            id: self.next_id(),
            name,
            description,
        };
        tables.projects.push(project.clone());
        Ok(project)
    }

    pub fn add_memory(
        &self,
        category: impl Into<String>,
        content: impl Into<String>,
    ) -> anyhow::Result<()> {
        self.lock()?.memories.push(CoreMemory {
            category: category.into(),
            content: content.into(),
        });
        Ok(())
    }

}

#[cfg(test)]
impl InMemoryStore {
    pub fn tasks(&self) -> anyhow::Result<Vec<Task>> {
        Ok(self.lock()?.tasks.clone())
    }

    pub fn events(&self) -> anyhow::Result<Vec<CalendarEvent>> {
        Ok(self.lock()?.events.clone())
    }
}

#[async_trait]
impl DataStore for InMemoryStore {
    async fn append_turn(
        &self,
        conversation_id: i64,
        role: Role,
        content: &str,
        tool_name: Option<&str>,
    ) -> anyhow::Result<ConversationTurn> {
        let turn = ConversationTurn {
            id: self.next_id(),
            conversation_id,
            role,
            content: content.to_string(),
            tool_name: tool_name.map(str::to_string),
            sequence: self.sequence.fetch_add(1, Ordering::Relaxed) + 1,
            created_at: Utc::now(),
        };
        self.lock()?.turns.push(turn.clone());
        Ok(turn)
    }

    async fn list_turns(&self, conversation_id: i64) -> anyhow::Result<Vec<ConversationTurn>> {
        let tables = self.lock()?;
        let mut turns: Vec<ConversationTurn> = tables
            .turns
            .iter()
            .filter(|turn| turn.conversation_id == conversation_id)
            .cloned()
            .collect();
        turns.sort_by_key(|turn| turn.sequence);
        Ok(turns)
    }

    async fn get_conversation(&self, conversation_id: i64) -> anyhow::Result<Option<Conversation>> {
        Ok(self
            .lock()?
            .conversations
            .iter()
            .find(|c| c.id == conversation_id)
            .cloned())
    }

    async fn create_task(&self, task: NewTask) -> anyhow::Result<Task> {
        let task = Task {
            id: self.next_id(),
            title: task.title,
            description: task.description,
            status: task.status,
            priority: task.priority,
            tag: task.tag,
            deadline: task.deadline,
            created_at: Utc::now(),
        };
        self.lock()?.tasks.push(task.clone());
        Ok(task)
    }

    async fn create_event(&self, event: NewEvent) -> anyhow::Result<CalendarEvent> {
        let event = CalendarEvent {
            id: self.next_id(),
            title: event.title,
            description: event.description,
            start_time: event.start_time,
            end_time: event.end_time,
            all_day: event.all_day,
            created_at: Utc::now(),
        };
        self.lock()?.events.push(event.clone());
        Ok(event)
    }

    async fn load_core_memories(&self) -> anyhow::Result<Vec<CoreMemory>> {
        Ok(self.lock()?.memories.clone())
    }

    async fn resolve_project_by_name(&self, name: &str) -> anyhow::Result<Option<Project>> {
        Ok(self
            .lock()?
            .projects
            .iter()
            .find(|p| p.name == name)
            .cloned())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn turns_are_listed_in_sequence_per_conversation() {
        let store = InMemoryStore::new();
        let a = store.create_conversation("a").expect("conversation");
        let b = store.create_conversation("b").expect("conversation");

        store.append_turn(a.id, Role::User, "hi", None).await.unwrap();
        store.append_turn(b.id, Role::User, "other", None).await.unwrap();
        store
            .append_turn(a.id, Role::Tool, "done", Some("create_task"))
            .await
            .unwrap();

        let turns = store.list_turns(a.id).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert!(turns[0].sequence < turns[1].sequence);
        assert_eq!(turns[1].tool_name.as_deref(), Some("create_task"));
    }

    #[tokio::test]
    async fn projects_resolve_by_exact_name() {
        let store = InMemoryStore::new();
        let first = store.create_project("Apollo", None).unwrap();
        let again = store.create_project("Apollo", None).unwrap();
        assert_eq!(first.id, again.id);

        let found = store.resolve_project_by_name("Apollo").await.unwrap();
        assert_eq!(found.map(|p| p.id), Some(first.id));
        assert!(store.resolve_project_by_name("apollo").await.unwrap().is_none());
    }

    #[test]
    fn project_titles_round_trip_through_conversation() {
        let conversation = Conversation {
            id: 1,
            title: Conversation::project_title("  Apollo "),
            created_at: Utc::now(),
        };
        assert_eq!(conversation.title, "Project: Apollo");
        assert_eq!(conversation.project_name(), Some("Apollo"));

        let plain = Conversation {
            title: "New Chat".into(),
            ..conversation
        };
        assert_eq!(plain.project_name(), None);
    }
}
