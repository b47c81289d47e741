use std::sync::Arc;

use anyhow::Context;
use chrono::Local;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};

use crate::rag::MetadataFilter;

use super::exchange::{ExchangeController, ExchangeEvent, ExchangeRequest};
use super::prompt::system_prompt;

const PROJECT_ID_KEY: &str = "project_id";

/// One conversation as seen by a client: utterances go in one at a time, events come out.
pub struct ChatSession {
    controller: Arc<ExchangeController>,
    conversation_id: i64,
    system_prompt: String,
    filter: Option<MetadataFilter>,
    in_flight: Option<JoinHandle<()>>,
}

impl ChatSession {
    /// Load the conversation, core memories and project scope. The system prompt is fixed
    /// for the lifetime of the session.
    pub async fn open(
        controller: Arc<ExchangeController>,
        conversation_id: i64,
    ) -> anyhow::Result<Self> {
        let store = controller.store().clone();
        let conversation = store
            .get_conversation(conversation_id)
            .await
            .context("Failed to load conversation")?
            .with_context(|| format!("Conversation {conversation_id} not found"))?;

        let memories = store
            .load_core_memories()
            .await
            .context("Failed to load core memories")?;

        let filter = match conversation.project_name() {
            Some(name) => match store.resolve_project_by_name(name).await? {
                Some(project) => {
                    info!(
                        project = %project.name,
                        project_id = project.id,
                        "Session scoped to project"
                    );
                    Some(MetadataFilter::equals(PROJECT_ID_KEY, project.id))
                }
                None => {
                    warn!(project = %name, "Project named in conversation title does not exist");
                    None
                }
            },
            None => None,
        };

        Ok(Self {
            controller,
            conversation_id,
            system_prompt: system_prompt(Local::now().naive_local(), &memories),
            filter,
            in_flight: None,
        })
    }

    pub fn conversation_id(&self) -> i64 {
        self.conversation_id
    }

    pub fn filter(&self) -> Option<&MetadataFilter> {
        self.filter.as_ref()
    }

    pub fn system_prompt(&self) -> &str {
        &self.system_prompt
    }

    /// Start an exchange once the previous one has reached its terminal state. Drain or drop
    /// the previous receiver first; an undrained receiver keeps the old exchange waiting.
    pub async fn submit(&mut self, utterance: impl Into<String>) -> mpsc::Receiver<ExchangeEvent> {
        if let Some(previous) = self.in_flight.take() {
            if let Err(err) = previous.await {
                warn!(?err, "Previous exchange task ended abnormally");
            }
        }

        let (rx, handle) = self.controller.run_exchange(ExchangeRequest {
            conversation_id: self.conversation_id,
            utterance: utterance.into(),
            filter: self.filter.clone(),
            system_prompt: self.system_prompt.clone(),
        });
        self.in_flight = Some(handle);
        rx
    }
}

#[cfg(test)]
mod tests {
    use serde_json::json;

    use super::*;
    use crate::llm_client::{ChatRole, ModelChunk};
    use crate::orchestrator::exchange::tests::{
        call, collect, controller, Reply, ScriptedChatClient,
    };
    use crate::rag::mock::{HashedEmbeddings, InMemoryVectorIndex};
    use crate::rag::{ContextRetriever, Metadata};
    use crate::store::{Conversation, DataStore, InMemoryStore, Role};

    #[tokio::test]
    async fn project_titles_scope_retrieval() {
        let store = Arc::new(InMemoryStore::new());
        let apollo = store.create_project("Apollo", None).unwrap();
        let other = store.create_project("Zephyr", None).unwrap();
        let conversation = store
            .create_conversation(Conversation::project_title("Apollo"))
            .unwrap();

        let retriever = ContextRetriever::new(
            Arc::new(HashedEmbeddings::new(128)),
            Arc::new(InMemoryVectorIndex::default()),
        );
        for (project_id, text) in [
            (apollo.id, "launch checklist for the rocket"),
            (other.id, "launch checklist for the boat"),
        ] {
            let mut metadata = Metadata::new();
            metadata.insert("project_id".into(), json!(project_id));
            metadata.insert("type".into(), json!("project_file"));
            retriever.ingest(text, metadata, "default").await;
        }

        let client = Arc::new(ScriptedChatClient::new(Vec::new()));
        let controller = controller(store.clone(), client.clone(), retriever);
        let mut session = ChatSession::open(controller, conversation.id).await.unwrap();
        assert_eq!(
            session.filter(),
            Some(&MetadataFilter::equals("project_id", apollo.id))
        );

        collect(session.submit("launch checklist").await).await;

        let prompt = client.seen.lock().unwrap()[0][1].content.clone();
        assert!(prompt.contains("rocket"));
        assert!(!prompt.contains("boat"));
    }

    #[tokio::test]
    async fn system_prompt_carries_core_memories() {
        let store = Arc::new(InMemoryStore::new());
        store.add_memory("work", "Standup at 9:30").unwrap();
        let conversation = store.create_conversation("Daily").unwrap();
        let client = Arc::new(ScriptedChatClient::new(Vec::new()));
        let controller = controller(store.clone(), client.clone(), ContextRetriever::disabled());

        let mut session = ChatSession::open(controller, conversation.id).await.unwrap();
        assert!(session.filter().is_none());
        assert!(session.system_prompt().contains("- [WORK] Standup at 9:30"));

        collect(session.submit("morning").await).await;
        let first = client.seen.lock().unwrap()[0][0].clone();
        assert_eq!(first.role, ChatRole::System);
        assert_eq!(first.content, session.system_prompt());
    }

    #[tokio::test]
    async fn utterances_run_one_after_another() {
        let store = Arc::new(InMemoryStore::new());
        let conversation = store.create_conversation("Errands").unwrap();
        let client = Arc::new(ScriptedChatClient::new(vec![
            Reply::Chunks(vec![ModelChunk::tool_calls(vec![call(
                "create_task",
                json!({ "title": "call plumber", "priority": "high" }),
            )])]),
            Reply::Chunks(vec![ModelChunk::text("Added.")]),
            Reply::Chunks(vec![ModelChunk::text("You have one task.")]),
        ]));
        let controller = controller(store.clone(), client.clone(), ContextRetriever::disabled());
        let mut session = ChatSession::open(controller, conversation.id).await.unwrap();

        let first = collect(session.submit("remind me to call the plumber").await).await;
        let second = collect(session.submit("what's on my list?").await).await;
        assert_eq!(first.last(), Some(&ExchangeEvent::TurnComplete));
        assert_eq!(second.last(), Some(&ExchangeEvent::TurnComplete));

        let roles: Vec<Role> = store
            .list_turns(conversation.id)
            .await
            .unwrap()
            .iter()
            .map(|t| t.role)
            .collect();
        assert_eq!(
            roles,
            vec![
                Role::User,
                Role::Assistant,
                Role::Tool,
                Role::Assistant,
                Role::User,
                Role::Assistant,
            ]
        );

        // The replayed history includes the earlier exchange.
        let third_call = client.seen.lock().unwrap()[2].clone();
        assert_eq!(third_call.len(), 1 + roles.len() - 1);
        assert_eq!(third_call.last().map(|m| m.content.as_str()), Some("what's on my list?"));
    }

    #[tokio::test]
    async fn unknown_conversation_fails_to_open() {
        let store = Arc::new(InMemoryStore::new());
        let client = Arc::new(ScriptedChatClient::new(Vec::new()));
        let controller = controller(store, client, ContextRetriever::disabled());

        let err = ChatSession::open(controller, 404).await.err().unwrap();
        assert!(err.to_string().contains("Conversation 404 not found"));
    }
}
