use std::sync::Arc;

use futures::StreamExt;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{error, info, info_span, instrument, warn, Instrument};

use crate::llm_client::{ChatMessage, SharedChatClient, ToolCallRequest};
use crate::rag::{format_context_block, MetadataFilter, RagConfig, SharedRetriever};
use crate::store::{Role, SharedDataStore};
use crate::tools::{is_error_result, SharedToolDispatcher, ToolDefinition};

use super::prompt::build_messages;

/// Model calls allowed per utterance.
pub const MAX_TURNS: usize = 3;

const EVENT_BUFFER: usize = 64;

/// What a caller observes while one exchange runs.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ExchangeEvent {
    Content {
        text: String,
    },
    ToolInvoked {
        name: String,
        result: String,
        is_error: bool,
    },
    TurnComplete,
    Error {
        message: String,
    },
}

impl ExchangeEvent {
    pub fn is_terminal(&self) -> bool {
        matches!(self, ExchangeEvent::TurnComplete | ExchangeEvent::Error { .. })
    }
}

#[derive(Debug, Clone)]
pub struct ExchangeRequest {
    pub conversation_id: i64,
    pub utterance: String,
    pub filter: Option<MetadataFilter>,
    pub system_prompt: String,
}

#[derive(Debug, Error)]
enum ExchangeAbort {
    #[error("caller disconnected")]
    Disconnected,
    #[error("persistence failed: {0:#}")]
    Persistence(anyhow::Error),
}

/// Output of one model call.
#[derive(Debug, Default)]
struct TurnReply {
    text: String,
    tool_calls: Vec<ToolCallRequest>,
}

/// Drives one utterance through retrieval, bounded model turns and tool execution.
pub struct ExchangeController {
    store: SharedDataStore,
    retriever: SharedRetriever,
    dispatcher: SharedToolDispatcher,
    chat_client: SharedChatClient,
    namespace: String,
    top_k: usize,
}

impl ExchangeController {
    pub fn new(
        store: SharedDataStore,
        retriever: SharedRetriever,
        dispatcher: SharedToolDispatcher,
        chat_client: SharedChatClient,
    ) -> Self {
        Self {
            store,
            retriever,
            dispatcher,
            chat_client,
            namespace: RagConfig::DEFAULT_NAMESPACE.to_string(),
            top_k: RagConfig::DEFAULT_TOP_K,
        }
    }

    pub fn with_retrieval_scope(mut self, namespace: impl Into<String>, top_k: usize) -> Self {
        self.namespace = namespace.into();
        self.top_k = top_k;
        self
    }

    pub fn store(&self) -> &SharedDataStore {
        &self.store
    }

    /// Start an exchange on its own task. Events arrive on the receiver and end with
    /// `TurnComplete` or `Error`; dropping the receiver cancels the exchange.
    pub fn run_exchange(
        self: &Arc<Self>,
        request: ExchangeRequest,
    ) -> (mpsc::Receiver<ExchangeEvent>, JoinHandle<()>) {
        let (tx, rx) = mpsc::channel(EVENT_BUFFER);
        let controller = Arc::clone(self);
        let span = info_span!("exchange", conversation_id = request.conversation_id);

        let handle = tokio::spawn(
            async move {
                match controller.drive(request, &tx).await {
                    Ok(()) => {
                        let _ = tx.send(ExchangeEvent::TurnComplete).await;
                    }
                    Err(ExchangeAbort::Disconnected) => {
                        info!("Caller disconnected; exchange abandoned");
                    }
                    Err(abort @ ExchangeAbort::Persistence(_)) => {
                        error!(%abort, "Exchange aborted");
                        let _ = tx
                            .send(ExchangeEvent::Error {
                                message: abort.to_string(),
                            })
                            .await;
                    }
                }
            }
            .instrument(span),
        );

        (rx, handle)
    }

    async fn drive(
        &self,
        request: ExchangeRequest,
        tx: &mpsc::Sender<ExchangeEvent>,
    ) -> Result<(), ExchangeAbort> {
        let ExchangeRequest {
            conversation_id,
            utterance,
            filter,
            system_prompt,
        } = request;

        self.persist(conversation_id, Role::User, &utterance, None)
            .await?;

        let snippets = self
            .retriever
            .query(&utterance, &self.namespace, self.top_k, filter.as_ref())
            .await;
        let context = format_context_block(&snippets);

        let history = self
            .store
            .list_turns(conversation_id)
            .await
            .map_err(ExchangeAbort::Persistence)?;
        let mut messages = build_messages(&system_prompt, &history, context.as_deref());
        let tools = self.dispatcher.schema();

        for turn in 1..=MAX_TURNS {
            ensure_connected(tx)?;
            let reply = self.stream_turn(&messages, &tools, tx).await?;

            self.persist(conversation_id, Role::Assistant, &reply.text, None)
                .await?;
            messages.push(ChatMessage::assistant(reply.text));

            if reply.tool_calls.is_empty() {
                return Ok(());
            }

            for call in reply.tool_calls {
                ensure_connected(tx)?;
                let result = self.dispatcher.execute(&call.name, &call.arguments).await;
                self.persist(conversation_id, Role::Tool, &result, Some(&call.name))
                    .await?;
                messages.push(ChatMessage::tool(call.name.clone(), result.clone()));

                let is_error = is_error_result(&result);
                emit(
                    tx,
                    ExchangeEvent::ToolInvoked {
                        name: call.name,
                        result,
                        is_error,
                    },
                )
                .await?;
            }

            if turn == MAX_TURNS {
                warn!(
                    max_turns = MAX_TURNS,
                    "Turn budget exhausted; tool results not sent back to the model"
                );
            }
        }

        Ok(())
    }

    /// Stream one model response, forwarding text as it arrives. A model failure ends the
    /// turn with an inline error fragment and no tool calls.
    #[instrument(level = "debug", skip_all, fields(messages = messages.len()))]
    async fn stream_turn(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
        tx: &mpsc::Sender<ExchangeEvent>,
    ) -> Result<TurnReply, ExchangeAbort> {
        let mut reply = TurnReply::default();

        let opened = tokio::select! {
            biased;
            _ = tx.closed() => return Err(ExchangeAbort::Disconnected),
            opened = self.chat_client.stream_chat(messages, tools) => opened,
        };
        let mut stream = match opened {
            Ok(stream) => stream,
            Err(err) => {
                model_failure(&mut reply, err, tx).await?;
                return Ok(reply);
            }
        };

        loop {
            let next = tokio::select! {
                biased;
                _ = tx.closed() => return Err(ExchangeAbort::Disconnected),
                next = stream.next() => next,
            };

            match next {
                None => break,
                Some(Ok(chunk)) => {
                    if let Some(text) = chunk.content.filter(|text| !text.is_empty()) {
                        reply.text.push_str(&text);
                        emit(tx, ExchangeEvent::Content { text }).await?;
                    }
                    reply.tool_calls.extend(chunk.tool_calls);
                }
                Some(Err(err)) => {
                    model_failure(&mut reply, err, tx).await?;
                    break;
                }
            }
        }

        Ok(reply)
    }

    async fn persist(
        &self,
        conversation_id: i64,
        role: Role,
        content: &str,
        tool_name: Option<&str>,
    ) -> Result<(), ExchangeAbort> {
        self.store
            .append_turn(conversation_id, role, content, tool_name)
            .await
            .map(|_| ())
            .map_err(ExchangeAbort::Persistence)
    }
}

async fn model_failure(
    reply: &mut TurnReply,
    err: anyhow::Error,
    tx: &mpsc::Sender<ExchangeEvent>,
) -> Result<(), ExchangeAbort> {
    warn!(?err, "Model call failed");
    let fragment = format!("Error connecting to LLM: {err:#}");
    reply.text.push_str(&fragment);
    reply.tool_calls.clear();
    emit(tx, ExchangeEvent::Content { text: fragment }).await
}

async fn emit(tx: &mpsc::Sender<ExchangeEvent>, event: ExchangeEvent) -> Result<(), ExchangeAbort> {
    tx.send(event)
        .await
        .map_err(|_| ExchangeAbort::Disconnected)
}

fn ensure_connected(tx: &mpsc::Sender<ExchangeEvent>) -> Result<(), ExchangeAbort> {
    if tx.is_closed() {
        return Err(ExchangeAbort::Disconnected);
    }
    Ok(())
}

#[cfg(test)]
pub(crate) mod tests {
    use std::collections::VecDeque;
    use std::sync::Mutex;

    use anyhow::anyhow;
    use async_trait::async_trait;
    use futures::{stream, Stream};
    use serde_json::{json, Value};

    use super::*;
    use crate::llm_client::{ChatRole, ChatStreamClient, ModelChunk, ModelStream};
    use crate::rag::mock::{HashedEmbeddings, InMemoryVectorIndex};
    use crate::rag::{ContextRetriever, Metadata};
    use crate::store::{
        CalendarEvent, Conversation, ConversationTurn, CoreMemory, DataStore, InMemoryStore,
        NewEvent, NewTask, Project, Task, TaskStatus,
    };
    use crate::tools::ToolDispatcher;

    pub(crate) enum Reply {
        Chunks(Vec<ModelChunk>),
        Refuse(&'static str),
        BreakAfter(Vec<ModelChunk>, &'static str),
        Stall(Vec<ModelChunk>),
    }

    /// Plays back one scripted reply per model call, then the fallback.
    pub(crate) struct ScriptedChatClient {
        replies: Mutex<VecDeque<Reply>>,
        fallback: Vec<ModelChunk>,
        pub(crate) seen: Mutex<Vec<Vec<ChatMessage>>>,
    }

    impl ScriptedChatClient {
        pub(crate) fn new(replies: Vec<Reply>) -> Self {
            Self {
                replies: Mutex::new(replies.into()),
                fallback: vec![ModelChunk::text("ok")],
                seen: Mutex::new(Vec::new()),
            }
        }

        pub(crate) fn always(fallback: Vec<ModelChunk>) -> Self {
            Self {
                fallback,
                ..Self::new(Vec::new())
            }
        }

        pub(crate) fn calls(&self) -> usize {
            self.seen.lock().unwrap().len()
        }
    }

    #[async_trait]
    impl ChatStreamClient for ScriptedChatClient {
        async fn stream_chat(
            &self,
            messages: &[ChatMessage],
            _tools: &[ToolDefinition],
        ) -> anyhow::Result<ModelStream> {
            self.seen.lock().unwrap().push(messages.to_vec());
            let reply = self
                .replies
                .lock()
                .unwrap()
                .pop_front()
                .unwrap_or_else(|| Reply::Chunks(self.fallback.clone()));

            let stream: ModelStream = match reply {
                Reply::Chunks(items) => Box::pin(scripted(items)),
                Reply::Refuse(reason) => return Err(anyhow!(reason)),
                Reply::BreakAfter(items, reason) => Box::pin(
                    scripted(items).chain(stream::once(async move { Err(anyhow!(reason)) })),
                ),
                Reply::Stall(items) => Box::pin(scripted(items).chain(stream::pending())),
            };
            Ok(stream)
        }
    }

    fn scripted(chunks: Vec<ModelChunk>) -> impl Stream<Item = anyhow::Result<ModelChunk>> + Send {
        stream::iter(chunks.into_iter().map(Ok))
    }

    pub(crate) fn call(name: &str, arguments: Value) -> ToolCallRequest {
        ToolCallRequest::new(name, arguments.as_object().cloned().unwrap_or_default())
    }

    pub(crate) fn controller(
        store: Arc<dyn DataStore>,
        client: Arc<ScriptedChatClient>,
        retriever: ContextRetriever,
    ) -> Arc<ExchangeController> {
        Arc::new(ExchangeController::new(
            store.clone(),
            Arc::new(retriever),
            Arc::new(ToolDispatcher::new(store)),
            client,
        ))
    }

    fn request(conversation_id: i64, utterance: &str) -> ExchangeRequest {
        ExchangeRequest {
            conversation_id,
            utterance: utterance.to_string(),
            filter: None,
            system_prompt: "You are Jarvis.".to_string(),
        }
    }

    pub(crate) async fn collect(mut rx: mpsc::Receiver<ExchangeEvent>) -> Vec<ExchangeEvent> {
        let mut events = Vec::new();
        while let Some(event) = rx.recv().await {
            events.push(event);
        }
        events
    }

    async fn roles(store: &InMemoryStore, conversation_id: i64) -> Vec<Role> {
        store
            .list_turns(conversation_id)
            .await
            .unwrap()
            .iter()
            .map(|turn| turn.role)
            .collect()
    }

    #[tokio::test]
    async fn reminder_creates_a_task_and_answers() {
        let store = Arc::new(InMemoryStore::new());
        let conversation = store.create_conversation("Groceries").unwrap();
        let client = Arc::new(ScriptedChatClient::new(vec![
            Reply::Chunks(vec![ModelChunk::tool_calls(vec![call(
                "create_task",
                json!({ "title": "buy milk" }),
            )])]),
            Reply::Chunks(vec![
                ModelChunk::text("Added "),
                ModelChunk::text("buy milk."),
            ]),
        ]));
        let controller = controller(store.clone(), client.clone(), ContextRetriever::disabled());

        let (rx, handle) = controller.run_exchange(request(conversation.id, "Remind me to buy milk"));
        let events = collect(rx).await;
        handle.await.unwrap();

        assert_eq!(
            roles(&store, conversation.id).await,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
        let tasks = store.tasks().unwrap();
        assert_eq!(tasks.len(), 1);
        assert_eq!(tasks[0].title, "buy milk");
        assert_eq!(tasks[0].status, TaskStatus::Todo);

        match &events[0] {
            ExchangeEvent::ToolInvoked {
                name,
                result,
                is_error,
            } => {
                assert_eq!(name, "create_task");
                assert!(result.starts_with("Task created successfully"));
                assert!(!is_error);
            }
            other => panic!("unexpected first event {other:?}"),
        }
        assert_eq!(
            &events[1..],
            &[
                ExchangeEvent::Content {
                    text: "Added ".into()
                },
                ExchangeEvent::Content {
                    text: "buy milk.".into()
                },
                ExchangeEvent::TurnComplete,
            ]
        );

        let tool_message = client.seen.lock().unwrap()[1].last().cloned().unwrap();
        assert_eq!(tool_message.role, ChatRole::Tool);
        assert_eq!(tool_message.name.as_deref(), Some("create_task"));

        let turns = store.list_turns(conversation.id).await.unwrap();
        assert_eq!(turns[3].content, "Added buy milk.");
    }

    #[tokio::test]
    async fn persistent_tool_requests_stop_after_three_turns() {
        let store = Arc::new(InMemoryStore::new());
        let conversation = store.create_conversation("Loop").unwrap();
        let client = Arc::new(ScriptedChatClient::always(vec![ModelChunk::tool_calls(vec![
            call("create_task", json!({ "title": "again" })),
        ])]));
        let controller = controller(store.clone(), client.clone(), ContextRetriever::disabled());

        let (rx, _) = controller.run_exchange(request(conversation.id, "loop forever"));
        let events = collect(rx).await;

        assert_eq!(client.calls(), MAX_TURNS);
        assert_eq!(events.last(), Some(&ExchangeEvent::TurnComplete));
        let roles = roles(&store, conversation.id).await;
        assert_eq!(roles.iter().filter(|r| **r == Role::Assistant).count(), 3);
        assert_eq!(roles.iter().filter(|r| **r == Role::Tool).count(), 3);
        assert_eq!(store.tasks().unwrap().len(), 3);
    }

    #[tokio::test]
    async fn model_failure_is_reported_inline_and_persisted() {
        let store = Arc::new(InMemoryStore::new());
        let conversation = store.create_conversation("Offline").unwrap();
        let client = Arc::new(ScriptedChatClient::new(vec![Reply::Refuse("connection refused")]));
        let controller = controller(store.clone(), client, ContextRetriever::disabled());

        let (rx, _) = controller.run_exchange(request(conversation.id, "hello?"));
        let events = collect(rx).await;

        assert_eq!(
            events,
            vec![
                ExchangeEvent::Content {
                    text: "Error connecting to LLM: connection refused".into()
                },
                ExchangeEvent::TurnComplete,
            ]
        );
        let turns = store.list_turns(conversation.id).await.unwrap();
        assert_eq!(turns.len(), 2);
        assert_eq!(turns[1].content, "Error connecting to LLM: connection refused");
    }

    #[tokio::test]
    async fn mid_stream_failure_keeps_streamed_text() {
        let store = Arc::new(InMemoryStore::new());
        let conversation = store.create_conversation("Flaky").unwrap();
        let client = Arc::new(ScriptedChatClient::new(vec![Reply::BreakAfter(
            vec![ModelChunk::text("Partial answer. ")],
            "stream reset",
        )]));
        let controller = controller(store.clone(), client.clone(), ContextRetriever::disabled());

        let (rx, _) = controller.run_exchange(request(conversation.id, "explain"));
        let events = collect(rx).await;

        assert_eq!(events.len(), 3);
        assert_eq!(events.last(), Some(&ExchangeEvent::TurnComplete));
        assert_eq!(client.calls(), 1);
        let turns = store.list_turns(conversation.id).await.unwrap();
        assert_eq!(
            turns[1].content,
            "Partial answer. Error connecting to LLM: stream reset"
        );
    }

    #[tokio::test]
    async fn unknown_tools_are_reported_and_the_loop_continues() {
        let store = Arc::new(InMemoryStore::new());
        let conversation = store.create_conversation("Mail").unwrap();
        let client = Arc::new(ScriptedChatClient::new(vec![
            Reply::Chunks(vec![ModelChunk::tool_calls(vec![call(
                "send_email",
                json!({ "to": "bob" }),
            )])]),
            Reply::Chunks(vec![ModelChunk::text("I can't send email.")]),
        ]));
        let controller = controller(store.clone(), client, ContextRetriever::disabled());

        let (rx, _) = controller.run_exchange(request(conversation.id, "email bob"));
        let events = collect(rx).await;

        assert_eq!(
            events[0],
            ExchangeEvent::ToolInvoked {
                name: "send_email".into(),
                result: "Error: Tool send_email not found".into(),
                is_error: true,
            }
        );
        assert_eq!(events.last(), Some(&ExchangeEvent::TurnComplete));
        assert_eq!(
            roles(&store, conversation.id).await,
            vec![Role::User, Role::Assistant, Role::Tool, Role::Assistant]
        );
    }

    #[tokio::test]
    async fn tool_turns_follow_their_assistant_turn_in_emission_order() {
        let store = Arc::new(InMemoryStore::new());
        let conversation = store.create_conversation("Plan").unwrap();
        let client = Arc::new(ScriptedChatClient::new(vec![
            Reply::Chunks(vec![
                ModelChunk::text("On it."),
                ModelChunk::tool_calls(vec![
                    call("create_task", json!({ "title": "book venue" })),
                    call(
                        "create_calendar_event",
                        json!({
                            "title": "Launch",
                            "start_time": "2024-05-01T10:00:00",
                            "end_time": "2024-05-01T11:00:00"
                        }),
                    ),
                ]),
            ]),
            Reply::Chunks(vec![ModelChunk::text("All set.")]),
        ]));
        let controller = controller(store.clone(), client, ContextRetriever::disabled());

        let (rx, _) = controller.run_exchange(request(conversation.id, "plan the launch"));
        let events = collect(rx).await;

        let turns = store.list_turns(conversation.id).await.unwrap();
        let shape: Vec<(Role, Option<&str>)> = turns
            .iter()
            .map(|t| (t.role, t.tool_name.as_deref()))
            .collect();
        assert_eq!(
            shape,
            vec![
                (Role::User, None),
                (Role::Assistant, None),
                (Role::Tool, Some("create_task")),
                (Role::Tool, Some("create_calendar_event")),
                (Role::Assistant, None),
            ]
        );
        assert_eq!(turns[1].content, "On it.");
        assert_eq!(
            turns[3].content,
            "Event scheduled: Launch from 2024-05-01 10:00:00 to 2024-05-01 11:00:00"
        );

        let invoked: Vec<&str> = events
            .iter()
            .filter_map(|e| match e {
                ExchangeEvent::ToolInvoked { name, .. } => Some(name.as_str()),
                _ => None,
            })
            .collect();
        assert_eq!(invoked, vec!["create_task", "create_calendar_event"]);
        assert_eq!(store.events().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn retrieved_context_reaches_the_model_but_not_the_store() {
        let store = Arc::new(InMemoryStore::new());
        let conversation = store.create_conversation("Files").unwrap();
        let retriever = ContextRetriever::new(
            Arc::new(HashedEmbeddings::new(128)),
            Arc::new(InMemoryVectorIndex::default()),
        );
        let mut metadata = Metadata::new();
        metadata.insert("filename".into(), json!("wifi.txt"));
        retriever
            .ingest("The office wifi password is hunter2", metadata, "default")
            .await;

        let client = Arc::new(ScriptedChatClient::new(Vec::new()));
        let controller = controller(store.clone(), client.clone(), retriever);

        let (rx, _) = controller.run_exchange(request(conversation.id, "what is the wifi password"));
        collect(rx).await;

        let prompt_user = client.seen.lock().unwrap()[0][1].clone();
        assert!(prompt_user.content.starts_with("\nRELEVANT CONTEXT FROM FILES/MEMORY:\n[1] "));
        assert!(prompt_user.content.contains("(Source: wifi.txt)"));
        assert!(prompt_user
            .content
            .ends_with("END CONTEXT\n\n\nUser Query: what is the wifi password"));

        let turns = store.list_turns(conversation.id).await.unwrap();
        assert_eq!(turns[0].content, "what is the wifi password");
    }

    #[tokio::test]
    async fn dropped_receiver_does_not_persist_the_inflight_turn() {
        let store = Arc::new(InMemoryStore::new());
        let conversation = store.create_conversation("Gone").unwrap();
        let client = Arc::new(ScriptedChatClient::new(vec![Reply::Stall(vec![
            ModelChunk::text("Thinking"),
        ])]));
        let controller = controller(store.clone(), client, ContextRetriever::disabled());

        let (mut rx, handle) = controller.run_exchange(request(conversation.id, "long question"));
        assert_eq!(
            rx.recv().await,
            Some(ExchangeEvent::Content {
                text: "Thinking".into()
            })
        );
        drop(rx);
        handle.await.unwrap();

        assert_eq!(roles(&store, conversation.id).await, vec![Role::User]);
    }

    /// Accepts user and tool turns, rejects assistant turns.
    struct AssistantWritesFail(InMemoryStore);

    #[async_trait]
    impl DataStore for AssistantWritesFail {
        async fn append_turn(
            &self,
            conversation_id: i64,
            role: Role,
            content: &str,
            tool_name: Option<&str>,
        ) -> anyhow::Result<ConversationTurn> {
            if role == Role::Assistant {
                return Err(anyhow!("database is locked"));
            }
            self.0
                .append_turn(conversation_id, role, content, tool_name)
                .await
        }

        async fn list_turns(&self, conversation_id: i64) -> anyhow::Result<Vec<ConversationTurn>> {
            self.0.list_turns(conversation_id).await
        }

        async fn get_conversation(&self, id: i64) -> anyhow::Result<Option<Conversation>> {
            self.0.get_conversation(id).await
        }

        async fn create_task(&self, task: NewTask) -> anyhow::Result<Task> {
            self.0.create_task(task).await
        }

        async fn create_event(&self, event: NewEvent) -> anyhow::Result<CalendarEvent> {
            self.0.create_event(event).await
        }

        async fn load_core_memories(&self) -> anyhow::Result<Vec<CoreMemory>> {
            self.0.load_core_memories().await
        }

        async fn resolve_project_by_name(&self, name: &str) -> anyhow::Result<Option<Project>> {
            self.0.resolve_project_by_name(name).await
        }
    }

    #[tokio::test]
    async fn persistence_failure_ends_with_an_error_event() {
        let store = Arc::new(AssistantWritesFail(InMemoryStore::new()));
        let client = Arc::new(ScriptedChatClient::new(vec![Reply::Chunks(vec![
            ModelChunk::text("Hi there"),
        ])]));
        let controller = controller(store.clone(), client, ContextRetriever::disabled());

        let (rx, _) = controller.run_exchange(request(1, "hi"));
        let events = collect(rx).await;

        assert_eq!(events.len(), 2);
        assert_eq!(
            events[0],
            ExchangeEvent::Content {
                text: "Hi there".into()
            }
        );
        match &events[1] {
            ExchangeEvent::Error { message } => assert!(message.contains("database is locked")),
            other => panic!("expected error event, got {other:?}"),
        }
        assert!(events[1].is_terminal());
    }

    #[test]
    fn events_serialize_with_a_type_tag() {
        let event = ExchangeEvent::ToolInvoked {
            name: "create_task".into(),
            result: "ok".into(),
            is_error: false,
        };
        let value = serde_json::to_value(&event).unwrap();
        assert_eq!(value["type"], "tool_invoked");
        assert_eq!(value["is_error"], false);
        assert_eq!(
            serde_json::to_value(ExchangeEvent::TurnComplete).unwrap(),
            json!({ "type": "turn_complete" })
        );
    }
}
