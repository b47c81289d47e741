use std::collections::BTreeMap;
use std::env;
use std::pin::Pin;
use std::sync::Arc;

use anyhow::Context;
use async_openai::types::{
    ChatCompletionMessageToolCallChunk, ChatCompletionRequestAssistantMessageArgs,
    ChatCompletionRequestMessage, ChatCompletionRequestSystemMessageArgs,
    ChatCompletionRequestToolMessageArgs, ChatCompletionRequestUserMessageArgs,
    ChatCompletionResponseStream, ChatCompletionTool, ChatCompletionToolArgs,
    ChatCompletionToolType, CreateChatCompletionRequestArgs, CreateChatCompletionStreamResponse,
    FinishReason, FunctionObjectArgs,
};
use async_openai::{config::OpenAIConfig, Client as AsyncOpenAiClient};
use async_trait::async_trait;
use futures::{stream, Stream, StreamExt};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use tracing::{instrument, warn};

use crate::tools::ToolDefinition;

pub type SharedChatClient = Arc<dyn ChatStreamClient>;

/// Incremental output of one model call.
pub type ModelStream = Pin<Box<dyn Stream<Item = anyhow::Result<ModelChunk>> + Send>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ChatRole {
    System,
    User,
    Assistant,
    Tool,
}

/// Message as sent to the model.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatMessage {
    pub role: ChatRole,
    pub content: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl ChatMessage {
    pub fn system(content: impl Into<String>) -> Self {
        Self::new(ChatRole::System, content)
    }

    pub fn user(content: impl Into<String>) -> Self {
        Self::new(ChatRole::User, content)
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self::new(ChatRole::Assistant, content)
    }

    pub fn tool(name: impl Into<String>, content: impl Into<String>) -> Self {
        Self {
            role: ChatRole::Tool,
            content: content.into(),
            name: Some(name.into()),
        }
    }

    fn new(role: ChatRole, content: impl Into<String>) -> Self {
        Self {
            role,
            content: content.into(),
            name: None,
        }
    }
}

/// A complete tool invocation requested by the model.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolCallRequest {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    pub name: String,
    #[serde(default)]
    pub arguments: Map<String, Value>,
}

#[cfg(test)]
impl ToolCallRequest {
    pub fn new(name: impl Into<String>, arguments: Map<String, Value>) -> Self {
        Self {
            id: None,
            name: name.into(),
            arguments,
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct ModelChunk {
    pub content: Option<String>,
    pub tool_calls: Vec<ToolCallRequest>,
}

impl ModelChunk {
    pub fn text(content: impl Into<String>) -> Self {
        Self {
            content: Some(content.into()),
            tool_calls: Vec::new(),
        }
    }

    pub fn tool_calls(tool_calls: Vec<ToolCallRequest>) -> Self {
        Self {
            content: None,
            tool_calls,
        }
    }

    fn is_empty(&self) -> bool {
        self.content.as_deref().is_none_or(str::is_empty) && self.tool_calls.is_empty()
    }
}

#[async_trait]
pub trait ChatStreamClient: Send + Sync {
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> anyhow::Result<ModelStream>;
}

/// Offline stand-in that streams the last user message back word by word.
#[derive(Debug, Default, Clone)]
pub struct EchoChatClient;

impl EchoChatClient {
    pub fn shared() -> SharedChatClient {
        Arc::new(Self)
    }
}

#[async_trait]
impl ChatStreamClient for EchoChatClient {
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        _tools: &[ToolDefinition],
    ) -> anyhow::Result<ModelStream> {
        let prompt = messages
            .iter()
            .rev()
            .find(|message| message.role == ChatRole::User)
            .map(|message| message.content.clone())
            .unwrap_or_default();

        let reply = format!("[stubbed response] I received: {prompt}");
        let fragments: Vec<anyhow::Result<ModelChunk>> = reply
            .split_inclusive(' ')
            .map(|word| Ok(ModelChunk::text(word)))
            .collect();

        Ok(Box::pin(stream::iter(fragments)))
    }
}

#[derive(Debug, Clone)]
pub struct ChatModelConfig {
    pub api_key: String,
    pub base_url: Option<String>,
    pub model: String,
    pub temperature: f32,
}

impl ChatModelConfig {
    const API_KEY_VARS: [&'static str; 2] = ["JARVIS_LLM_API_KEY", "OPENAI_API_KEY"];
    const BASE_URL_VARS: [&'static str; 2] = ["JARVIS_LLM_BASE_URL", "OPENAI_BASE_URL"];
    const MODEL_VARS: [&'static str; 2] = ["JARVIS_LLM_MODEL", "LLM_MODEL"];
    const DEFAULT_MODEL: &'static str = "qwen3:4b";
    const DEFAULT_BASE_URL: &'static str = "http://localhost:11434/v1";

    pub fn from_env() -> Self {
        Self {
            api_key: read_env(&Self::API_KEY_VARS).unwrap_or_else(|| "ollama".to_string()),
            base_url: read_env(&Self::BASE_URL_VARS)
                .or_else(|| Some(Self::DEFAULT_BASE_URL.to_string())),
            model: read_env(&Self::MODEL_VARS).unwrap_or_else(|| Self::DEFAULT_MODEL.to_string()),
            temperature: 0.2,
        }
    }
}

fn read_env(candidates: &[&'static str]) -> Option<String> {
    candidates
        .iter()
        .find_map(|key| env::var(key).ok().filter(|value| !value.trim().is_empty()))
}

/// OpenAI-compatible streaming client; works against OpenAI, Ollama's `/v1`, vLLM and friends.
///
/// Replayed history carries only tool names: tool messages use the tool name as
/// `tool_call_id` and assistant messages are sent without `tool_calls`. Endpoints that
/// validate call ids strictly (OpenAI itself) reject the follow-up request after a tool call;
/// Ollama and vLLM accept it.
pub struct OpenAiChatClient {
    client: AsyncOpenAiClient<OpenAIConfig>,
    model: String,
    temperature: f32,
}

impl OpenAiChatClient {
    pub fn from_config(config: &ChatModelConfig) -> Self {
        let mut openai_config = OpenAIConfig::new().with_api_key(config.api_key.clone());
        if let Some(base_url) = &config.base_url {
            openai_config = openai_config.with_api_base(base_url.clone());
        }

        Self {
            client: AsyncOpenAiClient::with_config(openai_config),
            model: config.model.clone(),
            temperature: config.temperature,
        }
    }

    pub fn shared_from_env() -> SharedChatClient {
        Arc::new(Self::from_config(&ChatModelConfig::from_env()))
    }

    fn request_messages(
        messages: &[ChatMessage],
    ) -> anyhow::Result<Vec<ChatCompletionRequestMessage>> {
        messages
            .iter()
            .map(|message| {
                let converted: ChatCompletionRequestMessage = match message.role {
                    ChatRole::System => ChatCompletionRequestSystemMessageArgs::default()
                        .content(message.content.as_str())
                        .build()?
                        .into(),
                    ChatRole::User => ChatCompletionRequestUserMessageArgs::default()
                        .content(message.content.as_str())
                        .build()?
                        .into(),
                    ChatRole::Assistant => ChatCompletionRequestAssistantMessageArgs::default()
                        .content(message.content.as_str())
                        .build()?
                        .into(),
                    // History only records the tool name, so it doubles as the call id.
                    ChatRole::Tool => ChatCompletionRequestToolMessageArgs::default()
                        .content(message.content.as_str())
                        .tool_call_id(message.name.clone().unwrap_or_default())
                        .build()?
                        .into(),
                };
                Ok(converted)
            })
            .collect()
    }

    fn request_tools(tools: &[ToolDefinition]) -> anyhow::Result<Vec<ChatCompletionTool>> {
        tools
            .iter()
            .map(|tool| {
                let function = FunctionObjectArgs::default()
                    .name(tool.name)
                    .description(tool.description)
                    .parameters(tool.parameters_schema())
                    .build()?;
                Ok(ChatCompletionToolArgs::default()
                    .r#type(ChatCompletionToolType::Function)
                    .function(function)
                    .build()?)
            })
            .collect()
    }
}

#[async_trait]
impl ChatStreamClient for OpenAiChatClient {
    #[instrument(level = "debug", skip_all, fields(model = %self.model, messages = messages.len()))]
    async fn stream_chat(
        &self,
        messages: &[ChatMessage],
        tools: &[ToolDefinition],
    ) -> anyhow::Result<ModelStream> {
        let mut builder = CreateChatCompletionRequestArgs::default();
        builder
            .model(&self.model)
            .temperature(self.temperature)
            .messages(Self::request_messages(messages)?);
        if !tools.is_empty() {
            builder.tools(Self::request_tools(tools)?);
        }
        let request = builder.build()?;

        let inner = self
            .client
            .chat()
            .create_stream(request)
            .await
            .context("Chat completion stream request failed")?;

        Ok(assemble_stream(inner))
    }
}

/// Tool-call fragments keyed by their index in the response.
#[derive(Debug, Default)]
struct PendingToolCalls {
    calls: BTreeMap<i32, PartialToolCall>,
}

#[derive(Debug, Default)]
struct PartialToolCall {
    id: Option<String>,
    name: String,
    arguments: String,
}

impl PendingToolCalls {
    fn absorb(&mut self, chunk: ChatCompletionMessageToolCallChunk) {
        let entry = self.calls.entry(chunk.index).or_default();
        if let Some(id) = chunk.id {
            entry.id = Some(id);
        }
        if let Some(function) = chunk.function {
            if let Some(name) = function.name {
                entry.name.push_str(&name);
            }
            if let Some(arguments) = function.arguments {
                entry.arguments.push_str(&arguments);
            }
        }
    }

    fn drain(&mut self) -> Vec<ToolCallRequest> {
        std::mem::take(&mut self.calls)
            .into_values()
            .filter(|call| !call.name.is_empty())
            .map(|call| ToolCallRequest {
                id: call.id,
                arguments: parse_arguments(&call.name, &call.arguments),
                name: call.name,
            })
            .collect()
    }
}

/// Unparseable arguments degrade to an empty mapping so the tool reports what is missing.
fn parse_arguments(tool: &str, raw: &str) -> Map<String, Value> {
    if raw.trim().is_empty() {
        return Map::new();
    }

    match serde_json::from_str::<Value>(raw) {
        Ok(Value::Object(map)) => map,
        Ok(other) => {
            warn!(tool, %other, "Tool call arguments were not a JSON object");
            Map::new()
        }
        Err(err) => {
            warn!(tool, %err, raw, "Tool call arguments were not valid JSON");
            Map::new()
        }
    }
}

struct AssemblyState {
    inner: ChatCompletionResponseStream,
    pending: PendingToolCalls,
    finished: bool,
}

impl AssemblyState {
    fn absorb(&mut self, response: CreateChatCompletionStreamResponse) -> ModelChunk {
        let mut chunk = ModelChunk::default();
        let Some(choice) = response.choices.into_iter().next() else {
            return chunk;
        };

        chunk.content = choice.delta.content.filter(|content| !content.is_empty());
        for call in choice.delta.tool_calls.unwrap_or_default() {
            self.pending.absorb(call);
        }
        if matches!(choice.finish_reason, Some(FinishReason::ToolCalls)) {
            chunk.tool_calls = self.pending.drain();
        }

        chunk
    }
}

/// Folds provider deltas into content fragments plus complete tool calls.
fn assemble_stream(inner: ChatCompletionResponseStream) -> ModelStream {
    let state = AssemblyState {
        inner,
        pending: PendingToolCalls::default(),
        finished: false,
    };

    let assembled = stream::unfold(state, |mut state| async move {
        if state.finished {
            return None;
        }

        loop {
            match state.inner.next().await {
                Some(Ok(response)) => {
                    let chunk = state.absorb(response);
                    if !chunk.is_empty() {
                        return Some((Ok(chunk), state));
                    }
                }
                Some(Err(err)) => {
                    state.finished = true;
                    let err = anyhow::Error::new(err).context("Chat completion stream failed");
                    return Some((Err(err), state));
                }
                None => {
                    state.finished = true;
                    let leftovers = state.pending.drain();
                    if leftovers.is_empty() {
                        return None;
                    }
                    return Some((Ok(ModelChunk::tool_calls(leftovers)), state));
                }
            }
        }
    });

    Box::pin(assembled)
}

/// Attempt to build the OpenAI-compatible client, optionally substituting the echo client.
pub fn build_chat_client(use_echo: bool) -> SharedChatClient {
    if use_echo {
        warn!("Using EchoChatClient; responses are stubbed");
        return EchoChatClient::shared();
    }

    OpenAiChatClient::shared_from_env()
}
