use chrono::NaiveDateTime;

use crate::llm_client::ChatMessage;
use crate::store::{ConversationTurn, CoreMemory, Role};

const TIMESTAMP_FORMAT: &str = "%Y-%m-%d %H:%M:%S";

/// System instructions for one session: persona, current time and the user's core memories.
pub fn system_prompt(now: NaiveDateTime, memories: &[CoreMemory]) -> String {
    let memory_block = if memories.is_empty() {
        "No core memories set.".to_string()
    } else {
        memories
            .iter()
            .map(|memory| format!("- [{}] {}", memory.category.to_uppercase(), memory.content))
            .collect::<Vec<_>>()
            .join("\n")
    };

    format!(
        "You are Jarvis, a personal assistant with access to the user's projects, tasks, \
         calendar and files.\n\
         Current time: {}\n\n\
         CORE MEMORIES:\n{}\n\n\
         Use the relevant context when it is provided. When the user asks you to remember \
         something to do, call create_task. When the user asks to schedule something, call \
         create_calendar_event with ISO-8601 timestamps. Keep answers concise.",
        now.format(TIMESTAMP_FORMAT),
        memory_block
    )
}

/// Content sent in place of the last user turn when retrieval produced context.
pub fn augment_with_context(context: &str, utterance: &str) -> String {
    format!("{context}\n\nUser Query: {utterance}")
}

/// Materialize persisted history into the model's message list.
///
/// Pure: the same inputs always produce the same messages. The context block is applied only
/// when the final turn is a user turn; stored content is never rewritten.
pub fn build_messages(
    system_prompt: &str,
    history: &[ConversationTurn],
    context: Option<&str>,
) -> Vec<ChatMessage> {
    let mut messages = Vec::with_capacity(history.len() + 1);
    messages.push(ChatMessage::system(system_prompt));

    let last = history.len().checked_sub(1);
    for (position, turn) in history.iter().enumerate() {
        let message = match turn.role {
            Role::User => match context {
                Some(context) if Some(position) == last => {
                    ChatMessage::user(augment_with_context(context, &turn.content))
                }
                _ => ChatMessage::user(turn.content.clone()),
            },
            Role::Assistant => ChatMessage::assistant(turn.content.clone()),
            Role::Tool => ChatMessage::tool(
                turn.tool_name.clone().unwrap_or_default(),
                turn.content.clone(),
            ),
        };
        messages.push(message);
    }

    messages
}
