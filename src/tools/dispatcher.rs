use std::sync::Arc;

use serde_json::{Map, Value};
use tracing::{info, instrument, warn};

use crate::store::SharedDataStore;

use super::definition::{ParamSpec, ParamType, ToolDefinition};
use super::handlers::{self, ToolError};

/// Every failed execution starts with this; successful results never do.
pub const ERROR_PREFIX: &str = "Error";

pub type SharedToolDispatcher = Arc<ToolDispatcher>;

static CREATE_TASK: ToolDefinition = ToolDefinition {
    name: "create_task",
    description: "Create a new task in the Kanban board",
    parameters: &[
        ParamSpec::required("title", ParamType::String, "Title of the task"),
        ParamSpec::optional("priority", ParamType::String, "Priority level")
            .one_of(&["low", "med", "high"]),
        ParamSpec::optional("tag", ParamType::String, "Tag like DEV, BUG, GEN"),
        ParamSpec::optional("description", ParamType::String, "Detailed description"),
    ],
};

static CREATE_CALENDAR_EVENT: ToolDefinition = ToolDefinition {
    name: "create_calendar_event",
    description: "Schedule a new event on the calendar",
    parameters: &[
        ParamSpec::required("title", ParamType::String, "Event title"),
        ParamSpec::required(
            "start_time",
            ParamType::String,
            "Start time in ISO format (YYYY-MM-DDTHH:MM:SS)",
        ),
        ParamSpec::required("end_time", ParamType::String, "End time in ISO format"),
        ParamSpec::optional("description", ParamType::String, "Event details"),
    ],
};

/// Closed set of callable tools; each variant owns one definition and one handler.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Tool {
    CreateTask,
    CreateCalendarEvent,
}

impl Tool {
    pub const ALL: [Tool; 2] = [Tool::CreateTask, Tool::CreateCalendarEvent];

    pub fn definition(self) -> &'static ToolDefinition {
        match self {
            Tool::CreateTask => &CREATE_TASK,
            Tool::CreateCalendarEvent => &CREATE_CALENDAR_EVENT,
        }
    }

    pub fn name(self) -> &'static str {
        self.definition().name
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL.into_iter().find(|tool| tool.name() == name)
    }

    async fn run(
        self,
        dispatcher: &ToolDispatcher,
        args: &Map<String, Value>,
    ) -> Result<String, ToolError> {
        let store = dispatcher.store.as_ref();
        match self {
            Tool::CreateTask => handlers::create_task(store, args).await,
            Tool::CreateCalendarEvent => handlers::create_calendar_event(store, args).await,
        }
    }
}

/// Validates and executes model-requested tools against application state.
pub struct ToolDispatcher {
    store: SharedDataStore,
}

impl ToolDispatcher {
    pub fn new(store: SharedDataStore) -> Self {
        Self { store }
    }

    pub fn schema(&self) -> Vec<ToolDefinition> {
        Tool::ALL
            .iter()
            .map(|tool| tool.definition().clone())
            .collect()
    }

    /// Runs one tool; failures come back as text so the conversation keeps going.
    #[instrument(skip_all, fields(tool = %name))]
    pub async fn execute(&self, name: &str, args: &Map<String, Value>) -> String {
        let Some(tool) = Tool::from_name(name) else {
            warn!("Model requested an unknown tool");
            return format!("{ERROR_PREFIX}: Tool {name} not found");
        };

        match tool.run(self, args).await {
            Ok(result) => {
                info!(%result, "Tool executed");
                result
            }
            Err(err) => {
                warn!(%err, "Tool execution failed");
                format!("{ERROR_PREFIX} executing tool {name}: {err}")
            }
        }
    }
}

pub fn is_error_result(result: &str) -> bool {
    result.starts_with(ERROR_PREFIX)
}
