pub mod definition;
pub mod dispatcher;
pub mod handlers;

pub use definition::ToolDefinition;
pub use dispatcher::{is_error_result, SharedToolDispatcher, ToolDispatcher};
