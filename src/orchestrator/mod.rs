pub mod exchange;
pub mod prompt;
pub mod session;

pub use exchange::{ExchangeController, ExchangeEvent};
pub use session::ChatSession;
