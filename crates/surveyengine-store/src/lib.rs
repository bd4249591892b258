pub mod chatlog;
pub mod conversation;
pub mod host;
pub mod template;

pub use chatlog::ChatLogWriter;
pub use conversation::ConversationStore;
pub use host::{HostStore, SqliteHostLoader};
pub use template::{FileTemplateLoader, TemplateStore};
