pub mod conversation_store;
pub mod migrations;
pub mod task_store;

pub use conversation_store::{ConversationStore, ConversationTurn, SqliteConversationStore};
pub use task_store::{
    NewTask, Priority, SqliteTaskStore, Task, TaskFilter, TaskPatch, TaskStore,
};
