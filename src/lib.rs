pub mod api;
pub mod channel;
pub mod config;
pub mod error;
pub mod snapshot;
pub mod store;
pub mod sync;
pub mod typing;
pub mod utils;

pub use config::AppConfig;
pub use error::{Result, SyncError};
pub use store::ConversationStore;
pub use sync::{Command, Notice, Subscription, SyncEngine, SyncSettings};
