use std::sync::Arc;

use crate::chat::profile::ProfileDirectory;
use crate::chat::{Dispatcher, DispatcherHandle, MessageStore};
use crate::config::ChatConfig;

/// Shared application state passed to all handlers via axum State extractor.
#[derive(Clone)]
pub struct AppState {
    /// Front door to the dispatcher actor
    pub dispatcher: DispatcherHandle,
    /// Message history, read by the history endpoints
    pub store: Arc<dyn MessageStore>,
    /// Sender names and avatars stamped onto outbound messages
    pub profiles: ProfileDirectory,
    /// JWT signing secret (256-bit random key)
    pub jwt_secret: Vec<u8>,
    /// Chat core limits
    pub chat: Arc<ChatConfig>,
}

impl AppState {
    /// Spawn the dispatcher and assemble the shared state. Must be called
    /// inside a tokio runtime.
    pub fn new(chat: ChatConfig, store: Arc<dyn MessageStore>, jwt_secret: Vec<u8>) -> Self {
        let dispatcher = Dispatcher::spawn(&chat, store.clone());
        Self {
            dispatcher,
            store,
            profiles: ProfileDirectory::new(),
            jwt_secret,
            chat: Arc::new(chat),
        }
    }
}
