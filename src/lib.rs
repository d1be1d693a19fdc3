pub mod config;
pub mod connection;
pub mod conversation;
pub mod error;
pub mod events;
pub mod history;
pub mod scroll;
pub mod transport;
pub mod types;

pub use config::Config;
pub use connection::{ChannelEvent, ConnectionManager, ConnectionState};
pub use conversation::ConversationStore;
pub use error::ChatError;
pub use scroll::ScrollReconciler;

use std::sync::Arc;

use tokio::sync::broadcast;
use tokio::task::JoinHandle;
use tracing::warn;

use crate::history::{HistoryApi, RestHistory};
use crate::transport::{Transport, WebSocketTransport};

/// Wires the realtime core together: one connection manager, one
/// conversation store, and the dispatch task that feeds channel events into
/// the store. Collaborators are constructor-injected so tests can supply
/// in-memory transports and history backends.
pub struct ChatClient {
    config: Config,
    pub connection: Arc<ConnectionManager>,
    pub conversation: Arc<ConversationStore>,
    dispatch: JoinHandle<()>,
}

impl ChatClient {
    pub fn new(config: Config) -> Self {
        let transport = Arc::new(WebSocketTransport::new(config.server.ws_url.clone()));
        let history = Arc::new(RestHistory::new(
            config.server.api_url.clone(),
            config.auth.token.clone(),
        ));
        Self::with_parts(config, transport, history)
    }

    pub fn with_parts(
        config: Config,
        transport: Arc<dyn Transport>,
        history: Arc<dyn HistoryApi>,
    ) -> Self {
        let connection = Arc::new(ConnectionManager::new(transport, config.reconnect.clone()));
        let conversation = Arc::new(ConversationStore::new(
            connection.clone(),
            history,
            config.chat.page_size,
            config.chat.max_messages,
        ));

        let mut rx = connection.subscribe();
        let store = conversation.clone();
        let dispatch = tokio::spawn(async move {
            loop {
                match rx.recv().await {
                    Ok(event) => store.handle_event(event),
                    Err(broadcast::error::RecvError::Lagged(skipped)) => {
                        warn!("event dispatch lagged, skipped {skipped} events");
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        });

        Self {
            config,
            connection,
            conversation,
            dispatch,
        }
    }

    /// Connect with the configured token. Returns `false` when no token is
    /// configured (token absence prevents connection) or when an attempt
    /// is already in flight.
    pub async fn start(&self) -> bool {
        match self.config.auth.token.clone() {
            Some(token) => self.connection.connect(token).await,
            None => {
                warn!("no auth token configured, refusing to connect");
                false
            }
        }
    }

    /// A scroll reconciler sized to the configured history page.
    pub fn scroll_reconciler(&self) -> ScrollReconciler {
        ScrollReconciler::new(self.config.chat.page_size as usize)
    }

    pub async fn shutdown(&self) {
        self.connection.disconnect().await;
        self.dispatch.abort();
    }
}
