use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::time::Instant;
use tracing::{debug, warn};

use crate::connection::{ChannelEvent, ConnectionManager, ConnectionState};
use crate::error::ChatError;
use crate::events::{ClientEvent, ServerEvent};
use crate::history::HistoryApi;
use crate::types::{Attachment, ConversationKey, Message, Pagination, SenderType};

/// Two messages with matching content closer together than this are treated
/// as the same message arriving over two channels.
pub const DEDUP_WINDOW_MS: i64 = 1000;

/// A received "is typing" indicator auto-clears after this long if no stop
/// event arrives.
pub const TYPING_EXPIRY: Duration = Duration::from_secs(10);

/// Window for matching a save confirmation against the pending local send
/// when the confirmation carries no id we know yet.
const SAVE_MATCH_WINDOW_MS: i64 = 5000;

/// Duplicate rule: matching non-empty ids, or matching text, sender, and
/// conversation with timestamps inside the dedup window. The second arm
/// covers a locally-sent message arriving once via the save confirmation
/// and again via the broadcast event before the server assigned it an id.
pub fn is_duplicate(a: &Message, b: &Message) -> bool {
    if let (Some(a_id), Some(b_id)) = (a.id.as_deref(), b.id.as_deref()) {
        if !a_id.is_empty() && a_id == b_id {
            return true;
        }
    }
    a.text == b.text
        && a.sender_type == b.sender_type
        && a.contact_id == b.contact_id
        && a.estimate_id == b.estimate_id
        && (a.created_at - b.created_at)
            .num_milliseconds()
            .abs()
            < DEDUP_WINDOW_MS
}

#[derive(Debug, Clone)]
struct PendingSend {
    text: String,
    sent_at: DateTime<Utc>,
}

fn confirms_pending(pending: &PendingSend, msg: &Message) -> bool {
    msg.sender_type == SenderType::User
        && msg.text == pending.text
        && (msg.created_at - pending.sent_at)
            .num_milliseconds()
            .abs()
            < SAVE_MATCH_WINDOW_MS
}

#[derive(Debug, Default)]
struct SessionState {
    key: Option<ConversationKey>,
    /// Bumped on every conversation switch; an in-flight fetch commits its
    /// result only if the generation it captured is still current.
    generation: u64,
    messages: Vec<Message>,
    pagination: Pagination,
    loading_history: bool,
    loading_more: bool,
    sending: bool,
    pending_send: Option<PendingSend>,
    typing_until: Option<Instant>,
    last_error: Option<ChatError>,
}

impl SessionState {
    fn reset(&mut self) {
        self.key = None;
        self.messages.clear();
        self.pagination = Pagination::default();
        self.loading_history = false;
        self.loading_more = false;
        self.sending = false;
        self.pending_send = None;
        self.typing_until = None;
        self.last_error = None;
    }
}

/// Holds the ordered, deduplicated message list for the one active
/// conversation, merging paginated history, realtime pushes, and local
/// sends. All mutation goes through these operations; nothing else touches
/// the list, which is what keeps the dedup and ordering invariants
/// enforceable.
pub struct ConversationStore {
    conn: Arc<ConnectionManager>,
    history: Arc<dyn HistoryApi>,
    page_size: u32,
    max_messages: usize,
    state: Mutex<SessionState>,
}

impl ConversationStore {
    pub fn new(
        conn: Arc<ConnectionManager>,
        history: Arc<dyn HistoryApi>,
        page_size: u32,
        max_messages: usize,
    ) -> Self {
        Self {
            conn,
            history,
            page_size,
            max_messages,
            state: Mutex::new(SessionState::default()),
        }
    }

    /// Switch to a conversation: clears all local state (messages, typing,
    /// pagination, in-flight markers) and fetches the first history page.
    /// A fetch still in flight for the previous conversation commits
    /// nothing once this returns.
    pub async fn open_conversation(
        &self,
        contact_id: impl Into<String>,
        estimate_id: Option<String>,
    ) -> Result<(), ChatError> {
        let key = ConversationKey::new(contact_id, estimate_id);
        let generation = {
            let mut s = self.state.lock().expect("conversation state poisoned");
            s.reset();
            s.generation += 1;
            s.key = Some(key.clone());
            s.loading_history = true;
            s.generation
        };

        let result = self
            .history
            .fetch_messages(&key.contact_id, key.estimate_id.as_deref(), 1, self.page_size)
            .await;

        let mut s = self.state.lock().expect("conversation state poisoned");
        if s.generation != generation {
            debug!("discarding stale history fetch for {:?}", key);
            return Ok(());
        }
        s.loading_history = false;
        match result {
            Ok(page) => {
                s.messages = sorted_page(page.data);
                s.pagination = page.pagination;
                Ok(())
            }
            Err(err) => {
                s.messages.clear();
                s.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Fetch the next older page and prepend it. Returns `Ok(false)` when
    /// nothing was requested: a load is already running, the initial load
    /// has not finished, or no more pages exist.
    pub async fn load_more(&self) -> Result<bool, ChatError> {
        let (generation, key, next_page) = {
            let mut s = self.state.lock().expect("conversation state poisoned");
            let Some(key) = s.key.clone() else {
                return Ok(false);
            };
            if s.loading_more || s.loading_history || !s.pagination.has_more() {
                return Ok(false);
            }
            s.loading_more = true;
            (s.generation, key, s.pagination.page + 1)
        };

        let result = self
            .history
            .fetch_messages(
                &key.contact_id,
                key.estimate_id.as_deref(),
                next_page,
                self.page_size,
            )
            .await;

        let mut s = self.state.lock().expect("conversation state poisoned");
        if s.generation != generation {
            debug!("discarding stale page fetch for {:?}", key);
            return Ok(false);
        }
        s.loading_more = false;
        match result {
            Ok(page) => {
                let total = page.pagination.total;
                merge_older(&mut s.messages, page.data);
                s.pagination.page = next_page;
                s.pagination.total = total;
                Ok(true)
            }
            Err(err) => {
                s.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Emit a user message over the realtime channel. Returns `Ok(false)`
    /// without emitting when the body is blank with no attachments, when a
    /// send is already in flight, or when no conversation is open. The
    /// message itself joins the list only via the server's save
    /// confirmation; there is no optimistic local insertion.
    pub async fn send_message(
        &self,
        text: &str,
        attachments: Vec<Attachment>,
    ) -> Result<bool, ChatError> {
        let event = {
            let mut s = self.state.lock().expect("conversation state poisoned");
            let Some(key) = s.key.clone() else {
                return Ok(false);
            };
            if s.sending {
                return Ok(false);
            }
            if text.trim().is_empty() && attachments.is_empty() {
                return Ok(false);
            }
            s.sending = true;
            s.pending_send = Some(PendingSend {
                text: text.to_string(),
                sent_at: Utc::now(),
            });
            ClientEvent::UserMessage {
                text: text.to_string(),
                attachments,
                contact_id: key.contact_id,
                estimate_id: key.estimate_id,
            }
        };

        match self.conn.emit(event).await {
            Ok(()) => Ok(true),
            Err(err) => {
                let mut s = self.state.lock().expect("conversation state poisoned");
                s.sending = false;
                s.pending_send = None;
                s.last_error = Some(err.clone());
                Err(err)
            }
        }
    }

    /// Tell the remote side we started typing.
    pub async fn start_typing(&self) -> Result<(), ChatError> {
        self.emit_typing(true).await
    }

    /// Tell the remote side we stopped typing.
    pub async fn stop_typing(&self) -> Result<(), ChatError> {
        self.emit_typing(false).await
    }

    async fn emit_typing(&self, start: bool) -> Result<(), ChatError> {
        let key = {
            let s = self.state.lock().expect("conversation state poisoned");
            match s.key.clone() {
                Some(key) => key,
                None => return Ok(()),
            }
        };
        let event = if start {
            ClientEvent::TypingStart {
                contact_id: key.contact_id,
                estimate_id: key.estimate_id,
            }
        } else {
            ClientEvent::TypingStop {
                contact_id: key.contact_id,
                estimate_id: key.estimate_id,
            }
        };
        self.conn.emit(event).await
    }

    /// Single dispatch point for everything arriving off the realtime
    /// channel.
    pub fn handle_event(&self, event: ChannelEvent) {
        let mut s = self.state.lock().expect("conversation state poisoned");
        match event {
            ChannelEvent::Server(ServerEvent::AiMessage(msg)) => {
                let Some(key) = s.key.clone() else { return };
                if !msg.belongs_to(&key) {
                    return;
                }
                // The assistant replying supersedes its typing indicator.
                s.typing_until = None;
                append_live(&mut s, msg, self.max_messages);
            }
            ChannelEvent::Server(ServerEvent::MessageSaved(msg)) => {
                let Some(key) = s.key.clone() else { return };
                if !msg.belongs_to(&key) {
                    return;
                }
                let confirmed = s
                    .pending_send
                    .as_ref()
                    .map(|p| confirms_pending(p, &msg))
                    .unwrap_or(false);
                if confirmed {
                    s.sending = false;
                    s.pending_send = None;
                }
                append_live(&mut s, msg, self.max_messages);
            }
            ChannelEvent::Server(ServerEvent::UserTyping(evt)) => {
                let Some(key) = s.key.clone() else { return };
                if evt.contact_id != key.contact_id || evt.estimate_id != key.estimate_id {
                    return;
                }
                s.typing_until = if evt.is_typing {
                    Some(Instant::now() + TYPING_EXPIRY)
                } else {
                    None
                };
            }
            ChannelEvent::Server(ServerEvent::ChannelError(payload)) => {
                warn!("realtime channel error: {payload}");
                s.sending = false;
                s.pending_send = None;
                s.typing_until = None;
                s.last_error = Some(ChatError::Request(payload.to_string()));
            }
            ChannelEvent::State(state) => {
                // Losing the channel clears transient UI state but never
                // the message list.
                if state != ConnectionState::Connected {
                    s.sending = false;
                    s.pending_send = None;
                    s.typing_until = None;
                }
            }
            ChannelEvent::Notice(_) => {}
        }
    }

    pub fn messages(&self) -> Vec<Message> {
        self.state
            .lock()
            .expect("conversation state poisoned")
            .messages
            .clone()
    }

    pub fn pagination(&self) -> Pagination {
        self.state
            .lock()
            .expect("conversation state poisoned")
            .pagination
    }

    pub fn conversation_key(&self) -> Option<ConversationKey> {
        self.state
            .lock()
            .expect("conversation state poisoned")
            .key
            .clone()
    }

    pub fn is_sending(&self) -> bool {
        self.state
            .lock()
            .expect("conversation state poisoned")
            .sending
    }

    /// Whether the remote party's typing indicator is currently live. The
    /// expiry deadline keeps a dropped stop event from leaving it stuck.
    pub fn is_typing(&self) -> bool {
        self.state
            .lock()
            .expect("conversation state poisoned")
            .typing_until
            .map(|deadline| Instant::now() < deadline)
            .unwrap_or(false)
    }

    pub fn is_loading_history(&self) -> bool {
        let s = self.state.lock().expect("conversation state poisoned");
        s.loading_history || s.loading_more
    }

    pub fn last_error(&self) -> Option<ChatError> {
        self.state
            .lock()
            .expect("conversation state poisoned")
            .last_error
            .clone()
    }
}

/// Sort one fetched page ascending by timestamp (stable, so arrival order
/// breaks ties) and drop in-page duplicates.
fn sorted_page(mut page: Vec<Message>) -> Vec<Message> {
    page.sort_by_key(|m| m.created_at);
    let mut out: Vec<Message> = Vec::with_capacity(page.len());
    for msg in page {
        if !out.iter().any(|existing| is_duplicate(existing, &msg)) {
            out.push(msg);
        }
    }
    out
}

/// Prepend an older page. Work stays proportional to the page size; the
/// existing list is never re-sorted.
fn merge_older(existing: &mut Vec<Message>, page: Vec<Message>) {
    let page = sorted_page(page);
    let fresh: Vec<Message> = page
        .into_iter()
        .filter(|msg| !existing.iter().any(|e| is_duplicate(e, msg)))
        .collect();
    existing.splice(0..0, fresh);
}

/// Append a realtime message (assumed newer than everything held) and
/// enforce the memory cap. Truncation removes only the oldest entries and
/// is skipped while a prepend is in flight.
fn append_live(s: &mut SessionState, msg: Message, max_messages: usize) {
    if s.messages.iter().any(|e| is_duplicate(e, &msg)) {
        return;
    }
    s.messages.push(msg);
    if !s.loading_more && s.messages.len() > max_messages {
        let excess = s.messages.len() - max_messages;
        s.messages.drain(0..excess);
    }
}
