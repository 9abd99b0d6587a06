//! Conversation state management.
//!
//! [`ConversationManager`] owns the authoritative message list and is the
//! only component that mutates it. Presentation subscribes to
//! [`ConversationState`] snapshots over a watch channel and calls the
//! manager's methods; the transport, store, and connectivity monitor are
//! injected collaborators.
//!
//! # Architecture
//!
//! - optimistic mutation first, remote sync second
//! - canned assistant replies keep the conversation coherent when the
//!   backend cannot answer
//! - transport failures become classified [`ErrorNotice`]s, never raw errors
//! - the loading flag is debounced so fast operations never flash it

use std::sync::{Arc, Mutex, MutexGuard, Weak};

use time::OffsetDateTime;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use crate::api::{ApiError, ChatTransport};
use crate::config::Config;
use crate::storage::MessageStore;
use crate::types::{
    ConnectionStatus, ConversationState, ErrorCategory, ErrorNotice, Message, ProbeOutcome,
};

// Canned assistant replies for degraded modes.
const OFFLINE_REPLY: &str = "You're currently offline. Your message has been saved and will be processed when you're back online.";
const UNAVAILABLE_REPLY: &str = "The medical assistant service is currently unavailable. Your message has been saved for later processing.";
const APOLOGY_REPLY: &str = "I'm sorry, I couldn't process your request right now. Your message has been saved, and I'll respond when the service is available again.";

// User-facing notices.
const OFFLINE_NOTICE: &str =
    "You're offline. Messages are saved locally and will sync when you're back online.";
const BACK_ONLINE_NOTICE: &str = "You're back online! Your messages will be synced to the server.";
const BACKEND_DOWN_NOTICE: &str =
    "Backend services are currently unavailable. Your messages are saved locally.";
const BACKEND_UNREACHABLE_NOTICE: &str =
    "Cannot connect to the medical assistant service. Working in offline mode.";
const LOAD_FAILED_NOTICE: &str =
    "Could not load your saved messages. Starting a fresh conversation.";
const HISTORY_FAILED_NOTICE: &str =
    "Could not retrieve your conversation history from the server. Using locally saved messages.";
const SEND_CONNECTION_NOTICE: &str =
    "Connection issue with the medical service. Your message is saved locally.";
const SEND_SERVER_NOTICE: &str =
    "The medical service is experiencing issues. Please try again later.";
const SEND_GENERAL_NOTICE: &str = "Could not process your request at this time.";

/// Time source for message ids and timestamps, injected so tests are
/// deterministic.
pub trait Clock: Send + Sync {
    fn now(&self) -> OffsetDateTime;
}

/// Wall-clock implementation used outside tests.
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> OffsetDateTime {
        OffsetDateTime::now_utc()
    }
}

enum DegradedMode {
    Offline,
    BackendUnavailable,
}

struct Inner {
    messages: Vec<Message>,
    loading: bool,
    error: Option<ErrorNotice>,
    network_online: bool,
    backend_available: bool,
    initialized: bool,
    send_in_flight: bool,
    error_epoch: u64,
    debounce_timer: Option<JoinHandle<()>>,
    error_clear_timer: Option<JoinHandle<()>>,
    status_task: Option<JoinHandle<()>>,
}

/// The conversation core. Construct with [`ConversationManager::new`], then
/// call [`initialize`](Self::initialize) once per session.
pub struct ConversationManager {
    transport: Arc<dyn ChatTransport>,
    store: MessageStore,
    clock: Arc<dyn Clock>,
    config: Config,
    state_tx: watch::Sender<ConversationState>,
    inner: Mutex<Inner>,
    weak_self: Weak<Self>,
}

impl ConversationManager {
    pub fn new(
        transport: Arc<dyn ChatTransport>,
        store: MessageStore,
        status_rx: watch::Receiver<ConnectionStatus>,
        clock: Arc<dyn Clock>,
        config: Config,
    ) -> Arc<Self> {
        let initial = *status_rx.borrow();
        let (state_tx, _) = watch::channel(ConversationState {
            network_online: initial.network_online,
            backend_available: initial.backend_available,
            ..ConversationState::default()
        });

        let manager = Arc::new_cyclic(|weak_self: &Weak<Self>| Self {
            transport,
            store,
            clock,
            config,
            state_tx,
            inner: Mutex::new(Inner {
                messages: Vec::new(),
                loading: false,
                error: None,
                network_online: initial.network_online,
                backend_available: initial.backend_available,
                initialized: false,
                send_in_flight: false,
                error_epoch: 0,
                debounce_timer: None,
                error_clear_timer: None,
                status_task: None,
            }),
            weak_self: weak_self.clone(),
        });

        let task = tokio::spawn(watch_status(manager.weak_self.clone(), status_rx));
        manager.lock().status_task = Some(task);
        manager
    }

    /// Subscription surface for presentation.
    pub fn subscribe(&self) -> watch::Receiver<ConversationState> {
        self.state_tx.subscribe()
    }

    /// Current snapshot, for callers that don't need change notifications.
    pub fn state(&self) -> ConversationState {
        self.state_tx.borrow().clone()
    }

    /// One-time session setup: persisted snapshot first so the UI has
    /// immediate content, then remote history if the backend is reachable.
    pub async fn initialize(&self) {
        {
            let mut inner = self.lock();
            if inner.initialized {
                return;
            }
            inner.initialized = true;
        }

        match self.store.load() {
            Ok(messages) => {
                if !messages.is_empty() {
                    let mut inner = self.lock();
                    inner.messages = messages;
                    self.publish_locked(&inner);
                }
            }
            Err(err) => {
                warn!(error = %err, "discarding saved conversation");
                let mut inner = self.lock();
                self.record_error_locked(
                    &mut inner,
                    ErrorNotice::new(LOAD_FAILED_NOTICE, ErrorCategory::General),
                );
                self.publish_locked(&inner);
            }
        }

        let reachable = {
            let inner = self.lock();
            inner.network_online && inner.backend_available
        };
        if !reachable {
            return;
        }

        self.begin_loading();
        match self.transport.fetch_history().await {
            Ok(remote) if !remote.is_empty() => {
                {
                    let mut inner = self.lock();
                    let local = std::mem::take(&mut inner.messages);
                    inner.messages = reconcile(local, remote);
                    self.publish_locked(&inner);
                }
                self.persist();
            }
            Ok(_) => {}
            Err(err) => {
                warn!(error = %err, "remote history unusable");
                let mut inner = self.lock();
                self.record_error_locked(
                    &mut inner,
                    ErrorNotice::new(HISTORY_FAILED_NOTICE, ErrorCategory::Server),
                );
                self.publish_locked(&inner);
            }
        }
        self.end_loading();
    }

    /// Send flow: optimistic user append, then either the canned
    /// degraded-mode reply or the backend's answer. Blank input and
    /// overlapping sends are ignored.
    pub async fn send_user_message(&self, text: &str) {
        let text = text.trim();
        if text.is_empty() {
            return;
        }

        let (temp_id, degraded) = {
            let mut inner = self.lock();
            if inner.send_in_flight {
                debug!("send already in flight, ignoring");
                return;
            }
            inner.send_in_flight = true;

            let now = self.clock.now();
            let temp_id = unix_millis(now);
            inner.messages.push(Message::user(temp_id, text, now));
            self.publish_locked(&inner);

            let degraded = if !inner.network_online {
                Some(DegradedMode::Offline)
            } else if !inner.backend_available {
                Some(DegradedMode::BackendUnavailable)
            } else {
                None
            };
            (temp_id, degraded)
        };
        self.persist();

        match degraded {
            Some(mode) => {
                // Simulated latency keeps the canned reply from landing in
                // the same frame as the user's message.
                tokio::time::sleep(self.config.degraded_reply_delay).await;
                let reply = match mode {
                    DegradedMode::Offline => OFFLINE_REPLY,
                    DegradedMode::BackendUnavailable => UNAVAILABLE_REPLY,
                };
                self.append_assistant(temp_id + 1, reply);
                self.persist();
            }
            None => {
                self.begin_loading();
                match self.transport.send_message(text).await {
                    Ok(response) => {
                        let id = response.message_id.unwrap_or(temp_id + 1);
                        self.append_assistant(id, response.message);
                        self.persist();
                    }
                    Err(err) => {
                        warn!(error = %err, "send failed");
                        {
                            let mut inner = self.lock();
                            self.record_error_locked(&mut inner, classify_send_error(&err));
                            self.publish_locked(&inner);
                        }
                        self.append_assistant(temp_id + 1, APOLOGY_REPLY);
                        self.persist();
                    }
                }
                self.end_loading();
            }
        }

        self.lock().send_in_flight = false;
    }

    /// Optimistic removal; the remote delete is best-effort and never
    /// restores the message.
    pub async fn remove_message(&self, id: i64) {
        let (reachable, removed) = {
            let mut inner = self.lock();
            let before = inner.messages.len();
            inner.messages.retain(|message| message.id != id);
            let removed = inner.messages.len() != before;
            if removed {
                self.publish_locked(&inner);
            }
            (inner.network_online && inner.backend_available, removed)
        };
        if removed {
            self.persist();
        }

        if reachable {
            if let Err(err) = self.transport.delete_message(id).await {
                warn!(error = %err, message_id = id, "server-side delete failed, keeping local removal");
            }
        }
    }

    /// Dismiss the current notice.
    pub fn clear_error(&self) {
        let mut inner = self.lock();
        if let Some(timer) = inner.error_clear_timer.take() {
            timer.abort();
        }
        if inner.error.take().is_some() {
            self.publish_locked(&inner);
        }
    }

    /// Start a new conversation: empty list, purged snapshot.
    pub fn clear_all_messages(&self) {
        {
            let mut inner = self.lock();
            inner.messages.clear();
            self.publish_locked(&inner);
        }
        if let Err(err) = self.store.clear() {
            warn!(error = %err, "failed to purge saved conversation");
        }
    }

    /// Cancel background tasks and pending timers. Dropping the manager
    /// does the same.
    pub fn shutdown(&self) {
        let mut inner = self.lock();
        for task in [
            inner.status_task.take(),
            inner.debounce_timer.take(),
            inner.error_clear_timer.take(),
        ]
        .into_iter()
        .flatten()
        {
            task.abort();
        }
    }

    fn lock(&self) -> MutexGuard<'_, Inner> {
        self.inner.lock().expect("conversation state poisoned")
    }

    fn publish_locked(&self, inner: &Inner) {
        self.state_tx.send_replace(ConversationState {
            messages: inner.messages.clone(),
            loading: inner.loading,
            error: inner.error.clone(),
            network_online: inner.network_online,
            backend_available: inner.backend_available,
        });
    }

    fn append_assistant(&self, id: i64, content: impl Into<String>) {
        let mut inner = self.lock();
        inner
            .messages
            .push(Message::assistant(id, content, self.clock.now()));
        self.publish_locked(&inner);
    }

    /// Mirror the list to disk. Persistence failures are diagnostics, never
    /// user-facing.
    fn persist(&self) {
        let messages = self.lock().messages.clone();
        if messages.is_empty() {
            return;
        }
        if let Err(err) = self.store.save(&messages) {
            warn!(error = %err, "failed to persist conversation");
        }
    }

    /// Record a notice, replacing any current one. `General`/`Input`
    /// notices auto-clear; availability notices persist until connectivity
    /// changes or the user dismisses them.
    fn record_error_locked(&self, inner: &mut Inner, notice: ErrorNotice) {
        let autoclear = matches!(
            notice.category,
            ErrorCategory::General | ErrorCategory::Input
        );
        self.set_error_locked(inner, notice, autoclear);
    }

    fn set_error_locked(&self, inner: &mut Inner, notice: ErrorNotice, autoclear: bool) {
        if let Some(timer) = inner.error_clear_timer.take() {
            timer.abort();
        }
        inner.error_epoch += 1;
        inner.error = Some(notice);

        if autoclear {
            let weak = self.weak_self.clone();
            let epoch = inner.error_epoch;
            let delay = self.config.error_autoclear;
            inner.error_clear_timer = Some(tokio::spawn(async move {
                tokio::time::sleep(delay).await;
                if let Some(manager) = weak.upgrade() {
                    let mut inner = manager.lock();
                    if inner.error_epoch == epoch && inner.error.take().is_some() {
                        manager.publish_locked(&inner);
                    }
                }
            }));
        }
    }

    /// Arm the debounced loading flag: it only shows if the operation is
    /// still outstanding when the timer fires.
    fn begin_loading(&self) {
        let mut inner = self.lock();
        if let Some(timer) = inner.debounce_timer.take() {
            timer.abort();
        }
        let weak = self.weak_self.clone();
        let delay = self.config.loading_debounce;
        inner.debounce_timer = Some(tokio::spawn(async move {
            tokio::time::sleep(delay).await;
            if let Some(manager) = weak.upgrade() {
                let mut inner = manager.lock();
                inner.loading = true;
                manager.publish_locked(&inner);
            }
        }));
    }

    /// Clear the flag and cancel a pending timer, whichever state the
    /// debounce is in.
    fn end_loading(&self) {
        let mut inner = self.lock();
        if let Some(timer) = inner.debounce_timer.take() {
            timer.abort();
        }
        if inner.loading {
            inner.loading = false;
            self.publish_locked(&inner);
        }
    }

    fn apply_status(&self, status: ConnectionStatus) {
        let mut inner = self.lock();
        let was_online = inner.network_online;
        let was_available = inner.backend_available;
        inner.network_online = status.network_online;
        inner.backend_available = status.backend_available;

        if was_online && !status.network_online {
            self.set_error_locked(
                &mut inner,
                ErrorNotice::new(OFFLINE_NOTICE, ErrorCategory::Connection),
                false,
            );
        } else if !was_online && status.network_online {
            // Good news clears itself after the display interval.
            self.set_error_locked(
                &mut inner,
                ErrorNotice::new(BACK_ONLINE_NOTICE, ErrorCategory::Connection),
                true,
            );
        } else if status.network_online
            && was_available
            && !status.backend_available
            && inner.error.is_none()
        {
            let notice = match status.last_probe {
                ProbeOutcome::Unhealthy => {
                    ErrorNotice::new(BACKEND_DOWN_NOTICE, ErrorCategory::Server)
                }
                _ => ErrorNotice::new(BACKEND_UNREACHABLE_NOTICE, ErrorCategory::Connection),
            };
            self.set_error_locked(&mut inner, notice, false);
        } else if !was_available && status.backend_available {
            let availability_notice = matches!(
                inner.error.as_ref().map(|notice| notice.category),
                Some(ErrorCategory::Connection) | Some(ErrorCategory::Server)
            );
            if availability_notice {
                if let Some(timer) = inner.error_clear_timer.take() {
                    timer.abort();
                }
                inner.error = None;
            }
        }

        self.publish_locked(&inner);
    }
}

impl Drop for ConversationManager {
    fn drop(&mut self) {
        if let Ok(mut inner) = self.inner.lock() {
            for task in [
                inner.status_task.take(),
                inner.debounce_timer.take(),
                inner.error_clear_timer.take(),
            ]
            .into_iter()
            .flatten()
            {
                task.abort();
            }
        }
    }
}

async fn watch_status(
    weak: Weak<ConversationManager>,
    mut status_rx: watch::Receiver<ConnectionStatus>,
) {
    while status_rx.changed().await.is_ok() {
        let status = *status_rx.borrow_and_update();
        match weak.upgrade() {
            Some(manager) => manager.apply_status(status),
            None => break,
        }
    }
}

/// Documented reconciliation heuristic: keep local only when it is strictly
/// longer than the remote history (assumed to hold unsynced messages),
/// otherwise adopt remote wholesale. Not a content merge.
fn reconcile(local: Vec<Message>, remote: Vec<Message>) -> Vec<Message> {
    if local.len() > remote.len() { local } else { remote }
}

fn classify_send_error(err: &ApiError) -> ErrorNotice {
    match err {
        ApiError::Timeout | ApiError::Connection(_) => {
            ErrorNotice::new(SEND_CONNECTION_NOTICE, ErrorCategory::Connection)
        }
        ApiError::ServiceBusy => ErrorNotice::new(SEND_SERVER_NOTICE, ErrorCategory::Server),
        ApiError::Status { code, .. } if *code >= 500 => {
            ErrorNotice::new(SEND_SERVER_NOTICE, ErrorCategory::Server)
        }
        _ => ErrorNotice::new(SEND_GENERAL_NOTICE, ErrorCategory::General),
    }
}

fn unix_millis(at: OffsetDateTime) -> i64 {
    (at.unix_timestamp_nanos() / 1_000_000) as i64
}
