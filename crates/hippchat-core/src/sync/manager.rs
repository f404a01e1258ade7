//! Background pollers for open conversations
//!
//! `Conversations` runs one poll loop per open conversation, tracks its
//! state, and emits events when messages arrive.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │  Conversations                                                  │
//! │  ├── open: HashMap<Contact, ConversationHandle>                 │
//! │  │   └── Background poll task per open conversation             │
//! │  ├── service: MessageSyncService                                │
//! │  │   └── Shared cache, history context and store                │
//! │  └── event_tx: broadcast::Sender<ConversationEvent>             │
//! │      └── Broadcasts events to all listeners                     │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! ## Poll loop
//!
//! On open the task loads initial history if the contact has no saved
//! offset, then checks for a recent incoming message missing from the
//! cache. If one exists it backfills a larger window. Any recent incoming
//! activity starts a burst. Polling then starts at once from the saved
//! offset (or from now) and repeats on the [`PollSchedule`].

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;
use parking_lot::{Mutex, RwLock as SyncRwLock};
use tokio::sync::{broadcast, Notify, RwLock};
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::events::{ConversationEvent, ConversationState};
use super::schedule::PollSchedule;
use super::service::MessageSyncService;
use crate::chat::DecryptedMessage;
use crate::error::ChatResult;

/// Default capacity for the event broadcast channel
const EVENT_CHANNEL_CAPACITY: usize = 256;

/// Handle to one open conversation's poller.
///
/// Clones refer to the same poller.
#[derive(Clone)]
pub struct ConversationHandle {
    contact: Arc<str>,
    cancel: CancellationToken,
    burst: Arc<Notify>,
    state: Arc<SyncRwLock<ConversationState>>,
    task: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl ConversationHandle {
    fn new(contact: &str) -> Self {
        Self {
            contact: Arc::from(contact),
            cancel: CancellationToken::new(),
            burst: Arc::new(Notify::new()),
            state: Arc::new(SyncRwLock::new(ConversationState::Idle)),
            task: Arc::new(Mutex::new(None)),
        }
    }

    pub fn contact(&self) -> &str {
        &self.contact
    }

    pub fn state(&self) -> ConversationState {
        *self.state.read()
    }

    /// Poll quickly for the next few cycles, e.g. after sending.
    ///
    /// A pending long wait is cut short to the burst interval.
    pub fn burst(&self) {
        self.burst.notify_one();
    }

    /// Stop polling. A poll already in flight completes but schedules
    /// nothing further.
    pub fn close(&self) {
        self.cancel.cancel();
    }

    pub fn is_closed(&self) -> bool {
        self.cancel.is_cancelled()
    }

    /// Wait for the poll task to exit.
    pub async fn join(&self) {
        let task = self.task.lock().take();
        if let Some(task) = task {
            if let Err(e) = task.await {
                warn!(contact = %self.contact, error = %e, "Poll task ended abnormally");
            }
        }
    }
}

/// Manager for the pollers of all open conversations
///
/// # Example
///
/// ```ignore
/// let conversations = Conversations::new(service);
/// let mut events = conversations.subscribe();
///
/// let handle = conversations.open(&bob).await;
/// while let Ok(event) = events.recv().await {
///     if let ConversationEvent::Messages { messages, .. } = event {
///         for m in messages {
///             println!("{}: {}", m.display_sender(), m.display_content());
///         }
///     }
/// }
/// ```
pub struct Conversations {
    service: MessageSyncService,
    open: Arc<RwLock<HashMap<String, ConversationHandle>>>,
    event_tx: broadcast::Sender<ConversationEvent>,
}

impl Conversations {
    pub fn new(service: MessageSyncService) -> Self {
        let (event_tx, _) = broadcast::channel(EVENT_CHANNEL_CAPACITY);
        Self {
            service,
            open: Arc::new(RwLock::new(HashMap::new())),
            event_tx,
        }
    }

    pub fn service(&self) -> &MessageSyncService {
        &self.service
    }

    /// Subscribe to events from every open conversation.
    pub fn subscribe(&self) -> broadcast::Receiver<ConversationEvent> {
        self.event_tx.subscribe()
    }

    /// State of the conversation with `contact`; `Idle` if not open.
    pub async fn state(&self, contact: &str) -> ConversationState {
        let open = self.open.read().await;
        open.get(contact.trim())
            .map(|h| h.state())
            .unwrap_or(ConversationState::Idle)
    }

    pub async fn is_open(&self, contact: &str) -> bool {
        self.open.read().await.contains_key(contact.trim())
    }

    pub async fn open_contacts(&self) -> Vec<String> {
        let mut contacts: Vec<String> = self.open.read().await.keys().cloned().collect();
        contacts.sort();
        contacts
    }

    /// Start polling the conversation with `contact`.
    ///
    /// If the conversation is already open its existing handle is returned.
    pub async fn open(&self, contact: &str) -> ConversationHandle {
        let contact = contact.trim();
        let mut open = self.open.write().await;
        if let Some(handle) = open.get(contact) {
            if !handle.is_closed() {
                debug!(contact, "Conversation already open");
                return handle.clone();
            }
        }

        info!(contact, "Opening conversation");
        let handle = ConversationHandle::new(contact);
        let task = tokio::spawn(poll_task(
            self.service.clone(),
            handle.clone(),
            self.event_tx.clone(),
        ));
        *handle.task.lock() = Some(task);
        open.insert(contact.to_string(), handle.clone());
        handle
    }

    /// Stop polling `contact`.
    ///
    /// # Returns
    ///
    /// `true` if the conversation was open
    pub async fn close(&self, contact: &str) -> bool {
        let handle = self.open.write().await.remove(contact.trim());
        match handle {
            Some(handle) => {
                info!(contact = %handle.contact(), "Closing conversation");
                handle.close();
                true
            }
            None => {
                debug!(contact, "Conversation not open");
                false
            }
        }
    }

    /// Request a burst on the conversation with `contact`, if open.
    pub async fn burst(&self, contact: &str) {
        if let Some(handle) = self.open.read().await.get(contact.trim()) {
            handle.burst();
        }
    }

    /// Send a message to `to`, then burst the conversation with `to` if it
    /// is open so the reply is picked up quickly.
    pub async fn send_message(&self, to: &str, content: &str, kind: &str) -> ChatResult<DecryptedMessage> {
        let sent = self.service.send_message(to, content, kind).await?;
        self.burst(to).await;
        Ok(sent)
    }

    /// Close every conversation and wait for the pollers to exit.
    pub async fn shutdown(&self) {
        info!("Shutting down conversations");
        let handles: Vec<ConversationHandle> = self.open.write().await.drain().map(|(_, h)| h).collect();
        for handle in &handles {
            handle.close();
        }
        for handle in &handles {
            handle.join().await;
        }
    }
}

fn set_state(
    handle: &ConversationHandle,
    state: ConversationState,
    event_tx: &broadcast::Sender<ConversationEvent>,
) {
    let changed = {
        let mut current = handle.state.write();
        let changed = *current != state;
        *current = state;
        changed
    };
    if changed {
        let _ = event_tx.send(ConversationEvent::StateChanged {
            contact: handle.contact().to_string(),
            state,
        });
    }
}

fn emit_messages(
    contact: &str,
    messages: Vec<DecryptedMessage>,
    event_tx: &broadcast::Sender<ConversationEvent>,
) {
    if !messages.is_empty() {
        let _ = event_tx.send(ConversationEvent::Messages {
            contact: contact.to_string(),
            messages,
        });
    }
}

/// Load history and decide whether to start in burst mode.
async fn open_sequence(
    service: &MessageSyncService,
    contact: &str,
    schedule: &mut PollSchedule,
    event_tx: &broadcast::Sender<ConversationEvent>,
) {
    let config = service.config();

    match service.offset(contact) {
        Ok(Some(_)) => {}
        Ok(None) => match service.load_initial_history(contact, config.initial_history_lines).await {
            Ok(messages) => emit_messages(contact, messages, event_tx),
            Err(e) => warn!(contact, error = %e, "Initial history load failed"),
        },
        Err(e) => warn!(contact, error = %e, "Failed to read saved offset"),
    }

    let lookback = config.recent_incoming_lookback_ms;
    match service.has_recent_incoming(contact, lookback).await {
        Ok(true) => {
            if !service.has_cached_recent_incoming(contact, lookback).unwrap_or(false) {
                debug!(contact, "Recent incoming message missing locally, backfilling");
                match service.backfill_history(contact, config.backfill_lines).await {
                    Ok(messages) => emit_messages(contact, messages, event_tx),
                    Err(e) => warn!(contact, error = %e, "Backfill failed"),
                }
            }
            schedule.request_burst();
        }
        Ok(false) => {}
        Err(e) => warn!(contact, error = %e, "Recent activity check failed"),
    }
}

/// Background task polling a single conversation
async fn poll_task(
    service: MessageSyncService,
    handle: ConversationHandle,
    event_tx: broadcast::Sender<ConversationEvent>,
) {
    let contact = handle.contact().to_string();
    debug!(%contact, "Poll task started");

    let mut schedule = PollSchedule::new(service.config());
    set_state(&handle, ConversationState::InitialLoad, &event_tx);
    open_sequence(&service, &contact, &mut schedule, &event_tx).await;

    let mut offset = match service.offset(&contact) {
        Ok(Some(offset)) => offset,
        _ => Utc::now().timestamp_millis(),
    };
    set_state(&handle, schedule.state(), &event_tx);
    let mut deadline = Instant::now();

    'poll: loop {
        loop {
            tokio::select! {
                biased;
                _ = handle.cancel.cancelled() => break 'poll,
                _ = handle.burst.notified() => {
                    schedule.request_burst();
                    let sooner = Instant::now() + schedule.next_delay();
                    deadline = deadline.min(sooner);
                    set_state(&handle, ConversationState::Burst, &event_tx);
                }
                _ = tokio::time::sleep_until(deadline) => break,
            }
        }

        let outcome = service.poll_messages(&contact, offset).await;
        if handle.cancel.is_cancelled() {
            break;
        }

        match outcome {
            Ok(messages) => {
                let new_messages = messages.len();
                emit_messages(&contact, messages, &event_tx);
                schedule.on_success(new_messages);
                if let Ok(Some(saved)) = service.offset(&contact) {
                    offset = offset.max(saved);
                }
                let next_delay = schedule.next_delay();
                let _ = event_tx.send(ConversationEvent::Polled {
                    contact: contact.clone(),
                    new_messages,
                    next_delay,
                });
                deadline = Instant::now() + next_delay;
            }
            Err(e) => {
                schedule.on_error();
                let next_delay = schedule.next_delay();
                warn!(%contact, error = %e, delay_ms = next_delay.as_millis() as u64, "Poll failed");
                let _ = event_tx.send(ConversationEvent::PollFailed {
                    contact: contact.clone(),
                    error: e.to_string(),
                    next_delay,
                });
                deadline = Instant::now() + next_delay;
            }
        }
        set_state(&handle, schedule.state(), &event_tx);
    }

    set_state(&handle, ConversationState::Stopped, &event_tx);
    let _ = event_tx.send(ConversationEvent::Stopped {
        contact: contact.clone(),
    });
    debug!(%contact, "Poll task ended");
}

impl Drop for Conversations {
    fn drop(&mut self) {
        if let Ok(open) = self.open.try_read() {
            for handle in open.values() {
                handle.close();
            }
        }
    }
}
