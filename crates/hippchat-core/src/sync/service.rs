//! Sending, history loading and polling for one logged-in user.

use std::collections::{HashMap, HashSet};
use std::ops::RangeInclusive;
use std::sync::Arc;

use chrono::Utc;
use futures::future::{BoxFuture, FutureExt, Shared};
use parking_lot::Mutex;

use crate::cache::ChatCache;
use crate::chat::{
    format_timestamp, open_message, sort_chronologically, DecryptedMessage, Direction, Message,
};
use crate::config::SyncConfig;
use crate::error::{ChatError, ChatResult};
use crate::identity::KeyPair;
use crate::log::InboxLog;
use crate::profile::{chat_bucket, profile_bucket, ProfileStore, UserProfile};
use crate::store::ObjectStore;

type HistoryFuture = Shared<BoxFuture<'static, Result<Vec<DecryptedMessage>, Arc<ChatError>>>>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
enum LoadKind {
    Initial,
    Backfill,
}

#[derive(Default)]
struct HistoryLoads {
    in_flight: HashMap<(LoadKind, String), HistoryFuture>,
    done: HashSet<String>,
}

/// Session-scoped record of which conversations already loaded history.
///
/// Concurrent loads for one contact share a single fetch. A contact is
/// marked done only after a successful load.
#[derive(Default)]
pub struct SyncContext {
    loads: Mutex<HistoryLoads>,
}

impl SyncContext {
    pub fn new() -> Self {
        Self::default()
    }

    /// Whether initial history for `contact` completed in this session.
    pub fn is_done(&self, contact: &str) -> bool {
        self.loads.lock().done.contains(contact)
    }

    /// Whether a history load or backfill for `contact` is running.
    pub fn is_loading(&self, contact: &str) -> bool {
        self.loads.lock().in_flight.keys().any(|(_, c)| c == contact)
    }

    /// Allow the next open of `contact` to load history again.
    pub fn forget_history(&self, contact: &str) {
        self.loads.lock().done.remove(contact);
    }

    /// Drop every record. Running loads finish but are not shared anymore.
    pub fn reset(&self) {
        let mut loads = self.loads.lock();
        loads.in_flight.clear();
        loads.done.clear();
    }

    fn finish(&self, kind: LoadKind, contact: &str, succeeded: bool) {
        let mut loads = self.loads.lock();
        loads.in_flight.remove(&(kind, contact.to_string()));
        if succeeded && kind == LoadKind::Initial {
            loads.done.insert(contact.to_string());
        }
    }
}

/// Message operations for the user owning `keypair`.
#[derive(Clone)]
pub struct MessageSyncService {
    keypair: Arc<KeyPair>,
    inbox: String,
    log: InboxLog,
    profiles: ProfileStore,
    cache: Arc<dyn ChatCache>,
    context: Arc<SyncContext>,
    config: Arc<SyncConfig>,
}

impl MessageSyncService {
    pub fn new(
        store: Arc<dyn ObjectStore>,
        cache: Arc<dyn ChatCache>,
        keypair: KeyPair,
        config: SyncConfig,
    ) -> Self {
        let inbox = chat_bucket(keypair.address());
        Self {
            log: InboxLog::new(store.clone(), config.retry.clone()),
            profiles: ProfileStore::new(store, config.retry.clone()),
            keypair: Arc::new(keypair),
            inbox,
            cache,
            context: Arc::new(SyncContext::new()),
            config: Arc::new(config),
        }
    }

    pub fn address(&self) -> &str {
        self.keypair.address()
    }

    pub fn keypair(&self) -> &KeyPair {
        &self.keypair
    }

    /// Our inbox container.
    pub fn inbox(&self) -> &str {
        &self.inbox
    }

    pub fn config(&self) -> &SyncConfig {
        &self.config
    }

    pub fn cache(&self) -> &Arc<dyn ChatCache> {
        &self.cache
    }

    pub fn context(&self) -> &SyncContext {
        &self.context
    }

    pub fn log(&self) -> &InboxLog {
        &self.log
    }

    pub fn profiles(&self) -> &ProfileStore {
        &self.profiles
    }

    /// Saved offset for `contact`.
    pub fn offset(&self, contact: &str) -> ChatResult<Option<i64>> {
        self.cache.offset(contact)
    }

    /// Locally known messages with `contact`, oldest first.
    pub fn messages(&self, contact: &str) -> ChatResult<Vec<DecryptedMessage>> {
        self.cache.messages(contact)
    }

    /// Encrypt `content` for `to` and append it to both inboxes.
    ///
    /// The recipient's copy is sealed to their published key, ours to our
    /// own key, so both sides can read the history. Both appends are
    /// attempted; the first failure is returned. On success the message is
    /// recorded locally under `to` and returned.
    pub async fn send_message(&self, to: &str, content: &str, kind: &str) -> ChatResult<DecryptedMessage> {
        let to = to.trim();
        let recipient_pk = self.profiles.resolve_public_key(to).await?;
        let me = self.address();
        let ts = format_timestamp(Utc::now());

        let for_recipient = Message::seal(&ts, me, to, kind, &recipient_pk, content.as_bytes())?;
        let for_self = Message::seal(&ts, me, to, kind, self.keypair.public_key(), content.as_bytes())?;
        let recipient_line = for_recipient.to_line()?;
        let self_line = for_self.to_line()?;

        let recipient_inbox = chat_bucket(to);
        let to_recipient = self.log.append_line(&recipient_inbox, &recipient_line).await;
        let to_self = self.log.append_line(&self.inbox, &self_line).await;
        if let Err(e) = &to_recipient {
            tracing::error!(to, error = %e, "Failed to deliver message to recipient inbox");
        }
        if let Err(e) = &to_self {
            tracing::error!(error = %e, "Failed to record message in own inbox");
        }
        to_recipient?;
        to_self?;

        tracing::info!(to, msg_id = %for_self.msg_id, "Sent message");
        let echo = DecryptedMessage::new(for_self, content);
        self.cache.add_messages(to, vec![echo.clone()])?;
        Ok(echo)
    }

    /// Load the last `max_lines` lines of history with `contact`, once per
    /// session.
    ///
    /// Returns the messages that were new to the cache. After a successful
    /// load later calls return nothing until
    /// [`SyncContext::forget_history`]. Concurrent calls share one load.
    pub async fn load_initial_history(&self, contact: &str, max_lines: usize) -> ChatResult<Vec<DecryptedMessage>> {
        self.shared_load(contact.trim(), max_lines, LoadKind::Initial).await
    }

    /// Reload the last `max_lines` lines, ignoring whether history was
    /// already loaded. Concurrent calls share one load.
    pub async fn backfill_history(&self, contact: &str, max_lines: usize) -> ChatResult<Vec<DecryptedMessage>> {
        self.shared_load(contact.trim(), max_lines, LoadKind::Backfill).await
    }

    async fn shared_load(&self, contact: &str, max_lines: usize, kind: LoadKind) -> ChatResult<Vec<DecryptedMessage>> {
        let load = {
            let mut loads = self.context.loads.lock();
            if kind == LoadKind::Initial && loads.done.contains(contact) {
                tracing::debug!(contact, "History already loaded");
                return Ok(Vec::new());
            }
            let key = (kind, contact.to_string());
            match loads.in_flight.get(&key) {
                Some(load) => load.clone(),
                None => {
                    let service = self.clone();
                    let owned = contact.to_string();
                    let load = async move {
                        let result = service.fetch_history(&owned, max_lines).await;
                        service.context.finish(kind, &owned, result.is_ok());
                        result.map_err(Arc::new)
                    }
                    .boxed()
                    .shared();
                    loads.in_flight.insert(key, load.clone());
                    load
                }
            }
        };
        load.await.map_err(ChatError::from)
    }

    async fn fetch_history(&self, contact: &str, max_lines: usize) -> ChatResult<Vec<DecryptedMessage>> {
        let batch = self.log.recent_lines(&self.inbox, max_lines).await?;
        let mut known = self.cache.message_ids(contact)?;
        let messages = self.process_lines(contact, &batch.lines, &mut known).await?;
        let added = self.cache.add_messages(contact, messages)?;
        let offset = self.cache.advance_offset(contact, batch.new_offset)?;
        tracing::debug!(
            contact,
            lines = batch.lines.len(),
            new = added.len(),
            offset,
            "Loaded history"
        );
        Ok(added)
    }

    /// Fetch log content newer than `from_offset` and merge the
    /// conversation's messages into the cache.
    ///
    /// The saved offset becomes the maximum of the previous offset, the
    /// newest segment modification time and the newest message timestamp.
    /// Returns the messages that were not known before.
    pub async fn poll_messages(&self, contact: &str, from_offset: i64) -> ChatResult<Vec<DecryptedMessage>> {
        let contact = contact.trim();
        let batch = self.log.tail_since(&self.inbox, from_offset).await?;
        let mut known = self.cache.message_ids(contact)?;
        let messages = self.process_lines(contact, &batch.lines, &mut known).await?;

        let newest_message = messages.iter().filter_map(|m| m.timestamp_ms()).max().unwrap_or(0);
        let best = batch.new_offset.max(newest_message).max(from_offset);

        let added = self.cache.add_messages(contact, messages)?;
        let offset = self.cache.advance_offset(contact, best)?;
        if !added.is_empty() {
            tracing::debug!(contact, new = added.len(), offset, "Polled new messages");
        }
        Ok(added)
    }

    /// Whether the inbox holds a message from `contact` stamped within the
    /// last `lookback_ms`, judging by the most recent lines only. Messages
    /// stamped in the future do not count.
    pub async fn has_recent_incoming(&self, contact: &str, lookback_ms: i64) -> ChatResult<bool> {
        let contact = contact.trim();
        let window = recent_window(lookback_ms);
        let batch = self
            .log
            .recent_lines(&self.inbox, self.config.recent_incoming_sample)
            .await?;
        let me = self.address();
        Ok(batch
            .lines
            .iter()
            .filter_map(|line| Message::from_line(line).ok())
            .any(|m| {
                m.direction(me, contact) == Some(Direction::Incoming)
                    && m.timestamp_ms().is_some_and(|ts| window.contains(&ts))
            }))
    }

    /// Whether the cache already holds a message from `contact` stamped
    /// within the last `lookback_ms`.
    pub fn has_cached_recent_incoming(&self, contact: &str, lookback_ms: i64) -> ChatResult<bool> {
        let window = recent_window(lookback_ms);
        Ok(self
            .cache
            .messages(contact)?
            .iter()
            .any(|m| m.is_from(contact) && m.timestamp_ms().is_some_and(|ts| window.contains(&ts))))
    }

    /// Our published profile.
    pub async fn own_profile(&self) -> ChatResult<Option<UserProfile>> {
        self.profiles.get_profile_for(self.address()).await
    }

    /// Publish a new version of our profile.
    pub async fn update_profile(&self, profile: &UserProfile) -> ChatResult<UserProfile> {
        if profile.address != self.address() {
            return Err(ChatError::InvalidOperation(format!(
                "profile belongs to {}, not {}",
                profile.address,
                self.address()
            )));
        }
        self.profiles.put_profile(&profile_bucket(self.address()), profile).await
    }

    /// Turn raw log lines into this conversation's new messages.
    ///
    /// Lines that do not parse, belong to another conversation, are already
    /// in `known`, or come from a sender without a published profile are
    /// skipped. Profile lookup errors fail the whole batch so the offset is
    /// not advanced past unread lines.
    async fn process_lines(
        &self,
        contact: &str,
        lines: &[String],
        known: &mut HashSet<String>,
    ) -> ChatResult<Vec<DecryptedMessage>> {
        let me = self.address();
        let mut senders: HashMap<String, bool> = HashMap::new();
        let mut out = Vec::new();

        for line in lines {
            let message = match Message::from_line(line) {
                Ok(m) => m,
                Err(e) => {
                    tracing::warn!(error = %e, "Skipping malformed log line");
                    continue;
                }
            };
            if message.direction(me, contact).is_none() || known.contains(&message.msg_id) {
                continue;
            }

            let has_profile = match senders.get(&message.from) {
                Some(found) => *found,
                None => {
                    let found = self.profiles.get_profile_for(&message.from).await?.is_some();
                    senders.insert(message.from.clone(), found);
                    found
                }
            };
            if !has_profile {
                tracing::warn!(from = %message.from, msg_id = %message.msg_id, "Sender has no profile, skipping");
                continue;
            }

            let msg_id = message.msg_id.clone();
            match open_message(self.keypair.secret_key(), message.clone()) {
                Ok(decrypted) => out.push(decrypted),
                Err(e) => {
                    tracing::warn!(msg_id = %msg_id, error = %e, "Failed to decrypt message");
                    if !self.config.keep_undecryptable {
                        continue;
                    }
                    out.push(DecryptedMessage::undecryptable(message));
                }
            }
            known.insert(msg_id);
        }

        sort_chronologically(&mut out);
        Ok(out)
    }
}

/// Timestamps (epoch ms) counted as recent: `[now - lookback_ms, now]`.
fn recent_window(lookback_ms: i64) -> RangeInclusive<i64> {
    let now = Utc::now().timestamp_millis();
    now - lookback_ms..=now
}
