//! Live session registry.
//!
//! Tracks every open WebSocket session twice: by user and by channel.
//! Both indices sit behind one reader-writer lock; registrations, removals
//! and moves take the writer, broadcast snapshots take the reader.
//!
//! Sessions own a bounded outbound buffer. Audio frames are dropped
//! silently when the buffer is full; a full buffer on a control frame
//! closes the session, since a client unable to drain control frames is
//! presumed dead.

use serde_json::json;
use std::collections::HashMap;
use std::sync::{Arc, RwLock};
use tokio::sync::mpsc;
use uuid::Uuid;

/// Outbound frame capacity per session.
pub const OUTBOUND_BUFFER: usize = 256;

/// A frame queued for delivery to one session.
#[derive(Debug, Clone)]
pub enum OutboundFrame {
    /// Binary audio payload.
    Audio(Arc<Vec<u8>>),
    /// Text control frame, already serialized.
    Control(String),
    /// Instructs the write pump to close the socket.
    Close,
}

/// Handle to a live session's outbound side.
#[derive(Debug, Clone)]
pub struct SessionHandle {
    pub user_id: i64,
    pub session_id: Uuid,
    pub channel: String,
    tx: mpsc::Sender<OutboundFrame>,
}

impl SessionHandle {
    /// Queues an audio frame. Full buffers drop the frame silently.
    pub fn send_audio(&self, payload: Arc<Vec<u8>>) {
        if self.tx.try_send(OutboundFrame::Audio(payload)).is_err() {
            tracing::debug!(user = self.user_id, "outbound buffer full, dropping audio frame");
        }
    }

    /// Queues a control frame. Returns `false` when the buffer is full or
    /// the session is gone; the caller is expected to close the session.
    #[must_use]
    pub fn send_control(&self, frame: String) -> bool {
        self.tx.try_send(OutboundFrame::Control(frame)).is_ok()
    }

    /// Asks the write pump to close the socket.
    pub fn close(&self) {
        let _ = self.tx.try_send(OutboundFrame::Close);
    }
}

#[derive(Default)]
struct RegistryInner {
    by_user: HashMap<i64, SessionHandle>,
    by_channel: HashMap<String, HashMap<i64, SessionHandle>>,
}

impl RegistryInner {
    fn remove_entry(&mut self, handle: &SessionHandle) {
        self.by_user.remove(&handle.user_id);
        if !handle.channel.is_empty() {
            if let Some(peers) = self.by_channel.get_mut(&handle.channel) {
                peers.remove(&handle.user_id);
                if peers.is_empty() {
                    self.by_channel.remove(&handle.channel);
                }
            }
        }
    }

    fn insert_entry(&mut self, handle: SessionHandle) {
        if !handle.channel.is_empty() {
            self.by_channel
                .entry(handle.channel.clone())
                .or_default()
                .insert(handle.user_id, handle.clone());
        }
        self.by_user.insert(handle.user_id, handle);
    }
}

/// The process-wide session registry.
#[derive(Clone, Default)]
pub struct ConnectionRegistry {
    inner: Arc<RwLock<RegistryInner>>,
}

impl ConnectionRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registers a session for a user, superseding (and closing) any
    /// existing session for the same user. Returns the session id.
    pub fn register(
        &self,
        user_id: i64,
        channel: &str,
        tx: mpsc::Sender<OutboundFrame>,
    ) -> Uuid {
        let session_id = Uuid::new_v4();
        let handle = SessionHandle {
            user_id,
            session_id,
            channel: channel.to_string(),
            tx,
        };

        let mut inner = self.write();
        if let Some(old) = inner.by_user.get(&user_id).cloned() {
            tracing::info!(user = user_id, "superseding existing live session");
            old.close();
            inner.remove_entry(&old);
        }
        inner.insert_entry(handle);
        tracing::debug!(user = user_id, channel, "live session registered");
        session_id
    }

    /// Removes a session if the session id still matches. Stale removal
    /// requests from superseded sessions are ignored.
    pub fn remove(&self, user_id: i64, session_id: Uuid) {
        let mut inner = self.write();
        let Some(handle) = inner.by_user.get(&user_id).cloned() else {
            return;
        };
        if handle.session_id != session_id {
            return;
        }
        inner.remove_entry(&handle);
        tracing::debug!(user = user_id, channel = %handle.channel, "live session removed");
    }

    /// Closes and removes a user's session regardless of session id.
    pub fn remove_user(&self, user_id: i64) {
        let mut inner = self.write();
        if let Some(handle) = inner.by_user.get(&user_id).cloned() {
            handle.close();
            inner.remove_entry(&handle);
        }
    }

    /// Moves a user's session to another channel and notifies the client
    /// with a `channel_changed` control frame.
    ///
    /// An empty `new_channel` removes the session from the registry and
    /// force-closes the socket.
    pub fn move_user(&self, user_id: i64, new_channel: &str) {
        let mut inner = self.write();
        let Some(handle) = inner.by_user.get(&user_id).cloned() else {
            tracing::debug!(user = user_id, "no live session to move");
            return;
        };

        inner.remove_entry(&handle);

        let notification = json!({
            "type": "channel_changed",
            "channel": new_channel,
        })
        .to_string();

        if new_channel.is_empty() {
            let _ = handle.send_control(notification);
            handle.close();
            tracing::info!(user = user_id, "live session detached from channel");
            return;
        }

        let moved = SessionHandle {
            channel: new_channel.to_string(),
            ..handle
        };
        if !moved.send_control(notification) {
            moved.close();
            tracing::warn!(user = user_id, "session buffer full on move, closing");
            return;
        }
        inner.insert_entry(moved);
        tracing::info!(user = user_id, channel = new_channel, "live session moved");
    }

    /// Snapshot of every session currently in a channel.
    pub fn channel_sessions(&self, channel: &str) -> Vec<SessionHandle> {
        self.read()
            .by_channel
            .get(channel)
            .map(|peers| peers.values().cloned().collect())
            .unwrap_or_default()
    }

    /// The channel the user's live session is in, if any.
    pub fn current_channel(&self, user_id: i64) -> Option<String> {
        self.read()
            .by_user
            .get(&user_id)
            .map(|handle| handle.channel.clone())
    }

    /// Whether a user currently has a live session.
    pub fn has_session(&self, user_id: i64) -> bool {
        self.read().by_user.contains_key(&user_id)
    }

    fn read(&self) -> std::sync::RwLockReadGuard<'_, RegistryInner> {
        self.inner.read().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn write(&self) -> std::sync::RwLockWriteGuard<'_, RegistryInner> {
        self.inner.write().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}
