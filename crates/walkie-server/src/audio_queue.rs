//! Per-recipient pending audio with TTL eviction.
//!
//! Conversation clips are queued here for every channel peer that might
//! not be reachable over a live session at broadcast time; `/audio/poll`
//! drains them FIFO. Entries older than the retention window are evicted
//! regardless of consumer activity, so queues stay bounded in practice.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, RwLock};
use std::time::{Duration, Instant};

/// Default retention window for queued clips.
pub const DEFAULT_RETENTION: Duration = Duration::from_secs(5 * 60);

/// A queued clip waiting for one recipient.
#[derive(Debug)]
pub struct PendingAudio {
    pub sender_id: i64,
    pub channel: String,
    pub payload: Arc<Vec<u8>>,
    pub enqueued_at: Instant,
    pub duration: Duration,
}

type Queues = HashMap<i64, VecDeque<Arc<PendingAudio>>>;

/// FIFO queues of pending audio, one per recipient.
#[derive(Clone)]
pub struct AudioQueue {
    queues: Arc<RwLock<Queues>>,
    retention: Duration,
}

impl Default for AudioQueue {
    fn default() -> Self {
        Self::new(DEFAULT_RETENTION)
    }
}

impl AudioQueue {
    pub fn new(retention: Duration) -> Self {
        Self {
            queues: Arc::new(RwLock::new(HashMap::new())),
            retention,
        }
    }

    /// Appends one clip to every recipient's queue except the sender's.
    ///
    /// The payload is shared across recipients, not copied. After the
    /// append an eviction pass runs asynchronously.
    pub fn enqueue(
        &self,
        sender_id: i64,
        channel: &str,
        payload: Arc<Vec<u8>>,
        duration: Duration,
        recipients: &[i64],
    ) {
        let entry = Arc::new(PendingAudio {
            sender_id,
            channel: channel.to_string(),
            payload,
            enqueued_at: Instant::now(),
            duration,
        });

        {
            let mut queues = write_lock(&self.queues);
            for &recipient in recipients {
                if recipient == sender_id {
                    continue;
                }
                queues
                    .entry(recipient)
                    .or_default()
                    .push_back(Arc::clone(&entry));
                tracing::debug!(
                    recipient,
                    sender = sender_id,
                    channel,
                    "audio queued for recipient"
                );
            }
        }

        let queue = self.clone();
        tokio::spawn(async move {
            queue.evict_expired();
        });
    }

    /// Pops the oldest pending clip for a recipient, FIFO. Entries older
    /// than the retention window are discarded on the way out, so an
    /// expired clip is never delivered even if no eviction pass ran.
    pub fn dequeue(&self, user_id: i64) -> Option<Arc<PendingAudio>> {
        let cutoff = Instant::now().checked_sub(self.retention);
        let mut queues = write_lock(&self.queues);

        let entry = {
            let queue = queues.get_mut(&user_id)?;
            let mut fresh = None;
            while let Some(candidate) = queue.pop_front() {
                let expired = cutoff
                    .map(|cutoff| candidate.enqueued_at <= cutoff)
                    .unwrap_or(false);
                if expired {
                    continue;
                }
                fresh = Some(candidate);
                break;
            }
            fresh
        };

        if queues.get(&user_id).is_some_and(VecDeque::is_empty) {
            queues.remove(&user_id);
        }
        entry
    }

    /// Drops everything queued for a recipient.
    pub fn clear(&self, user_id: i64) {
        write_lock(&self.queues).remove(&user_id);
    }

    /// Number of clips currently queued for a recipient.
    pub fn pending_count(&self, user_id: i64) -> usize {
        self.queues
            .read()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
            .get(&user_id)
            .map(VecDeque::len)
            .unwrap_or(0)
    }

    /// Removes entries older than the retention window; recipients whose
    /// queue becomes empty are dropped from the map.
    fn evict_expired(&self) {
        let cutoff = match Instant::now().checked_sub(self.retention) {
            Some(cutoff) => cutoff,
            None => return,
        };

        let mut queues = write_lock(&self.queues);
        queues.retain(|_, queue| {
            queue.retain(|entry| entry.enqueued_at > cutoff);
            !queue.is_empty()
        });
    }
}

fn write_lock(queues: &Arc<RwLock<Queues>>) -> std::sync::RwLockWriteGuard<'_, Queues> {
    queues.write().unwrap_or_else(|poisoned| poisoned.into_inner())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn payload(byte: u8) -> Arc<Vec<u8>> {
        Arc::new(vec![byte; 8])
    }

    #[tokio::test]
    async fn dequeue_is_fifo_per_recipient() {
        let queue = AudioQueue::default();
        queue.enqueue(1, "canal-1", payload(0xAA), Duration::from_secs(1), &[2]);
        queue.enqueue(3, "canal-1", payload(0xBB), Duration::from_secs(1), &[2]);

        let first = queue.dequeue(2).expect("first entry");
        assert_eq!(first.sender_id, 1);
        let second = queue.dequeue(2).expect("second entry");
        assert_eq!(second.sender_id, 3);
        assert!(queue.dequeue(2).is_none());
    }

    #[tokio::test]
    async fn sender_is_never_a_recipient_of_their_own_clip() {
        let queue = AudioQueue::default();
        queue.enqueue(1, "canal-1", payload(0xAA), Duration::from_secs(1), &[1, 2]);

        assert_eq!(queue.pending_count(1), 0);
        assert_eq!(queue.pending_count(2), 1);
    }

    #[tokio::test]
    async fn payload_is_shared_not_copied() {
        let queue = AudioQueue::default();
        let audio = payload(0xCC);
        queue.enqueue(1, "canal-1", Arc::clone(&audio), Duration::from_secs(1), &[2, 3]);

        let a = queue.dequeue(2).expect("entry for 2");
        let b = queue.dequeue(3).expect("entry for 3");
        assert!(Arc::ptr_eq(&a.payload, &audio));
        assert!(Arc::ptr_eq(&a.payload, &b.payload));
    }

    #[tokio::test]
    async fn expired_entries_are_not_returned() {
        let queue = AudioQueue::new(Duration::from_millis(30));
        queue.enqueue(1, "canal-1", payload(0xDD), Duration::from_secs(1), &[2]);

        tokio::time::sleep(Duration::from_millis(60)).await;
        // A later enqueue for someone else triggers the eviction pass.
        queue.enqueue(1, "canal-1", payload(0xEE), Duration::from_secs(1), &[3]);
        tokio::time::sleep(Duration::from_millis(20)).await;

        assert!(queue.dequeue(2).is_none(), "expired entry must be gone");
        assert_eq!(queue.pending_count(3), 1, "fresh entry survives");
    }

    #[tokio::test]
    async fn dequeue_skips_expired_entries_without_an_eviction_pass() {
        let queue = AudioQueue::new(Duration::from_millis(20));
        queue.enqueue(1, "canal-1", payload(0xAA), Duration::from_secs(1), &[2]);

        tokio::time::sleep(Duration::from_millis(50)).await;
        queue.enqueue(3, "canal-1", payload(0xBB), Duration::from_secs(1), &[2]);

        // Even if the async eviction pass has not caught up, the expired
        // head must be skipped and the fresh entry returned.
        let entry = queue.dequeue(2).expect("fresh entry");
        assert_eq!(entry.sender_id, 3);
    }

    #[tokio::test]
    async fn clear_drops_the_whole_queue() {
        let queue = AudioQueue::default();
        queue.enqueue(1, "canal-1", payload(0xAA), Duration::from_secs(1), &[2]);
        queue.enqueue(1, "canal-1", payload(0xBB), Duration::from_secs(1), &[2]);

        queue.clear(2);
        assert_eq!(queue.pending_count(2), 0);
        assert!(queue.dequeue(2).is_none());
    }
}
