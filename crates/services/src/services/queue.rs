use std::{
    collections::{HashMap, VecDeque},
    sync::Mutex,
    time::{Duration, Instant},
};

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use tokio::sync::Notify;
use ts_rs::TS;
use uuid::Uuid;

use super::config::QueueConfig;

/// Instruction to run one agent stage for a project. Exists only transiently
/// on the queue; it is never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, TS)]
pub struct HandoffMessage {
    pub project_id: Uuid,
    pub agent_name: String,
}

impl HandoffMessage {
    /// Deduplication token: derived from (project, agent, coarse timestamp),
    /// attached by the producer rather than carried in the payload.
    pub fn dedup_token(&self, at: DateTime<Utc>, window_secs: i64) -> String {
        let bucket = if window_secs > 0 {
            at.timestamp() / window_secs
        } else {
            at.timestamp()
        };
        let mut hasher = Sha256::new();
        hasher.update(self.project_id.as_bytes());
        hasher.update(self.agent_name.as_bytes());
        hasher.update(bucket.to_be_bytes());
        hex::encode(hasher.finalize())
    }
}

/// One delivery of a message. The receipt identifies this delivery for
/// `ack`/`nack`; `attempt` starts at 1.
#[derive(Debug, Clone)]
pub struct Delivery {
    pub receipt: Uuid,
    pub message: HandoffMessage,
    pub attempt: u32,
}

#[derive(Debug)]
pub enum NackOutcome {
    /// Requeued at the front of its project channel for redelivery.
    Requeued { attempt: u32 },
    /// Delivery attempts exhausted; the message is handed back to the caller
    /// for terminal failure handling.
    DeadLettered(HandoffMessage),
}

struct Pending {
    message: HandoffMessage,
    attempt: u32,
}

struct InFlight {
    message: HandoffMessage,
    attempt: u32,
    deadline: Instant,
}

#[derive(Default)]
struct QueueInner {
    /// FIFO channel per project.
    channels: HashMap<Uuid, VecDeque<Pending>>,
    /// Projects whose head message may be delivered.
    ready: VecDeque<Uuid>,
    /// Receipt -> delivered-but-unacked message.
    in_flight: HashMap<Uuid, InFlight>,
    /// Dedup tokens seen inside the current window.
    seen_tokens: HashMap<String, DateTime<Utc>>,
}

/// In-process hand-off queue with the semantics the pipeline relies on:
/// FIFO per project, at most one in-flight delivery per project (stages for
/// one project are serialized, distinct projects proceed in parallel),
/// at-least-once delivery with visibility-timeout redelivery, and producer-side
/// deduplication inside a short window.
pub struct HandoffQueue {
    inner: Mutex<QueueInner>,
    notify: Notify,
    config: QueueConfig,
}

impl HandoffQueue {
    pub fn new(config: QueueConfig) -> Self {
        Self {
            inner: Mutex::new(QueueInner::default()),
            notify: Notify::new(),
            config,
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    /// Returns false when the message was suppressed as a duplicate.
    pub fn enqueue(&self, message: HandoffMessage) -> bool {
        let now = Utc::now();
        let token = message.dedup_token(now, self.config.dedup_window_secs);
        let window = chrono::Duration::seconds(self.config.dedup_window_secs);

        let mut inner = self.inner.lock().expect("queue lock poisoned");
        inner.seen_tokens.retain(|_, seen| now - *seen < window);
        if inner.seen_tokens.contains_key(&token) {
            tracing::debug!(
                project_id = %message.project_id,
                agent = %message.agent_name,
                "duplicate hand-off suppressed"
            );
            return false;
        }
        inner.seen_tokens.insert(token, now);

        let project_id = message.project_id;
        inner
            .channels
            .entry(project_id)
            .or_default()
            .push_back(Pending {
                message,
                attempt: 1,
            });
        Self::mark_ready(&mut inner, project_id);
        drop(inner);

        self.notify.notify_one();
        true
    }

    /// Waits for the next deliverable message.
    pub async fn recv(&self) -> Delivery {
        loop {
            let notified = self.notify.notified();
            if let Some(delivery) = self.try_deliver() {
                return delivery;
            }
            notified.await;
        }
    }

    fn try_deliver(&self) -> Option<Delivery> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        while let Some(project_id) = inner.ready.pop_front() {
            if Self::project_in_flight(&inner, project_id) {
                continue;
            }
            let Some(channel) = inner.channels.get_mut(&project_id) else {
                continue;
            };
            let Some(pending) = channel.pop_front() else {
                continue;
            };
            if channel.is_empty() {
                inner.channels.remove(&project_id);
            }

            let receipt = Uuid::new_v4();
            let deadline =
                Instant::now() + Duration::from_secs(self.config.visibility_timeout_secs);
            let delivery = Delivery {
                receipt,
                message: pending.message.clone(),
                attempt: pending.attempt,
            };
            inner.in_flight.insert(
                receipt,
                InFlight {
                    message: pending.message,
                    attempt: pending.attempt,
                    deadline,
                },
            );
            return Some(delivery);
        }
        None
    }

    /// Marks a delivery as processed.
    pub fn ack(&self, receipt: Uuid) {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        if let Some(done) = inner.in_flight.remove(&receipt) {
            let project_id = done.message.project_id;
            if Self::mark_ready(&mut inner, project_id) {
                drop(inner);
                self.notify.notify_one();
            }
        }
    }

    /// Gives a delivery back for redelivery; dead-letters once the allowed
    /// attempts are exhausted.
    pub fn nack(&self, receipt: Uuid) -> Option<NackOutcome> {
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let in_flight = inner.in_flight.remove(&receipt)?;
        let outcome = Self::release(&mut inner, in_flight, &self.config);
        drop(inner);
        self.notify.notify_one();
        Some(outcome)
    }

    /// Redelivers every in-flight message whose visibility timeout expired.
    /// The caller owns terminal handling of any dead-lettered messages.
    pub fn release_expired(&self) -> Vec<NackOutcome> {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("queue lock poisoned");
        let expired: Vec<Uuid> = inner
            .in_flight
            .iter()
            .filter(|(_, f)| f.deadline <= now)
            .map(|(receipt, _)| *receipt)
            .collect();

        let mut outcomes = Vec::with_capacity(expired.len());
        for receipt in expired {
            if let Some(in_flight) = inner.in_flight.remove(&receipt) {
                tracing::warn!(
                    project_id = %in_flight.message.project_id,
                    agent = %in_flight.message.agent_name,
                    attempt = in_flight.attempt,
                    "visibility timeout expired, releasing hand-off"
                );
                outcomes.push(Self::release(&mut inner, in_flight, &self.config));
            }
        }
        drop(inner);

        if !outcomes.is_empty() {
            self.notify.notify_one();
        }
        outcomes
    }

    fn release(inner: &mut QueueInner, in_flight: InFlight, config: &QueueConfig) -> NackOutcome {
        let project_id = in_flight.message.project_id;
        if in_flight.attempt >= config.max_attempts {
            // Later hand-offs for a dead project would run out of order;
            // drop them with the dead-lettered head.
            if let Some(channel) = inner.channels.remove(&project_id) {
                if !channel.is_empty() {
                    tracing::warn!(
                        project_id = %project_id,
                        dropped = channel.len(),
                        "dropping queued hand-offs behind a dead-lettered message"
                    );
                }
            }
            return NackOutcome::DeadLettered(in_flight.message);
        }

        let attempt = in_flight.attempt + 1;
        inner
            .channels
            .entry(project_id)
            .or_default()
            .push_front(Pending {
                message: in_flight.message,
                attempt,
            });
        Self::mark_ready(inner, project_id);
        NackOutcome::Requeued { attempt }
    }

    fn project_in_flight(inner: &QueueInner, project_id: Uuid) -> bool {
        inner
            .in_flight
            .values()
            .any(|f| f.message.project_id == project_id)
    }

    fn mark_ready(inner: &mut QueueInner, project_id: Uuid) -> bool {
        let deliverable = inner
            .channels
            .get(&project_id)
            .is_some_and(|c| !c.is_empty())
            && !Self::project_in_flight(inner, project_id);
        if deliverable && !inner.ready.contains(&project_id) {
            inner.ready.push_back(project_id);
            return true;
        }
        false
    }

    /// Messages waiting in a project's channel (in-flight excluded).
    pub fn pending_count(&self, project_id: Uuid) -> usize {
        let inner = self.inner.lock().expect("queue lock poisoned");
        inner.channels.get(&project_id).map_or(0, |c| c.len())
    }

    pub fn in_flight_count(&self) -> usize {
        let inner = self.inner.lock().expect("queue lock poisoned");
        inner.in_flight.len()
    }
}
