//! In-memory FIFO of mutating calls waiting for connectivity.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use tracing::{debug, info, warn};

use crate::error::GatewayError;
use crate::transport::HttpMethod;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PendingAction {
    pub seq: u64,
    pub endpoint: String,
    pub method: HttpMethod,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub payload: Option<Value>,
    pub enqueued_at: DateTime<Utc>,
    pub replay_attempts: u32,
}

/// Replays one queued action against the API.
#[async_trait]
pub trait ActionReplayer: Send + Sync {
    async fn replay(&self, action: &PendingAction) -> Result<Value, GatewayError>;

    /// Checked before each replay; `false` pauses the drain pass.
    fn can_replay(&self) -> bool {
        true
    }
}

#[async_trait]
impl<R> ActionReplayer for std::sync::Arc<R>
where
    R: ActionReplayer + ?Sized,
{
    async fn replay(&self, action: &PendingAction) -> Result<Value, GatewayError> {
        (**self).replay(action).await
    }

    fn can_replay(&self) -> bool {
        (**self).can_replay()
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct DrainSummary {
    pub replayed: Vec<u64>,
    pub failed: Vec<u64>,
    pub evicted: Vec<PendingAction>,
    pub remaining: usize,
    /// The pass stopped early because the replayer went unavailable.
    pub interrupted: bool,
}

impl DrainSummary {
    #[must_use]
    pub fn is_noop(&self) -> bool {
        self.replayed.is_empty() && self.failed.is_empty() && self.evicted.is_empty()
    }

    /// One-line text for the post-drain notification.
    #[must_use]
    pub fn describe(&self) -> String {
        let mut text = format!("Synced {} pending action(s)", self.replayed.len());
        if !self.failed.is_empty() {
            text.push_str(&format!(", {} still pending", self.failed.len()));
        }
        if !self.evicted.is_empty() {
            text.push_str(&format!(", {} dropped after repeated failures", self.evicted.len()));
        }
        if self.interrupted {
            text.push_str(", paused until the connection returns");
        }
        text
    }
}

pub struct ActionReplayQueue {
    actions: Mutex<VecDeque<PendingAction>>,
    next_seq: AtomicU64,
    draining: AtomicBool,
    poison_threshold: Option<u32>,
}

impl ActionReplayQueue {
    #[must_use]
    pub fn new(poison_threshold: Option<u32>) -> Self {
        Self {
            actions: Mutex::new(VecDeque::new()),
            next_seq: AtomicU64::new(1),
            draining: AtomicBool::new(false),
            poison_threshold: poison_threshold.filter(|threshold| *threshold > 0),
        }
    }

    /// Append to the tail. Identical actions are kept and replayed twice.
    pub fn enqueue(&self, endpoint: impl Into<String>, method: HttpMethod, payload: Option<Value>) -> u64 {
        let seq = self.next_seq.fetch_add(1, Ordering::SeqCst);
        let action = PendingAction {
            seq,
            endpoint: endpoint.into(),
            method,
            payload,
            enqueued_at: Utc::now(),
            replay_attempts: 0,
        };
        info!(seq, endpoint = %action.endpoint, method = %method, "queued action for replay");
        self.lock().push_back(action);
        seq
    }

    #[must_use]
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.lock().is_empty()
    }

    #[must_use]
    pub fn snapshot(&self) -> Vec<PendingAction> {
        self.lock().iter().cloned().collect()
    }

    pub fn remove(&self, seq: u64) -> Option<PendingAction> {
        let mut actions = self.lock();
        let index = actions.iter().position(|action| action.seq == seq)?;
        actions.remove(index)
    }

    pub fn clear(&self) -> usize {
        let mut actions = self.lock();
        let cleared = actions.len();
        actions.clear();
        cleared
    }

    /// Replay queued actions head to tail, one at a time.
    ///
    /// A failed action keeps its place and the pass moves on. Actions enqueued
    /// while the pass runs wait for the next drain; actions removed while it
    /// runs are skipped. The pass stops, leaving the rest untouched, once the
    /// replayer reports it cannot replay. A second drain requested while one
    /// is running returns an empty summary.
    pub async fn drain<R>(&self, replayer: &R) -> DrainSummary
    where
        R: ActionReplayer + ?Sized,
    {
        if self
            .draining
            .compare_exchange(false, true, Ordering::SeqCst, Ordering::SeqCst)
            .is_err()
        {
            debug!("drain already in progress");
            return DrainSummary {
                remaining: self.len(),
                ..DrainSummary::default()
            };
        }
        let _guard = DrainGuard(&self.draining);

        let pending = self.snapshot();
        let mut summary = DrainSummary::default();
        for action in pending {
            if !replayer.can_replay() {
                debug!(seq = action.seq, "replayer unavailable; pausing drain");
                summary.interrupted = true;
                break;
            }
            if !self.contains(action.seq) {
                debug!(seq = action.seq, "action removed before replay");
                continue;
            }
            match replayer.replay(&action).await {
                Ok(_) => {
                    debug!(seq = action.seq, endpoint = %action.endpoint, "replayed action");
                    self.remove(action.seq);
                    summary.replayed.push(action.seq);
                }
                Err(error) => {
                    warn!(seq = action.seq, endpoint = %action.endpoint, error = %error, "replay failed; keeping action");
                    match self.record_failure(action.seq) {
                        Some(evicted) => summary.evicted.push(evicted),
                        None => summary.failed.push(action.seq),
                    }
                }
            }
        }

        summary.remaining = self.len();
        info!(
            replayed = summary.replayed.len(),
            failed = summary.failed.len(),
            evicted = summary.evicted.len(),
            remaining = summary.remaining,
            interrupted = summary.interrupted,
            "drain finished"
        );
        summary
    }

    fn contains(&self, seq: u64) -> bool {
        self.lock().iter().any(|action| action.seq == seq)
    }

    /// Bump the attempt count; evict and return the action once it is poisoned.
    fn record_failure(&self, seq: u64) -> Option<PendingAction> {
        let mut actions = self.lock();
        let index = actions.iter().position(|action| action.seq == seq)?;
        let action = actions.get_mut(index)?;
        action.replay_attempts += 1;
        let threshold = self.poison_threshold?;
        if action.replay_attempts < threshold {
            return None;
        }
        warn!(seq, attempts = action.replay_attempts, "evicting poisoned action");
        actions.remove(index)
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, VecDeque<PendingAction>> {
        self.actions
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl Default for ActionReplayQueue {
    fn default() -> Self {
        Self::new(None)
    }
}

struct DrainGuard<'a>(&'a AtomicBool);

impl Drop for DrainGuard<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::SeqCst);
    }
}
