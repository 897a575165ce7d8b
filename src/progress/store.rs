//! Authoritative local progress state for one learner.
//!
//! Every mutation updates the in-memory snapshot, writes it through to the
//! key-value store and enqueues a PROGRESS sync item carrying the new
//! totals. Readers observe changes through [`ProgressStore::subscribe`].

use std::sync::Arc;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tokio::sync::watch;

use super::badges::{BadgeId, BadgeRegistry, Trigger};
use super::leveling::LevelCurve;
use super::snapshot::{ContentId, ProgressSnapshot};
use super::streak::{self, StreakEvent, StreakMilestones};
use crate::clock::Clock;
use crate::state::{self, KeyValueStore, StateError};
use crate::sync::{SyncItemType, SyncQueue, SyncQueueItem};

/// Tunables for XP, streak bonuses and badges.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProgressRules {
    pub curve: LevelCurve,
    /// XP granted each time a streak is continued.
    pub streak_bonus_xp: u64,
    /// Extra XP granted when a streak lands on a milestone.
    pub milestone_bonus_xp: u64,
    pub milestones: StreakMilestones,
    pub badges: BadgeRegistry,
}

impl Default for ProgressRules {
    fn default() -> Self {
        Self {
            curve: LevelCurve::default(),
            streak_bonus_xp: 10,
            milestone_bonus_xp: 50,
            milestones: StreakMilestones::default(),
            badges: BadgeRegistry::default(),
        }
    }
}

/// What a mutation changed, for UI messaging.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ProgressUpdate {
    /// Total XP granted, bonuses included.
    pub xp_awarded: u64,
    pub levels_gained: u32,
    pub streak: Option<StreakEvent>,
    /// Streak milestone reached by this mutation.
    pub milestone: Option<u32>,
    pub badges_awarded: Vec<BadgeId>,
    /// The content had already been credited; nothing changed.
    pub duplicate: bool,
}

#[derive(Debug, Error)]
pub enum ProgressError {
    /// The in-memory snapshot already holds the change; only the write failed.
    #[error("Failed to persist progress: {0}")]
    Persistence(#[from] StateError),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressReason {
    Xp,
    Practice,
    ContentCompleted,
    /// The learner's progress was cleared; the server drops its copy too.
    Reset,
}

/// Body of a PROGRESS sync item. Carries totals rather than deltas so a
/// resent item can never double-count.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ProgressPayload {
    pub learner_id: String,
    pub reason: ProgressReason,
    pub lifetime_xp: u64,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub content_id: Option<ContentId>,
    pub snapshot: ProgressSnapshot,
}

impl ProgressPayload {
    /// Decode a PROGRESS item. `None` for other item types or foreign payloads.
    pub fn from_item(item: &SyncQueueItem) -> Option<Self> {
        if item.item_type != SyncItemType::Progress {
            return None;
        }
        serde_json::from_value(item.payload.clone()).ok()
    }
}

pub struct ProgressStore {
    learner_id: String,
    rules: ProgressRules,
    clock: Arc<dyn Clock>,
    kv: Arc<dyn KeyValueStore>,
    queue: Arc<SyncQueue>,
    snapshot: watch::Sender<ProgressSnapshot>,
    /// Held across mutate + write so writes land in mutation order.
    write_lock: tokio::sync::Mutex<()>,
}

impl std::fmt::Debug for ProgressStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProgressStore")
            .field("learner_id", &self.learner_id)
            .field("snapshot", &*self.snapshot.borrow())
            .finish_non_exhaustive()
    }
}

fn snapshot_key(learner_id: &str) -> String {
    format!("progress/{learner_id}")
}

impl ProgressStore {
    /// Load the learner's snapshot, starting fresh if none was stored.
    pub async fn open(
        learner_id: impl Into<String>,
        rules: ProgressRules,
        clock: Arc<dyn Clock>,
        kv: Arc<dyn KeyValueStore>,
        queue: Arc<SyncQueue>,
    ) -> Result<Self, StateError> {
        let learner_id = learner_id.into();
        let stored: Option<ProgressSnapshot> =
            state::load_json(kv.as_ref(), &snapshot_key(&learner_id)).await?;
        let snapshot = stored.unwrap_or_default();
        tracing::debug!(
            learner = %learner_id,
            level = snapshot.level,
            xp = snapshot.xp,
            streak = snapshot.streak_days,
            "Loaded progress"
        );
        let (tx, _rx) = watch::channel(snapshot);
        Ok(Self {
            learner_id,
            rules,
            clock,
            kv,
            queue,
            snapshot: tx,
            write_lock: tokio::sync::Mutex::new(()),
        })
    }

    pub fn learner_id(&self) -> &str {
        &self.learner_id
    }

    pub fn rules(&self) -> &ProgressRules {
        &self.rules
    }

    pub fn snapshot(&self) -> ProgressSnapshot {
        self.snapshot.borrow().clone()
    }

    pub fn lifetime_xp(&self) -> u64 {
        let s = self.snapshot.borrow();
        self.rules.curve.lifetime_xp(s.level, s.xp)
    }

    /// Receiver that is notified after every change to the snapshot.
    pub fn subscribe(&self) -> watch::Receiver<ProgressSnapshot> {
        self.snapshot.subscribe()
    }

    /// Grant XP. Zero is a no-op.
    pub async fn record_xp(&self, amount: u64) -> Result<ProgressUpdate, ProgressError> {
        let now = self.clock.now();
        self.mutate(ProgressReason::Xp, None, |s, update| {
            self.award_xp(s, amount, now, update);
            amount > 0
        })
        .await
    }

    /// Mark today as practised.
    pub async fn record_practice(&self) -> Result<ProgressUpdate, ProgressError> {
        let today = self.clock.today();
        let now = self.clock.now();
        self.mutate(ProgressReason::Practice, None, |s, update| {
            self.practice(s, today, now, update)
        })
        .await
    }

    /// Credit a finished story/lesson/word once. Repeats are no-ops.
    pub async fn record_content_completion(
        &self,
        content_id: ContentId,
        reward_xp: u64,
    ) -> Result<ProgressUpdate, ProgressError> {
        let today = self.clock.today();
        let now = self.clock.now();
        let kind = content_id.kind();
        let result = self
            .mutate(
                ProgressReason::ContentCompleted,
                Some(content_id.clone()),
                |s, update| {
                    if !s.completed_content_ids.insert(content_id.clone()) {
                        update.duplicate = true;
                        return false;
                    }
                    self.award_xp(s, reward_xp, now, update);
                    self.practice(s, today, now, update);
                    let badges = self
                        .rules
                        .badges
                        .check_and_award(s, Trigger::ContentCompleted(kind), now);
                    update.badges_awarded.extend(badges);
                    true
                },
            )
            .await;
        if let Ok(update) = &result {
            if update.duplicate {
                tracing::debug!(content = %content_id, "Content already credited, skipping");
            }
        }
        result
    }

    /// Merge a server-confirmed snapshot without ever lowering a local counter.
    /// Returns whether the local snapshot changed.
    pub async fn reconcile(&self, server: &ProgressSnapshot) -> Result<bool, ProgressError> {
        let _guard = self.write_lock.lock().await;
        let curve = self.rules.curve;
        let changed = self.snapshot.send_if_modified(|local| {
            let merged = merge_snapshots(&curve, local, server);
            if merged == *local {
                false
            } else {
                *local = merged;
                true
            }
        });
        if changed {
            let snapshot = self.snapshot();
            tracing::info!(
                learner = %self.learner_id,
                level = snapshot.level,
                xp = snapshot.xp,
                "Reconciled progress with server"
            );
            state::save_json(self.kv.as_ref(), &snapshot_key(&self.learner_id), &snapshot).await?;
        }
        Ok(changed)
    }

    /// Clear all progress. Only for explicit user action such as deleting the profile.
    ///
    /// This learner's queued PROGRESS items, pending or failed, still carry
    /// the old totals and are dropped. A reset marker is queued in their
    /// place. Returns how many queued items were discarded.
    pub async fn reset(&self) -> Result<usize, ProgressError> {
        let _guard = self.write_lock.lock().await;
        self.snapshot.send_replace(ProgressSnapshot::default());
        let discarded = self
            .queue
            .remove_where(|item| self.owns(item))
            .await;
        let deleted = self.kv.delete(&snapshot_key(&self.learner_id)).await;
        let enqueued = self
            .enqueue(ProgressReason::Reset, None, ProgressSnapshot::default())
            .await;
        tracing::info!(
            learner = %self.learner_id,
            discarded = discarded.as_ref().copied().unwrap_or(0),
            "Progress reset"
        );
        let discarded = discarded?;
        deleted?;
        enqueued?;
        Ok(discarded)
    }

    /// Whether `item` is a PROGRESS item for this learner.
    pub fn owns(&self, item: &SyncQueueItem) -> bool {
        ProgressPayload::from_item(item).is_some_and(|p| p.learner_id == self.learner_id)
    }

    async fn mutate<F>(
        &self,
        reason: ProgressReason,
        content_id: Option<ContentId>,
        apply: F,
    ) -> Result<ProgressUpdate, ProgressError>
    where
        F: FnOnce(&mut ProgressSnapshot, &mut ProgressUpdate) -> bool,
    {
        let _guard = self.write_lock.lock().await;
        let mut update = ProgressUpdate::default();
        let changed = self.snapshot.send_if_modified(|s| apply(s, &mut update));
        if !changed {
            return Ok(update);
        }

        if update.levels_gained > 0 || !update.badges_awarded.is_empty() {
            tracing::info!(
                learner = %self.learner_id,
                levels_gained = update.levels_gained,
                badges = ?update.badges_awarded,
                "Learner milestone"
            );
        }
        let snapshot = self.snapshot();
        self.commit(snapshot, reason, content_id).await?;
        Ok(update)
    }

    /// Write the snapshot and enqueue it. Both are attempted even if the
    /// first fails; the first error is returned.
    async fn commit(
        &self,
        snapshot: ProgressSnapshot,
        reason: ProgressReason,
        content_id: Option<ContentId>,
    ) -> Result<(), StateError> {
        let persisted =
            state::save_json(self.kv.as_ref(), &snapshot_key(&self.learner_id), &snapshot).await;
        if let Err(e) = &persisted {
            tracing::warn!(
                learner = %self.learner_id,
                error = %e,
                "Failed to persist progress, keeping in-memory state"
            );
        }

        let enqueued = self.enqueue(reason, content_id, snapshot).await;
        persisted.and(enqueued)
    }

    async fn enqueue(
        &self,
        reason: ProgressReason,
        content_id: Option<ContentId>,
        snapshot: ProgressSnapshot,
    ) -> Result<(), StateError> {
        let payload = ProgressPayload {
            learner_id: self.learner_id.clone(),
            reason,
            lifetime_xp: self.rules.curve.lifetime_xp(snapshot.level, snapshot.xp),
            content_id,
            snapshot,
        };
        let enqueued = match serde_json::to_value(&payload) {
            Ok(value) => self.queue.enqueue(SyncItemType::Progress, value).await.map(|_| ()),
            Err(source) => Err(StateError::Serialization {
                key: "sync/queue".to_string(),
                source,
            }),
        };
        if let Err(e) = &enqueued {
            tracing::warn!(learner = %self.learner_id, error = %e, "Failed to enqueue progress");
        }
        enqueued
    }

    fn award_xp(
        &self,
        s: &mut ProgressSnapshot,
        amount: u64,
        now: DateTime<Utc>,
        update: &mut ProgressUpdate,
    ) {
        if amount == 0 {
            return;
        }
        let levels = self.rules.curve.apply_xp(s, amount);
        update.xp_awarded += amount;
        update.levels_gained += levels;
        if levels > 0 {
            let badges = self
                .rules
                .badges
                .check_and_award(s, Trigger::LevelReached, now);
            update.badges_awarded.extend(badges);
        }
    }

    /// Touch the streak; a continued streak earns the bonus, any milestone
    /// bonus and streak badges. Returns whether the snapshot changed.
    fn practice(
        &self,
        s: &mut ProgressSnapshot,
        today: NaiveDate,
        now: DateTime<Utc>,
        update: &mut ProgressUpdate,
    ) -> bool {
        let event = streak::touch(s, today);
        update.streak = Some(event);
        if event == StreakEvent::Continued {
            self.award_xp(s, self.rules.streak_bonus_xp, now, update);
            if let Some(milestone) = self.rules.milestones.reached(s.streak_days) {
                update.milestone = Some(milestone);
                self.award_xp(s, self.rules.milestone_bonus_xp, now, update);
            }
            let badges = self
                .rules
                .badges
                .check_and_award(s, Trigger::StreakReached, now);
            update.badges_awarded.extend(badges);
        }
        event.is_changed()
    }
}

/// Field-wise max merge of local and server progress.
///
/// XP and level are re-derived from the larger lifetime total. The streak
/// comes from whichever side practised most recently (larger count on a
/// tie). Badges and credited content are unioned, keeping the earliest earn
/// time per badge.
pub fn merge_snapshots(
    curve: &LevelCurve,
    local: &ProgressSnapshot,
    server: &ProgressSnapshot,
) -> ProgressSnapshot {
    let lifetime = curve
        .lifetime_xp(local.level, local.xp)
        .max(curve.lifetime_xp(server.level, server.xp));
    let (level, xp) = curve.from_lifetime_xp(lifetime);

    let (streak_days, last_practice_date) =
        match (local.last_practice_date, server.last_practice_date) {
            (Some(l), Some(s)) if s > l => (server.streak_days, Some(s)),
            (Some(l), Some(s)) if s == l => (local.streak_days.max(server.streak_days), Some(l)),
            (Some(l), _) => (local.streak_days, Some(l)),
            (None, Some(s)) => (server.streak_days, Some(s)),
            (None, None) => (local.streak_days.max(server.streak_days), None),
        };

    let mut badges = local.badges.clone();
    for (id, earned_at) in &server.badges {
        badges
            .entry(id.clone())
            .and_modify(|t| *t = (*t).min(*earned_at))
            .or_insert(*earned_at);
    }

    let mut completed_content_ids = local.completed_content_ids.clone();
    completed_content_ids.extend(server.completed_content_ids.iter().cloned());

    ProgressSnapshot {
        xp,
        level,
        streak_days,
        last_practice_date,
        badges,
        completed_content_ids,
    }
}
