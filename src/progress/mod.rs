//! Learner progress: XP and levels, daily streaks, badges and the store
//! that owns the snapshot.

pub mod badges;
pub mod leveling;
pub mod snapshot;
pub mod store;
pub mod streak;

pub use badges::{BadgeId, BadgeRegistry, BadgeRule, Counter, Trigger};
pub use leveling::LevelCurve;
pub use snapshot::{ContentId, ContentKind, ParseContentIdError, ProgressSnapshot};
pub use store::{
    merge_snapshots, ProgressError, ProgressPayload, ProgressReason, ProgressRules,
    ProgressStore, ProgressUpdate,
};
pub use streak::{StreakEvent, StreakMilestones};
