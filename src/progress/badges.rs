//! Badge rules and idempotent awarding.

use std::fmt;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use super::snapshot::{ContentKind, ProgressSnapshot};

#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct BadgeId(String);

impl BadgeId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for BadgeId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for BadgeId {
    fn from(value: &str) -> Self {
        Self::new(value)
    }
}

/// Counter derived from snapshot state that a badge threshold is tested against.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Counter {
    Completed(ContentKind),
    StreakDays,
    Level,
}

impl Counter {
    fn read(&self, snapshot: &ProgressSnapshot) -> u64 {
        match self {
            Self::Completed(kind) => snapshot.completed_count(*kind) as u64,
            Self::StreakDays => u64::from(snapshot.streak_days),
            Self::Level => u64::from(snapshot.level),
        }
    }
}

/// The counted event that prompts a badge check.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Trigger {
    ContentCompleted(ContentKind),
    StreakReached,
    LevelReached,
}

impl Trigger {
    fn counter(&self) -> Counter {
        match self {
            Self::ContentCompleted(kind) => Counter::Completed(*kind),
            Self::StreakReached => Counter::StreakDays,
            Self::LevelReached => Counter::Level,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadgeRule {
    pub id: BadgeId,
    pub counter: Counter,
    pub threshold: u64,
}

impl BadgeRule {
    pub fn new(id: &str, counter: Counter, threshold: u64) -> Self {
        Self {
            id: BadgeId::new(id),
            counter,
            threshold,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BadgeRegistry {
    rules: Vec<BadgeRule>,
}

impl Default for BadgeRegistry {
    fn default() -> Self {
        use ContentKind::*;
        Self::new(vec![
            BadgeRule::new("first-story", Counter::Completed(Story), 1),
            BadgeRule::new("story-explorer", Counter::Completed(Story), 10),
            BadgeRule::new("bookworm", Counter::Completed(Story), 50),
            BadgeRule::new("first-lesson", Counter::Completed(Lesson), 1),
            BadgeRule::new("lesson-scholar", Counter::Completed(Lesson), 25),
            BadgeRule::new("word-collector", Counter::Completed(Word), 50),
            BadgeRule::new("word-wizard", Counter::Completed(Word), 200),
            BadgeRule::new("game-champion", Counter::Completed(Game), 10),
            BadgeRule::new("challenge-accepted", Counter::Completed(Challenge), 1),
            BadgeRule::new("clear-speaker", Counter::Completed(Pronunciation), 20),
            BadgeRule::new("streak-7", Counter::StreakDays, 7),
            BadgeRule::new("streak-30", Counter::StreakDays, 30),
            BadgeRule::new("streak-100", Counter::StreakDays, 100),
            BadgeRule::new("level-5", Counter::Level, 5),
            BadgeRule::new("level-10", Counter::Level, 10),
        ])
    }
}

impl BadgeRegistry {
    pub fn new(rules: Vec<BadgeRule>) -> Self {
        Self { rules }
    }

    pub fn rules(&self) -> &[BadgeRule] {
        &self.rules
    }

    /// Award every not-yet-held badge whose threshold the trigger's counter
    /// has reached. Returns the newly awarded ids; already-held badges are
    /// skipped silently.
    pub fn check_and_award(
        &self,
        snapshot: &mut ProgressSnapshot,
        trigger: Trigger,
        now: DateTime<Utc>,
    ) -> Vec<BadgeId> {
        let counter = trigger.counter();
        let value = counter.read(snapshot);
        let mut awarded = Vec::new();
        for rule in self.rules.iter().filter(|r| r.counter == counter) {
            if value >= rule.threshold && award(snapshot, &rule.id, now) {
                awarded.push(rule.id.clone());
            }
        }
        awarded
    }
}

/// Insert a badge unless it is already held. Returns whether it was new.
pub fn award(snapshot: &mut ProgressSnapshot, id: &BadgeId, now: DateTime<Utc>) -> bool {
    if snapshot.badges.contains_key(id) {
        return false;
    }
    snapshot.badges.insert(id.clone(), now);
    true
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::snapshot::ContentId;

    #[test]
    fn test_award_is_idempotent() {
        let mut s = ProgressSnapshot::default();
        let first = Utc::now();
        let id = BadgeId::new("first-story");
        assert!(award(&mut s, &id, first));
        assert!(!award(&mut s, &id, first + chrono::Duration::hours(1)));
        assert_eq!(s.badges.len(), 1);
        assert_eq!(s.badges[&id], first);
    }

    #[test]
    fn test_first_story_awarded_once() {
        let registry = BadgeRegistry::default();
        let mut s = ProgressSnapshot::default();
        s.completed_content_ids.insert(ContentId::story("a"));

        let trigger = Trigger::ContentCompleted(ContentKind::Story);
        let awarded = registry.check_and_award(&mut s, trigger, Utc::now());
        assert_eq!(awarded, vec![BadgeId::new("first-story")]);

        let again = registry.check_and_award(&mut s, trigger, Utc::now());
        assert!(again.is_empty());
        assert_eq!(s.badges.len(), 1);
    }

    #[test]
    fn test_trigger_only_checks_its_counter() {
        let registry = BadgeRegistry::default();
        let mut s = ProgressSnapshot {
            streak_days: 30,
            ..ProgressSnapshot::default()
        };
        s.completed_content_ids.insert(ContentId::lesson("l1"));

        let awarded = registry.check_and_award(&mut s, Trigger::StreakReached, Utc::now());
        assert_eq!(
            awarded,
            vec![BadgeId::new("streak-7"), BadgeId::new("streak-30")]
        );
        assert!(!s.has_badge(&BadgeId::new("first-lesson")));
    }

    #[test]
    fn test_below_threshold_awards_nothing() {
        let registry = BadgeRegistry::default();
        let mut s = ProgressSnapshot {
            level: 4,
            ..ProgressSnapshot::default()
        };
        assert!(registry
            .check_and_award(&mut s, Trigger::LevelReached, Utc::now())
            .is_empty());
        s.level = 5;
        assert_eq!(
            registry.check_and_award(&mut s, Trigger::LevelReached, Utc::now()),
            vec![BadgeId::new("level-5")]
        );
    }

    #[test]
    fn test_custom_rules() {
        let registry = BadgeRegistry::new(vec![BadgeRule::new(
            "three-words",
            Counter::Completed(ContentKind::Word),
            3,
        )]);
        let mut s = ProgressSnapshot::default();
        for w in ["uno", "dos"] {
            s.completed_content_ids.insert(ContentId::word(w));
        }
        let trigger = Trigger::ContentCompleted(ContentKind::Word);
        assert!(registry.check_and_award(&mut s, trigger, Utc::now()).is_empty());
        s.completed_content_ids.insert(ContentId::word("tres"));
        assert_eq!(registry.check_and_award(&mut s, trigger, Utc::now()).len(), 1);
    }
}
