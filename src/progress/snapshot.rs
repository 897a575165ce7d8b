//! Learner progress snapshot and content identifiers.

use std::collections::{BTreeMap, BTreeSet};
use std::fmt;
use std::str::FromStr;

use chrono::{DateTime, NaiveDate, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use super::badges::BadgeId;

/// Kind of creditable learning content.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ContentKind {
    Story,
    Lesson,
    Word,
    Game,
    Challenge,
    Pronunciation,
}

impl ContentKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Story => "story",
            Self::Lesson => "lesson",
            Self::Word => "word",
            Self::Game => "game",
            Self::Challenge => "challenge",
            Self::Pronunciation => "pronunciation",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "story" => Some(Self::Story),
            "lesson" => Some(Self::Lesson),
            "word" => Some(Self::Word),
            "game" => Some(Self::Game),
            "challenge" => Some(Self::Challenge),
            "pronunciation" => Some(Self::Pronunciation),
            _ => None,
        }
    }
}

#[derive(Debug, Error, PartialEq, Eq)]
#[error("invalid content id '{0}', expected <kind>:<id> (e.g. story:forest-friends)")]
pub struct ParseContentIdError(pub String);

/// Identifier of a credited piece of content, written as `kind:id`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub struct ContentId {
    kind: ContentKind,
    id: String,
}

impl ContentId {
    pub fn new(kind: ContentKind, id: impl Into<String>) -> Self {
        Self {
            kind,
            id: id.into(),
        }
    }

    pub fn story(id: impl Into<String>) -> Self {
        Self::new(ContentKind::Story, id)
    }

    pub fn lesson(id: impl Into<String>) -> Self {
        Self::new(ContentKind::Lesson, id)
    }

    pub fn word(id: impl Into<String>) -> Self {
        Self::new(ContentKind::Word, id)
    }

    pub fn kind(&self) -> ContentKind {
        self.kind
    }

    pub fn id(&self) -> &str {
        &self.id
    }
}

impl fmt::Display for ContentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.kind.as_str(), self.id)
    }
}

impl FromStr for ContentId {
    type Err = ParseContentIdError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let (kind, id) = s
            .split_once(':')
            .ok_or_else(|| ParseContentIdError(s.to_string()))?;
        let kind = ContentKind::parse(kind).ok_or_else(|| ParseContentIdError(s.to_string()))?;
        if id.is_empty() {
            return Err(ParseContentIdError(s.to_string()));
        }
        Ok(Self::new(kind, id))
    }
}

impl TryFrom<String> for ContentId {
    type Error = ParseContentIdError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<ContentId> for String {
    fn from(value: ContentId) -> Self {
        value.to_string()
    }
}

/// Per-learner progress aggregate.
///
/// `xp` counts only the experience accumulated inside the current level;
/// after every mutation `xp < threshold(level)` holds.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressSnapshot {
    pub xp: u64,
    pub level: u32,
    pub streak_days: u32,
    pub last_practice_date: Option<NaiveDate>,
    /// Earned badges and when each was earned.
    #[serde(default)]
    pub badges: BTreeMap<BadgeId, DateTime<Utc>>,
    #[serde(default)]
    pub completed_content_ids: BTreeSet<ContentId>,
}

impl Default for ProgressSnapshot {
    fn default() -> Self {
        Self {
            xp: 0,
            level: 1,
            streak_days: 0,
            last_practice_date: None,
            badges: BTreeMap::new(),
            completed_content_ids: BTreeSet::new(),
        }
    }
}

impl ProgressSnapshot {
    /// Number of credited items of the given kind.
    pub fn completed_count(&self, kind: ContentKind) -> usize {
        self.completed_content_ids
            .iter()
            .filter(|c| c.kind() == kind)
            .count()
    }

    pub fn has_badge(&self, id: &BadgeId) -> bool {
        self.badges.contains_key(id)
    }
}
