//! Daily practice streak tracking.

use chrono::NaiveDate;
use serde::{Deserialize, Serialize};

use super::snapshot::ProgressSnapshot;

/// What a practice touch did to the streak.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum StreakEvent {
    /// Already practised today (or the clock went backwards); nothing changed.
    Unchanged,
    /// Practised yesterday, streak extended by one day.
    Continued,
    /// First practice ever.
    Started,
    /// A gap of two or more days reset the streak to one.
    BrokenAndRestarted,
}

impl StreakEvent {
    pub fn is_changed(&self) -> bool {
        !matches!(self, Self::Unchanged)
    }
}

/// Record practice on `today`.
///
/// Same-day touches are idempotent. A `today` earlier than the stored date is
/// treated as same-day so a clock or timezone change never shrinks a streak.
pub fn touch(snapshot: &mut ProgressSnapshot, today: NaiveDate) -> StreakEvent {
    let event = match snapshot.last_practice_date {
        Some(last) if today <= last => return StreakEvent::Unchanged,
        Some(last) if last.succ_opt() == Some(today) => {
            snapshot.streak_days = snapshot.streak_days.saturating_add(1);
            StreakEvent::Continued
        }
        Some(_) => {
            snapshot.streak_days = 1;
            StreakEvent::BrokenAndRestarted
        }
        None => {
            snapshot.streak_days = 1;
            StreakEvent::Started
        }
    };
    snapshot.last_practice_date = Some(today);
    event
}

/// Streak lengths that earn a milestone bonus.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StreakMilestones {
    days: Vec<u32>,
}

impl Default for StreakMilestones {
    fn default() -> Self {
        Self::new(vec![7, 30, 100])
    }
}

impl StreakMilestones {
    pub fn new(mut days: Vec<u32>) -> Self {
        days.sort_unstable();
        days.dedup();
        Self { days }
    }

    /// The milestone hit by a streak that just reached `streak_days`, if any.
    ///
    /// Streaks grow one day at a time, so a milestone is crossed exactly when
    /// the streak equals it.
    pub fn reached(&self, streak_days: u32) -> Option<u32> {
        self.days.binary_search(&streak_days).ok().map(|_| streak_days)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn day(d: u32) -> NaiveDate {
        NaiveDate::from_ymd_opt(2025, 5, d).unwrap()
    }

    fn practised(on: NaiveDate, streak: u32) -> ProgressSnapshot {
        ProgressSnapshot {
            streak_days: streak,
            last_practice_date: Some(on),
            ..ProgressSnapshot::default()
        }
    }

    #[test]
    fn test_first_touch_starts_streak() {
        let mut s = ProgressSnapshot::default();
        assert_eq!(touch(&mut s, day(1)), StreakEvent::Started);
        assert_eq!(s.streak_days, 1);
        assert_eq!(s.last_practice_date, Some(day(1)));
    }

    #[test]
    fn test_same_day_touches_are_idempotent() {
        let mut s = practised(day(10), 4);
        assert_eq!(touch(&mut s, day(10)), StreakEvent::Unchanged);
        let once = s.clone();
        assert_eq!(touch(&mut s, day(10)), StreakEvent::Unchanged);
        assert_eq!(s, once);
        assert_eq!(s, practised(day(10), 4));
    }

    #[test]
    fn test_next_day_continues() {
        let mut s = practised(day(10), 4);
        assert_eq!(touch(&mut s, day(11)), StreakEvent::Continued);
        assert_eq!(s.streak_days, 5);
        assert_eq!(s.last_practice_date, Some(day(11)));
    }

    #[test]
    fn test_continue_across_month_boundary() {
        let mut s = practised(NaiveDate::from_ymd_opt(2025, 4, 30).unwrap(), 2);
        assert_eq!(touch(&mut s, day(1)), StreakEvent::Continued);
        assert_eq!(s.streak_days, 3);
    }

    #[test]
    fn test_gap_resets_to_one() {
        let mut s = practised(day(10), 12);
        assert_eq!(touch(&mut s, day(15)), StreakEvent::BrokenAndRestarted);
        assert_eq!(s.streak_days, 1);
        assert_eq!(s.last_practice_date, Some(day(15)));
    }

    #[test]
    fn test_clock_moving_backwards_is_unchanged() {
        let mut s = practised(day(10), 3);
        assert_eq!(touch(&mut s, day(9)), StreakEvent::Unchanged);
        assert_eq!(s, practised(day(10), 3));
    }

    #[test]
    fn test_milestones() {
        let m = StreakMilestones::default();
        assert_eq!(m.reached(7), Some(7));
        assert_eq!(m.reached(30), Some(30));
        assert_eq!(m.reached(8), None);
        assert_eq!(m.reached(1), None);
    }

    #[test]
    fn test_milestones_sorted_and_deduped() {
        let m = StreakMilestones::new(vec![30, 7, 7, 3]);
        assert_eq!(m.reached(3), Some(3));
        assert_eq!(m.reached(7), Some(7));
    }
}
