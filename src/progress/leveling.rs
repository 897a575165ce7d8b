//! XP and level arithmetic.

use serde::{Deserialize, Serialize};

use super::snapshot::ProgressSnapshot;

/// Linear level curve: reaching level `n + 1` from level `n` costs
/// `xp_per_level * n` XP.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LevelCurve {
    pub xp_per_level: u64,
}

impl Default for LevelCurve {
    fn default() -> Self {
        Self { xp_per_level: 100 }
    }
}

impl LevelCurve {
    pub fn new(xp_per_level: u64) -> Self {
        Self { xp_per_level }
    }

    fn step(&self) -> u64 {
        self.xp_per_level.max(1)
    }

    /// XP needed to advance from `level` to `level + 1`. Never zero.
    pub fn threshold(&self, level: u32) -> u64 {
        self.step().saturating_mul(u64::from(level.max(1)))
    }

    /// Add `amount` to the snapshot's XP and roll over as many levels as the
    /// total covers. Returns the number of levels gained.
    pub fn apply_xp(&self, snapshot: &mut ProgressSnapshot, amount: u64) -> u32 {
        let start = snapshot.level;
        let total = self
            .lifetime_xp(snapshot.level, snapshot.xp)
            .saturating_add(amount);
        let (level, xp) = self.from_lifetime_xp(total);
        snapshot.xp = xp;
        snapshot.level = level;
        level.saturating_sub(start)
    }

    /// Total XP ever earned for a given (level, in-level xp) pair.
    pub fn lifetime_xp(&self, level: u32, xp: u64) -> u64 {
        let cost = self.levels_cost(u64::from(level.max(1) - 1));
        u64::try_from(cost)
            .unwrap_or(u64::MAX)
            .saturating_add(xp)
    }

    /// Inverse of [`lifetime_xp`](Self::lifetime_xp): `(level, xp)` for a lifetime total.
    ///
    /// Levels stop at `u32::MAX`; anything beyond stays in `xp`.
    pub fn from_lifetime_xp(&self, total: u64) -> (u32, u64) {
        let completed = self
            .completed_levels(total)
            .min(u64::from(u32::MAX - 1));
        let cost = self.levels_cost(completed);
        let xp = u128::from(total) - cost;
        let level = u32::try_from(completed + 1).unwrap_or(u32::MAX);
        (level, u64::try_from(xp).unwrap_or(u64::MAX))
    }

    /// Cost of clearing the first `completed` levels:
    /// `step * completed * (completed + 1) / 2`.
    fn levels_cost(&self, completed: u64) -> u128 {
        let n = u128::from(completed);
        u128::from(self.step()) * (n * (n + 1) / 2)
    }

    /// Largest `n` with `levels_cost(n) <= total`.
    fn completed_levels(&self, total: u64) -> u64 {
        let q = u128::from(total / self.step());
        let triangle = |n: u128| n * (n + 1) / 2;
        // n(n+1)/2 <= q  ⇔  n <= (sqrt(8q + 1) - 1) / 2
        let estimate = (((8.0 * q as f64 + 1.0).sqrt() - 1.0) / 2.0) as u128;
        let mut n = estimate;
        while n > 0 && triangle(n) > q {
            n -= 1;
        }
        while triangle(n + 1) <= q {
            n += 1;
        }
        u64::try_from(n).unwrap_or(u64::MAX)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn at(level: u32, xp: u64) -> ProgressSnapshot {
        ProgressSnapshot {
            xp,
            level,
            ..ProgressSnapshot::default()
        }
    }

    #[test]
    fn test_threshold_is_linear() {
        let curve = LevelCurve::default();
        assert_eq!(curve.threshold(1), 100);
        assert_eq!(curve.threshold(2), 200);
        assert_eq!(curve.threshold(7), 700);
    }

    #[test]
    fn test_zero_step_behaves_as_one() {
        let curve = LevelCurve::new(0);
        assert_eq!(curve.threshold(3), 3);
        let mut s = at(1, 0);
        curve.apply_xp(&mut s, 5);
        assert!(s.xp < curve.threshold(s.level));
    }

    #[test]
    fn test_zero_award_is_noop() {
        let curve = LevelCurve::default();
        let mut s = at(3, 42);
        assert_eq!(curve.apply_xp(&mut s, 0), 0);
        assert_eq!(s, at(3, 42));
    }

    #[test]
    fn test_single_level_up() {
        let curve = LevelCurve::default();
        let mut s = at(1, 90);
        assert_eq!(curve.apply_xp(&mut s, 10), 1);
        assert_eq!((s.level, s.xp), (2, 0));
    }

    #[test]
    fn test_large_award_leaves_remainder_below_next_threshold() {
        // 250 - 100 (level 1) = 150, and 150 < 200 so we stop at level 2.
        let curve = LevelCurve::default();
        let mut s = at(1, 0);
        assert_eq!(curve.apply_xp(&mut s, 250), 1);
        assert_eq!((s.level, s.xp), (2, 150));
    }

    #[test]
    fn test_multi_level_jump() {
        let curve = LevelCurve::default();
        let mut s = at(1, 0);
        // 100 + 200 + 300 = 600 → level 4 with 5 left over
        assert_eq!(curve.apply_xp(&mut s, 605), 3);
        assert_eq!((s.level, s.xp), (4, 5));
    }

    #[test]
    fn test_split_awards_match_single_award() {
        let curve = LevelCurve::default();
        for (a, b) in [(0, 0), (1, 99), (50, 50), (250, 1000), (99, 1), (1234, 4321)] {
            let mut split = at(2, 30);
            curve.apply_xp(&mut split, a);
            curve.apply_xp(&mut split, b);

            let mut whole = at(2, 30);
            curve.apply_xp(&mut whole, a + b);

            assert_eq!(split, whole, "a={a} b={b}");
            assert!(split.xp < curve.threshold(split.level));
        }
    }

    #[test]
    fn test_lifetime_round_trip() {
        let curve = LevelCurve::default();
        assert_eq!(curve.lifetime_xp(1, 0), 0);
        assert_eq!(curve.lifetime_xp(2, 150), 250);
        assert_eq!(curve.lifetime_xp(4, 5), 605);
        assert_eq!(curve.from_lifetime_xp(605), (4, 5));
        assert_eq!(curve.from_lifetime_xp(250), (2, 150));
    }

    #[test]
    fn test_huge_award_is_closed_form() {
        let curve = LevelCurve::default();
        let mut s = at(1, 0);
        let gained = curve.apply_xp(&mut s, u64::MAX);
        assert!(gained > 0);
        assert!(s.xp < curve.threshold(s.level));
        assert_eq!(curve.lifetime_xp(s.level, s.xp), u64::MAX);

        // A few more XP on top of a saturated total changes nothing.
        let before = s.clone();
        curve.apply_xp(&mut s, 1_000);
        assert_eq!(s, before);
    }

    #[test]
    fn test_level_caps_at_u32_max() {
        let curve = LevelCurve::new(1);
        let total = curve.lifetime_xp(u32::MAX, 7);
        let (level, xp) = curve.from_lifetime_xp(total);
        assert_eq!(level, u32::MAX);
        assert_eq!(curve.lifetime_xp(level, xp), total);

        let (level, _) = curve.from_lifetime_xp(u64::MAX);
        assert_eq!(level, u32::MAX);
    }

    #[test]
    fn test_level_boundaries_exact() {
        let curve = LevelCurve::new(7);
        for level in 1..200u32 {
            let base = curve.lifetime_xp(level, 0);
            assert_eq!(curve.from_lifetime_xp(base), (level, 0));
            assert_eq!(
                curve.from_lifetime_xp(base + curve.threshold(level) - 1),
                (level, curve.threshold(level) - 1)
            );
        }
    }
}
