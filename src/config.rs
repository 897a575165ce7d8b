use std::path::PathBuf;

use chrono::{Local, NaiveDate};
use kidlingo_sync::progress::{LevelCurve, ProgressRules};
use kidlingo_sync::retry::RetryConfig;
use kidlingo_sync::sync::SyncConfig;

use crate::cli::Cli;

/// Application configuration resolved from the command line.
pub struct Config {
    pub learner_id: String,
    pub server: Option<String>,
    pub token: Option<String>,
    pub data_dir: PathBuf,
    /// Pinned date for streak bookkeeping; `None` uses the device clock.
    pub today: Option<NaiveDate>,
    pub rules: ProgressRules,
    pub sync: SyncConfig,
    pub content_budget_bytes: Option<u64>,
    pub offline: bool,
}

impl std::fmt::Debug for Config {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Config")
            .field("learner_id", &self.learner_id)
            .field("server", &self.server)
            .field("token", &self.token.as_ref().map(|_| "<redacted>"))
            .field("data_dir", &self.data_dir)
            .field("today", &self.today)
            .field("offline", &self.offline)
            .finish_non_exhaustive()
    }
}

fn expand_tilde(path: &str) -> PathBuf {
    if let Some(stripped) = path.strip_prefix("~/") {
        if let Some(home) = dirs::home_dir() {
            return home.join(stripped);
        }
    }
    PathBuf::from(path)
}

impl Config {
    pub fn from_cli(cli: &Cli) -> anyhow::Result<Self> {
        if cli.xp_per_level == 0 {
            anyhow::bail!("--xp-per-level must be at least 1");
        }
        if cli.learner.trim().is_empty() {
            anyhow::bail!("--learner must not be empty");
        }

        let today = cli
            .today
            .as_deref()
            .map(parse_date_or_interval)
            .transpose()?;

        let rules = ProgressRules {
            curve: LevelCurve::new(cli.xp_per_level),
            ..ProgressRules::default()
        };
        let sync = SyncConfig {
            retry: RetryConfig {
                max_retries: cli.max_retries,
                base_delay_secs: cli.retry_delay,
                ..RetryConfig::default()
            },
        };

        Ok(Self {
            learner_id: cli.learner.clone(),
            server: cli.server.clone(),
            token: cli.token.clone(),
            data_dir: expand_tilde(&cli.data_dir),
            today,
            rules,
            sync,
            content_budget_bytes: cli.content_budget_mb.map(|mb| mb.saturating_mul(1024 * 1024)),
            offline: cli.offline,
        })
    }

    pub fn db_path(&self) -> PathBuf {
        self.data_dir.join("state.db")
    }

    pub fn content_dir(&self) -> PathBuf {
        self.data_dir.join("content")
    }
}

/// Parse a human-friendly date.
///
/// - Relative interval: `"3d"` (three days before the local date)
/// - ISO date: `"2025-01-02"`
pub(crate) fn parse_date_or_interval(s: &str) -> anyhow::Result<NaiveDate> {
    if let Some(days_str) = s.strip_suffix('d') {
        if let Ok(days) = days_str.parse::<u64>() {
            let today = Local::now().date_naive();
            if let Some(date) = today.checked_sub_days(chrono::Days::new(days)) {
                return Ok(date);
            }
        }
    }
    if let Ok(date) = NaiveDate::parse_from_str(s, "%Y-%m-%d") {
        return Ok(date);
    }
    anyhow::bail!(
        "Cannot parse '{}' as a date. Expected ISO date (2025-01-02) or interval (3d)",
        s
    )
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;

    fn parse(args: &[&str]) -> Cli {
        let mut full = vec!["kidlingo-sync"];
        full.extend_from_slice(args);
        Cli::try_parse_from(full).unwrap()
    }

    #[test]
    fn test_expand_tilde_with_home() {
        let result = expand_tilde("~/Documents");
        if let Some(home) = dirs::home_dir() {
            assert_eq!(result, home.join("Documents"));
        }
    }

    #[test]
    fn test_expand_tilde_no_prefix() {
        assert_eq!(
            expand_tilde("/absolute/path"),
            PathBuf::from("/absolute/path")
        );
        assert_eq!(
            expand_tilde("relative/path"),
            PathBuf::from("relative/path")
        );
    }

    #[test]
    fn test_parse_date_iso() {
        assert_eq!(
            parse_date_or_interval("2025-01-15").unwrap(),
            NaiveDate::from_ymd_opt(2025, 1, 15).unwrap()
        );
    }

    #[test]
    fn test_parse_interval_days() {
        let expected = Local::now().date_naive() - chrono::Duration::days(3);
        let parsed = parse_date_or_interval("3d").unwrap();
        // tolerate a midnight rollover between the two reads
        assert!(parsed == expected || parsed == expected + chrono::Duration::days(1));
    }

    #[test]
    fn test_parse_invalid_date() {
        assert!(parse_date_or_interval("not-a-date").is_err());
        assert!(parse_date_or_interval("").is_err());
        assert!(parse_date_or_interval("-2d").is_err());
    }

    #[test]
    fn test_from_cli_builds_engine_configs() {
        let cli = parse(&[
            "status",
            "--data-dir",
            "/tmp/kl",
            "--xp-per-level",
            "50",
            "--max-retries",
            "5",
            "--retry-delay",
            "1",
            "--content-budget-mb",
            "2",
            "--today",
            "2025-04-01",
        ]);
        let cfg = Config::from_cli(&cli).unwrap();
        assert_eq!(cfg.rules.curve, LevelCurve::new(50));
        assert_eq!(cfg.rules.streak_bonus_xp, 10);
        assert_eq!(cfg.sync.retry.max_retries, 5);
        assert_eq!(cfg.sync.retry.base_delay_secs, 1);
        assert_eq!(cfg.sync.retry.max_delay_secs, 60);
        assert_eq!(cfg.content_budget_bytes, Some(2 * 1024 * 1024));
        assert_eq!(cfg.today, NaiveDate::from_ymd_opt(2025, 4, 1));
        assert_eq!(cfg.db_path(), PathBuf::from("/tmp/kl/state.db"));
        assert_eq!(cfg.content_dir(), PathBuf::from("/tmp/kl/content"));
    }

    #[test]
    fn test_from_cli_rejects_zero_level_step() {
        let cli = parse(&["status", "--xp-per-level", "0"]);
        assert!(Config::from_cli(&cli).is_err());
    }

    #[test]
    fn test_debug_redacts_token() {
        let cli = parse(&["status", "--token", "s3cret"]);
        let cfg = Config::from_cli(&cli).unwrap();
        let debug = format!("{cfg:?}");
        assert!(!debug.contains("s3cret"));
        assert!(debug.contains("<redacted>"));
    }
}
