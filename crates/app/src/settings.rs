//! Settings of the sync. Read from `config/splitsync.toml` (or `--config`),
//! then `SPLITSYNC_*` environment variables, then command line flags.
use chrono::NaiveDate;
use chrono_tz::Tz;
use clap::{ArgGroup, Parser};
use engine::EngineError;
use serde::Deserialize;

use crate::error::Result;

const DEFAULT_CONFIG_PATH: &str = "config/splitsync.toml";

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    pub token: Option<String>,
    pub base_url: String,
    pub state_dir: String,
    pub level: String,
    /// IANA name, scopes the hourly call counter.
    pub timezone: String,
    pub hourly_call_limit: Option<u32>,
    pub poll_interval_secs: u64,
    /// Lower bound on transaction dates when polling.
    pub since_date: Option<NaiveDate>,
    pub shared: SharedSettings,
    pub owners: Vec<OwnerSettings>,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            token: None,
            base_url: "https://api.ynab.com/v1".to_string(),
            state_dir: "state".to_string(),
            level: "info".to_string(),
            timezone: "UTC".to_string(),
            hourly_call_limit: Some(200),
            poll_interval_secs: 10,
            since_date: None,
            shared: SharedSettings::default(),
            owners: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Deserialize)]
pub struct SharedSettings {
    pub name: String,
    pub budget_id: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct OwnerSettings {
    pub name: String,
    pub budget_id: String,
    pub shared_account_id: String,
    pub shared_payee_id: String,
    pub balancing_account_id: String,
    pub shared_category_name: String,
    pub balancing_category_name: String,
}

impl Settings {
    /// Rejects settings the process cannot run with.
    pub fn validate(&self) -> std::result::Result<(), EngineError> {
        self.token()?;
        self.timezone()?;
        if self.shared.budget_id.is_empty() {
            return Err(EngineError::Configuration(
                "missing shared budget id".to_string(),
            ));
        }
        if self.owners.len() != 2 {
            return Err(EngineError::Configuration(format!(
                "expected 2 owners, got {}",
                self.owners.len()
            )));
        }
        if let Some(owner) = self
            .owners
            .iter()
            .find(|o| o.shared_category_name.is_empty() || o.balancing_category_name.is_empty())
        {
            return Err(EngineError::Configuration(format!(
                "{}: category names must not be empty",
                owner.name
            )));
        }
        Ok(())
    }

    pub fn token(&self) -> std::result::Result<&str, EngineError> {
        self.token
            .as_deref()
            .filter(|token| !token.trim().is_empty())
            .ok_or_else(|| EngineError::Configuration("could not find YNAB token".to_string()))
    }

    pub fn timezone(&self) -> std::result::Result<Tz, EngineError> {
        self.timezone.parse::<Tz>().map_err(|err| {
            EngineError::Configuration(format!("invalid timezone {}: {err}", self.timezone))
        })
    }
}

/// What a run does.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Mode {
    /// One pass over the whole ledgers.
    All,
    /// One pass over the month containing the date.
    Month(NaiveDate),
    Year(i32),
    /// Passes until shutdown.
    Poll,
    Budgeted,
    Status,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Options {
    pub mode: Mode,
    pub force_refresh_categories: bool,
    pub verbose: bool,
}

impl Options {
    pub fn level<'a>(&self, settings: &'a Settings) -> &'a str {
        if self.verbose { "debug" } else { &settings.level }
    }
}

#[derive(Debug, Parser)]
#[command(name = "splitsync", disable_version_flag = true)]
#[command(group(
    ArgGroup::new("mode").args(["month", "year", "keep_polling", "budgeted", "status"])
))]
struct Args {
    /// Optional config file path (TOML).
    #[arg(long)]
    config: Option<String>,
    /// YNAB personal access token.
    #[arg(short, long, env = "YNAB_TOKEN", hide_env_values = true)]
    token: Option<String>,
    /// Sync only the month containing this date (YYYY-MM-DD).
    #[arg(short, long)]
    month: Option<NaiveDate>,
    /// Sync only this calendar year.
    #[arg(short, long)]
    year: Option<i32>,
    /// Keep syncing, waiting `poll_interval_secs` between passes.
    #[arg(short = 'c', long = "continue")]
    keep_polling: bool,
    /// Report the monthly allocated budget into the shared budget.
    #[arg(short, long)]
    budgeted: bool,
    /// Print a consistency report and exit.
    #[arg(long)]
    status: bool,
    /// Look the categories up again instead of using the saved ones.
    #[arg(long)]
    force_refresh_categories: bool,
    /// Enable debug logging.
    #[arg(short, long)]
    verbose: bool,
}

pub fn load() -> Result<(Settings, Options)> {
    from_sources(Args::parse(), environment())
}

/// `SPLITSYNC_TOKEN`, `SPLITSYNC_SHARED__BUDGET_ID`, ...
fn environment() -> config::Environment {
    config::Environment::with_prefix("SPLITSYNC")
        .prefix_separator("_")
        .separator("__")
        .try_parsing(true)
}

fn from_sources(args: Args, environment: config::Environment) -> Result<(Settings, Options)> {
    let config_path = args.config.as_deref().unwrap_or(DEFAULT_CONFIG_PATH);
    let builder = config::Config::builder()
        .add_source(config::File::with_name(config_path).required(false))
        .add_source(environment);
    let mut settings: Settings = builder.build()?.try_deserialize()?;

    if let Some(token) = args.token {
        settings.token = Some(token);
    }

    let mode = if args.status {
        Mode::Status
    } else if args.budgeted {
        Mode::Budgeted
    } else if let Some(month) = args.month {
        Mode::Month(month)
    } else if let Some(year) = args.year {
        Mode::Year(year)
    } else if args.keep_polling {
        Mode::Poll
    } else {
        Mode::All
    };

    Ok((
        settings,
        Options {
            mode,
            force_refresh_categories: args.force_refresh_categories,
            verbose: args.verbose,
        },
    ))
}

#[cfg(test)]
mod tests {
    use std::{fs, path::PathBuf};

    use uuid::Uuid;

    use super::*;

    const SAMPLE: &str = r#"
token = "secret"
timezone = "Europe/Rome"
poll_interval_secs = 30

[shared]
name = "Shared"
budget_id = "shared-budget"

[[owners]]
name = "alice"
budget_id = "alice-budget"
shared_account_id = "alice-shared-acc"
shared_payee_id = "alice-payee"
balancing_account_id = "alice-balancing-acc"
shared_category_name = "Shared Expenses"
balancing_category_name = "Balancing"

[[owners]]
name = "bob"
budget_id = "bob-budget"
shared_account_id = "bob-shared-acc"
shared_payee_id = "bob-payee"
balancing_account_id = "bob-balancing-acc"
shared_category_name = "Shared Expenses"
balancing_category_name = "Balancing"
"#;

    fn config_file(content: &str) -> PathBuf {
        let dir = PathBuf::from("target/test_state").join(Uuid::new_v4().to_string());
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("splitsync.toml");
        fs::write(&path, content).unwrap();
        path
    }

    fn parse_with_env(args: &[&str], vars: &[(&str, &str)]) -> (Settings, Options) {
        let path = config_file(SAMPLE);
        let mut argv = vec!["splitsync", "--config", path.to_str().unwrap()];
        argv.extend_from_slice(args);
        let mut env = config::Map::new();
        for (key, value) in vars {
            env.insert(key.to_string(), value.to_string());
        }
        from_sources(
            Args::try_parse_from(argv).unwrap(),
            environment().source(Some(env)),
        )
        .unwrap()
    }

    fn parse(args: &[&str]) -> (Settings, Options) {
        parse_with_env(args, &[])
    }

    #[test]
    fn file_values_and_defaults() {
        let (settings, options) = parse(&[]);
        assert_eq!(options.mode, Mode::All);
        assert_eq!(settings.poll_interval_secs, 30);
        assert_eq!(settings.hourly_call_limit, Some(200));
        assert_eq!(settings.base_url, "https://api.ynab.com/v1");
        assert_eq!(settings.owners.len(), 2);
        assert_eq!(settings.timezone().unwrap(), chrono_tz::Europe::Rome);
        settings.validate().unwrap();
    }

    #[test]
    fn flags_select_the_mode() {
        let (_, options) = parse(&["-m", "2024-02-10"]);
        assert_eq!(
            options.mode,
            Mode::Month(NaiveDate::from_ymd_opt(2024, 2, 10).unwrap())
        );
        assert_eq!(parse(&["-y", "2023"]).1.mode, Mode::Year(2023));
        assert_eq!(parse(&["-c"]).1.mode, Mode::Poll);
        assert_eq!(parse(&["-b"]).1.mode, Mode::Budgeted);
        assert_eq!(parse(&["--status"]).1.mode, Mode::Status);

        let (settings, options) = parse(&["-v", "-t", "other"]);
        assert_eq!(options.level(&settings), "debug");
        assert_eq!(settings.token().unwrap(), "other");
    }

    #[test]
    fn environment_overrides_the_file() {
        let (settings, _) = parse_with_env(
            &[],
            &[
                ("SPLITSYNC_TOKEN", "from-env"),
                ("SPLITSYNC_SHARED__BUDGET_ID", "env-shared"),
                ("SPLITSYNC_POLL_INTERVAL_SECS", "45"),
                ("SPLITSYNC_STATE_DIR", "/var/lib/splitsync"),
                ("OTHER_TOKEN", "ignored"),
            ],
        );
        assert_eq!(settings.token().unwrap(), "from-env");
        assert_eq!(settings.shared.budget_id, "env-shared");
        assert_eq!(settings.shared.name, "Shared");
        assert_eq!(settings.poll_interval_secs, 45);
        assert_eq!(settings.state_dir, "/var/lib/splitsync");
    }

    #[test]
    fn modes_are_exclusive() {
        assert!(Args::try_parse_from(["splitsync", "-b", "--status"]).is_err());
        assert!(Args::try_parse_from(["splitsync", "-m", "2024-13-01"]).is_err());
    }

    #[test]
    fn invalid_settings_are_configuration_errors() {
        let (mut settings, _) = parse(&[]);
        settings.owners.pop();
        assert!(settings.validate().unwrap_err().is_fatal());

        let (mut settings, _) = parse(&[]);
        settings.token = Some("  ".to_string());
        assert!(matches!(
            settings.validate(),
            Err(EngineError::Configuration(_))
        ));

        let (mut settings, _) = parse(&[]);
        settings.timezone = "Mars/Olympus".to_string();
        assert!(settings.validate().is_err());
    }
}
