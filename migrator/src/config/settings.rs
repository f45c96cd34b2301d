//! Settings read from the environment.
use std::collections::BTreeSet;
use std::env;
use std::fmt::Display;
use std::fs;
use std::path::PathBuf;
use std::str::FromStr;
use std::time::Duration;

use migrator_pipeline::loader::DEFAULT_BATCH_SIZE;
use migrator_pipeline::orchestrator::{OrchestratorConfig, DEFAULT_PAGE_SIZE, DEFAULT_SKIP_RATE_THRESHOLD};
use migrator_pipeline::processor::TransformRules;
use migrator_pipeline::retry::RetryPolicy;
use migrator_repository::HttpLegacySourceConfig;
use migrator_shared::types::EntityType;
use tracing::info;

use crate::cli::Cli;
use crate::MigrationError;

/// Default destination pool size.
const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Default per-call HTTP timeout in seconds.
const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

#[derive(Debug, Clone, PartialEq)]
pub struct Settings {
    pub database_url: String,
    pub database_max_connections: u32,
    /// Apply the bundled schema migrations before running a command.
    pub run_migrations: bool,
    /// Unset when no legacy API is configured; only `migrate` and source
    /// counts need it.
    pub legacy_api: Option<HttpLegacySourceConfig>,
    pub page_size: u32,
    pub batch_size: usize,
    pub dry_run: bool,
    pub strict: bool,
    pub skip_rate_threshold: f64,
    pub placeholder_entities: BTreeSet<EntityType>,
    pub retry: RetryPolicy,
    pub rules_path: Option<PathBuf>,
}

fn var(name: &str) -> Option<String> {
    env::var(name).ok().filter(|v| !v.trim().is_empty())
}

fn parse_var<T>(name: &str, default: T) -> Result<T, MigrationError>
where
    T: FromStr,
    T::Err: Display,
{
    match var(name) {
        Some(raw) => raw
            .trim()
            .parse()
            .map_err(|e| MigrationError::config(format!("{name}={raw}: {e}"))),
        None => Ok(default),
    }
}

fn parse_placeholder_entities(raw: &str) -> Result<BTreeSet<EntityType>, MigrationError> {
    raw.split(',')
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(|s| {
            let entity: EntityType = s
                .parse()
                .map_err(|e| MigrationError::config(format!("PLACEHOLDER_ENTITIES: {e}")))?;
            if !entity.supports_placeholder() {
                return Err(MigrationError::config(format!(
                    "PLACEHOLDER_ENTITIES: {entity} has required references and cannot be a placeholder"
                )));
            }
            Ok(entity)
        })
        .collect()
}

impl Settings {
    /// Reads settings from environment variables.
    ///
    /// # Environment Variables
    ///
    /// - `DATABASE_URL`: destination PostgreSQL (required)
    /// - `DATABASE_MAX_CONNECTIONS`: pool size (default: 5)
    /// - `DATABASE_RUN_MIGRATIONS`: apply the schema first (default: false)
    /// - `LEGACY_API_URL` / `LEGACY_API_TOKEN`: legacy Data API root and token
    /// - `LEGACY_PAGE_SIZE`: records per page (default: 100)
    /// - `HTTP_TIMEOUT_SECS`: per-call timeout (default: 30)
    /// - `MIGRATION_BATCH_SIZE`: rows per write (default: 50)
    /// - `MIGRATION_DRY_RUN`, `MIGRATION_STRICT`: (default: false)
    /// - `SKIP_RATE_THRESHOLD`: fatal missing-reference ratio (default: 0.5)
    /// - `PLACEHOLDER_ENTITIES`: comma list among company, user, section
    /// - `RETRY_MAX_ATTEMPTS`, `RETRY_BACKOFF_BASE_MS`, `RETRY_FACTOR`,
    ///   `RETRY_MAX_DELAY_SECS`: shared retry policy (default: 5, 10, 2, 5)
    /// - `MIGRATION_RULES_PATH`: JSON transform rules file
    pub fn from_env() -> Result<Self, MigrationError> {
        let database_url =
            var("DATABASE_URL").ok_or_else(|| MigrationError::config("DATABASE_URL is not set"))?;

        let legacy_api = match (var("LEGACY_API_URL"), var("LEGACY_API_TOKEN")) {
            (Some(base_url), Some(api_token)) => Some(HttpLegacySourceConfig {
                base_url,
                api_token,
                timeout: Duration::from_secs(parse_var("HTTP_TIMEOUT_SECS", DEFAULT_HTTP_TIMEOUT_SECS)?),
            }),
            (Some(_), None) => {
                return Err(MigrationError::config("LEGACY_API_URL is set without LEGACY_API_TOKEN"))
            }
            (None, _) => None,
        };

        let defaults = RetryPolicy::default();
        let retry = RetryPolicy {
            max_attempts: parse_var("RETRY_MAX_ATTEMPTS", defaults.max_attempts)?,
            backoff_base_ms: parse_var("RETRY_BACKOFF_BASE_MS", defaults.backoff_base_ms)?,
            factor: parse_var("RETRY_FACTOR", defaults.factor)?,
            max_delay: Duration::from_secs(parse_var(
                "RETRY_MAX_DELAY_SECS",
                defaults.max_delay.as_secs(),
            )?),
        };
        if retry.max_attempts == 0 {
            return Err(MigrationError::config("RETRY_MAX_ATTEMPTS must be at least 1"));
        }

        let skip_rate_threshold = parse_var("SKIP_RATE_THRESHOLD", DEFAULT_SKIP_RATE_THRESHOLD)?;
        if !(0.0..=1.0).contains(&skip_rate_threshold) {
            return Err(MigrationError::config("SKIP_RATE_THRESHOLD must be between 0 and 1"));
        }

        let settings = Self {
            database_url,
            database_max_connections: parse_var("DATABASE_MAX_CONNECTIONS", DEFAULT_MAX_CONNECTIONS)?,
            run_migrations: parse_var("DATABASE_RUN_MIGRATIONS", false)?,
            legacy_api,
            page_size: parse_var("LEGACY_PAGE_SIZE", DEFAULT_PAGE_SIZE)?,
            batch_size: parse_var("MIGRATION_BATCH_SIZE", DEFAULT_BATCH_SIZE)?,
            dry_run: parse_var("MIGRATION_DRY_RUN", false)?,
            strict: parse_var("MIGRATION_STRICT", false)?,
            skip_rate_threshold,
            placeholder_entities: var("PLACEHOLDER_ENTITIES")
                .map(|raw| parse_placeholder_entities(&raw))
                .transpose()?
                .unwrap_or_default(),
            retry,
            rules_path: var("MIGRATION_RULES_PATH").map(PathBuf::from),
        };
        settings.validate()?;
        Ok(settings)
    }

    /// Applies command line flags over the environment.
    pub fn apply_cli(mut self, cli: &Cli) -> Result<Self, MigrationError> {
        self.dry_run |= cli.dry_run;
        self.strict |= cli.strict;
        if let Some(batch_size) = cli.batch_size {
            self.batch_size = batch_size;
        }
        self.validate()?;
        Ok(self)
    }

    fn validate(&self) -> Result<(), MigrationError> {
        if self.page_size == 0 {
            return Err(MigrationError::config("page size must be at least 1"));
        }
        if self.batch_size == 0 {
            return Err(MigrationError::config("batch size must be at least 1"));
        }
        Ok(())
    }

    /// Transform rules from `MIGRATION_RULES_PATH`, or none.
    pub fn load_rules(&self) -> Result<TransformRules, MigrationError> {
        let Some(path) = &self.rules_path else {
            return Ok(TransformRules::default());
        };
        let raw = fs::read_to_string(path)
            .map_err(|e| MigrationError::config(format!("reading rules {}: {e}", path.display())))?;
        let rules = TransformRules::from_json(&raw)
            .map_err(|e| MigrationError::config(format!("parsing rules {}: {e}", path.display())))?;
        info!(path = %path.display(), "Transform rules loaded");
        Ok(rules)
    }

    pub fn orchestrator_config(&self) -> OrchestratorConfig {
        OrchestratorConfig {
            page_size: self.page_size,
            batch_size: self.batch_size,
            skip_rate_threshold: self.skip_rate_threshold,
            placeholder_entities: self.placeholder_entities.clone(),
            retry: self.retry,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use clap::Parser;
    use serial_test::serial;
    use std::io::Write;

    const VARS: &[&str] = &[
        "DATABASE_URL",
        "DATABASE_MAX_CONNECTIONS",
        "DATABASE_RUN_MIGRATIONS",
        "LEGACY_API_URL",
        "LEGACY_API_TOKEN",
        "LEGACY_PAGE_SIZE",
        "HTTP_TIMEOUT_SECS",
        "MIGRATION_BATCH_SIZE",
        "MIGRATION_DRY_RUN",
        "MIGRATION_STRICT",
        "SKIP_RATE_THRESHOLD",
        "PLACEHOLDER_ENTITIES",
        "RETRY_MAX_ATTEMPTS",
        "RETRY_BACKOFF_BASE_MS",
        "RETRY_FACTOR",
        "RETRY_MAX_DELAY_SECS",
        "MIGRATION_RULES_PATH",
    ];

    fn reset_env(vars: &[(&str, &str)]) {
        for name in VARS {
            env::remove_var(name);
        }
        for (name, value) in vars {
            env::set_var(name, value);
        }
    }

    #[test]
    #[serial]
    fn defaults_apply_when_only_the_database_is_set() {
        reset_env(&[("DATABASE_URL", "postgres://localhost/dest")]);

        let settings = Settings::from_env().unwrap();

        assert_eq!(settings.database_max_connections, 5);
        assert!(!settings.run_migrations);
        assert_eq!(settings.legacy_api, None);
        assert_eq!(settings.page_size, 100);
        assert_eq!(settings.batch_size, 50);
        assert_eq!(settings.skip_rate_threshold, 0.5);
        assert!(settings.placeholder_entities.is_empty());
        assert_eq!(settings.retry, RetryPolicy::default());
        assert_eq!(settings.load_rules().unwrap(), TransformRules::default());
    }

    #[test]
    #[serial]
    fn reads_every_variable() {
        reset_env(&[
            ("DATABASE_URL", "postgres://localhost/dest"),
            ("LEGACY_API_URL", "https://app.example.com/api/1.1"),
            ("LEGACY_API_TOKEN", "secret"),
            ("HTTP_TIMEOUT_SECS", "7"),
            ("LEGACY_PAGE_SIZE", "25"),
            ("MIGRATION_BATCH_SIZE", "10"),
            ("MIGRATION_STRICT", "true"),
            ("PLACEHOLDER_ENTITIES", "company, section"),
            ("RETRY_MAX_ATTEMPTS", "3"),
        ]);

        let settings = Settings::from_env().unwrap();

        let api = settings.legacy_api.unwrap();
        assert_eq!(api.api_token, "secret");
        assert_eq!(api.timeout, Duration::from_secs(7));
        assert_eq!((settings.page_size, settings.batch_size), (25, 10));
        assert!(settings.strict);
        assert_eq!(
            settings.placeholder_entities,
            BTreeSet::from([EntityType::Company, EntityType::Section])
        );
        assert_eq!(settings.retry.max_attempts, 3);
    }

    #[test]
    #[serial]
    fn invalid_values_are_configuration_errors() {
        for vars in [
            vec![],
            vec![("DATABASE_URL", "postgres://x"), ("MIGRATION_BATCH_SIZE", "many")],
            vec![("DATABASE_URL", "postgres://x"), ("MIGRATION_BATCH_SIZE", "0")],
            vec![("DATABASE_URL", "postgres://x"), ("PLACEHOLDER_ENTITIES", "question")],
            vec![("DATABASE_URL", "postgres://x"), ("LEGACY_API_URL", "https://x")],
            vec![("DATABASE_URL", "postgres://x"), ("SKIP_RATE_THRESHOLD", "1.5")],
        ] {
            reset_env(&vars);
            assert!(
                matches!(Settings::from_env(), Err(MigrationError::Config(_))),
                "{vars:?} should be rejected"
            );
        }
    }

    #[test]
    #[serial]
    fn command_line_flags_override_the_environment() {
        reset_env(&[("DATABASE_URL", "postgres://x"), ("MIGRATION_BATCH_SIZE", "10")]);
        let cli = Cli::parse_from(["migrator", "--dry-run", "--batch-size", "5", "report"]);

        let settings = Settings::from_env().unwrap().apply_cli(&cli).unwrap();

        assert!(settings.dry_run);
        assert_eq!(settings.batch_size, 5);
    }

    #[test]
    #[serial]
    fn loads_rules_from_the_configured_file() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, r#"{{ "excluded": {{ "question": ["q-1"] }} }}"#).unwrap();
        reset_env(&[
            ("DATABASE_URL", "postgres://x"),
            ("MIGRATION_RULES_PATH", file.path().to_str().unwrap()),
        ]);

        let rules = Settings::from_env().unwrap().load_rules().unwrap();

        assert!(rules.is_excluded(EntityType::Question, "q-1"));
    }
}
