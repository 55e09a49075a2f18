mod commands;
mod logging;

use clap::{Parser, Subcommand};
use commands::migrate;
use datamigrate_core::{Direction, MigratorConfig};
use logging::LoggingConfig;
use std::path::{Path, PathBuf};

/// Config file picked up from the working directory when `--config` is absent
const DEFAULT_CONFIG_FILE: &str = "datamigrate.yml";

#[derive(Parser)]
#[command(name = "datamigrate")]
#[command(about = "Apply, revert and inspect sequential data migrations")]
struct Cli {
    /// YAML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Directory holding migration scripts
    #[arg(long, global = true)]
    path: Option<PathBuf>,

    /// PostgreSQL connection URL
    #[arg(long, global = true, env = "DATABASE_URL")]
    database_url: Option<String>,

    /// Only report per-step progress at debug level
    #[arg(long, short, global = true)]
    quiet: bool,

    /// Log level for migration output
    #[arg(long, global = true, default_value = "info")]
    log_level: String,

    /// Emit logs as JSON lines
    #[arg(long, global = true)]
    json_logs: bool,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Migrate to a version (latest when omitted)
    Migrate {
        /// Target version; 0 reverts everything
        #[arg(long)]
        version: Option<u64>,
    },

    /// Revert the last applied migrations
    Rollback {
        /// Number of migrations to revert
        #[arg(long, default_value = "1")]
        steps: usize,
    },

    /// Apply the next pending migrations
    Forward {
        /// Number of migrations to apply
        #[arg(long, default_value = "1")]
        steps: usize,
    },

    /// Apply exactly one migration
    Up {
        #[arg(long)]
        version: u64,
    },

    /// Revert exactly one migration
    Down {
        #[arg(long)]
        version: u64,
    },

    /// Show applied and pending migrations
    Status {
        /// Print the report as JSON
        #[arg(long)]
        json: bool,
    },

    /// Print the current version
    Version,

    /// Create a new migration script
    Create {
        /// Migration name, e.g. backfill_slugs
        name: String,
    },
}

impl Cli {
    /// File config, then environment, then command-line flags
    fn migrator_config(&self) -> anyhow::Result<MigratorConfig> {
        self.resolve_config(Path::new(DEFAULT_CONFIG_FILE), |key| std::env::var(key).ok())
    }

    fn resolve_config<F>(&self, default_file: &Path, lookup: F) -> anyhow::Result<MigratorConfig>
    where
        F: Fn(&str) -> Option<String>,
    {
        let config = match &self.config {
            Some(path) => MigratorConfig::load(path)?,
            None if default_file.exists() => MigratorConfig::load(default_file)?,
            None => MigratorConfig::default(),
        };
        let mut config = config.with_overrides(lookup)?;

        if let Some(path) = &self.path {
            config = config.with_migrations_path(path);
        }
        if self.quiet {
            config = config.with_verbose(false);
        }
        Ok(config)
    }

    fn logging_config(&self) -> LoggingConfig {
        LoggingConfig::default()
            .with_level(self.log_level.clone())
            .with_json(self.json_logs)
    }
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    logging::init_logging(&cli.logging_config()).map_err(|e| anyhow::anyhow!(e))?;
    let config = cli.migrator_config()?;
    let database_url = cli.database_url.as_deref();

    match cli.command {
        Commands::Migrate { version } => migrate::migrate(&config, database_url, version).await,
        Commands::Rollback { steps } => migrate::rollback(&config, database_url, steps).await,
        Commands::Forward { steps } => migrate::forward(&config, database_url, steps).await,
        Commands::Up { version } => {
            migrate::run(&config, database_url, Direction::Forward, version).await
        }
        Commands::Down { version } => {
            migrate::run(&config, database_url, Direction::Backward, version).await
        }
        Commands::Status { json } => migrate::status(&config, database_url, json).await,
        Commands::Version => migrate::version(&config, database_url).await,
        Commands::Create { name } => migrate::create(&config, &name),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Resolve without touching the process environment or working directory
    fn isolated_config(cli: &Cli) -> MigratorConfig {
        let temp_dir = tempfile::TempDir::new().unwrap();
        cli.resolve_config(&temp_dir.path().join(DEFAULT_CONFIG_FILE), |_| None)
            .unwrap()
    }

    #[test]
    fn test_parse_migrate_with_version() {
        let cli = Cli::try_parse_from(["datamigrate", "migrate", "--version", "20240101000000"])
            .unwrap();
        assert!(matches!(
            cli.command,
            Commands::Migrate {
                version: Some(20240101000000)
            }
        ));
        assert_eq!(cli.log_level, "info");
    }

    #[test]
    fn test_parse_rollback_defaults_to_one_step() {
        let cli = Cli::try_parse_from(["datamigrate", "rollback"]).unwrap();
        assert!(matches!(cli.command, Commands::Rollback { steps: 1 }));
    }

    #[test]
    fn test_parse_global_flags_after_subcommand() {
        let cli = Cli::try_parse_from([
            "datamigrate",
            "forward",
            "--steps",
            "3",
            "--quiet",
            "--path",
            "data/migrations",
        ])
        .unwrap();
        assert!(matches!(cli.command, Commands::Forward { steps: 3 }));
        assert!(cli.quiet);

        let config = isolated_config(&cli);
        assert_eq!(config.migrations_path, PathBuf::from("data/migrations"));
        assert!(!config.verbose);
    }

    #[test]
    fn test_up_requires_version() {
        assert!(Cli::try_parse_from(["datamigrate", "up"]).is_err());
        let cli = Cli::try_parse_from(["datamigrate", "down", "--version", "3"]).unwrap();
        assert!(matches!(cli.command, Commands::Down { version: 3 }));
    }

    #[test]
    fn test_config_file_is_loaded() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let config_path = temp_dir.path().join("datamigrate.yml");
        std::fs::write(
            &config_path,
            "migrations_path: scripts\nledger_table: schema_data\ntimestamped_migrations: false\n",
        )
        .unwrap();

        let cli = Cli::try_parse_from([
            "datamigrate",
            "--config",
            config_path.to_str().unwrap(),
            "create",
            "seed_roles",
        ])
        .unwrap();
        let config = isolated_config(&cli);
        assert_eq!(config.ledger_table, "schema_data");
        assert!(!config.timestamped_migrations);
    }

    #[test]
    fn test_default_file_then_environment_then_flags() {
        let temp_dir = tempfile::TempDir::new().unwrap();
        let default_file = temp_dir.path().join(DEFAULT_CONFIG_FILE);
        std::fs::write(&default_file, "migrations_path: scripts
ledger_table: schema_data
")
            .unwrap();
        let cli = Cli::try_parse_from(["datamigrate", "--path", "flagged", "status"]).unwrap();

        let config = cli
            .resolve_config(&default_file, |key| match key {
                "DATAMIGRATE_TABLE" => Some("env_table".to_string()),
                "DATAMIGRATE_PATH" => Some("from_env".to_string()),
                _ => None,
            })
            .unwrap();

        assert_eq!(config.ledger_table, "env_table");
        assert_eq!(config.migrations_path, PathBuf::from("flagged"));
    }

    #[test]
    fn test_missing_default_file_uses_defaults() {
        let cli = Cli::try_parse_from(["datamigrate", "status"]).unwrap();
        assert_eq!(isolated_config(&cli), MigratorConfig::default());
    }
}
