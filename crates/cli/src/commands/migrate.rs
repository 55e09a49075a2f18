use anyhow::Context;
use datamigrate_core::{
    create_migration, Direction, DirectorySource, MigrationReport, MigrationRunner, MigratorConfig,
    PgExecutor, PgLedger, StatusReport,
};
use sqlx::PgPool;

type PgRunner = MigrationRunner<PgExecutor, PgLedger>;

async fn connect(config: &MigratorConfig, database_url: Option<&str>) -> anyhow::Result<PgRunner> {
    let url = database_url
        .context("no database URL given; pass --database-url or set DATABASE_URL")?;
    let pool = PgPool::connect(url)
        .await
        .context("failed to connect to database")?;

    let source = DirectorySource::new(&config.migrations_path, config.extension.clone());
    // statements and ledger records share one transaction per step
    let ledger = PgLedger::new(pool, config.ledger_table.clone());
    let executor = ledger.executor();
    Ok(MigrationRunner::new(source, ledger, executor, config.clone()))
}

pub async fn migrate(
    config: &MigratorConfig,
    database_url: Option<&str>,
    version: Option<u64>,
) -> anyhow::Result<()> {
    let runner = connect(config, database_url).await?;
    let report = runner.migrate(version).await?;
    print_report(&report);
    Ok(())
}

pub async fn rollback(
    config: &MigratorConfig,
    database_url: Option<&str>,
    steps: usize,
) -> anyhow::Result<()> {
    let runner = connect(config, database_url).await?;
    let report = runner.rollback(steps).await?;
    print_report(&report);
    Ok(())
}

pub async fn forward(
    config: &MigratorConfig,
    database_url: Option<&str>,
    steps: usize,
) -> anyhow::Result<()> {
    let runner = connect(config, database_url).await?;
    let report = runner.forward(steps).await?;
    print_report(&report);
    Ok(())
}

/// Run a single version in one direction
pub async fn run(
    config: &MigratorConfig,
    database_url: Option<&str>,
    direction: Direction,
    version: u64,
) -> anyhow::Result<()> {
    let runner = connect(config, database_url).await?;
    let report = runner.run(direction, version).await?;
    print_report(&report);
    Ok(())
}

pub async fn status(
    config: &MigratorConfig,
    database_url: Option<&str>,
    json: bool,
) -> anyhow::Result<()> {
    let runner = connect(config, database_url).await?;
    let status = runner.status().await?;
    if json {
        println!("{}", serde_json::to_string_pretty(&status)?);
    } else {
        print!("{}", format_status(&status));
    }
    Ok(())
}

pub async fn version(config: &MigratorConfig, database_url: Option<&str>) -> anyhow::Result<()> {
    let runner = connect(config, database_url).await?;
    println!("Current version: {}", runner.current_version().await?);
    Ok(())
}

pub fn create(config: &MigratorConfig, name: &str) -> anyhow::Result<()> {
    let path = create_migration(config, name)?;
    println!("Created migration: {}", path.display());
    Ok(())
}

fn print_report(report: &MigrationReport) {
    let (verb, idle) = match report.direction {
        Direction::Forward => ("Applied", "Nothing to migrate"),
        Direction::Backward => ("Reverted", "Nothing to revert"),
    };
    if report.is_noop() {
        println!("{}", idle);
        return;
    }
    let versions: Vec<String> = report.executed.iter().map(u64::to_string).collect();
    println!(
        "{} {} migration(s): {} ({:.2}s)",
        verb,
        report.executed.len(),
        versions.join(", "),
        report.elapsed.as_secs_f64()
    );
}

fn format_status(status: &StatusReport) -> String {
    let mut out = String::new();
    if status.migrations.is_empty() {
        out.push_str("No migrations found\n");
    } else {
        out.push_str("Migration Status:\n");
        out.push_str(&format!("{:<8} {:<16} {}\n", "Status", "Version", "Name"));
        for migration in &status.migrations {
            let state = if migration.applied { "up" } else { "down" };
            out.push_str(&format!(
                "{:<8} {:<16} {}\n",
                state, migration.version, migration.name
            ));
        }
    }
    for version in &status.orphaned {
        out.push_str(&format!(
            "{:<8} {:<16} {}\n",
            "up", version, "********** NO FILE **********"
        ));
    }
    out.push_str(&format!("\n{} pending\n", status.pending_count()));
    out
}
