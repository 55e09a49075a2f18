use async_trait::async_trait;
use datamigrate_core::{
    Direction, EmbeddedSource, FileLedger, MemoryLedger, MigrateResult, MigrationBody,
    MigrationError, MigrationRunner, MigratorConfig, NoopBody, StepError, StepOutput, StepResult,
    VersionLedger,
};
use std::collections::BTreeSet;
use std::sync::Mutex;

/// Store that journals every body invocation
#[derive(Default)]
struct Journal {
    entries: Mutex<Vec<(u64, Direction)>>,
}

impl Journal {
    fn entries(&self) -> Vec<(u64, Direction)> {
        self.entries.lock().unwrap().clone()
    }
}

/// Body that journals itself and can be told to fail
struct Recorder {
    version: u64,
    fail_up: bool,
    irreversible: bool,
}

impl Recorder {
    fn new(version: u64) -> Self {
        Self {
            version,
            fail_up: false,
            irreversible: false,
        }
    }

    fn failing(version: u64) -> Self {
        Self {
            fail_up: true,
            ..Self::new(version)
        }
    }

    fn irreversible(version: u64) -> Self {
        Self {
            irreversible: true,
            ..Self::new(version)
        }
    }
}

#[async_trait]
impl MigrationBody<Journal> for Recorder {
    async fn up(&self, store: &Journal) -> StepResult {
        if self.fail_up {
            return Err(anyhow::anyhow!("duplicate key value violates unique constraint").into());
        }
        store.entries.lock().unwrap().push((self.version, Direction::Forward));
        Ok(StepOutput::affected(1))
    }

    async fn down(&self, store: &Journal) -> StepResult {
        if self.irreversible {
            return Err(StepError::Irreversible);
        }
        store.entries.lock().unwrap().push((self.version, Direction::Backward));
        Ok(StepOutput::done())
    }
}

fn quiet() -> MigratorConfig {
    MigratorConfig::default().with_verbose(false)
}

fn three_step_source() -> EmbeddedSource<Journal> {
    EmbeddedSource::new()
        .with("2_add_slugs", Recorder::new(2))
        .with("3_backfill_slugs", Recorder::new(3))
        .with("1_create_accounts", Recorder::new(1))
}

fn runner(
    source: EmbeddedSource<Journal>,
    ledger: &MemoryLedger,
) -> MigrationRunner<Journal, &MemoryLedger> {
    MigrationRunner::new(source, ledger, Journal::default(), quiet())
}

fn versions(set: BTreeSet<u64>) -> Vec<u64> {
    set.into_iter().collect()
}

#[tokio::test]
async fn migrate_to_latest_applies_everything_in_order() {
    let ledger = MemoryLedger::new();
    let runner = runner(three_step_source(), &ledger);

    let report = runner.migrate(None).await.unwrap();

    assert_eq!(report.executed, vec![1, 2, 3]);
    assert_eq!(
        runner.store().entries(),
        vec![
            (1, Direction::Forward),
            (2, Direction::Forward),
            (3, Direction::Forward)
        ]
    );
    assert_eq!(versions(ledger.snapshot().await), vec![1, 2, 3]);
}

#[tokio::test]
async fn migrate_twice_is_idempotent() {
    let ledger = MemoryLedger::new();
    let runner = runner(three_step_source(), &ledger);

    runner.migrate(Some(2)).await.unwrap();
    let before = ledger.snapshot().await;
    let report = runner.migrate(Some(2)).await.unwrap();

    assert!(report.is_noop());
    assert_eq!(report.skipped, vec![1, 2]);
    assert_eq!(ledger.snapshot().await, before);
    assert_eq!(runner.store().entries().len(), 2);
}

#[tokio::test]
async fn migrate_up_then_down_to_zero_empties_ledger() {
    let ledger = MemoryLedger::new();
    let runner = runner(three_step_source(), &ledger);

    runner.migrate(Some(3)).await.unwrap();
    let report = runner.migrate(Some(0)).await.unwrap();

    assert_eq!(report.direction, Direction::Backward);
    assert_eq!(report.executed, vec![3, 2, 1]);
    assert!(ledger.snapshot().await.is_empty());
}

#[tokio::test]
async fn migrate_to_zero_on_empty_ledger_does_nothing() {
    let ledger = MemoryLedger::new();
    let runner = runner(three_step_source(), &ledger);

    let report = runner.migrate(Some(0)).await.unwrap();

    assert!(report.is_noop());
    assert!(runner.store().entries().is_empty());
    assert!(ledger.snapshot().await.is_empty());
}

#[tokio::test]
async fn rollback_one_step_reverts_latest_only() {
    let ledger = MemoryLedger::with_versions([1, 2, 3]);
    let runner = runner(three_step_source(), &ledger);

    let report = runner.rollback(1).await.unwrap();

    assert_eq!(report.executed, vec![3]);
    assert_eq!(runner.store().entries(), vec![(3, Direction::Backward)]);
    assert_eq!(versions(ledger.snapshot().await), vec![1, 2]);
}

#[tokio::test]
async fn rollback_past_the_end_reverts_everything() {
    let ledger = MemoryLedger::with_versions([1, 2, 3]);
    let runner = runner(three_step_source(), &ledger);

    let report = runner.rollback(10).await.unwrap();

    assert_eq!(report.executed, vec![3, 2, 1]);
    assert!(ledger.snapshot().await.is_empty());
}

#[tokio::test]
async fn migrate_down_to_target_keeps_target() {
    let ledger = MemoryLedger::with_versions([1, 2, 3]);
    let runner = runner(three_step_source(), &ledger);

    let report = runner.migrate(Some(1)).await.unwrap();

    assert_eq!(report.direction, Direction::Backward);
    assert_eq!(
        runner.store().entries(),
        vec![(3, Direction::Backward), (2, Direction::Backward)]
    );
    assert_eq!(versions(ledger.snapshot().await), vec![1]);
}

#[tokio::test]
async fn forward_steps_from_partial_ledger() {
    let ledger = MemoryLedger::with_versions([1]);
    let runner = runner(three_step_source(), &ledger);

    let report = runner.forward(1).await.unwrap();

    assert_eq!(report.executed, vec![2]);
    assert_eq!(versions(ledger.snapshot().await), vec![1, 2]);
}

#[tokio::test]
async fn forward_steps_from_empty_ledger() {
    let ledger = MemoryLedger::new();
    let runner = runner(three_step_source(), &ledger);

    let report = runner.forward(2).await.unwrap();

    assert_eq!(report.executed, vec![1, 2]);
    assert_eq!(versions(ledger.snapshot().await), vec![1, 2]);
}

#[tokio::test]
async fn failure_halts_plan_and_keeps_earlier_steps() {
    let ledger = MemoryLedger::new();
    let source = EmbeddedSource::new()
        .with("1_create_accounts", Recorder::new(1))
        .with("2_add_slugs", Recorder::failing(2))
        .with("3_backfill_slugs", Recorder::new(3));
    let runner = runner(source, &ledger);

    let err = runner.migrate(None).await.unwrap_err();

    match &err {
        MigrationError::MigrationFailed { version, name, source } => {
            assert_eq!(*version, 2);
            assert_eq!(name, "AddSlugs");
            assert!(source.to_string().contains("unique constraint"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    assert_eq!(err.failed_version(), Some(2));
    assert_eq!(runner.store().entries(), vec![(1, Direction::Forward)]);
    assert_eq!(versions(ledger.snapshot().await), vec![1]);
}

#[tokio::test]
async fn irreversible_step_halts_backward_plan() {
    let ledger = MemoryLedger::with_versions([1, 2, 3]);
    let source = EmbeddedSource::new()
        .with("1_create_accounts", Recorder::new(1))
        .with("2_add_slugs", Recorder::irreversible(2))
        .with("3_backfill_slugs", Recorder::new(3));
    let runner = runner(source, &ledger);

    let err = runner.migrate(Some(0)).await.unwrap_err();

    assert!(matches!(err, MigrationError::Irreversible { version: 2, .. }));
    assert_eq!(runner.store().entries(), vec![(3, Direction::Backward)]);
    assert_eq!(versions(ledger.snapshot().await), vec![1, 2]);
}

#[tokio::test]
async fn backward_skips_never_applied_versions() {
    let ledger = MemoryLedger::with_versions([1, 3]);
    let runner = runner(three_step_source(), &ledger);

    let report = runner.down(Some(0)).await.unwrap();

    assert_eq!(report.executed, vec![3, 1]);
    assert_eq!(report.skipped, vec![2]);
    assert!(ledger.snapshot().await.is_empty());
}

#[tokio::test]
async fn unknown_target_fails_before_running_anything() {
    let ledger = MemoryLedger::new();
    let runner = runner(three_step_source(), &ledger);

    let err = runner.migrate(Some(9999)).await.unwrap_err();

    assert!(matches!(err, MigrationError::UnknownVersion { version: 9999 }));
    assert!(runner.store().entries().is_empty());
    assert!(ledger.snapshot().await.is_empty());
}

#[tokio::test]
async fn discovery_errors_surface_from_every_operation() {
    let ledger = MemoryLedger::new();

    let duplicate_version = EmbeddedSource::new()
        .with("1_add_x", Recorder::new(1))
        .with("1_add_y", Recorder::new(1));
    let err = runner(duplicate_version, &ledger).migrate(None).await.unwrap_err();
    assert!(matches!(err, MigrationError::DuplicateVersion { version: 1 }));

    let duplicate_name = EmbeddedSource::new()
        .with("1_add_x", Recorder::new(1))
        .with("2_add_x", Recorder::new(2));
    let err = runner(duplicate_name, &ledger).rollback(1).await.unwrap_err();
    assert!(matches!(err, MigrationError::DuplicateName { .. }));

    let malformed = EmbeddedSource::new().with("AddX", Recorder::new(1));
    let err = runner(malformed, &ledger).status().await.unwrap_err();
    assert!(matches!(err, MigrationError::MalformedIdentifier { .. }));
}

#[tokio::test]
async fn run_executes_exactly_one_version() {
    let ledger = MemoryLedger::new();
    let runner = runner(three_step_source(), &ledger);

    let report = runner.run(Direction::Forward, 2).await.unwrap();
    assert_eq!(report.executed, vec![2]);
    assert_eq!(versions(ledger.snapshot().await), vec![2]);

    // already applied, nothing to do
    let report = runner.run(Direction::Forward, 2).await.unwrap();
    assert!(report.is_noop());

    // never applied, nothing to revert
    let report = runner.run(Direction::Backward, 3).await.unwrap();
    assert!(report.is_noop());

    let report = runner.run(Direction::Backward, 2).await.unwrap();
    assert_eq!(report.executed, vec![2]);
    assert!(ledger.snapshot().await.is_empty());
}

#[tokio::test]
async fn run_rejects_unknown_and_zero_versions() {
    let ledger = MemoryLedger::new();
    let runner = runner(three_step_source(), &ledger);

    for version in [0, 9999] {
        let err = runner.run(Direction::Backward, version).await.unwrap_err();
        assert!(matches!(err, MigrationError::UnknownVersion { .. }));
    }
}

#[tokio::test]
async fn unimplemented_direction_still_updates_ledger() {
    let ledger = MemoryLedger::new();
    let source = EmbeddedSource::new().with("1_placeholder", NoopBody);
    let runner = MigrationRunner::new(source, &ledger, Journal::default(), quiet());

    runner.migrate(None).await.unwrap();
    assert_eq!(versions(ledger.snapshot().await), vec![1]);

    runner.rollback(1).await.unwrap();
    assert!(ledger.snapshot().await.is_empty());
}

#[tokio::test]
async fn status_and_pending_reflect_ledger() {
    let ledger = MemoryLedger::with_versions([1, 42]);
    let runner = runner(three_step_source(), &ledger);

    let status = runner.status().await.unwrap();
    let applied: Vec<(u64, bool)> = status
        .migrations
        .iter()
        .map(|m| (m.version, m.applied))
        .collect();
    assert_eq!(applied, vec![(1, true), (2, false), (3, false)]);
    assert_eq!(status.orphaned, vec![42]);
    assert_eq!(status.pending_count(), 2);

    let pending: Vec<u64> = runner
        .pending()
        .await
        .unwrap()
        .iter()
        .map(|d| d.version())
        .collect();
    assert_eq!(pending, vec![2, 3]);
    assert_eq!(runner.current_version().await.unwrap(), 42);
}

#[tokio::test]
async fn file_ledger_survives_between_runners() {
    let temp_dir = tempfile::TempDir::new().unwrap();
    let path = temp_dir.path().join("ledger.json");

    let first = MigrationRunner::new(three_step_source(), FileLedger::new(&path), Journal::default(), quiet());
    first.migrate(Some(2)).await.unwrap();

    let second = MigrationRunner::new(three_step_source(), FileLedger::new(&path), Journal::default(), quiet());
    let report = second.migrate(None).await.unwrap();

    assert_eq!(report.executed, vec![3]);
    assert_eq!(versions(second.ledger().applied_versions().await.unwrap()), vec![1, 2, 3]);
}

fn zero_based_source() -> EmbeddedSource<Journal> {
    EmbeddedSource::new()
        .with("0_init", Recorder::new(0))
        .with("1_add_x", Recorder::new(1))
}

#[tokio::test]
async fn migrate_to_zero_reverts_a_version_zero_migration() {
    let ledger = MemoryLedger::with_versions([0, 1]);
    let runner = runner(zero_based_source(), &ledger);

    let report = runner.migrate(Some(0)).await.unwrap();

    assert_eq!(report.executed, vec![1, 0]);
    assert!(ledger.snapshot().await.is_empty());
}

#[tokio::test]
async fn rollback_steps_through_a_version_zero_migration() {
    let ledger = MemoryLedger::with_versions([0, 1]);
    let runner = runner(zero_based_source(), &ledger);

    let report = runner.rollback(1).await.unwrap();
    assert_eq!(report.executed, vec![1]);
    assert_eq!(versions(ledger.snapshot().await), vec![0]);

    let report = runner.rollback(1).await.unwrap();
    assert_eq!(report.executed, vec![0]);
    assert!(ledger.snapshot().await.is_empty());
}

#[tokio::test]
async fn forward_one_step_from_empty_applies_version_zero_only() {
    let ledger = MemoryLedger::new();
    let runner = runner(zero_based_source(), &ledger);

    let report = runner.forward(1).await.unwrap();

    assert_eq!(report.executed, vec![0]);
    assert_eq!(runner.store().entries(), vec![(0, Direction::Forward)]);
    assert_eq!(versions(ledger.snapshot().await), vec![0]);
}

/// Ledger that journals step boundaries and can refuse to record a version
#[derive(Default)]
struct StepLedger {
    inner: MemoryLedger,
    refuse: Option<u64>,
    events: Mutex<Vec<String>>,
}

impl StepLedger {
    fn refusing(version: u64) -> Self {
        Self {
            refuse: Some(version),
            ..Self::default()
        }
    }

    fn push(&self, event: String) {
        self.events.lock().unwrap().push(event);
    }

    fn events(&self) -> Vec<String> {
        self.events.lock().unwrap().clone()
    }
}

#[async_trait]
impl VersionLedger for StepLedger {
    async fn applied_versions(&self) -> MigrateResult<BTreeSet<u64>> {
        self.inner.applied_versions().await
    }

    async fn record_applied(&self, version: u64) -> MigrateResult<()> {
        if self.refuse == Some(version) {
            return Err(MigrationError::ledger(
                format!("Failed to record version {}", version),
                "disk full",
            ));
        }
        self.push(format!("record {}", version));
        self.inner.record_applied(version).await
    }

    async fn record_reverted(&self, version: u64) -> MigrateResult<()> {
        self.push(format!("remove {}", version));
        self.inner.record_reverted(version).await
    }

    async fn begin_step(&self) -> MigrateResult<()> {
        self.push("begin".to_string());
        Ok(())
    }

    async fn commit_step(&self) -> MigrateResult<()> {
        self.push("commit".to_string());
        Ok(())
    }

    async fn abort_step(&self) -> MigrateResult<()> {
        self.push("abort".to_string());
        Ok(())
    }
}

#[tokio::test]
async fn ledger_write_failure_halts_plan() {
    let ledger = StepLedger::refusing(2);
    let runner = MigrationRunner::new(three_step_source(), &ledger, Journal::default(), quiet());

    let err = runner.migrate(None).await.unwrap_err();

    match &err {
        MigrationError::MigrationFailed { version, source, .. } => {
            assert_eq!(*version, 2);
            assert!(source.to_string().contains("Failed to record version 2"));
        }
        other => panic!("unexpected error: {:?}", other),
    }
    // body 2 ran, body 3 never did
    assert_eq!(
        runner.store().entries(),
        vec![(1, Direction::Forward), (2, Direction::Forward)]
    );
    assert_eq!(versions(ledger.applied_versions().await.unwrap()), vec![1]);
    assert_eq!(
        ledger.events(),
        vec!["begin", "record 1", "commit", "begin", "abort"]
    );
}

#[tokio::test]
async fn failed_body_aborts_its_step() {
    let ledger = StepLedger::default();
    let source = EmbeddedSource::new()
        .with("1_create_accounts", Recorder::new(1))
        .with("2_add_slugs", Recorder::failing(2));
    let runner = MigrationRunner::new(source, &ledger, Journal::default(), quiet());

    runner.migrate(None).await.unwrap_err();

    assert_eq!(
        ledger.events(),
        vec!["begin", "record 1", "commit", "begin", "abort"]
    );
}

#[tokio::test]
async fn backward_steps_commit_removals() {
    let ledger = StepLedger::default();
    ledger.inner.record_applied(1).await.unwrap();
    let source = EmbeddedSource::new().with("1_create_accounts", Recorder::new(1));
    let runner = MigrationRunner::new(source, &ledger, Journal::default(), quiet());

    runner.rollback(1).await.unwrap();

    assert_eq!(ledger.events(), vec!["begin", "remove 1", "commit"]);
    assert!(ledger.applied_versions().await.unwrap().is_empty());
}
