//! Progress announcements and step timing
//!
//! Verbose announcements go out at info level, quiet ones at debug, so the
//! subscriber filter still decides what reaches the terminal.

use std::future::Future;
use std::time::Instant;

use crate::body::{StepOutput, StepResult, Store};
use crate::definitions::Direction;
use crate::descriptor::MigrationDescriptor;

const BANNER_WIDTH: usize = 75;

/// Formats and emits progress messages for one run
#[derive(Debug, Clone, Copy)]
pub struct Announcer {
    verbose: bool,
}

impl Announcer {
    pub fn new(verbose: bool) -> Self {
        Self { verbose }
    }

    pub fn is_verbose(&self) -> bool {
        self.verbose
    }

    /// `== 3 AddX: migrating ======...`
    pub fn banner(version: u64, name: &str, message: &str) -> String {
        let text = format!("{} {}: {}", version, name, message);
        let padding = BANNER_WIDTH.saturating_sub(text.len());
        format!("== {} {}", text, "=".repeat(padding))
    }

    pub fn announce<S: Store>(&self, descriptor: &MigrationDescriptor<S>, message: &str) {
        let line = Self::banner(descriptor.version(), descriptor.name(), message);
        self.emit(descriptor.version(), &line);
    }

    /// `-- message`, or `   -> message` for sub-items
    pub fn say(&self, version: u64, message: &str, subitem: bool) {
        let line = if subitem {
            format!("   -> {}", message)
        } else {
            format!("-- {}", message)
        };
        self.emit(version, &line);
    }

    fn emit(&self, version: u64, line: &str) {
        if self.verbose {
            tracing::info!(target: "datamigrate", version, "{}", line);
        } else {
            tracing::debug!(target: "datamigrate", version, "{}", line);
        }
    }

    /// Run one body invocation wrapped in start and finish announcements
    pub async fn timed<S, F>(
        &self,
        descriptor: &MigrationDescriptor<S>,
        direction: Direction,
        step: F,
    ) -> StepResult
    where
        S: Store,
        F: Future<Output = StepResult>,
    {
        self.announce(descriptor, direction.progressive());
        let started = Instant::now();
        let result = step.await;
        let seconds = started.elapsed().as_secs_f64();

        match &result {
            Ok(StepOutput::Done { affected }) => {
                self.announce(
                    descriptor,
                    &format!("{} ({:.4}s)", direction.past(), seconds),
                );
                if let Some(rows) = affected {
                    self.say(descriptor.version(), &format!("{} rows", rows), true);
                }
            }
            Ok(StepOutput::NotImplemented) => {
                self.announce(descriptor, &format!("no {} step defined", direction));
            }
            Err(e) => {
                tracing::error!(
                    target: "datamigrate",
                    version = descriptor.version(),
                    name = descriptor.name(),
                    elapsed = seconds,
                    "{} failed: {}",
                    direction.progressive(),
                    e
                );
            }
        }
        result
    }
}
