//! Migration bodies
//!
//! A body is the executable part of a migration. It receives the store
//! capability `S` explicitly instead of forwarding arbitrary calls to a
//! connection, so everything a migration may touch is visible in its type.
//! Either direction may be left unimplemented, which makes that direction a
//! no-op; returning [`StepError::Irreversible`] from `down` is a distinct
//! signal that reverting is unsupported.

use async_trait::async_trait;
use std::future::Future;
use std::pin::Pin;
use std::time::Instant;

use crate::announce::Announcer;
use crate::error::StepError;

/// Bound shared by every store capability handed to migration bodies
pub trait Store: Send + Sync + 'static {}

impl<T: Send + Sync + 'static> Store for T {}

/// What a body reports after running one direction
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepOutput {
    /// The direction ran; `affected` is logged when present
    Done { affected: Option<u64> },
    /// The body does not implement this direction
    NotImplemented,
}

impl StepOutput {
    pub fn done() -> Self {
        StepOutput::Done { affected: None }
    }

    pub fn affected(count: u64) -> Self {
        StepOutput::Done {
            affected: Some(count),
        }
    }

    pub fn affected_count(&self) -> Option<u64> {
        match self {
            StepOutput::Done { affected } => *affected,
            StepOutput::NotImplemented => None,
        }
    }
}

pub type StepResult = Result<StepOutput, StepError>;

/// What a body sees while it runs: the store plus progress reporting
pub struct StepContext<'a, S> {
    store: &'a S,
    announcer: Announcer,
    version: u64,
}

impl<'a, S: Store> StepContext<'a, S> {
    pub fn new(store: &'a S, announcer: Announcer, version: u64) -> Self {
        Self {
            store,
            announcer,
            version,
        }
    }

    pub fn store(&self) -> &'a S {
        self.store
    }

    pub fn version(&self) -> u64 {
        self.version
    }

    /// `-- message`
    pub fn say(&self, message: &str) {
        self.announcer.say(self.version, message, false);
    }

    /// `   -> message`
    pub fn say_subitem(&self, message: &str) {
        self.announcer.say(self.version, message, true);
    }

    /// Announce `message`, await `future`, then report how long it took
    pub async fn say_with_time<F: Future>(&self, message: &str, future: F) -> F::Output {
        self.say(message);
        let started = Instant::now();
        let output = future.await;
        self.say_subitem(&format!("{:.4}s", started.elapsed().as_secs_f64()));
        output
    }

    /// Same context with announcements demoted to debug level
    pub fn suppress_messages(&self) -> Self {
        Self {
            announcer: Announcer::new(false),
            ..*self
        }
    }

    pub fn is_verbose(&self) -> bool {
        self.announcer.is_verbose()
    }
}

impl<S> Clone for StepContext<'_, S> {
    fn clone(&self) -> Self {
        *self
    }
}

impl<S> Copy for StepContext<'_, S> {}

/// Executable body of a migration
#[async_trait]
pub trait MigrationBody<S: Store>: Send + Sync {
    /// Apply the migration
    async fn up(&self, _store: &S) -> StepResult {
        Ok(StepOutput::NotImplemented)
    }

    /// Revert the migration
    async fn down(&self, _store: &S) -> StepResult {
        Ok(StepOutput::NotImplemented)
    }

    /// Apply with access to progress reporting. Defaults to `up`.
    async fn up_with(&self, context: &StepContext<'_, S>) -> StepResult {
        self.up(context.store()).await
    }

    /// Revert with access to progress reporting. Defaults to `down`.
    async fn down_with(&self, context: &StepContext<'_, S>) -> StepResult {
        self.down(context.store()).await
    }
}

/// Body with neither direction implemented
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopBody;

impl<S: Store> MigrationBody<S> for NoopBody {}

/// Boxed future returned by closure-based bodies
pub type StepFuture<'a> = Pin<Box<dyn Future<Output = StepResult> + Send + 'a>>;

/// Box a body future, fixing its output type for closure-based bodies
pub fn step<'a, F>(future: F) -> StepFuture<'a>
where
    F: Future<Output = StepResult> + Send + 'a,
{
    Box::pin(future)
}

type StepFn<S> = Box<dyn for<'a> Fn(&'a S) -> StepFuture<'a> + Send + Sync>;

/// Body assembled from closures
///
/// ```ignore
/// let body = FnBody::new()
///     .with_up(|store: &Db| step(async move { store.backfill().await }))
///     .irreversible();
/// ```
pub struct FnBody<S> {
    up: Option<StepFn<S>>,
    down: Option<StepFn<S>>,
    irreversible: bool,
}

impl<S: Store> FnBody<S> {
    pub fn new() -> Self {
        Self {
            up: None,
            down: None,
            irreversible: false,
        }
    }

    pub fn with_up<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a S) -> StepFuture<'a> + Send + Sync + 'static,
    {
        self.up = Some(Box::new(f));
        self
    }

    pub fn with_down<F>(mut self, f: F) -> Self
    where
        F: for<'a> Fn(&'a S) -> StepFuture<'a> + Send + Sync + 'static,
    {
        self.down = Some(Box::new(f));
        self
    }

    /// Reverting this body fails with [`StepError::Irreversible`]
    pub fn irreversible(mut self) -> Self {
        self.irreversible = true;
        self
    }
}

impl<S: Store> Default for FnBody<S> {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl<S: Store> MigrationBody<S> for FnBody<S> {
    async fn up(&self, store: &S) -> StepResult {
        match &self.up {
            Some(f) => f(store).await,
            None => Ok(StepOutput::NotImplemented),
        }
    }

    async fn down(&self, store: &S) -> StepResult {
        if self.irreversible {
            return Err(StepError::Irreversible);
        }
        match &self.down {
            Some(f) => f(store).await,
            None => Ok(StepOutput::NotImplemented),
        }
    }
}
