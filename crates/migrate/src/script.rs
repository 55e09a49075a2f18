//! SQL script bodies
//!
//! A script file carries an up section and a down section:
//!
//! ```sql
//! -- up
//! UPDATE users SET locale = 'en' WHERE locale IS NULL;
//!
//! -- down
//! UPDATE users SET locale = NULL WHERE locale = 'en';
//! ```
//!
//! A `-- irreversible` line inside the down section marks the script as
//! impossible to revert. Statements run through a [`ScriptExecutor`].

use async_trait::async_trait;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;
use std::fs;
use std::path::Path;

use crate::body::{MigrationBody, StepOutput, StepResult, Store};
use crate::error::{MigrateResult, MigrationError, StepError};

/// Store capability needed to run SQL scripts
#[async_trait]
pub trait ScriptExecutor: Send + Sync {
    /// Execute one statement and return the number of affected rows
    async fn execute(&self, statement: &str) -> anyhow::Result<u64>;
}

/// One direction of a script
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScriptSection {
    /// No statements; running this direction is a no-op
    Empty,
    Statements(Vec<String>),
    /// Reverting is unsupported
    Irreversible,
}

impl ScriptSection {
    fn from_lines(lines: &[&str], allow_irreversible: bool, irreversible: bool) -> Self {
        if allow_irreversible && irreversible {
            return ScriptSection::Irreversible;
        }
        let sql = lines.join("\n");
        let statements = split_sql_statements(sql.trim());
        if statements.is_empty() {
            ScriptSection::Empty
        } else {
            ScriptSection::Statements(statements)
        }
    }
}

/// Body backed by a SQL script
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SqlScriptBody {
    up: ScriptSection,
    down: ScriptSection,
}

#[derive(Clone, Copy, PartialEq, Eq)]
enum Section {
    Preamble,
    Up,
    Down,
}

impl SqlScriptBody {
    /// Read and parse a script file
    pub fn load(path: &Path) -> MigrateResult<Self> {
        let content = fs::read_to_string(path).map_err(|e| {
            MigrationError::source_error(format!(
                "Failed to read migration file {}: {}",
                path.display(),
                e
            ))
        })?;
        Ok(Self::parse(&content))
    }

    /// Parse script text into up and down sections
    pub fn parse(content: &str) -> Self {
        let mut up_lines = Vec::new();
        let mut down_lines = Vec::new();
        let mut irreversible = false;
        let mut current = Section::Preamble;

        for line in content.lines() {
            let trimmed = line.trim();
            if let Some(comment) = trimmed.strip_prefix("--") {
                match comment.trim().to_lowercase().as_str() {
                    "up" | "up migration" => current = Section::Up,
                    "down" | "down migration" => current = Section::Down,
                    "irreversible" if current == Section::Down => irreversible = true,
                    _ => {}
                }
                continue;
            }
            if trimmed.is_empty() {
                continue;
            }

            match current {
                Section::Up => up_lines.push(line),
                Section::Down => down_lines.push(line),
                Section::Preamble => {}
            }
        }

        Self {
            up: ScriptSection::from_lines(&up_lines, false, false),
            down: ScriptSection::from_lines(&down_lines, true, irreversible),
        }
    }

    pub fn up_section(&self) -> &ScriptSection {
        &self.up
    }

    pub fn down_section(&self) -> &ScriptSection {
        &self.down
    }

    async fn run_section<S: ScriptExecutor>(section: &ScriptSection, store: &S) -> StepResult {
        let statements = match section {
            ScriptSection::Empty => return Ok(StepOutput::NotImplemented),
            ScriptSection::Irreversible => return Err(StepError::Irreversible),
            ScriptSection::Statements(statements) => statements,
        };

        let mut affected = 0u64;
        for statement in statements {
            tracing::debug!(target: "datamigrate", statement = %statement, "executing statement");
            let rows = store
                .execute(statement)
                .await
                .map_err(|e| StepError::Failed(e.context(format!("statement failed: {}", statement))))?;
            affected += rows;
        }
        Ok(StepOutput::affected(affected))
    }
}

#[async_trait]
impl<S> MigrationBody<S> for SqlScriptBody
where
    S: ScriptExecutor + Store,
{
    async fn up(&self, store: &S) -> StepResult {
        Self::run_section(&self.up, store).await
    }

    async fn down(&self, store: &S) -> StepResult {
        Self::run_section(&self.down, store).await
    }
}

/// Split SQL into statements. Text the generic dialect cannot parse, such as
/// a dollar-quoted `DO` block, is kept whole as a single batch for the
/// executor to send as is.
pub fn split_sql_statements(sql: &str) -> Vec<String> {
    if sql.trim().is_empty() {
        return Vec::new();
    }

    let dialect = GenericDialect {};
    match Parser::parse_sql(&dialect, sql) {
        Ok(statements) => statements.into_iter().map(|s| format!("{};", s)).collect(),
        Err(e) => {
            tracing::warn!(
                target: "datamigrate",
                "SQL parsing failed, running section as one batch: {}",
                e
            );
            vec![sql.trim().to_string()]
        }
    }
}
