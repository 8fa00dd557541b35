//! Generated commands and sequential batches.

use crate::client::Executor;
use crate::error::OrmResult;
use crate::param::ParamList;

/// How a command's SQL text should be interpreted by the data source.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum CommandKind {
    /// Plain SQL text.
    Text,
    /// A stored procedure invocation.
    ///
    /// Memoized command text authored by the caller may name a procedure;
    /// appending ad-hoc filters forces the command back to [`CommandKind::Text`].
    StoredProcedure,
}

/// One ready-to-execute statement: SQL text, kind, and bound parameters.
#[derive(Clone, Debug, PartialEq)]
pub struct Command {
    pub sql: String,
    pub kind: CommandKind,
    pub params: ParamList,
}

impl Command {
    /// Create a plain-text command.
    pub fn text(sql: impl Into<String>, params: ParamList) -> Self {
        Self {
            sql: sql.into(),
            kind: CommandKind::Text,
            params,
        }
    }

    /// Create a command with an explicit kind and no parameters.
    pub fn bare(sql: impl Into<String>, kind: CommandKind) -> Self {
        Self {
            sql: sql.into(),
            kind,
            params: ParamList::new(),
        }
    }

    /// Re-bind this command's parameters, keeping text and kind.
    pub fn with_params(&self, params: ParamList) -> Self {
        Self {
            sql: self.sql.clone(),
            kind: self.kind,
            params,
        }
    }
}

/// An ordered list of commands executed sequentially as one logical
/// operation.
#[derive(Clone, Debug, Default)]
pub struct Batch {
    commands: Vec<Command>,
}

impl Batch {
    /// Create an empty batch.
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a batch holding a single command.
    pub fn single(command: Command) -> Self {
        Self {
            commands: vec![command],
        }
    }

    /// Append one command.
    pub fn add_command(&mut self, command: Command) -> &mut Self {
        self.commands.push(command);
        self
    }

    /// Append all commands of another batch, flattening it into this one.
    pub fn add_batch(&mut self, other: Batch) -> &mut Self {
        self.commands.extend(other.commands);
        self
    }

    /// The commands in execution order.
    pub fn commands(&self) -> &[Command] {
        &self.commands
    }

    /// Number of commands queued.
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Whether the batch holds no commands.
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }

    /// Execute every command in order against one executor, returning the
    /// total number of affected rows.
    ///
    /// The first failing statement aborts the remainder and propagates.
    pub async fn execute(&self, conn: &impl Executor) -> OrmResult<u64> {
        let mut affected = 0;
        for command in &self.commands {
            tracing::debug!(sql = %command.sql, params = command.params.len(), "executing");
            let refs = command.params.as_refs();
            affected += conn.execute(&command.sql, &refs).await?;
        }
        Ok(affected)
    }
}
