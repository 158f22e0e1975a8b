//! Save batch, command and outcome types.

use entrack_value::Value;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

/// Kind of write a command performs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Operation {
    /// Insert a new row.
    Insert,
    /// Update columns of an existing row.
    Update,
    /// Delete an existing row.
    Delete,
}

/// Reference to a column written by an earlier command of the same batch.
///
/// Used for foreign keys that hold a temporary value: the store substitutes
/// the value the referenced command actually wrote.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnOrigin {
    /// Index of the producing command.
    pub command: usize,
    /// Column of the producing command.
    pub column: String,
}

/// A column name with the value to write.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ColumnValue {
    /// Column name.
    pub name: String,
    /// Value known to the tracker (possibly temporary).
    pub value: Value,
    /// Earlier command whose written value replaces `value`.
    pub origin: Option<ColumnOrigin>,
}

impl ColumnValue {
    /// Creates a column value with no origin.
    pub fn new(name: impl Into<String>, value: Value) -> Self {
        Self {
            name: name.into(),
            value,
            origin: None,
        }
    }

    /// Marks this value as produced by column `column` of command `command`.
    #[must_use]
    pub fn with_origin(mut self, command: usize, column: impl Into<String>) -> Self {
        self.origin = Some(ColumnOrigin {
            command,
            column: column.into(),
        });
        self
    }
}

/// How the store produces a generated column.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum GeneratedKind {
    /// Per-table increasing integer.
    Identity,
    /// Random GUID.
    Guid,
}

/// A column whose value the store generates on insert.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedColumn {
    /// Column name.
    pub name: String,
    /// Generation strategy.
    pub kind: GeneratedKind,
}

/// One write of a save batch.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveCommand {
    /// Target table (the root type of an entity hierarchy).
    pub table: String,
    /// Concrete entity type of the row.
    pub entity_type: String,
    /// Kind of write.
    pub operation: Operation,
    /// Key columns identifying the row.
    pub key: Vec<ColumnValue>,
    /// Non-key columns written by inserts and updates.
    pub values: Vec<ColumnValue>,
    /// Columns the store must generate (inserts only).
    pub generated: Vec<GeneratedColumn>,
}

impl SaveCommand {
    fn new(operation: Operation, table: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            entity_type: entity_type.into(),
            operation,
            key: Vec::new(),
            values: Vec::new(),
            generated: Vec::new(),
        }
    }

    /// Creates an empty insert command.
    pub fn insert(table: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self::new(Operation::Insert, table, entity_type)
    }

    /// Creates an empty update command.
    pub fn update(table: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self::new(Operation::Update, table, entity_type)
    }

    /// Creates an empty delete command.
    pub fn delete(table: impl Into<String>, entity_type: impl Into<String>) -> Self {
        Self::new(Operation::Delete, table, entity_type)
    }

    /// Adds a key column.
    #[must_use]
    pub fn with_key(mut self, column: ColumnValue) -> Self {
        self.key.push(column);
        self
    }

    /// Adds a non-key column.
    #[must_use]
    pub fn with_value(mut self, column: ColumnValue) -> Self {
        self.values.push(column);
        self
    }

    /// Marks `column` as a store-generated identity.
    #[must_use]
    pub fn with_generated_identity(mut self, column: impl Into<String>) -> Self {
        self.generated.push(GeneratedColumn {
            name: column.into(),
            kind: GeneratedKind::Identity,
        });
        self
    }

    /// Marks `column` as a store-generated GUID.
    #[must_use]
    pub fn with_generated_guid(mut self, column: impl Into<String>) -> Self {
        self.generated.push(GeneratedColumn {
            name: column.into(),
            kind: GeneratedKind::Guid,
        });
        self
    }
}

/// An ordered list of commands applied atomically.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveBatch {
    /// Commands in execution order.
    pub commands: Vec<SaveCommand>,
}

impl SaveBatch {
    /// Creates a batch from ordered commands.
    #[must_use]
    pub fn new(commands: Vec<SaveCommand>) -> Self {
        Self { commands }
    }

    /// Returns the number of commands.
    #[must_use]
    pub fn len(&self) -> usize {
        self.commands.len()
    }

    /// Returns true if the batch has no commands.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.commands.is_empty()
    }
}

/// Values generated by the store for one command.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GeneratedValues {
    /// Index of the command in the batch.
    pub command: usize,
    /// Generated `(column, value)` pairs.
    pub values: Vec<(String, Value)>,
}

/// Result of a successful save.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaveOutcome {
    /// Generated values per command (only commands that generated any).
    pub generated: Vec<GeneratedValues>,
    /// Number of rows written.
    pub rows_affected: usize,
}

/// A stored row.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Row {
    /// Concrete entity type the row was written for.
    pub entity_type: String,
    /// Column values.
    pub values: BTreeMap<String, Value>,
}

impl Row {
    /// Returns the value of `column`, or `Null` if the row has no such column.
    #[must_use]
    pub fn get(&self, column: &str) -> &Value {
        static NULL: Value = Value::Null;
        self.values.get(column).unwrap_or(&NULL)
    }
}

/// A foreign-key constraint the store enforces on every command.
///
/// Constraints are checked immediately, so the batch order must put
/// principal inserts before dependent inserts and dependent deletes before
/// principal deletes.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ForeignKeyConstraint {
    /// Constraint name used in error messages.
    pub name: String,
    /// Table holding the foreign key.
    pub dependent_table: String,
    /// Foreign-key columns.
    pub dependent_columns: Vec<String>,
    /// Referenced table.
    pub principal_table: String,
    /// Referenced columns, positionally matched.
    pub principal_columns: Vec<String>,
}
