//! In-memory store for tests and benchmarks.

use crate::backend::StoreBackend;
use crate::batch::{
    ColumnValue, ForeignKeyConstraint, GeneratedKind, GeneratedValues, Operation, Row, SaveBatch,
    SaveCommand, SaveOutcome,
};
use crate::error::{StorageError, StorageResult};
use entrack_value::{KeyValues, Value};
use parking_lot::RwLock;
use std::collections::{BTreeMap, HashMap};
use tracing::{debug, trace};
use uuid::Uuid;

#[derive(Debug, Clone)]
struct Table {
    rows: BTreeMap<KeyValues, Row>,
    next_identity: i64,
}

impl Default for Table {
    fn default() -> Self {
        Self {
            rows: BTreeMap::new(),
            next_identity: 1,
        }
    }
}

#[derive(Debug, Default)]
struct StoreState {
    tables: HashMap<String, Table>,
    pending_failure: Option<String>,
    batches: u64,
}

/// An in-memory store.
///
/// Rows are kept per table, keyed by the key columns named in the commands
/// that wrote them. A batch is applied to a staged copy of the tables and
/// published only when every command succeeded.
///
/// # Thread Safety
///
/// This store is thread-safe and can be shared across sessions.
///
/// # Example
///
/// ```rust
/// use entrack_storage::{InMemoryStore, StoreBackend};
///
/// let store = InMemoryStore::new();
/// assert!(store.query("Root", &[]).unwrap().is_empty());
/// ```
#[derive(Debug, Default)]
pub struct InMemoryStore {
    state: RwLock<StoreState>,
    constraints: Vec<ForeignKeyConstraint>,
}

impl InMemoryStore {
    /// Creates a new empty store without constraints.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store that enforces the given foreign-key constraints.
    #[must_use]
    pub fn with_foreign_keys(constraints: Vec<ForeignKeyConstraint>) -> Self {
        Self {
            state: RwLock::default(),
            constraints,
        }
    }

    /// Sets the next identity value generated for `table`.
    pub fn set_identity_seed(&self, table: &str, next: i64) {
        let mut state = self.state.write();
        state.tables.entry(table.to_string()).or_default().next_identity = next;
    }

    /// Makes the next `save` fail with [`StorageError::Unavailable`].
    pub fn inject_failure(&self, message: impl Into<String>) {
        self.state.write().pending_failure = Some(message.into());
    }

    /// Returns a copy of all rows in `table`, ordered by key.
    #[must_use]
    pub fn rows(&self, table: &str) -> Vec<Row> {
        self.state
            .read()
            .tables
            .get(table)
            .map(|t| t.rows.values().cloned().collect())
            .unwrap_or_default()
    }

    /// Returns the number of rows in `table`.
    #[must_use]
    pub fn row_count(&self, table: &str) -> usize {
        self.state.read().tables.get(table).map_or(0, |t| t.rows.len())
    }

    /// Returns the number of batches applied successfully.
    #[must_use]
    pub fn batch_count(&self) -> u64 {
        self.state.read().batches
    }

    fn check_references(
        &self,
        tables: &HashMap<String, Table>,
        command: usize,
        table: &str,
        row: &Row,
    ) -> StorageResult<()> {
        for constraint in self.constraints.iter().filter(|c| c.dependent_table == table) {
            let values: Vec<&Value> = constraint
                .dependent_columns
                .iter()
                .map(|c| row.get(c))
                .collect();
            if values.iter().any(|v| v.is_null()) {
                continue;
            }
            let found = tables.get(&constraint.principal_table).is_some_and(|t| {
                t.rows.values().any(|candidate| {
                    constraint
                        .principal_columns
                        .iter()
                        .zip(&values)
                        .all(|(column, value)| candidate.get(column) == *value)
                })
            });
            if !found {
                return Err(StorageError::ConstraintViolation {
                    command,
                    message: format!("{}: no principal row in {}", constraint.name, constraint.principal_table),
                });
            }
        }
        Ok(())
    }

    fn check_not_referenced(
        &self,
        tables: &HashMap<String, Table>,
        command: usize,
        table: &str,
        row: &Row,
    ) -> StorageResult<()> {
        for constraint in self.constraints.iter().filter(|c| c.principal_table == table) {
            let values: Vec<&Value> = constraint
                .principal_columns
                .iter()
                .map(|c| row.get(c))
                .collect();
            if values.iter().any(|v| v.is_null()) {
                continue;
            }
            let referenced = tables.get(&constraint.dependent_table).is_some_and(|t| {
                t.rows.values().any(|candidate| {
                    constraint
                        .dependent_columns
                        .iter()
                        .zip(&values)
                        .all(|(column, value)| candidate.get(column) == *value)
                })
            });
            if referenced {
                return Err(StorageError::ConstraintViolation {
                    command,
                    message: format!(
                        "{}: row in {} is still referenced from {}",
                        constraint.name, table, constraint.dependent_table
                    ),
                });
            }
        }
        Ok(())
    }
}

fn resolve(
    written: &[BTreeMap<String, Value>],
    command: usize,
    column: &ColumnValue,
) -> StorageResult<Value> {
    let Some(origin) = &column.origin else {
        return Ok(column.value.clone());
    };
    let unresolved = || StorageError::UnresolvedOrigin {
        command,
        column: column.name.clone(),
    };
    if origin.command >= command {
        return Err(unresolved());
    }
    written
        .get(origin.command)
        .and_then(|row| row.get(&origin.column))
        .cloned()
        .ok_or_else(unresolved)
}

fn resolve_key(
    written: &[BTreeMap<String, Value>],
    index: usize,
    command: &SaveCommand,
) -> StorageResult<KeyValues> {
    command
        .key
        .iter()
        .map(|c| resolve(written, index, c))
        .collect::<StorageResult<Vec<_>>>()
        .map(KeyValues::new)
}

impl StoreBackend for InMemoryStore {
    fn save(&self, batch: &SaveBatch) -> StorageResult<SaveOutcome> {
        let mut state = self.state.write();
        if let Some(message) = state.pending_failure.take() {
            return Err(StorageError::Unavailable(message));
        }

        let mut tables = state.tables.clone();
        let mut written: Vec<BTreeMap<String, Value>> = Vec::with_capacity(batch.len());
        let mut outcome = SaveOutcome::default();

        for (index, command) in batch.commands.iter().enumerate() {
            trace!(index, table = %command.table, operation = ?command.operation, "applying command");
            match command.operation {
                Operation::Insert => {
                    let mut values = BTreeMap::new();
                    for column in command.key.iter().chain(&command.values) {
                        values.insert(column.name.clone(), resolve(&written, index, column)?);
                    }
                    let table = tables.entry(command.table.clone()).or_default();
                    let mut generated = Vec::new();
                    for column in &command.generated {
                        let value = match column.kind {
                            GeneratedKind::Identity => {
                                let next = table.next_identity;
                                table.next_identity += 1;
                                Value::Integer(next)
                            }
                            GeneratedKind::Guid => Value::Guid(Uuid::new_v4()),
                        };
                        values.insert(column.name.clone(), value.clone());
                        generated.push((column.name.clone(), value));
                    }
                    let key = KeyValues::new(
                        command
                            .key
                            .iter()
                            .map(|c| values.get(&c.name).cloned().unwrap_or(Value::Null))
                            .collect(),
                    );
                    if table.rows.contains_key(&key) {
                        return Err(StorageError::DuplicateKey {
                            command: index,
                            table: command.table.clone(),
                        });
                    }
                    let row = Row {
                        entity_type: command.entity_type.clone(),
                        values,
                    };
                    table.rows.insert(key, row.clone());
                    self.check_references(&tables, index, &command.table, &row)?;
                    if !generated.is_empty() {
                        outcome.generated.push(GeneratedValues {
                            command: index,
                            values: generated,
                        });
                    }
                    written.push(row.values);
                }
                Operation::Update => {
                    let key = resolve_key(&written, index, command)?;
                    let mut assignments = Vec::with_capacity(command.values.len());
                    for column in &command.values {
                        assignments.push((column.name.clone(), resolve(&written, index, column)?));
                    }
                    let row = tables
                        .get_mut(&command.table)
                        .and_then(|t| t.rows.get_mut(&key))
                        .ok_or_else(|| StorageError::RowNotFound {
                            command: index,
                            table: command.table.clone(),
                        })?;
                    row.values.extend(assignments);
                    let row = row.clone();
                    self.check_references(&tables, index, &command.table, &row)?;
                    written.push(row.values);
                }
                Operation::Delete => {
                    let key = resolve_key(&written, index, command)?;
                    let row = tables
                        .get_mut(&command.table)
                        .and_then(|t| t.rows.remove(&key))
                        .ok_or_else(|| StorageError::RowNotFound {
                            command: index,
                            table: command.table.clone(),
                        })?;
                    self.check_not_referenced(&tables, index, &command.table, &row)?;
                    written.push(row.values);
                }
            }
            outcome.rows_affected += 1;
        }

        state.tables = tables;
        state.batches += 1;
        debug!(commands = batch.len(), "batch applied");
        Ok(outcome)
    }

    fn query(&self, table: &str, filter: &[(String, Value)]) -> StorageResult<Vec<Row>> {
        let state = self.state.read();
        let Some(table) = state.tables.get(table) else {
            return Ok(Vec::new());
        };
        Ok(table
            .rows
            .values()
            .filter(|row| filter.iter().all(|(column, value)| row.get(column) == value))
            .cloned()
            .collect())
    }
}
