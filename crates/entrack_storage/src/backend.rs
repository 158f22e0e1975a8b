//! Storage collaborator trait definition.

use crate::batch::{Row, SaveBatch, SaveOutcome};
use crate::error::StorageResult;
use entrack_value::Value;

/// The storage collaborator of a change-tracking session.
///
/// Backends persist rows grouped in tables. They know nothing about
/// navigations, entity states or fixup: the tracker owns all of that and
/// only submits ordered commands.
///
/// # Invariants
///
/// - `save` applies every command of the batch or none of them
/// - commands are applied in batch order
/// - a [`crate::ColumnOrigin`] is resolved against the row written by the
///   referenced (earlier) command
/// - values listed in [`SaveCommand::generated`](crate::SaveCommand) are
///   produced by the store and reported in the outcome
///
/// # Implementors
///
/// - [`super::InMemoryStore`] - For tests and benchmarks
pub trait StoreBackend: Send + Sync {
    /// Persists an ordered batch.
    ///
    /// # Errors
    ///
    /// Returns an error identifying the failing command if any command
    /// violates a constraint; no command of the batch takes effect then.
    fn save(&self, batch: &SaveBatch) -> StorageResult<SaveOutcome>;

    /// Returns the rows of `table` whose columns equal every `(column, value)`
    /// pair of `filter`. A missing column compares as `Null`.
    ///
    /// # Errors
    ///
    /// Returns an error if the store cannot be read.
    fn query(&self, table: &str, filter: &[(String, Value)]) -> StorageResult<Vec<Row>>;
}
