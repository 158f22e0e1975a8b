//! Save batch planning.
//!
//! Planning turns pending entries into store commands and orders them:
//!
//! - an insert producing a principal key runs before inserts and updates
//!   of dependents referencing it
//! - updates and deletes of dependents run before the delete of the
//!   principal they referenced
//! - a delete runs before an insert reusing the same row key
//!
//! Temporary values are sent with an origin naming the insert that
//! produces the permanent value, so the store can substitute it.

use crate::entry::{EntityState, TrackedEntry};
use crate::error::{CoreError, CoreResult};
use crate::model::{DeleteBehavior, EntityType, ValueGeneration};
use crate::tracker::ChangeTracker;
use crate::types::{ObjectId, RelationshipId};
use entrack_storage::{ColumnValue, Operation, Row, SaveBatch, SaveCommand, StoreBackend};
use entrack_value::{KeyValues, Value, ValueKind};
use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use tracing::debug;

/// An ordered batch together with the tracked instance behind each command.
#[derive(Debug)]
pub(crate) struct BatchPlan {
    pub(crate) batch: SaveBatch,
    /// Instance written by each command; `None` for rows reached only
    /// through a store cascade.
    pub(crate) objects: Vec<Option<ObjectId>>,
}

#[derive(Debug)]
struct Planned {
    command: SaveCommand,
    object: Option<ObjectId>,
    origins: Vec<PendingOrigin>,
}

/// A column whose value the insert of `producer` will generate.
#[derive(Debug)]
struct PendingOrigin {
    in_key: bool,
    position: usize,
    producer: ObjectId,
    column: String,
}

/// Store rows already planned: `None` marks a delete, `Some(rel)` a
/// foreign key nulled for `rel`.
type Visited = HashSet<(String, KeyValues, Option<RelationshipId>)>;

#[derive(Debug, Default)]
struct Graph {
    commands: Vec<Planned>,
    /// `(before, after)` pairs.
    edges: BTreeSet<(usize, usize)>,
}

impl ChangeTracker {
    /// Builds the ordered batch for every pending entry.
    pub(crate) fn plan(&self, store: &dyn StoreBackend) -> CoreResult<BatchPlan> {
        let mut graph = Graph::default();
        let mut command_of: HashMap<ObjectId, usize> = HashMap::new();

        for (&object, entry) in &self.entries {
            let planned = match entry.state {
                EntityState::Added => Some(self.insert_command(object, entry)?),
                EntityState::Modified => self.update_command(object, entry)?,
                EntityState::Deleted => Some(self.delete_command(object, entry)),
                EntityState::Unchanged | EntityState::Detached => None,
            };
            if let Some(planned) = planned {
                command_of.insert(object, graph.commands.len());
                graph.commands.push(planned);
            }
        }

        self.order_tracked(&mut graph, &command_of);

        if self.config.cascade_in_store {
            let mut visited = Visited::new();
            for (&object, entry) in &self.entries {
                if entry.state != EntityState::Deleted {
                    continue;
                }
                let Some(&index) = command_of.get(&object) else {
                    continue;
                };
                let row = self.original_row(entry);
                self.cascade_in_store(store, &row, index, &mut visited, &mut graph)?;
            }
        }

        let order = topological_order(graph.commands.len(), &graph.edges)?;
        let mut position = vec![0; order.len()];
        for (new, &old) in order.iter().enumerate() {
            position[old] = new;
        }

        let mut slots: Vec<Option<Planned>> = graph.commands.into_iter().map(Some).collect();
        let mut commands = Vec::with_capacity(order.len());
        let mut objects = Vec::with_capacity(order.len());
        for &old in &order {
            let Some(mut planned) = slots[old].take() else {
                continue;
            };
            for origin in planned.origins.drain(..) {
                let producer = command_of
                    .get(&origin.producer)
                    .map(|&i| position[i])
                    .ok_or_else(|| CoreError::UnresolvedTemporaryValue {
                        entity_type: planned.command.entity_type.clone(),
                        property: origin.column.clone(),
                    })?;
                let columns = if origin.in_key {
                    &mut planned.command.key
                } else {
                    &mut planned.command.values
                };
                if let Some(column) = columns.get_mut(origin.position) {
                    *column = column.clone().with_origin(producer, origin.column);
                }
            }
            commands.push(planned.command);
            objects.push(planned.object);
        }

        debug!(commands = commands.len(), "planned save batch");
        Ok(BatchPlan {
            batch: SaveBatch::new(commands),
            objects,
        })
    }

    fn insert_command(&self, object: ObjectId, entry: &TrackedEntry) -> CoreResult<Planned> {
        let entity_type = self.model.entity_type_by_id(entry.entity_type);
        let mut command = SaveCommand::insert(self.model.table_name(entity_type.id()), entity_type.name());
        let mut origins = Vec::new();

        for (slot, property) in entity_type.properties().iter().enumerate() {
            let in_key = entity_type.is_primary_key_property(slot);
            let column = ColumnValue::new(property.name(), entry.snapshot[slot].clone());
            let position = if in_key {
                command.key.len()
            } else {
                command.values.len()
            };
            command = if in_key {
                command.with_key(column)
            } else {
                command.with_value(column)
            };
            if !entry.temporary[slot] {
                continue;
            }
            match self.temporary_origin(object, entry, slot) {
                Some((producer, column)) => origins.push(PendingOrigin {
                    in_key,
                    position,
                    producer,
                    column,
                }),
                None if property.generation() == ValueGeneration::OnAddStore => {
                    command = match property.kind() {
                        ValueKind::Guid => command.with_generated_guid(property.name()),
                        _ => command.with_generated_identity(property.name()),
                    };
                }
                None => return Err(unresolved(entity_type, slot)),
            }
        }
        Ok(Planned {
            command,
            object: Some(object),
            origins,
        })
    }

    fn update_command(&self, object: ObjectId, entry: &TrackedEntry) -> CoreResult<Option<Planned>> {
        if !entry.modified.iter().any(|m| *m) {
            return Ok(None);
        }
        let entity_type = self.model.entity_type_by_id(entry.entity_type);
        let mut command = SaveCommand::update(self.model.table_name(entity_type.id()), entity_type.name());
        for &slot in entity_type.primary_key().properties() {
            command = command.with_key(ColumnValue::new(
                entity_type.property(slot).name(),
                entry.original[slot].clone(),
            ));
        }
        let mut origins = Vec::new();
        for (slot, property) in entity_type.properties().iter().enumerate() {
            if !entry.modified[slot] {
                continue;
            }
            let position = command.values.len();
            command = command.with_value(ColumnValue::new(property.name(), entry.snapshot[slot].clone()));
            if entry.temporary[slot] {
                let (producer, column) = self
                    .temporary_origin(object, entry, slot)
                    .ok_or_else(|| unresolved(entity_type, slot))?;
                origins.push(PendingOrigin {
                    in_key: false,
                    position,
                    producer,
                    column,
                });
            }
        }
        Ok(Some(Planned {
            command,
            object: Some(object),
            origins,
        }))
    }

    fn delete_command(&self, object: ObjectId, entry: &TrackedEntry) -> Planned {
        let entity_type = self.model.entity_type_by_id(entry.entity_type);
        let mut command = SaveCommand::delete(self.model.table_name(entity_type.id()), entity_type.name());
        for &slot in entity_type.primary_key().properties() {
            command = command.with_key(ColumnValue::new(
                entity_type.property(slot).name(),
                entry.original[slot].clone(),
            ));
        }
        Planned {
            command,
            object: Some(object),
            origins: Vec::new(),
        }
    }

    /// Finds the added principal whose temporary key property is the
    /// source of the value in `slot`.
    fn temporary_origin(&self, object: ObjectId, entry: &TrackedEntry, slot: usize) -> Option<(ObjectId, String)> {
        for rel in self.model.relationships_as_dependent(entry.entity_type) {
            let Some(i) = rel.foreign_key().iter().position(|&s| s == slot) else {
                continue;
            };
            let Some(principal) = self.find_principal(rel, &entry.key(rel.foreign_key())) else {
                continue;
            };
            if principal == object {
                continue;
            }
            let principal_slot = rel.principal_properties()[i];
            let produces = self.tracked(principal).is_some_and(|p| {
                p.state == EntityState::Added && p.temporary[principal_slot]
            });
            if produces {
                let name = self
                    .model
                    .entity_type_by_id(self.objects.entity_type(principal))
                    .property(principal_slot)
                    .name()
                    .to_string();
                return Some((principal, name));
            }
        }
        None
    }

    fn order_tracked(&self, graph: &mut Graph, command_of: &HashMap<ObjectId, usize>) {
        let mut deletes: HashMap<(String, KeyValues), usize> = HashMap::new();
        for (index, planned) in graph.commands.iter().enumerate() {
            if planned.command.operation == Operation::Delete {
                deletes.insert((planned.command.table.clone(), key_of(&planned.command)), index);
            }
        }

        for (index, planned) in graph.commands.iter().enumerate() {
            let Some(object) = planned.object else {
                continue;
            };
            let Some(entry) = self.tracked(object) else {
                continue;
            };
            let operation = planned.command.operation;
            for rel in self.model.relationships_as_dependent(entry.entity_type) {
                if matches!(operation, Operation::Insert | Operation::Update) {
                    let current = entry.key(rel.foreign_key());
                    if let Some(principal) = self.find_principal(rel, &current).filter(|p| *p != object) {
                        if let Some(&before) = command_of.get(&principal) {
                            if graph.commands[before].command.operation == Operation::Insert {
                                graph.edges.insert((before, index));
                            }
                        }
                    }
                }
                if matches!(operation, Operation::Update | Operation::Delete) {
                    let original = entry.original_key(rel.foreign_key());
                    if let Some(principal) = self.find_principal(rel, &original).filter(|p| *p != object) {
                        if let Some(&after) = command_of.get(&principal) {
                            if graph.commands[after].command.operation == Operation::Delete {
                                graph.edges.insert((index, after));
                            }
                        }
                    }
                }
            }
            if operation == Operation::Insert {
                let key = (planned.command.table.clone(), key_of(&planned.command));
                if let Some(&before) = deletes.get(&key) {
                    graph.edges.insert((before, index));
                }
            }
        }
    }

    /// The original values of a tracked entry, shaped like a store row.
    fn original_row(&self, entry: &TrackedEntry) -> Row {
        let entity_type = self.model.entity_type_by_id(entry.entity_type);
        Row {
            entity_type: entity_type.name().to_string(),
            values: entity_type
                .properties()
                .iter()
                .zip(&entry.original)
                .map(|(property, value)| (property.name().to_string(), value.clone()))
                .collect::<BTreeMap<_, _>>(),
        }
    }

    /// Plans commands for dependents of a deleted principal that exist only
    /// in the store, following each deleted row's own dependents.
    fn cascade_in_store(
        &self,
        store: &dyn StoreBackend,
        principal: &Row,
        principal_command: usize,
        visited: &mut Visited,
        graph: &mut Graph,
    ) -> CoreResult<()> {
        let model = &self.model;
        let principal_type = model.entity_type(&principal.entity_type)?;

        for rel in model.relationships_as_principal(principal_type.id()) {
            let dependent_type = model.entity_type_by_id(rel.dependent());
            let key = KeyValues::new(
                rel.principal_properties()
                    .iter()
                    .map(|&slot| principal.get(principal_type.property(slot).name()).clone())
                    .collect(),
            );
            if key.has_null() {
                continue;
            }
            let filter: Vec<(String, Value)> = rel
                .foreign_key()
                .iter()
                .zip(key.values())
                .map(|(&slot, value)| (dependent_type.property(slot).name().to_string(), value.clone()))
                .collect();
            let table = model.table_name(rel.dependent());

            for row in store.query(table, &filter)? {
                let Some(row_type) = model.find_entity_type(&row.entity_type) else {
                    continue;
                };
                if !model.is_assignable(row_type.id(), rel.dependent()) {
                    continue;
                }
                let row_key = primary_key_of(row_type, &row);
                if self.find(row_type.id(), 0, &row_key).is_some() {
                    continue;
                }
                if visited.contains(&(table.to_string(), row_key.clone(), None)) {
                    continue;
                }
                let marker = (rel.delete_behavior() == DeleteBehavior::SetNull).then_some(rel.id());
                if !visited.insert((table.to_string(), row_key.clone(), marker)) {
                    continue;
                }

                let index = graph.commands.len();
                match rel.delete_behavior() {
                    DeleteBehavior::Cascade => {
                        debug!(
                            principal = principal_type.name(),
                            dependent = row_type.name(),
                            key = %row_key,
                            "cascading delete to store row"
                        );
                        let mut command = SaveCommand::delete(table, row_type.name());
                        for (&slot, value) in row_type.primary_key().properties().iter().zip(row_key.values()) {
                            command = command.with_key(ColumnValue::new(row_type.property(slot).name(), value.clone()));
                        }
                        graph.commands.push(Planned {
                            command,
                            object: None,
                            origins: Vec::new(),
                        });
                        graph.edges.insert((index, principal_command));
                        self.cascade_in_store(store, &row, index, visited, graph)?;
                    }
                    DeleteBehavior::SetNull => {
                        debug!(
                            principal = principal_type.name(),
                            dependent = row_type.name(),
                            key = %row_key,
                            "nulling foreign key of store row"
                        );
                        let mut command = SaveCommand::update(table, row_type.name());
                        for (&slot, value) in row_type.primary_key().properties().iter().zip(row_key.values()) {
                            command = command.with_key(ColumnValue::new(row_type.property(slot).name(), value.clone()));
                        }
                        for &slot in rel.foreign_key() {
                            command = command.with_value(ColumnValue::new(dependent_type.property(slot).name(), Value::Null));
                        }
                        graph.commands.push(Planned {
                            command,
                            object: None,
                            origins: Vec::new(),
                        });
                        graph.edges.insert((index, principal_command));
                    }
                    behavior => {
                        return Err(CoreError::ReferentialIntegrity {
                            principal: principal_type.name().to_string(),
                            dependent: row_type.name().to_string(),
                            key,
                            behavior,
                        });
                    }
                }
            }
        }
        Ok(())
    }
}

fn unresolved(entity_type: &EntityType, slot: usize) -> CoreError {
    CoreError::UnresolvedTemporaryValue {
        entity_type: entity_type.name().to_string(),
        property: entity_type.property(slot).name().to_string(),
    }
}

fn key_of(command: &SaveCommand) -> KeyValues {
    KeyValues::new(command.key.iter().map(|c| c.value.clone()).collect())
}

fn primary_key_of(entity_type: &EntityType, row: &Row) -> KeyValues {
    KeyValues::new(
        entity_type
            .primary_key()
            .properties()
            .iter()
            .map(|&slot| row.get(entity_type.property(slot).name()).clone())
            .collect(),
    )
}

/// Orders `count` commands so every `(before, after)` edge is respected,
/// preferring the lowest index among the commands that are ready.
fn topological_order(count: usize, edges: &BTreeSet<(usize, usize)>) -> CoreResult<Vec<usize>> {
    let mut in_degree = vec![0usize; count];
    let mut successors: Vec<Vec<usize>> = vec![Vec::new(); count];
    for &(before, after) in edges {
        if before == after {
            continue;
        }
        in_degree[after] += 1;
        successors[before].push(after);
    }

    let mut ready: BTreeSet<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(count);
    while let Some(next) = ready.pop_first() {
        order.push(next);
        for &successor in &successors[next] {
            in_degree[successor] -= 1;
            if in_degree[successor] == 0 {
                ready.insert(successor);
            }
        }
    }

    if order.len() < count {
        return Err(CoreError::CircularDependency {
            count: count - order.len(),
        });
    }
    Ok(order)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn order_respects_edges() {
        let edges: BTreeSet<_> = [(2, 0), (0, 1)].into_iter().collect();
        assert_eq!(topological_order(3, &edges).unwrap(), vec![2, 0, 1]);
    }

    #[test]
    fn unconstrained_commands_keep_their_order() {
        assert_eq!(topological_order(3, &BTreeSet::new()).unwrap(), vec![0, 1, 2]);
    }

    #[test]
    fn cycles_are_reported() {
        let edges: BTreeSet<_> = [(0, 1), (1, 0)].into_iter().collect();
        let err = topological_order(3, &edges).unwrap_err();
        assert!(matches!(err, CoreError::CircularDependency { count: 2 }));
    }
}
