//! Fluent model construction and validation.

use super::entity_type::{
    EntityType, Key, Navigation, NavigationKind, NavigationSide, Property, ValueGeneration,
};
use super::relationship::{DeleteBehavior, Relationship};
use super::Model;
use crate::error::{CoreError, CoreResult};
use crate::types::{EntityTypeId, RelationshipId};
use entrack_value::ValueKind;
use std::collections::HashMap;

/// Declares one property of an entity type.
#[derive(Debug, Clone)]
pub struct PropertyBuilder {
    name: String,
    kind: ValueKind,
    nullable: bool,
    generation: ValueGeneration,
}

impl PropertyBuilder {
    /// Creates a non-nullable, non-generated property.
    pub fn new(name: impl Into<String>, kind: ValueKind) -> Self {
        Self {
            name: name.into(),
            kind,
            nullable: false,
            generation: ValueGeneration::Never,
        }
    }

    /// Allows the property to hold `Null`.
    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.nullable = true;
        self
    }

    /// Lets the store generate the value on insert.
    #[must_use]
    pub fn store_generated(mut self) -> Self {
        self.generation = ValueGeneration::OnAddStore;
        self
    }

    /// Lets the tracker generate the value when the entity is added.
    #[must_use]
    pub fn client_generated(mut self) -> Self {
        self.generation = ValueGeneration::OnAddClient;
        self
    }
}

/// Declares an entity type.
#[derive(Debug, Clone)]
pub struct EntityTypeBuilder {
    name: String,
    base: Option<String>,
    properties: Vec<PropertyBuilder>,
    primary_key: Vec<String>,
    alternate_keys: Vec<Vec<String>>,
}

impl EntityTypeBuilder {
    /// Starts declaring an entity type named `name`.
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            base: None,
            properties: Vec::new(),
            primary_key: Vec::new(),
            alternate_keys: Vec::new(),
        }
    }

    /// Derives this type from `base`.
    #[must_use]
    pub fn base(mut self, base: impl Into<String>) -> Self {
        self.base = Some(base.into());
        self
    }

    /// Adds a property.
    #[must_use]
    pub fn property(mut self, property: PropertyBuilder) -> Self {
        self.properties.push(property);
        self
    }

    /// Sets the primary key. Only valid on hierarchy roots.
    #[must_use]
    pub fn key(mut self, properties: &[&str]) -> Self {
        self.primary_key = properties.iter().map(|p| (*p).to_string()).collect();
        self
    }

    /// Adds an alternate key. Only valid on hierarchy roots.
    #[must_use]
    pub fn alternate_key(mut self, properties: &[&str]) -> Self {
        self.alternate_keys
            .push(properties.iter().map(|p| (*p).to_string()).collect());
        self
    }
}

/// Declares a relationship between a principal and a dependent type.
#[derive(Debug, Clone)]
pub struct RelationshipBuilder {
    principal: String,
    dependent: String,
    foreign_key: Vec<String>,
    principal_key: Option<Vec<String>>,
    principal_navigation: Option<(String, NavigationKind)>,
    dependent_navigation: Option<String>,
    required: bool,
    unique: bool,
    delete_behavior: Option<DeleteBehavior>,
}

impl RelationshipBuilder {
    /// Starts declaring a relationship; by default it is optional,
    /// one-to-many and references the principal's primary key.
    pub fn new(principal: impl Into<String>, dependent: impl Into<String>) -> Self {
        Self {
            principal: principal.into(),
            dependent: dependent.into(),
            foreign_key: Vec::new(),
            principal_key: None,
            principal_navigation: None,
            dependent_navigation: None,
            required: false,
            unique: false,
            delete_behavior: None,
        }
    }

    /// Sets the foreign-key properties on the dependent.
    #[must_use]
    pub fn foreign_key(mut self, properties: &[&str]) -> Self {
        self.foreign_key = properties.iter().map(|p| (*p).to_string()).collect();
        self
    }

    /// References these principal properties instead of the primary key,
    /// declaring an alternate key if needed.
    #[must_use]
    pub fn principal_key(mut self, properties: &[&str]) -> Self {
        self.principal_key = Some(properties.iter().map(|p| (*p).to_string()).collect());
        self
    }

    /// Adds a collection navigation on the principal.
    #[must_use]
    pub fn principal_collection(mut self, name: impl Into<String>) -> Self {
        self.principal_navigation = Some((name.into(), NavigationKind::Collection));
        self
    }

    /// Adds a reference navigation on the principal and makes the
    /// relationship one-to-one.
    #[must_use]
    pub fn principal_reference(mut self, name: impl Into<String>) -> Self {
        self.principal_navigation = Some((name.into(), NavigationKind::Reference));
        self.unique = true;
        self
    }

    /// Adds a reference navigation on the dependent.
    #[must_use]
    pub fn dependent_reference(mut self, name: impl Into<String>) -> Self {
        self.dependent_navigation = Some(name.into());
        self
    }

    /// Makes the relationship required.
    #[must_use]
    pub fn required(mut self) -> Self {
        self.required = true;
        self
    }

    /// Makes the relationship one-to-one without a principal navigation.
    #[must_use]
    pub fn unique(mut self) -> Self {
        self.unique = true;
        self
    }

    /// Sets the delete behavior. Defaults to `Cascade` for required and
    /// `ClientSetNull` for optional relationships.
    #[must_use]
    pub fn on_delete(mut self, behavior: DeleteBehavior) -> Self {
        self.delete_behavior = Some(behavior);
        self
    }
}

/// Assembles and validates a [`Model`].
///
/// # Example
///
/// ```rust
/// use entrack_core::{EntityTypeBuilder, ModelBuilder, PropertyBuilder, RelationshipBuilder};
/// use entrack_value::ValueKind;
///
/// let model = ModelBuilder::new()
///     .entity_type(
///         EntityTypeBuilder::new("Blog")
///             .property(PropertyBuilder::new("Id", ValueKind::Integer).store_generated())
///             .key(&["Id"]),
///     )
///     .entity_type(
///         EntityTypeBuilder::new("Post")
///             .property(PropertyBuilder::new("Id", ValueKind::Integer).store_generated())
///             .property(PropertyBuilder::new("BlogId", ValueKind::Integer))
///             .key(&["Id"]),
///     )
///     .relationship(
///         RelationshipBuilder::new("Blog", "Post")
///             .foreign_key(&["BlogId"])
///             .principal_collection("Posts")
///             .dependent_reference("Blog")
///             .required(),
///     )
///     .build()
///     .unwrap();
/// assert_eq!(model.entity_type("Post").unwrap().relationships_as_dependent().len(), 1);
/// ```
#[derive(Debug, Clone, Default)]
pub struct ModelBuilder {
    entity_types: Vec<EntityTypeBuilder>,
    relationships: Vec<RelationshipBuilder>,
}

impl ModelBuilder {
    /// Creates an empty builder.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Adds an entity type.
    #[must_use]
    pub fn entity_type(mut self, entity_type: EntityTypeBuilder) -> Self {
        self.entity_types.push(entity_type);
        self
    }

    /// Adds a relationship.
    #[must_use]
    pub fn relationship(mut self, relationship: RelationshipBuilder) -> Self {
        self.relationships.push(relationship);
        self
    }

    /// Validates the declarations and builds the model.
    ///
    /// # Errors
    ///
    /// Returns [`CoreError::InvalidModel`] (or an unknown type/property
    /// error) if the declarations are inconsistent.
    pub fn build(self) -> CoreResult<Model> {
        let n = self.entity_types.len();
        let mut by_name = HashMap::with_capacity(n);
        for (i, t) in self.entity_types.iter().enumerate() {
            if by_name.insert(t.name.clone(), EntityTypeId::new(i as u32)).is_some() {
                return Err(CoreError::invalid_model(format!(
                    "entity type '{}' is declared twice",
                    t.name
                )));
            }
        }
        let lookup = |name: &str| {
            by_name
                .get(name)
                .copied()
                .ok_or_else(|| CoreError::unknown_entity_type(name))
        };

        let bases = self
            .entity_types
            .iter()
            .map(|t| t.base.as_deref().map(lookup).transpose())
            .collect::<CoreResult<Vec<_>>>()?;

        let mut depths = vec![0usize; n];
        for (i, depth) in depths.iter_mut().enumerate() {
            let mut current = bases[i];
            while let Some(base) = current {
                *depth += 1;
                if *depth > n {
                    return Err(CoreError::invalid_model(format!(
                        "entity type '{}' has a cyclic base type chain",
                        self.entity_types[i].name
                    )));
                }
                current = bases[base.index()];
            }
        }
        let mut order: Vec<usize> = (0..n).collect();
        order.sort_by_key(|&i| (depths[i], i));

        // Properties, flattened base-first.
        let mut roots = vec![EntityTypeId::new(0); n];
        let mut properties: Vec<Vec<Property>> = vec![Vec::new(); n];
        for &i in &order {
            let id = EntityTypeId::new(i as u32);
            let declared = &self.entity_types[i];
            let mut flat = bases[i]
                .map(|b| properties[b.index()].clone())
                .unwrap_or_default();
            roots[i] = bases[i].map_or(id, |b| roots[b.index()]);
            for p in &declared.properties {
                if flat.iter().any(|existing| existing.name == p.name) {
                    return Err(CoreError::invalid_model(format!(
                        "property '{}.{}' is declared twice",
                        declared.name, p.name
                    )));
                }
                if p.generation == ValueGeneration::OnAddClient && p.kind != ValueKind::Guid {
                    return Err(CoreError::invalid_model(format!(
                        "client-generated property '{}.{}' must be a guid",
                        declared.name, p.name
                    )));
                }
                if p.generation == ValueGeneration::OnAddStore
                    && !matches!(p.kind, ValueKind::Integer | ValueKind::Guid)
                {
                    return Err(CoreError::invalid_model(format!(
                        "store-generated property '{}.{}' must be an integer or a guid",
                        declared.name, p.name
                    )));
                }
                flat.push(Property {
                    name: p.name.clone(),
                    kind: p.kind,
                    nullable: p.nullable,
                    generation: p.generation,
                    declaring_type: id,
                });
            }
            properties[i] = flat;
        }

        // Keys live on roots.
        let mut keys: Vec<Vec<Key>> = vec![Vec::new(); n];
        for (i, declared) in self.entity_types.iter().enumerate() {
            if bases[i].is_some() {
                if !declared.primary_key.is_empty() || !declared.alternate_keys.is_empty() {
                    return Err(CoreError::invalid_model(format!(
                        "keys of '{}' must be declared on the root of its hierarchy",
                        declared.name
                    )));
                }
                continue;
            }
            if declared.primary_key.is_empty() {
                return Err(CoreError::invalid_model(format!(
                    "entity type '{}' has no primary key",
                    declared.name
                )));
            }
            for names in std::iter::once(&declared.primary_key).chain(&declared.alternate_keys) {
                let key = resolve_key(&properties[i], &declared.name, names)?;
                if !keys[i].contains(&key) {
                    keys[i].push(key);
                }
            }
        }

        let mut relationships = Vec::with_capacity(self.relationships.len());
        let mut declared_navigations: Vec<Vec<Navigation>> = vec![Vec::new(); n];
        for (r, declared) in self.relationships.iter().enumerate() {
            let id = RelationshipId::new(r as u32);
            let principal = lookup(&declared.principal)?;
            let dependent = lookup(&declared.dependent)?;
            let principal_root = roots[principal.index()];
            let dependent_properties = &properties[dependent.index()];

            let foreign_key = resolve_slots(dependent_properties, &declared.dependent, &declared.foreign_key)?;
            if foreign_key.is_empty() {
                return Err(CoreError::invalid_model(format!(
                    "relationship {} -> {} has no foreign key",
                    declared.principal, declared.dependent
                )));
            }

            let principal_properties = match &declared.principal_key {
                Some(names) => {
                    let root_name = &self.entity_types[principal_root.index()].name;
                    resolve_key(&properties[principal_root.index()], root_name, names)?.properties
                }
                None => keys[principal_root.index()]
                    .first()
                    .map(|k| k.properties.clone())
                    .ok_or_else(|| {
                        CoreError::invalid_model(format!("'{}' has no primary key", declared.principal))
                    })?,
            };
            let root_keys = &mut keys[principal_root.index()];
            let principal_key = match root_keys.iter().position(|k| k.properties == principal_properties) {
                Some(k) => k,
                None => {
                    root_keys.push(Key {
                        properties: principal_properties.clone(),
                    });
                    root_keys.len() - 1
                }
            };

            if foreign_key.len() != principal_properties.len() {
                return Err(CoreError::invalid_model(format!(
                    "foreign key of {} -> {} has {} properties but the principal key has {}",
                    declared.principal,
                    declared.dependent,
                    foreign_key.len(),
                    principal_properties.len()
                )));
            }
            let principal_root_properties = &properties[principal_root.index()];
            for (&f, &p) in foreign_key.iter().zip(&principal_properties) {
                if dependent_properties[f].kind != principal_root_properties[p].kind {
                    return Err(CoreError::invalid_model(format!(
                        "'{}.{}' is {} but references '{}' of kind {}",
                        declared.dependent,
                        dependent_properties[f].name,
                        dependent_properties[f].kind,
                        principal_root_properties[p].name,
                        principal_root_properties[p].kind
                    )));
                }
            }

            let delete_behavior = declared.delete_behavior.unwrap_or(if declared.required {
                DeleteBehavior::Cascade
            } else {
                DeleteBehavior::ClientSetNull
            });
            if declared.required && delete_behavior.nulls_dependents() {
                return Err(CoreError::invalid_model(format!(
                    "required relationship {} -> {} cannot use {delete_behavior:?}",
                    declared.principal, declared.dependent
                )));
            }
            if !declared.required && foreign_key.iter().any(|&f| !dependent_properties[f].nullable) {
                return Err(CoreError::invalid_model(format!(
                    "optional relationship {} -> {} needs nullable foreign key properties",
                    declared.principal, declared.dependent
                )));
            }

            let name = match &declared.principal_navigation {
                Some((nav, kind)) => {
                    if *kind == NavigationKind::Collection && declared.unique {
                        return Err(CoreError::invalid_model(format!(
                            "one-to-one relationship {} -> {} cannot use collection '{nav}'",
                            declared.principal, declared.dependent
                        )));
                    }
                    declared_navigations[principal.index()].push(Navigation {
                        name: nav.clone(),
                        kind: *kind,
                        relationship: id,
                        side: NavigationSide::Principal,
                        target: dependent,
                        declaring_type: principal,
                    });
                    format!("{}.{nav}", declared.principal)
                }
                None => format!("{}.{}", declared.principal, declared.dependent),
            };
            if let Some(nav) = &declared.dependent_navigation {
                declared_navigations[dependent.index()].push(Navigation {
                    name: nav.clone(),
                    kind: NavigationKind::Reference,
                    relationship: id,
                    side: NavigationSide::Dependent,
                    target: principal,
                    declaring_type: dependent,
                });
            }

            relationships.push(Relationship {
                id,
                name,
                principal,
                dependent,
                principal_key,
                principal_properties,
                foreign_key,
                required: declared.required,
                unique: declared.unique,
                delete_behavior,
                principal_navigation: None,
                dependent_navigation: None,
            });
        }

        // Navigations, flattened base-first like properties.
        let mut navigations: Vec<Vec<Navigation>> = vec![Vec::new(); n];
        for &i in &order {
            let mut flat = bases[i]
                .map(|b| navigations[b.index()].clone())
                .unwrap_or_default();
            flat.append(&mut declared_navigations[i]);
            navigations[i] = flat;
        }
        for (i, flat) in navigations.iter().enumerate() {
            for (slot, nav) in flat.iter().enumerate() {
                let clashes = flat[..slot].iter().any(|other| other.name == nav.name)
                    || properties[i].iter().any(|p| p.name == nav.name);
                if clashes {
                    return Err(CoreError::invalid_model(format!(
                        "member '{}.{}' is declared twice",
                        self.entity_types[i].name, nav.name
                    )));
                }
            }
        }
        for relationship in &mut relationships {
            relationship.principal_navigation = navigations[relationship.principal.index()]
                .iter()
                .position(|nav| nav.relationship == relationship.id && nav.side == NavigationSide::Principal);
            relationship.dependent_navigation = navigations[relationship.dependent.index()]
                .iter()
                .position(|nav| nav.relationship == relationship.id && nav.side == NavigationSide::Dependent);
        }

        let ancestors = |i: usize| {
            let mut chain = vec![EntityTypeId::new(i as u32)];
            let mut current = bases[i];
            while let Some(base) = current {
                chain.push(base);
                current = bases[base.index()];
            }
            chain
        };

        let mut entity_types = Vec::with_capacity(n);
        for (i, declared) in self.entity_types.into_iter().enumerate() {
            let id = EntityTypeId::new(i as u32);
            let chain = ancestors(i);
            entity_types.push(EntityType {
                id,
                name: declared.name,
                base: bases[i],
                root: roots[i],
                properties: std::mem::take(&mut properties[i]),
                navigations: std::mem::take(&mut navigations[i]),
                keys: keys[roots[i].index()].clone(),
                as_dependent: relationships
                    .iter()
                    .filter(|r| chain.contains(&r.dependent))
                    .map(|r| r.id)
                    .collect(),
                as_principal: relationships
                    .iter()
                    .filter(|r| chain.contains(&r.principal))
                    .map(|r| r.id)
                    .collect(),
                derived: (0..n)
                    .filter(|&j| bases[j] == Some(id))
                    .map(|j| EntityTypeId::new(j as u32))
                    .collect(),
            });
        }

        Ok(Model::new(entity_types, relationships, by_name))
    }
}

fn resolve_slots(properties: &[Property], entity_type: &str, names: &[String]) -> CoreResult<Vec<usize>> {
    names
        .iter()
        .map(|name| {
            properties
                .iter()
                .position(|p| &p.name == name)
                .ok_or_else(|| CoreError::unknown_property(entity_type, name.as_str()))
        })
        .collect()
}

fn resolve_key(properties: &[Property], entity_type: &str, names: &[String]) -> CoreResult<Key> {
    let slots = resolve_slots(properties, entity_type, names)?;
    if let Some(&nullable) = slots.iter().find(|&&s| properties[s].nullable) {
        return Err(CoreError::invalid_model(format!(
            "key property '{entity_type}.{}' cannot be nullable",
            properties[nullable].name
        )));
    }
    Ok(Key { properties: slots })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn id_property() -> PropertyBuilder {
        PropertyBuilder::new("Id", ValueKind::Integer).store_generated()
    }

    fn parent_child() -> ModelBuilder {
        ModelBuilder::new()
            .entity_type(EntityTypeBuilder::new("Parent").property(id_property()).key(&["Id"]))
            .entity_type(
                EntityTypeBuilder::new("Child")
                    .property(id_property())
                    .property(PropertyBuilder::new("ParentId", ValueKind::Integer).nullable())
                    .key(&["Id"]),
            )
    }

    #[test]
    fn navigations_are_resolved_to_slots() {
        let model = parent_child()
            .relationship(
                RelationshipBuilder::new("Parent", "Child")
                    .foreign_key(&["ParentId"])
                    .principal_collection("Children")
                    .dependent_reference("Parent")
                    .on_delete(DeleteBehavior::SetNull),
            )
            .build()
            .unwrap();

        let rel = model.relationship(RelationshipId::new(0));
        assert_eq!(rel.principal_navigation(), Some(0));
        assert_eq!(rel.dependent_navigation(), Some(0));
        assert_eq!(rel.name(), "Parent.Children");
        assert!(!rel.is_unique());
    }

    #[test]
    fn default_delete_behavior_follows_requiredness() {
        let model = parent_child()
            .relationship(RelationshipBuilder::new("Parent", "Child").foreign_key(&["ParentId"]))
            .build()
            .unwrap();
        assert_eq!(
            model.relationship(RelationshipId::new(0)).delete_behavior(),
            DeleteBehavior::ClientSetNull
        );
    }

    #[test]
    fn set_null_on_required_is_rejected() {
        let err = parent_child()
            .relationship(
                RelationshipBuilder::new("Parent", "Child")
                    .foreign_key(&["ParentId"])
                    .required()
                    .on_delete(DeleteBehavior::SetNull),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidModel { .. }));
    }

    #[test]
    fn optional_relationship_needs_nullable_foreign_key() {
        let err = ModelBuilder::new()
            .entity_type(EntityTypeBuilder::new("Parent").property(id_property()).key(&["Id"]))
            .entity_type(
                EntityTypeBuilder::new("Child")
                    .property(id_property())
                    .property(PropertyBuilder::new("ParentId", ValueKind::Integer))
                    .key(&["Id"]),
            )
            .relationship(RelationshipBuilder::new("Parent", "Child").foreign_key(&["ParentId"]))
            .build()
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidModel { .. }));
    }

    #[test]
    fn foreign_key_arity_must_match() {
        let err = parent_child()
            .relationship(RelationshipBuilder::new("Parent", "Child").foreign_key(&["ParentId", "Id"]))
            .build()
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidModel { .. }));
    }

    #[test]
    fn derived_types_inherit_slots_and_relationships() {
        let model = parent_child()
            .entity_type(
                EntityTypeBuilder::new("SpecialChild")
                    .base("Child")
                    .property(PropertyBuilder::new("Extra", ValueKind::Text).nullable()),
            )
            .relationship(
                RelationshipBuilder::new("Parent", "Child")
                    .foreign_key(&["ParentId"])
                    .principal_collection("Children")
                    .dependent_reference("Parent")
                    .on_delete(DeleteBehavior::SetNull),
            )
            .build()
            .unwrap();

        let child = model.entity_type("Child").unwrap();
        let special = model.entity_type("SpecialChild").unwrap();
        assert_eq!(special.property_index("ParentId"), child.property_index("ParentId"));
        assert_eq!(special.property_index("Extra"), Some(2));
        assert_eq!(special.navigation_index("Parent"), Some(0));
        assert_eq!(special.relationships_as_dependent().len(), 1);
        assert_eq!(special.root(), child.id());
        assert_eq!(special.primary_key(), child.primary_key());
        assert!(model.is_assignable(special.id(), child.id()));
        assert!(!model.is_assignable(child.id(), special.id()));
    }

    #[test]
    fn keys_on_derived_types_are_rejected() {
        let err = parent_child()
            .entity_type(EntityTypeBuilder::new("SpecialChild").base("Child").key(&["Id"]))
            .build()
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidModel { .. }));
    }

    #[test]
    fn principal_key_declares_alternate_key() {
        let model = ModelBuilder::new()
            .entity_type(
                EntityTypeBuilder::new("Parent")
                    .property(id_property())
                    .property(PropertyBuilder::new("AlternateId", ValueKind::Guid).client_generated())
                    .key(&["Id"]),
            )
            .entity_type(
                EntityTypeBuilder::new("Child")
                    .property(id_property())
                    .property(PropertyBuilder::new("ParentId", ValueKind::Guid))
                    .key(&["Id"]),
            )
            .relationship(
                RelationshipBuilder::new("Parent", "Child")
                    .foreign_key(&["ParentId"])
                    .principal_key(&["AlternateId"])
                    .required(),
            )
            .build()
            .unwrap();

        let parent = model.entity_type("Parent").unwrap();
        assert_eq!(parent.keys().len(), 2);
        assert_eq!(model.relationship(RelationshipId::new(0)).principal_key(), 1);
        assert!(parent.is_key_property(1));
    }

    #[test]
    fn base_cycles_are_rejected() {
        let err = ModelBuilder::new()
            .entity_type(EntityTypeBuilder::new("A").base("B"))
            .entity_type(EntityTypeBuilder::new("B").base("A"))
            .build()
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidModel { .. }));
    }

    #[test]
    fn collection_on_unique_relationship_is_rejected() {
        let err = parent_child()
            .relationship(
                RelationshipBuilder::new("Parent", "Child")
                    .foreign_key(&["ParentId"])
                    .unique()
                    .principal_collection("Children"),
            )
            .build()
            .unwrap_err();
        assert!(matches!(err, CoreError::InvalidModel { .. }));
    }
}
