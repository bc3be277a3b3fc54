//! Relation classification
//!
//! Every relation of every entity is described once, up front, by a
//! [`RelationDescriptor`]: the field name as seen from that entity, the
//! target entity, whether the foreign key lives on this side (forward) or
//! the other (reverse), and the cardinality. Reverse descriptors are derived
//! from the forward declarations of other entities.

use std::collections::HashMap;

use indexmap::IndexMap;
use serde::Serialize;

use super::entity::{EntityDef, ForwardRelationDef, RelationKind};
use crate::errors::{SchemaError, SchemaResult};

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Direction {
    /// This entity's row holds the foreign key, or declares the many-to-many
    Forward,
    /// The related row holds the foreign key back to this entity
    Reverse,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Cardinality {
    OneToOne,
    ManyToOne,
    OneToMany,
    ManyToMany,
}

/// Where the link between the two rows is stored
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum RelationLink {
    /// Foreign key column on this entity's table
    LocalColumn { column: String, nullable: bool },
    /// Foreign key column on the target entity's table
    RemoteColumn { column: String, nullable: bool },
    /// Join table with one column per side
    JoinTable {
        table: String,
        source_column: String,
        target_column: String,
        symmetrical: bool,
    },
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct RelationDescriptor {
    pub field: String,
    pub target: String,
    pub direction: Direction,
    pub cardinality: Cardinality,
    /// Name of the same relation as seen from the target entity
    pub remote_field: String,
    pub link: RelationLink,
}

impl RelationDescriptor {
    pub fn is_forward(&self) -> bool {
        self.direction == Direction::Forward
    }

    pub fn is_reverse(&self) -> bool {
        self.direction == Direction::Reverse
    }

    pub fn one_to_one(&self) -> bool {
        self.cardinality == Cardinality::OneToOne
    }

    pub fn many_to_one(&self) -> bool {
        self.cardinality == Cardinality::ManyToOne
    }

    pub fn one_to_many(&self) -> bool {
        self.cardinality == Cardinality::OneToMany
    }

    pub fn many_to_many(&self) -> bool {
        self.cardinality == Cardinality::ManyToMany
    }

    /// Input for this relation is a list of related objects
    pub fn is_to_many(&self) -> bool {
        self.one_to_many() || self.many_to_many()
    }

    /// Can be written before the owning row exists
    pub fn resolves_before_save(&self) -> bool {
        self.is_forward() && (self.one_to_one() || self.many_to_one())
    }
}

pub type RelationMap = IndexMap<String, RelationDescriptor>;

fn default_accessor(owner: &EntityDef, relation: &ForwardRelationDef) -> String {
    match relation.kind {
        RelationKind::OneToOne => owner.model_name(),
        RelationKind::ForeignKey | RelationKind::ManyToMany => format!("{}_set", owner.model_name()),
    }
}

fn insert_unique(
    map: &mut RelationMap,
    owner: &EntityDef,
    descriptor: RelationDescriptor,
) -> SchemaResult<()> {
    if owner.fields.contains_key(&descriptor.field)
        || owner.primary_key == descriptor.field
        || map.contains_key(&descriptor.field)
    {
        return Err(SchemaError::AccessorClash {
            entity: owner.name.clone(),
            field: descriptor.field,
        });
    }
    map.insert(descriptor.field.clone(), descriptor);
    Ok(())
}

/// Compute the relation descriptors of every entity
///
/// Forward relations of an entity come first in declaration order, followed
/// by reverse relations in entity registration order.
pub fn classify(entities: &IndexMap<String, EntityDef>) -> SchemaResult<HashMap<String, RelationMap>> {
    let mut forward: HashMap<String, RelationMap> = HashMap::new();
    let mut reverse: HashMap<String, Vec<(String, RelationDescriptor)>> = HashMap::new();

    for entity in entities.values() {
        let map = forward.entry(entity.name.clone()).or_default();

        for relation in &entity.relations {
            let target = entities.get(&relation.target).ok_or_else(|| SchemaError::UnknownTarget {
                entity: entity.name.clone(),
                relation: relation.name.clone(),
                target: relation.target.clone(),
            })?;
            let accessor = relation
                .related_name
                .clone()
                .unwrap_or_else(|| default_accessor(entity, relation));
            let self_relation = target.name == entity.name;

            match relation.kind {
                RelationKind::ForeignKey | RelationKind::OneToOne => {
                    let column = relation.column_name();
                    let (forward_card, reverse_card) = if relation.kind == RelationKind::OneToOne {
                        (Cardinality::OneToOne, Cardinality::OneToOne)
                    } else {
                        (Cardinality::ManyToOne, Cardinality::OneToMany)
                    };

                    insert_unique(
                        map,
                        entity,
                        RelationDescriptor {
                            field: relation.name.clone(),
                            target: target.name.clone(),
                            direction: Direction::Forward,
                            cardinality: forward_card,
                            remote_field: accessor.clone(),
                            link: RelationLink::LocalColumn {
                                column: column.clone(),
                                nullable: relation.nullable,
                            },
                        },
                    )?;
                    reverse.entry(target.name.clone()).or_default().push((
                        entity.name.clone(),
                        RelationDescriptor {
                            field: accessor,
                            target: entity.name.clone(),
                            direction: Direction::Reverse,
                            cardinality: reverse_card,
                            remote_field: relation.name.clone(),
                            link: RelationLink::RemoteColumn {
                                column,
                                nullable: relation.nullable,
                            },
                        },
                    ));
                }
                RelationKind::ManyToMany => {
                    let symmetrical = relation.symmetrical.unwrap_or(self_relation);
                    if symmetrical && !self_relation {
                        return Err(SchemaError::SymmetricalTarget {
                            entity: entity.name.clone(),
                            relation: relation.name.clone(),
                        });
                    }

                    let table = relation
                        .through
                        .clone()
                        .unwrap_or_else(|| format!("{}_{}", entity.table, relation.name));
                    let (source_column, target_column) = if self_relation {
                        (
                            format!("from_{}_id", entity.model_name()),
                            format!("to_{}_id", entity.model_name()),
                        )
                    } else {
                        (
                            format!("{}_id", entity.model_name()),
                            format!("{}_id", target.model_name()),
                        )
                    };

                    let remote_field = if symmetrical {
                        relation.name.clone()
                    } else {
                        accessor.clone()
                    };
                    insert_unique(
                        map,
                        entity,
                        RelationDescriptor {
                            field: relation.name.clone(),
                            target: target.name.clone(),
                            direction: Direction::Forward,
                            cardinality: Cardinality::ManyToMany,
                            remote_field,
                            link: RelationLink::JoinTable {
                                table: table.clone(),
                                source_column: source_column.clone(),
                                target_column: target_column.clone(),
                                symmetrical,
                            },
                        },
                    )?;

                    if !symmetrical {
                        reverse.entry(target.name.clone()).or_default().push((
                            entity.name.clone(),
                            RelationDescriptor {
                                field: accessor,
                                target: entity.name.clone(),
                                direction: Direction::Reverse,
                                cardinality: Cardinality::ManyToMany,
                                remote_field: relation.name.clone(),
                                link: RelationLink::JoinTable {
                                    table,
                                    source_column: target_column,
                                    target_column: source_column,
                                    symmetrical: false,
                                },
                            },
                        ));
                    }
                }
            }
        }
    }

    for entity in entities.values() {
        let Some(incoming) = reverse.remove(&entity.name) else {
            continue;
        };
        let map = forward.entry(entity.name.clone()).or_default();
        for (_, descriptor) in incoming {
            insert_unique(map, entity, descriptor)?;
        }
    }

    Ok(forward)
}
