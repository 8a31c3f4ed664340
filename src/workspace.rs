//! Interfaces the map layer needs from the rest of the workbench: the
//! universe of named entities, collections and partitions, entity
//! properties, region tracks, and an opaque statistic evaluator.

use crate::{
    entity::{EntityCollection, EntityKind, Partition},
    entity_map::{EntityMap, MapValue},
    error::{MapError, ReferenceKind, Result},
    intervals::Interval,
};
use serde::{Deserialize, Serialize};

/// Value of a named entity property.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum PropertyValue {
    Numeric(f64),
    Text(String),
}

/// One labeled region occurrence of a track on a sequence. `start` and
/// `end` are sequence-relative and inclusive.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Region {
    pub start: i64,
    pub end: i64,
    #[serde(rename = "type")]
    pub region_type: String,
}

impl Region {
    pub fn new(start: i64, end: i64, region_type: &str) -> Self {
        Self {
            start,
            end,
            region_type: region_type.to_string(),
        }
    }

    #[inline(always)]
    pub fn interval(&self) -> Interval {
        Interval::new(self.start, self.end)
    }
}

pub trait EntityCatalog {
    /// All known names of `kind`, in catalog order.
    fn entity_names(&self, kind: EntityKind) -> Vec<String>;

    fn has_entity(&self, kind: EntityKind, name: &str) -> bool {
        self.entity_names(kind).iter().any(|n| n == name)
    }

    fn collection(&self, name: &str) -> Option<&EntityCollection>;

    /// Candidate names of `kind`: members of the named collection, or every
    /// known name when no collection is given.
    fn universe(&self, kind: EntityKind, collection: Option<&str>) -> Result<Vec<String>> {
        match collection {
            None => Ok(self.entity_names(kind)),
            Some(name) => self
                .collection(name)
                .filter(|c| c.kind == kind)
                .map(|c| c.members.clone())
                .ok_or_else(|| MapError::reference(ReferenceKind::Collection, name)),
        }
    }

    fn partition(&self, name: &str) -> Option<&Partition>;

    fn has_property(&self, kind: EntityKind, property: &str) -> bool;

    fn property(&self, kind: EntityKind, entity: &str, property: &str) -> Option<PropertyValue>;
}

/// Read-only access to region tracks.
pub trait TrackSource {
    fn has_track(&self, track: &str) -> bool;

    fn sequence_length(&self, sequence: &str) -> Option<usize>;

    /// Regions of `track` on `sequence`, ordered by start.
    fn regions(&self, track: &str, sequence: &str) -> Vec<Region>;
}

/// Evaluates a statistic expression over a universe of entities and returns
/// a map of the same shape as the one being constructed.
pub trait StatisticEvaluator<V: MapValue> {
    fn evaluate(&self, expression: &str, kind: EntityKind, universe: &[String])
    -> Result<EntityMap<V>>;
}

impl<V, F> StatisticEvaluator<V> for F
where
    V: MapValue,
    F: Fn(&str, EntityKind, &[String]) -> Result<EntityMap<V>>,
{
    fn evaluate(
        &self,
        expression: &str,
        kind: EntityKind,
        universe: &[String],
    ) -> Result<EntityMap<V>> {
        self(expression, kind, universe)
    }
}
