//! In-memory workbench data: sequences, motifs, modules, collections,
//! partitions and region tracks. Implements the collaborator interfaces the
//! map layer consumes.

use crate::{
    entity::{EntityCollection, EntityKind, Partition},
    error::{EngineError, ErrorCode},
    workspace::{EntityCatalog, PropertyValue, Region, TrackSource},
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;

pub const DEFAULT_SEQUENCE_COLLECTION: &str = "AllSequences";

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineParameters {
    pub cancellation_check_interval: usize,
    pub collect_unresolved_list_entries: bool,
    pub default_sequence_collection: String,
}

impl Default for EngineParameters {
    fn default() -> Self {
        Self {
            cancellation_check_interval: 100,
            collect_unresolved_list_entries: false,
            default_sequence_collection: DEFAULT_SEQUENCE_COLLECTION.to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SequenceRecord {
    pub name: String,
    pub length: usize,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EntityRecord {
    pub name: String,
    #[serde(default)]
    pub properties: BTreeMap<String, PropertyValue>,
}

/// Labeled regions per sequence, each list kept ordered by start.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct RegionTrack {
    pub name: String,
    #[serde(default)]
    pub regions: BTreeMap<String, Vec<Region>>,
}

impl RegionTrack {
    pub fn new(name: &str) -> Self {
        Self {
            name: name.to_string(),
            regions: BTreeMap::new(),
        }
    }

    pub fn add_region(&mut self, sequence: &str, region: Region) {
        let list = self.regions.entry(sequence.to_string()).or_default();
        let pos = list.partition_point(|r| r.start <= region.start);
        list.insert(pos, region);
    }

    pub fn region_count(&self) -> usize {
        self.regions.values().map(|v| v.len()).sum()
    }

    fn sort_regions(&mut self) {
        for list in self.regions.values_mut() {
            list.sort_by_key(|r| r.start);
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct Workbench {
    pub sequences: Vec<SequenceRecord>,
    pub motifs: Vec<EntityRecord>,
    pub modules: Vec<EntityRecord>,
    pub collections: Vec<EntityCollection>,
    pub partitions: Vec<Partition>,
    pub tracks: Vec<RegionTrack>,
    pub parameters: EngineParameters,
}

impl Workbench {
    pub fn new() -> Self {
        let mut ret = Self::default();
        ret.reconcile();
        ret
    }

    pub fn load_from_path(path: &str) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path).map_err(|e| EngineError {
            code: ErrorCode::Io,
            message: format!("Could not read workbench file '{path}': {e}"),
        })?;
        Self::from_json(&text).map_err(|e| EngineError {
            code: ErrorCode::InvalidInput,
            message: format!("Could not parse workbench JSON '{path}': {e}"),
        })
    }

    pub fn from_json(text: &str) -> Result<Self, serde_json::Error> {
        let mut ret: Self = serde_json::from_str(text)?;
        ret.reconcile();
        Ok(ret)
    }

    /// Restores the derived invariants after deserialization: region lists
    /// ordered by start and the default sequence collection present and
    /// listing every sequence.
    pub fn reconcile(&mut self) {
        for track in &mut self.tracks {
            track.sort_regions();
        }
        self.reconcile_default_collection();
    }

    fn reconcile_default_collection(&mut self) {
        let all: Vec<String> = self.sequences.iter().map(|s| s.name.clone()).collect();
        let name = self.parameters.default_sequence_collection.clone();
        match self.collections.iter_mut().find(|c| c.name == name) {
            Some(existing) => *existing = EntityCollection::new(&name, EntityKind::Sequence, all),
            None => self
                .collections
                .insert(0, EntityCollection::new(&name, EntityKind::Sequence, all)),
        }
    }

    /// Renames the default sequence collection.
    pub fn set_default_sequence_collection(&mut self, name: &str) {
        let old = self.parameters.default_sequence_collection.clone();
        self.collections.retain(|c| c.name != old);
        self.parameters.default_sequence_collection = name.to_string();
        self.reconcile();
    }

    pub fn add_sequence(&mut self, name: &str, length: usize) -> &mut SequenceRecord {
        let idx = match self.sequences.iter().position(|s| s.name == name) {
            Some(idx) => {
                self.sequences[idx].length = length;
                idx
            }
            None => {
                self.sequences.push(SequenceRecord {
                    name: name.to_string(),
                    length,
                    properties: BTreeMap::new(),
                });
                self.reconcile_default_collection();
                self.sequences.len() - 1
            }
        };
        &mut self.sequences[idx]
    }

    pub fn add_entity(&mut self, kind: EntityKind, name: &str) -> &mut BTreeMap<String, PropertyValue> {
        if kind == EntityKind::Sequence {
            if let Some(idx) = self.sequences.iter().position(|s| s.name == name) {
                return &mut self.sequences[idx].properties;
            }
            return &mut self.add_sequence(name, 0).properties;
        }
        let records = match kind {
            EntityKind::Motif => &mut self.motifs,
            _ => &mut self.modules,
        };
        let idx = match records.iter().position(|r| r.name == name) {
            Some(idx) => idx,
            None => {
                records.push(EntityRecord {
                    name: name.to_string(),
                    properties: BTreeMap::new(),
                });
                records.len() - 1
            }
        };
        &mut records[idx].properties
    }

    /// Adds or replaces a collection by name.
    pub fn add_collection(&mut self, collection: EntityCollection) {
        match self
            .collections
            .iter_mut()
            .find(|c| c.name == collection.name)
        {
            Some(existing) => *existing = collection,
            None => self.collections.push(collection),
        }
    }

    pub fn add_partition(&mut self, partition: Partition) {
        self.partitions.retain(|p| p.name != partition.name);
        self.partitions.push(partition);
    }

    pub fn add_track(&mut self, mut track: RegionTrack) {
        track.sort_regions();
        self.tracks.retain(|t| t.name != track.name);
        self.tracks.push(track);
    }

    pub fn track(&self, name: &str) -> Option<&RegionTrack> {
        self.tracks.iter().find(|t| t.name == name)
    }

    fn properties(&self, kind: EntityKind, entity: &str) -> Option<&BTreeMap<String, PropertyValue>> {
        match kind {
            EntityKind::Sequence => self
                .sequences
                .iter()
                .find(|s| s.name == entity)
                .map(|s| &s.properties),
            EntityKind::Motif => self
                .motifs
                .iter()
                .find(|r| r.name == entity)
                .map(|r| &r.properties),
            EntityKind::Module => self
                .modules
                .iter()
                .find(|r| r.name == entity)
                .map(|r| &r.properties),
        }
    }

    /// Applies one named parameter from a JSON value.
    pub fn set_parameter(&mut self, name: &str, value: &serde_json::Value) -> Result<(), EngineError> {
        let invalid = |expected: &str| EngineError {
            code: ErrorCode::InvalidInput,
            message: format!("Parameter '{name}' expects {expected}, got {value}"),
        };
        match name {
            "cancellation_check_interval" => {
                let n = value
                    .as_u64()
                    .filter(|n| *n > 0)
                    .ok_or_else(|| invalid("a positive integer"))?;
                self.parameters.cancellation_check_interval = n as usize;
            }
            "collect_unresolved_list_entries" => {
                self.parameters.collect_unresolved_list_entries =
                    value.as_bool().ok_or_else(|| invalid("a boolean"))?;
            }
            "default_sequence_collection" => {
                let new_name = value
                    .as_str()
                    .map(str::trim)
                    .filter(|s| !s.is_empty())
                    .ok_or_else(|| invalid("a non-empty string"))?;
                self.set_default_sequence_collection(new_name);
            }
            _ => {
                return Err(EngineError {
                    code: ErrorCode::InvalidInput,
                    message: format!("Unknown parameter '{name}'"),
                });
            }
        }
        Ok(())
    }
}

impl EntityCatalog for Workbench {
    fn entity_names(&self, kind: EntityKind) -> Vec<String> {
        match kind {
            EntityKind::Sequence => self.sequences.iter().map(|s| s.name.clone()).collect(),
            EntityKind::Motif => self.motifs.iter().map(|r| r.name.clone()).collect(),
            EntityKind::Module => self.modules.iter().map(|r| r.name.clone()).collect(),
        }
    }

    fn has_entity(&self, kind: EntityKind, name: &str) -> bool {
        self.properties(kind, name).is_some()
    }

    fn collection(&self, name: &str) -> Option<&EntityCollection> {
        self.collections.iter().find(|c| c.name == name)
    }

    fn partition(&self, name: &str) -> Option<&Partition> {
        self.partitions.iter().find(|p| p.name == name)
    }

    fn has_property(&self, kind: EntityKind, property: &str) -> bool {
        match kind {
            EntityKind::Sequence => {
                property == "length"
                    || self
                        .sequences
                        .iter()
                        .any(|s| s.properties.contains_key(property))
            }
            EntityKind::Motif => self.motifs.iter().any(|r| r.properties.contains_key(property)),
            EntityKind::Module => self
                .modules
                .iter()
                .any(|r| r.properties.contains_key(property)),
        }
    }

    fn property(&self, kind: EntityKind, entity: &str, property: &str) -> Option<PropertyValue> {
        if kind == EntityKind::Sequence && property == "length" {
            return self
                .sequence_length(entity)
                .map(|len| PropertyValue::Numeric(len as f64));
        }
        self.properties(kind, entity)?.get(property).cloned()
    }
}

impl TrackSource for Workbench {
    fn has_track(&self, track: &str) -> bool {
        self.track(track).is_some()
    }

    fn sequence_length(&self, sequence: &str) -> Option<usize> {
        self.sequences
            .iter()
            .find(|s| s.name == sequence)
            .map(|s| s.length)
    }

    fn regions(&self, track: &str, sequence: &str) -> Vec<Region> {
        self.track(track)
            .and_then(|t| t.regions.get(sequence))
            .cloned()
            .unwrap_or_default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_collection_tracks_sequences() {
        let mut wb = Workbench::new();
        wb.add_sequence("s1", 100);
        wb.add_sequence("s2", 50);
        wb.add_sequence("s1", 120);
        let all = wb.collection(DEFAULT_SEQUENCE_COLLECTION).unwrap();
        assert_eq!(all.members, vec!["s1".to_string(), "s2".to_string()]);
        assert_eq!(wb.sequence_length("s1"), Some(120));
        assert_eq!(wb.universe(EntityKind::Sequence, None).unwrap().len(), 2);
    }

    #[test]
    fn test_regions_stay_ordered() {
        let mut track = RegionTrack::new("TFBS");
        track.add_region("s1", Region::new(30, 35, "B"));
        track.add_region("s1", Region::new(5, 9, "A"));
        track.add_region("s1", Region::new(12, 20, "A"));
        let mut wb = Workbench::new();
        wb.add_sequence("s1", 100);
        wb.add_track(track);
        let starts: Vec<i64> = wb.regions("TFBS", "s1").iter().map(|r| r.start).collect();
        assert_eq!(starts, vec![5, 12, 30]);
        assert!(wb.regions("TFBS", "s2").is_empty());
        assert!(wb.regions("other", "s1").is_empty());
        assert_eq!(wb.track("TFBS").unwrap().region_count(), 3);
    }

    #[test]
    fn test_properties() {
        let mut wb = Workbench::new();
        wb.add_sequence("s1", 42);
        wb.add_entity(EntityKind::Motif, "M1")
            .insert("IC".to_string(), PropertyValue::Numeric(9.5));
        assert!(wb.has_property(EntityKind::Motif, "IC"));
        assert!(!wb.has_property(EntityKind::Module, "IC"));
        assert!(wb.has_property(EntityKind::Sequence, "length"));
        assert_eq!(
            wb.property(EntityKind::Sequence, "s1", "length"),
            Some(PropertyValue::Numeric(42.0))
        );
        assert_eq!(
            wb.property(EntityKind::Motif, "M1", "IC"),
            Some(PropertyValue::Numeric(9.5))
        );
        assert_eq!(wb.property(EntityKind::Motif, "M2", "IC"), None);
    }

    #[test]
    fn test_json_reconciles() {
        let text = r#"{
            "sequences": [{"name": "s2", "length": 10}, {"name": "s1", "length": 20}],
            "tracks": [{"name": "T", "regions": {"s1": [
                {"start": 9, "end": 12, "type": "A"},
                {"start": 1, "end": 3, "type": "B"}
            ]}}]
        }"#;
        let wb = Workbench::from_json(text).unwrap();
        assert_eq!(wb.regions("T", "s1")[0].region_type, "B");
        assert_eq!(
            wb.collection(DEFAULT_SEQUENCE_COLLECTION).unwrap().members,
            vec!["s2".to_string(), "s1".to_string()]
        );
        assert_eq!(wb.parameters.cancellation_check_interval, 100);
    }

    #[test]
    fn test_set_parameter() {
        let mut wb = Workbench::new();
        wb.add_sequence("s1", 10);
        wb.set_parameter("cancellation_check_interval", &serde_json::json!(5))
            .unwrap();
        assert_eq!(wb.parameters.cancellation_check_interval, 5);
        assert!(wb
            .set_parameter("cancellation_check_interval", &serde_json::json!(0))
            .is_err());
        wb.set_parameter("default_sequence_collection", &serde_json::json!("Everything"))
            .unwrap();
        assert!(wb.collection(DEFAULT_SEQUENCE_COLLECTION).is_none());
        assert_eq!(wb.collection("Everything").unwrap().len(), 1);
        let err = wb
            .set_parameter("no_such_thing", &serde_json::json!(1))
            .unwrap_err();
        assert!(err.message.contains("no_such_thing"));
    }
}
