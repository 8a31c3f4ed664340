use crate::{
    aggregate::{AggregationProgress, CancellationToken, TrackAggregation},
    constructor::{self, MapConstructor},
    entity::{DEFAULT_KEY, EntityKind},
    entity_map::{EntityMap, MapValue, NumericMap, TextMap},
    error::{EngineError, ErrorCode, MapError, ReferenceKind},
    result_request::{ResultRequest, ResultValue},
    workbench::Workbench,
    workspace::StatisticEvaluator,
};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use tracing::info;

pub type OpId = String;
pub type RunId = String;
pub type MapName = String;

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectState {
    #[serde(default)]
    pub workbench: Workbench,
    #[serde(default)]
    pub numeric_maps: BTreeMap<MapName, NumericMap>,
    #[serde(default)]
    pub text_maps: BTreeMap<MapName, TextMap>,
}

impl ProjectState {
    pub fn load_from_path(path: &str) -> Result<Self, EngineError> {
        let text = std::fs::read_to_string(path).map_err(|e| EngineError {
            code: ErrorCode::Io,
            message: format!("Could not read state file '{path}': {e}"),
        })?;
        let mut state: ProjectState = serde_json::from_str(&text).map_err(|e| EngineError {
            code: ErrorCode::InvalidInput,
            message: format!("Could not parse state JSON '{path}': {e}"),
        })?;
        state.workbench.reconcile();
        Ok(state)
    }

    pub fn save_to_path(&self, path: &str) -> Result<(), EngineError> {
        let text = serde_json::to_string_pretty(self).map_err(|e| EngineError {
            code: ErrorCode::Internal,
            message: format!("Could not serialize state: {e}"),
        })?;
        std::fs::write(path, text).map_err(|e| EngineError {
            code: ErrorCode::Io,
            message: format!("Could not write state file '{path}': {e}"),
        })
    }

    pub fn has_map(&self, name: &str) -> bool {
        self.numeric_maps.contains_key(name) || self.text_maps.contains_key(name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub enum Operation {
    CreateNumericMap {
        name: MapName,
        kind: EntityKind,
        entries: String,
    },
    CreateTextMap {
        name: MapName,
        kind: EntityKind,
        entries: String,
    },
    NumericMapFromProperty {
        name: MapName,
        kind: EntityKind,
        property: String,
        collection: Option<String>,
    },
    TextMapFromProperty {
        name: MapName,
        kind: EntityKind,
        property: String,
        collection: Option<String>,
    },
    NumericMapFromStatistic {
        name: MapName,
        kind: EntityKind,
        expression: String,
        collection: Option<String>,
    },
    NumericMapFromTrack {
        name: MapName,
        aggregation: TrackAggregation,
    },
    /// Re-runs the recorded constructor of an existing map in place.
    RebuildMap {
        map: MapName,
    },
    SetMapValue {
        map: MapName,
        key: String,
        value: String,
    },
    RemoveMapValue {
        map: MapName,
        key: String,
    },
    SetMapDefault {
        map: MapName,
        value: String,
    },
    ClearMap {
        map: MapName,
    },
    DeleteMap {
        map: MapName,
    },
    ResolveResult {
        map: MapName,
        request: String,
        output_name: Option<String>,
    },
    SetParameter {
        name: String,
        value: serde_json::Value,
    },
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub run_id: RunId,
    pub ops: Vec<Operation>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpResult {
    pub op_id: OpId,
    pub created: Vec<String>,
    pub changed: Vec<String>,
    pub warnings: Vec<String>,
    pub messages: Vec<String>,
    pub value: Option<serde_json::Value>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OperationRecord {
    pub run_id: RunId,
    pub op: Operation,
    pub result: OpResult,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Capabilities {
    pub protocol_version: String,
    pub supported_operations: Vec<String>,
    pub supported_result_requests: Vec<String>,
    pub deterministic_operation_log: bool,
}

pub trait Engine {
    fn apply(&mut self, op: Operation) -> Result<OpResult, EngineError>;
    fn apply_workflow(&mut self, wf: Workflow) -> Result<Vec<OpResult>, EngineError>;
    fn snapshot(&self) -> &ProjectState;
}

/// Which of the two map stores a name lives in.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum MapStore {
    Numeric,
    Text,
}

#[derive(Default)]
pub struct MapEngine {
    state: ProjectState,
    journal: Vec<OperationRecord>,
    op_counter: u64,
    statistics: Option<Box<dyn StatisticEvaluator<f64>>>,
}

impl MapEngine {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_state(mut state: ProjectState) -> Self {
        state.workbench.reconcile();
        Self {
            state,
            ..Self::default()
        }
    }

    pub fn with_statistic_evaluator<E>(mut self, evaluator: E) -> Self
    where
        E: StatisticEvaluator<f64> + 'static,
    {
        self.statistics = Some(Box::new(evaluator));
        self
    }

    pub fn state(&self) -> &ProjectState {
        &self.state
    }

    pub fn state_mut(&mut self) -> &mut ProjectState {
        &mut self.state
    }

    pub fn capabilities() -> Capabilities {
        Capabilities {
            protocol_version: "v1".to_string(),
            supported_operations: [
                "CreateNumericMap",
                "CreateTextMap",
                "NumericMapFromProperty",
                "TextMapFromProperty",
                "NumericMapFromStatistic",
                "NumericMapFromTrack",
                "RebuildMap",
                "SetMapValue",
                "RemoveMapValue",
                "SetMapDefault",
                "ClearMap",
                "DeleteMap",
                "ResolveResult",
                "SetParameter",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            supported_result_requests: [
                "<DEFAULT>",
                "top:N[%][ in COLLECTION]",
                "bottom:N[%][ in COLLECTION]",
                "top value[ in COLLECTION]",
                "bottom value[ in COLLECTION]",
                "rank ascending",
                "rank descending",
                "assigned entries",
                "unassigned entries",
                "positive entries",
                "negative entries",
                "zero-valued entries",
                "value:X",
                "ENTITY",
            ]
            .iter()
            .map(|s| s.to_string())
            .collect(),
            deterministic_operation_log: true,
        }
    }

    pub fn operation_log(&self) -> &[OperationRecord] {
        &self.journal
    }

    /// Applies `op`, polling `cancel` during track aggregation and reporting
    /// per-sequence progress. A cancelled operation leaves the state as it
    /// was.
    pub fn apply_cancellable(
        &mut self,
        op: Operation,
        cancel: &CancellationToken,
        on_progress: &mut dyn FnMut(AggregationProgress),
    ) -> Result<OpResult, EngineError> {
        let run_id = "interactive".to_string();
        let result = self.apply_internal(op.clone(), cancel, on_progress)?;
        self.journal.push(OperationRecord {
            run_id,
            op,
            result: result.clone(),
        });
        Ok(result)
    }

    fn next_op_id(&mut self) -> OpId {
        self.op_counter += 1;
        format!("op-{}", self.op_counter)
    }

    fn unique_map_name(&self, base: &str) -> MapName {
        if !self.state.has_map(base) {
            return base.to_string();
        }
        let mut i = 2usize;
        loop {
            let candidate = format!("{base}_{i}");
            if !self.state.has_map(&candidate) {
                return candidate;
            }
            i += 1;
        }
    }

    fn map_store(&self, name: &str) -> Result<MapStore, EngineError> {
        if self.state.numeric_maps.contains_key(name) {
            Ok(MapStore::Numeric)
        } else if self.state.text_maps.contains_key(name) {
            Ok(MapStore::Text)
        } else {
            Err(Self::missing_map(name))
        }
    }

    fn missing_map(name: &str) -> EngineError {
        EngineError {
            code: ErrorCode::NotFound,
            message: format!("Map '{name}' not found"),
        }
    }

    fn statistic_evaluator(&self, expression: &str) -> Result<&dyn StatisticEvaluator<f64>, MapError> {
        self.statistics
            .as_deref()
            .ok_or_else(|| MapError::reference(ReferenceKind::Statistic, expression))
    }

    fn insert_numeric(&mut self, map: NumericMap, result: &mut OpResult) {
        let name = map.name().to_string();
        result.messages.push(format!(
            "Created numeric map '{name}' with {} explicit entries",
            map.len()
        ));
        info!(map = %name, entries = map.len(), "numeric map created");
        self.state.numeric_maps.insert(name.clone(), map);
        result.created.push(name);
    }

    fn insert_text(&mut self, map: TextMap, result: &mut OpResult) {
        let name = map.name().to_string();
        result.messages.push(format!(
            "Created text map '{name}' with {} explicit entries",
            map.len()
        ));
        info!(map = %name, entries = map.len(), "text map created");
        self.state.text_maps.insert(name.clone(), map);
        result.created.push(name);
    }

    fn list_map<V: MapValue>(
        &self,
        name: &str,
        kind: EntityKind,
        entries: &str,
        result: &mut OpResult,
    ) -> Result<EntityMap<V>, EngineError> {
        let parsed = constructor::map_from_list::<V>(
            name,
            kind,
            entries,
            &self.state.workbench,
            self.state.workbench.parameters.collect_unresolved_list_entries,
        )?;
        for missing in parsed.unresolved {
            result
                .warnings
                .push(format!("Skipped unknown {} '{missing}'", kind.singular()));
        }
        Ok(parsed.map)
    }

    fn track_map(
        &self,
        name: &str,
        aggregation: &TrackAggregation,
        cancel: &CancellationToken,
        on_progress: &mut dyn FnMut(AggregationProgress),
    ) -> Result<NumericMap, EngineError> {
        let parameters = &self.state.workbench.parameters;
        constructor::map_from_track(
            name,
            aggregation,
            &self.state.workbench,
            parameters.cancellation_check_interval,
            &parameters.default_sequence_collection,
            cancel,
            on_progress,
        )
        .map_err(EngineError::from)
    }

    fn rebuild_numeric(
        &self,
        map: &NumericMap,
        cancel: &CancellationToken,
        on_progress: &mut dyn FnMut(AggregationProgress),
        result: &mut OpResult,
    ) -> Result<NumericMap, EngineError> {
        let name = map.name();
        let kind = map.kind();
        let recipe = Self::recorded_constructor(name, map.constructor_string())?;
        let wb = &self.state.workbench;
        match recipe {
            MapConstructor::List { entries } => self.list_map(name, kind, &entries, result),
            MapConstructor::Property {
                property,
                collection,
            } => Ok(constructor::map_from_property(
                name,
                kind,
                &property,
                collection.as_deref(),
                wb,
                &wb.parameters.default_sequence_collection,
            )?),
            MapConstructor::Statistic {
                expression,
                collection,
            } => Ok(constructor::map_from_statistic(
                name,
                kind,
                &expression,
                collection.as_deref(),
                wb,
                self.statistic_evaluator(&expression)?,
                &wb.parameters.default_sequence_collection,
            )?),
            MapConstructor::Track(aggregation) => {
                self.track_map(name, &aggregation, cancel, on_progress)
            }
        }
    }

    fn rebuild_text(&self, map: &TextMap, result: &mut OpResult) -> Result<TextMap, EngineError> {
        let name = map.name();
        let kind = map.kind();
        match Self::recorded_constructor(name, map.constructor_string())? {
            MapConstructor::List { entries } => self.list_map(name, kind, &entries, result),
            MapConstructor::Property {
                property,
                collection,
            } => Ok(constructor::map_from_property(
                name,
                kind,
                &property,
                collection.as_deref(),
                &self.state.workbench,
                &self.state.workbench.parameters.default_sequence_collection,
            )?),
            other => Err(EngineError {
                code: ErrorCode::Unsupported,
                message: format!(
                    "Text map '{name}' cannot be rebuilt from a '{}' constructor",
                    other.prefix()
                ),
            }),
        }
    }

    fn recorded_constructor(
        name: &str,
        constructor: Option<String>,
    ) -> Result<MapConstructor, EngineError> {
        let constructor = constructor.ok_or_else(|| EngineError {
            code: ErrorCode::InvalidInput,
            message: format!("Map '{name}' has no recorded constructor"),
        })?;
        Ok(MapConstructor::parse(&constructor)?)
    }

    fn resolve_into<V: MapValue>(
        &mut self,
        map: &EntityMap<V>,
        request: &str,
        output_name: Option<String>,
        result: &mut OpResult,
    ) -> Result<(), EngineError> {
        let resolved =
            ResultRequest::parse(request)?.resolve(request, map, &self.state.workbench)?;
        result.value = Some(serde_json::to_value(&resolved).map_err(|e| EngineError {
            code: ErrorCode::Internal,
            message: format!("Could not serialize result '{request}': {e}"),
        })?);
        result
            .messages
            .push(format!("Resolved '{request}' on map '{}'", map.name()));
        let Some(output_name) = output_name else {
            return Ok(());
        };
        match resolved {
            ResultValue::Scalar(_) => {
                return Err(EngineError {
                    code: ErrorCode::InvalidInput,
                    message: format!("Result '{request}' is a single value and cannot be stored"),
                });
            }
            ResultValue::Collection(mut collection) => {
                collection.name = output_name.clone();
                let replaced = self
                    .state
                    .workbench
                    .collections
                    .iter()
                    .any(|c| c.name == output_name);
                result.messages.push(format!(
                    "Stored {} {} as collection '{output_name}'",
                    collection.len(),
                    collection.kind.plural()
                ));
                self.state.workbench.add_collection(collection);
                if replaced {
                    result.changed.push(output_name);
                } else {
                    result.created.push(output_name);
                }
            }
            ResultValue::Map(mut ranks) => {
                let name = self.unique_map_name(&output_name);
                ranks.set_name(&name);
                self.insert_numeric(ranks, result);
            }
        }
        Ok(())
    }

    fn apply_internal(
        &mut self,
        op: Operation,
        cancel: &CancellationToken,
        on_progress: &mut dyn FnMut(AggregationProgress),
    ) -> Result<OpResult, EngineError> {
        let op_id = self.next_op_id();
        let mut result = OpResult {
            op_id,
            created: vec![],
            changed: vec![],
            warnings: vec![],
            messages: vec![],
            value: None,
        };

        match op {
            Operation::CreateNumericMap {
                name,
                kind,
                entries,
            } => {
                let name = self.unique_map_name(&name);
                let map = self.list_map::<f64>(&name, kind, &entries, &mut result)?;
                self.insert_numeric(map, &mut result);
            }
            Operation::CreateTextMap {
                name,
                kind,
                entries,
            } => {
                let name = self.unique_map_name(&name);
                let map = self.list_map::<String>(&name, kind, &entries, &mut result)?;
                self.insert_text(map, &mut result);
            }
            Operation::NumericMapFromProperty {
                name,
                kind,
                property,
                collection,
            } => {
                let name = self.unique_map_name(&name);
                let map = constructor::map_from_property::<f64>(
                    &name,
                    kind,
                    &property,
                    collection.as_deref(),
                    &self.state.workbench,
                    &self.state.workbench.parameters.default_sequence_collection,
                )?;
                self.insert_numeric(map, &mut result);
            }
            Operation::TextMapFromProperty {
                name,
                kind,
                property,
                collection,
            } => {
                let name = self.unique_map_name(&name);
                let map = constructor::map_from_property::<String>(
                    &name,
                    kind,
                    &property,
                    collection.as_deref(),
                    &self.state.workbench,
                    &self.state.workbench.parameters.default_sequence_collection,
                )?;
                self.insert_text(map, &mut result);
            }
            Operation::NumericMapFromStatistic {
                name,
                kind,
                expression,
                collection,
            } => {
                let name = self.unique_map_name(&name);
                let map = constructor::map_from_statistic(
                    &name,
                    kind,
                    &expression,
                    collection.as_deref(),
                    &self.state.workbench,
                    self.statistic_evaluator(&expression)?,
                    &self.state.workbench.parameters.default_sequence_collection,
                )?;
                self.insert_numeric(map, &mut result);
            }
            Operation::NumericMapFromTrack { name, aggregation } => {
                let name = self.unique_map_name(&name);
                let map = self.track_map(&name, &aggregation, cancel, on_progress)?;
                self.insert_numeric(map, &mut result);
            }
            Operation::RebuildMap { map } => {
                if let Some(old) = self.state.numeric_maps.get(&map) {
                    let rebuilt = self.rebuild_numeric(old, cancel, on_progress, &mut result)?;
                    if let Some(old) = self.state.numeric_maps.get_mut(&map) {
                        old.import_data(rebuilt);
                    }
                } else if let Some(old) = self.state.text_maps.get(&map) {
                    let rebuilt = self.rebuild_text(old, &mut result)?;
                    if let Some(old) = self.state.text_maps.get_mut(&map) {
                        old.import_data(rebuilt);
                    }
                } else {
                    return Err(Self::missing_map(&map));
                }
                info!(map = %map, "map rebuilt from constructor");
                result.messages.push(format!("Rebuilt map '{map}'"));
                result.changed.push(map);
            }
            Operation::SetMapValue { map, key, value } => {
                match self.map_store(&map)? {
                    MapStore::Numeric => set_value(&mut self.state.numeric_maps, &map, &key, &value)?,
                    MapStore::Text => set_value(&mut self.state.text_maps, &map, &key, &value)?,
                }
                result
                    .messages
                    .push(format!("Set '{key}' to '{value}' in map '{map}'"));
                result.changed.push(map);
            }
            Operation::RemoveMapValue { map, key } => {
                let removed = match self.map_store(&map)? {
                    MapStore::Numeric => remove_value(&mut self.state.numeric_maps, &map, &key),
                    MapStore::Text => remove_value(&mut self.state.text_maps, &map, &key),
                };
                if removed {
                    result
                        .messages
                        .push(format!("Removed '{key}' from map '{map}'"));
                    result.changed.push(map);
                } else {
                    result
                        .warnings
                        .push(format!("Map '{map}' has no explicit entry '{key}'"));
                }
            }
            Operation::SetMapDefault { map, value } => {
                match self.map_store(&map)? {
                    MapStore::Numeric => set_default(&mut self.state.numeric_maps, &map, &value)?,
                    MapStore::Text => set_default(&mut self.state.text_maps, &map, &value)?,
                }
                result
                    .messages
                    .push(format!("Set default of map '{map}' to '{value}'"));
                result.changed.push(map);
            }
            Operation::ClearMap { map } => {
                match self.map_store(&map)? {
                    MapStore::Numeric => {
                        if let Some(m) = self.state.numeric_maps.get_mut(&map) {
                            m.clear();
                        }
                    }
                    MapStore::Text => {
                        if let Some(m) = self.state.text_maps.get_mut(&map) {
                            m.clear();
                        }
                    }
                }
                result.messages.push(format!("Cleared map '{map}'"));
                result.changed.push(map);
            }
            Operation::DeleteMap { map } => {
                match self.map_store(&map)? {
                    MapStore::Numeric => {
                        self.state.numeric_maps.remove(&map);
                    }
                    MapStore::Text => {
                        self.state.text_maps.remove(&map);
                    }
                }
                info!(map = %map, "map deleted");
                result.messages.push(format!("Deleted map '{map}'"));
                result.changed.push(map);
            }
            Operation::ResolveResult {
                map,
                request,
                output_name,
            } => {
                if let Some(source) = self.state.numeric_maps.get(&map).cloned() {
                    self.resolve_into(&source, &request, output_name, &mut result)?;
                } else if let Some(source) = self.state.text_maps.get(&map).cloned() {
                    self.resolve_into(&source, &request, output_name, &mut result)?;
                } else {
                    return Err(Self::missing_map(&map));
                }
            }
            Operation::SetParameter { name, value } => {
                self.state.workbench.set_parameter(&name, &value)?;
                result
                    .messages
                    .push(format!("Set parameter '{name}' to {value}"));
            }
        }

        info!(op_id = %result.op_id, messages = result.messages.len(), "operation applied");
        Ok(result)
    }
}

/// A hand-edited map no longer reflects its constructor.
fn edited<V: MapValue>(map: &mut EntityMap<V>) -> &mut EntityMap<V> {
    map.clear_constructor();
    map
}

fn set_value<V: MapValue>(
    maps: &mut BTreeMap<MapName, EntityMap<V>>,
    name: &str,
    key: &str,
    value: &str,
) -> Result<(), EngineError> {
    let Some(map) = maps.get_mut(name) else {
        return Ok(());
    };
    if key != DEFAULT_KEY && !map.domain().validate_key(key) {
        return Err(EngineError {
            code: ErrorCode::InvalidInput,
            message: format!("'{key}' is not a valid {} name", map.kind().singular()),
        });
    }
    let value = V::parse_value(value)?;
    edited(map).set(key, value);
    Ok(())
}

fn remove_value<V: MapValue>(
    maps: &mut BTreeMap<MapName, EntityMap<V>>,
    name: &str,
    key: &str,
) -> bool {
    match maps.get_mut(name) {
        Some(map) if map.is_explicitly_set(key) => edited(map).remove(key).is_some(),
        _ => false,
    }
}

fn set_default<V: MapValue>(
    maps: &mut BTreeMap<MapName, EntityMap<V>>,
    name: &str,
    value: &str,
) -> Result<(), EngineError> {
    if let Some(map) = maps.get_mut(name) {
        let value = V::parse_value(value)?;
        edited(map).set_default(value);
    }
    Ok(())
}

impl Engine for MapEngine {
    fn apply(&mut self, op: Operation) -> Result<OpResult, EngineError> {
        self.apply_cancellable(op, &CancellationToken::new(), &mut |_| {})
    }

    fn apply_workflow(&mut self, wf: Workflow) -> Result<Vec<OpResult>, EngineError> {
        let cancel = CancellationToken::new();
        let mut results = Vec::new();
        for op in &wf.ops {
            let result = self.apply_internal(op.clone(), &cancel, &mut |_| {})?;
            self.journal.push(OperationRecord {
                run_id: wf.run_id.clone(),
                op: op.clone(),
                result: result.clone(),
            });
            results.push(result);
        }
        Ok(results)
    }

    fn snapshot(&self) -> &ProjectState {
        &self.state
    }
}
