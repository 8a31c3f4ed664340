//! Building entity maps from literal lists, entity properties, statistics
//! and region tracks. Every path records its constructor on the result so
//! the map can be redisplayed or rebuilt later.

use crate::{
    aggregate::{AggregationProgress, CancellationToken, TrackAggregation, TrackAggregator},
    entity::{DEFAULT_KEY, EntityKind, KeyDomain},
    entity_map::{EntityMap, MapValue, NumericMap},
    error::{MapError, ReferenceKind, Result},
    workspace::{EntityCatalog, StatisticEvaluator, TrackSource},
};
use lazy_static::lazy_static;
use regex::Regex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

pub const FROM_LIST: &str = "List:";
pub const FROM_PROPERTY: &str = "Property:";
pub const FROM_STATISTIC: &str = "Statistic:";
pub const FROM_TRACK: &str = "Track:";

const COLLECTION_SUFFIX: &str = ", collection=";
const MAX_RANGE_SPAN: u64 = 1_000_000;

lazy_static! {
    static ref RANGE_ENDPOINT: Regex = Regex::new(r"^(.*?)(\d+)(\D*)$").expect("valid regex");
}

/// A recipe for a derived map, as recorded in its constructor string.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum MapConstructor {
    List {
        entries: String,
    },
    Property {
        property: String,
        #[serde(default)]
        collection: Option<String>,
    },
    Statistic {
        expression: String,
        #[serde(default)]
        collection: Option<String>,
    },
    Track(TrackAggregation),
}

fn split_collection(params: &str) -> (&str, Option<String>) {
    match params.rsplit_once(COLLECTION_SUFFIX) {
        Some((head, collection)) => (head.trim(), Some(collection.trim().to_string())),
        None => (params.trim(), None),
    }
}

/// The default sequence collection is left out, like an absent one.
fn with_collection(head: &str, collection: &Option<String>, default_collection: &str) -> String {
    match collection.as_deref().filter(|c| *c != default_collection) {
        Some(c) => format!("{head}{COLLECTION_SUFFIX}{c}"),
        None => head.to_string(),
    }
}

impl MapConstructor {
    /// Parses a full constructor string such as `List:A=1,B=2`.
    pub fn parse(constructor: &str) -> Result<Self> {
        if let Some(entries) = constructor.strip_prefix(FROM_LIST) {
            return Ok(MapConstructor::List {
                entries: entries.to_string(),
            });
        }
        if let Some(params) = constructor.strip_prefix(FROM_PROPERTY) {
            let (property, collection) = split_collection(params);
            if property.is_empty() {
                return Err(MapError::parse(constructor, "missing property name"));
            }
            return Ok(MapConstructor::Property {
                property: property.to_string(),
                collection,
            });
        }
        if let Some(params) = constructor.strip_prefix(FROM_STATISTIC) {
            let (expression, collection) = split_collection(params);
            if expression.is_empty() {
                return Err(MapError::parse(constructor, "missing statistic expression"));
            }
            return Ok(MapConstructor::Statistic {
                expression: expression.to_string(),
                collection,
            });
        }
        if let Some(params) = constructor.strip_prefix(FROM_TRACK) {
            return Ok(MapConstructor::Track(TrackAggregation::parse_params(params)?));
        }
        Err(MapError::parse(constructor, "unknown constructor"))
    }

    pub fn prefix(&self) -> &'static str {
        match self {
            MapConstructor::List { .. } => FROM_LIST,
            MapConstructor::Property { .. } => FROM_PROPERTY,
            MapConstructor::Statistic { .. } => FROM_STATISTIC,
            MapConstructor::Track(_) => FROM_TRACK,
        }
    }

    pub fn params(&self, default_collection: &str) -> String {
        match self {
            MapConstructor::List { entries } => entries.clone(),
            MapConstructor::Property {
                property,
                collection,
            } => with_collection(property, collection, default_collection),
            MapConstructor::Statistic {
                expression,
                collection,
            } => with_collection(expression, collection, default_collection),
            MapConstructor::Track(request) => request.constructor_params(default_collection),
        }
    }
}

/// Result of parsing a literal list. `unresolved` holds names that were
/// skipped because they matched no entity (only in collecting mode).
#[derive(Debug, Clone)]
pub struct ListParse<V> {
    pub map: EntityMap<V>,
    pub unresolved: Vec<String>,
}

/// Splits on commas outside double quotes. An unterminated quote is a parse
/// failure naming the text from the opening quote on.
fn split_entries(text: &str) -> Result<Vec<&str>> {
    let mut ret = Vec::new();
    let mut start = 0;
    let mut open_quote: Option<usize> = None;
    for (i, c) in text.char_indices() {
        match c {
            '"' => open_quote = if open_quote.is_some() { None } else { Some(i) },
            ',' if open_quote.is_none() => {
                ret.push(&text[start..i]);
                start = i + 1;
            }
            _ => {}
        }
    }
    if let Some(i) = open_quote {
        return Err(MapError::parse(&text[i..], "unterminated quote"));
    }
    ret.push(&text[start..]);
    Ok(ret
        .into_iter()
        .map(str::trim)
        .filter(|e| !e.is_empty())
        .collect())
}

fn glob_regex(pattern: &str) -> Result<Regex> {
    let body = pattern
        .split('*')
        .map(regex::escape)
        .collect::<Vec<_>>()
        .join(".*");
    Regex::new(&format!("^{body}$")).map_err(|e| MapError::parse(pattern, e.to_string()))
}

/// Expands `seq1:seq10` (or `seq010:seq001`) into the names in between.
fn expand_range(key: &str, first: &str, last: &str) -> Result<Vec<String>> {
    let malformed = || MapError::parse(key, "malformed range");
    let a = RANGE_ENDPOINT.captures(first.trim()).ok_or_else(malformed)?;
    let b = RANGE_ENDPOINT.captures(last.trim()).ok_or_else(malformed)?;
    if a[1] != b[1] || a[3] != b[3] {
        return Err(MapError::parse(
            key,
            "range endpoints must share prefix and suffix",
        ));
    }
    let from: u64 = a[2].parse().map_err(|_| malformed())?;
    let to: u64 = b[2].parse().map_err(|_| malformed())?;
    let (lo, hi) = if from <= to { (from, to) } else { (to, from) };
    if hi - lo > MAX_RANGE_SPAN {
        return Err(MapError::parse(key, "range is too large"));
    }
    let width = if a[2].starts_with('0') && a[2].len() > 1 {
        a[2].len()
    } else {
        0
    };
    Ok((lo..=hi)
        .map(|i| format!("{}{:0width$}{}", &a[1], i, &a[3], width = width))
        .collect())
}

struct ListResolver<'a> {
    kind: EntityKind,
    catalog: &'a dyn EntityCatalog,
    collect_unresolved: bool,
    unresolved: Vec<String>,
}

impl ListResolver<'_> {
    fn report_unresolved(&mut self, name: &str) -> Result<()> {
        if self.collect_unresolved {
            warn!(kind = %self.kind, name, "skipping unresolved list entry");
            self.unresolved.push(name.to_string());
            Ok(())
        } else {
            Err(MapError::reference(ReferenceKind::Entity(self.kind), name))
        }
    }

    fn resolve_key(&mut self, key: &str) -> Result<Vec<String>> {
        if let Some((partition_name, cluster)) = key.split_once("->") {
            let partition_name = partition_name.trim();
            let cluster = cluster.trim();
            let partition = self
                .catalog
                .partition(partition_name)
                .filter(|p| p.kind.is_none_or(|k| k == self.kind))
                .ok_or_else(|| MapError::reference(ReferenceKind::Partition, partition_name))?;
            return partition
                .cluster(cluster)
                .map(|members| members.to_vec())
                .ok_or_else(|| MapError::parse(key, format!("unknown cluster '{cluster}'")));
        }
        if key.contains('*') {
            let re = glob_regex(key)?;
            return Ok(self
                .catalog
                .entity_names(self.kind)
                .into_iter()
                .filter(|name| re.is_match(name))
                .collect());
        }
        if let Some((first, last)) = key.split_once(':') {
            let mut ret = Vec::new();
            for name in expand_range(key, first, last)? {
                if self.catalog.has_entity(self.kind, &name) {
                    ret.push(name);
                } else {
                    self.report_unresolved(&name)?;
                }
            }
            return Ok(ret);
        }
        if self.catalog.has_entity(self.kind, key) {
            return Ok(vec![key.to_string()]);
        }
        if let Some(collection) = self.catalog.collection(key).filter(|c| c.kind == self.kind) {
            return Ok(collection.members.clone());
        }
        self.report_unresolved(key)?;
        Ok(vec![])
    }
}

/// Parses `key=value` entries separated by commas. Keys may be entity or
/// collection names, `*` globs, `A:B` numeric-suffix ranges,
/// `Partition->Cluster` references, or `<DEFAULT>`. Later entries override
/// earlier ones.
pub fn map_from_list<V: MapValue>(
    name: &str,
    kind: EntityKind,
    text: &str,
    catalog: &dyn EntityCatalog,
    collect_unresolved: bool,
) -> Result<ListParse<V>> {
    let mut resolver = ListResolver {
        kind,
        catalog,
        collect_unresolved,
        unresolved: Vec::new(),
    };
    let mut map = EntityMap::new(name, kind);
    for entry in split_entries(text)? {
        let (key, value) = entry
            .split_once('=')
            .ok_or_else(|| MapError::parse(entry, "expected key=value"))?;
        let key = key.trim();
        if key.is_empty() {
            return Err(MapError::parse(entry, "missing key"));
        }
        let value = V::parse_value(value)?;
        if key == DEFAULT_KEY {
            map.set_default(value);
            continue;
        }
        let targets = resolver.resolve_key(key)?;
        debug!(key, matched = targets.len(), "list entry resolved");
        for target in targets {
            map.set(&target, value.clone());
        }
    }
    map.set_constructor(FROM_LIST, text);
    Ok(ListParse {
        map,
        unresolved: resolver.unresolved,
    })
}

pub fn map_from_property<V: MapValue>(
    name: &str,
    kind: EntityKind,
    property: &str,
    collection: Option<&str>,
    catalog: &dyn EntityCatalog,
    default_collection: &str,
) -> Result<EntityMap<V>> {
    if !catalog.has_property(kind, property) {
        return Err(MapError::reference(ReferenceKind::Property, property));
    }
    let universe = catalog.universe(kind, collection)?;
    let mut map = EntityMap::new(name, kind);
    for entity in &universe {
        if let Some(value) = catalog
            .property(kind, entity, property)
            .and_then(|v| V::from_property(&v))
        {
            map.set(entity, value);
        }
    }
    let constructor = MapConstructor::Property {
        property: property.to_string(),
        collection: collection.map(str::to_string),
    };
    map.set_constructor(FROM_PROPERTY, &constructor.params(default_collection));
    Ok(map)
}

pub fn map_from_statistic<V: MapValue>(
    name: &str,
    kind: EntityKind,
    expression: &str,
    collection: Option<&str>,
    catalog: &dyn EntityCatalog,
    evaluator: &dyn StatisticEvaluator<V>,
    default_collection: &str,
) -> Result<EntityMap<V>> {
    let universe = catalog.universe(kind, collection)?;
    let evaluated = evaluator.evaluate(expression, kind, &universe)?;
    let domain = KeyDomain::for_kind(kind);
    let mut map = EntityMap::with_default(name, kind, evaluated.get_default());
    for (key, value) in evaluated.iter() {
        if domain.validate_key(key) {
            map.set(key, value.clone());
        }
    }
    let constructor = MapConstructor::Statistic {
        expression: expression.to_string(),
        collection: collection.map(str::to_string),
    };
    map.set_constructor(FROM_STATISTIC, &constructor.params(default_collection));
    Ok(map)
}

pub fn map_from_track<S>(
    name: &str,
    request: &TrackAggregation,
    source: &S,
    check_interval: usize,
    default_collection: &str,
    cancel: &CancellationToken,
    on_progress: &mut dyn FnMut(AggregationProgress),
) -> Result<NumericMap>
where
    S: EntityCatalog + TrackSource + ?Sized,
{
    let mut map = TrackAggregator::new(source)
        .check_interval(check_interval)
        .default_collection(default_collection)
        .run_with_progress(request, cancel, on_progress)?;
    map.set_name(name);
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        entity::{EntityCollection, Partition},
        entity_map::TextMap,
        workbench::{DEFAULT_SEQUENCE_COLLECTION as ALL, Workbench},
        workspace::PropertyValue,
    };

    fn catalog() -> Workbench {
        let mut wb = Workbench::new();
        for i in 1..=12 {
            wb.add_sequence(&format!("seq{i}"), 100);
        }
        wb.add_sequence("seq007", 100);
        for m in ["MA0001", "MA0002", "MX0001"] {
            wb.add_entity(EntityKind::Motif, m)
                .insert("IC".to_string(), PropertyValue::Numeric(m.len() as f64));
        }
        wb.add_entity(EntityKind::Motif, "MA0003")
            .insert("family".to_string(), PropertyValue::Text("bZIP".to_string()));
        wb.add_collection(EntityCollection::new(
            "mx",
            EntityKind::Motif,
            vec!["MX0001".to_string()],
        ));
        let mut partition = Partition::new("groups", EntityKind::Sequence);
        partition.assign("seq1", "up");
        partition.assign("seq2", "up");
        partition.assign("seq3", "down");
        wb.add_partition(partition);
        wb
    }

    fn numeric_list(text: &str, kind: EntityKind) -> Result<NumericMap> {
        map_from_list::<f64>("m", kind, text, &catalog(), false).map(|p| p.map)
    }

    #[test]
    fn test_list_round_trip() {
        let map = numeric_list("MA0001=1,MA0002=2", EntityKind::Motif).unwrap();
        assert_eq!(map.get("MA0001"), 1.0);
        assert_eq!(map.get("MA0002"), 2.0);
        assert_eq!(map.get_constructor(FROM_LIST), Some("MA0001=1,MA0002=2"));
    }

    #[test]
    fn test_list_default_and_override_order() {
        let map = numeric_list("<DEFAULT>=-1, MA*=3, MA0002=5", EntityKind::Motif).unwrap();
        assert_eq!(map.get_default(), -1.0);
        assert_eq!(map.get("MA0001"), 3.0);
        assert_eq!(map.get("MA0002"), 5.0);
        assert_eq!(map.get("MA0003"), 3.0);
        assert_eq!(map.get("MX0001"), -1.0);
    }

    #[test]
    fn test_list_wildcards() {
        let map = numeric_list("*0001=1", EntityKind::Motif).unwrap();
        assert_eq!(map.assigned_keys(), vec!["MA0001", "MX0001"]);
        let map = numeric_list("*A000*=2", EntityKind::Motif).unwrap();
        assert_eq!(map.len(), 3);
        let map = numeric_list("*=4", EntityKind::Motif).unwrap();
        assert_eq!(map.len(), 4);
    }

    #[test]
    fn test_list_ranges() {
        let map = numeric_list("seq2:seq4=1", EntityKind::Sequence).unwrap();
        assert_eq!(map.assigned_keys(), vec!["seq2", "seq3", "seq4"]);
        let map = numeric_list("seq11:seq9=1", EntityKind::Sequence).unwrap();
        assert_eq!(map.assigned_keys(), vec!["seq9", "seq10", "seq11"]);
        let map = numeric_list("MA0001:MA0002=1", EntityKind::Motif).unwrap();
        assert_eq!(map.len(), 2);
        let err = numeric_list("seq1:gene3=1", EntityKind::Sequence).unwrap_err();
        assert_eq!(
            err,
            MapError::parse("seq1:gene3", "range endpoints must share prefix and suffix")
        );
        let err = numeric_list("seq12:seq14=1", EntityKind::Sequence).unwrap_err();
        assert_eq!(
            err,
            MapError::reference(ReferenceKind::Entity(EntityKind::Sequence), "seq13")
        );
    }

    #[test]
    fn test_list_zero_padded_range() {
        let map = numeric_list("seq007:seq007=1", EntityKind::Sequence).unwrap();
        assert_eq!(map.assigned_keys(), vec!["seq007"]);
        assert!(!map.is_explicitly_set("seq7"));
    }

    #[test]
    fn test_list_partition_and_collection() {
        let map = numeric_list("groups->up=1, groups->down=2", EntityKind::Sequence).unwrap();
        assert_eq!(map.get("seq1"), 1.0);
        assert_eq!(map.get("seq2"), 1.0);
        assert_eq!(map.get("seq3"), 2.0);
        let err = numeric_list("groups->sideways=1", EntityKind::Sequence).unwrap_err();
        assert_eq!(
            err,
            MapError::parse("groups->sideways", "unknown cluster 'sideways'")
        );
        let err = numeric_list("groups->up=1", EntityKind::Motif).unwrap_err();
        assert_eq!(err, MapError::reference(ReferenceKind::Partition, "groups"));
        let err = numeric_list("nope->up=1", EntityKind::Sequence).unwrap_err();
        assert_eq!(err, MapError::reference(ReferenceKind::Partition, "nope"));

        let map = numeric_list("mx=7", EntityKind::Motif).unwrap();
        assert_eq!(map.get("MX0001"), 7.0);
    }

    #[test]
    fn test_list_parse_failures() {
        let err = numeric_list("MA0001=1,MA0002", EntityKind::Motif).unwrap_err();
        assert_eq!(err, MapError::parse("MA0002", "expected key=value"));
        let err = numeric_list("MA0001=abc", EntityKind::Motif).unwrap_err();
        assert_eq!(err, MapError::parse("abc", "not a numeric value"));
        let err = numeric_list("=3", EntityKind::Motif).unwrap_err();
        assert_eq!(err, MapError::parse("=3", "missing key"));
    }

    #[test]
    fn test_list_unresolved_modes() {
        let err = numeric_list("MA0001=1,MA9999=2", EntityKind::Motif).unwrap_err();
        assert_eq!(
            err,
            MapError::reference(ReferenceKind::Entity(EntityKind::Motif), "MA9999")
        );
        let parsed =
            map_from_list::<f64>("m", EntityKind::Motif, "MA0001=1,MA9999=2", &catalog(), true)
                .unwrap();
        assert_eq!(parsed.map.len(), 1);
        assert_eq!(parsed.unresolved, vec!["MA9999".to_string()]);
    }

    #[test]
    fn test_text_list_with_quoted_commas() {
        let parsed = map_from_list::<String>(
            "t",
            EntityKind::Motif,
            r#"MA0001="bZIP, leucine zipper",<DEFAULT>=unknown"#,
            &catalog(),
            false,
        )
        .unwrap();
        assert_eq!(parsed.map.get("MA0001"), "bZIP, leucine zipper");
        assert_eq!(parsed.map.get("MA0002"), "unknown");
    }

    #[test]
    fn test_text_list_rejects_unterminated_quote() {
        let err = map_from_list::<String>(
            "t",
            EntityKind::Motif,
            r#"MA0001="abc,MA0002=x"#,
            &catalog(),
            false,
        )
        .unwrap_err();
        assert_eq!(err, MapError::parse(r#""abc,MA0002=x"#, "unterminated quote"));
    }

    #[test]
    fn test_from_property() {
        let wb = catalog();
        let map: NumericMap =
            map_from_property("ic", EntityKind::Motif, "IC", None, &wb, ALL).unwrap();
        assert_eq!(map.get("MA0001"), 6.0);
        assert!(!map.is_explicitly_set("MA0003"));
        assert_eq!(map.get_constructor(FROM_PROPERTY), Some("IC"));

        let map: NumericMap =
            map_from_property("ic", EntityKind::Motif, "IC", Some("mx"), &wb, ALL).unwrap();
        assert_eq!(map.assigned_keys(), vec!["MX0001"]);
        assert_eq!(map.get_constructor(FROM_PROPERTY), Some("IC, collection=mx"));

        let text: TextMap =
            map_from_property("fam", EntityKind::Motif, "family", None, &wb, ALL).unwrap();
        assert_eq!(text.get("MA0003"), "bZIP");

        let err = map_from_property::<f64>("x", EntityKind::Module, "IC", None, &wb, ALL)
            .unwrap_err();
        assert_eq!(err, MapError::reference(ReferenceKind::Property, "IC"));
        let err = map_from_property::<f64>("x", EntityKind::Motif, "IC", Some("groups"), &wb, ALL)
            .unwrap_err();
        assert_eq!(err, MapError::reference(ReferenceKind::Collection, "groups"));
    }

    #[test]
    fn test_from_statistic() {
        let wb = catalog();
        let evaluator = |expression: &str, kind: EntityKind, universe: &[String]| -> Result<NumericMap> {
            let mut m = NumericMap::with_default("stat", kind, -1.0);
            for (i, key) in universe.iter().enumerate() {
                m.set(key, (i * expression.len()) as f64);
            }
            Ok(m)
        };
        let map = map_from_statistic::<f64>(
            "s",
            EntityKind::Sequence,
            "gc content",
            Some("AllSequences"),
            &wb,
            &evaluator,
            ALL,
        )
        .unwrap();
        assert_eq!(map.name(), "s");
        assert_eq!(map.get("seq2"), 10.0);
        assert_eq!(map.get("unknown"), -1.0);
        assert_eq!(map.get_constructor(FROM_STATISTIC), Some("gc content"));

        let failing = |_: &str, _: EntityKind, _: &[String]| -> Result<NumericMap> {
            Err(MapError::parse("gc(", "unbalanced parenthesis"))
        };
        let err = map_from_statistic::<f64>("s", EntityKind::Sequence, "gc(", None, &wb, &failing, ALL)
            .unwrap_err();
        assert_eq!(err, MapError::parse("gc(", "unbalanced parenthesis"));
    }

    #[test]
    fn test_default_collection_left_out_of_provenance() {
        let wb = catalog();
        let evaluator = |_: &str, kind: EntityKind, _: &[String]| -> Result<NumericMap> {
            Ok(NumericMap::with_default("stat", kind, 0.0))
        };
        let named = map_from_statistic::<f64>(
            "a",
            EntityKind::Sequence,
            "gc",
            Some(ALL),
            &wb,
            &evaluator,
            ALL,
        )
        .unwrap();
        let unnamed =
            map_from_statistic::<f64>("b", EntityKind::Sequence, "gc", None, &wb, &evaluator, ALL)
                .unwrap();
        assert!(named.same_constructor(&unnamed));
        assert_eq!(named.constructor_string(), unnamed.constructor_string());
    }

    #[test]
    fn test_constructor_parse() {
        assert_eq!(
            MapConstructor::parse("List:A=1,B=2").unwrap(),
            MapConstructor::List {
                entries: "A=1,B=2".to_string()
            }
        );
        let property = MapConstructor::parse("Property:IC, collection=mx").unwrap();
        assert_eq!(
            property,
            MapConstructor::Property {
                property: "IC".to_string(),
                collection: Some("mx".to_string())
            }
        );
        assert_eq!(property.params(ALL), "IC, collection=mx");
        assert_eq!(property.params("mx"), "IC");
        let statistic = MapConstructor::parse("Statistic:max(a, b)").unwrap();
        assert_eq!(statistic.prefix(), FROM_STATISTIC);
        assert_eq!(statistic.params(ALL), "max(a, b)");
        let track = MapConstructor::parse("Track:TFBS, property=frequency").unwrap();
        assert!(matches!(track, MapConstructor::Track(ref t) if t.track == "TFBS"));
        assert_eq!(
            MapConstructor::parse("Magic:xyz").unwrap_err(),
            MapError::parse("Magic:xyz", "unknown constructor")
        );
    }
}
