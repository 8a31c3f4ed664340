//! Default-plus-overrides maps keyed by entity name.
//!
//! One generic [`EntityMap`] serves every entity kind; the kind only selects
//! the [`KeyDomain`] used to validate keys and enumerate the universe. Value
//! types plug in through [`MapValue`].

use crate::{
    entity::{DEFAULT_KEY, EntityKind, KeyDomain},
    error::{MapError, Result},
    natural_order::natural_cmp,
    workspace::PropertyValue,
};
use itertools::Itertools;
use serde::{Deserialize, Serialize, de::DeserializeOwned};
use std::{cmp::Ordering, collections::BTreeMap, fmt};

pub trait MapValue: Clone + PartialEq + fmt::Debug + Serialize + DeserializeOwned {
    /// Whether values have a sign (positive/negative/zero filters apply).
    const NUMERIC: bool;

    fn factory_default() -> Self;

    /// Total order used for ranking and top/bottom selection.
    fn compare(&self, other: &Self) -> Ordering;

    fn parse_value(text: &str) -> Result<Self>;

    fn format_value(&self) -> String;

    /// Sign relative to zero, for value types where that is meaningful.
    fn signum(&self) -> Option<Ordering> {
        None
    }

    fn from_property(value: &PropertyValue) -> Option<Self>;
}

impl MapValue for f64 {
    const NUMERIC: bool = true;

    fn factory_default() -> Self {
        0.0
    }

    fn compare(&self, other: &Self) -> Ordering {
        // NaN sorts above every number and equal to itself
        self.partial_cmp(other)
            .unwrap_or_else(|| self.is_nan().cmp(&other.is_nan()))
    }

    fn parse_value(text: &str) -> Result<Self> {
        let token = text.trim();
        token
            .parse::<f64>()
            .map_err(|_| MapError::parse(token, "not a numeric value"))
    }

    fn format_value(&self) -> String {
        self.to_string()
    }

    fn signum(&self) -> Option<Ordering> {
        self.partial_cmp(&0.0)
    }

    fn from_property(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Numeric(v) => Some(*v),
            PropertyValue::Text(t) => t.trim().parse().ok(),
        }
    }
}

impl MapValue for String {
    const NUMERIC: bool = false;

    fn factory_default() -> Self {
        String::new()
    }

    fn compare(&self, other: &Self) -> Ordering {
        natural_cmp(self, other)
    }

    fn parse_value(text: &str) -> Result<Self> {
        let token = text.trim();
        match token.strip_prefix('"') {
            Some(rest) => rest
                .strip_suffix('"')
                .map(str::to_string)
                .ok_or_else(|| MapError::parse(token, "unterminated quote")),
            None => Ok(token.to_string()),
        }
    }

    fn format_value(&self) -> String {
        self.clone()
    }

    fn from_property(value: &PropertyValue) -> Option<Self> {
        match value {
            PropertyValue::Numeric(v) => Some(v.to_string()),
            PropertyValue::Text(t) => Some(t.clone()),
        }
    }
}

/// How a map was built: a constructor prefix and its parameter text.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Provenance {
    pub prefix: String,
    pub params: String,
}

impl fmt::Display for Provenance {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}{}", self.prefix, self.params)
    }
}

/// Number of entries to select, absolute or as a percentage of the
/// candidate set.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum SelectionSize {
    Count(usize),
    Percent(f64),
}

impl SelectionSize {
    pub fn resolve(&self, total: usize) -> usize {
        match *self {
            SelectionSize::Count(n) => n.min(total),
            SelectionSize::Percent(p) => {
                let n = (total as f64 * p / 100.0).floor();
                if n <= 0.0 {
                    0
                } else {
                    (n as usize).min(total)
                }
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(from = "StoredEntityMap<V>", bound(deserialize = "V: Deserialize<'de>"))]
pub struct EntityMap<V> {
    name: String,
    kind: EntityKind,
    default_value: V,
    #[serde(default)]
    overrides: BTreeMap<String, V>,
    #[serde(default)]
    provenance: Option<Provenance>,
}

/// Serialized form; a stored `<DEFAULT>` override becomes the default.
#[derive(Deserialize)]
#[serde(bound(deserialize = "V: Deserialize<'de>"))]
struct StoredEntityMap<V> {
    name: String,
    kind: EntityKind,
    default_value: V,
    #[serde(default)]
    overrides: BTreeMap<String, V>,
    #[serde(default)]
    provenance: Option<Provenance>,
}

impl<V> From<StoredEntityMap<V>> for EntityMap<V> {
    fn from(stored: StoredEntityMap<V>) -> Self {
        let StoredEntityMap {
            name,
            kind,
            mut default_value,
            mut overrides,
            provenance,
        } = stored;
        if let Some(value) = overrides.remove(DEFAULT_KEY) {
            default_value = value;
        }
        Self {
            name,
            kind,
            default_value,
            overrides,
            provenance,
        }
    }
}

pub type NumericMap = EntityMap<f64>;
pub type TextMap = EntityMap<String>;

impl<V: MapValue> EntityMap<V> {
    pub fn new(name: &str, kind: EntityKind) -> Self {
        Self::with_default(name, kind, V::factory_default())
    }

    pub fn with_default(name: &str, kind: EntityKind, default_value: V) -> Self {
        Self {
            name: name.to_string(),
            kind,
            default_value,
            overrides: BTreeMap::new(),
            provenance: None,
        }
    }

    #[inline(always)]
    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn set_name(&mut self, name: &str) {
        self.name = name.to_string();
    }

    #[inline(always)]
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn domain(&self) -> KeyDomain {
        KeyDomain::for_kind(self.kind)
    }

    pub fn get_default(&self) -> V {
        self.default_value.clone()
    }

    pub fn set_default(&mut self, value: V) {
        self.default_value = value;
    }

    /// Resets the default to the value type's factory default.
    pub fn clear_default(&mut self) {
        self.default_value = V::factory_default();
    }

    pub fn get(&self, key: &str) -> V {
        self.value_ref(key).clone()
    }

    pub fn value_ref(&self, key: &str) -> &V {
        self.overrides.get(key).unwrap_or(&self.default_value)
    }

    /// Setting the reserved default key updates the default value.
    pub fn set(&mut self, key: &str, value: V) {
        if key == DEFAULT_KEY {
            self.default_value = value;
        } else {
            self.overrides.insert(key.to_string(), value);
        }
    }

    pub fn set_value_from_str(&mut self, key: &str, text: &str) -> Result<()> {
        let value = V::parse_value(text)?;
        self.set(key, value);
        Ok(())
    }

    pub fn set_default_from_str(&mut self, text: &str) -> Result<()> {
        self.default_value = V::parse_value(text)?;
        Ok(())
    }

    pub fn remove(&mut self, key: &str) -> Option<V> {
        self.overrides.remove(key)
    }

    /// Drops all overrides and the provenance. The default is retained.
    pub fn clear(&mut self) {
        self.overrides.clear();
        self.provenance = None;
    }

    pub fn is_explicitly_set(&self, key: &str) -> bool {
        self.overrides.contains_key(key)
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.overrides.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.overrides.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &V)> {
        self.overrides.iter()
    }

    /// Explicitly set keys in natural order.
    pub fn assigned_keys(&self) -> Vec<String> {
        self.overrides
            .keys()
            .sorted_by(|a, b| natural_cmp(a, b))
            .cloned()
            .collect()
    }

    fn directed_cmp(a: &V, b: &V, ascending: bool) -> Ordering {
        let ord = a.compare(b);
        if ascending { ord } else { ord.reverse() }
    }

    /// Competition ranking over explicitly set entries: equal values share a
    /// rank and the next distinct value is ranked by its position, so
    /// 13,13,24 ranks as 1,1,3.
    pub fn rank_order(&self, ascending: bool) -> BTreeMap<String, usize> {
        let sorted = self
            .overrides
            .iter()
            .sorted_by(|(ka, va), (kb, vb)| {
                Self::directed_cmp(va, vb, ascending).then_with(|| natural_cmp(ka, kb))
            })
            .collect::<Vec<_>>();
        let mut ret = BTreeMap::new();
        let mut rank = 0;
        let mut previous: Option<&V> = None;
        for (position, (key, value)) in sorted.into_iter().enumerate() {
            if previous.is_none_or(|p| p.compare(value) != Ordering::Equal) {
                rank = position + 1;
            }
            previous = Some(value);
            ret.insert(key.clone(), rank);
        }
        ret
    }

    /// Ranks as a numeric map. Entries without a rank default to one past
    /// the number of ranked entries.
    pub fn rank_map(&self, ascending: bool) -> NumericMap {
        let ranks = self.rank_order(ascending);
        let mut ret = NumericMap::with_default(&self.name, self.kind, (ranks.len() + 1) as f64);
        for (key, rank) in ranks {
            ret.set(&key, rank as f64);
        }
        ret
    }

    /// The first `size` of `candidates` ordered by value, highest first when
    /// `want_top`. Equal values are ordered by name so the cut is
    /// deterministic; ties at the cut are not widened.
    pub fn top_or_bottom(
        &self,
        size: SelectionSize,
        want_top: bool,
        candidates: &[String],
    ) -> Vec<String> {
        let unique = candidates.iter().unique().collect::<Vec<_>>();
        let n = size.resolve(unique.len());
        unique
            .into_iter()
            .sorted_by(|a, b| {
                Self::directed_cmp(self.value_ref(a), self.value_ref(b), !want_top)
                    .then_with(|| natural_cmp(a, b))
            })
            .take(n)
            .cloned()
            .collect()
    }

    /// Highest (or lowest) value among `candidates`; the default if there
    /// are none.
    pub fn extreme_value(&self, want_top: bool, candidates: &[String]) -> V {
        let values = candidates.iter().map(|key| self.value_ref(key));
        let extreme = if want_top {
            values.max_by(|a, b| a.compare(b))
        } else {
            values.min_by(|a, b| a.compare(b))
        };
        extreme.unwrap_or(&self.default_value).clone()
    }

    pub fn matching_entries<F>(&self, predicate: F, universe: &[String]) -> Vec<String>
    where
        F: Fn(&V) -> bool,
    {
        universe
            .iter()
            .filter(|key| predicate(self.value_ref(key)))
            .cloned()
            .collect()
    }

    pub fn set_constructor(&mut self, prefix: &str, params: &str) {
        self.provenance = Some(Provenance {
            prefix: prefix.to_string(),
            params: params.to_string(),
        });
    }

    pub fn get_constructor(&self, prefix: &str) -> Option<&str> {
        self.provenance
            .as_ref()
            .filter(|p| p.prefix == prefix)
            .map(|p| p.params.as_str())
    }

    pub fn has_constructor(&self, prefix: &str) -> bool {
        self.get_constructor(prefix).is_some()
    }

    pub fn clear_constructor(&mut self) {
        self.provenance = None;
    }

    pub fn provenance(&self) -> Option<&Provenance> {
        self.provenance.as_ref()
    }

    /// Full constructor string (`prefix` + `params`), if any.
    pub fn constructor_string(&self) -> Option<String> {
        self.provenance.as_ref().map(|p| p.to_string())
    }

    pub fn same_constructor(&self, other: &Self) -> bool {
        self.provenance == other.provenance
    }

    /// Equal default and equal overrides; provenance is ignored.
    pub fn contains_same_mappings(&self, other: &Self) -> bool {
        self.default_value == other.default_value && self.overrides == other.overrides
    }

    pub fn contains_same_data(&self, other: &Self) -> bool {
        self.contains_same_mappings(other) && self.same_constructor(other)
    }

    /// Every explicit entry of `self` resolves to the same value in `other`,
    /// and both share the same default.
    pub fn is_subset_of(&self, other: &Self) -> bool {
        self.default_value == other.default_value
            && self
                .overrides
                .iter()
                .all(|(key, value)| other.value_ref(key) == value)
    }

    /// Replaces values and provenance with those of `other`, keeping name
    /// and kind.
    pub fn import_data(&mut self, other: EntityMap<V>) {
        self.default_value = other.default_value;
        self.overrides = other.overrides;
        self.provenance = other.provenance;
    }

    /// `key=value` pairs in natural key order, default first.
    pub fn value_list(&self) -> String {
        std::iter::once(format!(
            "{DEFAULT_KEY}={}",
            self.default_value.format_value()
        ))
        .chain(
            self.assigned_keys()
                .into_iter()
                .map(|key| format!("{key}={}", self.value_ref(&key).format_value())),
        )
        .join(",")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn names(v: &[&str]) -> Vec<String> {
        v.iter().map(|s| s.to_string()).collect()
    }

    fn numeric(pairs: &[(&str, f64)]) -> NumericMap {
        let mut map = NumericMap::new("m", EntityKind::Motif);
        for (k, v) in pairs {
            map.set(k, *v);
        }
        map
    }

    #[test]
    fn test_default_and_override() {
        let mut map = numeric(&[("A", 3.0)]);
        assert_eq!(map.get("A"), 3.0);
        assert_eq!(map.get("B"), 0.0);
        map.set_default(7.5);
        assert_eq!(map.get("B"), 7.5);
        assert!(!map.is_explicitly_set("B"));
        map.clear_default();
        assert_eq!(map.get_default(), 0.0);
        assert_eq!(map.remove("A"), Some(3.0));
        assert_eq!(map.get("A"), 0.0);
    }

    #[test]
    fn test_default_key_sets_default() {
        let mut map = numeric(&[]);
        map.set(DEFAULT_KEY, 2.0);
        assert!(map.is_empty());
        assert_eq!(map.get_default(), 2.0);
        assert!(!map.is_explicitly_set(DEFAULT_KEY));
    }

    #[test]
    fn test_clear_keeps_default_drops_provenance() {
        let mut map = numeric(&[("A", 1.0), ("B", 2.0)]);
        map.set_default(4.0);
        map.set_constructor("List:", "A=1,B=2");
        map.clear();
        assert_eq!(map.get("A"), 4.0);
        assert_eq!(map.get("B"), 4.0);
        assert!(map.provenance().is_none());
    }

    #[test]
    fn test_set_from_string() {
        let mut map = numeric(&[]);
        map.set_value_from_str("A", " 2.5 ").unwrap();
        assert_eq!(map.get("A"), 2.5);
        let err = map.set_value_from_str("B", "two").unwrap_err();
        assert_eq!(err, MapError::parse("two", "not a numeric value"));
        assert!(!map.is_explicitly_set("B"));

        let mut text = TextMap::new("t", EntityKind::Sequence);
        text.set_value_from_str("s1", "\"up, regulated\"").unwrap();
        assert_eq!(text.get("s1"), "up, regulated");
        text.set_default_from_str("none").unwrap();
        assert_eq!(text.get("s2"), "none");
        let err = text.set_value_from_str("s3", "\"up").unwrap_err();
        assert_eq!(err, MapError::parse("\"up", "unterminated quote"));
        assert!(!text.is_explicitly_set("s3"));
    }

    #[test]
    fn test_rank_with_ties() {
        let map = numeric(&[
            ("A", 13.0),
            ("B", 13.0),
            ("C", 24.0),
            ("D", 32.0),
            ("E", 32.0),
            ("F", 32.0),
            ("G", 58.0),
        ]);
        let ranks = map.rank_order(true);
        let got: Vec<usize> = ["A", "B", "C", "D", "E", "F", "G"]
            .iter()
            .map(|k| ranks[*k])
            .collect();
        assert_eq!(got, vec![1, 1, 3, 4, 4, 4, 7]);

        let ranks = map.rank_order(false);
        assert_eq!(ranks["G"], 1);
        assert_eq!(ranks["D"], 2);
        assert_eq!(ranks["F"], 2);
        assert_eq!(ranks["C"], 5);
        assert_eq!(ranks["A"], 6);
    }

    #[test]
    fn test_rank_edge_cases() {
        assert!(numeric(&[]).rank_order(true).is_empty());
        let mut single = numeric(&[("X", -4.0)]);
        single.set_default(100.0);
        assert_eq!(single.rank_order(false)["X"], 1);
        let ranks = single.rank_map(true);
        assert_eq!(ranks.get("X"), 1.0);
        assert_eq!(ranks.get("other"), 2.0);
    }

    #[test]
    fn test_rank_text_values() {
        let mut map = TextMap::new("t", EntityKind::Module);
        map.set("m1", "gene10".to_string());
        map.set("m2", "gene9".to_string());
        map.set("m3", "gene9".to_string());
        let ranks = map.rank_order(true);
        assert_eq!(ranks["m2"], 1);
        assert_eq!(ranks["m3"], 1);
        assert_eq!(ranks["m1"], 3);
    }

    #[test]
    fn test_top_and_bottom_ties_break_by_name() {
        let map = numeric(&[("B", 5.0), ("A", 5.0), ("C", 1.0)]);
        let universe = names(&["C", "B", "A"]);
        assert_eq!(
            map.top_or_bottom(SelectionSize::Count(1), true, &universe),
            names(&["A"])
        );
        assert_eq!(
            map.top_or_bottom(SelectionSize::Count(2), true, &universe),
            names(&["A", "B"])
        );
        assert_eq!(
            map.top_or_bottom(SelectionSize::Count(1), false, &universe),
            names(&["C"])
        );
        assert_eq!(
            map.top_or_bottom(SelectionSize::Count(10), false, &universe),
            names(&["C", "A", "B"])
        );
    }

    #[test]
    fn test_top_uses_default_for_unset_candidates() {
        let mut map = numeric(&[("A", 1.0)]);
        map.set_default(3.0);
        let universe = names(&["A", "B", "B"]);
        assert_eq!(
            map.top_or_bottom(SelectionSize::Count(1), true, &universe),
            names(&["B"])
        );
        assert_eq!(map.extreme_value(true, &universe), 3.0);
        assert_eq!(map.extreme_value(false, &universe), 1.0);
        assert_eq!(map.extreme_value(false, &[]), 3.0);
    }

    #[test]
    fn test_percent_selection() {
        assert_eq!(SelectionSize::Percent(50.0).resolve(5), 2);
        assert_eq!(SelectionSize::Percent(10.0).resolve(5), 0);
        assert_eq!(SelectionSize::Percent(250.0).resolve(4), 4);
        assert_eq!(SelectionSize::Count(3).resolve(2), 2);
        let map = numeric(&[("A", 1.0), ("B", 2.0), ("C", 3.0), ("D", 4.0)]);
        let universe = names(&["A", "B", "C", "D"]);
        assert_eq!(
            map.top_or_bottom(SelectionSize::Percent(50.0), true, &universe),
            names(&["D", "C"])
        );
    }

    #[test]
    fn test_matching_entries() {
        let map = numeric(&[("A", 1.0), ("B", -2.0)]);
        let universe = names(&["A", "B", "C"]);
        assert_eq!(map.matching_entries(|v| *v > 0.0, &universe), names(&["A"]));
        assert_eq!(map.matching_entries(|v| *v == 0.0, &universe), names(&["C"]));
    }

    #[test]
    fn test_provenance() {
        let mut a = numeric(&[("A", 1.0)]);
        let mut b = numeric(&[("A", 1.0)]);
        assert!(a.same_constructor(&b));
        a.set_constructor("List:", "A=1");
        assert_eq!(a.get_constructor("List:"), Some("A=1"));
        assert_eq!(a.get_constructor("Track:"), None);
        assert!(a.has_constructor("List:"));
        assert_eq!(a.constructor_string().as_deref(), Some("List:A=1"));
        assert!(!a.same_constructor(&b));
        assert!(a.contains_same_mappings(&b));
        assert!(!a.contains_same_data(&b));
        b.set_constructor("List:", "A=1");
        assert!(a.contains_same_data(&b));
        b.set_constructor("List:", "A=1.0");
        assert!(!a.same_constructor(&b));
        a.clear_constructor();
        assert!(!a.has_constructor("List:"));
    }

    #[test]
    fn test_equality_and_subset() {
        let a = numeric(&[("A", 1.0)]);
        let b = numeric(&[("A", 1.0), ("B", 2.0)]);
        assert!(!a.contains_same_mappings(&b));
        assert!(a.is_subset_of(&b));
        assert!(!b.is_subset_of(&a));
        let mut c = numeric(&[("A", 1.0)]);
        c.set_default(1.0);
        assert!(!a.contains_same_mappings(&c));
    }

    #[test]
    fn test_value_list() {
        let mut map = numeric(&[("M10", 1.5), ("M2", 2.0)]);
        map.set_default(-1.0);
        assert_eq!(map.value_list(), "<DEFAULT>=-1,M2=2,M10=1.5");
    }

    #[test]
    fn test_stored_default_key_becomes_default() {
        let map: NumericMap = serde_json::from_value(serde_json::json!({
            "name": "m",
            "kind": "Motif",
            "default_value": 1.0,
            "overrides": {"<DEFAULT>": 5.0, "M1": 2.0}
        }))
        .unwrap();
        assert_eq!(map.get_default(), 5.0);
        assert!(!map.is_explicitly_set(DEFAULT_KEY));
        assert_eq!(map.assigned_keys(), vec!["M1"]);
        assert_eq!(map.get("M2"), 5.0);
    }

    proptest! {
        #[test]
        fn prop_rank_ties_and_gaps(values in prop::collection::vec(0i32..6, 0..30), ascending: bool) {
            let mut map = NumericMap::new("p", EntityKind::Sequence);
            for (i, v) in values.iter().enumerate() {
                map.set(&format!("s{i}"), *v as f64);
            }
            let ranks = map.rank_order(ascending);
            prop_assert_eq!(ranks.len(), values.len());
            for (i, vi) in values.iter().enumerate() {
                let ri = ranks[&format!("s{i}")];
                let before = values
                    .iter()
                    .filter(|vj| if ascending { *vj < vi } else { *vj > vi })
                    .count();
                prop_assert_eq!(ri, before + 1);
            }
        }

        #[test]
        fn prop_default_override(keys in prop::collection::vec("[a-z]{1,3}", 0..12), lookup in "[a-z]{1,3}") {
            let mut map = NumericMap::with_default("p", EntityKind::Motif, -1.0);
            for (i, k) in keys.iter().enumerate() {
                map.set(k, i as f64);
                prop_assert_eq!(map.get(k), i as f64);
            }
            if !map.is_explicitly_set(&lookup) {
                prop_assert_eq!(map.get(&lookup), -1.0);
            }
            map.clear();
            for k in &keys {
                prop_assert_eq!(map.get(k), -1.0);
            }
        }
    }
}
