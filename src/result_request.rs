//! Named results derived from an entity map: `top:10`, `bottom:5% in Up`,
//! `rank ascending`, `assigned entries`, `value:3`, an entity name, ...
//!
//! A request string is parsed once into a [`ResultRequest`] and then
//! resolved against a map. Nothing is built unless the whole request
//! resolves.

use crate::{
    entity::{DEFAULT_KEY, EntityCollection},
    entity_map::{EntityMap, MapValue, NumericMap, SelectionSize},
    error::{MapError, Result},
    workspace::EntityCatalog,
};
use serde::Serialize;
use std::cmp::Ordering;

const IN_COLLECTION: &str = " in ";

#[derive(Debug, Clone, PartialEq)]
pub enum ResultRequest {
    Default,
    Select {
        want_top: bool,
        size: SelectionSize,
        collection: Option<String>,
    },
    ExtremeValue {
        want_top: bool,
        collection: Option<String>,
    },
    Rank {
        ascending: bool,
    },
    Assigned,
    Unassigned,
    Positive,
    Negative,
    Zero,
    ValueEquals(String),
    Entity(String),
}

#[derive(Debug, Clone, Serialize)]
pub enum ResultValue<V> {
    Scalar(V),
    Collection(EntityCollection),
    Map(NumericMap),
}

fn split_collection(text: &str) -> Result<(&str, Option<String>)> {
    match text.split_once(IN_COLLECTION) {
        Some((head, collection)) => {
            let collection = collection.trim();
            if collection.is_empty() {
                return Err(MapError::parse(text, "missing collection name"));
            }
            Ok((head.trim(), Some(collection.to_string())))
        }
        None => Ok((text.trim(), None)),
    }
}

fn parse_size(text: &str) -> Result<SelectionSize> {
    let bad = || MapError::parse(text, "expected a count or a percentage");
    match text.strip_suffix('%') {
        Some(percent) => {
            let p: f64 = percent.trim().parse().map_err(|_| bad())?;
            if !p.is_finite() || p < 0.0 {
                return Err(bad());
            }
            Ok(SelectionSize::Percent(p))
        }
        None => text.parse().map(SelectionSize::Count).map_err(|_| bad()),
    }
}

impl ResultRequest {
    pub fn parse(request: &str) -> Result<Self> {
        let ret = match request {
            DEFAULT_KEY => ResultRequest::Default,
            "rank ascending" => ResultRequest::Rank { ascending: true },
            "rank descending" => ResultRequest::Rank { ascending: false },
            "assigned entries" => ResultRequest::Assigned,
            "unassigned entries" => ResultRequest::Unassigned,
            "positive entries" => ResultRequest::Positive,
            "negative entries" => ResultRequest::Negative,
            "zero-valued entries" => ResultRequest::Zero,
            _ => {
                if let Some(value) = request.strip_prefix("value:") {
                    return Ok(ResultRequest::ValueEquals(value.to_string()));
                }
                for (prefix, want_top) in [("top:", true), ("bottom:", false)] {
                    if let Some(rest) = request.strip_prefix(prefix) {
                        let (size, collection) = split_collection(rest)?;
                        return Ok(ResultRequest::Select {
                            want_top,
                            size: parse_size(size)?,
                            collection,
                        });
                    }
                }
                for (prefix, want_top) in [("top value", true), ("bottom value", false)] {
                    if let Some(rest) = request.strip_prefix(prefix) {
                        if rest.is_empty() {
                            return Ok(ResultRequest::ExtremeValue {
                                want_top,
                                collection: None,
                            });
                        }
                        if rest.starts_with(IN_COLLECTION) {
                            let (_, collection) = split_collection(rest)?;
                            return Ok(ResultRequest::ExtremeValue {
                                want_top,
                                collection,
                            });
                        }
                    }
                }
                ResultRequest::Entity(request.to_string())
            }
        };
        Ok(ret)
    }

    /// Resolves against `map`. `request` is the original text and names
    /// produced collections and rank maps.
    pub fn resolve<V: MapValue>(
        &self,
        request: &str,
        map: &EntityMap<V>,
        catalog: &dyn EntityCatalog,
    ) -> Result<ResultValue<V>> {
        let kind = map.kind();
        let collection_of =
            |members: Vec<String>| ResultValue::Collection(EntityCollection::new(request, kind, members));
        let universe = || catalog.universe(kind, None);
        let signed = |wanted: Ordering| -> Result<ResultValue<V>> {
            if !V::NUMERIC {
                return Err(MapError::no_such_result(request));
            }
            let members = map.matching_entries(|v| v.signum() == Some(wanted), &universe()?);
            Ok(collection_of(members))
        };
        match self {
            ResultRequest::Default => Ok(ResultValue::Scalar(map.get_default())),
            ResultRequest::Select {
                want_top,
                size,
                collection,
            } => {
                let candidates = catalog.universe(kind, collection.as_deref())?;
                Ok(collection_of(map.top_or_bottom(*size, *want_top, &candidates)))
            }
            ResultRequest::ExtremeValue {
                want_top,
                collection,
            } => {
                let candidates = catalog.universe(kind, collection.as_deref())?;
                Ok(ResultValue::Scalar(map.extreme_value(*want_top, &candidates)))
            }
            ResultRequest::Rank { ascending } => {
                let mut ranks = map.rank_map(*ascending);
                ranks.set_name(request);
                Ok(ResultValue::Map(ranks))
            }
            ResultRequest::Assigned => Ok(collection_of(map.assigned_keys())),
            ResultRequest::Unassigned => {
                let members = universe()?
                    .into_iter()
                    .filter(|key| !map.is_explicitly_set(key))
                    .collect();
                Ok(collection_of(members))
            }
            ResultRequest::Positive => signed(Ordering::Greater),
            ResultRequest::Negative => signed(Ordering::Less),
            ResultRequest::Zero => signed(Ordering::Equal),
            ResultRequest::ValueEquals(text) => {
                let wanted = V::parse_value(text)?;
                let members = map.matching_entries(|v| *v == wanted, &universe()?);
                Ok(collection_of(members))
            }
            ResultRequest::Entity(name) => {
                let known = map.domain().validate_key(name)
                    && (catalog.has_entity(kind, name) || map.is_explicitly_set(name));
                if known {
                    Ok(ResultValue::Scalar(map.get(name)))
                } else {
                    Err(MapError::no_such_result(request))
                }
            }
        }
    }
}

/// Parses and resolves `request` against `map` in one step.
pub fn resolve_result<V: MapValue>(
    map: &EntityMap<V>,
    request: &str,
    catalog: &dyn EntityCatalog,
) -> Result<ResultValue<V>> {
    ResultRequest::parse(request)?.resolve(request, map, catalog)
}
