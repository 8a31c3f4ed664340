//! Region-track aggregation: occurrence counts, frequencies and sequence
//! support per region type, optionally restricted to positions covered by a
//! second "within" track.

use crate::{
    constructor::FROM_TRACK,
    entity::{DEFAULT_KEY, EntityKind},
    entity_map::NumericMap,
    error::{MapError, ReferenceKind, Result},
    intervals::{Interval, flatten, is_contained},
    workspace::{EntityCatalog, TrackSource},
};
use serde::{Deserialize, Serialize};
use std::{
    collections::{BTreeMap, BTreeSet},
    fmt,
};
pub use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

pub const DEFAULT_CANCELLATION_CHECK_INTERVAL: usize = 100;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackProperty {
    TotalCount,
    Frequency,
    SequenceSupport,
}

impl TrackProperty {
    pub fn label(&self) -> &'static str {
        match self {
            TrackProperty::TotalCount => "total count",
            TrackProperty::Frequency => "frequency",
            TrackProperty::SequenceSupport => "sequence support",
        }
    }

    pub fn parse(text: &str) -> Result<Self> {
        match text.trim() {
            "total count" => Ok(TrackProperty::TotalCount),
            "frequency" => Ok(TrackProperty::Frequency),
            "sequence support" => Ok(TrackProperty::SequenceSupport),
            other => Err(MapError::parse(
                other,
                "expected 'total count', 'frequency' or 'sequence support'",
            )),
        }
    }
}

impl fmt::Display for TrackProperty {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.label())
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct AggregationProgress {
    pub sequences_done: usize,
    pub sequences_total: usize,
}

impl AggregationProgress {
    pub fn fraction(&self) -> f64 {
        if self.sequences_total == 0 {
            1.0
        } else {
            self.sequences_done as f64 / self.sequences_total as f64
        }
    }
}

/// What to aggregate. `sequences` names a sequence collection (all
/// sequences when `None`); `within` names a track whose regions restrict
/// which occurrences are counted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TrackAggregation {
    pub track: String,
    pub property: TrackProperty,
    #[serde(default)]
    pub sequences: Option<String>,
    #[serde(default)]
    pub within: Option<String>,
    #[serde(default = "default_label_kind")]
    pub kind: EntityKind,
}

fn default_label_kind() -> EntityKind {
    EntityKind::Motif
}

impl TrackAggregation {
    pub fn new(track: &str, property: TrackProperty) -> Self {
        Self {
            track: track.to_string(),
            property,
            sequences: None,
            within: None,
            kind: default_label_kind(),
        }
    }

    pub fn in_collection(mut self, collection: &str) -> Self {
        self.sequences = Some(collection.to_string());
        self
    }

    pub fn within(mut self, track: &str) -> Self {
        self.within = Some(track.to_string());
        self
    }

    /// Constructor parameters, e.g.
    /// `TFBS, property=sequence support, collection=Up, within=Promoters`.
    /// The default sequence collection is not mentioned.
    pub fn constructor_params(&self, default_collection: &str) -> String {
        let mut ret = format!("{}, property={}", self.track, self.property);
        if let Some(collection) = self
            .sequences
            .as_deref()
            .filter(|c| *c != default_collection)
        {
            ret += &format!(", collection={collection}");
        }
        if let Some(within) = &self.within {
            ret += &format!(", within={within}");
        }
        ret
    }

    pub fn parse_params(params: &str) -> Result<Self> {
        let mut parts = params.split(',').map(str::trim);
        let track = parts
            .next()
            .filter(|t| !t.is_empty() && !t.contains('='))
            .ok_or_else(|| MapError::parse(params, "missing track name"))?;
        let mut property = None;
        let mut ret = Self::new(track, TrackProperty::TotalCount);
        for part in parts {
            let (key, value) = part
                .split_once('=')
                .ok_or_else(|| MapError::parse(part, "expected key=value"))?;
            let value = value.trim();
            match key.trim() {
                "property" => property = Some(TrackProperty::parse(value)?),
                "collection" => ret.sequences = Some(value.to_string()),
                "within" => ret.within = Some(value.to_string()),
                other => return Err(MapError::parse(other, "unknown track parameter")),
            }
        }
        ret.property = property.ok_or_else(|| MapError::parse(params, "missing property"))?;
        Ok(ret)
    }
}

/// Walks a region track across a sequence collection.
pub struct TrackAggregator<'a, S: ?Sized> {
    source: &'a S,
    check_interval: usize,
    default_collection: String,
}

impl<'a, S> TrackAggregator<'a, S>
where
    S: EntityCatalog + TrackSource + ?Sized,
{
    pub fn new(source: &'a S) -> Self {
        Self {
            source,
            check_interval: DEFAULT_CANCELLATION_CHECK_INTERVAL,
            default_collection: crate::workbench::DEFAULT_SEQUENCE_COLLECTION.to_string(),
        }
    }

    /// Region occurrences processed between cancellation polls.
    pub fn check_interval(mut self, n: usize) -> Self {
        self.check_interval = n.max(1);
        self
    }

    pub fn default_collection(mut self, name: &str) -> Self {
        self.default_collection = name.to_string();
        self
    }

    pub fn run(&self, request: &TrackAggregation, cancel: &CancellationToken) -> Result<NumericMap> {
        self.run_with_progress(request, cancel, &mut |_| {})
    }

    /// Either returns the finished map or fails without any partial result.
    pub fn run_with_progress(
        &self,
        request: &TrackAggregation,
        cancel: &CancellationToken,
        on_progress: &mut dyn FnMut(AggregationProgress),
    ) -> Result<NumericMap> {
        if !self.source.has_track(&request.track) {
            return Err(MapError::reference(ReferenceKind::Track, &request.track));
        }
        if let Some(within) = &request.within {
            if !self.source.has_track(within) {
                return Err(MapError::reference(ReferenceKind::Track, within));
            }
        }
        let sequences = self
            .source
            .universe(EntityKind::Sequence, request.sequences.as_deref())?;

        let mut totals: BTreeMap<String, f64> = BTreeMap::new();
        let mut processed = 0usize;
        for (done, sequence) in sequences.iter().enumerate() {
            let length = self.source.sequence_length(sequence).ok_or_else(|| {
                MapError::reference(ReferenceKind::Entity(EntityKind::Sequence), sequence)
            })?;
            let cover = request.within.as_ref().map(|within| {
                let intervals: Vec<Interval> = self
                    .source
                    .regions(within, sequence)
                    .iter()
                    .map(|r| r.interval())
                    .collect();
                flatten(&intervals, length)
            });

            let mut seen = BTreeSet::new();
            for region in self.source.regions(&request.track, sequence) {
                processed += 1;
                if processed % self.check_interval == 0 && cancel.is_cancelled() {
                    warn!(track = %request.track, sequence = %sequence, "aggregation cancelled");
                    return Err(MapError::Cancelled);
                }
                if let Some(cover) = &cover {
                    if !is_contained(&region.interval(), cover) {
                        continue;
                    }
                }
                if region.region_type == DEFAULT_KEY {
                    continue;
                }
                match request.property {
                    TrackProperty::SequenceSupport => {
                        seen.insert(region.region_type);
                    }
                    TrackProperty::TotalCount | TrackProperty::Frequency => {
                        *totals.entry(region.region_type).or_insert(0.0) += 1.0;
                    }
                }
            }
            for label in seen {
                *totals.entry(label).or_insert(0.0) += 1.0;
            }

            if cancel.is_cancelled() {
                warn!(track = %request.track, sequence = %sequence, "aggregation cancelled");
                return Err(MapError::Cancelled);
            }
            let progress = AggregationProgress {
                sequences_done: done + 1,
                sequences_total: sequences.len(),
            };
            debug!(
                track = %request.track,
                sequence = %sequence,
                fraction = progress.fraction(),
                "sequence aggregated"
            );
            on_progress(progress);
        }

        if request.property == TrackProperty::Frequency {
            let sum: f64 = totals.values().sum();
            if sum > 0.0 {
                totals.values_mut().for_each(|v| *v /= sum);
            }
        }

        let mut map = NumericMap::with_default(&request.track, request.kind, 0.0);
        for (label, total) in &totals {
            map.set(label, *total);
        }
        map.set_constructor(
            FROM_TRACK,
            &request.constructor_params(&self.default_collection),
        );
        info!(
            track = %request.track,
            property = %request.property,
            labels = map.len(),
            sequences = sequences.len(),
            "track aggregation finished"
        );
        Ok(map)
    }
}
