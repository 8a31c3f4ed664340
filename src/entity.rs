//! Entity kinds, key domains and named groupings of entities.

use serde::{Deserialize, Serialize};
use std::{collections::BTreeMap, fmt};

/// Reserved list/result key addressing a map's default value.
pub const DEFAULT_KEY: &str = "<DEFAULT>";

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum EntityKind {
    Sequence,
    Motif,
    Module,
}

impl EntityKind {
    pub fn singular(&self) -> &'static str {
        match self {
            EntityKind::Sequence => "sequence",
            EntityKind::Motif => "motif",
            EntityKind::Module => "module",
        }
    }

    pub fn plural(&self) -> &'static str {
        match self {
            EntityKind::Sequence => "sequences",
            EntityKind::Motif => "motifs",
            EntityKind::Module => "modules",
        }
    }
}

impl fmt::Display for EntityKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.singular())
    }
}

fn is_sequence_name(key: &str) -> bool {
    !key.is_empty()
        && key
            .chars()
            .all(|c| c.is_ascii_alphanumeric() || c == '_' || c == '-' || c == '.')
}

fn is_feature_name(key: &str) -> bool {
    !key.is_empty()
        && key != DEFAULT_KEY
        && key.trim() == key
        && !key.contains("->")
        && !key.chars().any(|c| matches!(c, ',' | '=' | '*' | ':'))
}

/// Per-kind configuration of an entity map: the kind whose catalog supplies
/// the universe, and which names are acceptable keys.
#[derive(Clone, Copy)]
pub struct KeyDomain {
    kind: EntityKind,
    is_valid_key: fn(&str) -> bool,
}

impl KeyDomain {
    pub const SEQUENCES: KeyDomain = KeyDomain {
        kind: EntityKind::Sequence,
        is_valid_key: is_sequence_name,
    };
    pub const MOTIFS: KeyDomain = KeyDomain {
        kind: EntityKind::Motif,
        is_valid_key: is_feature_name,
    };
    pub const MODULES: KeyDomain = KeyDomain {
        kind: EntityKind::Module,
        is_valid_key: is_feature_name,
    };

    pub fn for_kind(kind: EntityKind) -> Self {
        match kind {
            EntityKind::Sequence => Self::SEQUENCES,
            EntityKind::Motif => Self::MOTIFS,
            EntityKind::Module => Self::MODULES,
        }
    }

    #[inline(always)]
    pub fn kind(&self) -> EntityKind {
        self.kind
    }

    pub fn validate_key(&self, key: &str) -> bool {
        key != DEFAULT_KEY && (self.is_valid_key)(key)
    }
}

impl fmt::Debug for KeyDomain {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("KeyDomain").field("kind", &self.kind).finish()
    }
}

/// An ordered, named set of entities of one kind.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityCollection {
    pub name: String,
    pub kind: EntityKind,
    pub members: Vec<String>,
}

impl EntityCollection {
    pub fn new(name: &str, kind: EntityKind, members: Vec<String>) -> Self {
        let mut ret = Self {
            name: name.to_string(),
            kind,
            members: Vec::with_capacity(members.len()),
        };
        for member in members {
            ret.add(member);
        }
        ret
    }

    pub fn add(&mut self, member: String) {
        if !self.contains(&member) {
            self.members.push(member);
        }
    }

    pub fn contains(&self, member: &str) -> bool {
        self.members.iter().any(|m| m == member)
    }

    #[inline(always)]
    pub fn len(&self) -> usize {
        self.members.len()
    }

    #[inline(always)]
    pub fn is_empty(&self) -> bool {
        self.members.is_empty()
    }
}

/// Assignment of entities of one kind into named clusters.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Partition {
    pub name: String,
    pub kind: Option<EntityKind>,
    #[serde(default)]
    pub clusters: BTreeMap<String, Vec<String>>,
}

impl Partition {
    pub fn new(name: &str, kind: EntityKind) -> Self {
        Self {
            name: name.to_string(),
            kind: Some(kind),
            clusters: BTreeMap::new(),
        }
    }

    /// Moves `member` into `cluster`, removing it from any other cluster.
    pub fn assign(&mut self, member: &str, cluster: &str) {
        for members in self.clusters.values_mut() {
            members.retain(|m| m != member);
        }
        self.clusters
            .entry(cluster.to_string())
            .or_default()
            .push(member.to_string());
        self.clusters.retain(|_, members| !members.is_empty());
    }

    pub fn cluster(&self, name: &str) -> Option<&[String]> {
        self.clusters.get(name).map(|v| v.as_slice())
    }
}
