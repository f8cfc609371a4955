//! Declarative State Store
//!
//! Run-scoped fact maps keyed by declaration. Each map has a name; every
//! caller asking for the same name gets the same map, so independently
//! written annotation modules can share facts. The store is an ordinary
//! value threaded through the pipeline, one per compilation run.
//!
//! Facts are written during the declare phase and only read afterwards.
//! Writing a fact twice for the same declaration keeps the last value.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::str::FromStr;

use crate::decl::{DeclRef, ModelId, NamespaceId, OperationId, PropertyId, ScalarId, TypeRef};

// =============================================================================
// Facts
// =============================================================================

/// Streaming direction of an operation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum StreamMode {
    #[default]
    None,
    In,
    Out,
    Duplex,
}

impl FromStr for StreamMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "none" => Ok(Self::None),
            "in" => Ok(Self::In),
            "out" => Ok(Self::Out),
            "duplex" => Ok(Self::Duplex),
            other => Err(format!("unknown stream mode '{}'", other)),
        }
    }
}

/// Category a property is tagged with by `@primaryKey` / `@foreignKey`
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum KeyCategory {
    Primary,
    Foreign,
}

/// One recorded fact about a declaration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum Fact {
    /// Namespace is an emitted package
    Package { name: Option<String> },
    /// Interface is an emitted service
    Service,
    /// Model is an emitted message
    Message,
    ExternalBinding { path: String, name: String },
    ScalarMap { key: TypeRef, value: TypeRef },
    StreamMode(StreamMode),
    NamespaceMove(NamespaceId),
    ParentLink(ModelId),
    EntityBase(ModelId),
    AutoChanges(Vec<serde_json::Value>),
    Key(KeyCategory),
    NormalKey,
    FieldNumber(u32),
    CustomOptions(Vec<serde_json::Value>),
}

// =============================================================================
// Keys
// =============================================================================

/// Names of the maps the built-in annotations write to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum StateKey {
    Package,
    Service,
    Message,
    External,
    ScalarMap,
    Stream,
    Move,
    Parent,
    Base,
    AutoChanges,
    Keys,
    NormalKey,
    FieldNumber,
    Options,
}

impl StateKey {
    pub const ALL: [StateKey; 14] = [
        Self::Package,
        Self::Service,
        Self::Message,
        Self::External,
        Self::ScalarMap,
        Self::Stream,
        Self::Move,
        Self::Parent,
        Self::Base,
        Self::AutoChanges,
        Self::Keys,
        Self::NormalKey,
        Self::FieldNumber,
        Self::Options,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Package => "apimeta.package",
            Self::Service => "apimeta.service",
            Self::Message => "apimeta.message",
            Self::External => "apimeta.external",
            Self::ScalarMap => "apimeta.map",
            Self::Stream => "apimeta.stream",
            Self::Move => "apimeta.move",
            Self::Parent => "apimeta.parent",
            Self::Base => "apimeta.base",
            Self::AutoChanges => "apimeta.autoChanges",
            Self::Keys => "apimeta.keys",
            Self::NormalKey => "apimeta.normalKey",
            Self::FieldNumber => "apimeta.field",
            Self::Options => "apimeta.options",
        }
    }
}

// =============================================================================
// Maps
// =============================================================================

/// A single named fact map
#[derive(Debug, Clone, Default)]
pub struct StateMap {
    entries: BTreeMap<DeclRef, Fact>,
}

impl StateMap {
    /// Record a fact, replacing any previous one for `decl`
    pub fn set(&mut self, decl: DeclRef, fact: Fact) {
        self.entries.insert(decl, fact);
    }

    pub fn get(&self, decl: DeclRef) -> Option<&Fact> {
        self.entries.get(&decl)
    }

    pub fn contains(&self, decl: DeclRef) -> bool {
        self.entries.contains_key(&decl)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&DeclRef, &Fact)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// All fact maps for one compilation run
#[derive(Debug, Clone)]
pub struct StateStore {
    maps: HashMap<String, StateMap>,
}

impl Default for StateStore {
    fn default() -> Self {
        Self::new()
    }
}

impl StateStore {
    /// Create a store with every built-in map already present
    pub fn new() -> Self {
        let maps = StateKey::ALL
            .iter()
            .map(|key| (key.as_str().to_string(), StateMap::default()))
            .collect();
        Self { maps }
    }

    /// Get the map registered under `name`, creating it empty if needed
    pub fn state_map(&mut self, name: &str) -> &mut StateMap {
        self.maps.entry(name.to_string()).or_default()
    }

    /// Read-only view of a map, if anything ever created it
    pub fn map(&self, name: &str) -> Option<&StateMap> {
        self.maps.get(name)
    }

    pub fn set(&mut self, key: StateKey, decl: DeclRef, fact: Fact) {
        self.state_map(key.as_str()).set(decl, fact);
    }

    pub fn get(&self, key: StateKey, decl: DeclRef) -> Option<&Fact> {
        self.map(key.as_str())?.get(decl)
    }

    // ========== Typed accessors ==========

    /// Package name for a namespace carrying the package marker.
    /// `Some(None)` means marked without an explicit name.
    pub fn package(&self, ns: NamespaceId) -> Option<Option<&str>> {
        match self.get(StateKey::Package, DeclRef::Namespace(ns))? {
            Fact::Package { name } => Some(name.as_deref()),
            _ => None,
        }
    }

    pub fn is_service(&self, decl: DeclRef) -> bool {
        matches!(self.get(StateKey::Service, decl), Some(Fact::Service))
    }

    pub fn is_message(&self, model: ModelId) -> bool {
        matches!(self.get(StateKey::Message, DeclRef::Model(model)), Some(Fact::Message))
    }

    pub fn external_binding(&self, model: ModelId) -> Option<(&str, &str)> {
        match self.get(StateKey::External, DeclRef::Model(model))? {
            Fact::ExternalBinding { path, name } => Some((path, name)),
            _ => None,
        }
    }

    pub fn scalar_map(&self, scalar: ScalarId) -> Option<(&TypeRef, &TypeRef)> {
        match self.get(StateKey::ScalarMap, DeclRef::Scalar(scalar))? {
            Fact::ScalarMap { key, value } => Some((key, value)),
            _ => None,
        }
    }

    /// Stream mode of an operation; unannotated operations are unary
    pub fn stream_mode(&self, op: OperationId) -> StreamMode {
        match self.get(StateKey::Stream, DeclRef::Operation(op)) {
            Some(Fact::StreamMode(mode)) => *mode,
            _ => StreamMode::None,
        }
    }

    pub fn move_target(&self, model: ModelId) -> Option<NamespaceId> {
        match self.get(StateKey::Move, DeclRef::Model(model))? {
            Fact::NamespaceMove(ns) => Some(*ns),
            _ => None,
        }
    }

    pub fn parent_of(&self, model: ModelId) -> Option<ModelId> {
        match self.get(StateKey::Parent, DeclRef::Model(model))? {
            Fact::ParentLink(parent) => Some(*parent),
            _ => None,
        }
    }

    pub fn base_of(&self, model: ModelId) -> Option<ModelId> {
        match self.get(StateKey::Base, DeclRef::Model(model))? {
            Fact::EntityBase(base) => Some(*base),
            _ => None,
        }
    }

    pub fn auto_changes(&self, model: ModelId) -> Option<&[serde_json::Value]> {
        match self.get(StateKey::AutoChanges, DeclRef::Model(model))? {
            Fact::AutoChanges(list) => Some(list),
            _ => None,
        }
    }

    pub fn key_category(&self, prop: PropertyId) -> Option<KeyCategory> {
        match self.get(StateKey::Keys, DeclRef::Property(prop))? {
            Fact::Key(category) => Some(*category),
            _ => None,
        }
    }

    pub fn is_normal_key(&self, prop: PropertyId) -> bool {
        matches!(self.get(StateKey::NormalKey, DeclRef::Property(prop)), Some(Fact::NormalKey))
    }

    pub fn field_number(&self, prop: PropertyId) -> Option<u32> {
        match self.get(StateKey::FieldNumber, DeclRef::Property(prop))? {
            Fact::FieldNumber(n) => Some(*n),
            _ => None,
        }
    }

    pub fn custom_options(&self, decl: DeclRef) -> Option<&[serde_json::Value]> {
        match self.get(StateKey::Options, decl)? {
            Fact::CustomOptions(list) => Some(list),
            _ => None,
        }
    }
}
