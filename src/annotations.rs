//! Annotation Handlers
//!
//! Explicit registration table mapping `(declaration kind, annotation name)`
//! to a handler. Handlers are pure: they read the annotation arguments, the
//! declaration graph and the facts recorded so far, and return the state
//! deltas to apply. The pipeline applies the deltas in walk order, so a
//! handler that reads earlier facts (`@copyParent`, `@copyKeys`) sees exactly
//! what was declared before it.

use fuzzy_matcher::skim::SkimMatcherV2;
use fuzzy_matcher::FuzzyMatcher;
use serde_json::Value;
use std::collections::HashMap;
use std::str::FromStr;

use crate::decl::{AnnotationUse, DeclKind, DeclRef, DeclarationGraph, ModelId, PropertyId, TypeRef};
use crate::diagnostics::{DiagnosticCode, DiagnosticItem, Diagnostics};
use crate::error::{EmitError, Result};
use crate::state::{Fact, KeyCategory, StateKey, StateStore, StreamMode};

// =============================================================================
// Deltas
// =============================================================================

/// A single state change produced by a handler
#[derive(Debug, Clone, PartialEq)]
pub enum StateDelta {
    /// Record `fact` for `decl` in the map named by `key`
    Set { key: StateKey, decl: DeclRef, fact: Fact },
    /// Copy `source` onto `target`, tagging the copy with `category`
    MaterializeProperty {
        target: ModelId,
        source: PropertyId,
        category: Option<KeyCategory>,
    },
}

impl StateDelta {
    fn set(key: StateKey, decl: DeclRef, fact: Fact) -> Self {
        Self::Set { key, decl, fact }
    }
}

/// What a handler gets to look at
pub struct HandlerInput<'a> {
    pub target: DeclRef,
    pub name: &'a str,
    pub args: &'a [Value],
    pub graph: &'a DeclarationGraph,
    pub state: &'a StateStore,
}

/// Handler signature. Diagnostics is a write-only sink for authoring notes.
pub type Handler = fn(&HandlerInput<'_>, &mut Diagnostics) -> Result<Vec<StateDelta>>;

// =============================================================================
// Registry
// =============================================================================

/// Registration table of annotation handlers
#[derive(Clone, Default)]
pub struct AnnotationRegistry {
    handlers: HashMap<(DeclKind, String), Handler>,
}

impl AnnotationRegistry {
    /// A registry with no handlers
    pub fn empty() -> Self {
        Self::default()
    }

    /// A registry with every built-in annotation
    pub fn builtin() -> Self {
        let mut registry = Self::empty();

        registry.register(DeclKind::Namespace, "package", package);
        registry.register(DeclKind::Interface, "service", service);
        registry.register(DeclKind::Model, "message", message);
        registry.register(DeclKind::Model, "external", external);
        registry.register(DeclKind::Scalar, "map", map);
        registry.register(DeclKind::Operation, "stream", stream);
        registry.register(DeclKind::Model, "move", move_to);
        registry.register(DeclKind::Model, "parent", parent);
        registry.register(DeclKind::Model, "copyParent", copy_parent);
        registry.register(DeclKind::Model, "base", base);
        registry.register(DeclKind::Model, "autoChanges", auto_changes);
        registry.register(DeclKind::Model, "copyKeys", copy_keys);
        registry.register(DeclKind::Property, "primaryKey", primary_key);
        registry.register(DeclKind::Property, "foreignKey", foreign_key);
        registry.register(DeclKind::Property, "normalKey", normal_key);
        registry.register(DeclKind::Property, "field", field);

        for kind in [
            DeclKind::Namespace,
            DeclKind::Model,
            DeclKind::Property,
            DeclKind::Scalar,
            DeclKind::Interface,
            DeclKind::Operation,
        ] {
            registry.register(kind, "options", options);
        }

        registry
    }

    /// Register (or replace) a handler
    pub fn register(&mut self, kind: DeclKind, name: &str, handler: Handler) {
        self.handlers.insert((kind, name.to_string()), handler);
    }

    pub fn lookup(&self, kind: DeclKind, name: &str) -> Option<Handler> {
        self.handlers.get(&(kind, name.to_string())).copied()
    }

    /// Closest registered name for `kind`, for "did you mean" hints
    pub fn suggest(&self, kind: DeclKind, name: &str) -> Option<&str> {
        let matcher = SkimMatcherV2::default();
        self.handlers
            .keys()
            .filter(|(k, _)| *k == kind)
            .filter_map(|(_, candidate)| {
                matcher
                    .fuzzy_match(candidate, name)
                    .map(|score| (score, candidate.as_str()))
            })
            .max_by(|a, b| a.0.cmp(&b.0).then_with(|| b.1.cmp(a.1)))
            .map(|(_, candidate)| candidate)
    }

    /// Run the handler for one annotation application
    pub fn apply(
        &self,
        annotation: &AnnotationUse,
        graph: &DeclarationGraph,
        state: &StateStore,
        diagnostics: &mut Diagnostics,
    ) -> Result<Vec<StateDelta>> {
        let kind = annotation.target.kind();
        let Some(handler) = self.lookup(kind, &annotation.name) else {
            let mut item = DiagnosticItem::new(
                graph.describe(annotation.target),
                DiagnosticCode::UnknownAnnotation,
                format!("@{} is not defined for a {}", annotation.name, kind),
            );
            if let Some(hint) = self.suggest(kind, &annotation.name) {
                item = item.with_context(format!("did you mean @{}?", hint));
            }
            diagnostics.push(item);
            return Ok(Vec::new());
        };

        let input = HandlerInput {
            target: annotation.target,
            name: &annotation.name,
            args: &annotation.args,
            graph,
            state,
        };
        handler(&input, diagnostics)
    }
}

impl std::fmt::Debug for AnnotationRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<_> = self.handlers.keys().collect();
        names.sort();
        f.debug_struct("AnnotationRegistry").field("handlers", &names).finish()
    }
}

// =============================================================================
// Argument helpers
// =============================================================================

impl HandlerInput<'_> {
    fn arg(&self, idx: usize) -> Result<&Value> {
        self.args
            .get(idx)
            .ok_or_else(|| EmitError::invalid_argument(self.name, format!("missing argument {}", idx + 1)))
    }

    fn str_arg(&self, idx: usize) -> Result<&str> {
        self.arg(idx)?
            .as_str()
            .ok_or_else(|| EmitError::invalid_argument(self.name, format!("argument {} must be a string", idx + 1)))
    }

    fn model_arg(&self, idx: usize) -> Result<ModelId> {
        let path = self.str_arg(idx)?;
        self.graph
            .find_model(path)
            .ok_or_else(|| EmitError::UnresolvedReference {
                reference: path.to_string(),
                context: format!("@{} on {}", self.name, self.graph.describe(self.target)),
            })
    }

    fn type_arg(&self, idx: usize) -> Result<TypeRef> {
        let name = self.str_arg(idx)?;
        self.graph
            .resolve_type(name)
            .ok_or_else(|| EmitError::UnresolvedReference {
                reference: name.to_string(),
                context: format!("@{} on {}", self.name, self.graph.describe(self.target)),
            })
    }

    /// A list argument; a missing argument is an empty list
    fn list_arg(&self, idx: usize) -> Result<Vec<Value>> {
        match self.args.get(idx) {
            None => Ok(Vec::new()),
            Some(Value::Array(items)) => Ok(items.clone()),
            Some(_) => Err(EmitError::invalid_argument(
                self.name,
                format!("argument {} must be a list", idx + 1),
            )),
        }
    }

    fn model_target(&self) -> Result<ModelId> {
        self.target
            .as_model()
            .ok_or_else(|| EmitError::invalid_argument(self.name, "target must be a model"))
    }

    fn set(&self, key: StateKey, fact: Fact) -> Vec<StateDelta> {
        vec![StateDelta::set(key, self.target, fact)]
    }

    fn describe_target(&self) -> String {
        self.graph.describe(self.target)
    }
}

// =============================================================================
// Markers
// =============================================================================

fn package(input: &HandlerInput<'_>, _: &mut Diagnostics) -> Result<Vec<StateDelta>> {
    let name = match input.args.first() {
        None | Some(Value::Null) => None,
        Some(Value::String(name)) => Some(name.clone()),
        Some(Value::Object(details)) => details.get("name").and_then(Value::as_str).map(str::to_string),
        Some(_) => return Err(EmitError::invalid_argument("package", "expected a name or details object")),
    };
    Ok(input.set(StateKey::Package, Fact::Package { name }))
}

fn service(input: &HandlerInput<'_>, _: &mut Diagnostics) -> Result<Vec<StateDelta>> {
    Ok(input.set(StateKey::Service, Fact::Service))
}

fn message(input: &HandlerInput<'_>, _: &mut Diagnostics) -> Result<Vec<StateDelta>> {
    Ok(input.set(StateKey::Message, Fact::Message))
}

// =============================================================================
// Bindings
// =============================================================================

/// `@external(path, name)`: only meaningful on template instances
fn external(input: &HandlerInput<'_>, diagnostics: &mut Diagnostics) -> Result<Vec<StateDelta>> {
    let model = input.model_target()?;
    if input.graph.model(model).source_model.is_none() {
        diagnostics.report(
            input.describe_target(),
            DiagnosticCode::ExternalOnNonTemplate,
            "@external ignored: model is not a template instance",
        );
        return Ok(Vec::new());
    }

    let path = input.str_arg(0)?.to_string();
    let name = input.str_arg(1)?.to_string();
    Ok(input.set(StateKey::External, Fact::ExternalBinding { path, name }))
}

/// `@map(key, value)` on an associative-container scalar
fn map(input: &HandlerInput<'_>, _: &mut Diagnostics) -> Result<Vec<StateDelta>> {
    let key = input.type_arg(0)?;
    let value = input.type_arg(1)?;
    Ok(input.set(StateKey::ScalarMap, Fact::ScalarMap { key, value }))
}

fn stream(input: &HandlerInput<'_>, _: &mut Diagnostics) -> Result<Vec<StateDelta>> {
    let mode = StreamMode::from_str(input.str_arg(0)?)
        .map_err(|reason| EmitError::invalid_argument("stream", reason))?;
    Ok(input.set(StateKey::Stream, Fact::StreamMode(mode)))
}

/// `@move(namespace)`. An unknown target leaves the model where it is.
fn move_to(input: &HandlerInput<'_>, diagnostics: &mut Diagnostics) -> Result<Vec<StateDelta>> {
    input.model_target()?;
    let target = input.str_arg(0)?;
    let Some(ns) = input.graph.find_namespace(target) else {
        diagnostics.report(
            input.describe_target(),
            DiagnosticCode::DanglingMoveTarget,
            format!("@move target '{}' does not exist; model stays in place", target),
        );
        return Ok(Vec::new());
    };
    Ok(input.set(StateKey::Move, Fact::NamespaceMove(ns)))
}

fn field(input: &HandlerInput<'_>, _: &mut Diagnostics) -> Result<Vec<StateDelta>> {
    let number = input
        .arg(0)?
        .as_u64()
        .and_then(|n| u32::try_from(n).ok())
        .ok_or_else(|| EmitError::invalid_argument("field", "field number must be a non-negative integer"))?;
    Ok(input.set(StateKey::FieldNumber, Fact::FieldNumber(number)))
}

fn options(input: &HandlerInput<'_>, _: &mut Diagnostics) -> Result<Vec<StateDelta>> {
    Ok(input.set(StateKey::Options, Fact::CustomOptions(input.list_arg(0)?)))
}

// =============================================================================
// Entity facts
// =============================================================================

fn parent(input: &HandlerInput<'_>, _: &mut Diagnostics) -> Result<Vec<StateDelta>> {
    input.model_target()?;
    let parent = input.model_arg(0)?;
    Ok(input.set(StateKey::Parent, Fact::ParentLink(parent)))
}

/// `@copyParent(base)`: one hop only, and only if `base`'s parent is
/// already recorded
fn copy_parent(input: &HandlerInput<'_>, diagnostics: &mut Diagnostics) -> Result<Vec<StateDelta>> {
    input.model_target()?;
    let base = input.model_arg(0)?;
    match input.state.parent_of(base) {
        Some(parent) => Ok(input.set(StateKey::Parent, Fact::ParentLink(parent))),
        None => {
            diagnostics.report(
                input.describe_target(),
                DiagnosticCode::CopyParentMissing,
                format!(
                    "@copyParent: {} has no parent recorded yet",
                    input.graph.describe(DeclRef::Model(base))
                ),
            );
            Ok(Vec::new())
        }
    }
}

fn base(input: &HandlerInput<'_>, _: &mut Diagnostics) -> Result<Vec<StateDelta>> {
    input.model_target()?;
    let base = input.model_arg(0)?;
    Ok(input.set(StateKey::Base, Fact::EntityBase(base)))
}

fn auto_changes(input: &HandlerInput<'_>, _: &mut Diagnostics) -> Result<Vec<StateDelta>> {
    input.model_target()?;
    Ok(input.set(StateKey::AutoChanges, Fact::AutoChanges(input.list_arg(0)?)))
}

// =============================================================================
// Keys
// =============================================================================

fn primary_key(input: &HandlerInput<'_>, _: &mut Diagnostics) -> Result<Vec<StateDelta>> {
    Ok(input.set(StateKey::Keys, Fact::Key(KeyCategory::Primary)))
}

fn foreign_key(input: &HandlerInput<'_>, _: &mut Diagnostics) -> Result<Vec<StateDelta>> {
    Ok(input.set(StateKey::Keys, Fact::Key(KeyCategory::Foreign)))
}

fn normal_key(input: &HandlerInput<'_>, _: &mut Diagnostics) -> Result<Vec<StateDelta>> {
    Ok(input.set(StateKey::NormalKey, Fact::NormalKey))
}

/// How `@copyKeys` re-tags a copied key property
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum KeyRemap {
    Foreign,
    Primary,
    /// Do not copy the property
    Omit,
    /// Copy without a key tag
    None,
}

impl FromStr for KeyRemap {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "foreign" => Ok(Self::Foreign),
            "primary" => Ok(Self::Primary),
            "omit" => Ok(Self::Omit),
            "none" => Ok(Self::None),
            other => Err(format!("unknown key remap '{}'", other)),
        }
    }
}

/// `@copyKeys` options; absent entries preserve the source category
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CopyKeysOptions {
    pub primary: Option<KeyRemap>,
    pub foreign: Option<KeyRemap>,
}

impl CopyKeysOptions {
    fn from_value(value: Option<&Value>) -> Result<Self> {
        let Some(value) = value.filter(|v| !v.is_null()) else {
            return Ok(Self::default());
        };
        let object = value
            .as_object()
            .ok_or_else(|| EmitError::invalid_argument("copyKeys", "options must be an object"))?;

        let remap = |key: &str| -> Result<Option<KeyRemap>> {
            match object.get(key) {
                None | Some(Value::Null) => Ok(None),
                Some(Value::String(s)) => KeyRemap::from_str(s)
                    .map(Some)
                    .map_err(|reason| EmitError::invalid_argument("copyKeys", reason)),
                Some(_) => Err(EmitError::invalid_argument("copyKeys", format!("'{}' must be a string", key))),
            }
        };

        Ok(Self {
            primary: remap("primary")?,
            foreign: remap("foreign")?,
        })
    }

    /// Tag to give a copy of a property tagged `category`; `None` drops it
    pub fn resolve(&self, category: KeyCategory) -> Option<Option<KeyCategory>> {
        let remap = match category {
            KeyCategory::Primary => self.primary.unwrap_or(KeyRemap::Primary),
            KeyCategory::Foreign => self.foreign.unwrap_or(KeyRemap::Foreign),
        };
        match remap {
            KeyRemap::Primary => Some(Some(KeyCategory::Primary)),
            KeyRemap::Foreign => Some(Some(KeyCategory::Foreign)),
            KeyRemap::None => Some(None),
            KeyRemap::Omit => None,
        }
    }
}

/// `@copyKeys(source, options?)`
fn copy_keys(input: &HandlerInput<'_>, _: &mut Diagnostics) -> Result<Vec<StateDelta>> {
    let target = input.model_target()?;
    let source = input.model_arg(0)?;
    let opts = CopyKeysOptions::from_value(input.args.get(1))?;

    let deltas = input
        .graph
        .properties_of(source)
        .filter_map(|(prop, _)| {
            let category = input.state.key_category(prop)?;
            let tag = opts.resolve(category)?;
            Some(StateDelta::MaterializeProperty {
                target,
                source: prop,
                category: tag,
            })
        })
        .collect();
    Ok(deltas)
}
