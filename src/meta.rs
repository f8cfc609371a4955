//! Metadata Synthesis
//!
//! Derives the runtime metadata index (`meta.json`) from recorded facts
//! after closure and relocation. One entry per model that is a direct
//! member of a package namespace, keyed by `<package>.<display name>`.
//!
//! Base references are written as `<package>.<declared name>`, not with
//! the friendly name. Runtime consumers match these strings exactly, so
//! the asymmetry with the entry key stays.

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};

use crate::decl::{DeclRef, DeclarationGraph, ModelId, NamespaceId};
use crate::diagnostics::{DiagnosticCode, DiagnosticItem, Diagnostics};
use crate::error::{EmitError, Result};
use crate::state::StateStore;

// =============================================================================
// Entries
// =============================================================================

/// Metadata for one emitted type. Absent fields mean "not applicable".
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TypeMetadataEntry {
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub base: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub key: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub normal_keys: Option<Vec<String>>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub auto_changes: Option<Vec<serde_json::Value>>,
}

/// The full `meta.json` document
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct MetadataIndex {
    entries: BTreeMap<String, TypeMetadataEntry>,
}

impl MetadataIndex {
    pub fn get(&self, type_name: &str) -> Option<&TypeMetadataEntry> {
        self.entries.get(type_name)
    }

    pub fn iter(&self) -> impl Iterator<Item = (&String, &TypeMetadataEntry)> {
        self.entries.iter()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn to_json_pretty(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write `<output_dir>/<file_name>`, creating the directory if needed
    pub fn write_to(&self, output_dir: &Path, file_name: &str) -> Result<PathBuf> {
        fs::create_dir_all(output_dir).map_err(|e| EmitError::io(output_dir, e))?;
        let path = output_dir.join(file_name);
        let mut json = self.to_json_pretty()?;
        json.push('\n');
        fs::write(&path, json).map_err(|e| EmitError::io(&path, e))?;
        Ok(path)
    }
}

// =============================================================================
// Key Index
// =============================================================================

/// Key property name per keyed model.
///
/// Template instances without a key of their own share the key of the
/// template they were instantiated from.
#[derive(Debug, Clone, Default)]
pub struct KeyIndex {
    keys: HashMap<ModelId, String>,
}

impl KeyIndex {
    pub fn build(graph: &DeclarationGraph) -> Self {
        let mut keys = HashMap::new();

        for model in graph.model_ids() {
            if let Some((_, prop)) = graph.properties_of(model).find(|(_, p)| p.is_key) {
                keys.insert(model, prop.name.clone());
            }
        }

        for model in graph.model_ids() {
            if keys.contains_key(&model) {
                continue;
            }
            let inherited = graph
                .model(model)
                .template
                .and_then(|template| keys.get(&template).cloned());
            if let Some(name) = inherited {
                keys.insert(model, name);
            }
        }

        Self { keys }
    }

    pub fn key_of(&self, model: ModelId) -> Option<&str> {
        self.keys.get(&model).map(String::as_str)
    }
}

// =============================================================================
// Synthesis
// =============================================================================

/// Package name of a marked namespace: explicit name or the namespace path
pub fn package_name(graph: &DeclarationGraph, state: &StateStore, ns: NamespaceId) -> Option<String> {
    match state.package(ns)? {
        Some(name) => Some(name.to_string()),
        None => Some(graph.namespace_full_name(ns)),
    }
}

/// Qualifier for a model's references: nearest enclosing package, else the
/// namespace path
fn qualifier(graph: &DeclarationGraph, state: &StateStore, model: ModelId) -> Option<String> {
    let ns = graph.model(model).namespace?;
    let mut current = Some(ns);
    while let Some(id) = current {
        if let Some(name) = package_name(graph, state, id) {
            return Some(name);
        }
        current = graph.namespace(id).parent;
    }
    Some(graph.namespace_full_name(ns))
}

fn qualify(prefix: Option<String>, name: &str) -> String {
    match prefix {
        Some(prefix) if !prefix.is_empty() => format!("{}.{}", prefix, name),
        _ => name.to_string(),
    }
}

/// Build the metadata entry for one model
pub fn entry_for(graph: &DeclarationGraph, state: &StateStore, keys: &KeyIndex, model: ModelId) -> TypeMetadataEntry {
    let mut entry = TypeMetadataEntry {
        auto_changes: state.auto_changes(model).map(<[_]>::to_vec),
        ..Default::default()
    };

    match state.base_of(model) {
        Some(base) if base != model => {
            let declared = &graph.model(base).name;
            entry.base = Some(qualify(qualifier(graph, state, base), declared));
        }
        // Own base, or no inheritance chain recorded at all
        _ => {
            entry.key = keys.key_of(model).map(str::to_string);
            let normal: Vec<String> = graph
                .properties_of(model)
                .filter(|(id, _)| state.is_normal_key(*id))
                .map(|(_, p)| p.name.clone())
                .collect();
            if !normal.is_empty() {
                entry.normal_keys = Some(normal);
            }
        }
    }

    entry
}

/// Synthesize `meta.json` for every direct member of every package.
///
/// When two members map to the same type name the first one (in declared
/// name order) keeps the entry and the clash is reported.
pub fn synthesize(
    graph: &DeclarationGraph,
    state: &StateStore,
    keys: &KeyIndex,
    diagnostics: &mut Diagnostics,
) -> MetadataIndex {
    let mut entries = BTreeMap::new();
    let mut owners: HashMap<String, ModelId> = HashMap::new();

    for ns in graph.namespace_ids() {
        let Some(package) = package_name(graph, state, ns) else {
            continue;
        };
        for &model in graph.namespace(ns).models.values() {
            let type_name = qualify(Some(package.clone()), graph.model(model).display_name());
            if let Some(&owner) = owners.get(&type_name) {
                diagnostics.push(
                    DiagnosticItem::new(
                        graph.describe(DeclRef::Model(model)),
                        DiagnosticCode::DuplicateTypeName,
                        format!("type name '{}' is already taken; no metadata emitted", type_name),
                    )
                    .with_context(graph.describe(DeclRef::Model(owner))),
                );
                continue;
            }
            owners.insert(type_name.clone(), model);
            entries.insert(type_name, entry_for(graph, state, keys, model));
        }
    }

    tracing::debug!(entries = entries.len(), "Synthesized type metadata");
    MetadataIndex { entries }
}
