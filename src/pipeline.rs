//! Emit Pipeline
//!
//! One compilation run over a loaded [`DeclarationGraph`]:
//!
//! 1. apply every annotation in walk order, folding deltas into the state
//!    store as they are produced
//! 2. seed and close the message set
//! 3. relocate moved messages
//! 4. synthesize the metadata index
//!
//! Later handlers see the facts recorded by earlier ones, which is what
//! lets `@copyKeys` pick up key tags from the models it copies.

use std::path::{Path, PathBuf};

use crate::annotations::{AnnotationRegistry, StateDelta};
use crate::closure::{self, MessageGraph, MessageSet, ModelRelocation, Roots};
use crate::decl::{DeclRef, DeclarationGraph, ModelId, PropertyId};
use crate::diagnostics::Diagnostics;
use crate::error::Result;
use crate::meta::{self, KeyIndex, MetadataIndex};
use crate::state::{Fact, StateKey, StateStore};

/// Everything a run produced
#[derive(Debug)]
pub struct PipelineOutput {
    /// The graph after materialization and relocation
    pub graph: DeclarationGraph,
    pub state: StateStore,
    pub roots: Roots,
    pub messages: MessageSet,
    pub relocations: Vec<ModelRelocation>,
    pub metadata: MetadataIndex,
    pub diagnostics: Diagnostics,
}

impl PipelineOutput {
    /// Reference graph over the final message set
    pub fn message_graph(&self) -> MessageGraph {
        MessageGraph::build(&self.graph, &self.messages)
    }

    /// Write the metadata index as `<output_dir>/<file_name>`
    pub fn write_metadata(&self, output_dir: &Path, file_name: &str) -> Result<PathBuf> {
        let path = self.metadata.write_to(output_dir, file_name)?;
        tracing::info!(path = %path.display(), entries = self.metadata.len(), "Wrote type metadata");
        Ok(path)
    }
}

/// Runs the emit stages with a fixed annotation table
#[derive(Debug, Clone)]
pub struct Pipeline {
    registry: AnnotationRegistry,
}

impl Default for Pipeline {
    fn default() -> Self {
        Self::new(AnnotationRegistry::builtin())
    }
}

impl Pipeline {
    pub fn new(registry: AnnotationRegistry) -> Self {
        Self { registry }
    }

    pub fn registry(&self) -> &AnnotationRegistry {
        &self.registry
    }

    /// Run every stage. Authoring problems end up in the returned
    /// diagnostics; only malformed annotation arguments are fatal.
    pub fn run(&self, mut graph: DeclarationGraph) -> Result<PipelineOutput> {
        let mut state = StateStore::new();
        let mut diagnostics = Diagnostics::new();

        let applied = self.apply_annotations(&mut graph, &mut state, &mut diagnostics)?;
        tracing::info!(annotations = applied, "Applied annotations");

        let (roots, messages) = closure::compute_messages(&graph, &state);
        tracing::info!(
            packages = roots.packages.len(),
            services = roots.services.len(),
            messages = messages.len(),
            "Closed message set"
        );

        let relocations = closure::relocate(&mut graph, &state, &messages, &mut diagnostics);
        if !relocations.is_empty() {
            tracing::info!(moved = relocations.len(), "Relocated messages");
        }

        MessageGraph::build(&graph, &messages).report_recursion(&graph, &mut diagnostics);

        let keys = KeyIndex::build(&graph);
        let metadata = meta::synthesize(&graph, &state, &keys, &mut diagnostics);
        tracing::info!(entries = metadata.len(), "Synthesized metadata");

        diagnostics.log();

        Ok(PipelineOutput {
            graph,
            state,
            roots,
            messages,
            relocations,
            metadata,
            diagnostics,
        })
    }

    /// Apply every recorded annotation in walk order; returns how many ran
    pub fn apply_annotations(
        &self,
        graph: &mut DeclarationGraph,
        state: &mut StateStore,
        diagnostics: &mut Diagnostics,
    ) -> Result<usize> {
        let annotations = graph.annotations().to_vec();

        for annotation in &annotations {
            let deltas = self.registry.apply(annotation, graph, state, diagnostics)?;
            for delta in deltas {
                apply_delta(graph, state, delta);
            }
        }

        Ok(annotations.len())
    }
}

/// Fold one handler delta into the graph and store
pub fn apply_delta(graph: &mut DeclarationGraph, state: &mut StateStore, delta: StateDelta) {
    match delta {
        StateDelta::Set { key, decl, fact } => state.set(key, decl, fact),
        StateDelta::MaterializeProperty {
            target,
            source,
            category,
        } => {
            let copy = materialize_property(graph, target, source);
            if let Some(category) = category {
                state.set(StateKey::Keys, DeclRef::Property(copy), Fact::Key(category));
            }
        }
    }
}

/// Structural copy of `source` onto `target`. A same-named property on
/// `target` is overwritten in place.
fn materialize_property(graph: &mut DeclarationGraph, target: ModelId, source: PropertyId) -> PropertyId {
    let original = graph.property(source).clone();

    let existing = graph
        .properties_of(target)
        .find(|(_, p)| p.name == original.name)
        .map(|(id, _)| id);

    let id = match existing {
        Some(id) => {
            graph.property_mut(id).ty = original.ty;
            id
        }
        None => graph.add_property(target, &original.name, original.ty),
    };

    let prop = graph.property_mut(id);
    prop.optional = original.optional;
    prop.is_key = false;
    prop.source_model = None;
    id
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl::TypeRef;
    use crate::state::KeyCategory;
    use serde_json::json;

    #[test]
    fn test_copy_keys_sees_earlier_tags() {
        let mut graph = DeclarationGraph::new();
        let user = graph.add_model("App.User").unwrap();
        let id = graph.add_property(user, "id", TypeRef::Intrinsic("string".into()));
        let membership = graph.add_model("App.Membership").unwrap();

        graph.annotate(DeclRef::Property(id), "primaryKey", vec![]);
        graph.annotate(
            DeclRef::Model(membership),
            "copyKeys",
            vec![json!("App.User"), json!({ "primary": "Foreign" })],
        );

        let out = Pipeline::default().run(graph).unwrap();
        let (copy, prop) = out.graph.properties_of(membership).next().unwrap();
        assert_eq!(prop.name, "id");
        assert!(!prop.is_key);
        assert_eq!(out.state.key_category(copy), Some(KeyCategory::Foreign));
    }

    #[test]
    fn test_materialize_overwrites_same_name() {
        let mut graph = DeclarationGraph::new();
        let a = graph.add_model("App.A").unwrap();
        let src = graph.add_property(a, "id", TypeRef::Intrinsic("bytes".into()));
        let b = graph.add_model("App.B").unwrap();
        graph.add_property(b, "id", TypeRef::Intrinsic("string".into()));

        let mut state = StateStore::new();
        apply_delta(
            &mut graph,
            &mut state,
            StateDelta::MaterializeProperty { target: b, source: src, category: Some(KeyCategory::Primary) },
        );

        let props: Vec<_> = graph.properties_of(b).collect();
        assert_eq!(props.len(), 1);
        assert_eq!(props[0].1.ty, TypeRef::Intrinsic("bytes".into()));
        assert_eq!(state.key_category(props[0].0), Some(KeyCategory::Primary));
    }

    #[test]
    fn test_unknown_annotation_is_not_fatal() {
        let mut graph = DeclarationGraph::new();
        let m = graph.add_model("App.A").unwrap();
        graph.annotate(DeclRef::Model(m), "mesage", vec![]);

        let out = Pipeline::default().run(graph).unwrap();
        assert_eq!(out.diagnostics.len(), 1);
        assert!(out.messages.is_empty());
    }

    #[test]
    fn test_malformed_argument_is_fatal() {
        let mut graph = DeclarationGraph::new();
        let m = graph.add_model("App.A").unwrap();
        graph.annotate(DeclRef::Model(m), "base", vec![json!(42)]);

        assert!(Pipeline::default().run(graph).is_err());
    }
}
