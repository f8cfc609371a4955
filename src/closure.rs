//! Message Graph Closure & Relocation
//!
//! Computes which models must be emitted as messages and moves models that
//! carry a `@move` fact into their target namespace.
//!
//! Closure is plain reachability over "property type" and "array element"
//! edges, run with an explicit stack. A model is pushed only if it was not
//! already a member, which is the only thing stopping self-referential and
//! mutually-referential models from looping.

use petgraph::algo::kosaraju_scc;
use petgraph::graph::{DiGraph, NodeIndex};
use petgraph::visit::EdgeRef;
use serde::Serialize;
use std::collections::{HashMap, HashSet};

use crate::decl::{DeclRef, DeclarationGraph, InterfaceId, ModelId, NamespaceId, OperationId, TypeRef};
use crate::diagnostics::{DiagnosticCode, DiagnosticItem, Diagnostics};
use crate::state::StateStore;

// =============================================================================
// MessageSet
// =============================================================================

/// Insertion-ordered set of models that need emitting
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MessageSet {
    order: Vec<ModelId>,
    members: HashSet<ModelId>,
}

impl MessageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a model; returns false if it was already present
    pub fn insert(&mut self, model: ModelId) -> bool {
        if self.members.insert(model) {
            self.order.push(model);
            true
        } else {
            false
        }
    }

    pub fn contains(&self, model: ModelId) -> bool {
        self.members.contains(&model)
    }

    pub fn iter(&self) -> impl Iterator<Item = ModelId> + '_ {
        self.order.iter().copied()
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }
}

// =============================================================================
// Seeding
// =============================================================================

/// Entry points found before closure
#[derive(Debug, Clone, Default)]
pub struct Roots {
    pub packages: Vec<NamespaceId>,
    pub services: Vec<InterfaceId>,
}

impl Roots {
    fn in_package(&self, graph: &DeclarationGraph, ns: Option<NamespaceId>) -> bool {
        ns.is_some_and(|ns| self.packages.iter().any(|&pkg| graph.is_within(ns, pkg)))
    }
}

/// Find packages and services
pub fn find_roots(graph: &DeclarationGraph, state: &StateStore) -> Roots {
    let packages: Vec<NamespaceId> = graph
        .namespace_ids()
        .filter(|&ns| state.package(ns).is_some())
        .collect();

    let mut roots = Roots {
        packages,
        services: Vec::new(),
    };
    let services: Vec<InterfaceId> = graph
        .interface_ids()
        .filter(|&iface| {
            state.is_service(DeclRef::Interface(iface))
                || roots.in_package(graph, graph.interface(iface).namespace)
        })
        .collect();
    roots.services = services;
    roots
}

/// Operations of `services`, following `extends` composition
pub fn reachable_operations(graph: &DeclarationGraph, services: &[InterfaceId]) -> Vec<OperationId> {
    let mut visited = HashSet::new();
    let mut stack: Vec<InterfaceId> = services.iter().rev().copied().collect();
    let mut ops = Vec::new();
    let mut seen_ops = HashSet::new();

    while let Some(iface) = stack.pop() {
        if !visited.insert(iface) {
            continue;
        }
        let interface = graph.interface(iface);
        for &op in &interface.operations {
            if seen_ops.insert(op) {
                ops.push(op);
            }
        }
        for &base in interface.extends.iter().rev() {
            if !visited.contains(&base) {
                stack.push(base);
            }
        }
    }

    ops
}

/// Resolved shape of an operation's parameter object.
///
/// `None` when there are no parameters. When every parameter was spread
/// from the same named model and nothing else was added, that model is the
/// effective type; otherwise the anonymous parameter model is.
pub fn effective_parameters(graph: &DeclarationGraph, op: OperationId) -> Option<ModelId> {
    let params = graph.operation(op).parameters;
    let props = &graph.model(params).properties;
    if props.is_empty() {
        return None;
    }

    let first_source = graph.property(props[0]).source_model;
    if let Some(source) = first_source {
        let all_from_source = props
            .iter()
            .all(|&p| graph.property(p).source_model == Some(source));
        if all_from_source && graph.model(source).properties.len() == props.len() {
            return Some(source);
        }
    }
    Some(params)
}

/// Seed the message set from markers, packages and service operations
pub fn seed_messages(graph: &DeclarationGraph, state: &StateStore, roots: &Roots) -> MessageSet {
    let mut messages = MessageSet::new();

    for model in graph.model_ids() {
        if state.is_message(model) || roots.in_package(graph, graph.model(model).namespace) {
            messages.insert(model);
        }
    }

    for op in reachable_operations(graph, &roots.services) {
        if let Some(params) = effective_parameters(graph, op) {
            messages.insert(params);
        }
        if let Some(ret) = graph.operation(op).returns.as_model() {
            messages.insert(ret);
        }
    }

    messages
}

// =============================================================================
// Closure
// =============================================================================

/// Models directly referenced by `model`: array element, then property types
fn referenced_models(graph: &DeclarationGraph, model: ModelId) -> impl Iterator<Item = ModelId> + '_ {
    let m = graph.model(model);
    let element = m.element.as_ref().and_then(TypeRef::as_model);
    element.into_iter().chain(
        m.properties
            .iter()
            .filter_map(move |&p| graph.property(p).ty.as_model()),
    )
}

/// Grow `messages` until every referenced model is a member.
///
/// Monotonic and idempotent: running it on a closed set changes nothing.
pub fn close(graph: &DeclarationGraph, messages: &mut MessageSet) {
    let mut stack: Vec<ModelId> = messages.iter().collect();
    stack.reverse();

    while let Some(model) = stack.pop() {
        let mut discovered: Vec<ModelId> = Vec::new();
        for referenced in referenced_models(graph, model) {
            if messages.insert(referenced) {
                discovered.push(referenced);
            }
        }
        // Depth-first: visit the first discovered reference next
        stack.extend(discovered.into_iter().rev());
    }
}

/// Seed and close in one go
pub fn compute_messages(graph: &DeclarationGraph, state: &StateStore) -> (Roots, MessageSet) {
    let roots = find_roots(graph, state);
    let mut messages = seed_messages(graph, state, &roots);
    let seeded = messages.len();
    close(graph, &mut messages);

    tracing::debug!(
        packages = roots.packages.len(),
        services = roots.services.len(),
        seeded,
        closed = messages.len(),
        "Computed message closure"
    );

    (roots, messages)
}

// =============================================================================
// Relocation
// =============================================================================

/// One applied namespace move
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ModelRelocation {
    pub model: ModelId,
    pub from: Option<NamespaceId>,
    pub to: NamespaceId,
    /// Name under which the model now appears in `to`
    pub name: String,
}

/// Move every message with a `@move` fact into its target namespace.
///
/// Applied in ascending model id order so each qualifying model moves
/// exactly once. Moving into the current namespace is a no-op. A target
/// that no longer exists, or that already holds a member under the same
/// name, leaves the model where it is.
pub fn relocate(
    graph: &mut DeclarationGraph,
    state: &StateStore,
    messages: &MessageSet,
    diagnostics: &mut Diagnostics,
) -> Vec<ModelRelocation> {
    let mut candidates: Vec<(ModelId, NamespaceId)> = messages
        .iter()
        .filter_map(|m| state.move_target(m).map(|target| (m, target)))
        .collect();
    candidates.sort();

    let mut applied = Vec::new();
    for (model, target) in candidates {
        let current = graph.model(model).namespace;
        if current == Some(target) {
            continue;
        }
        if !graph.has_namespace(target) {
            diagnostics.push(DiagnosticItem::new(
                graph.describe(DeclRef::Model(model)),
                DiagnosticCode::DanglingMoveTarget,
                "move target namespace is gone; model left in place",
            ));
            continue;
        }

        let name = graph.model(model).name.clone();
        if let Some(&occupant) = graph.namespace(target).models.get(&name) {
            diagnostics.push(
                DiagnosticItem::new(
                    graph.describe(DeclRef::Model(model)),
                    DiagnosticCode::RelocationNameConflict,
                    format!(
                        "{} already has a member named '{}'; model left in place",
                        graph.namespace_full_name(target),
                        name
                    ),
                )
                .with_context(graph.describe(DeclRef::Model(occupant))),
            );
            continue;
        }

        if let Some(from) = current {
            graph.namespace_mut(from).models.retain(|_, &mut id| id != model);
        }
        graph.namespace_mut(target).models.insert(name.clone(), model);
        graph.model_mut(model).namespace = Some(target);

        tracing::debug!(
            model = %name,
            from = ?current.map(|ns| graph.namespace_full_name(ns)),
            to = %graph.namespace_full_name(target),
            "Relocated model"
        );
        applied.push(ModelRelocation {
            model,
            from: current,
            to: target,
            name,
        });
    }

    applied
}

// =============================================================================
// MessageGraph
// =============================================================================

/// Reference graph between messages, for inspection and export
pub struct MessageGraph {
    graph: DiGraph<ModelId, ()>,
}

impl MessageGraph {
    pub fn build(decls: &DeclarationGraph, messages: &MessageSet) -> Self {
        let mut graph = DiGraph::with_capacity(messages.len(), messages.len() * 2);
        let mut indices = HashMap::with_capacity(messages.len());

        for model in messages.iter() {
            indices.insert(model, graph.add_node(model));
        }
        for model in messages.iter() {
            for referenced in referenced_models(decls, model) {
                if let (Some(&from), Some(&to)) = (indices.get(&model), indices.get(&referenced)) {
                    graph.add_edge(from, to, ());
                }
            }
        }

        Self { graph }
    }

    pub fn node_count(&self) -> usize {
        self.graph.node_count()
    }

    pub fn edge_count(&self) -> usize {
        self.graph.edge_count()
    }

    /// Groups of messages that reference each other, including self loops
    pub fn recursive_groups(&self) -> Vec<Vec<ModelId>> {
        kosaraju_scc(&self.graph)
            .into_iter()
            .filter(|scc| {
                scc.len() > 1 || scc.iter().any(|&idx| self.graph.contains_edge(idx, idx))
            })
            .map(|scc| {
                let mut group: Vec<ModelId> = scc.into_iter().map(|idx| self.graph[idx]).collect();
                group.sort();
                group
            })
            .collect()
    }

    /// Report recursive groups as informational diagnostics
    pub fn report_recursion(&self, decls: &DeclarationGraph, diagnostics: &mut Diagnostics) {
        for group in self.recursive_groups() {
            let names: Vec<String> = group.iter().map(|&m| decls.describe(DeclRef::Model(m))).collect();
            let mut item = DiagnosticItem::new(
                names[0].clone(),
                DiagnosticCode::RecursiveMessageGroup,
                format!("{} message(s) form a reference cycle", names.len()),
            );
            for name in &names[1..] {
                item = item.with_context(name.clone());
            }
            diagnostics.push(item);
        }
    }

    /// Export to GraphViz DOT
    pub fn to_dot(&self, decls: &DeclarationGraph) -> String {
        let mut output = String::new();
        output.push_str("digraph Messages {\n");
        output.push_str("  rankdir=LR;\n");
        output.push_str("  node [shape=box, style=rounded, fontname=\"Helvetica\", fontsize=10];\n\n");

        let node_id = |idx: NodeIndex| format!("m{}", self.graph[idx].index());

        for idx in self.graph.node_indices() {
            let model = self.graph[idx];
            let label = decls.describe(DeclRef::Model(model)).replace('"', "\\\"");
            output.push_str(&format!("  {} [label=\"{}\"];\n", node_id(idx), label));
        }

        output.push('\n');
        for edge in self.graph.edge_references() {
            output.push_str(&format!("  {} -> {};\n", node_id(edge.source()), node_id(edge.target())));
        }

        output.push_str("}\n");
        output
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::decl::TypeRef;
    use crate::state::{Fact, StateKey};

    fn bytes() -> TypeRef {
        TypeRef::Intrinsic("bytes".into())
    }

    #[test]
    fn test_cycle_guard_terminates() {
        let mut graph = DeclarationGraph::new();
        let a = graph.add_model("X.A").unwrap();
        let b = graph.add_model("X.B").unwrap();
        graph.add_property(a, "b", TypeRef::Model(b));
        graph.add_property(b, "a", TypeRef::Model(a));
        graph.add_property(a, "me", TypeRef::Model(a));

        let mut messages = MessageSet::new();
        messages.insert(a);
        close(&graph, &mut messages);

        assert_eq!(messages.iter().collect::<Vec<_>>(), vec![a, b]);
    }

    #[test]
    fn test_close_is_idempotent() {
        let mut graph = DeclarationGraph::new();
        let a = graph.add_model("X.A").unwrap();
        let b = graph.add_model("X.B").unwrap();
        let arr = graph.array_of(TypeRef::Model(b));
        graph.add_property(a, "items", TypeRef::Model(arr));

        let mut messages = MessageSet::new();
        messages.insert(a);
        close(&graph, &mut messages);
        let once = messages.clone();
        close(&graph, &mut messages);

        assert_eq!(once, messages);
        assert!(messages.contains(arr));
        assert!(messages.contains(b));
    }

    #[test]
    fn test_effective_parameters() {
        let mut graph = DeclarationGraph::new();
        let req = graph.add_model("X.GetRequest").unwrap();
        graph.add_property(req, "id", bytes());
        let svc = graph.add_interface("X.Svc").unwrap();

        let empty = graph.add_operation(svc, "ping", TypeRef::Intrinsic("void".into()));
        assert_eq!(effective_parameters(&graph, empty), None);

        let spread = graph.add_operation(svc, "get", TypeRef::Intrinsic("void".into()));
        let params = graph.operation(spread).parameters;
        let p = graph.add_property(params, "id", bytes());
        graph.property_mut(p).source_model = Some(req);
        assert_eq!(effective_parameters(&graph, spread), Some(req));

        let mixed = graph.add_operation(svc, "put", TypeRef::Intrinsic("void".into()));
        let params = graph.operation(mixed).parameters;
        let p = graph.add_property(params, "id", bytes());
        graph.property_mut(p).source_model = Some(req);
        graph.add_property(params, "extra", bytes());
        assert_eq!(effective_parameters(&graph, mixed), Some(params));
    }

    #[test]
    fn test_extends_composition_reaches_operations() {
        let mut graph = DeclarationGraph::new();
        let out = graph.add_model("Other.Out").unwrap();
        let base = graph.add_interface("Other.Base").unwrap();
        graph.add_operation(base, "read", TypeRef::Model(out));
        let svc = graph.add_interface("Other.Svc").unwrap();
        graph.interface_mut(svc).extends.push(base);
        graph.interface_mut(base).extends.push(svc);

        let mut state = StateStore::new();
        state.set(StateKey::Service, DeclRef::Interface(svc), Fact::Service);

        let (roots, messages) = compute_messages(&graph, &state);
        assert_eq!(roots.services, vec![svc]);
        assert!(messages.contains(out));
    }

    #[test]
    fn test_relocate_moves_under_display_name() {
        let mut graph = DeclarationGraph::new();
        let model = graph.add_model("Old.Thing").unwrap();
        graph.model_mut(model).friendly_name = Some("Widget".into());
        let old = graph.find_namespace("Old").unwrap();
        let new = graph.add_namespace("New.V1");

        let mut state = StateStore::new();
        state.set(StateKey::Move, DeclRef::Model(model), Fact::NamespaceMove(new));
        let mut messages = MessageSet::new();
        messages.insert(model);

        let mut diags = Diagnostics::new();
        let moved = relocate(&mut graph, &state, &messages, &mut diags);

        assert_eq!(moved.len(), 1);
        assert_eq!(graph.model(model).namespace, Some(new));
        assert_eq!(graph.namespace(new).models.get("Widget"), Some(&model));
        assert!(graph.namespace(old).models.values().all(|&m| m != model));
    }

    #[test]
    fn test_relocate_same_namespace_is_noop() {
        let mut graph = DeclarationGraph::new();
        let model = graph.add_model("Here.Thing").unwrap();
        let here = graph.find_namespace("Here").unwrap();
        let mut state = StateStore::new();
        state.set(StateKey::Move, DeclRef::Model(model), Fact::NamespaceMove(here));
        let mut messages = MessageSet::new();
        messages.insert(model);

        let moved = relocate(&mut graph, &state, &messages, &mut Diagnostics::new());
        assert!(moved.is_empty());
        assert_eq!(graph.namespace(here).models.get("Thing"), Some(&model));
    }

    #[test]
    fn test_relocate_refuses_name_clash() {
        let mut graph = DeclarationGraph::new();
        let resident = graph.add_model("Pkg.Money").unwrap();
        let mover = graph.add_model("Lib.Money").unwrap();
        let pkg = graph.find_namespace("Pkg").unwrap();
        let lib = graph.find_namespace("Lib").unwrap();

        let mut state = StateStore::new();
        state.set(StateKey::Move, DeclRef::Model(mover), Fact::NamespaceMove(pkg));
        let mut messages = MessageSet::new();
        messages.insert(resident);
        messages.insert(mover);

        let mut diags = Diagnostics::new();
        let moved = relocate(&mut graph, &state, &messages, &mut diags);

        assert!(moved.is_empty());
        assert_eq!(graph.namespace(pkg).models.get("Money"), Some(&resident));
        assert_eq!(graph.model(mover).namespace, Some(lib));
        assert_eq!(diags.with_code(DiagnosticCode::RelocationNameConflict).count(), 1);
    }

    #[test]
    fn test_recursive_groups() {
        let mut graph = DeclarationGraph::new();
        let a = graph.add_model("X.A").unwrap();
        let b = graph.add_model("X.B").unwrap();
        let c = graph.add_model("X.C").unwrap();
        graph.add_property(a, "b", TypeRef::Model(b));
        graph.add_property(b, "a", TypeRef::Model(a));
        graph.add_property(c, "c", TypeRef::Model(c));

        let mut messages = MessageSet::new();
        for m in [a, b, c] {
            messages.insert(m);
        }
        let mg = MessageGraph::build(&graph, &messages);
        let mut groups = mg.recursive_groups();
        groups.sort();

        assert_eq!(groups, vec![vec![a, b], vec![c]]);
        assert!(mg.to_dot(&graph).contains("m0 -> m1"));
    }
}
