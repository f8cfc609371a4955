//! Declaration Loading
//!
//! Reads the JSON declaration document exported by the host compiler and
//! builds a [`DeclarationGraph`]. Declarations are referenced by dotted
//! paths (`Foo.V1.Bar`); properties by `Foo.V1.Bar.id`.
//!
//! ```json
//! {
//!   "namespaces": [{ "name": "Foo.V1", "annotations": [{ "name": "package", "args": [{ "name": "foo.v1" }] }] }],
//!   "models": [{
//!     "name": "Foo.V1.Bar",
//!     "properties": [{ "name": "id", "type": "bytes", "key": true }]
//!   }],
//!   "interfaces": [{
//!     "name": "Foo.V1.Bars",
//!     "operations": [{ "name": "get", "returns": "Foo.V1.Bar" }]
//!   }]
//! }
//! ```
//!
//! Annotations are recorded in declaration-walk order: namespaces, scalars,
//! models (each model before its properties), interfaces, operations.

use serde::Deserialize;
use sha2::{Digest, Sha256};
use std::fs;
use std::path::Path;

use super::{DeclRef, DeclarationGraph, ModelId, OperationId, PropertyId, TypeRef};
use crate::error::{EmitError, Result};

// =============================================================================
// Document Shape
// =============================================================================

#[derive(Debug, Default, Deserialize)]
#[serde(rename_all = "camelCase")]
struct Document {
    #[serde(default)]
    namespaces: Vec<NamespaceDoc>,
    #[serde(default)]
    scalars: Vec<ScalarDoc>,
    #[serde(default)]
    models: Vec<ModelDoc>,
    #[serde(default)]
    interfaces: Vec<InterfaceDoc>,
}

#[derive(Debug, Clone, Deserialize)]
struct AnnotationDoc {
    name: String,
    #[serde(default)]
    args: Vec<serde_json::Value>,
}

#[derive(Debug, Deserialize)]
struct NamespaceDoc {
    name: String,
    #[serde(default)]
    annotations: Vec<AnnotationDoc>,
}

#[derive(Debug, Deserialize)]
struct ScalarDoc {
    name: String,
    #[serde(default)]
    annotations: Vec<AnnotationDoc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct ModelDoc {
    name: String,
    #[serde(default)]
    friendly_name: Option<String>,
    #[serde(default)]
    template: Option<String>,
    #[serde(default)]
    source_model: Option<String>,
    #[serde(default)]
    properties: Vec<PropertyDoc>,
    #[serde(default)]
    annotations: Vec<AnnotationDoc>,
}

#[derive(Debug, Deserialize)]
#[serde(rename_all = "camelCase")]
struct PropertyDoc {
    name: String,
    #[serde(rename = "type")]
    ty: TypeDoc,
    #[serde(default)]
    optional: bool,
    #[serde(default)]
    key: bool,
    #[serde(default)]
    source_model: Option<String>,
    #[serde(default)]
    annotations: Vec<AnnotationDoc>,
}

/// `"Foo.Bar"` or `{ "array": <type> }`
#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum TypeDoc {
    Named(String),
    Array { array: Box<TypeDoc> },
}

impl Default for TypeDoc {
    fn default() -> Self {
        TypeDoc::Named("void".to_string())
    }
}

#[derive(Debug, Deserialize)]
struct InterfaceDoc {
    name: String,
    #[serde(default)]
    extends: Vec<String>,
    #[serde(default)]
    operations: Vec<OperationDoc>,
    #[serde(default)]
    annotations: Vec<AnnotationDoc>,
}

#[derive(Debug, Deserialize)]
struct OperationDoc {
    name: String,
    #[serde(default)]
    parameters: Vec<PropertyDoc>,
    #[serde(default)]
    returns: TypeDoc,
    #[serde(default)]
    annotations: Vec<AnnotationDoc>,
}

// =============================================================================
// Loading
// =============================================================================

/// Load a declaration document from disk
pub fn load_from_file(path: &Path) -> Result<DeclarationGraph> {
    let content = fs::read_to_string(path).map_err(|e| EmitError::io(path, e))?;
    load_from_str(&content)
}

/// Load a declaration document from a JSON string
pub fn load_from_str(content: &str) -> Result<DeclarationGraph> {
    let doc: Document = serde_json::from_str(content)?;

    let mut graph = DeclarationGraph::new();
    graph.bundle_hash = format!("{:x}", Sha256::digest(content.as_bytes()));

    // Namespaces and scalars have no outgoing references
    let mut namespace_ids = Vec::with_capacity(doc.namespaces.len());
    for ns in &doc.namespaces {
        namespace_ids.push(graph.add_namespace(&ns.name));
    }
    let mut scalar_ids = Vec::with_capacity(doc.scalars.len());
    for scalar in &doc.scalars {
        scalar_ids.push(graph.add_scalar(&scalar.name)?);
    }

    // Declare every model before resolving properties so forward and
    // self references resolve
    let mut model_ids = Vec::with_capacity(doc.models.len());
    for model in &doc.models {
        model_ids.push(graph.add_model(&model.name)?);
    }

    let mut property_ids: Vec<Vec<PropertyId>> = Vec::with_capacity(doc.models.len());
    for (model_doc, &id) in doc.models.iter().zip(&model_ids) {
        let template = resolve_model(&graph, model_doc.template.as_deref(), &model_doc.name)?;
        let source_model = resolve_model(&graph, model_doc.source_model.as_deref(), &model_doc.name)?;
        {
            let model = graph.model_mut(id);
            model.friendly_name = model_doc.friendly_name.clone();
            model.template = template;
            model.source_model = source_model;
        }

        let mut ids = Vec::with_capacity(model_doc.properties.len());
        for prop in &model_doc.properties {
            ids.push(add_property(&mut graph, id, prop, &model_doc.name)?);
        }
        property_ids.push(ids);
    }

    let mut interface_ids = Vec::with_capacity(doc.interfaces.len());
    for iface in &doc.interfaces {
        interface_ids.push(graph.add_interface(&iface.name)?);
    }

    let mut operation_ids: Vec<Vec<(OperationId, Vec<PropertyId>)>> = Vec::with_capacity(doc.interfaces.len());
    for (iface_doc, &id) in doc.interfaces.iter().zip(&interface_ids) {
        for base in &iface_doc.extends {
            let base_id = graph.find_interface(base).ok_or_else(|| EmitError::UnresolvedReference {
                reference: base.clone(),
                context: format!("extends of {}", iface_doc.name),
            })?;
            graph.interface_mut(id).extends.push(base_id);
        }

        let mut ops = Vec::with_capacity(iface_doc.operations.len());
        for op_doc in &iface_doc.operations {
            let context = format!("{}.{}", iface_doc.name, op_doc.name);
            let returns = resolve_type(&mut graph, &op_doc.returns, &context)?;
            let op = graph.add_operation(id, &op_doc.name, returns);
            let params = graph.operation(op).parameters;

            let mut param_ids = Vec::with_capacity(op_doc.parameters.len());
            for param in &op_doc.parameters {
                param_ids.push(add_property(&mut graph, params, param, &context)?);
            }
            ops.push((op, param_ids));
        }
        operation_ids.push(ops);
    }

    // Record annotations in walk order
    for (ns, &id) in doc.namespaces.iter().zip(&namespace_ids) {
        record(&mut graph, DeclRef::Namespace(id), &ns.annotations);
    }
    for (scalar, &id) in doc.scalars.iter().zip(&scalar_ids) {
        record(&mut graph, DeclRef::Scalar(id), &scalar.annotations);
    }
    for ((model, &id), props) in doc.models.iter().zip(&model_ids).zip(&property_ids) {
        record(&mut graph, DeclRef::Model(id), &model.annotations);
        for (prop, &pid) in model.properties.iter().zip(props) {
            record(&mut graph, DeclRef::Property(pid), &prop.annotations);
        }
    }
    for (iface, &id) in doc.interfaces.iter().zip(&interface_ids) {
        record(&mut graph, DeclRef::Interface(id), &iface.annotations);
    }
    for (iface, ops) in doc.interfaces.iter().zip(&operation_ids) {
        for (op_doc, (op, params)) in iface.operations.iter().zip(ops) {
            record(&mut graph, DeclRef::Operation(*op), &op_doc.annotations);
            for (param, &pid) in op_doc.parameters.iter().zip(params) {
                record(&mut graph, DeclRef::Property(pid), &param.annotations);
            }
        }
    }

    tracing::debug!(
        models = graph.model_count(),
        annotations = graph.annotations().len(),
        bundle_hash = %graph.bundle_hash,
        "Loaded declaration graph"
    );

    Ok(graph)
}

fn add_property(
    graph: &mut DeclarationGraph,
    model: ModelId,
    doc: &PropertyDoc,
    context: &str,
) -> Result<PropertyId> {
    let ty = resolve_type(graph, &doc.ty, &format!("{}.{}", context, doc.name))?;
    let source_model = resolve_model(graph, doc.source_model.as_deref(), context)?;

    let id = graph.add_property(model, &doc.name, ty);
    let prop = graph.property_mut(id);
    prop.optional = doc.optional;
    prop.is_key = doc.key;
    prop.source_model = source_model;
    Ok(id)
}

fn resolve_type(graph: &mut DeclarationGraph, ty: &TypeDoc, context: &str) -> Result<TypeRef> {
    match ty {
        TypeDoc::Named(name) => graph.resolve_type(name).ok_or_else(|| EmitError::UnresolvedReference {
            reference: name.clone(),
            context: context.to_string(),
        }),
        TypeDoc::Array { array } => {
            let element = resolve_type(graph, array, context)?;
            Ok(TypeRef::Model(graph.array_of(element)))
        }
    }
}

fn resolve_model(graph: &DeclarationGraph, name: Option<&str>, context: &str) -> Result<Option<ModelId>> {
    let Some(name) = name else {
        return Ok(None);
    };
    graph
        .find_model(name)
        .map(Some)
        .ok_or_else(|| EmitError::UnresolvedReference {
            reference: name.to_string(),
            context: context.to_string(),
        })
}

fn record(graph: &mut DeclarationGraph, target: DeclRef, annotations: &[AnnotationDoc]) {
    for annotation in annotations {
        graph.annotate(target, &annotation.name, annotation.args.clone());
    }
}
