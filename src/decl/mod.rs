//! Declaration Graph
//!
//! Arena-backed view of the validated declaration graph handed over by the
//! host compiler: namespaces, models, properties, scalars, interfaces and
//! operations. Declarations are addressed by small copyable ids so facts,
//! closure sets and relocations can refer to them without borrowing the
//! graph.
//!
//! Properties may reference their own declaring model, so the graph is
//! cyclic in general. Nothing here walks references recursively.

pub mod loader;

pub use loader::{load_from_file, load_from_str};

use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, HashMap};
use std::fmt;

use crate::error::{EmitError, Result};

// =============================================================================
// Ids
// =============================================================================

macro_rules! decl_id {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
        pub struct $name(pub usize);

        impl $name {
            pub fn index(self) -> usize {
                self.0
            }
        }
    };
}

decl_id!(
    /// Index into the namespace arena
    NamespaceId
);
decl_id!(
    /// Index into the model arena
    ModelId
);
decl_id!(
    /// Index into the property arena
    PropertyId
);
decl_id!(
    /// Index into the scalar arena
    ScalarId
);
decl_id!(
    /// Index into the interface arena
    InterfaceId
);
decl_id!(
    /// Index into the operation arena
    OperationId
);

/// Declaration kinds annotations can be attached to
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DeclKind {
    Namespace,
    Model,
    Property,
    Scalar,
    Interface,
    Operation,
}

impl fmt::Display for DeclKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            Self::Namespace => "namespace",
            Self::Model => "model",
            Self::Property => "property",
            Self::Scalar => "scalar",
            Self::Interface => "interface",
            Self::Operation => "operation",
        };
        f.write_str(s)
    }
}

/// Handle to any declaration in the graph
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum DeclRef {
    Namespace(NamespaceId),
    Model(ModelId),
    Property(PropertyId),
    Scalar(ScalarId),
    Interface(InterfaceId),
    Operation(OperationId),
}

impl DeclRef {
    pub fn kind(&self) -> DeclKind {
        match self {
            Self::Namespace(_) => DeclKind::Namespace,
            Self::Model(_) => DeclKind::Model,
            Self::Property(_) => DeclKind::Property,
            Self::Scalar(_) => DeclKind::Scalar,
            Self::Interface(_) => DeclKind::Interface,
            Self::Operation(_) => DeclKind::Operation,
        }
    }

    pub fn as_model(&self) -> Option<ModelId> {
        match self {
            Self::Model(id) => Some(*id),
            _ => None,
        }
    }
}

// =============================================================================
// Declarations
// =============================================================================

/// Reference to a property or parameter type
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeRef {
    Model(ModelId),
    Scalar(ScalarId),
    /// Built-in scalar or keyword type (`string`, `bytes`, `void`, ...)
    Intrinsic(String),
}

impl TypeRef {
    pub fn as_model(&self) -> Option<ModelId> {
        match self {
            Self::Model(id) => Some(*id),
            _ => None,
        }
    }
}

/// Built-in type names that never resolve to a declaration
pub const INTRINSIC_TYPES: &[&str] = &[
    "string", "bytes", "boolean", "null", "void", "never", "unknown",
    "numeric", "integer", "float", "decimal", "safeint",
    "int8", "int16", "int32", "int64", "uint8", "uint16", "uint32", "uint64",
    "float32", "float64", "decimal128",
    "plainDate", "plainTime", "utcDateTime", "offsetDateTime", "duration", "url",
];

#[derive(Debug, Clone)]
pub struct Namespace {
    /// Last path segment
    pub name: String,
    pub parent: Option<NamespaceId>,
    pub namespaces: Vec<NamespaceId>,
    /// Member models keyed by their name within this namespace
    pub models: BTreeMap<String, ModelId>,
}

#[derive(Debug, Clone)]
pub struct Model {
    /// Declared (source) name
    pub name: String,
    pub namespace: Option<NamespaceId>,
    pub properties: Vec<PropertyId>,
    /// Display-name override
    pub friendly_name: Option<String>,
    /// Template declaration this model was instantiated from
    pub template: Option<ModelId>,
    /// Model this one was produced from by template instantiation
    pub source_model: Option<ModelId>,
    /// Element type when this is the built-in `Array<T>`
    pub element: Option<TypeRef>,
}

impl Model {
    /// Friendly name if present, declared name otherwise
    pub fn display_name(&self) -> &str {
        self.friendly_name.as_deref().unwrap_or(&self.name)
    }

    pub fn is_array(&self) -> bool {
        self.element.is_some()
    }
}

#[derive(Debug, Clone)]
pub struct Property {
    pub name: String,
    pub model: ModelId,
    pub ty: TypeRef,
    pub optional: bool,
    /// Marked as the model's identity key by the host compiler
    pub is_key: bool,
    /// Named model this property was spread from, if any
    pub source_model: Option<ModelId>,
}

#[derive(Debug, Clone)]
pub struct Scalar {
    pub name: String,
    pub namespace: Option<NamespaceId>,
}

#[derive(Debug, Clone)]
pub struct Interface {
    pub name: String,
    pub namespace: Option<NamespaceId>,
    /// Composed interfaces whose operations this one inherits
    pub extends: Vec<InterfaceId>,
    pub operations: Vec<OperationId>,
}

#[derive(Debug, Clone)]
pub struct Operation {
    pub name: String,
    pub interface: Option<InterfaceId>,
    /// Anonymous model holding the parameters
    pub parameters: ModelId,
    pub returns: TypeRef,
}

/// One annotation application, in declaration-walk order
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnnotationUse {
    pub target: DeclRef,
    pub name: String,
    #[serde(default)]
    pub args: Vec<serde_json::Value>,
}

// =============================================================================
// DeclarationGraph
// =============================================================================

/// The declaration graph for one compilation run
#[derive(Debug, Clone, Default)]
pub struct DeclarationGraph {
    pub(crate) namespaces: Vec<Namespace>,
    pub(crate) models: Vec<Model>,
    pub(crate) properties: Vec<Property>,
    pub(crate) scalars: Vec<Scalar>,
    pub(crate) interfaces: Vec<Interface>,
    pub(crate) operations: Vec<Operation>,
    pub(crate) annotations: Vec<AnnotationUse>,

    /// Index: namespace full name -> id
    namespace_index: HashMap<String, NamespaceId>,
    /// Index: declared model path -> id
    model_index: HashMap<String, ModelId>,
    scalar_index: HashMap<String, ScalarId>,
    interface_index: HashMap<String, InterfaceId>,
    /// `Array<T>` instances, one per element type
    array_instances: HashMap<TypeRef, ModelId>,

    /// SHA256 of the source document (empty when built in code)
    pub bundle_hash: String,
}

impl DeclarationGraph {
    pub fn new() -> Self {
        Self::default()
    }

    // ========== Building ==========

    /// Get or create a namespace by dotted full name, creating parents as needed
    pub fn add_namespace(&mut self, full_name: &str) -> NamespaceId {
        if let Some(&id) = self.namespace_index.get(full_name) {
            return id;
        }

        let (parent, name) = match split_path(full_name) {
            (Some(parent_path), name) => (Some(self.add_namespace(parent_path)), name),
            (None, name) => (None, name),
        };

        let id = NamespaceId(self.namespaces.len());
        self.namespaces.push(Namespace {
            name: name.to_string(),
            parent,
            namespaces: Vec::new(),
            models: BTreeMap::new(),
        });
        if let Some(parent) = parent {
            self.namespaces[parent.0].namespaces.push(id);
        }
        self.namespace_index.insert(full_name.to_string(), id);
        id
    }

    /// Declare a model. `path` is `Namespace.Path.Name` or a bare name.
    pub fn add_model(&mut self, path: &str) -> Result<ModelId> {
        if self.model_index.contains_key(path) {
            return Err(EmitError::DuplicateDeclaration(path.to_string()));
        }

        let (ns_path, name) = split_path(path);
        let namespace = ns_path.map(|p| self.add_namespace(p));
        let id = self.push_model(Model {
            name: name.to_string(),
            namespace,
            properties: Vec::new(),
            friendly_name: None,
            template: None,
            source_model: None,
            element: None,
        });
        if let Some(ns) = namespace {
            self.namespaces[ns.0].models.insert(name.to_string(), id);
        }
        self.model_index.insert(path.to_string(), id);
        Ok(id)
    }

    /// Get or create the built-in `Array<element>` instance
    pub fn array_of(&mut self, element: TypeRef) -> ModelId {
        if let Some(&id) = self.array_instances.get(&element) {
            return id;
        }
        let id = self.push_model(Model {
            name: "Array".to_string(),
            namespace: None,
            properties: Vec::new(),
            friendly_name: None,
            template: None,
            source_model: None,
            element: Some(element.clone()),
        });
        self.array_instances.insert(element, id);
        id
    }

    pub fn add_property(&mut self, model: ModelId, name: &str, ty: TypeRef) -> PropertyId {
        let id = PropertyId(self.properties.len());
        self.properties.push(Property {
            name: name.to_string(),
            model,
            ty,
            optional: false,
            is_key: false,
            source_model: None,
        });
        self.models[model.0].properties.push(id);
        id
    }

    pub fn add_scalar(&mut self, path: &str) -> Result<ScalarId> {
        if self.scalar_index.contains_key(path) {
            return Err(EmitError::DuplicateDeclaration(path.to_string()));
        }
        let (ns_path, name) = split_path(path);
        let namespace = ns_path.map(|p| self.add_namespace(p));
        let id = ScalarId(self.scalars.len());
        self.scalars.push(Scalar {
            name: name.to_string(),
            namespace,
        });
        self.scalar_index.insert(path.to_string(), id);
        Ok(id)
    }

    pub fn add_interface(&mut self, path: &str) -> Result<InterfaceId> {
        if self.interface_index.contains_key(path) {
            return Err(EmitError::DuplicateDeclaration(path.to_string()));
        }
        let (ns_path, name) = split_path(path);
        let namespace = ns_path.map(|p| self.add_namespace(p));
        let id = InterfaceId(self.interfaces.len());
        self.interfaces.push(Interface {
            name: name.to_string(),
            namespace,
            extends: Vec::new(),
            operations: Vec::new(),
        });
        self.interface_index.insert(path.to_string(), id);
        Ok(id)
    }

    /// Declare an operation on an interface. Parameters start empty.
    pub fn add_operation(&mut self, interface: InterfaceId, name: &str, returns: TypeRef) -> OperationId {
        let parameters = self.push_model(Model {
            name: String::new(),
            namespace: None,
            properties: Vec::new(),
            friendly_name: None,
            template: None,
            source_model: None,
            element: None,
        });
        let id = OperationId(self.operations.len());
        self.operations.push(Operation {
            name: name.to_string(),
            interface: Some(interface),
            parameters,
            returns,
        });
        self.interfaces[interface.0].operations.push(id);
        id
    }

    /// Record an annotation application; the order of calls is the walk order
    pub fn annotate(&mut self, target: DeclRef, name: &str, args: Vec<serde_json::Value>) {
        self.annotations.push(AnnotationUse {
            target,
            name: name.to_string(),
            args,
        });
    }

    fn push_model(&mut self, model: Model) -> ModelId {
        let id = ModelId(self.models.len());
        self.models.push(model);
        id
    }

    // ========== Access ==========

    pub fn namespace(&self, id: NamespaceId) -> &Namespace {
        &self.namespaces[id.0]
    }

    pub fn model(&self, id: ModelId) -> &Model {
        &self.models[id.0]
    }

    pub fn model_mut(&mut self, id: ModelId) -> &mut Model {
        &mut self.models[id.0]
    }

    pub fn property(&self, id: PropertyId) -> &Property {
        &self.properties[id.0]
    }

    pub fn property_mut(&mut self, id: PropertyId) -> &mut Property {
        &mut self.properties[id.0]
    }

    pub fn scalar(&self, id: ScalarId) -> &Scalar {
        &self.scalars[id.0]
    }

    pub fn interface(&self, id: InterfaceId) -> &Interface {
        &self.interfaces[id.0]
    }

    pub fn interface_mut(&mut self, id: InterfaceId) -> &mut Interface {
        &mut self.interfaces[id.0]
    }

    pub fn operation(&self, id: OperationId) -> &Operation {
        &self.operations[id.0]
    }

    /// Whether a namespace id still refers to a live namespace
    pub fn has_namespace(&self, id: NamespaceId) -> bool {
        id.0 < self.namespaces.len()
    }

    pub fn namespace_ids(&self) -> impl Iterator<Item = NamespaceId> {
        (0..self.namespaces.len()).map(NamespaceId)
    }

    pub fn model_ids(&self) -> impl Iterator<Item = ModelId> {
        (0..self.models.len()).map(ModelId)
    }

    pub fn interface_ids(&self) -> impl Iterator<Item = InterfaceId> {
        (0..self.interfaces.len()).map(InterfaceId)
    }

    pub fn model_count(&self) -> usize {
        self.models.len()
    }

    /// Annotation applications in walk order
    pub fn annotations(&self) -> &[AnnotationUse] {
        &self.annotations
    }

    /// Properties of a model, in declaration order
    pub fn properties_of(&self, model: ModelId) -> impl Iterator<Item = (PropertyId, &Property)> {
        self.models[model.0]
            .properties
            .iter()
            .map(move |&id| (id, &self.properties[id.0]))
    }

    // ========== Lookup ==========

    pub fn find_namespace(&self, full_name: &str) -> Option<NamespaceId> {
        self.namespace_index.get(full_name).copied()
    }

    /// Find a model by its declared path
    pub fn find_model(&self, path: &str) -> Option<ModelId> {
        self.model_index.get(path).copied()
    }

    pub fn find_scalar(&self, path: &str) -> Option<ScalarId> {
        self.scalar_index.get(path).copied()
    }

    pub fn find_interface(&self, path: &str) -> Option<InterfaceId> {
        self.interface_index.get(path).copied()
    }

    /// Find a property by `Model.Path.property`
    pub fn find_property(&self, path: &str) -> Option<PropertyId> {
        let (model_path, name) = split_path(path);
        let model = self.find_model(model_path?)?;
        self.properties_of(model)
            .find(|(_, p)| p.name == name)
            .map(|(id, _)| id)
    }

    /// Resolve a type name: models first, then scalars, then intrinsics
    pub fn resolve_type(&self, name: &str) -> Option<TypeRef> {
        if let Some(id) = self.find_model(name) {
            return Some(TypeRef::Model(id));
        }
        if let Some(id) = self.find_scalar(name) {
            return Some(TypeRef::Scalar(id));
        }
        INTRINSIC_TYPES
            .contains(&name)
            .then(|| TypeRef::Intrinsic(name.to_string()))
    }

    // ========== Naming ==========

    /// Dotted path of a namespace from the global root
    pub fn namespace_full_name(&self, id: NamespaceId) -> String {
        let mut segments = Vec::new();
        let mut current = Some(id);
        while let Some(ns) = current {
            let namespace = &self.namespaces[ns.0];
            segments.push(namespace.name.as_str());
            current = namespace.parent;
        }
        segments.reverse();
        segments.join(".")
    }

    /// Whether `ns` is `ancestor` or nested anywhere beneath it
    pub fn is_within(&self, ns: NamespaceId, ancestor: NamespaceId) -> bool {
        let mut current = Some(ns);
        while let Some(id) = current {
            if id == ancestor {
                return true;
            }
            current = self.namespaces[id.0].parent;
        }
        false
    }

    /// Human-readable path for logs and diagnostics
    pub fn describe(&self, decl: DeclRef) -> String {
        let qualify = |ns: Option<NamespaceId>, name: &str| match ns {
            Some(ns) => format!("{}.{}", self.namespace_full_name(ns), name),
            None => name.to_string(),
        };

        match decl {
            DeclRef::Namespace(id) => self.namespace_full_name(id),
            DeclRef::Model(id) => {
                let model = self.model(id);
                match &model.element {
                    Some(_) => "Array".to_string(),
                    None if model.name.is_empty() => format!("(parameters #{})", id.0),
                    None => qualify(model.namespace, &model.name),
                }
            }
            DeclRef::Property(id) => {
                let property = self.property(id);
                format!("{}.{}", self.describe(DeclRef::Model(property.model)), property.name)
            }
            DeclRef::Scalar(id) => {
                let scalar = self.scalar(id);
                qualify(scalar.namespace, &scalar.name)
            }
            DeclRef::Interface(id) => {
                let iface = self.interface(id);
                qualify(iface.namespace, &iface.name)
            }
            DeclRef::Operation(id) => {
                let op = self.operation(id);
                match op.interface {
                    Some(iface) => format!("{}.{}", self.describe(DeclRef::Interface(iface)), op.name),
                    None => op.name.clone(),
                }
            }
        }
    }

    // ========== Mutation used by relocation ==========

    pub(crate) fn namespace_mut(&mut self, id: NamespaceId) -> &mut Namespace {
        &mut self.namespaces[id.0]
    }
}

/// Split `A.B.C` into (`Some("A.B")`, `"C"`)
pub(crate) fn split_path(path: &str) -> (Option<&str>, &str) {
    match path.rsplit_once('.') {
        Some((parent, name)) => (Some(parent), name),
        None => (None, path),
    }
}
