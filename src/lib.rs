//! apimeta
//!
//! Post-compilation emitter for an API schema toolchain. Takes the
//! declaration graph produced by a host schema compiler, interprets its
//! annotations, and emits runtime type metadata (`meta.json`). Also ships
//! the two tools that tidy up a generated protobuf tree.
//!
//! ## Pipeline
//!
//! ```text
//! declarations.json
//!   └─ decl::loader ──► DeclarationGraph
//!        └─ annotations (walk order) ──► StateStore
//!             └─ closure: seed, close, relocate ──► MessageSet
//!                  └─ meta::synthesize ──► meta.json
//!
//! <proto root>/
//!   ├─ proto::patch        pkg/v1.proto ──► pkg/v1/pkg.proto
//!   └─ proto::descriptors  **/*_pb.ts  ──► files.ts
//! ```

pub mod annotations;
pub mod closure;
pub mod config;
pub mod decl;
pub mod diagnostics;
pub mod error;
pub mod meta;
pub mod pipeline;
pub mod proto;
pub mod state;

pub use annotations::{AnnotationRegistry, StateDelta};
pub use closure::{MessageGraph, MessageSet};
pub use config::EmitterConfig;
pub use decl::{DeclRef, DeclarationGraph, ModelId, NamespaceId, PropertyId};
pub use diagnostics::{DiagnosticCode, DiagnosticItem, Diagnostics};
pub use error::{EmitError, Result};
pub use meta::{MetadataIndex, TypeMetadataEntry};
pub use pipeline::{Pipeline, PipelineOutput};
pub use state::{StateKey, StateStore};
