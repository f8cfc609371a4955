//! Diagnostics
//!
//! Collects authoring problems found while applying annotations and
//! closing the message graph. Nothing here ever fails a run: misuse is
//! tolerated and only surfaces as missing metadata downstream, so these
//! items exist to make that visible in logs.

use serde::{Deserialize, Serialize};
use std::fmt;

// =============================================================================
// Diagnostic Codes
// =============================================================================

/// Diagnostic code for categorizing issues
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DiagnosticCode {
    /// Annotation name has no registered handler for this declaration kind
    UnknownAnnotation,
    /// `@external` applied to a model that is not a template instance
    ExternalOnNonTemplate,
    /// `@copyParent` source has no parent link recorded yet
    CopyParentMissing,
    /// `@move` target namespace no longer exists
    DanglingMoveTarget,
    /// Messages that reference each other in a cycle
    RecursiveMessageGroup,
    /// `@move` target already has a member under the moved model's name
    RelocationNameConflict,
    /// Two package members map to the same metadata type name
    DuplicateTypeName,
}

impl DiagnosticCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::UnknownAnnotation => "W001",
            Self::ExternalOnNonTemplate => "I003",
            Self::CopyParentMissing => "I001",
            Self::DanglingMoveTarget => "W003",
            Self::RecursiveMessageGroup => "I002",
            Self::RelocationNameConflict => "W004",
            Self::DuplicateTypeName => "W005",
        }
    }

    pub fn severity(&self) -> Severity {
        match self {
            Self::UnknownAnnotation
            | Self::DanglingMoveTarget
            | Self::RelocationNameConflict
            | Self::DuplicateTypeName => Severity::Warning,

            Self::ExternalOnNonTemplate
            | Self::CopyParentMissing
            | Self::RecursiveMessageGroup => Severity::Info,
        }
    }
}

impl fmt::Display for DiagnosticCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

// =============================================================================
// Severity
// =============================================================================

/// Diagnostic severity level
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum Severity {
    Info,
    Warning,
}

impl fmt::Display for Severity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Info => write!(f, "info"),
            Self::Warning => write!(f, "warning"),
        }
    }
}

// =============================================================================
// Diagnostic Item
// =============================================================================

/// A single diagnostic item
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiagnosticItem {
    /// Display path of the declaration this is about
    pub decl: String,
    pub code: DiagnosticCode,
    pub message: String,
    /// Additional context (suggestions, related declarations)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub context: Vec<String>,
}

impl DiagnosticItem {
    pub fn new(decl: impl Into<String>, code: DiagnosticCode, message: impl Into<String>) -> Self {
        Self {
            decl: decl.into(),
            code,
            message: message.into(),
            context: Vec::new(),
        }
    }

    pub fn with_context(mut self, ctx: impl Into<String>) -> Self {
        self.context.push(ctx.into());
        self
    }

    pub fn severity(&self) -> Severity {
        self.code.severity()
    }
}

impl fmt::Display for DiagnosticItem {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "[{}] {}: {} ({})",
            self.code,
            self.code.severity(),
            self.message,
            self.decl
        )?;

        for ctx in &self.context {
            write!(f, "\n  - {}", ctx)?;
        }

        Ok(())
    }
}

// =============================================================================
// Diagnostics Collection
// =============================================================================

/// Collection of diagnostics from one pipeline run
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Diagnostics {
    items: Vec<DiagnosticItem>,
}

impl Diagnostics {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&mut self, item: DiagnosticItem) {
        self.items.push(item);
    }

    pub fn report(&mut self, decl: impl Into<String>, code: DiagnosticCode, message: impl Into<String>) {
        self.push(DiagnosticItem::new(decl, code, message));
    }

    pub fn warnings(&self) -> impl Iterator<Item = &DiagnosticItem> {
        self.items.iter().filter(|i| i.severity() == Severity::Warning)
    }

    /// Items carrying the given code
    pub fn with_code(&self, code: DiagnosticCode) -> impl Iterator<Item = &DiagnosticItem> {
        self.items.iter().filter(move |i| i.code == code)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }

    pub fn warning_count(&self) -> usize {
        self.warnings().count()
    }

    /// Emit every item through `tracing` at its severity
    pub fn log(&self) {
        for item in &self.items {
            match item.severity() {
                Severity::Warning => tracing::warn!("{}", item),
                Severity::Info => tracing::debug!("{}", item),
            }
        }
    }
}

impl fmt::Display for Diagnostics {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for item in &self.items {
            writeln!(f, "{}", item)?;
        }
        if !self.is_empty() {
            writeln!(f, "\n{} warning(s)", self.warning_count())?;
        }
        Ok(())
    }
}

impl<'a> IntoIterator for &'a Diagnostics {
    type Item = &'a DiagnosticItem;
    type IntoIter = std::slice::Iter<'a, DiagnosticItem>;

    fn into_iter(self) -> Self::IntoIter {
        self.items.iter()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_diagnostic_severity() {
        assert_eq!(DiagnosticCode::UnknownAnnotation.severity(), Severity::Warning);
        assert_eq!(DiagnosticCode::CopyParentMissing.severity(), Severity::Info);
        assert_eq!(DiagnosticCode::ExternalOnNonTemplate.severity(), Severity::Info);
        assert_eq!(DiagnosticCode::RelocationNameConflict.severity(), Severity::Warning);
    }

    #[test]
    fn test_diagnostics_collection() {
        let mut diags = Diagnostics::new();
        diags.report("Foo.Bar", DiagnosticCode::ExternalOnNonTemplate, "not a template instance");
        diags.report("Foo.Baz", DiagnosticCode::CopyParentMissing, "no parent yet");
        diags.report("Foo.Qux", DiagnosticCode::DanglingMoveTarget, "target gone");

        assert_eq!(diags.len(), 3);
        assert_eq!(diags.warning_count(), 1);
        assert_eq!(diags.with_code(DiagnosticCode::CopyParentMissing).count(), 1);
    }

    #[test]
    fn test_display_includes_context() {
        let item = DiagnosticItem::new("Foo.Bar", DiagnosticCode::UnknownAnnotation, "unknown @kye")
            .with_context("did you mean @key?");
        let rendered = item.to_string();
        assert!(rendered.starts_with("[W001] warning"));
        assert!(rendered.contains("did you mean @key?"));
    }
}
