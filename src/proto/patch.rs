//! Proto Tree Patching
//!
//! The schema compiler writes one file per package version as
//! `<root>/<pkg>/<version>.proto`. Consumers expect
//! `<root>/<pkg>/<version>/<pkg>.proto`, so every file is nested one level
//! deeper and every import of an old path is rewritten to the new one.
//!
//! Planning reads the directory listing only. All import pairs are computed
//! before anything is renamed, so a half-moved tree never feeds back into
//! path computation. The patch is not meant to be applied twice to the same
//! tree.

use regex::{Captures, Regex};
use serde::{Deserialize, Serialize};
use similar::TextDiff;
use std::borrow::Cow;
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{to_posix, walk_error};
use crate::error::{EmitError, Result};

// =============================================================================
// Options
// =============================================================================

/// How old import strings are matched when rewriting file contents
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ImportRewrite {
    /// Replace every occurrence anywhere in the text. An out-of-tree path
    /// that merely contains an old path (`vendor/pkg/v1.proto`) is
    /// rewritten too.
    #[default]
    Substring,
    /// Replace only whole quoted paths (`"a/v1.proto"`, `'./a/v1.proto'`)
    Quoted,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PatchOptions {
    /// File extensions to relocate, without the dot
    pub extensions: Vec<String>,
    pub rewrite: ImportRewrite,
}

impl Default for PatchOptions {
    fn default() -> Self {
        Self {
            extensions: vec!["proto".to_string()],
            rewrite: ImportRewrite::Substring,
        }
    }
}

// =============================================================================
// Plan
// =============================================================================

/// One file move
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct FileRelocation {
    pub old_path: PathBuf,
    pub new_path: PathBuf,
}

/// Root-relative, `/`-separated import strings before and after the move
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct ImportRename {
    pub old: String,
    pub new: String,
}

/// Everything the patch will do, computed up front
#[derive(Debug, Clone)]
pub struct PatchPlan {
    root: PathBuf,
    relocations: Vec<FileRelocation>,
    imports: Vec<ImportRename>,
    rewrite: ImportRewrite,
}

/// Outcome of applying a plan
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct PatchReport {
    pub relocated: usize,
    /// Files whose contents changed
    pub rewritten: usize,
}

/// Dry-run rendering of one file's import rewrite
#[derive(Debug, Clone)]
pub struct FilePreview {
    pub relocation: FileRelocation,
    /// Unified diff of the content change; empty if nothing changes
    pub diff: String,
}

/// Plan the relocation of every matching file under `root`.
///
/// Files directly inside `root` have no package directory and are left
/// alone.
pub fn plan_patch(root: &Path, options: &PatchOptions) -> Result<PatchPlan> {
    let mut relocations = Vec::new();
    let mut imports = Vec::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| walk_error(root, e))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();

        let Some(ext) = path.extension().and_then(|e| e.to_str()) else {
            continue;
        };
        if !options.extensions.iter().any(|e| e == ext) {
            continue;
        }

        let (Some(dir), Some(stem)) = (path.parent(), path.file_stem()) else {
            continue;
        };
        if dir == root {
            tracing::debug!(path = %path.display(), "Skipping file without a package directory");
            continue;
        }
        let Some(package_dir) = dir.file_name() else {
            continue;
        };

        let mut file_name = package_dir.to_os_string();
        file_name.push(".");
        file_name.push(ext);
        let new_path = dir.join(stem).join(file_name);

        let old_rel = path.strip_prefix(root).unwrap_or(path);
        let new_rel = new_path.strip_prefix(root).unwrap_or(&new_path);
        imports.push(ImportRename {
            old: to_posix(old_rel),
            new: to_posix(new_rel),
        });
        relocations.push(FileRelocation {
            old_path: path.to_path_buf(),
            new_path,
        });
    }

    tracing::debug!(files = relocations.len(), root = %root.display(), "Planned proto relocation");

    Ok(PatchPlan {
        root: root.to_path_buf(),
        relocations,
        imports,
        rewrite: options.rewrite,
    })
}

impl PatchPlan {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn relocations(&self) -> &[FileRelocation] {
        &self.relocations
    }

    pub fn imports(&self) -> &[ImportRename] {
        &self.imports
    }

    pub fn is_empty(&self) -> bool {
        self.relocations.is_empty()
    }

    pub fn rewriter(&self) -> Result<ImportRewriter> {
        ImportRewriter::new(&self.imports, self.rewrite)
    }

    /// Rename every file, then rewrite imports in every relocated file
    pub fn apply(&self) -> Result<PatchReport> {
        let rewriter = self.rewriter()?;
        let mut report = PatchReport::default();

        for relocation in &self.relocations {
            if let Some(parent) = relocation.new_path.parent() {
                fs::create_dir_all(parent).map_err(|e| EmitError::io(parent, e))?;
            }
            fs::rename(&relocation.old_path, &relocation.new_path)
                .map_err(|e| EmitError::io(&relocation.old_path, e))?;
            report.relocated += 1;
        }

        for relocation in &self.relocations {
            let path = &relocation.new_path;
            let content = fs::read_to_string(path).map_err(|e| EmitError::io(path, e))?;
            if let Cow::Owned(updated) = rewriter.rewrite(&content) {
                if updated != content {
                    fs::write(path, updated).map_err(|e| EmitError::io(path, e))?;
                    report.rewritten += 1;
                }
            }
        }

        tracing::info!(
            relocated = report.relocated,
            rewritten = report.rewritten,
            "Patched proto tree"
        );
        Ok(report)
    }

    /// Render the content changes `apply` would make, without touching disk
    pub fn preview(&self) -> Result<Vec<FilePreview>> {
        let rewriter = self.rewriter()?;
        let mut previews = Vec::with_capacity(self.relocations.len());

        for (relocation, import) in self.relocations.iter().zip(&self.imports) {
            let path = &relocation.old_path;
            let content = fs::read_to_string(path).map_err(|e| EmitError::io(path, e))?;
            let updated = rewriter.rewrite(&content);

            let diff = if updated == content {
                String::new()
            } else {
                TextDiff::from_lines(content.as_str(), &*updated)
                    .unified_diff()
                    .context_radius(2)
                    .header(&import.old, &import.new)
                    .to_string()
            };
            previews.push(FilePreview {
                relocation: relocation.clone(),
                diff,
            });
        }

        Ok(previews)
    }
}

// =============================================================================
// Rewriting
// =============================================================================

/// Replaces old import strings with new ones in a single pass.
///
/// All old strings go into one alternation, longest first, so where one old
/// path is a prefix of another the longer one wins and replaced text is
/// never scanned again. The result does not depend on plan order.
#[derive(Debug, Clone)]
pub struct ImportRewriter {
    pattern: Option<Regex>,
    renames: HashMap<String, String>,
    mode: ImportRewrite,
}

impl ImportRewriter {
    pub fn new(imports: &[ImportRename], mode: ImportRewrite) -> Result<Self> {
        let renames: HashMap<String, String> = imports
            .iter()
            .map(|i| (i.old.clone(), i.new.clone()))
            .collect();

        if renames.is_empty() {
            return Ok(Self {
                pattern: None,
                renames,
                mode,
            });
        }

        let mut olds: Vec<&str> = renames.keys().map(String::as_str).collect();
        olds.sort_by(|a, b| b.len().cmp(&a.len()).then_with(|| a.cmp(b)));
        let alternation = olds
            .iter()
            .map(|s| regex::escape(s))
            .collect::<Vec<_>>()
            .join("|");

        let pattern = match mode {
            ImportRewrite::Substring => format!("(?:{})", alternation),
            ImportRewrite::Quoted => format!(r#"(["'])(\./)?({})(["'])"#, alternation),
        };

        Ok(Self {
            pattern: Some(Regex::new(&pattern)?),
            renames,
            mode,
        })
    }

    /// Rewrite every import occurrence in `text`
    pub fn rewrite<'t>(&self, text: &'t str) -> Cow<'t, str> {
        let Some(pattern) = &self.pattern else {
            return Cow::Borrowed(text);
        };

        pattern.replace_all(text, |caps: &Captures<'_>| match self.mode {
            ImportRewrite::Substring => self.renames[&caps[0]].clone(),
            ImportRewrite::Quoted => {
                let (open, close) = (&caps[1], &caps[4]);
                if open != close {
                    return caps[0].to_string();
                }
                let dot = caps.get(2).map_or("", |m| m.as_str());
                format!("{}{}{}{}", open, dot, self.renames[&caps[3]], close)
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn rename(old: &str, new: &str) -> ImportRename {
        ImportRename {
            old: old.into(),
            new: new.into(),
        }
    }

    #[test]
    fn test_substring_rewrite_prefers_longest() {
        let imports = vec![
            rename("a/v1.proto", "a/v1/a.proto"),
            rename("b/a/v1.proto", "b/a/v1/a.proto"),
        ];
        let rewriter = ImportRewriter::new(&imports, ImportRewrite::Substring).unwrap();
        let out = rewriter.rewrite("import \"b/a/v1.proto\";\nimport \"a/v1.proto\";\n");

        assert_eq!(out, "import \"b/a/v1/a.proto\";\nimport \"a/v1/a.proto\";\n");
    }

    #[test]
    fn test_rewrite_is_order_independent() {
        let mut imports = vec![
            rename("a/v1.proto", "a/v1/a.proto"),
            rename("b/a/v1.proto", "b/a/v1/a.proto"),
        ];
        let text = "import \"a/v1.proto\"; import \"b/a/v1.proto\";";
        let first = ImportRewriter::new(&imports, ImportRewrite::Substring).unwrap().rewrite(text).into_owned();
        imports.reverse();
        let second = ImportRewriter::new(&imports, ImportRewrite::Substring).unwrap().rewrite(text).into_owned();

        assert_eq!(first, second);
    }

    #[test]
    fn test_quoted_rewrite_ignores_unquoted() {
        let imports = vec![rename("pkg/v1.proto", "pkg/v1/pkg.proto")];
        let rewriter = ImportRewriter::new(&imports, ImportRewrite::Quoted).unwrap();
        let out = rewriter.rewrite("// see pkg/v1.proto\nimport \"./pkg/v1.proto\";\nimport 'pkg/v1.proto\";\n");

        assert_eq!(
            out,
            "// see pkg/v1.proto\nimport \"./pkg/v1/pkg.proto\";\nimport 'pkg/v1.proto\";\n"
        );
    }

    #[test]
    fn test_empty_rewriter_borrows() {
        let rewriter = ImportRewriter::new(&[], ImportRewrite::Substring).unwrap();
        assert!(matches!(rewriter.rewrite("syntax = \"proto3\";"), Cow::Borrowed(_)));
    }

    #[test]
    fn test_plan_skips_root_files_and_other_extensions() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("pkg")).unwrap();
        fs::write(root.join("pkg/v1.proto"), "syntax = \"proto3\";\n").unwrap();
        fs::write(root.join("pkg/README.md"), "docs\n").unwrap();
        fs::write(root.join("loose.proto"), "syntax = \"proto3\";\n").unwrap();

        let plan = plan_patch(root, &PatchOptions::default()).unwrap();
        assert_eq!(plan.relocations().len(), 1);
        assert_eq!(plan.relocations()[0].new_path, root.join("pkg/v1/pkg.proto"));
        assert_eq!(plan.imports(), &[rename("pkg/v1.proto", "pkg/v1/pkg.proto")]);
    }

    #[test]
    fn test_preview_does_not_touch_disk() {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();
        fs::create_dir_all(root.join("a")).unwrap();
        fs::create_dir_all(root.join("b")).unwrap();
        fs::write(root.join("a/v1.proto"), "syntax = \"proto3\";\n").unwrap();
        fs::write(root.join("b/v1.proto"), "syntax = \"proto3\";\nimport \"a/v1.proto\";\n").unwrap();

        let plan = plan_patch(root, &PatchOptions::default()).unwrap();
        let previews = plan.preview().unwrap();

        assert!(previews[0].diff.is_empty());
        assert!(previews[1].diff.contains("+import \"a/v1/a.proto\";"));
        assert!(root.join("b/v1.proto").exists());
    }
}
