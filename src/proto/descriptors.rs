//! File descriptor collection
//!
//! Scans generated TypeScript for exported file descriptors and renders a
//! single module that imports them all into one `files` array. Output is
//! fully determined by the directory contents.

use regex::Regex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use walkdir::WalkDir;

use super::{normalize, relative_path, to_posix, walk_error};
use crate::error::{EmitError, Result};

pub const DEFAULT_SUFFIX: &str = "_pb.ts";
pub const DEFAULT_PATTERN: &str = r"export\s+const\s+(file_[A-Za-z0-9_]+)\s*:\s*GenFile";
pub const DEFAULT_TYPE_IMPORT: &str = r#"import type { DescFile as FileDescriptor } from "@bufbuild/protobuf";"#;

const HEADER: &str = "// Code generated by apimeta-collect-descriptors. DO NOT EDIT.";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CollectOptions {
    /// Only files whose name ends with this are scanned
    pub suffix: String,
    /// Capture group 1 (or the whole match) is the descriptor identifier
    pub pattern: String,
    /// Import line that brings `FileDescriptor` into scope
    pub type_import: String,
}

impl Default for CollectOptions {
    fn default() -> Self {
        Self {
            suffix: DEFAULT_SUFFIX.to_string(),
            pattern: DEFAULT_PATTERN.to_string(),
            type_import: DEFAULT_TYPE_IMPORT.to_string(),
        }
    }
}

/// One descriptor found in a generated file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DescriptorFile {
    pub identifier: String,
    /// `./`-prefixed POSIX path relative to the output module, no extension
    pub import_path: String,
    /// Local name when `identifier` is already taken
    pub alias: Option<String>,
}

impl DescriptorFile {
    /// Name the descriptor is bound to in the output module
    pub fn local_name(&self) -> &str {
        self.alias.as_deref().unwrap_or(&self.identifier)
    }
}

/// Find every descriptor under `root`, in sorted path order.
///
/// `output` is the module that will import them; import paths are relative
/// to its directory and the file itself is never scanned.
pub fn collect_descriptors(root: &Path, output: &Path, options: &CollectOptions) -> Result<Vec<DescriptorFile>> {
    let pattern = Regex::new(&options.pattern)?;
    let output_abs = normalize(output)?;
    let output_dir = output_abs
        .parent()
        .map(Path::to_path_buf)
        .unwrap_or_else(|| PathBuf::from("/"));

    let mut found = Vec::new();
    let mut seen: HashMap<String, usize> = HashMap::new();

    for entry in WalkDir::new(root).sort_by_file_name() {
        let entry = entry.map_err(|e| walk_error(root, e))?;
        if !entry.file_type().is_file() {
            continue;
        }
        let path = entry.path();
        let name = entry.file_name().to_string_lossy();
        if !name.ends_with(&options.suffix) {
            continue;
        }

        let path_abs = normalize(path)?;
        if path_abs == output_abs {
            continue;
        }

        let content = fs::read_to_string(path).map_err(|e| EmitError::io(path, e))?;
        let Some(caps) = pattern.captures(&content) else {
            tracing::debug!(path = %path.display(), "No file descriptor export, skipping");
            continue;
        };
        let identifier = caps
            .get(1)
            .or_else(|| caps.get(0))
            .map(|m| m.as_str().to_string())
            .unwrap_or_default();

        let count = seen.entry(identifier.clone()).or_insert(0);
        *count += 1;
        let alias = (*count > 1).then(|| format!("{}_{}", identifier, count));

        found.push(DescriptorFile {
            identifier,
            import_path: import_path(&output_dir, &path_abs),
            alias,
        });
    }

    tracing::debug!(descriptors = found.len(), root = %root.display(), "Collected file descriptors");
    Ok(found)
}

fn import_path(from_dir: &Path, file: &Path) -> String {
    let rel = to_posix(&relative_path(from_dir, &file.with_extension("")));
    if rel.starts_with("../") {
        rel
    } else {
        format!("./{}", rel)
    }
}

/// Render the aggregator module
pub fn render_aggregator(files: &[DescriptorFile], options: &CollectOptions) -> String {
    let mut out = String::new();
    out.push_str(HEADER);
    out.push_str("\n\n");
    out.push_str(&options.type_import);
    out.push('\n');

    for file in files {
        match &file.alias {
            Some(alias) => out.push_str(&format!(
                "import {{ {} as {} }} from \"{}\";\n",
                file.identifier, alias, file.import_path
            )),
            None => out.push_str(&format!(
                "import {{ {} }} from \"{}\";\n",
                file.identifier, file.import_path
            )),
        }
    }

    out.push_str("\nexport const files: FileDescriptor[] = [\n");
    for file in files {
        out.push_str(&format!("  {},\n", file.local_name()));
    }
    out.push_str("];\n");
    out
}

/// Collect, render and write the aggregator to `output`
pub fn write_aggregator(root: &Path, output: &Path, options: &CollectOptions) -> Result<Vec<DescriptorFile>> {
    let files = collect_descriptors(root, output, options)?;
    let rendered = render_aggregator(&files, options);

    if let Some(parent) = output.parent().filter(|p| !p.as_os_str().is_empty()) {
        fs::create_dir_all(parent).map_err(|e| EmitError::io(parent, e))?;
    }
    fs::write(output, rendered).map_err(|e| EmitError::io(output, e))?;

    tracing::info!(descriptors = files.len(), output = %output.display(), "Wrote descriptor registry");
    Ok(files)
}
