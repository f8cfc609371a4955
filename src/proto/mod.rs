//! Post-processing of schema compiler output
//!
//! - [`patch`]: nests each `<pkg>/<version>.proto` one level deeper as
//!   `<pkg>/<version>/<pkg>.proto` and rewrites cross-file imports.
//! - [`descriptors`]: gathers the generated file descriptors into one
//!   registry module.

pub mod descriptors;
pub mod patch;

pub use descriptors::{collect_descriptors, render_aggregator, write_aggregator, CollectOptions, DescriptorFile};
pub use patch::{plan_patch, FileRelocation, ImportRename, ImportRewrite, ImportRewriter, PatchOptions, PatchPlan, PatchReport};

use std::path::{Component, Path, PathBuf};

use crate::error::{EmitError, Result};

/// Join path components with `/` regardless of platform
pub(crate) fn to_posix(path: &Path) -> String {
    path.components()
        .filter_map(|c| match c {
            Component::Normal(s) => Some(s.to_string_lossy().into_owned()),
            Component::ParentDir => Some("..".to_string()),
            _ => None,
        })
        .collect::<Vec<_>>()
        .join("/")
}

/// Absolute, lexically normalized form of `path` (no filesystem access
/// beyond reading the working directory)
pub(crate) fn normalize(path: &Path) -> Result<PathBuf> {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        let cwd = std::env::current_dir().map_err(|e| EmitError::io(path, e))?;
        cwd.join(path)
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                out.pop();
            }
            other => out.push(other.as_os_str()),
        }
    }
    Ok(out)
}

/// Path of `to` relative to directory `from`; both must be normalized
pub(crate) fn relative_path(from: &Path, to: &Path) -> PathBuf {
    let from: Vec<_> = from.components().collect();
    let to: Vec<_> = to.components().collect();
    let common = from.iter().zip(&to).take_while(|(a, b)| a == b).count();

    let mut rel = PathBuf::new();
    for _ in common..from.len() {
        rel.push("..");
    }
    for component in &to[common..] {
        rel.push(component.as_os_str());
    }
    rel
}

/// Wrap a walkdir failure as an IO error on the offending path
pub(crate) fn walk_error(root: &Path, err: walkdir::Error) -> EmitError {
    let path = err.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
    let io = err
        .into_io_error()
        .unwrap_or_else(|| std::io::Error::new(std::io::ErrorKind::Other, "filesystem loop"));
    EmitError::io(path, io)
}
