//! Configuration management for the emitter
//!
//! Supports loading configuration from:
//! - Default values
//! - Config file (apimeta.toml)
//! - Environment variables (APIMETA__*)
//!
//! ## Example config file (apimeta.toml):
//! ```toml
//! [emit]
//! output_dir = "./generated"
//! meta_file = "meta.json"
//!
//! [proto]
//! extensions = ["proto"]
//! import_rewrite = "quoted"
//!
//! [descriptors]
//! suffix = "_pb.ts"
//! output = "gen/files.ts"
//! ```

use config_crate::{Config, Environment, File};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::error::{EmitError, Result};
use crate::proto::descriptors::{DEFAULT_PATTERN, DEFAULT_SUFFIX, DEFAULT_TYPE_IMPORT};
use crate::proto::{CollectOptions, ImportRewrite, PatchOptions};

/// Main configuration for the emitter binaries
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct EmitterConfig {
    /// Metadata emission
    #[serde(default)]
    pub emit: EmitSection,

    /// Proto tree patching
    #[serde(default)]
    pub proto: ProtoSection,

    /// Descriptor collection
    #[serde(default)]
    pub descriptors: DescriptorSection,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct EmitSection {
    /// Directory `meta.json` is written to
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,

    #[serde(default = "default_meta_file")]
    pub meta_file: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProtoSection {
    /// Extensions of files to relocate, without the dot
    #[serde(default = "default_extensions")]
    pub extensions: Vec<String>,

    /// `substring` or `quoted`
    #[serde(default)]
    pub import_rewrite: ImportRewrite,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DescriptorSection {
    #[serde(default = "default_suffix")]
    pub suffix: String,

    #[serde(default = "default_pattern")]
    pub pattern: String,

    /// Aggregator module path, relative to the scanned root
    #[serde(default = "default_descriptor_output")]
    pub output: PathBuf,

    #[serde(default = "default_type_import")]
    pub type_import: String,
}

// Default value functions
fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_meta_file() -> String {
    "meta.json".to_string()
}

fn default_extensions() -> Vec<String> {
    vec!["proto".to_string()]
}

fn default_suffix() -> String {
    DEFAULT_SUFFIX.to_string()
}

fn default_pattern() -> String {
    DEFAULT_PATTERN.to_string()
}

fn default_descriptor_output() -> PathBuf {
    PathBuf::from("files.ts")
}

fn default_type_import() -> String {
    DEFAULT_TYPE_IMPORT.to_string()
}

impl Default for EmitSection {
    fn default() -> Self {
        Self {
            output_dir: default_output_dir(),
            meta_file: default_meta_file(),
        }
    }
}

impl Default for ProtoSection {
    fn default() -> Self {
        Self {
            extensions: default_extensions(),
            import_rewrite: ImportRewrite::default(),
        }
    }
}

impl Default for DescriptorSection {
    fn default() -> Self {
        Self {
            suffix: default_suffix(),
            pattern: default_pattern(),
            output: default_descriptor_output(),
            type_import: default_type_import(),
        }
    }
}

impl EmitterConfig {
    /// Load configuration from default locations
    pub fn load() -> Result<Self> {
        Self::load_from(None)
    }

    /// Load configuration, layering an explicit file on top of the defaults
    pub fn load_from(config_path: Option<&Path>) -> Result<Self> {
        let mut builder = Config::builder();

        for location in ["apimeta.toml", ".apimeta.toml", "config/apimeta.toml"] {
            builder = builder.add_source(File::with_name(location).required(false));
        }

        if let Some(dirs) = directories::ProjectDirs::from("dev", "apimeta", "apimeta") {
            let xdg_config = dirs.config_dir().join("apimeta.toml");
            if xdg_config.exists() {
                builder = builder.add_source(File::from(xdg_config).required(false));
            }
        }

        if let Some(path) = config_path {
            builder = builder.add_source(File::from(path.to_path_buf()).required(true));
        }

        builder = builder.add_source(
            Environment::with_prefix("APIMETA")
                .prefix_separator("__")
                .separator("__")
                .list_separator(",")
                .with_list_parse_key("proto.extensions")
                .try_parsing(true),
        );

        let config = builder.build()?.try_deserialize()?;
        Ok(config)
    }

    /// Save configuration to a TOML file
    pub fn save(&self, path: &Path) -> Result<()> {
        let content = self.to_toml()?;
        std::fs::write(path, content).map_err(|e| EmitError::io(path, e))
    }

    pub fn to_toml(&self) -> Result<String> {
        toml::to_string_pretty(self).map_err(|e| {
            EmitError::Config(config_crate::ConfigError::Message(e.to_string()))
        })
    }

    /// Check values that deserialize fine but cannot work
    pub fn validate(&self) -> Result<()> {
        regex::Regex::new(&self.descriptors.pattern)?;
        if self.emit.meta_file.is_empty() {
            return Err(config_message("emit.meta_file must not be empty"));
        }
        if self.proto.extensions.iter().any(|e| e.is_empty() || e.starts_with('.')) {
            return Err(config_message("proto.extensions entries are bare extensions like \"proto\""));
        }
        if self.descriptors.suffix.is_empty() {
            return Err(config_message("descriptors.suffix must not be empty"));
        }
        Ok(())
    }

    pub fn patch_options(&self) -> PatchOptions {
        PatchOptions {
            extensions: self.proto.extensions.clone(),
            rewrite: self.proto.import_rewrite,
        }
    }

    pub fn collect_options(&self) -> CollectOptions {
        CollectOptions {
            suffix: self.descriptors.suffix.clone(),
            pattern: self.descriptors.pattern.clone(),
            type_import: self.descriptors.type_import.clone(),
        }
    }

    /// Aggregator path for a scan of `root`
    pub fn descriptor_output(&self, root: &Path) -> PathBuf {
        if self.descriptors.output.is_absolute() {
            self.descriptors.output.clone()
        } else {
            root.join(&self.descriptors.output)
        }
    }
}

fn config_message(msg: &str) -> EmitError {
    EmitError::Config(config_crate::ConfigError::Message(msg.to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = EmitterConfig::default();
        assert_eq!(config.emit.meta_file, "meta.json");
        assert_eq!(config.proto.import_rewrite, ImportRewrite::Substring);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_serialize_config() {
        let toml_str = EmitterConfig::default().to_toml().unwrap();
        assert!(toml_str.contains("[emit]"));
        assert!(toml_str.contains("[proto]"));
        assert!(toml_str.contains("import_rewrite = \"substring\""));
    }

    #[test]
    fn test_load_explicit_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("custom.toml");
        std::fs::write(&path, "[proto]\nimport_rewrite = \"quoted\"\n\n[emit]\nmeta_file = \"types.json\"\n").unwrap();

        let config = EmitterConfig::load_from(Some(&path)).unwrap();
        assert_eq!(config.proto.import_rewrite, ImportRewrite::Quoted);
        assert_eq!(config.emit.meta_file, "types.json");
        assert_eq!(config.proto.extensions, vec!["proto".to_string()]);
    }

    #[test]
    fn test_save_round_trip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("apimeta.toml");
        let mut config = EmitterConfig::default();
        config.descriptors.output = PathBuf::from("gen/registry.ts");
        config.save(&path).unwrap();

        let loaded = EmitterConfig::load_from(Some(&path)).unwrap();
        assert_eq!(loaded.descriptors.output, PathBuf::from("gen/registry.ts"));
    }

    #[test]
    fn test_validate_rejects_bad_pattern() {
        let mut config = EmitterConfig::default();
        config.descriptors.pattern = "(unclosed".to_string();
        assert!(matches!(config.validate(), Err(EmitError::Regex(_))));
    }
}
