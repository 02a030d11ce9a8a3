//! Package metadata parsed from `portgen.toml` files.

use std::{collections::BTreeMap, path::Path};

use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::codegen::BackendKind;

pub const DEFAULT_OUTPUT_DIR: &str = "src";

/// C and C++ share their default extension, so only one of them is enabled
/// by default.
pub const DEFAULT_BACKENDS: [BackendKind; 2] = [BackendKind::Cpp, BackendKind::CSharp];

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Metadata {
    pub package: PackageMetadata,
    #[serde(default)]
    pub dependencies: BTreeMap<Box<str>, DepReq>,
    #[serde(default)]
    pub output: OutputMetadata,
}

#[derive(Debug, Error)]
pub enum MetadataLoadError {
    #[error(transparent)]
    Io(#[from] std::io::Error),
    #[error(transparent)]
    Toml(#[from] toml::de::Error),
}

impl Metadata {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, MetadataLoadError> {
        let file_contents = std::fs::read_to_string(&path)?;
        let metadata = toml::from_str(&file_contents)?;
        Ok(metadata)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename = "package")]
pub struct PackageMetadata {
    pub name: Box<str>,
    pub version: Version,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DepReq {
    #[serde(default)]
    pub version: VersionReq,
}

/// The per-package output configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct OutputMetadata {
    /// The output root, relative to the package path.
    pub directory: Box<str>,
    pub backends: Box<[BackendKind]>,
    /// Re-emit every ancestor package into this package's output tree.
    pub regenerate_dependencies: bool,
    /// Emit collaborator mocks for the interfaces of direct dependencies.
    pub mock_dependencies: bool,
    pub extensions: ExtensionOverrides,
}

impl Default for OutputMetadata {
    fn default() -> Self {
        Self {
            directory: DEFAULT_OUTPUT_DIR.into(),
            backends: DEFAULT_BACKENDS.into(),
            regenerate_dependencies: false,
            mock_dependencies: false,
            extensions: ExtensionOverrides::default(),
        }
    }
}

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ExtensionOverrides {
    pub c: Option<Box<str>>,
    pub cpp: Option<Box<str>>,
    pub csharp: Option<Box<str>>,
}

impl ExtensionOverrides {
    pub fn get(&self, kind: BackendKind) -> Option<&str> {
        match kind {
            BackendKind::C => self.c.as_deref(),
            BackendKind::Cpp => self.cpp.as_deref(),
            BackendKind::CSharp => self.csharp.as_deref(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::{Metadata, OutputMetadata};
    use crate::codegen::BackendKind;

    #[test]
    fn metadata_from_toml() {
        let source = r#"
        [package]
        name = "app"
        version = "0.1.0-dev"

        [dependencies]
        base = { version = "0.1" }
        middle = {}

        [output]
        directory = "sources"
        backends = ["c", "cpp"]
        regenerate_dependencies = true

        [output.extensions]
        c = "hh"
        cpp = "hpp"
        "#;

        let metadata: Metadata = toml::from_str(source).unwrap();
        let prerelease_dev = semver::Prerelease::new("dev").unwrap();

        assert_eq!(metadata.package.name.as_ref(), "app");
        assert_eq!(metadata.package.version.minor, 1);
        assert_eq!(metadata.package.version.pre, prerelease_dev);

        let base = metadata.dependencies.get("base").unwrap();
        let middle = metadata.dependencies.get("middle").unwrap();
        assert!(base.version.matches(&semver::Version::new(0, 1, 4)));
        assert!(middle.version.matches(&semver::Version::new(7, 0, 0)));

        let output = &metadata.output;
        assert_eq!(output.directory.as_ref(), "sources");
        assert_eq!(output.backends.as_ref(), &[BackendKind::C, BackendKind::Cpp]);
        assert!(output.regenerate_dependencies);
        assert!(!output.mock_dependencies);
        assert_eq!(output.extensions.get(BackendKind::C), Some("hh"));
        assert_eq!(output.extensions.get(BackendKind::Cpp), Some("hpp"));
        assert_eq!(output.extensions.get(BackendKind::CSharp), None);
    }

    #[test]
    fn output_section_defaults() {
        let source = r#"
        [package]
        name = "base"
        version = "1.2.3"
        "#;

        let metadata: Metadata = toml::from_str(source).unwrap();
        assert!(metadata.dependencies.is_empty());
        assert_eq!(metadata.output, OutputMetadata::default());
        assert_eq!(
            metadata.output.backends.as_ref(),
            &[BackendKind::Cpp, BackendKind::CSharp]
        );
    }

    #[test]
    fn unknown_extension_keys_are_rejected() {
        let source = r#"
        [package]
        name = "base"
        version = "1.2.3"

        [output.extensions]
        rust = "rs"
        "#;

        assert!(toml::from_str::<Metadata>(source).is_err());
    }
}
