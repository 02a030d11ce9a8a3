//! The primary interface for loading packages from files.

use std::{
    fs,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, trace};

use crate::{
    ast::unbound::{self, LowerError, SchemaFile, is_identifier},
    symbol::StringInterner,
};

use super::{
    Module, ModulePath, PACKAGE_METADATA_FILE, PACKAGE_SCHEMA_DIR, Package,
    SCHEMA_FILE_EXTENSION, Workspace,
    metadata::{Metadata, MetadataLoadError},
};

/// Directories that are never searched for packages.
const SKIPPED_DIRS: &[&str] = &["target", "node_modules"];

#[derive(Debug, Error)]
pub enum PackageLoadError {
    #[error("Failed to read {}: {source}", .path.display())]
    Io {
        path: Box<Path>,
        source: std::io::Error,
    },
    #[error("Failed to parse {}: {source}", .path.display())]
    Metadata {
        path: Box<Path>,
        source: MetadataLoadError,
    },
    #[error("Failed to parse schema file {}: {source}", .path.display())]
    Schema {
        path: Box<Path>,
        source: toml::de::Error,
    },
    #[error("Invalid declarations in {}: {}", .path.display(), display_all(.errors))]
    Lower {
        path: Box<Path>,
        errors: Box<[LowerError]>,
    },
    #[error("Could not find `{}` in {}", PACKAGE_METADATA_FILE, .0.display())]
    MissingMetadata(Box<Path>),
    #[error("`{name}` in {} is not a valid module or directory name", .path.display())]
    InvalidModuleName { path: Box<Path>, name: Box<str> },
}

fn display_all(errors: &[LowerError]) -> String {
    errors
        .iter()
        .map(ToString::to_string)
        .collect::<Vec<_>>()
        .join("; ")
}

/// Loads every package below `root` into a [`Workspace`].
///
/// All packages are loaded even if some of them fail, so that every error
/// can be reported at once.
pub fn load_workspace(
    root: impl AsRef<Path>,
) -> Result<Workspace, Vec<PackageLoadError>> {
    let root = root.as_ref();
    let mut package_dirs = Vec::new();
    let mut errors = Vec::new();
    find_package_dirs(root, &mut package_dirs, &mut errors);

    let mut interner = StringInterner::new();
    let mut packages = Vec::with_capacity(package_dirs.len());

    for dir in package_dirs {
        match load_package(root, &dir, &mut interner) {
            Ok(package) => packages.push(package),
            Err(errs) => errors.extend(errs),
        }
    }

    match errors.is_empty() {
        true => {
            debug!(packages = packages.len(), root = %root.display(), "loaded workspace");
            Ok(Workspace::new(interner, packages))
        }
        false => Err(errors),
    }
}

/// Loads the package rooted at `dir`, whose path is recorded relative to
/// `workspace_root`.
pub fn load_package(
    workspace_root: &Path,
    dir: &Path,
    interner: &mut StringInterner,
) -> Result<Package<unbound::Module>, Vec<PackageLoadError>> {
    let metadata_path = dir.join(PACKAGE_METADATA_FILE);
    if !metadata_path.is_file() {
        return Err(vec![PackageLoadError::MissingMetadata(dir.into())]);
    }

    let metadata = Metadata::load(&metadata_path).map_err(|source| {
        vec![PackageLoadError::Metadata {
            path: metadata_path.clone().into(),
            source,
        }]
    })?;

    let mut errors = Vec::new();
    let mut files = Vec::new();
    let schema_root = dir.join(PACKAGE_SCHEMA_DIR);

    if schema_root.is_dir() {
        collect_schema_files(&schema_root, &mut files, &mut errors);
    }

    let mut modules = Vec::with_capacity(files.len());
    for file in files {
        match load_module(&schema_root, &file, interner) {
            Ok(module) => modules.push(module),
            Err(error) => errors.push(error),
        }
    }

    if !errors.is_empty() {
        return Err(errors);
    }

    let path = relative_path(workspace_root, dir);
    trace!(package = %metadata.package.name, %path, modules = modules.len(), "loaded package");

    Ok(Package {
        name: interner.intern(&metadata.package.name),
        version: metadata.package.version,
        path,
        dependencies: metadata
            .dependencies
            .into_iter()
            .map(|(name, req)| (interner.intern(&name), req.version))
            .collect(),
        output: metadata.output,
        modules: modules.into_boxed_slice(),
    })
}

fn load_module(
    schema_root: &Path,
    file: &Path,
    interner: &mut StringInterner,
) -> Result<Module<unbound::Module>, PackageLoadError> {
    let invalid_name = |name: &str| PackageLoadError::InvalidModuleName {
        path: file.into(),
        name: name.into(),
    };

    let stem = file
        .file_stem()
        .and_then(std::ffi::OsStr::to_str)
        .filter(|stem| is_identifier(stem))
        .ok_or_else(|| invalid_name(&file.display().to_string()))?;

    let mut dir = Vec::new();
    if let Some(parent) = file
        .parent()
        .and_then(|parent| parent.strip_prefix(schema_root).ok())
    {
        for component in parent.components() {
            let segment = component.as_os_str().to_string_lossy();
            if !is_identifier(&segment) {
                return Err(invalid_name(&segment));
            }
            dir.push(interner.intern(&segment));
        }
    }

    let source = fs::read_to_string(file).map_err(|source| {
        PackageLoadError::Io {
            path: file.into(),
            source,
        }
    })?;

    let schema = SchemaFile::from_toml(&source).map_err(|source| {
        PackageLoadError::Schema {
            path: file.into(),
            source,
        }
    })?;

    let content = schema.lower(interner).map_err(|errors| {
        PackageLoadError::Lower {
            path: file.into(),
            errors: errors.into_boxed_slice(),
        }
    })?;

    Ok(Module {
        name: interner.intern(stem),
        dir: ModulePath::new(dir),
        content,
    })
}

/// Recursively finds every directory below `dir` that contains a package
/// metadata file. Package directories are not searched for nested packages.
fn find_package_dirs(
    dir: &Path,
    package_dirs: &mut Vec<PathBuf>,
    errors: &mut Vec<PackageLoadError>,
) {
    if dir.join(PACKAGE_METADATA_FILE).is_file() {
        package_dirs.push(dir.to_path_buf());
        return;
    }

    for entry in sorted_entries(dir, errors) {
        let skipped = entry
            .file_name()
            .and_then(std::ffi::OsStr::to_str)
            .is_some_and(|name| {
                name.starts_with('.') || SKIPPED_DIRS.contains(&name)
            });

        if entry.is_dir() && !skipped {
            find_package_dirs(&entry, package_dirs, errors);
        }
    }
}

/// Globs all the schema files inside `dir`, recursively into any
/// subdirectories.
fn collect_schema_files(
    dir: &Path,
    files: &mut Vec<PathBuf>,
    errors: &mut Vec<PackageLoadError>,
) {
    for entry in sorted_entries(dir, errors) {
        if entry.is_dir() {
            collect_schema_files(&entry, files, errors);
        } else if entry.extension().and_then(std::ffi::OsStr::to_str)
            == Some(SCHEMA_FILE_EXTENSION)
        {
            files.push(entry);
        }
    }
}

/// Lists the entries of `dir` sorted by name, so that loading does not
/// depend on the order in which the filesystem returns them.
fn sorted_entries(
    dir: &Path,
    errors: &mut Vec<PackageLoadError>,
) -> Vec<PathBuf> {
    let read_dir = match fs::read_dir(dir) {
        Ok(read_dir) => read_dir,
        Err(source) => {
            errors.push(PackageLoadError::Io {
                path: dir.into(),
                source,
            });
            return Vec::new();
        }
    };

    let mut entries = read_dir
        .filter_map(Result::ok)
        .map(|entry| entry.path())
        .collect::<Vec<_>>();
    entries.sort();
    entries
}

fn relative_path(root: &Path, dir: &Path) -> Box<str> {
    dir.strip_prefix(root)
        .unwrap_or(dir)
        .components()
        .map(|component| component.as_os_str().to_string_lossy().into_owned())
        .collect::<Vec<_>>()
        .join("/")
        .into_boxed_str()
}

#[cfg(test)]
mod tests {
    use std::fs;

    use super::*;

    fn write(root: &Path, path: &str, contents: &str) {
        let path = root.join(path);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    #[test]
    fn load_nested_workspace() {
        let root = tempfile::tempdir().unwrap();
        write(
            root.path(),
            "test/base/portgen.toml",
            "[package]\nname = \"base\"\nversion = \"0.1.0\"\n",
        );
        write(
            root.path(),
            "test/base/schema/IBase.toml",
            "[[decl]]\nkind = \"enum\"\nname = \"Color\"\ncases = [\"RED\"]\n",
        );
        write(
            root.path(),
            "test/base/schema/geometry/Dims.toml",
            "[[decl]]\nkind = \"struct\"\nname = \"Dims\"\nfields = [{ name = \"width\", type = \"int\" }]\n",
        );
        write(
            root.path(),
            "test/app/portgen.toml",
            "[package]\nname = \"app\"\nversion = \"0.1.0\"\n[dependencies]\nbase = {}\n",
        );

        let workspace = load_workspace(root.path()).unwrap();
        assert_eq!(workspace.len(), 2);

        let (_, app) = workspace.packages().next().unwrap();
        assert_eq!(app.path.as_ref(), "test/app");
        assert_eq!(app.dependencies.len(), 1);
        assert!(app.modules.is_empty());

        let (_, base) = workspace.packages().nth(1).unwrap();
        assert_eq!(base.path.as_ref(), "test/base");
        let modules = base
            .modules
            .iter()
            .map(|module| {
                (
                    module.dir.display(&workspace.interner),
                    workspace.interner.get(module.name).to_owned(),
                )
            })
            .collect::<Vec<_>>();
        assert_eq!(
            modules,
            [
                (String::new(), "IBase".to_owned()),
                ("geometry".to_owned(), "Dims".to_owned()),
            ]
        );
    }

    #[test]
    fn load_errors_are_collected() {
        let root = tempfile::tempdir().unwrap();
        write(root.path(), "a/portgen.toml", "[package]\nname = 3\n");
        write(
            root.path(),
            "b/portgen.toml",
            "[package]\nname = \"b\"\nversion = \"0.1.0\"\n",
        );
        write(root.path(), "b/schema/bad-name.toml", "");
        write(root.path(), "b/schema/Broken.toml", "[[decl]]\nkind = 1\n");

        let errors = load_workspace(root.path()).unwrap_err();
        assert_eq!(errors.len(), 3);
        assert!(matches!(errors[0], PackageLoadError::Metadata { .. }));
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, PackageLoadError::InvalidModuleName { .. }))
        );
        assert!(
            errors
                .iter()
                .any(|e| matches!(e, PackageLoadError::Schema { .. }))
        );
    }

    #[test]
    fn missing_metadata() {
        let root = tempfile::tempdir().unwrap();
        let mut interner = StringInterner::new();
        let errors =
            load_package(root.path(), root.path(), &mut interner).unwrap_err();
        assert!(matches!(errors[0], PackageLoadError::MissingMetadata(_)));
    }
}
