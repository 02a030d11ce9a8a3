//! Central plumbing between CLI commands and internal functions.

use std::{
    fs,
    num::NonZeroUsize,
    path::{Path, PathBuf},
};

use thiserror::Error;
use tracing::{debug, info};

use crate::{
    codegen::Artifact,
    package::loader::{PackageLoadError, load_workspace},
    pipeline::{self, Failure, Options, Report},
};

/// The public result type of the [`driver`] module.
///
/// [`driver`]: self
pub type Result<T = ()> = std::result::Result<T, Error>;

#[derive(Debug, Error)]
pub enum Error {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("could not load the workspace at {}", .root.display())]
    Load {
        root: Box<Path>,
        errors: Vec<PackageLoadError>,
    },
    #[error("failed to write {}: {source}", .path.display())]
    Write {
        path: Box<Path>,
        source: std::io::Error,
    },
    #[error("{} package(s) could not be processed", .0.len())]
    Pipeline(Vec<Failure>),
}

impl Error {
    /// Renders this error and everything behind it as diagnostic lines.
    pub fn diagnostics(&self) -> Vec<String> {
        let mut lines = vec![format!("error: {self}")];

        match self {
            Error::Load { errors, .. } => {
                lines.extend(errors.iter().map(|error| format!("  - {error}")));
            }
            Error::Pipeline(failures) => {
                for failure in failures {
                    lines.push(format!("  - {failure}"));
                    lines.extend(
                        failure
                            .details()
                            .into_iter()
                            .map(|detail| format!("      {detail}")),
                    );
                }
            }
            Error::Io(_) | Error::Write { .. } => (),
        }

        lines
    }
}

#[derive(Debug, Clone)]
pub struct Generate {
    pub workspace: Box<Path>,
    /// The directory that artifact paths are relative to. Defaults to the
    /// workspace root.
    pub output: Option<Box<Path>>,
    pub jobs: Option<NonZeroUsize>,
    /// Plan the artifacts without writing them.
    pub dry_run: bool,
}

/// What a successful run produced.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Summary {
    pub packages: usize,
    /// The paths of the artifacts, relative to the output root.
    pub paths: Vec<Box<str>>,
}

/// Generates the artifacts of every package in the workspace.
///
/// The artifacts of packages that succeeded are written even if other
/// packages failed, in which case the failures are returned afterwards.
pub fn generate(command: &Generate) -> Result<Summary> {
    let workspace = load(&command.workspace)?;
    let report = pipeline::run(&workspace, options(command.jobs, true));

    let output = command.output.as_deref().unwrap_or(&*command.workspace);
    if !command.dry_run {
        write_artifacts(output, &report.artifacts)?;
    }

    finish(report)
}

/// Binds every package in the workspace without emitting anything.
pub fn check(workspace: &Path, jobs: Option<NonZeroUsize>) -> Result<Summary> {
    let workspace = load(workspace)?;
    finish(pipeline::run(&workspace, options(jobs, false)))
}

fn load(root: &Path) -> Result<crate::package::Workspace> {
    load_workspace(root).map_err(|errors| Error::Load {
        root: root.into(),
        errors,
    })
}

fn options(jobs: Option<NonZeroUsize>, emit: bool) -> Options {
    let defaults = Options::default();
    Options {
        jobs: jobs.unwrap_or(defaults.jobs),
        emit,
    }
}

fn finish(report: Report) -> Result<Summary> {
    match report.is_success() {
        true => Ok(Summary {
            packages: report.bound,
            paths: report
                .artifacts
                .into_iter()
                .map(|artifact| artifact.path)
                .collect(),
        }),
        false => Err(Error::Pipeline(report.failures)),
    }
}

/// Writes every artifact below `root`, creating directories as needed.
pub fn write_artifacts(root: &Path, artifacts: &[Artifact]) -> Result {
    for artifact in artifacts {
        let path = artifact_path(root, &artifact.path);

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(|source| Error::Write {
                path: parent.into(),
                source,
            })?;
        }

        fs::write(&path, &artifact.contents).map_err(|source| Error::Write {
            path: path.clone().into_boxed_path(),
            source,
        })?;
        debug!(path = %path.display(), "wrote artifact");
    }

    info!(artifacts = artifacts.len(), root = %root.display(), "wrote artifacts");
    Ok(())
}

/// Joins a `/`-separated artifact path onto `root`.
fn artifact_path(root: &Path, relative: &str) -> PathBuf {
    relative
        .split('/')
        .fold(root.to_path_buf(), |path, segment| path.join(segment))
}

// UTILITY FUNCTIONS

pub fn default_workspace() -> Result<Box<Path>> {
    std::env::current_dir()
        .map(PathBuf::into_boxed_path)
        .map_err(|err| err.into())
}

#[cfg(test)]
mod tests {
    use std::fs;

    use tempfile::TempDir;

    use super::*;
    use crate::test_utils::{DIMS_SCHEMA, IAPP_SCHEMA, IBASE_SCHEMA};

    fn write(root: &Path, relative: &str, contents: &str) {
        let path = root.join(relative);
        fs::create_dir_all(path.parent().unwrap()).unwrap();
        fs::write(path, contents).unwrap();
    }

    /// The base/app fixture on disk, with `app` regenerating `base` into
    /// `app/sources` with C++ and C# output.
    fn workspace() -> TempDir {
        let dir = tempfile::tempdir().unwrap();
        let root = dir.path();

        write(
            root,
            "base/portgen.toml",
            r#"
            [package]
            name = "base"
            version = "0.1.0"

            [output]
            backends = ["c"]
            "#,
        );
        write(root, "base/schema/IBase.toml", IBASE_SCHEMA);
        write(root, "base/schema/geometry/Dims.toml", DIMS_SCHEMA);

        write(
            root,
            "app/portgen.toml",
            r#"
            [package]
            name = "app"
            version = "0.1.0"

            [dependencies]
            base = { version = "0.1" }

            [output]
            directory = "sources"
            backends = ["cpp", "csharp"]
            regenerate_dependencies = true
            "#,
        );
        write(root, "app/schema/IApp.toml", IAPP_SCHEMA);

        dir
    }

    fn generate_in(root: &Path, dry_run: bool) -> Result<Summary> {
        generate(&Generate {
            workspace: root.into(),
            output: None,
            jobs: NonZeroUsize::new(2),
            dry_run,
        })
    }

    #[test]
    fn generate_writes_every_artifact() {
        let dir = workspace();
        let root = dir.path();
        let summary = generate_in(root, false).unwrap();

        assert_eq!(summary.packages, 2);
        for path in &summary.paths {
            assert!(artifact_path(root, path).is_file(), "missing {path}");
        }

        let base = fs::read_to_string(root.join("base/src/IBase.h")).unwrap();
        assert!(base.contains("enum Color {"));
        assert!(root.join("base/src/IBaseMock.h").is_file());

        let dims = fs::read_to_string(root.join("app/sources/geometry/Dims.cs")).unwrap();
        assert!(dims.contains("public record struct Dims"));
        let app = fs::read_to_string(root.join("app/sources/IApp.h")).unwrap();
        assert!(app.contains("#include \"app/sources/IBase.h\""));
    }

    #[test]
    fn dry_runs_write_nothing() {
        let dir = workspace();
        let summary = generate_in(dir.path(), true).unwrap();

        assert!(!summary.paths.is_empty());
        assert!(!dir.path().join("base/src").exists());
        assert!(!dir.path().join("app/sources").exists());
    }

    #[test]
    fn output_root_can_be_moved() {
        let dir = workspace();
        let out = tempfile::tempdir().unwrap();
        generate(&Generate {
            workspace: dir.path().into(),
            output: Some(out.path().into()),
            jobs: None,
            dry_run: false,
        })
        .unwrap();

        assert!(out.path().join("base/src/geometry/Dims.h").is_file());
        assert!(!dir.path().join("base/src").exists());
    }

    #[test]
    fn regeneration_is_idempotent_on_disk() {
        let dir = workspace();
        let root = dir.path();

        generate_in(root, false).unwrap();
        let first = fs::read_to_string(root.join("app/sources/IBase.cs")).unwrap();
        generate_in(root, false).unwrap();
        let second = fs::read_to_string(root.join("app/sources/IBase.cs")).unwrap();

        assert_eq!(first, second);
    }

    #[test]
    fn failures_keep_unrelated_output() {
        let dir = workspace();
        let root = dir.path();
        write(
            root,
            "broken/portgen.toml",
            r#"
            [package]
            name = "broken"
            version = "0.1.0"

            [dependencies]
            base = {}
            "#,
        );
        write(
            root,
            "broken/schema/Bad.toml",
            r#"
            [[decl]]
            kind = "struct"
            name = "Bad"
            fields = [{ name = "where", type = "Nowhere" }]
            "#,
        );

        let error = generate_in(root, false).unwrap_err();
        let Error::Pipeline(failures) = &error else {
            panic!("expected a pipeline error, got {error}");
        };
        assert_eq!(failures.len(), 1);
        assert!(root.join("app/sources/IApp.h").is_file());
        assert!(!root.join("broken/src").exists());

        let diagnostics = error.diagnostics();
        assert_eq!(diagnostics[0], "error: 1 package(s) could not be processed");
        assert_eq!(diagnostics[1], "  - failed to bind package `broken`");
        assert!(diagnostics[2].contains("Nowhere"));
    }

    #[test]
    fn check_binds_without_writing() {
        let dir = workspace();
        let summary = check(dir.path(), None).unwrap();

        assert_eq!(summary.packages, 2);
        assert!(summary.paths.is_empty());
        assert!(!dir.path().join("base/src").exists());
    }

    #[test]
    fn load_errors_are_collected() {
        let dir = tempfile::tempdir().unwrap();
        write(dir.path(), "bad/portgen.toml", "[package]\nname = 3\n");

        let error = check(dir.path(), None).unwrap_err();
        assert!(matches!(&error, Error::Load { errors, .. } if errors.len() == 1));
        assert_eq!(error.diagnostics().len(), 2);
    }
}
