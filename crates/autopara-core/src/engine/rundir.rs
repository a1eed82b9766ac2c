//! Isolated working directories for single calculations.
//!
//! Every calculation gets a fresh, uniquely named run directory. When a scratch root is
//! configured the calculation actually runs in a mirror directory on scratch storage,
//! and whatever survives the keep policy is moved back to the permanent run directory at
//! teardown.

use super::config::ConfigError;
use glob::Pattern;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use thiserror::Error;
use tracing::{debug, warn};

pub const DEFAULT_RUNDIR_PREFIX: &str = "run_";

#[derive(Debug, Error)]
pub enum RunDirError {
    #[error("Failed to create run directory under {root:?}: {source}")]
    Create {
        root: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to create scratch directory {path:?}: {source}")]
    Scratch {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Failed to clean up run directory {path:?}: {source}")]
    Cleanup {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    #[error("Invalid keep-files pattern '{pattern}': {message}")]
    Pattern { pattern: String, message: String },
}

/// Which files of a successful calculation survive teardown.
///
/// After a failed calculation every file is kept, whatever the policy.
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(try_from = "KeepFilesRepr", into = "KeepFilesRepr")]
pub enum KeepFiles {
    All,
    None,
    /// The calculator's own default set.
    #[default]
    Default,
    Globs(Vec<String>),
}

#[derive(Serialize, Deserialize)]
#[serde(untagged)]
enum KeepFilesRepr {
    Flag(bool),
    Word(String),
    List(Vec<String>),
}

impl TryFrom<KeepFilesRepr> for KeepFiles {
    type Error = RunDirError;

    fn try_from(repr: KeepFilesRepr) -> Result<Self, Self::Error> {
        let keep = match repr {
            KeepFilesRepr::Flag(true) => KeepFiles::All,
            KeepFilesRepr::Flag(false) => KeepFiles::None,
            KeepFilesRepr::Word(word) => match word.as_str() {
                "*" | "all" => KeepFiles::All,
                "none" => KeepFiles::None,
                "default" => KeepFiles::Default,
                _ => KeepFiles::Globs(vec![word]),
            },
            KeepFilesRepr::List(globs) => KeepFiles::Globs(globs),
        };
        keep.check_patterns()?;
        Ok(keep)
    }
}

impl From<KeepFiles> for KeepFilesRepr {
    fn from(keep: KeepFiles) -> Self {
        match keep {
            KeepFiles::All => KeepFilesRepr::Flag(true),
            KeepFiles::None => KeepFilesRepr::Flag(false),
            KeepFiles::Default => KeepFilesRepr::Word("default".to_string()),
            KeepFiles::Globs(globs) => KeepFilesRepr::List(globs),
        }
    }
}

impl FromStr for KeepFiles {
    type Err = RunDirError;

    /// Parses `all`, `none`, `default`, `true`, `false`, `*` or a comma-separated glob list.
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let repr = match s.trim() {
            "true" => KeepFilesRepr::Flag(true),
            "false" => KeepFilesRepr::Flag(false),
            word @ ("*" | "all" | "none" | "default") => KeepFilesRepr::Word(word.to_string()),
            list => KeepFilesRepr::List(
                list.split(',')
                    .map(str::trim)
                    .filter(|g| !g.is_empty())
                    .map(String::from)
                    .collect(),
            ),
        };
        KeepFiles::try_from(repr)
    }
}

impl fmt::Display for KeepFiles {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            KeepFiles::All => f.write_str("all"),
            KeepFiles::None => f.write_str("none"),
            KeepFiles::Default => f.write_str("default"),
            KeepFiles::Globs(globs) => f.write_str(&globs.join(",")),
        }
    }
}

impl KeepFiles {
    fn check_patterns(&self) -> Result<(), RunDirError> {
        if let KeepFiles::Globs(globs) = self {
            compile(globs)?;
        }
        Ok(())
    }
}

fn compile(globs: &[String]) -> Result<Vec<Pattern>, RunDirError> {
    globs
        .iter()
        .map(|g| {
            Pattern::new(g).map_err(|e| RunDirError::Pattern {
                pattern: g.clone(),
                message: e.to_string(),
            })
        })
        .collect()
}

enum KeepMatcher {
    Everything,
    Nothing,
    Patterns(Vec<Pattern>),
}

impl KeepMatcher {
    fn new(keep: &KeepFiles, default_keep: &[String]) -> Result<Self, RunDirError> {
        Ok(match keep {
            KeepFiles::All => Self::Everything,
            KeepFiles::None => Self::Nothing,
            KeepFiles::Default => Self::Patterns(compile(default_keep)?),
            KeepFiles::Globs(globs) => Self::Patterns(compile(globs)?),
        })
    }

    fn keeps(&self, name: &str) -> bool {
        match self {
            Self::Everything => true,
            Self::Nothing => false,
            Self::Patterns(patterns) => patterns.iter().any(|p| p.matches(name)),
        }
    }
}

/// Where run directories are created and what happens to them afterwards.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub struct RunDirConfig {
    /// Base directory; the current directory when unset.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub workdir: Option<PathBuf>,
    /// Name prefix of every run directory, optionally with parent directories
    /// (`calcs/run_`).
    #[serde(default = "default_rundir_prefix")]
    pub rundir_prefix: String,
    /// Root of fast scratch storage to run calculations in.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub scratchdir: Option<PathBuf>,
    #[serde(default)]
    pub keep_files: KeepFiles,
}

fn default_rundir_prefix() -> String {
    DEFAULT_RUNDIR_PREFIX.to_string()
}

impl Default for RunDirConfig {
    fn default() -> Self {
        Self {
            workdir: None,
            rundir_prefix: default_rundir_prefix(),
            scratchdir: None,
            keep_files: KeepFiles::default(),
        }
    }
}

impl RunDirConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.workdir.is_some() && Path::new(&self.rundir_prefix).is_absolute() {
            return Err(ConfigError::Invalid {
                parameter: "rundir_prefix",
                reason: format!(
                    "absolute prefix '{}' cannot be combined with an explicit workdir",
                    self.rundir_prefix
                ),
            });
        }
        self.keep_files
            .check_patterns()
            .map_err(|e| ConfigError::Invalid {
                parameter: "keep_files",
                reason: e.to_string(),
            })
    }

    /// Splits the prefix into the directory run directories live in and their name prefix.
    fn parent_and_name(&self) -> (PathBuf, String) {
        let prefix = Path::new(&self.rundir_prefix);
        let joined = match &self.workdir {
            Some(workdir) => workdir.join(prefix),
            None => prefix.to_path_buf(),
        };
        if self.rundir_prefix.is_empty() || self.rundir_prefix.ends_with(['/', '\\']) {
            let root = if joined.as_os_str().is_empty() {
                PathBuf::from(".")
            } else {
                joined
            };
            return (root, String::new());
        }
        let name = joined
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_default();
        let parent = match joined.parent() {
            Some(p) if !p.as_os_str().is_empty() => p.to_path_buf(),
            _ => PathBuf::from("."),
        };
        (parent, name)
    }
}

/// What teardown did.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TeardownReport {
    pub removed: usize,
    pub kept: usize,
    /// Scratch directory left in place because it was not empty after the move back.
    pub scratch_left: Option<PathBuf>,
    /// Whether the (empty) permanent run directory itself was removed.
    pub rundir_removed: bool,
}

/// A run directory created for exactly one calculation.
#[derive(Debug)]
pub struct RunDirectory {
    path: PathBuf,
    scratch: Option<PathBuf>,
}

impl RunDirectory {
    /// Creates a new uniquely named run directory, plus its scratch mirror if configured.
    ///
    /// # Errors
    ///
    /// Fails if either directory cannot be created; no directory is left behind.
    pub fn setup(config: &RunDirConfig) -> Result<Self, RunDirError> {
        let (parent, name) = config.parent_and_name();
        let create_error = |source| RunDirError::Create {
            root: parent.clone(),
            source,
        };

        fs::create_dir_all(&parent).map_err(create_error)?;
        let path = tempfile::Builder::new()
            .prefix(&name)
            .tempdir_in(&parent)
            .map_err(create_error)?
            .keep();

        let scratch = match &config.scratchdir {
            None => None,
            Some(root) => match Self::create_scratch(root, &path) {
                Ok(scratch) => Some(scratch),
                Err(e) => {
                    let _ = fs::remove_dir(&path);
                    return Err(e);
                }
            },
        };

        debug!(rundir = ?path, scratch = ?scratch, "run directory created");
        Ok(Self { path, scratch })
    }

    fn create_scratch(root: &Path, rundir: &Path) -> Result<PathBuf, RunDirError> {
        let resolved = fs::canonicalize(rundir).map_err(|source| RunDirError::Create {
            root: rundir.to_path_buf(),
            source,
        })?;
        let mirror_name = resolved
            .to_string_lossy()
            .trim_start_matches(['/', '\\'])
            .replace(['/', '\\', ':'], "_");
        let scratch = root.join(mirror_name);
        fs::create_dir_all(&scratch).map_err(|source| RunDirError::Scratch {
            path: scratch.clone(),
            source,
        })?;
        Ok(scratch)
    }

    /// The directory the calculation should run in.
    pub fn working_path(&self) -> &Path {
        self.scratch.as_deref().unwrap_or(&self.path)
    }

    /// The permanent run directory, where kept files end up.
    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn scratch_path(&self) -> Option<&Path> {
        self.scratch.as_deref()
    }

    /// Applies the keep policy (only when `succeeded`) and moves scratch contents home.
    ///
    /// A scratch directory that is still non-empty after the move is left in place with
    /// a warning; it is reported in [`TeardownReport::scratch_left`].
    ///
    /// # Errors
    ///
    /// A keep policy that cannot be applied is reported after the scratch contents have
    /// been moved home, so nothing is stranded on scratch storage.
    pub fn teardown(
        self,
        keep: &KeepFiles,
        default_keep: &[String],
        succeeded: bool,
    ) -> Result<TeardownReport, RunDirError> {
        let mut report = TeardownReport::default();
        let cleanup = if succeeded {
            KeepMatcher::new(keep, default_keep)
        } else {
            Ok(KeepMatcher::Everything)
        }
        .and_then(|matcher| prune(self.working_path(), &matcher, &mut report));

        if let Some(scratch) = &self.scratch {
            relocate_contents(scratch, &self.path);
            match fs::remove_dir(scratch) {
                Ok(()) => {}
                Err(e) => {
                    warn!(
                        "Scratch directory {:?} not removed ({}); leaving it in place",
                        scratch, e
                    );
                    report.scratch_left = Some(scratch.clone());
                }
            }
        }

        cleanup?;

        if succeeded && *keep == KeepFiles::None && is_empty_dir(&self.path) {
            fs::remove_dir(&self.path).map_err(|source| RunDirError::Cleanup {
                path: self.path.clone(),
                source,
            })?;
            report.rundir_removed = true;
        }

        debug!(rundir = ?self.path, ?report, "run directory torn down");
        Ok(report)
    }
}

/// Removes every entry of `dir` the matcher does not keep.
fn prune(
    dir: &Path,
    matcher: &KeepMatcher,
    report: &mut TeardownReport,
) -> Result<(), RunDirError> {
    let cleanup_error = |source| RunDirError::Cleanup {
        path: dir.to_path_buf(),
        source,
    };
    for entry in fs::read_dir(dir).map_err(cleanup_error)? {
        let entry = entry.map_err(cleanup_error)?;
        if matcher.keeps(&entry.file_name().to_string_lossy()) {
            report.kept += 1;
            continue;
        }
        let path = entry.path();
        let removed = if entry.file_type().map_err(cleanup_error)?.is_dir() {
            fs::remove_dir_all(&path)
        } else {
            fs::remove_file(&path)
        };
        removed.map_err(cleanup_error)?;
        report.removed += 1;
    }
    Ok(())
}

fn relocate_contents(from: &Path, to: &Path) {
    let entries = match fs::read_dir(from) {
        Ok(entries) => entries,
        Err(e) => {
            warn!("Cannot list scratch directory {:?}: {}", from, e);
            return;
        }
    };
    for entry in entries.flatten() {
        let source = entry.path();
        let target = to.join(entry.file_name());
        if fs::rename(&source, &target).is_ok() {
            continue;
        }
        // crossing filesystems
        let copied = copy_recursive(&source, &target).and_then(|()| {
            if source.is_dir() {
                fs::remove_dir_all(&source)
            } else {
                fs::remove_file(&source)
            }
        });
        if let Err(e) = copied {
            warn!("Failed to move {:?} to {:?}: {}", source, target, e);
        }
    }
}

fn copy_recursive(from: &Path, to: &Path) -> io::Result<()> {
    if from.is_dir() {
        fs::create_dir_all(to)?;
        for entry in fs::read_dir(from)? {
            let entry = entry?;
            copy_recursive(&entry.path(), &to.join(entry.file_name()))?;
        }
        Ok(())
    } else {
        fs::copy(from, to).map(|_| ())
    }
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path)
        .map(|mut entries| entries.next().is_none())
        .unwrap_or(false)
}
